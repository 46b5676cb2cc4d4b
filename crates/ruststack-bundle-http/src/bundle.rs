//! Bundle coordinator.
//!
//! Drives the [`MultipartReader`] part by part, turns each part into a
//! [`CommitRequest`], hands it to the [`BundleHandler`] and collects the
//! results into a [`BundleOutcome`].
//!
//! Structural problems (framing, length mismatch, repeated identifiers) abort
//! the bundle regardless of policy. Commit failures are recorded and skipped
//! under [`ErrorPolicy::Isolate`] and abort under [`ErrorPolicy::Abort`].
//! Parts committed before an abort stay committed.

use std::collections::HashSet;

use bytes::Bytes;
use http_body::Body;
use ruststack_bundle_model::error::{BundleError, BundleErrorCode};
use ruststack_bundle_model::{
    BundleMetadata, BundleOutcome, BundlePart, CommitFailure, CommitRequest, CommitResult,
    ErrorPolicy, PartHeaderMap, headers, normalize_path,
};
use ruststack_bundle_xml::metadata_from_xml;
use tracing::{debug, info, warn};

use crate::dispatch::BundleHandler;
use crate::multipart::MultipartReader;
use crate::service::BundleHttpConfig;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A part resolved to its outcome key and, unless it was rejected up front,
/// the request to commit.
#[derive(Debug)]
struct PreparedPart {
    key: String,
    request: Result<CommitRequest, CommitFailure>,
}

/// Process one bundle request body.
///
/// # Errors
///
/// Returns a [`BundleError`] when the bundle is aborted: on any structural
/// error, and under [`ErrorPolicy::Abort`] on the first failed part.
pub async fn handle_bundle<H, B>(
    handler: &H,
    content_type: &str,
    body: B,
    config: &BundleHttpConfig,
) -> Result<BundleOutcome, BundleError>
where
    H: BundleHandler + ?Sized,
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    let mut reader =
        MultipartReader::new(body, content_type)?.with_max_part_size(config.max_part_size);

    let mut outcome = BundleOutcome::new();
    let mut metadata: Option<BundleMetadata> = None;
    let mut content_ids = HashSet::new();
    let mut first = true;

    while !reader.at_terminal_boundary().await? {
        let (part_headers, content) = reader.next_part(None).await?;

        if std::mem::take(&mut first) && is_metadata_part(&part_headers) {
            let parsed = metadata_from_xml(&content).map_err(|e| {
                BundleError::bad_request(format!("invalid bundle metadata: {e}")).with_source(e)
            })?;
            debug!(files = parsed.len(), "read bundle metadata");
            metadata = Some(parsed);
            continue;
        }

        let part = BundlePart {
            headers: part_headers,
            content,
        };
        let PreparedPart { key, request } =
            prepare_part(&part, metadata.as_ref(), &mut content_ids)?;

        if outcome.contains(&key) {
            return Err(BundleError::bad_request(format!("{key} appears twice in the bundle"))
                .with_resource(key));
        }

        debug!(key = %key, size = part.content.len(), "processing bundle part");
        let result = match request {
            Ok(request) => commit_checked(handler, request).await,
            Err(failure) => CommitResult::Failure(failure),
        };

        if let CommitResult::Failure(failure) = &result {
            if config.error_policy == ErrorPolicy::Abort {
                warn!(key = %key, code = %failure.code, "aborting bundle on failed part");
                return Err(
                    BundleError::with_message(failure.code, failure.message.clone())
                        .with_resource(key),
                );
            }
        }

        outcome
            .record(key, result)
            .map_err(|dup| BundleError::bad_request(dup.to_string()))?;
    }

    info!(
        parts = outcome.len(),
        failed = outcome.failure_count(),
        "bundle processed"
    );
    Ok(outcome)
}

/// The first part is metadata when it is XML.
fn is_metadata_part(part_headers: &PartHeaderMap) -> bool {
    part_headers
        .get(headers::CONTENT_TYPE)
        .and_then(|v| v.split(';').next())
        .is_some_and(|essence| {
            let essence = essence.trim();
            essence.eq_ignore_ascii_case("text/xml")
                || essence.eq_ignore_ascii_case("application/xml")
        })
}

/// Resolve a part's target, declared length and metadata.
///
/// Structural violations come back as `Err`; problems confined to this part
/// come back as a prepared failure.
fn prepare_part(
    part: &BundlePart,
    metadata: Option<&BundleMetadata>,
    content_ids: &mut HashSet<String>,
) -> Result<PreparedPart, BundleError> {
    let part_headers = &part.headers;
    let actual = part.content.len() as u64;

    let total_length = part_headers
        .get_u64(headers::OC_TOTAL_LENGTH)
        .map_err(|e| BundleError::bad_request(e.to_string()))?;

    let (key, declaration) = if let Some(id) = part_headers.get(headers::CONTENT_ID) {
        if !content_ids.insert(id.to_owned()) {
            return Err(BundleError::bad_request("Content-ID appear twice").with_resource(id));
        }
        match metadata.and_then(|m| m.get(id)) {
            Some(declaration) => (declaration.path.clone(), Some(declaration)),
            None => (id.to_owned(), None),
        }
    } else {
        let path = part_headers
            .get(headers::X_FILE_PATH)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                BundleError::bad_request("part has neither an x-file-path nor a content-id header")
            })?;
        (path.to_owned(), None)
    };

    let declared = total_length
        .or_else(|| declaration.and_then(|d| d.total_length))
        .unwrap_or(actual);
    if declared != actual {
        return Err(BundleError::bad_request(format!(
            "expected filesize of {declared} bytes but read {actual} bytes from the stream"
        ))
        .with_resource(key));
    }

    if part_headers.get(headers::CONTENT_ID).is_some() && declaration.is_none() {
        let failure = CommitFailure::new(
            BundleErrorCode::BadRequest,
            format!("content-id {key} is not declared in the bundle metadata"),
        );
        return Ok(PreparedPart {
            key,
            request: Err(failure),
        });
    }

    // Equivalent spellings of one target must collide in the outcome.
    let key = match normalize_path(&key) {
        Ok(path) => path,
        Err(e) => {
            return Ok(PreparedPart {
                key,
                request: Err(CommitFailure::new(BundleErrorCode::BadRequest, e.to_string())),
            });
        }
    };

    let mtime = match part_headers.get(headers::OC_MTIME) {
        Some(raw) => match raw.parse::<i64>() {
            Ok(mtime) => Some(mtime),
            Err(_) => {
                let failure = CommitFailure::new(
                    BundleErrorCode::BadRequest,
                    format!("invalid oc-mtime value {raw:?}"),
                );
                return Ok(PreparedPart {
                    key,
                    request: Err(failure),
                });
            }
        },
        None => declaration.and_then(|d| d.mtime),
    };

    let checksum = part_headers
        .get(headers::OC_CHECKSUM)
        .map(str::to_owned)
        .or_else(|| declaration.and_then(|d| d.checksum.clone()));

    let request = CommitRequest {
        path: key.clone(),
        content: part.content.clone(),
        declared_length: declared,
        mtime,
        checksum,
    };
    Ok(PreparedPart {
        key,
        request: Ok(request),
    })
}

/// Commit through the handler and check the stored size.
async fn commit_checked<H: BundleHandler + ?Sized>(
    handler: &H,
    request: CommitRequest,
) -> CommitResult {
    let declared = request.declared_length;
    match handler.commit_part(request).await {
        CommitResult::Success(success) if success.size != declared => CommitResult::failure(
            BundleErrorCode::BadRequest,
            format!(
                "expected filesize of {declared} bytes but {} bytes were stored",
                success.size
            ),
        ),
        result => result,
    }
}
