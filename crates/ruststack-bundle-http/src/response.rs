//! Response rendering for bundle outcomes and errors.

use bytes::Bytes;
use ruststack_bundle_model::error::BundleError;
use ruststack_bundle_model::{BundleOutcome, CommitResult, ErrorPolicy};

use crate::body::BundleResponseBody;

/// Content type of multi-status and DAV error bodies.
pub const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

/// Render a finished bundle.
///
/// Under [`ErrorPolicy::Abort`] every recorded part succeeded and the body is
/// a JSON object mapping each path to its stored size (`200 OK`). Under
/// [`ErrorPolicy::Isolate`] the body is a multi-status document
/// (`207 Multi-Status`).
///
/// # Errors
///
/// Returns `InternalError` if the body cannot be serialized.
pub fn outcome_to_response(
    outcome: &BundleOutcome,
    policy: ErrorPolicy,
) -> Result<http::Response<BundleResponseBody>, BundleError> {
    let (status, content_type, body) = match policy {
        ErrorPolicy::Abort => {
            let sizes: serde_json::Map<String, serde_json::Value> = outcome
                .entries()
                .iter()
                .filter_map(|(key, result)| match result {
                    CommitResult::Success(success) => Some((key.clone(), success.size.into())),
                    CommitResult::Failure(_) => None,
                })
                .collect();
            let json = serde_json::to_vec(&sizes).map_err(|e| {
                BundleError::internal_error("failed to serialize bundle sizes").with_source(e)
            })?;
            (http::StatusCode::OK, "application/json", json)
        }
        ErrorPolicy::Isolate => {
            let xml = ruststack_bundle_xml::multistatus_to_xml(outcome).map_err(|e| {
                BundleError::internal_error("failed to serialize multi-status body").with_source(e)
            })?;
            (http::StatusCode::MULTI_STATUS, XML_CONTENT_TYPE, xml)
        }
    };

    http::Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, content_type)
        .body(BundleResponseBody::from_bytes(Bytes::from(body)))
        .map_err(|e| BundleError::internal_error("failed to build response").with_source(e))
}

/// Convert a [`BundleError`] into a DAV error response.
pub fn error_to_response(
    err: &BundleError,
    request_id: &str,
) -> http::Response<BundleResponseBody> {
    let xml_bytes =
        ruststack_bundle_xml::error_to_xml(err.code.as_str(), &err.message, request_id);

    http::Response::builder()
        .status(err.status_code)
        .header(http::header::CONTENT_TYPE, XML_CONTENT_TYPE)
        .body(BundleResponseBody::from_bytes(Bytes::from(xml_bytes)))
        .unwrap_or_else(|_| {
            http::Response::builder()
                .status(http::StatusCode::INTERNAL_SERVER_ERROR)
                .body(BundleResponseBody::empty())
                .expect("static response should be valid")
        })
}
