//! Multi-status serialization for bundle outcomes.
//!
//! Every recorded part becomes one `<d:response>` with a single `<d:propstat>`.
//! Successful parts carry the committed file's properties; failed parts carry a
//! `<d:error>` descriptor and the HTTP status of their error kind.

use std::io::{self, Write};

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesText, Event};
use ruststack_bundle_model::{BundleOutcome, CommitFailure, CommitResult, CommitSuccess};

use crate::error::XmlError;

/// The WebDAV namespace.
pub const DAV_NAMESPACE: &str = "DAV:";

/// Namespace of the exception/message error elements.
pub const SABRE_NAMESPACE: &str = "http://sabredav.org/ns";

/// Namespace of the file property elements.
pub const OWNCLOUD_NAMESPACE: &str = "http://owncloud.org/ns";

/// Serialize a bundle outcome as a `207 Multi-Status` document.
///
/// # Errors
///
/// Returns `XmlError` if serialization fails.
pub fn multistatus_to_xml(outcome: &BundleOutcome) -> Result<Vec<u8>, XmlError> {
    let mut buf = Vec::with_capacity(256 + outcome.len() * 384);
    let mut writer = Writer::new(&mut buf);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    writer
        .create_element("d:multistatus")
        .with_attribute(("xmlns:d", DAV_NAMESPACE))
        .with_attribute(("xmlns:s", SABRE_NAMESPACE))
        .with_attribute(("xmlns:oc", OWNCLOUD_NAMESPACE))
        .write_inner_content(|w| {
            for (href, result) in outcome.entries() {
                write_response(w, href, result)?;
            }
            Ok(())
        })?;

    Ok(buf)
}

fn write_response<W: Write>(
    writer: &mut Writer<W>,
    href: &str,
    result: &CommitResult,
) -> io::Result<()> {
    writer
        .create_element("d:response")
        .write_inner_content(|w| {
            write_text_element(w, "d:href", href)?;
            w.create_element("d:propstat").write_inner_content(|w| {
                let status = match result {
                    CommitResult::Success(success) => {
                        write_success_props(w, success)?;
                        "HTTP/1.1 200 OK".to_owned()
                    }
                    CommitResult::Failure(failure) => {
                        write_failure_props(w, failure)?;
                        status_line(failure)
                    }
                };
                write_text_element(w, "d:status", &status)
            })?;
            Ok(())
        })?;
    Ok(())
}

fn write_success_props<W: Write>(
    writer: &mut Writer<W>,
    success: &CommitSuccess,
) -> io::Result<()> {
    writer.create_element("d:prop").write_inner_content(|w| {
        write_text_element(w, "d:getetag", &format!("\"{}\"", success.etag))?;
        write_text_element(w, "oc:fileid", &format!("{:08}", success.file_id))?;
        write_text_element(w, "oc:size", &success.size.to_string())?;
        if let Some(modified) = http_date(success.mtime) {
            write_text_element(w, "d:getlastmodified", &modified)?;
        }
        write_text_element(
            w,
            "oc:mtime-accepted",
            if success.mtime_accepted { "true" } else { "false" },
        )
    })?;
    Ok(())
}

fn write_failure_props<W: Write>(
    writer: &mut Writer<W>,
    failure: &CommitFailure,
) -> io::Result<()> {
    writer.create_element("d:prop").write_inner_content(|w| {
        w.create_element("d:error").write_inner_content(|w| {
            write_text_element(w, "s:exception", failure.code.as_str())?;
            write_text_element(w, "s:message", &failure.message)
        })?;
        Ok(())
    })?;
    Ok(())
}

/// Write a simple `<tag>text</tag>` element.
fn write_text_element<W: Write>(writer: &mut Writer<W>, tag: &str, text: &str) -> io::Result<()> {
    writer
        .create_element(tag)
        .write_text_content(BytesText::new(text))?;
    Ok(())
}

fn status_line(failure: &CommitFailure) -> String {
    let status = failure.code.default_status_code();
    format!(
        "HTTP/1.1 {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or_default()
    )
}

/// Format seconds since the epoch as an RFC 1123 date.
fn http_date(secs: i64) -> Option<String> {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}
