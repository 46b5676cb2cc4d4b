//! XML error type and DAV error body formatting.

use std::io;

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesText, Event};

use crate::serialize::{DAV_NAMESPACE, SABRE_NAMESPACE};

/// Errors that can occur during bundle XML serialization or deserialization.
#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    /// An I/O error during XML writing.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An error from the underlying quick-xml library.
    #[error("XML processing error: {0}")]
    QuickXml(#[from] quick_xml::Error),

    /// A required XML element was missing.
    #[error("missing required XML element: {0}")]
    MissingElement(String),

    /// An unexpected XML element was encountered.
    #[error("unexpected XML element: {0}")]
    UnexpectedElement(String),

    /// An error parsing a value from XML text content.
    #[error("failed to parse value: {0}")]
    ParseError(String),

    /// The same content id was declared twice.
    #[error("content id declared twice: {0}")]
    DuplicateId(String),
}

/// Format a bundle-level error as a DAV error body.
///
/// # Example output
///
/// ```xml
/// <?xml version="1.0" encoding="UTF-8"?>
/// <d:error xmlns:d="DAV:" xmlns:s="http://sabredav.org/ns">
///   <s:exception>BadRequest</s:exception>
///   <s:message>Content-ID appear twice</s:message>
///   <s:request-id>0c8f...</s:request-id>
/// </d:error>
/// ```
pub fn error_to_xml(exception: &str, message: &str, request_id: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);
    // Writing to Vec<u8> is infallible; if this fails it means a logic error.
    if let Err(e) = write_error_xml(&mut buf, exception, message, request_id) {
        tracing::error!(error = %e, "failed to serialize DAV error XML");
        buf.clear();
    }
    buf
}

fn write_error_xml(
    buf: &mut Vec<u8>,
    exception: &str,
    message: &str,
    request_id: &str,
) -> io::Result<()> {
    let mut writer = Writer::new(buf);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    writer
        .create_element("d:error")
        .with_attribute(("xmlns:d", DAV_NAMESPACE))
        .with_attribute(("xmlns:s", SABRE_NAMESPACE))
        .write_inner_content(|w| {
            w.create_element("s:exception")
                .write_text_content(BytesText::new(exception))?;
            w.create_element("s:message")
                .write_text_content(BytesText::new(message))?;
            w.create_element("s:request-id")
                .write_text_content(BytesText::new(request_id))?;
            Ok(())
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_format_dav_error() {
        let xml = error_to_xml("BadRequest", "Content-ID appear twice", "req-1");
        let xml_str = std::str::from_utf8(&xml).expect("valid UTF-8");

        assert!(xml_str.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml_str.contains("<d:error xmlns:d=\"DAV:\""));
        assert!(xml_str.contains("<s:exception>BadRequest</s:exception>"));
        assert!(xml_str.contains("<s:message>Content-ID appear twice</s:message>"));
        assert!(xml_str.contains("<s:request-id>req-1</s:request-id>"));
    }

    #[test]
    fn test_should_escape_special_characters() {
        let xml = error_to_xml("BadRequest", "length < declared & short", "req-2");
        let xml_str = std::str::from_utf8(&xml).expect("valid UTF-8");
        assert!(xml_str.contains("length &lt; declared &amp; short"));
    }
}
