//! Parsing of the bundle metadata part.
//!
//! The metadata part announces every file of the bundle before its content
//! arrives:
//!
//! ```xml
//! <d:multipart xmlns:d="DAV:">
//!   <d:part>
//!     <d:prop>
//!       <d:oc-path>/photos/a.jpg</d:oc-path>
//!       <d:oc-id>1</d:oc-id>
//!       <d:oc-mtime>1700000000</d:oc-mtime>
//!       <d:oc-total-length>5</d:oc-total-length>
//!     </d:prop>
//!   </d:part>
//! </d:multipart>
//! ```
//!
//! Elements are matched by local name, so any namespace prefix is accepted.

use quick_xml::Reader;
use quick_xml::events::Event;
use ruststack_bundle_model::{BundleMetadata, FileDeclaration};

use crate::error::XmlError;

/// Parse a metadata document into its file declarations.
///
/// # Errors
///
/// Returns `XmlError` if the XML is malformed, a declaration lacks `oc-id` or
/// `oc-path`, a numeric field does not parse, or an id is declared twice.
pub fn metadata_from_xml(xml: &[u8]) -> Result<BundleMetadata, XmlError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut metadata = BundleMetadata::new();
    let mut seen_root = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.local_name();
                if !seen_root {
                    seen_root = true;
                    continue;
                }
                if name.as_ref() == b"part" {
                    let declaration = read_part(&mut reader)?;
                    metadata
                        .declare(declaration)
                        .map_err(|dup| XmlError::DuplicateId(dup.0))?;
                } else {
                    skip_element(&mut reader)?;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err(XmlError::MissingElement("root element".to_owned()));
    }
    Ok(metadata)
}

/// Read one `<part>` element, descending through `<prop>`.
fn read_part(reader: &mut Reader<&[u8]>) -> Result<FileDeclaration, XmlError> {
    let mut id = None;
    let mut path = None;
    let mut mtime = None;
    let mut total_length = None;
    let mut checksum = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"prop" => {}
                b"oc-id" => id = Some(read_text_content(reader)?),
                b"oc-path" => path = Some(read_text_content(reader)?),
                b"oc-mtime" => mtime = Some(parse_i64(&read_text_content(reader)?)?),
                b"oc-total-length" => {
                    total_length = Some(parse_u64(&read_text_content(reader)?)?);
                }
                b"oc-checksum" => checksum = Some(read_text_content(reader)?),
                _ => skip_element(reader)?,
            },
            Event::End(e) if e.local_name().as_ref() == b"part" => break,
            Event::Eof => {
                return Err(XmlError::UnexpectedElement(
                    "unexpected EOF inside part".to_owned(),
                ));
            }
            _ => {}
        }
    }

    let id = id
        .filter(|v| !v.is_empty())
        .ok_or_else(|| XmlError::MissingElement("oc-id".to_owned()))?;
    let path = path
        .filter(|v| !v.is_empty())
        .ok_or_else(|| XmlError::MissingElement("oc-path".to_owned()))?;

    Ok(FileDeclaration {
        id,
        path,
        mtime,
        total_length,
        checksum: checksum.filter(|v| !v.is_empty()),
    })
}

/// Read the text content of the current element and consume its end tag.
fn read_text_content(reader: &mut Reader<&[u8]>) -> Result<String, XmlError> {
    let mut text = String::new();
    loop {
        match reader.read_event()? {
            Event::Text(e) => {
                let decoded = e
                    .decode()
                    .map_err(|err| XmlError::ParseError(err.to_string()))?;
                let unescaped = quick_xml::escape::unescape(&decoded)
                    .map_err(|err| XmlError::ParseError(err.to_string()))?;
                text.push_str(&unescaped);
            }
            Event::End(_) => return Ok(text),
            Event::Eof => {
                return Err(XmlError::UnexpectedElement(
                    "unexpected EOF while reading text content".to_owned(),
                ));
            }
            _ => {}
        }
    }
}

/// Skip over an element and all its children.
fn skip_element(reader: &mut Reader<&[u8]>) -> Result<(), XmlError> {
    let mut depth: u32 = 1;
    loop {
        match reader.read_event()? {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
            Event::Eof => {
                return Err(XmlError::UnexpectedElement(
                    "unexpected EOF while skipping element".to_owned(),
                ));
            }
            _ => {}
        }
    }
}

fn parse_i64(s: &str) -> Result<i64, XmlError> {
    s.parse::<i64>()
        .map_err(|e| XmlError::ParseError(format!("invalid i64 '{s}': {e}")))
}

fn parse_u64(s: &str) -> Result<u64, XmlError> {
    s.parse::<u64>()
        .map_err(|e| XmlError::ParseError(format!("invalid u64 '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_FILES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:multipart xmlns:d="DAV:">
  <d:part>
    <d:prop>
      <d:oc-path>/docs/a.txt</d:oc-path>
      <d:oc-id>1</d:oc-id>
      <d:oc-mtime>1700000000</d:oc-mtime>
      <d:oc-total-length>5</d:oc-total-length>
    </d:prop>
  </d:part>
  <d:part>
    <d:prop>
      <d:oc-path>/docs/b.txt</d:oc-path>
      <d:oc-id>2</d:oc-id>
      <d:oc-checksum>SHA1:abc</d:oc-checksum>
    </d:prop>
  </d:part>
</d:multipart>"#;

    #[test]
    fn test_should_parse_declarations() {
        let metadata = metadata_from_xml(TWO_FILES.as_bytes()).expect("parse");
        assert_eq!(metadata.len(), 2);

        let first = metadata.get("1").expect("declared");
        assert_eq!(first.path, "/docs/a.txt");
        assert_eq!(first.mtime, Some(1_700_000_000));
        assert_eq!(first.total_length, Some(5));
        assert_eq!(first.checksum, None);

        let second = metadata.get("2").expect("declared");
        assert_eq!(second.path, "/docs/b.txt");
        assert_eq!(second.mtime, None);
        assert_eq!(second.checksum.as_deref(), Some("SHA1:abc"));
    }

    #[test]
    fn test_should_reject_duplicate_id() {
        let xml = r#"<d:multipart xmlns:d="DAV:">
  <d:part><d:prop><d:oc-path>/a</d:oc-path><d:oc-id>7</d:oc-id></d:prop></d:part>
  <d:part><d:prop><d:oc-path>/b</d:oc-path><d:oc-id>7</d:oc-id></d:prop></d:part>
</d:multipart>"#;
        let err = metadata_from_xml(xml.as_bytes()).unwrap_err();
        assert!(matches!(err, XmlError::DuplicateId(id) if id == "7"));
    }

    #[test]
    fn test_should_require_path() {
        let xml = r#"<d:multipart xmlns:d="DAV:">
  <d:part><d:prop><d:oc-id>1</d:oc-id></d:prop></d:part>
</d:multipart>"#;
        let err = metadata_from_xml(xml.as_bytes()).unwrap_err();
        assert!(matches!(err, XmlError::MissingElement(e) if e == "oc-path"));
    }

    #[test]
    fn test_should_reject_non_numeric_mtime() {
        let xml = r#"<d:multipart xmlns:d="DAV:">
  <d:part>
    <d:prop>
      <d:oc-path>/a</d:oc-path>
      <d:oc-id>1</d:oc-id>
      <d:oc-mtime>yesterday</d:oc-mtime>
    </d:prop>
  </d:part>
</d:multipart>"#;
        assert!(matches!(
            metadata_from_xml(xml.as_bytes()),
            Err(XmlError::ParseError(_))
        ));
    }

    #[test]
    fn test_should_skip_unknown_elements() {
        let xml = r#"<d:multipart xmlns:d="DAV:">
  <d:comment><d:x>1</d:x></d:comment>
  <d:part>
    <d:prop>
      <d:oc-path>/a</d:oc-path>
      <d:oc-id>1</d:oc-id>
      <d:extra>y</d:extra>
    </d:prop>
  </d:part>
</d:multipart>"#;
        let metadata = metadata_from_xml(xml.as_bytes()).expect("parse");
        assert_eq!(metadata.len(), 1);
    }

    #[test]
    fn test_should_reject_empty_document() {
        assert!(matches!(
            metadata_from_xml(b""),
            Err(XmlError::MissingElement(_))
        ));
    }
}
