//! Streaming `multipart/related` demultiplexer.
//!
//! [`MultipartReader`] owns the request body and a lookahead buffer and hands
//! out one part at a time:
//!
//! ```text
//! --<boundary>\r\n
//! <name>: <value>\r\n
//! \r\n
//! <exactly content-length bytes>\r\n
//! --<boundary>\r\n
//! ...
//! --<boundary>--\r\n
//! ```
//!
//! Content is read by length, never by scanning for the boundary, so file
//! bytes that happen to look like a delimiter are returned untouched. Any
//! deviation from the framing is fatal: the reader does not try to
//! resynchronize.

use std::fmt;

use bytes::{Buf, Bytes, BytesMut};
use http_body::Body;
use http_body_util::BodyExt;
use ruststack_bundle_model::error::{BundleError, BundleErrorCode};
use ruststack_bundle_model::{HeaderError, PartHeaderMap};
use tracing::trace;

/// Longest accepted part header line, in bytes.
pub const MAX_HEADER_LINE: usize = 8 * 1024;

/// Most header lines accepted per part.
pub const MAX_HEADER_LINES: usize = 64;

const CRLF: &[u8] = b"\r\n";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Structural errors raised while demultiplexing a bundle.
#[derive(Debug, thiserror::Error)]
pub enum MultipartError {
    /// The `Content-Type` header is not `<type>; boundary=<token>`.
    #[error("malformed Content-Type header: {0:?}")]
    MalformedContentType(String),

    /// The body is not `multipart/related`.
    #[error("Content-Type must be multipart/related, got {0:?}")]
    UnsupportedMediaType(String),

    /// The `boundary` parameter is absent or empty.
    #[error("boundary not found in Content-Type header")]
    MissingBoundary,

    /// The stream did not continue with the expected separator line.
    #[error("expected boundary separator \"--{boundary}\"")]
    BoundaryMismatch {
        /// Whether the next bytes are the terminal boundary. Never consumes input.
    ///
    /// A stream that ends right after `--<boundary>--` (no final line break)
    /// also counts as terminated.
    ///
    /// # Errors
    ///
    /// Returns [`MultipartError::Body`] if reading the body fails.
    pub async fn at_terminal_boundary(&mut self) -> Result<bool, MultipartError> {
        if self.fill(self.terminal.len()).await? {
            return Ok(self.buf.starts_with(&self.terminal));
        }
        let bare = &self.terminal[..self.terminal.len() - CRLF.len()];
        Ok(self.buf[..] == *bare)
    }

    /// Read the next part.
    ///
    /// `expected_length`, when given, takes precedence over the part's own
    /// `content-length` header.
    ///
    /// # Errors
    ///
    /// Any [`MultipartError`] is fatal; the stream position is undefined
    /// afterwards.
    pub async fn next_part(
        &mut self,
        expected_length: Option<u64>,
    ) -> Result<(PartHeaderMap, Bytes), MultipartError> {
        let separator = self.separator.clone();
        if !self.consume_literal(&separator).await? {
            return Err(MultipartError::BoundaryMismatch {
                boundary: self.boundary.clone(),
            });
        }

        let headers = self.read_headers().await?;

        let length = match expected_length {
            Some(length) => length,
            None => headers
                .content_length()?
                .ok_or(MultipartError::MissingContentLength)?,
        };
        if length > self.max_part_size {
            return Err(MultipartError::PartTooLarge {
                declared: length,
                limit: self.max_part_size,
            });
        }
        let length = usize::try_from(length).map_err(|_| MultipartError::PartTooLarge {
            declared: length,
            limit: self.max_part_size,
        })?;

        let content = self.read_exact(length).await?;
        if !self.consume_literal(CRLF).await? {
            return Err(MultipartError::MissingRecordSeparator);
        }

        trace!(headers = headers.len(), size = content.len(), "read multipart part");
        Ok((headers, content))
    }

    async fn read_headers(&mut self) -> Result<PartHeaderMap, MultipartError> {
        let mut headers = PartHeaderMap::new();
        let mut lines = 0;
        loop {
            let line = self.read_line().await?;
            if line.is_empty() {
                return Ok(headers);
            }

            lines += 1;
            if lines > MAX_HEADER_LINES {
                return Err(MultipartError::TooManyHeaders);
            }

            let line = std::str::from_utf8(&line).map_err(|_| MultipartError::InvalidHeaderLine)?;
            let Some((name, value)) = line.split_once(':') else {
                return Err(MultipartError::MissingHeaderSeparator(line.to_owned()));
            };
            if name.trim().is_empty() {
                return Err(MultipartError::InvalidHeaderLine);
            }
            headers.insert(name, value)?;
        }
    }

    /// Read up to the next `\r\n`, which is consumed but not returned.
    async fn read_line(&mut self) -> Result<Bytes, MultipartError> {
        let mut scanned = 0;
        loop {
            if let Some(pos) = find_crlf(&self.buf[scanned..]) {
                let end = scanned + pos;
                if end > MAX_HEADER_LINE {
                    return Err(MultipartError::HeaderLineTooLong);
                }
                let line = self.buf.split_to(end).freeze();
                self.buf.advance(CRLF.len());
                return Ok(line);
            }
            if self.buf.len() > MAX_HEADER_LINE {
                return Err(MultipartError::HeaderLineTooLong);
            }
            // A CR at the very end may pair with an LF from the next frame.
            scanned = self.buf.len().saturating_sub(1);
            if !self.pull().await? {
                return Err(MultipartError::UnexpectedEof("part headers"));
            }
        }
    }

    async fn read_exact(&mut self, length: usize) -> Result<Bytes, MultipartError> {
        if self.buf.len() < length {
            self.buf.reserve(length - self.buf.len());
        }
        if !self.fill(length).await? {
            return Err(MultipartError::UnexpectedEof("part content"));
        }
        Ok(self.buf.split_to(length).freeze())
    }

    /// Consume `literal` if the stream continues with it.
    async fn consume_literal(&mut self, literal: &[u8]) -> Result<bool, MultipartError> {
        if !self.fill(literal.len()).await? || !self.buf.starts_with(literal) {
            return Ok(false);
        }
        self.buf.advance(literal.len());
        Ok(true)
    }

    /// Buffer at least `n` bytes; `false` if the body ends first.
    async fn fill(&mut self, n: usize) -> Result<bool, MultipartError> {
        while self.buf.len() < n {
            if !self.pull().await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Append the next non-empty data frame; `false` at end of body.
    async fn pull(&mut self) -> Result<bool, MultipartError> {
        if self.eof {
            return Ok(false);
        }
        while let Some(frame) = self.body.frame().await {
            let frame = frame.map_err(|e| MultipartError::Body(e.into()))?;
            if let Ok(data) = frame.into_data() {
                if !data.is_empty() {
                    self.buf.extend_from_slice(&data);
                    return Ok(true);
                }
            }
        }
        self.eof = true;
        Ok(false)
    }
}

fn find_crlf(haystack: &[u8]) -> Option<usize> {
    haystack.windows(CRLF.len()).position(|w| w == CRLF)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::convert::Infallible;

    use http_body::Frame;
    use http_body_util::{Full, StreamBody};

    use super::*;

    /// Build a bundle body from `(headers, content)` pairs.
    pub(crate) fn bundle_body(boundary: &str, parts: &[(&[(&str, &str)], &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (headers, content) in parts {
            body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            for (name, value) in *headers {
                body.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
            }
            body.extend_from_slice(b"\r\n");
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        body
    }

    /// Split `data` into frames of `chunk` bytes.
    pub(crate) fn chunked(
        data: Vec<u8>,
        chunk: usize,
    ) -> StreamBody<futures::stream::Iter<std::vec::IntoIter<Result<Frame<Bytes>, Infallible>>>> {
        let frames: Vec<Result<Frame<Bytes>, Infallible>> = data
            .chunks(chunk)
            .map(|c| Ok(Frame::data(Bytes::copy_from_slice(c))))
            .collect();
        StreamBody::new(futures::stream::iter(frames))
    }

    fn reader(data: Vec<u8>) -> MultipartReader<Full<Bytes>> {
        MultipartReader::new(Full::new(Bytes::from(data)), "multipart/related; boundary=XYZ")
            .expect("valid content type")
    }

    #[test]
    fn test_should_parse_boundary() {
        assert_eq!(
            parse_boundary("multipart/related; boundary=XYZ").expect("plain"),
            "XYZ"
        );
        assert_eq!(
            parse_boundary(" multipart/related ;boundary=\"a b:c\" ").expect("quoted"),
            "a b:c"
        );
    }

    #[test]
    fn test_should_reject_bad_content_types() {
        assert!(matches!(
            parse_boundary("multipart/form-data; boundary=XYZ"),
            Err(MultipartError::UnsupportedMediaType(_))
        ));
        assert!(matches!(
            parse_boundary("multipart/related"),
            Err(MultipartError::MalformedContentType(_))
        ));
        assert!(matches!(
            parse_boundary("multipart/related; boundary=XYZ; charset=utf-8"),
            Err(MultipartError::MalformedContentType(_))
        ));
        assert!(matches!(
            parse_boundary("multipart/related; type=text/xml"),
            Err(MultipartError::MissingBoundary)
        ));
        assert!(matches!(
            parse_boundary("multipart/related; boundary=\"\""),
            Err(MultipartError::MissingBoundary)
        ));
    }

    #[tokio::test]
    async fn test_should_read_parts_in_order() {
        let data = bundle_body(
            "XYZ",
            &[
                (&[("X-File-Path", "/a.txt"), ("Content-Length", "5")], b"hello"),
                (&[("x-file-path", "/b.txt"), ("content-length", "0")], b""),
                (&[("x-file-path", "/c.txt"), ("content-length", "3")], b"abc"),
            ],
        );
        let mut reader = reader(data);

        let mut paths = Vec::new();
        while !reader.at_terminal_boundary().await.expect("peek") {
            let (headers, content) = reader.next_part(None).await.expect("part");
            assert_eq!(
                headers.content_length().expect("length"),
                Some(content.len() as u64)
            );
            paths.push(headers.get("x-file-path").expect("path").to_owned());
        }
        assert_eq!(paths, ["/a.txt", "/b.txt", "/c.txt"]);
    }

    #[tokio::test]
    async fn test_should_survive_frames_of_every_size() {
        let content: &[u8] = b"line one\r\n--XYZ\r\nnot a boundary\r\n--XYZ--\r\n";
        let length = content.len().to_string();
        let data = bundle_body(
            "XYZ",
            &[
                (&[("x-file-path", "/a.bin"), ("content-length", length.as_str())], content),
                (&[("x-file-path", "/b.bin"), ("content-length", "2")], b"ok"),
            ],
        );

        for chunk in 1..=7 {
            let mut reader = MultipartReader::new(
                chunked(data.clone(), chunk),
                "multipart/related; boundary=XYZ",
            )
            .expect("valid content type");

            assert!(!reader.at_terminal_boundary().await.expect("peek"));
            let (_, first) = reader.next_part(None).await.expect("first part");
            assert_eq!(&first[..], content, "chunk size {chunk}");
            assert!(!reader.at_terminal_boundary().await.expect("peek"));
            let (_, second) = reader.next_part(None).await.expect("second part");
            assert_eq!(&second[..], b"ok");
            assert!(reader.at_terminal_boundary().await.expect("peek"));
        }
    }

    #[tokio::test]
    async fn test_should_not_consume_on_negative_peek() {
        let data = bundle_body("XYZ", &[(&[("content-length", "2")], b"hi")]);
        let mut reader = reader(data);

        assert!(!reader.at_terminal_boundary().await.expect("peek"));
        assert!(!reader.at_terminal_boundary().await.expect("peek again"));
        let (_, content) = reader.next_part(None).await.expect("part");
        assert_eq!(&content[..], b"hi");
    }

    #[tokio::test]
    async fn test_should_accept_terminal_without_line_break() {
        let mut data = bundle_body("XYZ", &[(&[("content-length", "2")], b"hi")]);
        data.truncate(data.len() - 2);
        let mut reader = reader(data);

        reader.next_part(None).await.expect("part");
        assert!(reader.at_terminal_boundary().await.expect("peek"));
    }

    #[tokio::test]
    async fn test_should_fail_on_corrupted_separator() {
        let mut data = bundle_body("XYZ", &[(&[("content-length", "5")], b"hello")]);
        data[3] = b'Q';
        let mut reader = reader(data);

        assert!(!reader.at_terminal_boundary().await.expect("peek"));
        assert!(matches!(
            reader.next_part(None).await,
            Err(MultipartError::BoundaryMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_should_fail_on_header_without_colon() {
        let data = b"--XYZ\r\ncontent-length 5\r\n\r\nhello\r\n--XYZ--\r\n".to_vec();
        assert!(matches!(
            reader(data).next_part(None).await,
            Err(MultipartError::MissingHeaderSeparator(line)) if line == "content-length 5"
        ));
    }

    #[tokio::test]
    async fn test_should_fail_when_declared_length_exceeds_content() {
        let data = b"--XYZ\r\ncontent-length: 10\r\n\r\nhello\r\n--XYZ--\r\n".to_vec();
        let err = reader(data).next_part(None).await.unwrap_err();
        assert!(matches!(
            err,
            MultipartError::MissingRecordSeparator | MultipartError::UnexpectedEof(_)
        ));
        assert_eq!(BundleError::from(err).code, BundleErrorCode::BadRequest);
    }

    #[tokio::test]
    async fn test_should_fail_when_declared_length_is_short() {
        let data = b"--XYZ\r\ncontent-length: 3\r\n\r\nhello\r\n--XYZ--\r\n".to_vec();
        assert!(matches!(
            reader(data).next_part(None).await,
            Err(MultipartError::MissingRecordSeparator)
        ));
    }

    #[tokio::test]
    async fn test_should_require_a_length() {
        let data = bundle_body("XYZ", &[(&[("x-file-path", "/a")], b"hello")]);
        let mut missing = reader(data.clone());
        assert!(matches!(
            missing.next_part(None).await,
            Err(MultipartError::MissingContentLength)
        ));

        let mut expected = reader(data);
        let (_, content) = expected.next_part(Some(5)).await.expect("caller supplied length");
        assert_eq!(&content[..], b"hello");
    }

    #[tokio::test]
    async fn test_should_reject_duplicate_headers() {
        let data = bundle_body(
            "XYZ",
            &[(&[("content-length", "5"), ("Content-Length", "5")], b"hello")],
        );
        assert!(matches!(
            reader(data).next_part(None).await,
            Err(MultipartError::Header(HeaderError::Duplicate(_)))
        ));
    }

    #[tokio::test]
    async fn test_should_enforce_part_size_limit() {
        let data = bundle_body("XYZ", &[(&[("content-length", "5")], b"hello")]);
        let err = reader(data)
            .with_max_part_size(4)
            .next_part(None)
            .await
            .unwrap_err();
        assert!(matches!(err, MultipartError::PartTooLarge { declared: 5, limit: 4 }));
        assert_eq!(BundleError::from(err).code, BundleErrorCode::PayloadTooLarge);
    }

    #[tokio::test]
    async fn test_should_fail_on_eof_inside_headers() {
        let data = b"--XYZ\r\ncontent-length: 5\r\n".to_vec();
        assert!(matches!(
            reader(data).next_part(None).await,
            Err(MultipartError::UnexpectedEof("part headers"))
        ));
    }

    #[tokio::test]
    async fn test_should_reject_oversized_header_line() {
        let mut data = b"--XYZ\r\nx-file-path: ".to_vec();
        data.extend(std::iter::repeat_n(b'a', MAX_HEADER_LINE + 1));
        data.extend_from_slice(b"\r\ncontent-length: 0\r\n\r\n\r\n--XYZ--\r\n");
        assert!(matches!(
            reader(data).next_part(None).await,
            Err(MultipartError::HeaderLineTooLong)
        ));
    }
}
