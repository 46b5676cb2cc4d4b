//! Integration tests for the RustStack bundle server.
//!
//! These tests require a running bundle server at `localhost:8080` with the
//! default `isolate` error policy. They are marked `#[ignore]` so they don't
//! run during normal `cargo test`.
//!
//! Run them with:
//! ```text
//! cargo test -p ruststack-bundle-integration -- --ignored
//! ```

use std::sync::Once;

static INIT: Once = Once::new();

/// Boundary used by every bundle built in these tests.
pub const BOUNDARY: &str = "boundary_bundle_test";

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// Base URL of the server.
#[must_use]
pub fn endpoint_url() -> String {
    std::env::var("BUNDLE_ENDPOINT_URL").unwrap_or_else(|_| "http://localhost:8080".to_owned())
}

/// Full URL of the bundle endpoint.
#[must_use]
pub fn bundle_url() -> String {
    let path = std::env::var("BUNDLE_PATH").unwrap_or_else(|_| "/files/bundle".to_owned());
    format!("{}{path}", endpoint_url())
}

/// Create an HTTP client.
#[must_use]
pub fn http_client() -> reqwest::Client {
    init_tracing();
    reqwest::Client::new()
}

/// Generate a unique top-level file path for a test.
#[must_use]
pub fn test_file_path(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string()[..8].to_owned();
    format!("/test-{prefix}-{id}.txt")
}

/// Encode a `multipart/related` bundle body.
///
/// Each part is a header list and its content; the terminal boundary is
/// appended.
#[must_use]
pub fn bundle_body(parts: &[(Vec<(String, String)>, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (headers, content) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        for (name, value) in headers {
            body.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// Headers of a plain file part.
#[must_use]
pub fn file_part(path: &str, content: &[u8]) -> (Vec<(String, String)>, Vec<u8>) {
    (
        vec![
            ("x-file-path".to_owned(), path.to_owned()),
            ("content-length".to_owned(), content.len().to_string()),
        ],
        content.to_vec(),
    )
}

/// Post a bundle body and return the response.
pub async fn post_bundle(client: &reqwest::Client, body: Vec<u8>) -> reqwest::Response {
    client
        .post(bundle_url())
        .header(
            "Content-Type",
            format!("multipart/related; boundary={BOUNDARY}"),
        )
        .body(body)
        .send()
        .await
        .unwrap_or_else(|e| panic!("failed to post bundle: {e}"))
}

mod test_bundle;
mod test_error;
mod test_health;
