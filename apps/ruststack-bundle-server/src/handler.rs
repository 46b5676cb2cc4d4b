//! Part commit handler implementation for [`RustStackBundle`].
//!
//! Bridges the HTTP layer (`ruststack-bundle-http`) with the committer
//! (`ruststack-bundle-core`) by implementing the [`BundleHandler`] trait.

use std::future::Future;
use std::pin::Pin;

use ruststack_bundle_core::RustStackBundle;
use ruststack_bundle_http::dispatch::BundleHandler;
use ruststack_bundle_model::{CommitRequest, CommitResult};

/// Wrapper that implements [`BundleHandler`] by delegating to [`RustStackBundle`].
#[derive(Debug, Clone)]
pub struct BundleCommitHandler(pub RustStackBundle);

impl BundleHandler for BundleCommitHandler {
    fn commit_part(
        &self,
        request: CommitRequest,
    ) -> Pin<Box<dyn Future<Output = CommitResult> + Send>> {
        let provider = self.0.clone();
        Box::pin(async move { provider.handle_commit(request).await })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use hyper::service::Service;
    use ruststack_bundle_core::config::BundleConfig;
    use ruststack_bundle_http::{BundleHttpConfig, BundleHttpService};
    use ruststack_bundle_model::ErrorPolicy;

    use super::*;

    const BODY: &[u8] = b"--XYZ\r\n\
x-file-path: /a.txt\r\n\
content-length: 5\r\n\
oc-mtime: 1500000000\r\n\
\r\n\
hello\r\n\
--XYZ\r\n\
x-file-path: /missing/b.txt\r\n\
content-length: 3\r\n\
\r\n\
abc\r\n\
--XYZ--\r\n";

    fn service(
        dir: &std::path::Path,
        policy: ErrorPolicy,
    ) -> BundleHttpService<BundleCommitHandler> {
        let config = BundleConfig::builder()
            .data_dir(dir.to_string_lossy().into_owned())
            .error_policy(policy)
            .build();
        let http_config = BundleHttpConfig {
            bundle_path: config.bundle_path.clone(),
            error_policy: config.error_policy,
            max_part_size: config.max_part_size,
        };
        BundleHttpService::new(BundleCommitHandler(RustStackBundle::new(config)), http_config)
    }

    const ALIASED_BODY: &[u8] = b"--XYZ\r\n\
x-file-path: /a.txt\r\n\
content-length: 5\r\n\
\r\n\
hello\r\n\
--XYZ\r\n\
x-file-path: //a.txt\r\n\
content-length: 5\r\n\
\r\n\
world\r\n\
--XYZ--\r\n";

    fn request(body: &'static [u8]) -> http::Request<Full<Bytes>> {
        http::Request::builder()
            .method(http::Method::POST)
            .uri("/files/bundle")
            .header("Content-Type", "multipart/related; boundary=XYZ")
            .body(Full::new(Bytes::from_static(body)))
            .expect("valid request")
    }

    #[tokio::test]
    async fn test_should_commit_bundle_end_to_end_with_isolation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resp = service(dir.path(), ErrorPolicy::Isolate)
            .call(request(BODY))
            .await
            .expect("infallible");

        assert_eq!(resp.status(), http::StatusCode::MULTI_STATUS);
        let body = resp.into_body().collect().await.expect("collect").to_bytes();
        let body = String::from_utf8(body.to_vec()).expect("utf-8");
        assert!(body.contains("<d:href>/a.txt</d:href>"));
        assert!(body.contains("<oc:size>5</oc:size>"));
        assert!(body.contains("<s:exception>Conflict</s:exception>"));

        let stored = std::fs::read(dir.path().join("a.txt")).expect("read");
        assert_eq!(stored, b"hello");
        assert!(!dir.path().join("missing").exists());
    }

    #[tokio::test]
    async fn test_should_abort_bundle_on_first_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resp = service(dir.path(), ErrorPolicy::Abort)
            .call(request(BODY))
            .await
            .expect("infallible");

        assert_eq!(resp.status(), http::StatusCode::CONFLICT);
        assert!(dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_should_abort_when_two_parts_name_the_same_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resp = service(dir.path(), ErrorPolicy::Isolate)
            .call(request(ALIASED_BODY))
            .await
            .expect("infallible");

        assert_eq!(resp.status(), http::StatusCode::BAD_REQUEST);
        let body = resp.into_body().collect().await.expect("collect").to_bytes();
        let body = String::from_utf8(body.to_vec()).expect("utf-8");
        assert!(body.contains("<s:exception>BadRequest</s:exception>"));
        assert_eq!(std::fs::read(dir.path().join("a.txt")).expect("read"), b"hello");
    }
}
