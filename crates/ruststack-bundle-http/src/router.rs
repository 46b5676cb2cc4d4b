//! Route guard for the bundle endpoint.

use ruststack_bundle_model::error::BundleError;

/// What the service should do with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleRoute {
    /// `POST` to the bundle endpoint.
    Bundle,
    /// `GET` health probe.
    Health,
}

/// Resolves requests against the configured bundle endpoint.
#[derive(Debug, Clone)]
pub struct BundleRouter {
    bundle_path: String,
}

impl BundleRouter {
    /// Create a router for `bundle_path`. A trailing `/` is ignored.
    #[must_use]
    pub fn new(bundle_path: &str) -> Self {
        let trimmed = bundle_path.trim_end_matches('/');
        Self {
            bundle_path: if trimmed.is_empty() {
                "/".to_owned()
            } else {
                trimmed.to_owned()
            },
        }
    }

    /// The endpoint path.
    #[must_use]
    pub fn bundle_path(&self) -> &str {
        &self.bundle_path
    }

    /// Methods accepted on `path`, formatted for an `Allow` header, or `None`
    /// for a path this router does not serve.
    #[must_use]
    pub fn allowed_methods(&self, path: &str) -> Option<&'static str> {
        if is_health_path(path) {
            Some("GET, HEAD")
        } else if self.is_bundle_path(path) {
            Some("POST")
        } else {
            None
        }
    }

    /// Route a request by method and path.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown paths and `MethodNotAllowed` for a
    /// known path with the wrong method.
    pub fn resolve(&self, method: &http::Method, path: &str) -> Result<BundleRoute, BundleError> {
        if is_health_path(path) {
            return if *method == http::Method::GET || *method == http::Method::HEAD {
                Ok(BundleRoute::Health)
            } else {
                Err(BundleError::method_not_allowed(method.as_str()))
            };
        }

        if self.is_bundle_path(path) {
            return if *method == http::Method::POST {
                Ok(BundleRoute::Bundle)
            } else {
                Err(BundleError::method_not_allowed(method.as_str()))
            };
        }

        Err(BundleError::not_found(path))
    }

    fn is_bundle_path(&self, path: &str) -> bool {
        let normalized = path.trim_end_matches('/');
        normalized == self.bundle_path || (normalized.is_empty() && self.bundle_path == "/")
    }
}

fn is_health_path(path: &str) -> bool {
    path == "/health" || path == "/_health"
}

#[cfg(test)]
mod tests {
    use ruststack_bundle_model::BundleErrorCode;

    use super::*;

    #[test]
    fn test_should_route_bundle_post() {
        let router = BundleRouter::new("/files/bundle/");
        assert_eq!(router.bundle_path(), "/files/bundle");
        assert_eq!(
            router
                .resolve(&http::Method::POST, "/files/bundle")
                .expect("route"),
            BundleRoute::Bundle
        );
        assert_eq!(
            router
                .resolve(&http::Method::POST, "/files/bundle/")
                .expect("route"),
            BundleRoute::Bundle
        );
    }

    #[test]
    fn test_should_route_health_probe() {
        let router = BundleRouter::new("/files/bundle");
        assert_eq!(
            router.resolve(&http::Method::GET, "/_health").expect("route"),
            BundleRoute::Health
        );
    }

    #[test]
    fn test_should_reject_other_methods_and_paths() {
        let router = BundleRouter::new("/files/bundle");
        let err = router
            .resolve(&http::Method::PUT, "/files/bundle")
            .unwrap_err();
        assert_eq!(err.code, BundleErrorCode::MethodNotAllowed);

        let err = router
            .resolve(&http::Method::POST, "/files/other")
            .unwrap_err();
        assert_eq!(err.code, BundleErrorCode::NotFound);
        assert_eq!(err.resource.as_deref(), Some("/files/other"));
    }

    #[test]
    fn test_should_list_allowed_methods_per_route() {
        let router = BundleRouter::new("/files/bundle");
        assert_eq!(router.allowed_methods("/files/bundle/"), Some("POST"));
        assert_eq!(router.allowed_methods("/health"), Some("GET, HEAD"));
        assert_eq!(router.allowed_methods("/_health"), Some("GET, HEAD"));
        assert_eq!(router.allowed_methods("/files/other"), None);
    }
}
