//! The bundle HTTP service implementing hyper's `Service` trait.
//!
//! [`BundleHttpService`] ties together routing, the bundle coordinator and
//! response rendering:
//!
//! 1. Route guard via [`BundleRouter`] (health probe, `404`, `405`)
//! 2. `Content-Type` extraction
//! 3. Streaming the body through [`handle_bundle`]
//! 4. Rendering the outcome or the aborting error
//! 5. Common response headers (`x-request-id`, `Server`)

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http_body::Body;
use hyper::service::Service;
use ruststack_bundle_model::ErrorPolicy;
use ruststack_bundle_model::error::{BundleError, BundleErrorCode};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::body::BundleResponseBody;
use crate::bundle::handle_bundle;
use crate::dispatch::BundleHandler;
use crate::response::{error_to_response, outcome_to_response};
use crate::router::{BundleRoute, BundleRouter};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Configuration for the bundle HTTP service.
#[derive(Debug, Clone)]
pub struct BundleHttpConfig {
    /// Request path of the bundle endpoint.
    pub bundle_path: String,
    /// Reaction to a failed part; also fixes the response shape.
    pub error_policy: ErrorPolicy,
    /// Largest accepted part, in bytes.
    pub max_part_size: u64,
}

impl Default for BundleHttpConfig {
    fn default() -> Self {
        Self {
            bundle_path: "/files/bundle".to_owned(),
            error_policy: ErrorPolicy::default(),
            max_part_size: 268_435_456,
        }
    }
}

/// The bundle HTTP service.
///
/// # Type Parameters
///
/// - `H`: The committing backend implementing [`BundleHandler`].
#[derive(Debug)]
pub struct BundleHttpService<H: BundleHandler> {
    handler: Arc<H>,
    router: BundleRouter,
    config: Arc<BundleHttpConfig>,
}

impl<H: BundleHandler> BundleHttpService<H> {
    /// Create a new service with the given handler and configuration.
    #[must_use]
    pub fn new(handler: H, config: BundleHttpConfig) -> Self {
        Self::from_shared(Arc::new(handler), config)
    }

    /// Create a new service from an `Arc<H>` handler and configuration.
    #[must_use]
    pub fn from_shared(handler: Arc<H>, config: BundleHttpConfig) -> Self {
        Self {
            handler,
            router: BundleRouter::new(&config.bundle_path),
            config: Arc::new(config),
        }
    }
}

impl<H: BundleHandler> Clone for BundleHttpService<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            router: self.router.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<H, B> Service<http::Request<B>> for BundleHttpService<H>
where
    H: BundleHandler,
    B: Body<Data = Bytes> + Send + Unpin + 'static,
    B::Error: Into<BoxError> + Send,
{
    type Response = http::Response<BundleResponseBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: http::Request<B>) -> Self::Future {
        let handler = Arc::clone(&self.handler);
        let router = self.router.clone();
        let config = Arc::clone(&self.config);

        Box::pin(async move {
            let request_id = Uuid::new_v4().to_string();
            let response =
                process_request(req, handler.as_ref(), &router, &config, &request_id).await;
            Ok(add_common_headers(response, &request_id))
        })
    }
}

/// Process one request through the bundle pipeline.
async fn process_request<H, B>(
    req: http::Request<B>,
    handler: &H,
    router: &BundleRouter,
    config: &BundleHttpConfig,
    request_id: &str,
) -> http::Response<BundleResponseBody>
where
    H: BundleHandler,
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    let method = req.method().clone();
    let uri = req.uri().clone();
    debug!(%method, %uri, request_id, "processing request");

    match router.resolve(&method, uri.path()) {
        Ok(BundleRoute::Health) => return health_check_response(),
        Ok(BundleRoute::Bundle) => {}
        Err(err) => {
            debug!(%method, %uri, error = %err, request_id, "request not routed");
            let mut response = error_to_response(&err, request_id);
            if err.code == BundleErrorCode::MethodNotAllowed {
                if let Some(allow) = router.allowed_methods(uri.path()) {
                    response.headers_mut().insert(
                        http::header::ALLOW,
                        http::header::HeaderValue::from_static(allow),
                    );
                }
            }
            return response;
        }
    }

    let Some(content_type) = req
        .headers()
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
    else {
        let err = BundleError::new(BundleErrorCode::UnsupportedMediaType);
        warn!(request_id, "bundle request without Content-Type");
        return error_to_response(&err, request_id);
    };

    info!(%uri, request_id, policy = %config.error_policy, "routed bundle request");

    match handle_bundle(handler, &content_type, req.into_body(), config).await {
        Ok(outcome) => outcome_to_response(&outcome, config.error_policy)
            .unwrap_or_else(|err| error_to_response(&err, request_id)),
        Err(err) => {
            warn!(
                code = %err.code,
                message = %err.message,
                resource = ?err.resource,
                request_id,
                "bundle aborted"
            );
            error_to_response(&err, request_id)
        }
    }
}

/// Produce a health check response.
fn health_check_response() -> http::Response<BundleResponseBody> {
    http::Response::builder()
        .status(http::StatusCode::OK)
        .header("Content-Type", "application/json")
        .body(BundleResponseBody::from_string(
            r#"{"status":"running","service":"bundle"}"#,
        ))
        .expect("static health response should be valid")
}

/// Add common response headers to every response.
fn add_common_headers(
    mut response: http::Response<BundleResponseBody>,
    request_id: &str,
) -> http::Response<BundleResponseBody> {
    let headers = response.headers_mut();

    if let Ok(hv) = http::header::HeaderValue::from_str(request_id) {
        headers.insert("x-request-id", hv);
    }
    headers.insert(
        "Server",
        http::header::HeaderValue::from_static("RustStackBundle"),
    );

    response
}
