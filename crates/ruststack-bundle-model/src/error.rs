//! Error codes and the wire-facing error type for bundled uploads.

use std::fmt;

/// Error kinds a bundle request or a single part can fail with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BundleErrorCode {
    /// Malformed multipart stream, bad headers, or length mismatch.
    #[default]
    BadRequest,
    /// The target already exists; bundles only create new files.
    Forbidden,
    /// The requested resource is not served here.
    NotFound,
    /// The method is not allowed against the bundle endpoint.
    MethodNotAllowed,
    /// The parent collection of the target does not exist.
    Conflict,
    /// A part declares more bytes than the server accepts.
    PayloadTooLarge,
    /// The request body is not `multipart/related`.
    UnsupportedMediaType,
    /// The target is locked by another request.
    Locked,
    /// Unexpected I/O failure.
    InternalError,
    /// The storage backend cannot be reached.
    ServiceUnavailable,
}

impl BundleErrorCode {
    /// Returns the error code as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BadRequest",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "NotFound",
            Self::MethodNotAllowed => "MethodNotAllowed",
            Self::Conflict => "Conflict",
            Self::PayloadTooLarge => "PayloadTooLarge",
            Self::UnsupportedMediaType => "UnsupportedMediaType",
            Self::Locked => "Locked",
            Self::InternalError => "InternalError",
            Self::ServiceUnavailable => "ServiceUnavailable",
        }
    }

    /// Returns the default HTTP status code for this error.
    #[must_use]
    pub fn default_status_code(&self) -> http::StatusCode {
        match self {
            Self::BadRequest => http::StatusCode::BAD_REQUEST,
            Self::Forbidden => http::StatusCode::FORBIDDEN,
            Self::NotFound => http::StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => http::StatusCode::METHOD_NOT_ALLOWED,
            Self::Conflict => http::StatusCode::CONFLICT,
            Self::PayloadTooLarge => http::StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedMediaType => http::StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Locked => http::StatusCode::LOCKED,
            Self::InternalError => http::StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable => http::StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Returns the default message for this error.
    #[must_use]
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::BadRequest => "The bundle request is malformed",
            Self::Forbidden => "The target file already exists",
            Self::NotFound => "The requested resource does not exist",
            Self::MethodNotAllowed => "The specified method is not allowed against this resource",
            Self::Conflict => "The parent collection does not exist",
            Self::PayloadTooLarge => "The part exceeds the maximum allowed size",
            Self::UnsupportedMediaType => "The request body must be multipart/related",
            Self::Locked => "The target file is locked",
            Self::InternalError => "Internal server error",
            Self::ServiceUnavailable => "The storage backend is not available",
        }
    }
}

impl fmt::Display for BundleErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error response for a bundle request.
#[derive(Debug)]
pub struct BundleError {
    /// The error code.
    pub code: BundleErrorCode,
    /// A human-readable error message.
    pub message: String,
    /// The path or content identifier that caused the error.
    pub resource: Option<String>,
    /// The HTTP status code.
    pub status_code: http::StatusCode,
    /// The underlying source error, if any.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for BundleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BundleError({}): {}", self.code, self.message)
    }
}

impl std::error::Error for BundleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl BundleError {
    /// Create a new error from an error code.
    #[must_use]
    pub fn new(code: BundleErrorCode) -> Self {
        Self {
            status_code: code.default_status_code(),
            message: code.default_message().to_owned(),
            code,
            resource: None,
            source: None,
        }
    }

    /// Create a new error with a custom message.
    #[must_use]
    pub fn with_message(code: BundleErrorCode, message: impl Into<String>) -> Self {
        Self {
            status_code: code.default_status_code(),
            message: message.into(),
            code,
            resource: None,
            source: None,
        }
    }

    /// Set the resource that caused this error.
    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Set the source error.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Create a BadRequest error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_message(BundleErrorCode::BadRequest, message)
    }

    /// Create an InternalError error.
    #[must_use]
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::with_message(BundleErrorCode::InternalError, message)
    }

    /// Create a NotFound error.
    #[must_use]
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::new(BundleErrorCode::NotFound).with_resource(path)
    }

    /// Create a MethodNotAllowed error.
    #[must_use]
    pub fn method_not_allowed(method: impl Into<String>) -> Self {
        Self::new(BundleErrorCode::MethodNotAllowed).with_resource(method)
    }
}
