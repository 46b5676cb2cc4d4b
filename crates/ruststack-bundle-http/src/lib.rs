//! HTTP layer of the RustStack bundled-upload service.
//!
//! A bundle is one `POST` whose `multipart/related` body packs many files.
//! This crate streams the body part by part and hands each part to a
//! [`BundleHandler`]; it never touches storage itself.
//!
//! # Modules
//!
//! - [`multipart`]: streaming demultiplexer over the request body
//! - [`bundle`]: coordinator sequencing parts and aggregating outcomes
//! - [`dispatch`]: the [`BundleHandler`] trait (HTTP ↔ committer boundary)
//! - [`router`]: route guard for the bundle endpoint
//! - [`response`]: size map, multi-status, and DAV error rendering
//! - [`service`]: hyper `Service` implementation
//! - [`body`]: response body type

pub mod body;
pub mod bundle;
pub mod dispatch;
pub mod multipart;
pub mod response;
pub mod router;
pub mod service;

pub use body::BundleResponseBody;
pub use bundle::handle_bundle;
pub use dispatch::BundleHandler;
pub use multipart::{MultipartError, MultipartReader};
pub use service::{BundleHttpConfig, BundleHttpService};
