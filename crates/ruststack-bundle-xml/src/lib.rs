//! WebDAV XML for the RustStack bundled-upload service.
//!
//! # Key components
//!
//! - [`multistatus_to_xml`] renders a [`BundleOutcome`](ruststack_bundle_model::BundleOutcome)
//!   as a `207 Multi-Status` body, one `<d:response>` per part.
//! - [`error_to_xml`] renders a bundle-level failure as a `<d:error>` body.
//! - [`metadata_from_xml`] parses the optional metadata part that declares the
//!   files of a bundle by content id.
//!
//! # Namespaces
//!
//! - `d`: `DAV:`
//! - `s`: `http://sabredav.org/ns` (exception and message elements)
//! - `oc`: `http://owncloud.org/ns` (file id, size, mtime acceptance)

pub mod deserialize;
pub mod error;
pub mod serialize;

pub use deserialize::metadata_from_xml;
pub use error::{XmlError, error_to_xml};
pub use serialize::{DAV_NAMESPACE, OWNCLOUD_NAMESPACE, SABRE_NAMESPACE, multistatus_to_xml};
