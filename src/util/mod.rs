//! Small helpers shared across the crate.
//!
//! - **Text**: sanitizing provider-supplied labels
//! - **URL validation**: checking the configured catalog endpoint

mod text;
mod endpoint;

pub use self::text::{clean_label, strip_control_chars};
pub use self::endpoint::{validate_catalog_url, UrlValidationError};
