//! Utility functions shared by storage, sync and the command line.
//!
//! - **URL validation**: scheme/host checks for feed URLs before a source is registered
//! - **Text processing**: control-character stripping and HTML excerpts for terminal output

mod text;
mod url_validator;

pub use text::{html_excerpt, strip_control_chars};
pub use url_validator::{favicon_url, validate_feed_url, UrlValidationError};
