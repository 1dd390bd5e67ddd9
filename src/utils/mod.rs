//! Utility modules shared across the relay

pub mod url;

pub use url::UrlUtils;
