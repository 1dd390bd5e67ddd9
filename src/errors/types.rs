//! Error type definitions for the RTSP relay
//!
//! None of these messages may carry a raw source URL. Callers mask URLs with
//! [`crate::utils::UrlUtils::obfuscate_credentials`] before building an error.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Top-level application error type
///
/// Everything the HTTP layer can surface converts into this enum, which
/// `web::responses::handle_error` maps onto a status code.
#[derive(Error, Debug)]
pub enum AppError {
    /// Relay and transcoder errors
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    /// Stream record store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Snapshot capture errors
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Resource not found errors
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Errors raised while driving a transcoder process
#[derive(Error, Debug)]
pub enum RelayError {
    /// The transcoder binary could not be spawned
    #[error("Failed to spawn transcoder '{program}': {message}")]
    SpawnFailed { program: String, message: String },

    /// A read or stop was issued against a process that is not running
    #[error("Transcoder is not running")]
    NotRunning,

    /// The relay was evicted and will not start again
    #[error("Relay has been shut down")]
    Closed,

    /// The process ran but failed
    #[error("Transcoder process failed: {0}")]
    ProcessFailed(String),

    /// IO errors on the process pipes
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stream record store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// The URL is not a usable `rtsp://` URL
    #[error("Invalid RTSP URL: {reason}")]
    InvalidUrl { reason: String },

    /// No active record with this id
    #[error("Stream not found: {0}")]
    NotFound(Uuid),
}

/// One-shot frame capture errors
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// The capture did not finish within the configured timeout
    #[error("Frame capture timed out after {0:?}")]
    Timeout(Duration),

    /// The transcoder exited without producing an image
    #[error("Frame capture failed: {0}")]
    CaptureFailed(String),

    /// IO errors while spawning or reading the capture process
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>, I: ToString>(resource: S, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.to_string(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

