//! Centralized error handling for the RTSP relay
//!
//! # Error Categories
//!
//! - **Relay Errors**: transcoder spawn, IO and lifecycle failures
//! - **Store Errors**: stream record validation and lookup
//! - **Snapshot Errors**: one-shot frame capture failures
//! - **Validation Errors**: input validation at the HTTP boundary
//!
//! # Usage
//!
//! ```rust
//! use rtsp_relay::errors::{AppError, AppResult};
//!
//! async fn example_function() -> AppResult<String> {
//!     Ok("success".to_string())
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for relay and transcoder Results
pub type RelayResult<T> = Result<T, RelayError>;

/// Convenience type alias for stream store Results
pub type StoreResult<T> = Result<T, StoreError>;

/// Convenience type alias for snapshot Results
pub type SnapshotResult<T> = Result<T, SnapshotError>;
