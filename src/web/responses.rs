//! HTTP response types and utilities
//!
//! Error bodies and admin listings use the [`ApiResponse`] envelope. Stream
//! and thumbnail bodies are plain JSON objects, which is what browser clients
//! of the relay expect.

use std::collections::HashMap;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, RelayError, SnapshotError, StoreError};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, String>>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T> ApiResponse<T>
where
    T: Serialize,
{
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            details: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn error(message: String) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
            details: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn error_with_details(message: String, details: HashMap<String, String>) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
            details: Some(details),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Convert AppError to appropriate HTTP response
pub fn handle_error(error: AppError) -> impl IntoResponse {
    let (status, message, details) = match &error {
        AppError::Validation { message } => (StatusCode::BAD_REQUEST, message.clone(), None),
        AppError::NotFound { resource, id } => (
            StatusCode::NOT_FOUND,
            format!("{} with id '{}' not found", resource, id),
            None,
        ),
        AppError::Store(StoreError::InvalidUrl { reason }) => (
            StatusCode::BAD_REQUEST,
            "Invalid RTSP URL".to_string(),
            Some(HashMap::from([("url".to_string(), reason.clone())])),
        ),
        AppError::Store(StoreError::NotFound(id)) => (
            StatusCode::NOT_FOUND,
            format!("Stream with id '{}' not found", id),
            None,
        ),
        AppError::Snapshot(SnapshotError::Timeout(_)) => (
            StatusCode::GATEWAY_TIMEOUT,
            "Failed to generate thumbnail: capture timed out".to_string(),
            None,
        ),
        AppError::Snapshot(_) => (
            StatusCode::BAD_GATEWAY,
            "Failed to generate thumbnail".to_string(),
            None,
        ),
        AppError::Relay(RelayError::SpawnFailed { .. }) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Transcoder unavailable".to_string(),
            None,
        ),
        AppError::Relay(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Relay operation failed".to_string(),
            None,
        ),
        AppError::Configuration { message } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Configuration error: {}", message),
            None,
        ),
        AppError::Internal { message } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Internal error: {}", message),
            None,
        ),
    };

    if status.is_server_error() {
        tracing::error!("Request failed: {}", error);
    } else {
        tracing::debug!("Request rejected: {}", error);
    }

    let response = match details {
        Some(details) => ApiResponse::<()>::error_with_details(message, details),
        None => ApiResponse::<()>::error(message),
    };

    (status, Json(response))
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        handle_error(self).into_response()
    }
}

/// Success response helpers
pub fn ok<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

pub fn no_content() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}
