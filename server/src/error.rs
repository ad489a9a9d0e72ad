//! Error handling.

use std::error::Error as StdError;

use anyhow::Error as AnyError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use displaydoc::Display;
use serde::Serialize;

use depot::error::DepotError;

pub type ServerResult<T> = Result<T, ServerError>;

/// An error.
#[derive(Debug, Display)]
pub enum ServerError {
    // Generic responses
    /// The URL you requested was not found.
    NotFound,

    /// The server encountered an internal error or misconfiguration.
    InternalServerError,

    // Specialized responses
    /// The requested upload does not exist.
    NoSuchUpload,

    /// The requested product does not exist.
    NoSuchProduct,

    /// The requested import does not exist.
    NoSuchImport,

    /// Validation failed: {message}
    Validation { message: String },

    /// Checksum mismatch: {context}
    ChecksumMismatch { context: &'static str },

    /// The upload is {status} and cannot accept this operation.
    StateConflict { status: String },

    /// The upload is missing {count} chunks.
    MissingChunks { count: usize, missing: Vec<u32> },

    /// Import aborted at row {row}.
    ImportAborted { row: u64, errors: Vec<String> },

    /// Database error: {0}
    DatabaseError(AnyError),

    /// Storage error: {0}
    StorageError(AnyError),

    /// General request error: {0}
    RequestError(AnyError),

    /// Error from the common components.
    DepotError(DepotError),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    success: bool,
    code: u16,
    error: String,
    message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<serde_json::Value>,
}

impl ServerError {
    pub fn database_error(error: impl StdError + Send + Sync + 'static) -> Self {
        Self::DatabaseError(AnyError::new(error))
    }

    pub fn storage_error(error: impl StdError + Send + Sync + 'static) -> Self {
        Self::StorageError(AnyError::new(error))
    }

    pub fn request_error(error: impl StdError + Send + Sync + 'static) -> Self {
        Self::RequestError(AnyError::new(error))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::InternalServerError => "InternalServerError",

            Self::NoSuchUpload => "NoSuchUpload",
            Self::NoSuchProduct => "NoSuchProduct",
            Self::NoSuchImport => "NoSuchImport",
            Self::Validation { .. } => "Validation",
            Self::ChecksumMismatch { .. } => "ChecksumMismatch",
            Self::StateConflict { .. } => "StateConflict",
            Self::MissingChunks { .. } => "MissingChunks",
            Self::ImportAborted { .. } => "ImportAborted",
            Self::DatabaseError(_) => "DatabaseError",
            Self::StorageError(_) => "StorageError",
            Self::RequestError(_) => "RequestError",
            Self::DepotError(e) => e.name(),
        }
    }

    /// Returns machine-readable details for the client, where useful.
    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::MissingChunks { missing, .. } => serde_json::to_value(missing).ok(),
            Self::ImportAborted { errors, .. } => serde_json::to_value(errors).ok(),
            _ => None,
        }
    }

    /// Returns a version of this error for clients.
    fn into_clients(self) -> Self {
        match self {
            Self::DatabaseError(_) => Self::InternalServerError,
            Self::StorageError(_) => Self::InternalServerError,

            _ => self,
        }
    }

    fn http_status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,

            Self::NoSuchUpload => StatusCode::NOT_FOUND,
            Self::NoSuchProduct => StatusCode::NOT_FOUND,
            Self::NoSuchImport => StatusCode::NOT_FOUND,
            Self::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ChecksumMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::StateConflict { .. } => StatusCode::CONFLICT,
            Self::MissingChunks { .. } => StatusCode::CONFLICT,
            Self::ImportAborted { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::RequestError(_) => StatusCode::BAD_REQUEST,
            Self::DepotError(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl StdError for ServerError {}

impl From<DepotError> for ServerError {
    fn from(error: DepotError) -> Self {
        Self::DepotError(error)
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if matches!(self, Self::DatabaseError(_) | Self::StorageError(_)) {
            tracing::error!("{:?}", self);
        }

        let details = self.details();
        let sanitized = self.into_clients();

        let status_code = sanitized.http_status_code();
        let error_response = ErrorResponse {
            success: false,
            code: status_code.as_u16(),
            message: sanitized.to_string(),
            error: sanitized.name().to_string(),
            errors: details,
        };

        (status_code, Json(error_response)).into_response()
    }
}
