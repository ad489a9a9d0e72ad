//! Depot API v1.

pub mod imports;
pub mod uploads;

use serde::{Deserialize, Serialize};

/// The common response envelope.
///
/// Every successful endpoint wraps its payload in one of these.
/// Failures use the error envelope emitted by the server's error
/// type, which carries `success: false` plus the error kind.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn of(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: Some(data),
        }
    }
}
