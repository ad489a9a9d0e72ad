//! Error handling.

use std::error::Error as StdError;
use std::io;

use displaydoc::Display;

pub type DepotResult<T> = Result<T, DepotError>;

/// An error.
#[derive(Debug, Display)]
pub enum DepotError {
    /// Hashing error: {0}
    HashError(super::hash::Error),

    /// Unsupported media type "{mime}"
    UnsupportedMediaType { mime: String },

    /// I/O error: {error}.
    IoError { error: io::Error },
}

impl DepotError {
    pub fn name(&self) -> &'static str {
        match self {
            Self::HashError(_) => "HashError",
            Self::UnsupportedMediaType { .. } => "UnsupportedMediaType",
            Self::IoError { .. } => "IoError",
        }
    }
}

impl StdError for DepotError {}

impl From<io::Error> for DepotError {
    fn from(error: io::Error) -> Self {
        Self::IoError { error }
    }
}

impl From<super::hash::Error> for DepotError {
    fn from(error: super::hash::Error) -> Self {
        Self::HashError(error)
    }
}
