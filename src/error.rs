//! Error taxonomy for the polling core.

use serde::ser::{Serialize, SerializeStruct, Serializer};
use thiserror::Error;

/// Failure reported by the transport. Always retryable from the cache's view.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response body: {0}")]
    Decode(String),
}

/// Failure turning a raw payload into a canonical reading or series.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("Invalid numeric value: {0:?}")]
    InvalidValue(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Anything that can fail one fetch attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Normalization(#[from] NormalizationError),
}

impl FetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Transport(_) => "transport",
            FetchError::Normalization(NormalizationError::InvalidValue(_)) => "invalid_value",
            FetchError::Normalization(NormalizationError::MissingField(_)) => "missing_field",
            FetchError::Normalization(NormalizationError::InvalidTimestamp(_)) => {
                "invalid_timestamp"
            }
        }
    }
}

// the json view only needs a label and a human message
impl Serialize for FetchError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("FetchError", 2)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}
