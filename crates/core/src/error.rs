//! Domain errors shared by the adaptor and the worker client.

/// Errors raised while validating payloads or handling protocol messages.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// An init or run payload failed validation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A control-socket message could not be encoded or decoded.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An internal invariant was broken.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Protocol(err.to_string())
    }
}

impl From<validator::ValidationErrors> for CoreError {
    fn from(err: validator::ValidationErrors) -> Self {
        CoreError::Validation(err.to_string())
    }
}
