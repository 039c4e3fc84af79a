//! Shared domain error types.

use std::error::Error as StdError;
use thiserror::Error;

/// Raised when caller-supplied data cannot be acted upon: a missing or
/// contradictory transition parameter, a malformed operation parameter map,
/// or a document that no longer matches the hit schema.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct InvalidDataError {
    message: String,
    #[source]
    cause: Option<Box<dyn StdError + Send + Sync>>,
}

impl InvalidDataError {
    /// Creates an error with a human-readable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    /// Creates an error wrapping an underlying cause.
    pub fn with_cause(
        message: impl Into<String>,
        cause: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Returns the human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cause_is_exposed_as_source() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = InvalidDataError::with_cause("Invalid parameter map", parse_err);
        assert_eq!(err.to_string(), "Invalid parameter map");
        assert!(err.source().is_some());
        assert!(InvalidDataError::new("plain").source().is_none());
    }
}
