//! Engine error types.

use thiserror::Error;

/// Errors returned by engine operations.
///
/// Failures raised by feature code never surface here; they are recorded in
/// the [`FaultRegistry`](crate::fault::FaultRegistry) instead. These variants
/// cover API misuse, registry construction and collaborator failures.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Feature not found.
    #[error("Feature not found: {0}")]
    NotFound(String),

    /// Feature already registered.
    #[error("Feature already registered: {0}")]
    AlreadyExists(String),

    /// Feature declaration is invalid.
    #[error("Invalid feature '{feature}': {message}")]
    InvalidFeature { feature: String, message: String },

    /// Feature has no persisted on/off state.
    #[error("Feature is not toggleable: {0}")]
    NotToggleable(String),

    /// Feature has no click action.
    #[error("Feature is not clickable: {0}")]
    NotClickable(String),

    /// Feature does not target the current process.
    #[error("Feature '{feature}' is not eligible to run in process {process}")]
    NotEligible { feature: String, process: String },

    /// Host operation could not be resolved.
    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    /// Host integration layer rejected a request.
    #[error("Host error on '{operation}': {message}")]
    Host { operation: String, message: String },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl EngineError {
    /// Create an invalid feature error.
    pub fn invalid_feature(feature: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidFeature {
            feature: feature.into(),
            message: message.into(),
        }
    }

    /// Create a host error.
    pub fn host_error(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Host {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<toml::ser::Error> for EngineError {
    fn from(err: toml::ser::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::NotFound("chat/auto_reply".to_string());
        assert_eq!(err.to_string(), "Feature not found: chat/auto_reply");
    }

    #[test]
    fn test_invalid_feature() {
        let err = EngineError::invalid_feature("dev/cleaner", "empty path");
        assert!(err.to_string().contains("dev/cleaner"));
        assert!(err.to_string().contains("empty path"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let engine_err: EngineError = io_err.into();
        assert!(matches!(engine_err, EngineError::IoError(_)));
    }
}
