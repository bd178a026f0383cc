//! Error types for the Kairos recommendation engine
//!
//! This module provides error handling using thiserror for structured
//! error definitions and anyhow for error propagation at the binary edge.
//!
//! The inference core itself never fails: missing posteriors fall back to
//! default priors and degenerate numerics are short-circuited. Errors only
//! surface at the boundaries (configuration, persistence, caller input).

use thiserror::Error;

/// Main error type for Kairos operations
#[derive(Error, Debug)]
pub enum KairosError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Configuration loaded but failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Protocol id not present in the catalog
    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    /// Feedback value outside {-1, 0, 1}
    #[error("Invalid feedback delta: {0} (expected -1, 0 or 1)")]
    InvalidFeedback(i64),

    /// Goal name not recognised
    #[error("Invalid goal: {0}")]
    InvalidGoal(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Kairos operations
pub type Result<T> = std::result::Result<T, KairosError>;

/// Convert anyhow::Error to KairosError
impl From<anyhow::Error> for KairosError {
    fn from(err: anyhow::Error) -> Self {
        KairosError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KairosError::UnknownProtocol("box-breathing".to_string());
        assert_eq!(err.to_string(), "Unknown protocol: box-breathing");

        let err = KairosError::InvalidFeedback(3);
        assert_eq!(
            err.to_string(),
            "Invalid feedback delta: 3 (expected -1, 0 or 1)"
        );
    }

    #[test]
    fn test_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json");
        assert!(json_err.is_err());

        let kairos_err: KairosError = json_err.unwrap_err().into();
        assert!(matches!(kairos_err, KairosError::Serialization(_)));

        let kairos_err: KairosError = anyhow::anyhow!("boom").into();
        assert!(matches!(kairos_err, KairosError::Other(ref m) if m == "boom"));
    }
}
