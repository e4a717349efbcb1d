//! Error types for the layered cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or operating a layered cache
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Construction / Usage Errors
    // =========================================================================
    /// Invalid cache or layer configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// API misuse detected before any side effect
    #[error("Usage error: {0}")]
    Usage(String),

    // =========================================================================
    // Layer Errors
    // =========================================================================
    /// A single layer failed an operation
    #[error("Layer '{layer}' failed: {reason}")]
    Layer { layer: String, reason: String },

    /// Counter operation against a value that is not an integer
    #[error("Value stored at '{key}' is not an integer counter")]
    NonNumeric { key: String },

    /// Invalid key pattern for delete_matched
    #[error("Invalid key pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    // =========================================================================
    // Ambient Errors
    // =========================================================================
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file parse error
    #[error("Failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Metrics registration or encoding error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a layer error from anything displayable
    pub fn layer(layer: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Layer {
            layer: layer.into(),
            reason: reason.to_string(),
        }
    }

    /// True for errors that are reported before any layer is touched
    pub fn is_fail_fast(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::Usage(_) | Error::InvalidPattern(_)
        )
    }
}

impl From<prometheus::Error> for Error {
    fn from(e: prometheus::Error) -> Self {
        Error::Metrics(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_error_display() {
        let err = Error::layer("l2", "connection reset");
        assert_eq!(err.to_string(), "Layer 'l2' failed: connection reset");
        assert!(!err.is_fail_fast());
    }

    #[test]
    fn test_fail_fast_classification() {
        assert!(Error::Config("no layers".into()).is_fail_fast());
        assert!(Error::Usage("missing compute".into()).is_fail_fast());
        assert!(!Error::NonNumeric { key: "k".into() }.is_fail_fast());
    }
}
