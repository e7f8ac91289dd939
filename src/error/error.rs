//! Error types and handling for the authz callout

use thiserror::Error;

/// Result type alias for callout operations
pub type Result<T> = std::result::Result<T, CalloutError>;

/// Main error type for the authz callout
#[derive(Error, Debug)]
pub enum CalloutError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The rule source could not be reached or refused the request
    #[error("Rule source unavailable: {message}")]
    SourceUnavailable { message: String },

    /// The rule source answered with data that could not be decoded
    #[error("Malformed rule source data: {message}")]
    MalformedSource { message: String },

    /// A bounded operation ran past its deadline
    #[error("Timeout: {message}")]
    Timeout { message: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP client errors
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// gRPC transport errors
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Generic errors
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CalloutError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a source unavailable error
    pub fn source_unavailable<S: Into<String>>(message: S) -> Self {
        Self::SourceUnavailable {
            message: message.into(),
        }
    }

    /// Create a malformed source error
    pub fn malformed_source<S: Into<String>>(message: S) -> Self {
        Self::MalformedSource {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CalloutError::SourceUnavailable { .. }
                | CalloutError::Timeout { .. }
                | CalloutError::Http(_)
                | CalloutError::Io(_)
        )
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            CalloutError::Config { .. } => "config",
            CalloutError::SourceUnavailable { .. } => "source_unavailable",
            CalloutError::MalformedSource { .. } => "malformed_source",
            CalloutError::Timeout { .. } => "timeout",
            CalloutError::Io(_) => "io",
            CalloutError::Serde(_) => "serialization",
            CalloutError::Yaml(_) => "yaml",
            CalloutError::Http(_) => "http",
            CalloutError::Transport(_) => "transport",
            CalloutError::Internal(_) => "internal",
        }
    }
}

impl Clone for CalloutError {
    fn clone(&self) -> Self {
        match self {
            CalloutError::Config { message } => CalloutError::Config { message: message.clone() },
            CalloutError::SourceUnavailable { message } => CalloutError::SourceUnavailable { message: message.clone() },
            CalloutError::MalformedSource { message } => CalloutError::MalformedSource { message: message.clone() },
            CalloutError::Timeout { message } => CalloutError::Timeout { message: message.clone() },

            // For non-cloneable types, keep the category and the rendered message
            CalloutError::Io(e) => CalloutError::source_unavailable(format!("IO error: {}", e)),
            CalloutError::Serde(e) => CalloutError::malformed_source(format!("Serialization error: {}", e)),
            CalloutError::Yaml(e) => CalloutError::malformed_source(format!("YAML error: {}", e)),
            CalloutError::Http(e) => CalloutError::source_unavailable(format!("HTTP error: {}", e)),
            CalloutError::Transport(e) => CalloutError::config(format!("gRPC transport error: {}", e)),
            CalloutError::Internal(e) => CalloutError::config(format!("Internal error: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(CalloutError::config("x").category(), "config");
        assert_eq!(CalloutError::source_unavailable("x").category(), "source_unavailable");
        assert_eq!(CalloutError::timeout("x").category(), "timeout");
    }

    #[test]
    fn test_retryable() {
        assert!(CalloutError::source_unavailable("down").is_retryable());
        assert!(CalloutError::timeout("slow").is_retryable());
        assert!(!CalloutError::malformed_source("bad json").is_retryable());
        assert!(!CalloutError::config("bad").is_retryable());
    }

    #[test]
    fn test_clone_keeps_message() {
        let err = CalloutError::source_unavailable("sheet 404");
        assert_eq!(err.clone().to_string(), "Rule source unavailable: sheet 404");
    }
}
