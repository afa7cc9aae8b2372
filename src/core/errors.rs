use thiserror::Error;

/// Unified error type for the hostwalk library
#[derive(Debug, Error)]
pub enum HostwalkError {
    /// Engine configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A run configuration that failed validation; never started
    #[error("Run configuration has {} error(s): {}", errors.len(), errors.join("; "))]
    InvalidConfig { errors: Vec<String> },

    /// A template that still holds unresolved patterns after expansion
    #[error("Failed to populate pattern: {pattern}")]
    Template { pattern: String, unresolved: Vec<String> },

    /// Invalid regular expression in a node
    #[error("Invalid pattern: {pattern}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Shell connection failures
    #[error("Failed to connect to {host}")]
    Connect {
        host: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Upload or download failures
    #[error("Transfer failed: {operation} {path} -> {destination}")]
    Transfer {
        operation: String,
        path: String,
        destination: String,
    },

    /// IO errors
    #[error("IO operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization errors
    #[error("Serialization failed: {format}")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// No tokio runtime to drive walks on
    #[error("Runtime error: {message}")]
    Runtime { message: String },
}

impl HostwalkError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid run configuration error
    pub fn invalid_config(errors: Vec<String>) -> Self {
        Self::InvalidConfig { errors }
    }

    /// Create a template error
    pub fn template<S: Into<String>>(pattern: S, unresolved: Vec<String>) -> Self {
        Self::Template {
            pattern: pattern.into(),
            unresolved,
        }
    }

    /// Create an invalid pattern error
    pub fn pattern<S: Into<String>>(pattern: S, source: regex::Error) -> Self {
        Self::Pattern {
            pattern: pattern.into(),
            source,
        }
    }

    /// Create a connect error from any transport failure
    pub fn connect<S: Into<String>>(host: S, source: anyhow::Error) -> Self {
        Self::Connect {
            host: host.into(),
            source: source.into(),
        }
    }

    /// Create a transfer error
    pub fn transfer<O: Into<String>, P: Into<String>, D: Into<String>>(
        operation: O,
        path: P,
        destination: D,
    ) -> Self {
        Self::Transfer {
            operation: operation.into(),
            path: path.into(),
            destination: destination.into(),
        }
    }

    /// Create an IO error
    pub fn io<S: Into<String>>(operation: S, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        format: S,
        source: E,
    ) -> Self {
        Self::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    /// Create a runtime error
    pub fn runtime<S: Into<String>>(message: S) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::InvalidConfig { .. } => "configuration",
            Self::Template { .. } => "template",
            Self::Pattern { .. } => "pattern",
            Self::Connect { .. } => "connect",
            Self::Transfer { .. } => "transfer",
            Self::Io { .. } => "io",
            Self::Serialization { .. } => "serialization",
            Self::Runtime { .. } => "runtime",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, HostwalkError>;

impl From<std::io::Error> for HostwalkError {
    fn from(err: std::io::Error) -> Self {
        Self::io("io_operation", err)
    }
}

impl From<serde_json::Error> for HostwalkError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("json", err)
    }
}

impl From<serde_yaml::Error> for HostwalkError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization("yaml", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_lists_errors() {
        let err = HostwalkError::invalid_config(vec![
            "missing script foo".to_string(),
            "role bar has no hosts".to_string(),
        ]);
        assert_eq!(err.category(), "configuration");
        assert_eq!(
            err.to_string(),
            "Run configuration has 2 error(s): missing script foo; role bar has no hosts"
        );
    }

    #[test]
    fn test_pattern_keeps_regex_source() {
        let source = regex::Regex::new("(unclosed").err().unwrap();
        let err = HostwalkError::pattern("(unclosed", source);
        assert_eq!(err.category(), "pattern");
        assert_eq!(err.to_string(), "Invalid pattern: (unclosed");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_connect_keeps_source() {
        let err = HostwalkError::connect("user@host:22", anyhow::anyhow!("refused"));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("refused"));
    }
}
