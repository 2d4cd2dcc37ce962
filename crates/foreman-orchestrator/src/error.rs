// Error types for orchestration

use thiserror::Error;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Orchestration errors
///
/// Only configuration and output errors surface here. Failures of individual
/// model or search calls are absorbed into placeholder text by the dispatcher.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Invalid or unresolvable configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Model error raised while building a backend
    #[error("Model error: {0}")]
    Model(#[from] foreman_abstraction::ModelError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Archive packaging error
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Other error
    #[error("Orchestration error: {0}")]
    Other(String),
}

impl From<tempfile::PersistError> for OrchestrationError {
    fn from(err: tempfile::PersistError) -> Self {
        Self::Io(err.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_abstraction::ModelError;

    #[test]
    fn test_model_error_converts() {
        let err: OrchestrationError =
            ModelError::UnsupportedModelProvider("Unsupported model: gpt-4".to_string()).into();
        assert!(matches!(err, OrchestrationError::Model(_)));
        assert!(err.to_string().contains("gpt-4"));
    }

    #[test]
    fn test_config_error_display() {
        let err = OrchestrationError::Config("task_iter must be at least 1".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: task_iter must be at least 1");
    }
}
