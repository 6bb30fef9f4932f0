//! Domain-level error taxonomy for the pipeline control plane.
//!
//! Gate failures and failed perspectives are ordinary values, not errors.
//! Only structural problems (bad configuration, unreadable artifacts,
//! serialization failures) surface as [`PipelineError`].

/// Pipeline domain errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("unknown stage: {0}")]
    UnknownStage(String),

    #[error("unknown workflow mode: {0}")]
    UnknownMode(String),

    #[error("no perspectives configured for stage {stage} in {mode} mode")]
    NoPerspectives { stage: String, mode: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid artifact id: {0}")]
    InvalidArtifactId(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for pipeline domain operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::UnknownStage("DEPLOY".to_string());
        assert!(err.to_string().contains("unknown stage"));
        assert!(err.to_string().contains("DEPLOY"));

        let err = PipelineError::NoPerspectives {
            stage: "REVIEW".to_string(),
            mode: "quick".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("REVIEW"));
        assert!(msg.contains("quick"));
    }

    #[test]
    fn test_serialization_error_converts() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: PipelineError = parse_err.into();
        assert!(err.to_string().starts_with("serialization error"));
    }

    #[test]
    fn test_storage_error() {
        let err = PipelineError::Storage("disk full".to_string());
        assert!(err.to_string().contains("storage error"));
        assert!(err.to_string().contains("disk full"));
    }
}
