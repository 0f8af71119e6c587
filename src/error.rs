//! Typed errors for the chain pipeline.
//!
//! Library code returns these; `main.rs` wraps them in `anyhow` with context.

use std::path::PathBuf;

use crate::models::PixelFormat;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("invalid value for `{key}`: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("slot {0} is not configured")]
    MissingSlot(u32),

    #[error("slot {slot}, chain {chain}: {reason}")]
    InvalidChain {
        slot: u32,
        chain: String,
        reason: String,
    },
}

/// Errors raised while assembling a pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A model file required by the chain does not exist.
    #[error("model artifact not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The engine builder ran but left no engine behind.
    #[error("engine build for `{model}` produced no artifact at {}", .engine_path.display())]
    BuildFailure { model: String, engine_path: PathBuf },

    /// The frame graph cannot feed this representation to the stage.
    #[error("{stage} does not accept {format:?} input")]
    UnsupportedRepresentation { stage: String, format: PixelFormat },

    #[error("model inspection failed for {}: {message}", .path.display())]
    Inspection { path: PathBuf, message: String },

    #[error("frame graph error: {0}")]
    Graph(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Whether the single half-float to float fallback applies.
    pub fn is_unsupported_representation(&self) -> bool {
        matches!(self, PipelineError::UnsupportedRepresentation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PipelineError::BuildFailure {
            model: "2x_Model".to_string(),
            engine_path: PathBuf::from("/models/2x_Model.0badf00d.engine"),
        };
        assert!(err.to_string().contains("2x_Model.0badf00d.engine"));
        assert!(!err.is_unsupported_representation());

        let err = PipelineError::UnsupportedRepresentation {
            stage: "trt engine".to_string(),
            format: PixelFormat::RgbH,
        };
        assert!(err.is_unsupported_representation());
        assert_eq!(err.to_string(), "trt engine does not accept RgbH input");
    }
}
