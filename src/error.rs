//! Typed failures surfaced by the capture, inference and pipeline layers.
//!
//! Device internals and configuration loading use `anyhow`; everything that
//! crosses a component boundary is converted into [`Error`] so callers can
//! match on the failure kind.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Failure taxonomy shared by every core component.
#[derive(Debug, Error)]
pub enum Error {
    #[error("video source {source_name:?} unavailable: {reason}")]
    DeviceUnavailable { source_name: String, reason: String },

    #[error("frame source already started")]
    AlreadyStarted,

    #[error("failed to load model {}: {reason}", path.display())]
    ModelLoadFailure { path: PathBuf, reason: String },

    #[error("core mask {mask} not supported: {reason}")]
    UnsupportedAffinity { mask: String, reason: String },

    #[error("inference failed: {0}")]
    InferenceFailure(String),

    #[error("inference handle already released")]
    HandleReleased,

    #[error("preprocess failed: {0}")]
    Preprocess(String),

    #[error("postprocess failed: {0}")]
    Postprocess(String),
}

impl Error {
    pub(crate) fn device(source_name: impl Into<String>, reason: impl fmt::Display) -> Self {
        Error::DeviceUnavailable {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn model_load(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Error::ModelLoadFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Pipeline stage a failure originated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Preprocess,
    Inference,
    Postprocess,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Preprocess => "preprocess",
            Stage::Inference => "inference",
            Stage::Postprocess => "postprocess",
        };
        f.write_str(name)
    }
}

/// A pipeline failure tagged with the stage that produced it.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl StageError {
    pub fn new(stage: Stage, source: Error) -> Self {
        Self { stage, source }
    }

    /// The underlying typed failure.
    pub fn kind(&self) -> &Error {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_names_stage_and_cause() {
        let err = StageError::new(Stage::Postprocess, Error::Postprocess("bad shape".into()));
        assert_eq!(
            err.to_string(),
            "postprocess stage failed: postprocess failed: bad shape"
        );
        assert!(matches!(err.kind(), Error::Postprocess(_)));
    }

    #[test]
    fn model_load_message_includes_path() {
        let err = Error::model_load("/models/yolov8n.rknn", "not found");
        assert_eq!(
            err.to_string(),
            "failed to load model /models/yolov8n.rknn: not found"
        );
    }
}
