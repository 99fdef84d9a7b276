use std::path::PathBuf;
use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid training config: {0}")]
    InvalidConfig(String),

    #[error("shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch { context: &'static str, expected: Vec<usize>, actual: Vec<usize> },

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("checkpoint error: {message} ({})", path.display())]
    Checkpoint { message: String, path: PathBuf },

    #[error("owner {owner} has inconsistent targets across its samples")]
    OwnerTargetMismatch { owner: String },

    #[error("trainer error: {0}")]
    Trainer(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrainingError {
    pub fn shape_mismatch(context: &'static str, expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch { context, expected: expected.to_vec(), actual: actual.to_vec() }
    }

    pub fn checkpoint<S: Into<String>>(message: S, path: impl Into<PathBuf>) -> Self {
        Self::Checkpoint { message: message.into(), path: path.into() }
    }
}

/// Why a single metric could not be computed.
///
/// A metric error never aborts an evaluation pass; the report stores NaN for
/// the affected key instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetricError {
    #[error("no class has a positive label")]
    NoPositiveLabels,

    #[error("empty input")]
    Empty,

    #[error("scores contain NaN or infinite values")]
    NonFiniteScores,
}
