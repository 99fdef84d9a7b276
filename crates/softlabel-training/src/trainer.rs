use crate::artifacts::RunManifest;
use crate::config::TrainingConfig;
use crate::error::TrainingResult;
use crate::layout::RunId;
use crate::progress::ProgressSink;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainerStatus {
    Idle,
    Preparing,
    Running,
    Finished,
    Failed(String),
}

/// A configured run waiting to be executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSpec {
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    pub config: TrainingConfig,
}

impl RunSpec {
    #[must_use]
    pub fn new(config: TrainingConfig) -> Self {
        Self { run_id: RunId::new(), created_at: Utc::now(), config }
    }

    pub fn validate(&self) -> TrainingResult<()> {
        self.config.validate()
    }
}

/// A training backend.
#[async_trait]
pub trait Trainer: Send + Sync {
    fn id(&self) -> &'static str;

    /// Validate the run and create its directories.
    async fn prepare(&self, spec: &RunSpec) -> TrainingResult<()>;

    /// Execute the run to completion and return its manifest.
    async fn run(&self, spec: &RunSpec, progress: Arc<dyn ProgressSink>) -> TrainingResult<RunManifest>;

    async fn status(&self, run_id: &RunId) -> TrainingResult<TrainerStatus>;
}
