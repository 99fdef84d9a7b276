use crate::error::TrainingResult;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Identifier for one training run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Filesystem layout for run artifacts.
///
/// Layout is `<root>/<run_id>/{training_log.csv, config.toml, run_manifest.json, checkpoints/}`.
#[derive(Debug, Clone)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.root.join(run_id.0.as_str())
    }

    #[must_use]
    pub fn log_path(&self, run_id: &RunId) -> PathBuf {
        self.run_dir(run_id).join("training_log.csv")
    }

    #[must_use]
    pub fn config_path(&self, run_id: &RunId) -> PathBuf {
        self.run_dir(run_id).join("config.toml")
    }

    #[must_use]
    pub fn manifest_path(&self, run_id: &RunId) -> PathBuf {
        self.run_dir(run_id).join("run_manifest.json")
    }

    #[must_use]
    pub fn checkpoints_dir(&self, run_id: &RunId) -> PathBuf {
        self.run_dir(run_id).join("checkpoints")
    }

    #[must_use]
    pub fn best_checkpoint_path(&self, run_id: &RunId) -> PathBuf {
        self.checkpoints_dir(run_id).join("best_model.json")
    }

    pub fn ensure_run_dirs(&self, run_id: &RunId) -> TrainingResult<()> {
        std::fs::create_dir_all(self.run_dir(run_id))?;
        std::fs::create_dir_all(self.checkpoints_dir(run_id))?;
        Ok(())
    }
}
