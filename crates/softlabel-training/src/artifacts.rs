use crate::config::TrainingDevice;
use crate::dataset::DatasetId;
use crate::error::{TrainingError, TrainingResult};
use crate::layout::RunId;
use crate::metrics::MetricsReport;
use crate::training_loop::StopReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    BestCheckpoint,
    TrainingLog,
    Config,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub sha256: String,
}

/// Summary of the best epoch of a run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunMetrics {
    pub best_epoch: Option<usize>,
    pub best_val_loss: Option<f64>,
    pub epochs_run: usize,
    /// Train-split metrics of the best epoch.
    #[serde(default)]
    pub train: Option<MetricsReport>,
    /// Validation-split metrics of the best epoch.
    #[serde(default)]
    pub val: Option<MetricsReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    /// Identifier of the model implementation that was trained.
    pub model: String,
    pub device: TrainingDevice,
    pub train_dataset: DatasetId,
    pub val_dataset: DatasetId,
    pub stop_reason: StopReason,
    #[serde(default)]
    pub metrics: RunMetrics,
    pub artifacts: Vec<RunArtifact>,
}

impl RunManifest {
    #[must_use]
    pub fn artifact(&self, kind: &ArtifactKind) -> Option<&RunArtifact> {
        self.artifacts.iter().find(|a| &a.kind == kind)
    }

    pub fn load(path: &Path) -> TrainingResult<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

pub fn sha256_file(path: &Path) -> TrainingResult<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

pub fn make_artifact(kind: ArtifactKind, path: PathBuf) -> TrainingResult<RunArtifact> {
    if !path.exists() {
        return Err(TrainingError::Trainer(format!("artifact path does not exist: {}", path.display())));
    }

    let hash = sha256_file(&path)?;
    Ok(RunArtifact { kind, path, sha256: hash })
}

pub fn write_json<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> TrainingResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_make_artifact_hashes_contents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.txt");
        std::fs::write(&path, b"abc").unwrap();

        let artifact = make_artifact(ArtifactKind::Other, path).unwrap();
        assert_eq!(artifact.sha256, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
    }

    #[test]
    fn test_make_artifact_requires_existing_file() {
        let temp = TempDir::new().unwrap();
        assert!(make_artifact(ArtifactKind::Config, temp.path().join("missing")).is_err());
    }

    #[test]
    fn test_manifest_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run_manifest.json");
        let manifest = RunManifest {
            run_id: RunId("r1".to_string()),
            created_at: Utc::now(),
            model: "feedforward-head".to_string(),
            device: TrainingDevice::Cpu,
            train_dataset: DatasetId("t".to_string()),
            val_dataset: DatasetId("v".to_string()),
            stop_reason: StopReason::EarlyStopped,
            metrics: RunMetrics { best_epoch: Some(2), best_val_loss: Some(0.25), epochs_run: 5, train: None, val: None },
            artifacts: Vec::new(),
        };
        write_json(&path, &manifest).unwrap();

        let loaded = RunManifest::load(&path).unwrap();
        assert_eq!(loaded.stop_reason, StopReason::EarlyStopped);
        assert_eq!(loaded.metrics.best_epoch, Some(2));
        assert!(loaded.artifact(&ArtifactKind::BestCheckpoint).is_none());
    }
}
