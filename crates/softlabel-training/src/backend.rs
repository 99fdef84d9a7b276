//! Feature-head training backend.
//!
//! Wires a [`RunSpec`] end to end: reads the JSONL splits, derives class
//! weights from the train split, builds a [`FeedForwardHead`], runs the
//! [`TrainingLoop`] on a blocking thread, and writes the run manifest.

use crate::artifacts::{make_artifact, write_json, ArtifactKind, RunManifest, RunMetrics};
use crate::dataset::{compute_dataset_id, read_jsonl_samples, DataSource, InMemoryDataSource};
use crate::error::{TrainingError, TrainingResult};
use crate::head::FeedForwardHead;
use crate::layout::{RunId, RunLayout};
use crate::loss::WeightedKlLoss;
use crate::model::Model;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::schedule::PlateauScheduler;
use crate::trainer::{RunSpec, Trainer, TrainerStatus};
use crate::training_loop::{LoopOutputs, LoopSettings, TrainingLoop};
use crate::weighting::{class_weights, label_frequencies};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct FeatureHeadTrainer {
    statuses: Arc<Mutex<HashMap<String, TrainerStatus>>>,
}

impl FeatureHeadTrainer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn set_status(&self, run_id: &RunId, status: TrainerStatus) {
        if let Ok(mut s) = self.statuses.lock() {
            s.insert(run_id.0.clone(), status);
        }
    }
}

fn run_blocking(spec: &RunSpec, progress: &dyn ProgressSink) -> TrainingResult<RunManifest> {
    let config = &spec.config;
    let run_id = spec.run_id.clone();
    let layout = RunLayout::new(config.output_dir.clone());
    layout.ensure_run_dirs(&run_id)?;
    std::fs::write(layout.config_path(&run_id), config.to_toml_string()?)?;

    progress.on_event(ProgressEvent::Message { run_id: run_id.clone(), message: "loading datasets".to_string() });
    let train_samples = read_jsonl_samples(&config.data.train)?;
    let val_samples = read_jsonl_samples(&config.data.val)?;
    let train_dataset = compute_dataset_id(&train_samples)?;
    let val_dataset = compute_dataset_id(&val_samples)?;

    let train = InMemoryDataSource::new(train_samples, config.batch_size)?;
    let val = InMemoryDataSource::new(val_samples, config.batch_size)?;
    if train.num_classes() != config.num_classes {
        return Err(TrainingError::shape_mismatch("target classes", &[config.num_classes], &[train.num_classes()]));
    }
    tracing::info!(train = train.len(), val = val.len(), classes = config.num_classes, "datasets loaded");

    let mut loss = WeightedKlLoss::new(config.reduction);
    if config.use_class_weights {
        let weights = class_weights(&label_frequencies(&train.target_matrix()), config.class_weight_gamma);
        tracing::debug!(?weights, "class weights");
        loss = loss.with_class_weights(weights);
    }

    let lrs: [f64; 2] = config.learning_rates.as_slice().try_into().map_err(|_| {
        TrainingError::InvalidConfig(format!(
            "feature head expects 2 learning rates (hidden, output), got {}",
            config.learning_rates.len()
        ))
    })?;
    let input_dim = train.samples().first().map_or(0, |s| s.features.len());
    let mut model = FeedForwardHead::new(input_dim, config.hidden_dim, config.num_classes, lrs, config.seed);
    let mut scheduler = PlateauScheduler::new(config.lr_decay.clone());

    let outputs = LoopOutputs {
        run_id: run_id.clone(),
        log_path: layout.log_path(&run_id),
        checkpoint_path: layout.best_checkpoint_path(&run_id),
    };
    let looper = TrainingLoop::new(LoopSettings::from(config), loss, outputs)?;
    let outcome = looper.run(&mut model, &train, &val, &mut scheduler, progress)?;

    let mut artifacts = vec![
        make_artifact(ArtifactKind::TrainingLog, layout.log_path(&run_id))?,
        make_artifact(ArtifactKind::Config, layout.config_path(&run_id))?,
    ];
    let checkpoint = layout.best_checkpoint_path(&run_id);
    if checkpoint.exists() {
        artifacts.push(make_artifact(ArtifactKind::BestCheckpoint, checkpoint)?);
    } else {
        tracing::warn!("no epoch improved on the initial validation loss; no checkpoint saved");
    }

    let best = outcome.best_record();
    let manifest = RunManifest {
        run_id: run_id.clone(),
        created_at: chrono::Utc::now(),
        model: model.id().to_string(),
        device: config.device,
        train_dataset,
        val_dataset,
        stop_reason: outcome.stop_reason,
        metrics: RunMetrics {
            best_epoch: outcome.best_epoch,
            best_val_loss: outcome.best_epoch.map(|_| outcome.best_val_loss),
            epochs_run: outcome.state.records.len(),
            train: best.map(|r| r.train.clone()),
            val: best.map(|r| r.val.clone()),
        },
        artifacts,
    };
    write_json(layout.manifest_path(&run_id), &manifest)?;
    Ok(manifest)
}

#[async_trait]
impl Trainer for FeatureHeadTrainer {
    fn id(&self) -> &'static str {
        "feature-head"
    }

    async fn prepare(&self, spec: &RunSpec) -> TrainingResult<()> {
        spec.validate()?;
        RunLayout::new(spec.config.output_dir.clone()).ensure_run_dirs(&spec.run_id)?;
        self.set_status(&spec.run_id, TrainerStatus::Preparing);
        Ok(())
    }

    async fn run(&self, spec: &RunSpec, progress: Arc<dyn ProgressSink>) -> TrainingResult<RunManifest> {
        spec.validate()?;
        self.set_status(&spec.run_id, TrainerStatus::Running);

        let owned = spec.clone();
        let result = tokio::task::spawn_blocking(move || run_blocking(&owned, progress.as_ref()))
            .await
            .map_err(|e| TrainingError::Trainer(format!("training task failed: {e}")))
            .and_then(|r| r);

        match &result {
            Ok(_) => self.set_status(&spec.run_id, TrainerStatus::Finished),
            Err(e) => self.set_status(&spec.run_id, TrainerStatus::Failed(e.to_string())),
        }
        result
    }

    async fn status(&self, run_id: &RunId) -> TrainingResult<TrainerStatus> {
        Ok(self
            .statuses
            .lock()
            .ok()
            .and_then(|s| s.get(&run_id.0).cloned())
            .unwrap_or(TrainerStatus::Idle))
    }
}
