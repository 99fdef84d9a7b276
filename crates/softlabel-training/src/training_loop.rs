//! Epoch loop: train, evaluate, log, checkpoint, stop early, decay LR.
//!
//! The loop is synchronous and owns no model or data; it drives the
//! [`Model`] and [`DataSource`] collaborators it is handed. Each epoch:
//!
//! 1. trains on shuffled batches and records the batch-size-weighted loss,
//! 2. evaluates both splits without updates, optionally averaging
//!    predictions per owner first,
//! 3. appends a log record and rewrites the CSV log,
//! 4. saves a checkpoint on strict improvement of the validation `kl_mean`,
//!    or stops once `patience` epochs in a row failed to improve,
//! 5. lets the [`LrScheduler`] adjust the model's learning rates.

use crate::activation::{log_softmax, softmax};
use crate::aggregate::{OwnerAggregator, OwnerTargetPolicy};
use crate::config::TrainingConfig;
use crate::dataset::DataSource;
use crate::error::{TrainingError, TrainingResult};
use crate::history::{write_run_log, EpochRecord, TrainingState};
use crate::layout::RunId;
use crate::loss::WeightedKlLoss;
use crate::metrics::{evaluate, MetricsReport};
use crate::model::Model;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::schedule::LrScheduler;
use ndarray::{concatenate, Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Ran every configured epoch.
    MaxEpochs,
    /// Validation loss stopped improving for `patience` epochs.
    EarlyStopped,
}

/// Loop knobs, usually taken from a [`TrainingConfig`].
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub epochs: usize,
    pub patience: usize,
    pub seed: u64,
    pub aggregate_by_owner: bool,
    pub owner_target_policy: OwnerTargetPolicy,
}

impl From<&TrainingConfig> for LoopSettings {
    fn from(config: &TrainingConfig) -> Self {
        Self {
            epochs: config.epochs,
            patience: config.patience,
            seed: config.seed,
            aggregate_by_owner: config.aggregate_by_owner,
            owner_target_policy: config.owner_target_policy,
        }
    }
}

/// Where the loop writes its per-run files.
#[derive(Debug, Clone)]
pub struct LoopOutputs {
    pub run_id: RunId,
    pub log_path: PathBuf,
    pub checkpoint_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub state: TrainingState,
    pub stop_reason: StopReason,
    pub best_epoch: Option<usize>,
    pub best_val_loss: f64,
}

impl TrainingOutcome {
    /// The log record of the best epoch.
    #[must_use]
    pub fn best_record(&self) -> Option<&EpochRecord> {
        let best = self.best_epoch?;
        self.state.records.iter().find(|r| r.epoch == best)
    }
}

pub struct TrainingLoop {
    settings: LoopSettings,
    loss: WeightedKlLoss,
    outputs: LoopOutputs,
}

impl TrainingLoop {
    pub fn new(settings: LoopSettings, loss: WeightedKlLoss, outputs: LoopOutputs) -> TrainingResult<Self> {
        if settings.epochs == 0 {
            return Err(TrainingError::InvalidConfig("epochs must be >= 1".to_string()));
        }
        if settings.patience == 0 {
            return Err(TrainingError::InvalidConfig("patience must be >= 1".to_string()));
        }
        Ok(Self { settings, loss, outputs })
    }

    pub fn run<M, D>(
        &self,
        model: &mut M,
        train: &D,
        val: &D,
        scheduler: &mut dyn LrScheduler,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<TrainingOutcome>
    where
        M: Model + ?Sized,
        D: DataSource + ?Sized,
    {
        if train.num_classes() != val.num_classes() {
            return Err(TrainingError::shape_mismatch(
                "validation classes",
                &[train.num_classes()],
                &[val.num_classes()],
            ));
        }

        let run_id = self.outputs.run_id.clone();
        let mut rng = StdRng::seed_from_u64(self.settings.seed);
        let mut state = TrainingState::new();
        let mut stop_reason = StopReason::MaxEpochs;

        progress.on_event(ProgressEvent::Started { run_id: run_id.clone(), epochs: self.settings.epochs });

        for epoch in 1..=self.settings.epochs {
            let started = Instant::now();

            let train_loss = self.train_epoch(model, train, &mut rng)?;
            let train_metrics = self.evaluate_split(&*model, train, &mut rng)?;
            let val_metrics = self.evaluate_split(&*model, val, &mut rng)?;
            let val_loss = val_metrics.kl_mean;

            tracing::debug!(
                epoch,
                train_loss,
                val_loss,
                "train {} | val {}",
                train_metrics.summary(),
                val_metrics.summary()
            );

            state.records.push(EpochRecord {
                epoch,
                train_loss,
                val_loss,
                epoch_time_s: started.elapsed().as_secs_f64(),
                train: train_metrics,
                val: val_metrics,
            });
            write_run_log(&self.outputs.log_path, &state.records)?;
            progress.on_event(ProgressEvent::EpochCompleted { run_id: run_id.clone(), epoch, train_loss, val_loss });

            if state.observe(epoch, val_loss) {
                model.save(&self.outputs.checkpoint_path)?;
                progress.on_event(ProgressEvent::NewBest { run_id: run_id.clone(), epoch, val_loss });
            } else if state.epochs_without_improvement >= self.settings.patience {
                tracing::info!(epoch, patience = self.settings.patience, "early stopping");
                stop_reason = StopReason::EarlyStopped;
                break;
            }

            let mut rates = model.learning_rates();
            if scheduler.step(val_loss, &mut rates) {
                model.set_learning_rates(&rates)?;
                progress.on_event(ProgressEvent::LearningRateReduced { run_id: run_id.clone(), epoch, rates });
            }
        }

        progress.on_event(ProgressEvent::Finished { run_id, stop_reason });

        Ok(TrainingOutcome {
            best_epoch: state.best_epoch,
            best_val_loss: state.best_val_loss,
            state,
            stop_reason,
        })
    }

    /// One pass over shuffled training batches. Returns the mean loss
    /// weighted by batch size.
    pub fn train_epoch<M, D>(&self, model: &mut M, data: &D, rng: &mut StdRng) -> TrainingResult<f64>
    where
        M: Model + ?Sized,
        D: DataSource + ?Sized,
    {
        let mut total = 0.0;
        let mut seen = 0usize;
        for (idx, batch) in data.batches(true, rng)?.iter().enumerate() {
            let logits = model.forward(&batch.inputs)?;
            let log_probs = log_softmax(&logits);
            let loss = self.loss.forward(&log_probs, &batch.targets)?;
            let grad = self.loss.backward(&log_probs, &batch.targets)?;
            model.update(&grad)?;

            tracing::debug!(batch = idx, size = batch.len(), loss, "train batch");
            total += loss * batch.len() as f64;
            seen += batch.len();
        }
        if seen == 0 {
            return Err(TrainingError::Dataset("training split produced no batches".to_string()));
        }
        Ok(total / seen as f64)
    }

    /// Metrics for one split in stored order, with no parameter updates.
    pub fn evaluate_split<M, D>(&self, model: &M, data: &D, rng: &mut StdRng) -> TrainingResult<MetricsReport>
    where
        M: Model + ?Sized,
        D: DataSource + ?Sized,
    {
        let batches = data.batches(false, rng)?;

        if self.settings.aggregate_by_owner {
            let mut aggregator = OwnerAggregator::new(self.settings.owner_target_policy);
            for batch in &batches {
                let probs = softmax(&model.predict(&batch.inputs)?);
                let owners = batch
                    .owners
                    .iter()
                    .cloned()
                    .collect::<Option<Vec<String>>>()
                    .ok_or_else(|| TrainingError::Dataset("owner aggregation requires an owner on every sample".to_string()))?;
                aggregator.extend(&owners, &probs, &batch.targets)?;
            }
            if aggregator.is_empty() {
                return Err(TrainingError::Dataset("cannot evaluate an empty split".to_string()));
            }
            tracing::debug!(owners = aggregator.len(), "aggregated predictions by owner");
            let grouped = aggregator.finish();
            return evaluate(&grouped.probs, &grouped.targets);
        }

        let mut probs = Vec::with_capacity(batches.len());
        for batch in &batches {
            probs.push(softmax(&model.predict(&batch.inputs)?));
        }
        let probs = stack_rows(&probs)?;
        let targets = stack_rows(&batches.iter().map(|b| b.targets.clone()).collect::<Vec<_>>())?;
        evaluate(&probs, &targets)
    }
}

fn stack_rows(parts: &[Array2<f64>]) -> TrainingResult<Array2<f64>> {
    if parts.is_empty() {
        return Err(TrainingError::Dataset("cannot evaluate an empty split".to_string()));
    }
    let views: Vec<_> = parts.iter().map(Array2::view).collect();
    concatenate(Axis(0), &views).map_err(|e| TrainingError::Dataset(format!("cannot stack batches: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{InMemoryDataSource, Sample};
    use crate::loss::LossReduction;
    use crate::schedule::{PlateauConfig, PlateauScheduler};
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Emits logits whose softmax puts `exp(-kl)` on class 0, so a one-hot
    /// class-0 target yields a chosen `kl_mean` after each epoch.
    struct ScriptedModel {
        script: Vec<f64>,
        updates: usize,
        rates: Vec<f64>,
    }

    impl ScriptedModel {
        fn new(script: &[f64]) -> Self {
            Self { script: script.to_vec(), updates: 0, rates: vec![0.1, 0.1] }
        }

        fn logits(&self, rows: usize) -> Array2<f64> {
            let idx = self.updates.saturating_sub(1).min(self.script.len() - 1);
            let p0 = (-self.script[idx]).exp();
            let mut out = Array2::zeros((rows, 2));
            for mut row in out.axis_iter_mut(Axis(0)) {
                row[0] = p0.ln();
                row[1] = (1.0 - p0).ln();
            }
            out
        }
    }

    impl Model for ScriptedModel {
        fn id(&self) -> &'static str {
            "scripted"
        }

        fn forward(&mut self, inputs: &Array2<f64>) -> TrainingResult<Array2<f64>> {
            Ok(self.logits(inputs.nrows()))
        }

        fn predict(&self, inputs: &Array2<f64>) -> TrainingResult<Array2<f64>> {
            Ok(self.logits(inputs.nrows()))
        }

        fn update(&mut self, _grad_logits: &Array2<f64>) -> TrainingResult<()> {
            self.updates += 1;
            Ok(())
        }

        fn learning_rates(&self) -> Vec<f64> {
            self.rates.clone()
        }

        fn set_learning_rates(&mut self, rates: &[f64]) -> TrainingResult<()> {
            self.rates = rates.to_vec();
            Ok(())
        }

        fn save(&self, path: &Path) -> TrainingResult<()> {
            std::fs::write(path, self.updates.to_string())?;
            Ok(())
        }

        fn load(&mut self, path: &Path) -> TrainingResult<()> {
            self.updates = std::fs::read_to_string(path)?.trim().parse().map_err(anyhow::Error::from)?;
            Ok(())
        }
    }

    /// Records how many data rows the log holds each time an epoch completes.
    struct LogRowsSink {
        log_path: PathBuf,
        rows: Mutex<Vec<usize>>,
    }

    impl ProgressSink for LogRowsSink {
        fn on_event(&self, event: ProgressEvent) {
            if let ProgressEvent::EpochCompleted { .. } = event {
                let count = csv::Reader::from_path(&self.log_path).map(|mut r| r.records().count()).unwrap_or(0);
                self.rows.lock().unwrap().push(count);
            }
        }
    }

    fn one_hot_source(n: usize, owners: bool) -> InMemoryDataSource {
        let samples = (0..n)
            .map(|i| Sample {
                owner: owners.then(|| format!("owner-{}", i % 2)),
                features: vec![i as f64],
                target: vec![1.0, 0.0],
            })
            .collect();
        InMemoryDataSource::new(samples, 16).unwrap()
    }

    fn outputs(dir: &Path) -> LoopOutputs {
        LoopOutputs {
            run_id: RunId("test-run".to_string()),
            log_path: dir.join("training_log.csv"),
            checkpoint_path: dir.join("best_model.json"),
        }
    }

    fn settings(epochs: usize, patience: usize) -> LoopSettings {
        LoopSettings { epochs, patience, seed: 7, aggregate_by_owner: false, owner_target_policy: OwnerTargetPolicy::LastWins }
    }

    fn no_decay() -> PlateauScheduler {
        PlateauScheduler::new(PlateauConfig { patience: 100, ..PlateauConfig::default() })
    }

    #[test]
    fn test_stops_after_patience_non_improving_epochs() {
        let temp = TempDir::new().unwrap();
        let out = outputs(temp.path());
        let looper = TrainingLoop::new(settings(10, 3), WeightedKlLoss::new(LossReduction::BatchMean), out.clone()).unwrap();
        let mut model = ScriptedModel::new(&[0.9, 0.8, 0.85, 0.86, 0.87, 0.1, 0.1]);
        let data = one_hot_source(4, false);
        let sink = LogRowsSink { log_path: out.log_path.clone(), rows: Mutex::new(Vec::new()) };

        let outcome = looper.run(&mut model, &data, &data, &mut no_decay(), &sink).unwrap();

        assert_eq!(outcome.stop_reason, StopReason::EarlyStopped);
        assert_eq!(outcome.state.records.len(), 5);
        assert_eq!(outcome.best_epoch, Some(2));
        assert!((outcome.best_val_loss - 0.8).abs() < 1e-6);
        assert_eq!(outcome.state.epochs_without_improvement, 3);
        assert!((outcome.best_record().unwrap().val_loss - 0.8).abs() < 1e-6);

        // The log is rewritten after every epoch, one row per epoch so far.
        assert_eq!(*sink.rows.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_best_checkpoint_matches_minimum_val_loss_epoch() {
        let temp = TempDir::new().unwrap();
        let out = outputs(temp.path());
        let looper = TrainingLoop::new(settings(4, 10), WeightedKlLoss::default(), out.clone()).unwrap();
        let mut model = ScriptedModel::new(&[0.7, 0.4, 0.3, 0.5]);
        let data = one_hot_source(3, false);

        let outcome = looper.run(&mut model, &data, &data, &mut no_decay(), &crate::progress::CollectingProgressSink::default()).unwrap();
        assert_eq!(outcome.stop_reason, StopReason::MaxEpochs);
        assert_eq!(outcome.best_epoch, Some(3));

        // One update per epoch, so the checkpoint stores the epoch it was taken at.
        let mut restored = ScriptedModel::new(&[0.0]);
        restored.load(&out.checkpoint_path).unwrap();
        assert_eq!(restored.updates, 3);
    }

    #[test]
    fn test_plateau_decay_reaches_model() {
        let temp = TempDir::new().unwrap();
        let looper = TrainingLoop::new(settings(4, 10), WeightedKlLoss::default(), outputs(temp.path())).unwrap();
        let mut model = ScriptedModel::new(&[0.5, 0.5, 0.5, 0.5]);
        let data = one_hot_source(2, false);
        let mut scheduler =
            PlateauScheduler::new(PlateauConfig { factor: 0.5, patience: 1, min_lr: 1e-6, threshold: 0.0 });
        let sink = crate::progress::CollectingProgressSink::default();

        looper.run(&mut model, &data, &data, &mut scheduler, &sink).unwrap();

        assert_eq!(model.rates, vec![0.05, 0.05]);
        let reduced = sink.events().iter().filter(|e| matches!(e, ProgressEvent::LearningRateReduced { .. })).count();
        assert_eq!(reduced, 1);
    }

    #[test]
    fn test_owner_aggregation_requires_owners() {
        let temp = TempDir::new().unwrap();
        let mut cfg = settings(1, 1);
        cfg.aggregate_by_owner = true;
        let looper = TrainingLoop::new(cfg, WeightedKlLoss::default(), outputs(temp.path())).unwrap();
        let mut model = ScriptedModel::new(&[0.5]);
        let sink = crate::progress::CollectingProgressSink::default();

        let unowned = one_hot_source(4, false);
        assert!(looper.run(&mut model, &unowned, &unowned, &mut no_decay(), &sink).is_err());

        let owned = one_hot_source(4, true);
        let outcome = looper.run(&mut model, &owned, &owned, &mut no_decay(), &sink).unwrap();
        assert_eq!(outcome.state.records.len(), 1);
    }

    /// Predicts `[0.9, 0.1]` for feature 0 and `[0.1, 0.9]` for feature 1.
    struct ComplementaryModel;

    impl Model for ComplementaryModel {
        fn id(&self) -> &'static str {
            "complementary"
        }

        fn forward(&mut self, inputs: &Array2<f64>) -> TrainingResult<Array2<f64>> {
            self.predict(inputs)
        }

        fn predict(&self, inputs: &Array2<f64>) -> TrainingResult<Array2<f64>> {
            let mut out = Array2::zeros((inputs.nrows(), 2));
            for (mut row, x) in out.axis_iter_mut(Axis(0)).zip(inputs.column(0)) {
                let p0 = if *x == 0.0 { 0.9f64 } else { 0.1 };
                row[0] = p0.ln();
                row[1] = (1.0 - p0).ln();
            }
            Ok(out)
        }

        fn update(&mut self, _grad_logits: &Array2<f64>) -> TrainingResult<()> {
            Ok(())
        }

        fn learning_rates(&self) -> Vec<f64> {
            vec![0.1]
        }

        fn set_learning_rates(&mut self, _rates: &[f64]) -> TrainingResult<()> {
            Ok(())
        }

        fn save(&self, path: &Path) -> TrainingResult<()> {
            std::fs::write(path, "complementary")?;
            Ok(())
        }

        fn load(&mut self, _path: &Path) -> TrainingResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_owner_aggregation_scores_the_averaged_prediction() {
        // Each owner has one image per feature value and a uniform target.
        let samples = (0..4)
            .map(|i| Sample {
                owner: Some(format!("owner-{}", i / 2)),
                features: vec![(i % 2) as f64],
                target: vec![0.5, 0.5],
            })
            .collect();
        let data = InMemoryDataSource::new(samples, 16).unwrap();
        let run = |aggregate_by_owner: bool| {
            let temp = TempDir::new().unwrap();
            let cfg = LoopSettings {
                aggregate_by_owner,
                owner_target_policy: OwnerTargetPolicy::Validate,
                ..settings(1, 1)
            };
            let looper = TrainingLoop::new(cfg, WeightedKlLoss::default(), outputs(temp.path())).unwrap();
            let sink = crate::progress::CollectingProgressSink::default();
            let outcome = looper.run(&mut ComplementaryModel, &data, &data, &mut no_decay(), &sink).unwrap();
            outcome.state.records[0].val.kl_mean
        };

        let per_owner = run(true);
        let per_image = run(false);

        // The two images of an owner average to [0.5, 0.5], the target itself.
        assert!(per_owner.abs() < 1e-9, "owner-level kl {per_owner}");
        let expected_per_image = 0.5 * (0.5f64 / 0.9).ln() + 0.5 * (0.5f64 / 0.1).ln();
        assert!((per_image - expected_per_image).abs() < 1e-9);
        assert!(per_image > per_owner + 0.1);
    }

    #[test]
    fn test_zero_patience_is_rejected() {
        let temp = TempDir::new().unwrap();
        assert!(TrainingLoop::new(settings(3, 0), WeightedKlLoss::default(), outputs(temp.path())).is_err());
    }
}
