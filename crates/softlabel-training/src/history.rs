//! Per-epoch run state and its CSV log.

use crate::error::TrainingResult;
use crate::metrics::MetricsReport;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One row of the run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// 1-based epoch index.
    pub epoch: usize,
    pub train_loss: f64,
    /// Validation `kl_mean`; the value used for model selection.
    pub val_loss: f64,
    pub epoch_time_s: f64,
    pub train: MetricsReport,
    pub val: MetricsReport,
}

impl EpochRecord {
    /// Column names in log order.
    #[must_use]
    pub fn header() -> Vec<String> {
        let mut cols: Vec<String> =
            ["epoch", "train_loss", "val_loss", "epoch_time_s"].iter().map(ToString::to_string).collect();
        for prefix in ["train", "val"] {
            cols.extend(MetricsReport::KEYS.iter().map(|k| format!("{prefix}_{k}")));
        }
        cols
    }

    #[must_use]
    pub fn values(&self) -> Vec<String> {
        let mut row = vec![
            self.epoch.to_string(),
            self.train_loss.to_string(),
            self.val_loss.to_string(),
            self.epoch_time_s.to_string(),
        ];
        for report in [&self.train, &self.val] {
            row.extend(report.entries().into_iter().map(|(_, v)| v.to_string()));
        }
        row
    }
}

/// Mutable state of one training run, threaded through the epoch loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingState {
    pub best_val_loss: f64,
    pub epochs_without_improvement: usize,
    /// Epoch that produced the saved best checkpoint, if any.
    pub best_epoch: Option<usize>,
    pub records: Vec<EpochRecord>,
}

impl Default for TrainingState {
    fn default() -> Self {
        Self { best_val_loss: f64::INFINITY, epochs_without_improvement: 0, best_epoch: None, records: Vec::new() }
    }
}

impl TrainingState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `val_loss` for `epoch`. Returns `true` on strict improvement.
    pub fn observe(&mut self, epoch: usize, val_loss: f64) -> bool {
        if val_loss < self.best_val_loss {
            self.best_val_loss = val_loss;
            self.best_epoch = Some(epoch);
            self.epochs_without_improvement = 0;
            true
        } else {
            self.epochs_without_improvement += 1;
            false
        }
    }
}

/// Rewrite the whole log at `path`.
///
/// Rows go to a temporary file in the same directory which then replaces
/// `path`, so readers never observe a half-written log.
pub fn write_run_log(path: &Path, records: &[EpochRecord]) -> TrainingResult<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(&mut tmp);
        writer.write_record(EpochRecord::header())?;
        for record in records {
            writer.write_record(record.values())?;
        }
        writer.flush()?;
    }
    tmp.as_file_mut().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
