//! Run configuration.
//!
//! A run is described by one TOML (or JSON) file. Every field has a default,
//! so a minimal file only names the data splits:
//!
//! ```toml
//! [data]
//! train = "data/train.jsonl"
//! val = "data/val.jsonl"
//! ```

use crate::aggregate::OwnerTargetPolicy;
use crate::error::{TrainingError, TrainingResult};
use crate::loss::LossReduction;
use crate::schedule::PlateauConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Number of label classes in the soft-label targets.
pub const DEFAULT_NUM_CLASSES: usize = 21;

/// Overrides the configured output directory.
pub const OUTPUT_DIR_ENV: &str = "SOFTLABEL_OUTPUT_DIR";
/// Overrides the configured device.
pub const DEVICE_ENV: &str = "SOFTLABEL_DEVICE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingDevice {
    #[default]
    Auto,
    Cpu,
    Cuda,
    Metal,
}

impl std::str::FromStr for TrainingDevice {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "metal" => Ok(Self::Metal),
            other => Err(TrainingError::InvalidConfig(format!("unknown device: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataConfig {
    pub train: PathBuf,
    pub val: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub data: DataConfig,
    /// Root under which each run gets its own directory.
    pub output_dir: PathBuf,
    pub num_classes: usize,
    pub batch_size: usize,
    /// Maximum number of epochs.
    pub epochs: usize,
    /// Consecutive non-improving epochs before stopping early.
    pub patience: usize,
    /// One learning rate per parameter group, in the model's group order.
    pub learning_rates: Vec<f64>,
    pub hidden_dim: usize,
    /// Weight the loss by inverse log label frequency of the train split.
    pub use_class_weights: bool,
    /// Exponent for rare-class emphasis, in (0, 1].
    pub class_weight_gamma: f64,
    pub reduction: LossReduction,
    pub lr_decay: PlateauConfig,
    /// Average per-sample predictions by owner before computing metrics.
    pub aggregate_by_owner: bool,
    pub owner_target_policy: OwnerTargetPolicy,
    /// Recorded in the manifest; computation always runs on the CPU.
    pub device: TrainingDevice,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            output_dir: PathBuf::from("runs"),
            num_classes: DEFAULT_NUM_CLASSES,
            batch_size: 64,
            epochs: 50,
            patience: 7,
            learning_rates: vec![0.05, 0.05],
            hidden_dim: 128,
            use_class_weights: true,
            class_weight_gamma: 0.5,
            reduction: LossReduction::BatchMean,
            lr_decay: PlateauConfig::default(),
            aggregate_by_owner: false,
            owner_target_policy: OwnerTargetPolicy::LastWins,
            device: TrainingDevice::Auto,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    /// Load a config file; `.json` files are read as JSON, anything else as TOML.
    pub fn load_from_file(path: &Path) -> TrainingResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TrainingError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;

        let config: Self = if path.extension().and_then(|e| e.to_str()) == Some("json") {
            serde_json::from_str(&content)?
        } else {
            toml::from_str(&content)?
        };

        // Relative data paths are resolved against the config file.
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(config.resolve_paths(base))
    }

    fn resolve_paths(mut self, base: &Path) -> Self {
        for p in [&mut self.data.train, &mut self.data.val, &mut self.output_dir] {
            if p.is_relative() && !p.as_os_str().is_empty() {
                *p = base.join(&*p);
            }
        }
        self
    }

    /// Apply `SOFTLABEL_*` environment overrides.
    pub fn apply_env_overrides(&mut self) -> TrainingResult<()> {
        if let Ok(dir) = std::env::var(OUTPUT_DIR_ENV) {
            self.output_dir = PathBuf::from(dir);
        }
        if let Ok(device) = std::env::var(DEVICE_ENV) {
            self.device = device.parse()?;
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> TrainingResult<String> {
        toml::to_string_pretty(self).map_err(|e| TrainingError::InvalidConfig(format!("cannot serialize config: {e}")))
    }

    pub fn validate(&self) -> TrainingResult<()> {
        if self.num_classes == 0 {
            return Err(TrainingError::InvalidConfig("num_classes must be >= 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(TrainingError::InvalidConfig("batch_size must be >= 1".to_string()));
        }
        if self.epochs == 0 {
            return Err(TrainingError::InvalidConfig("epochs must be >= 1".to_string()));
        }
        if self.patience == 0 {
            return Err(TrainingError::InvalidConfig("patience must be >= 1".to_string()));
        }
        if self.hidden_dim == 0 {
            return Err(TrainingError::InvalidConfig("hidden_dim must be >= 1".to_string()));
        }
        if self.learning_rates.is_empty() {
            return Err(TrainingError::InvalidConfig("learning_rates must not be empty".to_string()));
        }
        if self.learning_rates.iter().any(|lr| !lr.is_finite() || *lr <= 0.0) {
            return Err(TrainingError::InvalidConfig("learning_rates must be > 0".to_string()));
        }
        if !(self.class_weight_gamma > 0.0 && self.class_weight_gamma <= 1.0) {
            return Err(TrainingError::InvalidConfig("class_weight_gamma must be in (0, 1]".to_string()));
        }
        let decay = &self.lr_decay;
        if !(decay.factor > 0.0 && decay.factor < 1.0) {
            return Err(TrainingError::InvalidConfig("lr_decay.factor must be in (0, 1)".to_string()));
        }
        if decay.min_lr < 0.0 {
            return Err(TrainingError::InvalidConfig("lr_decay.min_lr must be >= 0".to_string()));
        }
        if decay.threshold < 0.0 {
            return Err(TrainingError::InvalidConfig("lr_decay.threshold must be >= 0".to_string()));
        }
        if self.data.train.as_os_str().is_empty() || self.data.val.as_os_str().is_empty() {
            return Err(TrainingError::InvalidConfig("data.train and data.val are required".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn with_data() -> TrainingConfig {
        TrainingConfig {
            data: DataConfig { train: "train.jsonl".into(), val: "val.jsonl".into() },
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config_needs_data_paths() {
        assert!(TrainingConfig::default().validate().is_err());
        assert!(with_data().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_gamma() {
        let mut cfg = with_data();
        cfg.class_weight_gamma = 1.5;
        assert!(cfg.validate().is_err());
        cfg.class_weight_gamma = 0.0;
        assert!(cfg.validate().is_err());
        cfg.class_weight_gamma = 1.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_non_positive_learning_rate() {
        let mut cfg = with_data();
        cfg.learning_rates = vec![0.1, 0.0];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_minimal_toml_resolves_relative_paths() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.toml");
        std::fs::write(
            &path,
            r#"
epochs = 3
reduction = "mean"
use_class_weights = false

[data]
train = "data/train.jsonl"
val = "data/val.jsonl"

[lr_decay]
factor = 0.5
patience = 1
min_lr = 0.0001
threshold = 0.0
"#,
        )
        .unwrap();

        let cfg = TrainingConfig::load_from_file(&path).unwrap();
        assert_eq!(cfg.epochs, 3);
        assert_eq!(cfg.reduction, LossReduction::Mean);
        assert_eq!(cfg.num_classes, DEFAULT_NUM_CLASSES);
        assert_eq!(cfg.data.train, temp.path().join("data/train.jsonl"));
        assert_eq!(cfg.lr_decay.patience, 1);
        assert!(!cfg.use_class_weights);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_toml_round_trip() {
        let cfg = with_data();
        let text = cfg.to_toml_string().unwrap();
        let back: TrainingConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.learning_rates, cfg.learning_rates);
        assert_eq!(back.class_weight_gamma, cfg.class_weight_gamma);
    }

    #[test]
    fn test_device_parse() {
        assert_eq!("CPU".parse::<TrainingDevice>().unwrap(), TrainingDevice::Cpu);
        assert!("tpu".parse::<TrainingDevice>().is_err());
    }
}
