//! Softlabel Training
//!
//! Training primitives for models that predict soft label distributions:
//! - Distribution metrics over predicted and target probability vectors
//! - Frequency-based class weighting and a class-weighted KL loss
//! - Per-owner aggregation of predictions before evaluation
//! - The epoch loop with checkpoint selection, early stopping and LR decay
//! - Run configuration, layout, CSV logs and manifests
//! - Training backends (`Trainer`) and the model / data collaborators they drive

pub mod activation;
pub mod aggregate;
pub mod artifacts;
pub mod backend;
pub mod config;
pub mod dataset;
pub mod error;
pub mod head;
pub mod history;
pub mod layout;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod progress;
pub mod schedule;
pub mod trainer;
pub mod training_loop;
pub mod weighting;

pub use activation::{log_softmax, softmax};
pub use aggregate::{AggregatedPredictions, OwnerAggregator, OwnerTargetPolicy};
pub use artifacts::{ArtifactKind, RunArtifact, RunManifest, RunMetrics};
pub use backend::FeatureHeadTrainer;
pub use config::{DataConfig, TrainingConfig, TrainingDevice};
pub use dataset::{read_jsonl_samples, write_jsonl_samples, Batch, DataSource, DatasetId, InMemoryDataSource, Sample};
pub use error::{MetricError, TrainingError, TrainingResult};
pub use head::FeedForwardHead;
pub use history::{EpochRecord, TrainingState};
pub use layout::{RunId, RunLayout};
pub use loss::{LossReduction, WeightedKlLoss};
pub use metrics::{evaluate, MetricsReport, EPSILON};
pub use model::Model;
pub use progress::{CollectingProgressSink, ProgressEvent, ProgressSink, TracingProgressSink};
pub use schedule::{LrScheduler, PlateauConfig, PlateauScheduler};
pub use trainer::{RunSpec, Trainer, TrainerStatus};
pub use training_loop::{LoopOutputs, LoopSettings, StopReason, TrainingLoop, TrainingOutcome};
pub use weighting::{class_weights, label_frequencies};
