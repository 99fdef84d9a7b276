use crate::layout::RunId;
use crate::training_loop::StopReason;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { run_id: RunId, epochs: usize },
    Message { run_id: RunId, message: String },
    EpochCompleted { run_id: RunId, epoch: usize, train_loss: f64, val_loss: f64 },
    NewBest { run_id: RunId, epoch: usize, val_loss: f64 },
    LearningRateReduced { run_id: RunId, epoch: usize, rates: Vec<f64> },
    Finished { run_id: RunId, stop_reason: StopReason },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Forwards every event to `tracing`.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { run_id, epochs } => tracing::info!(%run_id, epochs, "run started"),
            ProgressEvent::Message { run_id, message } => tracing::info!(%run_id, "{message}"),
            ProgressEvent::EpochCompleted { run_id, epoch, train_loss, val_loss } => {
                tracing::info!(%run_id, epoch, train_loss, val_loss, "epoch completed");
            }
            ProgressEvent::NewBest { run_id, epoch, val_loss } => {
                tracing::info!(%run_id, epoch, val_loss, "new best checkpoint");
            }
            ProgressEvent::LearningRateReduced { run_id, epoch, rates } => {
                tracing::info!(%run_id, epoch, ?rates, "learning rate reduced");
            }
            ProgressEvent::Finished { run_id, stop_reason } => {
                tracing::info!(%run_id, ?stop_reason, "run finished");
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingProgressSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingProgressSink {
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProgressSink for CollectingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
