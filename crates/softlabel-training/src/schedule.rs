use serde::{Deserialize, Serialize};

/// Learning-rate policy driven by the monitored validation loss.
pub trait LrScheduler {
    /// Observe one epoch's monitored value and adjust `rates` in place.
    /// Returns `true` when any rate changed.
    fn step(&mut self, metric: f64, rates: &mut [f64]) -> bool;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateauConfig {
    /// Multiplier applied on a plateau.
    pub factor: f64,
    /// Non-improving epochs tolerated before decaying.
    pub patience: usize,
    /// Floor for every group's rate.
    pub min_lr: f64,
    /// Relative improvement needed to count as better.
    pub threshold: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self { factor: 0.5, patience: 2, min_lr: 1e-6, threshold: 1e-4 }
    }
}

/// Decays every rate by `factor` once the monitored loss has failed to
/// improve for more than `patience` consecutive epochs.
///
/// Its bad-epoch counter is separate from the early-stopping counter in the
/// training loop; the two can disagree.
#[derive(Debug, Clone)]
pub struct PlateauScheduler {
    config: PlateauConfig,
    best: f64,
    bad_epochs: usize,
}

impl PlateauScheduler {
    #[must_use]
    pub fn new(config: PlateauConfig) -> Self {
        Self { config, best: f64::INFINITY, bad_epochs: 0 }
    }

    #[must_use]
    pub fn bad_epochs(&self) -> usize {
        self.bad_epochs
    }

    fn improves(&self, metric: f64) -> bool {
        metric < self.best * (1.0 - self.config.threshold)
    }
}

impl LrScheduler for PlateauScheduler {
    fn step(&mut self, metric: f64, rates: &mut [f64]) -> bool {
        if self.improves(metric) {
            self.best = metric;
            self.bad_epochs = 0;
            return false;
        }

        self.bad_epochs += 1;
        if self.bad_epochs <= self.config.patience {
            return false;
        }

        self.bad_epochs = 0;
        let mut changed = false;
        for rate in rates.iter_mut() {
            let decayed = (*rate * self.config.factor).max(self.config.min_lr);
            if *rate - decayed > f64::EPSILON {
                tracing::info!(from = *rate, to = decayed, "reducing learning rate");
                *rate = decayed;
                changed = true;
            }
        }
        changed
    }
}
