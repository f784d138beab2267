//! Lifecycle tuning knobs.

use chrono::Duration;

use crate::anomaly::DEFAULT_THRESHOLD;
use crate::data::DEFAULT_LOOKBACK_DAYS;
use crate::forecast::DEFAULT_WINDOW_SIZE;

/// Configuration of a [`crate::lifecycle::ModelLifecycle`].
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleConfig {
    /// A model older than this is stale.
    pub update_interval: Duration,
    /// History window for training reads.
    pub lookback_days: u32,
    /// Window of the forecast model.
    pub forecast_window: usize,
    /// Window of the transaction autoencoder.
    pub anomaly_window: usize,
    /// Upper bound on training epochs; training has no timeout.
    pub max_epochs: usize,
    pub batch_size: usize,
    /// Minimum training rows for the per-record models.
    pub min_samples: usize,
    /// Number of customer segments.
    pub segments: usize,
    /// z-score threshold used by reconstruction-error checks.
    pub anomaly_threshold: f64,
    /// `[low, high)` bounds of the confidence heuristic.
    pub confidence_range: (f64, f64),
    /// Base seed for weight initialisation.
    pub seed: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::hours(24),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            forecast_window: DEFAULT_WINDOW_SIZE,
            anomaly_window: 5,
            max_epochs: 200,
            batch_size: 32,
            min_samples: 10,
            segments: 4,
            anomaly_threshold: DEFAULT_THRESHOLD,
            confidence_range: (0.5, 0.95),
            seed: 42,
        }
    }
}

impl LifecycleConfig {
    pub fn with_update_interval(mut self, update_interval: Duration) -> Self {
        self.update_interval = update_interval;
        self
    }

    pub fn with_max_epochs(mut self, max_epochs: usize) -> Self {
        self.max_epochs = max_epochs;
        self
    }

    pub fn with_lookback_days(mut self, lookback_days: u32) -> Self {
        self.lookback_days = lookback_days;
        self
    }

    /// Epoch budget for a recipe, capped by `max_epochs`.
    pub fn epochs(&self, requested: usize) -> usize {
        requested.min(self.max_epochs).max(1)
    }

    /// Map a performance score in \[0, 1\] into the confidence range.
    ///
    /// The result always lies in `[low, high)`.
    pub fn confidence(&self, performance: f64) -> f64 {
        let (low, high) = self.confidence_range;
        let p = if performance.is_finite() {
            performance.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let c = low + (high - low) * p;
        if c >= high {
            // Largest representable value below `high`.
            f64::from_bits(high.to_bits() - 1).max(low)
        } else {
            c
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_stays_in_half_open_range() {
        let cfg = LifecycleConfig::default();
        let (low, high) = cfg.confidence_range;
        for p in [-1.0, 0.0, 0.3, 0.99, 1.0, 7.0, f64::NAN] {
            let c = cfg.confidence(p);
            assert!(c >= low && c < high, "performance {p} -> {c}");
        }
        assert_eq!(cfg.confidence(0.0), low);
    }

    #[test]
    fn epochs_are_capped() {
        let cfg = LifecycleConfig::default().with_max_epochs(50);
        assert_eq!(cfg.epochs(500), 50);
        assert_eq!(cfg.epochs(20), 20);
        assert_eq!(cfg.epochs(0), 1);
    }
}
