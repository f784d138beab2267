use serde::{Deserialize, Serialize};

use crate::runtime::math::{mean, population_std};

/// Default |z| above which a value is flagged.
pub const DEFAULT_THRESHOLD: f64 = 2.5;

/// Minimum batch size for [`detect_outliers`].
pub const MIN_BATCH: usize = 5;

/// Baseline standard deviations at or below this are treated as zero.
const STD_EPSILON: f64 = 1e-9;

/// A flagged point of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outlier {
    pub index: usize,
    pub value: f64,
    pub z_score: f64,
}

/// Stateless z-score outlier checks.
///
/// Model:
/// - Batch mode: mean and population std over the whole batch, flag `|z| > threshold`.
/// - Baseline mode: score one new value against a reference population.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct AnomalyDetector {
    threshold: f64,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl AnomalyDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn detect_outliers(&self, data: &[f64]) -> Vec<usize> {
        detect_outliers(data, self.threshold)
    }

    pub fn find_outliers(&self, data: &[f64]) -> Vec<Outlier> {
        find_outliers(data, self.threshold)
    }

    pub fn is_anomaly(&self, new_value: f64, baseline: &[f64]) -> bool {
        is_anomaly(new_value, baseline, self.threshold)
    }
}

/// Indices of batch points whose |z| exceeds `threshold`.
///
/// Fewer than [`MIN_BATCH`] points, or a batch without variance, yields nothing.
pub fn detect_outliers(data: &[f64], threshold: f64) -> Vec<usize> {
    find_outliers(data, threshold)
        .into_iter()
        .map(|o| o.index)
        .collect()
}

/// [`detect_outliers`] with the value and z-score of each flagged point.
pub fn find_outliers(data: &[f64], threshold: f64) -> Vec<Outlier> {
    if data.len() < MIN_BATCH {
        return Vec::new();
    }

    let mean = mean(data);
    let std = population_std(data, mean);
    if std <= STD_EPSILON {
        return Vec::new();
    }

    data.iter()
        .enumerate()
        .filter_map(|(index, &value)| {
            let z_score = (value - mean) / std;
            (z_score.abs() > threshold).then_some(Outlier {
                index,
                value,
                z_score,
            })
        })
        .collect()
}

/// Whether `new_value` is anomalous relative to `baseline`.
///
/// Uses the baseline's population std. With (near) zero baseline variance, any
/// deviation from the baseline mean counts as anomalous. An empty baseline
/// never flags.
pub fn is_anomaly(new_value: f64, baseline: &[f64], threshold: f64) -> bool {
    if baseline.is_empty() {
        return false;
    }

    let mean = mean(baseline);
    let std = population_std(baseline, mean);
    if std <= STD_EPSILON {
        return (new_value - mean).abs() > STD_EPSILON;
    }

    ((new_value - mean) / std).abs() > threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fewer_than_five_points_flags_nothing() {
        assert!(detect_outliers(&[1.0, 1.0, 1.0, 500.0], 0.5).is_empty());
    }

    #[test]
    fn five_point_batch_z_score_is_bounded() {
        // With full-batch statistics no point of 5 can exceed |z| = sqrt(4) = 2.
        let data = [10.0, 11.0, 9.0, 10.0, 100.0];
        let found = find_outliers(&data, 1.9);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].index, 4);
        assert!(found[0].z_score > 1.99 && found[0].z_score <= 2.0);

        assert!(detect_outliers(&data, DEFAULT_THRESHOLD).is_empty());
    }

    #[test]
    fn flags_spike_in_longer_batch() {
        let mut data = vec![10.0, 11.0, 9.0, 10.0, 12.0, 10.0, 9.0, 11.0, 10.0, 10.0];
        data.push(100.0);
        assert_eq!(detect_outliers(&data, DEFAULT_THRESHOLD), vec![10]);
        assert_eq!(AnomalyDetector::new().detect_outliers(&data), vec![10]);
    }

    #[test]
    fn flat_batch_has_no_outliers() {
        assert!(detect_outliers(&[3.0; 8], 2.5).is_empty());
    }

    #[test]
    fn is_anomaly_against_baseline() {
        let baseline = [10.0, 11.0, 9.0, 10.0, 12.0];
        assert!(is_anomaly(100.0, &baseline, 2.5));
        assert!(!is_anomaly(11.0, &baseline, 2.5));
    }

    #[test]
    fn is_anomaly_zero_variance_baseline() {
        let baseline = [5.0, 5.0, 5.0];
        assert!(!is_anomaly(5.0, &baseline, 2.5));
        assert!(is_anomaly(5.5, &baseline, 2.5));
        assert!(!is_anomaly(5.5, &[], 2.5));
    }

    #[test]
    fn detector_threshold_is_configurable() {
        let detector = AnomalyDetector::new().with_threshold(1.0);
        assert_eq!(detector.threshold(), 1.0);
        assert!(detector.is_anomaly(13.0, &[10.0, 11.0, 9.0, 10.0, 12.0]));
    }
}
