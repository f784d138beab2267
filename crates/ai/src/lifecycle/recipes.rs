//! Per-model-type training recipes.
//!
//! A recipe names the records it needs and turns them into a dataset, a network
//! spec and the input and target scaling the served model expects. Building is pure so each
//! recipe can be checked without a backend.

use std::collections::BTreeMap;

use crate::backend::{Activation, Loss, NetworkSpec};
use crate::config::LifecycleConfig;
use crate::data::{BusinessRecord, EntityType, aggregate_daily, features};
use crate::model::{ModelType, ScalingParams, TrainingDataset};
use crate::result::EngineError;
use crate::runtime::math::{normalize_min_max, prepare_time_series, standardize};

/// Row cap for the transaction history read.
pub const TRANSACTION_FETCH_LIMIT: usize = 5000;

/// Everything a training run needs besides the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedTraining {
    pub dataset: TrainingDataset,
    pub spec: NetworkSpec,
    /// Scaling of the feature rows the network was fitted on.
    pub input_scaling: ScalingParams,
    /// Scaling of the fitted targets.
    pub output_scaling: ScalingParams,
    pub epochs: usize,
}

pub trait TrainingRecipe: Send + Sync {
    fn model_type(&self) -> ModelType;

    /// Record kind read for this model.
    fn entity(&self) -> EntityType;

    fn fetch_limit(&self) -> Option<usize> {
        None
    }

    fn build(
        &self,
        records: &[BusinessRecord],
        config: &LifecycleConfig,
    ) -> Result<PreparedTraining, EngineError>;
}

pub fn recipe_for(model_type: ModelType) -> Box<dyn TrainingRecipe> {
    match model_type {
        ModelType::Forecast => Box::new(ForecastRecipe),
        ModelType::Anomaly => Box::new(AnomalyRecipe),
        ModelType::Risk => Box::new(RiskRecipe),
        ModelType::Price => Box::new(PriceRecipe),
        ModelType::Segmentation => Box::new(SegmentationRecipe),
    }
}

/// Daily sales sums, standardised and windowed into a next-day regressor.
pub struct ForecastRecipe;

impl TrainingRecipe for ForecastRecipe {
    fn model_type(&self) -> ModelType {
        ModelType::Forecast
    }

    fn entity(&self) -> EntityType {
        EntityType::Sales
    }

    fn build(
        &self,
        records: &[BusinessRecord],
        config: &LifecycleConfig,
    ) -> Result<PreparedTraining, EngineError> {
        let window = config.forecast_window;
        if window == 0 {
            return Err(EngineError::InvalidInput(
                "forecast window must be positive".to_string(),
            ));
        }

        let series = aggregate_daily(records);
        if series.len() < window + 1 {
            return Err(EngineError::insufficient(
                ModelType::Forecast,
                window + 1,
                series.len(),
            ));
        }

        let scaled = standardize(&series);
        let (x, y) = prepare_time_series(&scaled.values, window);

        Ok(PreparedTraining {
            dataset: TrainingDataset::new(x, y.into_iter().map(|v| vec![v]).collect()),
            spec: NetworkSpec::new(window)
                .layer(16, Activation::Relu)
                .layer(8, Activation::Relu)
                .layer(1, Activation::Linear),
            input_scaling: ScalingParams::Standard {
                mean: scaled.mean,
                std: scaled.std,
            },
            output_scaling: ScalingParams::Standard {
                mean: scaled.mean,
                std: scaled.std,
            },
            epochs: config.epochs(150),
        })
    }
}

/// Bottleneck autoencoder over windows of standardised transaction amounts.
pub struct AnomalyRecipe;

impl AnomalyRecipe {
    /// Hidden and bottleneck widths for a window.
    pub fn widths(window: usize) -> (usize, usize) {
        let hidden = window.div_ceil(2).max(2);
        (hidden, (hidden - 1).max(1))
    }
}

impl TrainingRecipe for AnomalyRecipe {
    fn model_type(&self) -> ModelType {
        ModelType::Anomaly
    }

    fn entity(&self) -> EntityType {
        EntityType::Transactions
    }

    fn fetch_limit(&self) -> Option<usize> {
        Some(TRANSACTION_FETCH_LIMIT)
    }

    fn build(
        &self,
        records: &[BusinessRecord],
        config: &LifecycleConfig,
    ) -> Result<PreparedTraining, EngineError> {
        let window = config.anomaly_window;
        if window < 2 {
            return Err(EngineError::InvalidInput(
                "anomaly window must be at least 2".to_string(),
            ));
        }

        let amounts: Vec<f64> = records
            .iter()
            .filter_map(|r| r.amount)
            .filter(|a| a.is_finite())
            .collect();
        let required = config.min_samples.max(window);
        if amounts.len() < required {
            return Err(EngineError::insufficient(
                ModelType::Anomaly,
                required,
                amounts.len(),
            ));
        }

        let scaled = standardize(&amounts);
        let x: Vec<Vec<f64>> = scaled.values.windows(window).map(<[f64]>::to_vec).collect();
        let (hidden, bottleneck) = Self::widths(window);

        Ok(PreparedTraining {
            dataset: TrainingDataset::new(x.clone(), x),
            spec: NetworkSpec::new(window)
                .layer(hidden, Activation::Relu)
                .layer(bottleneck, Activation::Linear)
                .layer(hidden, Activation::Relu)
                .layer(window, Activation::Linear),
            input_scaling: ScalingParams::Standard {
                mean: scaled.mean,
                std: scaled.std,
            },
            output_scaling: ScalingParams::Standard {
                mean: scaled.mean,
                std: scaled.std,
            },
            epochs: config.epochs(200),
        })
    }
}

/// Risk bands, most to least trusted.
pub const RISK_CLASSES: usize = 3;

/// Bounded risk features of a trust-metric record:
/// `[payment delay / 90, dispute ratio, log order count, on-time rate]`.
pub fn risk_features(record: &BusinessRecord) -> Vec<f64> {
    let orders = record.feature(features::ORDER_COUNT).unwrap_or(0.0).max(0.0);
    let disputes = record.feature(features::DISPUTE_COUNT).unwrap_or(0.0).max(0.0);
    let delay = record.feature(features::PAYMENT_DELAY_DAYS).unwrap_or(0.0);
    let on_time = record.feature(features::ON_TIME_RATE).unwrap_or(0.5);

    vec![
        (delay / 90.0).clamp(0.0, 1.0),
        (disputes / orders.max(1.0)).clamp(0.0, 1.0),
        ((1.0 + orders).ln() / 1001f64.ln()).clamp(0.0, 1.0),
        on_time.clamp(0.0, 1.0),
    ]
}

/// Class of a 0–100 trust score: 0 low risk, 1 medium, 2 high.
pub fn risk_band(trust_score: f64) -> usize {
    if trust_score >= 70.0 {
        0
    } else if trust_score >= 40.0 {
        1
    } else {
        2
    }
}

/// Three-class softmax classifier over trust-score bands.
pub struct RiskRecipe;

impl TrainingRecipe for RiskRecipe {
    fn model_type(&self) -> ModelType {
        ModelType::Risk
    }

    fn entity(&self) -> EntityType {
        EntityType::TrustMetrics
    }

    fn build(
        &self,
        records: &[BusinessRecord],
        config: &LifecycleConfig,
    ) -> Result<PreparedTraining, EngineError> {
        let (x, y): (Vec<_>, Vec<_>) = records
            .iter()
            .filter_map(|r| {
                let score = r.feature(features::TRUST_SCORE)?;
                score
                    .is_finite()
                    .then(|| (risk_features(r), one_hot(risk_band(score), RISK_CLASSES)))
            })
            .unzip();

        if x.len() < config.min_samples {
            return Err(EngineError::insufficient(
                ModelType::Risk,
                config.min_samples,
                x.len(),
            ));
        }

        Ok(PreparedTraining {
            dataset: TrainingDataset::new(x, y),
            spec: NetworkSpec::new(4)
                .layer(8, Activation::Relu)
                .layer(RISK_CLASSES, Activation::Softmax)
                .with_loss(Loss::CrossEntropy)
                .with_learning_rate(0.02),
            input_scaling: ScalingParams::None,
            output_scaling: ScalingParams::None,
            epochs: config.epochs(200),
        })
    }
}

/// Bounded pricing features:
/// `[log unit cost, competitor price / cost (capped at 5x), log quantity]`.
///
/// A missing competitor price counts as parity with cost.
pub fn price_features(unit_cost: f64, competitor_price: Option<f64>, quantity: f64) -> Vec<f64> {
    let cost = unit_cost.max(0.0);
    let ratio = match competitor_price {
        Some(p) if cost > 0.0 => p / cost,
        _ => 1.0,
    };
    let log_scale = 10001f64.ln();

    vec![
        ((1.0 + cost).ln() / log_scale).clamp(0.0, 1.0),
        ratio.clamp(0.0, 5.0) / 5.0,
        ((1.0 + quantity.max(0.0)).ln() / log_scale).clamp(0.0, 1.0),
    ]
}

/// Markup regressor: `(price - cost) / cost`, min-max scaled.
pub struct PriceRecipe;

impl TrainingRecipe for PriceRecipe {
    fn model_type(&self) -> ModelType {
        ModelType::Price
    }

    fn entity(&self) -> EntityType {
        EntityType::ProductPricing
    }

    fn build(
        &self,
        records: &[BusinessRecord],
        config: &LifecycleConfig,
    ) -> Result<PreparedTraining, EngineError> {
        let mut x = Vec::new();
        let mut markups = Vec::new();
        for r in records {
            let (Some(cost), Some(price)) = (
                r.feature(features::UNIT_COST),
                r.feature(features::UNIT_PRICE),
            ) else {
                continue;
            };
            if !(cost > 0.0 && price.is_finite()) {
                continue;
            }
            x.push(price_features(
                cost,
                r.feature(features::COMPETITOR_PRICE),
                r.quantity.unwrap_or(1.0),
            ));
            markups.push(((price - cost) / cost).clamp(-1.0, 10.0));
        }

        if x.len() < config.min_samples {
            return Err(EngineError::insufficient(
                ModelType::Price,
                config.min_samples,
                x.len(),
            ));
        }

        let scaled = normalize_min_max(&markups);
        Ok(PreparedTraining {
            dataset: TrainingDataset::new(x, scaled.values.iter().map(|v| vec![*v]).collect()),
            spec: NetworkSpec::new(3)
                .layer(8, Activation::Relu)
                .layer(1, Activation::Linear),
            input_scaling: ScalingParams::None,
            output_scaling: ScalingParams::MinMax {
                min: scaled.min,
                max: scaled.max,
            },
            epochs: config.epochs(200),
        })
    }
}

/// Total spend per customer, in subject order.
pub fn spend_per_customer(records: &[BusinessRecord]) -> BTreeMap<String, f64> {
    let mut totals = BTreeMap::new();
    for r in records {
        if let Some(subject) = &r.subject {
            *totals.entry(subject.clone()).or_insert(0.0) += r.value();
        }
    }
    totals
}

/// Segment of each value: quantile band of its rank among `values`.
pub fn quantile_bands(values: &[f64], segments: usize) -> Vec<usize> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|a, b| values[*a].total_cmp(&values[*b]));

    let mut bands = vec![0; n];
    for (rank, index) in order.into_iter().enumerate() {
        bands[index] = (rank * segments / n.max(1)).min(segments.saturating_sub(1));
    }
    bands
}

/// Soft customer segments over standardised spend.
pub struct SegmentationRecipe;

impl TrainingRecipe for SegmentationRecipe {
    fn model_type(&self) -> ModelType {
        ModelType::Segmentation
    }

    fn entity(&self) -> EntityType {
        EntityType::CustomerBehavior
    }

    fn build(
        &self,
        records: &[BusinessRecord],
        config: &LifecycleConfig,
    ) -> Result<PreparedTraining, EngineError> {
        let segments = config.segments;
        if segments < 2 {
            return Err(EngineError::InvalidInput(
                "segmentation needs at least 2 segments".to_string(),
            ));
        }

        let spend: Vec<f64> = spend_per_customer(records)
            .into_values()
            .filter(|v| v.is_finite())
            .collect();
        let required = config.min_samples.max(segments);
        if spend.len() < required {
            return Err(EngineError::insufficient(
                ModelType::Segmentation,
                required,
                spend.len(),
            ));
        }

        let scaled = standardize(&spend);
        let y = quantile_bands(&spend, segments)
            .into_iter()
            .map(|band| one_hot(band, segments))
            .collect();

        Ok(PreparedTraining {
            dataset: TrainingDataset::new(scaled.values.iter().map(|v| vec![*v]).collect(), y),
            spec: NetworkSpec::new(1)
                .layer(8, Activation::Relu)
                .layer(segments, Activation::Softmax)
                .with_loss(Loss::CrossEntropy)
                .with_learning_rate(0.02),
            input_scaling: ScalingParams::Standard {
                mean: scaled.mean,
                std: scaled.std,
            },
            output_scaling: ScalingParams::None,
            epochs: config.epochs(200),
        })
    }
}

fn one_hot(class: usize, classes: usize) -> Vec<f64> {
    let mut v = vec![0.0; classes];
    if let Some(slot) = v.get_mut(class) {
        *slot = 1.0;
    }
    v
}
