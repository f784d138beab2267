//! Model identity, metadata and scaling types shared by the runtime and the
//! lifecycle orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use modelforge_core::{TenantId, TrainingRunId};

use crate::runtime::math::{denormalize_value, destandardize_value};

/// Kind of model tracked per tenant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// Next-day sales forecast.
    Forecast,
    /// Transaction fraud/anomaly autoencoder.
    Anomaly,
    /// Counterparty risk classifier over trust metrics.
    Risk,
    /// Markup recommendation regressor.
    Price,
    /// Customer spend segmentation (soft clusters).
    Segmentation,
}

impl ModelType {
    /// Every model type the orchestrator tracks, in sweep order.
    pub const ALL: [ModelType; 5] = [
        ModelType::Forecast,
        ModelType::Anomaly,
        ModelType::Risk,
        ModelType::Price,
        ModelType::Segmentation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Forecast => "forecast",
            ModelType::Anomaly => "anomaly",
            ModelType::Risk => "risk",
            ModelType::Price => "price",
            ModelType::Segmentation => "segmentation",
        }
    }
}

impl core::fmt::Display for ModelType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Namespaced identity of a persisted model.
///
/// All store keys are derived from this type, so every key carries both the
/// tenant and the model type.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub tenant_id: TenantId,
    pub model_type: ModelType,
}

impl ModelKey {
    pub fn new(tenant_id: TenantId, model_type: ModelType) -> Self {
        Self {
            tenant_id,
            model_type,
        }
    }

    /// Key of the model + scaling artifact.
    pub fn artifact_key(&self) -> String {
        format!("tenant/{}/model/{}", self.tenant_id, self.model_type)
    }

    /// Key of the freshness metadata.
    pub fn metadata_key(&self) -> String {
        format!("tenant/{}/metadata/{}", self.tenant_id, self.model_type)
    }

    /// Prefix shared by every key of a tenant.
    pub fn tenant_prefix(tenant_id: TenantId) -> String {
        format!("tenant/{tenant_id}/")
    }
}

impl core::fmt::Display for ModelKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.model_type)
    }
}

/// Freshness metadata, one per `(tenant, model type)`.
///
/// Overwritten (never merged) on every retrain. It is the source of truth for
/// staleness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub run_id: TrainingRunId,
    pub last_trained_at: DateTime<Utc>,
    pub version: String,
    /// Training-set quality score in \[0, 1\].
    pub performance: f64,
    /// Number of training samples.
    pub samples: usize,
}

impl ModelMetadata {
    /// Numeric part of a version string (`"v3"` → 3). Unparseable versions count as 0.
    pub fn version_number(version: &str) -> u64 {
        version.trim_start_matches('v').parse::<u64>().unwrap_or(0)
    }

    /// Version string following `previous`.
    pub fn next_version(previous: Option<&str>) -> String {
        let n = previous.map(ModelMetadata::version_number).unwrap_or(0);
        format!("v{}", n + 1)
    }
}

/// Normalization parameters captured at training time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScalingParams {
    /// The model consumes bounded features and needs no scaling.
    None,
    MinMax { min: f64, max: f64 },
    Standard { mean: f64, std: f64 },
}

impl ScalingParams {
    /// Map a raw value into the model's input space.
    pub fn apply(&self, x: f64) -> f64 {
        match *self {
            ScalingParams::None => x,
            ScalingParams::MinMax { min, max } => {
                let range = max - min;
                let range = if range == 0.0 { 1.0 } else { range };
                (x - min) / range
            }
            ScalingParams::Standard { mean, std } => {
                let std = if std == 0.0 { 1.0 } else { std };
                (x - mean) / std
            }
        }
    }

    /// Map a model output back to the original scale.
    pub fn invert(&self, v: f64) -> f64 {
        match *self {
            ScalingParams::None => v,
            ScalingParams::MinMax { min, max } => denormalize_value(v, min, max),
            ScalingParams::Standard { mean, std } => destandardize_value(v, mean, std),
        }
    }
}

/// A trained model together with the scaling of the run that produced it.
///
/// Persisted as one blob so the pairing survives restarts. Inputs and targets
/// are scaled independently: a model may consume raw features and still
/// regress a scaled target.
#[derive(Debug, Clone)]
pub struct ModelArtifact<M> {
    pub run_id: TrainingRunId,
    pub version: String,
    /// Applied to `Series` inputs before inference.
    pub input_scaling: ScalingParams,
    /// Inverted on single-output predictions.
    pub output_scaling: ScalingParams,
    pub model: M,
}

/// Supervised training data (ephemeral; never persisted).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingDataset {
    pub x: Vec<Vec<f64>>,
    pub y: Vec<Vec<f64>>,
}

impl TrainingDataset {
    pub fn new(x: Vec<Vec<f64>>, y: Vec<Vec<f64>>) -> Self {
        Self { x, y }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}
