use serde::{Deserialize, Serialize};
use thiserror::Error;

use modelforge_core::TenantId;

use crate::backend::BackendError;
use crate::data::FetchError;
use crate::model::ModelType;
use crate::store::StoreError;

/// Input handed to [`crate::lifecycle::ModelLifecycle::predict`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum PredictionInput {
    /// One raw vector (e.g. the last forecast window); scaled with the
    /// parameters stored for the model.
    Series(Vec<f64>),

    /// Multivariate rows of already bounded features; passed through unscaled.
    Batch(Vec<Vec<f64>>),
}

/// Model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum PredictionValue {
    /// Single-output model, back on the original scale.
    Scalar(f64),

    /// Multi-output model (class probabilities, reconstructions), raw.
    Vector(Vec<f64>),

    /// One output row per input row.
    Batch(Vec<Vec<f64>>),
}

impl PredictionValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            PredictionValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            PredictionValue::Vector(v) => Some(v),
            _ => None,
        }
    }
}

/// Prediction served to callers.
///
/// This is an insight, not a domain fact: absence of a model yields no
/// `Prediction` at all rather than an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub value: PredictionValue,

    /// Bounded heuristic in `[low, high)` of the configured confidence range.
    /// Not a calibrated probability.
    pub confidence: f64,

    /// Version of the model that produced the value.
    pub model_version: String,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("insufficient data for {model_type}: need {required}, have {actual}")]
    InsufficientData {
        model_type: ModelType,
        required: usize,
        actual: usize,
    },

    #[error("numeric backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("numeric backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("artifact encoding failed: {0}")]
    Encoding(String),

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("tenant scope violation: session is bound to {expected}, got {actual}")]
    TenantScope { expected: TenantId, actual: TenantId },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl EngineError {
    pub fn insufficient(model_type: ModelType, required: usize, actual: usize) -> Self {
        Self::InsufficientData {
            model_type,
            required,
            actual,
        }
    }
}
