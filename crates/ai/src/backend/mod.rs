//! Numeric backend boundary.
//!
//! The lifecycle engine never touches weights directly: it describes a network,
//! hands the backend a dataset, and gets back an opaque model it can run,
//! encode and decode. Any implementation of [`NumericBackend`] is substitutable.

pub mod dense;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use dense::{DenseBackend, DenseNetwork};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Linear,
    Relu,
    Sigmoid,
    /// Output layer only.
    Softmax,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Loss {
    MeanSquaredError,
    /// Requires a `Softmax` or `Sigmoid` output layer.
    CrossEntropy,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub units: usize,
    pub activation: Activation,
}

/// Architecture + optimisation settings of a feed-forward network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub input_dim: usize,
    pub layers: Vec<LayerSpec>,
    pub loss: Loss,
    pub learning_rate: f64,
}

impl NetworkSpec {
    pub fn new(input_dim: usize) -> Self {
        Self {
            input_dim,
            layers: Vec::new(),
            loss: Loss::MeanSquaredError,
            learning_rate: 0.01,
        }
    }

    pub fn layer(mut self, units: usize, activation: Activation) -> Self {
        self.layers.push(LayerSpec { units, activation });
        self
    }

    pub fn with_loss(mut self, loss: Loss) -> Self {
        self.loss = loss;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map(|l| l.units).unwrap_or(self.input_dim)
    }

    /// Structural checks shared by every backend.
    pub fn validate(&self) -> Result<(), BackendError> {
        if self.input_dim == 0 {
            return Err(BackendError::InvalidSpec("input_dim must be > 0".to_string()));
        }
        if self.layers.is_empty() {
            return Err(BackendError::InvalidSpec("network needs at least one layer".to_string()));
        }
        if self.layers.iter().any(|l| l.units == 0) {
            return Err(BackendError::InvalidSpec("layer units must be > 0".to_string()));
        }
        let last = self.layers.len() - 1;
        if self.layers[..last]
            .iter()
            .any(|l| l.activation == Activation::Softmax)
        {
            return Err(BackendError::InvalidSpec(
                "softmax is only supported on the output layer".to_string(),
            ));
        }
        if self.loss == Loss::CrossEntropy
            && !matches!(
                self.layers[last].activation,
                Activation::Softmax | Activation::Sigmoid
            )
        {
            return Err(BackendError::InvalidSpec(
                "cross-entropy needs a softmax or sigmoid output".to_string(),
            ));
        }
        if self.layers[last].activation == Activation::Softmax && self.loss != Loss::CrossEntropy {
            return Err(BackendError::InvalidSpec(
                "softmax output must be trained with cross-entropy".to_string(),
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(BackendError::InvalidSpec(
                "learning_rate must be a finite positive number".to_string(),
            ));
        }
        Ok(())
    }
}

/// Training loop settings.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FitOptions {
    pub epochs: usize,
    pub batch_size: usize,
    /// Seed for weight initialisation and shuffling.
    pub seed: u64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 32,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("invalid network spec: {0}")]
    InvalidSpec(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("training diverged: {0}")]
    Diverged(String),

    #[error("model decode failed: {0}")]
    Decode(String),

    #[error("backend runtime error: {0}")]
    Runtime(String),
}

/// Trainable model backend.
#[async_trait]
pub trait NumericBackend: Send + Sync + 'static {
    /// Opaque trained model.
    type Model: Clone + Send + Sync + 'static;

    /// Short identifier, persisted with every artifact.
    fn name(&self) -> &'static str;

    /// One-time readiness probe.
    async fn warm_up(&self) -> Result<(), BackendError>;

    async fn fit(
        &self,
        spec: &NetworkSpec,
        x: Vec<Vec<f64>>,
        y: Vec<Vec<f64>>,
        options: FitOptions,
    ) -> Result<Self::Model, BackendError>;

    async fn predict(
        &self,
        model: &Self::Model,
        x: Vec<Vec<f64>>,
    ) -> Result<Vec<Vec<f64>>, BackendError>;

    fn encode(&self, model: &Self::Model) -> Result<Vec<u8>, BackendError>;

    fn decode(&self, bytes: &[u8]) -> Result<Self::Model, BackendError>;

    fn input_dim(&self, model: &Self::Model) -> usize;

    fn output_dim(&self, model: &Self::Model) -> usize;
}
