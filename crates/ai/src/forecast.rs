use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::backend::{Activation, FitOptions, NetworkSpec, NumericBackend};
use crate::model::ScalingParams;
use crate::runtime::math::{normalize_min_max, prepare_time_series};

pub const DEFAULT_WINDOW_SIZE: usize = 7;

/// Train-once, predict-next windowed regressor.
///
/// A narrow special case of the lifecycle orchestrator: no persistence, no
/// tenant bookkeeping. Callers keep the returned scaling params and hand them
/// back on prediction.
pub struct Forecaster<B: NumericBackend> {
    backend: Arc<B>,
    window_size: usize,
    options: FitOptions,
    model: RwLock<Option<B::Model>>,
}

impl<B: NumericBackend> Forecaster<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            window_size: DEFAULT_WINDOW_SIZE,
            options: FitOptions {
                epochs: 150,
                batch_size: 16,
                seed: 42,
            },
            model: RwLock::new(None),
        }
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size.max(1);
        self
    }

    pub fn with_fit_options(mut self, options: FitOptions) -> Self {
        self.options = options;
        self
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub async fn is_trained(&self) -> bool {
        self.model.read().await.is_some()
    }

    /// Fit on `series`; `None` when it is shorter than `window_size + 1` or
    /// the backend fails.
    pub async fn train_model(&self, series: &[f64]) -> Option<ScalingParams> {
        if series.len() < self.window_size + 1 {
            debug!(
                points = series.len(),
                window = self.window_size,
                "series too short to train forecaster"
            );
            return None;
        }

        let scaled = normalize_min_max(series);
        let (x, y) = prepare_time_series(&scaled.values, self.window_size);
        let y = y.into_iter().map(|v| vec![v]).collect();

        let spec = NetworkSpec::new(self.window_size)
            .layer(16, Activation::Relu)
            .layer(8, Activation::Relu)
            .layer(1, Activation::Linear);

        match self.backend.fit(&spec, x, y, self.options).await {
            Ok(model) => {
                *self.model.write().await = Some(model);
                Some(ScalingParams::MinMax {
                    min: scaled.min,
                    max: scaled.max,
                })
            }
            Err(e) => {
                warn!(error = %e, "forecaster training failed");
                None
            }
        }
    }

    /// Next value after `last_window`, on the original scale.
    ///
    /// `None` if no model is trained or the window length is not exactly
    /// `window_size`.
    pub async fn predict_next(&self, last_window: &[f64], scaling: &ScalingParams) -> Option<f64> {
        if last_window.len() != self.window_size {
            return None;
        }

        let guard = self.model.read().await;
        let model = guard.as_ref()?;

        let input: Vec<f64> = last_window.iter().map(|v| scaling.apply(*v)).collect();
        match self.backend.predict(model, vec![input]).await {
            Ok(out) => out
                .first()
                .and_then(|row| row.first())
                .map(|v| scaling.invert(*v)),
            Err(e) => {
                warn!(error = %e, "forecaster inference failed");
                None
            }
        }
    }
}
