use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use modelforge_core::{Clock, TenantId, TrainingRunId};

use crate::anomaly::detect_outliers;
use crate::backend::{FitOptions, Loss, NumericBackend};
use crate::config::LifecycleConfig;
use crate::data::{DataProvider, RecordRepository};
use crate::model::{ModelArtifact, ModelKey, ModelMetadata, ModelType};
use crate::result::{EngineError, Prediction, PredictionInput, PredictionValue};
use crate::runtime::{BackendStatus, EngineRuntime};
use crate::store::ModelStore;

use super::recipes::{PreparedTraining, recipe_for};
use super::registry::{ModelRegistry, RegisteredModel};

/// Lifecycle state of one model type.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ModelState {
    Absent,
    Cached,
    /// Present but past its update interval, or without matching metadata.
    Stale,
    Training,
}

/// Result of one [`ModelLifecycle::update_model`] attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Trained { version: String, performance: f64 },
    /// Not enough history; the previous model (if any) stays in place.
    Skipped { required: usize, actual: usize },
    /// A training of the same type was already running.
    InFlight,
    /// Fetch, backend or configuration failure. Retried on the next sweep.
    Failed { reason: String },
}

/// What an initialise or sweep pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    /// Types restored from the store (initialise only).
    pub loaded: Vec<ModelType>,
    /// Types found fresh and left alone.
    pub fresh: Vec<ModelType>,
    pub outcomes: Vec<(ModelType, UpdateOutcome)>,
    /// Set when the backend is down and nothing was attempted.
    pub degraded: Option<String>,
}

impl SweepReport {
    pub fn trained(&self) -> impl Iterator<Item = ModelType> + '_ {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, UpdateOutcome::Trained { .. }))
            .map(|(t, _)| *t)
    }
}

/// Per-tenant model lifecycle: restore, freshness sweeps, retraining and
/// serving.
///
/// Bound to exactly one tenant. Every entry point rejects (or answers `None`
/// to) any other tenant id.
pub struct ModelLifecycle<B: NumericBackend, S, R> {
    registry: ModelRegistry<B::Model>,
    runtime: Arc<EngineRuntime<B, S>>,
    data: DataProvider<R>,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,
}

impl<B, S, R> ModelLifecycle<B, S, R>
where
    B: NumericBackend,
    S: ModelStore,
    R: RecordRepository,
{
    pub fn new(
        registry: ModelRegistry<B::Model>,
        runtime: Arc<EngineRuntime<B, S>>,
        data: DataProvider<R>,
        clock: Arc<dyn Clock>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            registry,
            runtime,
            data: data.with_lookback_days(config.lookback_days),
            clock,
            config,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.registry.tenant_id()
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry<B::Model> {
        &self.registry
    }

    fn check_scope(&self, tenant_id: TenantId) -> Result<(), EngineError> {
        let expected = self.tenant_id();
        if tenant_id != expected {
            return Err(EngineError::TenantScope {
                expected,
                actual: tenant_id,
            });
        }
        Ok(())
    }

    fn key(&self, model_type: ModelType) -> ModelKey {
        ModelKey::new(self.tenant_id(), model_type)
    }

    async fn backend_down(&self) -> Option<String> {
        match self.runtime.initialize().await {
            BackendStatus::Ready { .. } => None,
            BackendStatus::Degraded { reason } => Some(reason.clone()),
        }
    }

    /// Restore persisted models, then bring every type up to date.
    #[instrument(skip_all, fields(tenant = %tenant_id), err)]
    pub async fn initialize(&self, tenant_id: TenantId) -> Result<SweepReport, EngineError> {
        self.check_scope(tenant_id)?;
        if let Some(reason) = self.backend_down().await {
            return Ok(SweepReport {
                degraded: Some(reason),
                ..SweepReport::default()
            });
        }

        let mut loaded = Vec::new();
        for model_type in ModelType::ALL {
            let key = self.key(model_type);
            let Some(artifact) = self.runtime.load_model(&key).await else {
                continue;
            };
            let metadata = self.runtime.load_metadata(&key).await;
            if metadata.is_none() {
                debug!(model_type = %model_type, "artifact without metadata; treated as stale");
            }
            self.registry
                .insert(model_type, RegisteredModel { artifact, metadata });
            loaded.push(model_type);
        }

        if loaded.is_empty() {
            info!("no persisted models; training from scratch");
        } else {
            info!(loaded = loaded.len(), "restored persisted models");
        }

        let mut report = self.sweep_types().await;
        report.loaded = loaded;
        Ok(report)
    }

    /// Retrain every absent or stale type.
    #[instrument(skip_all, fields(tenant = %tenant_id), err)]
    pub async fn sweep(&self, tenant_id: TenantId) -> Result<SweepReport, EngineError> {
        self.check_scope(tenant_id)?;
        if let Some(reason) = self.backend_down().await {
            return Ok(SweepReport {
                degraded: Some(reason),
                ..SweepReport::default()
            });
        }
        Ok(self.sweep_types().await)
    }

    async fn sweep_types(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for model_type in ModelType::ALL {
            match self.status(model_type) {
                ModelState::Cached => report.fresh.push(model_type),
                ModelState::Training => report.outcomes.push((model_type, UpdateOutcome::InFlight)),
                ModelState::Absent | ModelState::Stale => {
                    let outcome = self.train(model_type).await;
                    report.outcomes.push((model_type, outcome));
                }
            }
        }
        report
    }

    /// Train `model_type` now, regardless of freshness.
    #[instrument(skip_all, fields(tenant = %tenant_id, model_type = %model_type), err)]
    pub async fn update_model(
        &self,
        tenant_id: TenantId,
        model_type: ModelType,
    ) -> Result<UpdateOutcome, EngineError> {
        self.check_scope(tenant_id)?;
        if let Some(reason) = self.backend_down().await {
            return Ok(UpdateOutcome::Failed {
                reason: EngineError::BackendUnavailable(reason).to_string(),
            });
        }
        Ok(self.train(model_type).await)
    }

    async fn train(&self, model_type: ModelType) -> UpdateOutcome {
        let Some(_guard) = self.registry.try_begin_training(model_type) else {
            debug!(model_type = %model_type, "training already in flight");
            return UpdateOutcome::InFlight;
        };

        match self.run_training(model_type).await {
            Ok(outcome) => outcome,
            Err(EngineError::InsufficientData {
                required, actual, ..
            }) => {
                info!(model_type = %model_type, required, actual, "insufficient data; training skipped");
                UpdateOutcome::Skipped { required, actual }
            }
            Err(e) => {
                warn!(model_type = %model_type, error = %e, "model training failed");
                UpdateOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn run_training(&self, model_type: ModelType) -> Result<UpdateOutcome, EngineError> {
        let tenant_id = self.tenant_id();
        let recipe = recipe_for(model_type);
        let records = self
            .data
            .fetch(tenant_id, recipe.entity(), recipe.fetch_limit())
            .await?;
        let prepared = recipe.build(&records, &self.config)?;

        let backend = self.runtime.backend();
        let options = FitOptions {
            epochs: prepared.epochs,
            batch_size: self.config.batch_size,
            seed: self.config.seed.wrapping_add(seed_offset(model_type)),
        };
        let model = backend
            .fit(
                &prepared.spec,
                prepared.dataset.x.clone(),
                prepared.dataset.y.clone(),
                options,
            )
            .await?;
        let performance = evaluate(backend, &model, &prepared).await?;

        let previous = self.registry.get(model_type);
        let version =
            ModelMetadata::next_version(previous.as_ref().map(|p| p.artifact.version.as_str()));
        let run_id = TrainingRunId::new();
        let artifact = ModelArtifact {
            run_id,
            version: version.clone(),
            input_scaling: prepared.input_scaling,
            output_scaling: prepared.output_scaling,
            model,
        };
        let metadata = ModelMetadata {
            run_id,
            last_trained_at: self.clock.now(),
            version: version.clone(),
            performance,
            samples: prepared.dataset.len(),
        };

        // Metadata goes last: without it the artifact reads as stale.
        let key = self.key(model_type);
        match self.runtime.save_model(&key, &artifact).await {
            Ok(()) => {
                if let Err(e) = self.runtime.save_metadata(&key, &metadata).await {
                    warn!(model_type = %model_type, error = %e, "metadata not persisted; model will retrain on restart");
                }
            }
            Err(e) => {
                warn!(model_type = %model_type, error = %e, "model not persisted; serving from memory only");
            }
        }

        self.registry.insert(
            model_type,
            RegisteredModel {
                artifact,
                metadata: Some(metadata),
            },
        );

        info!(
            model_type = %model_type,
            version = %version,
            performance,
            samples = prepared.dataset.len(),
            "model trained"
        );
        Ok(UpdateOutcome::Trained {
            version,
            performance,
        })
    }

    fn is_stale(&self, entry: &RegisteredModel<B::Model>) -> bool {
        match entry.paired_metadata() {
            None => true,
            Some(meta) => self.clock.now() - meta.last_trained_at > self.config.update_interval,
        }
    }

    pub fn status(&self, model_type: ModelType) -> ModelState {
        if self.registry.is_training(model_type) {
            return ModelState::Training;
        }
        match self.registry.get(model_type) {
            None => ModelState::Absent,
            Some(entry) if self.is_stale(&entry) => ModelState::Stale,
            Some(_) => ModelState::Cached,
        }
    }

    pub fn metadata(&self, model_type: ModelType) -> Option<ModelMetadata> {
        self.registry
            .get(model_type)
            .and_then(|entry| entry.metadata.clone())
    }

    /// Serve a prediction from the current model of `model_type`.
    ///
    /// `None` when the tenant is foreign, the backend is down, no model exists,
    /// the input does not fit the model or inference fails.
    #[instrument(skip_all, fields(tenant = %tenant_id, model_type = %model_type))]
    pub async fn predict(
        &self,
        tenant_id: TenantId,
        model_type: ModelType,
        input: PredictionInput,
    ) -> Option<Prediction> {
        if let Err(e) = self.check_scope(tenant_id) {
            warn!(error = %e, "prediction refused");
            return None;
        }
        if !self.runtime.is_ready() {
            debug!("backend not ready");
            return None;
        }
        let entry = self.registry.get(model_type)?;
        let backend = self.runtime.backend();
        let model = &entry.artifact.model;
        let (input_scaling, output_scaling) =
            (entry.artifact.input_scaling, entry.artifact.output_scaling);
        let input_dim = backend.input_dim(model);
        let single_output = backend.output_dim(model) == 1;

        let value = match input {
            PredictionInput::Series(values) => {
                if values.len() != input_dim {
                    debug!(expected = input_dim, actual = values.len(), "input dimension mismatch");
                    return None;
                }
                let row = values.iter().map(|v| input_scaling.apply(*v)).collect();
                let out = self.infer(model, vec![row]).await?.into_iter().next()?;
                if single_output {
                    PredictionValue::Scalar(output_scaling.invert(*out.first()?))
                } else {
                    PredictionValue::Vector(out)
                }
            }
            PredictionInput::Batch(rows) => {
                if rows.iter().any(|r| r.len() != input_dim) {
                    debug!(expected = input_dim, "batch row dimension mismatch");
                    return None;
                }
                let out = self.infer(model, rows).await?;
                if single_output {
                    PredictionValue::Batch(
                        out.into_iter()
                            .map(|r| r.into_iter().map(|v| output_scaling.invert(v)).collect())
                            .collect(),
                    )
                } else {
                    PredictionValue::Batch(out)
                }
            }
        };

        let performance = entry
            .paired_metadata()
            .map(|m| m.performance)
            .unwrap_or(0.0);
        Some(Prediction {
            value,
            confidence: self.config.confidence(performance),
            model_version: entry.artifact.version.clone(),
        })
    }

    /// Indices of `amounts` ending a window the autoencoder reconstructs
    /// abnormally badly.
    ///
    /// Reconstruction errors are z-scored as one batch; each flagged window is
    /// reported by the index of its last amount. `None` under the same
    /// conditions as [`Self::predict`].
    #[instrument(skip_all, fields(tenant = %tenant_id, amounts = amounts.len()))]
    pub async fn detect_transaction_anomalies(
        &self,
        tenant_id: TenantId,
        amounts: &[f64],
    ) -> Option<Vec<usize>> {
        if let Err(e) = self.check_scope(tenant_id) {
            warn!(error = %e, "anomaly check refused");
            return None;
        }
        if !self.runtime.is_ready() {
            return None;
        }
        let entry = self.registry.get(ModelType::Anomaly)?;
        let model = &entry.artifact.model;
        let window = self.runtime.backend().input_dim(model);
        if window == 0 || amounts.len() < window {
            return Some(Vec::new());
        }

        let scaled: Vec<f64> = amounts
            .iter()
            .map(|a| entry.artifact.input_scaling.apply(*a))
            .collect();
        let windows: Vec<Vec<f64>> = scaled.windows(window).map(<[f64]>::to_vec).collect();
        let reconstructed = self.infer(model, windows.clone()).await?;

        let errors: Vec<f64> = windows
            .iter()
            .zip(&reconstructed)
            .map(|(w, r)| mse(w, r))
            .collect();
        Some(
            detect_outliers(&errors, self.config.anomaly_threshold)
                .into_iter()
                .map(|i| i + window - 1)
                .collect(),
        )
    }

    async fn infer(&self, model: &B::Model, rows: Vec<Vec<f64>>) -> Option<Vec<Vec<f64>>> {
        match self.runtime.backend().predict(model, rows).await {
            Ok(out) => Some(out),
            Err(e) => {
                warn!(error = %e, "inference failed");
                None
            }
        }
    }
}

fn seed_offset(model_type: ModelType) -> u64 {
    ModelType::ALL
        .iter()
        .position(|t| *t == model_type)
        .unwrap_or(0) as u64
}

/// Training-set score in \[0, 1\]: accuracy for classifiers, `1 / (1 + mse)`
/// otherwise.
async fn evaluate<B: NumericBackend>(
    backend: &B,
    model: &B::Model,
    prepared: &PreparedTraining,
) -> Result<f64, EngineError> {
    let out = backend.predict(model, prepared.dataset.x.clone()).await?;
    let y = &prepared.dataset.y;
    if y.is_empty() {
        return Ok(0.0);
    }

    let score = match prepared.spec.loss {
        Loss::CrossEntropy => {
            let hits = out
                .iter()
                .zip(y)
                .filter(|(p, t)| argmax(p) == argmax(t))
                .count();
            hits as f64 / y.len() as f64
        }
        Loss::MeanSquaredError => {
            let total: f64 = out.iter().zip(y).map(|(p, t)| mse(p, t)).sum();
            1.0 / (1.0 + total / y.len() as f64)
        }
    };
    Ok(if score.is_finite() { score } else { 0.0 })
}

fn mse(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f64>() / a.len() as f64
}

fn argmax(v: &[f64]) -> Option<usize> {
    v.iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
}
