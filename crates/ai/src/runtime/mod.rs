//! Engine runtime: backend bootstrap plus model persistence.
//!
//! The runtime is shared by every tenant session of a process. Numeric helpers
//! live in [`math`].

pub mod math;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use modelforge_core::TrainingRunId;

use crate::backend::NumericBackend;
use crate::model::{ModelArtifact, ModelKey, ModelMetadata, ScalingParams};
use crate::result::EngineError;
use crate::store::ModelStore;

pub use math::{
    MinMaxScaled, Standardized, denormalize_value, destandardize_value, normalize_min_max,
    prepare_time_series, standardize,
};

/// Outcome of [`EngineRuntime::initialize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    Ready { backend: &'static str },
    /// No predictions or training are available.
    Degraded { reason: String },
}

/// On-store envelope of a [`ModelArtifact`].
#[derive(Debug, Serialize, Deserialize)]
struct StoredArtifact {
    backend: String,
    run_id: TrainingRunId,
    version: String,
    input_scaling: ScalingParams,
    output_scaling: ScalingParams,
    model: Vec<u8>,
}

pub struct EngineRuntime<B, S> {
    backend: Arc<B>,
    store: Arc<S>,
    status: OnceCell<BackendStatus>,
}

impl<B, S> EngineRuntime<B, S>
where
    B: NumericBackend,
    S: ModelStore,
{
    pub fn new(backend: Arc<B>, store: Arc<S>) -> Self {
        Self {
            backend,
            store,
            status: OnceCell::new(),
        }
    }

    /// Bring the backend up once.
    ///
    /// Safe to call any number of times; only the first call probes the
    /// backend. Failure is recorded as [`BackendStatus::Degraded`], never raised.
    pub async fn initialize(&self) -> &BackendStatus {
        self.status
            .get_or_init(|| async {
                let name = self.backend.name();
                match self.backend.warm_up().await {
                    Ok(()) => {
                        info!(backend = name, "numeric backend ready");
                        BackendStatus::Ready { backend: name }
                    }
                    Err(e) => {
                        warn!(backend = name, error = %e, "numeric backend unavailable; predictions disabled");
                        BackendStatus::Degraded {
                            reason: e.to_string(),
                        }
                    }
                }
            })
            .await
    }

    pub fn status(&self) -> Option<&BackendStatus> {
        self.status.get()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.status.get(), Some(BackendStatus::Ready { .. }))
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Persist a model together with its scaling parameters.
    pub async fn save_model(
        &self,
        key: &ModelKey,
        artifact: &ModelArtifact<B::Model>,
    ) -> Result<(), EngineError> {
        let stored = StoredArtifact {
            backend: self.backend.name().to_string(),
            run_id: artifact.run_id,
            version: artifact.version.clone(),
            input_scaling: artifact.input_scaling,
            output_scaling: artifact.output_scaling,
            model: self.backend.encode(&artifact.model)?,
        };
        let blob = serde_json::to_vec(&stored).map_err(|e| EngineError::Encoding(e.to_string()))?;
        self.store.set(&key.artifact_key(), blob).await?;
        debug!(key = %key, version = %artifact.version, "model artifact saved");
        Ok(())
    }

    /// Load a model artifact.
    ///
    /// `None` on a miss, a store failure, a corrupt blob or an artifact written
    /// by a different backend. This is the cache-miss signal; it never errors.
    pub async fn load_model(&self, key: &ModelKey) -> Option<ModelArtifact<B::Model>> {
        let blob = match self.store.get(&key.artifact_key()).await {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                debug!(key = %key, "no cached model");
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "model store read failed");
                return None;
            }
        };

        let stored: StoredArtifact = match serde_json::from_slice(&blob) {
            Ok(s) => s,
            Err(e) => {
                warn!(key = %key, error = %e, "corrupt model artifact ignored");
                return None;
            }
        };

        if stored.backend != self.backend.name() {
            warn!(
                key = %key,
                stored_backend = %stored.backend,
                active_backend = self.backend.name(),
                "incompatible model artifact ignored"
            );
            return None;
        }

        match self.backend.decode(&stored.model) {
            Ok(model) => Some(ModelArtifact {
                run_id: stored.run_id,
                version: stored.version,
                input_scaling: stored.input_scaling,
                output_scaling: stored.output_scaling,
                model,
            }),
            Err(e) => {
                warn!(key = %key, error = %e, "undecodable model artifact ignored");
                None
            }
        }
    }

    pub async fn save_metadata(
        &self,
        key: &ModelKey,
        metadata: &ModelMetadata,
    ) -> Result<(), EngineError> {
        let blob =
            serde_json::to_vec(metadata).map_err(|e| EngineError::Encoding(e.to_string()))?;
        self.store.set(&key.metadata_key(), blob).await?;
        Ok(())
    }

    /// Load freshness metadata; same `None` rules as [`Self::load_model`].
    pub async fn load_metadata(&self, key: &ModelKey) -> Option<ModelMetadata> {
        match self.store.get(&key.metadata_key()).await {
            Ok(Some(blob)) => match serde_json::from_slice(&blob) {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!(key = %key, error = %e, "corrupt model metadata ignored");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "metadata read failed");
                None
            }
        }
    }
}
