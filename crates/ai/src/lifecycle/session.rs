use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use modelforge_core::{Clock, TenantId};

use crate::backend::NumericBackend;
use crate::config::LifecycleConfig;
use crate::data::{DataProvider, RecordRepository};
use crate::model::ModelType;
use crate::result::{EngineError, Prediction, PredictionInput};
use crate::runtime::EngineRuntime;
use crate::store::ModelStore;

use super::orchestrator::{ModelLifecycle, SweepReport};
use super::registry::ModelRegistry;

/// One [`ModelLifecycle`] per tenant, created on first use.
///
/// Sessions share the runtime (backend and store) and the record repository;
/// registries are never shared.
pub struct SessionPool<B: NumericBackend, S, R> {
    runtime: Arc<EngineRuntime<B, S>>,
    data: DataProvider<R>,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,
    sessions: Mutex<HashMap<TenantId, Arc<ModelLifecycle<B, S, R>>>>,
}

impl<B, S, R> SessionPool<B, S, R>
where
    B: NumericBackend,
    S: ModelStore,
    R: RecordRepository,
{
    pub fn new(
        runtime: Arc<EngineRuntime<B, S>>,
        data: DataProvider<R>,
        clock: Arc<dyn Clock>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            runtime,
            data,
            clock,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn runtime(&self) -> &Arc<EngineRuntime<B, S>> {
        &self.runtime
    }

    /// The session of `tenant_id`, creating it if needed.
    pub fn session(&self, tenant_id: TenantId) -> Arc<ModelLifecycle<B, S, R>> {
        let mut sessions = match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sessions
            .entry(tenant_id)
            .or_insert_with(|| {
                Arc::new(ModelLifecycle::new(
                    ModelRegistry::new(tenant_id),
                    self.runtime.clone(),
                    self.data.clone(),
                    self.clock.clone(),
                    self.config.clone(),
                ))
            })
            .clone()
    }

    pub async fn initialize(&self, tenant_id: TenantId) -> Result<SweepReport, EngineError> {
        self.session(tenant_id).initialize(tenant_id).await
    }

    pub async fn predict(
        &self,
        tenant_id: TenantId,
        model_type: ModelType,
        input: PredictionInput,
    ) -> Option<Prediction> {
        self.session(tenant_id)
            .predict(tenant_id, model_type, input)
            .await
    }

    /// Tenants with a live session, in id order.
    pub fn tenants(&self) -> Vec<TenantId> {
        let mut ids: Vec<TenantId> = match self.sessions.lock() {
            Ok(s) => s.keys().copied().collect(),
            Err(poisoned) => poisoned.into_inner().keys().copied().collect(),
        };
        ids.sort();
        ids
    }
}
