use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use modelforge_core::TenantId;

use crate::model::{ModelArtifact, ModelMetadata, ModelType};

/// A model as served: the artifact plus whatever metadata accompanied it.
///
/// `metadata` is `None` when the artifact was found without its metadata; such
/// an entry is stale by definition.
#[derive(Debug, Clone)]
pub struct RegisteredModel<M> {
    pub artifact: ModelArtifact<M>,
    pub metadata: Option<ModelMetadata>,
}

impl<M> RegisteredModel<M> {
    /// Metadata written by the same run as the artifact, if any.
    pub fn paired_metadata(&self) -> Option<&ModelMetadata> {
        self.metadata
            .as_ref()
            .filter(|m| m.run_id == self.artifact.run_id)
    }
}

/// In-memory model registry of one tenant session.
///
/// Entries are swapped whole, so a reader holding an `Arc` keeps the last
/// known-good model while a retrain replaces it. The in-flight set prevents two
/// trainings of the same model type from overlapping.
#[derive(Debug)]
pub struct ModelRegistry<M> {
    tenant_id: TenantId,
    models: RwLock<HashMap<ModelType, Arc<RegisteredModel<M>>>>,
    in_flight: Arc<Mutex<HashSet<ModelType>>>,
}

impl<M> ModelRegistry<M> {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            models: RwLock::new(HashMap::new()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn get(&self, model_type: ModelType) -> Option<Arc<RegisteredModel<M>>> {
        let map = self.models.read().ok()?;
        map.get(&model_type).cloned()
    }

    /// Replace the entry for `model_type`, returning the previous one.
    pub fn insert(
        &self,
        model_type: ModelType,
        entry: RegisteredModel<M>,
    ) -> Option<Arc<RegisteredModel<M>>> {
        let mut map = self.models.write().ok()?;
        map.insert(model_type, Arc::new(entry))
    }

    pub fn len(&self) -> usize {
        self.models.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn model_types(&self) -> Vec<ModelType> {
        let mut types: Vec<ModelType> = match self.models.read() {
            Ok(m) => m.keys().copied().collect(),
            Err(_) => return vec![],
        };
        types.sort();
        types
    }

    /// Claim the training slot of `model_type`.
    ///
    /// `None` if a training of the same type is already running. The slot is
    /// released when the guard drops.
    pub fn try_begin_training(&self, model_type: ModelType) -> Option<TrainingGuard> {
        let mut set = self.in_flight.lock().ok()?;
        if !set.insert(model_type) {
            return None;
        }
        Some(TrainingGuard {
            model_type,
            in_flight: self.in_flight.clone(),
        })
    }

    pub fn is_training(&self, model_type: ModelType) -> bool {
        self.in_flight
            .lock()
            .map(|s| s.contains(&model_type))
            .unwrap_or(false)
    }
}

/// Marker of a training in progress.
#[derive(Debug)]
pub struct TrainingGuard {
    model_type: ModelType,
    in_flight: Arc<Mutex<HashSet<ModelType>>>,
}

impl TrainingGuard {
    pub fn model_type(&self) -> ModelType {
        self.model_type
    }
}

impl Drop for TrainingGuard {
    fn drop(&mut self) {
        match self.in_flight.lock() {
            Ok(mut set) => {
                set.remove(&self.model_type);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(&self.model_type);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScalingParams;
    use chrono::Utc;
    use modelforge_core::TrainingRunId;

    fn entry(version: &str) -> RegisteredModel<u32> {
        RegisteredModel {
            artifact: ModelArtifact {
                run_id: TrainingRunId::new(),
                version: version.to_string(),
                input_scaling: ScalingParams::None,
                output_scaling: ScalingParams::None,
                model: 1,
            },
            metadata: None,
        }
    }

    #[test]
    fn insert_swaps_whole_entries() {
        let reg = ModelRegistry::new(TenantId::new());
        assert!(reg.is_empty());
        assert!(reg.insert(ModelType::Risk, entry("v1")).is_none());

        let held = reg.get(ModelType::Risk).unwrap();
        let previous = reg.insert(ModelType::Risk, entry("v2")).unwrap();

        // Readers keep the entry they already hold.
        assert_eq!(held.artifact.version, "v1");
        assert_eq!(previous.artifact.version, "v1");
        assert_eq!(reg.get(ModelType::Risk).unwrap().artifact.version, "v2");
        assert_eq!(reg.model_types(), vec![ModelType::Risk]);
    }

    #[test]
    fn in_flight_guard_excludes_same_type() {
        let reg: ModelRegistry<u32> = ModelRegistry::new(TenantId::new());

        let guard = reg.try_begin_training(ModelType::Forecast).unwrap();
        assert_eq!(guard.model_type(), ModelType::Forecast);
        assert!(reg.is_training(ModelType::Forecast));
        assert!(reg.try_begin_training(ModelType::Forecast).is_none());
        assert!(reg.try_begin_training(ModelType::Price).is_some());

        drop(guard);
        assert!(!reg.is_training(ModelType::Forecast));
        assert!(reg.try_begin_training(ModelType::Forecast).is_some());
    }

    #[test]
    fn metadata_from_another_run_is_not_paired() {
        let mut e = entry("v1");
        e.metadata = Some(ModelMetadata {
            run_id: TrainingRunId::new(),
            last_trained_at: Utc::now(),
            version: "v1".to_string(),
            performance: 1.0,
            samples: 1,
        });
        assert!(e.paired_metadata().is_none());

        let run_id = e.artifact.run_id;
        if let Some(m) = e.metadata.as_mut() {
            m.run_id = run_id;
        }
        assert!(e.paired_metadata().is_some());
    }
}
