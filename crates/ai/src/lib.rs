//! `modelforge-ai`
//!
//! **Responsibility:** tenant-scoped predictive models over historical
//! business records.
//!
//! - Models are insights: they never mutate the records they learn from.
//! - Every persisted key and every in-memory registry is bound to one tenant.
//! - Storage and data access sit behind traits ([`ModelStore`],
//!   [`RecordRepository`]); `modelforge-infra` provides the real ones.

pub mod anomaly;
pub mod backend;
pub mod config;
pub mod data;
pub mod forecast;
pub mod lifecycle;
pub mod model;
pub mod result;
pub mod runtime;
pub mod store;

pub use anomaly::{AnomalyDetector, Outlier, detect_outliers, find_outliers, is_anomaly};
pub use backend::{DenseBackend, DenseNetwork, NumericBackend};
pub use config::LifecycleConfig;
pub use data::{
    BusinessRecord, DataProvider, EntityType, FetchError, InMemoryRecordRepository,
    RecordRepository,
};
pub use forecast::Forecaster;
pub use lifecycle::{ModelLifecycle, ModelState, SessionPool, SweepReport, UpdateOutcome};
pub use model::{ModelKey, ModelMetadata, ModelType, ScalingParams};
pub use result::{EngineError, Prediction, PredictionInput, PredictionValue};
pub use runtime::{BackendStatus, EngineRuntime};
pub use store::{InMemoryModelStore, ModelStore, StoreError};
