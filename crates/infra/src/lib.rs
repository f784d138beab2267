//! Infrastructure layer: record store, model cache, worker config and the
//! background lifecycle runner.

pub mod config;
pub mod model_store;
pub mod records;
pub mod runner;

pub use config::WorkerConfig;
pub use model_store::SqliteModelStore;
pub use records::PostgresRecordRepository;
pub use runner::{LifecycleRunner, LifecycleRunnerHandle};
