use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use modelforge_ai::{DataProvider, DenseBackend, EngineRuntime, SessionPool};
use modelforge_core::SystemClock;
use modelforge_infra::{LifecycleRunner, PostgresRecordRepository, SqliteModelStore, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    modelforge_observability::init();

    let config = WorkerConfig::from_env();
    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL must be set")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let records = Arc::new(PostgresRecordRepository::new(pool));
    let store = Arc::new(SqliteModelStore::connect(&config.cache_path).await?);

    let runtime = Arc::new(EngineRuntime::new(Arc::new(DenseBackend::new()), store));
    let sessions = SessionPool::new(
        runtime,
        DataProvider::new(records),
        Arc::new(SystemClock),
        config.lifecycle_config(),
    );

    if config.tenants.is_empty() {
        tracing::warn!("MODELFORGE_TENANTS is empty; no models will be maintained");
    }

    let runner = LifecycleRunner::new(config.check_interval);
    let handles: Vec<_> = config
        .tenants
        .iter()
        .map(|&tenant_id| {
            runner.spawn_for_tenant("model-lifecycle", tenant_id, sessions.session(tenant_id))
        })
        .collect();

    tracing::info!(
        tenants = handles.len(),
        cache = %config.cache_path.display(),
        check_interval_secs = config.check_interval.as_secs(),
        "modelforge worker started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");

    for handle in handles {
        handle.shutdown().await;
    }
    Ok(())
}
