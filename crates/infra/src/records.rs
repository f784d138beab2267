//! Postgres-backed read-only access to historical business records.
//!
//! ## Tenant Isolation
//!
//! Every query filters on `tenant_id`; the data provider additionally rejects
//! any row that comes back with a different tenant.
//!
//! ## Error Mapping
//!
//! | SQLx Error | FetchError |
//! |------------|------------|
//! | `PoolClosed`, `PoolTimedOut`, `Io` | `Unavailable` |
//! | anything else | `Query` |

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::instrument;

use modelforge_ai::{BusinessRecord, EntityType, FetchError, RecordRepository};
use modelforge_core::{Clock, SystemClock, TenantId};

/// Schema expected by [`PostgresRecordRepository`].
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS business_records (
    id            BIGSERIAL PRIMARY KEY,
    tenant_id     UUID NOT NULL,
    entity_type   TEXT NOT NULL,
    subject       TEXT NULL,
    amount        DOUBLE PRECISION NULL,
    quantity      DOUBLE PRECISION NULL,
    business_date DATE NULL,
    occurred_at   TIMESTAMPTZ NOT NULL,
    features      JSONB NOT NULL DEFAULT '{}'::jsonb
);
CREATE INDEX IF NOT EXISTS business_records_tenant_entity_time
    ON business_records (tenant_id, entity_type, occurred_at);
"#;

#[derive(Debug, FromRow)]
struct RecordRow {
    tenant_id: uuid::Uuid,
    subject: Option<String>,
    amount: Option<f64>,
    quantity: Option<f64>,
    business_date: Option<NaiveDate>,
    occurred_at: DateTime<Utc>,
    features: Json<BTreeMap<String, f64>>,
}

impl RecordRow {
    fn into_record(self, entity: EntityType) -> BusinessRecord {
        BusinessRecord {
            tenant_id: TenantId::from_uuid(self.tenant_id),
            entity,
            subject: self.subject,
            amount: self.amount,
            quantity: self.quantity,
            date: self.business_date,
            created_at: self.occurred_at,
            features: self.features.0,
        }
    }
}

#[derive(Clone)]
pub struct PostgresRecordRepository {
    pool: Arc<PgPool>,
    clock: Arc<dyn Clock>,
}

impl PostgresRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            clock: Arc::new(SystemClock),
        }
    }

    /// Lookback windows are evaluated against `clock` instead of wall time.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Create the `business_records` table and index if missing (dev/tests).
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&*self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordRepository for PostgresRecordRepository {
    #[instrument(
        skip(self),
        fields(tenant_id = %tenant_id.as_uuid(), entity = %entity),
        err
    )]
    async fn read(
        &self,
        tenant_id: TenantId,
        entity: EntityType,
        lookback_days: u32,
        limit: Option<usize>,
    ) -> Result<Vec<BusinessRecord>, FetchError> {
        let since = lookback_start(self.clock.now(), lookback_days);

        // Most recent `limit` rows (NULL = no limit), handed back oldest first.
        let rows: Vec<RecordRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, subject, amount, quantity, business_date, occurred_at, features
            FROM (
                SELECT tenant_id, subject, amount, quantity, business_date, occurred_at, features, id
                FROM business_records
                WHERE tenant_id = $1 AND entity_type = $2 AND occurred_at >= $3
                ORDER BY occurred_at DESC, id DESC
                LIMIT $4
            ) recent
            ORDER BY occurred_at ASC, id ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(entity.as_str())
        .bind(since)
        .bind(limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX)))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("read", e))?;

        Ok(rows.into_iter().map(|r| r.into_record(entity)).collect())
    }
}

fn lookback_start(now: DateTime<Utc>, lookback_days: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(lookback_days))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> FetchError {
    match err {
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            FetchError::Unavailable(format!("{operation}: {err}"))
        }
        sqlx::Error::Database(db_err) => {
            FetchError::Query(format!("database error in {operation}: {}", db_err.message()))
        }
        other => FetchError::Query(format!("{operation}: {other}")),
    }
}
