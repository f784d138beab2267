use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Duration;

use modelforge_core::{Clock, SystemClock, TenantId};

use super::{BusinessRecord, EntityType, FetchError};

/// Read-only access to a tenant's raw business records.
///
/// Implementations must filter strictly by `tenant_id`, keep only records
/// created within the last `lookback_days`, and return them in chronological
/// order. With a `limit`, the most recent `limit` records are kept (still
/// returned oldest first).
#[async_trait]
pub trait RecordRepository: Send + Sync + 'static {
    async fn read(
        &self,
        tenant_id: TenantId,
        entity: EntityType,
        lookback_days: u32,
        limit: Option<usize>,
    ) -> Result<Vec<BusinessRecord>, FetchError>;
}

#[async_trait]
impl<R> RecordRepository for Arc<R>
where
    R: RecordRepository + ?Sized,
{
    async fn read(
        &self,
        tenant_id: TenantId,
        entity: EntityType,
        lookback_days: u32,
        limit: Option<usize>,
    ) -> Result<Vec<BusinessRecord>, FetchError> {
        (**self).read(tenant_id, entity, lookback_days, limit).await
    }
}

/// In-memory tenant-partitioned repository for tests/dev.
pub struct InMemoryRecordRepository {
    clock: Arc<dyn Clock>,
    inner: RwLock<HashMap<(TenantId, EntityType), Vec<BusinessRecord>>>,
}

impl InMemoryRecordRepository {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Lookback windows are evaluated against `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, record: BusinessRecord) {
        if let Ok(mut map) = self.inner.write() {
            map.entry((record.tenant_id, record.entity))
                .or_default()
                .push(record);
        }
    }

    pub fn extend(&self, records: impl IntoIterator<Item = BusinessRecord>) {
        for record in records {
            self.insert(record);
        }
    }
}

impl Default for InMemoryRecordRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordRepository for InMemoryRecordRepository {
    async fn read(
        &self,
        tenant_id: TenantId,
        entity: EntityType,
        lookback_days: u32,
        limit: Option<usize>,
    ) -> Result<Vec<BusinessRecord>, FetchError> {
        let since = self.clock.now() - Duration::days(i64::from(lookback_days));

        let map = self
            .inner
            .read()
            .map_err(|_| FetchError::Unavailable("lock poisoned".to_string()))?;

        let mut records: Vec<BusinessRecord> = map
            .get(&(tenant_id, entity))
            .map(|rs| rs.iter().filter(|r| r.created_at >= since).cloned().collect())
            .unwrap_or_default();

        records.sort_by_key(|r| r.created_at);

        if let Some(limit) = limit {
            let skip = records.len().saturating_sub(limit);
            records.drain(..skip);
        }

        Ok(records)
    }
}
