use std::sync::Arc;

use tracing::debug;

use modelforge_core::TenantId;

use super::{BusinessRecord, EntityType, FetchError, RecordRepository};

/// Default history window for training reads.
pub const DEFAULT_LOOKBACK_DAYS: u32 = 90;

/// Tenant-scoped reads of historical records.
///
/// Every method is a pure read. Repository errors propagate unchanged; the
/// orchestrator decides whether a failed fetch skips a model type.
pub struct DataProvider<R> {
    repository: Arc<R>,
    lookback_days: u32,
}

impl<R> Clone for DataProvider<R> {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository.clone(),
            lookback_days: self.lookback_days,
        }
    }
}

impl<R: RecordRepository> DataProvider<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self {
            repository,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
        }
    }

    pub fn with_lookback_days(mut self, lookback_days: u32) -> Self {
        self.lookback_days = lookback_days;
        self
    }

    pub fn lookback_days(&self) -> u32 {
        self.lookback_days
    }

    pub async fn get_historical_sales(
        &self,
        tenant_id: TenantId,
        limit: Option<usize>,
    ) -> Result<Vec<BusinessRecord>, FetchError> {
        self.fetch(tenant_id, EntityType::Sales, limit).await
    }

    pub async fn get_transaction_history(
        &self,
        tenant_id: TenantId,
        limit: Option<usize>,
    ) -> Result<Vec<BusinessRecord>, FetchError> {
        self.fetch(tenant_id, EntityType::Transactions, limit).await
    }

    pub async fn get_trust_metrics(
        &self,
        tenant_id: TenantId,
        limit: Option<usize>,
    ) -> Result<Vec<BusinessRecord>, FetchError> {
        self.fetch(tenant_id, EntityType::TrustMetrics, limit).await
    }

    pub async fn get_product_pricing_data(
        &self,
        tenant_id: TenantId,
        limit: Option<usize>,
    ) -> Result<Vec<BusinessRecord>, FetchError> {
        self.fetch(tenant_id, EntityType::ProductPricing, limit).await
    }

    pub async fn get_customer_behavior(
        &self,
        tenant_id: TenantId,
        limit: Option<usize>,
    ) -> Result<Vec<BusinessRecord>, FetchError> {
        self.fetch(tenant_id, EntityType::CustomerBehavior, limit).await
    }

    /// Read any entity kind; the named getters are shorthands for this.
    pub async fn fetch(
        &self,
        tenant_id: TenantId,
        entity: EntityType,
        limit: Option<usize>,
    ) -> Result<Vec<BusinessRecord>, FetchError> {
        let records = self
            .repository
            .read(tenant_id, entity, self.lookback_days, limit)
            .await?;

        // A leaking repository is a hard failure, never a silent filter.
        if let Some(foreign) = records.iter().find(|r| r.tenant_id != tenant_id) {
            return Err(FetchError::TenantMismatch {
                expected: tenant_id,
                found: foreign.tenant_id,
            });
        }

        debug!(
            tenant = %tenant_id,
            entity = %entity,
            lookback_days = self.lookback_days,
            rows = records.len(),
            "fetched historical records"
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;

    use crate::data::InMemoryRecordRepository;

    struct LeakyRepository {
        other: TenantId,
    }

    #[async_trait]
    impl RecordRepository for LeakyRepository {
        async fn read(
            &self,
            _tenant_id: TenantId,
            entity: EntityType,
            _lookback_days: u32,
            _limit: Option<usize>,
        ) -> Result<Vec<BusinessRecord>, FetchError> {
            Ok(vec![BusinessRecord::new(self.other, entity, Utc::now())])
        }
    }

    struct DownRepository;

    #[async_trait]
    impl RecordRepository for DownRepository {
        async fn read(
            &self,
            _tenant_id: TenantId,
            _entity: EntityType,
            _lookback_days: u32,
            _limit: Option<usize>,
        ) -> Result<Vec<BusinessRecord>, FetchError> {
            Err(FetchError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn each_getter_reads_its_entity() {
        let repo = Arc::new(InMemoryRecordRepository::new());
        let t = TenantId::new();
        let now = Utc::now();
        for entity in [
            EntityType::Sales,
            EntityType::Transactions,
            EntityType::TrustMetrics,
            EntityType::ProductPricing,
            EntityType::CustomerBehavior,
        ] {
            repo.insert(BusinessRecord::new(t, entity, now));
        }
        let provider = DataProvider::new(repo);

        let got = [
            provider.get_historical_sales(t, None).await.unwrap(),
            provider.get_transaction_history(t, None).await.unwrap(),
            provider.get_trust_metrics(t, None).await.unwrap(),
            provider.get_product_pricing_data(t, None).await.unwrap(),
            provider.get_customer_behavior(t, None).await.unwrap(),
        ];
        let entities: Vec<EntityType> = got.iter().map(|rs| rs[0].entity).collect();
        assert_eq!(
            entities,
            vec![
                EntityType::Sales,
                EntityType::Transactions,
                EntityType::TrustMetrics,
                EntityType::ProductPricing,
                EntityType::CustomerBehavior,
            ]
        );
    }

    #[tokio::test]
    async fn foreign_records_are_rejected() {
        let t = TenantId::new();
        let other = TenantId::new();
        let provider = DataProvider::new(Arc::new(LeakyRepository { other }));

        let err = provider.get_historical_sales(t, None).await.unwrap_err();
        assert_eq!(err, FetchError::TenantMismatch { expected: t, found: other });
    }

    #[tokio::test]
    async fn repository_errors_propagate_unchanged() {
        let provider = DataProvider::new(Arc::new(DownRepository)).with_lookback_days(30);
        assert_eq!(provider.lookback_days(), 30);

        let err = provider.get_trust_metrics(TenantId::new(), Some(10)).await.unwrap_err();
        assert_eq!(err, FetchError::Unavailable("connection refused".to_string()));
    }
}
