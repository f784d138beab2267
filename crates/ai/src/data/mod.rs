//! Tenant-scoped historical data: record types, the read-only repository
//! boundary, the data provider and daily aggregation.

pub mod aggregate;
pub mod provider;
pub mod repository;

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use modelforge_core::TenantId;

pub use aggregate::{aggregate_daily, aggregate_daily_dated};
pub use provider::{DEFAULT_LOOKBACK_DAYS, DataProvider};
pub use repository::{InMemoryRecordRepository, RecordRepository};

/// Feature names carried in [`BusinessRecord::features`].
pub mod features {
    /// Trust score on a 0–100 scale.
    pub const TRUST_SCORE: &str = "trust_score";
    pub const PAYMENT_DELAY_DAYS: &str = "payment_delay_days";
    pub const DISPUTE_COUNT: &str = "dispute_count";
    pub const ORDER_COUNT: &str = "order_count";
    /// Share of deliveries/payments on time, in \[0, 1\].
    pub const ON_TIME_RATE: &str = "on_time_rate";
    pub const UNIT_COST: &str = "unit_cost";
    pub const UNIT_PRICE: &str = "unit_price";
    pub const COMPETITOR_PRICE: &str = "competitor_price";
}

/// Kind of business record a repository serves.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Sales,
    Transactions,
    TrustMetrics,
    ProductPricing,
    CustomerBehavior,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Sales => "sales",
            EntityType::Transactions => "transactions",
            EntityType::TrustMetrics => "trust_metrics",
            EntityType::ProductPricing => "product_pricing",
            EntityType::CustomerBehavior => "customer_behavior",
        }
    }
}

impl core::fmt::Display for EntityType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw business record owned by the backing store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessRecord {
    pub tenant_id: TenantId,
    pub entity: EntityType,
    /// Customer, supplier or product the record is about.
    pub subject: Option<String>,
    pub amount: Option<f64>,
    pub quantity: Option<f64>,
    /// Explicit business date; falls back to `created_at`.
    pub date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub features: BTreeMap<String, f64>,
}

impl BusinessRecord {
    pub fn new(tenant_id: TenantId, entity: EntityType, created_at: DateTime<Utc>) -> Self {
        Self {
            tenant_id,
            entity,
            subject: None,
            amount: None,
            quantity: None,
            date: None,
            created_at,
            features: BTreeMap::new(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_quantity(mut self, quantity: f64) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_feature(mut self, name: impl Into<String>, value: f64) -> Self {
        self.features.insert(name.into(), value);
        self
    }

    /// Numeric value: amount, else quantity, else 0.
    pub fn value(&self) -> f64 {
        self.amount.or(self.quantity).unwrap_or(0.0)
    }

    /// Calendar day (UTC) the record belongs to.
    pub fn day(&self) -> NaiveDate {
        self.date.unwrap_or_else(|| self.created_at.date_naive())
    }

    pub fn feature(&self, name: &str) -> Option<f64> {
        self.features.get(name).copied()
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),

    #[error("record query failed: {0}")]
    Query(String),

    #[error("repository returned a record of tenant {found} for tenant {expected}")]
    TenantMismatch { expected: TenantId, found: TenantId },
}
