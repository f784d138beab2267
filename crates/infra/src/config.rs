//! Worker configuration loaded from the environment.
//!
//! Invalid or absent values never abort startup: they are logged and the
//! default is used.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use modelforge_ai::LifecycleConfig;
use modelforge_core::TenantId;

pub const DATABASE_URL: &str = "DATABASE_URL";
pub const CACHE_PATH: &str = "MODELFORGE_CACHE_PATH";
pub const UPDATE_INTERVAL_SECS: &str = "MODELFORGE_UPDATE_INTERVAL_SECS";
pub const CHECK_INTERVAL_SECS: &str = "MODELFORGE_CHECK_INTERVAL_SECS";
pub const LOOKBACK_DAYS: &str = "MODELFORGE_LOOKBACK_DAYS";
pub const MAX_EPOCHS: &str = "MODELFORGE_MAX_EPOCHS";
pub const TENANTS: &str = "MODELFORGE_TENANTS";

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Postgres URL of the business record store.
    pub database_url: Option<String>,
    /// SQLite file holding trained models.
    pub cache_path: PathBuf,
    /// Models older than this are retrained.
    pub update_interval: Duration,
    /// How often each tenant's runner sweeps for stale models.
    pub check_interval: Duration,
    pub lookback_days: u32,
    pub max_epochs: usize,
    pub tenants: Vec<TenantId>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let lifecycle = LifecycleConfig::default();
        Self {
            database_url: None,
            cache_path: PathBuf::from("modelforge-cache.db"),
            update_interval: Duration::from_secs(24 * 60 * 60),
            check_interval: Duration::from_secs(60 * 60),
            lookback_days: lifecycle.lookback_days,
            max_epochs: lifecycle.max_epochs,
            tenants: Vec::new(),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Self {
            database_url: var(DATABASE_URL),
            cache_path: var(CACHE_PATH)
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_path),
            update_interval: parse_secs(UPDATE_INTERVAL_SECS, var(UPDATE_INTERVAL_SECS))
                .unwrap_or(defaults.update_interval),
            check_interval: parse_secs(CHECK_INTERVAL_SECS, var(CHECK_INTERVAL_SECS))
                .unwrap_or(defaults.check_interval),
            lookback_days: parse_positive(LOOKBACK_DAYS, var(LOOKBACK_DAYS))
                .unwrap_or(defaults.lookback_days),
            max_epochs: parse_positive(MAX_EPOCHS, var(MAX_EPOCHS)).unwrap_or(defaults.max_epochs),
            tenants: var(TENANTS).map(|v| parse_tenants(&v)).unwrap_or_default(),
        }
    }

    /// Lifecycle settings derived from this configuration.
    pub fn lifecycle_config(&self) -> LifecycleConfig {
        let update_interval = chrono::Duration::from_std(self.update_interval)
            .unwrap_or_else(|_| LifecycleConfig::default().update_interval);
        LifecycleConfig::default()
            .with_update_interval(update_interval)
            .with_lookback_days(self.lookback_days)
            .with_max_epochs(self.max_epochs)
    }
}

fn parse_positive<T>(name: &str, value: Option<String>) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    let raw = value?;
    match raw.trim().parse::<T>() {
        Ok(v) if v > T::default() => Some(v),
        _ => {
            warn!(variable = name, value = %raw, "invalid value; using default");
            None
        }
    }
}

fn parse_secs(name: &str, value: Option<String>) -> Option<Duration> {
    parse_positive::<u64>(name, value).map(Duration::from_secs)
}

/// Comma-separated tenant ids; malformed entries are skipped.
fn parse_tenants(raw: &str) -> Vec<TenantId> {
    let mut tenants = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.parse::<TenantId>() {
            Ok(t) if !tenants.contains(&t) => tenants.push(t),
            Ok(_) => {}
            Err(e) => warn!(variable = TENANTS, value = part, error = %e, "ignoring malformed tenant id"),
        }
    }
    tenants
}
