//! Local keyed blob store used to persist trained models.
//!
//! Isolation comes from key construction ([`crate::model::ModelKey`]), not from
//! the store itself.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("model store unavailable: {0}")]
    Unavailable(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Keyed `set` / `get` persistence.
///
/// `get` returns `Ok(None)` on a miss; errors are reserved for store failures.
#[async_trait]
pub trait ModelStore: Send + Sync + 'static {
    async fn set(&self, key: &str, blob: Vec<u8>) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

#[async_trait]
impl<S> ModelStore for Arc<S>
where
    S: ModelStore + ?Sized,
{
    async fn set(&self, key: &str, blob: Vec<u8>) -> Result<(), StoreError> {
        (**self).set(key, blob).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key).await
    }
}

/// In-memory store for tests/embedded use.
#[derive(Debug, Default)]
pub struct InMemoryModelStore {
    inner: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently stored under `prefix`, sorted.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };
        let mut keys: Vec<String> = map.keys().filter(|k| k.starts_with(prefix)).cloned().collect();
        keys.sort();
        keys
    }

    /// Overwrite a key with raw bytes (used to simulate corrupt artifacts).
    pub fn put_raw(&self, key: &str, blob: Vec<u8>) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(key.to_string(), blob);
        }
    }
}

#[async_trait]
impl ModelStore for InMemoryModelStore {
    async fn set(&self, key: &str, blob: Vec<u8>) -> Result<(), StoreError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;
        map.insert(key.to_string(), blob);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let map = self
            .inner
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;
        Ok(map.get(key).cloned())
    }
}
