use std::time::Duration;

use async_trait::async_trait;

use super::traits::{CacheStore, StorageError};

/// Cache that stores nothing. Every read is a miss, every write succeeds.
///
/// Selected at startup when no cache is configured or the cache fails its
/// connectivity check.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpCache;

#[async_trait]
impl CacheStore for NoOpCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StorageError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), StorageError> {
        Ok(())
    }

    async fn exists(&self, _key: &str) -> Result<bool, StorageError> {
        Ok(false)
    }
}
