//! Redis cache backend.
//!
//! Values are plain Redis strings written with `SET ... PX <ttl-ms>`, so expiry
//! is handled by Redis itself. A zero TTL writes the key without expiry.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::timeout;

use super::traits::{CacheStore, StorageError};
use crate::resilience::retry::{retry, RetryConfig};

pub struct RedisCache {
    connection: ConnectionManager,
    /// Optional namespace (e.g. "app:" → "app:users:42")
    prefix: String,
}

impl RedisCache {
    /// Connect and verify the server answers `PING` within `ping_timeout`.
    ///
    /// No retries: a cache that is not there at startup is replaced by the
    /// no-op cache instead of delaying the process.
    pub async fn connect(
        connection_string: &str,
        prefix: Option<&str>,
        ping_timeout: Duration,
    ) -> Result<Self, StorageError> {
        let client = Client::open(connection_string)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let connection = timeout(ping_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StorageError::Timeout {
                operation: "redis_connect",
                timeout: ping_timeout,
            })?
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let cache = Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
        };
        cache.ping(ping_timeout).await?;
        Ok(cache)
    }

    pub async fn ping(&self, ping_timeout: Duration) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let pong: String = timeout(ping_timeout, redis::cmd("PING").query_async(&mut conn))
            .await
            .map_err(|_| StorageError::Timeout {
                operation: "redis_ping",
                timeout: ping_timeout,
            })?
            .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))?;

        if pong != "PONG" {
            return Err(StorageError::Backend(format!("unexpected PING reply: {}", pong)));
        }
        Ok(())
    }

    #[inline]
    fn prefixed_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{}", self.prefix, key)
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// `PX` argument for `ttl`. Zero means no expiry; any other TTL is at least 1ms.
fn px_millis(ttl: Duration) -> u64 {
    if ttl.is_zero() {
        return 0;
    }
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.connection.clone();
        let key = self.prefixed_key(key);

        retry("redis_get", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            async move {
                let value: Option<String> = conn.get(&key).await?;
                Ok(value)
            }
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
        let conn = self.connection.clone();
        let key = self.prefixed_key(key);
        let ttl_ms = px_millis(ttl);

        retry("redis_set", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            async move {
                if ttl_ms == 0 {
                    let _: () = conn.set(&key, value).await?;
                } else {
                    let _: () = conn.pset_ex(&key, value, ttl_ms).await?;
                }
                Ok(())
            }
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.connection.clone();
        let key = self.prefixed_key(key);

        retry("redis_delete", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            async move {
                let _: () = conn.del(&key).await?;
                Ok(())
            }
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let conn = self.connection.clone();
        let key = self.prefixed_key(key);

        retry("redis_exists", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            async move {
                let exists: bool = conn.exists(&key).await?;
                Ok(exists)
            }
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_px_millis() {
        assert_eq!(px_millis(Duration::ZERO), 0);
        assert_eq!(px_millis(Duration::from_micros(10)), 1);
        assert_eq!(px_millis(Duration::from_millis(500)), 500);
        assert_eq!(px_millis(Duration::from_millis(1900)), 1900);
        assert_eq!(px_millis(Duration::from_secs(600)), 600_000);
    }
}
