use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::entity::User;
use crate::filter::Filter;
use crate::pagination::PaginationParams;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Timed out after {timeout:?} waiting for {operation}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}

/// String cache keyed by `"<prefix>:<id>"`.
///
/// The cache is a derived view: callers treat every error as a miss or a
/// skipped write, never as a reason to fail.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// `Ok(None)` on miss.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;
}

/// Authoritative user store.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user and return the id the store assigned. `user.id` is ignored.
    async fn create_user(&self, user: &User) -> Result<i64, StorageError>;

    async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, StorageError>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError>;

    /// One page of users matching `filters`, plus the total match count.
    async fn list_users(
        &self,
        page: PaginationParams,
        filters: &[Filter],
    ) -> Result<(Vec<User>, u64), StorageError>;

    /// Cheap liveness check.
    async fn ping(&self) -> Result<(), StorageError>;
}
