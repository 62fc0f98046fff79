//! Cache-aside read path.
//!
//! Single-user reads go cache → store → cache fill, listings go straight to
//! the store. The cache holds the stored form (encrypted email); decryption
//! happens on every read, after the cache.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::crypto::{CryptoError, FieldEncryptor};
use crate::entity::User;
use crate::filter::Filter;
use crate::metrics::{self, CacheResult};
use crate::pagination::PaginationParams;
use crate::storage::cache_key;
use crate::storage::traits::{CacheStore, StorageError, UserStore};

/// Cache namespace for user snapshots.
pub const CACHE_PREFIX: &str = "entity";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("user {0} not found")]
    NotFound(i64),
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The cached snapshot under `key` did not deserialize and was purged.
    #[error("corrupt cache entry {key}: {source}")]
    CorruptCache {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    /// `user` carries the row with its email blanked.
    #[error("cannot decrypt email of user {}: {source}", .user.id)]
    Decrypt {
        user: Box<User>,
        #[source]
        source: CryptoError,
    },
}

pub struct UserService {
    store: Arc<dyn UserStore>,
    cache: Arc<dyn CacheStore>,
    encryptor: Arc<dyn FieldEncryptor>,
    cache_ttl: Duration,
}

impl UserService {
    pub fn new(
        store: Arc<dyn UserStore>,
        cache: Arc<dyn CacheStore>,
        encryptor: Arc<dyn FieldEncryptor>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            encryptor,
            cache_ttl,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_user(&self, id: i64) -> Result<User, ServiceError> {
        let key = cache_key(CACHE_PREFIX, id);

        match self.cache.get(&key).await {
            Ok(Some(blob)) => {
                return match serde_json::from_str::<User>(&blob) {
                    Ok(user) => {
                        metrics::record_cache(CacheResult::Hit);
                        self.reveal(user)
                    }
                    Err(source) => {
                        metrics::record_cache(CacheResult::Corrupt);
                        warn!(key = %key, error = %source, "Purging corrupt cache entry");
                        if let Err(e) = self.cache.delete(&key).await {
                            warn!(key = %key, error = %e, "Failed to purge corrupt cache entry");
                        }
                        Err(ServiceError::CorruptCache { key, source })
                    }
                };
            }
            Ok(None) => metrics::record_cache(CacheResult::Miss),
            Err(e) => {
                metrics::record_cache(CacheResult::Miss);
                warn!(key = %key, error = %e, "Cache read failed, falling back to store");
            }
        }

        let user = self
            .store
            .get_user_by_id(id)
            .await?
            .ok_or(ServiceError::NotFound(id))?;

        match serde_json::to_string(&user) {
            Ok(blob) => {
                if let Err(e) = self.cache.set(&key, &blob, self.cache_ttl).await {
                    warn!(key = %key, error = %e, "Cache fill failed");
                }
            }
            Err(e) => warn!(key = %key, error = %e, "Cannot serialize user for cache"),
        }

        self.reveal(user)
    }

    /// One page of users plus the total match count. A row whose email cannot
    /// be decrypted is returned with an empty email.
    pub async fn list_users(
        &self,
        page: PaginationParams,
        filters: &[Filter],
    ) -> Result<(Vec<User>, u64), ServiceError> {
        let (mut users, total) = self.store.list_users(page, filters).await?;
        debug!(rows = users.len(), total, "Listed users");

        for user in &mut users {
            if let Err(e) = self.decrypt_email(user) {
                warn!(user_id = user.id, error = %e, "Redacting undecryptable email");
            }
        }
        Ok((users, total))
    }

    /// Replace the stored ciphertext with plaintext, or blank it on failure.
    fn decrypt_email(&self, user: &mut User) -> Result<(), CryptoError> {
        match self.encryptor.decrypt(&user.email) {
            Ok(email) => {
                user.email = email;
                Ok(())
            }
            Err(e) => {
                user.email.clear();
                Err(e)
            }
        }
    }

    fn reveal(&self, mut user: User) -> Result<User, ServiceError> {
        match self.decrypt_email(&mut user) {
            Ok(()) => Ok(user),
            Err(source) => Err(ServiceError::Decrypt {
                user: Box::new(user),
                source,
            }),
        }
    }
}
