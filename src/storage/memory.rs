//! In-process cache and user store.
//!
//! Used by the test suites and for running the pipelines without external
//! services. Both are safe to share across workers.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{CacheStore, StorageError, UserStore};
use crate::entity::User;
use crate::filter::{Filter, FilterOperator, SortOrder, SqlParam};
use crate::pagination::PaginationParams;

struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

pub struct InMemoryCache {
    data: DashMap<String, CacheEntry>,
}

impl InMemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Number of entries, expired ones included until they are next read.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        // remove_if keeps the expiry check and the removal atomic
        if self.data.remove_if(key, |_, e| e.is_expired()).is_some() {
            return Ok(None);
        }
        Ok(self.data.get(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        self.data.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.data.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }
}

/// User store backed by a concurrent map with an id sequence starting at 1.
pub struct InMemoryUserStore {
    rows: DashMap<i64, User>,
    next_id: AtomicI64,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl InMemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            next_id: AtomicI64::new(1),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
        }
    }

    /// Make every subsequent `create_user` fail (simulates an outage).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent read and `ping` fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self) -> Result<(), StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("read rejected: store unavailable".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Snapshot of all rows ordered by id.
    pub fn all(&self) -> Vec<User> {
        let mut users: Vec<User> = self.rows.iter().map(|r| r.value().clone()).collect();
        users.sort_by_key(|u| u.id);
        users
    }

    fn column(user: &User, field: &str) -> Option<SqlParam> {
        match field {
            "id" => Some(SqlParam::Int(user.id)),
            "email" => Some(SqlParam::Text(user.email.clone())),
            "firstname" => Some(SqlParam::Text(user.first_name.clone())),
            "lastname" => Some(SqlParam::Text(user.last_name.clone())),
            "parent_user_id" => user.parent_user_id.map(SqlParam::Int),
            _ => None,
        }
    }

    fn compare(a: &SqlParam, b: &SqlParam) -> Option<CmpOrdering> {
        match (a, b) {
            (SqlParam::Int(x), SqlParam::Int(y)) => Some(x.cmp(y)),
            (SqlParam::Text(x), SqlParam::Text(y)) => Some(x.cmp(y)),
            _ => None,
        }
    }

    fn matches(user: &User, filter: &Filter) -> bool {
        let Filter::Condition { field, operator, value } = filter else {
            return true;
        };
        // like SQL, comparisons against NULL or unknown columns are false
        let Some(column) = Self::column(user, field) else {
            return false;
        };
        if *operator == FilterOperator::Like {
            return match (&column, value) {
                (SqlParam::Text(c), SqlParam::Text(v)) => c.contains(v.as_str()),
                _ => false,
            };
        }
        let Some(ord) = Self::compare(&column, value) else {
            return false;
        };
        match operator {
            FilterOperator::Eq => ord == CmpOrdering::Equal,
            FilterOperator::Neq => ord != CmpOrdering::Equal,
            FilterOperator::Gte => ord != CmpOrdering::Less,
            FilterOperator::Lte => ord != CmpOrdering::Greater,
            FilterOperator::Gt => ord == CmpOrdering::Greater,
            FilterOperator::Lt => ord == CmpOrdering::Less,
            FilterOperator::Like => false,
        }
    }
}

impl Default for InMemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn create_user(&self, user: &User) -> Result<i64, StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("write rejected: store unavailable".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.rows.insert(id, User { id, ..user.clone() });
        Ok(id)
    }

    async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, StorageError> {
        self.check_reads()?;
        Ok(self.rows.get(&id).map(|r| r.value().clone()))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        self.check_reads()?;
        Ok(self
            .all()
            .into_iter()
            .find(|u| u.email == email))
    }

    async fn list_users(
        &self,
        page: PaginationParams,
        filters: &[Filter],
    ) -> Result<(Vec<User>, u64), StorageError> {
        self.check_reads()?;
        let mut users: Vec<User> = self
            .all()
            .into_iter()
            .filter(|u| filters.iter().all(|f| Self::matches(u, f)))
            .collect();
        let total = users.len() as u64;

        // later sort filters are lower-priority tiebreakers, as in ORDER BY a, b
        for filter in filters.iter().rev() {
            if let Filter::Sort { field, order } = filter {
                users.sort_by(|a, b| {
                    let ord = match (Self::column(a, field), Self::column(b, field)) {
                        (Some(x), Some(y)) => Self::compare(&x, &y).unwrap_or(CmpOrdering::Equal),
                        _ => CmpOrdering::Equal,
                    };
                    match order {
                        SortOrder::Asc => ord,
                        SortOrder::Desc => ord.reverse(),
                    }
                });
            }
        }

        let page = users
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.check_reads()
    }
}
