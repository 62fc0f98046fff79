// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Postgres user store.
//!
//! ```sql
//! CREATE TABLE users (
//!   id BIGSERIAL PRIMARY KEY,
//!   email TEXT NOT NULL,          -- base64(iv || AES-CFB ciphertext)
//!   firstname TEXT NOT NULL,
//!   lastname TEXT NOT NULL,
//!   parent_user_id BIGINT,
//!   created_at TIMESTAMPTZ,
//!   deleted_at TIMESTAMPTZ,
//!   merged_at TIMESTAMPTZ
//! )
//! ```
//!
//! Listing queries are built by [`SelectQuery`] and rebound to `$n`
//! placeholders; the page and its total count run concurrently.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

use super::traits::{StorageError, UserStore};
use crate::entity::User;
use crate::filter::{rebind_dollar, Filter, SelectQuery, SqlParam};
use crate::pagination::PaginationParams;
use crate::resilience::retry::{retry, RetryConfig};

const USER_COLUMNS: &str =
    "id, email, firstname, lastname, parent_user_id, created_at, deleted_at, merged_at";

const PING_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqlUserStore {
    pool: PgPool,
}

impl SqlUserStore {
    /// Connect with startup-mode retry, verify the connection and create the
    /// table if it does not exist.
    pub async fn connect(
        connection_string: &str,
        max_connections: u32,
    ) -> Result<Self, StorageError> {
        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            PgPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        let store = Self { pool };
        store.ping().await?;
        store.init_schema().await?;
        info!(max_connections, "Connected to Postgres");
        Ok(store)
    }

    /// Wrap an existing pool. The schema is assumed to exist.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let sql = r#"
            CREATE TABLE IF NOT EXISTS users (
                id BIGSERIAL PRIMARY KEY,
                email TEXT NOT NULL,
                firstname TEXT NOT NULL DEFAULT '',
                lastname TEXT NOT NULL DEFAULT '',
                parent_user_id BIGINT,
                created_at TIMESTAMPTZ,
                deleted_at TIMESTAMPTZ,
                merged_at TIMESTAMPTZ
            )
        "#;

        retry("sql_init_schema", &RetryConfig::startup(), || async {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        Ok(())
    }
}

fn bind_params<'q, O>(
    mut query: sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments>,
    params: &[SqlParam],
) -> sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments> {
    for param in params {
        query = match param {
            SqlParam::Int(n) => query.bind(*n),
            SqlParam::Text(s) => query.bind(s.clone()),
        };
    }
    query
}

#[async_trait]
impl UserStore for SqlUserStore {
    async fn create_user(&self, user: &User) -> Result<i64, StorageError> {
        // single attempt: a retry after a lost reply would insert twice
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO users \
             (email, firstname, lastname, parent_user_id, created_at, deleted_at, merged_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
        )
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.parent_user_id)
        .bind(user.created_at)
        .bind(user.deleted_at)
        .bind(user.merged_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(id)
    }

    async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, StorageError> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);

        retry("sql_get_user_by_id", &RetryConfig::query(), || async {
            sqlx::query_as::<_, User>(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        let sql = format!("SELECT {} FROM users WHERE email = $1 LIMIT 1", USER_COLUMNS);

        retry("sql_get_user_by_email", &RetryConfig::query(), || async {
            sqlx::query_as::<_, User>(&sql)
                .bind(email)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await
    }

    #[tracing::instrument(skip(self, filters))]
    async fn list_users(
        &self,
        page: PaginationParams,
        filters: &[Filter],
    ) -> Result<(Vec<User>, u64), StorageError> {
        let (rows_sql, rows_params) = SelectQuery::new(USER_COLUMNS, "users")
            .apply_filters(filters, false)
            .limit(page.limit)
            .offset(page.offset)
            .to_sql();
        let (count_sql, count_params) = SelectQuery::new("COUNT(*)", "users")
            .apply_filters(filters, true)
            .to_sql();
        let rows_sql = rebind_dollar(&rows_sql);
        let count_sql = rebind_dollar(&count_sql);
        debug!(sql = %rows_sql, params = ?rows_params, "Listing users");

        retry("sql_list_users", &RetryConfig::query(), || async {
            let rows = bind_params(sqlx::query_as::<_, User>(&rows_sql), &rows_params)
                .fetch_all(&self.pool);
            let count = bind_params(sqlx::query_as::<_, (i64,)>(&count_sql), &count_params)
                .fetch_one(&self.pool);

            let (users, (total,)) = tokio::try_join!(rows, count)
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            Ok((users, total.max(0) as u64))
        })
        .await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        tokio::time::timeout(PING_TIMEOUT, sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .map_err(|_| StorageError::Timeout {
                operation: "sql_ping",
                timeout: PING_TIMEOUT,
            })?
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }
}
