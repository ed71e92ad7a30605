//! PostgreSQL backend.
//!
//! One [`PgStore`] implements every storage trait over a shared `PgPool`.
//! Search SQL is rendered by [`search`]; the per-area repositories live in
//! sibling modules and share the row mappers in [`rows`].

mod catalogue;
mod concepts;
mod ontology;
mod phenotypes;
pub mod rows;
pub mod search;

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::query::{Query, QueryScalar};
use sqlx::{Postgres, Row};

use crate::config::DatabaseConfig;
use crate::db::traits::{AuditStore, HealthCheck, SessionStore};
use crate::models::{RequestEvent, SessionRecord, User};
use crate::Result;

pub use search::BindValue;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Open a pool. Every connection carries the configured
    /// `statement_timeout`.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = PgConnectOptions::from_str(&config.url)?.options([(
            "statement_timeout",
            format!("{}s", config.statement_timeout_seconds),
        )]);
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect_with(options)
            .await?;
        tracing::info!(
            max_connections = config.max_connections,
            "Connected to PostgreSQL"
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Database migrations applied");
        Ok(())
    }
}

/// Bind rendered values onto a query in placeholder order.
pub(crate) fn bind_all<'q>(
    mut query_builder: Query<'q, Postgres, PgArguments>,
    values: &'q [BindValue],
) -> Query<'q, Postgres, PgArguments> {
    for value in values {
        query_builder = match value {
            BindValue::Text(v) => query_builder.bind(v),
            BindValue::BigInt(v) => query_builder.bind(v),
            BindValue::BigIntArray(v) => query_builder.bind(v),
            BindValue::Int(v) => query_builder.bind(v),
            BindValue::SmallIntArray(v) => query_builder.bind(v),
            BindValue::Float(v) => query_builder.bind(v),
            BindValue::Date(v) => query_builder.bind(v),
        };
    }
    query_builder
}

pub(crate) fn bind_all_scalar<'q>(
    mut count_query: QueryScalar<'q, Postgres, i64, PgArguments>,
    values: &'q [BindValue],
) -> QueryScalar<'q, Postgres, i64, PgArguments> {
    for value in values {
        count_query = match value {
            BindValue::Text(v) => count_query.bind(v),
            BindValue::BigInt(v) => count_query.bind(v),
            BindValue::BigIntArray(v) => count_query.bind(v),
            BindValue::Int(v) => count_query.bind(v),
            BindValue::SmallIntArray(v) => count_query.bind(v),
            BindValue::Float(v) => count_query.bind(v),
            BindValue::Date(v) => count_query.bind(v),
        };
    }
    count_query
}

/// `SET LOCAL statement_timeout` for the current transaction.
pub(crate) fn statement_timeout_sql(timeout: Duration) -> String {
    format!(
        "SET LOCAL statement_timeout = {}",
        timeout.as_millis().max(1)
    )
}

#[async_trait]
impl SessionStore for PgStore {
    async fn create_session(&self, session: SessionRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO sessions (key_hash, user_id, created, last_request)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&session.key_hash)
        .bind(session.user_id)
        .bind(session.created)
        .bind(session.last_request)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_session(&self, key_hash: &str) -> Result<Option<SessionRecord>> {
        let row = sqlx::query(
            "SELECT key_hash, user_id, created, last_request FROM sessions WHERE key_hash = $1",
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(rows::session))
    }

    async fn touch_session(&self, key_hash: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE sessions SET last_request = $2 WHERE key_hash = $1")
            .bind(key_hash)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_session(&self, key_hash: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE key_hash = $1")
            .bind(key_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT u.id, u.username, u.email, u.is_superuser, u.is_moderator,
                    ARRAY(SELECT g.group_id FROM group_members g
                          WHERE g.user_id = u.id ORDER BY g.group_id) AS groups,
                    ARRAY(SELECT b.brand_id FROM brand_admins b
                          WHERE b.user_id = u.id ORDER BY b.brand_id) AS brand_admin_of
             FROM users u
             WHERE u.id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| User {
            id: row.get("id"),
            username: row.get("username"),
            email: row.get("email"),
            is_superuser: row.get("is_superuser"),
            is_moderator: row.get("is_moderator"),
            groups: row.get("groups"),
            brand_admin_of: row.get("brand_admin_of"),
        }))
    }
}

#[async_trait]
impl AuditStore for PgStore {
    async fn record_request(&self, event: RequestEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO request_events
                 (url, method, query_string, user_id, remote_ip, brand, recorded_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&event.url)
        .bind(&event.method)
        .bind(&event.query_string)
        .bind(event.user_id)
        .bind(&event.remote_ip)
        .bind(&event.brand)
        .bind(event.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl HealthCheck for PgStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_timeout_is_in_milliseconds() {
        assert_eq!(
            statement_timeout_sql(Duration::from_secs(5)),
            "SET LOCAL statement_timeout = 5000"
        );
        assert_eq!(
            statement_timeout_sql(Duration::ZERO),
            "SET LOCAL statement_timeout = 1"
        );
    }
}
