//! Newsletter subscriber repository
//!
//! Email uniqueness is a table constraint; addresses are stored
//! lower-cased by the caller.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{Subscriber, SubscriberStats};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::sync::Arc;

use super::{mysql, sqlite};

/// Subscriber repository trait
#[async_trait]
pub trait SubscriberRepository: Send + Sync {
    /// Insert an unverified subscriber
    async fn create(&self, email: &str, token: &str, now: DateTime<Utc>) -> Result<Subscriber>;

    async fn get_by_email(&self, email: &str) -> Result<Option<Subscriber>>;

    async fn get_by_token(&self, token: &str) -> Result<Option<Subscriber>>;

    /// Reset an unsubscribed row to a fresh, unverified subscription
    async fn reactivate(&self, id: i64, token: &str, now: DateTime<Utc>) -> Result<()>;

    async fn mark_verified(&self, id: i64, now: DateTime<Utc>) -> Result<()>;

    async fn mark_unsubscribed(&self, id: i64, now: DateTime<Utc>) -> Result<()>;

    /// All subscribers, newest first
    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Subscriber>>;

    async fn count(&self) -> Result<i64>;

    /// Verified subscribers who have not unsubscribed
    async fn list_recipients(&self) -> Result<Vec<Subscriber>>;

    async fn stats(&self) -> Result<SubscriberStats>;
}

/// SQLx-based subscriber repository implementation
pub struct SqlxSubscriberRepository {
    pool: DynDatabasePool,
}

impl SqlxSubscriberRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SubscriberRepository> {
        Arc::new(Self::new(pool))
    }

    async fn fetch_optional(&self, sql: &str, value: &str) -> Result<Option<Subscriber>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(sql)
                    .bind(value)
                    .fetch_optional(sqlite(&self.pool)?)
                    .await
                    .context("Failed to get subscriber")?;
                Ok(row.as_ref().map(row_to_subscriber_sqlite))
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(sql)
                    .bind(value)
                    .fetch_optional(mysql(&self.pool)?)
                    .await
                    .context("Failed to get subscriber")?;
                Ok(row.as_ref().map(row_to_subscriber_mysql))
            }
        }
    }

    async fn execute(&self, sql: &str, first: Option<&str>, now: DateTime<Utc>, id: i64) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let mut query = sqlx::query(sql);
                if let Some(first) = first {
                    query = query.bind(first);
                }
                query
                    .bind(now)
                    .bind(id)
                    .execute(sqlite(&self.pool)?)
                    .await
                    .context("Failed to update subscriber")?;
            }
            DatabaseDriver::Mysql => {
                let mut query = sqlx::query(sql);
                if let Some(first) = first {
                    query = query.bind(first);
                }
                query
                    .bind(now)
                    .bind(id)
                    .execute(mysql(&self.pool)?)
                    .await
                    .context("Failed to update subscriber")?;
            }
        }
        Ok(())
    }
}

const SUBSCRIBER_COLUMNS: &str =
    "id, email, token, verified, subscribed_at, verified_at, unsubscribed_at";

#[async_trait]
impl SubscriberRepository for SqlxSubscriberRepository {
    async fn create(&self, email: &str, token: &str, now: DateTime<Utc>) -> Result<Subscriber> {
        const SQL: &str = "INSERT INTO subscribers (email, token, verified, subscribed_at) VALUES (?, ?, ?, ?)";

        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(SQL)
                .bind(email)
                .bind(token)
                .bind(false)
                .bind(now)
                .execute(sqlite(&self.pool)?)
                .await
                .context("Failed to create subscriber")?
                .last_insert_rowid(),
            DatabaseDriver::Mysql => sqlx::query(SQL)
                .bind(email)
                .bind(token)
                .bind(false)
                .bind(now)
                .execute(mysql(&self.pool)?)
                .await
                .context("Failed to create subscriber")?
                .last_insert_id() as i64,
        };

        Ok(Subscriber {
            id,
            email: email.to_string(),
            verified: false,
            token: token.to_string(),
            subscribed_at: now,
            verified_at: None,
            unsubscribed_at: None,
        })
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<Subscriber>> {
        let sql = format!("SELECT {} FROM subscribers WHERE email = ?", SUBSCRIBER_COLUMNS);
        self.fetch_optional(&sql, email).await
    }

    async fn get_by_token(&self, token: &str) -> Result<Option<Subscriber>> {
        let sql = format!("SELECT {} FROM subscribers WHERE token = ?", SUBSCRIBER_COLUMNS);
        self.fetch_optional(&sql, token).await
    }

    async fn reactivate(&self, id: i64, token: &str, now: DateTime<Utc>) -> Result<()> {
        self.execute(
            "UPDATE subscribers SET token = ?, verified = 0, verified_at = NULL, unsubscribed_at = NULL, subscribed_at = ? WHERE id = ?",
            Some(token),
            now,
            id,
        )
        .await
    }

    async fn mark_verified(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        self.execute(
            "UPDATE subscribers SET verified = 1, verified_at = ? WHERE id = ?",
            None,
            now,
            id,
        )
        .await
    }

    async fn mark_unsubscribed(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        self.execute(
            "UPDATE subscribers SET unsubscribed_at = ? WHERE id = ?",
            None,
            now,
            id,
        )
        .await
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Subscriber>> {
        let sql = format!(
            "SELECT {} FROM subscribers ORDER BY subscribed_at DESC, id DESC LIMIT ? OFFSET ?",
            SUBSCRIBER_COLUMNS
        );
        let subscribers = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(limit)
                .bind(offset)
                .fetch_all(sqlite(&self.pool)?)
                .await
                .context("Failed to list subscribers")?
                .iter()
                .map(row_to_subscriber_sqlite)
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(limit)
                .bind(offset)
                .fetch_all(mysql(&self.pool)?)
                .await
                .context("Failed to list subscribers")?
                .iter()
                .map(row_to_subscriber_mysql)
                .collect(),
        };
        Ok(subscribers)
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.stats().await?.total)
    }

    async fn list_recipients(&self) -> Result<Vec<Subscriber>> {
        let sql = format!(
            "SELECT {} FROM subscribers WHERE verified = 1 AND unsubscribed_at IS NULL ORDER BY id",
            SUBSCRIBER_COLUMNS
        );
        let subscribers = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .fetch_all(sqlite(&self.pool)?)
                .await
                .context("Failed to list newsletter recipients")?
                .iter()
                .map(row_to_subscriber_sqlite)
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .fetch_all(mysql(&self.pool)?)
                .await
                .context("Failed to list newsletter recipients")?
                .iter()
                .map(row_to_subscriber_mysql)
                .collect(),
        };
        Ok(subscribers)
    }

    async fn stats(&self) -> Result<SubscriberStats> {
        // SUM over an empty table is NULL, hence COALESCE.
        const SQL: &str = r#"
            SELECT COUNT(*) AS total,
                   CAST(COALESCE(SUM(CASE WHEN verified = 1 AND unsubscribed_at IS NULL THEN 1 ELSE 0 END), 0) AS SIGNED) AS verified,
                   CAST(COALESCE(SUM(CASE WHEN unsubscribed_at IS NOT NULL THEN 1 ELSE 0 END), 0) AS SIGNED) AS unsubscribed
            FROM subscribers
        "#;
        const SQL_SQLITE: &str = r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(CASE WHEN verified = 1 AND unsubscribed_at IS NULL THEN 1 ELSE 0 END), 0) AS verified,
                   COALESCE(SUM(CASE WHEN unsubscribed_at IS NOT NULL THEN 1 ELSE 0 END), 0) AS unsubscribed
            FROM subscribers
        "#;

        let stats = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(SQL_SQLITE)
                    .fetch_one(sqlite(&self.pool)?)
                    .await
                    .context("Failed to count subscribers")?;
                SubscriberStats {
                    total: row.get("total"),
                    verified: row.get("verified"),
                    unsubscribed: row.get("unsubscribed"),
                }
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(SQL)
                    .fetch_one(mysql(&self.pool)?)
                    .await
                    .context("Failed to count subscribers")?;
                SubscriberStats {
                    total: row.get("total"),
                    verified: row.get("verified"),
                    unsubscribed: row.get("unsubscribed"),
                }
            }
        };
        Ok(stats)
    }
}

fn row_to_subscriber_sqlite(row: &sqlx::sqlite::SqliteRow) -> Subscriber {
    Subscriber {
        id: row.get("id"),
        email: row.get("email"),
        verified: row.get("verified"),
        token: row.get("token"),
        subscribed_at: row.get("subscribed_at"),
        verified_at: row.get("verified_at"),
        unsubscribed_at: row.get("unsubscribed_at"),
    }
}

fn row_to_subscriber_mysql(row: &sqlx::mysql::MySqlRow) -> Subscriber {
    Subscriber {
        id: row.get("id"),
        email: row.get("email"),
        verified: row.get("verified"),
        token: row.get("token"),
        subscribed_at: row.get("subscribed_at"),
        verified_at: row.get("verified_at"),
        unsubscribed_at: row.get("unsubscribed_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::is_unique_violation;
    use crate::db::{create_test_pool, migrations};

    async fn setup_test_repo() -> SqlxSubscriberRepository {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        SqlxSubscriberRepository::new(pool)
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let repo = setup_test_repo().await;
        let now = Utc::now();

        let created = repo.create("reader@example.com", "tok-1", now).await.unwrap();
        assert!(!created.verified);

        let by_email = repo.get_by_email("reader@example.com").await.unwrap().unwrap();
        assert_eq!(by_email.id, created.id);
        let by_token = repo.get_by_token("tok-1").await.unwrap().unwrap();
        assert_eq!(by_token.email, "reader@example.com");
        assert!(repo.get_by_token("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_is_unique_violation() {
        let repo = setup_test_repo().await;
        let now = Utc::now();

        repo.create("dup@example.com", "t1", now).await.unwrap();
        let err = repo.create("dup@example.com", "t2", now).await.unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[tokio::test]
    async fn test_lifecycle_and_stats() {
        let repo = setup_test_repo().await;
        let now = Utc::now();

        let a = repo.create("a@example.com", "ta", now).await.unwrap();
        let b = repo.create("b@example.com", "tb", now).await.unwrap();
        repo.create("c@example.com", "tc", now).await.unwrap();

        repo.mark_verified(a.id, now).await.unwrap();
        repo.mark_verified(b.id, now).await.unwrap();
        repo.mark_unsubscribed(b.id, now).await.unwrap();

        let recipients = repo.list_recipients().await.unwrap();
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].email, "a@example.com");

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats, SubscriberStats { total: 3, verified: 1, unsubscribed: 1 });

        repo.reactivate(b.id, "tb2", now).await.unwrap();
        let b = repo.get_by_token("tb2").await.unwrap().unwrap();
        assert!(!b.verified);
        assert!(b.unsubscribed_at.is_none());
        assert_eq!(repo.list(0, 10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_stats_on_empty_table() {
        let repo = setup_test_repo().await;
        assert_eq!(repo.stats().await.unwrap(), SubscriberStats::default());
        assert_eq!(repo.count().await.unwrap(), 0);
    }
}
