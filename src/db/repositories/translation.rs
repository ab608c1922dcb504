//! Translation record repository
//!
//! Every state transition is a single conditional statement:
//! - inserting a pending record is a conditional insert against the
//!   pending-slot unique index: a second insert for the same (post, locale)
//!   affects no rows instead of raising an error;
//! - completing or failing updates only rows still in `pending` and reports
//!   whether a row matched.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{TranslationRecord, TranslationStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::sync::Arc;

use super::post::grouped_counts;
use super::{mysql, sqlite};

/// Translation record repository trait
#[async_trait]
pub trait TranslationRepository: Send + Sync {
    /// Insert a pending record. Returns `None` when a pending record already
    /// exists for the pair.
    async fn create_pending(
        &self,
        source_post_id: i64,
        target_locale: &str,
        requested_at: DateTime<Utc>,
    ) -> Result<Option<TranslationRecord>>;

    async fn get_by_id(&self, id: i64) -> Result<Option<TranslationRecord>>;

    /// Move a pending record to `completed`. Returns false if no pending
    /// record with this id exists.
    async fn mark_completed(&self, id: i64, result_post_id: i64, now: DateTime<Utc>) -> Result<bool>;

    /// Move a pending record to `failed`. Returns false if no pending record
    /// with this id exists.
    async fn mark_failed(&self, id: i64, reason: &str, now: DateTime<Utc>) -> Result<bool>;

    /// All records for a post, newest first
    async fn list_by_post(&self, source_post_id: i64) -> Result<Vec<TranslationRecord>>;

    /// Records for one (post, locale) pair, newest first
    async fn list_by_post_locale(&self, source_post_id: i64, target_locale: &str) -> Result<Vec<TranslationRecord>>;

    /// Fail every pending record requested before `cutoff`; returns the
    /// number of records failed.
    async fn fail_pending_before(&self, cutoff: DateTime<Utc>, reason: &str, now: DateTime<Utc>) -> Result<u64>;

    /// Record counts grouped by status
    async fn count_by_status(&self) -> Result<Vec<(String, i64)>>;
}

/// SQLx-based translation record repository
pub struct SqlxTranslationRepository {
    pool: DynDatabasePool,
}

impl SqlxTranslationRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn TranslationRepository> {
        Arc::new(Self::new(pool))
    }

    async fn fetch_all(&self, sql: &str, post_id: i64, locale: Option<&str>) -> Result<Vec<TranslationRecord>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let mut query = sqlx::query(sql).bind(post_id);
                if let Some(locale) = locale {
                    query = query.bind(locale);
                }
                let rows = query
                    .fetch_all(sqlite(&self.pool)?)
                    .await
                    .context("Failed to list translation records")?;
                rows.iter().map(row_to_record_sqlite).collect()
            }
            DatabaseDriver::Mysql => {
                let mut query = sqlx::query(sql).bind(post_id);
                if let Some(locale) = locale {
                    query = query.bind(locale);
                }
                let rows = query
                    .fetch_all(mysql(&self.pool)?)
                    .await
                    .context("Failed to list translation records")?;
                rows.iter().map(row_to_record_mysql).collect()
            }
        }
    }
}

const RECORD_COLUMNS: &str =
    "id, source_post_id, target_locale, status, result_post_id, failure_reason, requested_at, updated_at";

const INSERT_PENDING_SQLITE: &str = r#"
    INSERT INTO translations (source_post_id, target_locale, status, pending_slot, requested_at, updated_at)
    VALUES (?, ?, 'pending', 1, ?, ?)
    ON CONFLICT DO NOTHING
"#;

// sqlx connects with CLIENT_FOUND_ROWS, under which `ON DUPLICATE KEY UPDATE`
// reports a skipped duplicate as one affected row. IGNORE reports zero.
const INSERT_PENDING_MYSQL: &str = r#"
    INSERT IGNORE INTO translations (source_post_id, target_locale, status, pending_slot, requested_at, updated_at)
    VALUES (?, ?, 'pending', 1, ?, ?)
"#;

const MARK_COMPLETED: &str = r#"
    UPDATE translations
    SET status = 'completed', pending_slot = NULL, result_post_id = ?, updated_at = ?
    WHERE id = ? AND status = 'pending'
"#;

const MARK_FAILED: &str = r#"
    UPDATE translations
    SET status = 'failed', pending_slot = NULL, failure_reason = ?, updated_at = ?
    WHERE id = ? AND status = 'pending'
"#;

const FAIL_PENDING_BEFORE: &str = r#"
    UPDATE translations
    SET status = 'failed', pending_slot = NULL, failure_reason = ?, updated_at = ?
    WHERE status = 'pending' AND requested_at < ?
"#;

#[async_trait]
impl TranslationRepository for SqlxTranslationRepository {
    async fn create_pending(
        &self,
        source_post_id: i64,
        target_locale: &str,
        requested_at: DateTime<Utc>,
    ) -> Result<Option<TranslationRecord>> {
        let (inserted, id) = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let done = sqlx::query(INSERT_PENDING_SQLITE)
                    .bind(source_post_id)
                    .bind(target_locale)
                    .bind(requested_at)
                    .bind(requested_at)
                    .execute(sqlite(&self.pool)?)
                    .await
                    .context("Failed to create translation record")?;
                (done.rows_affected(), done.last_insert_rowid())
            }
            DatabaseDriver::Mysql => {
                let done = sqlx::query(INSERT_PENDING_MYSQL)
                    .bind(source_post_id)
                    .bind(target_locale)
                    .bind(requested_at)
                    .bind(requested_at)
                    .execute(mysql(&self.pool)?)
                    .await
                    .context("Failed to create translation record")?;
                (done.rows_affected(), done.last_insert_id() as i64)
            }
        };

        if inserted == 0 {
            return Ok(None);
        }

        Ok(Some(TranslationRecord {
            id,
            source_post_id,
            target_locale: target_locale.to_string(),
            status: TranslationStatus::Pending,
            result_post_id: None,
            failure_reason: None,
            requested_at,
            updated_at: requested_at,
        }))
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<TranslationRecord>> {
        let sql = format!("SELECT {} FROM translations WHERE id = ?", RECORD_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(sqlite(&self.pool)?)
                    .await
                    .context("Failed to get translation record")?;
                row.as_ref().map(row_to_record_sqlite).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(mysql(&self.pool)?)
                    .await
                    .context("Failed to get translation record")?;
                row.as_ref().map(row_to_record_mysql).transpose()
            }
        }
    }

    async fn mark_completed(&self, id: i64, result_post_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(MARK_COMPLETED)
                .bind(result_post_id)
                .bind(now)
                .bind(id)
                .execute(sqlite(&self.pool)?)
                .await
                .context("Failed to complete translation record")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(MARK_COMPLETED)
                .bind(result_post_id)
                .bind(now)
                .bind(id)
                .execute(mysql(&self.pool)?)
                .await
                .context("Failed to complete translation record")?
                .rows_affected(),
        };
        Ok(affected > 0)
    }

    async fn mark_failed(&self, id: i64, reason: &str, now: DateTime<Utc>) -> Result<bool> {
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(MARK_FAILED)
                .bind(reason)
                .bind(now)
                .bind(id)
                .execute(sqlite(&self.pool)?)
                .await
                .context("Failed to fail translation record")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(MARK_FAILED)
                .bind(reason)
                .bind(now)
                .bind(id)
                .execute(mysql(&self.pool)?)
                .await
                .context("Failed to fail translation record")?
                .rows_affected(),
        };
        Ok(affected > 0)
    }

    async fn list_by_post(&self, source_post_id: i64) -> Result<Vec<TranslationRecord>> {
        let sql = format!(
            "SELECT {} FROM translations WHERE source_post_id = ? ORDER BY requested_at DESC, id DESC",
            RECORD_COLUMNS
        );
        self.fetch_all(&sql, source_post_id, None).await
    }

    async fn list_by_post_locale(&self, source_post_id: i64, target_locale: &str) -> Result<Vec<TranslationRecord>> {
        let sql = format!(
            "SELECT {} FROM translations WHERE source_post_id = ? AND target_locale = ? ORDER BY requested_at DESC, id DESC",
            RECORD_COLUMNS
        );
        self.fetch_all(&sql, source_post_id, Some(target_locale)).await
    }

    async fn fail_pending_before(&self, cutoff: DateTime<Utc>, reason: &str, now: DateTime<Utc>) -> Result<u64> {
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(FAIL_PENDING_BEFORE)
                .bind(reason)
                .bind(now)
                .bind(cutoff)
                .execute(sqlite(&self.pool)?)
                .await
                .context("Failed to sweep stale translation records")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(FAIL_PENDING_BEFORE)
                .bind(reason)
                .bind(now)
                .bind(cutoff)
                .execute(mysql(&self.pool)?)
                .await
                .context("Failed to sweep stale translation records")?
                .rows_affected(),
        };
        Ok(affected)
    }

    async fn count_by_status(&self) -> Result<Vec<(String, i64)>> {
        grouped_counts(
            &self.pool,
            "SELECT status AS k, COUNT(*) AS count FROM translations GROUP BY status ORDER BY status",
        )
        .await
    }
}

fn parse_status(status: String) -> Result<TranslationStatus> {
    TranslationStatus::parse(&status)
        .ok_or_else(|| anyhow::anyhow!("Invalid translation status: {}", status))
}

fn row_to_record_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<TranslationRecord> {
    Ok(TranslationRecord {
        id: row.get("id"),
        source_post_id: row.get("source_post_id"),
        target_locale: row.get("target_locale"),
        status: parse_status(row.get("status"))?,
        result_post_id: row.get("result_post_id"),
        failure_reason: row.get("failure_reason"),
        requested_at: row.get("requested_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_record_mysql(row: &sqlx::mysql::MySqlRow) -> Result<TranslationRecord> {
    Ok(TranslationRecord {
        id: row.get("id"),
        source_post_id: row.get("source_post_id"),
        target_locale: row.get("target_locale"),
        status: parse_status(row.get("status"))?,
        result_post_id: row.get("result_post_id"),
        failure_reason: row.get("failure_reason"),
        requested_at: row.get("requested_at"),
        updated_at: row.get("updated_at"),
    })
}
