//! Landing page repository

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{LandingPage, NewLandingPage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::sync::Arc;

use super::{mysql, sqlite};

/// Landing page repository trait
#[async_trait]
pub trait LandingPageRepository: Send + Sync {
    async fn create(&self, page: &NewLandingPage) -> Result<LandingPage>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<LandingPage>>;

    async fn exists_by_slug(&self, slug: &str) -> Result<bool>;

    /// Newest first, optionally restricted to one niche
    async fn list(&self, niche: Option<&str>, limit: i64) -> Result<Vec<LandingPage>>;

    async fn count(&self) -> Result<i64>;
}

/// SQLx-based landing page repository implementation
pub struct SqlxLandingPageRepository {
    pool: DynDatabasePool,
}

impl SqlxLandingPageRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn LandingPageRepository> {
        Arc::new(Self::new(pool))
    }
}

const PAGE_COLUMNS: &str =
    "id, slug, niche, topic, title, meta_description, body, body_html, created_at";

const INSERT_PAGE: &str = r#"
    INSERT INTO landing_pages (slug, niche, topic, title, meta_description, body, body_html, created_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
"#;

#[async_trait]
impl LandingPageRepository for SqlxLandingPageRepository {
    async fn create(&self, page: &NewLandingPage) -> Result<LandingPage> {
        let now = Utc::now();

        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(INSERT_PAGE)
                .bind(&page.slug)
                .bind(&page.niche)
                .bind(&page.topic)
                .bind(&page.title)
                .bind(&page.meta_description)
                .bind(&page.body)
                .bind(&page.body_html)
                .bind(now)
                .execute(sqlite(&self.pool)?)
                .await
                .context("Failed to create landing page")?
                .last_insert_rowid(),
            DatabaseDriver::Mysql => sqlx::query(INSERT_PAGE)
                .bind(&page.slug)
                .bind(&page.niche)
                .bind(&page.topic)
                .bind(&page.title)
                .bind(&page.meta_description)
                .bind(&page.body)
                .bind(&page.body_html)
                .bind(now)
                .execute(mysql(&self.pool)?)
                .await
                .context("Failed to create landing page")?
                .last_insert_id() as i64,
        };

        Ok(LandingPage {
            id,
            slug: page.slug.clone(),
            niche: page.niche.clone(),
            topic: page.topic.clone(),
            title: page.title.clone(),
            meta_description: page.meta_description.clone(),
            body: page.body.clone(),
            body_html: page.body_html.clone(),
            created_at: now,
        })
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<LandingPage>> {
        let sql = format!("SELECT {} FROM landing_pages WHERE slug = ?", PAGE_COLUMNS);
        let page = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(slug)
                .fetch_optional(sqlite(&self.pool)?)
                .await
                .context("Failed to get landing page")?
                .as_ref()
                .map(row_to_page_sqlite),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(slug)
                .fetch_optional(mysql(&self.pool)?)
                .await
                .context("Failed to get landing page")?
                .as_ref()
                .map(row_to_page_mysql),
        };
        Ok(page)
    }

    async fn exists_by_slug(&self, slug: &str) -> Result<bool> {
        Ok(self.get_by_slug(slug).await?.is_some())
    }

    async fn list(&self, niche: Option<&str>, limit: i64) -> Result<Vec<LandingPage>> {
        let sql = format!(
            "SELECT {} FROM landing_pages WHERE (? IS NULL OR niche = ?) ORDER BY created_at DESC, id DESC LIMIT ?",
            PAGE_COLUMNS
        );
        let pages = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(niche)
                .bind(niche)
                .bind(limit)
                .fetch_all(sqlite(&self.pool)?)
                .await
                .context("Failed to list landing pages")?
                .iter()
                .map(row_to_page_sqlite)
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(niche)
                .bind(niche)
                .bind(limit)
                .fetch_all(mysql(&self.pool)?)
                .await
                .context("Failed to list landing pages")?
                .iter()
                .map(row_to_page_mysql)
                .collect(),
        };
        Ok(pages)
    }

    async fn count(&self) -> Result<i64> {
        const SQL: &str = "SELECT COUNT(*) AS count FROM landing_pages";
        let count = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(SQL)
                .fetch_one(sqlite(&self.pool)?)
                .await
                .context("Failed to count landing pages")?
                .get("count"),
            DatabaseDriver::Mysql => sqlx::query(SQL)
                .fetch_one(mysql(&self.pool)?)
                .await
                .context("Failed to count landing pages")?
                .get("count"),
        };
        Ok(count)
    }
}

fn row_to_page_sqlite(row: &sqlx::sqlite::SqliteRow) -> LandingPage {
    LandingPage {
        id: row.get("id"),
        slug: row.get("slug"),
        niche: row.get("niche"),
        topic: row.get("topic"),
        title: row.get("title"),
        meta_description: row.get("meta_description"),
        body: row.get("body"),
        body_html: row.get("body_html"),
        created_at: row.get("created_at"),
    }
}

fn row_to_page_mysql(row: &sqlx::mysql::MySqlRow) -> LandingPage {
    LandingPage {
        id: row.get("id"),
        slug: row.get("slug"),
        niche: row.get("niche"),
        topic: row.get("topic"),
        title: row.get("title"),
        meta_description: row.get("meta_description"),
        body: row.get("body"),
        body_html: row.get("body_html"),
        created_at: row.get("created_at"),
    }
}
