//! Post repository
//!
//! Database operations for posts.
//!
//! This module provides:
//! - `PostRepository` trait defining the interface for post data access
//! - `SqlxPostRepository` implementing the trait for SQLite and MySQL
//!
//! `(locale, slug)` uniqueness is a table constraint; a duplicate insert or
//! update surfaces as an error for which
//! [`is_unique_violation`](super::is_unique_violation) holds.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{CreatePostInput, Post, PostStatus, UpdatePostInput};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

use super::{mysql, sqlite};

/// Post repository trait
#[async_trait]
pub trait PostRepository: Send + Sync {
    /// Insert a post under `slug` with pre-rendered HTML
    async fn create(&self, slug: &str, input: &CreatePostInput, body_html: &str) -> Result<Post>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Post>>;

    async fn get_by_locale_slug(&self, locale: &str, slug: &str) -> Result<Option<Post>>;

    /// List posts of every status, newest first
    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Post>>;

    async fn count(&self) -> Result<i64>;

    /// List published posts, optionally for one locale, by publication date
    async fn list_published(&self, locale: Option<&str>, offset: i64, limit: i64) -> Result<Vec<Post>>;

    async fn count_published(&self, locale: Option<&str>) -> Result<i64>;

    /// Apply the set fields of `input`; `body_html` accompanies a new body
    async fn update(&self, id: i64, input: &UpdatePostInput, body_html: Option<&str>) -> Result<Post>;

    async fn exists_by_locale_slug(&self, locale: &str, slug: &str) -> Result<bool>;

    /// Post counts grouped by status
    async fn count_by_status(&self) -> Result<Vec<(String, i64)>>;

    /// Post counts grouped by locale
    async fn count_by_locale(&self) -> Result<Vec<(String, i64)>>;
}

/// SQLx-based post repository implementation
pub struct SqlxPostRepository {
    pool: DynDatabasePool,
}

impl SqlxPostRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn PostRepository> {
        Arc::new(Self::new(pool))
    }
}

const POST_COLUMNS: &str = "id, slug, locale, title, body, body_html, cover_image, status, source_post_id, published_at, created_at, updated_at";

const INSERT_POST: &str = r#"
    INSERT INTO posts (slug, locale, title, body, body_html, cover_image, status, source_post_id, published_at, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const UPDATE_POST: &str = r#"
    UPDATE posts
    SET slug = ?, title = ?, body = ?, body_html = ?, cover_image = ?, status = ?, published_at = ?, updated_at = ?
    WHERE id = ?
"#;

fn select_by_id() -> String {
    format!("SELECT {} FROM posts WHERE id = ?", POST_COLUMNS)
}

fn select_by_locale_slug() -> String {
    format!("SELECT {} FROM posts WHERE locale = ? AND slug = ?", POST_COLUMNS)
}

fn select_all() -> String {
    format!(
        "SELECT {} FROM posts ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        POST_COLUMNS
    )
}

fn select_published() -> String {
    format!(
        "SELECT {} FROM posts WHERE status = 'published' AND (? IS NULL OR locale = ?) ORDER BY published_at DESC, id DESC LIMIT ? OFFSET ?",
        POST_COLUMNS
    )
}

const COUNT_PUBLISHED: &str =
    "SELECT COUNT(*) AS count FROM posts WHERE status = 'published' AND (? IS NULL OR locale = ?)";

/// Field values after applying an update on top of the stored post
struct MergedPost<'a> {
    slug: &'a str,
    title: &'a str,
    body: &'a str,
    body_html: &'a str,
    cover_image: Option<&'a str>,
    status: PostStatus,
    published_at: Option<DateTime<Utc>>,
}

fn merge_update<'a>(
    existing: &'a Post,
    input: &'a UpdatePostInput,
    body_html: Option<&'a str>,
    now: DateTime<Utc>,
) -> MergedPost<'a> {
    let status = input.status.unwrap_or(existing.status);
    // First publication stamps the date; later edits keep it.
    let published_at = match (status, existing.published_at) {
        (PostStatus::Published, None) => Some(now),
        (_, published_at) => published_at,
    };

    MergedPost {
        slug: input.slug.as_deref().unwrap_or(&existing.slug),
        title: input.title.as_deref().unwrap_or(&existing.title),
        body: input.body.as_deref().unwrap_or(&existing.body),
        body_html: body_html.unwrap_or(&existing.body_html),
        cover_image: input.cover_image.as_deref().or(existing.cover_image.as_deref()),
        status,
        published_at,
    }
}

fn new_post(id: i64, slug: &str, input: &CreatePostInput, body_html: &str, now: DateTime<Utc>) -> Post {
    let status = input.status.unwrap_or_default();
    Post {
        id,
        slug: slug.to_string(),
        locale: input.locale.clone(),
        title: input.title.clone(),
        body: input.body.clone(),
        body_html: body_html.to_string(),
        cover_image: input.cover_image.clone(),
        status,
        source_post_id: input.source_post_id,
        published_at: (status == PostStatus::Published).then_some(now),
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl PostRepository for SqlxPostRepository {
    async fn create(&self, slug: &str, input: &CreatePostInput, body_html: &str) -> Result<Post> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_post_sqlite(sqlite(&self.pool)?, slug, input, body_html).await,
            DatabaseDriver::Mysql => create_post_mysql(mysql(&self.pool)?, slug, input, body_html).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Post>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_post_by_id_sqlite(sqlite(&self.pool)?, id).await,
            DatabaseDriver::Mysql => get_post_by_id_mysql(mysql(&self.pool)?, id).await,
        }
    }

    async fn get_by_locale_slug(&self, locale: &str, slug: &str) -> Result<Option<Post>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(&select_by_locale_slug())
                    .bind(locale)
                    .bind(slug)
                    .fetch_optional(sqlite(&self.pool)?)
                    .await
                    .context("Failed to get post by slug")?;
                row.as_ref().map(row_to_post_sqlite).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(&select_by_locale_slug())
                    .bind(locale)
                    .bind(slug)
                    .fetch_optional(mysql(&self.pool)?)
                    .await
                    .context("Failed to get post by slug")?;
                row.as_ref().map(row_to_post_mysql).transpose()
            }
        }
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Post>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let rows = sqlx::query(&select_all())
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(sqlite(&self.pool)?)
                    .await
                    .context("Failed to list posts")?;
                rows.iter().map(row_to_post_sqlite).collect()
            }
            DatabaseDriver::Mysql => {
                let rows = sqlx::query(&select_all())
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(mysql(&self.pool)?)
                    .await
                    .context("Failed to list posts")?;
                rows.iter().map(row_to_post_mysql).collect()
            }
        }
    }

    async fn count(&self) -> Result<i64> {
        const SQL: &str = "SELECT COUNT(*) AS count FROM posts";
        let count = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(SQL)
                .fetch_one(sqlite(&self.pool)?)
                .await
                .context("Failed to count posts")?
                .get("count"),
            DatabaseDriver::Mysql => sqlx::query(SQL)
                .fetch_one(mysql(&self.pool)?)
                .await
                .context("Failed to count posts")?
                .get("count"),
        };
        Ok(count)
    }

    async fn list_published(&self, locale: Option<&str>, offset: i64, limit: i64) -> Result<Vec<Post>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let rows = sqlx::query(&select_published())
                    .bind(locale)
                    .bind(locale)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(sqlite(&self.pool)?)
                    .await
                    .context("Failed to list published posts")?;
                rows.iter().map(row_to_post_sqlite).collect()
            }
            DatabaseDriver::Mysql => {
                let rows = sqlx::query(&select_published())
                    .bind(locale)
                    .bind(locale)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(mysql(&self.pool)?)
                    .await
                    .context("Failed to list published posts")?;
                rows.iter().map(row_to_post_mysql).collect()
            }
        }
    }

    async fn count_published(&self, locale: Option<&str>) -> Result<i64> {
        let count = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(COUNT_PUBLISHED)
                .bind(locale)
                .bind(locale)
                .fetch_one(sqlite(&self.pool)?)
                .await
                .context("Failed to count published posts")?
                .get("count"),
            DatabaseDriver::Mysql => sqlx::query(COUNT_PUBLISHED)
                .bind(locale)
                .bind(locale)
                .fetch_one(mysql(&self.pool)?)
                .await
                .context("Failed to count published posts")?
                .get("count"),
        };
        Ok(count)
    }

    async fn update(&self, id: i64, input: &UpdatePostInput, body_html: Option<&str>) -> Result<Post> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => update_post_sqlite(sqlite(&self.pool)?, id, input, body_html).await,
            DatabaseDriver::Mysql => update_post_mysql(mysql(&self.pool)?, id, input, body_html).await,
        }
    }

    async fn exists_by_locale_slug(&self, locale: &str, slug: &str) -> Result<bool> {
        Ok(self.get_by_locale_slug(locale, slug).await?.is_some())
    }

    async fn count_by_status(&self) -> Result<Vec<(String, i64)>> {
        grouped_counts(&self.pool, "SELECT status AS k, COUNT(*) AS count FROM posts GROUP BY status ORDER BY status").await
    }

    async fn count_by_locale(&self) -> Result<Vec<(String, i64)>> {
        grouped_counts(&self.pool, "SELECT locale AS k, COUNT(*) AS count FROM posts GROUP BY locale ORDER BY locale").await
    }
}

/// Run a `SELECT k, count ... GROUP BY` query
pub(crate) async fn grouped_counts(pool: &DynDatabasePool, sql: &str) -> Result<Vec<(String, i64)>> {
    let counts = match pool.driver() {
        DatabaseDriver::Sqlite => sqlx::query(sql)
            .fetch_all(sqlite(pool)?)
            .await
            .context("Failed to run grouped count")?
            .iter()
            .map(|row| (row.get("k"), row.get("count")))
            .collect(),
        DatabaseDriver::Mysql => sqlx::query(sql)
            .fetch_all(mysql(pool)?)
            .await
            .context("Failed to run grouped count")?
            .iter()
            .map(|row| (row.get("k"), row.get("count")))
            .collect(),
    };
    Ok(counts)
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_post_sqlite(pool: &SqlitePool, slug: &str, input: &CreatePostInput, body_html: &str) -> Result<Post> {
    let now = Utc::now();
    let post = new_post(0, slug, input, body_html, now);

    let result = sqlx::query(INSERT_POST)
        .bind(&post.slug)
        .bind(&post.locale)
        .bind(&post.title)
        .bind(&post.body)
        .bind(&post.body_html)
        .bind(&post.cover_image)
        .bind(post.status.as_str())
        .bind(post.source_post_id)
        .bind(post.published_at)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create post")?;

    Ok(Post {
        id: result.last_insert_rowid(),
        ..post
    })
}

async fn get_post_by_id_sqlite(pool: &SqlitePool, id: i64) -> Result<Option<Post>> {
    let row = sqlx::query(&select_by_id())
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get post by ID")?;

    row.as_ref().map(row_to_post_sqlite).transpose()
}

async fn update_post_sqlite(
    pool: &SqlitePool,
    id: i64,
    input: &UpdatePostInput,
    body_html: Option<&str>,
) -> Result<Post> {
    let existing = get_post_by_id_sqlite(pool, id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Post not found"))?;

    let now = Utc::now();
    let merged = merge_update(&existing, input, body_html, now);

    sqlx::query(UPDATE_POST)
        .bind(merged.slug)
        .bind(merged.title)
        .bind(merged.body)
        .bind(merged.body_html)
        .bind(merged.cover_image)
        .bind(merged.status.as_str())
        .bind(merged.published_at)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update post")?;

    get_post_by_id_sqlite(pool, id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Post not found after update"))
}

fn row_to_post_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Post> {
    let status: String = row.get("status");
    let status = PostStatus::parse(&status)
        .ok_or_else(|| anyhow::anyhow!("Invalid post status: {}", status))?;

    Ok(Post {
        id: row.get("id"),
        slug: row.get("slug"),
        locale: row.get("locale"),
        title: row.get("title"),
        body: row.get("body"),
        body_html: row.get("body_html"),
        cover_image: row.get("cover_image"),
        status,
        source_post_id: row.get("source_post_id"),
        published_at: row.get("published_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_post_mysql(pool: &MySqlPool, slug: &str, input: &CreatePostInput, body_html: &str) -> Result<Post> {
    let now = Utc::now();
    let post = new_post(0, slug, input, body_html, now);

    let result = sqlx::query(INSERT_POST)
        .bind(&post.slug)
        .bind(&post.locale)
        .bind(&post.title)
        .bind(&post.body)
        .bind(&post.body_html)
        .bind(&post.cover_image)
        .bind(post.status.as_str())
        .bind(post.source_post_id)
        .bind(post.published_at)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create post")?;

    Ok(Post {
        id: result.last_insert_id() as i64,
        ..post
    })
}

async fn get_post_by_id_mysql(pool: &MySqlPool, id: i64) -> Result<Option<Post>> {
    let row = sqlx::query(&select_by_id())
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get post by ID")?;

    row.as_ref().map(row_to_post_mysql).transpose()
}

async fn update_post_mysql(
    pool: &MySqlPool,
    id: i64,
    input: &UpdatePostInput,
    body_html: Option<&str>,
) -> Result<Post> {
    let existing = get_post_by_id_mysql(pool, id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Post not found"))?;

    let now = Utc::now();
    let merged = merge_update(&existing, input, body_html, now);

    sqlx::query(UPDATE_POST)
        .bind(merged.slug)
        .bind(merged.title)
        .bind(merged.body)
        .bind(merged.body_html)
        .bind(merged.cover_image)
        .bind(merged.status.as_str())
        .bind(merged.published_at)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update post")?;

    get_post_by_id_mysql(pool, id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Post not found after update"))
}

fn row_to_post_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Post> {
    let status: String = row.get("status");
    let status = PostStatus::parse(&status)
        .ok_or_else(|| anyhow::anyhow!("Invalid post status: {}", status))?;

    Ok(Post {
        id: row.get("id"),
        slug: row.get("slug"),
        locale: row.get("locale"),
        title: row.get("title"),
        body: row.get("body"),
        body_html: row.get("body_html"),
        cover_image: row.get("cover_image"),
        status,
        source_post_id: row.get("source_post_id"),
        published_at: row.get("published_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::is_unique_violation;
    use crate::db::{create_test_pool, migrations};

    async fn setup_test_repo() -> SqlxPostRepository {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        SqlxPostRepository::new(pool)
    }

    fn input(locale: &str, title: &str) -> CreatePostInput {
        CreatePostInput::new(locale, title, format!("Body of {}", title))
    }

    #[tokio::test]
    async fn test_create_draft_post() {
        let repo = setup_test_repo().await;

        let post = repo
            .create("hello", &input("zh", "Hello"), "<p>Body of Hello</p>")
            .await
            .expect("Failed to create post");

        assert!(post.id > 0);
        assert_eq!(post.slug, "hello");
        assert_eq!(post.status, PostStatus::Draft);
        assert!(post.published_at.is_none());

        let fetched = repo.get_by_id(post.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "Hello");
        assert_eq!(fetched.body_html, "<p>Body of Hello</p>");
    }

    #[tokio::test]
    async fn test_create_published_post_sets_published_at() {
        let repo = setup_test_repo().await;

        let post = repo
            .create("live", &input("en", "Live").with_status(PostStatus::Published), "")
            .await
            .unwrap();

        assert_eq!(post.status, PostStatus::Published);
        assert!(post.published_at.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_slug_in_same_locale_is_unique_violation() {
        let repo = setup_test_repo().await;

        repo.create("same", &input("en", "One"), "").await.unwrap();
        repo.create("same", &input("zh", "Two"), "").await.unwrap();
        let err = repo.create("same", &input("en", "Three"), "").await.unwrap_err();

        assert!(is_unique_violation(&err));
        assert!(repo.exists_by_locale_slug("en", "same").await.unwrap());
        assert!(!repo.exists_by_locale_slug("fr", "same").await.unwrap());
    }

    #[tokio::test]
    async fn test_update_publishes_and_keeps_unset_fields() {
        let repo = setup_test_repo().await;
        let post = repo.create("draft", &input("en", "Draft"), "<p>old</p>").await.unwrap();

        let update = UpdatePostInput {
            title: Some("Renamed".to_string()),
            status: Some(PostStatus::Published),
            ..Default::default()
        };
        let updated = repo.update(post.id, &update, None).await.unwrap();

        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.body, post.body);
        assert_eq!(updated.body_html, "<p>old</p>");
        assert_eq!(updated.status, PostStatus::Published);
        assert!(updated.published_at.is_some());

        let archived = repo
            .update(post.id, &UpdatePostInput { status: Some(PostStatus::Archived), ..Default::default() }, None)
            .await
            .unwrap();
        assert_eq!(archived.status, PostStatus::Archived);
        assert_eq!(archived.published_at, updated.published_at);
    }

    #[tokio::test]
    async fn test_list_published_filters_by_locale() {
        let repo = setup_test_repo().await;
        repo.create("a", &input("en", "A").with_status(PostStatus::Published), "").await.unwrap();
        repo.create("b", &input("zh", "B").with_status(PostStatus::Published), "").await.unwrap();
        repo.create("c", &input("en", "C"), "").await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 3);
        assert_eq!(repo.count_published(None).await.unwrap(), 2);
        assert_eq!(repo.count_published(Some("en")).await.unwrap(), 1);

        let en = repo.list_published(Some("en"), 0, 10).await.unwrap();
        assert_eq!(en.len(), 1);
        assert_eq!(en[0].slug, "a");

        let all = repo.list(0, 10).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_grouped_counts() {
        let repo = setup_test_repo().await;
        repo.create("a", &input("en", "A").with_status(PostStatus::Published), "").await.unwrap();
        repo.create("b", &input("en", "B"), "").await.unwrap();
        repo.create("c", &input("zh", "C"), "").await.unwrap();

        let by_status = repo.count_by_status().await.unwrap();
        assert_eq!(by_status, vec![("draft".to_string(), 2), ("published".to_string(), 1)]);

        let by_locale = repo.count_by_locale().await.unwrap();
        assert_eq!(by_locale, vec![("en".to_string(), 2), ("zh".to_string(), 1)]);
    }
}
