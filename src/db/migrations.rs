//! Database migrations
//!
//! Migrations are embedded in the binary as SQL strings, one variant per
//! backend, and applied in version order at startup. Applied versions are
//! recorded in `_migrations`.

use anyhow::{Context, Result};
use sqlx::Row;

use super::DynDatabasePool;
use crate::config::DatabaseDriver;

/// A database migration with SQL for both SQLite and MySQL
#[derive(Debug, Clone)]
pub struct Migration {
    /// Migration version number (must be unique and sequential)
    pub version: i32,
    /// Human-readable migration name
    pub name: &'static str,
    /// SQL statements for SQLite
    pub up_sqlite: &'static str,
    /// SQL statements for MySQL
    pub up_mysql: &'static str,
}

/// All migrations, in application order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_posts",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                slug VARCHAR(255) NOT NULL,
                locale VARCHAR(16) NOT NULL,
                title VARCHAR(255) NOT NULL,
                body TEXT NOT NULL,
                body_html TEXT NOT NULL,
                cover_image VARCHAR(500),
                status VARCHAR(20) NOT NULL DEFAULT 'draft',
                source_post_id INTEGER,
                published_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (locale, slug),
                FOREIGN KEY (source_post_id) REFERENCES posts(id) ON DELETE SET NULL
            );
            CREATE INDEX IF NOT EXISTS idx_posts_status ON posts(status);
            CREATE INDEX IF NOT EXISTS idx_posts_published_at ON posts(published_at);
            CREATE INDEX IF NOT EXISTS idx_posts_source_post_id ON posts(source_post_id);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS posts (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                slug VARCHAR(255) NOT NULL,
                locale VARCHAR(16) NOT NULL,
                title VARCHAR(255) NOT NULL,
                body MEDIUMTEXT NOT NULL,
                body_html MEDIUMTEXT NOT NULL,
                cover_image VARCHAR(500),
                status VARCHAR(20) NOT NULL DEFAULT 'draft',
                source_post_id BIGINT NULL,
                published_at TIMESTAMP NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
                UNIQUE KEY uk_posts_locale_slug (locale, slug),
                FOREIGN KEY (source_post_id) REFERENCES posts(id) ON DELETE SET NULL
            );
            CREATE INDEX idx_posts_status ON posts(status);
            CREATE INDEX idx_posts_published_at ON posts(published_at);
        "#,
    },
    // `pending_slot` is 1 while a record is pending and NULL once terminal.
    // NULLs never collide in a unique index, so the index admits at most one
    // pending record per (post, locale) and any number of terminal ones.
    Migration {
        version: 2,
        name: "create_translations",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS translations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_post_id INTEGER NOT NULL,
                target_locale VARCHAR(16) NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                pending_slot INTEGER DEFAULT 1,
                result_post_id INTEGER,
                failure_reason TEXT,
                requested_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (source_post_id, target_locale, pending_slot),
                CHECK ((status = 'pending' AND pending_slot = 1) OR (status <> 'pending' AND pending_slot IS NULL)),
                FOREIGN KEY (source_post_id) REFERENCES posts(id) ON DELETE CASCADE,
                FOREIGN KEY (result_post_id) REFERENCES posts(id) ON DELETE SET NULL
            );
            CREATE INDEX IF NOT EXISTS idx_translations_source ON translations(source_post_id);
            CREATE INDEX IF NOT EXISTS idx_translations_status ON translations(status, requested_at);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS translations (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                source_post_id BIGINT NOT NULL,
                target_locale VARCHAR(16) NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                pending_slot TINYINT NULL DEFAULT 1,
                result_post_id BIGINT NULL,
                failure_reason TEXT,
                requested_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE KEY uk_translations_pending (source_post_id, target_locale, pending_slot),
                CHECK ((status = 'pending' AND pending_slot = 1) OR (status <> 'pending' AND pending_slot IS NULL)),
                FOREIGN KEY (source_post_id) REFERENCES posts(id) ON DELETE CASCADE,
                FOREIGN KEY (result_post_id) REFERENCES posts(id) ON DELETE SET NULL
            );
            CREATE INDEX idx_translations_status ON translations(status, requested_at);
        "#,
    },
    Migration {
        version: 3,
        name: "create_subscribers",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS subscribers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email VARCHAR(255) NOT NULL UNIQUE,
                token VARCHAR(64) NOT NULL UNIQUE,
                verified INTEGER NOT NULL DEFAULT 0,
                subscribed_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                verified_at TIMESTAMP,
                unsubscribed_at TIMESTAMP
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS subscribers (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                email VARCHAR(255) NOT NULL UNIQUE,
                token VARCHAR(64) NOT NULL UNIQUE,
                verified TINYINT NOT NULL DEFAULT 0,
                subscribed_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                verified_at TIMESTAMP NULL,
                unsubscribed_at TIMESTAMP NULL
            );
        "#,
    },
    Migration {
        version: 4,
        name: "create_landing_pages",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS landing_pages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                slug VARCHAR(255) NOT NULL UNIQUE,
                niche VARCHAR(100) NOT NULL,
                topic VARCHAR(255) NOT NULL,
                title VARCHAR(255) NOT NULL,
                meta_description VARCHAR(500) NOT NULL,
                body TEXT NOT NULL,
                body_html TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_landing_pages_niche ON landing_pages(niche);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS landing_pages (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                slug VARCHAR(255) NOT NULL UNIQUE,
                niche VARCHAR(100) NOT NULL,
                topic VARCHAR(255) NOT NULL,
                title VARCHAR(255) NOT NULL,
                meta_description VARCHAR(500) NOT NULL,
                body MEDIUMTEXT NOT NULL,
                body_html MEDIUMTEXT NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX idx_landing_pages_niche ON landing_pages(niche);
        "#,
    },
];

/// Run all pending migrations, returning how many were applied.
pub async fn run_migrations(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied = applied_versions(pool).await?;
    let mut count = 0;

    for migration in MIGRATIONS {
        if applied.contains(&migration.version) {
            continue;
        }
        tracing::info!("Applying migration {}: {}", migration.version, migration.name);
        apply_migration(pool, migration)
            .await
            .with_context(|| format!("Failed to apply migration: {}", migration.name))?;
        count += 1;
    }

    if count > 0 {
        tracing::info!("Applied {} migration(s)", count);
    } else {
        tracing::debug!("No pending migrations");
    }

    Ok(count)
}

async fn create_migrations_table(pool: &DynDatabasePool) -> Result<()> {
    let sql = match pool.driver() {
        DatabaseDriver::Sqlite => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        }
        DatabaseDriver::Mysql => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INT PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        }
    };

    pool.execute(sql).await?;
    Ok(())
}

async fn applied_versions(pool: &DynDatabasePool) -> Result<Vec<i32>> {
    const SQL: &str = "SELECT version FROM _migrations ORDER BY version";

    let versions = match (pool.as_sqlite(), pool.as_mysql()) {
        (Some(sqlite), _) => sqlx::query(SQL)
            .fetch_all(sqlite)
            .await?
            .iter()
            .map(|row| row.get::<i64, _>("version") as i32)
            .collect(),
        (None, Some(mysql)) => sqlx::query(SQL)
            .fetch_all(mysql)
            .await?
            .iter()
            .map(|row| row.get::<i32, _>("version"))
            .collect(),
        (None, None) => anyhow::bail!("Database pool exposes no backend"),
    };

    Ok(versions)
}

async fn apply_migration(pool: &DynDatabasePool, migration: &Migration) -> Result<()> {
    let sql = match pool.driver() {
        DatabaseDriver::Sqlite => migration.up_sqlite,
        DatabaseDriver::Mysql => migration.up_mysql,
    };

    for statement in split_sql_statements(sql) {
        pool.execute(statement)
            .await
            .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
    }

    // Name and version are compile-time constants, never user input.
    pool.execute(&format!(
        "INSERT INTO _migrations (version, name) VALUES ({}, '{}')",
        migration.version, migration.name
    ))
    .await?;

    Ok(())
}

fn truncate_sql(sql: &str) -> String {
    match sql.char_indices().nth(100) {
        Some((idx, _)) => format!("{}...", &sql[..idx]),
        None => sql.to_string(),
    }
}

/// Split SQL into individual statements, skipping comment-only fragments.
///
/// Statements here never contain string literals with `;`.
fn split_sql_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty() && !is_comment_only(stmt))
        .collect()
}

fn is_comment_only(s: &str) -> bool {
    s.lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}

/// Count migrations not yet applied
pub async fn pending_count(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;
    let applied = applied_versions(pool).await?;
    Ok(MIGRATIONS
        .iter()
        .filter(|m| !applied.contains(&m.version))
        .count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use chrono::Utc;

    async fn migrated_pool() -> DynDatabasePool {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");
        pool
    }

    async fn insert_post(pool: &DynDatabasePool, slug: &str, locale: &str) -> i64 {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO posts (slug, locale, title, body, body_html, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(slug)
        .bind(locale)
        .bind("Title")
        .bind("Body")
        .bind("<p>Body</p>")
        .bind(now)
        .bind(now)
        .execute(pool.as_sqlite().unwrap())
        .await
        .expect("Failed to insert post");
        result.last_insert_rowid()
    }

    #[tokio::test]
    async fn test_run_migrations_is_idempotent() {
        let pool = create_test_pool().await.expect("Failed to create test pool");

        let count = run_migrations(&pool).await.expect("Failed to run migrations");
        assert_eq!(count, MIGRATIONS.len());

        let count = run_migrations(&pool).await.expect("Failed to run migrations");
        assert_eq!(count, 0);
        assert_eq!(pending_count(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pending_count_before_migrating() {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        assert_eq!(pending_count(&pool).await.unwrap(), MIGRATIONS.len());
    }

    #[tokio::test]
    async fn test_post_slug_unique_per_locale() {
        let pool = migrated_pool().await;

        insert_post(&pool, "hello", "zh").await;
        insert_post(&pool, "hello", "en").await;

        let now = Utc::now();
        let duplicate = sqlx::query(
            "INSERT INTO posts (slug, locale, title, body, body_html, created_at, updated_at) VALUES ('hello', 'en', 't', 'b', 'h', ?, ?)",
        )
        .bind(now)
        .bind(now)
        .execute(pool.as_sqlite().unwrap())
        .await;

        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn test_single_pending_translation_per_locale() {
        let pool = migrated_pool().await;
        let sqlite = pool.as_sqlite().unwrap();
        let post_id = insert_post(&pool, "p1", "zh").await;

        let insert = "INSERT INTO translations (source_post_id, target_locale, status, pending_slot) VALUES (?, 'en', 'pending', 1)";
        sqlx::query(insert).bind(post_id).execute(sqlite).await.unwrap();
        assert!(sqlx::query(insert).bind(post_id).execute(sqlite).await.is_err());

        // Once terminal, the slot frees up and history is kept.
        sqlx::query("UPDATE translations SET status = 'failed', pending_slot = NULL")
            .execute(sqlite)
            .await
            .unwrap();
        sqlx::query(insert).bind(post_id).execute(sqlite).await.unwrap();

        let row = sqlx::query("SELECT COUNT(*) AS n FROM translations")
            .fetch_one(sqlite)
            .await
            .unwrap();
        assert_eq!(row.get::<i64, _>("n"), 2);
    }

    #[tokio::test]
    async fn test_pending_slot_must_match_status() {
        let pool = migrated_pool().await;
        let post_id = insert_post(&pool, "p1", "zh").await;

        let result = sqlx::query(
            "INSERT INTO translations (source_post_id, target_locale, status, pending_slot) VALUES (?, 'en', 'completed', 1)",
        )
        .bind(post_id)
        .execute(pool.as_sqlite().unwrap())
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_subscriber_email_unique() {
        let pool = migrated_pool().await;
        let sqlite = pool.as_sqlite().unwrap();

        let insert = "INSERT INTO subscribers (email, token) VALUES ('a@example.com', ?)";
        sqlx::query(insert).bind("t1").execute(sqlite).await.unwrap();
        assert!(sqlx::query(insert).bind("t2").execute(sqlite).await.is_err());
    }

    #[test]
    fn test_split_sql_statements() {
        let statements = split_sql_statements("CREATE TABLE a (id INT); CREATE TABLE b (id INT);");
        assert_eq!(statements.len(), 2);

        let statements = split_sql_statements("-- Comment\nCREATE TABLE a (id INT);\n-- trailing");
        assert_eq!(statements.len(), 1);
    }

    #[test]
    fn test_is_comment_only() {
        assert!(is_comment_only("-- This is a comment"));
        assert!(is_comment_only("-- Line 1\n-- Line 2"));
        assert!(!is_comment_only("CREATE TABLE test"));
        assert!(!is_comment_only("-- Comment\nCREATE TABLE test"));
    }

    #[test]
    fn test_migration_versions_are_sequential() {
        for (idx, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.version as usize, idx + 1);
        }
    }
}
