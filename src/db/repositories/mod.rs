//! Database repositories
//!
//! One repository per entity. Each exposes an async trait used by the
//! services and a `Sqlx*Repository` implementation that dispatches to the
//! SQLite or MySQL query functions.

pub mod landing_page;
pub mod post;
pub mod subscriber;
pub mod translation;

pub use landing_page::{LandingPageRepository, SqlxLandingPageRepository};
pub use post::{PostRepository, SqlxPostRepository};
pub use subscriber::{SqlxSubscriberRepository, SubscriberRepository};
pub use translation::{SqlxTranslationRepository, TranslationRepository};

use anyhow::{Context, Result};
use sqlx::{MySqlPool, SqlitePool};

use crate::db::DynDatabasePool;

/// Whether an error returned by a repository is a unique-constraint violation.
///
/// Works through `anyhow` context layers.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .is_some_and(|e| e.is_unique_violation())
}

pub(crate) fn sqlite(pool: &DynDatabasePool) -> Result<&SqlitePool> {
    pool.as_sqlite().context("Database pool is not SQLite")
}

pub(crate) fn mysql(pool: &DynDatabasePool) -> Result<&MySqlPool> {
    pool.as_mysql().context("Database pool is not MySQL")
}

/// The repositories the services are built from
#[derive(Clone)]
pub struct Repositories {
    pub posts: std::sync::Arc<dyn PostRepository>,
    pub translations: std::sync::Arc<dyn TranslationRepository>,
    pub subscribers: std::sync::Arc<dyn SubscriberRepository>,
    pub landing_pages: std::sync::Arc<dyn LandingPageRepository>,
}

impl Repositories {
    /// SQLx repositories over one pool
    pub fn sqlx(pool: DynDatabasePool) -> Self {
        Self {
            posts: SqlxPostRepository::boxed(pool.clone()),
            translations: SqlxTranslationRepository::boxed(pool.clone()),
            subscribers: SqlxSubscriberRepository::boxed(pool.clone()),
            landing_pages: SqlxLandingPageRepository::boxed(pool),
        }
    }
}
