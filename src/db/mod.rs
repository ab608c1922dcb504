//! Database layer
//!
//! SQLite is the default backend (single-file deployment); MySQL is
//! supported for larger installs. The driver is chosen from configuration
//! and hidden behind the [`DatabasePool`] trait.
//!
//! # Usage
//!
//! ```ignore
//! use quillpress::config::DatabaseConfig;
//! use quillpress::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, MysqlDatabase, SqliteDatabase,
};
