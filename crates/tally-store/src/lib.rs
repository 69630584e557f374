//! Storage concerns of the analytics agent
//!
//! Three pieces share the SQLite backing store:
//!
//! - [`SchemaProvider`] builds the per-request [`tally_core::SchemaContext`]
//!   from live introspection (fail closed, never stale-partial).
//! - [`ScopedExecutor`] runs accepted SQL inside the household-scoped CTE on
//!   a read-only pool with a statement timeout.
//! - [`AuditLog`] persists one row per question and one per attempt,
//!   synchronously with each pipeline transition.
//!
//! Nothing here acquires a write transaction against product data; the only
//! writes are to the audit tables.

pub mod audit;
pub mod exec;
pub mod schema;

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

pub use audit::AuditLog;
pub use exec::{ExecFailure, ScopedExecutor};
pub use schema::SchemaProvider;

/// The single relation generated SQL may reference. The executor defines it
/// as a household-filtered CTE over the base tables.
pub const SCOPED_VIEW: &str = "household_expenses";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Introspection failed or came back empty; the request must not
    /// proceed on a guessed schema.
    #[error("schema introspection unavailable: {0}")]
    SchemaUnavailable(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt audit record: {0}")]
    Corrupt(String),
}

/// Writable pool: audit tables plus (in the full product) expense CRUD.
pub async fn open_pool(path: &Path) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Read-only pool for the executor. Opening read-only means even a bug that
/// slipped past validation cannot mutate anything.
pub async fn open_read_pool(path: &Path) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Parse a connection string instead of a path (`sqlite::memory:` in dev).
pub async fn open_pool_from_url(url: &str) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    Ok(pool)
}
