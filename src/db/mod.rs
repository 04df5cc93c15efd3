//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - One adapter per engine behind the [`SqlBackend`] trait
//! - The [`BackendClient`] enum and its dispatch macro
//! - The lazily-connecting [`InstanceRegistry`]
//! - Row to JSON type mappings

pub mod client;
#[macro_use]
pub mod macros;
pub mod mssql;
pub mod mysql;
pub mod postgres;
pub mod registry;
pub mod sqlite;
pub mod types;

pub use client::BackendClient;
pub use mssql::MsSqlBackend;
pub use mysql::MySqlBackend;
pub use postgres::PostgresBackend;
pub use registry::{ExecutionContext, InstanceRegistry};
pub use sqlite::SqliteBackend;

use crate::error::{DbError, DbResult};
use crate::models::{ColumnInfo, EngineKind, InstanceConfig, Row};
use std::future::Future;
use std::time::Duration;

/// A live connection to one database instance.
///
/// Implementations serialize statements on their connection; callers may
/// share one backend across tasks.
pub trait SqlBackend: Send + Sync {
    fn engine(&self) -> EngineKind;

    /// Run raw SQL text and return every row it produced.
    fn execute(&self, sql: &str) -> impl Future<Output = DbResult<Vec<Row>>> + Send;

    /// Base tables visible in the current database or schema, sorted.
    fn list_tables(&self) -> impl Future<Output = DbResult<Vec<String>>> + Send;

    /// Column names and declared types in ordinal order. Empty when the
    /// table does not exist.
    fn describe_table(&self, table: &str)
    -> impl Future<Output = DbResult<Vec<ColumnInfo>>> + Send;
}

/// Bound a connection attempt by the instance's connect budget.
pub(crate) async fn connect_within<T, F>(config: &InstanceConfig, fut: F) -> DbResult<T>
where
    F: Future<Output = DbResult<T>>,
{
    let budget = config.query_timeout();
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(DbError::connection(
            format!(
                "Timed out connecting to {} at {}:{} after {}s",
                config.engine.display_name(),
                config.host.as_deref().unwrap_or_default(),
                config.resolved_port(),
                budget.as_secs()
            ),
            "Check that the server is reachable and DB_QUERY_TIMEOUT is large enough",
        )),
    }
}

/// Attach the configured budget to a timeout classified from an engine error.
pub(crate) fn with_timeout_budget(err: DbError, timeout: Option<Duration>) -> DbError {
    match err {
        DbError::Timeout { message, .. } => DbError::Timeout {
            message,
            timeout_ms: timeout.map_or(0, |t| t.as_millis() as u64),
        },
        other => other,
    }
}
