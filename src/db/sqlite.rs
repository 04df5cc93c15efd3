//! SQLite adapter.
//!
//! SQLite has no server-side statement timeout. Instead a progress handler is
//! installed once per connection; SQLite calls it every [`PROGRESS_OPS`]
//! virtual-machine instructions, and it interrupts the running statement once
//! the current deadline has passed. The deadline is armed by
//! [`DeadlineGuard`] right before each statement and cleared when the guard
//! drops, so a later call never inherits a stale deadline.

use super::SqlBackend;
use super::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{ColumnInfo, EngineKind, InstanceConfig, Row};
use futures_util::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Executor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// VM instructions between progress-handler calls.
pub const PROGRESS_OPS: i32 = 1000;

const LIST_TABLES_SQL: &str = "SELECT name FROM sqlite_master \
     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name";

const DESCRIBE_TABLE_SQL: &str = "SELECT name, type FROM pragma_table_info(?1) ORDER BY cid";

/// Deadline shared between the connection's progress handler and callers.
#[derive(Debug, Default)]
struct DeadlineState {
    deadline: std::sync::Mutex<Option<Instant>>,
    tripped: AtomicBool,
}

impl DeadlineState {
    /// Progress-handler body: `false` interrupts the running statement.
    fn should_continue(&self) -> bool {
        let deadline = *self
            .deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match deadline {
            Some(at) if Instant::now() >= at => {
                self.tripped.store(true, Ordering::SeqCst);
                false
            }
            _ => true,
        }
    }

    fn was_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }
}

/// Arms the deadline on creation and clears it on drop.
struct DeadlineGuard<'a> {
    state: &'a DeadlineState,
}

impl<'a> DeadlineGuard<'a> {
    fn arm(state: &'a DeadlineState, timeout: Option<Duration>) -> Self {
        state.tripped.store(false, Ordering::SeqCst);
        *state
            .deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = timeout.map(|t| Instant::now() + t);
        Self { state }
    }
}

impl Drop for DeadlineGuard<'_> {
    fn drop(&mut self) {
        *self
            .state
            .deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

pub struct SqliteBackend {
    conn: Mutex<SqliteConnection>,
    deadline: Arc<DeadlineState>,
    statement_timeout: Option<Duration>,
    timeout_ms: u64,
}

impl SqliteBackend {
    /// Open the database file; never creates it.
    pub async fn connect(config: &InstanceConfig) -> DbResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(&config.sqlite_path)
            .read_only(config.read_only)
            .busy_timeout(config.query_timeout());

        let mut conn = tokio::time::timeout(config.query_timeout(), options.connect())
            .await
            .map_err(|_| {
                DbError::connection(
                    format!(
                        "Timed out opening SQLite database '{}'",
                        config.sqlite_path
                    ),
                    "Check that the file is not locked by another process",
                )
            })?
            .map_err(|e| {
                DbError::connection(
                    format!(
                        "Failed to open SQLite database '{}': {}",
                        config.sqlite_path, e
                    ),
                    "Check SQLITE_PATH and file permissions",
                )
            })?;

        let deadline = Arc::new(DeadlineState::default());
        let statement_timeout = config.statement_timeout();
        if statement_timeout.is_some() {
            let state = Arc::clone(&deadline);
            let mut handle = conn.lock_handle().await?;
            handle.set_progress_handler(PROGRESS_OPS, move || state.should_continue());
        }

        debug!(path = %config.sqlite_path, read_only = config.read_only, "SQLite connection opened");

        Ok(Self {
            conn: Mutex::new(conn),
            deadline,
            statement_timeout,
            timeout_ms: statement_timeout.map_or(0, |t| t.as_millis() as u64),
        })
    }

    fn map_error(&self, err: sqlx::Error) -> DbError {
        if self.deadline.was_tripped() {
            warn!(timeout_ms = self.timeout_ms, "SQLite statement interrupted");
            return DbError::timeout(
                format!(
                    "interrupted: statement exceeded the {}ms timeout",
                    self.timeout_ms
                ),
                self.timeout_ms,
            );
        }
        err.into()
    }
}

impl SqlBackend for SqliteBackend {
    fn engine(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    async fn execute(&self, sql: &str) -> DbResult<Vec<Row>> {
        let mut conn = self.conn.lock().await;
        let guard = DeadlineGuard::arm(&self.deadline, self.statement_timeout);
        let result = (&mut *conn)
            .fetch(sql)
            .map_ok(|row| row.to_json_row())
            .try_collect::<Vec<Row>>()
            .await;
        drop(guard);
        result.map_err(|e| self.map_error(e))
    }

    async fn list_tables(&self) -> DbResult<Vec<String>> {
        let mut conn = self.conn.lock().await;
        let guard = DeadlineGuard::arm(&self.deadline, self.statement_timeout);
        let result = sqlx::query_scalar::<_, String>(LIST_TABLES_SQL)
            .fetch_all(&mut *conn)
            .await;
        drop(guard);
        result.map_err(|e| self.map_error(e))
    }

    async fn describe_table(&self, table: &str) -> DbResult<Vec<ColumnInfo>> {
        let mut conn = self.conn.lock().await;
        let guard = DeadlineGuard::arm(&self.deadline, self.statement_timeout);
        let result = sqlx::query_as::<_, (String, String)>(DESCRIBE_TABLE_SQL)
            .bind(table)
            .fetch_all(&mut *conn)
            .await;
        drop(guard);
        let columns = result.map_err(|e| self.map_error(e))?;
        Ok(columns
            .into_iter()
            .map(|(column_name, data_type)| ColumnInfo {
                column_name,
                data_type,
            })
            .collect())
    }
}
