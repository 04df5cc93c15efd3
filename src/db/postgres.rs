//! PostgreSQL adapter.
//!
//! The statement timeout is enforced server-side through the session's
//! `statement_timeout`, set once after connecting. A fired timeout surfaces as
//! SQLSTATE 57014 and is classified as [`DbError::Timeout`].

use super::types::RowToJson;
use super::{SqlBackend, connect_within, with_timeout_budget};
use crate::error::{DbError, DbResult};
use crate::models::{ColumnInfo, EngineKind, InstanceConfig, Row};
use futures_util::TryStreamExt;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Executor};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

const LIST_TABLES_SQL: &str = "SELECT table_name::text FROM information_schema.tables \
     WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' \
     ORDER BY table_name";

const DESCRIBE_TABLE_SQL: &str = "SELECT column_name::text, data_type::text \
     FROM information_schema.columns \
     WHERE table_schema = current_schema() AND table_name = $1 \
     ORDER BY ordinal_position";

/// Session setting applied right after connecting; `None` when disabled.
pub fn statement_timeout_sql(config: &InstanceConfig) -> Option<String> {
    (config.statement_timeout_ms > 0)
        .then(|| format!("SET statement_timeout = {}", config.statement_timeout_ms))
}

pub struct PostgresBackend {
    conn: Mutex<PgConnection>,
    statement_timeout: Option<Duration>,
}

impl PostgresBackend {
    pub async fn connect(config: &InstanceConfig) -> DbResult<Self> {
        let mut options = PgConnectOptions::new()
            .host(config.host.as_deref().unwrap_or_default())
            .port(config.resolved_port())
            .username(config.user.as_deref().unwrap_or_default())
            .password(config.password.as_deref().unwrap_or_default())
            .application_name("sql-mcp-server");
        if let Some(database) = config.database.as_deref() {
            options = options.database(database);
        }

        let mut conn = connect_within(config, async {
            PgConnection::connect_with(&options).await.map_err(|e| {
                DbError::connection(
                    e.to_string(),
                    "Check DB_HOST, DB_PORT, DB_USER and DB_PASSWORD",
                )
            })
        })
        .await?;

        if let Some(set_timeout) = statement_timeout_sql(config) {
            (&mut conn).execute(set_timeout.as_str()).await?;
        }
        debug!(
            host = config.host.as_deref().unwrap_or_default(),
            database = config.database.as_deref().unwrap_or_default(),
            "PostgreSQL session ready"
        );

        Ok(Self {
            conn: Mutex::new(conn),
            statement_timeout: config.statement_timeout(),
        })
    }
}

impl SqlBackend for PostgresBackend {
    fn engine(&self) -> EngineKind {
        EngineKind::Postgres
    }

    async fn execute(&self, sql: &str) -> DbResult<Vec<Row>> {
        let mut conn = self.conn.lock().await;
        (&mut *conn)
            .fetch(sql)
            .map_ok(|row| row.to_json_row())
            .try_collect::<Vec<Row>>()
            .await
            .map_err(|e| with_timeout_budget(e.into(), self.statement_timeout))
    }

    async fn list_tables(&self) -> DbResult<Vec<String>> {
        let mut conn = self.conn.lock().await;
        sqlx::query_scalar::<_, String>(LIST_TABLES_SQL)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| with_timeout_budget(e.into(), self.statement_timeout))
    }

    async fn describe_table(&self, table: &str) -> DbResult<Vec<ColumnInfo>> {
        let mut conn = self.conn.lock().await;
        let columns = sqlx::query_as::<_, (String, String)>(DESCRIBE_TABLE_SQL)
            .bind(table)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| with_timeout_budget(e.into(), self.statement_timeout))?;
        Ok(columns
            .into_iter()
            .map(|(column_name, data_type)| ColumnInfo {
                column_name,
                data_type,
            })
            .collect())
    }
}
