//! Engine-specific client selection.

use super::{MsSqlBackend, MySqlBackend, PostgresBackend, SqlBackend, SqliteBackend};
use crate::error::{DbError, DbResult};
use crate::impl_backend_dispatch;
use crate::models::{ColumnInfo, EngineKind, InstanceConfig, Row};
use tracing::{info, warn};

/// A connected backend for one of the supported engines.
pub enum BackendClient {
    Sqlite(SqliteBackend),
    Postgres(PostgresBackend),
    MySql(MySqlBackend),
    MsSql(MsSqlBackend),
}

impl BackendClient {
    /// Open a connection for the instance's engine.
    ///
    /// Networked engines fail fast, before any network activity, when a
    /// required parameter is missing.
    pub async fn connect(config: &InstanceConfig) -> DbResult<Self> {
        let missing = config.missing_network_params();
        if !missing.is_empty() {
            return Err(DbError::connection(
                format!(
                    "Missing connection parameters for {} instance '{}': {}",
                    config.engine.display_name(),
                    config.id,
                    missing.join(", ")
                ),
                "Set the missing variables (prefixed with the instance slug for named instances)",
            ));
        }

        info!(instance_id = %config.id, engine = %config.engine, "Connecting to database");
        let client = match config.engine {
            EngineKind::Sqlite => SqliteBackend::connect(config).await.map(Self::Sqlite),
            EngineKind::Postgres => PostgresBackend::connect(config).await.map(Self::Postgres),
            EngineKind::MySql => MySqlBackend::connect(config).await.map(Self::MySql),
            EngineKind::MsSql => MsSqlBackend::connect(config).await.map(Self::MsSql),
        };
        if let Err(e) = &client {
            warn!(instance_id = %config.id, engine = %config.engine, error = %e, "Connection failed");
        }
        client
    }
}

impl SqlBackend for BackendClient {
    fn engine(&self) -> EngineKind {
        impl_backend_dispatch!(self, backend => backend.engine())
    }

    async fn execute(&self, sql: &str) -> DbResult<Vec<Row>> {
        impl_backend_dispatch!(self, backend => backend.execute(sql).await)
    }

    async fn list_tables(&self) -> DbResult<Vec<String>> {
        impl_backend_dispatch!(self, backend => backend.list_tables().await)
    }

    async fn describe_table(&self, table: &str) -> DbResult<Vec<ColumnInfo>> {
        impl_backend_dispatch!(self, backend => backend.describe_table(table).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_networked_engine_fails_fast_on_missing_params() {
        let mut config = InstanceConfig::new("crm", EngineKind::Postgres);
        config.host = Some("localhost".into());

        match BackendClient::connect(&config).await {
            Err(DbError::Connection { message, .. }) => {
                assert!(message.contains("DB_DATABASE"));
                assert!(message.contains("DB_USER"));
                assert!(message.contains("DB_PASSWORD"));
                assert!(!message.contains("DB_HOST"));
            }
            Err(other) => panic!("expected connection error, got {other:?}"),
            Ok(_) => panic!("expected connection error"),
        }
    }

    #[tokio::test]
    async fn test_missing_sqlite_file_is_a_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.db");
        let config = InstanceConfig::sqlite("default", path.to_string_lossy());

        assert!(matches!(
            BackendClient::connect(&config).await,
            Err(DbError::Connection { .. })
        ));
    }
}
