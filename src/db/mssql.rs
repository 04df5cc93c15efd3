//! SQL Server adapter (TDS via `tiberius`).
//!
//! SQL Server has no session-level statement timeout, so each call is bounded
//! client-side. When the budget expires mid-statement the TDS stream is left
//! in an unknown state: the connection is dropped and the next call
//! reconnects.

use super::types::{decode_binary_value, float_value, iso};
use super::{SqlBackend, connect_within};
use crate::error::{DbError, DbResult};
use crate::models::{ColumnInfo, EngineKind, InstanceConfig, Row};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value as JsonValue;
use std::future::Future;
use std::time::Duration;
use tiberius::{AuthMethod, Client, ColumnData, EncryptionLevel, FromSql, Query};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

type TdsClient = Client<Compat<TcpStream>>;

const LIST_TABLES_SQL: &str = "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
     WHERE TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME";

const DESCRIBE_TABLE_SQL: &str = "SELECT COLUMN_NAME, DATA_TYPE FROM INFORMATION_SCHEMA.COLUMNS \
     WHERE TABLE_NAME = @P1 ORDER BY ORDINAL_POSITION";

/// Build the TDS client configuration for an instance.
pub fn tds_config(config: &InstanceConfig) -> tiberius::Config {
    let mut tds = tiberius::Config::new();
    tds.host(config.host.as_deref().unwrap_or_default());
    tds.port(config.resolved_port());
    if let Some(database) = config.database.as_deref() {
        tds.database(database);
    }
    tds.authentication(AuthMethod::sql_server(
        config.user.as_deref().unwrap_or_default(),
        config.password.as_deref().unwrap_or_default(),
    ));
    if config.mssql_trust_server_certificate {
        tds.trust_cert();
    }
    tds.encryption(if config.mssql_encrypt {
        EncryptionLevel::Required
    } else {
        EncryptionLevel::Off
    });
    tds.application_name("sql-mcp-server");
    tds
}

pub struct MsSqlBackend {
    config: InstanceConfig,
    tds: tiberius::Config,
    client: Mutex<Option<TdsClient>>,
    statement_timeout: Option<Duration>,
}

impl MsSqlBackend {
    /// Connect eagerly so configuration mistakes surface at construction.
    pub async fn connect(config: &InstanceConfig) -> DbResult<Self> {
        let tds = tds_config(config);
        let client = open_client(config, &tds).await?;
        debug!(addr = %tds.get_addr(), "SQL Server session ready");
        Ok(Self {
            config: config.clone(),
            tds,
            client: Mutex::new(Some(client)),
            statement_timeout: config
                .statement_timeout_seconds()
                .map(Duration::from_secs),
        })
    }

    async fn ensure_connected<'a>(
        &self,
        slot: &'a mut Option<TdsClient>,
    ) -> DbResult<&'a mut TdsClient> {
        if slot.is_none() {
            info!(instance_id = %self.config.id, "Reconnecting to SQL Server");
            *slot = Some(open_client(&self.config, &self.tds).await?);
        }
        slot.as_mut().ok_or_else(|| {
            DbError::connection("SQL Server connection unavailable", "Retry the request")
        })
    }

    async fn bounded<T>(&self, fut: impl Future<Output = DbResult<T>>) -> DbResult<T> {
        let Some(limit) = self.statement_timeout else {
            return fut.await;
        };
        tokio::time::timeout(limit, fut).await.unwrap_or_else(|_| {
            Err(DbError::timeout(
                "Query timeout expired",
                limit.as_millis() as u64,
            ))
        })
    }
}

/// Drop the connection after failures that leave the TDS stream unusable.
fn settle<T>(slot: &mut Option<TdsClient>, outcome: DbResult<T>) -> DbResult<T> {
    if let Err(err @ (DbError::Timeout { .. } | DbError::Connection { .. })) = &outcome {
        warn!(error = %err, "Discarding SQL Server connection");
        *slot = None;
    }
    outcome
}

async fn open_client(config: &InstanceConfig, tds: &tiberius::Config) -> DbResult<TdsClient> {
    connect_within(config, async {
        let tcp = TcpStream::connect(tds.get_addr()).await.map_err(|e| {
            DbError::connection(
                format!("Failed to reach {}: {}", tds.get_addr(), e),
                "Check DB_HOST and DB_PORT",
            )
        })?;
        tcp.set_nodelay(true).map_err(|e| {
            DbError::connection(format!("Socket setup failed: {}", e), "Retry the request")
        })?;
        Ok(Client::connect(tds.clone(), tcp.compat_write()).await?)
    })
    .await
}

impl SqlBackend for MsSqlBackend {
    fn engine(&self) -> EngineKind {
        EngineKind::MsSql
    }

    async fn execute(&self, sql: &str) -> DbResult<Vec<Row>> {
        let mut slot = self.client.lock().await;
        let client = self.ensure_connected(&mut slot).await?;
        let outcome = self
            .bounded(async {
                let rows = client.simple_query(sql).await?.into_first_result().await?;
                Ok::<_, DbError>(rows.into_iter().map(row_to_json).collect())
            })
            .await;
        settle(&mut slot, outcome)
    }

    async fn list_tables(&self) -> DbResult<Vec<String>> {
        let mut slot = self.client.lock().await;
        let client = self.ensure_connected(&mut slot).await?;
        let outcome = self
            .bounded(async {
                let rows = client
                    .simple_query(LIST_TABLES_SQL)
                    .await?
                    .into_first_result()
                    .await?;
                Ok::<_, DbError>(rows
                    .iter()
                    .filter_map(|row| row.try_get::<&str, _>(0).ok().flatten().map(str::to_string))
                    .collect())
            })
            .await;
        settle(&mut slot, outcome)
    }

    async fn describe_table(&self, table: &str) -> DbResult<Vec<ColumnInfo>> {
        let mut slot = self.client.lock().await;
        let client = self.ensure_connected(&mut slot).await?;
        let outcome = self
            .bounded(async {
                let mut query = Query::new(DESCRIBE_TABLE_SQL);
                query.bind(table.to_owned());
                let rows = query.query(&mut *client).await?.into_first_result().await?;
                Ok::<_, DbError>(rows
                    .iter()
                    .filter_map(|row| {
                        Some(ColumnInfo {
                            column_name: row.try_get::<&str, _>(0).ok()??.to_string(),
                            data_type: row.try_get::<&str, _>(1).ok()??.to_string(),
                        })
                    })
                    .collect())
            })
            .await;
        settle(&mut slot, outcome)
    }
}

fn row_to_json(row: tiberius::Row) -> Row {
    let names: Vec<String> = row
        .columns()
        .iter()
        .map(|col| col.name().to_string())
        .collect();
    names
        .into_iter()
        .zip(row)
        .map(|(name, data)| (name, column_to_json(data)))
        .collect()
}

fn column_to_json(data: ColumnData<'static>) -> JsonValue {
    let value = match data {
        ColumnData::U8(v) => v.map(JsonValue::from),
        ColumnData::I16(v) => v.map(JsonValue::from),
        ColumnData::I32(v) => v.map(JsonValue::from),
        ColumnData::I64(v) => v.map(JsonValue::from),
        ColumnData::F32(v) => v.map(|f| float_value(f64::from(f))),
        ColumnData::F64(v) => v.map(float_value),
        ColumnData::Bit(v) => v.map(JsonValue::Bool),
        ColumnData::String(v) => v.map(|s| JsonValue::String(s.into_owned())),
        ColumnData::Guid(v) => v.map(|g| JsonValue::String(g.to_string())),
        ColumnData::Numeric(v) => v.map(|n| JsonValue::String(n.to_string())),
        ColumnData::Binary(v) => v.map(|b| decode_binary_value(&b)),
        ColumnData::Xml(v) => v.map(|x| JsonValue::String(x.into_owned().into_string())),
        temporal => temporal_to_json(&temporal),
    };
    value.unwrap_or(JsonValue::Null)
}

fn temporal_to_json(value: &ColumnData<'static>) -> Option<JsonValue> {
    match value {
        ColumnData::Date(_) => NaiveDate::from_sql(value).ok().flatten().map(iso::date),
        ColumnData::Time(_) => NaiveTime::from_sql(value).ok().flatten().map(iso::time),
        ColumnData::DateTimeOffset(_) => DateTime::<FixedOffset>::from_sql(value)
            .ok()
            .flatten()
            .map(iso::datetime_tz),
        _ => NaiveDateTime::from_sql(value)
            .ok()
            .flatten()
            .map(iso::datetime),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    fn mssql_config() -> InstanceConfig {
        let mut config = InstanceConfig::new("warehouse", EngineKind::MsSql);
        config.host = Some("sql.internal".into());
        config.database = Some("dw".into());
        config.user = Some("reader".into());
        config.password = Some("secret".into());
        config
    }

    #[test]
    fn test_tds_config_uses_default_port() {
        let tds = tds_config(&mssql_config());
        assert_eq!(tds.get_addr(), "sql.internal:1433");
    }

    #[test]
    fn test_tds_config_custom_port() {
        let mut config = mssql_config();
        config.port = 14330;
        assert_eq!(tds_config(&config).get_addr(), "sql.internal:14330");
    }

    #[test]
    fn test_statement_budget_rounds_up_to_seconds() {
        let mut config = mssql_config();
        config.statement_timeout_ms = 1200;
        assert_eq!(config.statement_timeout_seconds(), Some(2));
        config.statement_timeout_ms = 1;
        assert_eq!(config.statement_timeout_seconds(), Some(1));
    }

    #[test]
    fn test_column_to_json_scalars() {
        assert_eq!(column_to_json(ColumnData::I32(Some(7))), JsonValue::from(7));
        assert_eq!(column_to_json(ColumnData::Bit(Some(true))), JsonValue::Bool(true));
        assert_eq!(column_to_json(ColumnData::I64(None)), JsonValue::Null);
        assert_eq!(
            column_to_json(ColumnData::String(Some(Cow::Borrowed("abc")))),
            JsonValue::String("abc".into())
        );
        assert_eq!(
            column_to_json(ColumnData::Binary(Some(Cow::Borrowed(&[0xff, 0x00][..])))),
            JsonValue::String("/wA=".into())
        );
    }

    #[test]
    fn test_settle_discards_connection_on_timeout() {
        let mut slot: Option<TdsClient> = None;
        let outcome: DbResult<()> =
            settle(&mut slot, Err(DbError::timeout("Query timeout expired", 1000)));
        assert!(matches!(outcome, Err(DbError::Timeout { .. })));
        assert!(slot.is_none());
    }
}
