//! Configuration handling for the SQL MCP Server.
//!
//! Process-level settings come from CLI arguments and environment variables
//! via `clap`. Per-instance settings are read from an environment snapshot:
//! the `default` instance uses bare keys (`DB_PROVIDER`, `DB_HOST`, ...), and a
//! named instance such as `crm` uses the same keys prefixed with its slug
//! (`CRM_DB_PROVIDER`, `CRM_DB_HOST`, ...).

use crate::error::{DbError, DbResult};
use crate::mcp::DEFAULT_SERVER_NAME;
use crate::models::{
    DEFAULT_INSTANCE_ID, DEFAULT_MAX_ROWS, DEFAULT_QUERY_TIMEOUT_SECS, DEFAULT_SQLITE_PATH,
    EngineKind, InstanceConfig,
};
use clap::{Parser, ValueEnum};
use std::collections::HashMap;
use std::str::FromStr;

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_MCP_ENDPOINT: &str = "/";

/// Transport mode for the MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TransportMode {
    /// Standard input/output (for CLI integration)
    #[default]
    Stdio,
    /// Streamable HTTP (for web clients)
    Http,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// Configuration for the SQL MCP Server.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "sql-mcp-server",
    about = "MCP gateway that runs validated, read-only SQL against configured database instances",
    version,
    author
)]
pub struct Config {
    /// Database instance slugs. Each reads its settings from <SLUG>_DB_* variables.
    /// Empty means a single "default" instance configured by the bare DB_* variables.
    #[arg(
        short = 'i',
        long = "instance",
        value_name = "SLUG",
        env = "MCP_INSTANCES",
        value_delimiter = ','
    )]
    pub instances: Vec<String>,

    /// Transport mode (stdio or http)
    #[arg(
        short,
        long,
        value_enum,
        default_value = "stdio",
        env = "MCP_TRANSPORT"
    )]
    pub transport: TransportMode,

    /// HTTP host to bind to (only used with http transport)
    #[arg(
        long,
        default_value = DEFAULT_HTTP_HOST,
        env = "MCP_HTTP_HOST"
    )]
    pub http_host: String,

    /// HTTP port to bind to (only used with http transport)
    #[arg(
        long,
        default_value_t = DEFAULT_HTTP_PORT,
        env = "MCP_HTTP_PORT"
    )]
    pub http_port: u16,

    /// MCP endpoint path (only used with http transport)
    #[arg(
        long,
        default_value = DEFAULT_MCP_ENDPOINT,
        env = "MCP_ENDPOINT"
    )]
    pub mcp_endpoint: String,

    /// Server name advertised to MCP clients
    #[arg(
        long,
        default_value = DEFAULT_SERVER_NAME,
        env = "MCP_SERVER_NAME"
    )]
    pub server_name: String,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info", env = "MCP_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "MCP_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            instances: Vec::new(),
            transport: TransportMode::Stdio,
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            mcp_endpoint: DEFAULT_MCP_ENDPOINT.to_string(),
            server_name: DEFAULT_SERVER_NAME.to_string(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    /// Get the HTTP bind address.
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    /// Resolve every configured instance from an environment snapshot.
    pub fn instance_configs(&self, env: &HashMap<String, String>) -> DbResult<Vec<InstanceConfig>> {
        load_instances(&self.instances, env)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

/// Resolve the listed instances; an empty list yields the `default` instance.
pub fn load_instances(ids: &[String], env: &HashMap<String, String>) -> DbResult<Vec<InstanceConfig>> {
    let ids: Vec<String> = ids
        .iter()
        .map(|id| id.trim().to_lowercase())
        .filter(|id| !id.is_empty())
        .collect();
    if ids.is_empty() {
        return Ok(vec![InstanceConfig::from_env(DEFAULT_INSTANCE_ID, env)?]);
    }
    ids.iter().map(|id| InstanceConfig::from_env(id, env)).collect()
}

/// Variable prefix for an instance: empty for `default`, else `SLUG_`.
pub fn env_prefix(instance_id: &str) -> String {
    if instance_id.eq_ignore_ascii_case(DEFAULT_INSTANCE_ID) {
        return String::new();
    }
    let slug: String = instance_id
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_", slug)
}

/// Prefixed view over an environment snapshot. Blank values count as unset.
struct EnvReader<'a> {
    prefix: String,
    env: &'a HashMap<String, String>,
}

impl EnvReader<'_> {
    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn get(&self, name: &str) -> Option<String> {
        self.env
            .get(&self.key(name))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    /// Only the literal `true` (any case) enables a flag that is set.
    fn flag(&self, name: &str, default: bool) -> bool {
        self.get(name)
            .map_or(default, |v| v.eq_ignore_ascii_case("true"))
    }

    fn number<T: FromStr>(&self, name: &str) -> DbResult<Option<T>> {
        match self.get(name) {
            None => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|_| {
                DbError::configuration(format!(
                    "{} must be an integer, got '{}'",
                    self.key(name),
                    raw
                ))
            }),
        }
    }
}

impl InstanceConfig {
    /// Build an instance configuration from an environment snapshot.
    pub fn from_env(instance_id: &str, env: &HashMap<String, String>) -> DbResult<Self> {
        let reader = EnvReader {
            prefix: env_prefix(instance_id),
            env,
        };

        let engine = match reader.get("DB_PROVIDER") {
            None => EngineKind::Sqlite,
            Some(provider) => EngineKind::from_provider(&provider).ok_or_else(|| {
                DbError::configuration(format!(
                    "{} has unknown provider '{}'; expected sqlite, postgres, mysql or mssql",
                    reader.key("DB_PROVIDER"),
                    provider
                ))
            })?,
        };

        let query_timeout_secs = reader
            .number::<u64>("DB_QUERY_TIMEOUT")?
            .unwrap_or(DEFAULT_QUERY_TIMEOUT_SECS);
        let statement_timeout_ms = match reader.number::<i64>("DB_STATEMENT_TIMEOUT_MS")? {
            Some(ms) => ms,
            None => i64::try_from(query_timeout_secs.saturating_mul(1000)).unwrap_or(i64::MAX),
        };

        let mut config = InstanceConfig::new(instance_id, engine);
        config.host = reader.get("DB_HOST");
        config.port = reader.number::<u16>("DB_PORT")?.unwrap_or(0);
        config.user = reader.get("DB_USER");
        config.password = reader
            .env
            .get(&reader.key("DB_PASSWORD"))
            .cloned();
        config.database = reader.get("DB_DATABASE");
        config.sqlite_path = reader
            .get("SQLITE_PATH")
            .unwrap_or_else(|| DEFAULT_SQLITE_PATH.to_string());
        config.read_only = reader.flag("DB_READ_ONLY", true);
        config.max_rows = reader
            .number::<u64>("DB_MAX_ROWS")?
            .unwrap_or(DEFAULT_MAX_ROWS);
        config.query_timeout_secs = query_timeout_secs;
        config.statement_timeout_ms = statement_timeout_ms;
        config.mssql_trust_server_certificate =
            reader.flag("DB_MSSQL_TRUST_SERVER_CERTIFICATE", false);
        config.mssql_encrypt = reader.flag("DB_MSSQL_ENCRYPT", true);

        let allowed = reader.get("DB_ALLOWED_TABLES").unwrap_or_default();
        Ok(config.with_allowed_tables(allowed.split(',')))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport, TransportMode::Stdio);
        assert_eq!(config.http_host, DEFAULT_HTTP_HOST);
        assert_eq!(config.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(config.server_name, "sql-mcp-server");
    }

    #[test]
    fn test_http_bind_addr() {
        let config = Config {
            http_host: "0.0.0.0".to_string(),
            http_port: 3000,
            ..Config::default()
        };
        assert_eq!(config.http_bind_addr(), "0.0.0.0:3000");
    }

    #[test]
    fn test_parse_instance_flags() {
        let config =
            Config::try_parse_from(["sql-mcp-server", "--instance", "crm,Sales", "-i", "hr"])
                .unwrap();
        assert_eq!(config.instances, vec!["crm", "Sales", "hr"]);
    }

    #[test]
    fn test_env_prefix() {
        assert_eq!(env_prefix("default"), "");
        assert_eq!(env_prefix("crm"), "CRM_");
        assert_eq!(env_prefix("sales-eu"), "SALES_EU_");
    }

    #[test]
    fn test_defaults_from_empty_env() {
        let config = InstanceConfig::from_env("default", &HashMap::new()).unwrap();
        assert_eq!(config.engine, EngineKind::Sqlite);
        assert_eq!(config.sqlite_path, "./database.db");
        assert!(config.read_only);
        assert_eq!(config.max_rows, 100);
        assert_eq!(config.query_timeout_secs, 10);
        assert_eq!(config.statement_timeout_ms, 10_000);
        assert!(config.allowed_tables.is_empty());
        assert!(!config.mssql_trust_server_certificate);
        assert!(config.mssql_encrypt);
    }

    #[test]
    fn test_prefixed_instance_is_isolated() {
        let env = env(&[
            ("DB_PROVIDER", "mysql"),
            ("CRM_DB_PROVIDER", "PostgreSQL"),
            ("CRM_DB_HOST", "pg.internal"),
            ("CRM_DB_PORT", "6543"),
            ("CRM_DB_ALLOWED_TABLES", " Customers, orders ,, "),
            ("CRM_DB_QUERY_TIMEOUT", "3"),
        ]);
        let config = InstanceConfig::from_env("crm", &env).unwrap();
        assert_eq!(config.id, "crm");
        assert_eq!(config.engine, EngineKind::Postgres);
        assert_eq!(config.host.as_deref(), Some("pg.internal"));
        assert_eq!(config.resolved_port(), 6543);
        assert_eq!(config.statement_timeout_ms, 3000);
        let allowed: Vec<_> = config.allowed_tables.iter().cloned().collect();
        assert_eq!(allowed, vec!["customers", "orders"]);
    }

    #[test]
    fn test_read_only_requires_literal_true() {
        let config =
            InstanceConfig::from_env("default", &env(&[("DB_READ_ONLY", "yes")])).unwrap();
        assert!(!config.read_only);
        let config =
            InstanceConfig::from_env("default", &env(&[("DB_READ_ONLY", "TRUE")])).unwrap();
        assert!(config.read_only);
    }

    #[test]
    fn test_explicit_statement_timeout_wins() {
        let env = env(&[
            ("DB_QUERY_TIMEOUT", "30"),
            ("DB_STATEMENT_TIMEOUT_MS", "0"),
        ]);
        let config = InstanceConfig::from_env("default", &env).unwrap();
        assert_eq!(config.statement_timeout_ms, 0);
        assert_eq!(config.statement_timeout_seconds(), None);
    }

    #[test]
    fn test_malformed_integer_is_configuration_error() {
        let err =
            InstanceConfig::from_env("default", &env(&[("DB_MAX_ROWS", "lots")])).unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
        assert!(err.to_string().contains("DB_MAX_ROWS"));
    }

    #[test]
    fn test_unknown_provider_is_configuration_error() {
        let err =
            InstanceConfig::from_env("default", &env(&[("DB_PROVIDER", "oracle")])).unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
    }

    #[test]
    fn test_load_instances_defaults_to_single_instance() {
        let configs = load_instances(&[], &HashMap::new()).unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].id, "default");

        let configs = load_instances(&[" CRM ".to_string(), String::new()], &HashMap::new()).unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].id, "crm");
    }
}
