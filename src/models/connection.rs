//! Instance-related data models.
//!
//! This module defines the engine kinds the gateway can talk to and the
//! immutable per-instance configuration record.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Identifier used when a caller does not name an instance.
pub const DEFAULT_INSTANCE_ID: &str = "default";

pub const DEFAULT_SQLITE_PATH: &str = "./database.db";
pub const DEFAULT_MAX_ROWS: u64 = 100;
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 10;

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Sqlite,
    Postgres,
    /// Includes MariaDB
    MySql,
    /// SQL Server; caps rows with `SELECT TOP n`
    MsSql,
}

impl EngineKind {
    /// Parse a provider name, accepting the common aliases.
    pub fn from_provider(provider: &str) -> Option<Self> {
        match provider.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Some(Self::Sqlite),
            "postgres" | "postgresql" | "pg" => Some(Self::Postgres),
            "mysql" | "mariadb" => Some(Self::MySql),
            "mssql" | "sqlserver" => Some(Self::MsSql),
            _ => None,
        }
    }

    /// Get the display name for this engine.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Sqlite => "SQLite",
            Self::Postgres => "PostgreSQL",
            Self::MySql => "MySQL",
            Self::MsSql => "SQL Server",
        }
    }

    /// Get the default port for this engine.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Sqlite => None,
            Self::Postgres => Some(5432),
            Self::MySql => Some(3306),
            Self::MsSql => Some(1433),
        }
    }

    /// True when the row cap is a modifier on the leading verb (`SELECT TOP n`)
    /// rather than a trailing `LIMIT n` clause.
    pub fn is_top_style(&self) -> bool {
        matches!(self, Self::MsSql)
    }

    pub fn is_networked(&self) -> bool {
        !matches!(self, Self::Sqlite)
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Immutable configuration for one logical database instance.
#[derive(Clone)]
pub struct InstanceConfig {
    /// Lowercase slug, unique per process
    pub id: String,
    pub engine: EngineKind,
    pub host: Option<String>,
    /// 0 means the engine default
    pub port: u16,
    pub user: Option<String>,
    /// Contains sensitive data - never log
    pub password: Option<String>,
    pub database: Option<String>,
    pub sqlite_path: String,
    pub read_only: bool,
    /// 0 disables row capping
    pub max_rows: u64,
    /// Connection-establishment budget in seconds
    pub query_timeout_secs: u64,
    /// Per-statement budget; <= 0 disables it
    pub statement_timeout_ms: i64,
    /// Lowercase table names; empty means unrestricted
    pub allowed_tables: BTreeSet<String>,
    pub mssql_trust_server_certificate: bool,
    pub mssql_encrypt: bool,
}

impl InstanceConfig {
    /// Create a configuration with defaults for the given engine.
    pub fn new(id: impl Into<String>, engine: EngineKind) -> Self {
        Self {
            id: id.into().trim().to_lowercase(),
            engine,
            host: None,
            port: 0,
            user: None,
            password: None,
            database: None,
            sqlite_path: DEFAULT_SQLITE_PATH.to_string(),
            read_only: true,
            max_rows: DEFAULT_MAX_ROWS,
            query_timeout_secs: DEFAULT_QUERY_TIMEOUT_SECS,
            statement_timeout_ms: (DEFAULT_QUERY_TIMEOUT_SECS * 1000) as i64,
            allowed_tables: BTreeSet::new(),
            mssql_trust_server_certificate: false,
            mssql_encrypt: true,
        }
    }

    /// Convenience constructor for an embedded-file instance.
    pub fn sqlite(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            sqlite_path: path.into(),
            ..Self::new(id, EngineKind::Sqlite)
        }
    }

    /// Replace the allow-list, normalizing names to lowercase.
    pub fn with_allowed_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_tables = tables
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        self
    }

    /// The configured port, or the engine default when unset.
    pub fn resolved_port(&self) -> u16 {
        if self.port != 0 {
            self.port
        } else {
            self.engine.default_port().unwrap_or(0)
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs.max(1))
    }

    /// Whole seconds for engines with second-granularity timeouts.
    ///
    /// Rounds up with a floor of 1; `None` when the timeout is disabled.
    pub fn statement_timeout_seconds(&self) -> Option<u64> {
        if self.statement_timeout_ms <= 0 {
            return None;
        }
        let ms = self.statement_timeout_ms as u64;
        Some(ms.div_ceil(1000).max(1))
    }

    pub fn statement_timeout(&self) -> Option<Duration> {
        (self.statement_timeout_ms > 0)
            .then(|| Duration::from_millis(self.statement_timeout_ms as u64))
    }

    /// Names of required network parameters that are missing.
    pub fn missing_network_params(&self) -> Vec<&'static str> {
        if !self.engine.is_networked() {
            return Vec::new();
        }
        let blank = |v: &Option<String>| v.as_deref().is_none_or(|s| s.trim().is_empty());
        let mut missing = Vec::new();
        if blank(&self.host) {
            missing.push("DB_HOST");
        }
        if blank(&self.database) {
            missing.push("DB_DATABASE");
        }
        if blank(&self.user) {
            missing.push("DB_USER");
        }
        if self.password.is_none() {
            missing.push("DB_PASSWORD");
        }
        missing
    }

    /// Credential-free view for introspection.
    pub fn summary(&self) -> InstanceSummary {
        InstanceSummary {
            id: self.id.clone(),
            engine: self.engine,
            database: match self.engine {
                EngineKind::Sqlite => Some(self.sqlite_path.clone()),
                _ => self.database.clone(),
            },
            read_only: self.read_only,
            max_rows: self.max_rows,
            statement_timeout_ms: self.statement_timeout_ms,
            allowed_tables: self.allowed_tables.iter().cloned().collect(),
        }
    }
}

impl fmt::Debug for InstanceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceConfig")
            .field("id", &self.id)
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("database", &self.database)
            .field("sqlite_path", &self.sqlite_path)
            .field("read_only", &self.read_only)
            .field("max_rows", &self.max_rows)
            .field("query_timeout_secs", &self.query_timeout_secs)
            .field("statement_timeout_ms", &self.statement_timeout_ms)
            .field("allowed_tables", &self.allowed_tables)
            .finish_non_exhaustive()
    }
}

/// Instance description returned by `list_instances`. Never carries credentials.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct InstanceSummary {
    pub id: String,
    pub engine: EngineKind,
    /// Database name, or file path for SQLite
    pub database: Option<String>,
    pub read_only: bool,
    pub max_rows: u64,
    pub statement_timeout_ms: i64,
    pub allowed_tables: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_from_provider() {
        assert_eq!(EngineKind::from_provider("sqlite"), Some(EngineKind::Sqlite));
        assert_eq!(
            EngineKind::from_provider("PostgreSQL"),
            Some(EngineKind::Postgres)
        );
        assert_eq!(EngineKind::from_provider("mariadb"), Some(EngineKind::MySql));
        assert_eq!(
            EngineKind::from_provider(" sqlserver "),
            Some(EngineKind::MsSql)
        );
        assert_eq!(EngineKind::from_provider("oracle"), None);
    }

    #[test]
    fn test_only_mssql_is_top_style() {
        assert!(EngineKind::MsSql.is_top_style());
        assert!(!EngineKind::Postgres.is_top_style());
        assert!(!EngineKind::MySql.is_top_style());
        assert!(!EngineKind::Sqlite.is_top_style());
    }

    #[test]
    fn test_id_is_normalized() {
        let cfg = InstanceConfig::new(" CRM ", EngineKind::Postgres);
        assert_eq!(cfg.id, "crm");
    }

    #[test]
    fn test_resolved_port_falls_back_to_engine_default() {
        let mut cfg = InstanceConfig::new("a", EngineKind::MsSql);
        assert_eq!(cfg.resolved_port(), 1433);
        cfg.port = 14330;
        assert_eq!(cfg.resolved_port(), 14330);
    }

    #[test]
    fn test_statement_timeout_seconds() {
        let mut cfg = InstanceConfig::new("a", EngineKind::MsSql);
        cfg.statement_timeout_ms = 50;
        assert_eq!(cfg.statement_timeout_seconds(), Some(1));
        cfg.statement_timeout_ms = 1000;
        assert_eq!(cfg.statement_timeout_seconds(), Some(1));
        cfg.statement_timeout_ms = 1001;
        assert_eq!(cfg.statement_timeout_seconds(), Some(2));
        cfg.statement_timeout_ms = 0;
        assert_eq!(cfg.statement_timeout_seconds(), None);
        assert_eq!(cfg.statement_timeout(), None);
        cfg.statement_timeout_ms = -5;
        assert_eq!(cfg.statement_timeout_seconds(), None);
    }

    #[test]
    fn test_missing_network_params() {
        let mut cfg = InstanceConfig::new("a", EngineKind::Postgres);
        assert_eq!(
            cfg.missing_network_params(),
            vec!["DB_HOST", "DB_DATABASE", "DB_USER", "DB_PASSWORD"]
        );
        cfg.host = Some("db".into());
        cfg.database = Some("app".into());
        cfg.user = Some("app".into());
        cfg.password = Some(String::new());
        assert!(cfg.missing_network_params().is_empty());

        let sqlite = InstanceConfig::sqlite("b", "/tmp/x.db");
        assert!(sqlite.missing_network_params().is_empty());
    }

    #[test]
    fn test_debug_masks_password() {
        let mut cfg = InstanceConfig::new("a", EngineKind::MySql);
        cfg.password = Some("hunter2".into());
        let debug = format!("{:?}", cfg);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("****"));
    }

    #[test]
    fn test_summary_has_no_credentials() {
        let mut cfg = InstanceConfig::new("a", EngineKind::MySql)
            .with_allowed_tables(["Orders", " ", "items"]);
        cfg.password = Some("hunter2".into());
        let json = serde_json::to_string(&cfg.summary()).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(json.contains(r#""allowed_tables":["items","orders"]"#));
        assert!(json.contains(r#""engine":"mysql""#));
    }
}
