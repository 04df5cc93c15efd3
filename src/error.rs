//! Error types for the SQL MCP Server.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Policy violations and engine failures are both recoverable values; the gateway
//! converts them into an [`ErrorResponse`] so callers always receive a structured
//! `{error_type, message, hint}` record instead of a transport-level fault.

use schemars::JsonSchema;
use serde::Serialize;
use thiserror::Error;

/// Tag shared by every engine-side failure (connection, syntax, permission, timeout).
pub const EXECUTION_ERROR_TYPE: &str = "ExecutionError";

#[derive(Error, Debug)]
pub enum DbError {
    #[error("{message}")]
    InvalidQuery { message: String },

    #[error("Only one SQL statement is allowed")]
    MultipleStatementsNotAllowed,

    #[error("Database is in read-only mode")]
    ReadOnlyViolation,

    #[error("Only SELECT queries are allowed")]
    NonSelectNotAllowed,

    #[error("Forbidden SQL keyword detected: {keyword}")]
    ForbiddenKeyword { keyword: String },

    #[error("Access denied to table(s): {}", tables.join(", "))]
    TableNotAllowed {
        tables: Vec<String>,
        allowed: Vec<String>,
    },

    #[error("Unknown database instance: {instance_id}")]
    UnknownInstance {
        instance_id: String,
        available: Vec<String>,
    },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Statement timeout: {message}")]
    Timeout { message: String, timeout_ms: u64 },

    /// Startup-only: the process configuration could not be resolved.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Transport or server failure outside any single request.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Create a forbidden keyword error naming the offending token.
    pub fn forbidden_keyword(keyword: impl Into<String>) -> Self {
        Self::ForbiddenKeyword {
            keyword: keyword.into(),
        }
    }

    /// Create a table allow-list violation.
    pub fn table_not_allowed(tables: Vec<String>, allowed: Vec<String>) -> Self {
        Self::TableNotAllowed { tables, allowed }
    }

    /// Create an unknown instance error.
    pub fn unknown_instance(instance_id: impl Into<String>, available: Vec<String>) -> Self {
        Self::UnknownInstance {
            instance_id: instance_id.into(),
            available,
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a timeout error carrying the engine's own message.
    pub fn timeout(message: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            message: message.into(),
            timeout_ms,
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal (transport-level) error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The taxonomy tag reported to callers as `error_type`.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidQuery { .. } => "InvalidQuery",
            Self::MultipleStatementsNotAllowed => "MultipleStatementsNotAllowed",
            Self::ReadOnlyViolation => "ReadOnlyViolation",
            Self::NonSelectNotAllowed => "NonSelectNotAllowed",
            Self::ForbiddenKeyword { .. } => "ForbiddenKeyword",
            Self::TableNotAllowed { .. } => "TableNotAllowed",
            Self::UnknownInstance { .. } => "UnknownInstance",
            Self::Configuration { .. } => "ConfigurationError",
            Self::Internal { .. } => "InternalError",
            Self::Connection { .. } | Self::Database { .. } | Self::Timeout { .. } => {
                EXECUTION_ERROR_TYPE
            }
        }
    }

    /// Get the hint for this error, if available.
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::InvalidQuery { .. } => Some("Send a non-empty SELECT statement".to_string()),
            Self::MultipleStatementsNotAllowed => {
                Some("Send a single SELECT statement".to_string())
            }
            Self::ReadOnlyViolation | Self::NonSelectNotAllowed => {
                Some("Only SELECT queries are allowed".to_string())
            }
            Self::ForbiddenKeyword { .. } => Some("Remove dangerous SQL constructs".to_string()),
            Self::TableNotAllowed { allowed, .. } => {
                Some(format!("Allowed tables: {}", allowed.join(", ")))
            }
            Self::UnknownInstance { available, .. } => Some(format!(
                "Provide a valid instance_id. Available instances: {}",
                available.join(", ")
            )),
            Self::Connection { suggestion, .. } => Some(suggestion.clone()),
            Self::Database { suggestion, .. } => Some(suggestion.clone()),
            Self::Timeout { timeout_ms, .. } => Some(format!(
                "The statement exceeded the {}ms budget; narrow the query or add filters",
                timeout_ms
            )),
            Self::Configuration { .. } | Self::Internal { .. } => None,
        }
    }

    /// Check if this error was raised by the execution-time budget.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this error is a policy/validation rejection (as opposed to an engine failure).
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidQuery { .. }
                | Self::MultipleStatementsNotAllowed
                | Self::ReadOnlyViolation
                | Self::NonSelectNotAllowed
                | Self::ForbiddenKeyword { .. }
                | Self::TableNotAllowed { .. }
                | Self::UnknownInstance { .. }
        )
    }

    /// Serialize into the wire shape returned to callers.
    pub fn to_response(&self) -> ErrorResponse {
        let message = match self {
            Self::Database {
                message,
                sql_state: Some(code),
                ..
            } => format!("{} (SQLSTATE: {})", message, code),
            Self::Database { message, .. } | Self::Timeout { message, .. } => message.clone(),
            _ => self.to_string(),
        };
        ErrorResponse {
            error_type: self.error_type().to_string(),
            message,
            hint: self.hint(),
        }
    }
}

/// PostgreSQL `query_canceled`, raised when `statement_timeout` fires.
const PG_QUERY_CANCELED: &str = "57014";
/// MySQL `ER_QUERY_TIMEOUT`, raised when `MAX_EXECUTION_TIME` is exceeded.
const MYSQL_QUERY_TIMEOUT: u16 = 3024;

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection parameters and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                let mysql_number = db_err
                    .try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
                    .map(|e| e.number());
                if code.as_deref() == Some(PG_QUERY_CANCELED)
                    || mysql_number == Some(MYSQL_QUERY_TIMEOUT)
                {
                    return DbError::timeout(db_err.message(), 0);
                }
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => {
                DbError::connection("Timed out acquiring a connection", "Retry the request")
            }
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection is closed", "Restart the server")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnDecode { index, source } => DbError::database(
                format!("Failed to decode column {}: {}", index, source),
                None,
                "Cast the column to a simpler type in the SELECT list",
            ),
            sqlx::Error::Decode(source) => DbError::database(
                format!("Decode error: {}", source),
                None,
                "Cast the column to a simpler type in the SELECT list",
            ),
            other => DbError::database(
                other.to_string(),
                None,
                "Check the SQL syntax and referenced objects",
            ),
        }
    }
}

/// Convert SQL Server (tiberius) errors to DbError.
impl From<tiberius::error::Error> for DbError {
    fn from(err: tiberius::error::Error) -> Self {
        use tiberius::error::Error as TdsError;
        match err {
            TdsError::Server(token) => DbError::database(
                token.message().to_string(),
                Some(token.code().to_string()),
                "Check the SQL syntax and referenced objects",
            ),
            TdsError::Io { kind, message } => DbError::connection(
                format!("I/O error ({:?}): {}", kind, message),
                "Check network connectivity and database server status",
            ),
            TdsError::Tls(msg) => DbError::connection(
                format!("TLS error: {}", msg),
                "Set DB_MSSQL_TRUST_SERVER_CERTIFICATE=true for self-signed certificates",
            ),
            TdsError::Routing { host, port } => DbError::connection(
                format!("Server requested routing to {}:{}", host, port),
                "Connect directly to the routed host",
            ),
            other => DbError::database(
                other.to_string(),
                None,
                "Check the SQL syntax and referenced objects",
            ),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Structured error record returned by every gateway operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct ErrorResponse {
    /// Taxonomy tag, e.g. "TableNotAllowed" or "ExecutionError"
    pub error_type: String,
    pub message: String,
    pub hint: Option<String>,
}

impl From<&DbError> for ErrorResponse {
    fn from(err: &DbError) -> Self {
        err.to_response()
    }
}

impl From<DbError> for ErrorResponse {
    fn from(err: DbError) -> Self {
        err.to_response()
    }
}
