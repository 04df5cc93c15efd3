//! Gateway operations exposed as MCP tools.
//!
//! This module contains the tool handlers and the policy layer they share:
//! - `query`: `run_query`, validate then execute one read-only statement
//! - `schema`: `list_tables`, `describe_table` and `list_instances`
//! - `sql_validator`: statement classification, denylist and row capping
//! - `table_refs`: table reference extraction for the allow-list

pub mod query;
pub mod schema;
pub mod sql_validator;
pub mod table_refs;

pub use query::QueryToolHandler;
pub use schema::SchemaToolHandler;

use crate::error::{DbError, DbResult, ErrorResponse};
use serde::Serialize;
use tracing::{info, warn};

/// Outcome of a gateway operation: the success payload or a structured error.
///
/// Policy violations and engine failures both end up here as values; nothing
/// a caller sends can turn into a transport-level fault.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ToolResponse<T> {
    Ok(T),
    Err(ErrorResponse),
}

impl<T> ToolResponse<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn into_result(self) -> Result<T, ErrorResponse> {
        match self {
            Self::Ok(value) => Ok(value),
            Self::Err(err) => Err(err),
        }
    }
}

impl<T> From<DbResult<T>> for ToolResponse<T> {
    fn from(result: DbResult<T>) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(err) => Self::Err(err.into()),
        }
    }
}

/// Log a failed operation at the level its kind deserves.
pub(crate) fn log_failure(operation: &str, instance_id: Option<&str>, err: &DbError) {
    let instance_id = instance_id.unwrap_or(crate::models::DEFAULT_INSTANCE_ID);
    if err.is_policy_violation() {
        info!(operation, instance_id, error_type = err.error_type(), error = %err, "Request rejected");
    } else if err.is_timeout() {
        warn!(operation, instance_id, error = %err, "Statement timed out");
    } else {
        warn!(operation, instance_id, error = %err, "Operation failed");
    }
}
