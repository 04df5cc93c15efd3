//! Data models for the SQL MCP Server.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use connection::{
    DEFAULT_INSTANCE_ID, DEFAULT_MAX_ROWS, DEFAULT_QUERY_TIMEOUT_SECS, DEFAULT_SQLITE_PATH,
    EngineKind, InstanceConfig, InstanceSummary,
};
pub use query::{Row, RunQueryOutput, RunQueryRequest, ValidationResult};
pub use schema::{
    ColumnInfo, DescribeTableOutput, DescribeTableRequest, ListInstancesOutput,
    ListTablesOutput, ListTablesRequest,
};
