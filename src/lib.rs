//! SQL MCP Server Library
//!
//! A gateway that accepts SQL from untrusted callers, validates it against a
//! per-instance policy (read-only, keyword denylist, table allow-list, row
//! cap) and runs it on one of several configured SQLite, PostgreSQL, MySQL or
//! SQL Server instances.

pub mod config;
pub mod db;
pub mod error;
pub mod mcp;
pub mod models;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use db::InstanceRegistry;
pub use error::DbError;
pub use mcp::SqlGatewayService;
