//! Query-related data models.
//!
//! This module defines types for SQL query requests and results.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// One result row: column name to scalar value, in the engine's column order.
pub type Row = Map<String, JsonValue>;

/// A statement that passed validation, possibly rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    /// Final SQL text to hand to the backend
    pub query: String,
    /// Human-readable notes about automatic rewrites, in the order applied
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunQueryRequest {
    /// A single SELECT (or WITH ... SELECT) statement
    pub sql: String,
    /// Target instance; defaults to "default"
    #[serde(default)]
    pub instance_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct RunQueryOutput {
    pub rows: Vec<Row>,
    pub warnings: Vec<String>,
}
