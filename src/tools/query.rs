//! Query execution tool.
//!
//! This module implements the `run_query` MCP tool. The statement is checked
//! by the instance's validator, possibly rewritten with a row cap, and only
//! then sent to the backend.

use super::{ToolResponse, log_failure};
use crate::db::{InstanceRegistry, SqlBackend};
use crate::error::DbResult;
use crate::models::{RunQueryOutput, RunQueryRequest};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Handler for the `run_query` tool.
pub struct QueryToolHandler {
    registry: Arc<InstanceRegistry>,
}

impl QueryToolHandler {
    pub fn new(registry: Arc<InstanceRegistry>) -> Self {
        Self { registry }
    }

    /// Validate and run one read-only statement.
    pub async fn run_query(&self, input: RunQueryRequest) -> ToolResponse<RunQueryOutput> {
        let instance_id = input.instance_id.as_deref();
        let result = self.try_run_query(&input.sql, instance_id).await;
        if let Err(err) = &result {
            log_failure("run_query", instance_id, err);
        }
        result.into()
    }

    async fn try_run_query(&self, sql: &str, instance_id: Option<&str>) -> DbResult<RunQueryOutput> {
        let context = self.registry.get(instance_id).await?;
        let validated = context.validator.validate(sql)?;
        if validated.query != sql.trim() {
            debug!(instance_id = %context.id(), rewritten = %validated.query, "Statement rewritten");
        }

        let start = Instant::now();
        let rows = context.client.execute(&validated.query).await?;
        info!(
            instance_id = %context.id(),
            engine = %context.config.engine,
            row_count = rows.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Query executed"
        );

        Ok(RunQueryOutput {
            rows,
            warnings: validated.warnings,
        })
    }
}
