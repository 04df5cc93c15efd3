//! Schema introspection tools.
//!
//! This module implements the `list_tables`, `describe_table` and
//! `list_instances` MCP tools. Table allow-lists apply here as well as to
//! queries: hidden tables are neither listed nor described.

use super::table_refs::is_table_allowed;
use super::{ToolResponse, log_failure};
use crate::db::{InstanceRegistry, SqlBackend};
use crate::error::{DbError, DbResult};
use crate::models::{
    DescribeTableOutput, DescribeTableRequest, ListInstancesOutput, ListTablesOutput,
    ListTablesRequest,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Handler for schema introspection tools.
pub struct SchemaToolHandler {
    registry: Arc<InstanceRegistry>,
}

impl SchemaToolHandler {
    pub fn new(registry: Arc<InstanceRegistry>) -> Self {
        Self { registry }
    }

    /// List base tables, filtered by the instance allow-list.
    pub async fn list_tables(&self, input: ListTablesRequest) -> ToolResponse<ListTablesOutput> {
        let instance_id = input.instance_id.as_deref();
        let result = self.try_list_tables(instance_id).await;
        if let Err(err) = &result {
            log_failure("list_tables", instance_id, err);
        }
        result.into()
    }

    /// Column names and declared types of one table.
    pub async fn describe_table(
        &self,
        input: DescribeTableRequest,
    ) -> ToolResponse<DescribeTableOutput> {
        let instance_id = input.instance_id.as_deref();
        let result = self.try_describe_table(&input.table, instance_id).await;
        if let Err(err) = &result {
            log_failure("describe_table", instance_id, err);
        }
        result.into()
    }

    /// Configured instances, without credentials. Never connects.
    pub fn list_instances(&self) -> ListInstancesOutput {
        ListInstancesOutput {
            instances: self.registry.summaries(),
        }
    }

    async fn try_list_tables(&self, instance_id: Option<&str>) -> DbResult<ListTablesOutput> {
        let context = self.registry.get(instance_id).await?;
        let start = Instant::now();
        let allowed = &context.config.allowed_tables;
        let tables: Vec<String> = context
            .client
            .list_tables()
            .await?
            .into_iter()
            .filter(|table| is_table_allowed(table, allowed))
            .collect();

        info!(
            instance_id = %context.id(),
            engine = %context.config.engine,
            table_count = tables.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Listed tables"
        );
        Ok(ListTablesOutput { tables })
    }

    async fn try_describe_table(
        &self,
        table: &str,
        instance_id: Option<&str>,
    ) -> DbResult<DescribeTableOutput> {
        let table = table.trim();
        if table.is_empty() {
            return Err(DbError::invalid_query("Table name is empty"));
        }

        let context = self.registry.get(instance_id).await?;
        let allowed = &context.config.allowed_tables;
        if !is_table_allowed(table, allowed) {
            return Err(DbError::table_not_allowed(
                vec![table.to_lowercase()],
                allowed.iter().cloned().collect(),
            ));
        }

        let start = Instant::now();
        let columns = context.client.describe_table(table).await?;
        if columns.is_empty() {
            return Err(DbError::database(
                format!("Table '{}' not found", table),
                None,
                "Use list_tables to see available tables",
            ));
        }

        info!(
            instance_id = %context.id(),
            engine = %context.config.engine,
            table,
            column_count = columns.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Described table"
        );
        Ok(DescribeTableOutput { columns })
    }
}
