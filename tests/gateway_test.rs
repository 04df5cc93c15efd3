//! Integration tests for the gateway operations against a SQLite file.

mod common;

use common::{create_fixture_db, single_instance};
use serde_json::{Value as JsonValue, json};
use sql_mcp_server::db::SqlBackend;
use sql_mcp_server::error::EXECUTION_ERROR_TYPE;
use sql_mcp_server::models::{
    ColumnInfo, DescribeTableRequest, InstanceConfig, ListTablesRequest, RunQueryRequest,
};
use sql_mcp_server::tools::{QueryToolHandler, SchemaToolHandler};

fn run(sql: &str) -> RunQueryRequest {
    RunQueryRequest {
        sql: sql.to_string(),
        instance_id: None,
    }
}

fn describe(table: &str) -> DescribeTableRequest {
    DescribeTableRequest {
        table: table.to_string(),
        instance_id: None,
    }
}

#[tokio::test]
async fn test_list_tables_sorted() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_fixture_db(dir.path()).await;
    let handler = SchemaToolHandler::new(single_instance(InstanceConfig::sqlite("default", path)));

    let output = handler
        .list_tables(ListTablesRequest::default())
        .await
        .into_result()
        .unwrap();
    assert_eq!(output.tables, vec!["orders", "secrets", "users"]);
}

#[tokio::test]
async fn test_describe_table_columns_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_fixture_db(dir.path()).await;
    let handler = SchemaToolHandler::new(single_instance(InstanceConfig::sqlite("default", path)));

    let output = handler.describe_table(describe("users")).await.into_result().unwrap();
    let expected = [
        ("id", "INTEGER"),
        ("name", "TEXT"),
        ("score", "REAL"),
        ("avatar", "BLOB"),
    ]
    .map(|(column_name, data_type)| ColumnInfo {
        column_name: column_name.to_string(),
        data_type: data_type.to_string(),
    });
    assert_eq!(output.columns, expected);
}

#[tokio::test]
async fn test_describe_missing_table_is_execution_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_fixture_db(dir.path()).await;
    let handler = SchemaToolHandler::new(single_instance(InstanceConfig::sqlite("default", path)));

    let err = handler
        .describe_table(describe("missing"))
        .await
        .into_result()
        .unwrap_err();
    assert_eq!(err.error_type, EXECUTION_ERROR_TYPE);
    assert_eq!(err.message, "Table 'missing' not found");
}

#[tokio::test]
async fn test_allow_list_filters_schema_tools() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_fixture_db(dir.path()).await;
    let config = InstanceConfig::sqlite("default", path).with_allowed_tables(["Users", "orders"]);
    let handler = SchemaToolHandler::new(single_instance(config));

    let output = handler
        .list_tables(ListTablesRequest::default())
        .await
        .into_result()
        .unwrap();
    assert_eq!(output.tables, vec!["orders", "users"]);

    let err = handler
        .describe_table(describe("secrets"))
        .await
        .into_result()
        .unwrap_err();
    assert_eq!(err.error_type, "TableNotAllowed");
    assert_eq!(err.hint.as_deref(), Some("Allowed tables: orders, users"));
}

#[tokio::test]
async fn test_run_query_caps_rows_with_warning() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_fixture_db(dir.path()).await;
    let mut config = InstanceConfig::sqlite("default", path);
    config.max_rows = 2;
    let handler = QueryToolHandler::new(single_instance(config));

    let output = handler
        .run_query(run("SELECT id, name FROM users ORDER BY id;"))
        .await
        .into_result()
        .unwrap();
    assert_eq!(output.rows.len(), 2);
    assert_eq!(output.warnings, vec!["LIMIT 2 automatically applied"]);
    assert_eq!(JsonValue::Object(output.rows[0].clone()), json!({"id": 1, "name": "alice"}));
}

#[tokio::test]
async fn test_run_query_respects_existing_limit() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_fixture_db(dir.path()).await;
    let handler = QueryToolHandler::new(single_instance(InstanceConfig::sqlite("default", path)));

    let output = handler
        .run_query(run("SELECT name FROM users ORDER BY id LIMIT 1"))
        .await
        .into_result()
        .unwrap();
    assert_eq!(output.rows.len(), 1);
    assert!(output.warnings.is_empty());
}

#[tokio::test]
async fn test_value_normalization() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_fixture_db(dir.path()).await;
    let handler = QueryToolHandler::new(single_instance(InstanceConfig::sqlite("default", path)));

    let output = handler
        .run_query(run("SELECT id, score, avatar FROM users ORDER BY id"))
        .await
        .into_result()
        .unwrap();
    let rows: Vec<JsonValue> = output.rows.into_iter().map(JsonValue::Object).collect();
    assert_eq!(
        rows,
        vec![
            json!({"id": 1, "score": 9.5, "avatar": "AP8="}),
            json!({"id": 2, "score": null, "avatar": null}),
            json!({"id": 3, "score": 7.25, "avatar": "hi"}),
        ]
    );
}

#[tokio::test]
async fn test_join_and_aggregate() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_fixture_db(dir.path()).await;
    let config = InstanceConfig::sqlite("default", path).with_allowed_tables(["users", "orders"]);
    let handler = QueryToolHandler::new(single_instance(config));

    let output = handler
        .run_query(run(
            "SELECT u.name, COUNT(o.id) AS order_count \
             FROM users u JOIN orders o ON o.user_id = u.id \
             GROUP BY u.name ORDER BY u.name",
        ))
        .await
        .into_result()
        .unwrap();
    let rows: Vec<JsonValue> = output.rows.into_iter().map(JsonValue::Object).collect();
    assert_eq!(
        rows,
        vec![
            json!({"name": "alice", "order_count": 2}),
            json!({"name": "carol", "order_count": 1}),
        ]
    );
}

#[tokio::test]
async fn test_policy_rejections_are_structured() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_fixture_db(dir.path()).await;
    let config = InstanceConfig::sqlite("default", path).with_allowed_tables(["users", "orders"]);
    let handler = QueryToolHandler::new(single_instance(config));

    let cases = [
        ("", "InvalidQuery"),
        ("SELECT 1; SELECT 2", "MultipleStatementsNotAllowed"),
        ("DELETE FROM users", "ReadOnlyViolation"),
        ("SELECT * FROM users WHERE name = 'x' OR 1 = 1 -- DROP", "ForbiddenKeyword"),
        ("SELECT token FROM secrets", "TableNotAllowed"),
        ("SELECT * FROM users WHERE id IN (SELECT id FROM secrets)", "TableNotAllowed"),
        ("SELECT * FROM 'secrets'", "TableNotAllowed"),
        (
            "SELECT * FROM (WITH secrets AS (SELECT 1 AS x) SELECT * FROM secrets) t, secrets",
            "TableNotAllowed",
        ),
        ("WITH secrets AS (SELECT * FROM secrets) SELECT * FROM secrets", "TableNotAllowed"),
    ];
    for (sql, expected) in cases {
        let err = handler.run_query(run(sql)).await.into_result().unwrap_err();
        assert_eq!(err.error_type, expected, "sql: {sql}");
        assert!(!err.message.is_empty());
    }
}

#[tokio::test]
async fn test_cte_named_like_a_hidden_table_is_usable() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_fixture_db(dir.path()).await;
    let config = InstanceConfig::sqlite("default", path).with_allowed_tables(["users"]);
    let handler = QueryToolHandler::new(single_instance(config));

    let output = handler
        .run_query(run(
            "WITH secrets AS (SELECT name FROM users WHERE id = 1) SELECT * FROM secrets",
        ))
        .await
        .into_result()
        .unwrap();
    let rows: Vec<JsonValue> = output.rows.into_iter().map(JsonValue::Object).collect();
    assert_eq!(rows, vec![json!({"name": "alice"})]);
}

#[tokio::test]
async fn test_engine_error_is_execution_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_fixture_db(dir.path()).await;
    let handler = QueryToolHandler::new(single_instance(InstanceConfig::sqlite("default", path)));

    let err = handler
        .run_query(run("SELECT no_such_column FROM users"))
        .await
        .into_result()
        .unwrap_err();
    assert_eq!(err.error_type, EXECUTION_ERROR_TYPE);
    assert!(err.message.contains("no_such_column"));
}

#[tokio::test]
async fn test_unknown_instance_hint() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_fixture_db(dir.path()).await;
    let handler = QueryToolHandler::new(single_instance(InstanceConfig::sqlite("default", path)));

    let err = handler
        .run_query(RunQueryRequest {
            sql: "SELECT 1".to_string(),
            instance_id: Some("warehouse".to_string()),
        })
        .await
        .into_result()
        .unwrap_err();
    assert_eq!(err.error_type, "UnknownInstance");
    assert_eq!(
        err.hint.as_deref(),
        Some("Provide a valid instance_id. Available instances: default")
    );
}

#[tokio::test]
async fn test_read_only_instance_opens_file_read_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_fixture_db(dir.path()).await;
    let registry = single_instance(InstanceConfig::sqlite("default", path));

    let context = registry.get(None).await.unwrap();
    let result = context
        .client
        .execute("INSERT INTO secrets (id, token) VALUES (2, 'x')")
        .await;
    assert!(result.is_err());

    let rows = context.client.execute("SELECT COUNT(*) AS n FROM secrets").await.unwrap();
    assert_eq!(rows[0].get("n"), Some(&json!(1)));
}

#[tokio::test]
async fn test_list_instances_hides_credentials() {
    let mut pg = InstanceConfig::new("crm", sql_mcp_server::models::EngineKind::Postgres);
    pg.password = Some("s3cret".to_string());
    let registry = std::sync::Arc::new(
        sql_mcp_server::db::InstanceRegistry::new([InstanceConfig::sqlite("default", "x.db"), pg])
            .unwrap(),
    );
    let handler = SchemaToolHandler::new(registry.clone());

    let output = handler.list_instances();
    let ids: Vec<_> = output.instances.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["crm", "default"]);
    let json = serde_json::to_string(&output).unwrap();
    assert!(!json.contains("s3cret"));
    assert_eq!(registry.connections_opened(), 0);
}
