//! Shared fixtures for integration tests.

#![allow(dead_code)]

use sql_mcp_server::db::InstanceRegistry;
use sql_mcp_server::models::InstanceConfig;
use sqlx::ConnectOptions;
use sqlx::Connection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use std::path::Path;
use std::sync::Arc;

const FIXTURE_SQL: &[&str] = &[
    "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, score REAL, avatar BLOB)",
    "CREATE TABLE orders (id INTEGER PRIMARY KEY, user_id INTEGER NOT NULL, total NUMERIC, created_at TEXT)",
    "CREATE TABLE secrets (id INTEGER PRIMARY KEY, token TEXT)",
    "INSERT INTO users (id, name, score, avatar) VALUES (1, 'alice', 9.5, X'00FF')",
    "INSERT INTO users (id, name, score, avatar) VALUES (2, 'bob', NULL, NULL)",
    "INSERT INTO users (id, name, score, avatar) VALUES (3, 'carol', 7.25, X'6869')",
    "INSERT INTO orders (id, user_id, total, created_at) VALUES (10, 1, 19.99, '2024-03-01T10:00:00')",
    "INSERT INTO orders (id, user_id, total, created_at) VALUES (11, 1, 5, '2024-03-02T11:30:00')",
    "INSERT INTO orders (id, user_id, total, created_at) VALUES (12, 3, 42.5, '2024-03-05T09:15:00')",
    "INSERT INTO secrets (id, token) VALUES (1, 'hunter2')",
];

/// Create `fixture.db` under `dir` with users, orders and secrets tables.
pub async fn create_fixture_db(dir: &Path) -> String {
    let path = dir.join("fixture.db");
    let mut conn = SqliteConnectOptions::new()
        .filename(&path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete)
        .connect()
        .await
        .expect("create fixture database");
    for sql in FIXTURE_SQL {
        sqlx::query(sql)
            .execute(&mut conn)
            .await
            .expect("seed fixture database");
    }
    conn.close().await.expect("close fixture connection");
    path.to_string_lossy().into_owned()
}

/// A registry holding a single `default` SQLite instance.
pub fn single_instance(config: InstanceConfig) -> Arc<InstanceRegistry> {
    Arc::new(InstanceRegistry::new([config]).expect("valid registry"))
}
