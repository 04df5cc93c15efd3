//! Validation behavior that must hold for every supported engine.

use sql_mcp_server::DbError;
use sql_mcp_server::models::EngineKind;
use sql_mcp_server::tools::sql_validator::{ValidationPolicy, validate};

const ENGINES: [EngineKind; 4] = [
    EngineKind::Sqlite,
    EngineKind::Postgres,
    EngineKind::MySql,
    EngineKind::MsSql,
];

const READ_QUERIES: &[&str] = &[
    "SELECT * FROM users",
    "select id, name from users where name like 'a%' order by id",
    "SELECT u.id, o.total FROM users u JOIN orders o ON o.user_id = u.id",
    "WITH recent AS (SELECT id FROM orders WHERE total > 10) SELECT * FROM recent",
    "SELECT COUNT(*) AS n FROM users;",
];

fn capped(engine: EngineKind, max_rows: u64) -> ValidationPolicy {
    ValidationPolicy {
        max_rows,
        ..ValidationPolicy::new(engine)
    }
}

#[test]
fn test_writes_rejected_on_every_engine() {
    for engine in ENGINES {
        for sql in [
            "INSERT INTO users (id) VALUES (1)",
            "UPDATE users SET name = 'x' WHERE id = 1",
            "DELETE FROM users",
            "CREATE TABLE t (id INT)",
        ] {
            let err = validate(sql, &capped(engine, 10)).unwrap_err();
            assert!(
                matches!(err, DbError::ReadOnlyViolation),
                "{engine}: {sql:?} gave {err:?}"
            );
        }
    }
}

#[test]
fn test_multiple_statements_rejected_on_every_engine() {
    for engine in ENGINES {
        let err = validate("SELECT 1; SELECT 2", &capped(engine, 10)).unwrap_err();
        assert!(matches!(err, DbError::MultipleStatementsNotAllowed), "{engine}");

        // A separator inside a literal is not a boundary
        assert!(validate("SELECT ';' AS s", &capped(engine, 10)).is_ok(), "{engine}");
    }
}

#[test]
fn test_denylist_applies_inside_literals() {
    for engine in ENGINES {
        let err = validate("SELECT 'drop' AS word", &capped(engine, 10)).unwrap_err();
        assert_eq!(err.error_type(), "ForbiddenKeyword", "{engine}");
    }
}

#[test]
fn test_exactly_one_cap_is_applied() {
    for engine in ENGINES {
        let policy = capped(engine, 20);
        let cap = if engine.is_top_style() { "TOP 20" } else { "LIMIT 20" };
        for sql in READ_QUERIES {
            let result = validate(sql, &policy).unwrap();
            assert_eq!(result.query.matches(cap).count(), 1, "{engine}: {}", result.query);
            assert_eq!(
                result.warnings,
                vec![format!("{cap} automatically applied")],
                "{engine}: {sql:?}"
            );
            assert!(!result.query.ends_with(';'));
        }
    }
}

#[test]
fn test_revalidation_is_a_fixed_point() {
    for engine in ENGINES {
        let policy = capped(engine, 20);
        for sql in READ_QUERIES {
            let first = validate(sql, &policy).unwrap();
            let second = validate(&first.query, &policy).unwrap();
            assert_eq!(second.query, first.query, "{engine}: {sql:?}");
            assert!(second.warnings.is_empty(), "{engine}: {sql:?}");
        }
    }
}

#[test]
fn test_uncapped_policy_only_trims() {
    for engine in ENGINES {
        let result = validate("  SELECT * FROM users ;\n", &capped(engine, 0)).unwrap();
        assert_eq!(result.query, "SELECT * FROM users", "{engine}");
        assert!(result.warnings.is_empty());
    }
}

#[test]
fn test_allow_list_is_case_insensitive_everywhere() {
    for engine in ENGINES {
        let policy = ValidationPolicy {
            allowed_tables: ["users".to_string()].into_iter().collect(),
            ..capped(engine, 0)
        };
        assert!(validate("SELECT * FROM USERS", &policy).is_ok(), "{engine}");
        let err = validate("SELECT * FROM users JOIN orders ON 1 = 1", &policy).unwrap_err();
        assert_eq!(err.error_type(), "TableNotAllowed", "{engine}");
        assert_eq!(err.to_string(), "Access denied to table(s): orders");
    }
}

#[test]
fn test_allow_list_holds_for_every_table_position() {
    for engine in ENGINES {
        let policy = ValidationPolicy {
            allowed_tables: ["users".to_string()].into_iter().collect(),
            ..capped(engine, 0)
        };
        for sql in [
            "SELECT * FROM 'secrets'",
            "SELECT id FROM users UNION TABLE secrets",
            "SELECT * FROM (WITH secrets AS (SELECT id FROM users) SELECT * FROM secrets) t, secrets",
        ] {
            let err = validate(sql, &policy).unwrap_err();
            assert_eq!(err.error_type(), "TableNotAllowed", "{engine}: {sql:?}");
        }
        assert!(
            validate("WITH secrets AS (SELECT id FROM users) SELECT * FROM secrets", &policy).is_ok(),
            "{engine}"
        );
    }
}
