//! SQL statement validation for the read-only gateway.
//!
//! Every statement passes through a fixed sequence of gates before it is
//! allowed near a backend:
//!
//! 1. empty input is rejected
//! 2. exactly one statement is allowed
//! 3. the statement must be read-like (`SELECT`, or `WITH ... SELECT`)
//! 4. a denylist of dangerous keywords is checked over the raw text, and
//!    functions that run SQL given to them as text are refused
//! 5. referenced tables are checked against the instance allow-list
//! 6. a row cap (`LIMIT n` or `SELECT TOP n`) is injected when missing
//!
//! Statement boundaries and keywords come from the
//! [sqlparser](https://docs.rs/sqlparser/) tokenizer with the engine's dialect,
//! so separators and keywords inside string literals, quoted identifiers and
//! comments are never mistaken for structure. The denylist gate is a coarse
//! lexical filter that runs over the raw text including literals; it is
//! defense in depth, not a complete injection filter.

use super::table_refs;
use crate::error::{DbError, DbResult};
use crate::models::{EngineKind, InstanceConfig, ValidationResult};
use sqlparser::dialect::{Dialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::tokenizer::{Location, Token, TokenWithSpan, Tokenizer};
use std::collections::BTreeSet;
use std::ops::Range;
use tracing::debug;

const EMPTY_QUERY: &str = "Query is empty";

/// Whole tokens that are never allowed anywhere in the text.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "DROP", "ALTER", "TRUNCATE", "EXEC", "EXECUTE", "MERGE", "GRANT", "REVOKE", "DENY", "CALL",
];

/// Catalog procedure prefixes (SQL Server extended and system procedures).
const FORBIDDEN_PREFIXES: &[&str] = &["XP_", "SP_"];

/// Functions that execute SQL passed as a string or reach another server.
const SQL_EXECUTING_FUNCTIONS: &[&str] = &[
    "QUERY_TO_XML",
    "QUERY_TO_XMLSCHEMA",
    "QUERY_TO_XML_AND_XMLSCHEMA",
    "CURSOR_TO_XML",
    "TS_STAT",
    "DBLINK",
    "DBLINK_EXEC",
    "DBLINK_OPEN",
    "DBLINK_SEND_QUERY",
    "OPENQUERY",
    "OPENROWSET",
    "OPENDATASOURCE",
];

/// Verbs that can head the main query of a `WITH` statement.
const DATA_VERBS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "MERGE", "REPLACE", "UPSERT", "VALUES",
];

/// Tokens that make an otherwise read-like statement write or lock data.
const WRITE_TOKENS: &[&str] = &["INSERT", "UPDATE", "DELETE", "UPSERT", "INTO"];

/// Policy knobs the validator enforces, taken from one instance's configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationPolicy {
    pub engine: EngineKind,
    pub read_only: bool,
    /// 0 disables row capping
    pub max_rows: u64,
    /// Lowercase names; empty means unrestricted
    pub allowed_tables: BTreeSet<String>,
}

impl ValidationPolicy {
    pub fn new(engine: EngineKind) -> Self {
        Self {
            engine,
            read_only: true,
            max_rows: 0,
            allowed_tables: BTreeSet::new(),
        }
    }

    pub fn from_config(config: &InstanceConfig) -> Self {
        Self {
            engine: config.engine,
            read_only: config.read_only,
            max_rows: config.max_rows,
            allowed_tables: config.allowed_tables.clone(),
        }
    }
}

/// Validator bound to one instance's policy.
#[derive(Debug, Clone)]
pub struct SqlValidator {
    policy: ValidationPolicy,
}

impl SqlValidator {
    pub fn new(policy: ValidationPolicy) -> Self {
        Self { policy }
    }

    pub fn for_instance(config: &InstanceConfig) -> Self {
        Self::new(ValidationPolicy::from_config(config))
    }

    pub fn policy(&self) -> &ValidationPolicy {
        &self.policy
    }

    pub fn validate(&self, sql: &str) -> DbResult<ValidationResult> {
        validate(sql, &self.policy)
    }
}

/// Get the appropriate SQL dialect for the given engine.
fn get_dialect(engine: EngineKind) -> Box<dyn Dialect> {
    match engine {
        EngineKind::Sqlite => Box::new(SQLiteDialect {}),
        EngineKind::Postgres => Box::new(PostgreSqlDialect {}),
        EngineKind::MySql => Box::new(MySqlDialect {}),
        EngineKind::MsSql => Box::new(MsSqlDialect {}),
    }
}

/// Validate `sql` against `policy`, returning the text to execute.
///
/// # Examples
///
/// ```
/// use sql_mcp_server::models::EngineKind;
/// use sql_mcp_server::tools::sql_validator::{ValidationPolicy, validate};
///
/// let policy = ValidationPolicy { max_rows: 50, ..ValidationPolicy::new(EngineKind::Postgres) };
/// let result = validate("SELECT * FROM users;", &policy).unwrap();
/// assert_eq!(result.query, "SELECT * FROM users LIMIT 50");
///
/// assert!(validate("DELETE FROM users", &policy).is_err());
/// ```
pub fn validate(sql: &str, policy: &ValidationPolicy) -> DbResult<ValidationResult> {
    if sql.trim().is_empty() {
        return Err(DbError::invalid_query(EMPTY_QUERY));
    }

    let mut statements = split_statements(tokenize(sql, policy.engine)?);
    let statement = match statements.len() {
        0 => return Err(DbError::invalid_query(EMPTY_QUERY)),
        1 => statements.remove(0),
        _ => return Err(DbError::MultipleStatementsNotAllowed),
    };

    if !is_read_like(&statement) {
        return Err(if policy.read_only {
            DbError::ReadOnlyViolation
        } else {
            DbError::NonSelectNotAllowed
        });
    }

    if let Some(keyword) =
        find_forbidden_keyword(sql).or_else(|| find_sql_executing_function(&statement))
    {
        return Err(DbError::forbidden_keyword(keyword));
    }

    if !policy.allowed_tables.is_empty() {
        let refs = table_refs::extract_table_refs(&statement);
        let denied: Vec<String> = refs
            .names
            .into_iter()
            .filter(|name| !table_refs::is_table_allowed(name, &policy.allowed_tables))
            .chain(refs.unresolved)
            .collect();
        if !denied.is_empty() {
            return Err(DbError::table_not_allowed(
                denied,
                policy.allowed_tables.iter().cloned().collect(),
            ));
        }
    }

    apply_row_cap(sql, &statement, policy)
}

/// Tokenize with the engine dialect, keeping source spans.
pub(crate) fn tokenize(sql: &str, engine: EngineKind) -> DbResult<Vec<TokenWithSpan>> {
    let dialect = get_dialect(engine);
    Tokenizer::new(dialect.as_ref(), sql)
        .tokenize_with_location()
        .map_err(|e| DbError::invalid_query(format!("Unable to parse SQL: {}", e)))
}

/// Group significant tokens into statements, dropping empty ones.
pub(crate) fn split_statements(tokens: Vec<TokenWithSpan>) -> Vec<Vec<TokenWithSpan>> {
    let mut statements = Vec::new();
    let mut current = Vec::new();
    for tok in tokens {
        match tok.token {
            Token::Whitespace(_) | Token::EOF => {}
            Token::SemiColon => {
                if !current.is_empty() {
                    statements.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(tok),
        }
    }
    if !current.is_empty() {
        statements.push(current);
    }
    statements
}

/// True for an unquoted word equal to `keyword`, ignoring case.
pub(crate) fn is_keyword(token: &Token, keyword: &str) -> bool {
    matches!(token, Token::Word(w) if w.quote_style.is_none() && w.value.eq_ignore_ascii_case(keyword))
}

pub(crate) fn is_any_keyword(token: &Token, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| is_keyword(token, k))
}

fn keyword_at(statement: &[TokenWithSpan], index: usize, keyword: &str) -> bool {
    statement
        .get(index)
        .is_some_and(|t| is_keyword(&t.token, keyword))
}

fn is_read_like(statement: &[TokenWithSpan]) -> bool {
    let lead = statement
        .iter()
        .position(|t| !matches!(t.token, Token::LParen));
    let Some(lead) = lead else {
        return false;
    };

    let heads_select = if keyword_at(statement, lead, "SELECT") {
        true
    } else if keyword_at(statement, lead, "WITH") {
        with_body_selects(&statement[lead + 1..])
    } else {
        false
    };

    heads_select && !contains_write_token(statement)
}

/// For `WITH` statements: the first data verb after the CTE list must be `SELECT`.
fn with_body_selects(tokens: &[TokenWithSpan]) -> bool {
    let mut depth = 0usize;
    let mut prev: Option<&Token> = None;
    for (i, tok) in tokens.iter().enumerate() {
        match &tok.token {
            Token::LParen => {
                // `... AS (...) (SELECT ...)`: parenthesized main query
                if depth == 0 && matches!(prev, Some(Token::RParen)) {
                    return tokens[i..]
                        .iter()
                        .find(|t| !matches!(t.token, Token::LParen))
                        .is_some_and(|t| is_keyword(&t.token, "SELECT"));
                }
                depth += 1;
            }
            Token::RParen => depth = depth.saturating_sub(1),
            t if depth == 0 && is_any_keyword(t, DATA_VERBS) => {
                return is_keyword(t, "SELECT");
            }
            _ => {}
        }
        prev = Some(&tok.token);
    }
    false
}

fn contains_write_token(statement: &[TokenWithSpan]) -> bool {
    statement.iter().enumerate().any(|(i, tok)| {
        if is_any_keyword(&tok.token, WRITE_TOKENS) {
            return true;
        }
        // REPLACE(str, from, to) is a scalar function everywhere
        is_keyword(&tok.token, "REPLACE")
            && !matches!(statement.get(i + 1).map(|t| &t.token), Some(Token::LParen))
    })
}

/// Scan identifier-shaped tokens of the raw text for the denylist.
fn find_forbidden_keyword(sql: &str) -> Option<String> {
    sql.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|word| !word.is_empty())
        .map(|word| word.to_ascii_uppercase())
        .find(|word| {
            FORBIDDEN_KEYWORDS.contains(&word.as_str())
                || FORBIDDEN_PREFIXES.iter().any(|p| word.starts_with(p))
        })
}

/// A call to one of [`SQL_EXECUTING_FUNCTIONS`], schema-qualified or not.
fn find_sql_executing_function(statement: &[TokenWithSpan]) -> Option<String> {
    statement.windows(2).find_map(|pair| match (&pair[0].token, &pair[1].token) {
        (Token::Word(w), Token::LParen)
            if SQL_EXECUTING_FUNCTIONS
                .iter()
                .any(|f| w.value.eq_ignore_ascii_case(f)) =>
        {
            Some(w.value.to_ascii_uppercase())
        }
        _ => None,
    })
}

/// True when any of `keywords` appears outside parentheses.
fn has_top_level_keyword(statement: &[TokenWithSpan], keywords: &[&str]) -> bool {
    let mut depth = 0usize;
    for tok in statement {
        match tok.token {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            _ if depth == 0 && is_any_keyword(&tok.token, keywords) => return true,
            _ => {}
        }
    }
    false
}

/// Index of the main query's `SELECT`: the first one at depth 0, else the first one.
fn main_select_index(statement: &[TokenWithSpan]) -> Option<usize> {
    let mut depth = 0usize;
    for (i, tok) in statement.iter().enumerate() {
        match tok.token {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            _ if depth == 0 && is_keyword(&tok.token, "SELECT") => return Some(i),
            _ => {}
        }
    }
    statement
        .iter()
        .position(|t| is_keyword(&t.token, "SELECT"))
}

/// Index of the last token of `SELECT [DISTINCT | ALL]` for the main query.
fn main_select_head_end(statement: &[TokenWithSpan]) -> Option<usize> {
    let mut end = main_select_index(statement)?;
    while keyword_at(statement, end + 1, "DISTINCT") || keyword_at(statement, end + 1, "ALL") {
        end += 1;
    }
    Some(end)
}

/// A top-level `LIMIT`/`FETCH`, or `TOP` right after the main `SELECT`.
fn has_row_cap(statement: &[TokenWithSpan]) -> bool {
    has_top_level_keyword(statement, &["LIMIT", "FETCH"])
        || main_select_head_end(statement).is_some_and(|end| keyword_at(statement, end + 1, "TOP"))
}

fn apply_row_cap(
    sql: &str,
    statement: &[TokenWithSpan],
    policy: &ValidationPolicy,
) -> DbResult<ValidationResult> {
    let range = statement_range(sql, statement);
    let normalized = &sql[range.clone()];

    if policy.max_rows == 0 || has_row_cap(statement) {
        return Ok(ValidationResult::new(normalized));
    }

    let n = policy.max_rows;
    let (query, warning) = if policy.engine.is_top_style()
        && has_top_level_keyword(statement, &["OFFSET"])
    {
        // SQL Server refuses TOP next to OFFSET; the paging clause takes the cap
        (
            format!("{} FETCH NEXT {} ROWS ONLY", normalized, n),
            format!("FETCH NEXT {} ROWS ONLY automatically applied", n),
        )
    } else if policy.engine.is_top_style() {
        let insert_at = main_select_head_end(statement)
            .and_then(|i| location_to_offset(sql, statement[i].span.end))
            .filter(|offset| range.contains(offset) || *offset == range.end)
            .ok_or_else(|| {
                DbError::invalid_query("Unable to locate the SELECT keyword for the row limit")
            })?;
        (
            format!(
                "{} TOP {}{}",
                &sql[range.start..insert_at],
                n,
                &sql[insert_at..range.end]
            ),
            format!("TOP {} automatically applied", n),
        )
    } else {
        (
            format!("{} LIMIT {}", normalized, n),
            format!("LIMIT {} automatically applied", n),
        )
    };

    debug!(engine = %policy.engine, max_rows = n, "Row cap injected");
    Ok(ValidationResult {
        query,
        warnings: vec![warning],
    })
}

/// Byte range from the first to the last significant token of the statement.
///
/// Drops leading and trailing whitespace, comments and semicolons.
fn statement_range(sql: &str, statement: &[TokenWithSpan]) -> Range<usize> {
    let bounds = statement
        .first()
        .zip(statement.last())
        .and_then(|(first, last)| {
            let start = location_to_offset(sql, first.span.start)?;
            let end = location_to_offset(sql, last.span.end)?;
            (start < end).then_some(start..end)
        });
    bounds.unwrap_or_else(|| {
        let trimmed = sql.trim_end().trim_end_matches(';').trim_end();
        let start = trimmed.len() - trimmed.trim_start().len();
        start..trimmed.len()
    })
}

/// Convert a tokenizer location (1-based line and character column) to a byte offset.
fn location_to_offset(sql: &str, loc: Location) -> Option<usize> {
    let line = usize::try_from(loc.line).ok()?.checked_sub(1)?;
    let column = usize::try_from(loc.column).ok()?.checked_sub(1)?;
    let line_start = if line == 0 {
        0
    } else {
        sql.match_indices('\n').nth(line - 1)?.0 + 1
    };
    let rest = &sql[line_start..];
    rest.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(rest.len()))
        .nth(column)
        .map(|i| line_start + i)
}
