//! Table reference extraction for allow-list enforcement.
//!
//! Walks the token stream of one statement and collects every object that
//! appears where a table can appear: after `FROM`, `JOIN`, `APPLY`, `TABLE`,
//! or a comma in a `FROM` list, including inside subqueries. CTE names are
//! not references inside the query that declares them, and neither are
//! table-valued function calls or the `FROM` inside `EXTRACT(... FROM ...)`-style
//! functions. A token in table position that is not a name is reported as
//! unresolved so the caller can refuse the statement.

use super::sql_validator::{is_any_keyword, is_keyword};
use sqlparser::tokenizer::{Token, TokenWithSpan};
use std::collections::BTreeSet;
use std::ops::Range;

/// Words that start a table position.
const TABLE_INTRODUCERS: &[&str] = &["FROM", "JOIN", "APPLY", "STRAIGHT_JOIN", "TABLE"];

/// Words that end a table position (plus join prefixes, which lead back to `JOIN`).
const CLAUSE_BOUNDARIES: &[&str] = &[
    "WHERE", "ON", "USING", "GROUP", "ORDER", "HAVING", "LIMIT", "OFFSET", "UNION", "EXCEPT",
    "INTERSECT", "MINUS", "WINDOW", "FETCH", "FOR", "QUALIFY", "SELECT", "LEFT", "RIGHT",
    "INNER", "OUTER", "FULL", "CROSS", "NATURAL",
];

/// Functions whose argument syntax uses `FROM` (`EXTRACT(YEAR FROM ts)`).
const FROM_SYNTAX_FUNCTIONS: &[&str] = &[
    "EXTRACT", "SUBSTRING", "SUBSTR", "TRIM", "OVERLAY", "POSITION",
];

/// Pseudo tables that are never subject to the allow-list.
const PSEUDO_TABLES: &[&str] = &["dual"];

/// Tables referenced by one statement.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TableRefs {
    /// Lowercase, possibly schema-qualified names
    pub names: BTreeSet<String>,
    /// Tokens found in table position that are not names, as written
    pub unresolved: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Scan,
    /// Expecting a table name
    Table,
    /// Just read a table; alias, hints or a comma may follow
    AfterTable,
}

#[derive(Debug, Default)]
struct ParenFrame {
    opened_in_table_position: bool,
    from_is_syntax: bool,
    saw_select: bool,
}

/// A CTE name and the token range where it shadows real tables.
#[derive(Debug)]
struct CteScope {
    name: String,
    visible: Range<usize>,
}

/// Check a (possibly schema-qualified) name against a lowercase allow-list.
///
/// An empty allow-list allows everything. A qualified name is allowed when
/// either the full name or its last segment is listed.
pub fn is_table_allowed(name: &str, allowed: &BTreeSet<String>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let lower = name.to_lowercase();
    let base = lower.rsplit('.').next().unwrap_or(&lower);
    allowed.contains(&lower) || allowed.contains(base)
}

/// Collect the tables referenced by one statement.
pub fn extract_table_refs(statement: &[TokenWithSpan]) -> TableRefs {
    let tokens: Vec<&Token> = statement.iter().map(|t| &t.token).collect();
    let matching = match_parens(&tokens);
    let ctes = cte_scopes(&tokens, &matching);
    let is_cte = |name: &str, at: usize| {
        !name.contains('.') && ctes.iter().any(|c| c.name == name && c.visible.contains(&at))
    };

    let mut refs = TableRefs::default();
    let mut mode = Mode::Scan;
    let mut stack: Vec<ParenFrame> = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        let tok = tokens[i];

        if matches!(tok, Token::RParen) {
            let frame = stack.pop().unwrap_or_default();
            mode = if frame.opened_in_table_position {
                Mode::AfterTable
            } else {
                Mode::Scan
            };
            i += 1;
            continue;
        }

        match mode {
            Mode::Scan => {
                match tok {
                    Token::LParen => stack.push(ParenFrame {
                        from_is_syntax: i > 0 && is_any_keyword(tokens[i - 1], FROM_SYNTAX_FUNCTIONS),
                        ..ParenFrame::default()
                    }),
                    t if is_keyword(t, "SELECT") => {
                        if let Some(frame) = stack.last_mut() {
                            frame.saw_select = true;
                        }
                    }
                    t if is_keyword(t, "FROM") => {
                        let function_syntax =
                            stack.last().is_some_and(|f| f.from_is_syntax && !f.saw_select);
                        if !function_syntax && !is_distinct_from(&tokens, i) {
                            mode = Mode::Table;
                        }
                    }
                    t if is_any_keyword(t, TABLE_INTRODUCERS) => mode = Mode::Table,
                    _ => {}
                }
                i += 1;
            }
            Mode::Table => match tok {
                Token::LParen => {
                    let subquery = tokens.get(i + 1).is_some_and(|t| {
                        is_keyword(t, "SELECT") || is_keyword(t, "WITH") || is_keyword(t, "VALUES")
                    });
                    stack.push(ParenFrame {
                        opened_in_table_position: true,
                        ..ParenFrame::default()
                    });
                    if subquery {
                        mode = Mode::Scan;
                    }
                    i += 1;
                }
                t if is_keyword(t, "LATERAL") || is_keyword(t, "ONLY") => i += 1,
                Token::Word(_) => {
                    let (name, next) = read_object_name(&tokens, i);
                    if matches!(tokens.get(next), Some(Token::LParen)) {
                        // table-valued function; arguments are scanned normally
                        stack.push(ParenFrame {
                            opened_in_table_position: true,
                            ..ParenFrame::default()
                        });
                        mode = Mode::Scan;
                        i = next + 1;
                        continue;
                    }
                    if !is_cte(&name, i) && !PSEUDO_TABLES.contains(&name.as_str()) {
                        refs.names.insert(name);
                    }
                    mode = Mode::AfterTable;
                    i = next;
                }
                // SQLite resolves a string literal in table position as a name
                Token::SingleQuotedString(name) | Token::DoubleQuotedString(name) => {
                    refs.names.insert(name.to_lowercase());
                    mode = Mode::AfterTable;
                    i += 1;
                }
                other => {
                    refs.unresolved.push(other.to_string());
                    mode = Mode::Scan;
                }
            },
            Mode::AfterTable => match tok {
                Token::Comma => {
                    mode = Mode::Table;
                    i += 1;
                }
                Token::LParen => {
                    // column aliases or table hints: `t AS x(a, b)`, `t WITH (NOLOCK)`
                    i = matching[i].map_or(tokens.len(), |close| close + 1);
                }
                t if is_any_keyword(t, TABLE_INTRODUCERS) => {
                    mode = Mode::Table;
                    i += 1;
                }
                t if is_any_keyword(t, CLAUSE_BOUNDARIES) => mode = Mode::Scan,
                Token::Word(_) | Token::Period => i += 1,
                _ => mode = Mode::Scan,
            },
        }
    }

    refs
}

/// Index of the matching `)` for every `(`.
fn match_parens(tokens: &[&Token]) -> Vec<Option<usize>> {
    let mut matching = vec![None; tokens.len()];
    let mut open = Vec::new();
    for (i, tok) in tokens.iter().enumerate() {
        match tok {
            Token::LParen => open.push(i),
            Token::RParen => {
                if let Some(o) = open.pop() {
                    matching[o] = Some(i);
                }
            }
            _ => {}
        }
    }
    matching
}

/// CTEs declared by `WITH [RECURSIVE] name [(cols)] AS [[NOT] MATERIALIZED] (...)`
/// lists, each visible from the end of its body (from its name when
/// recursive) to the end of the enclosing parenthesis or statement.
fn cte_scopes(tokens: &[&Token], matching: &[Option<usize>]) -> Vec<CteScope> {
    let mut scopes = Vec::new();
    let mut open = Vec::new();
    for (start, tok) in tokens.iter().enumerate() {
        match tok {
            Token::LParen => {
                open.push(start);
                continue;
            }
            Token::RParen => {
                open.pop();
                continue;
            }
            t if !is_keyword(t, "WITH") => continue,
            _ => {}
        }

        let scope_end = open
            .last()
            .and_then(|&o| matching[o])
            .unwrap_or(tokens.len());
        let mut j = start + 1;
        let recursive = tokens.get(j).is_some_and(|t| is_keyword(t, "RECURSIVE"));
        if recursive {
            j += 1;
        }
        while let Some(Token::Word(word)) = tokens.get(j) {
            let name = word.value.to_lowercase();
            let name_at = j;
            j += 1;
            if matches!(tokens.get(j), Some(Token::LParen)) {
                let Some(close) = matching[j] else { break };
                j = close + 1;
            }
            if !tokens.get(j).is_some_and(|t| is_keyword(t, "AS")) {
                break;
            }
            j += 1;
            if tokens.get(j).is_some_and(|t| is_keyword(t, "NOT")) {
                j += 1;
            }
            if tokens.get(j).is_some_and(|t| is_keyword(t, "MATERIALIZED")) {
                j += 1;
            }
            if !matches!(tokens.get(j), Some(Token::LParen)) {
                break;
            }
            let Some(close) = matching[j] else { break };
            let visible_from = if recursive { name_at } else { close + 1 };
            scopes.push(CteScope {
                name,
                visible: visible_from..scope_end,
            });
            j = close + 1;
            if !matches!(tokens.get(j), Some(Token::Comma)) {
                break;
            }
            j += 1;
        }
    }
    scopes
}

/// Read `a`, `a.b` or `a.b.c` starting at `start`; returns the lowercase name
/// and the index after it.
fn read_object_name(tokens: &[&Token], start: usize) -> (String, usize) {
    let mut parts = Vec::new();
    if let Token::Word(w) = tokens[start] {
        parts.push(w.value.to_lowercase());
    }
    let mut j = start + 1;
    while matches!(tokens.get(j), Some(Token::Period)) {
        match tokens.get(j + 1) {
            Some(Token::Word(w)) => {
                parts.push(w.value.to_lowercase());
                j += 2;
            }
            _ => break,
        }
    }
    (parts.join("."), j)
}

/// `a IS [NOT] DISTINCT FROM b`
fn is_distinct_from(tokens: &[&Token], from_index: usize) -> bool {
    let before = |n: usize| from_index.checked_sub(n).map(|k| tokens[k]);
    if !before(1).is_some_and(|t| is_keyword(t, "DISTINCT")) {
        return false;
    }
    before(2).is_some_and(|t| is_keyword(t, "IS"))
        || (before(2).is_some_and(|t| is_keyword(t, "NOT"))
            && before(3).is_some_and(|t| is_keyword(t, "IS")))
}
