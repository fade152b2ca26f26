//! Statement Checks
//!
//! Raw SQL is checked before a connection is acquired:
//! - Empty statements are rejected (`InvalidInput`)
//! - Only a single statement is accepted (a trailing `;` is fine)
//! - The number of placeholders must match the number of supplied parameters
//! - In read-only mode only statements that cannot modify data pass
//!
//! # Scanning Strategy
//! String literals, quoted identifiers, comments and (`PostgreSQL`) dollar-quoted
//! bodies are masked out first, so a `;`, `?` or `$1` inside them is never
//! mistaken for syntax. Each engine keeps its own placeholder and keyword rules.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::engine::DatabaseType;
use crate::error::{ExplorerError, Result};

/// Execution policy applied to the `query` tool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryPolicy {
    /// Reject statements that could modify data
    pub read_only: bool,
    /// Upper bound on returned rows (`None` for unlimited)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<usize>,
}

impl QueryPolicy {
    /// Per-call row limit, capped by the configured limit
    #[must_use]
    pub fn effective_max_rows(&self, requested: Option<usize>) -> Option<usize> {
        match (self.max_rows, requested) {
            (Some(cap), Some(requested)) => Some(cap.min(requested)),
            (cap, requested) => cap.or(requested),
        }
    }
}

/// Validate a statement against the policy before it reaches a connection
pub fn check_statement(
    database: &str,
    engine: DatabaseType,
    sql: &str,
    param_count: usize,
    policy: &QueryPolicy,
) -> Result<()> {
    let masked = mask_literals(sql, engine);

    let statements = masked.split(';').filter(|s| !s.trim().is_empty()).count();
    if statements == 0 {
        return Err(ExplorerError::invalid_input("SQL statement cannot be empty"));
    }
    if statements > 1 {
        return Err(ExplorerError::query_error(
            database,
            "multiple statements are not supported; send one statement per call",
        ));
    }

    let expected = count_placeholders(&masked, engine);
    if expected != param_count {
        return Err(ExplorerError::query_error(
            database,
            format!("statement has {expected} placeholder(s) but {param_count} parameter(s) were supplied"),
        ));
    }

    if policy.read_only && !is_read_only(&masked, engine) {
        return Err(ExplorerError::query_error(
            database,
            format!(
                "read-only mode: only {} statements are allowed",
                match engine {
                    DatabaseType::Postgres => "SELECT, WITH, EXPLAIN, SHOW, VALUES and TABLE",
                    DatabaseType::SQLite => "SELECT, WITH, EXPLAIN, VALUES and PRAGMA (without assignment)",
                }
            ),
        ));
    }

    Ok(())
}

/// Replace literals, quoted identifiers and comments with a single space
fn mask_literals(sql: &str, engine: DatabaseType) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;

    while let Some(ch) = rest.chars().next() {
        let skip = if rest.starts_with("--") {
            Some(rest.find('\n').unwrap_or(rest.len()))
        } else if rest.starts_with("/*") {
            Some(rest[2..].find("*/").map_or(rest.len(), |i| i + 4))
        } else if ch == '\'' || ch == '"' || (ch == '`' && engine == DatabaseType::SQLite) {
            let escaped = ch == '\'' && engine == DatabaseType::Postgres && follows_escape_prefix(&out);
            Some(closing_quote(rest, ch, escaped))
        } else if ch == '$' && engine == DatabaseType::Postgres {
            dollar_tag(rest).map(|tag_len| {
                let tag = &rest[..tag_len];
                rest[tag_len..].find(tag).map_or(rest.len(), |i| tag_len + i + tag_len)
            })
        } else {
            None
        };

        match skip {
            Some(len) => {
                out.push(' ');
                rest = &rest[len..];
            }
            None => {
                out.push(ch);
                rest = &rest[ch.len_utf8()..];
            }
        }
    }

    out
}

/// Byte length of a quoted run starting at `s[0]`; doubled quotes are escapes,
/// and so is `\x` inside a PostgreSQL `E'...'` string
fn closing_quote(s: &str, quote: char, backslash_escapes: bool) -> usize {
    let mut chars = s.char_indices().skip(1).peekable();
    while let Some((i, c)) = chars.next() {
        if backslash_escapes && c == '\\' {
            chars.next();
            continue;
        }
        if c == quote {
            if chars.peek().map(|(_, next)| *next) == Some(quote) {
                chars.next();
                continue;
            }
            return i + c.len_utf8();
        }
    }
    s.len()
}

// `E'` / `e'` opens an escape string unless the `E` ends a longer identifier
fn follows_escape_prefix(before: &str) -> bool {
    let mut tail = before.chars().rev();
    matches!(tail.next(), Some('E' | 'e')) && !tail.next().is_some_and(is_ident_char)
}

/// Length of a `$$` / `$tag$` opener; `$1` is a placeholder, not a tag
fn dollar_tag(s: &str) -> Option<usize> {
    let body = &s[1..];
    let ident_len = body.find(|c: char| !(c.is_alphanumeric() || c == '_')).unwrap_or(body.len());
    if body.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    body[ident_len..].starts_with('$').then_some(ident_len + 2)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Number of parameters the statement binds
fn count_placeholders(masked: &str, engine: DatabaseType) -> usize {
    match engine {
        DatabaseType::Postgres => count_postgres_placeholders(masked),
        DatabaseType::SQLite => count_sqlite_placeholders(masked),
    }
}

// PostgreSQL: `$n`, the highest index wins
fn count_postgres_placeholders(masked: &str) -> usize {
    let mut highest = 0;
    let mut chars = masked.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '$' {
            continue;
        }
        let mut digits = String::new();
        while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
            digits.push(*d);
            chars.next();
        }
        if let Ok(n) = digits.parse::<usize>() {
            highest = highest.max(n);
        }
    }
    highest
}

// SQLite: `?` takes the next index, `?NNN` an explicit one, and each distinct
// `:name`/`@name`/`$name` the next index on first use
fn count_sqlite_placeholders(masked: &str) -> usize {
    let mut highest = 0;
    let mut named: HashMap<String, usize> = HashMap::new();
    let mut chars = masked.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '?' => {
                let mut digits = String::new();
                while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                    digits.push(*d);
                    chars.next();
                }
                match digits.parse::<usize>() {
                    Ok(n) => highest = highest.max(n),
                    Err(_) => highest += 1,
                }
            }
            ':' | '@' | '$' if chars.peek().is_some_and(|c| is_ident_char(*c)) => {
                let mut name = String::from(ch);
                while let Some(c) = chars.peek().filter(|c| is_ident_char(**c)) {
                    name.push(*c);
                    chars.next();
                }
                if !named.contains_key(&name) {
                    highest += 1;
                    named.insert(name, highest);
                }
            }
            _ => {}
        }
    }
    highest
}

/// Check if a statement is read-only (engine-specific)
fn is_read_only(masked: &str, engine: DatabaseType) -> bool {
    let upper = masked.to_uppercase();
    let words: Vec<&str> = upper.split(|c: char| !is_ident_char(c)).filter(|w| !w.is_empty()).collect();
    is_read_only_words(&words, &upper, engine)
}

fn is_read_only_words(words: &[&str], upper: &str, engine: DatabaseType) -> bool {
    let Some(first) = words.first() else {
        return false;
    };

    let writes = ["INSERT", "UPDATE", "DELETE", "MERGE", "INTO", "CREATE", "DROP", "ALTER", "TRUNCATE"];
    let has_write = || words.iter().any(|w| writes.contains(w));

    match *first {
        // SELECT ... INTO creates a table
        "SELECT" | "VALUES" => !words.contains(&"INTO"),
        // Data-modifying CTEs
        "WITH" => !has_write(),
        // EXPLAIN ANALYZE runs the statement, so the inner statement is checked
        "EXPLAIN" => {
            let inner: Vec<&str> = words[1..]
                .iter()
                .copied()
                .skip_while(|w| {
                    matches!(
                        *w,
                        "ANALYZE" | "ANALYSE" | "VERBOSE" | "COSTS" | "BUFFERS" | "TIMING" | "SUMMARY"
                            | "SETTINGS" | "WAL" | "FORMAT" | "TEXT" | "JSON" | "YAML" | "XML"
                            | "TRUE" | "FALSE" | "ON" | "OFF" | "QUERY" | "PLAN"
                    )
                })
                .collect();
            is_read_only_words(&inner, upper, engine)
        }
        "SHOW" | "TABLE" => engine == DatabaseType::Postgres,
        // PRAGMA name = value changes settings
        "PRAGMA" => engine == DatabaseType::SQLite && !upper.contains('='),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PG: DatabaseType = DatabaseType::Postgres;
    const LITE: DatabaseType = DatabaseType::SQLite;

    fn read_only() -> QueryPolicy {
        QueryPolicy { read_only: true, max_rows: None }
    }

    fn check(engine: DatabaseType, sql: &str, params: usize) -> Result<()> {
        check_statement("db", engine, sql, params, &QueryPolicy::default())
    }

    #[test]
    fn test_empty_statement() {
        for sql in ["", "   ", ";", "-- just a comment", "/* nothing */ ;"] {
            let err = check(PG, sql, 0).unwrap_err();
            assert_eq!(err.error_code(), "INVALID_INPUT", "{sql:?}");
        }
    }

    #[test]
    fn test_multi_statement_detection() {
        let err = check(PG, "SELECT 1; DROP TABLE users", 0).unwrap_err();
        assert_eq!(err.error_code(), "QUERY_ERROR");
        assert!(err.message().contains("multiple statements"));

        assert!(check(PG, "SELECT 1;", 0).is_ok());
        assert!(check(PG, "SELECT 1;;  ", 0).is_ok());
    }

    #[test]
    fn test_semicolons_inside_literals_and_comments() {
        assert!(check(PG, "SELECT 'a;b' AS x -- trailing; comment", 0).is_ok());
        assert!(check(PG, "SELECT \"odd;name\" FROM t /* ; */", 0).is_ok());
        assert!(check(PG, "SELECT $$ body; with semicolon $$", 0).is_ok());
        assert!(check(PG, "SELECT $fn$ a;b $fn$", 0).is_ok());
        assert!(check(LITE, "SELECT 'it''s; fine'", 0).is_ok());
    }

    #[test]
    fn test_postgres_escape_strings() {
        assert!(check(PG, r"SELECT E'a\';b'", 0).is_ok());
        assert!(check(PG, r"SELECT e'it\'s $1'", 0).is_ok());
        assert!(check(PG, r"SELECT E'tab\\' || $1", 1).is_ok());

        // Outside E'' a backslash is an ordinary character
        assert!(check(PG, r"SELECT 'a\'; SELECT 1", 0).is_err());
        assert!(check(PG, r"SELECT name'x\'; SELECT 1", 0).is_err());
        assert!(check(LITE, r"SELECT E'a\';b'", 0).is_err());
    }

    #[test]
    fn test_postgres_placeholders() {
        assert!(check(PG, "SELECT * FROM t WHERE a = $1 AND b = $2", 2).is_ok());
        assert!(check(PG, "SELECT $1, $1, $2", 2).is_ok());
        assert!(check(PG, "SELECT '$1' || $1", 1).is_ok());
        assert!(check(PG, "SELECT $1::int", 1).is_ok());

        let err = check(PG, "SELECT * FROM t WHERE a = $1", 0).unwrap_err();
        assert_eq!(err.error_code(), "QUERY_ERROR");
        assert!(err.message().contains("1 placeholder(s) but 0 parameter(s)"));
    }

    #[test]
    fn test_sqlite_placeholders() {
        assert!(check(LITE, "SELECT * FROM t WHERE a = ? AND b = ?", 2).is_ok());
        assert!(check(LITE, "SELECT ?3", 3).is_ok());
        assert!(check(LITE, "SELECT :a, :a, @b", 2).is_ok());
        assert!(check(LITE, "SELECT '?' FROM t", 0).is_ok());
        assert!(check(LITE, "SELECT ? FROM t", 2).is_err());
    }

    #[test]
    fn test_read_only_allows_queries() {
        for sql in [
            "SELECT * FROM users",
            "  select 1",
            "WITH x AS (SELECT 1) SELECT * FROM x",
            "EXPLAIN SELECT 1",
            "EXPLAIN ANALYZE SELECT 1",
            "EXPLAIN (ANALYZE, FORMAT JSON) SELECT 1",
            "SHOW search_path",
            "VALUES (1), (2)",
            "TABLE users",
            "SELECT 'DELETE' FROM t",
        ] {
            assert!(check_statement("db", PG, sql, 0, &read_only()).is_ok(), "{sql}");
        }
        assert!(check_statement("db", LITE, "PRAGMA table_info(users)", 0, &read_only()).is_ok());
    }

    #[test]
    fn test_read_only_rejects_writes() {
        for sql in [
            "INSERT INTO users VALUES (1)",
            "UPDATE users SET a = 1",
            "DELETE FROM users",
            "DROP TABLE users",
            "CREATE TABLE x (id int)",
            "WITH gone AS (DELETE FROM users RETURNING *) SELECT * FROM gone",
            "EXPLAIN ANALYZE DELETE FROM users",
            "SELECT * INTO backup FROM users",
            "TRUNCATE users",
        ] {
            let err = check_statement("db", PG, sql, 0, &read_only()).unwrap_err();
            assert_eq!(err.error_code(), "QUERY_ERROR", "{sql}");
            assert!(err.message().contains("read-only mode"));
        }
        assert!(check_statement("db", LITE, "PRAGMA journal_mode = WAL", 0, &read_only()).is_err());
        assert!(check_statement("db", LITE, "SHOW tables", 0, &read_only()).is_err());
        assert!(check_statement("db", PG, "PRAGMA foreign_keys", 0, &read_only()).is_err());
    }

    #[test]
    fn test_writes_allowed_without_read_only() {
        assert!(check(PG, "DELETE FROM users WHERE id = $1", 1).is_ok());
    }

    #[test]
    fn test_effective_max_rows() {
        let policy = QueryPolicy { read_only: false, max_rows: Some(100) };
        assert_eq!(policy.effective_max_rows(None), Some(100));
        assert_eq!(policy.effective_max_rows(Some(10)), Some(10));
        assert_eq!(policy.effective_max_rows(Some(1000)), Some(100));
        assert_eq!(QueryPolicy::default().effective_max_rows(Some(5)), Some(5));
        assert_eq!(QueryPolicy::default().effective_max_rows(None), None);
    }

    #[test]
    fn test_mask_literals() {
        let masked = mask_literals("SELECT 'x;' -- c;\nFROM t", PG);
        assert!(!masked.contains(';'));
        assert!(masked.ends_with("\nFROM t"));
        assert_eq!(mask_literals("a $$ b $$ c", PG), "a   c");
        assert_eq!(mask_literals("a $1 b", PG), "a $1 b");
        assert_eq!(mask_literals("a `b` c", LITE), "a   c");
    }
}
