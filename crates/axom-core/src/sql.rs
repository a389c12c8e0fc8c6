//! Naive SQL operation extraction.
//!
//! Shared by the database-traffic signal producers to pull the statement kind
//! and target table out of a query without a full SQL parser. Only the four
//! basic DML forms are recognized; anything else yields empty strings.

use regex::Regex;
use std::sync::LazyLock;

static SELECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^SELECT\s+.*\s+FROM\s+([^\s;]+)").expect("valid regex"));
static INSERT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^INSERT\s+INTO\s+([^\s(]+)").expect("valid regex"));
static UPDATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^UPDATE\s+([^\s]+)").expect("valid regex"));
static DELETE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^DELETE\s+FROM\s+([^\s;]+)").expect("valid regex"));

/// Extract `(operation, table)` from a SQL query.
///
/// Returns `("", "")` for empty or unrecognized input; returns the operation
/// with an empty table name when the statement kind is clear but the table
/// cannot be located.
pub fn extract_sql_operation(query: &str) -> (String, String) {
    let sql = query.trim();
    let upper = sql.to_uppercase();

    let (op, re) = if upper.starts_with("SELECT") {
        ("SELECT", &*SELECT_RE)
    } else if upper.starts_with("INSERT") {
        ("INSERT", &*INSERT_RE)
    } else if upper.starts_with("UPDATE") {
        ("UPDATE", &*UPDATE_RE)
    } else if upper.starts_with("DELETE") {
        ("DELETE", &*DELETE_RE)
    } else {
        return (String::new(), String::new());
    };

    let table = re
        .captures(sql)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();

    (op.to_string(), table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_select() {
        assert_eq!(
            extract_sql_operation("SELECT * FROM users"),
            ("SELECT".to_string(), "users".to_string())
        );
    }

    #[test]
    fn test_extract_insert() {
        assert_eq!(
            extract_sql_operation("INSERT INTO orders VALUES(1)"),
            ("INSERT".to_string(), "orders".to_string())
        );
    }

    #[test]
    fn test_extract_update() {
        assert_eq!(
            extract_sql_operation("UPDATE products SET price = 10 WHERE id = 1"),
            ("UPDATE".to_string(), "products".to_string())
        );
    }

    #[test]
    fn test_extract_delete() {
        assert_eq!(
            extract_sql_operation("DELETE FROM logs"),
            ("DELETE".to_string(), "logs".to_string())
        );
    }

    #[test]
    fn test_extract_empty() {
        assert_eq!(
            extract_sql_operation(""),
            (String::new(), String::new())
        );
    }

    #[test]
    fn test_extract_unrecognized() {
        assert_eq!(
            extract_sql_operation("TRUNCATE TABLE users"),
            (String::new(), String::new())
        );
    }

    #[test]
    fn test_extract_lowercase_and_semicolon() {
        assert_eq!(
            extract_sql_operation("select id from accounts;"),
            ("SELECT".to_string(), "accounts".to_string())
        );
    }

    #[test]
    fn test_extract_operation_without_table() {
        // Statement kind is clear but no FROM clause follows
        assert_eq!(
            extract_sql_operation("SELECT 1"),
            ("SELECT".to_string(), String::new())
        );
    }

    #[test]
    fn test_extract_leading_whitespace() {
        assert_eq!(
            extract_sql_operation("   DELETE FROM sessions WHERE expired = true"),
            ("DELETE".to_string(), "sessions".to_string())
        );
    }
}
