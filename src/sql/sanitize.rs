//! Identifier checks and quoting for generated SQL
//!
//! Entity and column names are validated once, when a descriptor is built.
//! Every identifier that reaches generated SQL is still double-quoted.

use std::sync::LazyLock;

use regex::Regex;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("identifier pattern is valid"));

/// PostgreSQL reserved keywords that cannot be used as unquoted identifiers
pub const POSTGRES_RESERVED_WORDS: &[&str] = &[
    "ALL",
    "ANALYSE",
    "ANALYZE",
    "AND",
    "ANY",
    "ARRAY",
    "AS",
    "ASC",
    "ASYMMETRIC",
    "BOTH",
    "CASE",
    "CAST",
    "CHECK",
    "COLLATE",
    "COLUMN",
    "CONSTRAINT",
    "CREATE",
    "CURRENT_CATALOG",
    "CURRENT_DATE",
    "CURRENT_ROLE",
    "CURRENT_TIME",
    "CURRENT_TIMESTAMP",
    "CURRENT_USER",
    "DEFAULT",
    "DEFERRABLE",
    "DESC",
    "DISTINCT",
    "DO",
    "ELSE",
    "END",
    "EXCEPT",
    "FALSE",
    "FETCH",
    "FOR",
    "FOREIGN",
    "FROM",
    "GRANT",
    "GROUP",
    "HAVING",
    "IN",
    "INITIALLY",
    "INTERSECT",
    "INTO",
    "LATERAL",
    "LEADING",
    "LIMIT",
    "LOCALTIME",
    "LOCALTIMESTAMP",
    "NOT",
    "NULL",
    "OFFSET",
    "ON",
    "ONLY",
    "OR",
    "ORDER",
    "PLACING",
    "PRIMARY",
    "REFERENCES",
    "RETURNING",
    "SELECT",
    "SESSION_USER",
    "SOME",
    "SYMMETRIC",
    "TABLE",
    "THEN",
    "TO",
    "TRAILING",
    "TRUE",
    "UNION",
    "UNIQUE",
    "USER",
    "USING",
    "VARIADIC",
    "WHEN",
    "WHERE",
    "WINDOW",
    "WITH",
];

/// Double-quote an identifier, doubling any embedded quotes
///
/// ```
/// use dynacrud::sql::quote_identifier;
///
/// assert_eq!(quote_identifier("projects"), "\"projects\"");
/// ```
pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// `"source"."column"`
pub fn quote_qualified(source: &str, column: &str) -> String {
    format!("{}.{}", quote_identifier(source), quote_identifier(column))
}

/// Validate a table or column name.
///
/// Names start with a lowercase letter, contain only lowercase letters, digits
/// and underscores, and are neither a PostgreSQL reserved word nor listed in
/// `reserved_columns`.
///
/// ```
/// use dynacrud::sql::validate_identifier;
///
/// assert!(validate_identifier("projects", &[]).is_ok());
/// assert!(validate_identifier("select", &[]).is_err());
/// ```
pub fn validate_identifier(name: &str, reserved_columns: &[&str]) -> Result<(), String> {
    if name.is_empty() {
        return Err("Identifier cannot be empty".to_string());
    }

    if !IDENTIFIER.is_match(name) {
        return Err(format!(
            "Identifier '{}' is invalid. Must start with a lowercase letter and contain only lowercase letters, numbers, and underscores.",
            name
        ));
    }

    if POSTGRES_RESERVED_WORDS.contains(&name.to_uppercase().as_str()) {
        return Err(format!(
            "Identifier '{}' is a PostgreSQL reserved keyword and cannot be used.",
            name
        ));
    }

    if reserved_columns.contains(&name) {
        return Err(format!("Column name '{}' is reserved and cannot be used.", name));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("users"), "\"users\"");
        assert_eq!(quote_identifier("joined__owner_id"), "\"joined__owner_id\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_identifier(""), "\"\"");
    }

    #[test]
    fn test_quote_qualified() {
        assert_eq!(quote_qualified("t1", "id"), "\"t1\".\"id\"");
        assert_eq!(quote_qualified("users", "na\"me"), "\"users\".\"na\"\"me\"");
    }

    #[test]
    fn test_validate_identifier_accepts_snake_case() {
        for name in ["users", "project_members", "t1", "a", "created_by"] {
            assert!(validate_identifier(name, &[]).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_validate_identifier_rejects_malformed() {
        for name in ["", "1users", "_users", "Users", "my-table", "schema.table", "a b", "x$"] {
            assert!(validate_identifier(name, &[]).is_err(), "{name:?}");
        }
        assert!(validate_identifier("", &[]).unwrap_err().contains("cannot be empty"));
    }

    #[test]
    fn test_validate_identifier_rejects_reserved_words() {
        for name in ["select", "table", "user", "order", "group"] {
            let err = validate_identifier(name, &[]).unwrap_err();
            assert!(err.contains("reserved keyword"), "{name}");
        }
    }

    #[test]
    fn test_validate_identifier_reserved_columns() {
        assert!(validate_identifier("is_deleted", &["is_deleted"]).is_err());
        assert!(validate_identifier("is_deleted", &[]).is_ok());
    }
}
