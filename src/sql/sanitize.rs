//! SQL Identifier Sanitization Utilities
//!
//! Identifiers are validated once, when an entity type is built, and quoted
//! every time they are rendered. Values never pass through here; they are bound
//! as parameters.

use regex::Regex;
use std::sync::LazyLock;

/// PostgreSQL truncates identifiers longer than this (NAMEDATALEN - 1)
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

static IDENTIFIER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is a valid regex")
});

/// Quote a SQL identifier to make it safe for use in queries
///
/// # Example
/// ```
/// use runtara_object_admin::sql::quote_identifier;
///
/// assert_eq!(quote_identifier("books"), "\"books\"");
/// ```
pub fn quote_identifier(identifier: &str) -> String {
    // Escape any double quotes in the identifier by doubling them
    let escaped = identifier.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

/// Validate a table, column or attribute name
///
/// Rules:
/// - Must start with a letter or underscore
/// - Can only contain ASCII letters, digits and underscores
/// - At most 63 bytes
///
/// Reserved keywords are accepted because every identifier is quoted when rendered.
///
/// # Example
/// ```
/// use runtara_object_admin::sql::validate_identifier;
///
/// assert!(validate_identifier("books").is_ok());
/// assert!(validate_identifier("hireDate").is_ok());
/// assert!(validate_identifier("title; DROP TABLE books").is_err());
/// ```
pub fn validate_identifier(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Identifier cannot be empty".to_string());
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(format!(
            "Identifier '{}' is longer than {} bytes.",
            name, MAX_IDENTIFIER_LENGTH
        ));
    }

    if !IDENTIFIER_PATTERN.is_match(name) {
        return Err(format!(
            "Identifier '{}' is invalid. Must start with a letter or underscore and contain only letters, numbers, and underscores.",
            name
        ));
    }

    Ok(())
}

/// Escape LIKE wildcards so a needle matches literally under `ESCAPE '\'`
pub fn escape_like(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
