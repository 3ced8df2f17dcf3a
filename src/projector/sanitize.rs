//! Quoting helpers for textual query dialects
//!
//! Names and literals that end up inside select expressions or OData filters must be
//! quoted so caller input can never change the shape of the query.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::WireFormat;

static DYNAMO_TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]{3,255}$").expect("valid table pattern"));

static SIMPLEDB_DOMAIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]{3,255}$").expect("valid domain pattern"));

static COUCH_DATABASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_$()+/\-]*$").expect("valid database pattern"));

static AZURE_TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9]{2,62}$").expect("valid table pattern"));

/// Quote an attribute or domain name for the select dialect
///
/// # Example
/// ```
/// use runtara_record_store::projector::quote_name;
///
/// assert_eq!(quote_name("my attr"), "`my attr`");
/// assert_eq!(quote_name("we`ird"), "`we``ird`");
/// ```
pub fn quote_name(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

/// Quote a string literal with single quotes, doubling embedded quotes
///
/// # Example
/// ```
/// use runtara_record_store::projector::quote_literal;
///
/// assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
/// ```
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Escape the `like` wildcard and its escape character inside a pattern fragment
pub fn escape_like(fragment: &str) -> String {
    fragment.replace('\\', "\\\\").replace('%', "\\%")
}

/// Validate a table name against the naming rules of the backend family
///
/// # Returns
/// Ok(()) if valid, Err with message if invalid
pub fn validate_table_name(name: &str, format: WireFormat) -> Result<(), String> {
    if name.is_empty() {
        return Err("Table name cannot be empty".to_string());
    }
    let (pattern, rule) = match format {
        WireFormat::Structured => (
            &*DYNAMO_TABLE,
            "3-255 characters from letters, digits, '_', '-' and '.'",
        ),
        WireFormat::Text => (
            &*SIMPLEDB_DOMAIN,
            "3-255 characters from letters, digits, '_', '-' and '.'",
        ),
        WireFormat::Document => (
            &*COUCH_DATABASE,
            "a lowercase letter followed by lowercase letters, digits or _$()+-/",
        ),
        WireFormat::Typed => (
            &*AZURE_TABLE,
            "3-63 alphanumeric characters starting with a letter",
        ),
    };
    if !pattern.is_match(name) {
        return Err(format!(
            "Table name '{}' is invalid. It must be {}.",
            name, rule
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Quoting Tests
    // =========================================================================

    #[test]
    fn test_quote_name() {
        assert_eq!(quote_name("color"), "`color`");
        assert_eq!(quote_name("a`b"), "`a``b`");
        assert_eq!(quote_name(""), "``");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("red"), "'red'");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal("''"), "''''''");
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%"), "50\\%");
        assert_eq!(escape_like("a\\b"), "a\\\\b");
        assert_eq!(escape_like("plain"), "plain");
    }

    // =========================================================================
    // Table Name Tests
    // =========================================================================

    #[test]
    fn test_validate_table_name_per_family() {
        assert!(validate_table_name("widgets", WireFormat::Structured).is_ok());
        assert!(validate_table_name("ab", WireFormat::Structured).is_err());
        assert!(validate_table_name("my.domain", WireFormat::Text).is_ok());
        assert!(validate_table_name("docs_v2", WireFormat::Document).is_ok());
        assert!(validate_table_name("Docs", WireFormat::Document).is_err());
        assert!(validate_table_name("Widgets2", WireFormat::Typed).is_ok());
        assert!(validate_table_name("widgets_2", WireFormat::Typed).is_err());
        assert!(validate_table_name("", WireFormat::Typed).is_err());
    }

    #[test]
    fn test_validate_table_name_error_message() {
        let err = validate_table_name("1x", WireFormat::Typed).unwrap_err();
        assert!(err.contains("'1x'"));
    }
}
