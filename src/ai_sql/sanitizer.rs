//! Reduce untrusted model text to a single SELECT statement
//!
//! Nothing the model returns reaches the database before passing through
//! [`sanitize`]. The output begins with the `SELECT` keyword, holds one statement and
//! contains no comment markers, semicolons or backticks.

use crate::ai_sql::error::SanitizeError;
use regex::{Captures, Regex};
use std::sync::LazyLock;
use tracing::debug;

/// Line comments and block comments in one left-to-right scan, so whichever opens first
/// wins. An unterminated block comment runs to the end of the text.
static COMMENTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)--[^\n]*|/\*.*?(?:\*/|\z)").expect("valid comment pattern")
});

static SELECT_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bselect\b").expect("valid keyword pattern"));

/// True when `text` starts with the SELECT keyword (case-insensitive, word boundary)
pub fn starts_with_select(text: &str) -> bool {
    SELECT_KEYWORD.find(text).is_some_and(|m| m.start() == 0)
}

fn strip_comments_and_backticks(text: &str) -> String {
    let mut current = text.to_string();
    // Removing a backtick can join `-` `-` into a new marker, so repeat until stable.
    // A `*/` left after the block pass has no opener and is dropped on its own.
    loop {
        let stripped = COMMENTS
            .replace_all(&current, |caps: &Captures| {
                if caps[0].starts_with("--") { "" } else { " " }
            })
            .replace('`', "")
            .replace("*/", " ");
        if stripped == current {
            return current;
        }
        current = stripped;
    }
}

/// Sanitize raw candidate text into a single SELECT statement
pub fn sanitize(raw: &str) -> Result<String, SanitizeError> {
    let cleaned = strip_comments_and_backticks(raw);
    let trimmed = cleaned.trim();

    let from_select = if starts_with_select(trimmed) {
        trimmed
    } else {
        let found = SELECT_KEYWORD
            .find(trimmed)
            .ok_or(SanitizeError::NoSelectFound)?;
        debug!(
            "Discarding {} leading characters before SELECT",
            found.start()
        );
        &trimmed[found.start()..]
    };

    // Only the first statement survives; the semicolon is not put back
    let statement = match from_select.find(';') {
        Some(end) => &from_select[..end],
        None => from_select,
    };

    let statement = statement.trim();
    if statement.is_empty() {
        return Err(SanitizeError::EmptyQuery);
    }

    Ok(statement.to_string())
}

/// Validation outcome of a generated query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStatus {
    Valid,
    Invalid(SanitizeError),
}

/// Model output together with its sanitized form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedQuery {
    raw: String,
    sanitized: Option<String>,
    status: ValidationStatus,
}

impl GeneratedQuery {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        match sanitize(&raw) {
            Ok(sql) => Self {
                raw,
                sanitized: Some(sql),
                status: ValidationStatus::Valid,
            },
            Err(e) => Self {
                raw,
                sanitized: None,
                status: ValidationStatus::Invalid(e),
            },
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The sanitized statement, present only when valid
    pub fn sql(&self) -> Option<&str> {
        self.sanitized.as_deref()
    }

    pub fn status(&self) -> ValidationStatus {
        self.status
    }

    pub fn is_valid(&self) -> bool {
        self.status == ValidationStatus::Valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn assert_clean(sql: &str) {
        assert!(starts_with_select(sql), "does not start with SELECT: {sql}");
        for marker in ["--", "/*", "*/", ";", "`"] {
            assert!(!sql.contains(marker), "{marker} left in: {sql}");
        }
    }

    #[rstest]
    #[case("SELECT 1", "SELECT 1")]
    #[case("  select id from t  ", "select id from t")]
    #[case("SELECT * FROM projects;", "SELECT * FROM projects")]
    #[case("SELECT a FROM t; DROP TABLE t;", "SELECT a FROM t")]
    #[case("SELECT a FROM t -- the answer\n", "SELECT a FROM t")]
    #[case("SELECT a /* note */ FROM t", "SELECT a   FROM t")]
    #[case("SELECT a/**/FROM t", "SELECT a FROM t")]
    #[case("SELECT `name` FROM `projects`", "SELECT name FROM projects")]
    #[case(
        "Here is the query you asked for:\nSELECT status, COUNT(*) FROM projects GROUP BY status;\nIt counts projects.",
        "SELECT status, COUNT(*) FROM projects GROUP BY status"
    )]
    #[case("SELECT a FROM t /* unterminated", "SELECT a FROM t")]
    #[case("/* lead */ SELECT 1", "SELECT 1")]
    #[case("SelEcT 1", "SelEcT 1")]
    #[case("SELECT a FROM t */ trailing", "SELECT a FROM t   trailing")]
    #[case("SELECT a */ FROM t /* b */", "SELECT a   FROM t")]
    fn test_sanitize(#[case] raw: &str, #[case] expected: &str) {
        let sql = sanitize(raw).unwrap();
        assert_eq!(sql, expected);
        assert_clean(&sql);
    }

    #[rstest]
    #[case("DROP TABLE projects;")]
    #[case("I cannot answer that.")]
    #[case("selection of projects")]
    #[case("DELETE FROM users WHERE 1=1")]
    #[case("EXPLAIN ANALYZE DELETE FROM t")]
    #[case("")]
    #[case("   \n\t ")]
    #[case("-- SELECT * FROM projects")]
    #[case("/* nothing */")]
    #[case("/* x */")]
    #[case("``")]
    fn test_no_select_found(#[case] raw: &str) {
        assert_eq!(sanitize(raw), Err(SanitizeError::NoSelectFound));
    }

    #[test]
    fn test_semicolon_not_reappended() {
        let sql = sanitize("SELECT 1;").unwrap();
        assert!(!sql.ends_with(';'));
    }

    #[test]
    fn test_backtick_cannot_assemble_comment_marker() {
        // After removing the backtick the two dashes meet
        let sql = sanitize("SELECT 1 -`- DROP TABLE projects").unwrap();
        assert_eq!(sql, "SELECT 1");
        assert_clean(&sql);
    }

    #[test]
    fn test_backtick_cannot_assemble_block_comment() {
        let sql = sanitize("SELECT a /`* x *`/ FROM t").unwrap();
        assert_clean(&sql);
    }

    #[test]
    fn test_orphan_block_closer_removed() {
        let sql = sanitize("SELECT a FROM t */ trailing").unwrap();
        assert!(!sql.contains("*/"));
        assert_clean(&sql);
    }

    #[test]
    fn test_line_comment_hides_block_opener() {
        let sql = sanitize("SELECT a -- /* not a block\nFROM t").unwrap();
        assert_eq!(sql, "SELECT a \nFROM t");
    }

    #[test]
    fn test_block_comment_hides_line_marker() {
        let sql = sanitize("SELECT a /* -- */ FROM t").unwrap();
        assert_eq!(sql, "SELECT a   FROM t");
    }

    #[rstest]
    #[case("SELECT 1")]
    #[case("SELECT a FROM t; DROP TABLE t")]
    #[case("noise SELECT `x` FROM y -- tail")]
    #[case("SELECT a /* b */ FROM c")]
    #[case("SELECT '--' AS dashes")]
    fn test_idempotent(#[case] raw: &str) {
        let once = sanitize(raw).unwrap();
        let twice = sanitize(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[rstest]
    #[case("SELECT 1", true)]
    #[case("select\n1", true)]
    #[case("SELECTED 1", false)]
    #[case(" SELECT 1", false)]
    #[case("WITH x AS (SELECT 1) SELECT * FROM x", false)]
    fn test_starts_with_select(#[case] text: &str, #[case] expected: bool) {
        assert_eq!(starts_with_select(text), expected);
    }

    #[test]
    fn test_generated_query_status() {
        let valid = GeneratedQuery::new("SELECT 1;");
        assert!(valid.is_valid());
        assert_eq!(valid.sql(), Some("SELECT 1"));
        assert_eq!(valid.raw(), "SELECT 1;");

        let invalid = GeneratedQuery::new("DROP TABLE projects;");
        assert!(!invalid.is_valid());
        assert_eq!(invalid.sql(), None);
        assert_eq!(
            invalid.status(),
            ValidationStatus::Invalid(SanitizeError::NoSelectFound)
        );
        assert_eq!(invalid.raw(), "DROP TABLE projects;");
    }
}
