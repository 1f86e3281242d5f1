//! SQL extraction from unstructured model responses
//!
//! Models wrap their SQL in apologies, markdown, and trailing explanations.
//! Extraction is a pure, total function over the raw text with a fixed
//! strategy order, first match wins:
//!
//! 1. first fenced code block, with or without a language tag;
//! 2. a SQL-start keyword opening a line, extended to the first blank line;
//! 3. everything from the first SQL-start keyword onward (strips inline
//!    prose such as "The SQL is: SELECT ...");
//! 4. the full trimmed response as a last resort.
//!
//! A keyword-free result from strategy 4 is the caller's problem to reject;
//! an empty or whitespace response yields an empty string.

use regex::Regex;
use std::sync::OnceLock;

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[a-zA-Z0-9_+\-]*[ \t]*\r?\n?(.*?)```").unwrap())
}

fn keyword_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^[ \t]*(SELECT|WITH|INSERT|UPDATE|DELETE|CREATE|DROP|ALTER)\b").unwrap()
    })
}

fn keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(SELECT|WITH|INSERT|UPDATE|DELETE|CREATE|DROP|ALTER)\b").unwrap()
    })
}

/// Extract one SQL statement from a raw model response
pub fn extract_sql(response: &str) -> String {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    if let Some(sql) = from_fenced_block(trimmed) {
        return sql;
    }
    if let Some(sql) = from_keyword_line(trimmed) {
        return sql;
    }
    if let Some(sql) = from_keyword_tail(trimmed) {
        return sql;
    }

    tracing::debug!("no SQL marker found in response, returning raw text");
    trimmed.to_string()
}

/// Strategy 1: content of the first fenced code block
///
/// Comment-only lines (`--`) inside the fence are dropped; models like to
/// restate the question there.
fn from_fenced_block(text: &str) -> Option<String> {
    let captures = fence_re().captures(text)?;
    let body = captures.get(1)?.as_str();
    let sql: String = body
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");
    let sql = sql.trim();
    (!sql.is_empty()).then(|| sql.to_string())
}

/// Strategy 2: a statement whose first keyword opens a line, cut at the first
/// blank line so trailing prose paragraphs fall away
fn from_keyword_line(text: &str) -> Option<String> {
    let m = keyword_line_re().find(text)?;
    let tail = &text[m.start()..];
    let end = blank_line_boundary(tail).unwrap_or(tail.len());
    let sql = tail[..end].trim();
    (!sql.is_empty()).then(|| sql.to_string())
}

/// Strategy 3: strip leading prose before the first keyword, keep the rest
fn from_keyword_tail(text: &str) -> Option<String> {
    let m = keyword_re().find(text)?;
    let sql = text[m.start()..].trim();
    (!sql.is_empty()).then(|| sql.to_string())
}

/// Byte offset of the first fully blank line, if any
fn blank_line_boundary(text: &str) -> Option<usize> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim().is_empty() && offset > 0 {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fenced_block_wins_over_prose() {
        let response = "Sure, here is the query you asked for:\n\n```sql\nSELECT suserid\nFROM dws_login_di\n```\n\nLet me know if you need anything else!";
        assert_eq!(extract_sql(response), "SELECT suserid\nFROM dws_login_di");
    }

    #[test]
    fn fence_without_language_tag() {
        let response = "```\nSELECT 1 FROM t\n```";
        assert_eq!(extract_sql(response), "SELECT 1 FROM t");
    }

    #[test]
    fn comment_lines_dropped_inside_fence() {
        let response = "```sql\n-- count users\nSELECT COUNT(1)\nFROM dws_login_di\n```";
        assert_eq!(extract_sql(response), "SELECT COUNT(1)\nFROM dws_login_di");
    }

    #[test]
    fn keyword_line_cut_at_blank_line() {
        let response = "SELECT suserid\nFROM dws_login_di\nWHERE itimes >= 1\n\nThis query counts active users.";
        assert_eq!(
            extract_sql(response),
            "SELECT suserid\nFROM dws_login_di\nWHERE itimes >= 1"
        );
    }

    #[test]
    fn leading_prose_stripped_before_inline_keyword() {
        let response = "The statement would be: SELECT 1 FROM t";
        assert_eq!(extract_sql(response), "SELECT 1 FROM t");
    }

    #[test]
    fn with_cte_recognized_as_start() {
        let response = "WITH base AS (SELECT 1)\nSELECT * FROM base";
        assert_eq!(extract_sql(response), "WITH base AS (SELECT 1)\nSELECT * FROM base");
    }

    #[test]
    fn keyword_free_response_returned_verbatim() {
        let response = "  I cannot answer that question.  ";
        assert_eq!(extract_sql(response), "I cannot answer that question.");
    }

    #[test]
    fn empty_response_yields_empty_string() {
        assert_eq!(extract_sql(""), "");
        assert_eq!(extract_sql("   \n\t "), "");
    }

    #[test]
    fn extraction_is_idempotent_on_plain_sql() {
        let sql = "SELECT suserid FROM dws_login_di";
        assert_eq!(extract_sql(&extract_sql(sql)), sql);
    }
}
