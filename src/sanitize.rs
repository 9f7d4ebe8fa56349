//! Identifier sanitizing for table and column names taken from CSV input.
//!
//! Headers and file names are arbitrary text. Before they reach a `CREATE
//! TABLE` or `INSERT` statement they are mapped onto `[A-Za-z0-9_]`, kept from
//! starting with a digit, and moved off the SQL keyword list. The mapping is
//! pure: the same input always produces the same identifier. Distinct inputs may
//! collide (`a-b` and `a b` both become `a_b`); callers accept that.

/// Placeholder used for empty or missing header cells.
pub const UNNAMED_COLUMN: &str = "unnamed_column";

/// SQL keywords that cannot be used as bare column names.
pub const RESERVED_WORDS: &[&str] = &[
    "add",
    "all",
    "alter",
    "analyze",
    "and",
    "as",
    "asc",
    "between",
    "by",
    "case",
    "check",
    "column",
    "constraint",
    "create",
    "database",
    "delete",
    "desc",
    "distinct",
    "drop",
    "else",
    "end",
    "exists",
    "foreign",
    "from",
    "group",
    "having",
    "in",
    "index",
    "insert",
    "into",
    "is",
    "join",
    "key",
    "like",
    "limit",
    "not",
    "null",
    "on",
    "or",
    "order",
    "primary",
    "procedure",
    "references",
    "select",
    "set",
    "table",
    "then",
    "to",
    "trigger",
    "union",
    "unique",
    "update",
    "using",
    "values",
    "when",
    "where",
];

pub fn is_reserved_word(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    RESERVED_WORDS.contains(&lowered.as_str())
}

/// Maps a raw header cell onto a safe column identifier.
pub fn sanitize_column_name(raw: Option<&str>) -> String {
    let Some(raw) = raw.filter(|value| !value.is_empty()) else {
        return UNNAMED_COLUMN.to_string();
    };
    let mut sanitized = with_digit_prefix(replace_disallowed(raw), "col_");
    if is_reserved_word(&sanitized) {
        sanitized.push_str("_col");
    }
    sanitized
}

/// Maps a file stem onto a safe table identifier.
pub fn sanitize_table_name(raw: &str) -> String {
    with_digit_prefix(replace_disallowed(raw), "tbl_")
}

pub fn sanitize_headers(headers: &[String]) -> Vec<String> {
    headers
        .iter()
        .map(|header| sanitize_column_name(Some(header.as_str())))
        .collect()
}

fn replace_disallowed(raw: &str) -> String {
    raw.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

fn with_digit_prefix(mut sanitized: String, prefix: &str) -> String {
    if sanitized.starts_with(|ch: char| ch.is_ascii_digit()) {
        sanitized.insert_str(0, prefix);
    }
    sanitized
}
