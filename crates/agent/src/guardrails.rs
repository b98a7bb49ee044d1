//! Read-only SQL gate.
//!
//! Every candidate passes through [`validate`] before it can reach the dataset, and the
//! workflow calls it again immediately before execution. Rules run in a fixed order and
//! the first match wins; anything the rules cannot vouch for is rejected.

use stayql_core::domain::sql::{FailureCategory, ValidationResult};

pub mod rules {
    pub const EMPTY_INPUT: &str = "empty_input";
    pub const EMPTY_STATEMENT: &str = "empty_statement";
    pub const DISALLOWED_OPERATION: &str = "disallowed_operation";
    pub const STATEMENT_STACKING: &str = "statement_stacking";
    pub const COMMENT_SEQUENCE: &str = "comment_sequence";
    pub const WRITE_OPERATION: &str = "write_operation";
    pub const DYNAMIC_EXECUTION: &str = "dynamic_execution";
    pub const CATALOG_ACCESS: &str = "catalog_access";
    pub const BATCH_MARKER: &str = "batch_marker";
}

const ALLOWED_LEADING_KEYWORDS: [&str; 2] = ["SELECT", "WITH"];

const WRITE_KEYWORDS: [&str; 18] = [
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "GRANT", "REVOKE",
    "MERGE", "REPLACE", "RENAME", "BACKUP", "RESTORE", "ATTACH", "DETACH", "VACUUM", "REINDEX",
];

const DYNAMIC_KEYWORDS: [&str; 4] = ["EXEC", "EXECUTE", "CALL", "PREPARE"];

const CATALOG_IDENTIFIERS: [&str; 13] = [
    "SQLITE_MASTER",
    "SQLITE_SCHEMA",
    "SQLITE_TEMP_MASTER",
    "SQLITE_TEMP_SCHEMA",
    "SQLITE_SEQUENCE",
    "INFORMATION_SCHEMA",
    "PG_CATALOG",
    "PRAGMA",
    "LOAD_EXTENSION",
    "READFILE",
    "WRITEFILE",
    "READ_PARQUET",
    "PG_READ_FILE",
];

const CATALOG_PREFIXES: [&str; 5] = ["PRAGMA_", "READ_CSV", "READ_JSON", "XP_", "SP_"];

const BATCH_KEYWORDS: [&str; 5] = ["BEGIN", "COMMIT", "ROLLBACK", "SAVEPOINT", "GO"];

/// Classifies `sql` as safe or unsafe. Pure and deterministic.
pub fn validate(sql: &str) -> ValidationResult {
    if sql.trim().is_empty() {
        return ValidationResult::rejected(rules::EMPTY_INPUT, "query is empty");
    }

    let normalized = normalize_sql(sql);
    if normalized.is_empty() {
        return ValidationResult::rejected(rules::EMPTY_STATEMENT, "no statement after normalization");
    }

    let leading = leading_keyword(&normalized);
    if !ALLOWED_LEADING_KEYWORDS.contains(&leading.as_str()) {
        return ValidationResult::rejected(rules::DISALLOWED_OPERATION, "disallowed operation");
    }

    if normalized.contains(';') {
        return ValidationResult::rejected(
            rules::STATEMENT_STACKING,
            "multiple statements are not allowed",
        );
    }

    if ["--", "/*", "*/"].iter().any(|marker| normalized.contains(marker)) {
        return ValidationResult::rejected(rules::COMMENT_SEQUENCE, "comment sequence");
    }

    let tokens = tokenize(&normalized);

    if tokens.iter().any(|token| WRITE_KEYWORDS.contains(&token.as_str())) {
        return ValidationResult::rejected(rules::WRITE_OPERATION, "write operation");
    }

    if tokens.iter().any(|token| DYNAMIC_KEYWORDS.contains(&token.as_str())) {
        return ValidationResult::rejected(rules::DYNAMIC_EXECUTION, "dynamic execution");
    }

    if normalized.contains("@@") || tokens.iter().any(|token| is_catalog_token(token)) {
        return ValidationResult::rejected(rules::CATALOG_ACCESS, "catalog or file access");
    }

    if tokens.iter().any(|token| BATCH_KEYWORDS.contains(&token.as_str())) {
        return ValidationResult::rejected(rules::BATCH_MARKER, "batch marker");
    }

    ValidationResult::safe()
}

/// Maps a rejection onto the generic category the model may see on retry.
pub fn failure_category(result: &ValidationResult) -> Option<FailureCategory> {
    if result.is_safe() {
        return None;
    }
    match result.matched_rule() {
        Some(rules::EMPTY_INPUT) | Some(rules::EMPTY_STATEMENT) => Some(FailureCategory::NoStatement),
        _ => Some(FailureCategory::InvalidOperation),
    }
}

/// Trims, collapses whitespace and strips trailing semicolons.
pub fn normalize_sql(sql: &str) -> String {
    let mut collapsed = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    loop {
        let trimmed = collapsed.trim_end().trim_end_matches(';');
        if trimmed.len() == collapsed.len() {
            break;
        }
        collapsed = trimmed.to_owned();
    }
    collapsed.trim().to_owned()
}

fn leading_keyword(normalized: &str) -> String {
    normalized
        .chars()
        .take_while(|character| character.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase()
}

fn tokenize(normalized: &str) -> Vec<String> {
    normalized
        .split(|character: char| !(character.is_ascii_alphanumeric() || character == '_'))
        .filter(|token| !token.is_empty())
        .map(str::to_ascii_uppercase)
        .collect()
}

fn is_catalog_token(token: &str) -> bool {
    CATALOG_IDENTIFIERS.contains(&token)
        || CATALOG_PREFIXES.iter().any(|prefix| token.starts_with(prefix))
        || is_hex_literal(token)
}

fn is_hex_literal(token: &str) -> bool {
    token
        .strip_prefix("0X")
        .is_some_and(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_hexdigit()))
}
