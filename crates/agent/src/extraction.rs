//! Pulls a single SQL statement out of a model completion.

const STATEMENT_KEYWORDS: [&str; 22] = [
    "SELECT", "WITH", "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE",
    "GRANT", "REVOKE", "REPLACE", "MERGE", "ATTACH", "DETACH", "PRAGMA", "EXEC", "EXECUTE",
    "CALL", "VACUUM", "BEGIN", "EXPLAIN",
];

/// Returns the statement found in `completion`, or `None` when it holds only prose.
///
/// The first fenced block wins when present and is kept whole from its first statement
/// line, blank lines included. Unfenced text is scanned for the first line led by a SQL
/// keyword and read until the next blank line. Whatever is returned still has to pass the
/// validator; this only decides what text to hand it.
pub fn extract_sql(completion: &str) -> Option<String> {
    let statement = match fenced_block(completion) {
        Some(body) => {
            let lines = body.lines().map(str::trim).collect::<Vec<_>>();
            let start = lines.iter().position(|line| starts_with_statement_keyword(line)).unwrap_or(0);
            lines[start..].iter().filter(|line| !line.is_empty()).copied().collect::<Vec<_>>().join("\n")
        }
        None => {
            let lines = completion.lines().map(str::trim).collect::<Vec<_>>();
            let start = lines.iter().position(|line| starts_with_statement_keyword(line))?;
            lines[start..].iter().take_while(|line| !line.is_empty()).copied().collect::<Vec<_>>().join("\n")
        }
    };

    let statement = strip_label(&statement).trim().to_owned();
    (!statement.is_empty()).then_some(statement)
}

fn fenced_block(completion: &str) -> Option<String> {
    let open = completion.find("```")?;
    let after_open = &completion[open + 3..];
    let header_end = after_open.find('\n').unwrap_or(after_open.len());
    let header = after_open[..header_end].trim();
    // A fence like ```SELECT 1``` carries the statement on the header line itself.
    let inner = if header.is_empty() || is_language_tag(header) {
        after_open.get(header_end + 1..).unwrap_or("")
    } else {
        after_open
    };
    let close = inner.find("```").unwrap_or(inner.len());
    Some(inner[..close].to_owned())
}

fn is_language_tag(header: &str) -> bool {
    header.chars().all(|character| character.is_ascii_alphanumeric() || character == '-')
        && !starts_with_statement_keyword(header)
}

/// A keyword alone is not enough: "With pleasure, here is the query:" is prose.
fn starts_with_statement_keyword(line: &str) -> bool {
    let candidate = strip_label(line.trim());
    let keyword_len = candidate.chars().take_while(|character| character.is_ascii_alphabetic()).count();
    let keyword = candidate[..keyword_len].to_ascii_uppercase();
    if !STATEMENT_KEYWORDS.contains(&keyword.as_str()) {
        return false;
    }

    let rest = &candidate[keyword_len..];
    let separated = rest.is_empty()
        || rest.starts_with(|character: char| character.is_whitespace() || matches!(character, '(' | '*'));
    if !separated || candidate.ends_with([':', '.', '!', '?']) {
        return false;
    }

    keyword != "WITH" || opens_common_table_expression(rest)
}

/// `WITH [RECURSIVE] name AS (` or `WITH name(col, ...)`; the line may stop early.
fn opens_common_table_expression(rest: &str) -> bool {
    let mut words = rest.split_whitespace();
    let mut name = words.next();
    if name.is_some_and(|word| word.eq_ignore_ascii_case("RECURSIVE")) {
        name = words.next();
    }
    let Some(name) = name else {
        return true;
    };

    let (identifier, has_columns) = match name.split_once('(') {
        Some((identifier, _)) => (identifier, true),
        None => (name, false),
    };
    let is_identifier = !identifier.is_empty()
        && identifier.chars().all(|character| {
            character.is_ascii_alphanumeric() || matches!(character, '_' | '"' | '`')
        });
    if !is_identifier {
        return false;
    }

    has_columns
        || match words.next() {
            None => true,
            Some(next) => next.eq_ignore_ascii_case("AS") || next.starts_with('('),
        }
}

fn strip_label(text: &str) -> &str {
    for label in ["SQL:", "sql:", "Query:", "query:", "SQL Query:"] {
        if let Some(rest) = text.strip_prefix(label) {
            return rest.trim_start();
        }
    }
    text
}
