use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type Row = BTreeMap<String, Value>;

const SUMMARY_PREVIEW_CHARS: usize = 240;
const SIGNIFICANT_DIGITS: i32 = 6;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub row_count: usize,
    /// Set when the provider stopped at its row limit.
    pub truncated: bool,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn new(columns: Vec<String>, rows: Vec<Row>, truncated: bool) -> Self {
        let row_count = rows.len();
        Self { columns, rows, row_count, truncated, error: None }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Renders one row as `column: value` pairs in column order.
    pub fn render_row(&self, row: &Row) -> String {
        let ordered = if self.columns.is_empty() {
            row.keys().cloned().collect::<Vec<_>>()
        } else {
            self.columns.clone()
        };

        ordered
            .iter()
            .map(|column| {
                let value = row.get(column).map(render_value).unwrap_or_else(|| "null".to_owned());
                format!("{column}: {value}")
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn summarize(&self) -> ExecutionSummary {
        let preview = match self.rows.first() {
            Some(row) => truncate_chars(&self.render_row(row), SUMMARY_PREVIEW_CHARS),
            None => "no rows".to_owned(),
        };
        ExecutionSummary { row_count: self.row_count, truncated: self.truncated, preview }
    }
}

/// What a conversation keeps of an execution: a count and a short preview, never the rows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub row_count: usize,
    pub truncated: bool,
    pub preview: String,
}

pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_owned(),
        Value::String(text) => text.clone(),
        Value::Number(number) => match number.as_f64() {
            Some(float) if number.is_f64() => format_float(float),
            _ => number.to_string(),
        },
        other => other.to_string(),
    }
}

/// Keeps six significant digits so small rates and shares survive display.
fn format_float(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{value:.0}");
    }
    if !value.is_finite() || value.abs() < 1e-9 {
        return value.to_string();
    }

    let magnitude = value.abs().log10().floor() as i32;
    let decimals = (SIGNIFICANT_DIGITS - 1 - magnitude).clamp(0, 15) as usize;
    let text = format!("{value:.decimals$}");
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_owned()
    } else {
        text
    }
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    let mut truncated = text.chars().take(max_chars).collect::<String>();
    truncated.push('…');
    truncated
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{render_value, truncate_chars, ExecutionResult, Row};

    fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
        pairs.iter().map(|(key, value)| ((*key).to_owned(), value.clone())).collect()
    }

    #[test]
    fn render_row_follows_column_order() {
        let result = ExecutionResult::new(
            vec!["status".to_owned(), "total".to_owned()],
            vec![row(&[("total", json!(12)), ("status", json!("confirmed"))])],
            false,
        );
        assert_eq!(result.render_row(&result.rows[0]), "status: confirmed, total: 12");
    }

    #[test]
    fn floats_keep_significant_digits_for_display() {
        assert_eq!(render_value(&json!(2.3)), "2.3");
        assert_eq!(render_value(&json!(2.666_666_6)), "2.66667");
        assert_eq!(render_value(&json!(0.0042)), "0.0042");
        assert_eq!(render_value(&json!(-0.000_123_456_7)), "-0.000123457");
        assert_eq!(render_value(&json!(1_234_567.8)), "1234568");
        assert_eq!(render_value(&json!(474.0)), "474");
        assert_eq!(render_value(&json!(null)), "null");
    }

    #[test]
    fn summary_keeps_only_a_preview() {
        let rows = (0..50).map(|index| row(&[("id", json!(index))])).collect::<Vec<_>>();
        let result = ExecutionResult::new(vec!["id".to_owned()], rows, true);
        let summary = result.summarize();

        assert_eq!(summary.row_count, 50);
        assert!(summary.truncated);
        assert_eq!(summary.preview, "id: 0");
        assert_eq!(ExecutionResult::default().summarize().preview, "no rows");
    }

    #[test]
    fn truncate_chars_appends_ellipsis() {
        assert_eq!(truncate_chars("abcdef", 3), "abc…");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }
}
