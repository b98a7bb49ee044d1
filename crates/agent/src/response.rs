use stayql_core::domain::execution::{ExecutionResult, Row};
use stayql_core::domain::response::{AnalystResponse, ErrorKind};
use stayql_core::domain::turn::TurnRecord;

use crate::conversation::extract_focus;
use crate::guardrails;
use crate::runtime::TurnOutcome;

const FALLBACK_ROW_PREVIEW: usize = 10;

/// Deterministic answer used when the formatting call fails.
pub fn fallback_summary(result: &ExecutionResult) -> String {
    if result.is_empty() {
        return "No matching data was found for this question.".to_owned();
    }

    let plural = if result.row_count == 1 { "" } else { "s" };
    let mut lines = vec![format!("The query returned {} row{plural}:", result.row_count)];
    lines.extend(
        result.rows.iter().take(FALLBACK_ROW_PREVIEW).map(|row| format!("- {}", result.render_row(row))),
    );
    let hidden = result.row_count.saturating_sub(FALLBACK_ROW_PREVIEW);
    if hidden > 0 {
        lines.push(format!("... and {hidden} more"));
    }
    if result.truncated {
        lines.push("Results were cut off at the row limit.".to_owned());
    }
    lines.join("\n")
}

/// Turns workflow outcomes into the stable response shape and the turn kept in history.
#[derive(Clone, Debug)]
pub struct ResponseService {
    max_raw_data_items: usize,
}

impl ResponseService {
    pub fn new(max_raw_data_items: usize) -> Self {
        Self { max_raw_data_items }
    }

    pub fn respond(&self, outcome: &TurnOutcome) -> AnalystResponse {
        match outcome {
            TurnOutcome::Answered { sql, result, answer, degraded } => {
                let raw_data = result
                    .rows
                    .iter()
                    .take(self.max_raw_data_items)
                    .cloned()
                    .collect::<Vec<Row>>();
                AnalystResponse::success(answer.clone(), sql.clone(), raw_data, *degraded)
            }
            TurnOutcome::Failed { kind } => AnalystResponse::failure(*kind),
            TurnOutcome::Aborted { .. } => AnalystResponse::failure(ErrorKind::ProviderOutage),
        }
    }

    /// The history entry for a finished turn. Failed turns keep the question only.
    pub fn turn_record(&self, question: &str, outcome: &TurnOutcome) -> TurnRecord {
        match outcome {
            TurnOutcome::Answered { sql, result, answer, degraded } => TurnRecord {
                question: question.to_owned(),
                generated_sql: Some(sql.clone()),
                validation: Some(guardrails::validate(sql)),
                execution: Some(result.summarize()),
                answer_text: Some(answer.clone()),
                error_kind: None,
                degraded: *degraded,
                focus: extract_focus(question, Some(sql)),
            },
            TurnOutcome::Failed { kind } => failed_record(question, *kind),
            TurnOutcome::Aborted { .. } => failed_record(question, ErrorKind::ProviderOutage),
        }
    }
}

fn failed_record(question: &str, kind: ErrorKind) -> TurnRecord {
    TurnRecord {
        question: question.to_owned(),
        error_kind: Some(kind),
        focus: extract_focus(question, None),
        ..TurnRecord::default()
    }
}
