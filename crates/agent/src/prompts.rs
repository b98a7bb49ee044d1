use serde::Serialize;
use stayql_core::domain::execution::ExecutionResult;
use stayql_core::domain::sql::FailureCategory;
use stayql_core::domain::turn::ConversationTurn;
use tera::{Context, Tera};
use thiserror::Error;

pub const SCHEMA_DESCRIPTION: &str = "\
- reservations: reservation_id (INTEGER), account_id (INTEGER), listing_id (INTEGER), status (TEXT), \
created_at (TEXT, ISO-8601 timestamp), check_in (TEXT, ISO-8601 date), check_out (TEXT, ISO-8601 date), \
fee_host_payout_usd (REAL), guest_count (REAL), nights_count (REAL), booking_window (INTEGER)
- reviews: review_id (TEXT), reservation_id (INTEGER, references reservations), overall_rating (REAL), \
cleaniness_rating (REAL), location_rating (REAL)";

const FORMATTING_ROW_PREVIEW: usize = 20;

#[derive(Clone, Copy, Debug, Serialize)]
pub struct WorkedExample {
    pub question: &'static str,
    pub sql: &'static str,
}

pub const WORKED_EXAMPLES: [WorkedExample; 4] = [
    WorkedExample {
        question: "average guest count for Q1 2025",
        sql: "SELECT AVG(guest_count) FROM reservations WHERE strftime('%Y', created_at) = '2025' AND CAST(strftime('%m', created_at) AS INTEGER) IN (1, 2, 3)",
    },
    WorkedExample {
        question: "average guest count for H1 2025",
        sql: "SELECT AVG(guest_count) FROM reservations WHERE strftime('%Y', created_at) = '2025' AND CAST(strftime('%m', created_at) AS INTEGER) BETWEEN 1 AND 6",
    },
    WorkedExample {
        question: "total host payout for stays checking in between 2025-02-10 and 2025-03-15",
        sql: "SELECT SUM(fee_host_payout_usd) FROM reservations WHERE date(check_in) BETWEEN '2025-02-10' AND '2025-03-15'",
    },
    WorkedExample {
        question: "delete all reservations",
        sql: "SELECT 'I can only read data, not modify it' AS error_message",
    },
];

/// What the model is told about the attempt that just failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PriorFailure {
    pub rejected_sql: Option<String>,
    pub category: FailureCategory,
    pub hint: Option<&'static str>,
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt template failed: {0}")]
    Template(String),
}

impl From<tera::Error> for PromptError {
    fn from(error: tera::Error) -> Self {
        Self::Template(error.to_string())
    }
}

#[derive(Serialize)]
struct HistoryEntry<'a> {
    question: &'a str,
    sql: Option<&'a str>,
    focus: Option<String>,
}

#[derive(Serialize)]
struct RetrySection<'a> {
    category: &'static str,
    rejected_sql: Option<&'a str>,
    hint: Option<&'static str>,
}

/// Renders generation and formatting prompts from templates compiled once at construction.
pub struct PromptBuilder {
    templates: Tera,
}

impl PromptBuilder {
    pub fn new() -> Result<Self, PromptError> {
        let mut templates = Tera::default();
        templates.add_raw_template("generation.txt", include_str!("../templates/generation.txt"))?;
        templates.add_raw_template("formatting.txt", include_str!("../templates/formatting.txt"))?;
        Ok(Self { templates })
    }

    pub fn build_generation_prompt(
        &self,
        question: &str,
        history: &[ConversationTurn],
        follow_up: bool,
        prior_failure: Option<&PriorFailure>,
    ) -> Result<String, PromptError> {
        let history = history
            .iter()
            .map(|turn| HistoryEntry {
                question: turn.question(),
                sql: turn.generated_sql(),
                focus: describe_focus(turn),
            })
            .collect::<Vec<_>>();
        let retry = prior_failure.map(|failure| RetrySection {
            category: failure.category.describe(),
            rejected_sql: failure.rejected_sql.as_deref(),
            hint: failure.hint,
        });

        let mut context = Context::new();
        context.insert("schema", SCHEMA_DESCRIPTION);
        context.insert("examples", &WORKED_EXAMPLES);
        context.insert("history", &history);
        context.insert("follow_up", &(follow_up && !history.is_empty()));
        context.insert("retry", &retry);
        context.insert("question", question);

        Ok(self.templates.render("generation.txt", &context)?)
    }

    pub fn build_formatting_prompt(
        &self,
        question: &str,
        sql: &str,
        result: &ExecutionResult,
    ) -> Result<String, PromptError> {
        let rows = result
            .rows
            .iter()
            .take(FORMATTING_ROW_PREVIEW)
            .map(|row| result.render_row(row))
            .collect::<Vec<_>>();

        let mut context = Context::new();
        context.insert("question", question);
        context.insert("sql", sql);
        context.insert("empty", &result.is_empty());
        context.insert("rows", &rows);
        context.insert("row_count", &result.row_count);
        context.insert("truncated", &result.truncated);
        context.insert("hidden_rows", &result.row_count.saturating_sub(rows.len()));

        Ok(self.templates.render("formatting.txt", &context)?)
    }
}

fn describe_focus(turn: &ConversationTurn) -> Option<String> {
    let focus = turn.focus();
    if focus.is_empty() {
        return None;
    }
    let parts = [&focus.periods, &focus.tables, &focus.aggregations]
        .into_iter()
        .filter(|values| !values.is_empty())
        .map(|values| values.join(", "))
        .collect::<Vec<_>>();
    Some(parts.join("; "))
}

/// Known schema pitfalls, matched against the failed SQL and the dataset's error text.
pub fn schema_hint(rejected_sql: Option<&str>, error_detail: Option<&str>) -> Option<&'static str> {
    let haystack = format!(
        "{} {}",
        rejected_sql.unwrap_or_default(),
        error_detail.unwrap_or_default()
    )
    .to_ascii_lowercase();

    if haystack.contains("cleanliness") {
        return Some("The column is spelled cleaniness_rating, not cleanliness_rating.");
    }
    if haystack.contains("review_id")
        && ["convert", "mismatch", "datatype"].iter().any(|needle| haystack.contains(needle))
    {
        return Some("review_id is text. Compare it with a quoted value such as review_id = '1234'.");
    }
    if haystack.contains("no such table") {
        return Some("Only the reservations and reviews tables exist.");
    }
    if haystack.contains("no such column") {
        return Some("Use only the columns listed in the schema.");
    }
    None
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use stayql_core::domain::execution::{ExecutionResult, Row};
    use stayql_core::domain::sql::{FailureCategory, ValidationResult};
    use stayql_core::domain::turn::{ConversationTurn, TurnFocus, TurnRecord};

    use super::{schema_hint, PriorFailure, PromptBuilder};

    fn q1_turn() -> ConversationTurn {
        ConversationTurn::finalize(TurnRecord {
            question: "What is the average guest count for Q1 2025?".to_owned(),
            generated_sql: Some("SELECT AVG(guest_count) FROM reservations".to_owned()),
            validation: Some(ValidationResult::safe()),
            execution: Some(ExecutionResult::default().summarize()),
            answer_text: Some("2.3".to_owned()),
            focus: TurnFocus {
                periods: vec!["2025".to_owned(), "Q1".to_owned()],
                tables: vec!["reservations".to_owned()],
                aggregations: vec!["AVG".to_owned()],
            },
            ..TurnRecord::default()
        })
        .expect("valid turn")
    }

    fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
        pairs.iter().map(|(key, value)| ((*key).to_owned(), value.clone())).collect()
    }

    #[test]
    fn generation_prompt_carries_schema_examples_and_question() {
        let builder = PromptBuilder::new().expect("templates compile");
        let prompt = builder
            .build_generation_prompt("How many reviews are there?", &[], false, None)
            .expect("render");

        assert!(prompt.contains("cleaniness_rating (REAL)"));
        assert!(prompt.contains("average guest count for Q1 2025"));
        assert!(prompt.contains("average guest count for H1 2025"));
        assert!(prompt.contains("BETWEEN '2025-02-10' AND '2025-03-15'"));
        assert!(prompt.contains("QUESTION: How many reviews are there?"));
        assert!(!prompt.contains("CONVERSATION SO FAR"));
        assert!(!prompt.contains("PREVIOUS ATTEMPT FAILED"));
    }

    #[test]
    fn follow_up_prompt_includes_prior_question_and_sql() {
        let builder = PromptBuilder::new().expect("templates compile");
        let prompt = builder
            .build_generation_prompt("and what about Q2?", &[q1_turn()], true, None)
            .expect("render");

        assert!(prompt.contains("Question: What is the average guest count for Q1 2025?"));
        assert!(prompt.contains("SQL: SELECT AVG(guest_count) FROM reservations"));
        assert!(prompt.contains("Focus: 2025, Q1; reservations; AVG"));
        assert!(prompt.contains("The current question is a follow-up."));
        assert!(!prompt.contains("Answer:"));
    }

    #[test]
    fn retry_prompt_shows_category_and_sql_but_not_rule_names() {
        let builder = PromptBuilder::new().expect("templates compile");
        let failure = PriorFailure {
            rejected_sql: Some("SELECT AVG(cleanliness_rating) FROM reviews".to_owned()),
            category: FailureCategory::ExecutionError,
            hint: schema_hint(Some("SELECT AVG(cleanliness_rating) FROM reviews"), None),
        };
        let prompt = builder
            .build_generation_prompt("average cleanliness?", &[], false, Some(&failure))
            .expect("render");

        assert!(prompt.contains("PREVIOUS ATTEMPT FAILED (execution error)"));
        assert!(prompt.contains("Rejected SQL: SELECT AVG(cleanliness_rating) FROM reviews"));
        assert!(prompt.contains("Hint: The column is spelled cleaniness_rating"));
        assert!(!prompt.contains("write_operation"));
        assert!(!prompt.contains("statement_stacking"));
    }

    #[test]
    fn formatting_prompt_lists_rows() {
        let builder = PromptBuilder::new().expect("templates compile");
        let result = ExecutionResult::new(
            vec!["avg".to_owned()],
            vec![row(&[("avg", json!(2.3))])],
            false,
        );
        let prompt = builder
            .build_formatting_prompt("average guests?", "SELECT AVG(guest_count) AS avg FROM reservations", &result)
            .expect("render");

        assert!(prompt.contains("Results (1 row):"));
        assert!(prompt.contains("avg: 2.3"));
        assert!(!prompt.contains("no matching data"));
    }

    #[test]
    fn formatting_prompt_for_empty_result_forbids_fabrication() {
        let builder = PromptBuilder::new().expect("templates compile");
        let result = ExecutionResult::new(vec!["avg".to_owned()], Vec::new(), false);
        let prompt = builder
            .build_formatting_prompt("payout in 1990?", "SELECT 1", &result)
            .expect("render");

        assert!(prompt.contains("no matching data was found"));
        assert!(prompt.contains("Do not guess or invent a value."));
    }

    #[test]
    fn schema_hints_cover_known_pitfalls() {
        assert!(schema_hint(None, Some("Could not convert string 'abc' for review_id"))
            .is_some_and(|hint| hint.contains("quoted")));
        assert!(schema_hint(None, Some("no such table: bookings")).is_some());
        assert_eq!(schema_hint(Some("SELECT 1"), Some("interrupted")), None);
    }
}
