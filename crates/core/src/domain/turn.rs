use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::execution::ExecutionSummary;
use crate::domain::response::ErrorKind;
use crate::domain::sql::ValidationResult;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Answered,
    Degraded,
    Failed,
}

impl TurnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Answered => "answered",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Answered | Self::Degraded)
    }
}

/// Filters and shapes a turn was about, kept so follow-ups can refer back to them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnFocus {
    pub periods: Vec<String>,
    pub tables: Vec<String>,
    pub aggregations: Vec<String>,
}

impl TurnFocus {
    pub fn is_empty(&self) -> bool {
        self.periods.is_empty() && self.tables.is_empty() && self.aggregations.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    question: String,
    generated_sql: Option<String>,
    validation: Option<ValidationResult>,
    execution: Option<ExecutionSummary>,
    answer_text: Option<String>,
    status: TurnStatus,
    error_kind: Option<ErrorKind>,
    focus: TurnFocus,
    recorded_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default)]
pub struct TurnRecord {
    pub question: String,
    pub generated_sql: Option<String>,
    pub validation: Option<ValidationResult>,
    pub execution: Option<ExecutionSummary>,
    pub answer_text: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub degraded: bool,
    pub focus: TurnFocus,
}

impl ConversationTurn {
    /// Finalizes a turn. A successful turn must carry safe, executed SQL; a failed one never does.
    pub fn finalize(record: TurnRecord) -> Result<Self, DomainError> {
        if record.question.trim().is_empty() {
            return Err(DomainError::InvariantViolation(
                "conversation turn requires the question text".to_owned(),
            ));
        }

        let status = match (&record.error_kind, record.degraded) {
            (Some(_), _) => TurnStatus::Failed,
            (None, true) => TurnStatus::Degraded,
            (None, false) => TurnStatus::Answered,
        };

        if status.is_success() {
            let has_sql = record.generated_sql.as_deref().is_some_and(|sql| !sql.trim().is_empty());
            if !has_sql {
                return Err(DomainError::InvariantViolation(
                    "successful turn requires the executed sql".to_owned(),
                ));
            }
            let validated = record.validation.as_ref().is_some_and(ValidationResult::is_safe);
            if !validated {
                return Err(DomainError::InvariantViolation(
                    "successful turn requires a safe validation result".to_owned(),
                ));
            }
            if record.execution.is_none() {
                return Err(DomainError::InvariantViolation(
                    "successful turn requires an execution summary".to_owned(),
                ));
            }
        } else if record.generated_sql.is_some() {
            return Err(DomainError::InvariantViolation(
                "failed turn must not retain rejected sql".to_owned(),
            ));
        }

        Ok(Self {
            question: record.question,
            generated_sql: record.generated_sql,
            validation: record.validation,
            execution: record.execution,
            answer_text: record.answer_text,
            status,
            error_kind: record.error_kind,
            focus: record.focus,
            recorded_at: Utc::now(),
        })
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn generated_sql(&self) -> Option<&str> {
        self.generated_sql.as_deref()
    }

    pub fn validation(&self) -> Option<&ValidationResult> {
        self.validation.as_ref()
    }

    pub fn execution(&self) -> Option<&ExecutionSummary> {
        self.execution.as_ref()
    }

    pub fn answer_text(&self) -> Option<&str> {
        self.answer_text.as_deref()
    }

    pub fn status(&self) -> TurnStatus {
        self.status
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }

    pub fn focus(&self) -> &TurnFocus {
        &self.focus
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }
}
