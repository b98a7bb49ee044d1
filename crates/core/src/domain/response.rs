use serde::{Deserialize, Serialize};

use crate::domain::execution::Row;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidQuestion,
    SessionBusy,
    GenerationFailure,
    SecurityRejected,
    ExecutionFailed,
    ProviderOutage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidQuestion => "invalid_question",
            Self::SessionBusy => "session_busy",
            Self::GenerationFailure => "generation_failure",
            Self::SecurityRejected => "security_rejected",
            Self::ExecutionFailed => "execution_failed",
            Self::ProviderOutage => "provider_outage",
        }
    }

    /// Sanitized, actionable text shown in place of an answer.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidQuestion => {
                "Please enter a question about the reservations or reviews data (up to 2000 characters)."
            }
            Self::SessionBusy => {
                "Your previous question in this conversation is still being answered. Please wait for it to finish."
            }
            Self::GenerationFailure => {
                "I couldn't turn that question into a query. Try rephrasing it with the metric and time range you want."
            }
            Self::SecurityRejected => {
                "I can only read the reservations and reviews data, not change it. Try asking for a count, total, or average instead."
            }
            Self::ExecutionFailed => {
                "The query could not be completed against the dataset. Try narrowing the time range or rephrasing the question."
            }
            Self::ProviderOutage => {
                "The analytics service is temporarily unavailable. Please retry shortly."
            }
        }
    }
}

/// The externally visible result of one turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalystResponse {
    pub text_answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_query: Option<String>,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default)]
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<Vec<Row>>,
}

impl AnalystResponse {
    pub fn success(
        text_answer: impl Into<String>,
        sql_query: impl Into<String>,
        raw_data: Vec<Row>,
        degraded: bool,
    ) -> Self {
        Self {
            text_answer: text_answer.into(),
            sql_query: Some(sql_query.into()),
            status: ResponseStatus::Success,
            error_kind: None,
            degraded,
            raw_data: Some(raw_data),
        }
    }

    pub fn failure(kind: ErrorKind) -> Self {
        Self {
            text_answer: kind.user_message().to_owned(),
            sql_query: None,
            status: ResponseStatus::Error,
            error_kind: Some(kind),
            degraded: false,
            raw_data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}
