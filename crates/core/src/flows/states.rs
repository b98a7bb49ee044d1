use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TurnState {
    GenerateSql,
    Validate,
    Execute,
    Format,
    Retry,
    HandleError,
    Done,
    Aborted,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GenerateSql => "generate_sql",
            Self::Validate => "validate",
            Self::Execute => "execute",
            Self::Format => "format",
            Self::Retry => "retry",
            Self::HandleError => "handle_error",
            Self::Done => "done",
            Self::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnEvent {
    SqlGenerated,
    GenerationFailed,
    ValidationPassed,
    ValidationRejected,
    ExecutionSucceeded,
    ExecutionFailed,
    RetryScheduled,
    AnswerFormatted,
    FormattingDegraded,
    ErrorRecorded,
    ProviderOutage,
}

/// Attempts used so far in the current turn. `attempt` is 1-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptBudget {
    pub attempt: u32,
    pub max_attempts: u32,
}

impl AttemptBudget {
    pub fn new(max_attempts: u32) -> Self {
        Self { attempt: 1, max_attempts }
    }

    pub fn has_remaining(&self) -> bool {
        self.attempt < self.max_attempts
    }

    pub fn next(self) -> Self {
        Self { attempt: self.attempt + 1, ..self }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnAction {
    ValidateCandidate,
    ExecuteQuery,
    FormatAnswer,
    FoldFailureIntoPrompt,
    GenerateSql,
    RecordFailure,
    AppendTurn,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: TurnState,
    pub to: TurnState,
    pub event: TurnEvent,
    pub actions: Vec<TurnAction>,
}
