use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{AttemptBudget, TransitionOutcome, TurnAction, TurnEvent, TurnState};

pub trait FlowDefinition {
    fn initial_state(&self) -> TurnState;
    fn transition(
        &self,
        current: TurnState,
        event: TurnEvent,
        budget: &AttemptBudget,
    ) -> Result<TransitionOutcome, TurnTransitionError>;
}

#[derive(Clone, Debug, Default)]
pub struct AnalystTurnFlow;

impl FlowDefinition for AnalystTurnFlow {
    fn initial_state(&self) -> TurnState {
        TurnState::GenerateSql
    }

    fn transition(
        &self,
        current: TurnState,
        event: TurnEvent,
        budget: &AttemptBudget,
    ) -> Result<TransitionOutcome, TurnTransitionError> {
        transition_turn(current, event, budget)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> TurnState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: TurnState,
        event: TurnEvent,
        budget: &AttemptBudget,
    ) -> Result<TransitionOutcome, TurnTransitionError> {
        self.flow.transition(current, event, budget)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: TurnState,
        event: TurnEvent,
        budget: &AttemptBudget,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, TurnTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, budget);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit.session_id.clone(),
                        audit.correlation_id.clone(),
                        "workflow.transition_applied",
                        AuditCategory::Workflow,
                        audit.actor.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("event", format!("{:?}", outcome.event))
                    .with_metadata("attempt", budget.attempt.to_string()),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit.session_id.clone(),
                        audit.correlation_id.clone(),
                        "workflow.transition_rejected",
                        AuditCategory::Workflow,
                        audit.actor.clone(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<AnalystTurnFlow> {
    fn default() -> Self {
        Self::new(AnalystTurnFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TurnTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: TurnState, event: TurnEvent },
    #[error("attempt {attempt} is outside the budget of {max_attempts}")]
    AttemptOutOfBudget { attempt: u32, max_attempts: u32 },
}

fn transition_turn(
    current: TurnState,
    event: TurnEvent,
    budget: &AttemptBudget,
) -> Result<TransitionOutcome, TurnTransitionError> {
    use TurnAction::{
        AppendTurn, ExecuteQuery, FoldFailureIntoPrompt, FormatAnswer, GenerateSql,
        RecordFailure, ValidateCandidate,
    };
    use TurnEvent::{
        AnswerFormatted, ErrorRecorded, ExecutionFailed, ExecutionSucceeded, FormattingDegraded,
        GenerationFailed, ProviderOutage, RetryScheduled, SqlGenerated, ValidationPassed,
        ValidationRejected,
    };

    if budget.attempt == 0 || budget.attempt > budget.max_attempts {
        return Err(TurnTransitionError::AttemptOutOfBudget {
            attempt: budget.attempt,
            max_attempts: budget.max_attempts,
        });
    }

    let retry_or_fail = || {
        if budget.has_remaining() {
            (TurnState::Retry, vec![FoldFailureIntoPrompt])
        } else {
            (TurnState::HandleError, vec![RecordFailure])
        }
    };

    let (to, actions) = match (current, event) {
        (TurnState::GenerateSql, SqlGenerated) => (TurnState::Validate, vec![ValidateCandidate]),
        (TurnState::GenerateSql, GenerationFailed)
        | (TurnState::Validate, ValidationRejected)
        | (TurnState::Execute, ExecutionFailed) => retry_or_fail(),
        (TurnState::Validate, ValidationPassed) => (TurnState::Execute, vec![ExecuteQuery]),
        (TurnState::Execute, ExecutionSucceeded) => (TurnState::Format, vec![FormatAnswer]),
        (TurnState::Retry, RetryScheduled) => (TurnState::GenerateSql, vec![GenerateSql]),
        (TurnState::Format, AnswerFormatted) | (TurnState::Format, FormattingDegraded) => {
            (TurnState::Done, vec![AppendTurn])
        }
        (TurnState::HandleError, ErrorRecorded) => (TurnState::Done, vec![AppendTurn]),
        (TurnState::GenerateSql, ProviderOutage) | (TurnState::Execute, ProviderOutage) => {
            (TurnState::Aborted, vec![AppendTurn])
        }
        _ => return Err(TurnTransitionError::InvalidTransition { state: current, event }),
    };

    Ok(TransitionOutcome { from: current, to, event, actions })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::flows::engine::{FlowEngine, TurnTransitionError};
    use crate::flows::states::{AttemptBudget, TurnAction, TurnEvent, TurnState};

    #[test]
    fn happy_path_reaches_done() {
        let engine = FlowEngine::default();
        let budget = AttemptBudget::new(3);
        let mut state = engine.initial_state();

        for event in [
            TurnEvent::SqlGenerated,
            TurnEvent::ValidationPassed,
            TurnEvent::ExecutionSucceeded,
            TurnEvent::AnswerFormatted,
        ] {
            state = engine.apply(state, event, &budget).expect("happy path transition").to;
        }

        assert_eq!(state, TurnState::Done);
    }

    #[test]
    fn rejection_retries_while_budget_remains() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(TurnState::Validate, TurnEvent::ValidationRejected, &AttemptBudget::new(3))
            .expect("validate -> retry");

        assert_eq!(outcome.to, TurnState::Retry);
        assert_eq!(outcome.actions, vec![TurnAction::FoldFailureIntoPrompt]);

        let regenerate = engine
            .apply(TurnState::Retry, TurnEvent::RetryScheduled, &AttemptBudget::new(3))
            .expect("retry -> generate");
        assert_eq!(regenerate.to, TurnState::GenerateSql);
    }

    #[test]
    fn exhausted_budget_routes_to_error_handling() {
        let engine = FlowEngine::default();
        let last_attempt = AttemptBudget { attempt: 3, max_attempts: 3 };

        for (state, event) in [
            (TurnState::GenerateSql, TurnEvent::GenerationFailed),
            (TurnState::Validate, TurnEvent::ValidationRejected),
            (TurnState::Execute, TurnEvent::ExecutionFailed),
        ] {
            let outcome = engine.apply(state, event, &last_attempt).expect("failure edge");
            assert_eq!(outcome.to, TurnState::HandleError);
        }

        let done = engine
            .apply(TurnState::HandleError, TurnEvent::ErrorRecorded, &last_attempt)
            .expect("handle error -> done");
        assert_eq!(done.to, TurnState::Done);
    }

    #[test]
    fn provider_outage_aborts_from_provider_states_only() {
        let engine = FlowEngine::default();
        let budget = AttemptBudget::new(3);

        let aborted = engine
            .apply(TurnState::Execute, TurnEvent::ProviderOutage, &budget)
            .expect("execute -> aborted");
        assert_eq!(aborted.to, TurnState::Aborted);
        assert!(aborted.to.is_terminal());

        let error = engine
            .apply(TurnState::Validate, TurnEvent::ProviderOutage, &budget)
            .expect_err("validation never talks to a provider");
        assert!(matches!(error, TurnTransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn invalid_pairs_and_budgets_are_rejected() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(TurnState::GenerateSql, TurnEvent::ExecutionSucceeded, &AttemptBudget::new(3))
            .expect_err("cannot skip validation");
        assert_eq!(
            error,
            TurnTransitionError::InvalidTransition {
                state: TurnState::GenerateSql,
                event: TurnEvent::ExecutionSucceeded
            }
        );

        let error = engine
            .apply(
                TurnState::GenerateSql,
                TurnEvent::SqlGenerated,
                &AttemptBudget { attempt: 4, max_attempts: 3 },
            )
            .expect_err("attempt beyond budget");
        assert!(matches!(error, TurnTransitionError::AttemptOutOfBudget { .. }));
    }

    #[test]
    fn transition_emits_audit_event() {
        let engine = FlowEngine::default();
        let sink = InMemoryAuditSink::default();

        engine
            .apply_with_audit(
                TurnState::GenerateSql,
                TurnEvent::SqlGenerated,
                &AttemptBudget::new(3),
                &sink,
                &AuditContext::new(Some("session-7".to_owned()), "req-42", "workflow-engine"),
            )
            .expect("transition should succeed");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "req-42");
        assert_eq!(events[0].session_id.as_deref(), Some("session-7"));
        assert_eq!(events[0].event_type, "workflow.transition_applied");
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("validate"));
    }
}
