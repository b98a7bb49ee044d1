//! Drives one turn through the workflow transition table.
//!
//! Each state has a step function returning a [`StepResult`]; the driver turns that into a
//! [`TurnEvent`] and lets the [`FlowEngine`] decide the next state, so no step can skip the
//! table. Attempts come from one shared [`AttemptBudget`] per turn.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use stayql_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use stayql_core::config::AppConfig;
use stayql_core::domain::execution::ExecutionResult;
use stayql_core::domain::question::SessionId;
use stayql_core::domain::response::ErrorKind;
use stayql_core::domain::sql::{FailureCategory, SqlCandidate};
use stayql_core::domain::turn::ConversationTurn;
use stayql_core::flows::{
    AnalystTurnFlow, AttemptBudget, FlowEngine, TurnEvent, TurnState, TurnTransitionError,
};
use stayql_core::ports::{ExecutionError, ExecutionProvider};
use tracing::{debug, info, warn};

use crate::extraction::extract_sql;
use crate::guardrails::{self, failure_category};
use crate::llm::{GenerationOptions, LlmProvider, ProviderError};
use crate::prompts::{schema_hint, PriorFailure, PromptBuilder};
use crate::response::fallback_summary;

#[derive(Clone, Debug, PartialEq)]
pub struct WorkflowSettings {
    pub max_attempts: u32,
    pub row_limit: u32,
    pub llm_timeout: Duration,
    pub execution_timeout: Duration,
    pub sql_temperature: f32,
    pub answer_temperature: f32,
}

impl WorkflowSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.workflow.max_attempts,
            row_limit: config.workflow.row_limit,
            llm_timeout: Duration::from_secs(config.llm.timeout_secs),
            execution_timeout: Duration::from_secs(config.workflow.execution_timeout_secs),
            sql_temperature: config.llm.sql_temperature,
            answer_temperature: config.llm.temperature,
        }
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Everything the runtime needs to know about the turn being answered.
pub struct TurnRequest<'a> {
    pub question: &'a str,
    pub session_id: &'a SessionId,
    pub correlation_id: &'a str,
    pub history: &'a [ConversationTurn],
    pub follow_up: bool,
}

/// One failed attempt, kept for the retry prompt and the final error kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttemptFailure {
    pub kind: ErrorKind,
    pub category: FailureCategory,
    pub rejected_sql: Option<String>,
    /// Internal detail for logs and hint matching. Never shown to the model or the user.
    pub detail: Option<String>,
}

impl AttemptFailure {
    fn generation(category: FailureCategory, detail: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::GenerationFailure,
            category,
            rejected_sql: None,
            detail: Some(detail.into()),
        }
    }

    fn prior_failure(&self) -> PriorFailure {
        PriorFailure {
            rejected_sql: self.rejected_sql.clone(),
            category: self.category,
            hint: schema_hint(self.rejected_sql.as_deref(), self.detail.as_deref()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TurnOutcome {
    Answered { sql: String, result: ExecutionResult, answer: String, degraded: bool },
    Failed { kind: ErrorKind },
    /// A provider outage ended the turn; nothing was retried.
    Aborted { detail: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum StepResult {
    Continue(TurnEvent),
    Retry(AttemptFailure),
    Done(TurnOutcome),
    Fatal(String),
}

#[derive(Default)]
struct TurnProgress {
    candidate: Option<SqlCandidate>,
    result: Option<ExecutionResult>,
    answer: Option<(String, bool)>,
    last_failure: Option<AttemptFailure>,
    rejected: HashMap<String, AttemptFailure>,
}

pub struct AgentRuntime {
    llm: Arc<dyn LlmProvider>,
    executor: Arc<dyn ExecutionProvider>,
    prompts: PromptBuilder,
    engine: FlowEngine<AnalystTurnFlow>,
    audit: Arc<dyn AuditSink>,
    settings: WorkflowSettings,
}

impl AgentRuntime {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        executor: Arc<dyn ExecutionProvider>,
        prompts: PromptBuilder,
        audit: Arc<dyn AuditSink>,
        settings: WorkflowSettings,
    ) -> Self {
        Self { llm, executor, prompts, engine: FlowEngine::default(), audit, settings }
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    pub async fn run_turn(&self, request: &TurnRequest<'_>) -> Result<TurnOutcome, TurnTransitionError> {
        let audit = AuditContext::new(
            Some(request.session_id.to_string()),
            request.correlation_id,
            "analyst_workflow",
        );
        let mut budget = AttemptBudget::new(self.settings.max_attempts);
        let mut progress = TurnProgress::default();
        let mut state = self.engine.initial_state();

        loop {
            let step = match state {
                TurnState::GenerateSql => self.generate(request, &budget, &mut progress).await,
                TurnState::Validate => self.validate(&audit, &mut progress),
                TurnState::Execute => self.execute(request, &audit, &budget, &mut progress).await,
                TurnState::Format => self.format(request, &mut progress).await,
                TurnState::Retry => StepResult::Continue(TurnEvent::RetryScheduled),
                TurnState::HandleError => StepResult::Continue(TurnEvent::ErrorRecorded),
                TurnState::Done => StepResult::Done(finish(&mut progress)),
                TurnState::Aborted => StepResult::Done(TurnOutcome::Aborted {
                    detail: progress
                        .last_failure
                        .take()
                        .and_then(|failure| failure.detail)
                        .unwrap_or_else(|| "provider outage".to_owned()),
                }),
            };

            let event = match step {
                StepResult::Done(outcome) => return Ok(outcome),
                StepResult::Continue(event) => event,
                StepResult::Retry(failure) => {
                    let event = failure_event(state);
                    warn!(
                        event_name = "workflow.attempt_failed",
                        correlation_id = request.correlation_id,
                        session_id = %request.session_id,
                        attempt = budget.attempt,
                        state = state.as_str(),
                        error_kind = failure.kind.as_str(),
                        category = failure.category.describe(),
                        "workflow attempt failed"
                    );
                    if let Some(candidate) = progress.candidate.take() {
                        progress
                            .rejected
                            .entry(candidate.fingerprint())
                            .or_insert_with(|| failure.clone());
                    }
                    progress.last_failure = Some(failure);
                    event
                }
                StepResult::Fatal(detail) => {
                    warn!(
                        event_name = "workflow.provider_outage",
                        correlation_id = request.correlation_id,
                        session_id = %request.session_id,
                        attempt = budget.attempt,
                        state = state.as_str(),
                        "provider outage aborted the turn"
                    );
                    progress.last_failure = Some(AttemptFailure {
                        kind: ErrorKind::ProviderOutage,
                        category: FailureCategory::ExecutionError,
                        rejected_sql: None,
                        detail: Some(detail),
                    });
                    TurnEvent::ProviderOutage
                }
            };

            let outcome = self.engine.apply_with_audit(
                state,
                event,
                &budget,
                self.audit.as_ref(),
                &audit,
            )?;
            info!(
                event_name = "workflow.transition",
                correlation_id = request.correlation_id,
                session_id = %request.session_id,
                attempt = budget.attempt,
                from = outcome.from.as_str(),
                to = outcome.to.as_str(),
                "workflow transition applied"
            );

            state = outcome.to;
            // the next attempt starts once the table has accepted the retry
            if state == TurnState::Retry {
                budget = budget.next();
            }
        }
    }

    async fn generate(
        &self,
        request: &TurnRequest<'_>,
        budget: &AttemptBudget,
        progress: &mut TurnProgress,
    ) -> StepResult {
        let prior = progress.last_failure.as_ref().map(AttemptFailure::prior_failure);
        let prompt = match self.prompts.build_generation_prompt(
            request.question,
            request.history,
            request.follow_up,
            prior.as_ref(),
        ) {
            Ok(prompt) => prompt,
            Err(error) => {
                return StepResult::Retry(AttemptFailure::generation(
                    FailureCategory::NoStatement,
                    error.to_string(),
                ))
            }
        };

        let options = GenerationOptions::sql(self.settings.sql_temperature);
        let completion =
            match with_timeout(self.settings.llm_timeout, self.llm.generate(&prompt, &options)).await {
                Ok(completion) => completion,
                Err(ProviderError::Outage(detail)) => return StepResult::Fatal(detail),
                Err(error) => {
                    return StepResult::Retry(AttemptFailure::generation(
                        FailureCategory::NoStatement,
                        error.to_string(),
                    ))
                }
            };

        let Some(sql) = extract_sql(&completion) else {
            return StepResult::Retry(AttemptFailure::generation(
                FailureCategory::NoStatement,
                "completion contained no sql statement",
            ));
        };

        let candidate = match SqlCandidate::new(sql, budget.attempt) {
            Ok(candidate) => candidate,
            Err(error) => {
                return StepResult::Retry(AttemptFailure::generation(
                    FailureCategory::NoStatement,
                    error.to_string(),
                ))
            }
        };
        debug!(
            event_name = "workflow.sql_generated",
            correlation_id = request.correlation_id,
            attempt = budget.attempt,
            sql = candidate.raw_text(),
            "candidate sql generated"
        );

        if let Some(earlier) = progress.rejected.get(&candidate.fingerprint()) {
            return StepResult::Retry(earlier.clone());
        }

        progress.candidate = Some(candidate);
        StepResult::Continue(TurnEvent::SqlGenerated)
    }

    fn validate(&self, audit: &AuditContext, progress: &mut TurnProgress) -> StepResult {
        let Some(candidate) = progress.candidate.as_ref() else {
            return StepResult::Retry(AttemptFailure::generation(
                FailureCategory::NoStatement,
                "no candidate to validate",
            ));
        };

        match self.rejection(audit, candidate, "validate") {
            None => StepResult::Continue(TurnEvent::ValidationPassed),
            Some(failure) => StepResult::Retry(failure),
        }
    }

    /// Runs the validator and records a security event when it refuses the candidate.
    fn rejection(
        &self,
        audit: &AuditContext,
        candidate: &SqlCandidate,
        stage: &str,
    ) -> Option<AttemptFailure> {
        let validation = guardrails::validate(candidate.raw_text());
        let category = failure_category(&validation)?;
        self.audit.emit(
            audit
                .event("security.sql_rejected", AuditCategory::Security, AuditOutcome::Rejected)
                .with_metadata("rule", validation.matched_rule().unwrap_or("unknown"))
                .with_metadata("category", category.describe())
                .with_metadata("stage", stage)
                .with_metadata("attempt", candidate.attempt_number().to_string()),
        );
        Some(AttemptFailure {
            kind: ErrorKind::SecurityRejected,
            category,
            rejected_sql: Some(candidate.raw_text().to_owned()),
            detail: validation.matched_rule().map(str::to_owned),
        })
    }

    async fn execute(
        &self,
        request: &TurnRequest<'_>,
        audit: &AuditContext,
        budget: &AttemptBudget,
        progress: &mut TurnProgress,
    ) -> StepResult {
        let Some(candidate) = progress.candidate.as_ref() else {
            return StepResult::Retry(AttemptFailure::generation(
                FailureCategory::NoStatement,
                "no candidate to execute",
            ));
        };

        if let Some(failure) = self.rejection(audit, candidate, "execute") {
            return StepResult::Retry(failure);
        }

        let execution = tokio::time::timeout(
            self.settings.execution_timeout,
            self.executor.execute_readonly(candidate.raw_text(), self.settings.row_limit),
        )
        .await
        .unwrap_or(Err(ExecutionError::Timeout));

        match execution {
            Ok(result) => {
                info!(
                    event_name = "workflow.query_executed",
                    correlation_id = request.correlation_id,
                    session_id = %request.session_id,
                    attempt = budget.attempt,
                    row_count = result.row_count,
                    truncated = result.truncated,
                    "query executed"
                );
                self.audit.emit(
                    audit
                        .event("execution.query_completed", AuditCategory::Execution, AuditOutcome::Success)
                        .with_metadata("attempt", budget.attempt.to_string())
                        .with_metadata("row_count", result.row_count.to_string())
                        .with_metadata("truncated", result.truncated.to_string()),
                );
                progress.result = Some(result);
                StepResult::Continue(TurnEvent::ExecutionSucceeded)
            }
            Err(error) if error.is_recoverable() => {
                let category = match &error {
                    ExecutionError::Query { message } if is_syntax_error(message) => {
                        FailureCategory::SyntaxError
                    }
                    _ => FailureCategory::ExecutionError,
                };
                self.audit.emit(
                    audit
                        .event("execution.query_failed", AuditCategory::Execution, AuditOutcome::Failed)
                        .with_metadata("attempt", budget.attempt.to_string())
                        .with_metadata("category", category.describe()),
                );
                StepResult::Retry(AttemptFailure {
                    kind: ErrorKind::ExecutionFailed,
                    category,
                    rejected_sql: Some(candidate.raw_text().to_owned()),
                    detail: Some(error.detail()),
                })
            }
            Err(error) => {
                self.audit.emit(
                    audit
                        .event("execution.query_failed", AuditCategory::Execution, AuditOutcome::Failed)
                        .with_metadata("attempt", budget.attempt.to_string())
                        .with_metadata("category", "outage"),
                );
                StepResult::Fatal(error.detail())
            }
        }
    }

    async fn format(&self, request: &TurnRequest<'_>, progress: &mut TurnProgress) -> StepResult {
        let (Some(candidate), Some(result)) = (progress.candidate.as_ref(), progress.result.as_ref())
        else {
            return StepResult::Done(TurnOutcome::Failed { kind: ErrorKind::ExecutionFailed });
        };

        let formatted = match self.prompts.build_formatting_prompt(
            request.question,
            candidate.raw_text(),
            result,
        ) {
            Ok(prompt) => {
                let options = GenerationOptions::answer(self.settings.answer_temperature);
                with_timeout(self.settings.llm_timeout, self.llm.generate(&prompt, &options))
                    .await
                    .map_err(|error| error.to_string())
            }
            Err(error) => Err(error.to_string()),
        };

        match formatted {
            Ok(answer) => {
                progress.answer = Some((answer, false));
                StepResult::Continue(TurnEvent::AnswerFormatted)
            }
            Err(detail) => {
                warn!(
                    event_name = "workflow.formatting_degraded",
                    correlation_id = request.correlation_id,
                    session_id = %request.session_id,
                    detail = %detail,
                    "answer formatting failed, using fallback summary"
                );
                progress.answer = Some((fallback_summary(result), true));
                StepResult::Continue(TurnEvent::FormattingDegraded)
            }
        }
    }
}

fn finish(progress: &mut TurnProgress) -> TurnOutcome {
    match (progress.candidate.take(), progress.result.take(), progress.answer.take()) {
        (Some(candidate), Some(result), Some((answer, degraded))) => TurnOutcome::Answered {
            sql: candidate.raw_text().to_owned(),
            result,
            answer,
            degraded,
        },
        _ => TurnOutcome::Failed {
            kind: progress
                .last_failure
                .as_ref()
                .map(|failure| failure.kind)
                .unwrap_or(ErrorKind::GenerationFailure),
        },
    }
}

fn failure_event(state: TurnState) -> TurnEvent {
    match state {
        TurnState::Validate => TurnEvent::ValidationRejected,
        TurnState::Execute => TurnEvent::ExecutionFailed,
        _ => TurnEvent::GenerationFailed,
    }
}

fn is_syntax_error(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("syntax error") || message.contains("incomplete input")
}

async fn with_timeout<F>(limit: Duration, call: F) -> Result<String, ProviderError>
where
    F: Future<Output = Result<String, ProviderError>>,
{
    tokio::time::timeout(limit, call).await.unwrap_or(Err(ProviderError::Timeout))
}
