use std::sync::Arc;

use stayql_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use stayql_core::config::AppConfig;
use stayql_core::domain::question::{Question, SessionId};
use stayql_core::domain::response::{AnalystResponse, ErrorKind};
use stayql_core::domain::sql::ValidationResult;
use stayql_core::domain::turn::ConversationTurn;
use stayql_core::errors::{ApplicationError, InterfaceError};
use stayql_core::flows::TurnTransitionError;
use stayql_core::ports::{AccessMode, ExecutionProvider};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::conversation::{is_follow_up, ConversationStore};
use crate::guardrails;
use crate::llm::LlmProvider;
use crate::prompts::{PromptBuilder, PromptError};
use crate::response::ResponseService;
use crate::runtime::{AgentRuntime, TurnOutcome, TurnRequest, WorkflowSettings};

#[derive(Debug, Error)]
pub enum AnalystError {
    /// The LLM or the dataset is down; the turn was recorded and aborted.
    #[error("provider outage: {detail}")]
    ProviderOutage { detail: String, correlation_id: String },
    #[error("execution provider reports write access; a read-only provider is required")]
    WritableExecutionProvider,
    #[error("prompt templates failed to compile: {0}")]
    Prompt(#[from] PromptError),
    #[error("workflow reached an invalid state: {0}")]
    Workflow(#[from] TurnTransitionError),
}

impl AnalystError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let fallback = correlation_id.into();
        match self {
            Self::ProviderOutage { correlation_id, .. } => {
                ApplicationError::Integration(ErrorKind::ProviderOutage.user_message().to_owned())
                    .into_interface(correlation_id)
            }
            Self::WritableExecutionProvider | Self::Prompt(_) => {
                ApplicationError::Configuration(self.to_string()).into_interface(fallback)
            }
            Self::Workflow(error) => {
                InterfaceError::Internal { message: error.to_string(), correlation_id: fallback }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServiceOptions {
    pub workflow: WorkflowSettings,
    pub history_capacity: usize,
    pub context_turns: usize,
    pub max_raw_data_items: usize,
    pub max_sessions: usize,
}

impl ServiceOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            workflow: WorkflowSettings::from_config(config),
            history_capacity: config.workflow.history_capacity,
            context_turns: config.workflow.context_turns,
            max_raw_data_items: config.workflow.max_raw_data_items,
            max_sessions: config.workflow.max_sessions,
        }
    }
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Entry point for the presentation layer. Built once at startup and shared behind an `Arc`.
pub struct AnalystService {
    runtime: AgentRuntime,
    conversations: ConversationStore,
    responses: ResponseService,
    audit: Arc<dyn AuditSink>,
    context_turns: usize,
}

impl AnalystService {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        executor: Arc<dyn ExecutionProvider>,
        audit: Arc<dyn AuditSink>,
        options: ServiceOptions,
    ) -> Result<Self, AnalystError> {
        if executor.access_mode() != AccessMode::ReadOnly {
            return Err(AnalystError::WritableExecutionProvider);
        }

        let prompts = PromptBuilder::new()?;
        audit.emit(
            AuditEvent::new(
                None,
                "startup",
                "system.analyst_ready",
                AuditCategory::System,
                "analyst_service",
                AuditOutcome::Success,
            )
            .with_metadata("max_attempts", options.workflow.max_attempts.to_string())
            .with_metadata("max_sessions", options.max_sessions.to_string()),
        );
        Ok(Self {
            runtime: AgentRuntime::new(llm, executor, prompts, audit.clone(), options.workflow),
            conversations: ConversationStore::new(options.history_capacity, options.max_sessions),
            responses: ResponseService::new(options.max_raw_data_items),
            audit,
            context_turns: options.context_turns,
        })
    }

    /// Answers one question. Expected failures come back as error responses; only a
    /// provider outage is returned as `Err`.
    pub async fn ask(&self, question: &str, session_id: &str) -> Result<AnalystResponse, AnalystError> {
        let correlation_id = Uuid::new_v4().to_string();

        let question = match Question::new(question, session_id) {
            Ok(question) => question,
            Err(error) => {
                info!(
                    event_name = "analyst.question_rejected",
                    correlation_id = %correlation_id,
                    reason = %error,
                    "question rejected before the workflow"
                );
                return Ok(AnalystResponse::failure(ErrorKind::InvalidQuestion));
            }
        };
        let session_id = question.session_id();

        let Some(guard) = self.conversations.try_begin(session_id) else {
            info!(
                event_name = "analyst.session_busy",
                correlation_id = %correlation_id,
                session_id = %session_id,
                "turn already in flight for session"
            );
            return Ok(AnalystResponse::failure(ErrorKind::SessionBusy));
        };

        self.audit.emit(
            AuditEvent::new(
                Some(session_id.to_string()),
                correlation_id.clone(),
                "analyst.question_received",
                AuditCategory::Ingress,
                "analyst_service",
                AuditOutcome::Success,
            )
            .with_metadata("question_chars", question.text().chars().count().to_string()),
        );

        let history = self.conversations.recent(session_id, self.context_turns);
        let request = TurnRequest {
            question: question.text(),
            session_id,
            correlation_id: &correlation_id,
            history: &history,
            follow_up: is_follow_up(question.text()),
        };
        let outcome = self.runtime.run_turn(&request).await?;

        match ConversationTurn::finalize(self.responses.turn_record(question.text(), &outcome)) {
            Ok(turn) => guard.commit(turn),
            Err(error) => warn!(
                event_name = "analyst.turn_invalid",
                correlation_id = %correlation_id,
                error = %error,
                "finished turn violated its invariants"
            ),
        }

        let response = self.responses.respond(&outcome);
        info!(
            event_name = "analyst.turn_completed",
            correlation_id = %correlation_id,
            session_id = %session_id,
            status = ?response.status,
            error_kind = response.error_kind.map(|kind| kind.as_str()),
            degraded = response.degraded,
            "turn completed"
        );

        match outcome {
            TurnOutcome::Aborted { detail } => Err(AnalystError::ProviderOutage { detail, correlation_id }),
            _ => Ok(response),
        }
    }

    /// Standalone check with the same rules the workflow applies.
    pub fn check_sql(&self, sql: &str) -> ValidationResult {
        guardrails::validate(sql)
    }

    pub fn history(&self, session_id: &str) -> Vec<ConversationTurn> {
        match SessionId::parse(session_id) {
            Ok(session_id) => self.conversations.history(&session_id),
            Err(_) => Vec::new(),
        }
    }
}
