//! Natural-language analytics over the reservations and reviews dataset.
//!
//! [`service::AnalystService`] is the entry point. A turn flows through
//! `prompts` → `llm` → `extraction` → `guardrails` → the execution provider → `response`,
//! driven by the transition table in `stayql_core::flows` (see `runtime`).
//!
//! The model only proposes SQL. Whether a statement runs is decided by the validator in
//! `guardrails`, which is applied after generation and again before execution.

pub mod conversation;
pub mod extraction;
pub mod guardrails;
pub mod llm;
pub mod prompts;
pub mod response;
pub mod runtime;
pub mod service;

pub use llm::{GenerationOptions, GenerationPurpose, LlmProvider, OpenAiCompatibleClient, ProviderError};
pub use service::{AnalystError, AnalystService, ServiceOptions};
