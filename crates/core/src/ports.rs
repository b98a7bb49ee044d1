use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::execution::ExecutionResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExecutionError {
    /// The dataset rejected the statement (syntax, unknown column, type mismatch).
    #[error("query failed: {message}")]
    Query { message: String },
    #[error("query exceeded the execution timeout")]
    Timeout,
    /// The dataset itself cannot be reached.
    #[error("dataset unavailable: {message}")]
    Unavailable { message: String },
}

impl ExecutionError {
    /// Execution failures the workflow may recover from by regenerating SQL.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Query { .. } | Self::Timeout)
    }

    pub fn detail(&self) -> String {
        match self {
            Self::Query { message } | Self::Unavailable { message } => message.clone(),
            Self::Timeout => "query exceeded the execution timeout".to_owned(),
        }
    }
}

/// Read-only access to the analytical dataset.
#[async_trait]
pub trait ExecutionProvider: Send + Sync {
    async fn execute_readonly(
        &self,
        sql: &str,
        row_limit: u32,
    ) -> Result<ExecutionResult, ExecutionError>;

    fn access_mode(&self) -> AccessMode;
}
