use std::sync::Arc;

use crate::commands::{block_on, escape_json, load_config, CommandResult};
use stayql_agent::{AnalystError, AnalystService, OpenAiCompatibleClient, ServiceOptions};
use stayql_core::audit::TracingAuditSink;
use stayql_core::domain::response::AnalystResponse;
use stayql_db::SqliteExecutionProvider;

/// Prints the response JSON. Exit code 1 marks an error response; outages and setup
/// problems use the shared failure payload.
pub fn run(question: &str, session_id: &str) -> CommandResult {
    let config = match load_config("ask") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let result = block_on("ask", async {
        let provider = SqliteExecutionProvider::connect(&config.dataset)
            .await
            .map_err(|error| ("dataset_connectivity", error.to_string(), 4u8))?;
        let llm = OpenAiCompatibleClient::from_config(&config.llm)
            .map_err(|error| ("llm_client", error.to_string(), 5u8))?;
        let analyst = AnalystService::new(
            Arc::new(llm),
            Arc::new(provider),
            Arc::new(TracingAuditSink),
            ServiceOptions::from_config(&config),
        )
        .map_err(|error| ("analyst_setup", error.to_string(), 6u8))?;

        analyst.ask(question, session_id).await.map_err(|error| {
            let (error_class, exit_code) = match &error {
                AnalystError::ProviderOutage { .. } => ("provider_outage", 7u8),
                _ => ("analyst_failure", 6u8),
            };
            let interface = error.into_interface("cli");
            let message = format!(
                "{} (correlation_id: {})",
                interface.user_message(),
                interface.correlation_id()
            );
            (error_class, message, exit_code)
        })
    });

    match result {
        Ok(Ok(response)) => render(&response),
        Ok(Err((error_class, message, exit_code))) => {
            CommandResult::failure("ask", error_class, message, exit_code)
        }
        Err(failure) => failure,
    }
}

fn render(response: &AnalystResponse) -> CommandResult {
    let exit_code = if response.is_success() { 0 } else { 1 };
    let output = serde_json::to_string_pretty(response).unwrap_or_else(|error| {
        format!(
            "{{\"status\":\"error\",\"text_answer\":\"response serialization failed: {}\"}}",
            escape_json(&error.to_string())
        )
    });
    CommandResult { exit_code, output }
}
