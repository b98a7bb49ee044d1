use crate::commands::CommandResult;
use stayql_agent::guardrails;

/// Exit code 1 means the statement would be refused by the workflow.
pub fn run(sql: &str) -> CommandResult {
    let result = guardrails::validate(sql);
    if result.is_safe() {
        return CommandResult::success("validate", "statement is a single read-only SELECT");
    }

    let rule = result.matched_rule().unwrap_or("unknown");
    let reason = result.reason().unwrap_or("statement rejected");
    CommandResult::failure("validate", "unsafe_sql", format!("{reason} (rule: {rule})"), 1)
}
