use serde::Serialize;
use stayql_core::config::{AppConfig, LlmProvider, LoadOptions};
use stayql_db::{DemoDataset, SqliteExecutionProvider};

use crate::commands::{block_on, escape_json, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_llm_settings(&config));
            checks.push(check_dataset(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["llm_settings", "dataset_readiness"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_llm_settings(config: &AppConfig) -> DoctorCheck {
    let key = match (config.llm.provider, config.llm.api_key.is_some()) {
        (_, true) => "api key set",
        (LlmProvider::Ollama, false) => "no api key needed",
        (LlmProvider::OpenAi, false) => "api key missing",
    };

    DoctorCheck {
        name: "llm_settings",
        status: CheckStatus::Pass,
        details: format!(
            "{:?} at {} (sql model `{}`, answer model `{}`, {key})",
            config.llm.provider,
            config.llm.resolved_base_url(),
            config.llm.sql_model(),
            config.llm.model
        ),
    }
}

/// Opens the dataset the same way the analyst does and counts the demo tables.
fn check_dataset(config: &AppConfig) -> DoctorCheck {
    let result = block_on("doctor", async {
        let provider = SqliteExecutionProvider::connect(&config.dataset)
            .await
            .map_err(|error| format!("failed to open dataset read-only: {error}"))?;
        let counts = DemoDataset::counts(provider.pool())
            .await
            .map_err(|error| format!("dataset tables are not readable: {error}"));
        provider.pool().close().await;
        counts
    });

    match result {
        Ok(Ok(counts)) => DoctorCheck {
            name: "dataset_readiness",
            status: CheckStatus::Pass,
            details: format!(
                "read-only access to `{}` ({} reservations, {} reviews)",
                config.dataset.url, counts.reservations, counts.reviews
            ),
        },
        Ok(Err(details)) => {
            DoctorCheck { name: "dataset_readiness", status: CheckStatus::Fail, details }
        }
        Err(_) => DoctorCheck {
            name: "dataset_readiness",
            status: CheckStatus::Fail,
            details: "failed to initialize async runtime".to_string(),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}
