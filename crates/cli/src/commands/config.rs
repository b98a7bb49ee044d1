use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use stayql_core::config::{AppConfig, LoadOptions};
use toml::Value;

struct Field {
    key_path: &'static str,
    env_key: &'static str,
    value: String,
}

impl Field {
    fn new(key_path: &'static str, env_key: &'static str, value: impl ToString) -> Self {
        Self { key_path, env_key, value: value.to_string() }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key_path,
            field.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key_path, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let llm_api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };

    vec![
        Field::new("dataset.url", "STAYQL_DATASET_URL", &config.dataset.url),
        Field::new(
            "dataset.max_connections",
            "STAYQL_DATASET_MAX_CONNECTIONS",
            config.dataset.max_connections,
        ),
        Field::new("dataset.timeout_secs", "STAYQL_DATASET_TIMEOUT_SECS", config.dataset.timeout_secs),
        Field::new("llm.provider", "STAYQL_LLM_PROVIDER", format!("{:?}", config.llm.provider)),
        Field::new("llm.base_url", "STAYQL_LLM_BASE_URL", config.llm.resolved_base_url()),
        Field::new("llm.api_key", "STAYQL_LLM_API_KEY", llm_api_key),
        Field::new("llm.model", "STAYQL_LLM_MODEL", &config.llm.model),
        Field::new("llm.sql_model", "STAYQL_LLM_SQL_MODEL", config.llm.sql_model()),
        Field::new("llm.temperature", "STAYQL_LLM_TEMPERATURE", config.llm.temperature),
        Field::new("llm.sql_temperature", "STAYQL_LLM_SQL_TEMPERATURE", config.llm.sql_temperature),
        Field::new("llm.timeout_secs", "STAYQL_LLM_TIMEOUT_SECS", config.llm.timeout_secs),
        Field::new(
            "workflow.max_attempts",
            "STAYQL_WORKFLOW_MAX_ATTEMPTS",
            config.workflow.max_attempts,
        ),
        Field::new("workflow.row_limit", "STAYQL_WORKFLOW_ROW_LIMIT", config.workflow.row_limit),
        Field::new(
            "workflow.execution_timeout_secs",
            "STAYQL_WORKFLOW_EXECUTION_TIMEOUT_SECS",
            config.workflow.execution_timeout_secs,
        ),
        Field::new(
            "workflow.history_capacity",
            "STAYQL_WORKFLOW_HISTORY_CAPACITY",
            config.workflow.history_capacity,
        ),
        Field::new(
            "workflow.context_turns",
            "STAYQL_WORKFLOW_CONTEXT_TURNS",
            config.workflow.context_turns,
        ),
        Field::new(
            "workflow.max_raw_data_items",
            "STAYQL_WORKFLOW_MAX_RAW_DATA_ITEMS",
            config.workflow.max_raw_data_items,
        ),
        Field::new(
            "workflow.max_sessions",
            "STAYQL_WORKFLOW_MAX_SESSIONS",
            config.workflow.max_sessions,
        ),
        Field::new("server.bind_address", "STAYQL_SERVER_BIND_ADDRESS", &config.server.bind_address),
        Field::new("server.port", "STAYQL_SERVER_PORT", config.server.port),
        Field::new(
            "server.graceful_shutdown_secs",
            "STAYQL_SERVER_GRACEFUL_SHUTDOWN_SECS",
            config.server.graceful_shutdown_secs,
        ),
        Field::new("logging.level", "STAYQL_LOGGING_LEVEL", &config.logging.level),
        Field::new("logging.format", "STAYQL_LOGGING_FORMAT", format!("{:?}", config.logging.format)),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("stayql.toml"), PathBuf::from("config/stayql.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
