use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub dataset: DatasetConfig,
    pub llm: LlmConfig,
    pub workflow: WorkflowConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatasetConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    /// Model used to phrase answers.
    pub model: String,
    /// Model used for SQL generation; falls back to `model` when unset.
    pub sql_model: Option<String>,
    pub temperature: f32,
    pub sql_temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    pub max_attempts: u32,
    pub row_limit: u32,
    pub execution_timeout_secs: u64,
    pub history_capacity: usize,
    pub context_turns: usize,
    pub max_raw_data_items: usize,
    pub max_sessions: usize,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(alias = "openai")]
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub dataset_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_base_url: Option<String>,
    pub max_attempts: Option<u32>,
    pub row_limit: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            dataset: DatasetConfig {
                url: "sqlite://stayql.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434/v1".to_string()),
                model: "llama3.1".to_string(),
                sql_model: None,
                temperature: 0.3,
                sql_temperature: 0.0,
                timeout_secs: 30,
            },
            workflow: WorkflowConfig {
                max_attempts: 3,
                row_limit: 500,
                execution_timeout_secs: 15,
                history_capacity: 10,
                context_turns: 4,
                max_raw_data_items: 10,
                max_sessions: 1_000,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl LlmConfig {
    pub fn sql_model(&self) -> &str {
        self.sql_model.as_deref().unwrap_or(&self.model)
    }

    pub fn resolved_base_url(&self) -> &str {
        match (&self.base_url, self.provider) {
            (Some(url), _) => url.trim_end_matches('/'),
            (None, LlmProvider::OpenAi) => "https://api.openai.com/v1",
            (None, LlmProvider::Ollama) => "http://localhost:11434/v1",
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("stayql.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(dataset) = patch.dataset {
            if let Some(url) = dataset.url {
                self.dataset.url = url;
            }
            if let Some(max_connections) = dataset.max_connections {
                self.dataset.max_connections = max_connections;
            }
            if let Some(timeout_secs) = dataset.timeout_secs {
                self.dataset.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(sql_model) = llm.sql_model {
                self.llm.sql_model = Some(sql_model);
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(sql_temperature) = llm.sql_temperature {
                self.llm.sql_temperature = sql_temperature;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(max_attempts) = workflow.max_attempts {
                self.workflow.max_attempts = max_attempts;
            }
            if let Some(row_limit) = workflow.row_limit {
                self.workflow.row_limit = row_limit;
            }
            if let Some(execution_timeout_secs) = workflow.execution_timeout_secs {
                self.workflow.execution_timeout_secs = execution_timeout_secs;
            }
            if let Some(history_capacity) = workflow.history_capacity {
                self.workflow.history_capacity = history_capacity;
            }
            if let Some(context_turns) = workflow.context_turns {
                self.workflow.context_turns = context_turns;
            }
            if let Some(max_raw_data_items) = workflow.max_raw_data_items {
                self.workflow.max_raw_data_items = max_raw_data_items;
            }
            if let Some(max_sessions) = workflow.max_sessions {
                self.workflow.max_sessions = max_sessions;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("STAYQL_DATASET_URL") {
            self.dataset.url = value;
        }
        if let Some(value) = read_env("STAYQL_DATASET_MAX_CONNECTIONS") {
            self.dataset.max_connections = parse_u32("STAYQL_DATASET_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("STAYQL_DATASET_TIMEOUT_SECS") {
            self.dataset.timeout_secs = parse_u64("STAYQL_DATASET_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("STAYQL_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("STAYQL_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("STAYQL_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("STAYQL_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("STAYQL_LLM_SQL_MODEL") {
            self.llm.sql_model = Some(value);
        }
        if let Some(value) = read_env("STAYQL_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("STAYQL_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("STAYQL_LLM_SQL_TEMPERATURE") {
            self.llm.sql_temperature = parse_f32("STAYQL_LLM_SQL_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("STAYQL_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("STAYQL_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("STAYQL_WORKFLOW_MAX_ATTEMPTS") {
            self.workflow.max_attempts = parse_u32("STAYQL_WORKFLOW_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("STAYQL_WORKFLOW_ROW_LIMIT") {
            self.workflow.row_limit = parse_u32("STAYQL_WORKFLOW_ROW_LIMIT", &value)?;
        }
        if let Some(value) = read_env("STAYQL_WORKFLOW_EXECUTION_TIMEOUT_SECS") {
            self.workflow.execution_timeout_secs =
                parse_u64("STAYQL_WORKFLOW_EXECUTION_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("STAYQL_WORKFLOW_HISTORY_CAPACITY") {
            self.workflow.history_capacity =
                parse_usize("STAYQL_WORKFLOW_HISTORY_CAPACITY", &value)?;
        }
        if let Some(value) = read_env("STAYQL_WORKFLOW_CONTEXT_TURNS") {
            self.workflow.context_turns = parse_usize("STAYQL_WORKFLOW_CONTEXT_TURNS", &value)?;
        }
        if let Some(value) = read_env("STAYQL_WORKFLOW_MAX_RAW_DATA_ITEMS") {
            self.workflow.max_raw_data_items =
                parse_usize("STAYQL_WORKFLOW_MAX_RAW_DATA_ITEMS", &value)?;
        }
        if let Some(value) = read_env("STAYQL_WORKFLOW_MAX_SESSIONS") {
            self.workflow.max_sessions = parse_usize("STAYQL_WORKFLOW_MAX_SESSIONS", &value)?;
        }

        if let Some(value) = read_env("STAYQL_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("STAYQL_SERVER_PORT") {
            self.server.port = parse_u16("STAYQL_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("STAYQL_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("STAYQL_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("STAYQL_LOGGING_LEVEL").or_else(|| read_env("STAYQL_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("STAYQL_LOGGING_FORMAT").or_else(|| read_env("STAYQL_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(dataset_url) = overrides.dataset_url {
            self.dataset.url = dataset_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = Some(llm_base_url);
        }
        if let Some(max_attempts) = overrides.max_attempts {
            self.workflow.max_attempts = max_attempts;
        }
        if let Some(row_limit) = overrides.row_limit {
            self.workflow.row_limit = row_limit;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_dataset(&self.dataset)?;
        validate_llm(&self.llm)?;
        validate_workflow(&self.workflow)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("stayql.toml"), PathBuf::from("config/stayql.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_dataset(dataset: &DatasetConfig) -> Result<(), ConfigError> {
    let url = dataset.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "dataset.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if dataset.max_connections == 0 {
        return Err(ConfigError::Validation(
            "dataset.max_connections must be greater than zero".to_string(),
        ));
    }

    if dataset.timeout_secs == 0 || dataset.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "dataset.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    for (key, value) in [("llm.temperature", llm.temperature), ("llm.sql_temperature", llm.sql_temperature)]
    {
        if !(0.0..=2.0).contains(&value) {
            return Err(ConfigError::Validation(format!("{key} must be in range 0.0..=2.0")));
        }
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider (set STAYQL_LLM_API_KEY)"
                        .to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for the ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_workflow(workflow: &WorkflowConfig) -> Result<(), ConfigError> {
    if !(1..=5).contains(&workflow.max_attempts) {
        return Err(ConfigError::Validation(
            "workflow.max_attempts must be in range 1..=5".to_string(),
        ));
    }

    if !(1..=10_000).contains(&workflow.row_limit) {
        return Err(ConfigError::Validation(
            "workflow.row_limit must be in range 1..=10000".to_string(),
        ));
    }

    if workflow.execution_timeout_secs == 0 || workflow.execution_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "workflow.execution_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if workflow.history_capacity == 0 {
        return Err(ConfigError::Validation(
            "workflow.history_capacity must be greater than zero".to_string(),
        ));
    }

    if workflow.context_turns > workflow.history_capacity {
        return Err(ConfigError::Validation(
            "workflow.context_turns must not exceed workflow.history_capacity".to_string(),
        ));
    }

    if workflow.max_sessions == 0 {
        return Err(ConfigError::Validation(
            "workflow.max_sessions must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    dataset: Option<DatasetPatch>,
    llm: Option<LlmPatch>,
    workflow: Option<WorkflowPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatasetPatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    sql_model: Option<String>,
    temperature: Option<f32>,
    sql_temperature: Option<f32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    max_attempts: Option<u32>,
    row_limit: Option<u32>,
    execution_timeout_secs: Option<u64>,
    history_capacity: Option<usize>,
    context_turns: Option<usize>,
    max_raw_data_items: Option<usize>,
    max_sessions: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid_without_any_file_or_env() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.workflow.max_attempts == 3, "default attempt budget is three")?;
        ensure(config.workflow.row_limit == 500, "default row limit is 500")?;
        ensure(config.workflow.max_raw_data_items == 10, "default preview size is 10")?;
        ensure(config.workflow.max_sessions == 1_000, "default session bound is 1000")?;
        ensure(config.llm.sql_model() == "llama3.1", "sql model falls back to model")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_STAYQL_OPENAI_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("stayql.toml");
            fs::write(
                &path,
                r#"
[llm]
provider = "openai"
api_key = "${TEST_STAYQL_OPENAI_KEY}"
model = "gpt-4"
sql_model = "gpt-4.1-mini"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.llm.provider == LlmProvider::OpenAi, "provider should come from file")?;
            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "sk-from-env")
                    == Some(true),
                "api key should be interpolated from environment",
            )?;
            ensure(config.llm.sql_model() == "gpt-4.1-mini", "sql model should be read")?;
            ensure(
                config.llm.resolved_base_url() == "http://localhost:11434/v1",
                "default base url stays when the file does not override it",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_STAYQL_OPENAI_KEY"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("STAYQL_DATASET_URL", "sqlite://from-env.db");
        env::set_var("STAYQL_WORKFLOW_ROW_LIMIT", "250");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("stayql.toml");
            fs::write(
                &path,
                r#"
[dataset]
url = "sqlite://from-file.db"

[workflow]
row_limit = 100
max_attempts = 2

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    dataset_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.dataset.url == "sqlite://from-override.db",
                "override dataset url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.workflow.row_limit == 250, "env row limit should win over file")?;
            ensure(config.workflow.max_attempts == 2, "file attempt budget should win over default")?;
            Ok(())
        })();

        clear_vars(&["STAYQL_DATASET_URL", "STAYQL_WORKFLOW_ROW_LIMIT"]);
        result
    }

    #[test]
    fn attempt_budget_outside_range_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let error = match AppConfig::load(LoadOptions {
            overrides: ConfigOverrides { max_attempts: Some(9), ..ConfigOverrides::default() },
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected validation failure but config load succeeded".to_string()),
            Err(error) => error,
        };

        ensure(
            matches!(error, ConfigError::Validation(ref message) if message.contains("workflow.max_attempts")),
            "validation failure should mention workflow.max_attempts",
        )
    }

    #[test]
    fn session_bound_comes_from_env_and_must_be_positive() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("STAYQL_WORKFLOW_MAX_SESSIONS", "25");
        let loaded = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))
            .and_then(|config| {
                ensure(config.workflow.max_sessions == 25, "env session bound should apply")
            });

        env::set_var("STAYQL_WORKFLOW_MAX_SESSIONS", "0");
        let rejected = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::Validation(message)) => ensure(
                message.contains("workflow.max_sessions"),
                "validation failure should mention workflow.max_sessions",
            ),
            _ => Err("expected a zero session bound to be rejected".to_string()),
        };

        clear_vars(&["STAYQL_WORKFLOW_MAX_SESSIONS"]);
        loaded.and(rejected)
    }

    #[test]
    fn openai_provider_requires_api_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("STAYQL_LLM_PROVIDER", "openai");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            ensure(
                matches!(error, ConfigError::Validation(ref message) if message.contains("llm.api_key")),
                "validation failure should mention llm.api_key",
            )
        })();

        clear_vars(&["STAYQL_LLM_PROVIDER"]);
        result
    }

    #[test]
    fn malformed_env_number_is_reported_with_its_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("STAYQL_WORKFLOW_MAX_ATTEMPTS", "three");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => ensure(
                key == "STAYQL_WORKFLOW_MAX_ATTEMPTS",
                "error should name the offending variable",
            ),
            _ => Err("expected an invalid env override error".to_string()),
        };

        clear_vars(&["STAYQL_WORKFLOW_MAX_ATTEMPTS"]);
        result
    }

    #[test]
    fn api_key_is_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("STAYQL_LLM_API_KEY", "sk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")
        })();

        clear_vars(&["STAYQL_LLM_API_KEY"]);
        result
    }
}
