use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub agent: AgentConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub checkpoint_url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Hosted chat model. `timeout_secs == 0` disables the request timeout.
#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_key: Option<SecretString>,
    pub endpoint: String,
    pub model: String,
    pub deployment: String,
    pub api_version: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct SearchConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub max_results: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub checkpoints: CheckpointMode,
    pub max_steps: u32,
    pub system_prompt: Option<String>,
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
pub enum CheckpointMode {
    Durable,
    Memory,
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
    pub database_url: Option<String>,
    pub checkpoint_database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_endpoint: Option<String>,
    pub search_api_key: Option<String>,
    pub search_base_url: Option<String>,
    pub checkpoint_mode: Option<CheckpointMode>,
    pub agent_max_steps: Option<u32>,
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
            database: DatabaseConfig {
                url: "sqlite://data/app.db?mode=rwc".to_string(),
                checkpoint_url: "sqlite://data/checkpoints.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                api_key: None,
                endpoint: "https://foundy7za5.cognitiveservices.azure.com/".to_string(),
                model: "gpt-4o".to_string(),
                deployment: "gpt-4o".to_string(),
                api_version: "2024-12-01-preview".to_string(),
                temperature: 0.0,
                timeout_secs: 0,
                max_retries: 2,
            },
            search: SearchConfig {
                api_key: None,
                base_url: "https://api.tavily.com".to_string(),
                max_results: 2,
                timeout_secs: 30,
            },
            agent: AgentConfig {
                checkpoints: CheckpointMode::Durable,
                max_steps: 25,
                system_prompt: None,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8000,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for CheckpointMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "durable" | "sqlite" => Ok(Self::Durable),
            "memory" | "in_memory" => Ok(Self::Memory),
            other => Err(ConfigError::Validation(format!(
                "unsupported checkpoint mode `{other}` (expected durable|memory)"
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
    /// Full chat-completions URL for the configured deployment.
    pub fn chat_completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint.trim_end_matches('/'),
            self.deployment,
            self.api_version
        )
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("wkdesk.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(checkpoint_url) = database.checkpoint_url {
                self.database.checkpoint_url = checkpoint_url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(api_key.into());
            }
            if let Some(endpoint) = llm.endpoint {
                self.llm.endpoint = endpoint;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(deployment) = llm.deployment {
                self.llm.deployment = deployment;
            }
            if let Some(api_version) = llm.api_version {
                self.llm.api_version = api_version;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(search) = patch.search {
            if let Some(api_key) = search.api_key {
                self.search.api_key = Some(api_key.into());
            }
            if let Some(base_url) = search.base_url {
                self.search.base_url = base_url;
            }
            if let Some(max_results) = search.max_results {
                self.search.max_results = max_results;
            }
            if let Some(timeout_secs) = search.timeout_secs {
                self.search.timeout_secs = timeout_secs;
            }
        }

        if let Some(agent) = patch.agent {
            if let Some(checkpoints) = agent.checkpoints {
                self.agent.checkpoints = checkpoints;
            }
            if let Some(max_steps) = agent.max_steps {
                self.agent.max_steps = max_steps;
            }
            if let Some(system_prompt) = agent.system_prompt {
                self.agent.system_prompt = Some(system_prompt);
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
        if let Some(value) = read_env("WKDESK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("WKDESK_CHECKPOINT_DATABASE_URL") {
            self.database.checkpoint_url = value;
        }
        if let Some(value) = read_env("WKDESK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("WKDESK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("WKDESK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("WKDESK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        // AZURE_KEY / TAVILY_API_KEY are the names used by existing deployments.
        if let Some(value) = read_env("WKDESK_LLM_API_KEY").or_else(|| read_env("AZURE_KEY")) {
            self.llm.api_key = Some(value.into());
        }
        if let Some(value) = read_env("WKDESK_LLM_ENDPOINT") {
            self.llm.endpoint = value;
        }
        if let Some(value) = read_env("WKDESK_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("WKDESK_LLM_DEPLOYMENT") {
            self.llm.deployment = value;
        }
        if let Some(value) = read_env("WKDESK_LLM_API_VERSION") {
            self.llm.api_version = value;
        }
        if let Some(value) = read_env("WKDESK_LLM_TEMPERATURE") {
            self.llm.temperature = parse_env("WKDESK_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("WKDESK_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_env("WKDESK_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("WKDESK_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_env("WKDESK_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("WKDESK_SEARCH_API_KEY").or_else(|| read_env("TAVILY_API_KEY"))
        {
            self.search.api_key = Some(value.into());
        }
        if let Some(value) = read_env("WKDESK_SEARCH_BASE_URL") {
            self.search.base_url = value;
        }
        if let Some(value) = read_env("WKDESK_SEARCH_MAX_RESULTS") {
            self.search.max_results = parse_env("WKDESK_SEARCH_MAX_RESULTS", &value)?;
        }
        if let Some(value) = read_env("WKDESK_SEARCH_TIMEOUT_SECS") {
            self.search.timeout_secs = parse_env("WKDESK_SEARCH_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("WKDESK_AGENT_CHECKPOINTS") {
            self.agent.checkpoints = value.parse()?;
        }
        if let Some(value) = read_env("WKDESK_AGENT_MAX_STEPS") {
            self.agent.max_steps = parse_env("WKDESK_AGENT_MAX_STEPS", &value)?;
        }
        if let Some(value) = read_env("WKDESK_AGENT_SYSTEM_PROMPT") {
            self.agent.system_prompt = Some(value);
        }

        if let Some(value) = read_env("WKDESK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("WKDESK_SERVER_PORT") {
            self.server.port = parse_env("WKDESK_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("WKDESK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("WKDESK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("WKDESK_LOGGING_LEVEL").or_else(|| read_env("WKDESK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("WKDESK_LOGGING_FORMAT").or_else(|| read_env("WKDESK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(checkpoint_database_url) = overrides.checkpoint_database_url {
            self.database.checkpoint_url = checkpoint_database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(llm_api_key.into());
        }
        if let Some(llm_endpoint) = overrides.llm_endpoint {
            self.llm.endpoint = llm_endpoint;
        }
        if let Some(search_api_key) = overrides.search_api_key {
            self.search.api_key = Some(search_api_key.into());
        }
        if let Some(search_base_url) = overrides.search_base_url {
            self.search.base_url = search_base_url;
        }
        if let Some(checkpoint_mode) = overrides.checkpoint_mode {
            self.agent.checkpoints = checkpoint_mode;
        }
        if let Some(max_steps) = overrides.agent_max_steps {
            self.agent.max_steps = max_steps;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_search(&self.search)?;
        validate_agent(&self.agent)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("wkdesk.toml"), PathBuf::from("config/wkdesk.toml")]
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

/// Expands `${VAR}` references against the process environment.
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let end = after_open.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let var = &after_open[..end];
        let value = env::var(var)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: var.to_string() })?;
        output.push_str(&value);
        rest = &after_open[end + 1..];
    }
    output.push_str(rest);

    Ok(output)
}

fn is_sqlite_url(url: &str) -> bool {
    let url = url.trim();
    url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:"
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn secret_missing(secret: Option<&SecretString>) -> bool {
    secret.map(|value| value.expose_secret().trim().is_empty()).unwrap_or(true)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    if !is_sqlite_url(&database.url) {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }
    if !is_sqlite_url(&database.checkpoint_url) {
        return Err(ConfigError::Validation(
            "database.checkpoint_url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if secret_missing(llm.api_key.as_ref()) {
        return Err(ConfigError::Validation(
            "llm.api_key is required (set WKDESK_LLM_API_KEY or AZURE_KEY)".to_string(),
        ));
    }
    if !is_http_url(&llm.endpoint) {
        return Err(ConfigError::Validation(
            "llm.endpoint must start with http:// or https://".to_string(),
        ));
    }
    if llm.deployment.trim().is_empty() || llm.api_version.trim().is_empty() {
        return Err(ConfigError::Validation(
            "llm.deployment and llm.api_version must not be empty".to_string(),
        ));
    }
    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }
    if llm.timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 0..=600 (0 disables the timeout)".to_string(),
        ));
    }
    if llm.max_retries > 10 {
        return Err(ConfigError::Validation("llm.max_retries must be at most 10".to_string()));
    }

    Ok(())
}

fn validate_search(search: &SearchConfig) -> Result<(), ConfigError> {
    if secret_missing(search.api_key.as_ref()) {
        return Err(ConfigError::Validation(
            "search.api_key is required (set WKDESK_SEARCH_API_KEY or TAVILY_API_KEY)".to_string(),
        ));
    }
    if !is_http_url(&search.base_url) {
        return Err(ConfigError::Validation(
            "search.base_url must start with http:// or https://".to_string(),
        ));
    }
    if search.max_results == 0 || search.max_results > 20 {
        return Err(ConfigError::Validation(
            "search.max_results must be in range 1..=20".to_string(),
        ));
    }
    if search.timeout_secs == 0 || search.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "search.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if agent.max_steps == 0 || agent.max_steps > 100 {
        return Err(ConfigError::Validation(
            "agent.max_steps must be in range 1..=100".to_string(),
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

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    search: Option<SearchPatch>,
    agent: Option<AgentPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    checkpoint_url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    api_key: Option<String>,
    endpoint: Option<String>,
    model: Option<String>,
    deployment: Option<String>,
    api_version: Option<String>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    max_results: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    checkpoints: Option<CheckpointMode>,
    max_steps: Option<u32>,
    system_prompt: Option<String>,
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

    use super::{AppConfig, CheckpointMode, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const CREDENTIAL_VARS: &[&str] =
        &["WKDESK_LLM_API_KEY", "AZURE_KEY", "WKDESK_SEARCH_API_KEY", "TAVILY_API_KEY"];

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
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(CREDENTIAL_VARS);

        env::set_var("TEST_WKDESK_AZURE", "azure-from-env");
        env::set_var("TEST_WKDESK_TAVILY", "tvly-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("wkdesk.toml");
            fs::write(
                &path,
                r#"
[llm]
api_key = "${TEST_WKDESK_AZURE}"
deployment = "gpt-4o-mini"

[search]
api_key = "${TEST_WKDESK_TAVILY}"
max_results = 5
timeout_secs = 12
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret().to_string())
                    == Some("azure-from-env".to_string()),
                "llm api key should be interpolated from environment",
            )?;
            ensure(config.llm.deployment == "gpt-4o-mini", "deployment should come from file")?;
            ensure(config.search.max_results == 5, "max_results should come from file")?;
            ensure(config.search.timeout_secs == 12, "search timeout should come from file")?;
            Ok(())
        })();

        clear_vars(&["TEST_WKDESK_AZURE", "TEST_WKDESK_TAVILY"]);
        result
    }

    #[test]
    fn legacy_credential_variables_are_honoured() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(CREDENTIAL_VARS);

        env::set_var("AZURE_KEY", "azure-legacy");
        env::set_var("TAVILY_API_KEY", "tvly-legacy");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "azure-legacy")
                    == Some(true),
                "AZURE_KEY should populate llm.api_key",
            )?;
            ensure(
                config.search.api_key.as_ref().map(|key| key.expose_secret() == "tvly-legacy")
                    == Some(true),
                "TAVILY_API_KEY should populate search.api_key",
            )?;
            Ok(())
        })();

        clear_vars(CREDENTIAL_VARS);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(CREDENTIAL_VARS);

        env::set_var("WKDESK_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("WKDESK_LLM_API_KEY", "azure-from-env");
        env::set_var("WKDESK_SEARCH_API_KEY", "tvly-from-env");
        env::set_var("WKDESK_AGENT_CHECKPOINTS", "memory");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("wkdesk.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[llm]
api_key = "azure-from-file"

[agent]
max_steps = 8

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "azure-from-env")
                    == Some(true),
                "env api key should win over file",
            )?;
            ensure(config.agent.max_steps == 8, "file max_steps should win over default")?;
            ensure(
                config.agent.checkpoints == CheckpointMode::Memory,
                "env checkpoint mode should win over default",
            )?;
            Ok(())
        })();

        clear_vars(&["WKDESK_DATABASE_URL", "WKDESK_AGENT_CHECKPOINTS"]);
        clear_vars(CREDENTIAL_VARS);
        result
    }

    #[test]
    fn missing_model_credential_fails_validation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(CREDENTIAL_VARS);

        let error = match AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                search_api_key: Some("tvly-test".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected validation failure but config load succeeded".to_string()),
            Err(error) => error,
        };

        let has_message = matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("llm.api_key")
        );
        ensure(has_message, "validation failure should mention llm.api_key")
    }

    #[test]
    fn missing_search_credential_fails_validation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(CREDENTIAL_VARS);

        let error = match AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                llm_api_key: Some("azure-test".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected validation failure but config load succeeded".to_string()),
            Err(error) => error,
        };

        let has_message = matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("search.api_key")
        );
        ensure(has_message, "validation failure should mention search.api_key")
    }

    #[test]
    fn invalid_numeric_env_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(CREDENTIAL_VARS);
        env::set_var("WKDESK_AGENT_MAX_STEPS", "many");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => {
                ensure(key == "WKDESK_AGENT_MAX_STEPS", "error should name the offending key")
            }
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected invalid override error".to_string()),
        };

        clear_vars(&["WKDESK_AGENT_MAX_STEPS"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(CREDENTIAL_VARS);

        env::set_var("WKDESK_LLM_API_KEY", "azure-secret-value");
        env::set_var("WKDESK_SEARCH_API_KEY", "tvly-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("azure-secret-value"), "debug output should not contain llm key")?;
            ensure(
                !debug.contains("tvly-secret-value"),
                "debug output should not contain search key",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(CREDENTIAL_VARS);
        result
    }

    #[test]
    fn chat_completions_url_joins_endpoint_and_deployment() {
        let mut config = AppConfig::default();
        config.llm.endpoint = "https://example.openai.azure.com/".to_string();
        config.llm.deployment = "gpt-4o".to_string();
        config.llm.api_version = "2024-12-01-preview".to_string();

        assert_eq!(
            config.llm.chat_completions_url(),
            "https://example.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-12-01-preview"
        );
    }
}
