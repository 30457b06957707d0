use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flows::DEFAULT_MAX_FILL_TURNS;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub agents: AgentsConfig,
    pub memory: MemoryConfig,
    pub flow: FlowConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

/// Default invocation policy applied to agents that do not declare their own.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentsConfig {
    pub max_retry: u32,
    pub backoff_seconds: f64,
    pub timeout_seconds: Option<f64>,
}

impl AgentsConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs_f64(self.backoff_seconds)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs_f64)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryConfig {
    pub enabled: bool,
    pub enable_summary: bool,
    pub summarize_threshold: usize,
    pub keep_recent_turns: usize,
    pub max_raw_turns: usize,
    pub summary_model: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowConfig {
    pub max_fill_turns: u32,
    pub completed_history: usize,
    pub context_turns: usize,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Ollama,
    Offline,
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
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub agent_max_retry: Option<u32>,
    pub memory_enable_summary: Option<bool>,
    pub max_fill_turns: Option<u32>,
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
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 30,
                max_retries: 2,
            },
            agents: AgentsConfig { max_retry: 1, backoff_seconds: 1.0, timeout_seconds: None },
            memory: MemoryConfig {
                enabled: true,
                enable_summary: true,
                summarize_threshold: 6,
                keep_recent_turns: 4,
                max_raw_turns: 12,
                summary_model: None,
            },
            flow: FlowConfig {
                max_fill_turns: DEFAULT_MAX_FILL_TURNS,
                completed_history: 20,
                context_turns: 3,
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
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            "offline" => Ok(Self::Offline),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama|offline)"
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

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("remit.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
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
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(agents) = patch.agents {
            if let Some(max_retry) = agents.max_retry {
                self.agents.max_retry = max_retry;
            }
            if let Some(backoff_seconds) = agents.backoff_seconds {
                self.agents.backoff_seconds = backoff_seconds;
            }
            if let Some(timeout_seconds) = agents.timeout_seconds {
                self.agents.timeout_seconds = Some(timeout_seconds);
            }
        }

        if let Some(memory) = patch.memory {
            if let Some(enabled) = memory.enabled {
                self.memory.enabled = enabled;
            }
            if let Some(enable_summary) = memory.enable_summary {
                self.memory.enable_summary = enable_summary;
            }
            if let Some(summarize_threshold) = memory.summarize_threshold {
                self.memory.summarize_threshold = summarize_threshold;
            }
            if let Some(keep_recent_turns) = memory.keep_recent_turns {
                self.memory.keep_recent_turns = keep_recent_turns;
            }
            if let Some(max_raw_turns) = memory.max_raw_turns {
                self.memory.max_raw_turns = max_raw_turns;
            }
            if let Some(summary_model) = memory.summary_model {
                self.memory.summary_model = Some(summary_model);
            }
        }

        if let Some(flow) = patch.flow {
            if let Some(max_fill_turns) = flow.max_fill_turns {
                self.flow.max_fill_turns = max_fill_turns;
            }
            if let Some(completed_history) = flow.completed_history {
                self.flow.completed_history = completed_history;
            }
            if let Some(context_turns) = flow.context_turns {
                self.flow.context_turns = context_turns;
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
        if let Some(value) = read_env("REMIT_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("REMIT_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("REMIT_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("REMIT_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("REMIT_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("REMIT_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("REMIT_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("REMIT_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("REMIT_AGENTS_MAX_RETRY") {
            self.agents.max_retry = parse_u32("REMIT_AGENTS_MAX_RETRY", &value)?;
        }
        if let Some(value) = read_env("REMIT_AGENTS_BACKOFF_SECONDS") {
            self.agents.backoff_seconds = parse_f64("REMIT_AGENTS_BACKOFF_SECONDS", &value)?;
        }
        if let Some(value) = read_env("REMIT_AGENTS_TIMEOUT_SECONDS") {
            self.agents.timeout_seconds =
                Some(parse_f64("REMIT_AGENTS_TIMEOUT_SECONDS", &value)?);
        }

        if let Some(value) = read_env("REMIT_MEMORY_ENABLED") {
            self.memory.enabled = parse_bool("REMIT_MEMORY_ENABLED", &value)?;
        }
        if let Some(value) = read_env("REMIT_MEMORY_ENABLE_SUMMARY") {
            self.memory.enable_summary = parse_bool("REMIT_MEMORY_ENABLE_SUMMARY", &value)?;
        }
        if let Some(value) = read_env("REMIT_MEMORY_SUMMARIZE_THRESHOLD") {
            self.memory.summarize_threshold =
                parse_usize("REMIT_MEMORY_SUMMARIZE_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("REMIT_MEMORY_KEEP_RECENT_TURNS") {
            self.memory.keep_recent_turns = parse_usize("REMIT_MEMORY_KEEP_RECENT_TURNS", &value)?;
        }
        if let Some(value) = read_env("REMIT_MEMORY_MAX_RAW_TURNS") {
            self.memory.max_raw_turns = parse_usize("REMIT_MEMORY_MAX_RAW_TURNS", &value)?;
        }
        if let Some(value) = read_env("REMIT_MEMORY_SUMMARY_MODEL") {
            self.memory.summary_model = Some(value);
        }

        if let Some(value) = read_env("REMIT_FLOW_MAX_FILL_TURNS") {
            self.flow.max_fill_turns = parse_u32("REMIT_FLOW_MAX_FILL_TURNS", &value)?;
        }
        if let Some(value) = read_env("REMIT_FLOW_COMPLETED_HISTORY") {
            self.flow.completed_history = parse_usize("REMIT_FLOW_COMPLETED_HISTORY", &value)?;
        }
        if let Some(value) = read_env("REMIT_FLOW_CONTEXT_TURNS") {
            self.flow.context_turns = parse_usize("REMIT_FLOW_CONTEXT_TURNS", &value)?;
        }

        let log_level = read_env("REMIT_LOGGING_LEVEL").or_else(|| read_env("REMIT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("REMIT_LOGGING_FORMAT").or_else(|| read_env("REMIT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(max_retry) = overrides.agent_max_retry {
            self.agents.max_retry = max_retry;
        }
        if let Some(enable_summary) = overrides.memory_enable_summary {
            self.memory.enable_summary = enable_summary;
        }
        if let Some(max_fill_turns) = overrides.max_fill_turns {
            self.flow.max_fill_turns = max_fill_turns;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_agents(&self.agents)?;
        validate_memory(&self.memory)?;
        validate_flow(&self.flow)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("remit.toml"), PathBuf::from("config/remit.toml")]
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

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai/anthropic providers".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
        LlmProvider::Offline => {}
    }

    Ok(())
}

fn validate_agents(agents: &AgentsConfig) -> Result<(), ConfigError> {
    if agents.max_retry == 0 {
        return Err(ConfigError::Validation(
            "agents.max_retry must be at least 1 (it counts attempts, not retries)".to_string(),
        ));
    }

    if !agents.backoff_seconds.is_finite() || agents.backoff_seconds < 0.0 {
        return Err(ConfigError::Validation(
            "agents.backoff_seconds must be a non-negative number".to_string(),
        ));
    }

    if let Some(timeout) = agents.timeout_seconds {
        if !timeout.is_finite() || timeout <= 0.0 {
            return Err(ConfigError::Validation(
                "agents.timeout_seconds must be greater than zero when set".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_memory(memory: &MemoryConfig) -> Result<(), ConfigError> {
    if memory.summarize_threshold == 0 {
        return Err(ConfigError::Validation(
            "memory.summarize_threshold must be greater than zero".to_string(),
        ));
    }

    if memory.max_raw_turns == 0 {
        return Err(ConfigError::Validation(
            "memory.max_raw_turns must be greater than zero".to_string(),
        ));
    }

    if memory.keep_recent_turns > memory.max_raw_turns {
        return Err(ConfigError::Validation(
            "memory.keep_recent_turns must not exceed memory.max_raw_turns".to_string(),
        ));
    }

    if memory.enable_summary && memory.summarize_threshold > memory.max_raw_turns {
        return Err(ConfigError::Validation(
            "memory.summarize_threshold must not exceed memory.max_raw_turns when summaries are enabled"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_flow(flow: &FlowConfig) -> Result<(), ConfigError> {
    if flow.max_fill_turns == 0 {
        return Err(ConfigError::Validation(
            "flow.max_fill_turns must be greater than zero".to_string(),
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

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.parse::<f64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    agents: Option<AgentsPatch>,
    memory: Option<MemoryPatch>,
    flow: Option<FlowPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentsPatch {
    max_retry: Option<u32>,
    backoff_seconds: Option<f64>,
    timeout_seconds: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct MemoryPatch {
    enabled: Option<bool>,
    enable_summary: Option<bool>,
    summarize_threshold: Option<usize>,
    keep_recent_turns: Option<usize>,
    max_raw_turns: Option<usize>,
    summary_model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FlowPatch {
    max_fill_turns: Option<u32>,
    completed_history: Option<usize>,
    context_turns: Option<usize>,
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
    fn defaults_match_turn_engine_policy() -> Result<(), String> {
        let config = AppConfig::default();
        ensure(config.agents.max_retry == 1, "agents default to a single attempt")?;
        ensure(config.memory.summarize_threshold == 6, "summary threshold defaults to 6 turns")?;
        ensure(config.memory.keep_recent_turns == 4, "four recent turns are kept verbatim")?;
        ensure(config.flow.max_fill_turns == 10, "fill turn cap defaults to 10")?;
        ensure(config.validate().is_ok(), "defaults must validate")
    }

    #[test]
    fn summary_threshold_must_fit_in_raw_history() -> Result<(), String> {
        let mut config = AppConfig::default();
        config.memory.summarize_threshold = 5;
        config.memory.max_raw_turns = 3;
        config.memory.keep_recent_turns = 1;
        let rejected = matches!(
            config.validate(),
            Err(ConfigError::Validation(ref message)) if message.contains("summarize_threshold")
        );
        ensure(rejected, "threshold above max_raw_turns must be rejected")?;

        config.memory.enable_summary = false;
        ensure(config.validate().is_ok(), "threshold is irrelevant without summaries")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_REMIT_LLM_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("remit.toml");
            fs::write(
                &path,
                r#"
[llm]
provider = "openai"
api_key = "${TEST_REMIT_LLM_KEY}"
model = "gpt-4o-mini"

[agents]
max_retry = 3
backoff_seconds = 0.5
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "sk-from-env")
                    == Some(true),
                "api key should be loaded from environment",
            )?;
            ensure(config.llm.provider == LlmProvider::OpenAi, "provider comes from file")?;
            ensure(config.agents.max_retry == 3, "agent retry policy comes from file")?;
            ensure(
                config.agents.backoff().as_millis() == 500,
                "fractional backoff seconds are honored",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_REMIT_LLM_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("REMIT_LOG_LEVEL", "warn");
        env::set_var("REMIT_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["REMIT_LOG_LEVEL", "REMIT_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("REMIT_FLOW_MAX_FILL_TURNS", "7");
        env::set_var("REMIT_MEMORY_SUMMARIZE_THRESHOLD", "4");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("remit.toml");
            fs::write(
                &path,
                r#"
[flow]
max_fill_turns = 3

[memory]
summarize_threshold = 8
max_raw_turns = 10

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    log_level: Some("debug".to_string()),
                    max_fill_turns: Some(12),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.flow.max_fill_turns == 12, "override fill cap should win")?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.memory.summarize_threshold == 4,
                "env threshold should win over file and defaults",
            )?;
            ensure(config.memory.max_raw_turns == 10, "file value should win over defaults")?;
            Ok(())
        })();

        clear_vars(&["REMIT_FLOW_MAX_FILL_TURNS", "REMIT_MEMORY_SUMMARIZE_THRESHOLD"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("REMIT_LLM_PROVIDER", "anthropic");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("llm.api_key")
            );
            ensure(has_message, "validation failure should mention llm.api_key")
        })();

        clear_vars(&["REMIT_LLM_PROVIDER"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("REMIT_AGENTS_MAX_RETRY", "several");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected env override failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::InvalidEnvOverride { ref key, .. } if key == "REMIT_AGENTS_MAX_RETRY"
                ),
                "error should name the offending variable",
            )
        })();

        clear_vars(&["REMIT_AGENTS_MAX_RETRY"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("REMIT_LLM_PROVIDER", "openai");
        env::set_var("REMIT_LLM_API_KEY", "sk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["REMIT_LLM_PROVIDER", "REMIT_LLM_API_KEY"]);
        result
    }
}
