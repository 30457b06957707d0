use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use remit_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let llm_api_key = match &config.llm.api_key {
        Some(key) => redact_key(key.expose_secret()),
        None => "<unset>".to_string(),
    };
    let optional = |value: Option<String>| value.unwrap_or_else(|| "<unset>".to_string());

    let fields: Vec<(&str, String, &str)> = vec![
        ("llm.provider", format!("{:?}", config.llm.provider), "REMIT_LLM_PROVIDER"),
        ("llm.model", config.llm.model.clone(), "REMIT_LLM_MODEL"),
        ("llm.base_url", optional(config.llm.base_url.clone()), "REMIT_LLM_BASE_URL"),
        ("llm.api_key", llm_api_key, "REMIT_LLM_API_KEY"),
        ("llm.timeout_secs", config.llm.timeout_secs.to_string(), "REMIT_LLM_TIMEOUT_SECS"),
        ("llm.max_retries", config.llm.max_retries.to_string(), "REMIT_LLM_MAX_RETRIES"),
        ("agents.max_retry", config.agents.max_retry.to_string(), "REMIT_AGENTS_MAX_RETRY"),
        (
            "agents.backoff_seconds",
            config.agents.backoff_seconds.to_string(),
            "REMIT_AGENTS_BACKOFF_SECONDS",
        ),
        (
            "agents.timeout_seconds",
            optional(config.agents.timeout_seconds.map(|value| value.to_string())),
            "REMIT_AGENTS_TIMEOUT_SECONDS",
        ),
        ("memory.enabled", config.memory.enabled.to_string(), "REMIT_MEMORY_ENABLED"),
        (
            "memory.enable_summary",
            config.memory.enable_summary.to_string(),
            "REMIT_MEMORY_ENABLE_SUMMARY",
        ),
        (
            "memory.summarize_threshold",
            config.memory.summarize_threshold.to_string(),
            "REMIT_MEMORY_SUMMARIZE_THRESHOLD",
        ),
        (
            "memory.keep_recent_turns",
            config.memory.keep_recent_turns.to_string(),
            "REMIT_MEMORY_KEEP_RECENT_TURNS",
        ),
        (
            "memory.max_raw_turns",
            config.memory.max_raw_turns.to_string(),
            "REMIT_MEMORY_MAX_RAW_TURNS",
        ),
        (
            "memory.summary_model",
            optional(config.memory.summary_model.clone()),
            "REMIT_MEMORY_SUMMARY_MODEL",
        ),
        (
            "flow.max_fill_turns",
            config.flow.max_fill_turns.to_string(),
            "REMIT_FLOW_MAX_FILL_TURNS",
        ),
        (
            "flow.completed_history",
            config.flow.completed_history.to_string(),
            "REMIT_FLOW_COMPLETED_HISTORY",
        ),
        ("flow.context_turns", config.flow.context_turns.to_string(), "REMIT_FLOW_CONTEXT_TURNS"),
        ("logging.level", config.logging.level.clone(), "REMIT_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format), "REMIT_LOGGING_FORMAT"),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in fields {
        lines.push(render_line(
            key,
            &value,
            field_source(key, Some(env_key), config_file_doc.as_ref(), config_file_path.as_deref()),
        ));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("remit.toml"), PathBuf::from("config/remit.toml")]
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
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
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

/// Keeps a recognizable provider prefix such as `sk-` and hides the rest.
fn redact_key(key: &str) -> String {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
