use std::env;
use std::fs;
use std::path::Path;

use brainstorm_core::config::{env_keys, resolve_config_path, AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

pub fn run(options: &LoadOptions) -> String {
    let config = match AppConfig::load(options.clone()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(options.config_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: override > env > file > default):".to_string()];
    for (key, value) in fields(&config) {
        let source =
            field_source(key, options, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(format!("- {key} = {value} (source: {source})"));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<(&'static str, String)> {
    let max_turns =
        config.agent.max_turns.map_or("<unbounded>".to_string(), |turns| turns.to_string());

    vec![
        ("database.url", config.database.url.clone()),
        ("database.max_connections", config.database.max_connections.to_string()),
        ("database.timeout_secs", config.database.timeout_secs.to_string()),
        ("llm.provider", format!("{:?}", config.llm.provider)),
        ("llm.model", config.llm.model.clone()),
        ("llm.base_url", config.llm.effective_base_url()),
        ("llm.api_key", redact_secret(config.llm.api_key.as_ref())),
        ("llm.timeout_secs", config.llm.timeout_secs.to_string()),
        ("llm.max_retries", config.llm.max_retries.to_string()),
        ("search.api_key", redact_secret(config.search.api_key.as_ref())),
        ("search.base_url", config.search.base_url.clone()),
        ("search.max_results", config.search.max_results.to_string()),
        ("research.fetch_timeout_secs", config.research.fetch_timeout_secs.to_string()),
        ("research.deep_delay_ms", config.research.deep_delay_ms.to_string()),
        ("agent.max_turns", max_turns),
        ("agent.workspace_root", config.agent.workspace_root.display().to_string()),
        ("logging.level", config.logging.level.clone()),
        ("logging.format", format!("{:?}", config.logging.format)),
    ]
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key: &str,
    options: &LoadOptions,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if is_overridden(key, options) {
        return "override".to_string();
    }

    if let Some(env_key) = env_keys(key)
        .iter()
        .find(|var| env::var(var).is_ok_and(|value| !value.trim().is_empty())) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn is_overridden(key: &str, options: &LoadOptions) -> bool {
    let overrides = &options.overrides;
    match key {
        "database.url" => overrides.database_url.is_some(),
        "logging.level" => overrides.log_level.is_some(),
        "llm.provider" => overrides.llm_provider.is_some(),
        "llm.model" => overrides.llm_model.is_some(),
        "llm.api_key" => overrides.llm_api_key.is_some(),
        "llm.base_url" => overrides.llm_base_url.is_some(),
        "search.api_key" => overrides.search_api_key.is_some(),
        "agent.max_turns" => overrides.max_turns.is_some(),
        "agent.workspace_root" => overrides.workspace_root.is_some(),
        _ => false,
    }
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    key_path.split('.').try_fold(root, |node, key| node.get(key)).is_some()
}

fn redact_secret(secret: Option<&SecretString>) -> String {
    let Some(secret) = secret else {
        return "<unset>".to_string();
    };
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
