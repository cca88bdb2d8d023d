use std::env;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Environment variables consulted for each dotted config key, in priority order.
pub const ENV_BINDINGS: &[(&str, &[&str])] = &[
    ("database.url", &["BRAINSTORM_DATABASE_URL"]),
    ("database.max_connections", &["BRAINSTORM_DATABASE_MAX_CONNECTIONS"]),
    ("database.timeout_secs", &["BRAINSTORM_DATABASE_TIMEOUT_SECS"]),
    ("llm.provider", &["BRAINSTORM_LLM_PROVIDER"]),
    ("llm.api_key", &["BRAINSTORM_LLM_API_KEY", "OPENAI_API_KEY"]),
    ("llm.base_url", &["BRAINSTORM_LLM_BASE_URL"]),
    ("llm.model", &["BRAINSTORM_LLM_MODEL"]),
    ("llm.timeout_secs", &["BRAINSTORM_LLM_TIMEOUT_SECS"]),
    ("llm.max_retries", &["BRAINSTORM_LLM_MAX_RETRIES"]),
    ("search.api_key", &["BRAINSTORM_SEARCH_API_KEY", "TAVILY_API_KEY"]),
    ("search.base_url", &["BRAINSTORM_SEARCH_BASE_URL"]),
    ("search.max_results", &["BRAINSTORM_SEARCH_MAX_RESULTS"]),
    ("research.fetch_timeout_secs", &["BRAINSTORM_RESEARCH_FETCH_TIMEOUT_SECS"]),
    ("research.deep_delay_ms", &["BRAINSTORM_RESEARCH_DEEP_DELAY_MS"]),
    ("agent.max_turns", &["BRAINSTORM_AGENT_MAX_TURNS"]),
    ("agent.workspace_root", &["BRAINSTORM_AGENT_WORKSPACE_ROOT"]),
    ("logging.level", &["BRAINSTORM_LOGGING_LEVEL", "BRAINSTORM_LOG_LEVEL"]),
    ("logging.format", &["BRAINSTORM_LOGGING_FORMAT", "BRAINSTORM_LOG_FORMAT"]),
];

pub fn env_keys(config_key: &str) -> &'static [&'static str] {
    ENV_BINDINGS
        .iter()
        .find(|(key, _)| *key == config_key)
        .map(|(_, vars)| *vars)
        .unwrap_or(&[])
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub research: ResearchConfig,
    pub agent: AgentConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    #[serde(deserialize_with = "optional_secret")]
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    #[serde(deserialize_with = "optional_secret")]
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub max_results: u32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    pub fetch_timeout_secs: u64,
    pub deep_delay_ms: u64,
    pub user_agent: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// `None` leaves the assistant/tools loop unbounded. A configured `0` maps to `None`.
    #[serde(deserialize_with = "turn_limit_field")]
    pub max_turns: Option<u32>,
    pub workspace_root: PathBuf,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(alias = "openai")]
    OpenAi,
    #[default]
    Ollama,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

/// Values set programmatically (CLI flags, tests). They win over every other source.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_base_url: Option<String>,
    pub search_api_key: Option<String>,
    pub max_turns: Option<u32>,
    pub workspace_root: Option<PathBuf>,
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
    #[error("invalid value `{value}` in `{key}`: {reason}")]
    InvalidEnvOverride { key: String, value: String, reason: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://brainstorm.db?mode=rwc".to_string(),
            max_connections: 5,
            timeout_secs: 30,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            api_key: None,
            base_url: None,
            model: "llama3.1".to_string(),
            timeout_secs: 120,
            max_retries: 2,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { api_key: None, base_url: "https://api.tavily.com".to_string(), max_results: 5 }
    }
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 10,
            deep_delay_ms: 500,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { max_turns: Some(25), workspace_root: PathBuf::from(".") }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::default() }
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(format!("unsupported llm provider `{other}` (expected openai|ollama)")),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => {
                Err(format!("unsupported log format `{other}` (expected compact|pretty|json)"))
            }
        }
    }
}

impl LlmConfig {
    /// Base URL of the chat-completions API, falling back to the provider's public endpoint.
    pub fn effective_base_url(&self) -> String {
        match (&self.base_url, self.provider) {
            (Some(url), _) if !url.trim().is_empty() => url.trim_end_matches('/').to_string(),
            (_, LlmProvider::OpenAi) => "https://api.openai.com/v1".to_string(),
            (_, LlmProvider::Ollama) => "http://localhost:11434/v1".to_string(),
        }
    }
}

impl AppConfig {
    /// Layers defaults, the TOML file, environment variables and explicit overrides,
    /// then validates.
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = match resolve_config_path(options.config_path.as_deref()) {
            Some(path) => Self::from_file(&path)?,
            None if options.require_file => {
                let expected =
                    options.config_path.unwrap_or_else(|| PathBuf::from("brainstorm.toml"));
                return Err(ConfigError::MissingConfigFile(expected));
            }
            None => Self::default(),
        };

        config.apply_env()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)
            .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
        toml::from_str(&interpolate_env_vars(&raw)?)
            .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        env_parse("database.url", &mut self.database.url)?;
        env_parse("database.max_connections", &mut self.database.max_connections)?;
        env_parse("database.timeout_secs", &mut self.database.timeout_secs)?;

        env_parse("llm.provider", &mut self.llm.provider)?;
        env_secret("llm.api_key", &mut self.llm.api_key);
        if let Some((_, url)) = env_lookup("llm.base_url") {
            self.llm.base_url = Some(url);
        }
        env_parse("llm.model", &mut self.llm.model)?;
        env_parse("llm.timeout_secs", &mut self.llm.timeout_secs)?;
        env_parse("llm.max_retries", &mut self.llm.max_retries)?;

        env_secret("search.api_key", &mut self.search.api_key);
        env_parse("search.base_url", &mut self.search.base_url)?;
        env_parse("search.max_results", &mut self.search.max_results)?;

        env_parse("research.fetch_timeout_secs", &mut self.research.fetch_timeout_secs)?;
        env_parse("research.deep_delay_ms", &mut self.research.deep_delay_ms)?;

        if let Some(turns) = env_value::<u32>("agent.max_turns")? {
            self.agent.max_turns = turn_limit(turns);
        }
        env_parse("agent.workspace_root", &mut self.agent.workspace_root)?;

        env_parse("logging.level", &mut self.logging.level)?;
        env_parse("logging.format", &mut self.logging.format)?;
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        let ConfigOverrides {
            database_url,
            log_level,
            llm_provider,
            llm_model,
            llm_api_key,
            llm_base_url,
            search_api_key,
            max_turns,
            workspace_root,
        } = overrides;

        if let Some(url) = database_url {
            self.database.url = url;
        }
        if let Some(level) = log_level {
            self.logging.level = level;
        }
        if let Some(provider) = llm_provider {
            self.llm.provider = provider;
        }
        if let Some(model) = llm_model {
            self.llm.model = model;
        }
        if llm_base_url.is_some() {
            self.llm.base_url = llm_base_url;
        }
        if let Some(key) = llm_api_key {
            self.llm.api_key = Some(SecretString::from(key));
        }
        if let Some(key) = search_api_key {
            self.search.api_key = Some(SecretString::from(key));
        }
        if let Some(turns) = max_turns {
            self.agent.max_turns = turn_limit(turns);
        }
        if let Some(root) = workspace_root {
            self.agent.workspace_root = root;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let database = &self.database;
        let url = database.url.trim();
        require(
            url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:",
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)",
        )?;
        require(
            database.max_connections > 0,
            "database.max_connections must be greater than zero",
        )?;
        require(
            (1..=300).contains(&database.timeout_secs),
            "database.timeout_secs must be in range 1..=300",
        )?;

        let llm = &self.llm;
        require(
            (1..=600).contains(&llm.timeout_secs),
            "llm.timeout_secs must be in range 1..=600",
        )?;
        require(!llm.model.trim().is_empty(), "llm.model must not be empty")?;
        if llm.provider == LlmProvider::OpenAi {
            require(
                is_present(llm.api_key.as_ref()),
                "llm.api_key is required for the openai provider (set BRAINSTORM_LLM_API_KEY or OPENAI_API_KEY)",
            )?;
        }
        require(
            is_http(&llm.effective_base_url()),
            "llm.base_url must start with http:// or https://",
        )?;

        require(
            is_http(&self.search.base_url),
            "search.base_url must start with http:// or https://",
        )?;
        require(
            (1..=20).contains(&self.search.max_results),
            "search.max_results must be in range 1..=20",
        )?;

        let research = &self.research;
        require(
            (1..=120).contains(&research.fetch_timeout_secs),
            "research.fetch_timeout_secs must be in range 1..=120",
        )?;
        require(research.deep_delay_ms <= 10_000, "research.deep_delay_ms must not exceed 10000")?;

        require(
            matches!(
                self.logging.level.trim().to_ascii_lowercase().as_str(),
                "trace" | "debug" | "info" | "warn" | "error"
            ),
            "logging.level must be one of trace|debug|info|warn|error",
        )
    }
}

/// An explicit path is used only if it exists; otherwise the working directory is searched.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    match explicit_path {
        Some(path) => path.exists().then(|| path.to_path_buf()),
        None => ["brainstorm.toml", "config/brainstorm.toml"]
            .into_iter()
            .map(PathBuf::from)
            .find(|path| path.exists()),
    }
}

/// Expands `${VAR}` references. A reference to an unset variable is an error.
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let var = &after[..end];
        let value = env::var(var)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: var.to_string() })?;
        output.push_str(&value);
        rest = &after[end + 1..];
    }

    output.push_str(rest);
    Ok(output)
}

fn require(condition: bool, message: &str) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::Validation(message.to_string()))
    }
}

fn is_http(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn is_present(secret: Option<&SecretString>) -> bool {
    secret.is_some_and(|value| !value.expose_secret().trim().is_empty())
}

/// `0` disables the turn guard.
fn turn_limit(value: u32) -> Option<u32> {
    (value > 0).then_some(value)
}

/// First non-blank variable bound to `config_key`, with the variable's name.
fn env_lookup(config_key: &str) -> Option<(&'static str, String)> {
    env_keys(config_key).iter().find_map(|var| {
        env::var(var).ok().filter(|value| !value.trim().is_empty()).map(|value| (*var, value))
    })
}

fn env_value<T>(config_key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    env_lookup(config_key)
        .map(|(var, raw)| {
            raw.parse().map_err(|error: T::Err| ConfigError::InvalidEnvOverride {
                key: var.to_string(),
                value: raw.clone(),
                reason: error.to_string(),
            })
        })
        .transpose()
}

fn env_parse<T>(config_key: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    if let Some(value) = env_value(config_key)? {
        *target = value;
    }
    Ok(())
}

fn env_secret(config_key: &str, target: &mut Option<SecretString>) {
    if let Some((_, value)) = env_lookup(config_key) {
        *target = Some(SecretString::from(value));
    }
}

fn optional_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

fn turn_limit_field<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(turn_limit(u32::deserialize(deserializer)?))
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{
        env_keys, AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat,
        ENV_BINDINGS,
    };

    const INTERPOLATED_VAR: &str = "TEST_BRAINSTORM_LLM_KEY";

    /// Runs `test_fn` with only `vars` set among the variables the loader reads.
    fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        let _guard = ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let managed: Vec<&str> = ENV_BINDINGS
            .iter()
            .flat_map(|(_, keys)| keys.iter().copied())
            .chain([INTERPOLATED_VAR])
            .collect();
        for key in &managed {
            env::remove_var(key);
        }
        for (key, value) in vars {
            env::set_var(key, value);
        }

        test_fn();

        for key in &managed {
            env::remove_var(key);
        }
    }

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("brainstorm.toml");
        fs::write(&path, body).expect("config file should be writable");
        path
    }

    #[test]
    fn defaults_validate_without_any_secrets() {
        with_env(&[], || {
            let config = AppConfig::load(LoadOptions::default()).expect("defaults should load");

            assert_eq!(config.llm.provider, LlmProvider::Ollama);
            assert_eq!(config.llm.effective_base_url(), "http://localhost:11434/v1");
            assert_eq!(config.agent.max_turns, Some(25));
            assert_eq!(config.research.fetch_timeout_secs, 10);
            assert!(config.search.api_key.is_none());
        });
    }

    #[test]
    fn file_load_supports_env_interpolation() {
        with_env(&[(INTERPOLATED_VAR, "sk-from-env")], || {
            let dir = TempDir::new().expect("tempdir");
            let path = write_config(
                &dir,
                r#"
[llm]
provider = "openai"
api_key = "${TEST_BRAINSTORM_LLM_KEY}"
model = "gpt-4o"
"#,
            );

            let options = LoadOptions { config_path: Some(path), ..LoadOptions::default() };
            let config = AppConfig::load(options).expect("file config should load");

            assert_eq!(config.llm.provider, LlmProvider::OpenAi);
            assert_eq!(
                config.llm.api_key.as_ref().map(|key| key.expose_secret()),
                Some("sk-from-env")
            );
            assert_eq!(config.llm.effective_base_url(), "https://api.openai.com/v1");
            assert_eq!(config.search.max_results, 5, "unset file keys keep their defaults");
        });
    }

    #[test]
    fn missing_interpolation_variable_is_reported_by_name() {
        with_env(&[], || {
            let dir = TempDir::new().expect("tempdir");
            let path = write_config(&dir, "[search]\napi_key = \"${TEST_BRAINSTORM_LLM_KEY}\"\n");

            let options = LoadOptions { config_path: Some(path), ..LoadOptions::default() };
            let error = AppConfig::load(options).expect_err("unset variable should fail");
            assert!(matches!(
                error,
                ConfigError::MissingEnvInterpolation { ref var } if var == INTERPOLATED_VAR
            ));
        });
    }

    #[test]
    fn precedence_defaults_file_env_overrides() {
        with_env(
            &[
                ("BRAINSTORM_DATABASE_URL", "sqlite://from-env.db"),
                ("BRAINSTORM_AGENT_MAX_TURNS", "8"),
            ],
            || {
                let dir = TempDir::new().expect("tempdir");
                let path = write_config(
                    &dir,
                    r#"
[database]
url = "sqlite://from-file.db"

[agent]
max_turns = 3

[logging]
level = "warn"
"#,
                );

                let config = AppConfig::load(LoadOptions {
                    config_path: Some(path),
                    overrides: ConfigOverrides {
                        database_url: Some("sqlite://from-override.db".to_string()),
                        log_level: Some("debug".to_string()),
                        ..ConfigOverrides::default()
                    },
                    ..LoadOptions::default()
                })
                .expect("layered config should load");

                assert_eq!(config.database.url, "sqlite://from-override.db");
                assert_eq!(config.logging.level, "debug");
                assert_eq!(config.agent.max_turns, Some(8), "env should win over the file");
            },
        );
    }

    #[test]
    fn zero_turn_limit_disables_the_guard() {
        with_env(&[], || {
            let config = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides { max_turns: Some(0), ..ConfigOverrides::default() },
                ..LoadOptions::default()
            })
            .expect("config should load");

            assert!(config.agent.max_turns.is_none());
        });
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() {
        with_env(&[("BRAINSTORM_LLM_PROVIDER", "openai")], || {
            let error =
                AppConfig::load(LoadOptions::default()).expect_err("missing key should fail");
            assert!(
                matches!(
                    error,
                    ConfigError::Validation(ref message) if message.contains("llm.api_key")
                ),
                "{error}"
            );
        });
    }

    #[test]
    fn malformed_env_values_name_the_variable() {
        with_env(&[("BRAINSTORM_SEARCH_MAX_RESULTS", "plenty")], || {
            let error =
                AppConfig::load(LoadOptions::default()).expect_err("non-numeric value should fail");
            assert!(matches!(
                error,
                ConfigError::InvalidEnvOverride { ref key, .. }
                    if key == "BRAINSTORM_SEARCH_MAX_RESULTS"
            ));
        });
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() {
        with_env(
            &[
                ("BRAINSTORM_LLM_API_KEY", "sk-secret-value"),
                ("TAVILY_API_KEY", "tvly-secret-value"),
                ("BRAINSTORM_LOG_FORMAT", "json"),
            ],
            || {
                let config = AppConfig::load(LoadOptions::default()).expect("config should load");
                let debug = format!("{config:?}");

                assert!(!debug.contains("sk-secret-value"));
                assert!(!debug.contains("tvly-secret-value"));
                assert_eq!(
                    config.logging.format,
                    LogFormat::Json,
                    "log format alias should be honoured"
                );
            },
        );
    }

    #[test]
    fn env_keys_prefer_the_namespaced_variable() {
        assert_eq!(env_keys("llm.api_key"), ["BRAINSTORM_LLM_API_KEY", "OPENAI_API_KEY"]);
        assert!(env_keys("research.user_agent").is_empty());
    }
}
