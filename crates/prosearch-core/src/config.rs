use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{Credentials, ResearchError};

const DEFAULT_CONFIG_PATH: &str = "prosearch.toml";
const CONFIG_PATH_ENV: &str = "PROSEARCH_CONFIG";

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Resolve both startup credentials (from environment only).
    pub fn credentials(&self) -> Result<Credentials, ResearchError> {
        Credentials::from_config(self)
    }
}

/// Helper to load configuration with best-practice guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `PROSEARCH_CONFIG` environment variable.
    /// 3. `prosearch.toml` in the current working directory, falling back to
    ///    built-in defaults when that file does not exist.
    pub fn load(path: Option<PathBuf>) -> Result<Config, ResearchError> {
        let config = match resolve_path(path) {
            Some(candidate) => Self::read(&candidate)?,
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_PATH);
                if fallback.exists() {
                    Self::read(fallback)?
                } else {
                    Config::default()
                }
            }
        };

        Self::validate(&config)?;
        Ok(config)
    }

    /// Parse configuration from TOML text without touching the filesystem.
    pub fn from_toml(raw: &str) -> Result<Config, ResearchError> {
        let config: Config = toml::from_str(raw)
            .map_err(|err| ResearchError::InvalidConfiguration(err.to_string()))?;
        Self::validate(&config)?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Config, ResearchError> {
        let raw = fs::read_to_string(path)
            .map_err(|err| ResearchError::config_io(path.to_path_buf(), err))?;
        toml::from_str(&raw).map_err(|err| ResearchError::InvalidConfiguration(err.to_string()))
    }

    fn validate(config: &Config) -> Result<(), ResearchError> {
        let research = &config.research;
        if research.number_of_initial_queries == 0 {
            return Err(ResearchError::InvalidConfiguration(
                "research.number_of_initial_queries must be at least 1".into(),
            ));
        }
        if research.max_research_loops == 0 {
            return Err(ResearchError::InvalidConfiguration(
                "research.max_research_loops must be at least 1".into(),
            ));
        }
        if research.query_generator_model.trim().is_empty()
            || research.reasoning_model.trim().is_empty()
        {
            return Err(ResearchError::InvalidConfiguration(
                "research models must not be empty".into(),
            ));
        }
        if config.llm.api_key_env.trim().is_empty() {
            return Err(ResearchError::InvalidConfiguration(
                "llm.api_key_env must reference an environment variable".into(),
            ));
        }
        if config.search.api_key_env.trim().is_empty() {
            return Err(ResearchError::InvalidConfiguration(
                "search.api_key_env must reference an environment variable".into(),
            ));
        }

        // Both credentials must exist before any run is started.
        config.credentials()?;
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = path {
        return Some(path);
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return Some(PathBuf::from(from_env));
        }
    }

    None
}

/// Per-run research settings. State-level overrides take precedence over
/// `max_research_loops` and `reasoning_model`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResearchConfig {
    #[serde(default = "ResearchConfig::default_initial_queries")]
    pub number_of_initial_queries: usize,
    #[serde(default = "ResearchConfig::default_query_generator_model")]
    pub query_generator_model: String,
    #[serde(default = "ResearchConfig::default_reasoning_model")]
    pub reasoning_model: String,
    #[serde(default = "ResearchConfig::default_max_research_loops")]
    pub max_research_loops: u32,
}

impl ResearchConfig {
    const fn default_initial_queries() -> usize {
        3
    }

    fn default_query_generator_model() -> String {
        "google/gemini-2.0-flash-001".to_string()
    }

    fn default_reasoning_model() -> String {
        "google/gemini-2.5-flash".to_string()
    }

    const fn default_max_research_loops() -> u32 {
        2
    }
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            number_of_initial_queries: Self::default_initial_queries(),
            query_generator_model: Self::default_query_generator_model(),
            reasoning_model: Self::default_reasoning_model(),
            max_research_loops: Self::default_max_research_loops(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "LlmConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "LlmConfig::default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "LlmConfig::default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "LlmConfig::default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "LlmConfig::default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "LlmConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl LlmConfig {
    fn default_base_url() -> String {
        "https://openrouter.ai/api/v1".to_string()
    }

    fn default_api_key_env() -> String {
        "OPENROUTER_API_KEY".to_string()
    }

    const fn default_max_retries() -> usize {
        2
    }

    const fn default_initial_backoff_ms() -> u64 {
        1_000
    }

    const fn default_max_backoff_ms() -> u64 {
        30_000
    }

    const fn default_timeout_secs() -> u64 {
        120
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            api_key_env: Self::default_api_key_env(),
            max_retries: Self::default_max_retries(),
            initial_backoff_ms: Self::default_initial_backoff_ms(),
            max_backoff_ms: Self::default_max_backoff_ms(),
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "SearchConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "SearchConfig::default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "SearchConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl SearchConfig {
    fn default_base_url() -> String {
        "https://api.tavily.com".to_string()
    }

    fn default_api_key_env() -> String {
        "TAVILY_API_KEY".to_string()
    }

    const fn default_timeout_secs() -> u64 {
        60
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            api_key_env: Self::default_api_key_env(),
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    #[serde(default = "LoggingConfig::default_run_log")]
    pub run_log: bool,
    /// Colourise console output.
    #[serde(default = "LoggingConfig::default_ansi")]
    pub ansi: bool,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }

    const fn default_run_log() -> bool {
        true
    }

    const fn default_ansi() -> bool {
        true
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            run_log: Self::default_run_log(),
            ansi: Self::default_ansi(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_credentials() {
        unsafe {
            std::env::set_var("PROSEARCH_TEST_LLM_KEY", "llm-key");
            std::env::set_var("PROSEARCH_TEST_SEARCH_KEY", "search-key");
        }
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        with_credentials();
        let config = ConfigLoader::from_toml(
            r#"
            [research]
            max_research_loops = 4

            [llm]
            api_key_env = "PROSEARCH_TEST_LLM_KEY"

            [search]
            api_key_env = "PROSEARCH_TEST_SEARCH_KEY"
            "#,
        )
        .expect("config should parse");

        assert_eq!(config.research.max_research_loops, 4);
        assert_eq!(config.research.number_of_initial_queries, 3);
        assert_eq!(config.llm.max_retries, 2);
        assert_eq!(config.llm.base_url, "https://openrouter.ai/api/v1");
        assert!(config.logging.run_log);
    }

    #[test]
    fn missing_credential_is_fatal() {
        unsafe {
            std::env::remove_var("PROSEARCH_TEST_ABSENT_KEY");
        }
        with_credentials();
        let err = ConfigLoader::from_toml(
            r#"
            [llm]
            api_key_env = "PROSEARCH_TEST_LLM_KEY"

            [search]
            api_key_env = "PROSEARCH_TEST_ABSENT_KEY"
            "#,
        )
        .unwrap_err();

        assert!(matches!(err, ResearchError::MissingSecret(name) if name == "PROSEARCH_TEST_ABSENT_KEY"));
    }

    #[test]
    fn zero_loop_budget_is_rejected() {
        with_credentials();
        let err = ConfigLoader::from_toml(
            r#"
            [research]
            max_research_loops = 0

            [llm]
            api_key_env = "PROSEARCH_TEST_LLM_KEY"

            [search]
            api_key_env = "PROSEARCH_TEST_SEARCH_KEY"
            "#,
        )
        .unwrap_err();

        assert!(matches!(err, ResearchError::InvalidConfiguration(_)));
    }

    #[test]
    fn explicit_missing_file_reports_io_error() {
        let err = ConfigLoader::load(Some(PathBuf::from("/nonexistent/prosearch.toml")))
            .unwrap_err();
        assert!(matches!(err, ResearchError::ConfigIo { .. }));
    }
}
