use std::env;

use crate::ResearchError;
use crate::config::Config;

/// Wrapper around sensitive values to reduce accidental logging.
#[derive(Clone)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "***redacted***")
    }
}

/// Require that a given environment variable is set and non-empty.
pub fn require_env(var: &str) -> Result<SecretValue, ResearchError> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(SecretValue(value)),
        _ => Err(ResearchError::MissingSecret(var.to_string())),
    }
}

/// The two process-wide credentials a run cannot start without.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub llm: SecretValue,
    pub search: SecretValue,
}

impl Credentials {
    pub fn from_config(config: &Config) -> Result<Self, ResearchError> {
        Ok(Self {
            llm: require_env(&config.llm.api_key_env)?,
            search: require_env(&config.search.api_key_env)?,
        })
    }
}
