use std::{fmt, path::PathBuf};

use thiserror::Error;

/// Core error type for ProSearch.
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("language model call failed: {0}")]
    Model(#[source] TaskError),
    #[error("search provider error: {0}")]
    Search(String),
    #[error("invalid research state: {0}")]
    InvalidState(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ResearchError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }

    pub fn search(reason: impl Into<String>) -> Self {
        Self::Search(reason.into())
    }
}

/// Failure of a single collaborator call, tagged with whether it may be retried.
#[derive(Debug, Clone)]
pub struct TaskError {
    pub reason: String,
    pub retryable: bool,
}

impl TaskError {
    pub fn new(reason: impl Into<String>, retryable: bool) -> Self {
        Self {
            reason: reason.into(),
            retryable,
        }
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        Self::new(reason, true)
    }

    pub fn terminal(reason: impl Into<String>) -> Self {
        Self::new(reason, false)
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let retry = if self.retryable {
            "retryable"
        } else {
            "terminal"
        };
        write!(f, "{retry} task failure: {}", self.reason)
    }
}

impl std::error::Error for TaskError {}

impl From<TaskError> for ResearchError {
    fn from(err: TaskError) -> Self {
        Self::Model(err)
    }
}
