use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt};

use crate::ResearchError;
use crate::config::LoggingConfig;

static TELEMETRY_GUARD: OnceLock<()> = OnceLock::new();

/// `RUST_LOG` wins over `[logging].level`.
fn resolve_filter(rust_log: Option<String>, logging: &LoggingConfig) -> String {
    rust_log
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| logging.level.clone())
}

/// Install the global tracing subscriber from the `[logging]` section.
///
/// Safe to call multiple times; only the first invocation installs the
/// subscriber.
pub fn init_telemetry(logging: &LoggingConfig) -> Result<(), ResearchError> {
    if TELEMETRY_GUARD.get().is_some() {
        return Ok(());
    }

    let filter = resolve_filter(std::env::var("RUST_LOG").ok(), logging);

    fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::new(filter))
        .with_ansi(logging.ansi)
        .with_target(false)
        .try_init()
        .map_err(|err| {
            ResearchError::InvalidConfiguration(format!("telemetry init failed: {err}"))
        })?;

    TELEMETRY_GUARD.get_or_init(|| ());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_log_overrides_configured_level() {
        let logging = LoggingConfig {
            level: "warn,prosearch_core=debug".to_string(),
            ..LoggingConfig::default()
        };

        assert_eq!(resolve_filter(None, &logging), "warn,prosearch_core=debug");
        assert_eq!(resolve_filter(Some("  ".to_string()), &logging), "warn,prosearch_core=debug");
        assert_eq!(resolve_filter(Some("trace".to_string()), &logging), "trace");
    }
}
