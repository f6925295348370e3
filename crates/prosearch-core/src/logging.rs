use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::warn;

const LOG_DIR_ENV: &str = "PROSEARCH_LOG_DIR";
const RETENTION_ENV: &str = "PROSEARCH_LOG_RETENTION_DAYS";
const DEFAULT_LOG_DIR: &str = "data/logs";
const DEFAULT_RETENTION_DAYS: u64 = 90;

static REDACTION_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "api_key",
            Regex::new(r"(?i)(api[_-]?key\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid api_key regex"),
        ),
        (
            "bearer",
            Regex::new(r"(?i)(bearer\s+)([A-Za-z0-9\-_.+=/]+)").expect("invalid bearer regex"),
        ),
        (
            "sk_token",
            Regex::new(r"(sk-(?:or-v1-)?[A-Za-z0-9]{16,})").expect("invalid sk_token regex"),
        ),
        (
            "tavily_token",
            Regex::new(r"(tvly-[A-Za-z0-9\-]{16,})").expect("invalid tavily_token regex"),
        ),
    ]
});

/// What gets recorded about a finished run.
#[derive(Debug, Clone)]
pub struct RunLogInput {
    pub run_id: String,
    pub question: String,
    pub answer: String,
    pub sources: Vec<String>,
    pub research_loops: u32,
    pub trace_path: Option<String>,
}

#[derive(Serialize)]
struct RunLogRecord {
    timestamp: String,
    run_id: String,
    question: String,
    answer: String,
    sources: Vec<String>,
    research_loops: u32,
    trace_path: Option<String>,
    redactions: Vec<String>,
}

#[derive(Serialize)]
struct AuditLogRecord {
    timestamp: String,
    run_id: String,
    redactions: Vec<String>,
}

fn log_base_dir() -> PathBuf {
    std::env::var(LOG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_DIR))
}

fn retention_days() -> u64 {
    std::env::var(RETENTION_ENV)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETENTION_DAYS)
}

fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let line = serde_json::to_string(value)?;
    writeln!(writer, "{}", line)
        .with_context(|| format!("failed to append log entry to {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

fn sanitize_text(input: &str, redactions: &mut BTreeSet<String>) -> String {
    let mut output = input.to_string();
    for (name, regex) in REDACTION_PATTERNS.iter() {
        let mut matched = false;
        output = regex
            .replace_all(&output, |caps: &Captures| {
                matched = true;
                if caps.len() > 2 {
                    format!("{}[REDACTED]", &caps[1])
                } else {
                    "[REDACTED]".to_string()
                }
            })
            .to_string();
        if matched {
            redactions.insert(name.to_string());
        }
    }
    output
}

/// Append the run to `<log dir>/YYYY/MM/runs.jsonl`, scrubbing anything that
/// looks like a credential first.
pub fn log_run_completion(input: RunLogInput) -> Result<PathBuf> {
    let timestamp = Utc::now();
    let mut redactions = BTreeSet::new();

    let question = sanitize_text(&input.question, &mut redactions);
    let answer = sanitize_text(&input.answer, &mut redactions);
    let sources: Vec<String> = input
        .sources
        .iter()
        .map(|source| sanitize_text(source, &mut redactions))
        .collect();

    let record = RunLogRecord {
        timestamp: timestamp.to_rfc3339(),
        run_id: input.run_id.clone(),
        question,
        answer,
        sources,
        research_loops: input.research_loops,
        trace_path: input.trace_path,
        redactions: redactions.into_iter().collect(),
    };

    let base_dir = log_base_dir();
    let month_dir = base_dir
        .join(format!("{:04}", timestamp.year()))
        .join(format!("{:02}", timestamp.month()));
    let run_log_path = month_dir.join("runs.jsonl");
    append_json_line(&run_log_path, &record)?;

    if !record.redactions.is_empty() {
        let audit = AuditLogRecord {
            timestamp: record.timestamp.clone(),
            run_id: input.run_id.clone(),
            redactions: record.redactions.clone(),
        };
        append_json_line(&month_dir.join("audit.jsonl"), &audit)?;
        warn!(
            run_id = %input.run_id,
            fields = ?record.redactions,
            "redacted potential secrets from run log"
        );
    }

    enforce_retention(&base_dir)?;

    Ok(run_log_path)
}

fn enforce_retention(base_dir: &Path) -> Result<()> {
    let retention = retention_days();
    if retention == 0 || !base_dir.exists() {
        return Ok(());
    }
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(retention.saturating_mul(86_400)))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    prune_directory(base_dir, cutoff)
}

fn prune_directory(dir: &Path, cutoff: SystemTime) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            prune_directory(&path, cutoff)?;
            if path.read_dir()?.next().is_none() {
                fs::remove_dir(&path).ok();
            }
        } else if metadata.is_file()
            && metadata
                .modified()
                .map(|time| time < cutoff)
                .unwrap_or(false)
        {
            fs::remove_file(&path).ok();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tempfile::TempDir;

    #[test]
    fn sanitizer_masks_credentials() {
        let mut redactions = BTreeSet::new();
        let clean = sanitize_text(
            "use api_key=abcd1234 and Bearer tok.en with tvly-abcdefghijklmnop0123",
            &mut redactions,
        );

        assert_eq!(
            clean,
            "use api_key=[REDACTED] and Bearer [REDACTED] with [REDACTED]"
        );
        assert_eq!(
            redactions.into_iter().collect::<Vec<_>>(),
            ["api_key", "bearer", "tavily_token"]
        );
    }

    #[test]
    fn run_log_is_sanitized_and_persisted() -> Result<()> {
        let temp = TempDir::new().expect("temp dir");
        unsafe {
            std::env::set_var(LOG_DIR_ENV, temp.path());
            std::env::set_var(RETENTION_ENV, "0");
        }

        let input = RunLogInput {
            run_id: "run-test".to_string(),
            question: "What is api_key=abcd1234 used for?".to_string(),
            answer: "An answer [1].".to_string(),
            sources: vec!["https://example.com/p".to_string()],
            research_loops: 2,
            trace_path: None,
        };

        let path = log_run_completion(input)?;
        assert!(path.starts_with(temp.path()));
        assert!(path.ends_with("runs.jsonl"));

        let line = std::fs::read_to_string(&path)?;
        let record: Value = serde_json::from_str(line.trim())?;
        assert_eq!(record["run_id"], "run-test");
        assert_eq!(record["research_loops"], 2);
        assert!(record["question"].as_str().unwrap().contains("[REDACTED]"));
        assert!(path.with_file_name("audit.jsonl").exists());

        Ok(())
    }
}
