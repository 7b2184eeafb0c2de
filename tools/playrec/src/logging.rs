use crate::errors::RecorderError;
use crate::log_retention::enforce_journal_budget;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

pub const DEFAULT_JOURNAL_BUDGET_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4096;

/// Append-only diagnostics journal, one JSON object per line.
#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            budget_bytes: DEFAULT_JOURNAL_BUDGET_BYTES,
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), RecorderError> {
        if let Some(parent) = self.parent_dir() {
            fs::create_dir_all(parent).map_err(|e| RecorderError::Io(e.to_string()))?;
        }
        enforce_journal_budget(&self.path, self.budget_bytes)?;
        let line = serde_json::to_string(&LogEvent {
            level: event.level,
            event_type: event.event_type,
            payload: truncate_json(event.payload.clone(), self.max_payload_bytes),
        })
        .map_err(|e| RecorderError::Io(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| RecorderError::Io(format!("{}: {e}", self.path.display())))?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.write_all(b"\n"))
            .map_err(|e| RecorderError::Io(e.to_string()))?;
        Ok(())
    }

    /// Journal failures must never reach the frame handlers; they are
    /// reported through tracing instead.
    pub fn record(&self, level: &str, event_type: &str, payload: Value) {
        let event = LogEvent {
            level,
            event_type,
            payload,
        };
        if let Err(err) = self.append(&event) {
            tracing::warn!(path = %self.path.display(), error = %err, "journal append failed");
        }
    }

    fn parent_dir(&self) -> Option<&Path> {
        self.path.parent().filter(|dir| !dir.as_os_str().is_empty())
    }
}

/// Installs the process-wide fmt subscriber. Calling it twice is harmless.
pub fn init_tracing(explicit: Option<&str>, configured: &str) {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let directive = tracing_directive(explicit, env, configured);
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// `--log-filter` beats `RUST_LOG`, which beats the config file.
pub fn tracing_directive(explicit: Option<&str>, env: Option<String>, configured: &str) -> String {
    explicit
        .map(str::to_string)
        .or_else(|| env.filter(|value| !value.trim().is_empty()))
        .unwrap_or_else(|| configured.to_string())
}

/// Plain `key=value` line used when stdout is not a terminal.
pub fn structured_fallback_line(session: &str, state: &str, message: &str) -> String {
    format!(
        "session={session} state={state} message={}",
        message.replace('\n', "\\n")
    )
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}
