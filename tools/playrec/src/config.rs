use crate::errors::RecorderError;
use crate::logging::{DEFAULT_JOURNAL_BUDGET_BYTES, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::runtime::FileSystem;
use crate::types::Browser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub base_url: Option<String>,
    pub log_filter: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub derive_fragments: bool,
    pub capture_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub channel: ChannelConfig,
    pub script: ScriptConfig,
    pub logging: LoggingConfig,
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    pub base_url: String,
    pub ws_path: String,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelConfig {
    pub reconnect_delay_seconds: u64,
    /// Zero disables periodic pings. The ping sent on open is unconditional.
    pub keepalive_interval_seconds: u64,
    pub inbound_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptConfig {
    pub browser: Browser,
    pub headless: bool,
    pub derive_missing_fragments: bool,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub filter: String,
    pub journal_path: Option<PathBuf>,
    pub journal_max_payload_bytes: usize,
    pub journal_budget_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureConfig {
    pub path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                base_url: "http://127.0.0.1:8000".to_string(),
                ws_path: "/ws".to_string(),
                request_timeout_seconds: 10,
            },
            channel: ChannelConfig {
                reconnect_delay_seconds: 3,
                keepalive_interval_seconds: 30,
                inbound_buffer: 256,
            },
            script: ScriptConfig {
                browser: Browser::Chromium,
                headless: false,
                derive_missing_fragments: false,
                output_dir: PathBuf::from("recordings"),
            },
            logging: LoggingConfig {
                filter: "info".to_string(),
                journal_path: None,
                journal_max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
                journal_budget_bytes: DEFAULT_JOURNAL_BUDGET_BYTES,
            },
            capture: CaptureConfig { path: None },
        }
    }
}

impl AppConfig {
    /// `http(s)://host[:port]` + ws_path with the scheme swapped to ws(s).
    pub fn channel_url(&self) -> String {
        let base = self.server.base_url.trim_end_matches('/');
        let swapped = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{swapped}{}", self.server.ws_path)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_seconds)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.channel.reconnect_delay_seconds)
    }

    pub fn keepalive_interval(&self) -> Option<Duration> {
        match self.channel.keepalive_interval_seconds {
            0 => None,
            seconds => Some(Duration::from_secs(seconds)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialAppConfig {
    server: Option<PartialServerConfig>,
    channel: Option<PartialChannelConfig>,
    script: Option<PartialScriptConfig>,
    logging: Option<PartialLoggingConfig>,
    capture: Option<PartialCaptureConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialServerConfig {
    base_url: Option<String>,
    ws_path: Option<String>,
    request_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialChannelConfig {
    reconnect_delay_seconds: Option<u64>,
    keepalive_interval_seconds: Option<u64>,
    inbound_buffer: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialScriptConfig {
    browser: Option<Browser>,
    headless: Option<bool>,
    derive_missing_fragments: Option<bool>,
    output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialLoggingConfig {
    filter: Option<String>,
    journal_path: Option<PathBuf>,
    journal_max_payload_bytes: Option<usize>,
    journal_budget_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialCaptureConfig {
    path: Option<PathBuf>,
}

/// Defaults, then the TOML file, then CLI flags. Relative paths resolve
/// against `process_cwd`.
pub fn load_config(
    overrides: &CliOverrides,
    process_cwd: &Path,
    fs: &dyn FileSystem,
) -> Result<AppConfig, RecorderError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = &overrides.config_path {
        let path = absolutize_path(process_cwd, path);
        let file_contents = fs.read_to_string(&path)?;
        let partial: PartialAppConfig = toml::from_str(&file_contents)
            .map_err(|e| RecorderError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides);

    cfg.script.output_dir = absolutize_path(process_cwd, &cfg.script.output_dir);
    cfg.logging.journal_path = cfg
        .logging
        .journal_path
        .as_deref()
        .map(|path| absolutize_path(process_cwd, path));
    cfg.capture.path = cfg
        .capture
        .path
        .as_deref()
        .map(|path| absolutize_path(process_cwd, path));

    validate_config(&cfg)?;
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(server) = partial.server {
        if let Some(value) = server.base_url {
            cfg.server.base_url = value;
        }
        if let Some(value) = server.ws_path {
            cfg.server.ws_path = value;
        }
        if let Some(value) = server.request_timeout_seconds {
            cfg.server.request_timeout_seconds = value;
        }
    }

    if let Some(channel) = partial.channel {
        if let Some(value) = channel.reconnect_delay_seconds {
            cfg.channel.reconnect_delay_seconds = value;
        }
        if let Some(value) = channel.keepalive_interval_seconds {
            cfg.channel.keepalive_interval_seconds = value;
        }
        if let Some(value) = channel.inbound_buffer {
            cfg.channel.inbound_buffer = value;
        }
    }

    if let Some(script) = partial.script {
        if let Some(value) = script.browser {
            cfg.script.browser = value;
        }
        if let Some(value) = script.headless {
            cfg.script.headless = value;
        }
        if let Some(value) = script.derive_missing_fragments {
            cfg.script.derive_missing_fragments = value;
        }
        if let Some(value) = script.output_dir {
            cfg.script.output_dir = value;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(value) = logging.filter {
            cfg.logging.filter = value;
        }
        if let Some(value) = logging.journal_path {
            cfg.logging.journal_path = Some(value);
        }
        if let Some(value) = logging.journal_max_payload_bytes {
            cfg.logging.journal_max_payload_bytes = value;
        }
        if let Some(value) = logging.journal_budget_bytes {
            cfg.logging.journal_budget_bytes = value;
        }
    }

    if let Some(capture) = partial.capture {
        cfg.capture.path = capture.path;
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(base_url) = &overrides.base_url {
        cfg.server.base_url = base_url.clone();
    }
    if let Some(filter) = &overrides.log_filter {
        cfg.logging.filter = filter.clone();
    }
    if let Some(output_dir) = &overrides.output_dir {
        cfg.script.output_dir = output_dir.clone();
    }
    if overrides.derive_fragments {
        cfg.script.derive_missing_fragments = true;
    }
    if let Some(capture) = &overrides.capture_path {
        cfg.capture.path = Some(capture.clone());
    }
}

fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}

fn validate_config(cfg: &AppConfig) -> Result<(), RecorderError> {
    let base_url = cfg.server.base_url.trim();
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(RecorderError::InvalidConfig(format!(
            "server.base_url must start with http:// or https://, got `{base_url}`"
        )));
    }
    if !cfg.server.ws_path.starts_with('/') {
        return Err(RecorderError::InvalidConfig(
            "server.ws_path must start with /".to_string(),
        ));
    }
    if cfg.server.request_timeout_seconds == 0 {
        return Err(RecorderError::InvalidConfig(
            "server.request_timeout_seconds must be greater than zero".to_string(),
        ));
    }
    if !(1..=60).contains(&cfg.channel.reconnect_delay_seconds) {
        return Err(RecorderError::InvalidConfig(
            "channel.reconnect_delay_seconds must be between 1 and 60".to_string(),
        ));
    }
    if cfg.channel.inbound_buffer == 0 {
        return Err(RecorderError::InvalidConfig(
            "channel.inbound_buffer must be greater than zero".to_string(),
        ));
    }
    if cfg.logging.filter.trim().is_empty() {
        return Err(RecorderError::InvalidConfig(
            "logging.filter must not be empty".to_string(),
        ));
    }
    Ok(())
}
