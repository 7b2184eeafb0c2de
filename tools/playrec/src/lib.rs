pub mod api;
pub mod channel;
pub mod config;
pub mod control;
pub mod directory;
pub mod engine;
pub mod errors;
pub mod fragments;
pub mod fsm;
pub mod ingest;
pub mod live;
pub mod log_retention;
pub mod logging;
pub mod protocol;
pub mod replay;
pub mod runtime;
pub mod session;
pub mod synth;
pub mod types;

use api::{HttpTransport, UreqTransport};
use channel::{ChannelManager, ChannelSettings};
use clap::{error::ErrorKind, Args, Parser, Subcommand, ValueEnum};
use config::{load_config, AppConfig, CliOverrides};
use control::{ControlClient, StartRequest, StopOutcome};
use directory::{DeleteOutcome, ExportFormat, ExportRequest, SessionDirectory};
use engine::{EngineSettings, RecordingEngine};
use errors::RecorderError;
use live::{ConsoleObserver, LiveExit, LiveMode, LiveSession, ScriptWriter};
use logging::{init_tracing, JsonlLogger};
use replay::recorder::FrameCapture;
use replay::replayer::{replay_capture, CaptureFile};
use runtime::Runtime;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use synth::ScriptTemplate;
use tokio::sync::mpsc;
use types::RecorderKind;

#[derive(Debug, Clone, Parser)]
#[command(name = "playrec")]
#[command(about = "Record browser interactions from a recorder server into Playwright scripts")]
pub struct Cli {
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Recorder server base url, e.g. http://127.0.0.1:8000
    #[arg(long, global = true)]
    pub server: Option<String>,
    #[arg(long = "log-filter", global = true)]
    pub log_filter: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Start a recording session and follow it until it stops.
    Record(RecordArgs),
    /// Follow sessions started elsewhere until interrupted.
    Watch(LiveArgs),
    /// Ask the server to stop the active recording.
    Stop,
    /// Browse, delete and export stored sessions.
    #[command(subcommand)]
    Sessions(SessionsCommand),
    /// Re-run a frame capture offline and regenerate its scripts.
    Replay(ReplayArgs),
}

#[derive(Debug, Clone, Args)]
pub struct LiveArgs {
    #[arg(long = "output-dir")]
    pub output_dir: Option<PathBuf>,
    /// Append every inbound frame to this JSONL capture.
    #[arg(long)]
    pub capture: Option<PathBuf>,
    #[arg(long = "derive-fragments", default_value_t = false)]
    pub derive_fragments: bool,
}

#[derive(Debug, Clone, Args)]
pub struct RecordArgs {
    #[arg(long)]
    pub name: String,
    #[arg(long, default_value = "")]
    pub description: String,
    #[arg(long)]
    pub url: Option<String>,
    #[arg(long, value_enum, default_value_t = CliRecorder::Realtime)]
    pub recorder: CliRecorder,
    #[command(flatten)]
    pub live: LiveArgs,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliRecorder {
    Realtime,
    Inspector,
}

impl From<CliRecorder> for RecorderKind {
    fn from(value: CliRecorder) -> Self {
        match value {
            CliRecorder::Realtime => RecorderKind::Realtime,
            CliRecorder::Inspector => RecorderKind::Inspector,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum SessionsCommand {
    List,
    Show { id: String },
    Delete { id: String },
    Export(ExportArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ExportArgs {
    pub id: Option<String>,
    #[arg(long, value_enum, default_value_t = CliExportFormat::Excel)]
    pub format: CliExportFormat,
    #[arg(long = "no-screenshots", default_value_t = false)]
    pub no_screenshots: bool,
    #[arg(long, default_value = "")]
    pub author: String,
    #[arg(long = "doc-version", default_value = "1.0")]
    pub doc_version: String,
    #[arg(long, default_value = "")]
    pub remarks: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliExportFormat {
    Excel,
    Word,
    Json,
}

impl From<CliExportFormat> for ExportFormat {
    fn from(value: CliExportFormat) -> Self {
        match value {
            CliExportFormat::Excel => ExportFormat::Excel,
            CliExportFormat::Word => ExportFormat::Word,
            CliExportFormat::Json => ExportFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct ReplayArgs {
    pub capture: PathBuf,
    #[arg(long = "output-dir")]
    pub output_dir: Option<PathBuf>,
    #[arg(long = "derive-fragments", default_value_t = false)]
    pub derive_fragments: bool,
}

pub fn run() -> Result<i32, RecorderError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| RecorderError::Io(e.to_string()))?;
    let runtime = Runtime::production();
    run_with_runtime(&args, &cwd, &runtime)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    cwd: &Path,
    runtime: &Runtime,
) -> Result<i32, RecorderError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp
            | ErrorKind::DisplayVersion
            | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(RecorderError::Cli(error.to_string())),
        },
    };

    let overrides = overrides_for(&cli);
    let cfg = load_config(&overrides, cwd, runtime.file_system.as_ref())?;
    init_tracing(cli.log_filter.as_deref(), &cfg.logging.filter);

    let transport: Arc<dyn HttpTransport> = Arc::new(UreqTransport::new(
        &cfg.server.base_url,
        cfg.request_timeout(),
    ));
    execute(&cli.command, cwd, &cfg, runtime, transport)
}

fn overrides_for(cli: &Cli) -> CliOverrides {
    let mut overrides = CliOverrides {
        config_path: cli.config.clone(),
        base_url: cli.server.clone(),
        log_filter: cli.log_filter.clone(),
        ..CliOverrides::default()
    };
    let live = match &cli.command {
        Command::Record(args) => Some(&args.live),
        Command::Watch(args) => Some(args),
        Command::Replay(args) => {
            overrides.output_dir = args.output_dir.clone();
            overrides.derive_fragments = args.derive_fragments;
            None
        }
        Command::Stop | Command::Sessions(_) => None,
    };
    if let Some(live) = live {
        overrides.output_dir = live.output_dir.clone();
        overrides.capture_path = live.capture.clone();
        overrides.derive_fragments = live.derive_fragments;
    }
    overrides
}

/// Runs one parsed command against an already loaded config.
pub fn execute(
    command: &Command,
    cwd: &Path,
    cfg: &AppConfig,
    runtime: &Runtime,
    transport: Arc<dyn HttpTransport>,
) -> Result<i32, RecorderError> {
    match command {
        Command::Record(args) => {
            let request = StartRequest {
                test_name: args.name.clone(),
                description: args.description.clone(),
                target_url: args.url.clone(),
                recorder_kind: args.recorder.into(),
            };
            run_live(cfg, runtime, transport, LiveMode::UntilStopped, Some(request))
        }
        Command::Watch(_) => run_live(cfg, runtime, transport, LiveMode::Watch, None),
        Command::Stop => {
            let response = ControlClient::new(transport).stop_recording()?;
            let line = match response.outcome {
                StopOutcome::Stopped {
                    session_id,
                    action_count,
                } => format!(
                    "stopped {} ({} actions)",
                    session_id.as_deref().unwrap_or("session"),
                    action_count.map_or_else(|| "?".to_string(), |count| count.to_string())
                ),
                StopOutcome::NothingToStop => "nothing to stop".to_string(),
            };
            runtime.terminal.write_line(&line)?;
            Ok(0)
        }
        Command::Sessions(sessions) => run_sessions(sessions, runtime, transport),
        Command::Replay(args) => run_replay(&cwd.join(&args.capture), cfg, runtime),
    }
}

fn engine_settings(cfg: &AppConfig) -> EngineSettings {
    EngineSettings {
        template: ScriptTemplate {
            browser: cfg.script.browser,
            headless: cfg.script.headless,
        },
        derive_fragments: cfg.script.derive_missing_fragments,
    }
}

fn build_engine(cfg: &AppConfig, runtime: &Runtime) -> RecordingEngine {
    let mut engine = RecordingEngine::new(engine_settings(cfg), runtime.clock.clone());
    if let Some(path) = &cfg.logging.journal_path {
        engine = engine.with_journal(JsonlLogger {
            path: path.clone(),
            max_payload_bytes: cfg.logging.journal_max_payload_bytes,
            budget_bytes: cfg.logging.journal_budget_bytes,
        });
    }
    engine.subscribe(Box::new(ConsoleObserver::new(runtime.terminal.clone())));
    engine
}

fn run_live(
    cfg: &AppConfig,
    runtime: &Runtime,
    transport: Arc<dyn HttpTransport>,
    mode: LiveMode,
    start: Option<StartRequest>,
) -> Result<i32, RecorderError> {
    let executor = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| RecorderError::Io(format!("tokio runtime: {e}")))?;
    executor.block_on(live_main(cfg, runtime, transport, mode, start))
}

async fn live_main(
    cfg: &AppConfig,
    runtime: &Runtime,
    transport: Arc<dyn HttpTransport>,
    mode: LiveMode,
    start: Option<StartRequest>,
) -> Result<i32, RecorderError> {
    let url = cfg.channel_url();
    let capture = match &cfg.capture.path {
        Some(path) => Some(FrameCapture::create(path, runtime.clock.now_ms(), Some(&url))?),
        None => None,
    };
    let capture_path = capture
        .as_ref()
        .map(|capture| capture.path().display().to_string());
    let writer = ScriptWriter::new(runtime.file_system.clone(), cfg.script.output_dir.clone());
    let mut live = LiveSession::new(build_engine(cfg, runtime), writer, capture, runtime.clock.clone());
    let control = Arc::new(ControlClient::new(transport));

    let (handle, mut events) = ChannelManager::spawn(ChannelSettings {
        url,
        reconnect_delay: cfg.reconnect_delay(),
        keepalive_interval: cfg.keepalive_interval(),
        inbound_buffer: cfg.channel.inbound_buffer,
    });
    let (interrupt_tx, mut interrupts) = mpsc::unbounded_channel();
    let signals = tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupt_tx.send(()).is_err() {
                break;
            }
        }
    });

    let outcome: Result<LiveExit, RecorderError> = async {
        if let Some(request) = start {
            handle.wait_until_open(cfg.request_timeout()).await?;
            let client = control.clone();
            let pending = request.clone();
            let response = tokio::task::spawn_blocking(move || client.start_recording(&pending))
                .await
                .map_err(|err| RecorderError::Command(format!("start task failed: {err}")))??;
            live.engine_mut().expect_session(response.seed(&request));
            if let Some(instructions) = &response.instructions {
                runtime.terminal.write_line(instructions)?;
            }
        }
        live.run(&mut events, &mut interrupts, mode, Some(control.clone()))
            .await
    }
    .await;

    signals.abort();
    let dropped = handle.dropped_frames();
    handle.shutdown().await;
    if dropped > 0 {
        tracing::warn!(dropped, "malformed inbound frames were dropped");
    }

    let exit = outcome?;
    for path in &live.report().written {
        runtime
            .terminal
            .write_line(&format!("script: {}", path.display()))?;
    }
    if let Some(path) = capture_path {
        runtime.terminal.write_line(&format!("capture: {path}"))?;
    }
    match exit {
        LiveExit::ChannelClosed => Err(RecorderError::Channel(
            "channel task ended unexpectedly".to_string(),
        )),
        LiveExit::SessionStopped | LiveExit::Interrupted => Ok(0),
    }
}

fn run_sessions(
    command: &SessionsCommand,
    runtime: &Runtime,
    transport: Arc<dyn HttpTransport>,
) -> Result<i32, RecorderError> {
    let directory = SessionDirectory::new(transport);
    match command {
        SessionsCommand::List => {
            let sessions = directory.list()?;
            if sessions.is_empty() {
                runtime.terminal.write_line("no sessions")?;
            }
            for session in sessions {
                runtime.terminal.write_line(&format!(
                    "{}\t{}\t{}\t{}",
                    session.id,
                    session.name,
                    session.status.as_deref().unwrap_or("-"),
                    session
                        .action_count
                        .map_or_else(|| "-".to_string(), |count| count.to_string())
                ))?;
            }
        }
        SessionsCommand::Show { id } => {
            let detail = directory.fetch(id)?;
            runtime.terminal.write_line(&format!(
                "{} {} ({} actions)",
                detail.summary.id,
                detail.summary.name,
                detail.actions.len()
            ))?;
            for (idx, action) in detail.actions.iter().enumerate() {
                runtime.terminal.write_line(&format!(
                    "#{} {} {}",
                    idx + 1,
                    action.action_type.as_deref().unwrap_or("unknown"),
                    action
                        .description
                        .as_deref()
                        .or(action.title.as_deref())
                        .unwrap_or("")
                ))?;
            }
            if detail.skipped_actions > 0 {
                runtime.terminal.write_line(&format!(
                    "{} stored actions could not be read",
                    detail.skipped_actions
                ))?;
            }
        }
        SessionsCommand::Delete { id } => {
            let line = match directory.delete(id)? {
                DeleteOutcome::Deleted => format!("deleted {id}"),
                DeleteOutcome::AlreadyAbsent => format!("{id} already absent"),
            };
            runtime.terminal.write_line(&line)?;
        }
        SessionsCommand::Export(args) => {
            let request = ExportRequest {
                format: args.format.into(),
                include_screenshots: !args.no_screenshots,
                author: args.author.clone(),
                version: args.doc_version.clone(),
                remarks: args.remarks.clone(),
            };
            let artifact = directory.export(args.id.as_deref(), &request)?;
            runtime.terminal.write_line(&format!(
                "exported {}: {}",
                artifact.session_id, artifact.download_url
            ))?;
        }
    }
    Ok(0)
}

fn run_replay(capture: &Path, cfg: &AppConfig, runtime: &Runtime) -> Result<i32, RecorderError> {
    let raw = runtime.file_system.read_to_string(capture)?;
    let capture = CaptureFile::parse(&raw)?;
    let mut engine = RecordingEngine::new(engine_settings(cfg), runtime.clock.clone());
    let summary = replay_capture(&capture, &mut engine);
    let writer = ScriptWriter::new(runtime.file_system.clone(), cfg.script.output_dir.clone());

    runtime.terminal.write_line(&format!(
        "replayed {} frames: {} accepted, {} discarded, {} ignored, {} sessions",
        summary.frames,
        summary.accepted,
        summary.discarded,
        summary.ignored,
        summary.stopped.len()
    ))?;
    for stopped in &summary.stopped {
        match writer.write(stopped)? {
            Some(path) => runtime.terminal.write_line(&format!(
                "script: {} ({})",
                path.display(),
                stopped.script_digest.as_deref().unwrap_or("-")
            ))?,
            None => runtime
                .terminal
                .write_line(&format!("{}: no actions, no script", stopped.session.id))?,
        }
    }
    Ok(0)
}
