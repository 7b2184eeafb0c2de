use crate::channel::ChannelEvent;
use crate::control::{ControlClient, StopOutcome};
use crate::engine::{EngineEvent, EngineObserver, FrameOutcome, RecordingEngine, StoppedSession};
use crate::errors::RecorderError;
use crate::fsm::StopDisposition;
use crate::logging::structured_fallback_line;
use crate::replay::recorder::FrameCapture;
use crate::runtime::{Clock, FileSystem, Terminal};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

pub const SCRIPT_SUFFIX: &str = "_playwright_code.py";

// ── ScriptWriter ──────────────────────────────────────────────────────────────

pub struct ScriptWriter {
    fs: Arc<dyn FileSystem>,
    output_dir: PathBuf,
}

impl ScriptWriter {
    pub fn new(fs: Arc<dyn FileSystem>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            output_dir: output_dir.into(),
        }
    }

    pub fn path_for(&self, session_id: &str) -> PathBuf {
        let safe = session_id
            .chars()
            .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
            .collect::<String>();
        self.output_dir.join(format!("{safe}{SCRIPT_SUFFIX}"))
    }

    /// Empty sessions have no script and write nothing.
    pub fn write(&self, stopped: &StoppedSession) -> Result<Option<PathBuf>, RecorderError> {
        let Some(script) = stopped.script.as_deref() else {
            tracing::info!(session = %stopped.session.id, "empty session, no script written");
            return Ok(None);
        };
        self.fs.create_dir_all(&self.output_dir)?;
        let path = self.path_for(&stopped.session.id);
        self.fs.write_string(&path, script)?;
        tracing::info!(session = %stopped.session.id, path = %path.display(), "script written");
        Ok(Some(path))
    }
}

// ── ConsoleObserver ───────────────────────────────────────────────────────────

/// Prints one line per accepted action, state transition and connection
/// change. Falls back to `key=value` lines when stdout is not a terminal.
pub struct ConsoleObserver {
    terminal: Arc<dyn Terminal>,
    session: String,
    state: &'static str,
}

impl ConsoleObserver {
    pub fn new(terminal: Arc<dyn Terminal>) -> Self {
        Self {
            terminal,
            session: "-".to_string(),
            state: "idle",
        }
    }

    fn emit(&self, pretty: String) {
        let line = if self.terminal.stdout_is_tty() {
            pretty
        } else {
            structured_fallback_line(&self.session, self.state, &pretty)
        };
        if let Err(err) = self.terminal.write_line(&line) {
            tracing::debug!(error = %err, "display write failed");
        }
    }
}

impl EngineObserver for ConsoleObserver {
    fn on_event(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::StateChanged {
                transition,
                session_id,
            } => {
                self.state = transition.to.as_str();
                if let Some(id) = session_id {
                    self.session = id.clone();
                }
                self.emit(format!(
                    "state {} -> {}",
                    transition.from.as_str(),
                    transition.to.as_str()
                ));
            }
            EngineEvent::SessionStarted(session) => {
                self.session = session.id.clone();
                self.emit(format!(
                    "recording {} ({}, {})",
                    session.name,
                    session.id,
                    session.recorder_kind.as_str()
                ));
            }
            EngineEvent::ActionAccepted { action, code_line } => {
                let kind = action.raw_kind.as_deref().unwrap_or(action.kind.as_str());
                self.emit(format!("#{} {} {}", action.sequence, kind, action.description));
                if let Some(line) = code_line {
                    for statement in line.code.lines() {
                        self.emit(format!("    {statement}"));
                    }
                }
            }
            EngineEvent::FrameDiscarded { .. } => {}
            EngineEvent::SessionStopped(stopped) => {
                let digest = stopped
                    .script_digest
                    .as_deref()
                    .map(|digest| &digest[..digest.len().min(12)])
                    .unwrap_or("none");
                self.emit(format!(
                    "stopped {}: {} actions, script {digest}",
                    stopped.session.id, stopped.session.action_count
                ));
            }
            EngineEvent::ConnectionChanged(state) => {
                self.emit(format!("channel {}", state.as_str()));
            }
        }
    }
}

// ── LiveSession ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveMode {
    /// Return after the first session stops.
    UntilStopped,
    /// Follow sessions until interrupted.
    Watch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveExit {
    SessionStopped,
    Interrupted,
    ChannelClosed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveReport {
    pub stopped: Vec<StoppedSession>,
    pub written: Vec<PathBuf>,
}

pub struct LiveSession {
    engine: RecordingEngine,
    writer: ScriptWriter,
    capture: Option<FrameCapture>,
    clock: Arc<dyn Clock>,
    report: LiveReport,
}

impl LiveSession {
    pub fn new(
        engine: RecordingEngine,
        writer: ScriptWriter,
        capture: Option<FrameCapture>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine,
            writer,
            capture,
            clock,
            report: LiveReport::default(),
        }
    }

    pub fn engine_mut(&mut self) -> &mut RecordingEngine {
        &mut self.engine
    }

    pub fn report(&self) -> &LiveReport {
        &self.report
    }

    /// Applies one channel event. Frames are captured before dispatch so a
    /// capture replays exactly what the engine saw.
    pub fn apply(&mut self, event: ChannelEvent) -> Option<FrameOutcome> {
        match event {
            ChannelEvent::Connection(state) => {
                if let Some(capture) = &mut self.capture {
                    if let Err(err) = capture.record_connection(state) {
                        tracing::warn!(error = %err, "capture write failed");
                    }
                }
                self.engine.note_connection(state);
                None
            }
            ChannelEvent::Frame { frame, raw } => {
                if let Some(capture) = &mut self.capture {
                    if let Err(err) = capture.record_frame(&raw, self.clock.now_ms()) {
                        tracing::warn!(error = %err, "capture write failed");
                    }
                }
                let outcome = self.engine.handle_frame(frame);
                if let FrameOutcome::Stopped(stopped) = &outcome {
                    self.finish(stopped);
                }
                Some(outcome)
            }
        }
    }

    fn finish(&mut self, stopped: &StoppedSession) {
        match self.writer.write(stopped) {
            Ok(Some(path)) => self.report.written.push(path),
            Ok(None) => {}
            Err(err) => {
                tracing::error!(session = %stopped.session.id, error = %err, "failed to write script");
            }
        }
        self.report.stopped.push(stopped.clone());
    }

    /// Consumes events until the mode's exit condition. The first interrupt
    /// while recording asks the server to stop (when `control` is given); a
    /// second interrupt, or one with nothing recording, exits.
    pub async fn run(
        &mut self,
        events: &mut mpsc::Receiver<ChannelEvent>,
        interrupts: &mut mpsc::UnboundedReceiver<()>,
        mode: LiveMode,
        control: Option<Arc<ControlClient>>,
    ) -> Result<LiveExit, RecorderError> {
        let mut stop_requested = false;
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        return Ok(LiveExit::ChannelClosed);
                    };
                    let outcome = self.apply(event);
                    if mode == LiveMode::UntilStopped
                        && matches!(outcome, Some(FrameOutcome::Stopped(_)))
                    {
                        return Ok(LiveExit::SessionStopped);
                    }
                }
                interrupt = interrupts.recv() => {
                    if interrupt.is_none() || stop_requested || mode == LiveMode::Watch {
                        return Ok(LiveExit::Interrupted);
                    }
                    let Some(control) = control.clone() else {
                        return Ok(LiveExit::Interrupted);
                    };
                    match self.engine.request_stop() {
                        StopDisposition::NoOp => return Ok(LiveExit::Interrupted),
                        StopDisposition::Requested { session_id } => {
                            tracing::info!(session = %session_id, "interrupt: requesting stop");
                            let response = tokio::task::spawn_blocking(move || control.stop_recording())
                                .await
                                .map_err(|err| RecorderError::Command(format!("stop task failed: {err}")))??;
                            if response.outcome == StopOutcome::NothingToStop {
                                return Ok(LiveExit::Interrupted);
                            }
                            stop_requested = true;
                        }
                    }
                }
            }
        }
    }
}
