use crate::errors::RecorderError;
use crate::fsm::{SessionMachine, StopDisposition, Transition};
use crate::ingest::{IngestStats, IngestionPipeline};
use crate::logging::JsonlLogger;
use crate::protocol::{decode_frame, map_frame, ActionFrame, InboundFrame, StartedFrame, StoppedFrame};
use crate::runtime::Clock;
use crate::session::{Action, CodeLine, Session, SessionSeed};
use crate::synth::{script_digest, CodeSynthesizer, ScriptTemplate};
use crate::types::{ConnectionState, RecorderKind, SessionState};
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineSettings {
    pub template: ScriptTemplate,
    pub derive_fragments: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoppedSession {
    pub session: Session,
    /// `action_count` from the stop frame. The local count is authoritative.
    pub reported_action_count: Option<u64>,
    pub actions: Vec<Action>,
    pub script: Option<String>,
    pub script_digest: Option<String>,
}

impl StoppedSession {
    pub fn count_mismatch(&self) -> bool {
        self.reported_action_count
            .is_some_and(|reported| reported != self.session.action_count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    StateChanged {
        transition: Transition,
        session_id: Option<String>,
    },
    SessionStarted(Session),
    ActionAccepted {
        action: Action,
        code_line: Option<CodeLine>,
    },
    FrameDiscarded {
        frame_type: String,
        kind: &'static str,
        message: String,
    },
    SessionStopped(Box<StoppedSession>),
    ConnectionChanged(ConnectionState),
}

pub trait EngineObserver: Send {
    fn on_event(&mut self, event: &EngineEvent);
}

#[derive(Debug)]
pub enum FrameOutcome {
    KeepAlive,
    Started { session_id: String },
    Accepted { sequence: u64, degraded: bool },
    Stopped(Box<StoppedSession>),
    Ignored { frame_type: String },
    Discarded { frame_type: String, error: RecorderError },
}

pub struct RecordingEngine {
    machine: SessionMachine,
    pipeline: IngestionPipeline,
    synth: CodeSynthesizer,
    observers: Vec<Box<dyn EngineObserver>>,
    journal: Option<JsonlLogger>,
    clock: Arc<dyn Clock>,
    pending: Option<SessionSeed>,
    selected: Option<String>,
}

impl RecordingEngine {
    pub fn new(settings: EngineSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            machine: SessionMachine::default(),
            pipeline: IngestionPipeline::new(settings.derive_fragments),
            synth: CodeSynthesizer::new(settings.template),
            observers: Vec::new(),
            journal: None,
            clock,
            pending: None,
            selected: None,
        }
    }

    pub fn with_journal(mut self, journal: JsonlLogger) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn subscribe(&mut self, observer: Box<dyn EngineObserver>) {
        self.observers.push(observer);
    }

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub fn active_session(&self) -> Option<&Session> {
        self.machine.active_session()
    }

    /// Session the next export targets: the most recently stopped one.
    pub fn selected_session(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn actions(&self) -> &[Action] {
        self.synth.actions()
    }

    pub fn render_partial(&self) -> Vec<CodeLine> {
        self.synth.render_partial()
    }

    pub fn render_complete(&self) -> Option<String> {
        self.synth.render_complete()
    }

    pub fn stats(&self) -> IngestStats {
        self.pipeline.stats()
    }

    /// Remembers what the start command returned so the matching
    /// `recording_started` frame can fill in fields it lacks.
    pub fn expect_session(&mut self, seed: SessionSeed) {
        self.pending = Some(seed);
    }

    pub fn request_stop(&self) -> StopDisposition {
        self.machine.request_stop()
    }

    /// Transport status is observed and journaled only. It never reaches
    /// the state machine.
    pub fn note_connection(&mut self, state: ConnectionState) {
        tracing::debug!(connection = state.as_str(), "connection state changed");
        self.journal("info", "connection", json!({ "state": state.as_str() }));
        self.notify(&EngineEvent::ConnectionChanged(state));
    }

    pub fn handle_text(&mut self, text: &str) -> FrameOutcome {
        match decode_frame(text) {
            Ok(frame) => self.handle_frame(frame),
            Err(err) => self.discard("malformed", err),
        }
    }

    pub fn handle_value(&mut self, raw: &Value) -> FrameOutcome {
        match map_frame(raw) {
            Ok(frame) => self.handle_frame(frame),
            Err(err) => self.discard("malformed", err),
        }
    }

    pub fn handle_frame(&mut self, frame: InboundFrame) -> FrameOutcome {
        match frame {
            InboundFrame::Pong => FrameOutcome::KeepAlive,
            InboundFrame::RecordingStarted(started) => self.on_started(started),
            InboundFrame::RecordingStopped(stopped) => self.on_stopped(stopped),
            InboundFrame::ActionRecorded(action) => self.on_action(&action),
            InboundFrame::Unknown { raw_type } => {
                tracing::debug!(frame_type = %raw_type, "ignoring unknown frame type");
                self.journal("debug", "frame_ignored", json!({ "frame_type": raw_type }));
                FrameOutcome::Ignored {
                    frame_type: raw_type,
                }
            }
        }
    }

    fn on_started(&mut self, started: StartedFrame) -> FrameOutcome {
        let seed = match self.seed_from(started) {
            Ok(seed) => seed,
            Err(err) => return self.discard("recording_started", err),
        };
        let now_ms = self.clock.now_ms();
        let session = match self.machine.start(seed, now_ms) {
            Ok(session) => session.clone(),
            Err(err) => return self.discard("recording_started", err),
        };
        self.pending = None;
        self.synth.reset();
        tracing::info!(
            session = %session.id,
            recorder = session.recorder_kind.as_str(),
            "recording started"
        );
        self.journal(
            "info",
            "session_started",
            json!({
                "session_id": session.id,
                "name": session.name,
                "recorder_kind": session.recorder_kind.as_str(),
            }),
        );
        self.publish_transitions();
        self.notify(&EngineEvent::SessionStarted(session.clone()));
        FrameOutcome::Started {
            session_id: session.id,
        }
    }

    fn seed_from(&self, started: StartedFrame) -> Result<SessionSeed, RecorderError> {
        let pending = match (&self.pending, &started.session_id) {
            (Some(pending), Some(id)) if &pending.id != id => None,
            _ => self.pending.clone(),
        };
        let id = started
            .session_id
            .or_else(|| pending.as_ref().map(|seed| seed.id.clone()))
            .ok_or_else(|| {
                RecorderError::Protocol("recording_started without session_id".to_string())
            })?;
        let recorder_kind = started
            .recorder_type
            .as_deref()
            .and_then(RecorderKind::parse)
            .or_else(|| pending.as_ref().map(|seed| seed.recorder_kind))
            .unwrap_or(RecorderKind::Realtime);
        Ok(SessionSeed {
            id,
            name: started
                .name
                .or_else(|| pending.as_ref().and_then(|seed| seed.name.clone())),
            description: started
                .description
                .or_else(|| pending.as_ref().and_then(|seed| seed.description.clone())),
            recorder_kind,
        })
    }

    fn on_action(&mut self, frame: &ActionFrame) -> FrameOutcome {
        let now_ms = self.clock.now_ms();
        let ingested = match self.pipeline.ingest(&mut self.machine, frame, now_ms) {
            Ok(ingested) => ingested,
            Err(err) => return self.discard("action_recorded", err),
        };
        let sequence = ingested.action.sequence;
        let degraded = ingested.degraded.is_some();
        if let Some(reason) = &ingested.degraded {
            tracing::warn!(sequence, reason = %reason, "accepted action with unknown kind");
            self.journal(
                "warn",
                "degraded_accept",
                json!({ "sequence": sequence, "reason": reason }),
            );
        }

        let code_line = match self.synth.append(ingested.action.clone()) {
            Ok(line) => line,
            Err(err) => {
                tracing::error!(sequence, error = %err, "synthesizer refused action");
                self.journal(
                    "error",
                    "protocol_error",
                    json!({ "sequence": sequence, "error": err.to_string() }),
                );
                None
            }
        };
        self.notify(&EngineEvent::ActionAccepted {
            action: ingested.action,
            code_line,
        });
        FrameOutcome::Accepted { sequence, degraded }
    }

    fn on_stopped(&mut self, stopped: StoppedFrame) -> FrameOutcome {
        if let Err(err) = self.machine.begin_stop() {
            return self.discard("recording_stopped", err);
        }
        self.synth.freeze();
        let session = match self.machine.finish_stop() {
            Ok(session) => session,
            Err(err) => return self.discard("recording_stopped", err),
        };

        let script = self.synth.render_complete();
        let finished = StoppedSession {
            script_digest: script.as_deref().map(script_digest),
            script,
            actions: self.synth.actions().to_vec(),
            reported_action_count: stopped.action_count,
            session,
        };
        if finished.count_mismatch() {
            tracing::warn!(
                session = %finished.session.id,
                local = finished.session.action_count,
                reported = ?finished.reported_action_count,
                "server reported a different action count"
            );
            self.journal(
                "warn",
                "action_count_mismatch",
                json!({
                    "session_id": finished.session.id,
                    "local": finished.session.action_count,
                    "reported": finished.reported_action_count,
                }),
            );
        }
        tracing::info!(
            session = %finished.session.id,
            actions = finished.session.action_count,
            digest = finished.script_digest.as_deref().unwrap_or("-"),
            "recording stopped"
        );
        self.journal(
            "info",
            "session_stopped",
            json!({
                "session_id": finished.session.id,
                "action_count": finished.session.action_count,
                "script_digest": finished.script_digest,
            }),
        );

        self.selected = Some(finished.session.id.clone());
        let finished = Box::new(finished);
        self.publish_transitions();
        self.notify(&EngineEvent::SessionStopped(finished.clone()));
        FrameOutcome::Stopped(finished)
    }

    fn discard(&mut self, frame_type: &str, error: RecorderError) -> FrameOutcome {
        let level = if error.is_recoverable() {
            tracing::warn!(frame_type, kind = error.kind(), error = %error, "frame discarded");
            "warn"
        } else {
            tracing::error!(frame_type, kind = error.kind(), error = %error, "frame discarded");
            "error"
        };
        self.journal(
            level,
            "frame_discarded",
            json!({
                "frame_type": frame_type,
                "kind": error.kind(),
                "state": self.machine.state().as_str(),
                "error": error.to_string(),
            }),
        );
        self.notify(&EngineEvent::FrameDiscarded {
            frame_type: frame_type.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        });
        FrameOutcome::Discarded {
            frame_type: frame_type.to_string(),
            error,
        }
    }

    fn publish_transitions(&mut self) {
        let session_id = self
            .machine
            .active_session()
            .map(|session| session.id.clone())
            .or_else(|| self.selected.clone());
        for transition in self.machine.take_transitions() {
            self.journal(
                "info",
                "state_transition",
                json!({
                    "from": transition.from.as_str(),
                    "to": transition.to.as_str(),
                    "session_id": session_id,
                }),
            );
            self.notify(&EngineEvent::StateChanged {
                transition,
                session_id: session_id.clone(),
            });
        }
    }

    fn notify(&mut self, event: &EngineEvent) {
        for observer in &mut self.observers {
            observer.on_event(event);
        }
    }

    fn journal(&self, level: &str, event_type: &str, payload: Value) {
        if let Some(journal) = &self.journal {
            journal.record(level, event_type, payload);
        }
    }
}
