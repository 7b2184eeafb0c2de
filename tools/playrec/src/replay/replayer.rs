//! Replay infrastructure: load a capture and re-drive a `RecordingEngine`.

use crate::engine::{FrameOutcome, RecordingEngine, StoppedSession};
use crate::errors::RecorderError;
use crate::replay::recording::{CaptureEntry, CaptureStartRecord};
use std::path::Path;

// ── CaptureFile ───────────────────────────────────────────────────────────────

/// A parsed capture file, ready for replay.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureFile {
    pub header: Option<CaptureStartRecord>,
    pub entries: Vec<CaptureEntry>,
}

impl CaptureFile {
    pub fn parse(raw: &str) -> Result<Self, RecorderError> {
        let mut header = None;
        let mut entries = Vec::new();
        for (idx, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let entry: CaptureEntry = serde_json::from_str(line).map_err(|e| {
                RecorderError::Validation(format!("capture line {}: {e}", idx + 1))
            })?;
            if let CaptureEntry::CaptureStart(start) = &entry {
                header.get_or_insert_with(|| start.clone());
            }
            entries.push(entry);
        }
        Ok(Self { header, entries })
    }

    pub fn frame_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry, CaptureEntry::Frame(_)))
            .count()
    }
}

pub fn load_capture(path: &Path) -> Result<CaptureFile, RecorderError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| RecorderError::Io(format!("{}: {e}", path.display())))?;
    CaptureFile::parse(&raw)
}

// ── Replay ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub frames: u64,
    pub accepted: u64,
    pub discarded: u64,
    pub ignored: u64,
    pub stopped: Vec<StoppedSession>,
}

/// Feeds frames in capture order. Connection entries are reported to the
/// engine's observers and change nothing else.
pub fn replay_capture(capture: &CaptureFile, engine: &mut RecordingEngine) -> ReplaySummary {
    let mut summary = ReplaySummary::default();
    for entry in &capture.entries {
        match entry {
            CaptureEntry::CaptureStart(_) => {}
            CaptureEntry::Connection(record) => engine.note_connection(record.state),
            CaptureEntry::Frame(record) => {
                summary.frames += 1;
                match engine.handle_value(&record.frame) {
                    FrameOutcome::Accepted { .. } => summary.accepted += 1,
                    FrameOutcome::Discarded { .. } => summary.discarded += 1,
                    FrameOutcome::Ignored { .. } => summary.ignored += 1,
                    FrameOutcome::Stopped(stopped) => summary.stopped.push(*stopped),
                    FrameOutcome::KeepAlive | FrameOutcome::Started { .. } => {}
                }
            }
        }
    }
    tracing::info!(
        frames = summary.frames,
        accepted = summary.accepted,
        discarded = summary.discarded,
        sessions = summary.stopped.len(),
        "replay finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::{replay_capture, CaptureFile};
    use crate::engine::{EngineSettings, RecordingEngine};
    use crate::errors::RecorderError;
    use crate::runtime::FakeClock;
    use std::sync::Arc;

    #[test]
    fn malformed_line_names_its_line_number() {
        let raw = "{\"type\":\"capture_start\",\"recorded_at_ms\":0,\"version\":1}\n\nnot json\n";
        let err = CaptureFile::parse(raw).expect_err("bad line");
        assert!(matches!(err, RecorderError::Validation(message) if message.contains("capture line 3")));
    }

    #[test]
    fn reconnect_in_the_middle_of_a_capture_keeps_the_session() {
        let raw = [
            r#"{"type":"capture_start","recorded_at_ms":0,"version":1}"#,
            r#"{"type":"frame","seq":1,"received_at_ms":1,"frame":{"type":"recording_started","session_id":"s1"}}"#,
            r#"{"type":"frame","seq":2,"received_at_ms":2,"frame":{"type":"action_recorded","action":{"action_type":"click","playwright_code":"A"}}}"#,
            r#"{"type":"connection","seq":3,"state":"closed"}"#,
            r#"{"type":"connection","seq":4,"state":"open"}"#,
            r#"{"type":"frame","seq":5,"received_at_ms":9,"frame":{"type":"action_recorded","action":{"action_type":"click","playwright_code":"B"}}}"#,
            r#"{"type":"frame","seq":6,"received_at_ms":10,"frame":{"type":"recording_stopped","action_count":2}}"#,
        ]
        .join("\n");
        let capture = CaptureFile::parse(&raw).expect("parse");
        assert_eq!(capture.frame_count(), 4);

        let mut engine =
            RecordingEngine::new(EngineSettings::default(), Arc::new(FakeClock::default()));
        let summary = replay_capture(&capture, &mut engine);
        assert_eq!(summary.frames, 4);
        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.stopped.len(), 1);
        let script = summary.stopped[0].script.as_deref().expect("script");
        assert!(script.contains("    A\n    B\n"));
    }
}
