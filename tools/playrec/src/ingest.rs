use crate::errors::RecorderError;
use crate::fragments::derive_fragment;
use crate::fsm::SessionMachine;
use crate::protocol::{ActionFrame, ActionPayload};
use crate::session::Action;
use crate::types::ActionKind;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub accepted: u64,
    /// Accepted with kind `unknown` because the wire kind was missing or unrecognized.
    pub degraded: u64,
    pub discarded_not_recording: u64,
    pub rejected_malformed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingested {
    pub action: Action,
    pub degraded: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IngestionPipeline {
    stats: IngestStats,
    derive_fragments: bool,
}

impl IngestionPipeline {
    pub fn new(derive_fragments: bool) -> Self {
        Self {
            stats: IngestStats::default(),
            derive_fragments,
        }
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Validates one `action_recorded` frame and turns it into the next
    /// `Action` of the active session. On error nothing about the session
    /// has changed.
    pub fn ingest(
        &mut self,
        machine: &mut SessionMachine,
        frame: &ActionFrame,
        now_ms: u64,
    ) -> Result<Ingested, RecorderError> {
        if !machine.is_recording() {
            self.stats.discarded_not_recording += 1;
            return Err(RecorderError::Protocol(format!(
                "action_recorded discarded: session is {}",
                machine.state().as_str()
            )));
        }

        let payload = match frame.action.as_ref() {
            Some(raw) => ActionPayload::from_value(raw),
            None => Err(RecorderError::Validation(
                "action_recorded frame has no action record".to_string(),
            )),
        };
        let payload = payload.inspect_err(|_| self.stats.rejected_malformed += 1)?;

        let (kind, raw_kind, degraded) = resolve_kind(payload.action_type.as_deref());
        let fragment = payload.fragment.clone().or_else(|| {
            if self.derive_fragments {
                derive_fragment(kind, &payload)
            } else {
                None
            }
        });

        let (sequence, session) = machine.record_action()?;
        let description = payload
            .description
            .clone()
            .or_else(|| payload.title.clone())
            .unwrap_or_else(|| format!("{} action", raw_kind.as_deref().unwrap_or(kind.as_str())));

        let action = Action {
            sequence,
            kind,
            raw_kind,
            description,
            element: payload.element,
            screenshot: payload.screenshot_path,
            page_url: payload.page_url,
            timestamp: payload.timestamp,
            received_at_ms: now_ms,
            recorder_kind: session.recorder_kind,
            source_id: payload.source_id,
            cross_window: payload.cross_window,
            fragment,
        };

        self.stats.accepted += 1;
        if degraded.is_some() {
            self.stats.degraded += 1;
        }
        Ok(Ingested { action, degraded })
    }
}

/// Missing and unrecognized kinds are accepted as `Unknown`; the second
/// element keeps the raw wire string when there was one.
fn resolve_kind(raw: Option<&str>) -> (ActionKind, Option<String>, Option<String>) {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => (
            ActionKind::Unknown,
            None,
            Some("action record has no action_type".to_string()),
        ),
        Some(value) => match ActionKind::from_wire(value) {
            ActionKind::Unknown => (
                ActionKind::Unknown,
                Some(value.to_string()),
                Some(format!("unrecognized action_type `{value}`")),
            ),
            kind => (kind, None, None),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::IngestionPipeline;
    use crate::errors::RecorderError;
    use crate::fsm::SessionMachine;
    use crate::protocol::ActionFrame;
    use crate::session::SessionSeed;
    use crate::types::{ActionKind, RecorderKind};
    use serde_json::json;

    fn recording(kind: RecorderKind) -> SessionMachine {
        let mut machine = SessionMachine::default();
        machine
            .start(
                SessionSeed {
                    id: "s1".to_string(),
                    name: None,
                    description: None,
                    recorder_kind: kind,
                },
                0,
            )
            .expect("start");
        machine
    }

    fn frame(action: serde_json::Value) -> ActionFrame {
        ActionFrame {
            action: Some(action),
            recorder_type: None,
        }
    }

    #[test]
    fn sequence_numbers_come_from_the_machine_not_the_sender() {
        let mut machine = recording(RecorderKind::Inspector);
        let mut pipeline = IngestionPipeline::default();
        let first = pipeline
            .ingest(
                &mut machine,
                &frame(json!({"action_type": "click", "sequence": 40, "description": "a"})),
                5,
            )
            .expect("first");
        let second = pipeline
            .ingest(&mut machine, &frame(json!({"action_type": "fill"})), 6)
            .expect("second");
        assert_eq!(first.action.sequence, 1);
        assert_eq!(second.action.sequence, 2);
        assert_eq!(first.action.recorder_kind, RecorderKind::Inspector);
        assert_eq!(second.action.description, "fill action");
        assert_eq!(pipeline.stats().accepted, 2);
    }

    #[test]
    fn missing_kind_is_degraded_but_kept() {
        let mut machine = recording(RecorderKind::Realtime);
        let mut pipeline = IngestionPipeline::default();
        let ingested = pipeline
            .ingest(
                &mut machine,
                &frame(json!({"description": "typed name", "playwright_code": "await page.fill()"})),
                1,
            )
            .expect("accepted");
        assert_eq!(ingested.action.kind, ActionKind::Unknown);
        assert_eq!(ingested.action.description, "typed name");
        assert!(ingested.action.has_fragment());
        assert!(ingested.degraded.is_some());
        assert_eq!(pipeline.stats().degraded, 1);
    }

    #[test]
    fn unrecognized_kind_keeps_the_raw_string() {
        let mut machine = recording(RecorderKind::Realtime);
        let mut pipeline = IngestionPipeline::default();
        let ingested = pipeline
            .ingest(&mut machine, &frame(json!({"action_type": "dblclick"})), 1)
            .expect("accepted");
        assert_eq!(ingested.action.kind, ActionKind::Unknown);
        assert_eq!(ingested.action.raw_kind.as_deref(), Some("dblclick"));
        assert_eq!(ingested.action.description, "dblclick action");
    }

    #[test]
    fn malformed_records_do_not_consume_a_sequence_number() {
        let mut machine = recording(RecorderKind::Realtime);
        let mut pipeline = IngestionPipeline::default();
        let err = pipeline
            .ingest(
                &mut machine,
                &ActionFrame {
                    action: None,
                    recorder_type: None,
                },
                1,
            )
            .expect_err("missing action");
        assert!(matches!(err, RecorderError::Validation(_)));
        let err = pipeline
            .ingest(&mut machine, &frame(json!("click")), 1)
            .expect_err("not an object");
        assert!(matches!(err, RecorderError::Validation(_)));

        let ok = pipeline
            .ingest(&mut machine, &frame(json!({"action_type": "click"})), 2)
            .expect("valid");
        assert_eq!(ok.action.sequence, 1);
        assert_eq!(pipeline.stats().rejected_malformed, 2);
    }

    #[test]
    fn frames_outside_recording_are_discarded() {
        let mut machine = SessionMachine::default();
        let mut pipeline = IngestionPipeline::default();
        let err = pipeline
            .ingest(&mut machine, &frame(json!({"action_type": "click"})), 1)
            .expect_err("idle");
        assert!(matches!(err, RecorderError::Protocol(_)));
        assert_eq!(pipeline.stats().discarded_not_recording, 1);
        assert_eq!(pipeline.stats().accepted, 0);
    }

    #[test]
    fn derivation_fills_missing_fragments_when_enabled() {
        let mut machine = recording(RecorderKind::Realtime);
        let mut pipeline = IngestionPipeline::new(true);
        let ingested = pipeline
            .ingest(
                &mut machine,
                &frame(json!({"action_type": "click", "element_info": {"id": "go"}})),
                1,
            )
            .expect("accepted");
        assert_eq!(
            ingested.action.fragment.as_deref(),
            Some(r##"await page.locator("#go").click()"##)
        );
    }
}
