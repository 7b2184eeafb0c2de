use playrec::engine::{EngineSettings, FrameOutcome, RecordingEngine};
use playrec::errors::RecorderError;
use playrec::fsm::StopDisposition;
use playrec::runtime::FakeClock;
use playrec::synth::ScriptTemplate;
use playrec::types::{ActionKind, RecorderKind, SessionState};
use serde_json::json;
use std::sync::Arc;

// ── helpers ───────────────────────────────────────────────────────────────────

fn engine() -> RecordingEngine {
    RecordingEngine::new(EngineSettings::default(), Arc::new(FakeClock::default()))
}

fn started(engine: &mut RecordingEngine, session_id: &str, recorder: &str) {
    let outcome = engine.handle_value(&json!({
        "type": "recording_started",
        "session_id": session_id,
        "recorder_type": recorder,
    }));
    assert!(matches!(outcome, FrameOutcome::Started { .. }), "{outcome:?}");
}

fn action(engine: &mut RecordingEngine, kind: Option<&str>, code: Option<&str>) -> FrameOutcome {
    let mut record = json!({ "description": "step" });
    if let Some(kind) = kind {
        record["action_type"] = json!(kind);
    }
    if let Some(code) = code {
        record["playwright_code"] = json!(code);
    }
    engine.handle_value(&json!({ "type": "action_recorded", "action": record }))
}

fn stop(engine: &mut RecordingEngine, count: u64) -> FrameOutcome {
    engine.handle_value(&json!({ "type": "recording_stopped", "action_count": count }))
}

// ── scenarios ─────────────────────────────────────────────────────────────────

#[test]
fn three_fragments_render_between_preamble_and_teardown() {
    let mut engine = engine();
    started(&mut engine, "s1", "realtime");
    for code in ["A", "B", "C"] {
        action(&mut engine, Some("click"), Some(code));
    }
    let FrameOutcome::Stopped(stopped) = stop(&mut engine, 3) else {
        panic!("expected stop");
    };

    let template = ScriptTemplate::default();
    let expected = format!("{}    A\n    B\n    C\n{}", template.preamble(), template.teardown());
    assert_eq!(stopped.script.as_deref(), Some(expected.as_str()));
    assert_eq!(stopped.session.action_count, 3);
    assert!(!stopped.count_mismatch());
    assert_eq!(stopped.session.recorder_kind, RecorderKind::Realtime);
    assert_eq!(engine.state(), SessionState::Idle);
}

#[test]
fn sequence_numbers_are_one_to_n_regardless_of_sender_numbers() {
    let mut engine = engine();
    started(&mut engine, "s1", "inspector");
    for sender_id in [40, 7, 7, 12] {
        engine.handle_value(&json!({
            "type": "action_recorded",
            "action": { "id": sender_id, "sequence": sender_id, "action_type": "click" },
        }));
    }
    let sequences = engine
        .actions()
        .iter()
        .map(|action| action.sequence)
        .collect::<Vec<_>>();
    assert_eq!(sequences, vec![1, 2, 3, 4]);
    assert!(engine
        .actions()
        .iter()
        .all(|action| action.recorder_kind == RecorderKind::Inspector));
}

#[test]
fn duplicate_start_keeps_counter_and_code_lines() {
    let mut engine = engine();
    started(&mut engine, "s1", "realtime");
    action(&mut engine, Some("click"), Some("A"));
    action(&mut engine, Some("fill"), Some("B"));

    let outcome = engine.handle_value(&json!({ "type": "recording_started", "session_id": "s2" }));
    assert!(matches!(
        outcome,
        FrameOutcome::Discarded { error: RecorderError::Protocol(_), .. }
    ));
    assert_eq!(engine.active_session().map(|s| s.id.as_str()), Some("s1"));
    assert_eq!(engine.active_session().map(|s| s.action_count), Some(2));
    assert_eq!(engine.render_partial().len(), 2);
}

#[test]
fn action_without_kind_is_counted_as_unknown_and_keeps_its_code() {
    let mut engine = engine();
    started(&mut engine, "s1", "realtime");
    let outcome = action(&mut engine, None, Some("await page.mouse.wheel(0, 300)"));
    assert!(matches!(outcome, FrameOutcome::Accepted { sequence: 1, degraded: true }));

    let recorded = &engine.actions()[0];
    assert_eq!(recorded.kind, ActionKind::Unknown);
    assert_eq!(recorded.description, "step");
    assert_eq!(engine.render_partial()[0].code, "await page.mouse.wheel(0, 300)");
    assert_eq!(engine.stats().degraded, 1);
}

#[test]
fn actions_without_fragments_count_but_add_no_code() {
    let mut engine = engine();
    started(&mut engine, "s1", "realtime");
    action(&mut engine, Some("click"), Some("A"));
    action(&mut engine, Some("wait"), None);
    action(&mut engine, Some("click"), Some("C"));
    assert_eq!(engine.actions().len(), 3);
    let lines = engine.render_partial();
    assert_eq!(
        lines.iter().map(|line| line.sequence).collect::<Vec<_>>(),
        vec![1, 3]
    );
}

#[test]
fn stop_while_idle_is_a_no_op() {
    let mut engine = engine();
    assert_eq!(engine.request_stop(), StopDisposition::NoOp);
    let outcome = stop(&mut engine, 0);
    assert!(matches!(outcome, FrameOutcome::Discarded { .. }));
    assert_eq!(engine.state(), SessionState::Idle);
    assert_eq!(engine.stats().accepted, 0);
    assert!(engine.actions().is_empty());
}

#[test]
fn actions_outside_a_session_are_discarded_not_buffered() {
    let mut engine = engine();
    action(&mut engine, Some("click"), Some("early"));
    started(&mut engine, "s1", "realtime");
    action(&mut engine, Some("click"), Some("A"));
    assert_eq!(engine.actions().len(), 1);
    assert_eq!(engine.stats().discarded_not_recording, 1);
}

#[test]
fn empty_session_yields_no_script() {
    let mut engine = engine();
    started(&mut engine, "s1", "realtime");
    let FrameOutcome::Stopped(stopped) = stop(&mut engine, 0) else {
        panic!("expected stop");
    };
    assert!(stopped.script.is_none());
    assert!(stopped.script_digest.is_none());
}

#[test]
fn same_actions_render_the_same_bytes() {
    let run = || {
        let mut engine = engine();
        started(&mut engine, "s1", "realtime");
        action(&mut engine, Some("goto"), Some("await page.goto(\"https://example.com\")"));
        action(&mut engine, Some("click"), Some("await page.get_by_role(\"button\").click()"));
        match stop(&mut engine, 2) {
            FrameOutcome::Stopped(stopped) => *stopped,
            other => panic!("expected stop, got {other:?}"),
        }
    };
    let first = run();
    let second = run();
    assert_eq!(first.script, second.script);
    assert_eq!(first.script_digest, second.script_digest);
}

#[test]
fn partial_code_is_always_a_prefix_of_the_final_script() {
    let mut engine = engine();
    started(&mut engine, "s1", "realtime");
    let template = ScriptTemplate::default();
    let mut partials = Vec::new();
    for code in ["A", "B", "C", "D"] {
        action(&mut engine, Some("click"), Some(code));
        let body = engine
            .render_partial()
            .iter()
            .map(|line| format!("    {}\n", line.code))
            .collect::<String>();
        partials.push(format!("{}{body}", template.preamble()));
    }
    let FrameOutcome::Stopped(stopped) = stop(&mut engine, 4) else {
        panic!("expected stop");
    };
    let script = stopped.script.expect("script");
    for partial in partials {
        assert!(script.starts_with(&partial), "{partial:?} is not a prefix");
    }
}

#[test]
fn a_second_session_starts_from_a_clean_slate() {
    let mut engine = engine();
    started(&mut engine, "s1", "realtime");
    action(&mut engine, Some("click"), Some("A"));
    stop(&mut engine, 1);

    started(&mut engine, "s2", "inspector");
    action(&mut engine, Some("click"), Some("Z"));
    assert_eq!(engine.actions().len(), 1);
    assert_eq!(engine.actions()[0].sequence, 1);
    assert_eq!(engine.render_partial()[0].code, "Z");
    assert_eq!(engine.selected_session(), Some("s1"));
}
