use playrec::engine::{EngineSettings, RecordingEngine};
use playrec::replay::recorder::FrameCapture;
use playrec::replay::replayer::{load_capture, replay_capture, CaptureFile};
use playrec::runtime::FakeClock;
use playrec::synth::ScriptTemplate;
use playrec::types::{Browser, ConnectionState, SessionState};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

fn fixture(path: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(path)
}

fn engine(settings: EngineSettings) -> RecordingEngine {
    RecordingEngine::new(settings, Arc::new(FakeClock::default()))
}

#[test]
fn fixture_replays_into_one_session_with_three_statements() {
    let capture = load_capture(&fixture("session_capture.jsonl")).expect("load fixture");
    let header = capture.header.clone().expect("header");
    assert_eq!(header.server.as_deref(), Some("ws://127.0.0.1:8000/ws"));

    let mut engine = engine(EngineSettings::default());
    let summary = replay_capture(&capture, &mut engine);
    assert_eq!(summary.frames, 10);
    assert_eq!(summary.accepted, 4);
    assert_eq!(summary.discarded, 2);
    assert_eq!(summary.ignored, 1);
    assert_eq!(summary.stopped.len(), 1);

    let stopped = &summary.stopped[0];
    assert_eq!(stopped.session.id, "a1b2c3");
    assert_eq!(stopped.session.name, "login flow");
    assert_eq!(stopped.session.action_count, 4);
    assert!(!stopped.count_mismatch());

    let script = stopped.script.as_deref().expect("script");
    let body = [
        "    await page.goto(\"https://app.example/login\")\n",
        "    await page.get_by_placeholder(\"Email\").fill(\"qa@example.com\")\n",
        "    await page.get_by_role(\"button\", name=\"Sign in\").click()\n",
    ]
    .concat();
    assert!(script.contains(&body), "{script}");
    assert!(!script.contains("#late"));
    assert_eq!(engine.state(), SessionState::Idle);
    assert_eq!(engine.stats().discarded_not_recording, 1);
}

#[test]
fn template_settings_flow_into_the_replayed_script() {
    let capture = load_capture(&fixture("session_capture.jsonl")).expect("load fixture");
    let mut engine = engine(EngineSettings {
        template: ScriptTemplate {
            browser: Browser::Firefox,
            headless: true,
        },
        derive_fragments: false,
    });
    let summary = replay_capture(&capture, &mut engine);
    let script = summary.stopped[0].script.as_deref().expect("script");
    assert!(script.contains("await playwright.firefox.launch(headless=True)"));
}

#[test]
fn derived_fragments_fill_in_actions_without_code() {
    let raw = [
        r#"{"type":"capture_start","recorded_at_ms":0,"version":1}"#,
        r#"{"type":"frame","seq":1,"received_at_ms":1,"frame":{"type":"recording_started","session_id":"s1"}}"#,
        r##"{"type":"frame","seq":2,"received_at_ms":2,"frame":{"type":"action_recorded","action":{"action_type":"click","element_info":{"tagName":"BUTTON","id":"save"}}}}"##,
        r#"{"type":"frame","seq":3,"received_at_ms":3,"frame":{"type":"recording_stopped","action_count":1}}"#,
    ]
    .join("\n");
    let capture = CaptureFile::parse(&raw).expect("parse");

    let mut plain = engine(EngineSettings::default());
    assert!(replay_capture(&capture, &mut plain).stopped[0].script.is_none());

    let mut deriving = engine(EngineSettings {
        derive_fragments: true,
        ..EngineSettings::default()
    });
    let summary = replay_capture(&capture, &mut deriving);
    let script = summary.stopped[0].script.as_deref().expect("derived script");
    assert!(script.contains("    await page.locator(\"#save\").click()\n"), "{script}");
}

#[test]
fn live_capture_round_trips_through_replay() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("live.jsonl");
    let frames = [
        json!({"type": "recording_started", "session_id": "s9"}),
        json!({"type": "action_recorded", "action": {"action_type": "click", "playwright_code": "X"}}),
        json!({"type": "recording_stopped", "action_count": 1}),
    ];

    let mut live = engine(EngineSettings::default());
    let mut capture = FrameCapture::create(&path, 0, None).expect("create capture");
    capture
        .record_connection(ConnectionState::Open)
        .expect("connection");
    let mut live_script = None;
    for (idx, frame) in frames.iter().enumerate() {
        capture.record_frame(frame, idx as u64).expect("frame");
        if let playrec::engine::FrameOutcome::Stopped(stopped) = live.handle_value(frame) {
            live_script = stopped.script;
        }
    }
    drop(capture);

    let replayed = replay_capture(
        &load_capture(&path).expect("load"),
        &mut engine(EngineSettings::default()),
    );
    assert_eq!(replayed.stopped[0].script, live_script);
    assert!(live_script.is_some());
}
