use crate::api::{HttpResponse, HttpTransport};
use crate::errors::RecorderError;
use crate::session::SessionSeed;
use crate::types::RecorderKind;
use serde_json::{json, Value};
use std::sync::Arc;

pub const START_PATH: &str = "/api/recording/start";
pub const STOP_PATH: &str = "/api/recording/stop";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub test_name: String,
    pub description: String,
    pub target_url: Option<String>,
    pub recorder_kind: RecorderKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartResponse {
    pub session_id: String,
    pub recorder_kind: RecorderKind,
    pub instructions: Option<String>,
    pub message: Option<String>,
}

impl StartResponse {
    pub fn seed(&self, request: &StartRequest) -> SessionSeed {
        SessionSeed {
            id: self.session_id.clone(),
            name: Some(request.test_name.clone()),
            description: Some(request.description.clone()).filter(|text| !text.is_empty()),
            recorder_kind: self.recorder_kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped {
        session_id: Option<String>,
        action_count: Option<u64>,
    },
    /// Nothing was recording. Reported as success.
    NothingToStop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopResponse {
    pub outcome: StopOutcome,
    pub message: Option<String>,
}

pub struct ControlClient {
    transport: Arc<dyn HttpTransport>,
}

impl ControlClient {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    pub fn start_recording(&self, request: &StartRequest) -> Result<StartResponse, RecorderError> {
        let test_name = request.test_name.trim();
        if test_name.is_empty() {
            return Err(RecorderError::Command(
                "a test name is required to start recording".to_string(),
            ));
        }
        let mut body = json!({
            "test_name": test_name,
            "description": request.description,
            "recorder_type": request.recorder_kind.as_str(),
        });
        if let Some(url) = &request.target_url {
            body["target_url"] = json!(url);
        }

        let response = self
            .transport
            .post_json(START_PATH, body)
            .map_err(|err| RecorderError::Command(format!("start failed: {err}")))?;
        if !response.is_success() || !response.success_flag() {
            return Err(refused("start", &response));
        }

        let session_id = response
            .body
            .get("session_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                RecorderError::Command("start accepted but no session_id returned".to_string())
            })?
            .to_string();
        let recorder_kind = response
            .body
            .get("recorder_type")
            .and_then(Value::as_str)
            .and_then(RecorderKind::parse)
            .unwrap_or(request.recorder_kind);
        tracing::info!(session = %session_id, recorder = recorder_kind.as_str(), "start accepted");

        Ok(StartResponse {
            session_id,
            recorder_kind,
            instructions: string_field(&response.body, "instructions"),
            message: response.message(),
        })
    }

    /// A refusal because nothing is recording is a successful no-op.
    pub fn stop_recording(&self) -> Result<StopResponse, RecorderError> {
        let response = self
            .transport
            .post_json(STOP_PATH, json!({}))
            .map_err(|err| RecorderError::Command(format!("stop failed: {err}")))?;

        if response.is_success() && !response.success_flag() && nothing_recording(&response) {
            tracing::info!("stop requested with no active recording");
            return Ok(StopResponse {
                outcome: StopOutcome::NothingToStop,
                message: response.message(),
            });
        }
        if !response.is_success() || !response.success_flag() {
            return Err(refused("stop", &response));
        }

        let session = response.body.get("session");
        Ok(StopResponse {
            outcome: StopOutcome::Stopped {
                session_id: session
                    .and_then(|session| string_field(session, "id"))
                    .or_else(|| string_field(&response.body, "session_id")),
                action_count: session
                    .and_then(|session| session.get("action_count"))
                    .and_then(Value::as_u64),
            },
            message: response.message(),
        })
    }
}

fn nothing_recording(response: &HttpResponse) -> bool {
    let empty_sessions = response
        .body
        .get("sessions")
        .and_then(Value::as_array)
        .is_some_and(Vec::is_empty);
    let message = response.message().unwrap_or_default().to_lowercase();
    empty_sessions
        || message.contains("no active")
        || message.contains("not recording")
        || message.contains("没有正在进行的录制")
}

fn refused(command: &str, response: &HttpResponse) -> RecorderError {
    RecorderError::Command(format!(
        "{command} refused (status {}): {}",
        response.status,
        response
            .message()
            .unwrap_or_else(|| "no message from server".to_string())
    ))
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::{ControlClient, StartRequest, StopOutcome};
    use crate::api::FakeTransport;
    use crate::errors::RecorderError;
    use crate::types::RecorderKind;
    use serde_json::json;
    use std::sync::Arc;

    fn request(name: &str) -> StartRequest {
        StartRequest {
            test_name: name.to_string(),
            description: String::new(),
            target_url: None,
            recorder_kind: RecorderKind::Inspector,
        }
    }

    #[test]
    fn blank_name_is_refused_before_any_request() {
        let fake = FakeTransport::default();
        let client = ControlClient::new(Arc::new(fake.clone()));
        let err = client.start_recording(&request("  ")).expect_err("blank");
        assert!(matches!(err, RecorderError::Command(_)));
        assert!(fake.requests().is_empty());
    }

    #[test]
    fn start_returns_session_and_instructions() {
        let fake = FakeTransport::default();
        fake.push_json(
            200,
            json!({"success": true, "session_id": "abc", "recorder_type": "inspector", "instructions": "use the browser"}),
        );
        let client = ControlClient::new(Arc::new(fake.clone()));
        let started = client.start_recording(&request("login")).expect("start");
        assert_eq!(started.session_id, "abc");
        assert_eq!(started.instructions.as_deref(), Some("use the browser"));
        let seed = started.seed(&request("login"));
        assert_eq!(seed.name.as_deref(), Some("login"));
        assert_eq!(seed.description, None);

        let sent = fake.requests();
        assert_eq!(sent[0].path, "/api/recording/start");
        assert_eq!(
            sent[0].body.as_ref().and_then(|b| b.get("recorder_type")).and_then(|v| v.as_str()),
            Some("inspector")
        );
    }

    #[test]
    fn stop_with_nothing_recording_is_a_noop_success() {
        let fake = FakeTransport::default();
        fake.push_json(200, json!({"success": false, "message": "没有正在进行的录制", "sessions": []}));
        let client = ControlClient::new(Arc::new(fake));
        let stopped = client.stop_recording().expect("no-op");
        assert_eq!(stopped.outcome, StopOutcome::NothingToStop);
    }

    #[test]
    fn server_errors_surface_as_command_errors() {
        let fake = FakeTransport::default();
        fake.push_json(500, json!({"detail": "停止录制失败: boom"}));
        fake.push_failure("connection refused");
        let client = ControlClient::new(Arc::new(fake));
        let err = client.stop_recording().expect_err("500");
        assert!(matches!(err, RecorderError::Command(message) if message.contains("boom")));
        let err = client.start_recording(&request("x")).expect_err("transport");
        assert!(matches!(err, RecorderError::Command(message) if message.contains("connection refused")));
    }

    #[test]
    fn stop_reports_the_stopped_session() {
        let fake = FakeTransport::default();
        fake.push_json(
            200,
            json!({"success": true, "session": {"id": "abc", "action_count": 4}}),
        );
        let client = ControlClient::new(Arc::new(fake));
        let stopped = client.stop_recording().expect("stop");
        assert_eq!(
            stopped.outcome,
            StopOutcome::Stopped {
                session_id: Some("abc".to_string()),
                action_count: Some(4)
            }
        );
    }
}
