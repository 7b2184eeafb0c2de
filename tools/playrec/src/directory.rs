use crate::api::{HttpResponse, HttpTransport};
use crate::errors::RecorderError;
use crate::protocol::ActionPayload;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub const SESSIONS_PATH: &str = "/api/sessions";
pub const EXPORT_PATH: &str = "/api/export";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub start_time: Option<String>,
    pub action_count: Option<u64>,
}

impl SessionSummary {
    fn from_value(value: &Value) -> Option<Self> {
        let id = text(value, "id").or_else(|| text(value, "session_id"))?;
        Some(Self {
            name: text(value, "name")
                .or_else(|| text(value, "test_name"))
                .unwrap_or_else(|| id.clone()),
            id,
            description: text(value, "description"),
            status: text(value, "status"),
            start_time: text(value, "start_time"),
            action_count: value.get("action_count").and_then(Value::as_u64).or_else(|| {
                value
                    .get("actions")
                    .and_then(Value::as_array)
                    .map(|actions| actions.len() as u64)
            }),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionDetail {
    pub summary: SessionSummary,
    pub actions: Vec<ActionPayload>,
    /// Stored actions that were not JSON objects.
    pub skipped_actions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyAbsent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Excel,
    Word,
    Json,
}

impl ExportFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "excel" | "xlsx" => Some(Self::Excel),
            "word" | "docx" => Some(Self::Word),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Excel => "excel",
            Self::Word => "word",
            Self::Json => "json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub format: ExportFormat,
    pub include_screenshots: bool,
    pub author: String,
    pub version: String,
    pub remarks: String,
}

impl Default for ExportRequest {
    fn default() -> Self {
        Self {
            format: ExportFormat::Excel,
            include_screenshots: true,
            author: String::new(),
            version: "1.0".to_string(),
            remarks: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub session_id: String,
    pub download_url: String,
    pub file_path: Option<String>,
}

pub struct SessionDirectory {
    transport: Arc<dyn HttpTransport>,
}

impl SessionDirectory {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    pub fn list(&self) -> Result<Vec<SessionSummary>, RecorderError> {
        let response = self
            .transport
            .get(SESSIONS_PATH)
            .map_err(|err| RecorderError::Directory(format!("list sessions: {err}")))?;
        if !response.is_success() {
            return Err(failure("list sessions", &response));
        }
        let entries = match &response.body {
            Value::Array(entries) => entries,
            body => body
                .get("sessions")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    RecorderError::Directory("list sessions: unexpected response shape".to_string())
                })?,
        };
        let sessions = entries
            .iter()
            .filter_map(SessionSummary::from_value)
            .collect::<Vec<_>>();
        tracing::debug!(count = sessions.len(), "listed sessions");
        Ok(sessions)
    }

    pub fn fetch(&self, session_id: &str) -> Result<SessionDetail, RecorderError> {
        let session_id = require_id(session_id)?;
        let path = format!("{SESSIONS_PATH}/{session_id}");
        let response = self
            .transport
            .get(&path)
            .map_err(|err| RecorderError::Directory(format!("fetch {session_id}: {err}")))?;
        if response.status != 404 && !response.is_success() {
            return Err(failure("fetch session", &response));
        }
        if response.status == 404 || !response.success_flag() {
            return Err(RecorderError::Directory(format!(
                "session {session_id} not found: {}",
                response.message().unwrap_or_default()
            )));
        }

        let session = response.body.get("session").unwrap_or(&response.body);
        let summary = SessionSummary::from_value(session).unwrap_or_else(|| SessionSummary {
            id: session_id.to_string(),
            name: session_id.to_string(),
            description: None,
            status: None,
            start_time: None,
            action_count: None,
        });
        let stored = session
            .get("actions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let actions = stored
            .iter()
            .filter_map(|action| ActionPayload::from_value(action).ok())
            .collect::<Vec<_>>();
        Ok(SessionDetail {
            skipped_actions: stored.len() - actions.len(),
            summary,
            actions,
        })
    }

    /// Deleting an identifier that is already gone is not an error.
    pub fn delete(&self, session_id: &str) -> Result<DeleteOutcome, RecorderError> {
        let session_id = require_id(session_id)?;
        let path = format!("{SESSIONS_PATH}/{session_id}");
        let response = self
            .transport
            .delete(&path)
            .map_err(|err| RecorderError::Directory(format!("delete {session_id}: {err}")))?;
        if response.status == 404 || (response.is_success() && !response.success_flag()) {
            if response.status == 404 || names_missing_session(&response) {
                tracing::info!(session = %session_id, "session already absent");
                return Ok(DeleteOutcome::AlreadyAbsent);
            }
            return Err(failure("delete session", &response));
        }
        if !response.is_success() {
            return Err(failure("delete session", &response));
        }
        tracing::info!(session = %session_id, "session deleted");
        Ok(DeleteOutcome::Deleted)
    }

    /// `selected` is checked before anything goes over the wire.
    pub fn export(
        &self,
        selected: Option<&str>,
        request: &ExportRequest,
    ) -> Result<ExportArtifact, RecorderError> {
        let session_id = selected
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                RecorderError::Command("no session selected; choose a session to export".to_string())
            })?;
        let body = json!({
            "session_id": session_id,
            "format": request.format.as_str(),
            "include_screenshots": request.include_screenshots,
            "author": request.author,
            "version": request.version,
            "remarks": request.remarks,
        });
        let response = self
            .transport
            .post_json(EXPORT_PATH, body)
            .map_err(|err| RecorderError::Command(format!("export failed: {err}")))?;
        if !response.is_success() || !response.success_flag() {
            return Err(RecorderError::Command(format!(
                "export refused (status {}): {}",
                response.status,
                response.message().unwrap_or_else(|| "no message from server".to_string())
            )));
        }
        let download_url = text(&response.body, "download_url").ok_or_else(|| {
            RecorderError::Command("export succeeded without a download_url".to_string())
        })?;
        Ok(ExportArtifact {
            session_id: session_id.to_string(),
            download_url,
            file_path: text(&response.body, "file_path"),
        })
    }
}

fn require_id(session_id: &str) -> Result<&str, RecorderError> {
    let trimmed = session_id.trim();
    if trimmed.is_empty() || trimmed.contains('/') {
        return Err(RecorderError::Directory(format!(
            "invalid session id `{session_id}`"
        )));
    }
    Ok(trimmed)
}

const NOT_FOUND_MARKERS: &[&str] = &["404", "not found", "未找到", "不存在"];

/// The store answers a missing session with `success: false` and status 200,
/// the same shape it uses for real failures, so the message decides.
fn names_missing_session(response: &HttpResponse) -> bool {
    let message = response.message().unwrap_or_default().to_lowercase();
    NOT_FOUND_MARKERS.iter().any(|marker| message.contains(marker))
}

fn failure(operation: &str, response: &HttpResponse) -> RecorderError {
    RecorderError::Directory(format!(
        "{operation} failed (status {}): {}",
        response.status,
        response.message().unwrap_or_default()
    ))
}

fn text(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::{DeleteOutcome, ExportFormat, SessionDirectory};
    use crate::api::FakeTransport;
    use crate::errors::RecorderError;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn list_accepts_bare_arrays_and_wrapped_lists() {
        let fake = FakeTransport::default();
        fake.push_json(200, json!([{"id": "a", "name": "login", "actions": [{}, {}]}]));
        fake.push_json(200, json!({"sessions": [{"session_id": "b"}, {"name": "no id"}]}));
        let directory = SessionDirectory::new(Arc::new(fake));

        let first = directory.list().expect("array");
        assert_eq!(first[0].action_count, Some(2));
        let second = directory.list().expect("wrapped");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].name, "b");
    }

    #[test]
    fn fetch_parses_stored_actions() {
        let fake = FakeTransport::default();
        fake.push_json(
            200,
            json!({"success": true, "session": {"id": "a", "name": "login", "actions": [
                {"action_type": "click", "playwright_code": "await page.click()"},
                "garbage"
            ]}}),
        );
        let directory = SessionDirectory::new(Arc::new(fake));
        let detail = directory.fetch("a").expect("fetch");
        assert_eq!(detail.actions.len(), 1);
        assert_eq!(detail.skipped_actions, 1);
        assert_eq!(detail.actions[0].fragment.as_deref(), Some("await page.click()"));
    }

    #[test]
    fn delete_treats_the_stores_own_not_found_reply_as_absent() {
        let fake = FakeTransport::default();
        fake.push_json(200, json!({"success": false, "error": "404: 会话未找到"}));
        fake.push_json(200, json!({"success": false, "message": "Session not found"}));
        let directory = SessionDirectory::new(Arc::new(fake));
        assert_eq!(directory.delete("s1").expect("absent"), DeleteOutcome::AlreadyAbsent);
        assert_eq!(directory.delete("s1").expect("absent"), DeleteOutcome::AlreadyAbsent);
    }

    #[test]
    fn delete_surfaces_other_store_failures() {
        let fake = FakeTransport::default();
        fake.push_json(
            200,
            json!({"success": false, "error": "[Errno 13] Permission denied: 'sessions/s1.json'"}),
        );
        let err = SessionDirectory::new(Arc::new(fake))
            .delete("s1")
            .expect_err("permission failure");
        assert!(matches!(err, RecorderError::Directory(message) if message.contains("Permission denied")));
    }

    #[test]
    fn export_format_names() {
        assert_eq!(ExportFormat::parse("DOCX"), Some(ExportFormat::Word));
        assert_eq!(ExportFormat::parse("pdf"), None);
        assert_eq!(ExportFormat::Json.as_str(), "json");
    }
}
