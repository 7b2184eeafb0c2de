use crate::protocol::ElementDescriptor;
use crate::types::{ActionKind, RecorderKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub started_at_ms: u64,
    pub recorder_kind: RecorderKind,
    pub action_count: u64,
}

/// What is known about a session before (or when) `recording_started`
/// arrives. The start command response and the frame both feed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSeed {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub recorder_kind: RecorderKind,
}

impl SessionSeed {
    pub fn into_session(self, started_at_ms: u64) -> Session {
        let name = self.name.unwrap_or_else(|| self.id.clone());
        Session {
            id: self.id,
            name,
            description: self.description,
            started_at_ms,
            recorder_kind: self.recorder_kind,
            action_count: 0,
        }
    }
}

/// One accepted user interaction. Built once at ingestion and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub sequence: u64,
    pub kind: ActionKind,
    /// Wire kind when it did not map onto a known `ActionKind`.
    pub raw_kind: Option<String>,
    pub description: String,
    pub element: Option<ElementDescriptor>,
    pub screenshot: Option<String>,
    pub page_url: Option<String>,
    pub timestamp: Option<String>,
    pub received_at_ms: u64,
    pub recorder_kind: RecorderKind,
    pub source_id: Option<String>,
    pub cross_window: bool,
    pub fragment: Option<String>,
}

impl Action {
    pub fn has_fragment(&self) -> bool {
        self.fragment.is_some()
    }
}

/// Projection of one action's fragment into the script body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeLine {
    pub sequence: u64,
    pub kind: ActionKind,
    pub code: String,
}

impl CodeLine {
    pub fn from_action(action: &Action) -> Option<Self> {
        action.fragment.as_ref().map(|code| Self {
            sequence: action.sequence,
            kind: action.kind,
            code: code.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Action, CodeLine, SessionSeed};
    use crate::types::{ActionKind, RecorderKind};

    #[test]
    fn seed_without_name_falls_back_to_id() {
        let session = SessionSeed {
            id: "abc".to_string(),
            name: None,
            description: None,
            recorder_kind: RecorderKind::Realtime,
        }
        .into_session(42);
        assert_eq!(session.name, "abc");
        assert_eq!(session.started_at_ms, 42);
        assert_eq!(session.action_count, 0);
    }

    #[test]
    fn code_line_only_exists_for_actions_with_fragments() {
        let mut action = Action {
            sequence: 4,
            kind: ActionKind::Click,
            raw_kind: None,
            description: "click".to_string(),
            element: None,
            screenshot: None,
            page_url: None,
            timestamp: None,
            received_at_ms: 0,
            recorder_kind: RecorderKind::Realtime,
            source_id: None,
            cross_window: false,
            fragment: None,
        };
        assert!(CodeLine::from_action(&action).is_none());
        action.fragment = Some("await page.click()".to_string());
        let line = CodeLine::from_action(&action).expect("line");
        assert_eq!(line.sequence, 4);
        assert_eq!(line.code, "await page.click()");
    }
}
