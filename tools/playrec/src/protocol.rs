use crate::errors::RecorderError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartedFrame {
    pub session_id: Option<String>,
    pub recorder_type: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoppedFrame {
    pub action_count: Option<u64>,
    pub recorder_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionFrame {
    pub action: Option<Value>,
    pub recorder_type: Option<String>,
}

/// Closed set of inbound frames. `Unknown` keeps the raw type so newer
/// servers do not break older clients.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Pong,
    RecordingStarted(StartedFrame),
    RecordingStopped(StoppedFrame),
    ActionRecorded(ActionFrame),
    Unknown { raw_type: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Ping,
}

impl OutboundFrame {
    pub fn encode(&self) -> String {
        match self {
            Self::Ping => r#"{"type":"ping"}"#.to_string(),
        }
    }
}

pub fn decode_frame(text: &str) -> Result<InboundFrame, RecorderError> {
    let raw: Value = serde_json::from_str(text).map_err(|err| {
        RecorderError::Channel(format!(
            "malformed frame: {err}; input={}",
            text.chars().take(256).collect::<String>(),
        ))
    })?;
    map_frame(&raw)
}

pub fn map_frame(raw: &Value) -> Result<InboundFrame, RecorderError> {
    if !raw.is_object() {
        return Err(RecorderError::Channel(
            "malformed frame: payload is not a json object".to_string(),
        ));
    }
    let frame_type = raw.get("type").and_then(Value::as_str).unwrap_or("unknown");
    let data = raw.get("data");

    let frame = match frame_type {
        "pong" => InboundFrame::Pong,
        "recording_started" => InboundFrame::RecordingStarted(StartedFrame {
            session_id: field_str(raw, data, "session_id"),
            recorder_type: field_str(raw, data, "recorder_type"),
            name: field_str(raw, data, "test_name").or_else(|| field_str(raw, data, "name")),
            description: field_str(raw, data, "description"),
        }),
        "recording_stopped" => InboundFrame::RecordingStopped(StoppedFrame {
            action_count: raw
                .get("action_count")
                .and_then(Value::as_u64)
                .or_else(|| data.and_then(|d| d.get("action_count")).and_then(Value::as_u64)),
            recorder_type: field_str(raw, data, "recorder_type"),
        }),
        "action_recorded" => InboundFrame::ActionRecorded(ActionFrame {
            action: raw.get("action").cloned(),
            recorder_type: field_str(raw, data, "recorder_type"),
        }),
        other => InboundFrame::Unknown {
            raw_type: other.to_string(),
        },
    };
    Ok(frame)
}

/// Top-level value wins over the nested `data` object.
fn field_str(raw: &Value, data: Option<&Value>, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(Value::as_str)
        .or_else(|| data.and_then(|d| d.get(key)).and_then(Value::as_str))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    pub role: Option<String>,
    pub text: Option<String>,
    pub id: Option<String>,
    pub class_name: Option<String>,
    pub tag_name: Option<String>,
    pub selector: Option<String>,
    pub placeholder: Option<String>,
    pub input_type: Option<String>,
}

impl ElementDescriptor {
    pub fn from_value(value: &Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        let descriptor = Self {
            role: alias_str(value, &["role"]),
            text: alias_str(value, &["text", "innerText"]),
            id: alias_str(value, &["id"]),
            class_name: alias_str(value, &["class_name", "className"]),
            tag_name: alias_str(value, &["tag_name", "tagName"]),
            selector: alias_str(value, &["selector"]),
            placeholder: alias_str(value, &["placeholder"]),
            input_type: alias_str(value, &["type"]),
        };
        if descriptor == Self::default() {
            None
        } else {
            Some(descriptor)
        }
    }
}

fn alias_str(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// Loosely-typed view of an `action_recorded.action` object. Every field is
/// optional; the ingestion pipeline decides what is required.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionPayload {
    pub source_id: Option<String>,
    pub action_type: Option<String>,
    pub description: Option<String>,
    pub title: Option<String>,
    pub element: Option<ElementDescriptor>,
    pub screenshot_path: Option<String>,
    pub page_url: Option<String>,
    pub page_title: Option<String>,
    pub timestamp: Option<String>,
    pub fragment: Option<String>,
    pub input_value: Option<String>,
    pub selected_text: Option<String>,
    pub key: Option<String>,
    pub cross_window: bool,
}

impl ActionPayload {
    pub fn from_value(value: &Value) -> Result<Self, RecorderError> {
        if !value.is_object() {
            return Err(RecorderError::Validation(
                "action record is not a json object".to_string(),
            ));
        }
        let additional = additional_data(value);
        Ok(Self {
            source_id: alias_str(value, &["id"]),
            action_type: alias_str(value, &["action_type", "actionType"]),
            description: alias_str(value, &["description"]),
            title: alias_str(value, &["title"]),
            element: value
                .get("element_info")
                .or_else(|| value.get("elementInfo"))
                .and_then(ElementDescriptor::from_value),
            screenshot_path: alias_str(value, &["screenshot_path", "screenshotPath"]),
            page_url: alias_str(value, &["page_url", "pageUrl", "url"]),
            page_title: alias_str(value, &["page_title", "pageTitle"]),
            timestamp: alias_str(value, &["timestamp"]),
            fragment: value
                .get("playwright_code")
                .and_then(Value::as_str)
                .filter(|code| !code.trim().is_empty())
                .map(str::to_string),
            input_value: additional
                .as_ref()
                .and_then(|data| alias_str(data, &["value"])),
            selected_text: additional
                .as_ref()
                .and_then(|data| alias_str(data, &["selectedText", "selected_text"])),
            key: additional.as_ref().and_then(|data| alias_str(data, &["key"])),
            cross_window: value
                .get("is_cross_window")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }
}

/// `additional_data` arrives either as an object or as a JSON-encoded string.
fn additional_data(value: &Value) -> Option<Value> {
    match value.get("additional_data")? {
        Value::String(text) if !text.trim().is_empty() => serde_json::from_str(text).ok(),
        Value::Object(_) => value.get("additional_data").cloned(),
        _ => None,
    }
}
