//! Serializable capture entries. A capture is a JSONL file where each line
//! is one `CaptureEntry` object.

use crate::types::ConnectionState;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CAPTURE_VERSION: u32 = 1;

// ── CaptureEntry ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaptureEntry {
    CaptureStart(CaptureStartRecord),
    Frame(FrameRecord),
    Connection(ConnectionRecord),
}

// ── Concrete record types ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStartRecord {
    pub recorded_at_ms: u64,
    pub version: u32,
    #[serde(default)]
    pub server: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub seq: u64,
    pub received_at_ms: u64,
    /// The inbound JSON object exactly as decoded.
    pub frame: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub seq: u64,
    pub state: ConnectionState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_use_snake_case_type_tags() {
        let entry = CaptureEntry::Connection(ConnectionRecord {
            seq: 2,
            state: ConnectionState::Open,
        });
        let json = serde_json::to_string(&entry).expect("serialize");
        assert_eq!(json, r#"{"type":"connection","seq":2,"state":"open"}"#);
    }

    #[test]
    fn capture_start_tolerates_missing_server() {
        let entry: CaptureEntry =
            serde_json::from_str(r#"{"type":"capture_start","recorded_at_ms":5,"version":1}"#)
                .expect("deserialize");
        assert!(matches!(entry, CaptureEntry::CaptureStart(start) if start.server.is_none()));
    }
}
