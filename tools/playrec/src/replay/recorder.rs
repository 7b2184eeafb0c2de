//! Appends capture entries while a live channel is running.

use crate::errors::RecorderError;
use crate::replay::recording::{
    CaptureEntry, CaptureStartRecord, ConnectionRecord, FrameRecord, CAPTURE_VERSION,
};
use crate::types::ConnectionState;
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct FrameCapture {
    path: PathBuf,
    writer: BufWriter<File>,
    next_seq: u64,
}

impl FrameCapture {
    /// Opens `path` for appending and writes the `capture_start` header.
    pub fn create(
        path: impl AsRef<Path>,
        recorded_at_ms: u64,
        server: Option<&str>,
    ) -> Result<Self, RecorderError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| RecorderError::Io(e.to_string()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| RecorderError::Io(format!("{}: {e}", path.display())))?;
        let mut capture = Self {
            path,
            writer: BufWriter::new(file),
            next_seq: 1,
        };
        capture.emit(&CaptureEntry::CaptureStart(CaptureStartRecord {
            recorded_at_ms,
            version: CAPTURE_VERSION,
            server: server.map(str::to_string),
        }))?;
        Ok(capture)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_frame(&mut self, frame: &Value, received_at_ms: u64) -> Result<(), RecorderError> {
        let seq = self.bump();
        self.emit(&CaptureEntry::Frame(FrameRecord {
            seq,
            received_at_ms,
            frame: frame.clone(),
        }))
    }

    pub fn record_connection(&mut self, state: ConnectionState) -> Result<(), RecorderError> {
        let seq = self.bump();
        self.emit(&CaptureEntry::Connection(ConnectionRecord { seq, state }))
    }

    fn bump(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Each entry is flushed so a crash loses at most the line being written.
    fn emit(&mut self, entry: &CaptureEntry) -> Result<(), RecorderError> {
        let line = serde_json::to_string(entry).map_err(|e| RecorderError::Io(e.to_string()))?;
        writeln!(self.writer, "{line}")
            .and_then(|()| self.writer.flush())
            .map_err(|e| RecorderError::Io(format!("{}: {e}", self.path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::FrameCapture;
    use crate::types::ConnectionState;
    use serde_json::json;

    #[test]
    fn capture_writes_header_then_sequenced_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("captures").join("live.jsonl");
        let mut capture = FrameCapture::create(&path, 100, Some("ws://localhost/ws")).expect("create");
        capture.record_connection(ConnectionState::Open).expect("connection");
        capture
            .record_frame(&json!({"type": "pong"}), 120)
            .expect("frame");

        let text = std::fs::read_to_string(&path).expect("read capture");
        let lines = text
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line).expect("json line"))
            .collect::<Vec<_>>();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["type"], "capture_start");
        assert_eq!(lines[1]["seq"], 1);
        assert_eq!(lines[2]["type"], "frame");
        assert_eq!(lines[2]["frame"]["type"], "pong");
        assert_eq!(lines[2]["seq"], 2);
    }
}
