//! Frame capture and offline replay.
//!
//! A live `record`/`watch` run can append every inbound frame and every
//! connection change to a JSONL capture file (one `CaptureEntry` per line).
//! Replaying the file drives a fresh `RecordingEngine` through the same
//! dispatcher as live traffic, so a session can be reproduced and its script
//! regenerated without a server.

pub mod recorder;
pub mod recording;
pub mod replayer;
