//! Live viewer protocol messages.
//!
//! JSON text frames, internally tagged by `type`. The recorder sends one
//! `terminal_sync` catch-up message per viewer, then one `terminal_data`
//! message per event, plus `session_event` lifecycle notices. Viewers may
//! send `client_hello` and display-only `resize` hints.

use crate::event::{Event, WindowSize};
use serde::{Deserialize, Serialize};

/// Static facts about the recording, shown to viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    /// Session start, seconds since the Unix epoch.
    pub start_time: f64,
    pub shell_command: String,
    pub recording_file: String,
}

/// Terminal dimensions as viewers expect them (columns, rows).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub width: u16,
    pub height: u16,
}

impl From<WindowSize> for TerminalSize {
    fn from(size: WindowSize) -> Self {
        Self {
            width: size.cols,
            height: size.rows,
        }
    }
}

impl From<TerminalSize> for WindowSize {
    fn from(size: TerminalSize) -> Self {
        WindowSize::new(size.height, size.width)
    }
}

/// One event as carried to viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    /// Position in the session's event sequence, starting at 0.
    pub seq: u64,
    /// Seconds since session start.
    pub timestamp: f64,
    pub event_type: String,
    pub data: String,
}

impl WireEvent {
    pub fn new(seq: u64, event: &Event) -> Self {
        Self {
            seq,
            timestamp: event.time.as_secs_f64(),
            event_type: event.kind.code().to_string(),
            data: event.payload.clone(),
        }
    }
}

/// Describes the catch-up batch relative to the whole session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferInfo {
    /// Events produced since the session started.
    pub total_events: u64,
    /// Events included in this batch.
    pub showing_recent: usize,
    /// Events evicted from the backlog before this viewer joined.
    pub omitted: u64,
    /// Wall-clock time the snapshot was taken, epoch seconds.
    pub sync_time: f64,
}

/// Lifecycle notices delivered out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionNotice {
    ClientConnected,
    SessionEnded,
}

/// Recorder → viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    TerminalSync {
        session_metadata: SessionMetadata,
        terminal_size: TerminalSize,
        /// Always true: the batch is history, not live output.
        replay: bool,
        recent_output: Vec<WireEvent>,
        buffer_info: BufferInfo,
    },
    TerminalData(WireEvent),
    SessionEvent {
        event: SessionNotice,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        viewers: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
}

/// Viewer → recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    ClientHello,
    /// The viewer's display size. Informational only.
    Resize { width: u16, height: u16 },
}
