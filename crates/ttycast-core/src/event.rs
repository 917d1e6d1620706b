//! The session event model.
//!
//! Every byte the operator types, every byte the recorded program writes,
//! and every observed terminal state change becomes one [`Event`]. Events are
//! produced by a single writer and are immutable once created.

use crate::error::{CastError, CastResult};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Session-relative time with millisecond resolution.
///
/// Stored as whole milliseconds so that the three-decimal text form is exact
/// and survives a write/read cycle without float drift.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Round an elapsed duration to the nearest millisecond.
    pub fn from_elapsed(elapsed: Duration) -> Self {
        let micros = elapsed.as_micros();
        Self(((micros + 500) / 1000) as u64)
    }

    /// Parse a seconds value as found in a cast file.
    pub fn from_secs_f64(secs: f64) -> CastResult<Self> {
        if !secs.is_finite() || secs < 0.0 {
            return Err(CastError::Codec(format!("invalid timestamp: {secs}")));
        }
        Ok(Self((secs * 1000.0).round() as u64))
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }

    /// Milliseconds from `earlier` to `self`, zero if `earlier` is later.
    pub fn millis_since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.0 / 1000, self.0 % 1000)
    }
}

/// Terminal dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
}

impl WindowSize {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// Rows first, matching the resize payload: `30x100`.
impl fmt::Display for WindowSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

impl FromStr for WindowSize {
    type Err = CastError;

    fn from_str(s: &str) -> CastResult<Self> {
        let (rows, cols) = s
            .split_once('x')
            .ok_or_else(|| CastError::Codec(format!("invalid resize payload: {s:?}")))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u16>()
                .map_err(|_| CastError::Codec(format!("invalid resize payload: {s:?}")))
        };
        Ok(Self {
            rows: parse(rows)?,
            cols: parse(cols)?,
        })
    }
}

/// What an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Bytes typed by the operator, before they reach the program.
    Input,
    /// Bytes read from the pty master.
    Output,
    /// Bytes read from the program's dedicated error channel.
    Error,
    /// New terminal dimensions.
    Resize,
    /// A navigation tag such as `terminal_attrs_changed`.
    Marker,
}

impl EventKind {
    /// Single-letter code used in the cast file and on the wire.
    pub fn code(self) -> &'static str {
        match self {
            EventKind::Input => "i",
            EventKind::Output => "o",
            EventKind::Error => "e",
            EventKind::Resize => "r",
            EventKind::Marker => "m",
        }
    }

    /// Inverse of [`EventKind::code`]. Unknown codes yield `None` so readers
    /// can skip event types they do not understand.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "i" => Some(EventKind::Input),
            "o" => Some(EventKind::Output),
            "e" => Some(EventKind::Error),
            "r" => Some(EventKind::Resize),
            "m" => Some(EventKind::Marker),
            _ => None,
        }
    }
}

/// A single recorded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub time: Timestamp,
    pub kind: EventKind,
    pub payload: String,
}

impl Event {
    pub fn new(time: Timestamp, kind: EventKind, payload: impl Into<String>) -> Self {
        Self {
            time,
            kind,
            payload: payload.into(),
        }
    }

    pub fn resize(time: Timestamp, size: WindowSize) -> Self {
        Self::new(time, EventKind::Resize, size.to_string())
    }

    pub fn marker(time: Timestamp, label: impl Into<String>) -> Self {
        Self::new(time, EventKind::Marker, label)
    }

    /// The dimensions carried by a resize event.
    pub fn window_size(&self) -> Option<WindowSize> {
        match self.kind {
            EventKind::Resize => self.payload.parse().ok(),
            _ => None,
        }
    }
}

/// Marker emitted when the terminal's line discipline settings change.
pub const MARKER_ATTRS_CHANGED: &str = "terminal_attrs_changed";

/// Marker emitted before the first event that follows an idle gap.
///
/// The gap is printed with one decimal: `activity_resumed_after_6.3s`.
pub fn activity_resumed_marker(gap_ms: u64) -> String {
    format!("activity_resumed_after_{:.1}s", gap_ms as f64 / 1000.0)
}

/// Incremental UTF-8 decoder for a byte stream that arrives in chunks.
///
/// A multi-byte sequence split across reads is held back until it completes;
/// bytes that can never form valid UTF-8 become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Stream {
    pending: Vec<u8>,
}

impl Utf8Stream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `pending + data` as possible.
    pub fn decode(&mut self, data: &[u8]) -> String {
        self.pending.extend_from_slice(data);
        let mut out = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        // Incomplete sequence at the end: keep it for the next chunk.
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let remaining = rest.to_vec();
        self.pending = remaining;
        out
    }

    /// Flush any incomplete trailing bytes as replacement characters.
    pub fn finish(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
