//! Terminal State Monitor: size/attribute change detection and idle-gap markers.

use super::terminal::{AttrDigest, TerminalSample};
use ttycast_core::event::{activity_resumed_marker, MARKER_ATTRS_CHANGED};
use ttycast_core::{Event, EventKind, Timestamp, WindowSize};

/// Last known terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalFingerprint {
    pub size: WindowSize,
    pub attrs: Option<AttrDigest>,
}

/// A change detected by [`TerminalMonitor::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    Resized(WindowSize),
    AttrsChanged,
}

impl StateChange {
    pub fn into_event(self, time: Timestamp) -> Event {
        match self {
            StateChange::Resized(size) => Event::resize(time, size),
            StateChange::AttrsChanged => Event::marker(time, MARKER_ATTRS_CHANGED),
        }
    }
}

pub struct TerminalMonitor {
    fingerprint: TerminalFingerprint,
    idle_threshold_ms: u64,
    last_activity: Option<Timestamp>,
}

impl TerminalMonitor {
    pub fn new(initial: TerminalFingerprint, idle_threshold_ms: u64) -> Self {
        Self {
            fingerprint: initial,
            idle_threshold_ms,
            last_activity: None,
        }
    }

    #[cfg(test)]
    pub fn fingerprint(&self) -> TerminalFingerprint {
        self.fingerprint
    }

    /// Compare a fresh sample against the fingerprint and adopt it.
    ///
    /// Unknown values never count as a change. An attribute digest seen for
    /// the first time becomes the baseline silently.
    pub fn observe(&mut self, sample: TerminalSample) -> Vec<StateChange> {
        let mut changes = Vec::new();

        if let Some(size) = sample.size {
            if size != self.fingerprint.size {
                self.fingerprint.size = size;
                changes.push(StateChange::Resized(size));
            }
        }

        if let Some(attrs) = sample.attrs {
            match self.fingerprint.attrs {
                Some(previous) if previous != attrs => changes.push(StateChange::AttrsChanged),
                _ => {}
            }
            self.fingerprint.attrs = Some(attrs);
        }

        changes
    }

    /// Called before every event is emitted.
    ///
    /// Returns a marker to insert first when a non-marker event follows an
    /// idle gap of at least the threshold. Markers neither trigger nor reset
    /// the gap, and nothing is inserted before the first event.
    pub fn idle_marker(&mut self, time: Timestamp, kind: EventKind) -> Option<Event> {
        if kind == EventKind::Marker {
            return None;
        }
        let previous = self.last_activity.replace(time)?;
        let gap = time.millis_since(previous);
        if gap >= self.idle_threshold_ms {
            Some(Event::marker(time, activity_resumed_marker(gap)))
        } else {
            None
        }
    }
}
