//! Broadcast Hub: live fan-out of session events to remote viewers.
//!
//! The capture loop calls [`BroadcastHub::publish`] for every event. Publishing
//! takes one short lock, records the event in the backlog and `try_send`s it to
//! every viewer queue; a viewer whose queue is full is dropped on the spot, so
//! publishing never waits on the network.
//!
//! Joining takes the same lock once: the backlog snapshot and the viewer's
//! registration happen together, so every event is either in the catch-up
//! batch or delivered live, never both and never neither.

pub mod ring_buffer;
pub mod viewer;

use ring_buffer::EventRing;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use ttycast_core::messages::BufferInfo;
use ttycast_core::{
    Event, ServerMessage, SessionMetadata, SessionNotice, TerminalSize, WindowSize, WireEvent,
};

pub use viewer::serve_viewer;

/// Lifecycle of one viewer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ViewerState {
    Joining = 0,
    Syncing = 1,
    Live = 2,
    Closed = 3,
}

/// Shared, lock-free view of a viewer's state.
#[derive(Debug)]
pub struct ViewerStateCell(AtomicU8);

impl ViewerStateCell {
    fn new(state: ViewerState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> ViewerState {
        match self.0.load(Ordering::Acquire) {
            0 => ViewerState::Joining,
            1 => ViewerState::Syncing,
            2 => ViewerState::Live,
            _ => ViewerState::Closed,
        }
    }

    fn set(&self, state: ViewerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Hub sizing.
#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    /// Backlog capacity in events.
    pub buffer_size: usize,
    /// Per-viewer outgoing queue bound in messages.
    pub viewer_queue: usize,
}

struct ViewerSlot {
    id: u64,
    tx: mpsc::Sender<ServerMessage>,
    state: Arc<ViewerStateCell>,
}

struct HubInner {
    ring: EventRing,
    metadata: SessionMetadata,
    size: WindowSize,
    viewers: Vec<ViewerSlot>,
    next_id: u64,
    /// Set once the session is over; holds the program's exit code.
    ended: Option<Option<i32>>,
}

pub struct BroadcastHub {
    inner: Mutex<HubInner>,
    viewer_queue: usize,
}

/// What a joining viewer gets: the catch-up message and its live queue.
pub struct ViewerHandle {
    pub id: u64,
    pub sync: ServerMessage,
    pub rx: mpsc::Receiver<ServerMessage>,
    state: Arc<ViewerStateCell>,
}

impl ViewerHandle {
    pub fn state(&self) -> ViewerState {
        self.state.get()
    }

    /// The catch-up batch has been delivered.
    pub fn mark_live(&self) {
        if self.state.get() == ViewerState::Syncing {
            self.state.set(ViewerState::Live);
        }
    }
}

impl BroadcastHub {
    pub fn new(config: HubConfig, metadata: SessionMetadata, size: WindowSize) -> Self {
        Self {
            inner: Mutex::new(HubInner {
                ring: EventRing::new(config.buffer_size),
                metadata,
                size,
                viewers: Vec::new(),
                next_id: 0,
                ended: None,
            }),
            viewer_queue: config.viewer_queue.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        // A panic while holding the lock leaves the state consistent enough to
        // keep broadcasting.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record `event` and enqueue it for every live viewer.
    pub fn publish(&self, event: &Event) {
        let mut inner = self.lock();
        if let Some(size) = event.window_size() {
            inner.size = size;
        }
        let seq = inner.ring.push(event.clone());
        if inner.viewers.is_empty() {
            return;
        }
        let message = ServerMessage::TerminalData(WireEvent::new(seq, event));
        inner.fan_out(&message);
    }

    /// Snapshot the backlog and subscribe a new viewer in one critical section.
    pub fn join(&self) -> ViewerHandle {
        let state = Arc::new(ViewerStateCell::new(ViewerState::Joining));
        let (tx, rx) = mpsc::channel(self.viewer_queue);

        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;

        let snapshot = inner.ring.snapshot();
        let recent_output: Vec<WireEvent> = snapshot
            .events
            .iter()
            .map(|(seq, ev)| WireEvent::new(*seq, ev))
            .collect();
        let sync = ServerMessage::TerminalSync {
            session_metadata: inner.metadata.clone(),
            terminal_size: TerminalSize::from(inner.size),
            replay: true,
            buffer_info: BufferInfo {
                total_events: snapshot.total,
                showing_recent: recent_output.len(),
                omitted: snapshot.omitted,
                sync_time: epoch_secs(),
            },
            recent_output,
        };
        state.set(ViewerState::Syncing);

        if let Some(exit_code) = inner.ended {
            // Too late to subscribe: history plus the final notice, then the queue ends.
            let _ = tx.try_send(ended_notice(exit_code));
            drop(tx);
        } else {
            inner.viewers.push(ViewerSlot {
                id,
                tx,
                state: Arc::clone(&state),
            });
            let notice = ServerMessage::SessionEvent {
                event: SessionNotice::ClientConnected,
                viewers: Some(inner.viewers.len()),
                exit_code: None,
            };
            inner.fan_out(&notice);
            info!(viewer = id, viewers = inner.viewers.len(), omitted = snapshot.omitted, "viewer joined");
        }

        ViewerHandle {
            id,
            sync,
            rx,
            state,
        }
    }

    /// Remove a viewer; its queue closes once drained.
    pub fn leave(&self, id: u64) {
        let mut inner = self.lock();
        if let Some(pos) = inner.viewers.iter().position(|v| v.id == id) {
            let slot = inner.viewers.remove(pos);
            slot.state.set(ViewerState::Closed);
            debug!(viewer = id, viewers = inner.viewers.len(), "viewer left");
        }
    }

    /// End the session for every viewer: send `session_ended` and release the queues.
    pub fn close(&self, exit_code: Option<i32>) {
        let mut inner = self.lock();
        if inner.ended.is_some() {
            return;
        }
        inner.ended = Some(exit_code);
        let notice = ended_notice(exit_code);
        for slot in inner.viewers.drain(..) {
            if slot.tx.try_send(notice.clone()).is_err() {
                debug!(viewer = slot.id, "viewer queue full at session end");
            }
            slot.state.set(ViewerState::Closed);
        }
        info!(?exit_code, "broadcast hub closed");
    }

    pub fn viewer_count(&self) -> usize {
        self.lock().viewers.len()
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.lock().ended.is_some()
    }
}

impl HubInner {
    /// Offer `message` to every viewer, dropping those that cannot keep up.
    fn fan_out(&mut self, message: &ServerMessage) {
        self.viewers.retain(|slot| match slot.tx.try_send(message.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(viewer = slot.id, "viewer queue full, dropping viewer");
                slot.state.set(ViewerState::Closed);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(viewer = slot.id, "viewer gone");
                slot.state.set(ViewerState::Closed);
                false
            }
        });
    }
}

fn ended_notice(exit_code: Option<i32>) -> ServerMessage {
    ServerMessage::SessionEvent {
        event: SessionNotice::SessionEnded,
        viewers: None,
        exit_code,
    }
}

fn epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
