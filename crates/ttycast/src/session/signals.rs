//! Process signals turned into values the capture loop polls.
//!
//! Handlers only set a flag and write a byte to a self-pipe. The loop waits on
//! the pipe's read end alongside its other sources and calls
//! [`SignalEvents::take`] to learn what happened.

use signal_hook::consts::{SIGCHLD, SIGINT, SIGUSR1, SIGWINCH};
use signal_hook::SigId;
use std::io::{self, Read};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Something the process was told since the last [`SignalEvents::take`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Notification {
    /// `SIGINT`: forward an interrupt to the recorded program.
    Interrupt,
    /// `SIGWINCH`: the operator resized their window.
    WindowChanged,
    /// `SIGUSR1`: insert a custom marker.
    UserMark,
    /// `SIGCHLD`: the recorded program may have exited.
    ChildExited,
}

impl Notification {
    /// Every notification, in the order `take` reports them.
    pub const ALL: [Notification; 4] = [
        Notification::Interrupt,
        Notification::WindowChanged,
        Notification::UserMark,
        Notification::ChildExited,
    ];

    fn signal(self) -> libc::c_int {
        match self {
            Notification::Interrupt => SIGINT,
            Notification::WindowChanged => SIGWINCH,
            Notification::UserMark => SIGUSR1,
            Notification::ChildExited => SIGCHLD,
        }
    }
}

/// Registered signal handlers plus the self-pipe they wake.
///
/// Handlers are removed when this is dropped.
pub struct SignalEvents {
    flags: Vec<(Notification, Arc<AtomicBool>)>,
    ids: Vec<SigId>,
    wake: UnixStream,
}

impl SignalEvents {
    /// Register handlers for a subset of notifications.
    pub fn register_only(wanted: &[Notification]) -> io::Result<Self> {
        let (wake, wake_writer) = UnixStream::pair()?;
        wake.set_nonblocking(true)?;
        wake_writer.set_nonblocking(true)?;

        let mut events = Self {
            flags: Vec::with_capacity(wanted.len()),
            ids: Vec::with_capacity(wanted.len() * 2),
            wake,
        };
        for &notification in wanted {
            let flag = Arc::new(AtomicBool::new(false));
            let signal = notification.signal();
            events
                .ids
                .push(signal_hook::flag::register(signal, Arc::clone(&flag))?);
            events.ids.push(signal_hook::low_level::pipe::register(
                signal,
                wake_writer.try_clone()?,
            )?);
            events.flags.push((notification, flag));
        }
        debug!(count = wanted.len(), "signal handlers registered");
        Ok(events)
    }

    /// Descriptor that becomes readable when any handled signal arrives.
    pub fn wake_fd(&self) -> BorrowedFd<'_> {
        self.wake.as_fd()
    }

    /// Drain the wake pipe and return the notifications raised since the last call.
    pub fn take(&mut self) -> Vec<Notification> {
        let mut buf = [0u8; 64];
        loop {
            match (&self.wake).read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        self.flags
            .iter()
            .filter(|(_, flag)| flag.swap(false, Ordering::AcqRel))
            .map(|(notification, _)| *notification)
            .collect()
    }
}

impl Drop for SignalEvents {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}
