//! Operator terminal handling: raw mode, window size, and state sampling.
//!
//! The operator's terminal is put into raw mode for the lifetime of a
//! [`RawModeGuard`] so every keystroke reaches the recorded program. Sizes and
//! line-discipline digests are sampled through a [`TerminalProbe`], which the
//! capture loop polls on every tick.

use nix::sys::termios::{self, SetArg, Termios};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::IsTerminal;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use tracing::{debug, warn};
use ttycast_core::{CastError, CastResult, WindowSize};

nix::ioctl_read_bad!(tiocgwinsz, libc::TIOCGWINSZ, libc::winsize);
nix::ioctl_write_ptr_bad!(tiocswinsz, libc::TIOCSWINSZ, libc::winsize);

/// RAII guard that restores the operator terminal's saved attributes on drop.
///
/// Entering on a descriptor that is not a terminal is a no-op, so the same
/// code path works when input is piped.
pub struct RawModeGuard {
    fd: OwnedFd,
    saved: Option<Termios>,
}

impl RawModeGuard {
    /// Save the current attributes of `fd` and switch it to raw mode.
    pub fn enter(fd: BorrowedFd<'_>) -> CastResult<Self> {
        let owned = fd
            .try_clone_to_owned()
            .map_err(|e| CastError::Capture(format!("failed to duplicate terminal fd: {e}")))?;

        if !owned.is_terminal() {
            debug!("operator input is not a terminal, leaving attributes untouched");
            return Ok(Self {
                fd: owned,
                saved: None,
            });
        }

        let saved = termios::tcgetattr(&owned)
            .map_err(|e| CastError::Capture(format!("tcgetattr failed: {e}")))?;
        let mut raw = saved.clone();
        termios::cfmakeraw(&mut raw);
        termios::tcsetattr(&owned, SetArg::TCSAFLUSH, &raw)
            .map_err(|e| CastError::Capture(format!("failed to enable raw mode: {e}")))?;

        Ok(Self {
            fd: owned,
            saved: Some(saved),
        })
    }

    /// Whether attributes were saved and will be restored.
    pub fn is_active(&self) -> bool {
        self.saved.is_some()
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            // Nothing else can be done if this fails; the operator will need `reset`.
            if let Err(e) = termios::tcsetattr(&self.fd, SetArg::TCSADRAIN, &saved) {
                warn!(error = %e, "failed to restore terminal attributes");
            }
        }
    }
}

/// Read the window size of a terminal descriptor.
///
/// Returns `None` for non-terminals and for terminals reporting a zero size.
pub fn window_size(fd: BorrowedFd<'_>) -> Option<WindowSize> {
    let mut ws = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: `ws` is a valid, writable winsize for the duration of the call.
    unsafe { tiocgwinsz(fd.as_raw_fd(), &mut ws) }.ok()?;
    if ws.ws_row == 0 || ws.ws_col == 0 {
        return None;
    }
    Some(WindowSize::new(ws.ws_row, ws.ws_col))
}

/// Set the window size of a terminal descriptor (used on the pty master).
pub fn set_window_size(fd: BorrowedFd<'_>, size: WindowSize) -> nix::Result<()> {
    let ws = libc::winsize {
        ws_row: size.rows,
        ws_col: size.cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: `ws` outlives the call and the kernel only reads from it.
    unsafe { tiocswinsz(fd.as_raw_fd(), &ws) }.map(|_| ())
}

/// SHA-256 digest of a terminal's line discipline settings.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttrDigest([u8; 32]);

impl AttrDigest {
    pub fn of(attrs: &Termios) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(attrs.input_flags.bits().to_le_bytes());
        hasher.update(attrs.output_flags.bits().to_le_bytes());
        hasher.update(attrs.control_flags.bits().to_le_bytes());
        hasher.update(attrs.local_flags.bits().to_le_bytes());
        hasher.update(&attrs.control_chars[..]);
        Self(hasher.finalize().into())
    }

    #[cfg(test)]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for AttrDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttrDigest({})", hex::encode(&self.0[..8]))
    }
}

/// One observation of terminal state. Unknown values are `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TerminalSample {
    pub size: Option<WindowSize>,
    pub attrs: Option<AttrDigest>,
}

/// Source of terminal state for the monitor.
pub trait TerminalProbe: Send {
    /// Sample the current size and attribute digest. `pty` is the session's
    /// pty master.
    fn sample(&mut self, pty: BorrowedFd<'_>) -> TerminalSample;
}

/// Probe backed by real terminals.
///
/// Size comes from the operator's terminal when it is one (that is the window
/// the operator resizes), otherwise from the pty itself. Attributes always come
/// from the pty: it carries the line discipline the recorded program sets,
/// while the operator's own terminal stays raw for the whole session.
pub struct TtyProbe {
    operator: Option<OwnedFd>,
}

impl TtyProbe {
    /// Build a probe that reads the window size from `operator` if it is a terminal.
    pub fn new(operator: BorrowedFd<'_>) -> Self {
        let operator = if operator.is_terminal() {
            operator.try_clone_to_owned().ok()
        } else {
            None
        };
        Self { operator }
    }
}

impl TerminalProbe for TtyProbe {
    fn sample(&mut self, pty: BorrowedFd<'_>) -> TerminalSample {
        let size = match &self.operator {
            Some(fd) => window_size(fd.as_fd()),
            None => window_size(pty),
        };
        let attrs = termios::tcgetattr(pty).ok().map(|t| AttrDigest::of(&t));
        TerminalSample { size, attrs }
    }
}
