//! PTY-backed child process with a dedicated error channel.
//!
//! The program gets the pty's subordinate side as its controlling terminal,
//! stdin and stdout, and the write end of a fresh pipe as stderr. The parent
//! keeps only the pty master and the pipe's read end, both non-blocking.

use super::terminal;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::pty::{openpty, OpenptyResult};
use nix::sys::signal::{killpg, Signal};
use nix::sys::termios::Termios;
use nix::unistd::{pipe, Pid};
use std::fs::File;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus, Stdio};
use tracing::{debug, info, warn};
use ttycast_core::{CastError, CastResult, WindowSize};

/// A running (or exited) program attached to a pty.
pub struct PtyProcess {
    /// Read side: program output. Write side: forwarded operator input.
    master: File,
    /// Read end of the program's stderr pipe.
    error_reader: File,
    child: Child,
    size: WindowSize,
    status: Option<ExitStatus>,
}

impl PtyProcess {
    /// Spawn `program` with `args` on a new pty of the given size.
    pub fn spawn(program: &str, args: &[String], size: WindowSize) -> CastResult<Self> {
        let ws = libc::winsize {
            ws_row: size.rows,
            ws_col: size.cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let OpenptyResult { master, slave } = openpty(Some(&ws), None::<&Termios>)
            .map_err(|e| CastError::PtyAllocation(format!("failed to open PTY: {e}")))?;

        let (error_read, error_write) = pipe()
            .map_err(|e| CastError::Spawn(format!("failed to create error channel: {e}")))?;

        // Keep the parent's ends out of the child; stdio dup2 clears the flag
        // on the copies the child actually uses.
        for fd in [&master, &slave, &error_read, &error_write] {
            set_cloexec(fd).map_err(|e| CastError::Spawn(format!("fcntl failed: {e}")))?;
        }

        let stdin = slave
            .try_clone()
            .map_err(|e| CastError::Spawn(format!("failed to duplicate pty: {e}")))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::from(slave))
            .stderr(Stdio::from(error_write));

        // SAFETY: only async-signal-safe libc calls run between fork and exec.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                if libc::ioctl(0, libc::TIOCSCTTY as _, 0) == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = cmd
            .spawn()
            .map_err(|e| CastError::Spawn(format!("failed to spawn {program}: {e}")))?;
        // Dropping the command closes the parent's copies of the subordinate
        // side and of the pipe's write end.
        drop(cmd);

        for fd in [&master, &error_read] {
            set_nonblocking(fd).map_err(|e| CastError::Spawn(format!("fcntl failed: {e}")))?;
        }

        info!(pid = child.id(), rows = size.rows, cols = size.cols, program, "PTY spawned");

        Ok(Self {
            master: File::from(master),
            error_reader: File::from(error_read),
            child,
            size,
            status: None,
        })
    }

    pub fn master(&self) -> &File {
        &self.master
    }

    pub fn master_fd(&self) -> BorrowedFd<'_> {
        self.master.as_fd()
    }

    pub fn error_reader(&self) -> &File {
        &self.error_reader
    }

    pub fn error_fd(&self) -> BorrowedFd<'_> {
        self.error_reader.as_fd()
    }

    pub fn pid(&self) -> Pid {
        Pid::from_raw(self.child.id() as i32)
    }

    /// Current pty size as last set by [`PtyProcess::resize`].
    pub fn size(&self) -> WindowSize {
        self.size
    }

    /// Resize the pty so the program sees the operator's dimensions.
    pub fn resize(&mut self, size: WindowSize) -> CastResult<()> {
        terminal::set_window_size(self.master.as_fd(), size)
            .map_err(|e| CastError::Capture(format!("PTY resize failed: {e}")))?;
        self.size = size;
        debug!(rows = size.rows, cols = size.cols, "PTY resized");
        Ok(())
    }

    /// Send `signal` to the program's process group.
    ///
    /// The program is a session leader, so its pid is also its group id.
    pub fn signal_group(&self, signal: Signal) -> nix::Result<()> {
        killpg(self.pid(), signal)
    }

    /// Non-blocking exit check. The status is cached once observed.
    pub fn try_wait(&mut self) -> CastResult<Option<ExitStatus>> {
        if self.status.is_some() {
            return Ok(self.status);
        }
        let status = self.child.try_wait()?;
        if let Some(status) = status {
            info!(code = exit_code(status), "PTY child exited");
            self.status = Some(status);
        }
        Ok(status)
    }

    #[cfg(test)]
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Ask a still-running program to go away. Used when the session ends
    /// for a reason other than the program exiting.
    pub fn hangup(&mut self) {
        match self.try_wait() {
            Ok(Some(_)) => {}
            Ok(None) => {
                if let Err(e) = self.signal_group(Signal::SIGHUP) {
                    debug!(error = %e, "SIGHUP to child group failed");
                }
            }
            Err(e) => warn!(error = %e, "failed to query child status"),
        }
    }
}

/// Shell-style exit code: the program's code, or 128 + signal number.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(sig)) => 128 + sig,
        (None, None) => -1,
    }
}

fn set_cloexec(fd: &OwnedFd) -> nix::Result<()> {
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map(|_| ())
}

fn set_nonblocking(fd: &OwnedFd) -> nix::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)?);
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map(|_| ())
}
