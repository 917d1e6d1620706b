//! Event Log Writer: durable, append-only cast file.
//!
//! The header is written exactly once when the log is created. Every event is
//! one line, written and synced before [`EventLog::append`] returns, so a crash
//! loses at most the event being written.
//!
//! A failed append cuts the file back to the last complete line and poisons
//! the log, so what is on disk always parses.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use ttycast_core::{encode_event, encode_header, CastError, CastResult, Event, Header};

pub struct EventLog {
    path: PathBuf,
    file: File,
    appended: u64,
    /// File length after the last complete line.
    good_len: u64,
    failed: bool,
}

impl EventLog {
    /// Create (or truncate) `path`, creating parent directories, and write the header.
    pub fn create(path: impl Into<PathBuf>, header: &Header) -> CastResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| log_error(&path, "create directory", e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| log_error(&path, "open", e))?;

        let mut line = encode_header(header)?;
        line.push('\n');
        file.write_all(line.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| log_error(&path, "write header", e))?;

        info!(path = %path.display(), "event log created");
        Ok(Self {
            path,
            file,
            appended: 0,
            good_len: line.len() as u64,
            failed: false,
        })
    }

    /// Append one event and persist it.
    ///
    /// After the first failure every call returns `LogWrite` without touching
    /// the file.
    pub fn append(&mut self, event: &Event) -> CastResult<()> {
        if self.failed {
            return Err(CastError::LogWrite(format!(
                "{} is closed after an earlier write failure",
                self.path.display()
            )));
        }
        let mut line = encode_event(event)?;
        line.push('\n');
        if let Err(e) = self
            .file
            .write_all(line.as_bytes())
            .and_then(|_| self.file.sync_data())
        {
            self.failed = true;
            self.discard_partial_line();
            return Err(log_error(&self.path, "append", e));
        }
        self.good_len += line.len() as u64;
        self.appended += 1;
        Ok(())
    }

    fn discard_partial_line(&mut self) {
        if let Err(e) = self.file.set_len(self.good_len).and_then(|_| self.file.sync_all()) {
            warn!(path = %self.path.display(), error = %e, "could not truncate torn event line");
        }
    }

    /// Final flush. Safe to call on every exit path.
    pub fn close(self) -> CastResult<()> {
        self.file
            .sync_all()
            .map_err(|e| log_error(&self.path, "close", e))?;
        debug!(path = %self.path.display(), events = self.appended, "event log closed");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of events appended so far.
    pub fn appended(&self) -> u64 {
        self.appended
    }
}

fn log_error(path: &Path, action: &str, e: std::io::Error) -> CastError {
    error!(path = %path.display(), error = %e, action, "event log failure");
    CastError::LogWrite(format!("{action} {}: {e}", path.display()))
}
