//! Recording sessions: spawn, capture, teardown.
//!
//! A [`Session`] is created when the program is launched and is consumed by
//! [`Session::run`], which always tears down in the same order whatever ended
//! the capture: close the log, end the broadcast, restore the operator
//! terminal, then release the program and its descriptors.

pub mod capture;
pub mod monitor;
pub mod pty;
pub mod recording;
pub mod signals;
pub mod terminal;

pub use capture::{CaptureConfig, Operator};
pub use signals::Notification;
pub use terminal::{TerminalProbe, TtyProbe};

use crate::hub::BroadcastHub;
use capture::{CaptureLoop, CaptureParts};
use pty::PtyProcess;
use recording::EventLog;
use signals::SignalEvents;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{error, info};
use ttycast_core::{CastError, CastResult, Header, WindowSize};

/// Values recorded for environment variables that are not set.
const ENV_FALLBACKS: &[(&str, &str)] = &[("SHELL", "/bin/sh"), ("TERM", "xterm-256color")];

/// Everything needed to launch and record one program.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub program: String,
    pub args: Vec<String>,
    pub output: PathBuf,
    /// Initial pty size, normally the operator's window.
    pub size: WindowSize,
    /// Header `env` contents.
    pub env: BTreeMap<String, String>,
    pub started_at: SystemTime,
    pub capture: CaptureConfig,
    pub signals: Vec<Notification>,
}

impl SessionOptions {
    pub fn new(program: impl Into<String>, args: Vec<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            output: output.into(),
            size: WindowSize::default(),
            env: BTreeMap::new(),
            started_at: SystemTime::now(),
            capture: CaptureConfig::default(),
            signals: Notification::ALL.to_vec(),
        }
    }

    /// The command line as recorded in the header and shown to viewers.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of a completed session.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    /// Program exit code, 128 + signal if it was killed.
    pub exit_code: i32,
    pub path: PathBuf,
    pub events: u64,
}

pub struct Session {
    capture: CaptureLoop,
}

impl Session {
    /// Spawn the program and prepare the log and the operator terminal.
    ///
    /// If the program cannot be started nothing is written.
    pub fn start(
        options: SessionOptions,
        mut operator: Operator,
        probe: Box<dyn TerminalProbe>,
        hub: Option<Arc<BroadcastHub>>,
    ) -> CastResult<Self> {
        let signals = SignalEvents::register_only(&options.signals)
            .map_err(|e| CastError::Capture(format!("failed to register signal handlers: {e}")))?;

        let mut pty = PtyProcess::spawn(&options.program, &options.args, options.size)?;
        let start = Instant::now();

        let header = Header::new(
            options.size,
            epoch_secs(options.started_at),
            options.command_line(),
            options.env.clone(),
        );
        let log = match EventLog::create(&options.output, &header) {
            Ok(log) => log,
            Err(e) => {
                pty.hangup();
                return Err(e);
            }
        };

        if let Err(e) = operator.enter_raw_mode() {
            pty.hangup();
            let _ = log.close();
            return Err(e);
        }

        info!(
            command = %header.command,
            path = %options.output.display(),
            rows = options.size.rows,
            cols = options.size.cols,
            "recording started"
        );

        let capture = CaptureLoop::new(
            pty,
            log,
            hub,
            operator,
            probe,
            signals,
            options.capture,
            start,
        );
        Ok(Self { capture })
    }

    /// Record until the program exits, then tear down.
    pub fn run(self) -> CastResult<SessionOutcome> {
        let mut capture = self.capture;
        let result = capture.run();
        teardown(capture.into_parts(), result)
    }
}

fn teardown(parts: CaptureParts, result: CastResult<()>) -> CastResult<SessionOutcome> {
    let CaptureParts {
        mut pty,
        log,
        hub,
        mut operator,
    } = parts;

    let path = log.path().to_path_buf();
    let events = log.appended();
    let closed = log.close();

    let status = pty.try_wait().ok().flatten();
    let exit_code = status.map(pty::exit_code);
    if let Some(hub) = &hub {
        hub.close(exit_code);
    }

    operator.restore();
    pty.hangup();
    drop(pty);

    if let Err(e) = &result {
        error!(error = %e, path = %path.display(), "session ended abnormally");
    }
    result?;
    closed?;

    info!(?exit_code, events, path = %path.display(), "recording finished");
    Ok(SessionOutcome {
        exit_code: exit_code.unwrap_or(1),
        path,
        events,
    })
}

/// Read the named environment variables for the header.
///
/// `SHELL` and `TERM` fall back to fixed values; other unset names are left out.
pub fn capture_env(names: &[String]) -> BTreeMap<String, String> {
    names
        .iter()
        .filter_map(|name| {
            let value = std::env::var(name).ok().or_else(|| {
                ENV_FALLBACKS
                    .iter()
                    .find(|(key, _)| *key == name.as_str())
                    .map(|(_, value)| value.to_string())
            })?;
            Some((name.clone(), value))
        })
        .collect()
}

fn epoch_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubConfig;
    use std::fs::File;
    use std::io::{self, BufReader, Write};
    use std::sync::Mutex;
    use std::time::Duration;
    use super::terminal::TerminalSample;
    use ttycast_core::{read_cast, Cast, EventKind, ServerMessage, SessionMetadata};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Probe for a terminal that never changes.
    struct FixedProbe;

    impl TerminalProbe for FixedProbe {
        fn sample(&mut self, _pty: std::os::fd::BorrowedFd<'_>) -> TerminalSample {
            TerminalSample {
                size: Some(WindowSize::new(24, 80)),
                attrs: None,
            }
        }
    }

    fn options(dir: &tempfile::TempDir, program: &str, args: &[&str]) -> SessionOptions {
        let mut opts = SessionOptions::new(
            program,
            args.iter().map(|s| s.to_string()).collect(),
            dir.path().join("out/session.cast"),
        );
        opts.size = WindowSize::new(24, 80);
        opts.signals = vec![Notification::ChildExited];
        opts.capture.poll_interval = Duration::from_millis(20);
        opts
    }

    /// Operator whose input is a pipe preloaded with `input` and then closed.
    fn piped_operator(input: &[u8], echo: SharedBuf) -> Operator {
        let (read, write) = nix::unistd::pipe().unwrap();
        let mut writer = File::from(write);
        writer.write_all(input).unwrap();
        drop(writer);
        Operator::new(Some(File::from(read)), Box::new(echo))
    }

    fn run(opts: SessionOptions, operator: Operator, hub: Option<Arc<BroadcastHub>>) -> (SessionOutcome, Cast) {
        let session = Session::start(opts, operator, Box::new(FixedProbe), hub).unwrap();
        let outcome = session.run().unwrap();
        let cast = read_cast(BufReader::new(File::open(&outcome.path).unwrap())).unwrap();
        (outcome, cast)
    }

    fn joined(cast: &Cast, kind: EventKind) -> String {
        cast.events
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.payload.as_str())
            .collect()
    }

    #[test]
    fn echo_session_records_output_and_exit() {
        let dir = tempfile::tempdir().unwrap();
        let echo = SharedBuf::default();
        let operator = Operator::new(None, Box::new(echo.clone()));
        let (outcome, cast) = run(options(&dir, "/bin/echo", &["hello"]), operator, None);

        assert_eq!(outcome.exit_code, 0);
        assert_eq!(cast.header.command, "/bin/echo hello");
        assert_eq!(cast.header.version, 2);
        assert_eq!((cast.header.width, cast.header.height), (80, 24));
        assert_eq!(joined(&cast, EventKind::Output), "hello\r\n");
        assert!(cast.events.iter().all(|e| e.kind == EventKind::Output));
        assert_eq!(echo.contents(), "hello\r\n");
        assert_eq!(outcome.events, cast.events.len() as u64);
    }

    #[test]
    fn stderr_is_recorded_separately_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let echo = SharedBuf::default();
        let script = "for i in 1 2 3; do echo out$i; echo err$i 1>&2; done";
        let operator = Operator::new(None, Box::new(echo.clone()));
        let (outcome, cast) = run(options(&dir, "/bin/sh", &["-c", script]), operator, None);

        assert_eq!(outcome.exit_code, 0);
        assert_eq!(joined(&cast, EventKind::Output), "out1\r\nout2\r\nout3\r\n");
        assert_eq!(joined(&cast, EventKind::Error), "err1\nerr2\nerr3\n");
        assert!(cast.events.windows(2).all(|w| w[0].time <= w[1].time));

        // The operator still sees both streams.
        let seen = echo.contents();
        assert!(seen.contains("out2\r\n") && seen.contains("err2\n"));
    }

    #[test]
    fn operator_input_is_forwarded_and_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let echo = SharedBuf::default();
        let operator = piped_operator(b"hello\n\x04", echo.clone());
        let (outcome, cast) = run(options(&dir, "/bin/cat", &[]), operator, None);

        assert_eq!(outcome.exit_code, 0);
        assert_eq!(joined(&cast, EventKind::Input), "hello\n\u{4}");
        assert!(joined(&cast, EventKind::Output).contains("hello"));
        let first_input = cast.events.iter().position(|e| e.kind == EventKind::Input);
        assert_eq!(first_input, Some(0));
    }

    #[test]
    fn nonzero_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let operator = Operator::new(None, Box::new(io::sink()));
        let (outcome, _) = run(options(&dir, "/bin/sh", &["-c", "exit 7"]), operator, None);
        assert_eq!(outcome.exit_code, 7);
    }

    #[test]
    fn spawn_failure_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(&dir, "/nonexistent/program", &[]);
        let path = opts.output.clone();
        let operator = Operator::new(None, Box::new(io::sink()));
        let err = match Session::start(opts, operator, Box::new(FixedProbe), None) {
            Err(e) => e,
            Ok(_) => panic!("start should fail"),
        };
        assert!(matches!(err, CastError::Spawn(_)));
        assert!(!path.exists());
    }

    #[test]
    fn hub_receives_events_and_end_of_session() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(&dir, "/bin/echo", &["live"]);
        let hub = Arc::new(BroadcastHub::new(
            HubConfig {
                buffer_size: 100,
                viewer_queue: 100,
            },
            SessionMetadata {
                session_id: "rec_1".into(),
                start_time: 0.0,
                shell_command: opts.command_line(),
                recording_file: opts.output.display().to_string(),
            },
            opts.size,
        ));
        let mut viewer = hub.join();
        let operator = Operator::new(None, Box::new(io::sink()));
        let (outcome, cast) = run(opts, operator, Some(Arc::clone(&hub)));

        let mut live = String::new();
        let mut ended = None;
        while let Ok(msg) = viewer.rx.try_recv() {
            match msg {
                ServerMessage::TerminalData(wire) => live.push_str(&wire.data),
                ServerMessage::SessionEvent { exit_code, .. } => ended = exit_code,
                _ => {}
            }
        }
        assert_eq!(live, joined(&cast, EventKind::Output));
        assert_eq!(ended, Some(outcome.exit_code));
        assert!(hub.is_closed());
    }

    #[test]
    fn env_capture_applies_fallbacks() {
        let names = vec!["SHELL".to_string(), "TTYCAST_SURELY_UNSET_VAR".to_string()];
        let env = capture_env(&names);
        assert!(env.contains_key("SHELL"));
        assert!(!env.contains_key("TTYCAST_SURELY_UNSET_VAR"));
    }

    #[test]
    fn command_line_joins_args() {
        let opts = SessionOptions::new("/bin/sh", vec!["-c".into(), "true".into()], "x.cast");
        assert_eq!(opts.command_line(), "/bin/sh -c true");
    }
}
