//! Capture Loop: readiness-driven multiplexer over every live source.
//!
//! One thread, one `poll(2)` per iteration. Ready sources are serviced in a
//! fixed order so the event sequence is exactly the order of observation:
//!
//! 1. error channel (drained)
//! 2. pty output (drained)
//! 3. pending operator input flushed to the pty
//! 4. operator input
//! 5. signal notifications
//! 6. monitor tick
//! 7. child exit check
//!
//! This loop is the only place events are timestamped. Each event goes to the
//! log first (durable) and then to the hub (non-blocking).

use super::monitor::{TerminalFingerprint, TerminalMonitor};
use super::pty::PtyProcess;
use super::recording::EventLog;
use super::signals::{Notification, SignalEvents};
use super::terminal::{RawModeGuard, TerminalProbe};
use crate::hub::BroadcastHub;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::Signal;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};
use ttycast_core::{CastError, CastResult, Event, EventKind, Timestamp, Utf8Stream};

const READ_CHUNK: usize = 8192;

/// Interrupt keystroke recorded when `SIGINT` reaches the recorder.
const INTERRUPT: &str = "\u{3}";

/// Tunables for the loop.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// How often the terminal state is polled.
    pub poll_interval: Duration,
    /// Minimum quiet period before an `activity_resumed_after_*` marker.
    pub idle_threshold: Duration,
    /// Base label for markers requested with `SIGUSR1`.
    pub mark_label: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            idle_threshold: Duration::from_secs(5),
            mark_label: "user_mark".to_string(),
        }
    }
}

/// The human at the keyboard: where input comes from and where echo goes.
pub struct Operator {
    pub input: Option<File>,
    pub output: Box<dyn Write + Send>,
    raw: Option<RawModeGuard>,
}

impl Operator {
    pub fn new(input: Option<File>, output: Box<dyn Write + Send>) -> Self {
        Self {
            input,
            output,
            raw: None,
        }
    }

    /// The process's own stdin and stdout.
    pub fn stdio() -> CastResult<Self> {
        let input = io::stdin()
            .as_fd()
            .try_clone_to_owned()
            .map_err(|e| CastError::Capture(format!("failed to duplicate stdin: {e}")))?;
        Ok(Self::new(Some(File::from(input)), Box::new(io::stdout())))
    }

    /// Put the input terminal in raw mode until teardown. No-op for non-terminals.
    pub fn enter_raw_mode(&mut self) -> CastResult<()> {
        if let Some(input) = &self.input {
            let guard = RawModeGuard::enter(input.as_fd())?;
            if guard.is_active() {
                debug!("operator terminal in raw mode");
            }
            self.raw = Some(guard);
        }
        Ok(())
    }

    /// Restore the saved terminal attributes now rather than at drop.
    pub fn restore(&mut self) {
        self.raw.take();
    }

    fn input_fd(&self) -> Option<BorrowedFd<'_>> {
        self.input.as_ref().map(|f| f.as_fd())
    }

    fn echo(&mut self, data: &[u8]) -> CastResult<()> {
        self.output
            .write_all(data)
            .and_then(|_| self.output.flush())
            .map_err(|e| CastError::Capture(format!("operator terminal write failed: {e}")))
    }
}

/// Which sources `poll` reported ready.
#[derive(Debug, Default, Clone, Copy)]
struct Readiness {
    errors: bool,
    output: bool,
    writable: bool,
    input: bool,
    signals: bool,
}

/// Everything the loop owned, handed back for teardown.
pub struct CaptureParts {
    pub pty: PtyProcess,
    pub log: EventLog,
    pub hub: Option<Arc<BroadcastHub>>,
    pub operator: Operator,
}

pub struct CaptureLoop {
    pty: PtyProcess,
    log: EventLog,
    hub: Option<Arc<BroadcastHub>>,
    operator: Operator,
    probe: Box<dyn TerminalProbe>,
    signals: SignalEvents,
    monitor: TerminalMonitor,
    config: CaptureConfig,

    start: Instant,
    last_time: Timestamp,
    last_tick: Instant,

    output_text: Utf8Stream,
    error_text: Utf8Stream,
    input_text: Utf8Stream,
    pending_input: Vec<u8>,

    output_closed: bool,
    error_closed: bool,
    input_closed: bool,
    terminating: bool,
    marks: u64,
}

impl CaptureLoop {
    /// Build the loop. `start` is the session's time origin.
    pub fn new(
        pty: PtyProcess,
        log: EventLog,
        hub: Option<Arc<BroadcastHub>>,
        operator: Operator,
        mut probe: Box<dyn TerminalProbe>,
        signals: SignalEvents,
        config: CaptureConfig,
        start: Instant,
    ) -> Self {
        let baseline = probe.sample(pty.master_fd());
        let monitor = TerminalMonitor::new(
            TerminalFingerprint {
                size: baseline.size.unwrap_or_else(|| pty.size()),
                attrs: baseline.attrs,
            },
            config.idle_threshold.as_millis() as u64,
        );

        let input_closed = operator.input.is_none();
        Self {
            pty,
            log,
            hub,
            operator,
            probe,
            signals,
            monitor,
            config,
            start,
            last_time: Timestamp::ZERO,
            last_tick: Instant::now(),
            output_text: Utf8Stream::new(),
            error_text: Utf8Stream::new(),
            input_text: Utf8Stream::new(),
            pending_input: Vec::new(),
            output_closed: false,
            error_closed: false,
            input_closed,
            terminating: false,
            marks: 0,
        }
    }

    /// Run until the program exits or a fatal error occurs.
    ///
    /// Readable data is drained on every exit path that can still read.
    pub fn run(&mut self) -> CastResult<()> {
        let result = self.run_until_exit();
        if let Err(e) = &result {
            warn!(error = %e, "capture loop stopping on error");
            // Nothing more can be recorded.
            if matches!(e, CastError::LogWrite(_)) {
                return result;
            }
        }
        let drained = self.final_drain();
        result.and(drained)
    }

    pub fn into_parts(self) -> CaptureParts {
        CaptureParts {
            pty: self.pty,
            log: self.log,
            hub: self.hub,
            operator: self.operator,
        }
    }

    fn run_until_exit(&mut self) -> CastResult<()> {
        info!(pid = %self.pty.pid(), "capture loop started");
        loop {
            if self.terminating {
                break;
            }

            let ready = self.wait()?;

            if ready.errors {
                self.drain_errors()?;
            }
            if ready.output {
                self.drain_output()?;
            }
            if ready.writable {
                self.flush_input()?;
            }
            if ready.input {
                self.read_input()?;
            }
            if ready.signals {
                for notification in self.signals.take() {
                    self.notify(notification)?;
                }
            }
            if self.last_tick.elapsed() >= self.config.poll_interval {
                self.last_tick = Instant::now();
                self.poll_terminal()?;
            }
            if self.pty.try_wait()?.is_some() {
                self.terminating = true;
            }
        }
        debug!(events = self.log.appended(), "capture loop finished");
        Ok(())
    }

    /// Block until a source is ready or the next tick is due.
    fn wait(&self) -> CastResult<Readiness> {
        let until_tick = self
            .config
            .poll_interval
            .saturating_sub(self.last_tick.elapsed());
        let timeout = PollTimeout::from(until_tick.as_millis().min(u16::MAX as u128) as u16);

        let mut fds: Vec<PollFd<'_>> = Vec::with_capacity(4);
        let errors = (!self.error_closed).then(|| push(&mut fds, self.pty.error_fd(), PollFlags::POLLIN));
        let output = (!self.output_closed).then(|| {
            let mut flags = PollFlags::POLLIN;
            if !self.pending_input.is_empty() {
                flags |= PollFlags::POLLOUT;
            }
            push(&mut fds, self.pty.master_fd(), flags)
        });
        let input = match self.operator.input_fd() {
            Some(fd) if !self.input_closed => Some(push(&mut fds, fd, PollFlags::POLLIN)),
            _ => None,
        };
        let signals = push(&mut fds, self.signals.wake_fd(), PollFlags::POLLIN);

        match poll(&mut fds, timeout) {
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok(Readiness::default()),
            Err(e) => return Err(CastError::Capture(format!("poll failed: {e}"))),
        }

        let revents = |idx: Option<usize>| {
            idx.and_then(|i| fds[i].revents())
                .unwrap_or_else(PollFlags::empty)
        };
        let readable = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
        Ok(Readiness {
            errors: revents(errors).intersects(readable),
            output: revents(output).intersects(readable),
            writable: revents(output).contains(PollFlags::POLLOUT),
            input: revents(input).intersects(readable),
            signals: revents(Some(signals)).intersects(readable),
        })
    }

    fn now(&self) -> Timestamp {
        Timestamp::from_elapsed(self.start.elapsed()).max(self.last_time)
    }

    /// Timestamp and record one event, preceded by an idle marker if due.
    fn emit(&mut self, kind: EventKind, payload: String) -> CastResult<()> {
        let time = self.now();
        self.emit_at(Event::new(time, kind, payload))
    }

    fn emit_at(&mut self, event: Event) -> CastResult<()> {
        if let Some(marker) = self.monitor.idle_marker(event.time, event.kind) {
            self.record(marker)?;
        }
        self.record(event)
    }

    fn record(&mut self, event: Event) -> CastResult<()> {
        trace!(time = %event.time, kind = event.kind.code(), len = event.payload.len(), "event");
        self.log.append(&event)?;
        if let Some(hub) = &self.hub {
            hub.publish(&event);
        }
        self.last_time = event.time;
        Ok(())
    }

    /// Reading the error channel never fails the session: the program may
    /// close stderr early. Echo and log failures are fatal as for output.
    fn drain_errors(&mut self) -> CastResult<()> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match self.pty.error_reader().read(&mut buf) {
                Ok(0) => {
                    debug!("error channel closed");
                    self.error_closed = true;
                    return Ok(());
                }
                Ok(n) => self.on_error_bytes(&buf[..n])?,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "error channel read failed");
                    self.error_closed = true;
                    return Ok(());
                }
            }
        }
    }

    fn on_error_bytes(&mut self, data: &[u8]) -> CastResult<()> {
        self.operator.echo(data)?;
        let text = self.error_text.decode(data);
        if !text.is_empty() {
            self.emit(EventKind::Error, text)?;
        }
        Ok(())
    }

    fn drain_output(&mut self) -> CastResult<()> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match self.pty.master().read(&mut buf) {
                Ok(0) => {
                    self.output_closed = true;
                    return Ok(());
                }
                Ok(n) => {
                    let data = &buf[..n];
                    self.operator.echo(data)?;
                    let text = self.output_text.decode(data);
                    if !text.is_empty() {
                        self.emit(EventKind::Output, text)?;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // Every subordinate descriptor is closed: the program is gone.
                Err(e) if e.raw_os_error() == Some(libc::EIO) => {
                    debug!("pty closed");
                    self.output_closed = true;
                    return Ok(());
                }
                Err(e) => return Err(CastError::Capture(format!("pty read failed: {e}"))),
            }
        }
    }

    /// Read operator input until none is left.
    ///
    /// The operator's descriptor stays blocking (it is shared with the
    /// operator's shell), so every read after the first is preceded by a
    /// zero-timeout readiness check.
    fn read_input(&mut self) -> CastResult<()> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let Some(input) = self.operator.input.as_mut() else {
                break;
            };
            let n = match input.read(&mut buf) {
                Ok(0) => {
                    debug!("operator input closed");
                    self.input_closed = true;
                    break;
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CastError::Capture(format!("operator input read failed: {e}"))),
            };

            let data = &buf[..n];
            let text = self.input_text.decode(data);
            if !text.is_empty() {
                self.emit(EventKind::Input, text)?;
            }
            self.pending_input.extend_from_slice(data);

            if !self.input_ready() {
                break;
            }
        }
        self.flush_input()
    }

    fn input_ready(&self) -> bool {
        let Some(fd) = self.operator.input_fd() else {
            return false;
        };
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        matches!(poll(&mut fds, PollTimeout::from(0u16)), Ok(n) if n > 0)
    }

    /// Forward as much queued input as the pty accepts without blocking.
    fn flush_input(&mut self) -> CastResult<()> {
        while !self.pending_input.is_empty() {
            if self.output_closed {
                debug!(dropped = self.pending_input.len(), "pty closed, discarding input");
                self.pending_input.clear();
                break;
            }
            match self.pty.master().write(&self.pending_input) {
                Ok(0) => break,
                Ok(n) => {
                    self.pending_input.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.raw_os_error() == Some(libc::EIO) => {
                    self.output_closed = true;
                }
                Err(e) => return Err(CastError::Capture(format!("pty write failed: {e}"))),
            }
        }
        Ok(())
    }

    /// React to one signal notification.
    pub fn notify(&mut self, notification: Notification) -> CastResult<()> {
        match notification {
            Notification::Interrupt => {
                // Failure means the group is already gone; the exit check decides.
                if let Err(e) = self.pty.signal_group(Signal::SIGINT) {
                    debug!(error = %e, "interrupt forwarding failed");
                }
                self.emit(EventKind::Input, INTERRUPT.to_string())
            }
            Notification::WindowChanged => self.poll_terminal(),
            Notification::UserMark => {
                self.marks += 1;
                let label = format!("{}_{}", self.config.mark_label, self.marks);
                info!(%label, "custom marker");
                self.emit(EventKind::Marker, label)
            }
            Notification::ChildExited => {
                if self.pty.try_wait()?.is_some() {
                    self.terminating = true;
                }
                Ok(())
            }
        }
    }

    /// Sample the terminal and record any size or attribute change.
    fn poll_terminal(&mut self) -> CastResult<()> {
        let sample = self.probe.sample(self.pty.master_fd());
        for change in self.monitor.observe(sample) {
            if let super::monitor::StateChange::Resized(size) = change {
                if size != self.pty.size() {
                    if let Err(e) = self.pty.resize(size) {
                        warn!(error = %e, "failed to resize pty");
                    }
                }
            }
            let time = self.now();
            self.emit_at(change.into_event(time))?;
        }
        Ok(())
    }

    /// Best-effort flush of whatever is still readable, then of partial characters.
    fn final_drain(&mut self) -> CastResult<()> {
        if !self.error_closed {
            self.drain_errors()?;
        }
        if !self.output_closed {
            self.drain_output()?;
        }
        for kind in [EventKind::Error, EventKind::Output, EventKind::Input] {
            let stream = match kind {
                EventKind::Error => &mut self.error_text,
                EventKind::Output => &mut self.output_text,
                _ => &mut self.input_text,
            };
            if stream.has_pending() {
                let text = stream.finish();
                self.emit(kind, text)?;
            }
        }
        Ok(())
    }
}

fn push<'fd>(fds: &mut Vec<PollFd<'fd>>, fd: BorrowedFd<'fd>, events: PollFlags) -> usize {
    fds.push(PollFd::new(fd, events));
    fds.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::terminal::TerminalSample;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use ttycast_core::{Header, WindowSize};

    /// In-memory operator terminal.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Returns queued samples in order, then repeats the last one.
    struct ScriptedProbe {
        script: VecDeque<TerminalSample>,
        last: TerminalSample,
    }

    impl TerminalProbe for ScriptedProbe {
        fn sample(&mut self, _pty: BorrowedFd<'_>) -> TerminalSample {
            if let Some(next) = self.script.pop_front() {
                self.last = next;
            }
            self.last
        }
    }

    fn size_sample(rows: u16, cols: u16) -> TerminalSample {
        TerminalSample {
            size: Some(WindowSize::new(rows, cols)),
            attrs: None,
        }
    }

    /// Operator terminal that has gone away.
    struct BrokenTerminal;

    impl Write for BrokenTerminal {
        fn write(&mut self, _data: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn steady_probe() -> ScriptedProbe {
        ScriptedProbe {
            script: VecDeque::new(),
            last: size_sample(24, 80),
        }
    }

    fn fast_config() -> CaptureConfig {
        CaptureConfig {
            poll_interval: Duration::from_millis(20),
            ..CaptureConfig::default()
        }
    }

    fn build(dir: &tempfile::TempDir, program: &str, args: &[&str], probe: ScriptedProbe) -> CaptureLoop {
        let operator = Operator::new(None, Box::new(SharedBuf::default()));
        build_with(dir, program, args, probe, operator, fast_config())
    }

    fn build_with(
        dir: &tempfile::TempDir,
        program: &str,
        args: &[&str],
        probe: ScriptedProbe,
        operator: Operator,
        config: CaptureConfig,
    ) -> CaptureLoop {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let pty = PtyProcess::spawn(program, &args, WindowSize::new(24, 80)).unwrap();
        let header = Header::new(WindowSize::new(24, 80), 0, program, Default::default());
        let log = EventLog::create(dir.path().join("t.cast"), &header).unwrap();
        let signals = SignalEvents::register_only(&[Notification::ChildExited]).unwrap();
        CaptureLoop::new(pty, log, None, operator, Box::new(probe), signals, config, Instant::now())
    }

    fn read_events(dir: &tempfile::TempDir) -> Vec<Event> {
        let file = File::open(dir.path().join("t.cast")).unwrap();
        ttycast_core::read_cast(io::BufReader::new(file)).unwrap().events
    }

    #[test]
    fn scripted_resize_is_recorded_once() {
        let dir = tempfile::tempdir().unwrap();
        let probe = ScriptedProbe {
            script: VecDeque::from(vec![size_sample(24, 80), size_sample(24, 80), size_sample(30, 100)]),
            last: TerminalSample::default(),
        };
        let mut capture = build(&dir, "/bin/sh", &["-c", "sleep 0.5"], probe);
        capture.run().unwrap();
        let parts = capture.into_parts();
        assert_eq!(parts.pty.size(), WindowSize::new(30, 100));
        parts.log.close().unwrap();

        let resizes: Vec<Event> = read_events(&dir)
            .into_iter()
            .filter(|e| e.kind == EventKind::Resize)
            .collect();
        assert_eq!(resizes.len(), 1);
        assert_eq!(resizes[0].payload, "30x100");
    }

    #[test]
    fn user_marks_are_numbered() {
        let dir = tempfile::tempdir().unwrap();
        let probe = ScriptedProbe {
            script: VecDeque::new(),
            last: size_sample(24, 80),
        };
        let mut capture = build(&dir, "/bin/sleep", &["30"], probe);
        capture.notify(Notification::UserMark).unwrap();
        capture.notify(Notification::UserMark).unwrap();
        let mut parts = capture.into_parts();
        parts.pty.hangup();
        parts.log.close().unwrap();

        let payloads: Vec<String> = read_events(&dir).into_iter().map(|e| e.payload).collect();
        assert_eq!(payloads, vec!["user_mark_1", "user_mark_2"]);
    }

    #[test]
    fn interrupt_is_forwarded_and_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let probe = ScriptedProbe {
            script: VecDeque::new(),
            last: size_sample(24, 80),
        };
        let mut capture = build(&dir, "/bin/sleep", &["30"], probe);
        capture.notify(Notification::Interrupt).unwrap();
        // The forwarded SIGINT ends `sleep`, which ends the loop.
        capture.run().unwrap();
        let parts = capture.into_parts();
        let status = parts.pty.exit_status().unwrap();
        assert_eq!(super::super::pty::exit_code(status), 128 + libc::SIGINT);
        parts.log.close().unwrap();

        let events = read_events(&dir);
        assert_eq!(events[0].kind, EventKind::Input);
        assert_eq!(events[0].payload, "\u{3}");
    }

    #[test]
    fn error_channel_is_drained_before_output() {
        let dir = tempfile::tempdir().unwrap();
        // Output is written first, but both are pending when the loop first polls.
        let mut capture = build(
            &dir,
            "/bin/sh",
            &["-c", "printf out; printf err 1>&2; sleep 0.5"],
            steady_probe(),
        );
        std::thread::sleep(Duration::from_millis(300));
        capture.run().unwrap();
        capture.into_parts().log.close().unwrap();

        let events = read_events(&dir);
        assert_eq!(events[0].kind, EventKind::Error);
        assert_eq!(events[0].payload, "err");
        assert_eq!(events[1].kind, EventKind::Output);
        assert_eq!(events[1].payload, "out");
    }

    #[test]
    fn idle_gap_marker_precedes_resumed_output() {
        let dir = tempfile::tempdir().unwrap();
        let operator = Operator::new(None, Box::new(SharedBuf::default()));
        let config = CaptureConfig {
            idle_threshold: Duration::from_millis(200),
            ..fast_config()
        };
        let mut capture = build_with(
            &dir,
            "/bin/sh",
            &["-c", "printf a; sleep 0.4; printf b"],
            steady_probe(),
            operator,
            config,
        );
        capture.run().unwrap();
        capture.into_parts().log.close().unwrap();

        let events = read_events(&dir);
        assert_eq!(events[0].kind, EventKind::Output);
        assert_eq!(events[0].payload, "a");

        let resumed = events.iter().position(|e| e.payload == "b").unwrap();
        let marker = &events[resumed - 1];
        assert_eq!(marker.kind, EventKind::Marker);
        assert_eq!(marker.time, events[resumed].time);
        let gap: f64 = marker
            .payload
            .strip_prefix("activity_resumed_after_")
            .and_then(|rest| rest.strip_suffix('s'))
            .unwrap()
            .parse()
            .unwrap();
        assert!(gap >= 0.2, "gap {gap}");
        assert_eq!(events.iter().filter(|e| e.kind == EventKind::Marker).count(), 1);
    }

    #[test]
    fn failed_echo_on_error_channel_ends_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let operator = Operator::new(None, Box::new(BrokenTerminal));
        let mut capture = build_with(
            &dir,
            "/bin/sh",
            &["-c", "echo err 1>&2; sleep 0.3"],
            steady_probe(),
            operator,
            fast_config(),
        );
        let result = capture.run();
        assert!(matches!(result, Err(CastError::Capture(_))), "{result:?}");

        let mut parts = capture.into_parts();
        parts.pty.hangup();
        parts.log.close().unwrap();
        assert!(read_events(&dir).is_empty());
    }

    #[test]
    fn queued_operator_input_is_read_in_one_pass() {
        let dir = tempfile::tempdir().unwrap();
        let (read_end, write_end) = nix::unistd::pipe().unwrap();
        let typed = "x".repeat(3 * READ_CHUNK);
        File::from(write_end).write_all(typed.as_bytes()).unwrap();

        let operator = Operator::new(Some(File::from(read_end)), Box::new(SharedBuf::default()));
        let mut capture = build_with(&dir, "/bin/sleep", &["30"], steady_probe(), operator, fast_config());
        capture.read_input().unwrap();
        assert!(capture.input_closed);

        let mut parts = capture.into_parts();
        parts.pty.hangup();
        parts.log.close().unwrap();
        let recorded: String = read_events(&dir)
            .into_iter()
            .filter(|e| e.kind == EventKind::Input)
            .map(|e| e.payload)
            .collect();
        assert_eq!(recorded, typed);
    }
}
