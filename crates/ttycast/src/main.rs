//! ttycast: terminal session recorder.
//!
//! Runs a program on a pseudo-terminal, records everything to a cast file,
//! and optionally streams the session live to WebSocket viewers.

mod config;
mod hub;
mod session;
mod transport;

use clap::Parser;
use config::{CliOverrides, RecorderConfig};
use hub::{BroadcastHub, HubConfig};
use session::{capture_env, CaptureConfig, Operator, Session, SessionOptions, SessionOutcome, TtyProbe};
use std::fs::OpenOptions;
use std::io::{self, IsTerminal, Write};
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::{error, info, warn};
use ttycast_core::{CastError, CastResult, SessionMetadata};

/// How long viewers get to receive the end-of-session notice.
const VIEWER_DRAIN: Duration = Duration::from_secs(2);

/// Record a terminal session, optionally streaming it live
#[derive(Parser, Debug)]
#[command(name = "ttycast", version, about = "Terminal session recorder")]
struct Cli {
    /// Shell to run when no program is given
    #[arg(long)]
    shell: Option<String>,

    /// Output cast file (default: <output_dir>/recording_<epoch>.cast)
    #[arg(short, long)]
    output: Option<String>,

    /// Stream the session to WebSocket viewers
    #[arg(long)]
    monitor: bool,

    /// Live monitor bind host
    #[arg(long)]
    monitor_host: Option<String>,

    /// Live monitor port
    #[arg(long)]
    monitor_port: Option<u16>,

    /// Events kept for viewers that join late
    #[arg(long)]
    monitor_buffer_size: Option<usize>,

    /// Terminal size/attribute polling interval in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Config file path
    #[arg(long, default_value = "~/.ttycast/config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error) [default: warn, or error
    /// when logging to the terminal being recorded]
    #[arg(long)]
    log_level: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Program to record and its arguments
    #[arg(last = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_level.as_deref(), cli.log_file.as_deref()) {
        eprintln!("ttycast: cannot open log file: {e}");
        std::process::exit(1);
    }

    info!(version = env!("CARGO_PKG_VERSION"), "starting ttycast");

    let started_at = SystemTime::now();
    let overrides = CliOverrides {
        shell: cli.shell,
        output: cli.output,
        monitor: cli.monitor,
        monitor_host: cli.monitor_host,
        monitor_port: cli.monitor_port,
        monitor_buffer_size: cli.monitor_buffer_size,
        poll_interval_ms: cli.poll_interval_ms,
        command: cli.command,
    };
    let config_path = PathBuf::from(&cli.config);
    let config = match RecorderConfig::load(Some(&config_path), overrides, epoch(started_at).as_secs()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            eprintln!("ttycast: {e}");
            std::process::exit(1);
        }
    };

    match record(config, started_at).await {
        Ok(outcome) => {
            println!("Recording saved to: {}", outcome.path.display());
            std::process::exit(outcome.exit_code);
        }
        Err(e) => {
            error!(error = %e, "recording failed");
            eprintln!("ttycast: {e}");
            std::process::exit(1);
        }
    }
}

/// Run one recording session, with the live monitor if configured.
async fn record(config: RecorderConfig, started_at: SystemTime) -> CastResult<SessionOutcome> {
    let size = session::terminal::window_size(io::stdin().as_fd()).unwrap_or_default();

    let mut options = SessionOptions::new(config.program.clone(), config.args.clone(), config.output.clone());
    options.size = size;
    options.env = capture_env(&config.env);
    options.started_at = started_at;
    options.capture = CaptureConfig {
        poll_interval: config.poll_interval,
        idle_threshold: config.idle_threshold,
        mark_label: config.mark_label.clone(),
    };

    let mut hub = None;
    let mut server = None;
    if let Some(monitor) = &config.monitor {
        let metadata = SessionMetadata {
            session_id: format!("rec_{}", hex::encode(rand::random::<[u8; 4]>())),
            start_time: epoch(started_at).as_secs_f64(),
            shell_command: options.command_line(),
            recording_file: options.output.display().to_string(),
        };
        let shared = Arc::new(BroadcastHub::new(
            HubConfig {
                buffer_size: monitor.buffer_size,
                viewer_queue: monitor.viewer_queue,
            },
            metadata,
            size,
        ));
        // The recording matters more than the live view: carry on without it.
        match transport::websocket::start_listener(&monitor.host, monitor.port, monitor.handshake_timeout).await {
            Ok((addr, connections)) => {
                println!("Live monitor: ws://{addr}");
                let (shutdown_tx, shutdown_rx) = watch::channel(false);
                let task = tokio::spawn(transport::websocket::serve(
                    Arc::clone(&shared),
                    connections,
                    monitor.write_timeout,
                    shutdown_rx,
                    VIEWER_DRAIN,
                ));
                hub = Some(shared);
                server = Some((shutdown_tx, task));
            }
            Err(e) => {
                warn!(error = %e, "live monitor unavailable, recording without viewers");
                eprintln!("ttycast: live monitor unavailable: {e}");
            }
        }
    }

    println!("Recording {} to {}", options.command_line(), options.output.display());

    let operator = Operator::stdio()?;
    let probe = Box::new(TtyProbe::new(io::stdin().as_fd()));
    let outcome = tokio::task::spawn_blocking(move || {
        let session = Session::start(options, operator, probe, hub)?;
        session.run()
    })
    .await
    .map_err(|e| CastError::Other(format!("capture task failed: {e}")))?;

    if let Some((shutdown_tx, task)) = server {
        let _ = shutdown_tx.send(true);
        if let Err(e) = task.await {
            warn!(error = %e, "viewer server task failed");
        }
    }

    outcome
}

fn init_tracing(level: Option<&str>, log_file: Option<&Path>) -> io::Result<()> {
    use tracing_subscriber::EnvFilter;
    let interactive = io::stdin().is_terminal();
    let level = level.unwrap_or_else(|| default_log_level(log_file.is_some(), interactive));
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.with_writer(Mutex::new(file)).with_ansi(false).init();
        }
        None if interactive => builder.with_writer(|| CrlfWriter(io::stderr())).init(),
        None => builder.with_writer(io::stderr).init(),
    }
    Ok(())
}

/// Level used when neither `--log-level` nor `RUST_LOG` is given.
///
/// Stderr shares the operator's screen while recording, so only failures go
/// there by default.
fn default_log_level(log_file: bool, interactive: bool) -> &'static str {
    if interactive && !log_file {
        "error"
    } else {
        "warn"
    }
}

/// Ends lines with `\r\n`, since the operator terminal is in raw mode.
struct CrlfWriter<W>(W);

impl<W: Write> Write for CrlfWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for (i, line) in buf.split(|b| *b == b'\n').enumerate() {
            if i > 0 {
                self.0.write_all(b"\r\n")?;
            }
            self.0.write_all(line)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

fn epoch(time: SystemTime) -> Duration {
    time.duration_since(UNIX_EPOCH).unwrap_or_default()
}
