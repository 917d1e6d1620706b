//! Recorder configuration: TOML file + CLI overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use ttycast_core::{CastError, CastResult};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub recorder: RecorderSection,
    #[serde(default)]
    pub monitor: MonitorSection,
}

/// `[recorder]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct RecorderSection {
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_idle_marker_secs")]
    pub idle_marker_secs: f64,
    #[serde(default = "default_mark_label")]
    pub mark_label: String,
    #[serde(default = "default_env")]
    pub env: Vec<String>,
}

impl Default for RecorderSection {
    fn default() -> Self {
        Self {
            shell: None,
            output_dir: default_output_dir(),
            poll_interval_ms: default_poll_interval_ms(),
            idle_marker_secs: default_idle_marker_secs(),
            mark_label: default_mark_label(),
            env: default_env(),
        }
    }
}

/// `[monitor]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_viewer_queue")]
    pub viewer_queue: usize,
    #[serde(default = "default_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub write_timeout_ms: u64,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
            buffer_size: default_buffer_size(),
            viewer_queue: default_viewer_queue(),
            handshake_timeout_ms: default_timeout_ms(),
            write_timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_output_dir() -> String {
    ".".to_string()
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_idle_marker_secs() -> f64 {
    5.0
}
fn default_mark_label() -> String {
    "user_mark".to_string()
}
fn default_env() -> Vec<String> {
    vec!["SHELL".to_string(), "TERM".to_string()]
}
fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    8889
}
fn default_buffer_size() -> usize {
    1000
}
fn default_viewer_queue() -> usize {
    1024
}
fn default_timeout_ms() -> u64 {
    5000
}

/// Values given on the command line. `None`/empty means "not given".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub shell: Option<String>,
    pub output: Option<String>,
    pub monitor: bool,
    pub monitor_host: Option<String>,
    pub monitor_port: Option<u16>,
    pub monitor_buffer_size: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    /// Trailing `PROGRAM [ARGS...]`.
    pub command: Vec<String>,
}

/// Resolved live-monitor settings.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub host: String,
    pub port: u16,
    pub buffer_size: usize,
    pub viewer_queue: usize,
    pub handshake_timeout: Duration,
    pub write_timeout: Duration,
}

/// Resolved recorder configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub program: String,
    pub args: Vec<String>,
    pub output: PathBuf,
    pub poll_interval: Duration,
    pub idle_threshold: Duration,
    pub mark_label: String,
    pub env: Vec<String>,
    /// `None` when live monitoring is off.
    pub monitor: Option<MonitorConfig>,
}

impl RecorderConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, overrides: CliOverrides, now_epoch: u64) -> CastResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    parse(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };
        Self::resolve(file_config, overrides, now_epoch)
    }

    /// Merge a parsed config file with CLI overrides.
    pub fn resolve(file: ConfigFile, cli: CliOverrides, now_epoch: u64) -> CastResult<Self> {
        let ConfigFile { recorder, monitor } = file;

        // Program precedence: trailing command, --shell, config, $SHELL, /bin/sh.
        let (program, args) = match cli.command.split_first() {
            Some((program, args)) => (program.clone(), args.to_vec()),
            None => {
                let shell = cli
                    .shell
                    .or(recorder.shell)
                    .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.is_empty()))
                    .unwrap_or_else(|| "/bin/sh".to_string());
                (shell, Vec::new())
            }
        };

        let output = match cli.output {
            Some(path) => expand_tilde_str(&path),
            None => expand_tilde_str(&recorder.output_dir).join(format!("recording_{now_epoch}.cast")),
        };

        let poll_interval_ms = cli.poll_interval_ms.unwrap_or(recorder.poll_interval_ms);
        if poll_interval_ms == 0 {
            return Err(CastError::Config("poll_interval_ms must be positive".into()));
        }
        if !recorder.idle_marker_secs.is_finite() || recorder.idle_marker_secs < 0.0 {
            return Err(CastError::Config(format!(
                "idle_marker_secs must be a non-negative number, got {}",
                recorder.idle_marker_secs
            )));
        }

        let monitor = if cli.monitor || monitor.enabled {
            let buffer_size = cli.monitor_buffer_size.unwrap_or(monitor.buffer_size);
            if monitor.viewer_queue == 0 {
                return Err(CastError::Config("viewer_queue must be positive".into()));
            }
            Some(MonitorConfig {
                host: cli.monitor_host.unwrap_or(monitor.host),
                port: cli.monitor_port.unwrap_or(monitor.port),
                buffer_size,
                viewer_queue: monitor.viewer_queue,
                handshake_timeout: Duration::from_millis(monitor.handshake_timeout_ms),
                write_timeout: Duration::from_millis(monitor.write_timeout_ms),
            })
        } else {
            None
        };

        Ok(Self {
            program,
            args,
            output,
            poll_interval: Duration::from_millis(poll_interval_ms),
            idle_threshold: Duration::from_secs_f64(recorder.idle_marker_secs),
            mark_label: recorder.mark_label,
            env: recorder.env,
            monitor,
        })
    }
}

fn parse(content: &str) -> CastResult<ConfigFile> {
    toml::from_str::<ConfigFile>(content)
        .map_err(|e| CastError::Config(format!("config parse error: {e}")))
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let cli = CliOverrides {
            shell: Some("/bin/zsh".into()),
            ..Default::default()
        };
        let cfg = RecorderConfig::resolve(ConfigFile::default(), cli, 1_700_000_000).unwrap();
        assert_eq!(cfg.program, "/bin/zsh");
        assert!(cfg.args.is_empty());
        assert_eq!(cfg.output, PathBuf::from("./recording_1700000000.cast"));
        assert_eq!(cfg.poll_interval, Duration::from_millis(100));
        assert_eq!(cfg.idle_threshold, Duration::from_secs(5));
        assert_eq!(cfg.mark_label, "user_mark");
        assert_eq!(cfg.env, vec!["SHELL", "TERM"]);
        assert!(cfg.monitor.is_none());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let file = parse(
            r#"
            [recorder]
            output_dir = "/var/log/casts"
            idle_marker_secs = 2.5

            [monitor]
            enabled = true
            port = 9000
            "#,
        )
        .unwrap();
        let cfg = RecorderConfig::resolve(file, CliOverrides::default(), 42).unwrap();
        assert_eq!(cfg.output, PathBuf::from("/var/log/casts/recording_42.cast"));
        assert_eq!(cfg.idle_threshold, Duration::from_millis(2500));
        let monitor = cfg.monitor.unwrap();
        assert_eq!(monitor.port, 9000);
        assert_eq!(monitor.host, "localhost");
        assert_eq!(monitor.buffer_size, 1000);
        assert_eq!(monitor.write_timeout, Duration::from_secs(5));
    }

    #[test]
    fn cli_overrides_file() {
        let file = parse(
            r#"
            [recorder]
            shell = "/bin/bash"
            poll_interval_ms = 250
            [monitor]
            port = 9000
            "#,
        )
        .unwrap();
        let cli = CliOverrides {
            output: Some("/tmp/x.cast".into()),
            monitor: true,
            monitor_port: Some(9100),
            monitor_buffer_size: Some(50),
            poll_interval_ms: Some(20),
            command: vec!["/usr/bin/ssh".into(), "prod-host".into()],
            ..Default::default()
        };
        let cfg = RecorderConfig::resolve(file, cli, 0).unwrap();
        assert_eq!(cfg.program, "/usr/bin/ssh");
        assert_eq!(cfg.args, vec!["prod-host"]);
        assert_eq!(cfg.output, PathBuf::from("/tmp/x.cast"));
        assert_eq!(cfg.poll_interval, Duration::from_millis(20));
        let monitor = cfg.monitor.unwrap();
        assert_eq!(monitor.port, 9100);
        assert_eq!(monitor.buffer_size, 50);
    }

    #[test]
    fn config_shell_beats_environment() {
        let file = parse("[recorder]\nshell = \"/bin/dash\"\n").unwrap();
        let cfg = RecorderConfig::resolve(file, CliOverrides::default(), 0).unwrap();
        assert_eq!(cfg.program, "/bin/dash");
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let cli = CliOverrides {
            poll_interval_ms: Some(0),
            ..Default::default()
        };
        let err = RecorderConfig::resolve(ConfigFile::default(), cli, 0).unwrap_err();
        assert!(matches!(err, CastError::Config(_)));
    }

    #[test]
    fn malformed_file_is_config_error() {
        assert!(matches!(parse("[recorder\n"), Err(CastError::Config(_))));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cli = CliOverrides {
            shell: Some("/bin/sh".into()),
            ..Default::default()
        };
        let cfg = RecorderConfig::load(Some(&dir.path().join("absent.toml")), cli, 7).unwrap();
        assert_eq!(cfg.output, PathBuf::from("./recording_7.cast"));
    }

    #[test]
    fn tilde_expands_to_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde_str("~/casts"), home.join("casts"));
        }
        assert_eq!(expand_tilde_str("/abs/path"), PathBuf::from("/abs/path"));
    }
}
