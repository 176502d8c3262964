//! Logging setup shared by the master and its workers.
//!
//! Everything is written to stderr: a worker's stdout carries task
//! responses, and the master forwards worker stderr verbatim to its own.
//!
//! # Environment Variables
//!
//! - `FORKPOOL_LOG` - Log filter (overrides RUST_LOG)
//! - `FORKPOOL_LOG_LEVEL` - Log level: error, warn, info, debug, trace
//! - `FORKPOOL_LOG_FORMAT` - Output format: tagged, pretty, compact, json
//! - `FORKPOOL_LOG_FILE` - Path to log file (in addition to stderr)
//! - `RUST_LOG` - Standard Rust log filter (fallback)
//!
//! # Example
//!
//! ```no_run
//! use forkpool::logging::{LogConfig, init};
//! use forkpool::Role;
//!
//! init(LogConfig::for_role(Role::Master).with_env_overrides());
//! ```

use std::fmt::Write as _;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::Local;
use tracing::{Event, Level, Subscriber};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{
        self, FmtContext, FormatEvent, FormatFields, MakeWriter,
        format::{FmtSpan, Writer},
    },
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

use crate::role::Role;

/// Timestamp layout used by the tagged format.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// `<timestamp> [<role>:<pid>] <message>` (default)
    #[default]
    Tagged,
    /// Human-readable multi-field format
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for log aggregation systems
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tagged" | "classic" => Ok(Self::Tagged),
            "pretty" | "full" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Unknown log format: '{}'. Valid options: tagged, pretty, compact, json",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tagged => write!(f, "tagged"),
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Log rotation configuration for file output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogRotation {
    Hourly,
    #[default]
    Daily,
    Never,
}

impl FromStr for LogRotation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "never" => Ok(Self::Never),
            _ => Err(format!(
                "Unknown log rotation: '{}'. Valid options: hourly, daily, never",
                s
            )),
        }
    }
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// Logging configuration.
///
/// Use the builder methods to customize, then pass to [`init`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Role tag for the tagged format (default: master)
    pub role: Role,
    /// Base log level (default: INFO)
    pub level: Level,
    /// Log format (default: Tagged)
    pub format: LogFormat,
    /// Path to log file (None = stderr only)
    pub file_path: Option<PathBuf>,
    /// Log rotation for file output (default: Daily)
    pub rotation: LogRotation,
    /// Log span timing on close
    pub span_events: bool,
    /// Custom filter string (overrides level if set)
    pub filter: Option<String>,
    /// Show target module in logs (default: true)
    pub show_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            role: Role::Master,
            level: Level::INFO,
            format: LogFormat::Tagged,
            file_path: None,
            rotation: LogRotation::Daily,
            span_events: false,
            filter: None,
            show_target: true,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for a process running in the given role.
    pub fn for_role(role: Role) -> Self {
        Self {
            role,
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    pub fn with_rotation(mut self, rotation: LogRotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: String) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Apply environment variable overrides.
    ///
    /// CLI arguments take precedence: if a filter is already set, neither
    /// `FORKPOOL_LOG`, `RUST_LOG` nor `FORKPOOL_LOG_LEVEL` replace it.
    pub fn with_env_overrides(mut self) -> Self {
        if self.filter.is_none() {
            if let Ok(filter) = std::env::var("FORKPOOL_LOG") {
                self.filter = Some(filter);
            } else if let Ok(filter) = std::env::var("RUST_LOG") {
                self.filter = Some(filter);
            }
        }

        if self.filter.is_none()
            && let Ok(level_str) = std::env::var("FORKPOOL_LOG_LEVEL")
        {
            self.level = parse_level(&level_str).unwrap_or(self.level);
        }

        if let Ok(format) = std::env::var("FORKPOOL_LOG_FORMAT")
            && let Ok(f) = format.parse()
        {
            self.format = f;
        }

        if let Ok(path) = std::env::var("FORKPOOL_LOG_FILE") {
            self.file_path = Some(PathBuf::from(path));
        }

        self
    }

    fn build_filter(&self) -> EnvFilter {
        if let Some(ref filter) = self.filter {
            EnvFilter::try_new(filter).unwrap_or_else(|_| {
                eprintln!("Warning: Invalid log filter '{}', using default", filter);
                EnvFilter::new(format!("{}", self.level).to_lowercase())
            })
        } else {
            EnvFilter::new(format!("{}", self.level).to_lowercase())
        }
    }

    fn fmt_span(&self) -> FmtSpan {
        if self.span_events {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Parse a log level string.
pub fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

/// Event formatter producing `<timestamp> [<role>:<pid>] <message>`.
#[derive(Debug, Clone, Copy)]
pub struct TaggedFormat {
    role: Role,
    pid: u32,
}

impl TaggedFormat {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            pid: std::process::id(),
        }
    }

    fn prefix(&self) -> String {
        format!(
            "{} [{}:{}] ",
            Local::now().format(TIMESTAMP_FORMAT),
            self.role,
            self.pid
        )
    }
}

impl<S, N> FormatEvent<S, N> for TaggedFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        write!(writer, "{}", self.prefix())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Build one output layer for the configured format.
fn output_layer<S, W>(config: &LogConfig, writer: W, ansi: bool) -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match config.format {
        LogFormat::Tagged => fmt::layer()
            .event_format(TaggedFormat::new(config.role))
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_span_events(config.fmt_span())
            .with_target(config.show_target)
            .with_writer(writer)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_span_events(config.fmt_span())
            .with_target(config.show_target)
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_span_events(config.fmt_span())
            .with_target(config.show_target)
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
    }
}

/// Initialize the global tracing subscriber.
///
/// Logs go to stderr, and additionally to `config.file_path` when set.
/// Subsequent calls are silently ignored.
pub fn init(config: LogConfig) {
    let filter = config.build_filter();

    let file_layer = config.file_path.as_ref().map(|path| {
        let parent = path.parent().unwrap_or(std::path::Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("forkpool.log");
        let appender = RollingFileAppender::new(config.rotation.into(), parent, file_name);
        output_layer(&config, appender, false)
    });

    let result = tracing_subscriber::registry()
        .with(output_layer(&config, std::io::stderr, true))
        .with(file_layer)
        .with(filter)
        .try_init();

    // Already initialized (tests, embedding applications)
    let _ = result;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("tagged".parse::<LogFormat>().unwrap(), LogFormat::Tagged);
        assert_eq!("classic".parse::<LogFormat>().unwrap(), LogFormat::Tagged);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("invalid".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_log_format_display_parses_back() {
        for format in [
            LogFormat::Tagged,
            LogFormat::Pretty,
            LogFormat::Compact,
            LogFormat::Json,
        ] {
            assert_eq!(format.to_string().parse::<LogFormat>().unwrap(), format);
        }
    }

    #[test]
    fn test_log_rotation_from_str() {
        assert_eq!(
            "hourly".parse::<LogRotation>().unwrap(),
            LogRotation::Hourly
        );
        assert_eq!("daily".parse::<LogRotation>().unwrap(), LogRotation::Daily);
        assert_eq!("never".parse::<LogRotation>().unwrap(), LogRotation::Never);
        assert!("weekly".parse::<LogRotation>().is_err());
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("error"), Some(Level::ERROR));
        assert_eq!(parse_level("warning"), Some(Level::WARN));
        assert_eq!(parse_level("INFO"), Some(Level::INFO));
        assert_eq!(parse_level("debug"), Some(Level::DEBUG));
        assert_eq!(parse_level("trace"), Some(Level::TRACE));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.role, Role::Master);
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.format, LogFormat::Tagged);
        assert!(config.file_path.is_none());
        assert!(!config.span_events);
    }

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::for_role(Role::Worker)
            .with_level(Level::DEBUG)
            .with_format(LogFormat::Json)
            .with_rotation(LogRotation::Never)
            .with_file(PathBuf::from("/tmp/forkpool-test.log"));

        assert_eq!(config.role, Role::Worker);
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.rotation, LogRotation::Never);
        assert_eq!(
            config.file_path,
            Some(PathBuf::from("/tmp/forkpool-test.log"))
        );
    }

    #[test]
    fn test_tagged_prefix_layout() {
        let prefix = TaggedFormat::new(Role::Worker).prefix();
        let expected_tag = format!(" [worker:{}] ", std::process::id());
        assert!(prefix.ends_with(&expected_tag), "prefix was {prefix:?}");
        // "YYYY-MM-DD HH:MM:SS"
        let timestamp = prefix.trim_end_matches(&expected_tag);
        assert_eq!(timestamp.len(), 19);
        assert_eq!(&timestamp[4..5], "-");
        assert_eq!(&timestamp[10..11], " ");
    }

    #[test]
    #[serial]
    fn test_env_overrides_apply() {
        // SAFETY: serialized with every other env-mutating test.
        unsafe {
            std::env::remove_var("RUST_LOG");
            std::env::set_var("FORKPOOL_LOG", "forkpool=trace");
            std::env::set_var("FORKPOOL_LOG_FORMAT", "compact");
        }
        let config = LogConfig::new().with_env_overrides();
        unsafe {
            std::env::remove_var("FORKPOOL_LOG");
            std::env::remove_var("FORKPOOL_LOG_FORMAT");
        }

        assert_eq!(config.filter.as_deref(), Some("forkpool=trace"));
        assert_eq!(config.format, LogFormat::Compact);
    }

    #[test]
    #[serial]
    fn test_cli_filter_beats_env() {
        unsafe {
            std::env::set_var("FORKPOOL_LOG", "trace");
            std::env::set_var("FORKPOOL_LOG_LEVEL", "error");
        }
        let config = LogConfig::new()
            .with_filter("warn".to_string())
            .with_env_overrides();
        unsafe {
            std::env::remove_var("FORKPOOL_LOG");
            std::env::remove_var("FORKPOOL_LOG_LEVEL");
        }

        assert_eq!(config.filter.as_deref(), Some("warn"));
        assert_eq!(config.level, Level::INFO);
    }
}
