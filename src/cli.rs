//! Command-line interface definitions using clap.

use crate::logging::{LogConfig, LogFormat};
use crate::role::Role;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// Run demo tasks on a pool of worker processes.
#[derive(Parser, Debug)]
#[command(name = "forkpool")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Number of worker processes.
    #[arg(short, long, env = "FORKPOOL_WORKERS", default_value_t = 4)]
    pub workers: usize,

    /// Number of demo tasks to submit.
    #[arg(short, long, default_value_t = 8)]
    pub tasks: usize,

    /// How long each task sleeps in its worker, in milliseconds.
    #[arg(long, default_value_t = 100)]
    pub sleep_ms: u64,

    /// Make every N-th task crash its worker.
    #[arg(long, value_name = "N")]
    pub crash_every: Option<usize>,

    /// Give up on unfinished tasks after this many milliseconds (0 = never).
    #[arg(long, default_value_t = 0)]
    pub timeout_ms: u64,

    /// Enable verbose output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log format: tagged, pretty, compact or json.
    #[arg(long, value_name = "FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Also write logs to this file.
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

/// Verbosity level for output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// -q: errors only.
    Quiet,
    /// Default: pool lifecycle and warnings.
    Normal,
    /// -v: per-task dispatch and completion.
    Debug,
    /// -vv: every poll and pipe read.
    Trace,
}

impl From<u8> for Verbosity {
    fn from(count: u8) -> Self {
        match count {
            0 => Verbosity::Normal,
            1 => Verbosity::Debug,
            _ => Verbosity::Trace,
        }
    }
}

impl From<Verbosity> for Level {
    fn from(verbosity: Verbosity) -> Self {
        match verbosity {
            Verbosity::Quiet => Level::ERROR,
            Verbosity::Normal => Level::INFO,
            Verbosity::Debug => Level::DEBUG,
            Verbosity::Trace => Level::TRACE,
        }
    }
}

impl Cli {
    /// Get the verbosity level based on -v / -q flags.
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            Verbosity::from(self.verbose)
        }
    }

    /// `None` when no drain deadline was requested.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    /// Logging setup for a process in `role`.
    ///
    /// Flags set the baseline; `FORKPOOL_LOG*` environment variables override
    /// it. Workers inherit both, so they log the same way as their master.
    pub fn log_config(&self, role: Role) -> LogConfig {
        let mut config = LogConfig::for_role(role).with_level(self.verbosity().into());
        if let Some(format) = self.log_format {
            config = config.with_format(format);
        }
        if let Some(ref path) = self.log_file {
            config = config.with_file(path.clone());
        }
        config.with_env_overrides()
    }
}
