//! Worker subprocess spawning.
//!
//! Workers are copies of the master's own program started with
//! [`WORKER_ROLE_ARG`] appended, so one binary carries both code paths.

use super::proc::Proc;
use crate::error::{PoolError, Result};
use crate::role::WORKER_ROLE_ARG;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// The exact command line used to launch every pool member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnCommand {
    /// Program to execute.
    pub program: PathBuf,
    /// Arguments passed verbatim.
    pub args: Vec<OsString>,
}

impl SpawnCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Append the worker role flag unless it is already present.
    pub fn worker_role(self) -> Self {
        if self.args.iter().any(|a| a == WORKER_ROLE_ARG) {
            self
        } else {
            self.arg(WORKER_ROLE_ARG)
        }
    }

    /// Relaunch command for the running program.
    ///
    /// Same executable, same arguments, plus the worker role flag.
    pub fn current_exe() -> Result<Self> {
        let exe = std::env::current_exe().map_err(|e| PoolError::Spawn {
            program: "<current executable>".to_string(),
            source: e,
        })?;
        Ok(Self::new(exe).args(std::env::args_os().skip(1)).worker_role())
    }

    /// Build a `Command` with all three stdio streams piped.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl fmt::Display for SpawnCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Spawn one worker subprocess.
///
/// Failure to start the process is an error, never a silently smaller pool.
pub fn spawn_worker(command: &SpawnCommand) -> Result<Proc> {
    let child = command
        .to_command()
        .spawn()
        .map_err(|e| PoolError::Spawn {
            program: command.to_string(),
            source: e,
        })?;

    Proc::from_child(child)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_role_appended_once() {
        let cmd = SpawnCommand::new("/bin/app").arg("--fast").worker_role();
        assert_eq!(cmd.args, vec![OsString::from("--fast"), OsString::from(WORKER_ROLE_ARG)]);

        let again = cmd.clone().worker_role();
        assert_eq!(again, cmd);
    }

    #[test]
    fn test_current_exe_carries_role_flag() {
        let cmd = SpawnCommand::current_exe().unwrap();
        assert!(cmd.program.is_absolute());
        assert_eq!(
            cmd.args.last().map(|a| a.as_os_str()),
            Some(OsStr::new(WORKER_ROLE_ARG))
        );
    }

    #[test]
    fn test_display_joins_args() {
        let cmd = SpawnCommand::new("/usr/bin/app").args(["-v", "role=worker"]);
        assert_eq!(cmd.to_string(), "/usr/bin/app -v role=worker");
    }

    #[test]
    fn test_spawn_missing_program_fails_loudly() {
        let cmd = SpawnCommand::new("/nonexistent/forkpool-worker");
        match spawn_worker(&cmd) {
            Err(PoolError::Spawn { program, .. }) => {
                assert!(program.contains("/nonexistent/forkpool-worker"))
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("spawn of a missing program succeeded"),
        }
    }

    #[test]
    fn test_spawn_cat_is_running() {
        let mut proc = spawn_worker(&SpawnCommand::new("cat")).expect("Failed to spawn cat");
        assert!(proc.is_running());
        proc.stop(std::time::Duration::from_secs(1)).unwrap();
        assert!(!proc.is_running());
    }
}
