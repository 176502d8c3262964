//! Exit analysis for worker processes.
//!
//! Only used to make death and reclaim log lines meaningful; every kind of
//! termination leads to the same respawn.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

/// Reason why a worker process terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by SIGKILL (reclaimed by the master, or the OOM killer).
    Killed,
    /// Crashed with SIGSEGV, SIGBUS, SIGABRT or SIGILL.
    Crashed(Signal),
    /// Killed by some other signal.
    Signaled(Signal),
    /// Unknown termination reason.
    Unknown,
}

impl TerminationReason {
    /// The worker exited on its own with status 0.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// Get a human-readable description.
    pub fn description(&self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Killed => "killed (SIGKILL)".to_string(),
            Self::Crashed(sig) => format!("crashed ({})", sig.as_str()),
            Self::Signaled(sig) => format!("terminated by {}", sig.as_str()),
            Self::Unknown => "unknown reason".to_string(),
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl From<WaitStatus> for TerminationReason {
    fn from(status: WaitStatus) -> Self {
        match status {
            WaitStatus::Exited(_, code) => Self::Exited(code),
            WaitStatus::Signaled(_, Signal::SIGKILL, _) => Self::Killed,
            WaitStatus::Signaled(
                _,
                sig @ (Signal::SIGSEGV | Signal::SIGBUS | Signal::SIGABRT | Signal::SIGILL),
                _,
            ) => Self::Crashed(sig),
            WaitStatus::Signaled(_, sig, _) => Self::Signaled(sig),
            _ => Self::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;

    #[test]
    fn test_exit_codes() {
        let pid = Pid::from_raw(1);
        assert_eq!(
            TerminationReason::from(WaitStatus::Exited(pid, 0)),
            TerminationReason::Exited(0)
        );
        assert!(TerminationReason::Exited(0).is_success());
        assert!(!TerminationReason::Exited(2).is_success());
    }

    #[test]
    fn test_signal_classification() {
        let pid = Pid::from_raw(1);
        assert_eq!(
            TerminationReason::from(WaitStatus::Signaled(pid, Signal::SIGKILL, false)),
            TerminationReason::Killed
        );
        assert_eq!(
            TerminationReason::from(WaitStatus::Signaled(pid, Signal::SIGABRT, true)),
            TerminationReason::Crashed(Signal::SIGABRT)
        );
        assert_eq!(
            TerminationReason::from(WaitStatus::Signaled(pid, Signal::SIGTERM, false)),
            TerminationReason::Signaled(Signal::SIGTERM)
        );
        assert_eq!(
            TerminationReason::from(WaitStatus::StillAlive),
            TerminationReason::Unknown
        );
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(
            TerminationReason::Exited(3).to_string(),
            "exited with code 3"
        );
        assert!(
            TerminationReason::Crashed(Signal::SIGSEGV)
                .to_string()
                .contains("SIGSEGV")
        );
        assert!(TerminationReason::Killed.to_string().contains("SIGKILL"));
    }
}
