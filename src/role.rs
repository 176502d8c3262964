//! Process role selection.
//!
//! A forkpool binary runs either as the master (owns the pool) or as a worker
//! (serves framed requests on stdin). Workers are relaunched copies of the
//! master with [`WORKER_ROLE_ARG`] appended to the command line.

use std::fmt;

/// Launch argument that switches a process into the worker role.
pub const WORKER_ROLE_ARG: &str = "role=worker";

/// The role of the current process, decided once at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Role {
    /// Owns the pool and dispatches work.
    #[default]
    Master,
    /// Spawned by a master; serves requests until stdin closes.
    Worker,
}

impl Role {
    /// Determine the role from a full argument list.
    ///
    /// Absence of [`WORKER_ROLE_ARG`] implies [`Role::Master`].
    pub fn detect<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if args.into_iter().any(|a| a.as_ref() == WORKER_ROLE_ARG) {
            Self::Worker
        } else {
            Self::Master
        }
    }

    /// Remove the role token so the remaining arguments parse normally.
    pub fn strip<I, S>(args: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        args.into_iter()
            .map(Into::into)
            .filter(|a| a != WORKER_ROLE_ARG)
            .collect()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Worker => write!(f, "worker"),
        }
    }
}
