//! Process handle for worker subprocesses.
//!
//! Wraps a child process, its three pipes, and the task currently assigned
//! to it. A handle is `Busy` exactly when it holds a pending callback.

use super::ipc::{PipeFd, ReadOutcome};
use super::protocol::{ResponseParse, parse_response};
use crate::error::{PoolError, Result};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use serde_json::Value;
use std::fmt;
use std::io::{self, Write};
use std::os::unix::io::OwnedFd;
use std::process::Child;
use std::time::{Duration, Instant};

/// Completion callback for one task.
pub type Callback = Box<dyn FnOnce(Value)>;

/// Availability of a worker for new tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Busy,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Busy => write!(f, "busy"),
        }
    }
}

/// Task bookkeeping; the callback lives only in the busy state.
enum Task {
    Idle,
    Busy {
        callback: Callback,
        dispatched_at: Instant,
    },
}

/// Outcome of checking a busy worker's output.
pub enum ResponsePoll {
    /// No complete response yet.
    Pending,
    /// The response is complete; the handle is idle again.
    Complete {
        callback: Callback,
        value: Value,
        elapsed: Duration,
    },
    /// The output was not JSON. The callback has been dropped; the worker
    /// is out of step with its requests and must be replaced.
    Malformed {
        error: serde_json::Error,
        elapsed: Duration,
    },
}

/// Handle to a worker subprocess with its pipes.
pub struct Proc {
    pid: Pid,
    /// Write end of the worker's stdin; `None` once closed for shutdown.
    stdin: Option<PipeFd>,
    /// Non-blocking read end of the worker's stdout.
    stdout: PipeFd,
    /// Non-blocking read end of the worker's stderr.
    stderr: PipeFd,
    task: Task,
    /// Response bytes gathered so far for the current task.
    response: Vec<u8>,
    reaped: bool,
}

impl Proc {
    /// Create from a spawned `std::process::Child` with all stdio piped.
    ///
    /// The child is killed and reaped if its pipes cannot be set up.
    pub fn from_child(mut child: Child) -> Result<Self> {
        let pid = Pid::from_raw(child.id() as i32);

        let pipes = (|| -> Result<(PipeFd, PipeFd, PipeFd)> {
            let stdin = child
                .stdin
                .take()
                .ok_or(PoolError::StdioNotCaptured("stdin"))?;
            let stdout = child
                .stdout
                .take()
                .ok_or(PoolError::StdioNotCaptured("stdout"))?;
            let stderr = child
                .stderr
                .take()
                .ok_or(PoolError::StdioNotCaptured("stderr"))?;

            let stdin = PipeFd::from(OwnedFd::from(stdin));
            let stdout = PipeFd::from(OwnedFd::from(stdout));
            let stderr = PipeFd::from(OwnedFd::from(stderr));
            stdout.set_nonblocking(true)?;
            stderr.set_nonblocking(true)?;
            Ok((stdin, stdout, stderr))
        })();

        match pipes {
            Ok((stdin, stdout, stderr)) => Ok(Self {
                pid,
                stdin: Some(stdin),
                stdout,
                stderr,
                task: Task::Idle,
                response: Vec::new(),
                reaped: false,
            }),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn status(&self) -> Status {
        match self.task {
            Task::Idle => Status::Idle,
            Task::Busy { .. } => Status::Busy,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.status() == Status::Busy
    }

    /// How long the current task has been running.
    pub fn task_age(&self) -> Option<Duration> {
        match &self.task {
            Task::Idle => None,
            Task::Busy { dispatched_at, .. } => Some(dispatched_at.elapsed()),
        }
    }

    /// Mark the worker busy with `callback` and write the request frame.
    ///
    /// Output the worker wrote while idle is discarded first, so the
    /// response starts with what it writes for this request. The handle
    /// stays busy even if the write fails: a worker that cannot be written
    /// to is dead, and the next poll reaps it.
    pub fn assign(&mut self, frame: &[u8], callback: Callback) -> io::Result<()> {
        debug_assert!(!self.is_busy(), "task assigned to a busy worker");
        self.task = Task::Busy {
            callback,
            dispatched_at: Instant::now(),
        };
        self.discard_output()?;
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "worker stdin closed"))?;
        stdin.write_all(frame)
    }

    /// Drop any unread stdout along with a partial response.
    ///
    /// Returns the number of bytes discarded.
    pub fn discard_output(&mut self) -> io::Result<usize> {
        let mut discarded = std::mem::take(&mut self.response).len();
        if let ReadOutcome::Data(bytes) = self.stdout.try_read_available()? {
            discarded += bytes.len();
        }
        Ok(discarded)
    }

    /// Close the worker's stdin; a worker exits once it sees EOF.
    pub fn close_stdin(&mut self) {
        self.stdin.take();
    }

    /// Check for a response without blocking.
    ///
    /// Output is accumulated until it parses as one complete JSON value.
    pub fn poll_response(&mut self) -> io::Result<ResponsePoll> {
        if !self.is_busy() {
            return Ok(ResponsePoll::Pending);
        }

        match self.stdout.try_read_available()? {
            ReadOutcome::Data(bytes) => self.response.extend_from_slice(&bytes),
            // A closed stdout means the worker is exiting; the liveness
            // check on the next poll handles it.
            ReadOutcome::Empty | ReadOutcome::Closed => return Ok(ResponsePoll::Pending),
        }

        match parse_response(&self.response) {
            ResponseParse::Incomplete => Ok(ResponsePoll::Pending),
            ResponseParse::Complete(value) => {
                self.response.clear();
                match std::mem::replace(&mut self.task, Task::Idle) {
                    Task::Busy {
                        callback,
                        dispatched_at,
                    } => Ok(ResponsePoll::Complete {
                        callback,
                        value,
                        elapsed: dispatched_at.elapsed(),
                    }),
                    Task::Idle => Ok(ResponsePoll::Pending),
                }
            }
            ResponseParse::Malformed(error) => {
                self.response.clear();
                let elapsed = self.abandon_task().unwrap_or_default();
                Ok(ResponsePoll::Malformed { error, elapsed })
            }
        }
    }

    /// Drop the pending callback without invoking it.
    ///
    /// Returns the age of the abandoned task, or `None` if the worker was idle.
    pub fn abandon_task(&mut self) -> Option<Duration> {
        match std::mem::replace(&mut self.task, Task::Idle) {
            Task::Idle => None,
            Task::Busy { dispatched_at, .. } => Some(dispatched_at.elapsed()),
        }
    }

    /// Copy any pending stderr output to `sink` verbatim.
    ///
    /// Returns the number of bytes forwarded.
    pub fn forward_stderr<W: Write>(&mut self, sink: &mut W) -> io::Result<usize> {
        match self.stderr.try_read_available()? {
            ReadOutcome::Data(bytes) => {
                sink.write_all(&bytes)?;
                sink.flush()?;
                Ok(bytes.len())
            }
            ReadOutcome::Empty | ReadOutcome::Closed => Ok(0),
        }
    }

    /// Check if the process is still running (non-blocking).
    pub fn is_running(&mut self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }

    /// Try to reap the process without blocking.
    ///
    /// Returns `None` if the process is still running.
    pub fn try_wait(&mut self) -> Result<Option<WaitStatus>> {
        if self.reaped {
            return Err(PoolError::Worker(format!(
                "Worker {} already reaped",
                self.pid
            )));
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => Ok(None),
            Ok(status) => {
                self.reaped = true;
                Ok(Some(status))
            }
            Err(e) => {
                self.reaped = true;
                Err(e.into())
            }
        }
    }

    /// Wait for the process to exit (blocking).
    pub fn wait(&mut self) -> Result<WaitStatus> {
        if self.reaped {
            return Err(PoolError::Worker(format!(
                "Worker {} already reaped",
                self.pid
            )));
        }
        let status = waitpid(self.pid, None)?;
        self.reaped = true;
        Ok(status)
    }

    /// Send SIGTERM to the process.
    pub fn terminate(&self) -> Result<()> {
        if self.reaped {
            return Ok(());
        }
        signal::kill(self.pid, Signal::SIGTERM)?;
        Ok(())
    }

    /// Send SIGKILL to the process and reap it.
    pub fn kill(&mut self) -> Result<Option<WaitStatus>> {
        if self.reaped {
            return Ok(None);
        }
        signal::kill(self.pid, Signal::SIGKILL)?;
        self.wait().map(Some)
    }

    /// Stop the worker: close its stdin, wait briefly, then escalate.
    pub fn stop(&mut self, timeout: Duration) -> Result<()> {
        if self.reaped {
            return Ok(());
        }

        self.close_stdin();

        let start = Instant::now();
        while start.elapsed() < timeout {
            if let Ok(Some(_)) = self.try_wait() {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let _ = self.terminate();
        std::thread::sleep(Duration::from_millis(100));
        if let Ok(Some(_)) = self.try_wait() {
            return Ok(());
        }

        self.kill().map(|_| ())
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = signal::kill(self.pid, Signal::SIGKILL);
            let _ = waitpid(self.pid, None);
            self.reaped = true;
        }
    }
}
