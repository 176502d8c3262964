//! Demo workload served by the `forkpool` binary.
//!
//! Each task sleeps for a while and answers with the pid of the worker that
//! ran it. A task flagged `crash` aborts its worker instead, which shows the
//! pool dropping the task and replacing the worker. Any `echo` text is
//! copied into the reply unchanged.

use crate::controller::MasterController;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

/// One unit of demo work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoTask {
    pub id: String,
    #[serde(default)]
    pub sleep_ms: u64,
    #[serde(default)]
    pub crash: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub echo: String,
}

impl DemoTask {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sleep_ms: 0,
            crash: false,
            echo: String::new(),
        }
    }

    pub fn with_sleep(mut self, ms: u64) -> Self {
        self.sleep_ms = ms;
        self
    }

    pub fn with_crash(mut self, crash: bool) -> Self {
        self.crash = crash;
        self
    }

    pub fn with_echo(mut self, echo: impl Into<String>) -> Self {
        self.echo = echo.into();
        self
    }
}

/// A worker's answer to a [`DemoTask`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoReply {
    pub id: String,
    pub pid: u32,
    pub slept_ms: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub echo: String,
}

/// Worker-side handler.
pub fn handle(task: DemoTask) -> DemoReply {
    if task.crash {
        tracing::error!(id = %task.id, "Crashing on request");
        std::process::abort();
    }
    if task.sleep_ms > 0 {
        thread::sleep(Duration::from_millis(task.sleep_ms));
    }
    DemoReply {
        id: task.id,
        pid: std::process::id(),
        slept_ms: task.sleep_ms,
        echo: task.echo,
    }
}

/// Build `count` tasks named `task-0`, `task-1`, ...
///
/// With `crash_every = Some(n)`, every n-th task (1-based) crashes its worker.
pub fn plan(count: usize, sleep_ms: u64, crash_every: Option<usize>) -> Vec<DemoTask> {
    (0..count)
        .map(|i| {
            let crash = crash_every.is_some_and(|n| n > 0 && (i + 1) % n == 0);
            DemoTask::new(format!("task-{}", i))
                .with_sleep(sleep_ms)
                .with_crash(crash)
        })
        .collect()
}

/// Submit every task and return the replies collected so far.
///
/// Replies arrive in completion order. The caller decides how long to wait
/// for the rest; call [`Replies::take`] afterwards for the late ones.
pub fn submit_all(master: &mut MasterController, tasks: &[DemoTask]) -> Result<Replies> {
    let replies = Replies::default();
    for task in tasks {
        let sink = replies.clone();
        master.submit_as(task, move |reply: DemoReply| sink.push(reply))?;
    }
    Ok(replies)
}

/// Shared reply buffer filled by submit callbacks.
#[derive(Debug, Clone, Default)]
pub struct Replies(Rc<RefCell<Vec<DemoReply>>>);

impl Replies {
    fn push(&self, reply: DemoReply) {
        self.0.borrow_mut().push(reply);
    }

    /// Remove and return every reply received so far.
    pub fn take(&self) -> Vec<DemoReply> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}
