//! Pool supervisor.
//!
//! Owns a fixed number of worker processes and drives them from a single
//! thread by polling: dead workers are replaced in place, finished tasks have
//! their callbacks invoked, and callers looking for capacity back off until a
//! worker goes idle.

use super::proc::{Callback, Proc, ResponsePoll, Status};
use super::signals::TerminationReason;
use super::spawn::{SpawnCommand, spawn_worker};
use crate::error::{PoolError, Result};
use std::io;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, instrument, trace, warn};

/// Sleep between idle-worker searches while the pool is saturated.
pub const DEFAULT_ACQUIRE_BACKOFF: Duration = Duration::from_millis(50);

/// Sleep between polls while draining.
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_millis(10);

/// Grace period for a worker to exit after its stdin is closed.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker processes. Fixed for the life of the pool.
    pub size: usize,
    /// Command used to launch every worker.
    pub command: SpawnCommand,
    /// Backoff while waiting for an idle worker.
    pub acquire_backoff: Duration,
    /// Poll interval while draining in `wait`.
    pub drain_interval: Duration,
    /// How long shutdown waits before killing a worker.
    pub shutdown_timeout: Duration,
}

impl PoolConfig {
    pub fn new(size: usize, command: SpawnCommand) -> Self {
        Self {
            size,
            command,
            acquire_backoff: DEFAULT_ACQUIRE_BACKOFF,
            drain_interval: DEFAULT_DRAIN_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Pool of `size` copies of the running program in worker role.
    pub fn for_current_exe(size: usize) -> Result<Self> {
        Ok(Self::new(size, SpawnCommand::current_exe()?))
    }

    pub fn with_acquire_backoff(mut self, backoff: Duration) -> Self {
        self.acquire_backoff = backoff;
        self
    }

    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval = interval;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// A single worker slot in the pool.
struct Slot {
    proc: Proc,
    /// Tasks completed by processes in this slot.
    tasks_completed: usize,
    /// Number of times this slot's process has been replaced.
    respawns: usize,
}

/// Pool-wide task counters.
#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    dispatched: usize,
    completed: usize,
    dropped: usize,
    respawns: usize,
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of worker slots.
    pub size: usize,
    /// Workers currently holding a task.
    pub busy: usize,
    /// Tasks written to a worker.
    pub tasks_dispatched: usize,
    /// Tasks whose callback was invoked.
    pub tasks_completed: usize,
    /// Tasks whose callback was dropped (crash, reclaim, bad response).
    pub tasks_dropped: usize,
    /// Worker processes replaced since the pool started.
    pub respawns: usize,
    /// Completed tasks per slot, in pool order.
    pub per_slot_completed: Vec<usize>,
    /// Process replacements per slot, in pool order.
    pub per_slot_respawns: Vec<usize>,
}

/// A fixed-size pool of worker processes.
pub struct WorkerPool {
    slots: Vec<Slot>,
    /// Always equals the number of slots whose process is busy.
    busy: usize,
    config: PoolConfig,
    counters: Counters,
}

impl WorkerPool {
    /// Spawn `config.size` workers.
    ///
    /// Any spawn failure aborts construction; already started workers are
    /// killed when their handles drop.
    pub fn new(config: PoolConfig) -> Result<Self> {
        if config.size == 0 {
            return Err(PoolError::InvalidPoolSize(config.size));
        }

        info!(
            workers = config.size,
            command = %config.command,
            "Initializing worker pool"
        );

        let mut slots = Vec::with_capacity(config.size);
        for index in 0..config.size {
            let proc = spawn_worker(&config.command)?;
            info!(slot = index, pid = %proc.pid(), "Worker started");
            slots.push(Slot {
                proc,
                tasks_completed: 0,
                respawns: 0,
            });
        }

        Ok(Self {
            slots,
            busy: 0,
            config,
            counters: Counters::default(),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of worker slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of workers currently holding a task.
    pub fn busy_count(&self) -> usize {
        self.busy
    }

    /// Status of every slot, in pool order.
    pub fn statuses(&self) -> Vec<Status> {
        self.slots.iter().map(|s| s.proc.status()).collect()
    }

    /// OS process id of every slot, in pool order.
    pub fn pids(&self) -> Vec<u32> {
        self.slots
            .iter()
            .map(|s| s.proc.pid().as_raw() as u32)
            .collect()
    }

    /// One supervision pass over every worker.
    ///
    /// Dead workers are reaped and replaced in their slot (a task they held
    /// is dropped), as are workers that answered with malformed output. Busy
    /// workers are checked for a finished response, whose
    /// callback runs before this returns. Returns the first idle slot.
    pub fn poll_once(&mut self) -> Result<Option<usize>> {
        let mut first_idle = None;

        for index in 0..self.slots.len() {
            self.check_alive(index)?;
            self.check_response(index)?;

            if first_idle.is_none() && !self.slots[index].proc.is_busy() {
                first_idle = Some(index);
            }
        }

        self.debug_check_busy();
        Ok(first_idle)
    }

    /// Block until a worker is idle and return its slot.
    ///
    /// Polls with `acquire_backoff` between passes, so at most `size` tasks
    /// are ever in flight.
    pub fn acquire_idle(&mut self) -> Result<usize> {
        loop {
            if let Some(index) = self.poll_once()? {
                return Ok(index);
            }
            thread::sleep(self.config.acquire_backoff);
        }
    }

    /// Hand an encoded frame to the idle worker in `index`.
    ///
    /// A failed write is logged, not returned: the worker is gone and the
    /// next poll replaces it, dropping `callback`.
    pub fn dispatch(&mut self, index: usize, frame: &[u8], callback: Callback) -> Result<()> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or_else(|| PoolError::Worker(format!("No worker slot {}", index)))?;
        if slot.proc.is_busy() {
            return Err(PoolError::Worker(format!("Worker slot {} is busy", index)));
        }

        let pid = slot.proc.pid();
        if let Err(e) = slot.proc.assign(frame, callback) {
            warn!(slot = index, pid = %pid, error = %e, "Failed to write task to worker");
        }
        self.busy += 1;
        self.counters.dispatched += 1;

        trace!(slot = index, pid = %pid, bytes = frame.len(), "Task dispatched");
        self.debug_check_busy();
        Ok(())
    }

    /// Wait for capacity, then dispatch. Returns the slot used.
    pub fn submit_frame(&mut self, frame: &[u8], callback: Callback) -> Result<usize> {
        let index = self.acquire_idle()?;
        self.dispatch(index, frame, callback)?;
        Ok(index)
    }

    /// Kill and replace every busy worker, dropping their tasks.
    ///
    /// Returns the number of workers reclaimed.
    #[instrument(level = "debug", skip(self), fields(busy = self.busy))]
    pub fn reclaim_busy(&mut self) -> Result<usize> {
        let mut reclaimed = 0;

        for index in 0..self.slots.len() {
            if !self.slots[index].proc.is_busy() {
                continue;
            }

            let slot = &mut self.slots[index];
            let pid = slot.proc.pid();
            let age = slot.proc.abandon_task().unwrap_or_default();
            if let Err(e) = slot.proc.kill() {
                warn!(slot = index, pid = %pid, error = %e, "Failed to kill busy worker");
            }
            forward_stderr(&mut slot.proc, index);

            warn!(
                slot = index,
                pid = %pid,
                task_age_ms = age.as_millis() as u64,
                "Reclaimed busy worker; its task was dropped"
            );

            self.busy -= 1;
            self.counters.dropped += 1;
            reclaimed += 1;
            self.respawn(index)?;
        }

        self.debug_check_busy();
        Ok(reclaimed)
    }

    /// Get statistics about the worker pool.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.slots.len(),
            busy: self.busy,
            tasks_dispatched: self.counters.dispatched,
            tasks_completed: self.counters.completed,
            tasks_dropped: self.counters.dropped,
            respawns: self.counters.respawns,
            per_slot_completed: self.slots.iter().map(|s| s.tasks_completed).collect(),
            per_slot_respawns: self.slots.iter().map(|s| s.respawns).collect(),
        }
    }

    /// Stop every worker and release the pool.
    pub fn shutdown(self) {
        drop(self);
    }

    /// Reap and replace the worker in `index` if its process has exited.
    fn check_alive(&mut self, index: usize) -> Result<()> {
        let slot = &mut self.slots[index];
        let pid = slot.proc.pid();

        let reason = match slot.proc.try_wait() {
            Ok(None) => {
                forward_stderr(&mut slot.proc, index);
                return Ok(());
            }
            Ok(Some(status)) => TerminationReason::from(status),
            // Already reaped: a previous respawn attempt failed.
            Err(_) => TerminationReason::Unknown,
        };

        forward_stderr(&mut slot.proc, index);

        if let Some(age) = slot.proc.abandon_task() {
            warn!(
                slot = index,
                pid = %pid,
                reason = %reason,
                task_age_ms = age.as_millis() as u64,
                "Worker died while busy; its task was dropped"
            );
            self.busy -= 1;
            self.counters.dropped += 1;
        } else if reason.is_success() {
            info!(slot = index, pid = %pid, reason = %reason, "Worker exited");
        } else {
            warn!(slot = index, pid = %pid, reason = %reason, "Idle worker died");
        }

        self.respawn(index)
    }

    /// Collect a finished response from a busy worker, if there is one.
    ///
    /// A worker that sent malformed output may still write the rest of it
    /// later, so it is replaced rather than given another task.
    fn check_response(&mut self, index: usize) -> Result<()> {
        let slot = &mut self.slots[index];
        if !slot.proc.is_busy() {
            return Ok(());
        }
        let pid = slot.proc.pid();

        match slot.proc.poll_response() {
            Ok(ResponsePoll::Pending) => {}
            Ok(ResponsePoll::Complete {
                callback,
                value,
                elapsed,
            }) => {
                forward_stderr(&mut slot.proc, index);
                slot.tasks_completed += 1;
                self.busy -= 1;
                self.counters.completed += 1;
                debug!(
                    slot = index,
                    pid = %pid,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Task completed"
                );
                callback(value);
            }
            Ok(ResponsePoll::Malformed { error, elapsed }) => {
                forward_stderr(&mut slot.proc, index);
                self.busy -= 1;
                self.counters.dropped += 1;
                warn!(
                    slot = index,
                    pid = %pid,
                    error = %error,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Worker sent a malformed response; its task was dropped"
                );
                return self.respawn(index);
            }
            Err(e) => {
                warn!(slot = index, pid = %pid, error = %e, "Failed to read from worker");
            }
        }
        Ok(())
    }

    /// Replace the process in `index` with a fresh one.
    ///
    /// The old process is reaped first so a slot never has two live
    /// processes.
    fn respawn(&mut self, index: usize) -> Result<()> {
        let slot = &mut self.slots[index];
        let _ = slot.proc.kill();

        let proc = spawn_worker(&self.config.command)?;
        info!(
            slot = index,
            old_pid = %slot.proc.pid(),
            pid = %proc.pid(),
            "Worker respawned"
        );
        slot.proc = proc;
        slot.respawns += 1;
        self.counters.respawns += 1;
        Ok(())
    }

    fn debug_check_busy(&self) {
        debug_assert_eq!(
            self.busy,
            self.slots.iter().filter(|s| s.proc.is_busy()).count(),
            "busy counter out of sync with worker states"
        );
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let abandoned = self
            .slots
            .iter_mut()
            .filter_map(|s| s.proc.abandon_task())
            .count();
        if abandoned > 0 {
            debug!(tasks = abandoned, "Shutting down with tasks in flight");
        }
        self.busy = 0;

        // Close every stdin first so workers exit in parallel.
        for slot in &mut self.slots {
            slot.proc.close_stdin();
        }
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Err(e) = slot.proc.stop(self.config.shutdown_timeout) {
                warn!(slot = index, pid = %slot.proc.pid(), error = %e, "Failed to stop worker");
            }
            forward_stderr(&mut slot.proc, index);
        }
        info!(workers = self.slots.len(), "Worker pool shut down");
    }
}

/// Pass a worker's stderr through to ours.
fn forward_stderr(proc: &mut Proc, index: usize) {
    match proc.forward_stderr(&mut io::stderr()) {
        Ok(0) => {}
        Ok(bytes) => trace!(slot = index, bytes, "Forwarded worker stderr"),
        Err(e) => trace!(slot = index, error = %e, "Could not drain worker stderr"),
    }
}
