//! Role-specific controllers.
//!
//! A process is either the master, which owns the pool and submits tasks, or
//! a worker, which serves them. The choice is made once from the command line
//! and carried in [`Controller`].

use crate::error::Result;
use crate::role::Role;
use crate::worker::frame;
use crate::worker::pool::{PoolConfig, PoolStats, WorkerPool};
use crate::worker::proc::Status;
use crate::worker::protocol;
use crate::worker::worker_main::WorkerController;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How a call to [`MasterController::wait`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Every submitted task finished or was dropped.
    Drained,
    /// The deadline passed; busy workers were killed and replaced.
    TimedOut { reclaimed: usize },
}

/// Master-role controller: a task-submission facade over [`WorkerPool`].
pub struct MasterController {
    pool: WorkerPool,
}

impl MasterController {
    /// Start the pool.
    pub fn new(config: PoolConfig) -> Result<Self> {
        Ok(Self {
            pool: WorkerPool::new(config)?,
        })
    }

    /// Queue `payload` on the next idle worker.
    ///
    /// Blocks while every worker is busy. `callback` runs on this thread
    /// during a later [`tick`](Self::tick), [`wait`](Self::wait) or submit,
    /// with the worker's response. It is dropped without being called if the
    /// worker dies or is reclaimed first. Returns the slot the task went to.
    pub fn submit<T, F>(&mut self, payload: &T, callback: F) -> Result<usize>
    where
        T: Serialize + ?Sized,
        F: FnOnce(Value) + 'static,
    {
        let body = protocol::encode_payload(payload)?;
        let frame = frame::encode(&body)?;
        self.pool.submit_frame(&frame, Box::new(callback))
    }

    /// Like [`submit`](Self::submit), decoding the response into `R` first.
    ///
    /// A response that does not decode as `R` is logged and the callback is
    /// dropped.
    pub fn submit_as<T, R, F>(&mut self, payload: &T, callback: F) -> Result<usize>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
        F: FnOnce(R) + 'static,
    {
        self.submit(payload, move |value| match serde_json::from_value::<R>(value) {
            Ok(response) => callback(response),
            Err(e) => warn!(error = %e, "Worker response has an unexpected shape"),
        })
    }

    /// Sleep for `sleep`, then run one supervision pass.
    ///
    /// Lets long-running masters collect responses and replace dead workers
    /// between submissions.
    pub fn tick(&mut self, sleep: Duration) -> Result<()> {
        if !sleep.is_zero() {
            thread::sleep(sleep);
        }
        self.pool.poll_once()?;
        Ok(())
    }

    /// Poll until no worker is busy.
    ///
    /// With a non-zero `timeout`, busy workers still running at the deadline
    /// are killed and respawned and their callbacks dropped. `None` and
    /// `Some(Duration::ZERO)` both wait indefinitely.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<WaitOutcome> {
        let deadline = timeout.filter(|t| !t.is_zero());
        let start = Instant::now();

        loop {
            self.pool.poll_once()?;
            if self.pool.busy_count() == 0 {
                debug!(elapsed_ms = start.elapsed().as_millis() as u64, "Pool drained");
                return Ok(WaitOutcome::Drained);
            }

            if let Some(limit) = deadline
                && start.elapsed() >= limit
            {
                let reclaimed = self.pool.reclaim_busy()?;
                warn!(
                    reclaimed,
                    timeout_ms = limit.as_millis() as u64,
                    "Drain deadline passed"
                );
                return Ok(WaitOutcome::TimedOut { reclaimed });
            }

            thread::sleep(self.pool.config().drain_interval);
        }
    }

    pub fn busy_count(&self) -> usize {
        self.pool.busy_count()
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn statuses(&self) -> Vec<Status> {
        self.pool.statuses()
    }

    pub fn pids(&self) -> Vec<u32> {
        self.pool.pids()
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Stop every worker. Pending callbacks are dropped.
    pub fn shutdown(self) {
        self.pool.shutdown();
    }
}

/// The controller for this process, fixed at startup.
pub enum Controller {
    Master(MasterController),
    Worker(WorkerController),
}

impl Controller {
    /// Build the controller for `role`.
    ///
    /// The pool is only started in the master role; a worker never spawns
    /// processes.
    pub fn new<Req, Resp, H>(role: Role, config: PoolConfig, handler: H) -> Result<Self>
    where
        Req: DeserializeOwned,
        Resp: Serialize,
        H: FnMut(Req) -> Resp + 'static,
    {
        match role {
            Role::Master => Ok(Self::Master(MasterController::new(config)?)),
            Role::Worker => Ok(Self::Worker(WorkerController::new(handler))),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::Master(_) => Role::Master,
            Self::Worker(_) => Role::Worker,
        }
    }
}

/// Run a program in whichever role this process was started with.
///
/// In the worker role this serves requests with `handler` and never returns.
/// In the master role it starts the pool, calls `master`, drains the pool and
/// shuts it down.
pub fn run<M, Req, Resp, H>(role: Role, config: PoolConfig, master: M, handler: H) -> Result<()>
where
    M: FnOnce(&mut MasterController) -> Result<()>,
    Req: DeserializeOwned,
    Resp: Serialize,
    H: FnMut(Req) -> Resp + 'static,
{
    match Controller::new(role, config, handler)? {
        Controller::Worker(worker) => worker.run(),
        Controller::Master(mut controller) => {
            master(&mut controller)?;
            controller.wait(None)?;

            let stats = controller.stats();
            info!(
                completed = stats.tasks_completed,
                dropped = stats.tasks_dropped,
                respawns = stats.respawns,
                "All tasks finished"
            );
            controller.shutdown();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::spawn::SpawnCommand;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// `cat` echoes the whole frame back, so the header makes every response
    /// malformed. These tests only exercise controller plumbing; the full
    /// request/response path is covered by the integration tests.
    fn cat_master(size: usize) -> MasterController {
        let config = PoolConfig::new(size, SpawnCommand::new("cat"))
            .with_acquire_backoff(Duration::from_millis(5))
            .with_drain_interval(Duration::from_millis(2));
        MasterController::new(config).unwrap()
    }

    #[test]
    fn test_master_starts_idle() {
        let master = cat_master(2);
        assert_eq!(master.len(), 2);
        assert!(!master.is_empty());
        assert_eq!(master.busy_count(), 0);
        assert_eq!(master.statuses(), vec![Status::Idle, Status::Idle]);
        master.shutdown();
    }

    #[test]
    fn test_wait_on_idle_pool_drains_immediately() {
        let mut master = cat_master(1);
        let start = Instant::now();
        assert_eq!(master.wait(None).unwrap(), WaitOutcome::Drained);
        assert_eq!(
            master.wait(Some(Duration::from_millis(500))).unwrap(),
            WaitOutcome::Drained
        );
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_malformed_response_drops_callback() {
        let mut master = cat_master(1);
        let called = Rc::new(RefCell::new(false));
        let flag = Rc::clone(&called);

        master
            .submit(&serde_json::json!({"id": "A"}), move |_| {
                *flag.borrow_mut() = true
            })
            .unwrap();
        assert_eq!(master.busy_count(), 1);

        assert_eq!(master.wait(None).unwrap(), WaitOutcome::Drained);
        assert!(!*called.borrow());
        assert_eq!(master.stats().tasks_dropped, 1);
    }

    #[test]
    fn test_tick_without_sleep() {
        let mut master = cat_master(1);
        master.tick(Duration::ZERO).unwrap();
        assert_eq!(master.busy_count(), 0);
    }

    #[test]
    fn test_wait_timeout_reclaims_busy_worker() {
        // `sleep` never answers, so the task is still busy at the deadline.
        let config = PoolConfig::new(1, SpawnCommand::new("sleep").arg("30"))
            .with_drain_interval(Duration::from_millis(2))
            .with_shutdown_timeout(Duration::from_millis(50));
        let mut master = MasterController::new(config).unwrap();
        let before = master.pids();

        master.submit(&1, |_| panic!("callback must not run")).unwrap();

        let start = Instant::now();
        let outcome = master.wait(Some(Duration::from_millis(100))).unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut { reclaimed: 1 });
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(master.busy_count(), 0);
        assert_ne!(master.pids(), before);
    }

    #[test]
    fn test_controller_role() {
        let worker = Controller::new(
            Role::Worker,
            PoolConfig::new(0, SpawnCommand::new("unused")),
            |v: Value| v,
        )
        .unwrap();
        assert_eq!(worker.role(), Role::Worker);
    }

    #[test]
    fn test_controller_master_rejects_empty_pool() {
        let result = Controller::new(
            Role::Master,
            PoolConfig::new(0, SpawnCommand::new("cat")),
            |v: Value| v,
        );
        assert!(matches!(
            result,
            Err(crate::error::PoolError::InvalidPoolSize(0))
        ));
    }
}
