//! forkpool: a fixed-size pool of long-lived worker processes.
//!
//! One binary runs in two roles. The master starts `N` copies of itself with
//! `role=worker` appended, writes length-prefixed JSON requests to their
//! stdin and collects JSON responses from their stdout. Workers that crash
//! are replaced; tasks they held are dropped.
//!
//! ```no_run
//! use forkpool::{PoolConfig, Role};
//!
//! fn main() -> forkpool::Result<()> {
//!     let role = Role::detect(std::env::args());
//!     let config = PoolConfig::for_current_exe(4)?;
//!
//!     forkpool::run(
//!         role,
//!         config,
//!         |master| {
//!             for n in 0..10u64 {
//!                 master.submit(&n, |squared| println!("{squared}"))?;
//!             }
//!             Ok(())
//!         },
//!         |n: u64| n * n,
//!     )
//! }
//! ```

pub mod cli;
pub mod controller;
pub mod demo;
pub mod error;
pub mod logging;
pub mod role;
pub mod worker;

pub use controller::{Controller, MasterController, WaitOutcome, run};
pub use error::{PoolError, Result};
pub use role::{Role, WORKER_ROLE_ARG};
pub use worker::{PoolConfig, PoolStats, SpawnCommand, Status, WorkerConfig, WorkerController};
