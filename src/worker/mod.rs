//! Worker subprocess pool.
//!
//! The master keeps a fixed number of worker processes, each a copy of the
//! running program started with `role=worker`. Requests go down the worker's
//! stdin as length-prefixed JSON frames; responses come back on stdout as bare
//! JSON. Everything on the master side is driven by polling from one thread.
//!
//! # Architecture
//!
//! ```text
//!                     ┌─────────────────┐
//!                     │ Master Process  │
//!                     │  (WorkerPool)   │
//!                     └────────┬────────┘
//!                              │  frame ↓   JSON ↑
//!               ┌──────────────┼──────────────┐
//!               │              │              │
//!         ┌─────▼─────┐  ┌─────▼─────┐  ┌─────▼─────┐
//!         │ Worker 1  │  │ Worker 2  │  │ Worker N  │
//!         │ (process) │  │ (process) │  │ (process) │
//!         │  handler  │  │  handler  │  │  handler  │
//!         └───────────┘  └───────────┘  └───────────┘
//! ```
//!
//! # Features
//!
//! - **Process isolation**: A crashing handler takes down only its worker
//! - **Crash recovery**: Dead workers are respawned in the same slot
//! - **Bounded concurrency**: At most one task per worker is ever in flight
//! - **Reclaim**: Tasks still running at a drain deadline are killed

pub mod frame;
pub mod ipc;
pub mod pool;
pub mod proc;
pub mod protocol;
pub mod signals;
pub mod spawn;
pub mod worker_main;

pub use pool::{PoolConfig, PoolStats, WorkerPool};
pub use proc::{Callback, Status};
pub use spawn::SpawnCommand;
pub use worker_main::{WorkerConfig, WorkerController};
