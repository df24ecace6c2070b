//! # jobvisor
//!
//! **Jobvisor** is a background job-processing daemon runtime for Rust.
//!
//! It pulls units of work ("jobs") from a queue broker, dispatches each to an
//! application-registered handler, and manages a pool of concurrent runners
//! whose size can be changed at runtime — via OS signals — without losing
//! in-flight work. The crate is a library: the broker transport is a trait
//! seam, and an in-process [`MemoryBroker`] ships for tests and demos.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  OS signals (QUIT/TERM/INT/WINCH/TTIN/TTOU/USR1)
//!        │ tagged, FIFO
//!        ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Supervisor (master loop)                                         │
//! │  - drains the control-event queue strictly in arrival order       │
//! │  - reconciles the pool toward the desired runner count            │
//! │  - runs the tiered shutdown protocol (bounded by `patience`)      │
//! └──────┬────────────────────────────────────────────────────────────┘
//!        ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  RunnerPool                                                       │
//! │  - active: slot → runner      - retiring: slot → runner           │
//! │  - spawn / soft-quit / kill / reap / replace-on-crash             │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!   ┌──────────┐       ┌──────────┐       ┌──────────┐
//!   │ Runner 0 │       │ Runner 1 │  ...  │ Runner N │   (one broker
//!   └────┬─────┘       └────┬─────┘       └────┬─────┘    connection each)
//!        │ reserve/delete/bury/release          │
//!        ▼                                      ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Queue broker (named tubes)                                       │
//! └───────────────────────────────────────────────────────────────────┘
//!
//! dispatch: payload [name, args] ─► HandlerRegistry lookup
//!           ─► before hooks (global, then scoped)
//!           ─► handler
//!           ─► after hooks (global, then scoped)
//! ```
//!
//! ### Runner lifecycle
//! ```text
//! loop {
//!   ├─► soft-quit / stop requested? ─► exit cleanly
//!   ├─► reserve(timeout)
//!   │     ├─ TimedOut      ─► idle tick, loop
//!   │     ├─ NotConnected  ─► bounded linear backoff, reconnect, retry
//!   │     └─ job           ─► dispatch
//!   └─► dispatch
//!         ├─ Ok            ─► delete job, loop
//!         ├─ Err           ─► bury job, run error hooks, exit crashed
//!         │                   (the pool spawns a replacement)
//!         └─ shutdown hit  ─► release job (no error hooks), exit cleanly
//! }
//! ```
//!
//! ## Signals
//! | Signal    | Effect                                                   |
//! |-----------|----------------------------------------------------------|
//! | `QUIT`    | graceful shutdown: drain in-flight work, bounded by patience |
//! | `TERM`/`INT` | immediate shutdown: release in-flight work and exit   |
//! | `WINCH`   | set the desired runner count to zero                     |
//! | `TTIN`    | one more runner                                          |
//! | `TTOU`    | one fewer runner                                         |
//! | `USR1`    | log a pool snapshot (diagnostic)                         |
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use jobvisor::{
//!     enqueue, Config, HandlerFn, HandlerRegistry, JobError, MemoryBroker, PutOptions,
//!     Supervisor,
//! };
//! use serde_json::{json, Value};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(HandlerRegistry::new());
//!     registry.register(
//!         "jack.work",
//!         HandlerFn::arc(|args: Value| async move {
//!             println!("[jack.work] {args}");
//!             Ok::<_, JobError>(())
//!         }),
//!     );
//!
//!     let broker = MemoryBroker::new();
//!     let mut producer = broker.client();
//!     enqueue(&mut producer, "jack.work", json!({"val": 42}), &PutOptions::default()).await?;
//!
//!     let mut config = Config::default();
//!     config.runner_count = 2;
//!
//!     // runs until a shutdown signal completes the protocol
//!     Supervisor::new(config, registry, Arc::new(broker)).run().await?;
//!     Ok(())
//! }
//! ```

mod config;
mod core;
mod error;
mod jobs;
mod queue;
mod signals;

// ---- Public re-exports ----

pub use crate::core::Supervisor;
pub use config::Config;
pub use error::{JobError, QueueError, RuntimeError};
pub use jobs::{
    enqueue, ErrorHook, ErrorHookFn, ErrorHookRef, Handler, HandlerFn, HandlerRef,
    HandlerRegistry, Hook, HookFn, HookRef, JobContext, Payload,
};
pub use queue::{
    Connect, Job, JobId, MemoryBroker, MemoryClient, PutOptions, QueueClient, RetryPolicy,
};
