//! # Global daemon configuration.
//!
//! Provides [`Config`], the centralized settings for the supervisor runtime.
//!
//! Config is consumed once by [`Supervisor::new`](crate::Supervisor::new);
//! runners inherit the reserve timeout and reconnection policy from it.
//!
//! ## Sentinel values
//! - `jobs = None` → runners watch every registered job name
//! - `runner_count = 0` → the daemon starts idle (scale up via signals)

use std::time::Duration;

use crate::queue::RetryPolicy;

/// Global configuration for the job daemon.
///
/// Defines:
/// - **Pool size**: how many runners to keep alive
/// - **Shutdown behavior**: patience deadline for graceful termination
/// - **Master cadence**: how often the supervisor wakes when idle
/// - **Runner behavior**: reserve timeout and reconnection policy
///
/// ## Field semantics
/// - `runner_count`: desired number of concurrent runners (adjustable at
///   runtime via signals)
/// - `jobs`: job-name subset each runner watches (`None` = all registered)
/// - `patience`: maximum wall-clock wait for graceful shutdown before
///   remaining runners are force-terminated
/// - `heartbeat`: idle wake interval of the master loop
/// - `reserve_timeout`: bound on a single reservation attempt; keeps every
///   runner periodically re-checking its stop flags
/// - `retry`: bounded linear backoff applied on broker disconnects
#[derive(Clone, Debug)]
pub struct Config {
    /// Desired number of concurrent runners.
    pub runner_count: usize,

    /// Job names the runners watch.
    ///
    /// `None` (or an empty list) means every name in the handler registry.
    /// Names listed here must have a registered handler; `Supervisor::run`
    /// rejects the configuration otherwise.
    pub jobs: Option<Vec<String>>,

    /// Maximum time shutdown waits for in-flight jobs to finish.
    ///
    /// When the deadline passes, remaining runners are killed and their jobs
    /// abandoned. Liveness over durability: the process must eventually exit.
    pub patience: Duration,

    /// Idle wake interval of the master loop.
    ///
    /// The supervisor also wakes immediately on any control event; this only
    /// bounds how long it sleeps with nothing to do. After a detected
    /// suspend/hibernation gap the next sleep is shortened (coarse heuristic,
    /// not a timing contract).
    pub heartbeat: Duration,

    /// Bound on a single `reserve` call.
    ///
    /// A timeout is not an error; it is the idle signal that lets a runner
    /// notice soft-quit and stop requests between jobs.
    pub reserve_timeout: Duration,

    /// Reconnection policy applied by runners on `NotConnected`.
    pub retry: RetryPolicy,
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `runner_count = 1`
    /// - `jobs = None` (watch everything registered)
    /// - `patience = 60s`
    /// - `heartbeat = 30s`
    /// - `reserve_timeout = 1s`
    /// - `retry = RetryPolicy::default()` (6 retries, 1s unit)
    fn default() -> Self {
        Self {
            runner_count: 1,
            jobs: None,
            patience: Duration::from_secs(60),
            heartbeat: Duration::from_secs(30),
            reserve_timeout: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }
}
