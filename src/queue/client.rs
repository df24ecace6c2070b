//! # Queue client and connector traits.
//!
//! [`QueueClient`] is the seam between the daemon and the message broker: one
//! value wraps one broker connection, and every runner owns its own client so
//! the hot path never contends on a shared transport.
//!
//! The broker model is beanstalk-shaped: named queues ("tubes"), `put` with
//! priority/delay/ttr, reservation with a bounded timeout, and
//! `delete`/`bury`/`release` to finalize a reservation. The wire protocol
//! itself is not defined here — implementations bring their own.
//!
//! ## Rules
//! - Any method may fail with [`QueueError::NotConnected`]; the client never
//!   retries internally. Callers apply the reconnection policy.
//! - Reservations are drawn only from the watched tube set; `watch`/`ignore`
//!   mutate that set on the broker side.
//! - `reserve` must be cancel-safe: dropping the future before completion
//!   must not leave a job reserved.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueError;

/// Broker-assigned job identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reserved job: broker handle plus the raw body.
///
/// Owned by exactly one runner between `reserve` and `delete`/`bury`/`release`.
#[derive(Clone, Debug)]
pub struct Job {
    /// Broker-assigned identifier.
    pub id: JobId,
    /// Tube the job was reserved from.
    pub tube: String,
    /// Raw payload bytes (JSON `[name, args]` for jobs produced by
    /// [`enqueue`](crate::enqueue)).
    pub body: Vec<u8>,
}

/// Options for `put`.
///
/// Defaults match the conventional producer settings: priority `65536`,
/// no delay, 120s time-to-run.
#[derive(Clone, Copy, Debug)]
pub struct PutOptions {
    /// Priority; lower values are reserved first.
    pub priority: u32,
    /// Delay before the job becomes ready.
    pub delay: Duration,
    /// Time-to-run granted to the reserving consumer.
    pub ttr: Duration,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            priority: 65_536,
            delay: Duration::ZERO,
            ttr: Duration::from_secs(120),
        }
    }
}

/// # One connection to the queue broker.
///
/// Methods take `&mut self`: a client is owned by a single execution unit and
/// is not shared. All methods may return [`QueueError::NotConnected`] once the
/// transport has dropped; the value is then stale and should be discarded.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Adds `tube` to the set reservations are drawn from.
    async fn watch(&mut self, tube: &str) -> Result<(), QueueError>;

    /// Removes `tube` from the watched set.
    async fn ignore(&mut self, tube: &str) -> Result<(), QueueError>;

    /// Returns the tubes this connection currently watches.
    async fn watched(&mut self) -> Result<Vec<String>, QueueError>;

    /// Reserves the next ready job from the watched set.
    ///
    /// Returns [`QueueError::TimedOut`] when no job becomes available within
    /// `timeout` — the normal idle signal, not a failure.
    async fn reserve(&mut self, timeout: Duration) -> Result<Job, QueueError>;

    /// Reserves with no overall bound, retrying internal timeouts.
    async fn reserve_blocking(&mut self) -> Result<Job, QueueError> {
        loop {
            match self.reserve(Duration::from_secs(30)).await {
                Err(QueueError::TimedOut) => continue,
                other => return other,
            }
        }
    }

    /// Inserts a job into `tube`; returns the broker-assigned id.
    async fn put(
        &mut self,
        tube: &str,
        body: &[u8],
        opts: &PutOptions,
    ) -> Result<JobId, QueueError>;

    /// Removes a reserved job from the broker entirely.
    async fn delete(&mut self, job: &Job) -> Result<(), QueueError>;

    /// Marks a reserved job failed-but-preserved for inspection or manual retry.
    async fn bury(&mut self, job: &Job) -> Result<(), QueueError>;

    /// Returns a reserved job to the ready state for another consumer.
    async fn release(&mut self, job: &Job) -> Result<(), QueueError>;
}

/// # Connection factory.
///
/// The seam the reconnection policy goes through: on `NotConnected` a runner
/// discards its stale client and asks its `Connect` for a fresh one.
#[async_trait]
pub trait Connect: Send + Sync + 'static {
    /// Opens a new broker connection.
    async fn connect(&self) -> Result<Box<dyn QueueClient>, QueueError>;
}
