//! Error types used by the jobvisor runtime and job dispatch.
//!
//! This module defines three error enums, one per failure domain:
//!
//! - [`RuntimeError`] — fatal configuration/startup errors raised by the daemon itself.
//! - [`QueueError`] — transport-level failures talking to the queue broker.
//! - [`JobError`] — failures of individual job dispatches (handlers and hooks).
//!
//! The split matters for recovery: a [`QueueError::NotConnected`] is retried with
//! bounded backoff, a [`QueueError::TimedOut`] is the normal idle signal, while a
//! [`JobError`] buries the job and crashes the owning runner (the pool replaces it).

use thiserror::Error;

/// # Errors raised by the daemon at startup.
///
/// These represent fatal configuration problems and surface from
/// [`Supervisor::run`](crate::Supervisor::run) before any runner is spawned,
/// never mid-run.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Work was requested but the handler registry is empty.
    #[error("no job handlers registered")]
    NoHandlers,

    /// The configured job subset names a job with no registered handler.
    #[error("no handler registered for job {name:?}")]
    NoSuchJob {
        /// The offending job name.
        name: String,
    },

    /// Installing the OS signal listeners failed.
    #[error("failed to install signal handlers: {0}")]
    Signal(#[from] std::io::Error),
}

/// # Transport-level failures from a queue connection.
///
/// Any [`QueueClient`](crate::QueueClient) method may return
/// [`QueueError::NotConnected`]; the client never retries internally — the
/// calling runner owns the reconnection policy (see
/// [`RetryPolicy`](crate::RetryPolicy)), because the retry context (what was
/// being attempted) lives one layer up.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum QueueError {
    /// The connection to the broker has dropped.
    #[error("not connected to the queue broker")]
    NotConnected,

    /// A bounded `reserve` elapsed without a job becoming available.
    ///
    /// Expected during normal operation; callers treat it as an idle tick.
    #[error("reserve timed out with no job available")]
    TimedOut,
}

/// # Failures of a single job dispatch.
///
/// Raised by handlers and before/after hooks, or synthesized by the runner
/// when the job cannot be dispatched at all. Policy: the job is buried (kept
/// for inspection, not deleted), every error hook for the job name observes
/// the error, and the runner exits so the pool can replace it.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum JobError {
    /// A handler or hook reported failure.
    #[error("job failed: {error}")]
    Failed {
        /// The underlying error message.
        error: String,
    },

    /// The job body decoded, but no handler is registered under its name.
    #[error("no handler registered for job {name:?}")]
    Unknown {
        /// The job name carried in the payload.
        name: String,
    },

    /// The job body did not decode as a `[name, args]` payload.
    #[error("malformed job payload: {reason}")]
    Malformed {
        /// Decoder error description.
        reason: String,
    },
}

impl JobError {
    /// Convenience constructor for handler/hook failures.
    ///
    /// # Example
    /// ```
    /// use jobvisor::JobError;
    ///
    /// let err = JobError::failed("remote API returned 503");
    /// assert_eq!(err.to_string(), "job failed: remote API returned 503");
    /// ```
    pub fn failed(error: impl Into<String>) -> Self {
        JobError::Failed {
            error: error.into(),
        }
    }
}
