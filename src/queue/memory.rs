//! # In-process queue broker.
//!
//! [`MemoryBroker`] implements the full client contract against process-local
//! state: named tubes, priority ordering, delayed readiness, and the
//! reserved/buried/deleted job states. It exists so applications (and this
//! crate's own tests) can exercise handlers, hooks, and the whole daemon
//! lifecycle without a broker process.
//!
//! ## Architecture
//! ```text
//! MemoryBroker ──clone──► MemoryBroker (same shared state)
//!      │
//!      ├─ client() ─────► MemoryClient (own watch set)
//!      └─ Connect impl ─► Box<dyn QueueClient> for runners
//!
//! BrokerState:
//!   ready[tube]  ──reserve──► reserved{id}  ──delete──► deleted
//!        ▲                        │
//!        └────────release────────┤
//!                                 └──bury────► buried
//! ```
//!
//! ## Rules
//! - A job is handed to at most one reserver; `reserve` moves it out of the
//!   ready list under the state lock, so two clients can never hold the same
//!   job.
//! - Lower `priority` values win; ties go to the older job.
//! - `delay` is honored: a job is invisible until its ready time passes.
//! - `go_offline` makes every operation (and new connections) fail with
//!   `NotConnected` until `go_online`; `fail_connects(n)` fails only the next
//!   `n` connection attempts. Both exist to test the reconnection policy.
//! - `ttr` is accepted but not enforced; there is no deadline scheduler here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::QueueError;
use crate::queue::client::{Connect, Job, JobId, PutOptions, QueueClient};

/// How long a waiting `reserve` sleeps between readiness checks.
///
/// Bounds the latency of delayed jobs becoming visible; puts wake waiters
/// immediately via the notifier.
const RESERVE_TICK: Duration = Duration::from_millis(20);

#[derive(Clone)]
struct StoredJob {
    id: u64,
    tube: String,
    body: Vec<u8>,
    priority: u32,
    ready_at: Instant,
}

#[derive(Default)]
struct BrokerState {
    next_id: u64,
    offline: bool,
    connect_failures: u32,
    ready: HashMap<String, Vec<StoredJob>>,
    reserved: HashMap<u64, StoredJob>,
    buried: Vec<StoredJob>,
    deleted: Vec<u64>,
}

struct Shared {
    state: Mutex<BrokerState>,
    signal: Notify,
}

/// In-process broker. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                signal: Notify::new(),
            }),
        }
    }

    /// Opens a client on this broker.
    ///
    /// Like a fresh broker connection, the client starts out watching only
    /// the `"default"` tube.
    pub fn client(&self) -> MemoryClient {
        MemoryClient {
            shared: Arc::clone(&self.shared),
            watching: vec!["default".to_string()],
        }
    }

    /// Simulates losing the broker: every operation fails until [`MemoryBroker::go_online`].
    pub fn go_offline(&self) {
        self.lock().offline = true;
        // wake blocked reservers so they observe the disconnect
        self.shared.signal.notify_waiters();
    }

    /// Restores connectivity.
    pub fn go_online(&self) {
        self.lock().offline = false;
        self.shared.signal.notify_waiters();
    }

    /// Fails the next `n` connection attempts with `NotConnected`.
    pub fn fail_connects(&self, n: u32) {
        self.lock().connect_failures = n;
    }

    /// Jobs ready (not delayed) in `tube`.
    pub fn ready_len(&self, tube: &str) -> usize {
        let now = Instant::now();
        self.lock()
            .ready
            .get(tube)
            .map(|jobs| jobs.iter().filter(|j| j.ready_at <= now).count())
            .unwrap_or(0)
    }

    /// Currently reserved jobs across all tubes.
    pub fn reserved_len(&self) -> usize {
        self.lock().reserved.len()
    }

    /// Ids of buried jobs, in burial order.
    pub fn buried_ids(&self) -> Vec<JobId> {
        self.lock().buried.iter().map(|j| JobId(j.id)).collect()
    }

    /// Ids of deleted jobs, in deletion order.
    pub fn deleted_ids(&self) -> Vec<JobId> {
        self.lock().deleted.iter().copied().map(JobId).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Connect for MemoryBroker {
    async fn connect(&self) -> Result<Box<dyn QueueClient>, QueueError> {
        {
            let mut state = self.lock();
            if state.connect_failures > 0 {
                state.connect_failures -= 1;
                return Err(QueueError::NotConnected);
            }
            if state.offline {
                return Err(QueueError::NotConnected);
            }
        }
        Ok(Box::new(self.client()))
    }
}

/// One logical connection to a [`MemoryBroker`].
pub struct MemoryClient {
    shared: Arc<Shared>,
    watching: Vec<String>,
}

impl MemoryClient {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BrokerState>, QueueError> {
        let state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if state.offline {
            return Err(QueueError::NotConnected);
        }
        Ok(state)
    }

    /// Moves the best ready job from the watched tubes into `reserved`.
    fn take_ready(state: &mut BrokerState, watching: &[String]) -> Option<Job> {
        let now = Instant::now();
        let mut best: Option<(u32, u64, String)> = None;
        for tube in watching {
            if let Some(jobs) = state.ready.get(tube) {
                for job in jobs.iter().filter(|j| j.ready_at <= now) {
                    let key = (job.priority, job.id);
                    if best
                        .as_ref()
                        .map(|(p, i, _)| key < (*p, *i))
                        .unwrap_or(true)
                    {
                        best = Some((job.priority, job.id, tube.clone()));
                    }
                }
            }
        }
        let (_, id, tube) = best?;
        let jobs = state.ready.get_mut(&tube)?;
        let pos = jobs.iter().position(|j| j.id == id)?;
        let stored = jobs.remove(pos);
        let job = Job {
            id: JobId(stored.id),
            tube: stored.tube.clone(),
            body: stored.body.clone(),
        };
        state.reserved.insert(stored.id, stored);
        Some(job)
    }
}

#[async_trait]
impl QueueClient for MemoryClient {
    async fn watch(&mut self, tube: &str) -> Result<(), QueueError> {
        self.lock()?;
        if !self.watching.iter().any(|t| t == tube) {
            self.watching.push(tube.to_string());
        }
        Ok(())
    }

    async fn ignore(&mut self, tube: &str) -> Result<(), QueueError> {
        self.lock()?;
        self.watching.retain(|t| t != tube);
        Ok(())
    }

    async fn watched(&mut self) -> Result<Vec<String>, QueueError> {
        self.lock()?;
        Ok(self.watching.clone())
    }

    async fn reserve(&mut self, timeout: Duration) -> Result<Job, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = self.lock()?;
                if let Some(job) = Self::take_ready(&mut state, &self.watching) {
                    return Ok(job);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(QueueError::TimedOut);
            }
            let wait = (deadline - now).min(RESERVE_TICK);
            tokio::select! {
                _ = self.shared.signal.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    async fn put(
        &mut self,
        tube: &str,
        body: &[u8],
        opts: &PutOptions,
    ) -> Result<JobId, QueueError> {
        let id = {
            let mut state = self.lock()?;
            state.next_id += 1;
            let id = state.next_id;
            state.ready.entry(tube.to_string()).or_default().push(StoredJob {
                id,
                tube: tube.to_string(),
                body: body.to_vec(),
                priority: opts.priority,
                ready_at: Instant::now() + opts.delay,
            });
            id
        };
        self.shared.signal.notify_waiters();
        Ok(JobId(id))
    }

    async fn delete(&mut self, job: &Job) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        if state.reserved.remove(&job.id.0).is_some() {
            state.deleted.push(job.id.0);
        } else if let Some(pos) = state.buried.iter().position(|j| j.id == job.id.0) {
            state.buried.remove(pos);
            state.deleted.push(job.id.0);
        }
        Ok(())
    }

    async fn bury(&mut self, job: &Job) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        if let Some(stored) = state.reserved.remove(&job.id.0) {
            state.buried.push(stored);
        }
        Ok(())
    }

    async fn release(&mut self, job: &Job) -> Result<(), QueueError> {
        {
            let mut state = self.lock()?;
            if let Some(mut stored) = state.reserved.remove(&job.id.0) {
                stored.ready_at = Instant::now();
                state
                    .ready
                    .entry(stored.tube.clone())
                    .or_default()
                    .push(stored);
            }
        }
        self.shared.signal.notify_waiters();
        Ok(())
    }
}
