//! # Runner pool: slot bookkeeping, reconciliation, and the graveyard.
//!
//! [`RunnerPool`] owns every live runner in two disjoint slot-keyed maps:
//!
//! ```text
//! active                      retiring (graveyard)
//!   slot → RunnerHandle         slot → RunnerHandle
//!
//! spawn ──► active ──retire/dead──► retiring ──joined──► gone
//! ```
//!
//! A slot number is the runner's identity: allocated lowest-free, reused once
//! both maps release it. The pool is owned exclusively by the supervisor's
//! master loop, so all mutation (spawn, retire, reap, slot allocation) is
//! serialized by construction.
//!
//! ## Rules
//! - A slot appears in at most one of the two maps at any instant.
//! - `reconcile(desired)` prefers retiring idle runners (killed and joined
//!   immediately) over busy ones (soft-quit, moved to the graveyard so the
//!   in-flight job can finish).
//! - A runner that ends in [`RunnerExit::Crashed`] — or whose task panicked —
//!   is replaced with a fresh runner unless the pool is shutting down; a
//!   crash must not silently shrink the pool.
//! - A graceful reap leaves busy graveyard runners for the next cycle; a hard
//!   reap kills everything remaining.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::core::runner::{Runner, RunnerExit, RunnerState};
use crate::jobs::HandlerRegistry;
use crate::queue::{Connect, RetryPolicy};

/// Pool-side handle to one runner.
struct RunnerHandle {
    state: Arc<RunnerState>,
    join: JoinHandle<RunnerExit>,
    stop: CancellationToken,
}

/// Owns and reconciles the set of live runners.
pub(crate) struct RunnerPool {
    registry: Arc<HandlerRegistry>,
    connector: Arc<dyn Connect>,
    jobs: Option<Vec<String>>,
    reserve_timeout: Duration,
    retry: RetryPolicy,
    active: HashMap<usize, RunnerHandle>,
    retiring: HashMap<usize, RunnerHandle>,
    shutting_down: bool,
}

impl RunnerPool {
    pub(crate) fn new(
        config: &Config,
        registry: Arc<HandlerRegistry>,
        connector: Arc<dyn Connect>,
    ) -> Self {
        Self {
            registry,
            connector,
            jobs: config.jobs.clone(),
            reserve_timeout: config.reserve_timeout,
            retry: config.retry,
            active: HashMap::new(),
            retiring: HashMap::new(),
            shutting_down: false,
        }
    }

    /// Adjusts the active set toward `desired`, then reaps.
    pub(crate) async fn reconcile(&mut self, desired: usize) {
        while self.active.len() < desired {
            self.spawn_runner();
        }
        while self.active.len() > desired {
            self.retire_one().await;
        }
        self.reap(true).await;
    }

    /// Moves every active runner into the graveyard.
    ///
    /// Busy runners get a soft-quit so their job can finish; idle runners are
    /// cancelled outright. Subsequent [`RunnerPool::reap`] calls drain them.
    pub(crate) fn retire_all(&mut self) {
        self.shutting_down = true;
        let slots: Vec<usize> = self.active.keys().copied().collect();
        for slot in slots {
            if let Some(handle) = self.active.remove(&slot) {
                if handle.state.is_busy() {
                    debug!(slot, "retiring busy runner (soft quit)");
                    handle.state.request_soft_quit();
                } else {
                    debug!(slot, "retiring idle runner");
                    handle.stop.cancel();
                }
                self.retiring.insert(slot, handle);
            }
        }
    }

    /// Collects finished runners and drains the graveyard.
    ///
    /// `graceful = false` is the hard variant: busy graveyard runners are
    /// killed instead of being left for the next cycle.
    pub(crate) async fn reap(&mut self, graceful: bool) {
        let finished: Vec<usize> = self
            .active
            .iter()
            .filter(|(_, handle)| handle.join.is_finished())
            .map(|(slot, _)| *slot)
            .collect();
        for slot in finished {
            if let Some(handle) = self.active.remove(&slot) {
                let crashed = Self::observe_exit(slot, handle.join).await;
                if crashed && !self.shutting_down {
                    warn!(slot, "replacing crashed runner");
                    self.spawn_runner();
                }
            }
        }

        let slots: Vec<usize> = self.retiring.keys().copied().collect();
        for slot in slots {
            let (finished, busy) = match self.retiring.get(&slot) {
                Some(handle) => (handle.join.is_finished(), handle.state.is_busy()),
                None => continue,
            };
            if finished {
                if let Some(handle) = self.retiring.remove(&slot) {
                    Self::observe_exit(slot, handle.join).await;
                }
            } else if graceful && busy {
                // in-flight job gets to finish; make sure it stops afterwards
                if let Some(handle) = self.retiring.get(&slot) {
                    handle.state.request_soft_quit();
                }
            } else if let Some(handle) = self.retiring.remove(&slot) {
                debug!(slot, "killing retiring runner");
                handle.stop.cancel();
                let _ = handle.join.await;
            }
        }
    }

    /// Runners currently in the active set.
    pub(crate) fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Runners currently in the graveyard.
    pub(crate) fn retiring_len(&self) -> usize {
        self.retiring.len()
    }

    /// Whether both maps are empty.
    pub(crate) fn is_empty(&self) -> bool {
        self.active.is_empty() && self.retiring.is_empty()
    }

    /// Logs a snapshot of both maps (driven by the diagnostic signal).
    pub(crate) fn dump(&self) {
        info!(
            active = self.active.len(),
            retiring = self.retiring.len(),
            "runner pool snapshot"
        );
        let mut slots: Vec<usize> = self.active.keys().copied().collect();
        slots.sort_unstable();
        for slot in slots {
            if let Some(handle) = self.active.get(&slot) {
                match handle.state.busy_for() {
                    Some(busy) => {
                        info!(slot, busy_ms = busy.as_millis() as u64, "runner busy")
                    }
                    None => info!(slot, "runner idle"),
                }
            }
        }
        let mut slots: Vec<usize> = self.retiring.keys().copied().collect();
        slots.sort_unstable();
        for slot in slots {
            info!(slot, "runner retiring");
        }
    }

    fn spawn_runner(&mut self) {
        let slot = self.free_slot();
        let (runner, state) = Runner::new(
            slot,
            Arc::clone(&self.registry),
            Arc::clone(&self.connector),
            self.jobs.clone(),
            self.reserve_timeout,
            self.retry,
        );
        let stop = CancellationToken::new();
        let join = tokio::spawn(runner.run(stop.clone()));
        debug!(slot, "runner spawned");
        self.active.insert(slot, RunnerHandle { state, join, stop });
    }

    /// Retires one active runner, preferring an idle victim.
    async fn retire_one(&mut self) {
        let idle = self
            .active
            .iter()
            .find(|(_, handle)| !handle.state.is_busy())
            .map(|(slot, _)| *slot);
        match idle {
            Some(slot) => {
                if let Some(handle) = self.active.remove(&slot) {
                    debug!(slot, "retiring idle runner");
                    handle.stop.cancel();
                    let _ = handle.join.await;
                }
            }
            None => {
                // all busy: soft-quit one and let the graveyard collect it
                let Some(slot) = self.active.keys().next().copied() else {
                    return;
                };
                if let Some(handle) = self.active.remove(&slot) {
                    debug!(slot, "retiring busy runner (soft quit)");
                    handle.state.request_soft_quit();
                    self.retiring.insert(slot, handle);
                }
            }
        }
    }

    /// Lowest slot number not present in either map.
    fn free_slot(&self) -> usize {
        let mut slot = 0;
        while self.active.contains_key(&slot) || self.retiring.contains_key(&slot) {
            slot += 1;
        }
        slot
    }

    /// Joins a finished runner and reports how it ended. Returns crash status.
    async fn observe_exit(slot: usize, join: JoinHandle<RunnerExit>) -> bool {
        match join.await {
            Ok(RunnerExit::Stopped) => {
                debug!(slot, "runner stopped");
                false
            }
            Ok(RunnerExit::Crashed(err)) => {
                error!(slot, error = %err, "runner crashed");
                true
            }
            Err(join_err) => {
                error!(slot, error = %join_err, "runner panicked");
                true
            }
        }
    }
}
