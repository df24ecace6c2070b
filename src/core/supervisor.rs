//! # Supervisor: the master loop and tiered shutdown.
//!
//! The [`Supervisor`] owns the [`RunnerPool`] and a FIFO queue of control
//! events fed by the OS signal listener. It is a cooperative single-threaded
//! loop: the only thing it ever blocks on is a bounded wait for the next
//! control event.
//!
//! ## Master loop
//! ```text
//! run():
//!   validate config (fatal errors surface here, never mid-run)
//!   install signal listener ──► ControlEvent channel (FIFO)
//!   loop {
//!     ├─► reap finished runners (crash policy applies)
//!     ├─► reconcile pool toward desired count
//!     └─► timeout(sleep, recv):
//!           ├─ idle tick            → loop (sleep shortened after a
//!           │                          suspend/hibernation gap)
//!           ├─ GracefulShutdown     → break
//!           ├─ ImmediateShutdown    → stop(hard), break
//!           ├─ ScaleToZero          → desired = 0
//!           ├─ Increment/Decrement  → desired ± 1 (floor 0)
//!           └─ DumpState            → pool snapshot to the log
//!   }
//!   stop(graceful)
//! ```
//!
//! ## Shutdown protocol
//! Tiered and bounded by [`Config::patience`]: every active runner is marked
//! for retirement (soft-quit if busy, cancelled if idle), then the graveyard
//! is reaped every 100ms until empty or the deadline passes; one final hard
//! reap kills whatever remains. Liveness over durability — the process must
//! eventually exit, and killed runners release their in-flight jobs back to
//! the broker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time;
use tracing::{debug, info};

use crate::config::Config;
use crate::core::pool::RunnerPool;
use crate::error::RuntimeError;
use crate::jobs::HandlerRegistry;
use crate::queue::Connect;
use crate::signals::{self, ControlEvent, ControlReceiver};

/// Floor for the master's idle sleep, and the shutdown poll interval.
const MIN_SLEEP: Duration = Duration::from_millis(100);
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Coordinates the runner pool, control events, and graceful shutdown.
pub struct Supervisor {
    config: Config,
    registry: Arc<HandlerRegistry>,
    connector: Arc<dyn Connect>,
}

impl Supervisor {
    /// Creates a supervisor over the given registry and broker connector.
    pub fn new(
        config: Config,
        registry: Arc<HandlerRegistry>,
        connector: Arc<dyn Connect>,
    ) -> Self {
        Self {
            config,
            registry,
            connector,
        }
    }

    /// Runs the daemon until a shutdown signal completes the protocol.
    ///
    /// Fatal configuration errors (nothing registered, a configured job
    /// subset naming an unknown job, signal installation failure) are
    /// returned before any runner is spawned.
    pub async fn run(self) -> Result<(), RuntimeError> {
        self.validate()?;
        let (tx, rx) = signals::channel();
        signals::install(tx)?;
        info!(runners = self.config.runner_count, "daemon starting");
        self.join(rx).await;
        info!("daemon complete");
        Ok(())
    }

    fn validate(&self) -> Result<(), RuntimeError> {
        if self.registry.is_empty() {
            return Err(RuntimeError::NoHandlers);
        }
        if let Some(jobs) = &self.config.jobs {
            for name in jobs {
                if !self.registry.contains(name) {
                    return Err(RuntimeError::NoSuchJob { name: name.clone() });
                }
            }
        }
        Ok(())
    }

    /// The master loop: one bounded wait per iteration, events strictly FIFO.
    async fn join(&self, mut events: ControlReceiver) {
        let mut pool = RunnerPool::new(
            &self.config,
            Arc::clone(&self.registry),
            Arc::clone(&self.connector),
        );
        let mut desired = self.config.runner_count;
        let mut last_check = Instant::now();
        let mut hard_stopped = false;

        loop {
            pool.reap(true).await;
            pool.reconcile(desired).await;

            // avoid murdering runners that merely look stalled after the
            // machine comes out of suspend/hibernation
            let now = Instant::now();
            let sleep_time = if now.duration_since(last_check) <= self.config.heartbeat {
                self.config
                    .heartbeat
                    .saturating_sub(Duration::from_secs(1))
                    .max(MIN_SLEEP)
            } else {
                let wait = self.config.heartbeat / 2 + Duration::from_secs(1);
                debug!(?wait, "waking after suspend/hibernation");
                wait
            };
            last_check = now;

            match time::timeout(sleep_time, events.recv()).await {
                Err(_idle) => {}
                Ok(None) => break,
                Ok(Some(ControlEvent::GracefulShutdown)) => break,
                Ok(Some(ControlEvent::ImmediateShutdown)) => {
                    self.stop(&mut pool, false).await;
                    hard_stopped = true;
                    break;
                }
                Ok(Some(ControlEvent::ScaleToZero)) => {
                    desired = 0;
                    debug!(desired, "scaling to zero");
                }
                Ok(Some(ControlEvent::IncrementRunners)) => {
                    desired += 1;
                    debug!(desired, "scaling up");
                }
                Ok(Some(ControlEvent::DecrementRunners)) => {
                    desired = desired.saturating_sub(1);
                    debug!(desired, "scaling down");
                }
                Ok(Some(ControlEvent::DumpState)) => pool.dump(),
            }
        }

        if !hard_stopped {
            self.stop(&mut pool, true).await;
        }
    }

    /// Retires everything and drains the pool within the patience deadline.
    async fn stop(&self, pool: &mut RunnerPool, graceful: bool) {
        let deadline = Instant::now() + self.config.patience;
        pool.retire_all();
        while !pool.is_empty() && Instant::now() <= deadline {
            pool.reap(graceful).await;
            if pool.is_empty() {
                break;
            }
            time::sleep(SHUTDOWN_POLL).await;
        }
        if !pool.is_empty() {
            debug!(patience = ?self.config.patience, "patience exceeded; forcing termination");
        }
        pool.reap(false).await;
        debug!(graceful, "stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use crate::jobs::{enqueue, HandlerFn};
    use crate::queue::{MemoryBroker, PutOptions, RetryPolicy};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    fn test_config(runner_count: usize) -> Config {
        let mut config = Config::default();
        config.runner_count = runner_count;
        config.heartbeat = Duration::from_secs(1);
        config.reserve_timeout = Duration::from_millis(20);
        config.patience = Duration::from_secs(5);
        config.retry = RetryPolicy {
            max_retries: 2,
            backoff: Duration::from_millis(5),
        };
        config
    }

    fn supervisor(config: Config, registry: Arc<HandlerRegistry>, broker: &MemoryBroker) -> Supervisor {
        Supervisor::new(config, registry, Arc::new(broker.clone()))
    }

    async fn wait_until(ms: u64, mut pred: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_millis(ms);
        while Instant::now() < deadline {
            if pred() {
                return true;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        pred()
    }

    #[tokio::test]
    async fn test_run_requires_registered_handlers() {
        let broker = MemoryBroker::new();
        let sup = supervisor(test_config(1), Arc::new(HandlerRegistry::new()), &broker);
        assert!(matches!(sup.run().await, Err(RuntimeError::NoHandlers)));
    }

    #[tokio::test]
    async fn test_run_rejects_unknown_job_subset() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register("real", HandlerFn::arc(|_: Value| async { Ok(()) }));

        let mut config = test_config(1);
        config.jobs = Some(vec!["ghost".to_string()]);

        let broker = MemoryBroker::new();
        let sup = supervisor(config, registry, &broker);
        match sup.run().await {
            Err(RuntimeError::NoSuchJob { name }) => assert_eq!(name, "ghost"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_processes_every_job_exactly_once_then_drains() {
        let registry = Arc::new(HandlerRegistry::new());
        let counts: Arc<Mutex<HashMap<u64, u32>>> = Arc::new(Mutex::new(HashMap::new()));
        let sink = Arc::clone(&counts);
        registry.register(
            "count",
            HandlerFn::arc(move |args: Value| {
                let sink = Arc::clone(&sink);
                async move {
                    let i = args["i"].as_u64().ok_or_else(|| JobError::failed("no i"))?;
                    *sink.lock().unwrap().entry(i).or_insert(0) += 1;
                    Ok(())
                }
            }),
        );

        let broker = MemoryBroker::new();
        let mut producer = broker.client();
        for i in 0..12u64 {
            enqueue(&mut producer, "count", json!({ "i": i }), &PutOptions::default())
                .await
                .unwrap();
        }

        let sup = supervisor(test_config(3), registry, &broker);
        let (tx, rx) = signals::channel();
        let running = tokio::spawn(async move { sup.join(rx).await });

        assert!(wait_until(5_000, || broker.deleted_ids().len() == 12).await);
        tx.send(ControlEvent::GracefulShutdown).unwrap();
        running.await.unwrap();

        let counts = counts.lock().unwrap();
        assert_eq!(counts.len(), 12);
        assert!(counts.values().all(|&n| n == 1), "no job may run twice");
    }

    #[tokio::test]
    async fn test_scale_to_zero_pauses_and_scale_up_resumes() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register("t", HandlerFn::arc(|_: Value| async { Ok(()) }));

        let broker = MemoryBroker::new();
        let sup = supervisor(test_config(1), registry, &broker);
        let (tx, rx) = signals::channel();
        let running = tokio::spawn(async move { sup.join(rx).await });

        let mut producer = broker.client();
        let first = enqueue(&mut producer, "t", json!({}), &PutOptions::default())
            .await
            .unwrap();
        assert!(wait_until(5_000, || broker.deleted_ids().contains(&first)).await);

        tx.send(ControlEvent::ScaleToZero).unwrap();
        // give the loop time to retire the runner
        assert!(wait_until(5_000, || broker.reserved_len() == 0).await);
        time::sleep(Duration::from_millis(150)).await;

        let second = enqueue(&mut producer, "t", json!({}), &PutOptions::default())
            .await
            .unwrap();
        time::sleep(Duration::from_millis(300)).await;
        assert!(
            !broker.deleted_ids().contains(&second),
            "no runner should be working after scale-to-zero"
        );

        tx.send(ControlEvent::IncrementRunners).unwrap();
        assert!(wait_until(5_000, || broker.deleted_ids().contains(&second)).await);

        tx.send(ControlEvent::GracefulShutdown).unwrap();
        running.await.unwrap();
    }

    #[tokio::test]
    async fn test_graceful_shutdown_lets_handler_finish() {
        let registry = Arc::new(HandlerRegistry::new());
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        registry.register(
            "slow",
            HandlerFn::arc(move |_: Value| {
                let flag = Arc::clone(&flag);
                async move {
                    time::sleep(Duration::from_millis(300)).await;
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );

        let broker = MemoryBroker::new();
        let mut producer = broker.client();
        let id = enqueue(&mut producer, "slow", json!({}), &PutOptions::default())
            .await
            .unwrap();

        let sup = supervisor(test_config(1), registry, &broker);
        let (tx, rx) = signals::channel();
        let running = tokio::spawn(async move { sup.join(rx).await });

        assert!(wait_until(5_000, || broker.reserved_len() == 1).await);
        tx.send(ControlEvent::GracefulShutdown).unwrap();
        running.await.unwrap();

        assert!(done.load(Ordering::SeqCst), "handler must run to completion");
        assert!(broker.deleted_ids().contains(&id));
    }

    #[tokio::test]
    async fn test_graceful_shutdown_is_bounded_by_patience() {
        let registry = Arc::new(HandlerRegistry::new());
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        registry.register(
            "stuck",
            HandlerFn::arc(move |_: Value| {
                let flag = Arc::clone(&flag);
                async move {
                    time::sleep(Duration::from_secs(30)).await;
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );

        let broker = MemoryBroker::new();
        let mut producer = broker.client();
        enqueue(&mut producer, "stuck", json!({}), &PutOptions::default())
            .await
            .unwrap();

        let mut config = test_config(1);
        config.patience = Duration::from_millis(300);
        let sup = supervisor(config, registry, &broker);
        let (tx, rx) = signals::channel();
        let running = tokio::spawn(async move { sup.join(rx).await });

        assert!(wait_until(5_000, || broker.reserved_len() == 1).await);
        let started = Instant::now();
        tx.send(ControlEvent::GracefulShutdown).unwrap();
        running.await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(!done.load(Ordering::SeqCst), "stuck handler was abandoned");
        assert_eq!(broker.ready_len("stuck"), 1, "abandoned job is released");
    }

    #[tokio::test]
    async fn test_immediate_shutdown_releases_in_flight_work() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register(
            "stuck",
            HandlerFn::arc(|_: Value| async {
                time::sleep(Duration::from_secs(30)).await;
                Ok(())
            }),
        );

        let broker = MemoryBroker::new();
        let mut producer = broker.client();
        enqueue(&mut producer, "stuck", json!({}), &PutOptions::default())
            .await
            .unwrap();

        let sup = supervisor(test_config(1), registry, &broker);
        let (tx, rx) = signals::channel();
        let running = tokio::spawn(async move { sup.join(rx).await });

        assert!(wait_until(5_000, || broker.reserved_len() == 1).await);
        tx.send(ControlEvent::ImmediateShutdown).unwrap();
        running.await.unwrap();

        assert!(broker.deleted_ids().is_empty());
        assert!(broker.buried_ids().is_empty());
        assert_eq!(broker.ready_len("stuck"), 1);
    }
}
