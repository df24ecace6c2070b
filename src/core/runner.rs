//! # Runner: the reserve → dispatch → complete loop.
//!
//! A [`Runner`] owns one queue connection and processes jobs sequentially:
//! it never holds two jobs at once, and distinct runners race for the same
//! watched tubes — the broker decides who wins, which is how load spreads
//! across the pool.
//!
//! ## Lifecycle
//! ```text
//! run(stop):
//!   resolve watch set, log it
//!   loop {
//!     ├─► soft-quit or stop requested? ──► exit Stopped
//!     ├─► reserve_next():
//!     │     ├─ no client       → connect + watch/ignore (bounded backoff)
//!     │     ├─ TimedOut        → idle tick, loop
//!     │     ├─ NotConnected    → backoff, reconnect, re-reserve
//!     │     └─ job             → dispatch
//!     └─► dispatch(job):
//!           decode → before hooks → handler → after hooks
//!             ├─ Ok            → delete, log span, loop
//!             ├─ Err           → bury, error hooks, exit Crashed
//!             └─ stop fired    → release (not bury), exit Stopped
//!   }
//! ```
//!
//! ## Rules
//! - Soft-quit never interrupts the job in progress; it is observed at the
//!   top of the loop, between jobs.
//! - The hard-stop token is observed while idle (cancels the reservation
//!   wait) and while working (releases the in-flight job back to the broker
//!   without invoking error hooks — a deliberate shutdown is not an
//!   application fault).
//! - Reconnection is bounded: the per-runner counter sleeps
//!   `counter × backoff` between attempts and gives up after the configured
//!   budget, degrading to a logged no-op.
//! - A dispatch failure buries the job, notifies error hooks, and ends the
//!   runner with [`RunnerExit::Crashed`]; replacing it is the pool's call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{JobError, QueueError};
use crate::jobs::{HandlerRegistry, JobContext, Payload};
use crate::queue::{Connect, Job, QueueClient, RetryPolicy};

/// Shared view of a runner's flags, held by the pool.
pub(crate) struct RunnerState {
    busy: AtomicBool,
    soft_quit: AtomicBool,
    started_at: Mutex<Option<Instant>>,
    stopped_at: Mutex<Option<Instant>>,
}

impl RunnerState {
    fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
            soft_quit: AtomicBool::new(false),
            started_at: Mutex::new(None),
            stopped_at: Mutex::new(None),
        }
    }

    /// Whether a job is currently being worked.
    pub(crate) fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Asks the runner to stop after its current job.
    pub(crate) fn request_soft_quit(&self) {
        self.soft_quit.store(true, Ordering::Release);
    }

    /// How long the current job has been running.
    pub(crate) fn busy_for(&self) -> Option<Duration> {
        if !self.is_busy() {
            return None;
        }
        self.started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|at| at.elapsed())
    }

    fn soft_quit_requested(&self) -> bool {
        self.soft_quit.load(Ordering::Acquire)
    }

    fn begin_work(&self) {
        *self
            .started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        self.busy.store(true, Ordering::Release);
    }

    fn end_work(&self) {
        self.busy.store(false, Ordering::Release);
        *self
            .stopped_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }
}

/// How a runner's execution unit ended, observed by the pool.
#[derive(Debug)]
pub(crate) enum RunnerExit {
    /// Clean stop: soft-quit honored, stop token fired, or nothing to do.
    Stopped,
    /// A dispatch failed; the job was buried and error hooks ran.
    Crashed(JobError),
}

enum Dispatch {
    Done,
    Interrupted,
    Failed(JobError),
}

/// One worker execution unit.
pub(crate) struct Runner {
    slot: usize,
    registry: Arc<HandlerRegistry>,
    connector: Arc<dyn Connect>,
    jobs: Option<Vec<String>>,
    reserve_timeout: Duration,
    retry: RetryPolicy,
    state: Arc<RunnerState>,
    client: Option<Box<dyn QueueClient>>,
    attempts: u32,
}

impl Runner {
    pub(crate) fn new(
        slot: usize,
        registry: Arc<HandlerRegistry>,
        connector: Arc<dyn Connect>,
        jobs: Option<Vec<String>>,
        reserve_timeout: Duration,
        retry: RetryPolicy,
    ) -> (Self, Arc<RunnerState>) {
        let state = Arc::new(RunnerState::new());
        let runner = Self {
            slot,
            registry,
            connector,
            jobs,
            reserve_timeout,
            retry,
            state: Arc::clone(&state),
            client: None,
            attempts: 0,
        };
        (runner, state)
    }

    /// Runs until soft-quit, hard stop, or a dispatch failure.
    pub(crate) async fn run(mut self, stop: CancellationToken) -> RunnerExit {
        let names = self.watch_set();
        info!(slot = self.slot, count = names.len(), jobs = ?names, "runner working jobs");

        loop {
            if self.state.soft_quit_requested() || stop.is_cancelled() {
                debug!(slot = self.slot, "runner stopping");
                return RunnerExit::Stopped;
            }

            let reserved = tokio::select! {
                biased;
                job = self.reserve_next(&stop) => job,
                _ = stop.cancelled() => return RunnerExit::Stopped,
            };
            let Some(job) = reserved else { continue };

            self.state.begin_work();
            let outcome = self.dispatch(job, &stop).await;
            self.state.end_work();

            match outcome {
                Dispatch::Done => {}
                Dispatch::Interrupted => return RunnerExit::Stopped,
                Dispatch::Failed(err) => return RunnerExit::Crashed(err),
            }
        }
    }

    /// Reserves the next job, connecting and reconnecting as needed.
    ///
    /// `None` is the idle signal: reservation timed out, or the retry budget
    /// for the current disconnect episode ran out.
    async fn reserve_next(&mut self, stop: &CancellationToken) -> Option<Job> {
        loop {
            if self.client.is_none() {
                if self.try_connect().await {
                    continue;
                }
                if !self.backoff(stop).await {
                    return None;
                }
                continue;
            }
            let client = self.client.as_mut()?;
            match client.reserve(self.reserve_timeout).await {
                Ok(job) => return Some(job),
                Err(QueueError::TimedOut) => return None,
                Err(_) => {
                    self.client = None;
                    if !self.backoff(stop).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Decodes and executes one job, finalizing it with the broker.
    async fn dispatch(&mut self, job: Job, stop: &CancellationToken) -> Dispatch {
        let payload = match Payload::decode(&job.body) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(slot = self.slot, job = %job.id, error = %err, "burying undecodable job");
                self.bury_quietly(&job).await;
                return Dispatch::Failed(err);
            }
        };
        let ctx = JobContext {
            name: payload.name.into(),
            args: Arc::new(payload.args),
            job: job.id,
        };

        let Some(handler) = self.registry.handler_for(&ctx.name) else {
            let err = JobError::Unknown {
                name: ctx.name.to_string(),
            };
            warn!(slot = self.slot, job = %job.id, name = %ctx.name, "burying job with no handler");
            self.bury_quietly(&job).await;
            self.run_error_hooks(&err, &ctx).await;
            return Dispatch::Failed(err);
        };

        info!(slot = self.slot, job = %job.id, name = %ctx.name, "working");
        let started = Instant::now();

        let registry = Arc::clone(&self.registry);
        let work = async {
            for hook in registry.before_for(&ctx.name) {
                hook.call(&ctx).await?;
            }
            handler.call(&ctx.args).await?;
            for hook in registry.after_for(&ctx.name) {
                hook.call(&ctx).await?;
            }
            Ok::<(), JobError>(())
        };
        tokio::pin!(work);

        let result = tokio::select! {
            biased;
            result = &mut work => result,
            _ = stop.cancelled() => {
                self.release_quietly(&job).await;
                info!(slot = self.slot, job = %job.id, name = %ctx.name, "released in-flight job for shutdown");
                return Dispatch::Interrupted;
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(()) => match self.finalize(&job, stop).await {
                Ok(()) => {
                    info!(slot = self.slot, job = %job.id, name = %ctx.name, elapsed_ms, "finished");
                    Dispatch::Done
                }
                Err(err) => {
                    warn!(slot = self.slot, job = %job.id, name = %ctx.name, error = %err, "lost job while finalizing");
                    self.run_error_hooks(&err, &ctx).await;
                    Dispatch::Failed(err)
                }
            },
            Err(err) => {
                warn!(slot = self.slot, job = %job.id, name = %ctx.name, elapsed_ms, error = %err, "finished (failed)");
                self.bury_quietly(&job).await;
                self.run_error_hooks(&err, &ctx).await;
                Dispatch::Failed(err)
            }
        }
    }

    /// Deletes the completed job, reconnecting per the retry policy.
    async fn finalize(&mut self, job: &Job, stop: &CancellationToken) -> Result<(), JobError> {
        loop {
            if self.client.is_none() {
                if self.try_connect().await {
                    continue;
                }
                if !self.backoff(stop).await {
                    return Err(JobError::failed(format!(
                        "connection lost finalizing job {}",
                        job.id
                    )));
                }
                continue;
            }
            let Some(client) = self.client.as_mut() else {
                continue;
            };
            match client.delete(job).await {
                Ok(()) => return Ok(()),
                Err(QueueError::NotConnected) => self.client = None,
                Err(err) => return Err(JobError::failed(err.to_string())),
            }
        }
    }

    /// One connection attempt: connect, then apply the watch set.
    async fn try_connect(&mut self) -> bool {
        match self.connector.connect().await {
            Ok(mut client) => match self.apply_watches(client.as_mut()).await {
                Ok(()) => {
                    self.attempts = 0;
                    self.client = Some(client);
                    debug!(slot = self.slot, "connected to queue broker");
                    true
                }
                Err(_) => false,
            },
            Err(_) => false,
        }
    }

    /// Counts a reconnect attempt and sleeps the linear backoff.
    ///
    /// Returns `false` when the budget is exhausted (counter reset) or the
    /// stop token fired during the sleep.
    async fn backoff(&mut self, stop: &CancellationToken) -> bool {
        if self.attempts >= self.retry.max_retries {
            warn!(
                slot = self.slot,
                retries = self.retry.max_retries,
                "queue connection retries exhausted; giving up"
            );
            self.attempts = 0;
            return false;
        }
        self.attempts += 1;
        let delay = self.retry.delay(self.attempts);
        debug!(slot = self.slot, attempt = self.attempts, ?delay, "queue connection lost; retrying");
        tokio::select! {
            _ = time::sleep(delay) => true,
            _ = stop.cancelled() => false,
        }
    }

    /// Watches every name in this runner's subset, then ignores the rest.
    async fn apply_watches(&self, client: &mut dyn QueueClient) -> Result<(), QueueError> {
        let names = self.watch_set();
        for name in &names {
            client.watch(name).await?;
        }
        for tube in client.watched().await? {
            if !names.iter().any(|name| name == &tube) {
                client.ignore(&tube).await?;
            }
        }
        Ok(())
    }

    fn watch_set(&self) -> Vec<String> {
        match &self.jobs {
            Some(names) if !names.is_empty() => names.clone(),
            _ => self.registry.names(),
        }
    }

    async fn bury_quietly(&mut self, job: &Job) {
        if let Some(client) = self.client.as_mut() {
            if let Err(err) = client.bury(job).await {
                debug!(slot = self.slot, job = %job.id, error = %err, "bury failed");
            }
        }
    }

    async fn release_quietly(&mut self, job: &Job) {
        if let Some(client) = self.client.as_mut() {
            if let Err(err) = client.release(job).await {
                debug!(slot = self.slot, job = %job.id, error = %err, "release failed");
            }
        }
    }

    async fn run_error_hooks(&self, err: &JobError, ctx: &JobContext) {
        for hook in self.registry.error_for(&ctx.name) {
            hook.call(err, ctx).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{enqueue, ErrorHookFn, HandlerFn, HookFn};
    use crate::queue::{MemoryBroker, PutOptions};
    use serde_json::{json, Value};

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 5,
            backoff: Duration::from_millis(5),
        }
    }

    fn spawn_runner(
        registry: Arc<HandlerRegistry>,
        broker: &MemoryBroker,
    ) -> (
        tokio::task::JoinHandle<RunnerExit>,
        Arc<RunnerState>,
        CancellationToken,
    ) {
        let (runner, state) = Runner::new(
            0,
            registry,
            Arc::new(broker.clone()),
            None,
            Duration::from_millis(20),
            quick_retry(),
        );
        let stop = CancellationToken::new();
        let join = tokio::spawn(runner.run(stop.clone()));
        (join, state, stop)
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
    async fn test_works_one_job_and_deletes_it() {
        let registry = Arc::new(HandlerRegistry::new());
        let seen: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        registry.register(
            "jack.work",
            HandlerFn::arc(move |args: Value| {
                let sink = Arc::clone(&sink);
                async move {
                    *sink.lock().unwrap() = Some(args);
                    Ok(())
                }
            }),
        );

        let broker = MemoryBroker::new();
        let mut producer = broker.client();
        let id = enqueue(
            &mut producer,
            "jack.work",
            json!({"val": 42}),
            &PutOptions::default(),
        )
        .await
        .unwrap();

        let (join, _, stop) = spawn_runner(registry, &broker);
        assert!(wait_until(2_000, || broker.deleted_ids().contains(&id)).await);
        assert!(broker.buried_ids().is_empty());
        assert_eq!(*seen.lock().unwrap(), Some(json!({"val": 42})));

        stop.cancel();
        assert!(matches!(join.await.unwrap(), RunnerExit::Stopped));
    }

    #[tokio::test]
    async fn test_failure_buries_job_and_notifies_error_hooks() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register(
            "boom",
            HandlerFn::arc(|_: Value| async { Err(JobError::failed("kaboom")) }),
        );
        let observed: Arc<Mutex<Option<(String, String, Value)>>> = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&observed);
        registry.error(
            Some("boom"),
            ErrorHookFn::arc(move |err: JobError, ctx: JobContext| {
                let sink = Arc::clone(&sink);
                async move {
                    *sink.lock().unwrap() =
                        Some((err.to_string(), ctx.name.to_string(), (*ctx.args).clone()));
                }
            }),
        );

        let broker = MemoryBroker::new();
        let mut producer = broker.client();
        let id = enqueue(&mut producer, "boom", json!({"n": 1}), &PutOptions::default())
            .await
            .unwrap();

        let (join, _, _stop) = spawn_runner(registry, &broker);
        match join.await.unwrap() {
            RunnerExit::Crashed(JobError::Failed { error }) => assert_eq!(error, "kaboom"),
            other => panic!("unexpected exit: {other:?}"),
        }
        assert_eq!(broker.buried_ids(), vec![id]);
        assert!(broker.deleted_ids().is_empty());

        let observed = observed.lock().unwrap().clone().expect("error hook ran");
        assert_eq!(observed.0, "job failed: kaboom");
        assert_eq!(observed.1, "boom");
        assert_eq!(observed.2, json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_hooks_run_global_then_scoped_around_handler() {
        let registry = Arc::new(HandlerRegistry::new());
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let record = |tag: &'static str, order: &Arc<Mutex<Vec<&'static str>>>| {
            let order = Arc::clone(order);
            HookFn::arc(move |_| {
                let order = Arc::clone(&order);
                async move {
                    order.lock().unwrap().push(tag);
                    Ok(())
                }
            })
        };

        registry.before(Some("t"), record("before.scoped", &order));
        registry.before(None, record("before.global", &order));
        registry.after(Some("t"), record("after.scoped", &order));
        registry.after(None, record("after.global", &order));
        let handler_order = Arc::clone(&order);
        registry.register(
            "t",
            HandlerFn::arc(move |_: Value| {
                let order = Arc::clone(&handler_order);
                async move {
                    order.lock().unwrap().push("handler");
                    Ok(())
                }
            }),
        );

        let broker = MemoryBroker::new();
        let mut producer = broker.client();
        let id = enqueue(&mut producer, "t", json!({}), &PutOptions::default())
            .await
            .unwrap();

        let (join, _, stop) = spawn_runner(registry, &broker);
        assert!(wait_until(2_000, || broker.deleted_ids().contains(&id)).await);
        stop.cancel();
        join.await.unwrap();

        assert_eq!(
            *order.lock().unwrap(),
            vec![
                "before.global",
                "before.scoped",
                "handler",
                "after.global",
                "after.scoped",
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_before_hook_takes_failure_path() {
        let registry = Arc::new(HandlerRegistry::new());
        let handled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&handled);
        registry.register(
            "t",
            HandlerFn::arc(move |_: Value| {
                let flag = Arc::clone(&flag);
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );
        registry.before(
            None,
            HookFn::arc(|_| async { Err(JobError::failed("gate closed")) }),
        );

        let broker = MemoryBroker::new();
        let mut producer = broker.client();
        let id = enqueue(&mut producer, "t", json!({}), &PutOptions::default())
            .await
            .unwrap();

        let (join, _, _stop) = spawn_runner(registry, &broker);
        assert!(matches!(join.await.unwrap(), RunnerExit::Crashed(_)));
        assert_eq!(broker.buried_ids(), vec![id]);
        assert!(!handled.load(Ordering::SeqCst), "handler must not run");
    }

    #[tokio::test]
    async fn test_unknown_job_is_buried() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register("known", HandlerFn::arc(|_: Value| async { Ok(()) }));

        let broker = MemoryBroker::new();
        let mut producer = broker.client();
        // lands in the watched tube but carries an unregistered name
        let body = Payload::new("unknown", json!({})).encode();
        producer
            .put("known", &body, &PutOptions::default())
            .await
            .unwrap();

        let (join, _, _stop) = spawn_runner(registry, &broker);
        assert!(matches!(
            join.await.unwrap(),
            RunnerExit::Crashed(JobError::Unknown { .. })
        ));
        assert_eq!(broker.buried_ids().len(), 1);
    }

    #[tokio::test]
    async fn test_reconnects_below_retry_limit() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register("t", HandlerFn::arc(|_: Value| async { Ok(()) }));

        let broker = MemoryBroker::new();
        broker.fail_connects(3); // below max_retries = 5
        let mut producer = broker.client();
        let id = enqueue(&mut producer, "t", json!({}), &PutOptions::default())
            .await
            .unwrap();

        let (join, _, stop) = spawn_runner(registry, &broker);
        assert!(wait_until(2_000, || broker.deleted_ids().contains(&id)).await);
        stop.cancel();
        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_exhausted_retries_degrade_without_crashing() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register("t", HandlerFn::arc(|_: Value| async { Ok(()) }));

        let broker = MemoryBroker::new();
        broker.go_offline();

        let (join, _, stop) = spawn_runner(registry.clone(), &broker);
        // enough time for several give-up cycles
        time::sleep(Duration::from_millis(200)).await;
        assert!(!join.is_finished(), "runner must stay alive while degraded");

        // connectivity restored: the runner picks work up again
        broker.go_online();
        let mut producer = broker.client();
        let id = enqueue(&mut producer, "t", json!({}), &PutOptions::default())
            .await
            .unwrap();
        assert!(wait_until(2_000, || broker.deleted_ids().contains(&id)).await);

        stop.cancel();
        assert!(matches!(join.await.unwrap(), RunnerExit::Stopped));
    }

    #[tokio::test]
    async fn test_soft_quit_waits_for_current_job() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register(
            "slow",
            HandlerFn::arc(|_: Value| async {
                time::sleep(Duration::from_millis(100)).await;
                Ok(())
            }),
        );

        let broker = MemoryBroker::new();
        let mut producer = broker.client();
        let id = enqueue(&mut producer, "slow", json!({}), &PutOptions::default())
            .await
            .unwrap();

        let (join, state, _stop) = spawn_runner(registry, &broker);
        assert!(wait_until(2_000, || state.is_busy()).await);
        state.request_soft_quit();

        assert!(matches!(join.await.unwrap(), RunnerExit::Stopped));
        assert!(broker.deleted_ids().contains(&id), "job must finish first");
    }

    #[tokio::test]
    async fn test_hard_stop_releases_in_flight_job() {
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

        let (join, state, stop) = spawn_runner(registry, &broker);
        assert!(wait_until(2_000, || state.is_busy()).await);
        stop.cancel();

        assert!(matches!(join.await.unwrap(), RunnerExit::Stopped));
        assert!(broker.deleted_ids().is_empty());
        assert!(broker.buried_ids().is_empty());
        assert_eq!(broker.ready_len("stuck"), 1, "job must be released, not buried");
    }
}
