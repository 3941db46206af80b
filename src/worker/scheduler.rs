//! Polling chains, one per worker.
//!
//! `start_scheduling()` spawns a loop per worker ordinal. Each loop waits
//! for its delay, polls its worker, and picks the next delay from the
//! outcome:
//! - `TaskProcessed` or a recoverable error: poll again right away
//! - `NoTask`: the queue polling delay
//! - `Disabled`: the extended delay
//! - fatal error: the loop ends and the error is surfaced through
//!   [`Scheduler::fatal_error`] and [`Scheduler::wait`]

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::Error;
use crate::task::PollResult;
use crate::worker::context::{ExecutionContext, ExecutionId};
use crate::worker::panic_message;
use crate::worker::worker::{Worker, WorkerFactory};

/// Delays between polls, captured when scheduling starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delays {
    pub queue_polling: Duration,
    pub extended: Duration,
}

impl Delays {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            queue_polling: config.queue_polling_delay(),
            extended: config.extended_delay(),
        }
    }

    /// Delay before the next poll, or `None` when the chain must end.
    pub fn after(&self, outcome: &Result<PollResult, Error>) -> Option<Duration> {
        match outcome {
            Ok(PollResult::TaskProcessed) => Some(Duration::ZERO),
            Ok(PollResult::NoTask) => Some(self.queue_polling),
            Ok(PollResult::Disabled) => Some(self.extended),
            Err(err) if err.is_fatal() => None,
            Err(_) => Some(Duration::ZERO),
        }
    }
}

/// Owns the polling chains of the worker pool.
pub struct Scheduler {
    config: EngineConfig,
    factory: Arc<dyn WorkerFactory>,
    /// Stops every chain before its next poll.
    stop: CancellationToken,
    /// Parent of every poll's execution context.
    interrupt: CancellationToken,
    /// Cancelled when a chain ends on a fatal error.
    fatal: CancellationToken,
    chains: Mutex<Option<Vec<JoinHandle<Result<(), Error>>>>>,
}

impl Scheduler {
    pub fn new(config: EngineConfig, factory: Arc<dyn WorkerFactory>) -> Self {
        Self {
            config,
            factory,
            stop: CancellationToken::new(),
            interrupt: CancellationToken::new(),
            fatal: CancellationToken::new(),
            chains: Mutex::new(None),
        }
    }

    /// Create one worker per ordinal in `0..workerCount` and start polling
    /// each of them with no initial delay.
    ///
    /// The worker count is read once, here. Later changes only affect
    /// enablement. Calling this twice is a no-op.
    pub fn start_scheduling(&self) {
        let mut chains = self.chains.lock();
        if chains.is_some() {
            tracing::warn!("Compute Engine scheduling already started");
            return;
        }

        let delays = Delays::from_config(&self.config);
        let count = self.config.worker_count();
        let handles = (0..count)
            .map(|ordinal| {
                let worker = self.factory.create(ordinal);
                tokio::spawn(run_chain(
                    worker,
                    delays,
                    self.stop.clone(),
                    self.interrupt.clone(),
                    self.fatal.clone(),
                ))
            })
            .collect();
        *chains = Some(handles);

        tracing::debug!(
            workers = count,
            queue_polling_ms = delays.queue_polling.as_millis() as u64,
            extended_ms = delays.extended.as_millis() as u64,
            "Compute Engine scheduling started"
        );
    }

    /// Cancel every pending poll. Polls already running finish normally.
    pub fn graceful_stop_scheduling(&self) {
        tracing::info!("Compute Engine scheduling stopping");
        self.stop.cancel();
    }

    /// Cancel every pending poll and interrupt polls already running.
    /// Interruption is cooperative: processing stops at its next check.
    pub fn hard_stop_scheduling(&self) {
        tracing::info!("Compute Engine scheduling stopping, interrupting running tasks");
        self.stop.cancel();
        self.interrupt.cancel();
    }

    /// Number of chains started.
    pub fn chain_count(&self) -> usize {
        self.chains.lock().as_ref().map_or(0, Vec::len)
    }

    /// Uuids of the workers created by `start_scheduling`.
    pub fn worker_uuids(&self) -> HashSet<Uuid> {
        self.factory.worker_uuids()
    }

    /// Resolves once any chain has ended on a fatal error.
    pub async fn fatal_error(&self) {
        self.fatal.cancelled().await;
    }

    /// Wait for every chain to end. Returns the first fatal error, if any.
    pub async fn wait(&self) -> Result<(), Error> {
        let handles = self.chains.lock().as_mut().map(std::mem::take).unwrap_or_default();

        let mut first = None;
        for joined in join_all(handles).await {
            let result = joined
                .unwrap_or_else(|e| Err(Error::Fatal(format!("Worker chain aborted: {e}"))));
            if let Err(err) = result {
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

async fn run_chain(
    worker: Arc<dyn Worker>,
    delays: Delays,
    stop: CancellationToken,
    interrupt: CancellationToken,
    fatal: CancellationToken,
) -> Result<(), Error> {
    let lane = ExecutionId::next();
    let mut delay = Duration::ZERO;

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => return Ok(()),
            _ = pause(delay) => {}
        }

        let ctx = ExecutionContext::child_of(lane, &interrupt);
        let outcome = AssertUnwindSafe(worker.poll(&ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(Error::Fatal(panic_message(panic))));

        delay = match delays.after(&outcome) {
            Some(next) => {
                if let Err(err) = &outcome {
                    tracing::error!(worker = %worker.identity(), error = %err, "Worker poll failed");
                }
                next
            }
            None => {
                let err = outcome
                    .err()
                    .unwrap_or_else(|| Error::Fatal("chain ended without error".into()));
                tracing::error!(
                    worker = %worker.identity(),
                    error = %err,
                    "Compute Engine execution failed. Scheduled processing interrupted."
                );
                fatal.cancel();
                return Err(err);
            }
        };
    }
}

async fn pause(delay: Duration) {
    if delay.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EXTENDED_DELAY, MemorySource, QUEUE_POLLING_DELAY, WORKER_COUNT};
    use crate::error::QueueError;
    use crate::task::Task;
    use crate::worker::controller::WorkerIdentity;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::time::Instant;

    const POLLING: Duration = Duration::from_millis(2000);
    const EXTENDED: Duration = Duration::from_millis(30000);

    enum Step {
        Return(Result<PollResult, Error>),
        /// Busy for the duration unless interrupted first.
        Busy(Duration),
        Panic,
    }

    /// Plays a fixed script of poll outcomes, then reports `NoTask` forever.
    struct ScriptedWorker {
        identity: WorkerIdentity,
        script: Mutex<VecDeque<Step>>,
        polls: Mutex<Vec<Instant>>,
        in_flight: AtomicBool,
        overlaps: AtomicUsize,
        interrupted: AtomicUsize,
        completed: AtomicUsize,
    }

    impl ScriptedWorker {
        fn new(ordinal: i32, script: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                identity: WorkerIdentity::new(ordinal),
                script: Mutex::new(script.into()),
                polls: Mutex::new(Vec::new()),
                in_flight: AtomicBool::new(false),
                overlaps: AtomicUsize::new(0),
                interrupted: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
            })
        }

        fn poll_offsets(&self, origin: Instant) -> Vec<Duration> {
            self.polls.lock().iter().map(|t| *t - origin).collect()
        }

        fn poll_count(&self) -> usize {
            self.polls.lock().len()
        }
    }

    #[async_trait]
    impl Worker for ScriptedWorker {
        fn identity(&self) -> WorkerIdentity {
            self.identity
        }

        async fn poll(&self, ctx: &ExecutionContext) -> Result<PollResult, Error> {
            if self.in_flight.swap(true, Ordering::SeqCst) {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            self.polls.lock().push(Instant::now());

            let step = self.script.lock().pop_front();
            let outcome = match step {
                None => Ok(PollResult::NoTask),
                Some(Step::Return(outcome)) => outcome,
                Some(Step::Busy(duration)) => {
                    tokio::select! {
                        _ = ctx.interrupted() => {
                            self.interrupted.fetch_add(1, Ordering::SeqCst);
                        }
                        _ = tokio::time::sleep(duration) => {
                            self.completed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                    Ok(PollResult::TaskProcessed)
                }
                Some(Step::Panic) => {
                    self.in_flight.store(false, Ordering::SeqCst);
                    panic!("worker exploded");
                }
            };

            self.in_flight.store(false, Ordering::SeqCst);
            outcome
        }

        fn is_executed_by(&self, _ctx: &ExecutionContext) -> bool {
            false
        }

        fn current_task(&self) -> Option<Task> {
            None
        }
    }

    /// Hands out pre-built workers in ordinal order and records the calls.
    struct ScriptedFactory {
        pending: Mutex<VecDeque<Arc<ScriptedWorker>>>,
        ordinals: Mutex<Vec<i32>>,
        created: Mutex<Vec<Arc<dyn Worker>>>,
    }

    impl ScriptedFactory {
        fn new(workers: Vec<Arc<ScriptedWorker>>) -> Arc<Self> {
            Arc::new(Self {
                pending: Mutex::new(workers.into()),
                ordinals: Mutex::new(Vec::new()),
                created: Mutex::new(Vec::new()),
            })
        }
    }

    impl WorkerFactory for ScriptedFactory {
        fn create(&self, ordinal: i32) -> Arc<dyn Worker> {
            self.ordinals.lock().push(ordinal);
            let worker: Arc<dyn Worker> = match self.pending.lock().pop_front() {
                Some(worker) => worker,
                None => ScriptedWorker::new(ordinal, vec![]),
            };
            self.created.lock().push(Arc::clone(&worker));
            worker
        }

        fn workers(&self) -> Vec<Arc<dyn Worker>> {
            self.created.lock().clone()
        }
    }

    fn config(workers: i32) -> (Arc<MemorySource>, EngineConfig) {
        let source = Arc::new(
            MemorySource::new()
                .with(WORKER_COUNT, workers)
                .with(QUEUE_POLLING_DELAY, POLLING.as_millis())
                .with(EXTENDED_DELAY, EXTENDED.as_millis()),
        );
        let config = EngineConfig::new(source.clone()).unwrap();
        (source, config)
    }

    fn recoverable() -> Error {
        QueueError::Backend("flaky".into()).into()
    }

    #[test]
    fn delay_table() {
        let delays = Delays {
            queue_polling: POLLING,
            extended: EXTENDED,
        };
        assert_eq!(delays.after(&Ok(PollResult::TaskProcessed)), Some(Duration::ZERO));
        assert_eq!(delays.after(&Ok(PollResult::NoTask)), Some(POLLING));
        assert_eq!(delays.after(&Ok(PollResult::Disabled)), Some(EXTENDED));
        assert_eq!(delays.after(&Err(recoverable())), Some(Duration::ZERO));
        assert_eq!(delays.after(&Err(Error::Fatal("boom".into()))), None);
    }

    #[tokio::test(start_paused = true)]
    async fn chain_follows_delay_table() {
        let (_, config) = config(1);
        let worker = ScriptedWorker::new(
            0,
            vec![
                Step::Return(Ok(PollResult::NoTask)),
                Step::Return(Ok(PollResult::TaskProcessed)),
                Step::Return(Ok(PollResult::Disabled)),
                Step::Return(Err(recoverable())),
                Step::Return(Ok(PollResult::TaskProcessed)),
                Step::Return(Ok(PollResult::NoTask)),
                Step::Return(Err(Error::Fatal("stop here".into()))),
            ],
        );
        let scheduler = Scheduler::new(config, ScriptedFactory::new(vec![worker.clone()]));
        let origin = Instant::now();

        scheduler.start_scheduling();
        let err = scheduler.wait().await.unwrap_err();

        assert!(matches!(err, Error::Fatal(ref m) if m == "stop here"));
        let ms = Duration::from_millis;
        assert_eq!(
            worker.poll_offsets(origin),
            vec![
                ms(0),
                ms(2000),
                ms(2000),
                ms(32000),
                ms(32000),
                ms(32000),
                ms(34000),
            ]
        );
        assert_eq!(worker.overlaps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn one_chain_per_configured_worker() {
        let (source, config) = config(3);
        let factory = ScriptedFactory::new(vec![]);
        let scheduler = Scheduler::new(config, factory.clone());

        scheduler.start_scheduling();
        source.set(WORKER_COUNT, 5);
        scheduler.start_scheduling();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(*factory.ordinals.lock(), vec![0, 1, 2]);
        assert_eq!(scheduler.chain_count(), 3);
        assert_eq!(factory.workers().len(), 3);
        assert_eq!(scheduler.worker_uuids().len(), 3);

        scheduler.graceful_stop_scheduling();
        scheduler.wait().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_poll() {
        let (_, config) = config(1);
        let worker = ScriptedWorker::new(0, vec![Step::Return(Ok(PollResult::Disabled))]);
        let scheduler = Scheduler::new(config, ScriptedFactory::new(vec![worker.clone()]));
        let origin = Instant::now();

        scheduler.start_scheduling();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(worker.poll_count(), 1);

        scheduler.graceful_stop_scheduling();
        scheduler.wait().await.unwrap();

        assert_eq!(worker.poll_count(), 1);
        assert!(origin.elapsed() < EXTENDED);
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_stop_lets_running_poll_finish() {
        let (_, config) = config(1);
        let worker = ScriptedWorker::new(0, vec![Step::Busy(Duration::from_secs(60))]);
        let scheduler = Scheduler::new(config, ScriptedFactory::new(vec![worker.clone()]));
        let origin = Instant::now();

        scheduler.start_scheduling();
        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.graceful_stop_scheduling();
        scheduler.wait().await.unwrap();

        assert_eq!(worker.completed.load(Ordering::SeqCst), 1);
        assert_eq!(worker.interrupted.load(Ordering::SeqCst), 0);
        assert_eq!(worker.poll_count(), 1);
        assert!(origin.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn hard_stop_interrupts_running_poll() {
        let (_, config) = config(1);
        let worker = ScriptedWorker::new(0, vec![Step::Busy(Duration::from_secs(60))]);
        let scheduler = Scheduler::new(config, ScriptedFactory::new(vec![worker.clone()]));
        let origin = Instant::now();

        scheduler.start_scheduling();
        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.hard_stop_scheduling();
        scheduler.wait().await.unwrap();

        assert_eq!(worker.completed.load(Ordering::SeqCst), 0);
        assert_eq!(worker.interrupted.load(Ordering::SeqCst), 1);
        assert_eq!(worker.poll_count(), 1);
        assert!(origin.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_ends_only_its_chain() {
        let (_, config) = config(2);
        let failing = ScriptedWorker::new(0, vec![Step::Return(Err(Error::Fatal("broken".into())))]);
        let healthy = ScriptedWorker::new(1, vec![]);
        let scheduler = Scheduler::new(
            config,
            ScriptedFactory::new(vec![failing.clone(), healthy.clone()]),
        );

        scheduler.start_scheduling();
        scheduler.fatal_error().await;
        tokio::time::sleep(POLLING * 3).await;

        assert_eq!(failing.poll_count(), 1);
        assert!(healthy.poll_count() >= 3);

        scheduler.graceful_stop_scheduling();
        let err = scheduler.wait().await.unwrap_err();
        assert!(matches!(err, Error::Fatal(ref m) if m == "broken"));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_poll_is_fatal() {
        let (_, config) = config(1);
        let worker = ScriptedWorker::new(0, vec![Step::Panic]);
        let scheduler = Scheduler::new(config, ScriptedFactory::new(vec![worker.clone()]));

        scheduler.start_scheduling();
        let err = scheduler.wait().await.unwrap_err();

        assert!(matches!(err, Error::Fatal(ref m) if m.contains("worker exploded")));
        assert_eq!(worker.poll_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_start_runs_nothing() {
        let (_, config) = config(1);
        let worker = ScriptedWorker::new(0, vec![]);
        let scheduler = Scheduler::new(config, ScriptedFactory::new(vec![worker.clone()]));

        scheduler.graceful_stop_scheduling();
        scheduler.start_scheduling();
        scheduler.wait().await.unwrap();

        assert_eq!(worker.poll_count(), 0);
    }
}
