//! Job scheduler — the single execution context of the kernel.
//!
//! Every piece of kernel work is a job. Jobs are handed over a bounded
//! channel to one dispatch loop that spawns them as tasks on the current
//! runtime; [`Scheduler::submit`] never blocks and is safe to call from any
//! thread. Blocking jobs run on tokio's blocking pool, at most
//! [`SchedulerConfig::blocking_workers`] at a time.
//!
//! The scheduler also owns the [`CoreState`] lifecycle. Entering a state
//! submits every hook registered for it as a separate job.
//!
//! Shutdown:
//! 1. enter `Stopping` and wait for its hooks
//! 2. keep serving jobs for the grace delay
//! 3. await protected tasks, collecting their errors (jobs are still accepted)
//! 4. close the queue, drop what is still queued
//! 5. cancel every remaining task and await the cancellation
//! 6. enter `Stopped`
//!
//! Cancellation is cooperative: a task that never yields blocks step 5.
//!
//! Jobs are spawned on whatever runtime calls [`Scheduler::start`]. They
//! only run one at a time on a `current_thread` runtime, which is what
//! `homehubd` uses; on a multi-thread runtime they may run in parallel and
//! starting logs a warning.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{Semaphore, mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};

use homehub_domain::error::{HubError, SchedulerError};
use homehub_domain::lifecycle::CoreState;

use crate::ports::LifecycleHook;

/// Kernel tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Grace window between entering `Stopping` and cancelling tasks.
    pub shutdown_delay: Duration,
    /// When `false`, protected tasks are cancelled like any other.
    pub allow_protected_tasks: bool,
    /// Capacity of the job hand-off queue.
    pub queue_capacity: usize,
    /// Maximum number of blocking jobs running at once.
    pub blocking_workers: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            shutdown_delay: Duration::from_secs(2),
            allow_protected_tasks: true,
            queue_capacity: 1024,
            blocking_workers: 4,
        }
    }
}

/// What happened during shutdown.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Errors returned by protected tasks awaited during shutdown.
    pub protected_errors: Vec<HubError>,
    /// Tasks cancelled by the final sweep.
    pub cancelled: usize,
    /// Jobs still queued when the queue closed.
    pub dropped_jobs: usize,
    /// Time since the scheduler was created.
    pub uptime: Duration,
}

/// Completion handle for a job submitted with [`Scheduler::run`].
#[derive(Debug)]
pub struct JobHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> JobHandle<T> {
    /// Wait for the job's result.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Cancelled`] if the job was dropped or
    /// cancelled before it produced a value.
    pub async fn join(self) -> Result<T, SchedulerError> {
        self.rx.await.map_err(|_| SchedulerError::Cancelled)
    }
}

type TaskFuture = BoxFuture<'static, Result<(), HubError>>;
type BlockingFn = Box<dyn FnOnce() -> Result<(), HubError> + Send + 'static>;

enum Job {
    Task { future: TaskFuture, protected: bool },
    Blocking(BlockingFn),
}

/// Cheaply cloneable handle to the execution context.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: SchedulerConfig,
    sender: mpsc::Sender<Job>,
    receiver: Mutex<Option<mpsc::Receiver<Job>>>,
    dispatcher: Mutex<Option<Dispatcher>>,
    state: watch::Sender<CoreState>,
    hooks: Mutex<HashMap<CoreState, Vec<Arc<dyn LifecycleHook>>>>,
    created_at: Instant,
}

struct Dispatcher {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<LoopReport>,
}

/// Whether the calling task runs on a single-threaded tokio runtime.
fn on_current_thread_runtime() -> bool {
    Handle::try_current().is_ok_and(|handle| handle.runtime_flavor() == RuntimeFlavor::CurrentThread)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Scheduler {
    /// Create a scheduler in the `Starting` state.
    ///
    /// Jobs may be submitted right away; they run once the dispatch loop
    /// starts with [`start`](Self::start).
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let (state, _) = watch::channel(CoreState::Starting);
        Self {
            inner: Arc::new(Inner {
                config,
                sender,
                receiver: Mutex::new(Some(receiver)),
                dispatcher: Mutex::new(None),
                state,
                hooks: Mutex::new(HashMap::new()),
                created_at: Instant::now(),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> CoreState {
        *self.inner.state.borrow()
    }

    /// Receiver notified on every lifecycle transition.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<CoreState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.inner.created_at.elapsed()
    }

    /// Register a hook run each time the kernel enters `state`.
    pub fn add_lifecycle_hook(&self, state: CoreState, hook: Arc<dyn LifecycleHook>) {
        lock(&self.inner.hooks).entry(state).or_default().push(hook);
    }

    /// Spawn the dispatch loop on the current runtime and enter `Running`.
    ///
    /// Must be called from within a tokio runtime. Calling it again is a no-op.
    pub fn start(&self) {
        self.spawn_dispatcher();
        if self.transition(CoreState::Running).is_some() {
            tracing::info!("scheduler running");
        }
    }

    /// Hand a job to the execution context.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::QueueFull`] when the hand-off queue is at capacity,
    /// [`SchedulerError::Stopped`] once the queue has been closed.
    pub fn submit<F>(&self, job: F) -> Result<(), SchedulerError>
    where
        F: Future<Output = Result<(), HubError>> + Send + 'static,
    {
        self.send(Job::Task {
            future: job.boxed(),
            protected: false,
        })
    }

    /// Like [`submit`](Self::submit), but shutdown lets the job finish
    /// before cancelling the rest.
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit).
    pub fn submit_protected<F>(&self, job: F) -> Result<(), SchedulerError>
    where
        F: Future<Output = Result<(), HubError>> + Send + 'static,
    {
        self.send(Job::Task {
            future: job.boxed(),
            protected: true,
        })
    }

    /// Run a blocking closure on the worker pool.
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit).
    pub fn submit_blocking<F>(&self, job: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() -> Result<(), HubError> + Send + 'static,
    {
        self.send(Job::Blocking(Box::new(job)))
    }

    /// Submit a job and get a handle to its result.
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit).
    pub fn run<T, F>(&self, job: F) -> Result<JobHandle<T>, SchedulerError>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(async move {
            let _ = tx.send(job.await);
            Ok(())
        })?;
        Ok(JobHandle { rx })
    }

    /// Run a blocking closure on the worker pool and get a handle to its result.
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit).
    pub fn run_blocking<T, F>(&self, job: F) -> Result<JobHandle<T>, SchedulerError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit_blocking(move || {
            let _ = tx.send(job());
            Ok(())
        })?;
        Ok(JobHandle { rx })
    }

    /// Gracefully stop the execution context.
    ///
    /// Must not be awaited from inside a job: the final sweep cancels it.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Stopped`] when a shutdown already happened
    /// or is in progress.
    pub async fn shutdown(&self) -> Result<ShutdownReport, SchedulerError> {
        self.spawn_dispatcher();
        let hooks = self
            .transition(CoreState::Stopping)
            .ok_or(SchedulerError::Stopped)?;
        tracing::info!(
            delay = ?self.inner.config.shutdown_delay,
            "shutdown requested"
        );
        for hook in hooks {
            match hook.join().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!(%err, "stopping hook failed"),
                Err(err) => tracing::warn!(%err, "stopping hook did not run"),
            }
        }

        let dispatcher = lock(&self.inner.dispatcher).take();
        let report = match dispatcher {
            Some(Dispatcher { stop, handle }) => {
                let _ = stop.send(());
                handle.await.map_err(|_| SchedulerError::Cancelled)?
            }
            None => LoopReport::default(),
        };

        self.enter_stopped().await;

        let uptime = self.uptime();
        tracing::info!(
            ?uptime,
            cancelled = report.cancelled,
            dropped_jobs = report.dropped_jobs,
            protected_errors = report.protected_errors.len(),
            "scheduler stopped"
        );
        Ok(ShutdownReport {
            protected_errors: report.protected_errors,
            cancelled: report.cancelled,
            dropped_jobs: report.dropped_jobs,
            uptime,
        })
    }

    fn send(&self, job: Job) -> Result<(), SchedulerError> {
        self.inner.sender.try_send(job).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SchedulerError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SchedulerError::Stopped,
        })
    }

    fn spawn_dispatcher(&self) {
        let Some(receiver) = lock(&self.inner.receiver).take() else {
            return;
        };
        if !on_current_thread_runtime() {
            tracing::warn!("scheduler started outside a current_thread runtime, jobs may run in parallel");
        }
        let (stop, stop_rx) = oneshot::channel();
        let dispatch = DispatchLoop {
            jobs: receiver,
            regular: JoinSet::new(),
            protected: JoinSet::new(),
            blocking: Arc::new(Semaphore::new(self.inner.config.blocking_workers.max(1))),
            report: LoopReport::default(),
        };
        let handle = tokio::spawn(dispatch.run(stop_rx, self.inner.config));
        *lock(&self.inner.dispatcher) = Some(Dispatcher { stop, handle });
    }

    /// Move forward to `next` and submit its hooks.
    ///
    /// Returns `None` when the transition is not allowed.
    fn transition(&self, next: CoreState) -> Option<Vec<JobHandle<Result<(), HubError>>>> {
        let moved = self.inner.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });
        if !moved {
            return None;
        }
        tracing::info!(state = %next, "core state changed");

        let hooks = self.hooks_for(next);
        let mut handles = Vec::with_capacity(hooks.len());
        for hook in hooks {
            match self.run(async move { hook.on_state(next).await }) {
                Ok(handle) => handles.push(handle),
                Err(err) => tracing::warn!(%err, state = %next, "failed to schedule lifecycle hook"),
            }
        }
        Some(handles)
    }

    /// The dispatch loop is gone at this point, so `Stopped` hooks are
    /// spawned directly on the runtime and awaited.
    async fn enter_stopped(&self) {
        let moved = self.inner.state.send_if_modified(|current| {
            let allowed = current.can_transition_to(CoreState::Stopped);
            if allowed {
                *current = CoreState::Stopped;
            }
            allowed
        });
        if !moved {
            return;
        }
        tracing::info!(state = %CoreState::Stopped, "core state changed");

        let mut hooks = JoinSet::new();
        for hook in self.hooks_for(CoreState::Stopped) {
            hooks.spawn(async move { hook.on_state(CoreState::Stopped).await });
        }
        while let Some(result) = hooks.join_next().await {
            log_outcome("lifecycle hook", result);
        }
    }

    fn hooks_for(&self, state: CoreState) -> Vec<Arc<dyn LifecycleHook>> {
        lock(&self.inner.hooks)
            .get(&state)
            .cloned()
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct LoopReport {
    protected_errors: Vec<HubError>,
    cancelled: usize,
    dropped_jobs: usize,
}

struct DispatchLoop {
    jobs: mpsc::Receiver<Job>,
    regular: JoinSet<Result<(), HubError>>,
    protected: JoinSet<Result<(), HubError>>,
    blocking: Arc<Semaphore>,
    report: LoopReport,
}

impl DispatchLoop {
    async fn run(mut self, mut stop: oneshot::Receiver<()>, config: SchedulerConfig) -> LoopReport {
        // Queued jobs take priority over the stop signal so that everything
        // submitted before shutdown gets a chance to start.
        loop {
            tokio::select! {
                biased;
                job = self.jobs.recv() => match job {
                    Some(job) => self.spawn(job),
                    None => break,
                },
                _ = &mut stop => break,
                Some(result) = self.regular.join_next() => log_outcome("job", result),
                Some(result) = self.protected.join_next() => self.collect(result),
            }
        }

        let grace = tokio::time::sleep(config.shutdown_delay);
        tokio::pin!(grace);
        loop {
            tokio::select! {
                biased;
                Some(job) = self.jobs.recv() => self.spawn(job),
                () = &mut grace => break,
                Some(result) = self.regular.join_next() => log_outcome("job", result),
                Some(result) = self.protected.join_next() => self.collect(result),
            }
        }

        if config.allow_protected_tasks {
            tracing::info!(count = self.protected.len(), "waiting on protected tasks");
            while !self.protected.is_empty() {
                tokio::select! {
                    biased;
                    Some(result) = self.protected.join_next() => self.collect(result),
                    Some(job) = self.jobs.recv() => self.spawn(job),
                    Some(result) = self.regular.join_next() => log_outcome("job", result),
                }
            }
        }

        self.jobs.close();
        while self.jobs.try_recv().is_ok() {
            self.report.dropped_jobs += 1;
        }

        let outstanding = self.regular.len() + self.protected.len();
        tracing::info!(count = outstanding, "cancelling outstanding tasks");
        self.regular.abort_all();
        self.protected.abort_all();
        while let Some(result) = self.regular.join_next().await {
            self.reap(result);
        }
        while let Some(result) = self.protected.join_next().await {
            self.reap(result);
        }

        self.report
    }

    fn spawn(&mut self, job: Job) {
        match job {
            Job::Task {
                future,
                protected: true,
            } => {
                self.protected.spawn(future);
            }
            Job::Task { future, .. } => {
                self.regular.spawn(future);
            }
            Job::Blocking(work) => {
                let permits = Arc::clone(&self.blocking);
                self.regular.spawn(async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|_| SchedulerError::Stopped)?;
                    tokio::task::spawn_blocking(work)
                        .await
                        .map_err(HubError::handler)?
                });
            }
        }
    }

    fn collect(&mut self, result: Result<Result<(), HubError>, JoinError>) {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(%err, "protected task failed");
                self.report.protected_errors.push(err);
            }
            Err(err) => {
                tracing::error!(%err, "protected task panicked");
                self.report.protected_errors.push(HubError::handler(err));
            }
        }
    }

    fn reap(&mut self, result: Result<Result<(), HubError>, JoinError>) {
        match result {
            Err(err) if err.is_cancelled() => self.report.cancelled += 1,
            other => log_outcome("job", other),
        }
    }
}

fn log_outcome(what: &str, result: Result<Result<(), HubError>, JoinError>) {
    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(%err, "{what} failed"),
        Err(err) if err.is_cancelled() => tracing::debug!("{what} cancelled"),
        Err(err) => tracing::error!(%err, "{what} panicked"),
    }
}
