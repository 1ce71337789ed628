//! Background maintenance scheduler.
//!
//! Three independent loops share one bounded queue:
//! - fill: enqueue a [`MaintenanceTask::Fill`], dropping it when the queue is full
//! - process: dequeue at most one task and spawn it
//! - cleanup: spawn a sweep of every partition directly
//!
//! Every tick gets a fresh correlation id carried on its `tracing` span.
//! Spawned work runs under a [`TaskSupervisor`]: a panicking task is logged
//! and never takes the loops down.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::positive_env;
use crate::error::AppError;

/// Scheduler timing and queue sizing.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub queue_capacity: usize,
    pub fill_interval: Duration,
    pub process_interval: Duration,
    pub cleanup_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 5,
            fill_interval: Duration::from_millis(12_200),
            process_interval: Duration::from_millis(18_400),
            cleanup_interval: Duration::from_millis(74_500),
        }
    }
}

impl SchedulerConfig {
    /// Read configuration from environment variables.
    ///
    /// - `KESTREL_QUEUE_CAPACITY` (defaults to 5)
    /// - `KESTREL_FILL_INTERVAL_MS` (defaults to 12200)
    /// - `KESTREL_PROCESS_INTERVAL_MS` (defaults to 18400)
    /// - `KESTREL_CLEANUP_INTERVAL_MS` (defaults to 74500)
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();
        Ok(Self {
            queue_capacity: positive_env("KESTREL_QUEUE_CAPACITY", defaults.queue_capacity as u64)?
                as usize,
            fill_interval: Duration::from_millis(positive_env(
                "KESTREL_FILL_INTERVAL_MS",
                defaults.fill_interval.as_millis() as u64,
            )?),
            process_interval: Duration::from_millis(positive_env(
                "KESTREL_PROCESS_INTERVAL_MS",
                defaults.process_interval.as_millis() as u64,
            )?),
            cleanup_interval: Duration::from_millis(positive_env(
                "KESTREL_CLEANUP_INTERVAL_MS",
                defaults.cleanup_interval.as_millis() as u64,
            )?),
        })
    }
}

/// A unit of deferred work on the event queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaintenanceTask {
    /// Top up every partition that is not full.
    Fill {
        correlation_id: Uuid,
        /// Keep refilling until shutdown instead of running once.
        independent_loop: bool,
    },
}

impl MaintenanceTask {
    pub fn fill(correlation_id: Uuid) -> Self {
        MaintenanceTask::Fill {
            correlation_id,
            independent_loop: false,
        }
    }

    pub fn correlation_id(&self) -> Uuid {
        match self {
            MaintenanceTask::Fill { correlation_id, .. } => *correlation_id,
        }
    }
}

/// What the scheduler runs.
pub trait MaintenanceHandler: Send + Sync + Clone + 'static {
    /// Fill pass. With `independent_loop`, repeat until `cancel` fires.
    fn fill(
        &self,
        independent_loop: bool,
        cancel: CancellationToken,
    ) -> impl Future<Output = ()> + Send;

    /// Sweep every partition.
    fn cleanup(&self) -> impl Future<Output = ()> + Send;
}

/// Bounded, non-blocking FIFO of [`MaintenanceTask`]s.
#[derive(Debug)]
pub struct EventQueue {
    tx: mpsc::Sender<MaintenanceTask>,
    rx: Mutex<mpsc::Receiver<MaintenanceTask>>,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Enqueue without waiting. Hands the task back when the queue is full.
    pub fn try_push(&self, task: MaintenanceTask) -> Result<(), MaintenanceTask> {
        self.tx.try_send(task).map_err(|e| match e {
            TrySendError::Full(task) | TrySendError::Closed(task) => task,
        })
    }

    /// Dequeue without waiting.
    pub fn try_pop(&self) -> Option<MaintenanceTask> {
        let mut rx = self.rx.lock().ok()?;
        match rx.try_recv() {
            Ok(task) => Some(task),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Spawns background tasks and contains their panics.
#[derive(Debug, Clone, Default)]
pub struct TaskSupervisor {
    tracker: TaskTracker,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fut` on its own task inside `span`. A panic is logged with the
    /// task's name; siblings are unaffected.
    pub fn spawn<F>(&self, name: &'static str, span: tracing::Span, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let inner = tokio::spawn(fut.instrument(span.clone()));
        self.tracker.spawn(
            async move {
                if let Err(e) = inner.await {
                    if e.is_panic() {
                        tracing::error!(task = name, "Background task panicked");
                    } else {
                        tracing::warn!(task = name, "Background task cancelled");
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Number of tasks still running.
    pub fn active(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting tasks and wait for the running ones.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Events emitted by the scheduler for monitoring/logging.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    Started,
    Enqueued { queue_len: usize },
    QueueFull { queue_len: usize },
    Dequeued { queue_len: usize },
    QueueEmpty,
    CleanupSpawned,
    Stopped,
}

/// Trait for receiving scheduler events (decoupled logging).
pub trait SchedulerReporter: Send + Sync {
    fn report(&self, event: SchedulerEvent) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSchedulerReporter;

impl SchedulerReporter for TracingSchedulerReporter {
    fn report(&self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::Started => tracing::info!("Scheduler started"),
            SchedulerEvent::Enqueued { queue_len } => {
                tracing::info!(%queue_len, "Fill task enqueued");
            }
            SchedulerEvent::QueueFull { queue_len } => {
                tracing::warn!(%queue_len, "Event queue is full, dropping fill task");
            }
            SchedulerEvent::Dequeued { queue_len } => {
                tracing::info!(%queue_len, "Fill task dequeued");
            }
            SchedulerEvent::QueueEmpty => tracing::debug!("Event queue is empty"),
            SchedulerEvent::CleanupSpawned => tracing::info!("Cleanup task spawned"),
            SchedulerEvent::Stopped => tracing::info!("Scheduler stopped"),
        }
    }
}

fn tick_span(loop_name: &'static str, correlation_id: Uuid) -> tracing::Span {
    tracing::info_span!("maintenance", task = loop_name, %correlation_id)
}

/// Owns the event queue and runs the three maintenance loops.
#[derive(Debug)]
pub struct Scheduler<H> {
    handler: H,
    config: SchedulerConfig,
    queue: EventQueue,
    supervisor: TaskSupervisor,
}

impl<H: MaintenanceHandler> Scheduler<H> {
    pub fn new(handler: H, config: SchedulerConfig) -> Self {
        let queue = EventQueue::new(config.queue_capacity);
        Self {
            handler,
            config,
            queue,
            supervisor: TaskSupervisor::new(),
        }
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn supervisor(&self) -> &TaskSupervisor {
        &self.supervisor
    }

    /// One fill tick: enqueue a fill task. `false` when the queue was full.
    pub fn enqueue_fill<R: SchedulerReporter>(&self, correlation_id: Uuid, reporter: &R) -> bool {
        match self.queue.try_push(MaintenanceTask::fill(correlation_id)) {
            Ok(()) => {
                reporter.report(SchedulerEvent::Enqueued {
                    queue_len: self.queue.len(),
                });
                true
            }
            Err(_) => {
                reporter.report(SchedulerEvent::QueueFull {
                    queue_len: self.queue.len(),
                });
                false
            }
        }
    }

    /// One process tick: spawn at most one queued task. `false` when empty.
    pub fn process_one<R: SchedulerReporter>(
        &self,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> bool {
        let Some(task) = self.queue.try_pop() else {
            reporter.report(SchedulerEvent::QueueEmpty);
            return false;
        };
        reporter.report(SchedulerEvent::Dequeued {
            queue_len: self.queue.len(),
        });

        match task {
            MaintenanceTask::Fill {
                correlation_id,
                independent_loop,
            } => {
                let handler = self.handler.clone();
                let cancel = cancel.child_token();
                self.supervisor.spawn(
                    "fill",
                    tick_span("fill", correlation_id),
                    async move { handler.fill(independent_loop, cancel).await },
                );
            }
        }
        true
    }

    /// One cleanup tick: spawn a sweep directly, bypassing the queue.
    pub fn spawn_cleanup<R: SchedulerReporter>(&self, correlation_id: Uuid, reporter: &R) {
        let handler = self.handler.clone();
        self.supervisor.spawn(
            "cleanup",
            tick_span("cleanup", correlation_id),
            async move { handler.cleanup().await },
        );
        reporter.report(SchedulerEvent::CleanupSpawned);
    }

    /// Run all three loops until `cancel` fires, then wait for spawned work.
    pub async fn run<R: SchedulerReporter>(&self, cancel: CancellationToken, reporter: &R) {
        reporter.report(SchedulerEvent::Started);

        let fill = async {
            loop {
                let id = Uuid::new_v4();
                tick_span("fill", id).in_scope(|| self.enqueue_fill(id, reporter));
                tokio::select! {
                    () = tokio::time::sleep(self.config.fill_interval) => {}
                    () = cancel.cancelled() => break,
                }
            }
        };

        let process = async {
            loop {
                let id = Uuid::new_v4();
                tick_span("process", id).in_scope(|| self.process_one(&cancel, reporter));
                tokio::select! {
                    () = tokio::time::sleep(self.config.process_interval) => {}
                    () = cancel.cancelled() => break,
                }
            }
        };

        let cleanup = async {
            loop {
                self.spawn_cleanup(Uuid::new_v4(), reporter);
                tokio::select! {
                    () = tokio::time::sleep(self.config.cleanup_interval) => {}
                    () = cancel.cancelled() => break,
                }
            }
        };

        tokio::join!(fill, process, cleanup);
        self.supervisor.shutdown().await;
        reporter.report(SchedulerEvent::Stopped);
    }
}
