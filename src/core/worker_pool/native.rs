//! OS-thread implementation of `WorkerPool`.
//!
//! - Workers block on the channels; no polling.
//! - Results are handed over through a per-task `Mutex` + `Condvar` slot.
//! - Dropping the senders unblocks idle workers for shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::WorkerPoolConfig;
use crate::core::executor::{TaskMetadata, WorkerExecutor};
use crate::util::QueueLane;

use super::{PoolCounters, PoolError, PoolStats, TaskKey, WorkerTask};

type Slot<R> = Arc<(Mutex<Option<R>>, Condvar)>;

/// Result slots keyed by task.
struct ResultStorage<R> {
    entries: RwLock<HashMap<TaskKey, Slot<R>>>,
}

impl<R> ResultStorage<R> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn create_slot(&self, key: TaskKey) {
        self.entries
            .write()
            .insert(key, Arc::new((Mutex::new(None), Condvar::new())));
    }

    /// Store a result and wake the waiter. Results nobody asked for are dropped.
    fn store(&self, key: TaskKey, result: R) {
        let entries = self.entries.read();
        if let Some(slot) = entries.get(&key) {
            let (value, condvar) = slot.as_ref();
            *value.lock() = Some(result);
            condvar.notify_all();
        }
    }

    fn slot(&self, key: TaskKey) -> Option<Slot<R>> {
        self.entries.read().get(&key).cloned()
    }

    fn remove(&self, key: TaskKey) {
        self.entries.write().remove(&key);
    }

    fn wait_for_result(&self, key: TaskKey, timeout: Duration) -> Result<R, PoolError> {
        let slot = self.slot(key).ok_or(PoolError::ResultNotFound)?;
        let (value, condvar) = slot.as_ref();
        let mut value = value.lock();
        if let Some(result) = value.take() {
            return Ok(result);
        }
        if condvar.wait_for(&mut value, timeout).timed_out() {
            return Err(PoolError::Timeout);
        }
        value.take().ok_or(PoolError::Timeout)
    }
}

struct Senders<P> {
    critical: Sender<WorkerTask<P>>,
    default: Sender<WorkerTask<P>>,
}

/// Worker pool with dedicated OS threads.
pub struct WorkerPool<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    config: WorkerPoolConfig,
    /// `None` once shut down.
    senders: Mutex<Option<Senders<P>>>,
    results: Arc<ResultStorage<R>>,
    counters: Arc<PoolCounters>,
    shutdown: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    task_id_counter: AtomicU64,
    _executor: std::marker::PhantomData<E>,
}

impl<P, R, E> WorkerPool<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    /// Create a pool and spawn `config.worker_count` worker threads.
    ///
    /// # Errors
    ///
    /// `PoolError::InvalidConfig` if the configuration is invalid or a worker
    /// thread cannot be spawned.
    pub fn new(config: WorkerPoolConfig, executor: E) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let (critical_tx, critical_rx) = bounded::<WorkerTask<P>>(config.critical_queue_depth);
        let (default_tx, default_rx) = bounded::<WorkerTask<P>>(config.default_queue_depth);
        let results = Arc::new(ResultStorage::new());
        let counters = Arc::new(PoolCounters::default());
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let worker = spawn_worker(
                worker_id,
                Lanes {
                    critical: critical_rx.clone(),
                    default: default_rx.clone(),
                },
                Arc::clone(&results),
                Arc::clone(&counters),
                Arc::clone(&shutdown),
                executor.clone(),
                config.thread_stack_size,
            )
            .map_err(|e| PoolError::InvalidConfig(format!("cannot spawn worker: {e}")))?;
            workers.push(worker);
        }

        info!(
            worker_count = config.worker_count,
            critical_queue_depth = config.critical_queue_depth,
            default_queue_depth = config.default_queue_depth,
            "worker pool started"
        );

        Ok(Self {
            config,
            senders: Mutex::new(Some(Senders {
                critical: critical_tx,
                default: default_tx,
            })),
            results,
            counters,
            shutdown,
            workers: Mutex::new(workers),
            task_id_counter: AtomicU64::new(0),
            _executor: std::marker::PhantomData,
        })
    }

    /// Submit a task whose result will be retrieved with [`Self::retrieve`]
    /// or [`Self::retrieve_async`].
    ///
    /// # Errors
    ///
    /// `QueueFull` when the lane is at capacity, `PoolShutdown` after shutdown.
    pub fn submit(&self, lane: QueueLane, label: &str, payload: P) -> Result<TaskKey, PoolError> {
        self.enqueue(lane, label, payload, true)
    }

    /// Submit a task and discard its result.
    ///
    /// # Errors
    ///
    /// `QueueFull` when the lane is at capacity, `PoolShutdown` after shutdown.
    pub fn submit_detached(
        &self,
        lane: QueueLane,
        label: &str,
        payload: P,
    ) -> Result<TaskKey, PoolError> {
        self.enqueue(lane, label, payload, false)
    }

    fn enqueue(
        &self,
        lane: QueueLane,
        label: &str,
        payload: P,
        wants_result: bool,
    ) -> Result<TaskKey, PoolError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::PoolShutdown);
        }
        let key = TaskKey(self.task_id_counter.fetch_add(1, Ordering::Relaxed));
        if wants_result {
            self.results.create_slot(key);
        }
        let task = WorkerTask {
            payload,
            meta: TaskMetadata {
                id: key,
                lane,
                label: label.to_string(),
            },
            wants_result,
        };

        let senders = self.senders.lock();
        let Some(senders) = senders.as_ref() else {
            self.results.remove(key);
            return Err(PoolError::PoolShutdown);
        };
        let tx = match lane {
            QueueLane::Critical => &senders.critical,
            QueueLane::Default => &senders.default,
        };
        // Count before sending so a fast worker never sees a negative queue.
        self.counters.enqueued(lane);
        match tx.try_send(task) {
            Ok(()) => {
                debug!(task = %key, lane = %lane, label = label, "task submitted");
                Ok(key)
            }
            Err(err) => {
                self.counters.rejected(lane);
                self.results.remove(key);
                match err {
                    TrySendError::Full(_) => {
                        warn!(lane = %lane, "worker pool queue is full");
                        Err(PoolError::QueueFull(lane))
                    }
                    TrySendError::Disconnected(_) => Err(PoolError::PoolShutdown),
                }
            }
        }
    }

    /// Wait for a result without blocking the async runtime.
    ///
    /// # Errors
    ///
    /// `Timeout` or `ResultNotFound`.
    pub async fn retrieve_async(&self, key: TaskKey, timeout: Duration) -> Result<R, PoolError> {
        let results = Arc::clone(&self.results);
        let waited = tokio::task::spawn_blocking(move || results.wait_for_result(key, timeout))
            .await
            .unwrap_or(Err(PoolError::ResultNotFound));
        self.results.remove(key);
        waited
    }

    /// Wait for a result, blocking the current thread.
    ///
    /// # Errors
    ///
    /// `Timeout` or `ResultNotFound`.
    pub fn retrieve(&self, key: TaskKey, timeout: Duration) -> Result<R, PoolError> {
        let result = self.results.wait_for_result(key, timeout);
        self.results.remove(key);
        result
    }

    /// Current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.config.worker_count)
    }

    /// Queued plus executing tasks on `lane`.
    #[must_use]
    pub fn in_flight(&self, lane: QueueLane) -> u64 {
        self.stats().in_flight(lane)
    }

    /// Stop accepting work and join the workers, waiting up to two seconds
    /// for each. Queued tasks are still drained by the workers before they exit.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("shutting down worker pool");
        *self.senders.lock() = None;

        let mut workers = self.workers.lock();
        let worker_count = workers.len();
        for (idx, worker) in workers.drain(..).enumerate() {
            let (tx, rx) = std::sync::mpsc::channel();
            let join_thread = thread::spawn(move || {
                let _ = tx.send(worker.join().is_ok());
            });
            match rx.recv_timeout(Duration::from_secs(2)) {
                Ok(true) => debug!(worker_id = idx, "worker joined"),
                Ok(false) => warn!(worker_id = idx, "worker panicked"),
                Err(_) => {
                    warn!(worker_id = idx, "worker did not exit within timeout, detaching");
                    continue;
                }
            }
            let _ = join_thread.join();
        }
        info!(worker_count = worker_count, "worker pool shut down");
    }
}

impl<P, R, E> Drop for WorkerPool<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    fn drop(&mut self) {
        // Workers are detached, not joined; call `shutdown` for a clean stop.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            *self.senders.lock() = None;
            debug!("worker pool dropped without explicit shutdown");
        }
    }
}

struct Lanes<P> {
    critical: Receiver<WorkerTask<P>>,
    default: Receiver<WorkerTask<P>>,
}

impl<P> Lanes<P> {
    /// Next task, critical first. `None` once both lanes are closed and empty.
    fn next(&self) -> Option<WorkerTask<P>> {
        if let Ok(task) = self.critical.try_recv() {
            return Some(task);
        }
        select! {
            recv(self.critical) -> msg => msg.ok().or_else(|| self.default.recv().ok()),
            recv(self.default) -> msg => match msg {
                // Critical work may have arrived while we waited.
                Ok(task) => Some(task),
                Err(_) => self.critical.recv().ok(),
            },
        }
    }
}

fn spawn_worker<P, R, E>(
    worker_id: usize,
    lanes: Lanes<P>,
    results: Arc<ResultStorage<R>>,
    counters: Arc<PoolCounters>,
    shutdown: Arc<AtomicBool>,
    executor: E,
    stack_size: usize,
) -> std::io::Result<JoinHandle<()>>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    thread::Builder::new()
        .name(format!("pipeline-worker-{worker_id}"))
        .stack_size(stack_size)
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(worker_id = worker_id, error = %e, "failed to create worker runtime");
                    return;
                }
            };

            while let Some(task) = lanes.next() {
                let lane = task.meta.lane;
                let key = task.meta.id;
                counters.started(lane);
                debug!(worker_id = worker_id, task = %key, lane = %lane, label = %task.meta.label, "executing");

                let result = rt.block_on(executor.execute(task.payload, task.meta));
                if task.wants_result {
                    results.store(key, result);
                }
                counters.finished(lane);

                if shutdown.load(Ordering::Acquire) && lanes.critical.is_empty() && lanes.default.is_empty() {
                    break;
                }
            }
            debug!(worker_id = worker_id, "worker exiting");
        })
}
