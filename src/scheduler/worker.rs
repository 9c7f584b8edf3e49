//! Queue-draining worker loop.
//!
//! A `WorkerLoop` pops fingerprints from one queue, hands the parsed key to
//! its `TaskProcessor` and publishes whatever comes back under the same key.
//! Handler errors and panics are published as error records so that waiting
//! producers are released before their timeout.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::job::{ResultRecord, TaskKey, TaskKind};
use super::store::{ResultStore, StoreError};
use crate::config::WorkerConfig;
use crate::metrics::MetricsCollector;

const MIN_DEQUEUE_SLICE: Duration = Duration::from_millis(1);

/// Errors a task processor can report.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Task kind '{found}' is not handled by this worker (expects '{expected}')")]
    UnsupportedKind { expected: TaskKind, found: TaskKind },

    #[error("Task failed: {0}")]
    TaskFailed(String),
}

/// Computes the result for one task key.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    /// The task kind this processor handles.
    fn kind(&self) -> TaskKind;

    /// Computes the record to publish for `key`.
    async fn process_task(&self, key: &TaskKey) -> Result<ResultRecord, WorkerError>;

    /// Releases outbound resources. Called once when the loop stops.
    async fn shutdown(&self) {}
}

/// Lifecycle state of a worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Dequeuing,
    Processing,
    Publishing,
    ShuttingDown,
    Stopped,
}

/// Snapshot of worker counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// Entries answered with a success record.
    pub processed: u64,
    /// Entries answered with an error record.
    pub failed: u64,
    /// Malformed entries dropped without an answer.
    pub discarded: u64,
}

impl WorkerStats {
    /// Returns the number of entries taken off the queue.
    pub fn total(&self) -> u64 {
        self.processed + self.failed + self.discarded
    }
}

#[derive(Default)]
struct SharedWorkerStats {
    processed: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

impl SharedWorkerStats {
    fn to_stats(&self) -> WorkerStats {
        WorkerStats {
            processed: self.processed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            discarded: self.discarded.load(Ordering::SeqCst),
        }
    }
}

/// Drains one queue through a `TaskProcessor`.
pub struct WorkerLoop {
    store: Arc<dyn ResultStore>,
    processor: Arc<dyn TaskProcessor>,
    queue: String,
    config: WorkerConfig,
    state_tx: watch::Sender<WorkerState>,
    stats: Arc<SharedWorkerStats>,
    metrics: MetricsCollector,
}

impl WorkerLoop {
    /// Creates a worker for `queue`.
    pub fn new(
        store: Arc<dyn ResultStore>,
        processor: Arc<dyn TaskProcessor>,
        queue: impl Into<String>,
        config: WorkerConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(WorkerState::Idle);
        Self {
            store,
            processor,
            queue: queue.into(),
            config,
            state_tx,
            stats: Arc::new(SharedWorkerStats::default()),
            metrics: MetricsCollector::new(),
        }
    }

    /// Returns a receiver that follows the loop's state.
    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state_tx.subscribe()
    }

    /// Returns the current state.
    pub fn state(&self) -> WorkerState {
        *self.state_tx.borrow()
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> WorkerStats {
        self.stats.to_stats()
    }

    /// Runs until `shutdown` resolves or a non-zero dequeue timeout expires.
    ///
    /// Shutdown is checked between dequeue slices, so a pop already sent to
    /// the store always completes and its entry is handled before the loop
    /// stops. An entry that is being processed is never interrupted.
    pub async fn run<F>(&self, shutdown: F) -> WorkerStats
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let kind = self.processor.kind();
        self.metrics.inc_workers();
        info!(
            worker_id = %self.config.worker_id,
            queue = %self.queue,
            kind = %kind,
            "Worker started"
        );

        let mut idle_since = Instant::now();
        loop {
            if shutdown.as_mut().now_or_never().is_some() {
                info!(worker_id = %self.config.worker_id, "Shutdown signal received");
                break;
            }

            let Some(wait) = self.dequeue_wait(idle_since) else {
                info!(
                    worker_id = %self.config.worker_id,
                    timeout_secs = self.config.dequeue_timeout.as_secs(),
                    "Queue idle past dequeue timeout"
                );
                break;
            };

            self.set_state(WorkerState::Dequeuing);
            match self.store.dequeue(&self.queue, wait).await {
                Ok(Some(raw)) => {
                    self.handle_entry(&raw).await;
                    if let Ok(depth) = self.store.queue_len(&self.queue).await {
                        self.metrics.update_queue_depth(&self.queue, depth);
                    }
                    idle_since = Instant::now();
                }
                Ok(None) => {}
                Err(e) => {
                    error!(worker_id = %self.config.worker_id, error = %e, "Dequeue failed");
                    self.set_state(WorkerState::Idle);
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                }
            }

            self.set_state(WorkerState::Idle);
        }

        self.set_state(WorkerState::ShuttingDown);
        self.processor.shutdown().await;
        self.metrics.dec_workers();
        self.set_state(WorkerState::Stopped);

        let stats = self.stats();
        info!(
            worker_id = %self.config.worker_id,
            processed = stats.processed,
            failed = stats.failed,
            discarded = stats.discarded,
            "Worker stopped"
        );
        stats
    }

    /// Processes one raw queue entry and publishes its record.
    ///
    /// Malformed entries are logged and dropped.
    pub async fn handle_entry(&self, raw: &str) {
        let kind = self.processor.kind();

        let key = match TaskKey::parse(raw) {
            Ok(key) => key,
            Err(e) => {
                warn!(
                    worker_id = %self.config.worker_id,
                    entry = %raw,
                    error = %e,
                    "Discarding malformed queue entry"
                );
                self.stats.discarded.fetch_add(1, Ordering::SeqCst);
                self.metrics.record_task(kind.prefix(), "malformed", 0.0);
                return;
            }
        };

        if key.kind() != kind {
            let err = WorkerError::UnsupportedKind {
                expected: kind,
                found: key.kind(),
            };
            warn!(worker_id = %self.config.worker_id, key = %key, error = %err, "Wrong queue");
            self.stats.failed.fetch_add(1, Ordering::SeqCst);
            self.metrics.record_task(kind.prefix(), "failure", 0.0);
            self.publish(raw, &ResultRecord::failure(err.to_string())).await;
            return;
        }

        self.set_state(WorkerState::Processing);
        debug!(worker_id = %self.config.worker_id, key = %key, "Processing task");
        self.metrics.inc_jobs_in_progress();
        let started = Instant::now();

        let result = AssertUnwindSafe(self.processor.process_task(&key))
            .catch_unwind()
            .await;

        self.metrics.dec_jobs_in_progress();
        let duration = started.elapsed();

        let (record, status) = match result {
            Ok(Ok(record)) if record.is_failure() => (record, "failure"),
            Ok(Ok(record)) => (record, "success"),
            Ok(Err(e)) => {
                warn!(worker_id = %self.config.worker_id, key = %key, error = %e, "Task failed");
                (ResultRecord::failure(e.to_string()), "failure")
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(worker_id = %self.config.worker_id, key = %key, panic = %message, "Task panicked");
                (
                    ResultRecord::failure(format!("Task panicked: {}", message)),
                    "panicked",
                )
            }
        };

        if status == "success" {
            self.stats.processed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.stats.failed.fetch_add(1, Ordering::SeqCst);
        }
        self.metrics
            .record_task(kind.prefix(), status, duration.as_secs_f64());

        self.set_state(WorkerState::Publishing);
        self.publish(raw, &record).await;

        info!(
            worker_id = %self.config.worker_id,
            key = %key,
            status = status,
            duration_ms = duration.as_millis() as u64,
            "Task finished"
        );
    }

    async fn publish(&self, key: &str, record: &ResultRecord) {
        if let Err(e) = self.store.publish(key, record).await {
            error!(
                worker_id = %self.config.worker_id,
                key = %key,
                error = %e,
                "Failed to publish result"
            );
        }
    }

    /// Length of the next blocking pop, or `None` once the idle timeout
    /// has passed. Never zero, since a zero timeout blocks forever.
    fn dequeue_wait(&self, idle_since: Instant) -> Option<Duration> {
        let slice = self.config.dequeue_slice.max(MIN_DEQUEUE_SLICE);
        if self.config.dequeue_timeout.is_zero() {
            return Some(slice);
        }
        let remaining = self
            .config
            .dequeue_timeout
            .saturating_sub(idle_since.elapsed());
        (!remaining.is_zero()).then(|| remaining.min(slice))
    }

    fn set_state(&self, state: WorkerState) {
        self.state_tx.send_replace(state);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::store::MemoryStore;
    use serde_json::{json, Map, Value};
    use std::time::Duration;

    struct EchoProcessor;

    #[async_trait]
    impl TaskProcessor for EchoProcessor {
        fn kind(&self) -> TaskKind {
            TaskKind::Search
        }

        async fn process_task(&self, key: &TaskKey) -> Result<ResultRecord, WorkerError> {
            match key.ticker() {
                "FAIL" => Err(WorkerError::TaskFailed("upstream down".to_string())),
                "BOOM" => panic!("handler exploded"),
                ticker => {
                    let mut payload = Map::new();
                    payload.insert("ticker".to_string(), Value::String(ticker.to_string()));
                    Ok(ResultRecord::success(payload))
                }
            }
        }
    }

    fn worker(store: Arc<MemoryStore>) -> WorkerLoop {
        WorkerLoop::new(
            store,
            Arc::new(EchoProcessor),
            "search_queue",
            WorkerConfig::default()
                .with_worker_id("test-worker")
                .with_dequeue_timeout(Duration::from_millis(50)),
        )
    }

    async fn stored(store: &MemoryStore, key: &str) -> Option<Value> {
        store
            .get(key)
            .await
            .expect("get")
            .map(|raw| serde_json::from_str(&raw).expect("valid json"))
    }

    #[tokio::test]
    async fn test_success_is_published() {
        let store = Arc::new(MemoryStore::new());
        let worker = worker(store.clone());

        worker.handle_entry("search:AAPL,2023-01-01").await;

        assert_eq!(
            stored(&store, "search:AAPL,2023-01-01").await,
            Some(json!({"ticker": "AAPL"}))
        );
        assert_eq!(worker.stats().processed, 1);
    }

    #[tokio::test]
    async fn test_error_publishes_error_record() {
        let store = Arc::new(MemoryStore::new());
        let worker = worker(store.clone());

        worker.handle_entry("search:FAIL,2023-01-01").await;

        let value = stored(&store, "search:FAIL,2023-01-01")
            .await
            .expect("record published");
        assert!(value["error"]
            .as_str()
            .expect("error string")
            .contains("upstream down"));
        assert_eq!(worker.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_panic_publishes_error_record() {
        let store = Arc::new(MemoryStore::new());
        let worker = worker(store.clone());

        worker.handle_entry("search:BOOM,2023-01-01").await;

        let value = stored(&store, "search:BOOM,2023-01-01")
            .await
            .expect("record published");
        assert!(value["error"]
            .as_str()
            .expect("error string")
            .contains("handler exploded"));
    }

    #[tokio::test]
    async fn test_wrong_kind_publishes_error_record() {
        let store = Arc::new(MemoryStore::new());
        let worker = worker(store.clone());

        worker.handle_entry("stock:AAPL,2020-01-01,2021-01-01").await;

        let value = stored(&store, "stock:AAPL,2020-01-01,2021-01-01")
            .await
            .expect("record published");
        assert!(value.get("error").is_some());
    }

    #[tokio::test]
    async fn test_malformed_entry_is_discarded() {
        let store = Arc::new(MemoryStore::new());
        let worker = worker(store.clone());

        worker.handle_entry("garbage").await;
        worker.handle_entry("search:AAPL").await;

        assert_eq!(worker.stats().discarded, 2);
        assert_eq!(stored(&store, "garbage").await, None);
    }

    #[tokio::test]
    async fn test_run_stops_after_idle_timeout() {
        let store = Arc::new(MemoryStore::new());
        store
            .enqueue("search_queue", "search:AAPL,2023-01-01")
            .await
            .expect("enqueue");
        let worker = worker(store.clone());

        let stats = worker.run(std::future::pending()).await;

        assert_eq!(stats.processed, 1);
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_blocking_dequeue() {
        let store = Arc::new(MemoryStore::new());
        let worker = WorkerLoop::new(
            store,
            Arc::new(EchoProcessor),
            "search_queue",
            WorkerConfig::default()
                .with_dequeue_timeout(Duration::ZERO)
                .with_dequeue_slice(Duration::from_millis(50)),
        );
        let mut state = worker.subscribe_state();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let shutdown = async move {
            let _ = rx.await;
        };

        let run = worker.run(shutdown);
        let trigger = async {
            state
                .wait_for(|s| *s == WorkerState::Dequeuing)
                .await
                .expect("state channel open");
            let _ = tx.send(());
        };

        let (stats, _) = tokio::time::timeout(Duration::from_secs(2), async {
            tokio::join!(run, trigger)
        })
        .await
        .expect("worker should stop promptly");

        assert_eq!(stats.total(), 0);
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    /// Counts pops that were started and pops that ran to completion.
    #[derive(Default)]
    struct TrackingStore {
        inner: MemoryStore,
        pops_started: AtomicU64,
        pops_finished: AtomicU64,
    }

    #[async_trait]
    impl ResultStore for TrackingStore {
        async fn ping(&self) -> Result<(), StoreError> {
            self.inner.ping().await
        }

        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.inner.set(key, value).await
        }

        async fn enqueue(&self, queue: &str, key: &str) -> Result<(), StoreError> {
            self.inner.enqueue(queue, key).await
        }

        async fn dequeue(&self, queue: &str, timeout: Duration) -> Result<Option<String>, StoreError> {
            self.pops_started.fetch_add(1, Ordering::SeqCst);
            let popped = self.inner.dequeue(queue, timeout).await;
            self.pops_finished.fetch_add(1, Ordering::SeqCst);
            popped
        }

        async fn try_claim(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
            self.inner.try_claim(key, ttl).await
        }

        async fn queue_len(&self, queue: &str) -> Result<usize, StoreError> {
            self.inner.queue_len(queue).await
        }
    }

    #[tokio::test]
    async fn test_shutdown_never_abandons_a_pop_in_flight() {
        let store = Arc::new(TrackingStore::default());
        let worker = Arc::new(WorkerLoop::new(
            store.clone(),
            Arc::new(EchoProcessor),
            "search_queue",
            WorkerConfig::default()
                .with_dequeue_timeout(Duration::ZERO)
                .with_dequeue_slice(Duration::from_millis(40)),
        ));

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn({
            let worker = worker.clone();
            async move {
                worker
                    .run(async move {
                        let _ = rx.await;
                    })
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = tx.send(());
        // Pushed after shutdown was requested, possibly while a pop is pending.
        store
            .enqueue("search_queue", "search:LATE,2023-01-01")
            .await
            .expect("enqueue");

        let stats = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker should stop promptly")
            .expect("join");

        let started = store.pops_started.load(Ordering::SeqCst);
        assert!(started >= 2);
        assert_eq!(started, store.pops_finished.load(Ordering::SeqCst));

        // The late entry was either handled or is still queued, never dropped.
        let published = store
            .get("search:LATE,2023-01-01")
            .await
            .expect("get")
            .is_some();
        let queued = store.queue_len("search_queue").await.expect("len");
        assert_eq!(u64::from(published), stats.processed);
        assert_eq!(usize::from(published) + queued, 1);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(boxed.as_ref()), "static message");

        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");

        let boxed: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
