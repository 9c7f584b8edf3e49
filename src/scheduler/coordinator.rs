//! Read-through request coordination over the result store.
//!
//! A producer asks for the value of a fingerprint. The coordinator answers from
//! the store when it can. Otherwise it enqueues the fingerprint for a worker
//! and polls the store until the worker publishes a record or the feeding
//! timeout passes.
//!
//! With claiming enabled, a producer first sets `claim:<fingerprint>` with
//! `SET NX EX`. Only the caller that creates the marker enqueues; the others
//! join the in-flight computation by polling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::job::{Fingerprint, ResultRecord};
use super::store::{ResultStore, StoreError};
use crate::config::CoordinatorConfig;
use crate::metrics::MetricsCollector;

const CLAIM_PREFIX: &str = "claim:";

/// How a single fetch ended.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// A success record was already stored.
    Cached(Map<String, Value>),
    /// A success record appeared while polling.
    Computed(Map<String, Value>),
    /// An error record was already stored.
    CachedError(String),
    /// A worker published an error record while we polled.
    WorkerError(String),
    /// No record appeared before the feeding timeout.
    TimedOut,
    /// The stored value is not a valid record.
    Invalid(String),
}

impl FetchOutcome {
    /// Metric label for this outcome.
    pub fn label(&self) -> &'static str {
        match self {
            FetchOutcome::Cached(_) => "cached",
            FetchOutcome::Computed(_) => "computed",
            FetchOutcome::CachedError(_) => "cached_error",
            FetchOutcome::WorkerError(_) => "worker_error",
            FetchOutcome::TimedOut => "timed_out",
            FetchOutcome::Invalid(_) => "invalid",
        }
    }

    /// Returns the success payload, if any.
    pub fn into_payload(self) -> Option<Map<String, Value>> {
        match self {
            FetchOutcome::Cached(payload) | FetchOutcome::Computed(payload) => Some(payload),
            _ => None,
        }
    }
}

/// Snapshot of coordinator counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    /// Fetches started.
    pub requested: u64,
    /// Fetches answered by an existing success record.
    pub cached: u64,
    /// Work items this coordinator enqueued.
    pub enqueued: u64,
    /// Fetches that found a live claim and polled without enqueueing.
    pub joined: u64,
    /// Fetches answered by a record published while polling.
    pub completed: u64,
    /// Fetches that gave up at the feeding timeout.
    pub timed_out: u64,
    /// Fetches answered by an error record, cached or fresh.
    pub worker_errors: u64,
    /// Fetches that found a value that is not a valid record.
    pub invalid: u64,
}

#[derive(Default)]
struct SharedCoordinatorStats {
    requested: AtomicU64,
    cached: AtomicU64,
    enqueued: AtomicU64,
    joined: AtomicU64,
    completed: AtomicU64,
    timed_out: AtomicU64,
    worker_errors: AtomicU64,
    invalid: AtomicU64,
}

impl SharedCoordinatorStats {
    fn record_outcome(&self, outcome: &FetchOutcome) {
        let counter = match outcome {
            FetchOutcome::Cached(_) => &self.cached,
            FetchOutcome::Computed(_) => &self.completed,
            FetchOutcome::CachedError(_) | FetchOutcome::WorkerError(_) => &self.worker_errors,
            FetchOutcome::TimedOut => &self.timed_out,
            FetchOutcome::Invalid(_) => &self.invalid,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn to_stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            requested: self.requested.load(Ordering::SeqCst),
            cached: self.cached.load(Ordering::SeqCst),
            enqueued: self.enqueued.load(Ordering::SeqCst),
            joined: self.joined.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            timed_out: self.timed_out.load(Ordering::SeqCst),
            worker_errors: self.worker_errors.load(Ordering::SeqCst),
            invalid: self.invalid.load(Ordering::SeqCst),
        }
    }
}

/// Producer-side half of the memoization protocol.
pub struct RequestCoordinator {
    store: Arc<dyn ResultStore>,
    config: CoordinatorConfig,
    stats: Arc<SharedCoordinatorStats>,
    metrics: MetricsCollector,
}

impl RequestCoordinator {
    /// Creates a coordinator over `store`.
    pub fn new(store: Arc<dyn ResultStore>, config: CoordinatorConfig) -> Self {
        Self {
            store,
            config,
            stats: Arc::new(SharedCoordinatorStats::default()),
            metrics: MetricsCollector::new(),
        }
    }

    /// Returns the coordinator configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> CoordinatorStats {
        self.stats.to_stats()
    }

    /// Returns the success payload for `fingerprint`, computing it if needed.
    ///
    /// Timeouts, error records and invalid values all yield `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store fails mid-protocol.
    pub async fn fetch_or_compute(
        &self,
        queue: &str,
        fingerprint: &Fingerprint,
    ) -> Result<Option<Map<String, Value>>, StoreError> {
        Ok(self.fetch(queue, fingerprint).await?.into_payload())
    }

    /// Runs one fetch and reports how it ended.
    pub async fn fetch(
        &self,
        queue: &str,
        fingerprint: &Fingerprint,
    ) -> Result<FetchOutcome, StoreError> {
        let started = Instant::now();
        self.stats.requested.fetch_add(1, Ordering::SeqCst);

        let outcome = match self.read_record(fingerprint).await? {
            Some(Ok(ResultRecord::Success(payload))) => FetchOutcome::Cached(payload),
            Some(Ok(ResultRecord::Failure { reason, .. })) => FetchOutcome::CachedError(reason),
            Some(Err(reason)) => FetchOutcome::Invalid(reason),
            None => {
                self.submit(queue, fingerprint).await?;
                self.wait_for_key(fingerprint).await?
            }
        };

        self.finish(fingerprint, &outcome, started);
        Ok(outcome)
    }

    /// Fetches several fingerprints concurrently.
    ///
    /// Each entry is `(queue, fingerprint)`. A failure on one entry, store
    /// errors included, makes that slot `None` without affecting the others.
    pub async fn fetch_many(
        &self,
        requests: &[(&str, &Fingerprint)],
    ) -> Vec<Option<Map<String, Value>>> {
        let fetches = requests.iter().map(|(queue, fingerprint)| async move {
            match self.fetch_or_compute(queue, fingerprint).await {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(fingerprint = %fingerprint, error = %e, "Fetch failed");
                    None
                }
            }
        });
        join_all(fetches).await
    }

    /// Polls until a record for `fingerprint` appears or the feeding timeout
    /// passes.
    pub async fn wait_for_key(&self, fingerprint: &Fingerprint) -> Result<FetchOutcome, StoreError> {
        let deadline = Instant::now() + self.config.feeding_timeout;

        loop {
            match self.read_record(fingerprint).await? {
                Some(Ok(ResultRecord::Success(payload))) => {
                    return Ok(FetchOutcome::Computed(payload))
                }
                Some(Ok(ResultRecord::Failure { reason, .. })) => {
                    return Ok(FetchOutcome::WorkerError(reason))
                }
                Some(Err(reason)) => return Ok(FetchOutcome::Invalid(reason)),
                None => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(FetchOutcome::TimedOut);
            }
            let pause = self.config.poll_interval.min(deadline - now);
            tokio::time::sleep(pause).await;
        }
    }

    /// Reads and classifies the stored value. An empty string counts as absent.
    async fn read_record(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<Result<ResultRecord, String>>, StoreError> {
        let raw = match self.store.get(fingerprint.as_str()).await? {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Ok(None),
        };
        Ok(Some(ResultRecord::from_json(&raw).map_err(|e| e.to_string())))
    }

    /// Enqueues the fingerprint unless another producer holds its claim.
    async fn submit(&self, queue: &str, fingerprint: &Fingerprint) -> Result<(), StoreError> {
        if self.config.claim_enabled {
            let claim_key = format!("{}{}", CLAIM_PREFIX, fingerprint);
            let claimed = self
                .store
                .try_claim(&claim_key, self.config.feeding_timeout)
                .await?;
            if !claimed {
                self.stats.joined.fetch_add(1, Ordering::SeqCst);
                debug!(fingerprint = %fingerprint, "Joining in-flight computation");
                return Ok(());
            }
        }

        self.store.enqueue(queue, fingerprint.as_str()).await?;
        self.stats.enqueued.fetch_add(1, Ordering::SeqCst);
        debug!(fingerprint = %fingerprint, queue = %queue, "Enqueued work item");
        Ok(())
    }

    fn finish(&self, fingerprint: &Fingerprint, outcome: &FetchOutcome, started: Instant) {
        self.stats.record_outcome(outcome);
        let waited = started.elapsed();
        self.metrics
            .record_fetch(fingerprint.kind_prefix(), outcome.label(), waited.as_secs_f64());

        match outcome {
            FetchOutcome::Cached(_) => {
                debug!(fingerprint = %fingerprint, "Cache hit");
            }
            FetchOutcome::Computed(_) => {
                info!(
                    fingerprint = %fingerprint,
                    waited_ms = waited.as_millis() as u64,
                    "Result computed"
                );
            }
            FetchOutcome::CachedError(reason) | FetchOutcome::WorkerError(reason) => {
                warn!(fingerprint = %fingerprint, error = %reason, "Worker reported an error");
            }
            FetchOutcome::TimedOut => {
                warn!(
                    fingerprint = %fingerprint,
                    timeout_secs = self.config.feeding_timeout.as_secs(),
                    "Timed out waiting for result, skipping"
                );
            }
            FetchOutcome::Invalid(reason) => {
                warn!(fingerprint = %fingerprint, error = %reason, "Stored value is invalid");
            }
        }
    }
}
