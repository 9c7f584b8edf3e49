//! Dataset assembly: samples tickers and windows, pulls both halves of each
//! datapoint through the coordinator, and writes the Parquet corpus.

use chrono::{Duration, NaiveDate, Utc};
use futures::future::join_all;
use rand::RngExt;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::parquet_writer;
use crate::config::{FeederConfig, QueueConfig};
use crate::metrics::MetricsCollector;
use crate::scheduler::{FetchOutcome, RequestCoordinator, TaskKey, DATE_FORMAT};

/// One training example.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Example {
    pub ticker: String,
    pub date: NaiveDate,
    /// 1 if the ticker beat the index over the window.
    pub label: i64,
    pub features: BTreeMap<String, f64>,
}

/// Counters for one feed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedStats {
    pub requested: u64,
    pub generated: u64,
    pub cached: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[derive(Default)]
struct SharedFeedStats {
    requested: AtomicU64,
    generated: AtomicU64,
    cached: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

impl SharedFeedStats {
    fn to_stats(&self) -> FeedStats {
        FeedStats {
            requested: self.requested.load(Ordering::SeqCst),
            generated: self.generated.load(Ordering::SeqCst),
            cached: self.cached.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
        }
    }
}

/// Result of a feed run.
#[derive(Debug, Clone, Serialize)]
pub struct FeedSummary {
    pub examples: usize,
    pub metrics: Vec<String>,
    pub stats: FeedStats,
    /// Path of the Parquet corpus, if any example was produced.
    pub corpus_path: Option<PathBuf>,
    pub metadata_path: Option<PathBuf>,
}

/// Reads the tickers file: one symbol per line, blank lines ignored.
pub fn load_tickers(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read tickers file {}: {}", path.display(), e))?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Picks a uniformly random start date such that `start + horizon_days`
/// stays on or before `config.end_date`.
///
/// A horizon that does not fit the calendar collapses to `start_date`.
pub fn sample_start_date(config: &FeederConfig) -> NaiveDate {
    let Some(latest) = config.latest_start() else {
        return config.start_date;
    };
    let span = (latest - config.start_date).num_days().max(0);
    let mut rng = rand::rng();
    let offset = rng.random_range(0..=span);
    config
        .start_date
        .checked_add_signed(Duration::days(offset))
        .unwrap_or(config.start_date)
}

/// Builds an example from the two fetched halves.
///
/// Returns `None` when the search side carries no usable metrics.
pub fn create_example(
    ticker: &str,
    date: NaiveDate,
    search: &Map<String, Value>,
    stock: &Map<String, Value>,
) -> Option<Example> {
    let metrics = search.get("metrics")?.as_object()?;
    if metrics.is_empty() {
        return None;
    }

    let features: BTreeMap<String, f64> = metrics
        .iter()
        .filter_map(|(name, value)| {
            let number = match value {
                Value::Number(n) => n.as_f64()?,
                Value::Bool(b) => {
                    if *b {
                        1.0
                    } else {
                        0.0
                    }
                }
                _ => return None,
            };
            Some((name.clone(), number))
        })
        .collect();

    let label = match stock.get("outperformed").and_then(Value::as_bool) {
        Some(true) => 1,
        Some(false) => 0,
        None => {
            warn!(ticker = %ticker, "Stock result has no 'outperformed' field, labelling 0");
            0
        }
    };

    Some(Example {
        ticker: ticker.to_string(),
        date,
        label,
        features,
    })
}

/// Drives a feed run against a coordinator.
pub struct DatasetAssembler {
    coordinator: Arc<RequestCoordinator>,
    queues: QueueConfig,
    config: FeederConfig,
    stats: SharedFeedStats,
    metrics: MetricsCollector,
}

impl DatasetAssembler {
    pub fn new(
        coordinator: Arc<RequestCoordinator>,
        queues: QueueConfig,
        config: FeederConfig,
    ) -> Self {
        Self {
            coordinator,
            queues,
            config,
            stats: SharedFeedStats::default(),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn stats(&self) -> FeedStats {
        self.stats.to_stats()
    }

    /// Fetches the search and stock records for one datapoint in parallel.
    ///
    /// Either half is `None` when it could not be produced.
    pub async fn fetch_datapoint(
        &self,
        ticker: &str,
        start: NaiveDate,
    ) -> (Option<Map<String, Value>>, Option<Map<String, Value>>) {
        let Some(end) = self.config.window_end(start) else {
            warn!(ticker = %ticker, start = %start, horizon = self.config.horizon_days, "Window end out of range");
            return (None, None);
        };

        let search_key = match TaskKey::search(ticker, start) {
            Ok(key) => key.fingerprint(),
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "Invalid search key");
                return (None, None);
            }
        };
        let stock_key = match TaskKey::stock(ticker, start, end) {
            Ok(key) => key.fingerprint(),
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "Invalid stock key");
                return (None, None);
            }
        };

        let (search, stock) = tokio::join!(
            self.coordinator.fetch(&self.queues.search_queue, &search_key),
            self.coordinator.fetch(&self.queues.stock_queue, &stock_key)
        );

        (self.settle(search), self.settle(stock))
    }

    fn settle(
        &self,
        result: Result<FetchOutcome, crate::scheduler::StoreError>,
    ) -> Option<Map<String, Value>> {
        match result {
            Ok(outcome) => {
                if matches!(outcome, FetchOutcome::Cached(_)) {
                    self.stats.cached.fetch_add(1, Ordering::SeqCst);
                    self.metrics.record_datapoint("cached");
                }
                outcome.into_payload()
            }
            Err(e) => {
                warn!(error = %e, "Store failure while fetching datapoint");
                None
            }
        }
    }

    /// Produces one example for `ticker` at a random window.
    pub async fn generate_datapoint(&self, ticker: &str) -> Option<Example> {
        self.stats.requested.fetch_add(1, Ordering::SeqCst);
        let start = sample_start_date(&self.config);
        debug!(ticker = %ticker, date = %start, "Generating datapoint");

        let (Some(search), Some(stock)) = self.fetch_datapoint(ticker, start).await else {
            warn!(ticker = %ticker, date = %start, "Datapoint incomplete");
            self.stats.failed.fetch_add(1, Ordering::SeqCst);
            self.metrics.record_datapoint("failed");
            return None;
        };

        match create_example(ticker, start, &search, &stock) {
            Some(example) => {
                self.stats.generated.fetch_add(1, Ordering::SeqCst);
                self.metrics.record_datapoint("generated");
                Some(example)
            }
            None => {
                info!(ticker = %ticker, date = %start, "No metrics for datapoint, skipping");
                self.stats.skipped.fetch_add(1, Ordering::SeqCst);
                self.metrics.record_datapoint("skipped");
                None
            }
        }
    }

    /// Generates up to `num_points` examples and writes the corpus.
    pub async fn run(&self, num_points: usize) -> anyhow::Result<FeedSummary> {
        let tickers = load_tickers(&self.config.tickers_path)?;
        let selected: Vec<String> = tickers.into_iter().take(num_points).collect();

        info!(
            requested = num_points,
            tickers = selected.len(),
            "Starting feed run"
        );

        let examples: Vec<Example> = join_all(
            selected
                .iter()
                .map(|ticker| self.generate_datapoint(ticker)),
        )
        .await
        .into_iter()
        .flatten()
        .collect();

        let metric_names: BTreeSet<String> = examples
            .iter()
            .flat_map(|example| example.features.keys().cloned())
            .collect();
        let stats = self.stats();

        if examples.is_empty() {
            warn!(stats = ?stats, "No examples generated, nothing written");
            return Ok(FeedSummary {
                examples: 0,
                metrics: Vec::new(),
                stats,
                corpus_path: None,
                metadata_path: None,
            });
        }

        let stem = format!("analysis_data_{}", Utc::now().format("%Y-%m-%d_%H%M%S"));
        let corpus_path = self.config.output_dir.join(format!("{}.parquet", stem));
        parquet_writer::write_parquet(&examples, &metric_names, &corpus_path)?;

        let metadata_path = self.config.output_dir.join(format!("{}_meta.json", stem));
        let metadata = json!({
            "generated_at": Utc::now().to_rfc3339(),
            "num_points": examples.len(),
            "tickers_used": selected,
            "date_range": {
                "start": self.config.start_date.format(DATE_FORMAT).to_string(),
                "end": self.config.end_date.format(DATE_FORMAT).to_string(),
                "horizon_days": self.config.horizon_days,
            },
            "metrics": metric_names,
            "stats": stats,
        });
        std::fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?)?;

        info!(
            examples = examples.len(),
            metrics = metric_names.len(),
            path = %corpus_path.display(),
            "Feed run complete"
        );

        Ok(FeedSummary {
            examples: examples.len(),
            metrics: metric_names.into_iter().collect(),
            stats,
            corpus_path: Some(corpus_path),
            metadata_path: Some(metadata_path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;
    use crate::scheduler::{MemoryStore, ResultRecord, ResultStore};
    use std::time::Duration as StdDuration;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object")
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).expect("valid date")
    }

    #[test]
    fn test_load_tickers_skips_blank_lines() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("tickers.txt");
        std::fs::write(&path, "AAPL\n\n  MSFT \n\nGOOG\n").expect("write");

        let tickers = load_tickers(&path).expect("load");
        assert_eq!(tickers, vec!["AAPL", "MSFT", "GOOG"]);
    }

    #[test]
    fn test_load_tickers_missing_file() {
        assert!(load_tickers(Path::new("/nonexistent/tickers.txt")).is_err());
    }

    #[test]
    fn test_sample_start_date_within_range() {
        let config = FeederConfig::default();
        let latest = config.latest_start().expect("in range");
        for _ in 0..200 {
            let start = sample_start_date(&config);
            assert!(start >= config.start_date);
            assert!(start <= latest);
        }
    }

    #[test]
    fn test_sample_start_date_single_day_range() {
        let config = FeederConfig {
            start_date: date("2021-01-01"),
            end_date: date("2021-01-31"),
            horizon_days: 30,
            ..FeederConfig::default()
        };
        assert_eq!(sample_start_date(&config), date("2021-01-01"));
    }

    #[test]
    fn test_create_example_converts_features() {
        let search = object(json!({
            "metrics": {"PE_RATIO": 30, "EPS": 4.5, "BUYBACK": true, "DIVIDEND": false, "NOTE": "n/a"}
        }));
        let stock = object(json!({"outperformed": true}));

        let example = create_example("AAPL", date("2021-05-01"), &search, &stock).expect("example");
        assert_eq!(example.label, 1);
        assert_eq!(example.features.len(), 4);
        assert_eq!(example.features["PE_RATIO"], 30.0);
        assert_eq!(example.features["BUYBACK"], 1.0);
        assert_eq!(example.features["DIVIDEND"], 0.0);
        assert!(!example.features.contains_key("NOTE"));
    }

    #[test]
    fn test_create_example_missing_label_defaults_to_zero() {
        let search = object(json!({"metrics": {"EPS": 1.0}}));
        let stock = object(json!({"ticker": "AAPL"}));
        let example = create_example("AAPL", date("2021-05-01"), &search, &stock).expect("example");
        assert_eq!(example.label, 0);
    }

    #[test]
    fn test_create_example_without_metrics() {
        let stock = object(json!({"outperformed": true}));
        assert!(create_example("AAPL", date("2021-05-01"), &object(json!({})), &stock).is_none());
        assert!(
            create_example("AAPL", date("2021-05-01"), &object(json!({"metrics": {}})), &stock)
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_run_writes_corpus_from_cached_records() {
        let dir = tempfile::tempdir().expect("temp dir");
        let tickers_path = dir.path().join("tickers.txt");
        std::fs::write(&tickers_path, "AAPL\n").expect("write");

        // One-day sampling range so the keys are known up front.
        let config = FeederConfig {
            tickers_path,
            output_dir: dir.path().join("out"),
            start_date: date("2021-01-01"),
            end_date: date("2021-01-11"),
            horizon_days: 10,
        };

        let store = Arc::new(MemoryStore::new());
        let search_key = TaskKey::search("AAPL", date("2021-01-01")).expect("key").fingerprint();
        let stock_key = TaskKey::stock("AAPL", date("2021-01-01"), date("2021-01-11"))
            .expect("key")
            .fingerprint();
        store
            .publish(
                search_key.as_str(),
                &ResultRecord::success(object(json!({"metrics": {"EPS": 2.0}}))),
            )
            .await
            .expect("publish");
        store
            .publish(
                stock_key.as_str(),
                &ResultRecord::success(object(json!({"outperformed": false}))),
            )
            .await
            .expect("publish");

        let coordinator = Arc::new(RequestCoordinator::new(
            store.clone(),
            CoordinatorConfig::default().with_feeding_timeout(StdDuration::from_millis(100)),
        ));
        let assembler = DatasetAssembler::new(coordinator, QueueConfig::default(), config);

        let summary = assembler.run(5).await.expect("run");
        assert_eq!(summary.examples, 1);
        assert_eq!(summary.metrics, vec!["EPS".to_string()]);
        assert_eq!(summary.stats.generated, 1);
        assert_eq!(summary.stats.cached, 2);

        let corpus = summary.corpus_path.expect("corpus written");
        let loaded = parquet_writer::read_parquet(&corpus).expect("read");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].label, 0);

        let meta: Value = serde_json::from_str(
            &std::fs::read_to_string(summary.metadata_path.expect("metadata")).expect("read"),
        )
        .expect("json");
        assert_eq!(meta["tickers_used"], json!(["AAPL"]));
        assert_eq!(meta["date_range"]["horizon_days"], 10);
        assert_eq!(meta["stats"]["generated"], 1);
        assert_eq!(store.queue_len("search_queue").await.expect("len"), 0);
    }

    #[tokio::test]
    async fn test_run_counts_failed_datapoints() {
        let dir = tempfile::tempdir().expect("temp dir");
        let tickers_path = dir.path().join("tickers.txt");
        std::fs::write(&tickers_path, "AAPL\nMSFT\n").expect("write");

        let config = FeederConfig {
            tickers_path,
            output_dir: dir.path().join("out"),
            ..FeederConfig::default()
        };
        let store = Arc::new(MemoryStore::new());
        let coordinator = Arc::new(RequestCoordinator::new(
            store,
            CoordinatorConfig::default()
                .with_feeding_timeout(StdDuration::from_millis(50))
                .with_poll_interval(StdDuration::from_millis(10)),
        ));
        let assembler = DatasetAssembler::new(coordinator, QueueConfig::default(), config);

        let summary = assembler.run(2).await.expect("run");
        assert_eq!(summary.examples, 0);
        assert_eq!(summary.stats.requested, 2);
        assert_eq!(summary.stats.failed, 2);
        assert!(summary.corpus_path.is_none());
    }

    #[tokio::test]
    async fn test_out_of_range_horizon_does_not_panic() {
        let config = FeederConfig {
            horizon_days: i64::MAX,
            ..FeederConfig::default()
        };
        assert_eq!(sample_start_date(&config), config.start_date);

        let store = Arc::new(MemoryStore::new());
        let coordinator = Arc::new(RequestCoordinator::new(
            store.clone(),
            CoordinatorConfig::default(),
        ));
        let assembler = DatasetAssembler::new(coordinator, QueueConfig::default(), config);

        let (search, stock) = assembler.fetch_datapoint("AAPL", date("2021-01-04")).await;
        assert!(search.is_none());
        assert!(stock.is_none());
        assert_eq!(store.queue_len("stock_queue").await.expect("len"), 0);
    }
}
