//! Metrics module for Prometheus-based monitoring.
//!
//! Covers coordinator fetch outcomes, worker throughput, queue depth, LLM usage
//! and feeder progress.
//!
//! # Example
//!
//! ```ignore
//! use fact_forge::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! let collector = MetricsCollector::new();
//! collector.record_fetch("search", "cached", 0.0);
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{MetricsCollector, TokenUsage};
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    ACTIVE_WORKERS, DATAPOINTS_TOTAL, EXTERNAL_REQUESTS_TOTAL, FETCHES_TOTAL, FETCH_WAIT,
    JOBS_IN_PROGRESS, LLM_LATENCY, LLM_REQUESTS_TOTAL, LLM_TOKENS_TOTAL, QUEUE_DEPTH, REGISTRY,
    TASKS_TOTAL, TASK_DURATION,
};
