//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by fact_forge and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all fact_forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Coordinator fetches, labeled by task kind and outcome.
pub static FETCHES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Time a coordinator fetch spent waiting for a result, labeled by task kind.
pub static FETCH_WAIT: OnceLock<HistogramVec> = OnceLock::new();

/// Work items handled by workers, labeled by task kind and status.
pub static TASKS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Work item processing duration in seconds, labeled by task kind.
pub static TASK_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Number of entries in queue, labeled by queue name.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Number of work items currently being processed.
pub static JOBS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Total LLM API requests, labeled by model and status.
pub static LLM_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// LLM API request latency in seconds, labeled by model.
pub static LLM_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Total tokens used, labeled by model and type (input/output).
pub static LLM_TOKENS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Search and stock API requests, labeled by service and status.
pub static EXTERNAL_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Datapoints considered by the feeder, labeled by status.
pub static DATAPOINTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Number of active workers.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls are harmless: the first registry wins.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    // Coordinator metrics
    let fetches_total = CounterVec::new(
        Opts::new("fact_forge_fetches_total", "Coordinator fetches by outcome"),
        &["kind", "outcome"],
    )?;

    let fetch_wait = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "fact_forge_fetch_wait_seconds",
            "Time spent waiting for a computed result",
        )
        .buckets(vec![0.0, 1.0, 5.0, 15.0, 60.0, 180.0, 600.0]),
        &["kind"],
    )?;

    // Worker metrics
    let tasks_total = CounterVec::new(
        Opts::new("fact_forge_tasks_total", "Work items handled by workers"),
        &["kind", "status"],
    )?;

    let task_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "fact_forge_task_duration_seconds",
            "Work item processing duration in seconds",
        )
        .buckets(vec![0.1, 1.0, 5.0, 15.0, 60.0, 300.0]),
        &["kind"],
    )?;

    // Queue metrics
    let queue_depth = GaugeVec::new(
        Opts::new("fact_forge_queue_depth", "Number of entries in queue"),
        &["queue_name"],
    )?;

    let jobs_in_progress = Gauge::new(
        "fact_forge_jobs_in_progress",
        "Number of work items currently being processed",
    )?;

    // LLM metrics
    let llm_requests_total = CounterVec::new(
        Opts::new("fact_forge_llm_requests_total", "Total LLM API requests"),
        &["model", "status"],
    )?;

    let llm_latency = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "fact_forge_llm_latency_seconds",
            "LLM API request latency in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 120.0]),
        &["model"],
    )?;

    let llm_tokens_total = CounterVec::new(
        Opts::new("fact_forge_llm_tokens_total", "Total tokens used"),
        &["model", "type"],
    )?;

    // Collaborator metrics
    let external_requests_total = CounterVec::new(
        Opts::new(
            "fact_forge_external_requests_total",
            "Search and stock API requests",
        ),
        &["service", "status"],
    )?;

    // Feeder metrics
    let datapoints_total = CounterVec::new(
        Opts::new("fact_forge_datapoints_total", "Datapoints considered by the feeder"),
        &["status"],
    )?;

    let active_workers = Gauge::new("fact_forge_active_workers", "Number of active workers")?;

    registry.register(Box::new(fetches_total.clone()))?;
    registry.register(Box::new(fetch_wait.clone()))?;
    registry.register(Box::new(tasks_total.clone()))?;
    registry.register(Box::new(task_duration.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(jobs_in_progress.clone()))?;
    registry.register(Box::new(llm_requests_total.clone()))?;
    registry.register(Box::new(llm_latency.clone()))?;
    registry.register(Box::new(llm_tokens_total.clone()))?;
    registry.register(Box::new(external_requests_total.clone()))?;
    registry.register(Box::new(datapoints_total.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = FETCHES_TOTAL.set(fetches_total);
    let _ = FETCH_WAIT.set(fetch_wait);
    let _ = TASKS_TOTAL.set(tasks_total);
    let _ = TASK_DURATION.set(task_duration);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = JOBS_IN_PROGRESS.set(jobs_in_progress);
    let _ = LLM_REQUESTS_TOTAL.set(llm_requests_total);
    let _ = LLM_LATENCY.set(llm_latency);
    let _ = LLM_TOKENS_TOTAL.set(llm_tokens_total);
    let _ = EXTERNAL_REQUESTS_TOTAL.set(external_requests_total);
    let _ = DATAPOINTS_TOTAL.set(datapoints_total);
    let _ = ACTIVE_WORKERS.set(active_workers);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, returns a
/// comment line describing the problem.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
