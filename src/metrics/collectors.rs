//! Custom metric collectors for fact_forge operations.
//!
//! The `MetricsCollector` struct wraps the raw Prometheus metrics and provides
//! convenient methods for recording coordinator, worker and feeder activity.
//! Every method is a no-op until `init_metrics()` has run.

use super::prometheus::{
    ACTIVE_WORKERS, DATAPOINTS_TOTAL, EXTERNAL_REQUESTS_TOTAL, FETCHES_TOTAL, FETCH_WAIT,
    JOBS_IN_PROGRESS, LLM_LATENCY, LLM_REQUESTS_TOTAL, LLM_TOKENS_TOTAL, QUEUE_DEPTH,
    TASKS_TOTAL, TASK_DURATION,
};

/// Token usage information for LLM requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    /// Number of input/prompt tokens.
    pub input_tokens: u64,
    /// Number of output/completion tokens.
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Create a new TokenUsage instance.
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Get the total number of tokens (input + output).
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Metrics collector for recording fact_forge operational metrics.
///
/// # Example
///
/// ```ignore
/// use fact_forge::metrics::{MetricsCollector, init_metrics};
///
/// init_metrics().expect("Failed to init metrics");
/// let collector = MetricsCollector::new();
///
/// collector.record_fetch("search", "computed", 12.0);
/// collector.record_task("stock", "success", 0.8);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Create a new MetricsCollector instance.
    pub fn new() -> Self {
        Self
    }

    /// Record the outcome of one coordinator fetch.
    ///
    /// # Arguments
    ///
    /// * `kind` - Task kind ("search" or "stock")
    /// * `outcome` - Fetch outcome (e.g., "cached", "computed", "timed_out")
    /// * `wait_secs` - Time spent between the first read and the outcome
    pub fn record_fetch(&self, kind: &str, outcome: &str, wait_secs: f64) {
        if let Some(fetches) = FETCHES_TOTAL.get() {
            fetches.with_label_values(&[kind, outcome]).inc();
        }

        if let Some(fetch_wait) = FETCH_WAIT.get() {
            fetch_wait.with_label_values(&[kind]).observe(wait_secs);
        }

        tracing::trace!(
            kind = kind,
            outcome = outcome,
            wait_secs = wait_secs,
            "Recorded fetch metric"
        );
    }

    /// Record one work item handled by a worker.
    ///
    /// # Arguments
    ///
    /// * `kind` - Task kind the worker serves
    /// * `status` - "success", "failure", "panicked" or "malformed"
    /// * `duration_secs` - Processing duration in seconds
    pub fn record_task(&self, kind: &str, status: &str, duration_secs: f64) {
        if let Some(tasks_total) = TASKS_TOTAL.get() {
            tasks_total.with_label_values(&[kind, status]).inc();
        }

        if let Some(task_duration) = TASK_DURATION.get() {
            task_duration
                .with_label_values(&[kind])
                .observe(duration_secs);
        }

        tracing::trace!(
            kind = kind,
            status = status,
            duration_secs = duration_secs,
            "Recorded task metric"
        );
    }

    /// Record an LLM API request.
    pub fn record_llm_request(
        &self,
        model: &str,
        success: bool,
        latency_secs: f64,
        tokens: TokenUsage,
    ) {
        let status = if success { "success" } else { "failure" };

        if let Some(llm_requests) = LLM_REQUESTS_TOTAL.get() {
            llm_requests.with_label_values(&[model, status]).inc();
        }

        if let Some(llm_latency) = LLM_LATENCY.get() {
            llm_latency
                .with_label_values(&[model])
                .observe(latency_secs);
        }

        if let Some(llm_tokens) = LLM_TOKENS_TOTAL.get() {
            llm_tokens
                .with_label_values(&[model, "input"])
                .inc_by(tokens.input_tokens as f64);
            llm_tokens
                .with_label_values(&[model, "output"])
                .inc_by(tokens.output_tokens as f64);
        }

        tracing::trace!(
            model = model,
            status = status,
            latency_secs = latency_secs,
            input_tokens = tokens.input_tokens,
            output_tokens = tokens.output_tokens,
            "Recorded LLM request metric"
        );
    }

    /// Record a search or stock API request.
    pub fn record_external_request(&self, service: &str, success: bool) {
        let status = if success { "success" } else { "failure" };

        if let Some(requests) = EXTERNAL_REQUESTS_TOTAL.get() {
            requests.with_label_values(&[service, status]).inc();
        }
    }

    /// Record one datapoint considered by the feeder.
    ///
    /// `status` is one of "generated", "cached", "failed" or "skipped".
    pub fn record_datapoint(&self, status: &str) {
        if let Some(datapoints) = DATAPOINTS_TOTAL.get() {
            datapoints.with_label_values(&[status]).inc();
        }
    }

    /// Update the queue depth for a specific queue.
    pub fn update_queue_depth(&self, queue_name: &str, depth: usize) {
        if let Some(queue_depth) = QUEUE_DEPTH.get() {
            queue_depth
                .with_label_values(&[queue_name])
                .set(depth as f64);
        }

        tracing::trace!(
            queue_name = queue_name,
            depth = depth,
            "Updated queue depth metric"
        );
    }

    /// Increment the count of active workers by 1.
    pub fn inc_workers(&self) {
        if let Some(active_workers) = ACTIVE_WORKERS.get() {
            active_workers.inc();
        }
    }

    /// Decrement the count of active workers by 1.
    pub fn dec_workers(&self) {
        if let Some(active_workers) = ACTIVE_WORKERS.get() {
            active_workers.dec();
        }
    }

    /// Increment the count of work items in progress by 1.
    pub fn inc_jobs_in_progress(&self) {
        if let Some(jobs_in_progress) = JOBS_IN_PROGRESS.get() {
            jobs_in_progress.inc();
        }
    }

    /// Decrement the count of work items in progress by 1.
    pub fn dec_jobs_in_progress(&self) {
        if let Some(jobs_in_progress) = JOBS_IN_PROGRESS.get() {
            jobs_in_progress.dec();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::init_metrics;

    fn ensure_metrics_init() {
        let _ = init_metrics();
    }

    #[test]
    fn test_token_usage() {
        let usage = TokenUsage::new(1000, 500);
        assert_eq!(usage.input_tokens, 1000);
        assert_eq!(usage.output_tokens, 500);
        assert_eq!(usage.total(), 1500);
        assert_eq!(TokenUsage::default().total(), 0);
    }

    #[test]
    fn test_metrics_collector_new() {
        let collector = MetricsCollector::new();
        assert!(std::mem::size_of_val(&collector) == 0);
    }

    #[test]
    fn test_record_fetch_and_task() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.record_fetch("search", "cached", 0.0);
        collector.record_fetch("stock", "timed_out", 600.0);
        collector.record_task("search", "success", 12.5);
        collector.record_task("stock", "malformed", 0.0);
    }

    #[test]
    fn test_record_llm_and_external() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.record_llm_request("llama", true, 2.5, TokenUsage::new(1000, 50));
        collector.record_llm_request("llama", false, 30.0, TokenUsage::default());
        collector.record_external_request("search", true);
        collector.record_external_request("stock", false);
    }

    #[test]
    fn test_gauges() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.update_queue_depth("search_queue", 42);
        collector.inc_workers();
        collector.dec_workers();
        collector.inc_jobs_in_progress();
        collector.dec_jobs_in_progress();
        collector.record_datapoint("generated");
    }
}
