//! Search/extract task processor.
//!
//! For a `search:<TICKER>,<DATE>` key the reader runs every goal in name order
//! and publishes `{"ticker", "date", "metrics": {...}}`. A goal that fails
//! contributes nothing; the others still run.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Map, Number, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::aggregator::{extraction_text, parse_numeric_answer, AggregateAccumulator};
use super::payloads::{fill_template, make_llm_request};
use super::{discard_goals, Goal, GoalKind, GoalSet};
use crate::config::ReaderConfig;
use crate::error::LlmError;
use crate::llm::LlmProvider;
use crate::scheduler::{
    RateLimiter, ResultRecord, TaskKey, TaskKind, TaskProcessor, WorkerError, DATE_FORMAT,
};
use crate::search::{package_web_results, SearchParams, SearchProvider};

/// Computes search-derived metrics for one ticker at one date.
pub struct ReaderProcessor {
    goals: GoalSet,
    search: Arc<dyn SearchProvider>,
    llm: Arc<dyn LlmProvider>,
    limiter: RateLimiter,
    config: ReaderConfig,
}

impl ReaderProcessor {
    pub fn new(
        goals: GoalSet,
        search: Arc<dyn SearchProvider>,
        llm: Arc<dyn LlmProvider>,
        config: ReaderConfig,
    ) -> Self {
        Self {
            goals,
            search,
            llm,
            limiter: RateLimiter::new(config.rate_limit_period),
            config,
        }
    }

    pub fn goals(&self) -> &GoalSet {
        &self.goals
    }

    /// Runs every goal and merges their answers.
    ///
    /// A goal already filled by an earlier goal's answer is skipped.
    pub async fn get_all_metrics(&self, ticker: &str, date: NaiveDate) -> Map<String, Value> {
        let mut remaining = self.goals.names();
        let mut metrics = Map::new();

        for goal in self.goals.iter() {
            if !remaining.contains(&goal.name) {
                debug!(goal = %goal.name, "Goal already filled, skipping");
                continue;
            }

            let result = self.process_goal(goal, ticker, date).await;
            if result.is_empty() {
                warn!(goal = %goal.name, ticker = %ticker, "Empty result for goal");
            }
            discard_goals(&mut remaining, &result);
            metrics.extend(result);
        }

        metrics
    }

    /// Computes one goal. Failures are logged and yield an empty map.
    pub async fn process_goal(&self, goal: &Goal, ticker: &str, date: NaiveDate) -> Map<String, Value> {
        match goal.kind {
            GoalKind::Single => {
                let results = self
                    .search_goal(goal, ticker, date, self.config.single_result_count)
                    .await;
                if results.is_empty() {
                    warn!(goal = %goal.name, ticker = %ticker, "No search results for goal");
                    return Map::new();
                }
                let packaged = package_web_results(&results);
                self.extract_or_empty(goal, ticker, date, &packaged).await
            }
            GoalKind::Aggregate => self.aggregate(goal, ticker, date).await,
        }
    }

    /// Extracts a number from each search result and averages them.
    ///
    /// Returns an empty map when no result gave a valid number.
    pub async fn aggregate(&self, goal: &Goal, ticker: &str, date: NaiveDate) -> Map<String, Value> {
        let results = self
            .search_goal(goal, ticker, date, self.config.aggregate_result_count)
            .await;

        let mut acc = AggregateAccumulator::new();
        for result in &results {
            let Some(text) = extraction_text(result) else {
                continue;
            };
            let answer = self.extract_or_empty(goal, ticker, date, &text).await;
            let value = parse_numeric_answer(&answer, &goal.name);
            if value.is_none() {
                warn!(goal = %goal.name, answer = %serde_json::Value::Object(answer), "Invalid answer from model");
            }
            acc.push(value);
        }

        let mut out = Map::new();
        match acc.finish().and_then(Number::from_f64) {
            Some(mean) => {
                debug!(goal = %goal.name, valid = acc.count(), skipped = acc.skipped(), "Aggregated");
                out.insert(goal.name.clone(), Value::Number(mean));
            }
            None => {
                warn!(
                    goal = %goal.name,
                    ticker = %ticker,
                    results = results.len(),
                    "No valid answers to aggregate"
                );
            }
        }
        out
    }

    /// Calls the model up to `llm_retries` times.
    ///
    /// An answer that is not a JSON object counts as an empty map.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::RetriesExhausted` when every attempt fails.
    pub async fn extract(
        &self,
        goal: &Goal,
        ticker: &str,
        date: NaiveDate,
        content: &str,
    ) -> Result<Map<String, Value>, LlmError> {
        let prompt = fill_template(&goal.prompt, ticker, date, self.config.freshness_days);
        let request = make_llm_request(&self.config, &prompt, content);
        let attempts = self.config.llm_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            self.limiter.acquire().await;
            match self.llm.generate(request.clone()).await {
                Ok(response) => {
                    let raw = response.first_content().unwrap_or("").trim();
                    debug!(goal = %goal.name, raw = %raw, "Model answer");
                    return Ok(match serde_json::from_str::<Value>(raw) {
                        Ok(Value::Object(map)) => map,
                        _ => Map::new(),
                    });
                }
                Err(e) => {
                    warn!(goal = %goal.name, attempt, error = %e, "Extraction attempt failed");
                    last_error = e.to_string();
                }
            }
        }

        Err(LlmError::RetriesExhausted {
            attempts,
            last_error,
        })
    }

    async fn extract_or_empty(
        &self,
        goal: &Goal,
        ticker: &str,
        date: NaiveDate,
        content: &str,
    ) -> Map<String, Value> {
        self.extract(goal, ticker, date, content)
            .await
            .unwrap_or_else(|e| {
                error!(goal = %goal.name, ticker = %ticker, error = %e, "Extraction failed");
                Map::new()
            })
    }

    /// Runs the goal's search, retrying transient failures. At most `count`
    /// results are returned.
    async fn search_goal(
        &self,
        goal: &Goal,
        ticker: &str,
        date: NaiveDate,
        count: usize,
    ) -> Vec<Value> {
        let query = fill_template(&goal.search, ticker, date, self.config.freshness_days);
        let params = SearchParams::new(query, date, count, self.config.freshness_days);

        let attempts = self.config.search_retries.max(1);

        for attempt in 1..=attempts {
            self.limiter.acquire().await;
            match self.search.search(goal.api, &params).await {
                Ok(mut results) => {
                    results.truncate(count);
                    return results;
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(goal = %goal.name, ticker = %ticker, attempt, error = %e, "Search failed, retrying");
                }
                Err(e) => {
                    error!(goal = %goal.name, ticker = %ticker, attempt, error = %e, "Search failed");
                    break;
                }
            }
        }
        Vec::new()
    }
}

#[async_trait]
impl TaskProcessor for ReaderProcessor {
    fn kind(&self) -> TaskKind {
        TaskKind::Search
    }

    async fn process_task(&self, key: &TaskKey) -> Result<ResultRecord, WorkerError> {
        let TaskKey::Search { ticker, date } = key else {
            return Err(WorkerError::UnsupportedKind {
                expected: TaskKind::Search,
                found: key.kind(),
            });
        };

        info!(ticker = %ticker, date = %date, goals = self.goals.len(), "Reading metrics");
        let metrics = self.get_all_metrics(ticker, *date).await;

        let payload = json!({
            "ticker": ticker,
            "date": date.format(DATE_FORMAT).to_string(),
            "metrics": metrics,
        });
        ResultRecord::from_value(payload).map_err(|e| WorkerError::TaskFailed(e.to_string()))
    }
}
