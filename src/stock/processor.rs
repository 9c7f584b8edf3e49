//! Stock-performance task processor.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::client::StockDataProvider;
use super::performance::calculate_performance;
use super::DailySeries;
use crate::config::StockerConfig;
use crate::scheduler::{
    RateLimiter, ResultRecord, ResultStore, TaskKey, TaskKind, TaskProcessor, WorkerError,
    DATE_FORMAT,
};

const SERIES_CACHE_PREFIX: &str = "stock_data:";

/// Compares a ticker's price change with the index over a date range.
pub struct StockProcessor {
    store: Arc<dyn ResultStore>,
    client: Arc<dyn StockDataProvider>,
    limiter: RateLimiter,
    config: StockerConfig,
}

impl StockProcessor {
    pub fn new(
        store: Arc<dyn ResultStore>,
        client: Arc<dyn StockDataProvider>,
        config: StockerConfig,
    ) -> Self {
        Self {
            store,
            client,
            limiter: RateLimiter::new(config.rate_limit_period),
            config,
        }
    }

    /// Returns the daily series for `symbol`, from the store cache when
    /// possible.
    ///
    /// `Ok(None)` means the API had no usable data.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::Store` if the cache cannot be read.
    pub async fn fetch_series(&self, symbol: &str) -> Result<Option<DailySeries>, WorkerError> {
        let cache_key = format!("{}{}", SERIES_CACHE_PREFIX, symbol);

        if let Some(raw) = self.store.get(&cache_key).await? {
            match serde_json::from_str::<DailySeries>(&raw) {
                Ok(series) if !series.is_empty() => {
                    debug!(symbol = %symbol, days = series.len(), "Series cache hit");
                    return Ok(Some(series));
                }
                _ => warn!(symbol = %symbol, "Cached series unusable, refetching"),
            }
        }

        let Some(series) = self.download_series(symbol).await else {
            return Ok(None);
        };

        match serde_json::to_string(&series) {
            Ok(encoded) => {
                if let Err(e) = self.store.set(&cache_key, &encoded).await {
                    warn!(symbol = %symbol, error = %e, "Failed to cache series");
                }
            }
            Err(e) => warn!(symbol = %symbol, error = %e, "Failed to encode series"),
        }

        Ok(Some(series))
    }

    /// Fetches a series from the API, retrying transient failures up to
    /// `config.retries` times. Every attempt goes through the rate limiter.
    async fn download_series(&self, symbol: &str) -> Option<DailySeries> {
        let attempts = self.config.retries.max(1);

        for attempt in 1..=attempts {
            self.limiter.acquire().await;
            match self.client.daily_series(symbol).await {
                Ok(series) if !series.is_empty() => return Some(series),
                Ok(_) => {
                    warn!(symbol = %symbol, "Stock API returned an empty series");
                    return None;
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(symbol = %symbol, attempt, error = %e, "Stock fetch failed, retrying");
                }
                Err(e) => {
                    warn!(symbol = %symbol, attempt, error = %e, "Failed to fetch stock data");
                    return None;
                }
            }
        }
        None
    }

    /// Builds the result record for one ticker and range.
    pub async fn compare(
        &self,
        ticker: &str,
        first_day: NaiveDate,
        last_day: NaiveDate,
    ) -> Result<ResultRecord, WorkerError> {
        let (stock, index) = tokio::try_join!(
            self.fetch_series(ticker),
            self.fetch_series(&self.config.index_symbol)
        )?;

        let (Some(stock), Some(index)) = (stock, index) else {
            let mut details = Map::new();
            details.insert("ticker".to_string(), Value::String(ticker.to_string()));
            return Ok(ResultRecord::failure_with("Data unavailable", details));
        };

        let ticker_performance = calculate_performance(&stock, first_day, last_day);
        let index_performance = calculate_performance(&index, first_day, last_day);

        let payload = json!({
            "ticker": ticker,
            "first_day": first_day.format(DATE_FORMAT).to_string(),
            "last_day": last_day.format(DATE_FORMAT).to_string(),
            "outperformed": ticker_performance > index_performance,
            "ticker_performance": ticker_performance,
            "index_performance": index_performance,
        });
        ResultRecord::from_value(payload).map_err(|e| WorkerError::TaskFailed(e.to_string()))
    }
}

#[async_trait]
impl TaskProcessor for StockProcessor {
    fn kind(&self) -> TaskKind {
        TaskKind::Stock
    }

    async fn process_task(&self, key: &TaskKey) -> Result<ResultRecord, WorkerError> {
        let TaskKey::Stock {
            ticker,
            first_day,
            last_day,
        } = key
        else {
            return Err(WorkerError::UnsupportedKind {
                expected: TaskKind::Stock,
                found: key.kind(),
            });
        };

        info!(ticker = %ticker, first_day = %first_day, last_day = %last_day, "Comparing performance");
        self.compare(ticker, *first_day, *last_day).await
    }
}
