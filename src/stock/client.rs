//! Daily price series client.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::{DailySeries, TIME_SERIES_FIELD};
use crate::error::StockError;
use crate::metrics::MetricsCollector;
use crate::search::build_url;

/// Anything that can produce a daily price series for a symbol.
#[async_trait]
pub trait StockDataProvider: Send + Sync {
    async fn daily_series(&self, symbol: &str) -> Result<DailySeries, StockError>;
}

/// Client for the AlphaVantage `TIME_SERIES_DAILY` endpoint.
pub struct AlphaVantageClient {
    api_url: String,
    api_key: String,
    http_client: Client,
}

impl AlphaVantageClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns `StockError::ClientBuild` if the HTTP client cannot be built.
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StockError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StockError::ClientBuild(e.to_string()))?;

        Ok(Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            http_client,
        })
    }

    fn request_url(&self, symbol: &str) -> String {
        build_url(
            &self.api_url,
            &[
                ("function", "TIME_SERIES_DAILY".to_string()),
                ("symbol", symbol.to_string()),
                ("apikey", self.api_key.clone()),
                ("outputsize", "full".to_string()),
            ],
        )
    }
}

#[async_trait]
impl StockDataProvider for AlphaVantageClient {
    async fn daily_series(&self, symbol: &str) -> Result<DailySeries, StockError> {
        let result = fetch(&self.http_client, &self.request_url(symbol)).await;
        MetricsCollector::new().record_external_request("stock", result.is_ok());
        result
    }
}

async fn fetch(client: &Client, url: &str) -> Result<DailySeries, StockError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| StockError::RequestFailed(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(StockError::ApiError(status.as_u16()));
    }

    let mut body: Value = response
        .json()
        .await
        .map_err(|e| StockError::ParseError(e.to_string()))?;

    // Throttling and bad symbols come back as 200 with a message instead of data.
    let Some(series) = body.get_mut(TIME_SERIES_FIELD).map(Value::take) else {
        let message = ["Error Message", "Note", "Information"]
            .iter()
            .find_map(|k| body.get(*k).and_then(Value::as_str))
            .unwrap_or("response has no daily series");
        return Err(StockError::ParseError(message.to_string()));
    };

    serde_json::from_value(series).map_err(|e| StockError::ParseError(e.to_string()))
}
