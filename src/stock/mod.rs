//! Stock-performance computation.
//!
//! Answers `stock:<TICKER>,<FIRST>,<LAST>` keys with whether the ticker beat
//! the index (SPY by default) over the range. Daily series come from an
//! AlphaVantage-style API and are cached in the store under
//! `stock_data:<SYMBOL>`.

pub mod client;
pub mod performance;
pub mod processor;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use client::{AlphaVantageClient, StockDataProvider};
pub use performance::{calculate_performance, find_nearest_valid_date, nearest_close};
pub use processor::StockProcessor;

/// Field holding the series in a `TIME_SERIES_DAILY` response.
pub const TIME_SERIES_FIELD: &str = "Time Series (Daily)";

/// One day of OHLC data. Prices arrive as decimal strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    #[serde(rename = "1. open", default, skip_serializing_if = "Option::is_none")]
    pub open: Option<String>,
    #[serde(rename = "2. high", default, skip_serializing_if = "Option::is_none")]
    pub high: Option<String>,
    #[serde(rename = "3. low", default, skip_serializing_if = "Option::is_none")]
    pub low: Option<String>,
    #[serde(rename = "4. close", default, skip_serializing_if = "Option::is_none")]
    pub close: Option<String>,
    #[serde(rename = "5. volume", default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
}

impl DailyBar {
    /// A bar with only a closing price.
    pub fn with_close(close: impl Into<String>) -> Self {
        Self {
            close: Some(close.into()),
            ..Self::default()
        }
    }

    /// Parsed closing price.
    pub fn close_price(&self) -> Option<f64> {
        self.close.as_deref()?.trim().parse().ok()
    }
}

/// Daily bars keyed by `YYYY-MM-DD`.
pub type DailySeries = BTreeMap<String, DailyBar>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daily_bar_parses_api_shape() {
        let raw = r#"{
            "1. open": "130.28",
            "2. high": "130.90",
            "3. low": "124.17",
            "4. close": "125.07",
            "5. volume": "112117471"
        }"#;
        let bar: DailyBar = serde_json::from_str(raw).expect("valid bar");
        assert_eq!(bar.close_price(), Some(125.07));
        assert_eq!(bar.volume.as_deref(), Some("112117471"));
    }

    #[test]
    fn test_daily_bar_missing_close() {
        let bar: DailyBar = serde_json::from_str(r#"{"1. open": "1"}"#).expect("valid bar");
        assert_eq!(bar.close_price(), None);
    }
}
