//! Web/news search client.
//!
//! Queries a Brave-style search API and flattens whichever result lists the
//! response carries. Also renders results into the text block sent to the
//! extraction model.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error};

use crate::error::SearchError;
use crate::metrics::MetricsCollector;
use crate::scheduler::DATE_FORMAT;

/// Paths in a search response that may hold a result list.
const RESULT_PATHS: &[&[&str]] = &[
    &["web", "results"],
    &["results"],
    &["mixed", "main"],
    &["videos", "results"],
    &["news", "results"],
];

/// Which search endpoint a goal uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchApi {
    #[default]
    Web,
    News,
}

/// Query parameters for one search call.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub query: String,
    pub count: usize,
    /// `<from>to<until>` date window.
    pub freshness: String,
}

impl SearchParams {
    /// Builds parameters for a query as of `date`, looking back `period_days`.
    pub fn new(query: impl Into<String>, date: NaiveDate, count: usize, period_days: i64) -> Self {
        Self {
            query: query.into(),
            count,
            freshness: date_pack(date, period_days),
        }
    }

    /// Returns the query string pairs in request order.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("q", self.query.clone()),
            ("count", self.count.to_string()),
            ("spellcheck", "false".to_string()),
            ("summary", "true".to_string()),
            ("freshness", self.freshness.clone()),
        ]
    }
}

/// Returns `date - days` in key format.
pub fn date_minus(date: NaiveDate, days: i64) -> String {
    (date - ChronoDuration::days(days))
        .format(DATE_FORMAT)
        .to_string()
}

/// Returns the `<date - days>to<date>` freshness window.
pub fn date_pack(date: NaiveDate, days: i64) -> String {
    format!("{}to{}", date_minus(date, days), date.format(DATE_FORMAT))
}

/// Appends URL-encoded query pairs to `base`.
pub fn build_url(base: &str, pairs: &[(&str, String)]) -> String {
    let query = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}{}", base, separator, query)
}

/// Concatenates every result list found at a known response path.
pub fn collect_results(response: &Value) -> Vec<Value> {
    let mut results = Vec::new();
    for path in RESULT_PATHS {
        let found = path
            .iter()
            .try_fold(response, |current, key| current.get(*key));
        if let Some(Value::Array(items)) = found {
            results.extend(items.iter().cloned());
        }
    }
    results
}

/// Renders search results as one numbered text block.
pub fn package_web_results(results: &[Value]) -> String {
    let mut package = String::new();

    for (num, result) in results.iter().enumerate() {
        package.push_str(&format!("=== RESULT {} ===\n", num + 1));
        package.push_str(&format!("Title: {}\n", text_field(result, "title").unwrap_or("")));

        if let Some(age) = text_field(result, "age").or_else(|| text_field(result, "page_age")) {
            package.push_str(&format!("Date: {}\n", age));
        }

        if let Some(description) = text_field(result, "description") {
            package.push_str(&format!("\nDescription:\n{}\n\n", description));
        }

        if let Some(Value::Array(snippets)) = result.get("extra_snippets") {
            if !snippets.is_empty() {
                package.push_str("Additional Information:\n");
                for snippet in snippets {
                    package.push_str(&format!("- {}\n", value_text(snippet)));
                }
                package.push('\n');
            }
        }

        if let Some(transcript) = result.get("video").and_then(|v| v.get("transcript")) {
            package.push_str(&format!("Video Transcript:\n{}\n\n", value_text(transcript)));
        }

        package.push_str("\n\n");
    }

    package.trim().to_string()
}

fn text_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Anything that can run a search.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Runs a search and returns the flattened result list.
    ///
    /// A non-success HTTP status yields an empty list.
    async fn search(&self, api: SearchApi, params: &SearchParams)
        -> Result<Vec<Value>, SearchError>;
}

/// HTTP search client.
pub struct SearchClient {
    web_url: String,
    news_url: String,
    api_key: String,
    http_client: Client,
}

impl SearchClient {
    /// Creates a client for the given web and news endpoints.
    ///
    /// # Errors
    ///
    /// Returns `SearchError::ClientBuild` if the HTTP client cannot be built.
    pub fn new(
        web_url: impl Into<String>,
        news_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, SearchError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SearchError::ClientBuild(e.to_string()))?;

        Ok(Self {
            web_url: web_url.into(),
            news_url: news_url.into(),
            api_key: api_key.into(),
            http_client,
        })
    }

    fn endpoint(&self, api: SearchApi) -> &str {
        match api {
            SearchApi::Web => &self.web_url,
            SearchApi::News => &self.news_url,
        }
    }
}

#[async_trait]
impl SearchProvider for SearchClient {
    async fn search(
        &self,
        api: SearchApi,
        params: &SearchParams,
    ) -> Result<Vec<Value>, SearchError> {
        let url = build_url(self.endpoint(api), &params.to_pairs());
        let metrics = MetricsCollector::new();

        let response = self
            .http_client
            .get(&url)
            .header("Accept", "application/json")
            .header("x-subscription-token", &self.api_key)
            .send()
            .await
            .map_err(|e| {
                metrics.record_external_request("search", false);
                SearchError::RequestFailed(e.to_string())
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %body, "Search API failed");
            metrics.record_external_request("search", false);
            return Ok(Vec::new());
        }

        let body: Value = response.json().await.map_err(|e| {
            metrics.record_external_request("search", false);
            SearchError::ParseError(e.to_string())
        })?;
        metrics.record_external_request("search", true);

        let results = collect_results(&body);
        debug!(query = %params.query, results = results.len(), "Search finished");
        Ok(results)
    }
}
