//! Configuration for every fact-forge role.
//!
//! Components never read the process environment themselves. Each one takes
//! its section of [`ForgeConfig`] at construction, which keeps them buildable
//! in tests. [`ForgeConfig::from_env`] is the single place that maps
//! environment variables onto these sections.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Key-value store connection settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Redis connection URL.
    pub redis_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
        }
    }
}

/// Names of the task queues shared by producers and workers.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue consumed by the search/extract worker.
    pub search_queue: String,
    /// Queue consumed by the stock-performance worker.
    pub stock_queue: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            search_queue: "search_queue".to_string(),
            stock_queue: "stock_queue".to_string(),
        }
    }
}

/// Producer-side wait settings.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long a producer waits for a worker to publish a result.
    pub feeding_timeout: Duration,
    /// Interval between result polls while waiting.
    pub poll_interval: Duration,
    /// Whether to take an atomic claim before enqueueing, so concurrent
    /// producers of the same fingerprint enqueue only once.
    pub claim_enabled: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            feeding_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(1),
            claim_enabled: true,
        }
    }
}

impl CoordinatorConfig {
    /// Sets the feeding timeout.
    pub fn with_feeding_timeout(mut self, timeout: Duration) -> Self {
        self.feeding_timeout = timeout;
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Enables or disables the enqueue claim.
    pub fn with_claim(mut self, enabled: bool) -> Self {
        self.claim_enabled = enabled;
        self
    }
}

/// Worker loop settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identifier used in logs.
    pub worker_id: String,
    /// Blocking-pop timeout. Zero blocks until an item arrives or shutdown
    /// is requested; a non-zero timeout that expires stops the loop.
    pub dequeue_timeout: Duration,
    /// Longest single blocking pop. Shutdown is noticed between pops.
    pub dequeue_slice: Duration,
    /// Pause after a failed dequeue before trying again.
    pub error_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: "worker-0".to_string(),
            dequeue_timeout: Duration::ZERO,
            dequeue_slice: Duration::from_secs(1),
            error_backoff: Duration::from_secs(1),
        }
    }
}

impl WorkerConfig {
    /// Sets the worker identifier.
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    /// Sets the dequeue timeout.
    pub fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout;
        self
    }

    /// Sets the longest single blocking pop.
    pub fn with_dequeue_slice(mut self, slice: Duration) -> Self {
        self.dequeue_slice = slice;
        self
    }

    /// Sets the error backoff.
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }
}

/// Search/extract worker settings.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Path to the prompt templates JSON file (the goal definitions).
    pub prompt_templates_path: PathBuf,
    /// Base URL of the chat-completion model server.
    pub model_api_url: String,
    /// Model name sent with every extraction request.
    pub model_name: String,
    /// Web search endpoint.
    pub search_api_url_web: String,
    /// News search endpoint.
    pub search_api_url_news: String,
    /// Subscription token for the search API.
    pub search_api_key: String,
    /// Minimum spacing between outbound search/model calls.
    pub rate_limit_period: Duration,
    /// Days of history a search covers, ending at the task date.
    pub freshness_days: i64,
    /// Attempts per extraction call.
    pub llm_retries: u32,
    /// Attempts per search call on transport failures.
    pub search_retries: u32,
    /// Readiness attempts before the model endpoint is declared down.
    pub llm_ready_attempts: u32,
    /// Timeout of a single readiness request.
    pub llm_ready_timeout: Duration,
    /// Delay between readiness attempts.
    pub llm_ready_delay: Duration,
    /// Search results requested for a `single` goal.
    pub single_result_count: usize,
    /// Search results requested for an `aggregate` goal.
    pub aggregate_result_count: usize,
    /// Sampling temperature for extraction.
    pub temperature: f64,
    /// Token cap for extraction answers.
    pub max_tokens: u32,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            prompt_templates_path: PathBuf::from("./prompt_templates.json"),
            model_api_url: "http://localhost:8080".to_string(),
            model_name: "llama".to_string(),
            search_api_url_web: "https://api.search.brave.com/res/v1/web/search".to_string(),
            search_api_url_news: "https://api.search.brave.com/res/v1/news/search".to_string(),
            search_api_key: String::new(),
            rate_limit_period: Duration::from_secs(1),
            freshness_days: 90,
            llm_retries: 3,
            search_retries: 3,
            llm_ready_attempts: 120,
            llm_ready_timeout: Duration::from_secs(10),
            llm_ready_delay: Duration::from_secs(5),
            single_result_count: 6,
            aggregate_result_count: 20,
            temperature: 0.4,
            max_tokens: 3200,
        }
    }
}

/// Stock-performance worker settings.
#[derive(Debug, Clone)]
pub struct StockerConfig {
    /// Stock data endpoint.
    pub api_url: String,
    /// API key for the stock data endpoint.
    pub api_key: String,
    /// Minimum spacing between outbound stock API calls.
    pub rate_limit_period: Duration,
    /// Benchmark symbol every ticker is compared against.
    pub index_symbol: String,
    /// Timeout for one stock API request.
    pub request_timeout: Duration,
    /// Attempts per series fetch on transport failures and 5xx replies.
    pub retries: u32,
}

impl Default for StockerConfig {
    fn default() -> Self {
        Self {
            api_url: "https://www.alphavantage.co/query".to_string(),
            api_key: String::new(),
            rate_limit_period: Duration::from_secs(15),
            index_symbol: "SPY".to_string(),
            request_timeout: Duration::from_secs(10),
            retries: 3,
        }
    }
}

/// Dataset assembly settings.
#[derive(Debug, Clone)]
pub struct FeederConfig {
    /// File with one ticker per line.
    pub tickers_path: PathBuf,
    /// Directory the corpus and its metadata are written to.
    pub output_dir: PathBuf,
    /// Earliest sampled start date.
    pub start_date: NaiveDate,
    /// Latest date any sampled window may reach.
    pub end_date: NaiveDate,
    /// Length of the performance window in days.
    pub horizon_days: i64,
}

impl Default for FeederConfig {
    fn default() -> Self {
        Self {
            tickers_path: PathBuf::from("./tickers.txt"),
            output_dir: PathBuf::from("./data"),
            start_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or(NaiveDate::MIN),
            end_date: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap_or(NaiveDate::MIN),
            horizon_days: 365,
        }
    }
}

impl FeederConfig {
    /// Latest start date whose window still ends by `end_date`.
    ///
    /// `None` when the horizon reaches outside the calendar.
    pub fn latest_start(&self) -> Option<NaiveDate> {
        chrono::Duration::try_days(self.horizon_days)
            .and_then(|horizon| self.end_date.checked_sub_signed(horizon))
    }

    /// Last day of the window opening at `start`.
    pub fn window_end(&self, start: NaiveDate) -> Option<NaiveDate> {
        chrono::Duration::try_days(self.horizon_days)
            .and_then(|horizon| start.checked_add_signed(horizon))
    }
}

/// Complete configuration, one section per component.
#[derive(Debug, Clone, Default)]
pub struct ForgeConfig {
    pub store: StoreConfig,
    pub queues: QueueConfig,
    pub coordinator: CoordinatorConfig,
    pub worker: WorkerConfig,
    pub reader: ReaderConfig,
    pub stocker: StockerConfig,
    pub feeder: FeederConfig,
}

impl ForgeConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `REDIS_URL`: Store connection URL (default: redis://localhost:6379)
    /// - `SEARCH_QUERIES_NAME`: Search task queue (default: search_queue)
    /// - `STOCK_QUERIES_NAME`: Stock task queue (default: stock_queue)
    /// - `FEEDING_TIMEOUT`: Seconds a producer waits for a result (default: 600)
    /// - `POLL_INTERVAL_MS`: Result poll interval in milliseconds (default: 1000)
    /// - `CLAIM_ENABLED`: Claim fingerprints before enqueueing (default: true)
    /// - `WORKER_ID`: Worker name in logs (default: worker-0)
    /// - `DEQUEUE_TIMEOUT`: Blocking-pop timeout in seconds, 0 = forever (default: 0)
    /// - `PROMPT_TEMPLATES_PATH`: Goal definitions file
    /// - `MODEL_API_URL`: Chat-completion server base URL
    /// - `MODEL_NAME`: Model name (default: llama)
    /// - `SEARCH_API_URL_WEB`, `SEARCH_API_URL_NEWS`: Search endpoints
    /// - `SEARCH_API_KEY`: Search subscription token
    /// - `SEARCH_API_PERIOD`: Seconds between reader calls (default: 1.0)
    /// - `SEARCH_FRESHNESS_DAYS`: Search window in days (default: 90)
    /// - `LLM_RETRIES`: Attempts per extraction (default: 3)
    /// - `SEARCH_RETRIES`: Attempts per search on transport errors (default: 3)
    /// - `STOCK_API_URL`: Stock data endpoint
    /// - `STOCK_API_KEY`: Stock data API key
    /// - `STOCK_API_PERIOD`: Seconds between stock calls (default: 15.0)
    /// - `STOCK_INDEX_SYMBOL`: Benchmark symbol (default: SPY)
    /// - `STOCK_RETRIES`: Attempts per series fetch on transient errors (default: 3)
    /// - `TICKERS_PATH`: Ticker list file
    /// - `DATA_DIR`: Corpus output directory
    /// - `FEED_START_DATE`, `FEED_END_DATE`: Sampling range, `YYYY-MM-DD`
    /// - `FEED_HORIZON_DAYS`: Performance window in days (default: 365)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value. Presence of
    /// role-specific values is checked by the `validate_for_*` methods.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("REDIS_URL") {
            config.store.redis_url = val;
        }

        if let Ok(val) = std::env::var("SEARCH_QUERIES_NAME") {
            config.queues.search_queue = val;
        }

        if let Ok(val) = std::env::var("STOCK_QUERIES_NAME") {
            config.queues.stock_queue = val;
        }

        // Coordinator
        if let Ok(val) = std::env::var("FEEDING_TIMEOUT") {
            let secs: u64 = parse_env_value(&val, "FEEDING_TIMEOUT")?;
            config.coordinator.feeding_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("POLL_INTERVAL_MS") {
            let millis: u64 = parse_env_value(&val, "POLL_INTERVAL_MS")?;
            config.coordinator.poll_interval = Duration::from_millis(millis);
        }

        if let Ok(val) = std::env::var("CLAIM_ENABLED") {
            config.coordinator.claim_enabled = parse_env_bool(&val, "CLAIM_ENABLED")?;
        }

        // Worker
        if let Ok(val) = std::env::var("WORKER_ID") {
            config.worker.worker_id = val;
        }

        if let Ok(val) = std::env::var("DEQUEUE_TIMEOUT") {
            let secs: u64 = parse_env_value(&val, "DEQUEUE_TIMEOUT")?;
            config.worker.dequeue_timeout = Duration::from_secs(secs);
        }

        // Reader
        if let Ok(val) = std::env::var("PROMPT_TEMPLATES_PATH") {
            config.reader.prompt_templates_path = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("MODEL_API_URL") {
            config.reader.model_api_url = val;
        }

        if let Ok(val) = std::env::var("MODEL_NAME") {
            config.reader.model_name = val;
        }

        if let Ok(val) = std::env::var("SEARCH_API_URL_WEB") {
            config.reader.search_api_url_web = val;
        }

        if let Ok(val) = std::env::var("SEARCH_API_URL_NEWS") {
            config.reader.search_api_url_news = val;
        }

        if let Ok(val) = std::env::var("SEARCH_API_KEY") {
            config.reader.search_api_key = val;
        }

        if let Ok(val) = std::env::var("SEARCH_API_PERIOD") {
            config.reader.rate_limit_period = parse_env_seconds(&val, "SEARCH_API_PERIOD")?;
        }

        if let Ok(val) = std::env::var("SEARCH_FRESHNESS_DAYS") {
            config.reader.freshness_days = parse_env_value(&val, "SEARCH_FRESHNESS_DAYS")?;
        }

        if let Ok(val) = std::env::var("LLM_RETRIES") {
            config.reader.llm_retries = parse_env_value(&val, "LLM_RETRIES")?;
        }

        if let Ok(val) = std::env::var("SEARCH_RETRIES") {
            config.reader.search_retries = parse_env_value(&val, "SEARCH_RETRIES")?;
        }

        // Stocker
        if let Ok(val) = std::env::var("STOCK_API_URL") {
            config.stocker.api_url = val;
        }

        if let Ok(val) = std::env::var("STOCK_API_KEY") {
            config.stocker.api_key = val;
        }

        if let Ok(val) = std::env::var("STOCK_API_PERIOD") {
            config.stocker.rate_limit_period = parse_env_seconds(&val, "STOCK_API_PERIOD")?;
        }

        if let Ok(val) = std::env::var("STOCK_INDEX_SYMBOL") {
            config.stocker.index_symbol = val;
        }

        if let Ok(val) = std::env::var("STOCK_RETRIES") {
            config.stocker.retries = parse_env_value(&val, "STOCK_RETRIES")?;
        }

        // Feeder
        if let Ok(val) = std::env::var("TICKERS_PATH") {
            config.feeder.tickers_path = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("DATA_DIR") {
            config.feeder.output_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("FEED_START_DATE") {
            config.feeder.start_date = parse_env_date(&val, "FEED_START_DATE")?;
        }

        if let Ok(val) = std::env::var("FEED_END_DATE") {
            config.feeder.end_date = parse_env_date(&val, "FEED_END_DATE")?;
        }

        if let Ok(val) = std::env::var("FEED_HORIZON_DAYS") {
            config.feeder.horizon_days = parse_env_value(&val, "FEED_HORIZON_DAYS")?;
        }

        Ok(config)
    }

    /// Validates settings shared by every role.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.redis_url.trim().is_empty() {
            return Err(ConfigError::MissingEnvVar("REDIS_URL".to_string()));
        }

        if self.queues.search_queue.is_empty() || self.queues.stock_queue.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "queue names must not be empty".to_string(),
            ));
        }

        if self.queues.search_queue == self.queues.stock_queue {
            return Err(ConfigError::ValidationFailed(
                "search and stock queues must differ".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates the settings the dataset feeder needs.
    pub fn validate_for_feeder(&self) -> Result<(), ConfigError> {
        self.validate()?;

        if self.coordinator.feeding_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "FEEDING_TIMEOUT must be greater than zero".to_string(),
            ));
        }

        if self.coordinator.poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "POLL_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }

        if self.feeder.horizon_days <= 0 {
            return Err(ConfigError::ValidationFailed(
                "FEED_HORIZON_DAYS must be positive".to_string(),
            ));
        }

        let Some(latest_start) = self.feeder.latest_start() else {
            return Err(ConfigError::ValidationFailed(format!(
                "FEED_HORIZON_DAYS {} is out of range",
                self.feeder.horizon_days
            )));
        };
        if latest_start < self.feeder.start_date {
            return Err(ConfigError::ValidationFailed(format!(
                "date range {}..{} is shorter than the {}-day horizon",
                self.feeder.start_date, self.feeder.end_date, self.feeder.horizon_days
            )));
        }

        Ok(())
    }

    /// Validates the settings the search/extract worker needs.
    pub fn validate_for_reader(&self) -> Result<(), ConfigError> {
        self.validate()?;

        if self.reader.search_api_key.is_empty() {
            return Err(ConfigError::MissingEnvVar("SEARCH_API_KEY".to_string()));
        }

        if self.reader.model_api_url.is_empty() {
            return Err(ConfigError::MissingEnvVar("MODEL_API_URL".to_string()));
        }

        if self.reader.llm_retries == 0 {
            return Err(ConfigError::ValidationFailed(
                "LLM_RETRIES must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates the settings the stock worker needs.
    pub fn validate_for_stocker(&self) -> Result<(), ConfigError> {
        self.validate()?;

        if self.stocker.api_key.is_empty() {
            return Err(ConfigError::MissingEnvVar("STOCK_API_KEY".to_string()));
        }

        if self.stocker.index_symbol.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "STOCK_INDEX_SYMBOL must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parses an environment variable value into the specified type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}

/// Parses a boolean environment variable value.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean, got '{}'", value),
        }),
    }
}

/// Parses fractional seconds (e.g. `"15.0"`) into a duration.
fn parse_env_seconds(value: &str, key: &str) -> Result<Duration, ConfigError> {
    let secs: f64 = parse_env_value(value, key)?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected non-negative seconds, got '{}'", value),
        });
    }
    Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{}' is out of range: {}", value, e),
    })
}

/// Parses a `YYYY-MM-DD` date.
fn parse_env_date(value: &str, key: &str) -> Result<NaiveDate, ConfigError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}
