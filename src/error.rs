//! Error types for fact-forge collaborators.
//!
//! Defines the error types for the external services the workers talk to:
//! - LLM extraction calls
//! - Search API calls
//! - Stock data API calls
//! - Goal (prompt template) loading
//!
//! Store, worker and configuration errors live next to their modules
//! (`scheduler::store`, `scheduler::worker`, `config`).

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("All {attempts} extraction attempts failed, last error: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Model endpoint did not become ready after {attempts} attempts")]
    NotReady { attempts: u32 },
}

/// Errors that can occur while querying the search API.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Search request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse search response: {0}")]
    ParseError(String),
}

impl SearchError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SearchError::RequestFailed(_))
    }
}

/// Errors that can occur while fetching stock series.
#[derive(Debug, Error)]
pub enum StockError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Stock request failed: {0}")]
    RequestFailed(String),

    #[error("Stock API returned {0}")]
    ApiError(u16),

    #[error("Failed to parse stock response: {0}")]
    ParseError(String),
}

impl StockError {
    /// Whether another attempt may succeed.
    ///
    /// Throttle notes and bad symbols arrive as parse errors and are final.
    pub fn is_transient(&self) -> bool {
        match self {
            StockError::RequestFailed(_) => true,
            StockError::ApiError(code) => *code >= 500,
            StockError::ClientBuild(_) | StockError::ParseError(_) => false,
        }
    }
}

/// Errors that can occur while loading or using goals.
#[derive(Debug, Error)]
pub enum GoalError {
    #[error("Goal '{0}' not found in prompt templates")]
    NotFound(String),

    #[error("Failed to read prompt templates '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse prompt templates: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Prompt templates define no goals")]
    Empty,
}
