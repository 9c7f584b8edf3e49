//! fact-forge: distributed fact extraction for financial training data.
//!
//! Producers ask for facts about a ticker on a date; workers compute them
//! from web search, an extraction model and daily price series. Redis is both
//! the work queue and the memo cache, so every fact is computed once and
//! shared by every producer that asks for it.

pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod goals;
pub mod llm;
pub mod metrics;
pub mod scheduler;
pub mod search;
pub mod stock;

pub use config::{ConfigError, ForgeConfig};
pub use error::{GoalError, LlmError, SearchError, StockError};
