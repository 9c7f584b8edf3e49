//! Task keys and result records.
//!
//! This module defines the two values that travel through the store:
//!
//! - `TaskKey`: the typed parameters of one computation. Its string form is
//!   the fingerprint, used both as the queue payload and as the result key.
//! - `ResultRecord`: the JSON value a worker publishes under a fingerprint.
//!
//! # Fingerprint format
//!
//! ```text
//! search:<TICKER>,<YYYY-MM-DD>
//! stock:<TICKER>,<FIRST YYYY-MM-DD>,<LAST YYYY-MM-DD>
//! ```
//!
//! Tickers may not contain `,`, `:` or whitespace, and dates are rendered in
//! canonical form, so formatting is injective and `parse` is its exact
//! inverse.

use std::fmt;

use chrono::NaiveDate;
use serde_json::{Map, Value};
use thiserror::Error;

/// Date format used in task keys.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Errors produced when a queue entry does not parse into a task key.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum KeyError {
    #[error("Key '{0}' has no '<kind>:' prefix")]
    MissingPrefix(String),

    #[error("Unknown task kind '{0}'")]
    UnknownKind(String),

    #[error("Task kind '{kind}' expects {expected} parameters, found {found}")]
    WrongArity {
        kind: String,
        expected: usize,
        found: usize,
    },

    #[error("Invalid ticker '{0}'")]
    InvalidTicker(String),

    #[error("Invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Key '{0}' is not in canonical form")]
    NonCanonical(String),
}

/// The kind of computation a task key names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Search-derived metrics for one ticker at one date.
    Search,
    /// Ticker-vs-index performance over a date range.
    Stock,
}

impl TaskKind {
    /// Returns the fingerprint prefix for this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            TaskKind::Search => "search",
            TaskKind::Stock => "stock",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

/// Typed parameters of one computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskKey {
    /// Search metrics for `ticker` as of `date`.
    Search { ticker: String, date: NaiveDate },
    /// Performance of `ticker` against the index between two days.
    Stock {
        ticker: String,
        first_day: NaiveDate,
        last_day: NaiveDate,
    },
}

impl TaskKey {
    /// Creates a search task key.
    pub fn search(ticker: impl Into<String>, date: NaiveDate) -> Result<Self, KeyError> {
        let ticker = validate_ticker(ticker.into())?;
        Ok(TaskKey::Search { ticker, date })
    }

    /// Creates a stock task key.
    pub fn stock(
        ticker: impl Into<String>,
        first_day: NaiveDate,
        last_day: NaiveDate,
    ) -> Result<Self, KeyError> {
        let ticker = validate_ticker(ticker.into())?;
        Ok(TaskKey::Stock {
            ticker,
            first_day,
            last_day,
        })
    }

    /// Parses a fingerprint back into its typed parameters.
    ///
    /// Anything that would not format back to the same string is rejected,
    /// so two distinct accepted keys can never name the same computation.
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        let (prefix, params) = raw
            .split_once(':')
            .ok_or_else(|| KeyError::MissingPrefix(raw.to_string()))?;

        let parts: Vec<&str> = params.split(',').collect();

        let key = match prefix {
            "search" => {
                expect_arity("search", &parts, 2)?;
                TaskKey::search(parts[0], parse_date(parts[1])?)?
            }
            "stock" => {
                expect_arity("stock", &parts, 3)?;
                TaskKey::stock(parts[0], parse_date(parts[1])?, parse_date(parts[2])?)?
            }
            other => return Err(KeyError::UnknownKind(other.to_string())),
        };

        if key.fingerprint().as_str() != raw {
            return Err(KeyError::NonCanonical(raw.to_string()));
        }

        Ok(key)
    }

    /// Returns the kind of this task.
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskKey::Search { .. } => TaskKind::Search,
            TaskKey::Stock { .. } => TaskKind::Stock,
        }
    }

    /// Returns the ticker this task is about.
    pub fn ticker(&self) -> &str {
        match self {
            TaskKey::Search { ticker, .. } | TaskKey::Stock { ticker, .. } => ticker,
        }
    }

    /// Returns the deterministic fingerprint of this task.
    pub fn fingerprint(&self) -> Fingerprint {
        let params = match self {
            TaskKey::Search { ticker, date } => {
                format!("{},{}", ticker, date.format(DATE_FORMAT))
            }
            TaskKey::Stock {
                ticker,
                first_day,
                last_day,
            } => format!(
                "{},{},{}",
                ticker,
                first_day.format(DATE_FORMAT),
                last_day.format(DATE_FORMAT)
            ),
        };
        Fingerprint(format!("{}:{}", self.kind().prefix(), params))
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint())
    }
}

/// Deterministic string key identifying one computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Returns the key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the kind prefix (the text before the first `:`).
    pub fn kind_prefix(&self) -> &str {
        self.0.split_once(':').map_or("", |(kind, _)| kind)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&TaskKey> for Fingerprint {
    fn from(key: &TaskKey) -> Self {
        key.fingerprint()
    }
}

fn validate_ticker(ticker: String) -> Result<String, KeyError> {
    let invalid = ticker.is_empty()
        || ticker
            .chars()
            .any(|c| c == ',' || c == ':' || c.is_whitespace() || c.is_control());
    if invalid {
        return Err(KeyError::InvalidTicker(ticker));
    }
    Ok(ticker)
}

fn parse_date(raw: &str) -> Result<NaiveDate, KeyError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| KeyError::InvalidDate(raw.to_string()))
}

fn expect_arity(kind: &str, parts: &[&str], expected: usize) -> Result<(), KeyError> {
    if parts.len() != expected {
        return Err(KeyError::WrongArity {
            kind: kind.to_string(),
            expected,
            found: parts.len(),
        });
    }
    Ok(())
}

/// Errors produced when a stored value is not a valid record.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Stored value is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Stored value is not a JSON object")]
    NotAnObject,
}

/// Immutable JSON value published under a fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultRecord {
    /// Computed fields.
    Success(Map<String, Value>),
    /// Worker-reported failure. `details` holds any fields published next to
    /// the `error` marker.
    Failure {
        reason: String,
        details: Map<String, Value>,
    },
}

impl ResultRecord {
    /// Creates a success record.
    pub fn success(payload: Map<String, Value>) -> Self {
        ResultRecord::Success(payload)
    }

    /// Creates a failure record with no extra fields.
    pub fn failure(reason: impl Into<String>) -> Self {
        ResultRecord::Failure {
            reason: reason.into(),
            details: Map::new(),
        }
    }

    /// Creates a failure record that keeps some context fields.
    pub fn failure_with(reason: impl Into<String>, details: Map<String, Value>) -> Self {
        ResultRecord::Failure {
            reason: reason.into(),
            details,
        }
    }

    /// Parses a stored value. Any object with an `error` key is a failure.
    pub fn from_json(raw: &str) -> Result<Self, RecordError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(value)
    }

    /// Classifies an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, RecordError> {
        let Value::Object(mut map) = value else {
            return Err(RecordError::NotAnObject);
        };

        match map.remove("error") {
            Some(error) => {
                let reason = match error {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                Ok(ResultRecord::Failure {
                    reason,
                    details: map,
                })
            }
            None => Ok(ResultRecord::Success(map)),
        }
    }

    /// Returns the JSON object this record is stored as.
    pub fn to_value(&self) -> Value {
        match self {
            ResultRecord::Success(map) => Value::Object(map.clone()),
            ResultRecord::Failure { reason, details } => {
                let mut map = details.clone();
                map.insert("error".to_string(), Value::String(reason.clone()));
                Value::Object(map)
            }
        }
    }

    /// Returns the JSON text this record is stored as.
    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }

    /// Returns whether this record is an error marker.
    pub fn is_failure(&self) -> bool {
        matches!(self, ResultRecord::Failure { .. })
    }

    /// Returns the success payload, or `None` for a failure.
    pub fn into_payload(self) -> Option<Map<String, Value>> {
        match self {
            ResultRecord::Success(map) => Some(map),
            ResultRecord::Failure { .. } => None,
        }
    }
}
