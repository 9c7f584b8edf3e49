//! Extraction goals and the search/extract reader.
//!
//! A goal names one metric to extract for a ticker at a date. Goals are loaded
//! once from a JSON templates file shaped like:
//!
//! ```json
//! {
//!   "PE_RATIO": {
//!     "type": "single",
//!     "api": "web",
//!     "search": "{{TICKER}} P/E ratio {{TIME}}",
//!     "prompt": "Return {\"PE_RATIO\": <number>} for {{TICKER}} as of {{TIME}}."
//!   },
//!   "NEWS_SENTIMENT": { "type": "aggregate", "api": "news", "search": "...", "prompt": "..." }
//! }
//! ```

pub mod aggregator;
pub mod payloads;
pub mod reader;

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::GoalError;
use crate::search::SearchApi;

pub use aggregator::{extraction_text, parse_numeric_answer, AggregateAccumulator};
pub use payloads::{fill_template, make_llm_request};
pub use reader::ReaderProcessor;

/// How a goal is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalKind {
    /// One search, one extraction call over all results.
    Single,
    /// One extraction per result, averaged.
    Aggregate,
}

/// A named extraction target.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Goal {
    #[serde(skip)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: GoalKind,
    #[serde(default)]
    pub api: SearchApi,
    /// Search query template.
    pub search: String,
    /// Extraction prompt template.
    pub prompt: String,
}

/// All configured goals, ordered by name.
#[derive(Debug, Clone, Default)]
pub struct GoalSet {
    goals: BTreeMap<String, Goal>,
}

impl GoalSet {
    /// Loads goals from a templates file.
    pub fn load(path: &Path) -> Result<Self, GoalError> {
        let raw = std::fs::read_to_string(path).map_err(|source| GoalError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Parses goals from templates JSON.
    pub fn from_json(raw: &str) -> Result<Self, GoalError> {
        let mut goals: BTreeMap<String, Goal> = serde_json::from_str(raw)?;
        if goals.is_empty() {
            return Err(GoalError::Empty);
        }
        for (name, goal) in goals.iter_mut() {
            goal.name = name.clone();
        }
        Ok(Self { goals })
    }

    pub fn get(&self, name: &str) -> Result<&Goal, GoalError> {
        self.goals
            .get(name)
            .ok_or_else(|| GoalError::NotFound(name.to_string()))
    }

    /// Goals in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Goal> {
        self.goals.values()
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.goals.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.goals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }
}

/// Whether an extracted value actually fills its goal.
pub fn is_filled(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !(s.is_empty() || s == "null"),
        _ => true,
    }
}

/// Removes goals that `extracted` has filled from `remaining`.
pub fn discard_goals(remaining: &mut BTreeSet<String>, extracted: &Map<String, Value>) {
    remaining.retain(|goal| !extracted.get(goal).is_some_and(is_filled));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const TEMPLATES: &str = r#"{
        "PE_RATIO": {"type": "single", "search": "{{TICKER}} pe", "prompt": "pe of {{TICKER}}"},
        "NEWS_SENTIMENT": {"type": "aggregate", "api": "news", "search": "{{TICKER}} news", "prompt": "sentiment"}
    }"#;

    #[test]
    fn test_from_json_sorted_and_named() {
        let goals = GoalSet::from_json(TEMPLATES).expect("valid templates");
        let names: Vec<_> = goals.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["NEWS_SENTIMENT", "PE_RATIO"]);

        let pe = goals.get("PE_RATIO").expect("goal present");
        assert_eq!(pe.kind, GoalKind::Single);
        assert_eq!(pe.api, SearchApi::Web);

        let news = goals.get("NEWS_SENTIMENT").expect("goal present");
        assert_eq!(news.kind, GoalKind::Aggregate);
        assert_eq!(news.api, SearchApi::News);
    }

    #[test]
    fn test_from_json_errors() {
        assert!(matches!(GoalSet::from_json("{}"), Err(GoalError::Empty)));
        assert!(matches!(GoalSet::from_json("[1]"), Err(GoalError::Parse(_))));
        assert!(matches!(
            GoalSet::from_json(r#"{"X": {"type": "weird", "search": "", "prompt": ""}}"#),
            Err(GoalError::Parse(_))
        ));

        let goals = GoalSet::from_json(TEMPLATES).expect("valid templates");
        assert!(matches!(goals.get("EPS"), Err(GoalError::NotFound(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(TEMPLATES.as_bytes()).expect("write");

        let goals = GoalSet::load(file.path()).expect("loads");
        assert_eq!(goals.len(), 2);

        let missing = GoalSet::load(Path::new("/nonexistent/templates.json"));
        assert!(matches!(missing, Err(GoalError::Read { .. })));
    }

    #[test]
    fn test_discard_goals() {
        let mut remaining: BTreeSet<String> = ["EPS", "PE_RATIO", "REVENUE", "DEBT"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let extracted = json!({
            "EPS": 4.1,
            "PE_RATIO": "null",
            "REVENUE": "",
            "DEBT": null,
            "UNRELATED": 1
        });
        let extracted = extracted.as_object().expect("object");

        discard_goals(&mut remaining, extracted);

        let left: Vec<_> = remaining.into_iter().collect();
        assert_eq!(left, vec!["DEBT", "PE_RATIO", "REVENUE"]);
    }

    #[test]
    fn test_is_filled() {
        assert!(is_filled(&json!(0)));
        assert!(is_filled(&json!(false)));
        assert!(is_filled(&json!("12.5")));
        assert!(!is_filled(&json!(null)));
        assert!(!is_filled(&json!("null")));
    }
}
