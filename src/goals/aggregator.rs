//! Averaging of per-article answers for aggregate goals.

use serde_json::{Map, Value};

/// Running sum and count of valid numeric answers.
#[derive(Debug, Clone, Default)]
pub struct AggregateAccumulator {
    sum: f64,
    count: usize,
    skipped: usize,
}

impl AggregateAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one answer. `None` is counted as skipped.
    pub fn push(&mut self, answer: Option<f64>) {
        match answer {
            Some(value) => {
                self.sum += value;
                self.count += 1;
            }
            None => self.skipped += 1,
        }
    }

    /// Number of valid answers so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Number of answers rejected so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Mean of the valid answers, or `None` if there were none.
    pub fn finish(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        let mean = self.sum / self.count as f64;
        mean.is_finite().then_some(mean)
    }
}

/// Reads `answer[goal]` as a finite number.
///
/// Accepts JSON numbers and numeric strings.
pub fn parse_numeric_answer(answer: &Map<String, Value>, goal: &str) -> Option<f64> {
    let value = match answer.get(goal)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

/// Text to extract from for one search result, or `None` if it has nothing
/// to read.
pub fn extraction_text(result: &Value) -> Option<String> {
    let description = result
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or("");

    let snippets: Vec<&str> = result
        .get("extra_snippets")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    if description.is_empty() && snippets.is_empty() {
        return None;
    }

    Some(format!("{}\n\n{}", description, snippets.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn answer(value: Value) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("NEWS_SENTIMENT".to_string(), value);
        map
    }

    #[test]
    fn test_mean_of_valid_answers() {
        let mut acc = AggregateAccumulator::new();
        for value in [Some(0.8), None, Some(0.4), None, None] {
            acc.push(value);
        }

        assert_eq!(acc.count(), 2);
        assert_eq!(acc.skipped(), 3);
        let mean = acc.finish().expect("two valid answers");
        assert!((mean - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_no_valid_answers_is_none() {
        let mut acc = AggregateAccumulator::new();
        assert_eq!(acc.finish(), None);

        acc.push(None);
        acc.push(None);
        assert_eq!(acc.finish(), None);
    }

    #[test]
    fn test_parse_numeric_answer() {
        let goal = "NEWS_SENTIMENT";
        assert_eq!(parse_numeric_answer(&answer(json!(0.5)), goal), Some(0.5));
        assert_eq!(parse_numeric_answer(&answer(json!(" -1.25 ")), goal), Some(-1.25));
        assert_eq!(parse_numeric_answer(&answer(json!("positive")), goal), None);
        assert_eq!(parse_numeric_answer(&answer(json!("NaN")), goal), None);
        assert_eq!(parse_numeric_answer(&answer(json!(null)), goal), None);
        assert_eq!(parse_numeric_answer(&answer(json!([1])), goal), None);
        assert_eq!(parse_numeric_answer(&Map::new(), goal), None);
    }

    #[test]
    fn test_extraction_text() {
        let result = json!({"description": "Up 5%", "extra_snippets": ["a", "b"]});
        assert_eq!(extraction_text(&result).as_deref(), Some("Up 5%\n\na\nb"));

        let snippets_only = json!({"extra_snippets": ["only"]});
        assert_eq!(extraction_text(&snippets_only).as_deref(), Some("\n\nonly"));

        assert_eq!(extraction_text(&json!({"title": "no body"})), None);
        assert_eq!(extraction_text(&json!({"description": "", "extra_snippets": []})), None);
    }
}
