//! Template filling and extraction request building.

use chrono::NaiveDate;

use crate::config::ReaderConfig;
use crate::llm::{GenerationRequest, Message, ResponseFormat};
use crate::scheduler::DATE_FORMAT;
use crate::search::date_minus;

const SYSTEM_PROMPT: &str =
    "You are a financial analyst. Answer with a single valid JSON object and nothing else.";

/// Fills `{{TICKER}}`, `{{TIME}}` and `{{DATE_MINUS}}` in a goal template.
pub fn fill_template(template: &str, ticker: &str, date: NaiveDate, period_days: i64) -> String {
    template
        .replace("{{TICKER}}", ticker)
        .replace("{{TIME}}", &date.format(DATE_FORMAT).to_string())
        .replace("{{DATE_MINUS}}", &date_minus(date, period_days))
}

/// Builds the extraction request for a filled prompt and its source text.
pub fn make_llm_request(config: &ReaderConfig, prompt: &str, content: &str) -> GenerationRequest {
    GenerationRequest::new(
        config.model_name.clone(),
        vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(format!("{}\nSource text:\n```{}```", prompt, content)),
        ],
    )
    .with_temperature(config.temperature)
    .with_max_tokens(config.max_tokens)
    .with_response_format(ResponseFormat::json_object())
}
