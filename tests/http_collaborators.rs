//! HTTP clients against local mock servers.

use chrono::NaiveDate;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fact_forge::error::{LlmError, StockError};
use fact_forge::llm::{ChatClient, GenerationRequest, LlmProvider, Message, ResponseFormat};
use fact_forge::search::{SearchApi, SearchClient, SearchParams, SearchProvider};
use fact_forge::stock::{AlphaVantageClient, StockDataProvider};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn search_client(server: &MockServer) -> SearchClient {
    SearchClient::new(
        format!("{}/web", server.uri()),
        format!("{}/news", server.uri()),
        "secret-token",
    )
    .expect("client")
}

#[tokio::test]
async fn test_search_sends_params_and_flattens_every_shape() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/web"))
        .and(header("x-subscription-token", "secret-token"))
        .and(query_param("q", "AAPL earnings"))
        .and(query_param("count", "6"))
        .and(query_param("spellcheck", "false"))
        .and(query_param("summary", "true"))
        .and(query_param("freshness", "2024-03-06to2024-06-04"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "web": {"results": [{"title": "a"}, {"title": "b"}]},
            "mixed": {"main": [{"title": "c"}]},
            "videos": {"results": [{"title": "d"}]},
            "news": {"results": []}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = search_client(&server);
    let params = SearchParams::new("AAPL earnings", date(2024, 6, 4), 6, 90);
    let results = client.search(SearchApi::Web, &params).await.expect("search");

    let titles: Vec<&str> = results
        .iter()
        .filter_map(|r| r["title"].as_str())
        .collect();
    assert_eq!(titles, vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn test_search_news_endpoint_top_level_results() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/news"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"title": "headline", "description": "AAPL beats estimates"}]
        })))
        .mount(&server)
        .await;

    let client = search_client(&server);
    let params = SearchParams::new("AAPL", date(2024, 6, 4), 20, 90);
    let results = client.search(SearchApi::News, &params).await.expect("search");

    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["description"], "AAPL beats estimates");
}

#[tokio::test]
async fn test_search_non_200_is_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/web"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let client = search_client(&server);
    let params = SearchParams::new("AAPL", date(2024, 6, 4), 6, 90);
    let results = client.search(SearchApi::Web, &params).await.expect("no error");

    assert!(results.is_empty());
}

fn completion_body(content: &str) -> serde_json::Value {
    json!({
        "model": "llama",
        "choices": [{
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 120, "completion_tokens": 8}
    })
}

#[tokio::test]
async fn test_chat_client_returns_first_choice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({
            "model": "llama",
            "response_format": {"type": "json_object"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(r#"{"PE_RATIO": 28.4}"#)))
        .expect(1)
        .mount(&server)
        .await;

    let client = ChatClient::new(server.uri(), None).expect("client");
    let request = GenerationRequest::new("llama", vec![Message::user("extract")])
        .with_temperature(0.4)
        .with_response_format(ResponseFormat::json_object());
    let response = client.generate(request).await.expect("generate");

    assert_eq!(response.first_content(), Some(r#"{"PE_RATIO": 28.4}"#));
    assert_eq!(response.usage.prompt_tokens, 120);
    assert_eq!(response.usage.completion_tokens, 8);
}

#[tokio::test]
async fn test_chat_client_maps_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(json!({"error": {"message": "model crashed"}})),
        )
        .mount(&server)
        .await;

    let client = ChatClient::new(server.uri(), None).expect("client");
    let result = client
        .generate(GenerationRequest::new("llama", vec![Message::user("x")]))
        .await;

    match result {
        Err(LlmError::ApiError { code, message }) => {
            assert_eq!(code, 500);
            assert_eq!(message, "model crashed");
        }
        other => panic!("expected API error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_wait_until_ready_retries_while_loading() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
        .mount(&server)
        .await;

    let client = ChatClient::new(server.uri(), None).expect("client");
    client
        .wait_until_ready(
            "llama",
            5,
            Duration::from_secs(2),
            Duration::from_millis(10),
        )
        .await
        .expect("ready on third attempt");
}

#[tokio::test]
async fn test_wait_until_ready_gives_up() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = ChatClient::new(server.uri(), None).expect("client");
    let result = client
        .wait_until_ready(
            "llama",
            3,
            Duration::from_secs(2),
            Duration::from_millis(10),
        )
        .await;

    assert!(matches!(result, Err(LlmError::NotReady { attempts: 3 })));
}

#[tokio::test]
async fn test_alpha_vantage_parses_daily_series() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/query"))
        .and(query_param("function", "TIME_SERIES_DAILY"))
        .and(query_param("symbol", "SPY"))
        .and(query_param("apikey", "demo"))
        .and(query_param("outputsize", "full"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Meta Data": {"2. Symbol": "SPY"},
            "Time Series (Daily)": {
                "2024-06-03": {
                    "1. open": "529.02", "2. high": "529.31", "3. low": "522.60",
                    "4. close": "527.80", "5. volume": "46835702"
                },
                "2024-06-04": {
                    "1. open": "526.46", "2. high": "529.15", "3. low": "524.96",
                    "4. close": "528.39", "5. volume": "34632658"
                }
            }
        })))
        .mount(&server)
        .await;

    let client = AlphaVantageClient::new(
        format!("{}/query", server.uri()),
        "demo",
        Duration::from_secs(5),
    )
    .expect("client");
    let series = client.daily_series("SPY").await.expect("series");

    assert_eq!(series.len(), 2);
    assert_eq!(series["2024-06-04"].close_price(), Some(528.39));
}

#[tokio::test]
async fn test_alpha_vantage_throttle_note_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute."
        })))
        .mount(&server)
        .await;

    let client = AlphaVantageClient::new(
        format!("{}/query", server.uri()),
        "demo",
        Duration::from_secs(5),
    )
    .expect("client");

    match client.daily_series("AAPL").await {
        Err(StockError::ParseError(message)) => assert!(message.contains("call frequency")),
        other => panic!("expected parse error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_alpha_vantage_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let client = AlphaVantageClient::new(
        format!("{}/query", server.uri()),
        "demo",
        Duration::from_secs(5),
    )
    .expect("client");

    assert!(matches!(
        client.daily_series("AAPL").await,
        Err(StockError::ApiError(502))
    ));
}
