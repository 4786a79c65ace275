#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for the OpenAI-compatible embedder.
//!
//! Runs the adapter against a local mock server to check the request shape,
//! response ordering, normalisation and error classification.

use searchkit_core::{EmbedderConfig, ErrorKind};
use searchkit_embed::{OpenAiCompatibleEmbedder, TextEmbedder};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config(server: &MockServer) -> EmbedderConfig {
    EmbedderConfig {
        base_url: format!("{}/v1", server.uri()),
        api_key: "sk-test".to_string(),
        model: "qwen-3-embedding-4b".to_string(),
        dimensions: Some(2),
        timeout_secs: 5,
        provider: "deepinfra".to_string(),
    }
}

fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

// ---------------------------------------------------------------------------
// 1. Request shape and response handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sends_mapped_model_and_sorts_by_index() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(serde_json::json!({
            "model": "Qwen/Qwen3-Embedding-4B",
            "input": ["first", "second"],
            "dimensions": 2
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 2.0]},
                {"index": 0, "embedding": [3.0, 4.0]}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let embedder = OpenAiCompatibleEmbedder::new(config(&server)).unwrap();
    let vectors = embedder
        .embed_texts(&texts(&["first", "second"]))
        .await
        .unwrap();

    assert_eq!(vectors.len(), 2);
    assert!((vectors[0][0] - 0.6).abs() < 1e-6);
    assert!((vectors[0][1] - 0.8).abs() < 1e-6);
    assert!((vectors[1][1] - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn single_text_uses_batch_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{"index": 0, "embedding": [1.0, 0.0]}]
        })))
        .mount(&server)
        .await;

    let embedder = OpenAiCompatibleEmbedder::new(config(&server)).unwrap();
    let vector = embedder.embed_text("hello").await.unwrap();
    assert_eq!(vector, vec![1.0, 0.0]);
}

#[tokio::test]
async fn count_mismatch_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{"index": 0, "embedding": [1.0, 0.0]}]
        })))
        .mount(&server)
        .await;

    let embedder = OpenAiCompatibleEmbedder::new(config(&server)).unwrap();
    let err = embedder.embed_texts(&texts(&["a", "b"])).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transient);
}

#[tokio::test]
async fn malformed_body_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let embedder = OpenAiCompatibleEmbedder::new(config(&server)).unwrap();
    let err = embedder.embed_texts(&texts(&["a"])).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transient);
}

// ---------------------------------------------------------------------------
// 2. Status classification
// ---------------------------------------------------------------------------

async fn kind_for_status(status: u16) -> ErrorKind {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
        .mount(&server)
        .await;
    let embedder = OpenAiCompatibleEmbedder::new(config(&server)).unwrap();
    embedder
        .embed_texts(&texts(&["a"]))
        .await
        .unwrap_err()
        .kind()
}

#[tokio::test]
async fn retryable_statuses_are_transient() {
    for status in [408, 429, 500, 503] {
        assert_eq!(kind_for_status(status).await, ErrorKind::Transient, "{status}");
    }
}

#[tokio::test]
async fn client_errors_are_permanent() {
    for status in [400, 401, 404, 422] {
        assert_eq!(kind_for_status(status).await, ErrorKind::Permanent, "{status}");
    }
}

#[tokio::test]
async fn unreachable_server_is_transient() {
    let server = MockServer::start().await;
    let mut cfg = config(&server);
    drop(server);
    cfg.base_url = "http://127.0.0.1:9/v1".to_string();
    let embedder = OpenAiCompatibleEmbedder::new(cfg).unwrap();
    let err = embedder.embed_texts(&texts(&["a"])).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transient);
}
