//! Live vendor tests: real API calls.
//!
//! These tests are skipped when the corresponding API key env var is not set.
//! Run with: `cargo test -p llm-desk-providers --test live`

use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use llm_desk_core::config::ChatConfig;
use llm_desk_core::types::ChatMessage;
use llm_desk_providers::{ChatProvider, ProviderRouter, Vendor};

fn env_key(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|k| !k.is_empty())
}

fn live_config(vendor: Vendor, api_key: String, model: &str) -> ChatConfig {
    ChatConfig {
        vendor: vendor.id().into(),
        api_key,
        base_url: None,
        model: model.into(),
        temperature: Some(0.0),
        max_tokens: Some(50),
        timeout_ms: 30_000,
    }
}

/// Stream a short completion and check the reply contains "hello".
async fn verify_simple_completion(config: &ChatConfig) {
    let router = ProviderRouter::new();
    let history = [
        ChatMessage::system("You are a helpful assistant. Follow instructions exactly."),
        ChatMessage::user("Reply with exactly the word 'hello'."),
    ];

    let stream = router
        .stream_chat(config, &history, CancellationToken::new())
        .await;
    assert!(stream.is_ok(), "Stream creation failed: {:?}", stream.err());

    let mut stream = stream.unwrap();
    let mut text = String::new();
    while let Some(delta) = stream.next().await {
        text.push_str(&delta.expect("Stream delta error"));
    }

    assert!(!text.is_empty(), "No text deltas received");
    assert!(
        text.to_lowercase().contains("hello"),
        "Expected 'hello' in response, got: {text}"
    );
}

#[tokio::test]
async fn test_anthropic_streaming() {
    let Some(api_key) = env_key("ANTHROPIC_API_KEY") else {
        eprintln!("Skipping: ANTHROPIC_API_KEY not set");
        return;
    };
    verify_simple_completion(&live_config(Vendor::Anthropic, api_key, "claude-3-haiku-20240307")).await;
}

#[tokio::test]
async fn test_openai_streaming() {
    let Some(api_key) = env_key("OPENAI_API_KEY") else {
        eprintln!("Skipping: OPENAI_API_KEY not set");
        return;
    };
    verify_simple_completion(&live_config(Vendor::OpenAi, api_key, "gpt-4o-mini")).await;
}

#[tokio::test]
async fn test_openai_probe_and_models() {
    let Some(api_key) = env_key("OPENAI_API_KEY") else {
        eprintln!("Skipping: OPENAI_API_KEY not set");
        return;
    };
    let config = live_config(Vendor::OpenAi, api_key, "gpt-4o-mini");
    let router = ProviderRouter::new();

    let report = router.probe(&config).await;
    assert!(report.ok, "probe failed: {:?}", report.error);

    let models = router.list_models(Vendor::OpenAi, &config).await.unwrap();
    assert!(!models.is_empty());
}
