//! Provider router: one streaming call in front of every vendor.

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use llm_desk_core::config::ChatConfig;
use llm_desk_core::error::{DeskError, Result};
use llm_desk_core::types::{ChatMessage, ChatRole};

use crate::dialect::Vendor;
use crate::sse::decode_stream;
use crate::{ChatProvider, DeltaStream};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const ANTHROPIC_DEFAULT_MAX_TOKENS: u32 = 1024;
const OPENROUTER_REFERER: &str = "https://llm-desk.local";
const OPENROUTER_TITLE: &str = "llm-desk";

/// A fully addressed request, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Value,
}

impl PreparedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Build the streaming request for `vendor`. Pure: no I/O.
pub fn build_request(vendor: Vendor, config: &ChatConfig, history: &[ChatMessage]) -> PreparedRequest {
    let url = format!(
        "{}{}",
        vendor.base_url(config.base_url.as_deref()),
        vendor.chat_path()
    );
    let mut headers = vec![("content-type", "application/json".to_string())];

    let body = match vendor {
        Vendor::Anthropic => {
            headers.push(("x-api-key", config.api_key.clone()));
            headers.push(("anthropic-version", ANTHROPIC_VERSION.to_string()));

            let system = history
                .iter()
                .filter(|m| m.role == ChatRole::System)
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            let messages: Vec<Value> = history
                .iter()
                .filter(|m| m.role != ChatRole::System)
                .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
                .collect();

            let mut body = json!({
                "model": config.model,
                "messages": messages,
                "max_tokens": config.max_tokens.unwrap_or(ANTHROPIC_DEFAULT_MAX_TOKENS),
                "stream": true,
            });
            if !system.is_empty() {
                body["system"] = json!(system);
            }
            if let Some(t) = config.temperature {
                body["temperature"] = json!(t);
            }
            body
        }
        Vendor::OpenRouter | Vendor::OpenAi | Vendor::Grok => {
            headers.push(("authorization", format!("Bearer {}", config.api_key)));
            if vendor == Vendor::OpenRouter {
                headers.push(("HTTP-Referer", OPENROUTER_REFERER.to_string()));
                headers.push(("X-Title", OPENROUTER_TITLE.to_string()));
            }

            let messages: Vec<Value> = history
                .iter()
                .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
                .collect();

            let mut body = json!({
                "model": config.model,
                "messages": messages,
                "stream": true,
            });
            if let Some(t) = config.temperature {
                body["temperature"] = json!(t);
            }
            if let Some(max) = config.max_tokens {
                body["max_tokens"] = json!(max);
            }
            body
        }
    };

    PreparedRequest { url, headers, body }
}

/// Resolve the vendor and reject configs that cannot produce a request.
pub fn resolve_vendor(config: &ChatConfig) -> Result<Vendor> {
    let vendor: Vendor = config.vendor.parse()?;
    if config.api_key.trim().is_empty() {
        return Err(DeskError::config(format!(
            "missing API key for provider '{}'",
            vendor.id()
        )));
    }
    if config.model.trim().is_empty() {
        return Err(DeskError::config("model is not set"));
    }
    Ok(vendor)
}

/// Routes chat calls to the configured vendor over a shared HTTP client.
#[derive(Clone, Default)]
pub struct ProviderRouter {
    client: reqwest::Client,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

/// Turn a non-success response into a `Transport` error carrying its body.
pub(crate) async fn check_status(vendor: Vendor, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!(vendor = %vendor, status = status.as_u16(), "Vendor returned an error status");
    Err(DeskError::Transport {
        vendor: vendor.display_name().to_string(),
        status: status.as_u16(),
        body,
    })
}

pub(crate) fn apply_headers(
    mut builder: reqwest::RequestBuilder,
    headers: &[(&'static str, String)],
) -> reqwest::RequestBuilder {
    for (name, value) in headers {
        builder = builder.header(*name, value);
    }
    builder
}

#[async_trait]
impl ChatProvider for ProviderRouter {
    async fn stream_chat(
        &self,
        config: &ChatConfig,
        history: &[ChatMessage],
        cancel: CancellationToken,
    ) -> Result<DeltaStream> {
        let vendor = resolve_vendor(config)?;
        let request = build_request(vendor, config, history);

        debug!(vendor = %vendor, model = %config.model, url = %request.url, "Streaming chat request");

        let send = apply_headers(self.client.post(&request.url), &request.headers)
            .json(&request.body)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            res = send => Some(res),
        };
        let Some(response) = response else {
            debug!(vendor = %vendor, "Chat request cancelled before response");
            return Ok(Box::pin(futures::stream::empty()));
        };

        let response = response.map_err(|e| DeskError::Http(e.to_string()))?;
        let response = check_status(vendor, response).await?;

        Ok(decode_stream(response.bytes_stream(), vendor.dialect(), cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(vendor: &str) -> ChatConfig {
        ChatConfig {
            vendor: vendor.into(),
            api_key: "sk-test".into(),
            base_url: None,
            model: "test-model".into(),
            temperature: Some(0.7),
            max_tokens: None,
            timeout_ms: 30_000,
        }
    }

    fn history() -> Vec<ChatMessage> {
        vec![
            ChatMessage::system("You are terse."),
            ChatMessage::user("Hi"),
            ChatMessage::assistant("Hello"),
            ChatMessage::user("Bye"),
        ]
    }

    #[test]
    fn test_openai_request() {
        let req = build_request(Vendor::OpenAi, &config("openai"), &history());
        assert_eq!(req.url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(req.header("Authorization"), Some("Bearer sk-test"));
        assert!(req.header("x-api-key").is_none());
        assert_eq!(req.body["stream"], json!(true));
        assert_eq!(req.body["model"], json!("test-model"));
        assert_eq!(req.body["temperature"], json!(0.7));
        assert!(req.body.get("max_tokens").is_none());
        let messages = req.body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], json!({"role": "system", "content": "You are terse."}));
    }

    #[test]
    fn test_openrouter_extra_headers() {
        let req = build_request(Vendor::OpenRouter, &config("openrouter"), &history());
        assert_eq!(req.url, "https://openrouter.ai/api/v1/chat/completions");
        assert_eq!(req.header("HTTP-Referer"), Some(OPENROUTER_REFERER));
        assert_eq!(req.header("X-Title"), Some(OPENROUTER_TITLE));
        assert_eq!(req.header("authorization"), Some("Bearer sk-test"));
    }

    #[test]
    fn test_anthropic_request() {
        let req = build_request(Vendor::Anthropic, &config("anthropic"), &history());
        assert_eq!(req.url, "https://api.anthropic.com/v1/messages");
        assert_eq!(req.header("x-api-key"), Some("sk-test"));
        assert_eq!(req.header("anthropic-version"), Some(ANTHROPIC_VERSION));
        assert!(req.header("authorization").is_none());
        assert_eq!(req.body["max_tokens"], json!(ANTHROPIC_DEFAULT_MAX_TOKENS));
        assert_eq!(req.body["stream"], json!(true));
        assert_eq!(req.body["system"], json!("You are terse."));
        let messages = req.body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert!(messages.iter().all(|m| m["role"] != json!("system")));
    }

    #[test]
    fn test_anthropic_without_system_omits_field() {
        let mut cfg = config("anthropic");
        cfg.max_tokens = Some(256);
        let req = build_request(Vendor::Anthropic, &cfg, &[ChatMessage::user("Hi")]);
        assert!(req.body.get("system").is_none());
        assert_eq!(req.body["max_tokens"], json!(256));
    }

    #[test]
    fn test_grok_and_base_url_override() {
        let mut cfg = config("grok");
        cfg.base_url = Some("http://127.0.0.1:9999/v1/".into());
        cfg.max_tokens = Some(64);
        let req = build_request(Vendor::Grok, &cfg, &history());
        assert_eq!(req.url, "http://127.0.0.1:9999/v1/chat/completions");
        assert_eq!(req.body["max_tokens"], json!(64));
    }

    #[test]
    fn test_resolve_vendor_errors() {
        let err = resolve_vendor(&config("cohere")).unwrap_err();
        assert!(err.is_config());

        let mut cfg = config("openai");
        cfg.api_key = "  ".into();
        assert!(resolve_vendor(&cfg).unwrap_err().is_config());

        assert_eq!(resolve_vendor(&config("grok")).unwrap(), Vendor::Grok);
    }

    #[tokio::test]
    async fn test_unknown_vendor_fails_before_network() {
        let router = ProviderRouter::new();
        let result = router
            .stream_chat(&config("nope"), &history(), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(DeskError::Config(_))));
    }
}
