//! Connectivity probe and model listing.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use llm_desk_core::config::ChatConfig;
use llm_desk_core::error::{DeskError, Result};
use llm_desk_core::types::ChatMessage;

use crate::dialect::Vendor;
use crate::router::{ProviderRouter, apply_headers, build_request, check_status};

const PROBE_PROMPT: &str = "ping";
const PROBE_MAX_TOKENS: u32 = 16;

const ANTHROPIC_MODELS: &[&str] = &[
    "claude-3-opus-20240229",
    "claude-3-sonnet-20240229",
    "claude-3-haiku-20240307",
    "claude-2.1",
    "claude-2.0",
    "claude-instant-1.2",
];

const GROK_MODELS: &[&str] = &[
    "gpt-3.5-turbo",
    "gpt-4",
    "mixtral-8x7b-32768",
    "llama-2-70b",
    "gemma-7b-it",
];

/// Outcome of a provider probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeReport {
    fn success(latency: Duration) -> Self {
        Self {
            ok: true,
            latency_ms: Some(latency.as_millis() as u64),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            latency_ms: None,
            error: Some(error.into()),
        }
    }

    pub fn no_key() -> Self {
        Self::failure("No key")
    }
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

impl ProviderRouter {
    /// Send one non-streaming "ping" completion and time it.
    ///
    /// Never fails: every problem is reported in the returned [`ProbeReport`].
    pub async fn probe(&self, config: &ChatConfig) -> ProbeReport {
        if config.api_key.trim().is_empty() {
            return ProbeReport::no_key();
        }
        let vendor: Vendor = match config.vendor.parse() {
            Ok(v) => v,
            Err(e) => return ProbeReport::failure(e.to_string()),
        };

        let mut request = build_request(vendor, config, &[ChatMessage::user(PROBE_PROMPT)]);
        request.body["stream"] = json!(false);
        if vendor == Vendor::Anthropic {
            request.body["max_tokens"] = json!(PROBE_MAX_TOKENS);
        }

        debug!(vendor = %vendor, url = %request.url, "Probing provider");
        let started = Instant::now();
        let send = apply_headers(self.client().post(&request.url), &request.headers)
            .timeout(Duration::from_millis(config.timeout_ms))
            .json(&request.body)
            .send()
            .await;

        let response = match send {
            Ok(r) => r,
            Err(e) => return ProbeReport::failure(e.to_string()),
        };
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return ProbeReport::failure(body);
        }
        ProbeReport::success(started.elapsed())
    }

    /// Models offered by the vendor.
    ///
    /// OpenAI-compatible vendors are asked via `GET <base>/models`; Anthropic
    /// and Grok return a fixed list.
    pub async fn list_models(&self, vendor: Vendor, config: &ChatConfig) -> Result<Vec<String>> {
        match vendor {
            Vendor::Anthropic => return Ok(ANTHROPIC_MODELS.iter().map(|m| m.to_string()).collect()),
            Vendor::Grok => return Ok(GROK_MODELS.iter().map(|m| m.to_string()).collect()),
            Vendor::OpenRouter | Vendor::OpenAi => {}
        }

        let url = format!("{}/models", vendor.base_url(config.base_url.as_deref()));
        debug!(vendor = %vendor, url = %url, "Listing models");

        let response = self
            .client()
            .get(&url)
            .bearer_auth(&config.api_key)
            .timeout(Duration::from_millis(config.timeout_ms))
            .send()
            .await
            .map_err(|e| DeskError::Http(e.to_string()))?;
        let response = check_status(vendor, response).await?;

        let models: ModelsResponse = response
            .json()
            .await
            .map_err(|e| DeskError::Http(format!("invalid models response: {e}")))?;
        Ok(models.data.into_iter().map(|m| m.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(vendor: &str, key: &str) -> ChatConfig {
        ChatConfig {
            vendor: vendor.into(),
            api_key: key.into(),
            base_url: Some("http://127.0.0.1:1".into()),
            model: "m".into(),
            temperature: None,
            max_tokens: None,
            timeout_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn test_probe_without_key_sends_nothing() {
        let report = ProviderRouter::new().probe(&config("openai", "")).await;
        assert_eq!(report, ProbeReport::no_key());
    }

    #[tokio::test]
    async fn test_probe_unknown_vendor() {
        let report = ProviderRouter::new().probe(&config("palm", "k")).await;
        assert!(!report.ok);
        assert!(report.error.unwrap().contains("palm"));
    }

    #[tokio::test]
    async fn test_fixed_model_lists() {
        let router = ProviderRouter::new();
        let anthropic = router
            .list_models(Vendor::Anthropic, &config("anthropic", "k"))
            .await
            .unwrap();
        assert!(anthropic.iter().any(|m| m.starts_with("claude-3")));
        let grok = router.list_models(Vendor::Grok, &config("grok", "k")).await.unwrap();
        assert_eq!(grok.len(), GROK_MODELS.len());
    }
}
