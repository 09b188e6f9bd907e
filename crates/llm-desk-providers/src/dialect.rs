//! Vendor dialects: where each vendor lives and where its delta text sits.

use serde::{Deserialize, Serialize};

use llm_desk_core::error::DeskError;

const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const GROK_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Supported vendors, parsed from the configured provider identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vendor {
    #[serde(rename = "openrouter")]
    OpenRouter,
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Grok,
}

/// JSON layout of a streamed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `choices[0].delta.content`
    OpenAiCompatible,
    /// `delta.text`, falling back to the legacy `completion` field.
    Anthropic,
    /// `choices[0].delta.content`
    Grok,
}

impl Vendor {
    pub const ALL: [Vendor; 4] = [Self::OpenRouter, Self::OpenAi, Self::Anthropic, Self::Grok];

    pub fn id(&self) -> &'static str {
        match self {
            Self::OpenRouter => "openrouter",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Grok => "grok",
        }
    }

    /// Name used in error messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::OpenRouter => "OpenRouter",
            Self::OpenAi => "OpenAI",
            Self::Anthropic => "Anthropic",
            Self::Grok => "Grok",
        }
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            Self::OpenRouter | Self::OpenAi => Dialect::OpenAiCompatible,
            Self::Anthropic => Dialect::Anthropic,
            Self::Grok => Dialect::Grok,
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenRouter => OPENROUTER_BASE_URL,
            Self::OpenAi => OPENAI_BASE_URL,
            Self::Anthropic => ANTHROPIC_BASE_URL,
            Self::Grok => GROK_BASE_URL,
        }
    }

    /// Path appended to the base URL for chat requests.
    pub fn chat_path(&self) -> &'static str {
        match self {
            Self::Anthropic => "/messages",
            _ => "/chat/completions",
        }
    }

    /// Base URL with an override applied and trailing slashes removed.
    pub fn base_url(&self, override_url: Option<&str>) -> String {
        override_url
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .unwrap_or(self.default_base_url())
            .trim_end_matches('/')
            .to_string()
    }
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

impl std::str::FromStr for Vendor {
    type Err = DeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|v| v.id() == wanted)
            .ok_or_else(|| DeskError::Config(format!("unknown provider '{s}'")))
    }
}

// --- Streamed record layouts ---

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicEvent {
    #[serde(default)]
    delta: Option<AnthropicDelta>,
    #[serde(default)]
    completion: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicDelta {
    #[serde(default)]
    text: Option<String>,
}

impl Dialect {
    /// Pull the delta text out of one record.
    ///
    /// Returns `None` for records that do not parse or carry no text.
    pub fn extract_delta(&self, payload: &str) -> Option<String> {
        let text = match self {
            Self::OpenAiCompatible | Self::Grok => {
                let chunk: ChatCompletionChunk = serde_json::from_str(payload).ok()?;
                chunk.choices.into_iter().next()?.delta?.content
            }
            Self::Anthropic => {
                let event: AnthropicEvent = serde_json::from_str(payload).ok()?;
                event
                    .delta
                    .and_then(|d| d.text)
                    .or(event.completion)
            }
        };
        text.filter(|t| !t.is_empty())
    }
}
