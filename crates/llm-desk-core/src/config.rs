//! Configuration loading, validation, and per-call chat settings.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DeskError, Result};

const DEFAULT_PROVIDER: &str = "openrouter";
const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Instruction sent ahead of every agent task.
pub const DEFAULT_AGENT_SYSTEM_PROMPT: &str = "You are an autonomous assistant. Your goal is to complete the given task. Respond concisely with the result of the task.";

/// Top-level llm-desk configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Vendor identifier used for chat and the agent (e.g. "openai").
    #[serde(default = "default_provider")]
    pub default_provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Timeout for non-streaming requests (provider probe, model listing).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            model: default_model(),
            temperature: default_temperature(),
            timeout_ms: default_timeout_ms(),
            max_tokens: None,
            providers: BTreeMap::new(),
            agent: None,
            storage: None,
            logging: None,
        }
    }
}

fn default_provider() -> String {
    DEFAULT_PROVIDER.into()
}

fn default_model() -> String {
    DEFAULT_MODEL.into()
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Configuration for a single LLM vendor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl ProviderConfig {
    /// Resolve the API key: check `api_key` field first, then `api_key_env` environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Conversation that receives task results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    /// Delay before re-polling an empty queue.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay between finishing one task and polling for the next.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            conversation_id: None,
            poll_interval_ms: default_poll_interval_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            system_prompt: None,
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_retry_delay_ms() -> u64 {
    100
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding tasks and conversations (default: `~/.llm_desk/data`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "llm_desk_agent=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Everything one streaming call needs to know about the vendor.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    pub vendor: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub timeout_ms: u64,
}

/// Supplies chat settings per call.
pub trait ConfigSource: Send + Sync {
    /// Vendor, base URL, model and sampling settings. `api_key` may be empty.
    fn chat_settings(&self) -> Result<ChatConfig>;

    /// Like [`chat_settings`](Self::chat_settings), but a missing key is an error.
    fn chat_config(&self) -> Result<ChatConfig> {
        let settings = self.chat_settings()?;
        if settings.api_key.trim().is_empty() {
            return Err(DeskError::Config(format!(
                "missing API key for provider '{}'",
                settings.vendor
            )));
        }
        Ok(settings)
    }
}

impl ConfigSource for ChatConfig {
    fn chat_settings(&self) -> Result<ChatConfig> {
        Ok(self.clone())
    }
}

impl ConfigSource for Config {
    fn chat_settings(&self) -> Result<ChatConfig> {
        Config::chat_settings(self)
    }
}

impl ConfigSource for RwLock<Config> {
    fn chat_settings(&self) -> Result<ChatConfig> {
        let config = self
            .read()
            .map_err(|_| DeskError::config("config lock poisoned"))?;
        config.chat_settings()
    }
}

impl<T: ConfigSource + ?Sized> ConfigSource for Arc<T> {
    fn chat_settings(&self) -> Result<ChatConfig> {
        (**self).chat_settings()
    }
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex");
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config =
            json5::from_str(&substituted).map_err(|e| DeskError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Directory holding the task queue and conversations.
    pub fn storage_dir(&self) -> PathBuf {
        self.storage
            .as_ref()
            .and_then(|s| s.dir.as_ref())
            .map(|d| PathBuf::from(shellexpand::tilde(d).as_ref()))
            .unwrap_or_else(|| data_dir().join("data"))
    }

    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.get(id)
    }

    /// API key of the active provider, if any.
    pub fn active_api_key(&self) -> Option<String> {
        self.provider(&self.default_provider)
            .and_then(|p| p.resolve_api_key())
    }

    pub fn agent(&self) -> AgentConfig {
        self.agent.clone().unwrap_or_default()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.agent().poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.agent().retry_delay_ms)
    }

    pub fn agent_system_prompt(&self) -> String {
        self.agent()
            .system_prompt
            .unwrap_or_else(|| DEFAULT_AGENT_SYSTEM_PROMPT.to_string())
    }

    /// Active vendor's settings without requiring a key; `api_key` is empty
    /// when none is configured.
    pub fn chat_settings(&self) -> Result<ChatConfig> {
        let vendor = self.default_provider.trim();
        if vendor.is_empty() {
            return Err(DeskError::config("no default provider configured"));
        }
        let provider = self.provider(vendor).cloned().unwrap_or_default();

        Ok(ChatConfig {
            vendor: vendor.to_string(),
            api_key: provider.resolve_api_key().unwrap_or_default(),
            base_url: provider.base_url.filter(|u| !u.trim().is_empty()),
            model: self.model.clone(),
            temperature: Some(self.temperature),
            max_tokens: self.max_tokens,
            timeout_ms: self.timeout_ms,
        })
    }

    /// Resolve the active vendor's settings for one streaming call.
    pub fn chat_config(&self) -> Result<ChatConfig> {
        ConfigSource::chat_config(self)
    }

    /// Get a config value by dotted path (e.g. "agent.poll_interval_ms").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Set a config value by dotted path.
    pub fn set_path(&mut self, path: &str, value: serde_json::Value) -> Result<()> {
        let mut json = serde_json::to_value(&*self)?;

        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        let Some((last, parents)) = segments.split_last() else {
            return Err(DeskError::config("empty config path"));
        };

        let mut current = &mut json;
        for segment in parents {
            if !current.get(*segment).is_some_and(|v| v.is_object()) {
                current[*segment] = serde_json::json!({});
            }
            current = current
                .get_mut(*segment)
                .ok_or_else(|| DeskError::Config(format!("cannot descend into '{segment}'")))?;
        }
        current[*last] = value;

        *self = serde_json::from_value(json)
            .map_err(|e| DeskError::Config(format!("invalid value for '{path}': {e}")))?;
        Ok(())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if self.default_provider.trim().is_empty() {
            errors.push("default_provider cannot be empty".to_string());
        } else if self.provider(&self.default_provider).is_none() {
            warnings.push(format!(
                "Default provider '{}' has no providers entry",
                self.default_provider
            ));
        }

        for (id, p) in &self.providers {
            if p.resolve_api_key().is_none() {
                warnings.push(format!("Provider '{id}' has no API key configured"));
            }
        }

        if self.model.trim().is_empty() {
            errors.push("model cannot be empty".to_string());
        }

        if let Some(agent) = &self.agent {
            if agent.poll_interval_ms == 0 {
                errors.push("agent.poll_interval_ms cannot be 0".to_string());
            }
        }

        (warnings, errors)
    }

    /// Save config to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Base directory for llm-desk data: `~/.llm_desk/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".llm_desk")
}
