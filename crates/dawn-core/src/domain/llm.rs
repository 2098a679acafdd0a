//! Per-session LLM configuration.

use serde::{Deserialize, Serialize};

/// A language-model backend family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Local llama.cpp-compatible server; never needs an API key.
    Local,
    Openai,
    Anthropic,
    Gemini,
}

impl LlmProvider {
    /// Parse a provider from its wire name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(Self::Local),
            "openai" => Some(Self::Openai),
            "anthropic" => Some(Self::Anthropic),
            "gemini" => Some(Self::Gemini),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Openai => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }

    /// Cloud providers require a configured API key before a session may
    /// switch to them.
    #[must_use]
    pub const fn requires_api_key(&self) -> bool {
        !matches!(self, Self::Local)
    }
}

/// Per-session model configuration.
///
/// Each session receives a copy of the global default at creation time and
/// may mutate it independently afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    /// Sampling temperature override; `None` uses the backend default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Completion budget override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Context window used for usage reporting.
    pub context_window: u32,
    /// Whether the backend does native tool calling. When false, tool
    /// invocations travel inline as `<command>` markup and the visible
    /// stream is filtered.
    pub native_tool_calling: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Local,
            model: "default".to_string(),
            temperature: None,
            max_tokens: None,
            context_window: 8192,
            native_tool_calling: false,
        }
    }
}

/// Token counts reported by the LLM backend for one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}
