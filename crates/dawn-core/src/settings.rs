//! Runtime-mutable application settings.
//!
//! Holds the global LLM defaults, the secrets vault (API keys: write-only,
//! read back as set/unset status), tool configuration, and personal
//! settings. Admin WebSocket handlers mutate these; sessions copy the LLM
//! defaults at creation time.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::llm::{LlmConfig, LlmProvider};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("provider {0} requires an API key; configure the secret first")]
    MissingApiKey(String),

    #[error("unknown setting: {0}")]
    UnknownSetting(String),
}

/// Tool-execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSettings {
    pub enabled: bool,
    /// Tool names the executor will accept; empty means all.
    pub allowed: Vec<String>,
    /// Reply timeout for published commands, in seconds.
    pub command_timeout_secs: u64,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed: Vec::new(),
            command_timeout_secs: 10,
        }
    }
}

/// Per-deployment personalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalSettings {
    pub assistant_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub timezone: String,
}

impl Default for PersonalSettings {
    fn default() -> Self {
        Self {
            assistant_name: "dawn".to_string(),
            system_prompt: None,
            timezone: "UTC".to_string(),
        }
    }
}

/// Whether a secret has a stored value. Values themselves are never read
/// back out through the settings surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretStatus {
    Set,
    Unset,
}

/// Read snapshot of the non-secret settings sections.
#[derive(Debug, Clone, Serialize)]
pub struct SettingsSnapshot {
    pub llm_defaults: LlmConfig,
    pub tools: ToolSettings,
    pub personal: PersonalSettings,
}

struct Inner {
    llm_defaults: LlmConfig,
    secrets: HashMap<String, String>,
    tools: ToolSettings,
    personal: PersonalSettings,
}

/// Process-wide mutable settings, shared behind one read-write lock.
pub struct RuntimeSettings {
    inner: RwLock<Inner>,
}

impl RuntimeSettings {
    #[must_use]
    pub fn new(llm_defaults: LlmConfig) -> Self {
        Self {
            inner: RwLock::new(Inner {
                llm_defaults,
                secrets: HashMap::new(),
                tools: ToolSettings::default(),
                personal: PersonalSettings::default(),
            }),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> SettingsSnapshot {
        let inner = self.inner.read().unwrap();
        SettingsSnapshot {
            llm_defaults: inner.llm_defaults.clone(),
            tools: inner.tools.clone(),
            personal: inner.personal.clone(),
        }
    }

    #[must_use]
    pub fn llm_defaults(&self) -> LlmConfig {
        self.inner.read().unwrap().llm_defaults.clone()
    }

    /// Validate a config switch: cloud providers need a configured key.
    pub fn validate_llm(&self, config: &LlmConfig) -> Result<(), SettingsError> {
        if config.provider.requires_api_key() {
            let inner = self.inner.read().unwrap();
            if !inner.secrets.contains_key(secret_name(config.provider)) {
                return Err(SettingsError::MissingApiKey(
                    config.provider.as_str().to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Replace the global LLM defaults after validation.
    pub fn set_llm_defaults(&self, config: LlmConfig) -> Result<(), SettingsError> {
        self.validate_llm(&config)?;
        self.inner.write().unwrap().llm_defaults = config;
        Ok(())
    }

    /// Store a secret value (write-only surface).
    pub fn set_secret(&self, name: impl Into<String>, value: impl Into<String>) {
        self.inner
            .write()
            .unwrap()
            .secrets
            .insert(name.into(), value.into());
    }

    /// Statuses of the known provider secrets plus any extras stored.
    #[must_use]
    pub fn secret_statuses(&self) -> Vec<(String, SecretStatus)> {
        let inner = self.inner.read().unwrap();
        let mut names: Vec<String> = [LlmProvider::Openai, LlmProvider::Anthropic, LlmProvider::Gemini]
            .iter()
            .map(|p| secret_name(*p).to_string())
            .collect();
        for key in inner.secrets.keys() {
            if !names.contains(key) {
                names.push(key.clone());
            }
        }
        names.sort();
        names
            .into_iter()
            .map(|name| {
                let status = if inner.secrets.contains_key(&name) {
                    SecretStatus::Set
                } else {
                    SecretStatus::Unset
                };
                (name, status)
            })
            .collect()
    }

    /// The stored API key for a provider, for the LLM client only.
    #[must_use]
    pub fn api_key_for(&self, provider: LlmProvider) -> Option<String> {
        self.inner
            .read()
            .unwrap()
            .secrets
            .get(secret_name(provider))
            .cloned()
    }

    #[must_use]
    pub fn tools(&self) -> ToolSettings {
        self.inner.read().unwrap().tools.clone()
    }

    pub fn set_tools(&self, tools: ToolSettings) {
        self.inner.write().unwrap().tools = tools;
    }

    #[must_use]
    pub fn personal(&self) -> PersonalSettings {
        self.inner.read().unwrap().personal.clone()
    }

    pub fn set_personal(&self, personal: PersonalSettings) {
        self.inner.write().unwrap().personal = personal;
    }
}

/// Canonical secret name for a provider's API key.
#[must_use]
pub const fn secret_name(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::Local => "none",
        LlmProvider::Openai => "openai_api_key",
        LlmProvider::Anthropic => "anthropic_api_key",
        LlmProvider::Gemini => "gemini_api_key",
    }
}
