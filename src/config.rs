//! Model-call configuration and environment loading.
//!
//! [`LlmConfig`] holds per-call generation settings. [`EnvConfig`] reads the
//! process environment once so an [`ExecCtx`](crate::ExecCtx) can be built
//! without hard-coding endpoints or credentials.

use crate::{error::Result, PipelineError};
use serde_json::Value;
use std::time::Duration;

/// Configuration for LLM requests.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Temperature (0.0 = deterministic, 1.0 = creative).
    pub temperature: f64,

    /// Maximum tokens to generate.
    pub max_tokens: u32,

    /// Enable extended thinking mode (DeepSeek R1 style `<think>` tags).
    pub thinking: bool,

    /// Request JSON format output from the model.
    pub json_mode: bool,

    /// Custom options merged into the provider's options object (Ollama only).
    pub options: Option<Value>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2048,
            thinking: false,
            json_mode: false,
            options: None,
        }
    }
}

impl LlmConfig {
    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = temp;
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = tokens;
        self
    }

    pub fn with_thinking(mut self, enabled: bool) -> Self {
        self.thinking = enabled;
        self
    }

    pub fn with_json_mode(mut self, enabled: bool) -> Self {
        self.json_mode = enabled;
        self
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = Some(options);
        self
    }
}

/// Which provider API the context talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Ollama,
    OpenAi,
}

impl BackendKind {
    /// Base URL used when `LLM_BASE_URL` is not set.
    pub fn default_base_url(self) -> &'static str {
        match self {
            BackendKind::Ollama => "http://localhost:11434",
            BackendKind::OpenAi => "https://api.openai.com",
        }
    }

    /// Model used when neither the call nor `LLM_MODEL` names one.
    pub const fn default_model(self) -> &'static str {
        match self {
            BackendKind::Ollama => "llama3.2:3b",
            BackendKind::OpenAi => "gpt-4o-mini",
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(BackendKind::Ollama),
            "openai" => Ok(BackendKind::OpenAi),
            other => Err(PipelineError::Construction(format!(
                "unknown LLM_BACKEND '{}' (expected 'ollama' or 'openai')",
                other
            ))),
        }
    }
}

/// Settings read from the process environment.
///
/// | Variable | Meaning | Default |
/// |----------|---------|---------|
/// | `LLM_BACKEND` | `ollama` or `openai` | `openai` if `OPENAI_API_KEY` is set, else `ollama` |
/// | `LLM_BASE_URL` | provider base URL | per backend |
/// | `LLM_MODEL` | default model for calls that set none | per backend |
/// | `LLM_TIMEOUT_SECS` | request timeout | 60 |
/// | `OPENAI_API_KEY` | bearer token | unset |
/// | `OPENAI_ORG_ID` | organization header | unset |
///
/// Loading a `.env` file is left to the binary (the demos use `dotenvy`).
#[derive(Clone)]
pub struct EnvConfig {
    pub backend: BackendKind,
    pub base_url: String,
    pub model: Option<String>,
    pub timeout: Duration,
    pub api_key: Option<String>,
    pub organization: Option<String>,
}

impl EnvConfig {
    /// Read the configuration from `std::env`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an arbitrary lookup function.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("OPENAI_API_KEY");
        let backend = match get("LLM_BACKEND") {
            Some(raw) => raw.parse()?,
            None if api_key.is_some() => BackendKind::OpenAi,
            None => BackendKind::Ollama,
        };

        let timeout = match get("LLM_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| {
                    PipelineError::Construction(format!(
                        "LLM_TIMEOUT_SECS must be a whole number of seconds, got '{}'",
                        raw
                    ))
                })?;
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(60),
        };

        Ok(Self {
            backend,
            base_url: get("LLM_BASE_URL")
                .unwrap_or_else(|| backend.default_base_url().to_string()),
            model: get("LLM_MODEL"),
            timeout,
            api_key,
            organization: get("OPENAI_ORG_ID"),
        })
    }
}

impl std::fmt::Debug for EnvConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvConfig")
            .field("backend", &self.backend)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .field("has_api_key", &self.api_key.is_some())
            .field("organization", &self.organization)
            .finish()
    }
}
