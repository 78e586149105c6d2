//! Model providers behind a common request/response shape.
//!
//! The [`Backend`] trait is the model-calling collaborator of
//! [`LlmCall`](crate::llm_call::LlmCall): it turns a normalized
//! [`LlmRequest`] into a provider HTTP call and returns the reply text.
//!
//! ```text
//! LlmCall ──► LlmRequest ──► Backend::complete() ──► LlmResponse
//!                                    │
//!                  ┌─────────────────┼─────────────────┐
//!             OllamaBackend     OpenAiBackend      MockBackend
//!            /api/generate   /v1/chat/completions   canned / handler
//!            /api/chat        SSE streaming
//!            NDJSON streaming
//! ```

pub mod decode;
pub mod mock;
pub mod ollama;
#[cfg(feature = "openai")]
pub mod openai;

pub use mock::MockBackend;
pub use ollama::OllamaBackend;
#[cfg(feature = "openai")]
pub use openai::OpenAiBackend;

use crate::config::LlmConfig;
use crate::error::Result;
use crate::PipelineError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// A provider-agnostic model request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Model identifier (e.g. `"llama3.2:3b"`, `"gpt-4o-mini"`).
    pub model: String,

    /// If `Some`, a chat-style call with a system message.
    pub system_prompt: Option<String>,

    /// The rendered user prompt.
    pub prompt: String,

    pub config: LlmConfig,

    /// Whether to use the provider's streaming endpoint.
    pub stream: bool,
}

/// A provider-agnostic model reply.
#[derive(Debug)]
pub struct LlmResponse {
    /// The generated text.
    pub text: String,

    /// HTTP status code.
    pub status: u16,

    /// Provider-specific metadata (token counts, timings), as raw JSON.
    pub metadata: Option<serde_json::Value>,
}

/// Abstraction over model providers.
///
/// Object-safe; contexts hold it as `Arc<dyn Backend>`. Implementations
/// make exactly one attempt per call.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Execute a non-streaming call.
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse>;

    /// Execute a streaming call, invoking `on_token` for each chunk.
    ///
    /// The returned response carries the full accumulated text.
    async fn complete_streaming(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
        on_token: &mut (dyn FnMut(String) + Send),
    ) -> Result<LlmResponse>;

    /// Short provider name for logs.
    fn name(&self) -> &'static str;
}

/// Send a prepared request, mapping transport and status failures.
pub(crate) async fn send(
    builder: reqwest::RequestBuilder,
    provider: &str,
    url: &str,
) -> Result<reqwest::Response> {
    let response = builder.send().await.map_err(|e| {
        PipelineError::CallFailure(format!("{} request to {} failed: {}", provider, url, e))
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let body = response.text().await.unwrap_or_default();
    Err(PipelineError::HttpError {
        status: status.as_u16(),
        body,
        retry_after,
    })
}

/// Parse a `Retry-After` header given in whole seconds.
///
/// HTTP-date values are not interpreted.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
