//! Backend for OpenAI-compatible chat completion APIs.
//!
//! Works with OpenAI itself and with the many servers that mirror its
//! `/v1/chat/completions` endpoint (vLLM, llama.cpp, LM Studio, Groq,
//! Ollama's `/v1`). Streaming replies are server-sent events.

use super::decode::{Framing, StreamDecoder};
use super::{send, Backend, LlmRequest, LlmResponse};
use crate::error::Result;
use crate::PipelineError;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};

const COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Backend for any OpenAI-compatible API.
///
/// ```
/// use llm_chains::backend::OpenAiBackend;
///
/// let local = OpenAiBackend::new();
/// let hosted = OpenAiBackend::new()
///     .with_api_key("sk-...")
///     .with_organization("org-...");
/// ```
#[derive(Clone, Default)]
pub struct OpenAiBackend {
    api_key: Option<String>,
    organization: Option<String>,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let key = self.api_key.as_ref().map(|k| match k.get(..6) {
            Some(prefix) if k.len() > 6 => format!("{}***", prefix),
            _ => "***".to_string(),
        });
        f.debug_struct("OpenAiBackend")
            .field("api_key", &key)
            .field("organization", &self.organization)
            .finish()
    }
}

impl OpenAiBackend {
    /// An unauthenticated backend (local servers).
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `Authorization: Bearer {key}`.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Send `OpenAI-Organization: {org}`.
    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization = Some(org.into());
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    // Thinking mode and custom provider options have no equivalent here and
    // are not sent.
    fn body(request: &LlmRequest, stream: bool) -> Value {
        let mut messages = Vec::with_capacity(2);
        if let Some(sys) = request.system_prompt.as_deref().filter(|s| !s.is_empty()) {
            messages.push(json!({"role": "system", "content": sys}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.config.temperature,
            "max_tokens": request.config.max_tokens,
            "stream": stream,
        });
        if request.config.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }

    fn post(&self, client: &Client, url: &str, body: &Value) -> reqwest::RequestBuilder {
        let mut builder = client.post(url).json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        if let Some(org) = &self.organization {
            builder = builder.header("OpenAI-Organization", org.as_str());
        }
        builder
    }

    fn first_choice<'v>(message: &'v Value, field: &str) -> Option<&'v str> {
        message
            .pointer(&format!("/choices/0/{}/content", field))
            .and_then(Value::as_str)
    }

    fn metadata(message: &Value) -> Option<Value> {
        let meta: serde_json::Map<String, Value> = ["id", "model", "usage"]
            .iter()
            .filter_map(|&k| message.get(k).map(|v| (k.to_string(), v.clone())))
            .collect();
        (!meta.is_empty()).then_some(Value::Object(meta))
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        let url = format!("{}{}", base_url.trim_end_matches('/'), COMPLETIONS_PATH);
        let body = Self::body(request, false);

        let response = send(self.post(client, &url, &body), self.name(), &url).await?;
        let status = response.status().as_u16();
        let message: Value = response.json().await?;

        Ok(LlmResponse {
            text: Self::first_choice(&message, "message")
                .unwrap_or_default()
                .to_string(),
            status,
            metadata: Self::metadata(&message),
        })
    }

    async fn complete_streaming(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
        on_token: &mut (dyn FnMut(String) + Send),
    ) -> Result<LlmResponse> {
        let url = format!("{}{}", base_url.trim_end_matches('/'), COMPLETIONS_PATH);
        let body = Self::body(request, true);

        let response = send(self.post(client, &url, &body), self.name(), &url).await?;
        let status = response.status().as_u16();

        let mut stream = response.bytes_stream();
        let mut decoder = StreamDecoder::new(Framing::Sse);
        let mut text = String::new();

        let mut absorb = |event: Value| {
            if let Some(token) = Self::first_choice(&event, "delta").filter(|t| !t.is_empty()) {
                text.push_str(token);
                on_token(token.to_string());
            }
        };

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(PipelineError::Request)?;
            decoder.decode(&chunk).into_iter().for_each(&mut absorb);
        }
        decoder.flush().into_iter().for_each(&mut absorb);

        Ok(LlmResponse {
            text,
            status,
            metadata: None,
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;

    fn request() -> LlmRequest {
        LlmRequest {
            model: "gpt-4o-mini".into(),
            system_prompt: None,
            prompt: "Classify: the phone is beautiful".into(),
            config: LlmConfig::default(),
            stream: false,
        }
    }

    #[test]
    fn test_body_with_system_prompt() {
        let mut req = request();
        req.system_prompt = Some("You are a helpful assistant.".into());
        let body = OpenAiBackend::body(&req, false);

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["temperature"], 0.7);
        assert_eq!(body["max_tokens"], 2048);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_body_without_system_prompt() {
        let body = OpenAiBackend::body(&request(), true);
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn test_json_mode_and_ollama_only_options() {
        let mut req = request();
        req.config = LlmConfig::default()
            .with_json_mode(true)
            .with_thinking(true)
            .with_options(json!({"top_p": 0.9}));
        let body = OpenAiBackend::body(&req, false);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert!(body.get("options").is_none());
        assert!(body.get("extended_thinking").is_none());
    }

    #[test]
    fn test_auth_headers() {
        let backend = OpenAiBackend::new()
            .with_api_key("sk-test123")
            .with_organization("org-abc");
        let req = backend
            .post(&Client::new(), "https://api.openai.com/v1/chat/completions", &json!({}))
            .build()
            .unwrap();
        assert_eq!(req.headers()["authorization"], "Bearer sk-test123");
        assert_eq!(req.headers()["openai-organization"], "org-abc");

        let anon = OpenAiBackend::new()
            .post(&Client::new(), "http://localhost:8000/v1/chat/completions", &json!({}))
            .build()
            .unwrap();
        assert!(anon.headers().get("authorization").is_none());
    }

    #[test]
    fn test_first_choice() {
        let reply = json!({"choices": [{"message": {"content": "positive"}}]});
        assert_eq!(OpenAiBackend::first_choice(&reply, "message"), Some("positive"));
        let delta = json!({"choices": [{"delta": {"content": "pos"}}]});
        assert_eq!(OpenAiBackend::first_choice(&delta, "delta"), Some("pos"));
        assert_eq!(OpenAiBackend::first_choice(&json!({"choices": []}), "delta"), None);
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let backend = OpenAiBackend::new().with_api_key("sk-1234567890abcdef");
        let debug = format!("{:?}", backend);
        assert!(!debug.contains("1234567890abcdef"));
        assert!(debug.contains("sk-123***"));

        let short = format!("{:?}", OpenAiBackend::new().with_api_key("sk"));
        assert!(short.contains("\"***\""));
        assert!(format!("{:?}", OpenAiBackend::new()).contains("None"));
    }
}
