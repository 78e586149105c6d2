//! Backend for Ollama's native API.
//!
//! Prompt-only calls go to `/api/generate`; calls with a system prompt go
//! to `/api/chat`. Streaming replies are NDJSON, one token per line.

use super::decode::{Framing, StreamDecoder};
use super::{send, Backend, LlmRequest, LlmResponse};
use crate::error::Result;
use crate::PipelineError;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};

/// Metadata fields copied from the final Ollama message.
const METADATA_FIELDS: &[&str] = &[
    "model",
    "total_duration",
    "prompt_eval_count",
    "eval_count",
    "eval_duration",
];

/// Backend for a local or remote Ollama server. The default backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct OllamaBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Generate,
    Chat,
}

impl Endpoint {
    fn for_request(request: &LlmRequest) -> Self {
        match request.system_prompt.as_deref() {
            Some(sys) if !sys.is_empty() => Endpoint::Chat,
            _ => Endpoint::Generate,
        }
    }

    fn path(self) -> &'static str {
        match self {
            Endpoint::Generate => "/api/generate",
            Endpoint::Chat => "/api/chat",
        }
    }

    /// The text carried by one response object (whole reply or one token).
    fn text(self, message: &Value) -> Option<&str> {
        match self {
            Endpoint::Generate => message.get("response"),
            Endpoint::Chat => message.get("message").and_then(|m| m.get("content")),
        }
        .and_then(Value::as_str)
    }
}

impl OllamaBackend {
    fn options(request: &LlmRequest) -> Value {
        let mut opts = json!({
            "temperature": request.config.temperature,
            "num_predict": request.config.max_tokens,
        });
        if request.config.thinking {
            opts["extended_thinking"] = json!(true);
        }
        if let (Some(base), Some(extra)) = (
            opts.as_object_mut(),
            request.config.options.as_ref().and_then(Value::as_object),
        ) {
            base.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        opts
    }

    fn body(endpoint: Endpoint, request: &LlmRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model,
            "stream": stream,
            "options": Self::options(request),
        });
        match endpoint {
            Endpoint::Generate => body["prompt"] = json!(request.prompt),
            Endpoint::Chat => {
                body["messages"] = json!([
                    {"role": "system", "content": request.system_prompt},
                    {"role": "user", "content": request.prompt},
                ])
            }
        }
        if request.config.json_mode {
            body["format"] = json!("json");
        }
        body
    }

    fn metadata(message: &Value) -> Option<Value> {
        let meta: serde_json::Map<String, Value> = METADATA_FIELDS
            .iter()
            .filter_map(|&k| message.get(k).map(|v| (k.to_string(), v.clone())))
            .collect();
        (!meta.is_empty()).then_some(Value::Object(meta))
    }
}

#[async_trait]
impl Backend for OllamaBackend {
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        let endpoint = Endpoint::for_request(request);
        let url = format!("{}{}", base_url.trim_end_matches('/'), endpoint.path());
        let body = Self::body(endpoint, request, false);

        let response = send(client.post(&url).json(&body), self.name(), &url).await?;
        let status = response.status().as_u16();
        let message: Value = response.json().await?;

        Ok(LlmResponse {
            text: endpoint.text(&message).unwrap_or_default().to_string(),
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
        let endpoint = Endpoint::for_request(request);
        let url = format!("{}{}", base_url.trim_end_matches('/'), endpoint.path());
        let body = Self::body(endpoint, request, true);

        let response = send(client.post(&url).json(&body), self.name(), &url).await?;
        let status = response.status().as_u16();

        let mut stream = response.bytes_stream();
        let mut decoder = StreamDecoder::new(Framing::Ndjson);
        let mut text = String::new();
        let mut metadata = None;

        let mut absorb = |message: Value| {
            if let Some(token) = endpoint.text(&message).filter(|t| !t.is_empty()) {
                text.push_str(token);
                on_token(token.to_string());
            }
            if message.get("done").and_then(Value::as_bool) == Some(true) {
                metadata = Self::metadata(&message);
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
            metadata,
        })
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}
