//! Mock backend for testing without a live model.
//!
//! [`MockBackend`] either cycles through canned replies or answers through
//! a handler closure that sees the rendered request, which is enough to
//! script whole pipelines deterministically.
//!
//! ```
//! use llm_chains::backend::MockBackend;
//!
//! let canned = MockBackend::new(vec!["first".into(), "second".into()]);
//! let routed = MockBackend::with_handler(|req| {
//!     Ok(if req.prompt.contains("summary") { "short".into() } else { "long".into() })
//! });
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{Backend, LlmRequest, LlmResponse};
use crate::error::Result;

type Handler = Arc<dyn Fn(&LlmRequest) -> Result<String> + Send + Sync>;

enum Replies {
    Canned(Vec<String>),
    Handler(Handler),
}

/// A test backend with scripted replies.
///
/// Streaming calls emit the reply split on whitespace boundaries, one token
/// per word (whitespace kept attached), so token events can be asserted.
pub struct MockBackend {
    replies: Replies,
    latency: Option<Duration>,
    calls: AtomicUsize,
}

impl MockBackend {
    /// Cycle through `responses` in order.
    ///
    /// # Panics
    ///
    /// Panics if `responses` is empty.
    pub fn new(responses: Vec<String>) -> Self {
        assert!(!responses.is_empty(), "MockBackend requires at least one response");
        Self::from_replies(Replies::Canned(responses))
    }

    /// Always reply with `response`.
    pub fn fixed(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    /// Compute each reply from the request. Errors are returned as-is.
    pub fn with_handler(
        handler: impl Fn(&LlmRequest) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        Self::from_replies(Replies::Handler(Arc::new(handler)))
    }

    /// Sleep for `latency` before every reply.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of calls received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn from_replies(replies: Replies) -> Self {
        Self {
            replies,
            latency: None,
            calls: AtomicUsize::new(0),
        }
    }

    async fn reply(&self, request: &LlmRequest) -> Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match &self.replies {
            Replies::Canned(responses) => Ok(responses[n % responses.len()].clone()),
            Replies::Handler(handler) => handler(request),
        }
    }
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let replies = match &self.replies {
            Replies::Canned(r) => format!("canned({})", r.len()),
            Replies::Handler(_) => "handler".to_string(),
        };
        f.debug_struct("MockBackend")
            .field("replies", &replies)
            .field("latency", &self.latency)
            .field("calls", &self.calls())
            .finish()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn complete(
        &self,
        _client: &Client,
        _base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        let text = self.reply(request).await?;
        Ok(LlmResponse {
            text,
            status: 200,
            metadata: None,
        })
    }

    async fn complete_streaming(
        &self,
        _client: &Client,
        _base_url: &str,
        request: &LlmRequest,
        on_token: &mut (dyn FnMut(String) + Send),
    ) -> Result<LlmResponse> {
        let text = self.reply(request).await?;
        for token in text.split_inclusive(char::is_whitespace) {
            on_token(token.to_string());
        }
        Ok(LlmResponse {
            text,
            status: 200,
            metadata: None,
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
