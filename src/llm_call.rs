//! The model-call stage.
//!
//! [`LlmCall`] renders its prompt template against the stage input, sends
//! one request through the context's backend and parses the reply with its
//! [`OutputStrategy`]. It makes exactly one backend call per invocation.

use crate::{
    backend::LlmRequest,
    config::{BackendKind, LlmConfig},
    error::Result,
    events::{emit, Event},
    exec_ctx::ExecCtx,
    output_parser::split_thinking,
    output_strategy::OutputStrategy,
    prompt,
    stage::{observe, BoxFut, Stage, StageOutput},
    validator::{Schema, Validator},
};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{event, Level};

/// Model used when neither the call nor the context names one.
pub const DEFAULT_MODEL: &str = BackendKind::Ollama.default_model();

/// A stage that calls a language model.
///
/// Templates may reference `{input}`, top-level fields of an object input,
/// partial variables fixed on the call, and variables of the [`ExecCtx`].
///
/// # Example
///
/// ```no_run
/// use llm_chains::{ExecCtx, LlmCall, Stage};
/// use serde_json::json;
///
/// # async fn run() -> llm_chains::Result<()> {
/// let report = LlmCall::new("report", "Write a detailed report on {input}.")
///     .with_system("You are a helpful assistant.");
///
/// let ctx = ExecCtx::builder("http://localhost:11434").build();
/// let output = report.invoke(&ctx, json!("quantum computing")).await?;
/// println!("{}", output.text());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LlmCall {
    name: String,
    prompt_template: String,
    /// Rendered against partials and context vars only.
    system_template: Option<String>,
    model: Option<String>,
    config: LlmConfig,
    streaming: bool,
    output_strategy: OutputStrategy,
    partials: HashMap<String, String>,
}

impl LlmCall {
    pub fn new(name: impl Into<String>, prompt_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt_template: prompt_template.into(),
            system_template: None,
            model: None,
            config: LlmConfig::default(),
            streaming: false,
            output_strategy: OutputStrategy::default(),
            partials: HashMap::new(),
        }
    }

    pub fn prompt_template(&self) -> &str {
        &self.prompt_template
    }

    /// The model this call will use under `ctx`.
    pub fn resolve_model<'a>(&'a self, ctx: &'a ExecCtx) -> &'a str {
        self.model
            .as_deref()
            .or(ctx.default_model.as_deref())
            .unwrap_or(DEFAULT_MODEL)
    }

    /// Set a system prompt (selects the chat endpoint on Ollama).
    pub fn with_system(mut self, template: impl Into<String>) -> Self {
        self.system_template = Some(template.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_config(mut self, config: LlmConfig) -> Self {
        self.config = config;
        self
    }

    /// Stream the reply, emitting a [`Event::Token`] per chunk.
    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.streaming = enabled;
        self
    }

    pub fn with_output_strategy(mut self, strategy: OutputStrategy) -> Self {
        self.output_strategy = strategy;
        self
    }

    /// Shorthand for [`OutputStrategy::Json`].
    pub fn expecting_json(self) -> Self {
        self.with_output_strategy(OutputStrategy::Json)
    }

    /// Shorthand for [`OutputStrategy::Text`].
    pub fn expecting_text(self) -> Self {
        self.with_output_strategy(OutputStrategy::Text)
    }

    /// Shorthand for [`OutputStrategy::Raw`].
    pub fn expecting_raw(self) -> Self {
        self.with_output_strategy(OutputStrategy::Raw)
    }

    /// Fix a template variable at construction time.
    pub fn with_partial(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.partials.insert(key.into(), value.into());
        self
    }

    /// Bind `{format_instructions}` to the validator's instructions.
    pub fn with_format_instructions<T: Schema>(self, validator: &Validator<T>) -> Self {
        self.with_partial("format_instructions", validator.format_instructions())
    }

    fn build_request(&self, ctx: &ExecCtx, input: &Value) -> LlmRequest {
        let vars = [&self.partials, &ctx.vars];
        LlmRequest {
            model: self.resolve_model(ctx).to_string(),
            system_prompt: self
                .system_template
                .as_ref()
                .map(|t| prompt::render(t, &Value::Null, &vars)),
            prompt: prompt::render(&self.prompt_template, input, &vars),
            config: self.config.clone(),
            stream: self.streaming,
        }
    }

    /// Turn reply text into an output. Never fails.
    fn build_output(&self, raw: String, model: String) -> StageOutput {
        let (thinking, answer) = split_thinking(&raw);
        let (value, diag) = self.output_strategy.apply(&answer);
        if let Some(err) = &diag.parse_error {
            event!(Level::DEBUG, stage = %self.name, error = %err, "Reply did not parse; kept as text.");
        }
        StageOutput {
            value,
            raw_response: raw,
            thinking,
            model: Some(model),
            diagnostics: Some(diag),
        }
    }

    async fn call(&self, ctx: &ExecCtx, input: Value) -> Result<StageOutput> {
        ctx.check_cancelled()?;
        let request = self.build_request(ctx, &input);
        event!(
            Level::DEBUG,
            backend = ctx.backend.name(),
            model = %request.model,
            prompt_len = request.prompt.len(),
            "Calling model."
        );

        let response = if self.streaming {
            let handler = ctx.event_handler.clone();
            let mut on_token = |chunk: String| {
                emit(
                    &handler,
                    Event::Token {
                        name: self.name.clone(),
                        chunk,
                    },
                )
            };
            ctx.backend
                .complete_streaming(&ctx.client, &ctx.base_url, &request, &mut on_token)
                .await?
        } else {
            ctx.backend
                .complete(&ctx.client, &ctx.base_url, &request)
                .await?
        };

        event!(Level::TRACE, status = response.status, reply_len = response.text.len(), "Model replied.");
        Ok(self.build_output(response.text, request.model))
    }
}

impl Stage for LlmCall {
    fn kind(&self) -> &'static str {
        "llm-call"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> BoxFut<'a, Result<StageOutput>> {
        Box::pin(observe(self, ctx, self.call(ctx, input)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::error::ErrorKind;
    use crate::events::testing::Recorder;
    use crate::PipelineError;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Mutex};

    fn ctx_with(mock: MockBackend) -> ExecCtx {
        ExecCtx::builder("http://test").backend(Arc::new(mock)).build()
    }

    /// A mock that echoes the rendered prompt.
    fn echo() -> MockBackend {
        MockBackend::with_handler(|req| Ok(req.prompt.clone()))
    }

    #[tokio::test]
    async fn test_renders_input_and_vars() {
        let ctx = ExecCtx::builder("http://test")
            .backend(Arc::new(echo()))
            .var("feedback", "Great phone")
            .build();
        let call = LlmCall::new("classify", "Classify '{feedback}' for {input} ({tone})")
            .with_partial("tone", "briefly");
        let out = call.invoke(&ctx, json!("sentiment")).await.unwrap();
        assert_eq!(out.text(), "Classify 'Great phone' for sentiment (briefly)");
    }

    #[tokio::test]
    async fn test_object_fields_in_template() {
        let call = LlmCall::new("merge", "notes -> {notes} and quiz -> {quiz}");
        let out = call
            .invoke(&ctx_with(echo()), json!({"notes": "N", "quiz": "Q"}))
            .await
            .unwrap();
        assert_eq!(out.text(), "notes -> N and quiz -> Q");
    }

    #[tokio::test]
    async fn test_system_prompt_and_model_resolution() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mock = MockBackend::with_handler(move |req| {
            sink.lock()
                .unwrap()
                .push((req.model.clone(), req.system_prompt.clone()));
            Ok("ok".into())
        });
        let ctx = ExecCtx::builder("http://test")
            .backend(Arc::new(mock))
            .default_model("ctx-model")
            .build();

        LlmCall::new("a", "x").invoke(&ctx, json!(null)).await.unwrap();
        LlmCall::new("b", "x")
            .with_model("own-model")
            .with_system("You are {role}.")
            .with_partial("role", "terse")
            .invoke(&ctx, json!(null))
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], ("ctx-model".to_string(), None));
        assert_eq!(
            seen[1],
            ("own-model".to_string(), Some("You are terse.".to_string()))
        );
    }

    #[test]
    fn test_default_model_fallback() {
        let ctx = ExecCtx::builder("http://test").build();
        assert_eq!(LlmCall::new("a", "x").resolve_model(&ctx), DEFAULT_MODEL);
    }

    #[tokio::test]
    async fn test_thinking_and_json_output() {
        let mock = MockBackend::fixed("<think>weighing it</think>```json\n{\"score\": 8}\n```");
        let out = LlmCall::new("score", "Rate {input}")
            .expecting_json()
            .invoke(&ctx_with(mock), json!("essay"))
            .await
            .unwrap();
        assert_eq!(out.value, json!({"score": 8}));
        assert_eq!(out.thinking.as_deref(), Some("weighing it"));
        assert!(out.raw_response.starts_with("<think>"));
        assert_eq!(out.model.as_deref(), Some(DEFAULT_MODEL));
        let diag = out.diagnostics.unwrap();
        assert!(diag.ok() && diag.extracted);
        assert_eq!(diag.strategy, Some("json"));
    }

    #[tokio::test]
    async fn test_parse_failure_is_not_an_error() {
        let out = LlmCall::new("score", "Rate {input}")
            .expecting_json()
            .invoke(&ctx_with(MockBackend::fixed("eight out of ten")), json!("essay"))
            .await
            .unwrap();
        assert_eq!(out.value, json!("eight out of ten"));
        assert!(!out.diagnostics.unwrap().ok());
    }

    #[tokio::test]
    async fn test_backend_failure_propagates() {
        let mock = MockBackend::with_handler(|_| {
            Err(PipelineError::HttpError {
                status: 503,
                body: "overloaded".into(),
                retry_after: None,
            })
        });
        let err = LlmCall::new("report", "x")
            .invoke(&ctx_with(mock), json!(null))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Call);
        assert!(err.stage_path().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let mock = Arc::new(MockBackend::fixed("never"));
        let ctx = ExecCtx::builder("http://test")
            .backend(mock.clone())
            .cancellation(Some(Arc::new(AtomicBool::new(true))))
            .build();
        let err = LlmCall::new("a", "x").invoke(&ctx, json!(null)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_streaming_emits_tokens() {
        let recorder = Arc::new(Recorder::default());
        let ctx = ExecCtx::builder("http://test")
            .backend(Arc::new(MockBackend::fixed("five key points")))
            .event_handler(recorder.clone())
            .build();
        let out = LlmCall::new("summary", "Summarize {input}")
            .with_streaming(true)
            .invoke(&ctx, json!("report"))
            .await
            .unwrap();
        assert_eq!(out.text(), "five key points");

        let events = recorder.take();
        let tokens: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                Event::Token { name, chunk } if name == "summary" => Some(chunk.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(tokens.concat(), "five key points");
        assert!(tokens.len() > 1);
        assert!(matches!(events.first(), Some(Event::StageStart { kind: "llm-call", .. })));
        assert!(matches!(events.last(), Some(Event::StageEnd { ok: true, .. })));
    }
}
