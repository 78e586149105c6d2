//! Core stage trait and output types.
//!
//! A [`Stage`] is the atomic composable unit: it takes a
//! `serde_json::Value` input, does some work (typically a model call or a
//! pure transformation), and returns a [`StageOutput`]. The `Value`-based
//! wire type lets heterogeneous stages be wired together without sharing
//! a single generic parameter. Combinators are stages too.

use crate::diagnostics::ParseDiagnostics;
use crate::error::Result;
use crate::events::{emit, Event};
use crate::exec_ctx::ExecCtx;
use crate::prompt::value_text;
use crate::PipelineError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{event, span, Instrument, Level};

/// A boxed, pinned, Send future -- the return type of [`Stage::invoke`].
pub type BoxFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe trait for executable stages.
///
/// Stages accept a `Value` input, execute against an [`ExecCtx`], and
/// return a [`StageOutput`] or a [`PipelineError`]. They hold no mutable
/// state between invocations and never retry internally.
///
/// The trait is object-safe so stages can be stored as `Box<dyn Stage>`
/// and composed in sequences, parallel groups and branches.
pub trait Stage: Send + Sync {
    /// Stable identifier for the stage type (e.g. `"llm-call"`, `"sequence"`).
    fn kind(&self) -> &'static str;

    /// Instance name (for errors, events and logs).
    fn name(&self) -> &str;

    /// Execute the stage.
    fn invoke<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> BoxFut<'a, Result<StageOutput>>;
}

impl<S: Stage + ?Sized> Stage for Box<S> {
    fn kind(&self) -> &'static str {
        (**self).kind()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn invoke<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> BoxFut<'a, Result<StageOutput>> {
        (**self).invoke(ctx, input)
    }
}

impl<S: Stage + ?Sized> Stage for Arc<S> {
    fn kind(&self) -> &'static str {
        (**self).kind()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn invoke<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> BoxFut<'a, Result<StageOutput>> {
        (**self).invoke(ctx, input)
    }
}

/// Output from a stage invocation.
#[derive(Debug, Clone)]
pub struct StageOutput {
    /// Structured output (JSON value). This is what the next stage receives.
    pub value: Value,
    /// Raw text before parsing (the model reply for model calls).
    pub raw_response: String,
    /// Extracted thinking/reasoning (if extended thinking was enabled).
    pub thinking: Option<String>,
    /// Model that produced this output (if applicable).
    pub model: Option<String>,
    /// Parse diagnostics. `None` for stages that do no parsing.
    pub diagnostics: Option<ParseDiagnostics>,
}

impl StageOutput {
    /// Create an output wrapping a pre-existing `Value`.
    pub fn from_value(value: Value) -> Self {
        Self {
            raw_response: value_text(&value),
            value,
            thinking: None,
            model: None,
            diagnostics: None,
        }
    }

    /// The value as text: strings verbatim, anything else as compact JSON.
    pub fn text(&self) -> String {
        value_text(&self.value)
    }

    /// Parse the output value into a typed `T`.
    ///
    /// This is the primary way to extract typed data at pipeline edges.
    pub fn parse_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.value.clone()).map_err(|e| {
            let snippet = self.value.to_string();
            let snippet: String = snippet.chars().take(200).collect();
            PipelineError::Other(format!(
                "Failed to parse StageOutput into target type: {}. Value (truncated): {}",
                e, snippet
            ))
        })
    }
}

/// Run `work` for `stage` between its start and end events, inside a
/// debug span named after the stage.
pub(crate) async fn observe<S, F>(stage: &S, ctx: &ExecCtx, work: F) -> Result<StageOutput>
where
    S: Stage + ?Sized,
    F: Future<Output = Result<StageOutput>>,
{
    let span = span!(Level::DEBUG, "stage", name = %stage.name(), kind = stage.kind());
    async {
        emit(
            &ctx.event_handler,
            Event::StageStart {
                name: stage.name().to_string(),
                kind: stage.kind(),
            },
        );
        let result = work.await;
        match &result {
            Ok(_) => event!(Level::TRACE, "Stage finished."),
            Err(e) => event!(Level::DEBUG, error = %e, "Stage failed."),
        }
        emit(
            &ctx.event_handler,
            Event::StageEnd {
                name: stage.name().to_string(),
                ok: result.is_ok(),
            },
        );
        result
    }
    .instrument(span)
    .await
}

type LambdaFn = Arc<dyn Fn(Value) -> anyhow::Result<Value> + Send + Sync>;

/// A pure, synchronous transformation stage.
///
/// Use it for glue between model calls, fixed fallback answers, or to
/// pass the input through untouched inside a parallel group.
///
/// ```
/// use llm_chains::stage::Lambda;
/// use serde_json::json;
///
/// let shout = Lambda::new("shout", |v| Ok(json!(v.as_str().unwrap_or("").to_uppercase())));
/// let fallback = Lambda::constant("fallback", json!("could not find sentiment"));
/// let keep = Lambda::identity("original");
/// ```
#[derive(Clone)]
pub struct Lambda {
    name: String,
    f: LambdaFn,
}

impl Lambda {
    /// Wrap a closure. Errors surface as [`PipelineError::CallFailure`].
    pub fn new(
        name: impl Into<String>,
        f: impl Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            f: Arc::new(f),
        }
    }

    /// Always return `value`, ignoring the input.
    pub fn constant(name: impl Into<String>, value: Value) -> Self {
        Self::new(name, move |_| Ok(value.clone()))
    }

    /// Return the input unchanged.
    pub fn identity(name: impl Into<String>) -> Self {
        Self::new(name, Ok)
    }
}

impl std::fmt::Debug for Lambda {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lambda").field("name", &self.name).finish()
    }
}

impl Stage for Lambda {
    fn kind(&self) -> &'static str {
        "lambda"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> BoxFut<'a, Result<StageOutput>> {
        Box::pin(observe(self, ctx, async move {
            ctx.check_cancelled()?;
            (self.f)(input)
                .map(StageOutput::from_value)
                .map_err(PipelineError::from)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn test_ctx() -> ExecCtx {
        ExecCtx::builder("http://test").build()
    }

    #[test]
    fn test_from_value_raw_text() {
        let out = StageOutput::from_value(json!("plain"));
        assert_eq!(out.raw_response, "plain");
        let out = StageOutput::from_value(json!({"a": 1}));
        assert_eq!(out.raw_response, r#"{"a":1}"#);
    }

    #[test]
    fn test_parse_as() {
        #[derive(Debug, serde::Deserialize, PartialEq)]
        struct Notes {
            notes: String,
        }
        let out = StageOutput::from_value(json!({"notes": "svm"}));
        let notes: Notes = out.parse_as().unwrap();
        assert_eq!(notes.notes, "svm");
        assert!(out.parse_as::<Vec<i32>>().is_err());
    }

    #[test]
    fn test_lambda_blocking() {
        let ctx = test_ctx();
        let stage = Lambda::new("double", |v| Ok(json!(v.as_i64().unwrap_or(0) * 2)));
        let out = tokio_test::block_on(stage.invoke(&ctx, json!(21))).unwrap();
        assert_eq!(out.value, json!(42));
    }

    #[tokio::test]
    async fn test_lambda_error_is_call_failure() {
        let stage = Lambda::new("broken", |_| Err(anyhow::anyhow!("nope")));
        let err = stage.invoke(&test_ctx(), json!(null)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Call);
    }

    #[tokio::test]
    async fn test_constant_and_identity() {
        let ctx = test_ctx();
        let c = Lambda::constant("c", json!("fixed"));
        assert_eq!(c.invoke(&ctx, json!(1)).await.unwrap().value, json!("fixed"));
        let id = Lambda::identity("id");
        assert_eq!(
            id.invoke(&ctx, json!({"k": "v"})).await.unwrap().value,
            json!({"k": "v"})
        );
    }

    #[tokio::test]
    async fn test_shared_stage_via_arc() {
        let shared: Arc<dyn Stage> = Arc::new(Lambda::identity("shared"));
        let a = Arc::clone(&shared);
        assert_eq!(a.name(), "shared");
        assert_eq!(a.kind(), "lambda");
        let out = a.invoke(&test_ctx(), json!("x")).await.unwrap();
        assert_eq!(out.text(), "x");
    }
}
