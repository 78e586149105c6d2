//! Sequential composition.
//!
//! [`Sequence`] runs its stages left to right, passing each output's
//! `value` as the next stage's input. It is itself a [`Stage`], so
//! sequences nest inside parallel groups, branches and other sequences.

use crate::{
    error::Result,
    exec_ctx::ExecCtx,
    stage::{observe, BoxFut, Stage, StageOutput},
    PipelineError,
};
use serde_json::Value;
use tracing::{event, Level};

/// A fixed, non-empty list of stages run in order.
///
/// The first failure stops the sequence; later stages never run. The
/// error is wrapped with the failing step's name.
///
/// # Example
///
/// ```no_run
/// use llm_chains::{ExecCtx, LlmCall, Sequence};
/// use serde_json::json;
///
/// # async fn run() -> llm_chains::Result<()> {
/// let chain = Sequence::builder("report-then-summary")
///     .push(LlmCall::new("report", "Generate a detailed report on {input}"))
///     .push(LlmCall::new("summary", "Generate a 5 pointer summary from the following text \n {input}"))
///     .build()?;
///
/// let ctx = ExecCtx::builder("http://localhost:11434").build();
/// let output = chain.execute(&ctx, json!("Unemployment in India")).await?;
/// println!("{}", output.text());
/// # Ok(())
/// # }
/// ```
pub struct Sequence {
    name: String,
    steps: Vec<Box<dyn Stage>>,
}

impl Sequence {
    pub fn builder(name: impl Into<String>) -> SequenceBuilder {
        SequenceBuilder {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always false for a built sequence.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Names of the steps, in run order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step and return all outputs, in order.
    pub async fn execute_all(&self, ctx: &ExecCtx, input: Value) -> Result<Vec<StageOutput>> {
        let mut outputs: Vec<StageOutput> = Vec::with_capacity(self.steps.len());
        let mut current = input;

        for (i, step) in self.steps.iter().enumerate() {
            ctx.check_cancelled()?;
            event!(Level::TRACE, step = %step.name(), index = i, "Running step.");
            let output = step
                .invoke(ctx, current)
                .await
                .map_err(|e| e.in_stage(step.name()))?;
            current = output.value.clone();
            outputs.push(output);
        }

        Ok(outputs)
    }

    /// Run every step and return the last output.
    pub async fn execute(&self, ctx: &ExecCtx, input: Value) -> Result<StageOutput> {
        self.execute_all(ctx, input)
            .await?
            .pop()
            .ok_or_else(|| PipelineError::Construction(format!("sequence '{}' has no steps", self.name)))
    }
}

impl std::fmt::Debug for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequence")
            .field("name", &self.name)
            .field("steps", &self.step_names())
            .finish()
    }
}

impl Stage for Sequence {
    fn kind(&self) -> &'static str {
        "sequence"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> BoxFut<'a, Result<StageOutput>> {
        Box::pin(observe(self, ctx, self.execute(ctx, input)))
    }
}

/// Builder for [`Sequence`].
pub struct SequenceBuilder {
    name: String,
    steps: Vec<Box<dyn Stage>>,
}

impl SequenceBuilder {
    /// Append a stage.
    pub fn push(mut self, stage: impl Stage + 'static) -> Self {
        self.steps.push(Box::new(stage));
        self
    }

    /// Fails when no stage was added.
    pub fn build(self) -> Result<Sequence> {
        if self.steps.is_empty() {
            return Err(PipelineError::Construction(format!(
                "sequence '{}' needs at least one stage",
                self.name
            )));
        }
        Ok(Sequence {
            name: self.name,
            steps: self.steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::error::ErrorKind;
    use crate::events::{testing::Recorder, Event};
    use crate::llm_call::LlmCall;
    use crate::stage::Lambda;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    fn test_ctx() -> ExecCtx {
        ExecCtx::builder("http://test").build()
    }

    fn append(name: &str, suffix: &'static str) -> Lambda {
        Lambda::new(name, move |v| {
            Ok(json!(format!("{}{}", v.as_str().unwrap_or(""), suffix)))
        })
    }

    #[test]
    fn test_empty_sequence_rejected() {
        let err = Sequence::builder("empty").build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Construction);
        assert!(err.to_string().contains("empty"));
    }

    #[tokio::test]
    async fn test_runs_in_order() {
        let seq = Sequence::builder("abc")
            .push(append("a", "a"))
            .push(append("b", "b"))
            .push(append("c", "c"))
            .build()
            .unwrap();
        assert_eq!(seq.len(), 3);
        assert_eq!(seq.step_names(), ["a", "b", "c"]);

        let outputs = seq.execute_all(&test_ctx(), json!(">")).await.unwrap();
        let values: Vec<_> = outputs.iter().map(|o| o.text()).collect();
        assert_eq!(values, [">a", ">ab", ">abc"]);
    }

    #[tokio::test]
    async fn test_failure_stops_later_steps() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let seq = Sequence::builder("chain")
            .push(append("first", "1"))
            .push(Lambda::new("broken", |_| Err(anyhow::anyhow!("model unavailable"))))
            .push(Lambda::new("never", move |v| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(v)
            }))
            .build()
            .unwrap();

        let err = seq.execute(&test_ctx(), json!("x")).await.unwrap_err();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(err.kind(), ErrorKind::Call);
        assert_eq!(err.stage_path(), ["broken"]);
    }

    #[tokio::test]
    async fn test_cancellation_between_steps() {
        let flag = Arc::new(AtomicBool::new(false));
        let trip = Arc::clone(&flag);
        let seq = Sequence::builder("cancel")
            .push(Lambda::new("trip", move |v| {
                trip.store(true, Ordering::SeqCst);
                Ok(v)
            }))
            .push(append("after", "!"))
            .build()
            .unwrap();

        let ctx = ExecCtx::builder("http://test")
            .cancellation(Some(flag))
            .build();
        let err = seq.execute(&ctx, json!("x")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn test_model_calls_chain() {
        let mock = Arc::new(MockBackend::with_handler(|req| {
            Ok(if req.prompt.starts_with("Generate a detailed report") {
                "Unemployment is high.".to_string()
            } else {
                format!("Summary of: {}", req.prompt.rsplit('\n').next().unwrap_or("").trim())
            })
        }));
        let ctx = ExecCtx::builder("http://test").backend(mock.clone()).build();

        let seq = Sequence::builder("report-summary")
            .push(LlmCall::new("report", "Generate a detailed report on {input}"))
            .push(LlmCall::new(
                "summary",
                "Generate a 5 pointer summary from the following text \n {input}",
            ))
            .build()
            .unwrap();

        let out = seq.execute(&ctx, json!("Unemployment in India")).await.unwrap();
        assert_eq!(out.text(), "Summary of: Unemployment is high.");
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_nested_sequence_and_events() {
        let inner = Sequence::builder("inner")
            .push(append("x", "x"))
            .build()
            .unwrap();
        let outer = Sequence::builder("outer")
            .push(inner)
            .push(append("y", "y"))
            .build()
            .unwrap();

        let recorder = Arc::new(Recorder::default());
        let ctx = ExecCtx::builder("http://test")
            .event_handler(recorder.clone())
            .build();
        let out = outer.invoke(&ctx, json!("")).await.unwrap();
        assert_eq!(out.text(), "xy");

        let starts: Vec<_> = recorder
            .take()
            .into_iter()
            .filter_map(|e| match e {
                Event::StageStart { name, .. } => Some(name),
                _ => None,
            })
            .collect();
        assert_eq!(starts, ["outer", "inner", "x", "y"]);
    }

    #[tokio::test]
    async fn test_nested_error_path() {
        let inner = Sequence::builder("inner")
            .push(Lambda::new("bad", |_| Err(anyhow::anyhow!("boom"))))
            .build()
            .unwrap();
        let outer = Sequence::builder("outer").push(inner).build().unwrap();
        let err = outer.invoke(&test_ctx(), json!(null)).await.unwrap_err();
        assert_eq!(err.stage_path(), ["inner", "bad"]);
    }
}
