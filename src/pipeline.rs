//! Named entry point for a composed stage graph.

use crate::{
    error::Result,
    exec_ctx::ExecCtx,
    stage::{observe, BoxFut, Stage, StageOutput},
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{event, Level};

/// A named root stage. The graph under it is fixed at construction.
///
/// Failures come back wrapped with the root stage's name, so
/// [`PipelineError::stage_path`](crate::PipelineError::stage_path) reads
/// from the root down to the stage that failed.
///
/// ```no_run
/// use llm_chains::{ExecCtx, LlmCall, Pipeline, Sequence};
/// use serde_json::json;
///
/// # async fn run() -> llm_chains::Result<()> {
/// let pipeline = Pipeline::new(
///     "report",
///     Sequence::builder("report-chain")
///         .push(LlmCall::new("report", "Generate a detailed report on {input}"))
///         .push(LlmCall::new("summary", "Generate a 5 pointer summary from the following text \n {input}"))
///         .build()?,
/// );
///
/// let ctx = ExecCtx::from_env()?;
/// let summary = pipeline.invoke(&ctx, json!("Unemployment in India")).await?;
/// println!("{}", summary.text());
/// # Ok(())
/// # }
/// ```
pub struct Pipeline {
    name: String,
    root: Box<dyn Stage>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, root: impl Stage + 'static) -> Self {
        Self {
            name: name.into(),
            root: Box::new(root),
        }
    }

    pub fn root(&self) -> &dyn Stage {
        &*self.root
    }

    /// Run the root stage on `input`.
    pub async fn invoke(&self, ctx: &ExecCtx, input: Value) -> Result<StageOutput> {
        ctx.check_cancelled()?;
        event!(Level::DEBUG, pipeline = %self.name, root = %self.root.name(), "Invoking pipeline.");
        self.root
            .invoke(ctx, input)
            .await
            .map_err(|e| e.in_stage(self.root.name()))
    }

    /// Run the pipeline and deserialize the final value into `T`.
    pub async fn invoke_as<T: DeserializeOwned>(&self, ctx: &ExecCtx, input: Value) -> Result<T> {
        self.invoke(ctx, input).await?.parse_as()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("root", &self.root.name())
            .field("root_kind", &self.root.kind())
            .finish()
    }
}

impl Stage for Pipeline {
    fn kind(&self) -> &'static str {
        "pipeline"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> BoxFut<'a, Result<StageOutput>> {
        Box::pin(observe(self, ctx, Pipeline::invoke(self, ctx, input)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::sequence::Sequence;
    use crate::stage::Lambda;
    use crate::PipelineError;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn test_ctx() -> ExecCtx {
        ExecCtx::builder("http://test").build()
    }

    #[tokio::test]
    async fn test_invoke_as() {
        let pipeline = Pipeline::new(
            "count",
            Lambda::new("len", |v| Ok(json!(v.as_str().unwrap_or("").len()))),
        );
        assert_eq!(pipeline.root().kind(), "lambda");
        let n: usize = pipeline.invoke_as(&test_ctx(), json!("four")).await.unwrap();
        assert_eq!(n, 4);

        let err = pipeline
            .invoke_as::<Vec<String>>(&test_ctx(), json!("x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Call);
    }

    #[tokio::test]
    async fn test_error_path_starts_at_root() {
        let root = Sequence::builder("steps")
            .push(Lambda::identity("ok"))
            .push(Lambda::new("broken", |_| Err(anyhow::anyhow!("no reply"))))
            .build()
            .unwrap();
        let pipeline = Pipeline::new("demo", root);
        let err = pipeline.invoke(&test_ctx(), json!(null)).await.unwrap_err();
        assert_eq!(err.stage_path(), ["steps", "broken"]);
        assert!(matches!(err.root(), PipelineError::CallFailure(m) if m == "no reply"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let ctx = ExecCtx::builder("http://test")
            .cancellation(Some(Arc::new(AtomicBool::new(true))))
            .build();
        let pipeline = Pipeline::new("p", Lambda::identity("id"));
        let err = pipeline.invoke(&ctx, json!(1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_pipeline_nests_as_stage() {
        let inner = Pipeline::new("inner", Lambda::identity("id"));
        let outer = Pipeline::new("outer", inner);
        let out = Stage::invoke(&outer, &test_ctx(), json!("v")).await.unwrap();
        assert_eq!(out.text(), "v");
        assert_eq!(Stage::kind(&outer), "pipeline");
    }
}
