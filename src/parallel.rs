//! Concurrent fan-out and fan-in.
//!
//! [`Parallel`] hands a clone of its input to every branch, polls all of
//! them concurrently inside the calling task, and joins their outputs into
//! a [`ParallelResult`] keyed by branch name. Nothing is spawned, so no
//! branch outlives the join.

use crate::{
    error::Result,
    events::{emit, Event},
    exec_ctx::ExecCtx,
    stage::{observe, BoxFut, Stage, StageOutput},
    PipelineError,
};
use futures::{future, stream, FutureExt, StreamExt, TryStreamExt};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{event, Level};

/// Joined outputs of a [`Parallel`] stage, sorted by key.
#[derive(Debug, Clone, Default)]
pub struct ParallelResult {
    outputs: BTreeMap<String, StageOutput>,
}

impl ParallelResult {
    pub fn get(&self, key: &str) -> Option<&StageOutput> {
        self.outputs.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.outputs.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StageOutput)> {
        self.outputs.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// The branch values as one JSON object.
    pub fn to_value(&self) -> Value {
        let map: Map<String, Value> = self
            .outputs
            .iter()
            .map(|(k, out)| (k.clone(), out.value.clone()))
            .collect();
        Value::Object(map)
    }

    pub fn into_outputs(self) -> BTreeMap<String, StageOutput> {
        self.outputs
    }
}

impl From<ParallelResult> for StageOutput {
    fn from(result: ParallelResult) -> Self {
        StageOutput::from_value(result.to_value())
    }
}

/// Branches that run concurrently on the same input.
///
/// Output is produced only after every branch succeeds. The first failure
/// fails the whole stage, wrapped with the failing branch's key and then
/// its stage name (once, when the two match); the other branch futures
/// are dropped.
///
/// # Example
///
/// ```no_run
/// use llm_chains::{ExecCtx, LlmCall, Parallel};
/// use serde_json::json;
///
/// # async fn run() -> llm_chains::Result<()> {
/// let study = Parallel::builder("study-aids")
///     .branch("notes", LlmCall::new("notes", "Generate short and simple notes from the following text \n {input}"))
///     .branch("quiz", LlmCall::new("quiz", "Generate 5 short question answers from the following text \n {input}"))
///     .build()?;
///
/// let ctx = ExecCtx::builder("http://localhost:11434").build();
/// let joined = study.execute(&ctx, json!("Support vector machines ...")).await?;
/// println!("{}", joined.get("quiz").map(|o| o.text()).unwrap_or_default());
/// # Ok(())
/// # }
/// ```
pub struct Parallel {
    name: String,
    branches: Vec<(String, Box<dyn Stage>)>,
    max_concurrency: Option<usize>,
}

impl Parallel {
    pub fn builder(name: impl Into<String>) -> ParallelBuilder {
        ParallelBuilder {
            name: name.into(),
            branches: Vec::new(),
            max_concurrency: None,
        }
    }

    /// Branch keys in declaration order.
    pub fn keys(&self) -> Vec<&str> {
        self.branches.iter().map(|(k, _)| k.as_str()).collect()
    }

    /// Run every branch and join the outputs.
    pub async fn execute(&self, ctx: &ExecCtx, input: Value) -> Result<ParallelResult> {
        ctx.check_cancelled()?;
        event!(
            Level::DEBUG,
            branches = self.branches.len(),
            limit = ?self.max_concurrency,
            "Fanning out."
        );

        let runs: Vec<BoxFut<'_, Result<(String, StageOutput)>>> = self
            .branches
            .iter()
            .map(|(key, stage)| {
                let input = input.clone();
                async move {
                    let output = stage
                        .invoke(ctx, input)
                        .await
                        .map_err(|e| branch_error(e, key, stage.name()))?;
                    Ok::<_, PipelineError>((key.clone(), output))
                }
                .boxed()
            })
            .collect();

        let joined: Vec<(String, StageOutput)> = match self.max_concurrency {
            Some(limit) => stream::iter(runs).buffer_unordered(limit).try_collect().await?,
            None => future::try_join_all(runs).await?,
        };

        let result = ParallelResult {
            outputs: joined.into_iter().collect(),
        };
        event!(Level::DEBUG, keys = ?result.keys().collect::<Vec<_>>(), "Branches joined.");
        emit(
            &ctx.event_handler,
            Event::ParallelJoined {
                name: self.name.clone(),
                keys: result.keys().map(str::to_string).collect(),
            },
        );
        Ok(result)
    }
}

/// Wrap a branch failure with the stage name, then the branch key.
fn branch_error(err: PipelineError, key: &str, stage: &str) -> PipelineError {
    if key == stage {
        err.in_stage(key)
    } else {
        err.in_stage(stage).in_stage(key)
    }
}

impl std::fmt::Debug for Parallel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parallel")
            .field("name", &self.name)
            .field("keys", &self.keys())
            .field("max_concurrency", &self.max_concurrency)
            .finish()
    }
}

impl Stage for Parallel {
    fn kind(&self) -> &'static str {
        "parallel"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> BoxFut<'a, Result<StageOutput>> {
        Box::pin(observe(self, ctx, async move {
            self.execute(ctx, input).await.map(StageOutput::from)
        }))
    }
}

/// Builder for [`Parallel`].
pub struct ParallelBuilder {
    name: String,
    branches: Vec<(String, Box<dyn Stage>)>,
    max_concurrency: Option<usize>,
}

impl ParallelBuilder {
    /// Add a branch under `key`. Keys must be unique.
    pub fn branch(mut self, key: impl Into<String>, stage: impl Stage + 'static) -> Self {
        self.branches.push((key.into(), Box::new(stage)));
        self
    }

    /// Limit how many branches are in flight at once.
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    pub fn build(self) -> Result<Parallel> {
        if self.branches.is_empty() {
            return Err(PipelineError::Construction(format!(
                "parallel '{}' needs at least one branch",
                self.name
            )));
        }
        for (i, (key, _)) in self.branches.iter().enumerate() {
            if self.branches[..i].iter().any(|(k, _)| k == key) {
                return Err(PipelineError::Construction(format!(
                    "parallel '{}' has duplicate branch key '{}'",
                    self.name, key
                )));
            }
        }
        if self.max_concurrency == Some(0) {
            return Err(PipelineError::Construction(format!(
                "parallel '{}' max_concurrency must be at least 1",
                self.name
            )));
        }
        Ok(Parallel {
            name: self.name,
            branches: self.branches,
            max_concurrency: self.max_concurrency,
        })
    }
}
