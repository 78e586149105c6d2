//! Demo: fan-out to two model calls, then merge.
//!
//! Notes and a quiz are generated concurrently from the same text. Once
//! both are ready, a third call merges them into one document.

use llm_chains::events::{Event, FnEventHandler};
use llm_chains::{ExecCtx, LlmCall, Parallel, Pipeline, Sequence};
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const TEXT: &str = "\
Support vector machines (SVMs) are a set of supervised learning methods used for classification, regression and outliers detection.

The advantages of support vector machines are:

Effective in high dimensional spaces.

Still effective in cases where number of dimensions is greater than the number of samples.

Uses a subset of training points in the decision function (called support vectors), so it is also memory efficient.

Versatile: different Kernel functions can be specified for the decision function. Common kernels are provided, but it is also possible to specify custom kernels.

The disadvantages of support vector machines include:

If the number of features is much greater than the number of samples, avoid over-fitting in choosing Kernel functions and regularization term is crucial.

SVMs do not directly provide probability estimates, these are calculated using an expensive five-fold cross-validation.
";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut ctx = ExecCtx::from_env()?;
    ctx.event_handler = Some(Arc::new(FnEventHandler(|event: Event| match event {
        Event::StageStart { name, kind } => eprintln!("[start] {} ({})", name, kind),
        Event::ParallelJoined { name, keys } => eprintln!("[joined] {} -> {:?}", name, keys),
        Event::StageEnd { name, ok } => eprintln!("[end] {} ok={}", name, ok),
        _ => {}
    })));

    let study = Parallel::builder("study-aids")
        .branch(
            "notes",
            LlmCall::new(
                "notes",
                "Generate short and simple notes from the following text \n {input}",
            )
            .expecting_raw(),
        )
        .branch(
            "quiz",
            LlmCall::new(
                "quiz",
                "Generate 5 short question answers from the following text \n {input}",
            )
            .expecting_raw(),
        )
        .build()?;

    let chain = Sequence::builder("notes-and-quiz")
        .push(study)
        .push(
            LlmCall::new(
                "merge",
                "Merge the provided notes and quiz into a single document \n notes -> {notes} and quiz -> {quiz}",
            )
            .expecting_raw(),
        )
        .build()?;
    let pipeline = Pipeline::new("parallel", chain);

    let document = pipeline.invoke(&ctx, json!(TEXT)).await?;
    println!("{}", document.text());
    Ok(())
}
