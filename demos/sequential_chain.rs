//! Demo: a two-step sequential chain.
//!
//! Writes a detailed report on a topic, then condenses that report into a
//! five point summary. Replies are passed on as raw text, so a report
//! that happens to contain JSON reaches the next prompt unchanged.
//! Configure the backend through `.env` or the
//! `LLM_*` environment variables (see `EnvConfig`).

use llm_chains::{ExecCtx, LlmCall, Pipeline, Sequence};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let ctx = ExecCtx::from_env()?;

    let chain = Sequence::builder("report-then-summary")
        .push(LlmCall::new("report", "Generate a detailed report on {input}").expecting_raw())
        .push(
            LlmCall::new(
                "summary",
                "Generate a 5 pointer summary from the following text \n {input}",
            )
            .expecting_raw(),
        )
        .build()?;
    let pipeline = Pipeline::new("sequential", chain);

    let summary = pipeline.invoke(&ctx, json!("Unemployment in India")).await?;
    println!("{}", summary.text());
    Ok(())
}
