//! Demo: classify feedback, then branch on the validated sentiment.
//!
//! The classifier is told the exact JSON shape to produce. Its reply is
//! validated into `Feedback`; a positive or negative responder is chosen
//! from the sentiment, with a fixed fallback reply otherwise.

use llm_chains::{
    Branch, ExecCtx, FieldSpec, Lambda, LlmCall, Pipeline, Schema, Sequence, Validator,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing_subscriber::EnvFilter;

const FEEDBACK: &str = "This is a beautiful phone";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Sentiment {
    Positive,
    Negative,
}

#[derive(Debug, Serialize, Deserialize)]
struct Feedback {
    sentiment: Sentiment,
}

impl Schema for Feedback {
    fn fields() -> Vec<FieldSpec> {
        vec![FieldSpec::enumeration(
            "sentiment",
            "Give the sentiment of the feedback",
            &["positive", "negative"],
        )]
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Responders read the feedback from the context; the branch passes
    // them only the classification.
    let mut ctx = ExecCtx::from_env()?;
    ctx.vars.insert("feedback".to_string(), FEEDBACK.to_string());

    let validator = Validator::<Feedback>::new("sentiment");
    let classify = LlmCall::new(
        "classify",
        "Classify the sentiment of the following feedback text into postive or negative \n {input} \n {format_instructions}",
    )
    .with_format_instructions(&validator);

    let respond = Branch::<Feedback>::builder("respond")
        .when(
            |f| f.sentiment == Sentiment::Positive,
            LlmCall::new(
                "positive-reply",
                "Write an appropriate response to this positive feedback \n {feedback}",
            )
            .expecting_raw(),
        )
        .when(
            |f| f.sentiment == Sentiment::Negative,
            LlmCall::new(
                "negative-reply",
                "Write an appropriate response to this negative feedback \n {feedback}",
            )
            .expecting_raw(),
        )
        .otherwise(Lambda::constant("fallback", json!("could not find sentiment")))
        .build()?;

    let chain = Sequence::builder("classify-and-respond")
        .push(classify)
        .push(validator)
        .push(respond)
        .build()?;
    let pipeline = Pipeline::new("conditional", chain);

    let reply = pipeline.invoke(&ctx, json!(FEEDBACK)).await?;
    println!("{}", reply.text());
    Ok(())
}
