//! # LLM Chains
//!
//! Composable model-call stages: sequential chains, concurrent fan-out
//! with fan-in, and schema-validated conditional branching.
//!
//! ## Core Concepts
//!
//! - **[`Stage`]**: object-safe trait for anything runnable. Takes a
//!   `serde_json::Value` input, returns a [`StageOutput`].
//! - **[`LlmCall`]**: renders a prompt, calls the configured backend and
//!   parses the reply.
//! - **[`Lambda`]**: a pure transformation between model calls.
//! - **[`Validator`]**: turns raw model text into a typed
//!   [`StructuredResult`] or a [`PipelineError::SchemaViolation`] naming
//!   the field at fault.
//! - **[`Sequence`]**, **[`Parallel`]**, **[`Branch`]**: combinators, each
//!   itself a [`Stage`], so they nest freely.
//! - **[`Pipeline`]**: a named root stage with typed extraction.
//! - **[`ExecCtx`]**: shared execution context (backend, HTTP client,
//!   template vars, cancellation, optional event handler).
//!
//! ## Quick Start
//!
//! ```no_run
//! use llm_chains::{ExecCtx, LlmCall, Parallel, Pipeline, Sequence};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = ExecCtx::from_env()?;
//!
//!     let study = Parallel::builder("study")
//!         .branch("notes", LlmCall::new("notes", "Generate short and simple notes from the following text \n {input}"))
//!         .branch("quiz", LlmCall::new("quiz", "Generate 5 short question answers from the following text \n {input}"))
//!         .build()?;
//!
//!     let pipeline = Pipeline::new(
//!         "study-doc",
//!         Sequence::builder("study-chain")
//!             .push(study)
//!             .push(LlmCall::new(
//!                 "merge",
//!                 "Merge the provided notes and quiz into a single document \n notes -> {notes} and quiz -> {quiz}",
//!             ))
//!             .build()?,
//!     );
//!
//!     let doc = pipeline.invoke(&ctx, json!("Support vector machines ...")).await?;
//!     println!("{}", doc.text());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod branch;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod exec_ctx;
pub mod llm_call;
pub mod output_parser;
pub mod output_strategy;
pub mod parallel;
pub mod pipeline;
pub mod prompt;
pub mod sequence;
pub mod stage;
pub mod validator;

pub use backend::{Backend, LlmRequest, LlmResponse, MockBackend, OllamaBackend};
#[cfg(feature = "openai")]
pub use backend::OpenAiBackend;
pub use branch::{Branch, BranchBuilder, Route};
pub use config::{BackendKind, EnvConfig, LlmConfig};
pub use diagnostics::ParseDiagnostics;
pub use error::{ErrorKind, PipelineError, Result};
pub use events::{Event, EventHandler, FnEventHandler};
pub use exec_ctx::{ExecCtx, ExecCtxBuilder};
pub use llm_call::LlmCall;
pub use output_strategy::OutputStrategy;
pub use parallel::{Parallel, ParallelBuilder, ParallelResult};
pub use pipeline::Pipeline;
pub use sequence::{Sequence, SequenceBuilder};
pub use stage::{BoxFut, Lambda, Stage, StageOutput};
pub use validator::{FieldKind, FieldSpec, Schema, StructuredResult, Validator};
