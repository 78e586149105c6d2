use std::time::Duration;
use thiserror::Error;

/// Errors produced by stages, combinators and backends.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON handling failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error with status code, response body, and optional Retry-After hint.
    ///
    /// Returned by [`Backend`](crate::backend::Backend) implementations when
    /// the provider returns a non-success status code. The hint is surfaced
    /// for callers that implement their own retry policy; nothing in this
    /// crate retries.
    #[error("HTTP {status}: {body}")]
    HttpError {
        /// HTTP status code (e.g. 429, 500, 503).
        status: u16,
        /// Response body text.
        body: String,
        /// Parsed `Retry-After` header value, if present.
        retry_after: Option<Duration>,
    },

    /// An external call (model request or transformation) did not complete.
    #[error("Call failed: {0}")]
    CallFailure(String),

    /// Structured output did not satisfy the declared schema.
    #[error("Schema violation on '{field}': {reason}")]
    SchemaViolation {
        /// Offending field, or `"$"` for the document as a whole.
        field: String,
        /// Human-readable description of the mismatch.
        reason: String,
    },

    /// A combinator was assembled in an invalid shape.
    #[error("Invalid pipeline construction: {0}")]
    Construction(String),

    /// A nested stage failed. `stage` is the step name (Sequence), branch
    /// key (Parallel) or selected arm (Branch) that contained the failure.
    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        stage: String,
        #[source]
        source: Box<PipelineError>,
    },

    /// The invocation was cancelled via the cancellation flag.
    #[error("Pipeline was cancelled")]
    Cancelled,

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

/// Coarse classification of a [`PipelineError`], stable across nesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An external call failed (transport, HTTP status, lambda error).
    Call,
    /// Output did not match the schema.
    Schema,
    /// The pipeline was assembled incorrectly.
    Construction,
    /// The invocation was cancelled.
    Cancelled,
}

impl PipelineError {
    /// Shorthand for a [`PipelineError::SchemaViolation`].
    pub fn schema(field: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::SchemaViolation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Classify the error. Wrapping by combinators never changes the kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::StageFailed { source, .. } => source.kind(),
            PipelineError::SchemaViolation { .. } => ErrorKind::Schema,
            PipelineError::Construction(_) => ErrorKind::Construction,
            PipelineError::Cancelled => ErrorKind::Cancelled,
            PipelineError::Request(_)
            | PipelineError::Json(_)
            | PipelineError::HttpError { .. }
            | PipelineError::CallFailure(_)
            | PipelineError::Other(_) => ErrorKind::Call,
        }
    }

    /// The innermost (originating) error.
    pub fn root(&self) -> &PipelineError {
        match self {
            PipelineError::StageFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Names of the stages enclosing the failure, outermost first.
    pub fn stage_path(&self) -> Vec<&str> {
        let mut path = Vec::new();
        let mut current = self;
        while let PipelineError::StageFailed { stage, source } = current {
            path.push(stage.as_str());
            current = source;
        }
        path
    }

    /// Attach the name of the enclosing stage. Cancellation is not wrapped.
    pub(crate) fn in_stage(self, stage: impl Into<String>) -> Self {
        match self {
            PipelineError::Cancelled => PipelineError::Cancelled,
            other => PipelineError::StageFailed {
                stage: stage.into(),
                source: Box::new(other),
            },
        }
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::CallFailure(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
