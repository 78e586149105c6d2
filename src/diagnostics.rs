//! Parse diagnostics for model output.
//!
//! [`ParseDiagnostics`] records which output strategy turned raw model text
//! into a value and whether that succeeded.

/// Records what happened during output parsing.
///
/// Attached to every [`StageOutput`](crate::stage::StageOutput) produced by
/// [`LlmCall`](crate::llm_call::LlmCall) and
/// [`Validator`](crate::validator::Validator).
///
/// # Example
///
/// ```
/// use llm_chains::diagnostics::ParseDiagnostics;
///
/// let diag = ParseDiagnostics::default();
/// assert!(diag.ok()); // No parse_error means success
/// ```
#[derive(Debug, Clone, Default)]
pub struct ParseDiagnostics {
    /// Which parse strategy produced the value.
    /// e.g. `"lossy"`, `"json"`, `"text"`, `"custom"`, `"schema"`.
    pub strategy: Option<&'static str>,

    /// If parsing failed, the error message. `None` means success.
    pub parse_error: Option<String>,

    /// Whether the JSON had to be dug out of surrounding prose or a code fence.
    pub extracted: bool,
}

impl ParseDiagnostics {
    /// Quick check: did parsing succeed?
    pub fn ok(&self) -> bool {
        self.parse_error.is_none()
    }
}
