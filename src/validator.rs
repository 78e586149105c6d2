//! Schema validation of model output.
//!
//! A [`Schema`] is a plain serde type that also lists its fields. A
//! [`Validator`] checks raw model text (or an already-parsed value) against
//! that list and only then deserializes, so every failure names the field
//! at fault. Success is the only way to obtain a [`StructuredResult`].
//!
//! ```
//! use llm_chains::validator::{FieldSpec, Schema, Validator};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize, PartialEq)]
//! #[serde(rename_all = "lowercase")]
//! enum Sentiment {
//!     Positive,
//!     Negative,
//! }
//!
//! #[derive(Debug, Serialize, Deserialize, PartialEq)]
//! struct Feedback {
//!     sentiment: Sentiment,
//! }
//!
//! impl Schema for Feedback {
//!     fn fields() -> Vec<FieldSpec> {
//!         vec![FieldSpec::enumeration(
//!             "sentiment",
//!             "Give the sentiment of the feedback",
//!             &["positive", "negative"],
//!         )]
//!     }
//! }
//!
//! let validator = Validator::<Feedback>::new("feedback");
//! let ok = validator.parse(r#"{"sentiment": "positive"}"#).unwrap();
//! assert_eq!(ok.sentiment, Sentiment::Positive);
//!
//! let err = validator.parse(r#"{"sentiment": "neutral"}"#).unwrap_err();
//! assert_eq!(
//!     err.to_string(),
//!     "Schema violation on 'sentiment': 'neutral' is not one of: positive, negative"
//! );
//! ```

use crate::diagnostics::ParseDiagnostics;
use crate::error::Result;
use crate::exec_ctx::ExecCtx;
use crate::output_parser::{self, extract::preprocess};
use crate::stage::{observe, BoxFut, Stage, StageOutput};
use crate::PipelineError;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Map, Value};
use std::marker::PhantomData;
use std::ops::Deref;

/// Field name used for violations that concern the whole document.
pub const DOCUMENT: &str = "$";

/// JSON type of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    /// A string restricted to the listed literals.
    Enum(&'static [&'static str]),
}

/// One required field of a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub const fn string(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            kind: FieldKind::String,
        }
    }

    pub const fn number(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            kind: FieldKind::Number,
        }
    }

    pub const fn boolean(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            kind: FieldKind::Boolean,
        }
    }

    pub const fn enumeration(
        name: &'static str,
        description: &'static str,
        allowed: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            description,
            kind: FieldKind::Enum(allowed),
        }
    }

    /// Check one present, non-null value against this field.
    fn check(&self, value: &Value) -> Result<()> {
        let ok = match self.kind {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Enum(allowed) => {
                return match value.as_str() {
                    Some(s) if allowed.contains(&s) => Ok(()),
                    Some(s) => Err(PipelineError::schema(
                        self.name,
                        format!("'{}' is not one of: {}", s, allowed.join(", ")),
                    )),
                    None => Err(PipelineError::schema(
                        self.name,
                        format!("expected one of: {}, got {}", allowed.join(", "), json_type(value)),
                    )),
                }
            }
        };
        if ok {
            Ok(())
        } else {
            Err(PipelineError::schema(
                self.name,
                format!("expected {}, got {}", self.type_name(), json_type(value)),
            ))
        }
    }

    fn type_name(&self) -> &'static str {
        match self.kind {
            FieldKind::String | FieldKind::Enum(_) => "string",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
        }
    }

    fn json_schema(&self) -> Value {
        let mut prop = json!({
            "title": title_case(self.name),
            "description": self.description,
            "type": self.type_name(),
        });
        if let FieldKind::Enum(allowed) = self.kind {
            prop["enum"] = json!(allowed);
        }
        prop
    }
}

/// A structured output type with a declared field list.
///
/// Every declared field is required. Fields present in the input but not
/// declared are ignored. `fields()` must agree with the serde shape of the
/// type: same names, and for [`FieldKind::Enum`] the same literal set the
/// serde representation accepts.
pub trait Schema: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn fields() -> Vec<FieldSpec>;
}

/// A value that passed validation. Immutable; only a [`Validator`] makes one.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredResult<T> {
    inner: T,
}

impl<T> StructuredResult<T> {
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T> Deref for StructuredResult<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

/// Parses and validates model output into `T`.
pub struct Validator<T: Schema> {
    name: String,
    _schema: PhantomData<fn() -> T>,
}

impl<T: Schema> Validator<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _schema: PhantomData,
        }
    }

    /// Validate raw model text.
    ///
    /// Think blocks, code fences and surrounding prose are tolerated; the
    /// JSON object inside must satisfy every declared field.
    pub fn parse(&self, raw: &str) -> Result<StructuredResult<T>> {
        let cleaned = preprocess(raw);
        if cleaned.is_empty() {
            return Err(PipelineError::schema(DOCUMENT, "empty response"));
        }
        let candidate = output_parser::json::locate_json(&cleaned)
            .map_err(|e| PipelineError::schema(DOCUMENT, e.to_string()))?;
        let value: Value = serde_json::from_str(&candidate.json)
            .map_err(|e| PipelineError::schema(DOCUMENT, format!("invalid JSON: {}", e)))?;
        self.validate_value(&value)
    }

    /// Validate an already-parsed JSON value.
    pub fn validate_value(&self, value: &Value) -> Result<StructuredResult<T>> {
        let object = value.as_object().ok_or_else(|| {
            PipelineError::schema(
                DOCUMENT,
                format!("expected a JSON object, got {}", json_type(value)),
            )
        })?;

        for field in T::fields() {
            match object.get(field.name) {
                None | Some(Value::Null) => {
                    return Err(PipelineError::schema(field.name, "required field is missing"))
                }
                Some(v) => field.check(v)?,
            }
        }

        serde_json::from_value(value.clone())
            .map(|inner| StructuredResult { inner })
            .map_err(|e| PipelineError::schema(DOCUMENT, e.to_string()))
    }

    /// Serialize a value the way [`parse`](Self::parse) reads it back.
    pub fn render(&self, value: &T) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    /// JSON schema of `T`, built from its field list.
    pub fn json_schema(&self) -> Value {
        let fields = T::fields();
        let properties: Map<String, Value> = fields
            .iter()
            .map(|f| (f.name.to_string(), f.json_schema()))
            .collect();
        let required: Vec<&str> = fields.iter().map(|f| f.name).collect();
        json!({ "properties": properties, "required": required })
    }

    /// Prompt text telling a model how to format its answer.
    pub fn format_instructions(&self) -> String {
        format!(
            "The output should be formatted as a JSON instance that conforms to the JSON schema below.\n\n\
             As an example, for the schema {{\"properties\": {{\"foo\": {{\"title\": \"Foo\", \"description\": \"a list of strings\", \"type\": \"array\", \"items\": {{\"type\": \"string\"}}}}}}, \"required\": [\"foo\"]}}\n\
             the object {{\"foo\": [\"bar\", \"baz\"]}} is a well-formatted instance of the schema. \
             The object {{\"properties\": {{\"foo\": [\"bar\", \"baz\"]}}}} is not well-formatted.\n\n\
             Here is the output schema:\n```\n{}\n```",
            self.json_schema()
        )
    }

    /// Validate a stage input: strings are parsed as raw model text, any
    /// other value is checked as-is.
    pub fn check(&self, input: &Value) -> Result<StructuredResult<T>> {
        match input {
            Value::String(text) => self.parse(text),
            other => self.validate_value(other),
        }
    }

    fn validate_input(&self, input: &Value) -> Result<StageOutput> {
        let result = self.check(input)?;
        Ok(StageOutput {
            value: serde_json::to_value(&*result)?,
            raw_response: crate::prompt::value_text(input),
            thinking: None,
            model: None,
            diagnostics: Some(ParseDiagnostics {
                strategy: Some("schema"),
                ..Default::default()
            }),
        })
    }
}

impl<T: Schema> Clone for Validator<T> {
    fn clone(&self) -> Self {
        Self::new(self.name.clone())
    }
}

impl<T: Schema> std::fmt::Debug for Validator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("name", &self.name)
            .field("schema", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: Schema> Stage for Validator<T> {
    fn kind(&self) -> &'static str {
        "validator"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> BoxFut<'a, Result<StageOutput>> {
        Box::pin(observe(self, ctx, async move {
            ctx.check_cancelled()?;
            self.validate_input(&input)
        }))
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn title_case(name: &str) -> String {
    name.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            chars
                .next()
                .map(|c| c.to_uppercase().chain(chars).collect::<String>())
                .unwrap_or_default()
        })
        .collect::<Vec<_>>()
        .join(" ")
}
