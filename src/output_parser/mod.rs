//! # Model Output Parsing
//!
//! Helpers that turn raw model text into values without another model call.
//! They handle think blocks, markdown fences and prose around JSON.
//!
//! | Function | Use Case |
//! |----------|----------|
//! | [`parse_json`] | Extract a typed JSON value |
//! | [`parse_json_value`] | Extract untyped JSON |
//! | [`parse_value_lossy`] | JSON if present, otherwise the text itself |
//! | [`parse_text`] | Clean prose (the plain string parser) |
//! | [`strip_think_tags`] | Remove `<think>` blocks |
//! | [`split_thinking`] | Separate `<think>` content from the answer |

pub mod error;
pub mod extract;
pub mod json;
pub mod text;

pub use error::ParseError;
pub use extract::{preprocess, split_thinking, strip_think_tags};
pub use json::{parse_json, parse_json_value, parse_value_lossy};
pub use text::parse_text;
