//! # Templates
//!
//! A small logic-bearing template language used by webhooks and constraint inputs.
//!
//! Blocks are written as `{{ expr }}` for interpolation and
//! `{{ if expr }} ... {{ else }} ... {{ end }}` for conditionals. Expressions support
//! literals, dotted field paths, `==`, `!=`, `and`, `or`, `not`, parentheses and the
//! functions `to_json`, `default`, `upper` and `lower`.
//!
//! Interpolated strings are inserted verbatim, `null` renders as `null`, and objects
//! or arrays render as JSON text, so `"{{ source.id }}"` and `{{ to_json(value) }}` both
//! produce valid JSON documents.
//!
//! Rendering is a pure function of the template and the context it is given.

pub mod context;
pub mod expression;
pub mod renderer;
pub mod template;

use thiserror::Error;

pub use context::{
    AssignmentView, ContextShape, CustomerView, FormationView, ParticipantView, ResourceView,
    ResponseContext, StatusReportView, TemplateContext,
};
pub use expression::{is_truthy, Expr, Resolve};
pub use renderer::{NotificationTarget, OutputRule, ResponseOutcome, TemplateRenderer};
pub use template::Template;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("Template parse error near '{near}': {message}")]
    Parse { message: String, near: String },

    #[error("Unknown template field: {path}")]
    UnknownField { path: String },

    #[error("No value for template field: {path}")]
    MissingField { path: String },

    #[error("Rendered {artifact} is not valid JSON: {message}")]
    InvalidJson { artifact: String, message: String },

    #[error("Invalid argument to {function}: {message}")]
    TypeMismatch { function: String, message: String },
}

impl RenderError {
    pub(crate) fn parse(message: impl Into<String>, near: &str) -> Self {
        Self::Parse {
            message: message.into(),
            near: near.chars().take(40).collect(),
        }
    }

    pub(crate) fn unknown(path: &[String]) -> Self {
        Self::UnknownField {
            path: path.join("."),
        }
    }

    pub(crate) fn missing(path: &[String]) -> Self {
        Self::MissingField {
            path: path.join("."),
        }
    }

    pub(crate) fn invalid_json(artifact: &str, message: impl ToString) -> Self {
        Self::InvalidJson {
            artifact: artifact.to_string(),
            message: message.to_string(),
        }
    }
}

pub type RenderResult<T> = Result<T, RenderError>;
