//! Error types for the inference engine
//!
//! Every error is fatal to the current run; there is no local recovery.
//! Variants carry the span of the provoking IR node plus rendered type
//! context so callers can build diagnostics.

use thiserror::Error;

use crate::term::Span;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("type mismatch: expected {expected}, found {found}")]
    UnifyMismatch {
        expected: String,
        found: String,
        span: Span,
    },

    #[error("occurs check failed: {var} occurs in {ty}")]
    OccursCheck { var: String, ty: String, span: Span },

    #[error("impredicative type: quantifier under a constructor in {ty}")]
    Impredicative { ty: String, span: Span },

    #[error("unbound variable: {name} (index {index})")]
    UnboundVariable {
        name: String,
        index: usize,
        span: Span,
    },

    #[error("top-level reference cannot be inferred here: {name}")]
    UnsupportedTopLevel { name: String, span: Span },

    #[error("type variable {var} escaped generalization")]
    EscapedVariable { var: String, span: Span },

    #[error("row variable {var} is linked to the non-row type {ty}")]
    RowLink { var: String, ty: String, span: Span },

    #[error("unsupported term: {what}")]
    Unsupported { what: String, span: Span },
}

impl TypeError {
    /// The source span of the node that provoked the error.
    pub fn span(&self) -> &Span {
        match self {
            TypeError::UnifyMismatch { span, .. }
            | TypeError::OccursCheck { span, .. }
            | TypeError::Impredicative { span, .. }
            | TypeError::UnboundVariable { span, .. }
            | TypeError::UnsupportedTopLevel { span, .. }
            | TypeError::EscapedVariable { span, .. }
            | TypeError::RowLink { span, .. }
            | TypeError::Unsupported { span, .. } => span,
        }
    }
}
