use impc_isa::Label;
use thiserror::Error;

use crate::diag::Diagnostic;
use crate::span::{SourceId, Span};

/// Fatal code-generation errors.
///
/// Generation aborts on the first one; there is no recovery tier and no
/// warnings. `UnresolvedLabel` is an internal invariant violation (a
/// generator bug), never a user error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodegenError {
    #[error("duplicate declaration of '{name}'")]
    DuplicateDeclaration { name: String, span: Span },

    #[error("undeclared variable '{name}'")]
    UndeclaredVariable { name: String, span: Span },

    #[error("invalid array range [{start}:{end}] for '{name}'")]
    InvalidArrayRange {
        name: String,
        start: u64,
        end: u64,
        span: Span,
    },

    #[error("call to unknown procedure '{name}'")]
    UnknownProcedure { name: String, span: Span },

    #[error("call to '{name}' does not match its parameter list: {details}")]
    ArgumentMismatch {
        name: String,
        details: String,
        span: Span,
    },

    #[error("'{name}' is a loop iterator and cannot be written to")]
    AssignToIterator { name: String, span: Span },

    #[error("'{name}' is an array and needs an index here")]
    NotAScalar { name: String, span: Span },

    #[error("'{name}' is not an array")]
    NotAnArray { name: String, span: Span },

    #[error("internal error: jump references label {label} which was never marked")]
    UnresolvedLabel { label: Label },
}

impl CodegenError {
    pub fn span(&self) -> Option<Span> {
        match self {
            CodegenError::DuplicateDeclaration { span, .. }
            | CodegenError::UndeclaredVariable { span, .. }
            | CodegenError::InvalidArrayRange { span, .. }
            | CodegenError::UnknownProcedure { span, .. }
            | CodegenError::ArgumentMismatch { span, .. }
            | CodegenError::AssignToIterator { span, .. }
            | CodegenError::NotAScalar { span, .. }
            | CodegenError::NotAnArray { span, .. } => Some(*span),
            CodegenError::UnresolvedLabel { .. } => None,
        }
    }

    pub fn to_diagnostic(&self, source_id: SourceId) -> Diagnostic {
        let span = self.span().unwrap_or_else(|| Span::top(source_id));
        let diagnostic = Diagnostic::error(span, self.to_string());
        match self {
            CodegenError::DuplicateDeclaration { name, .. } => diagnostic.with_note(format!(
                "'{name}' already exists in this scope; shadowing requires a new scope"
            )),
            CodegenError::UnresolvedLabel { .. } => {
                diagnostic.with_note("this is a bug in the code generator, not in the program")
            }
            _ => diagnostic,
        }
    }
}
