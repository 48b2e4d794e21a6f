use std::fmt;

use serde::Serialize;

use crate::token::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EvalErrorKind {
    UndefinedVariable,
    Type,
    MissingAttribute,
    DivisionByZero,
    AssertionFailed,
    /// `throw`
    Thrown,
    InfiniteRecursion,
    StackOverflow,
    /// `abort`
    Aborted,
    Internal,
}

impl EvalErrorKind {
    /// Fatal errors abort the whole run instead of being recorded per value.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            EvalErrorKind::StackOverflow | EvalErrorKind::Aborted | EvalErrorKind::Internal
        )
    }

    pub fn category(self) -> ErrorCategory {
        match self {
            EvalErrorKind::UndefinedVariable => ErrorCategory::UndefinedVariable,
            EvalErrorKind::Type | EvalErrorKind::MissingAttribute | EvalErrorKind::DivisionByZero => {
                ErrorCategory::Type
            }
            EvalErrorKind::AssertionFailed | EvalErrorKind::Thrown => ErrorCategory::Assertion,
            EvalErrorKind::InfiniteRecursion
            | EvalErrorKind::StackOverflow
            | EvalErrorKind::Aborted
            | EvalErrorKind::Internal => ErrorCategory::Fatal,
        }
    }
}

/// Stable, user facing grouping of every error the toolchain can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCategory {
    Syntax,
    UndefinedVariable,
    Type,
    Assertion,
    Fatal,
}

impl ErrorCategory {
    pub fn code(self) -> &'static str {
        match self {
            ErrorCategory::Syntax => "lazen_syntax_error",
            ErrorCategory::UndefinedVariable => "lazen_undefined_variable",
            ErrorCategory::Type => "lazen_type_error",
            ErrorCategory::Assertion => "lazen_assertion_failed",
            ErrorCategory::Fatal => "lazen_fatal_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub message: String,
    pub span: Option<Span>,
}

impl EvalError {
    pub fn new(kind: EvalErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::Internal, message)
    }

    /// Attach a location unless a more precise one is already known.
    pub fn at(mut self, span: Span) -> Self {
        if self.span.is_none() {
            self.span = Some(span);
        }
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.span {
            Some(span) => write!(f, "{} at {}", self.message, span),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for EvalError {}
