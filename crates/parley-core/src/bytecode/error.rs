//! Compiler error types

use std::fmt;

use thiserror::Error;

use crate::ast::Location;

/// A compilation diagnostic with source location
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    /// The kind of error
    pub kind: CompileErrorKind,

    /// Source file the error was found in
    pub path: String,

    /// Source location
    pub loc: Location,

    /// Optional hint for fixing the error
    pub hint: Option<String>,
}

impl CompileError {
    /// Create a new compile error
    #[must_use]
    pub fn new(kind: CompileErrorKind, path: impl Into<String>, loc: Location) -> Self {
        Self {
            kind,
            path: path.into(),
            loc,
            hint: None,
        }
    }

    /// Add a hint to the error
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.path, self.loc, self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {hint}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {}

/// The kind of compilation error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileErrorKind {
    /// A name resolved to no local, capture, global, import or builtin
    #[error("unresolved symbol '{0}'")]
    UnresolvedSymbol(String),

    #[error("too many constants in one chunk (max 65536)")]
    TooManyConstants,

    #[error("too many symbols referenced from one chunk (max 65536)")]
    TooManySymbols,

    #[error("too many local variables in one function (max 256)")]
    TooManyLocals,

    #[error("too many captured variables in one closure (max 256)")]
    TooManyCaptures,

    #[error("too many parameters (max 255)")]
    TooManyParameters,

    #[error("too many arguments (max 255)")]
    TooManyArguments,

    #[error("too many properties in struct '{0}' (max 256)")]
    TooManyProperties(String),

    #[error("too many cases in enum '{0}' (max 256)")]
    TooManyCases(String),

    #[error("jump offset too large (code too far apart)")]
    JumpTooLarge,

    #[error("invalid assignment target")]
    InvalidAssignmentTarget,

    #[error("type {ty} has no member '{name}'")]
    UnknownMember { ty: String, name: String },

    #[error("'{callee}' has no parameter labelled '{label}'")]
    UnknownArgumentLabel { callee: String, label: String },

    #[error("argument '{label}' given twice in call to '{callee}'")]
    DuplicateArgumentLabel { callee: String, label: String },

    #[error("case '{case}' has {expected} associated values, got {got}")]
    CaseArityMismatch {
        case: String,
        expected: usize,
        got: usize,
    },

    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("'self' can only be used inside a method")]
    SelfOutsideMethod,

    #[error("'break' can only be used inside a loop")]
    BreakOutsideLoop,

    #[error("'continue' can only be used inside a loop")]
    ContinueOutsideLoop,

    #[error("{0} declarations are only allowed at file scope")]
    NestedDeclaration(&'static str),

    #[error("'{0}' names a type, not a value")]
    TypeUsedAsValue(String),

    /// A tree shape the analyzer should never produce
    #[error("internal compiler error: {0}")]
    Internal(String),
}

/// Result type for compilation operations
pub type CompileResult<T> = Result<T, CompileError>;
