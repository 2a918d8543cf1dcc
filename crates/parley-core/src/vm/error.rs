//! Runtime traps raised by the Parley virtual machine

use std::fmt;

use thiserror::Error;

use super::heap::HeapError;

/// A trap: the run-time error that halted the VM
///
/// Carries the chunk, instruction offset and source line of the faulting
/// instruction, plus the call stack at the point of failure (innermost
/// frame first).
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    /// The kind of error
    pub kind: RuntimeErrorKind,

    /// Name of the chunk that was executing
    pub chunk: String,

    /// Offset of the faulting instruction
    pub offset: usize,

    /// Source line of the faulting instruction
    pub line: u32,

    /// Stack trace at the point of error
    pub stack_trace: Vec<StackFrame>,
}

impl RuntimeError {
    /// Create an error with no location; the VM fills it in when raising
    #[must_use]
    pub fn new(kind: RuntimeErrorKind) -> Self {
        Self {
            kind,
            chunk: String::new(),
            offset: 0,
            line: 0,
            stack_trace: Vec::new(),
        }
    }

    /// Add stack trace frames
    #[must_use]
    pub fn with_trace(mut self, trace: Vec<StackFrame>) -> Self {
        self.stack_trace = trace;
        self
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RuntimeError: {} (in {} at {:04}, line {})",
            self.kind, self.chunk, self.offset, self.line
        )?;
        if !self.stack_trace.is_empty() {
            write!(f, "\nStack trace:")?;
            for frame in &self.stack_trace {
                write!(f, "\n  at {frame}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

/// A frame in a stack trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Chunk name
    pub chunk: String,

    /// Offset of the instruction being executed
    pub offset: usize,

    /// Source line
    pub line: u32,

    /// Source file, if known
    pub source: Option<String>,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{} ({source}:{})", self.chunk, self.line),
            None => write!(f, "{} (line {})", self.chunk, self.line),
        }
    }
}

/// The kind of runtime error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    /// An operation received an operand of the wrong kind
    #[error("type mismatch: {operation} expected {expected}, got {got}")]
    TypeMismatch {
        expected: &'static str,
        got: &'static str,
        operation: &'static str,
    },

    #[error("property '{property}' of {type_name} read before initialization")]
    UninitializedProperty { type_name: String, property: String },

    #[error("value of type {0} is not callable")]
    NotCallable(&'static str),

    #[error("{callee} expects {expected} arguments, got {got}")]
    ArityMismatch {
        callee: String,
        expected: u8,
        got: u8,
    },

    #[error("stack underflow")]
    StackUnderflow,

    #[error("stack overflow")]
    StackOverflow,

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow in {0}")]
    IntegerOverflow(&'static str),

    #[error("index {index} out of bounds for length {length}")]
    IndexOutOfBounds { index: i64, length: usize },

    #[error("allocation of {requested} slots exceeds the limit of {limit}")]
    AllocationTooLarge { requested: usize, limit: usize },

    #[error("key {0} not found")]
    KeyNotFound(String),

    /// Use of a freed block or a stale handle
    #[error("dangling pointer: {0}")]
    DanglingPointer(String),

    /// A symbol that is absent from the module graph; the compiler rejects
    /// these, so reaching one means the module was assembled by hand
    #[error("unresolved symbol {0}")]
    UnresolvedSymbol(String),

    #[error("no method '{method}' on {type_name}")]
    UnknownMethod { type_name: String, method: String },

    #[error("invalid opcode {0:#04x}")]
    InvalidOpcode(u8),

    /// The module handed to the VM has diagnostics or no entry chunk
    #[error("module '{0}' is not executable")]
    NotExecutable(String),

    #[error("internal VM error: {0}")]
    Internal(String),
}

impl From<HeapError> for RuntimeErrorKind {
    fn from(error: HeapError) -> Self {
        match error {
            HeapError::UninitializedProperty {
                type_name,
                property,
            } => RuntimeErrorKind::UninitializedProperty {
                type_name,
                property,
            },
            HeapError::OutOfBounds { offset, capacity } => RuntimeErrorKind::IndexOutOfBounds {
                index: offset as i64,
                length: capacity,
            },
            HeapError::DanglingHandle(_) | HeapError::UninitializedSlot { .. } => {
                RuntimeErrorKind::DanglingPointer(error.to_string())
            }
            HeapError::BlockTooLarge { requested, limit } => {
                RuntimeErrorKind::AllocationTooLarge { requested, limit }
            }
            HeapError::NoSuchProperty { .. } => RuntimeErrorKind::Internal(error.to_string()),
        }
    }
}

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_trace() {
        let error = RuntimeError {
            kind: RuntimeErrorKind::DivisionByZero,
            chunk: "divide".into(),
            offset: 7,
            line: 3,
            stack_trace: Vec::new(),
        }
        .with_trace(vec![
            StackFrame {
                chunk: "divide".into(),
                offset: 7,
                line: 3,
                source: Some("math.pl".into()),
            },
            StackFrame {
                chunk: "<main>".into(),
                offset: 2,
                line: 0,
                source: None,
            },
        ]);

        assert_eq!(
            error.to_string(),
            "RuntimeError: division by zero (in divide at 0007, line 3)\n\
             Stack trace:\n  at divide (math.pl:3)\n  at <main> (line 0)"
        );
    }

    #[test]
    fn heap_errors_map_to_traps() {
        let kind = RuntimeErrorKind::from(HeapError::OutOfBounds {
            offset: 4,
            capacity: 2,
        });
        assert_eq!(
            kind,
            RuntimeErrorKind::IndexOutOfBounds {
                index: 4,
                length: 2
            }
        );
        assert!(matches!(
            RuntimeErrorKind::from(HeapError::DanglingHandle("pointer")),
            RuntimeErrorKind::DanglingPointer(_)
        ));
        assert_eq!(
            RuntimeErrorKind::from(HeapError::BlockTooLarge {
                requested: 10,
                limit: 4
            }),
            RuntimeErrorKind::AllocationTooLarge {
                requested: 10,
                limit: 4
            }
        );
    }
}
