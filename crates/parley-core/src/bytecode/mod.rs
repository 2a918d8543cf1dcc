//! Bytecode format for the Parley virtual machine
//!
//! This module provides:
//! - `OpCode`: The bytecode instruction set
//! - `Value`: Runtime value representation
//! - `Symbol`: Structural cross-chunk identifiers
//! - `Chunk`: A sequence of bytecode instructions
//! - `Module`: Linked chunks plus struct/enum descriptors
//! - Disassembler and stack verifier for tests and tooling

mod chunk;
mod debug;
mod error;
mod module;
mod opcode;
mod symbol;
mod value;
mod verify;

pub use chunk::{CaptureInfo, CaptureSource, Chunk};
pub use debug::{decode_instruction, disassemble, disassemble_chunk, Instruction, Operand};
pub use error::{CompileError, CompileErrorKind, CompileResult};
pub use module::{CaseType, EnumType, Global, Module, StructType};
pub use opcode::{OpCode, OperandKind};
pub use symbol::{Symbol, SymbolKind, BUILTIN_MODULE, STANDARD_MODULE};
pub use value::{BoundMethod, Closure, EnumCase, Value};
pub use verify::{verify_stack, StackError, StackReport};
