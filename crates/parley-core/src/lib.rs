//! Parley Core - bytecode compiler and virtual machine for Parley
//!
//! This crate provides:
//! - AST: the analyzed tree the compiler consumes
//! - Bytecode: symbols, chunks, modules and the instruction set
//! - Compiler: per-chunk code generation and two-pass module linking
//! - VM: a stack machine with closures, struct instances and a raw heap
//! - Standard: the host-backed `Array` and `Dictionary` structs
//!
//! ```ignore
//! let module = parley_core::compile("main", &files, Vec::new())?;
//! let value = parley_core::VirtualMachine::new(module, VmConfig::default())?.run()?;
//! ```

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Analyzed syntax tree - input to the compiler
pub mod ast;

/// Bytecode module - symbols, chunks, opcodes and linked modules
pub mod bytecode;

/// Compiler module - chunk compilation and module linking
pub mod compiler;

/// Virtual Machine module - bytecode execution
pub mod vm;

/// The reserved `Standard` module
pub mod standard;

/// Project configuration
pub mod config;

/// Test utilities - helpers for building and running trees
pub mod testutil;

/// Convenience re-export of the analyzed tree root
pub use ast::SourceFile;

/// Convenience re-export of compiled artifacts
pub use bytecode::{Chunk, CompileError, Module, Symbol, Value};

/// Convenience re-export of the compiler
pub use compiler::{compile, CompilerOptions, ModuleCompiler};

/// Convenience re-export of configuration
pub use config::{ConfigError, ParleyConfig};

/// Convenience re-export of the VM
pub use vm::{ExecutionResult, RuntimeError, VirtualMachine, VmConfig};

/// Convenience re-export of output capture utilities
pub use vm::{with_output_capture, OutputCapture};

/// Compile `files` with `options` and run the result
///
/// Compile diagnostics are reported as an `Error` result.
pub fn execute(files: &[SourceFile], options: CompilerOptions, config: VmConfig) -> ExecutionResult {
    let module = match ModuleCompiler::new(options).compile(files) {
        Ok(module) => module,
        Err(errors) => {
            let message = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n");
            return ExecutionResult::Error(message);
        }
    };
    match VirtualMachine::new(module, config) {
        Ok(mut vm) => vm.execute(),
        Err(error) => ExecutionResult::Error(error.to_string()),
    }
}
