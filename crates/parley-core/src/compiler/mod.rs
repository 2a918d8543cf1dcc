//! Bytecode compiler
//!
//! [`ModuleCompiler`] links every file of a compilation unit into one
//! [`Module`](crate::bytecode::Module). It collects top-level declarations
//! into a [`SymbolSpace`] first and only then runs [`ChunkCompiler`] over
//! each body, so files may reference each other's declarations in any order.

mod chunk_compiler;
mod module_compiler;
mod symbols;

use serde::{Deserialize, Serialize};

pub use chunk_compiler::{ChunkCompiler, CompiledChunk};
pub use module_compiler::{compile, ModuleCompiler};
pub use symbols::SymbolSpace;

/// Default name for a compiled module
pub const DEFAULT_MODULE_NAME: &str = "main";

/// Options for one compilation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerOptions {
    /// Name of the module being compiled; owns every symbol it declares
    pub module_name: String,

    /// Log a disassembly of every emitted chunk at `debug` level
    pub emit_disassembly: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            module_name: DEFAULT_MODULE_NAME.to_string(),
            emit_disassembly: false,
        }
    }
}

impl CompilerOptions {
    /// Options for a module with the given name
    #[must_use]
    pub fn named(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            ..Self::default()
        }
    }
}
