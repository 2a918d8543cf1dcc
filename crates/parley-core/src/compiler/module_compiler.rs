//! Two-pass linking of a compilation unit into one module
//!
//! The first pass collects every file's top-level declarations into a
//! [`SymbolSpace`] without looking at any body. The second pass compiles
//! every body with the complete space visible, so a file may call a
//! function declared in a file that comes after it.
//!
//! A name declared twice resolves to its last definition; the earlier one
//! is dropped with a warning.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::ast::{Location, SourceFile, StmtKind, StructDecl};
use crate::bytecode::{
    disassemble_chunk, CaseType, Chunk, CompileError, CompileErrorKind, EnumType, Global, Module,
    OpCode, StructType, Symbol, SymbolKind, STANDARD_MODULE,
};
use crate::standard;

use super::chunk_compiler::{synthesized_params, ChunkCompiler, CompiledChunk};
use super::symbols::{file_symbol, function_symbol, main_symbol, param_types, SymbolSpace};
use super::CompilerOptions;

/// Maximum number of stored properties in one struct
const MAX_PROPERTIES: usize = 256;

/// Maximum number of cases in one enum
const MAX_CASES: usize = 256;

/// Maximum number of associated values in one enum case
const MAX_ASSOCIATED_VALUES: usize = 255;

/// Compile `files` as the module `name`, linking against `imports`
///
/// # Errors
/// Returns every diagnostic found while linking.
pub fn compile(
    name: &str,
    files: &[SourceFile],
    imports: Vec<Rc<Module>>,
) -> Result<Module, Vec<CompileError>> {
    imports
        .into_iter()
        .fold(
            ModuleCompiler::new(CompilerOptions::named(name)),
            ModuleCompiler::with_import,
        )
        .compile(files)
}

/// Links the files of one compilation unit into a [`Module`]
#[derive(Debug, Clone, Default)]
pub struct ModuleCompiler {
    options: CompilerOptions,
    imports: Vec<Rc<Module>>,
}

/// Chunks emitted by the second pass
#[derive(Default)]
struct Emitted {
    chunks: HashMap<Symbol, Rc<Chunk>>,
    value_initializers: HashMap<Symbol, Rc<Chunk>>,
    diagnostics: Vec<CompileError>,
}

impl ModuleCompiler {
    /// Create a module compiler
    #[must_use]
    pub fn new(options: CompilerOptions) -> Self {
        Self {
            options,
            imports: Vec::new(),
        }
    }

    /// Link against an already compiled module
    #[must_use]
    pub fn with_import(mut self, module: Rc<Module>) -> Self {
        self.imports.push(module);
        self
    }

    /// The options this compiler was created with
    #[must_use]
    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Compile and link `files`
    ///
    /// # Errors
    /// Returns every diagnostic found while linking; no module is produced.
    pub fn compile(&self, files: &[SourceFile]) -> Result<Module, Vec<CompileError>> {
        let module = self.link(files);
        if module.diagnostics.is_empty() {
            Ok(module)
        } else {
            Err(module.diagnostics)
        }
    }

    /// Compile and link `files`, keeping diagnostics on the module
    ///
    /// A module with diagnostics is not executable.
    #[must_use]
    pub fn link(&self, files: &[SourceFile]) -> Module {
        let name = self.options.module_name.as_str();
        let mut space = SymbolSpace::new(name, self.imports_with_standard());

        // Pass 1: declarations
        let mut diagnostics = Vec::new();
        let mut winners = HashMap::new();
        for (file_index, file) in files.iter().enumerate() {
            collect(&mut space, file, file_index, &mut winners, &mut diagnostics);
        }
        debug!(
            module = name,
            files = files.len(),
            globals = space.globals().len(),
            "collected declarations"
        );

        // Pass 2: bodies
        let mut emitted = Emitted {
            diagnostics,
            ..Emitted::default()
        };
        for (file_index, file) in files.iter().enumerate() {
            self.emit_file(&space, file, file_index, &winners, &mut emitted);
        }

        let user_main = match space.globals().get("main") {
            Some(Global::Function(symbol)) if is_nullary(symbol) => Some(symbol.clone()),
            _ => None,
        };
        let main = match synthesize_main(name, files, user_main.as_ref()) {
            Ok(chunk) => {
                let chunk = Rc::new(chunk);
                emitted
                    .chunks
                    .insert(chunk.symbol.clone(), Rc::clone(&chunk));
                Some(chunk)
            }
            Err(kind) => {
                emitted
                    .diagnostics
                    .push(CompileError::new(kind, name, Location::synthesized()));
                None
            }
        };

        debug!(
            module = name,
            chunks = emitted.chunks.len(),
            values = emitted.value_initializers.len(),
            errors = emitted.diagnostics.len(),
            "linked module"
        );

        let (exports, structs, enums, imports) = space.into_parts();
        Module {
            name: name.to_string(),
            main,
            chunks: emitted.chunks,
            value_initializers: emitted.value_initializers,
            structs,
            enums,
            exports,
            imports,
            diagnostics: emitted.diagnostics,
        }
    }

    /// The configured imports with `Standard` as the first direct import
    ///
    /// Name resolution only sees the exports of direct imports, so
    /// `Standard` is added even when an import already links against it.
    fn imports_with_standard(&self) -> Vec<Rc<Module>> {
        if self.options.module_name == STANDARD_MODULE {
            return self.imports.clone();
        }

        // Standard goes first so every explicit import shadows it
        let (explicit, others): (Vec<_>, Vec<_>) = self
            .imports
            .iter()
            .cloned()
            .partition(|m| m.name == STANDARD_MODULE);
        let standard = explicit
            .into_iter()
            .next()
            .unwrap_or_else(|| Rc::new(standard::module()));

        let mut imports = Vec::with_capacity(others.len() + 1);
        imports.push(standard);
        imports.extend(others);
        imports
    }

    fn emit_file(
        &self,
        space: &SymbolSpace,
        file: &SourceFile,
        file_index: usize,
        winners: &HashMap<String, (usize, usize)>,
        out: &mut Emitted,
    ) {
        let module = space.module();
        let path = file.path.as_str();
        debug!(path, statements = file.stmts.len(), "compiling file");

        let result = ChunkCompiler::new(space, path).compile_file(file_symbol(module, path), &file.stmts);
        if let Some(chunk) = self.store(result, out) {
            out.chunks.insert(chunk.symbol.clone(), Rc::new(chunk));
        }

        for (stmt_index, stmt) in file.stmts.iter().enumerate() {
            let wins = |name: &str| winners.get(name) == Some(&(file_index, stmt_index));

            match &stmt.kind {
                StmtKind::Func(decl) => {
                    let Some(name) = decl.name.as_deref() else {
                        continue;
                    };
                    if !wins(name) {
                        continue;
                    }
                    let symbol = function_symbol(module, name, decl);
                    let result = ChunkCompiler::new(space, path).compile_function(symbol, decl);
                    if let Some(chunk) = self.store(result, out) {
                        out.chunks.insert(chunk.symbol.clone(), Rc::new(chunk));
                    }
                }

                StmtKind::Let { name, value, .. } => {
                    if !wins(name) {
                        continue;
                    }
                    let symbol = Symbol::value(module, name.as_str());
                    let result = ChunkCompiler::new(space, path).compile_value(
                        symbol,
                        value.as_ref(),
                        stmt.loc,
                    );
                    if let Some(chunk) = self.store(result, out) {
                        out.value_initializers
                            .insert(chunk.symbol.clone(), Rc::new(chunk));
                    }
                }

                StmtKind::Struct(decl) => {
                    if !wins(&decl.name) {
                        continue;
                    }
                    let symbol = Symbol::structure(module, decl.name.as_str());
                    let Some(ty) = space.struct_type(&symbol).cloned() else {
                        continue;
                    };
                    self.emit_struct(space, path, &ty, decl, out);
                }

                _ => {}
            }
        }
    }

    fn emit_struct(
        &self,
        space: &SymbolSpace,
        path: &str,
        ty: &StructType,
        decl: &StructDecl,
        out: &mut Emitted,
    ) {
        let result = ChunkCompiler::new(space, path).compile_initializer(ty, decl);
        if let Some(chunk) = self.store(result, out) {
            out.chunks.insert(chunk.symbol.clone(), Rc::new(chunk));
        }

        for method in &decl.methods {
            let Some(symbol) = method.name.as_deref().and_then(|n| ty.method(n)).cloned() else {
                continue;
            };
            let result = ChunkCompiler::new(space, path).compile_method(ty, symbol, method);
            if let Some(chunk) = self.store(result, out) {
                out.chunks.insert(chunk.symbol.clone(), Rc::new(chunk));
            }
        }
    }

    /// Keep the nested chunks of a successful compilation and hand back the
    /// main one, or record the diagnostics
    fn store(
        &self,
        result: Result<CompiledChunk, Vec<CompileError>>,
        out: &mut Emitted,
    ) -> Option<Chunk> {
        match result {
            Ok(compiled) => {
                for chunk in compiled.nested {
                    self.log_chunk(&chunk);
                    out.chunks.insert(chunk.symbol.clone(), Rc::new(chunk));
                }
                self.log_chunk(&compiled.chunk);
                Some(compiled.chunk)
            }
            Err(errors) => {
                out.diagnostics.extend(errors);
                None
            }
        }
    }

    fn log_chunk(&self, chunk: &Chunk) {
        if self.options.emit_disassembly {
            debug!("\n{}", disassemble_chunk(chunk));
        }
    }
}

/// Record one file's top-level declarations
fn collect(
    space: &mut SymbolSpace,
    file: &SourceFile,
    file_index: usize,
    winners: &mut HashMap<String, (usize, usize)>,
    diagnostics: &mut Vec<CompileError>,
) {
    let module = space.module().to_string();

    for (stmt_index, stmt) in file.stmts.iter().enumerate() {
        let (name, previous) = match &stmt.kind {
            StmtKind::Func(decl) => {
                let Some(name) = decl.name.as_deref() else {
                    diagnostics.push(CompileError::new(
                        CompileErrorKind::Internal("function declaration without a name".into()),
                        file.path.as_str(),
                        stmt.loc,
                    ));
                    continue;
                };
                let symbol = function_symbol(&module, name, decl);
                space.set_params(
                    symbol.clone(),
                    decl.params.iter().map(|p| p.name.clone()).collect(),
                );
                (name, space.define(name, Global::Function(symbol)))
            }

            StmtKind::Let { name, .. } => {
                let symbol = Symbol::value(module.as_str(), name.as_str());
                (name.as_str(), space.define(name.as_str(), Global::Value(symbol)))
            }

            StmtKind::Struct(decl) => {
                if decl.properties.len() > MAX_PROPERTIES {
                    diagnostics.push(CompileError::new(
                        CompileErrorKind::TooManyProperties(decl.name.clone()),
                        file.path.as_str(),
                        decl.loc,
                    ));
                    continue;
                }
                let ty = struct_type(&module, decl);
                if let Some(initializer) = &ty.initializer {
                    space.set_params(initializer.clone(), ty.init_params.clone());
                }
                for method in &decl.methods {
                    if let Some(symbol) = method.name.as_deref().and_then(|n| ty.method(n)) {
                        space.set_params(
                            symbol.clone(),
                            method.params.iter().map(|p| p.name.clone()).collect(),
                        );
                    }
                }
                (decl.name.as_str(), space.define_struct(ty))
            }

            StmtKind::Enum(decl) => {
                if decl.cases.len() > MAX_CASES {
                    diagnostics.push(CompileError::new(
                        CompileErrorKind::TooManyCases(decl.name.clone()),
                        file.path.as_str(),
                        decl.loc,
                    ));
                    continue;
                }
                if decl.cases.iter().any(|c| c.values.len() > MAX_ASSOCIATED_VALUES) {
                    diagnostics.push(CompileError::new(
                        CompileErrorKind::TooManyParameters,
                        file.path.as_str(),
                        decl.loc,
                    ));
                    continue;
                }
                let ty = EnumType {
                    symbol: Symbol::enumeration(module.as_str(), decl.name.as_str()),
                    cases: decl
                        .cases
                        .iter()
                        .map(|c| CaseType {
                            name: c.name.clone(),
                            values: c.values.clone(),
                        })
                        .collect(),
                };
                (decl.name.as_str(), space.define_enum(decl.name.as_str(), ty))
            }

            _ => continue,
        };

        if previous.is_some() {
            warn!(
                global = name,
                path = %file.path,
                line = stmt.loc.line,
                "duplicate global; the last definition wins"
            );
        }
        winners.insert(name.to_string(), (file_index, stmt_index));
    }
}

/// Build the descriptor of a declared struct
fn struct_type(module: &str, decl: &StructDecl) -> StructType {
    let mut ty = StructType::new(Symbol::structure(module, decl.name.as_str()));
    for property in &decl.properties {
        ty.add_property(property.name.as_str());
    }

    let params = match &decl.init {
        Some(init) => init.params.clone(),
        None => synthesized_params(decl),
    };
    ty.initializer = Some(Symbol::method(
        module,
        decl.name.as_str(),
        "init",
        param_types(&params),
    ));
    ty.init_params = params.into_iter().map(|p| p.name).collect();

    for method in &decl.methods {
        if let Some(name) = method.name.as_deref() {
            let symbol = Symbol::method(
                module,
                decl.name.as_str(),
                name,
                param_types(&method.params),
            );
            ty.add_method(name, symbol);
        }
    }
    ty
}

fn is_nullary(symbol: &Symbol) -> bool {
    matches!(&symbol.kind, SymbolKind::Function { params, .. } if params.is_empty())
}

/// The entry chunk: run every file in order, keeping the last non-`none`
/// file result, then call `main()` if the unit declares one
fn synthesize_main(
    module: &str,
    files: &[SourceFile],
    user_main: Option<&Symbol>,
) -> Result<Chunk, CompileErrorKind> {
    const RESULT: u8 = 0;
    const FILE_RESULT: u8 = 1;

    let mut chunk = Chunk::new("<main>", main_symbol(module));
    chunk.local_names = vec!["<result>".to_string(), "<file result>".to_string()];

    chunk.write_op(OpCode::None, 0);
    chunk.write_op_u8(OpCode::DefineLocal, RESULT, 0);

    for file in files {
        let index = chunk
            .add_symbol(&file_symbol(module, &file.path))
            .ok_or(CompileErrorKind::TooManySymbols)?;
        chunk.write_op_u16(OpCode::CallChunk, index, 0);
        chunk.write_op_u8(OpCode::DefineLocal, FILE_RESULT, 0);

        chunk.write_op_u8(OpCode::GetLocal, FILE_RESULT, 0);
        chunk.write_op(OpCode::None, 0);
        chunk.write_op(OpCode::NotEqual, 0);
        let skip = chunk.emit_jump(OpCode::JumpIfFalse, 0);
        chunk.write_op_u8(OpCode::GetLocal, FILE_RESULT, 0);
        chunk.write_op_u8(OpCode::SetLocal, RESULT, 0);
        chunk.write_op(OpCode::Pop, 0);
        chunk
            .patch_jump(skip)
            .ok_or(CompileErrorKind::JumpTooLarge)?;
    }

    match user_main {
        Some(symbol) => {
            let index = chunk
                .add_symbol(symbol)
                .ok_or(CompileErrorKind::TooManySymbols)?;
            chunk.write_op_u16(OpCode::GetModuleFunction, index, 0);
            chunk.write_op_u8(OpCode::Call, 0, 0);
        }
        None => chunk.write_op_u8(OpCode::GetLocal, RESULT, 0),
    }
    chunk.write_op(OpCode::Return, 0);

    Ok(chunk)
}
