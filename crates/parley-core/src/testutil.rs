//! Test utilities for Parley
//!
//! Helpers for assembling analyzed trees by hand and running them through
//! the compiler and VM.

use crate::ast::{Argument, Expr, FuncDecl, Param, SourceFile, Stmt, Type};
use crate::bytecode::{Module, Value};
use crate::compiler::{compile, CompilerOptions, ModuleCompiler};
use crate::vm::{with_output_capture, RuntimeError, VirtualMachine, VmConfig};

/// Result type for test helpers
pub type TestResult<T> = Result<T, String>;

/// A source file
pub fn file(path: &str, stmts: Vec<Stmt>) -> SourceFile {
    SourceFile::new(path, stmts)
}

/// A named function declaration
pub fn func(name: &str, params: &[(&str, Type)], body: Vec<Stmt>) -> FuncDecl {
    FuncDecl::new(
        name,
        params
            .iter()
            .map(|(name, ty)| Param::new(*name, ty.clone()))
            .collect(),
        body,
    )
}

/// A call with positional arguments
pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
    Expr::call(callee, args.into_iter().map(Argument::positional).collect())
}

/// A labelled argument
pub fn label(name: &str, value: Expr) -> Argument {
    Argument::labelled(name, value)
}

/// Compile files into a module named `main`
///
/// # Errors
/// Returns the first compile diagnostic
pub fn compile_files(files: &[SourceFile]) -> TestResult<Module> {
    compile_module(CompilerOptions::default(), files)
}

/// Compile files with explicit options
///
/// # Errors
/// Returns the first compile diagnostic
pub fn compile_module(options: CompilerOptions, files: &[SourceFile]) -> TestResult<Module> {
    ModuleCompiler::new(options)
        .compile(files)
        .map_err(|errors| format!("Compile error: {}", errors[0]))
}

/// Compile and run files
///
/// # Errors
/// Returns error if compilation or execution fails
pub fn run_files(files: &[SourceFile]) -> TestResult<Value> {
    run_files_with(files, VmConfig::default())
}

/// Compile and run files with a VM configuration
///
/// # Errors
/// Returns error if compilation or execution fails
pub fn run_files_with(files: &[SourceFile], config: VmConfig) -> TestResult<Value> {
    let module = compile("main", files, Vec::new())
        .map_err(|errors| format!("Compile error: {}", errors[0]))?;
    VirtualMachine::new(module, config)
        .and_then(|mut vm| vm.run())
        .map_err(|e| format!("Runtime error: {e}"))
}

/// Run a single-file program
///
/// # Errors
/// Returns error if compilation or execution fails
pub fn run_program(stmts: Vec<Stmt>) -> TestResult<Value> {
    run_files(&[file("main.pl", stmts)])
}

/// Run a single-file program and expect an integer result
///
/// # Errors
/// Returns error if execution fails or the result is not an integer
pub fn run_int(stmts: Vec<Stmt>) -> TestResult<i64> {
    match run_program(stmts)? {
        Value::Int(n) => Ok(n),
        other => Err(format!("Expected int, got {}", other.type_name())),
    }
}

/// Run files and collect what `print` wrote
///
/// # Errors
/// Returns error if compilation or execution fails
pub fn run_with_output(files: &[SourceFile]) -> TestResult<(Value, Vec<String>)> {
    let (result, output) = with_output_capture(|| run_files(files));
    result.map(|value| (value, output.stdout))
}

/// Run files and expect a trap
///
/// # Errors
/// Returns error if compilation fails or the program completes
pub fn expect_trap(files: &[SourceFile], config: VmConfig) -> TestResult<RuntimeError> {
    let module = compile_files(files)?;
    let mut vm = VirtualMachine::new(module, config).map_err(|e| e.to_string())?;
    match vm.run() {
        Ok(value) => Err(format!("Expected a trap, program returned {value}")),
        Err(error) => Ok(error),
    }
}
