//! Lowering of analyzed bodies into bytecode chunks
//!
//! Every expression nets one value on the stack and every statement nets
//! zero. Locals live in frame slots rather than on the value stack, so
//! leaving a scope emits nothing and `return` is valid at any nesting depth.
//!
//! A local referenced from a nested function is promoted to a capture cell:
//! its `DEFINE_LOCAL` is patched into `DEFINE_CELL` once the capture is
//! discovered. Parameters have no binding instruction; the VM promotes them
//! the first time `MAKE_CLOSURE` captures them.

use std::rc::Rc;

use tracing::trace;

use crate::ast::{
    Argument, BinOp, Block, Expr, ExprKind, FuncDecl, Literal, Location, MatchCase, Param,
    Pattern, Stmt, StmtKind, StructDecl, UnaryOp,
};
use crate::bytecode::{
    CaptureInfo, CaptureSource, Chunk, CompileError, CompileErrorKind, EnumType, Global, OpCode,
    StructType, Symbol, Value,
};
use crate::vm::Builtin;

use super::symbols::{param_types, SymbolSpace};

/// Maximum number of local slots in one chunk
const MAX_LOCALS: usize = 256;

/// Maximum number of captures in one closure
const MAX_CAPTURES: usize = 256;

/// Maximum number of parameters or call arguments
const MAX_ARGS: usize = 255;

/// A local variable in scope
#[derive(Debug, Clone)]
struct Local {
    /// Variable name
    name: String,

    /// Scope depth the variable was declared at
    depth: u32,

    /// Frame slot holding the variable
    slot: u8,

    /// Offset of the `DEFINE_LOCAL` binding it, if any
    define_offset: Option<usize>,

    /// Whether a nested function captures the variable
    captured: bool,
}

/// Where a pattern finds its value below the match subject: one
/// associated-value index per enclosing case pattern
type PatternPath = Vec<u8>;

/// Failure jumps and bindings gathered from one match arm's pattern
struct ArmPattern<'p> {
    /// Local slot holding the match subject
    slot: u8,
    fail_jumps: Vec<usize>,
    bindings: Vec<(&'p str, PatternPath)>,
}

/// Loop information for break/continue
#[derive(Debug, Clone)]
struct LoopInfo {
    /// Bytecode offset of the condition (for continue)
    start: usize,

    /// Offsets of break jumps to patch
    break_jumps: Vec<usize>,
}

/// Kind of body being compiled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    /// One file's top-level statements
    File,

    /// Function declaration or literal
    Function,

    /// Struct method
    Method,

    /// Struct initializer
    Initializer,

    /// Lazy initializer of a module value
    ValueInitializer,
}

impl FunctionKind {
    fn has_receiver(self) -> bool {
        matches!(self, FunctionKind::Method | FunctionKind::Initializer)
    }
}

/// Compiler state for a single chunk
struct FunctionState {
    /// The chunk being emitted
    chunk: Chunk,

    /// Kind of body
    kind: FunctionKind,

    /// Variables currently in scope
    locals: Vec<Local>,

    /// Current scope depth
    scope_depth: u32,

    /// Active loops (for break/continue)
    loops: Vec<LoopInfo>,

    /// Function literals compiled inside this chunk so far
    nested: u32,
}

impl FunctionState {
    fn new(kind: FunctionKind, chunk: Chunk) -> Self {
        Self {
            chunk,
            kind,
            locals: Vec::new(),
            scope_depth: 0,
            loops: Vec::new(),
            nested: 0,
        }
    }

    fn find_local(&self, name: &str) -> Option<usize> {
        self.locals.iter().rposition(|local| local.name == name)
    }
}

/// Where a lexically bound name lives
#[derive(Debug, Clone, Copy)]
enum Storage {
    Local(u8),
    Capture(u8),
}

/// A compiled chunk and the chunks of the function literals nested in it
#[derive(Debug)]
pub struct CompiledChunk {
    /// The requested chunk
    pub chunk: Chunk,

    /// Chunks of nested function literals, referenced by `MAKE_CLOSURE`
    pub nested: Vec<Chunk>,
}

/// Compiles one body (file, function, method, initializer or module value)
/// into a [`Chunk`]
pub struct ChunkCompiler<'a> {
    /// Module-level names
    space: &'a SymbolSpace,

    /// Source file being compiled
    path: String,

    /// Enclosing chunks, innermost last
    states: Vec<FunctionState>,

    /// Nested chunks that have been completed
    finished: Vec<Chunk>,

    /// Collected errors
    errors: Vec<CompileError>,
}

impl<'a> ChunkCompiler<'a> {
    /// Create a compiler for bodies from the file at `path`
    #[must_use]
    pub fn new(space: &'a SymbolSpace, path: impl Into<String>) -> Self {
        Self {
            space,
            path: path.into(),
            states: Vec::new(),
            finished: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Compile a file's top-level statements
    ///
    /// Top-level declarations are compiled into their own chunks by the
    /// module compiler; here a `let` only forces its module value.
    ///
    /// # Errors
    /// Returns every diagnostic found in the file body.
    pub fn compile_file(
        mut self,
        symbol: Symbol,
        stmts: &[Stmt],
    ) -> Result<CompiledChunk, Vec<CompileError>> {
        let name = self.path.clone();
        self.begin_chunk(FunctionKind::File, name, symbol, &[], Location::synthesized());
        for stmt in stmts {
            self.statement(stmt);
        }
        let line = stmts.last().map_or(0, |s| s.loc.line);
        self.emit_op(OpCode::None, line);
        self.emit_op(OpCode::Return, line);
        self.finish()
    }

    /// Compile a top-level function
    ///
    /// # Errors
    /// Returns every diagnostic found in the function body.
    pub fn compile_function(
        mut self,
        symbol: Symbol,
        decl: &FuncDecl,
    ) -> Result<CompiledChunk, Vec<CompileError>> {
        let name = symbol.name().to_string();
        self.function_body(FunctionKind::Function, name, symbol, decl);
        self.finish()
    }

    /// Compile a struct method
    ///
    /// # Errors
    /// Returns every diagnostic found in the method body.
    pub fn compile_method(
        mut self,
        owner: &StructType,
        symbol: Symbol,
        decl: &FuncDecl,
    ) -> Result<CompiledChunk, Vec<CompileError>> {
        let name = format!("{}.{}", owner.name, symbol.name());
        self.function_body(FunctionKind::Method, name, symbol, decl);
        self.finish()
    }

    /// Compile a struct initializer
    ///
    /// Property defaults run first. Without an explicit `init`, the
    /// initializer takes the properties that have no default, in
    /// declaration order, and stores each into its property.
    ///
    /// # Errors
    /// Returns every diagnostic found in the defaults or the body.
    pub fn compile_initializer(
        mut self,
        owner: &StructType,
        decl: &StructDecl,
    ) -> Result<CompiledChunk, Vec<CompileError>> {
        let Some(symbol) = owner.initializer.clone() else {
            self.error(
                CompileErrorKind::Internal(format!("struct '{}' has no initializer", owner.name)),
                decl.loc,
            );
            return Err(self.errors);
        };

        let params = match &decl.init {
            Some(init) => init.params.clone(),
            None => synthesized_params(decl),
        };
        let name = format!("{}.init", owner.name);
        self.begin_chunk(FunctionKind::Initializer, name, symbol, &params, decl.loc);

        let line = decl.loc.line;
        for property in &decl.properties {
            if let Some(default) = &property.default {
                self.expression(default);
                self.store_self_property(owner, &property.name, default.loc);
            }
        }

        match &decl.init {
            Some(init) => self.block_body(&init.body),
            None => {
                for param in &params {
                    if let Some(Storage::Local(slot)) = self.resolve_variable(&param.name, decl.loc)
                    {
                        self.emit_op_u8(OpCode::GetLocal, slot, line);
                        self.store_self_property(owner, &param.name, decl.loc);
                    }
                }
            }
        }

        self.emit_op(OpCode::GetSelf, line);
        self.emit_op(OpCode::Return, line);
        self.finish()
    }

    /// Compile the lazy initializer of a module value
    ///
    /// The chunk evaluates the value, stores it and returns it.
    ///
    /// # Errors
    /// Returns every diagnostic found in the value expression.
    pub fn compile_value(
        mut self,
        symbol: Symbol,
        value: Option<&Expr>,
        loc: Location,
    ) -> Result<CompiledChunk, Vec<CompileError>> {
        let name = format!("{} initializer", symbol.name());
        self.begin_chunk(
            FunctionKind::ValueInitializer,
            name,
            symbol.clone(),
            &[],
            loc,
        );
        match value {
            Some(expr) => self.expression(expr),
            None => self.emit_op(OpCode::None, loc.line),
        }
        self.emit_symbol_op(OpCode::SetModuleValue, &symbol, loc);
        self.emit_op(OpCode::Return, loc.line);
        self.finish()
    }

    // ===== Chunk Management =====

    fn begin_chunk(
        &mut self,
        kind: FunctionKind,
        name: String,
        symbol: Symbol,
        params: &[Param],
        loc: Location,
    ) {
        let mut chunk = Chunk::new(name, symbol).with_path(self.path.clone());
        chunk.has_receiver = kind.has_receiver();
        self.states.push(FunctionState::new(kind, chunk));

        if kind.has_receiver() {
            self.declare_local("self", loc);
        }

        if params.len() > MAX_ARGS {
            self.error(CompileErrorKind::TooManyParameters, loc);
        }
        self.current_mut().chunk.arity = params.len().min(MAX_ARGS) as u8;

        self.current_mut().scope_depth = 1;
        for param in params {
            self.declare_local(&param.name, loc);
        }
    }

    fn end_chunk(&mut self) -> Option<Chunk> {
        let state = self.states.pop()?;
        let chunk = state.chunk;
        trace!(
            chunk = %chunk.name,
            bytes = chunk.len(),
            locals = chunk.local_count(),
            captures = chunk.captures.len(),
            "emitted chunk"
        );
        Some(chunk)
    }

    fn finish(mut self) -> Result<CompiledChunk, Vec<CompileError>> {
        let chunk = self.end_chunk();
        match chunk {
            Some(chunk) if self.errors.is_empty() => Ok(CompiledChunk {
                chunk,
                nested: self.finished,
            }),
            _ => Err(self.errors),
        }
    }

    fn function_body(&mut self, kind: FunctionKind, name: String, symbol: Symbol, decl: &FuncDecl) {
        self.begin_chunk(kind, name, symbol, &decl.params, decl.loc);
        self.block_body(&decl.body);

        let line = decl.body.stmts.last().map_or(decl.loc.line, |s| s.loc.line);
        self.emit_op(OpCode::None, line);
        self.emit_op(OpCode::Return, line);
    }

    /// Compile a function literal into a nested chunk, returning its symbol
    fn nested_function(&mut self, decl: &FuncDecl) -> Symbol {
        let label = decl.name.as_deref().unwrap_or("<lambda>");
        let (name, index) = {
            let parent = self.current_mut();
            parent.nested += 1;
            (format!("{}.{label}", parent.chunk.name), parent.nested)
        };
        let symbol = Symbol::function(
            self.space.module(),
            format!("{name}#{index}"),
            param_types(&decl.params),
        );

        self.function_body(FunctionKind::Function, name, symbol.clone(), decl);
        if let Some(chunk) = self.end_chunk() {
            self.finished.push(chunk);
        }
        symbol
    }

    fn current(&self) -> &FunctionState {
        &self.states[self.states.len() - 1]
    }

    fn current_mut(&mut self) -> &mut FunctionState {
        let len = self.states.len();
        &mut self.states[len - 1]
    }

    fn at_file_scope(&self) -> bool {
        self.states.len() == 1
            && self.current().kind == FunctionKind::File
            && self.current().scope_depth == 1
    }

    // ===== Statements =====

    fn statement(&mut self, stmt: &Stmt) {
        let line = stmt.loc.line;

        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.expression(expr);
                self.emit_op(OpCode::Pop, line);
            }

            StmtKind::Let { name, value, .. } => {
                if self.at_file_scope() {
                    // Reaching the declaration forces the module value,
                    // unless a later declaration took the name
                    let symbol = Symbol::value(self.space.module(), name.as_str());
                    if self.space.resolve(name) == Some(&Global::Value(symbol.clone())) {
                        self.emit_symbol_op(OpCode::GetModuleValue, &symbol, stmt.loc);
                        self.emit_op(OpCode::Pop, line);
                    }
                } else {
                    match value {
                        Some(value) => self.expression(value),
                        None => self.emit_op(OpCode::None, line),
                    }
                    self.define_local(name, stmt.loc);
                }
            }

            StmtKind::Func(decl) => {
                if !self.at_file_scope() {
                    self.local_function(decl, stmt.loc);
                }
            }

            StmtKind::Struct(_) => {
                if !self.at_file_scope() {
                    self.error(CompileErrorKind::NestedDeclaration("struct"), stmt.loc);
                }
            }

            StmtKind::Enum(_) => {
                if !self.at_file_scope() {
                    self.error(CompileErrorKind::NestedDeclaration("enum"), stmt.loc);
                }
            }

            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => self.if_statement(cond, then_branch, else_branch.as_ref(), stmt.loc),

            StmtKind::While { cond, body } => self.while_statement(cond, body, stmt.loc),

            StmtKind::Return(value) => self.return_statement(value.as_ref(), stmt.loc),

            StmtKind::Break => {
                if self.current().loops.is_empty() {
                    self.error(CompileErrorKind::BreakOutsideLoop, stmt.loc);
                    return;
                }
                let jump = self.emit_jump(OpCode::Jump, line);
                if let Some(info) = self.current_mut().loops.last_mut() {
                    info.break_jumps.push(jump);
                }
            }

            StmtKind::Continue => {
                let Some(start) = self.current().loops.last().map(|info| info.start) else {
                    self.error(CompileErrorKind::ContinueOutsideLoop, stmt.loc);
                    return;
                };
                self.emit_loop(start, stmt.loc);
            }

            StmtKind::Block(block) => {
                self.begin_scope();
                self.block_body(block);
                self.end_scope();
            }

            StmtKind::Match {
                subject,
                cases,
                else_branch,
            } => self.match_statement(subject, cases, else_branch.as_ref(), stmt.loc),
        }
    }

    fn block_body(&mut self, block: &Block) {
        for stmt in &block.stmts {
            self.statement(stmt);
        }
    }

    fn scoped_block(&mut self, block: &Block) {
        self.begin_scope();
        self.block_body(block);
        self.end_scope();
    }

    fn if_statement(
        &mut self,
        cond: &Expr,
        then_branch: &Block,
        else_branch: Option<&Block>,
        loc: Location,
    ) {
        let line = loc.line;
        self.expression(cond);
        let else_jump = self.emit_jump(OpCode::JumpIfFalse, line);
        self.scoped_block(then_branch);

        match else_branch {
            Some(else_branch) => {
                let end_jump = self.emit_jump(OpCode::Jump, line);
                self.patch_jump(else_jump, loc);
                self.scoped_block(else_branch);
                self.patch_jump(end_jump, loc);
            }
            None => self.patch_jump(else_jump, loc),
        }
    }

    fn while_statement(&mut self, cond: &Expr, body: &Block, loc: Location) {
        let line = loc.line;
        let start = self.current().chunk.current_offset();

        self.expression(cond);
        let exit_jump = self.emit_jump(OpCode::JumpIfFalse, line);

        self.current_mut().loops.push(LoopInfo {
            start,
            break_jumps: Vec::new(),
        });
        self.scoped_block(body);
        self.emit_loop(start, loc);

        self.patch_jump(exit_jump, loc);
        if let Some(info) = self.current_mut().loops.pop() {
            for jump in info.break_jumps {
                self.patch_jump(jump, loc);
            }
        }
    }

    /// Arms are tried in order; an arm whose pattern fails falls through
    /// to the next, and no match at all runs the else branch (or nothing)
    fn match_statement(
        &mut self,
        subject: &Expr,
        cases: &[MatchCase],
        else_branch: Option<&Block>,
        loc: Location,
    ) {
        let line = loc.line;
        self.begin_scope();
        self.expression(subject);
        let Some(slot) = self.define_local("<match>", loc) else {
            self.end_scope();
            return;
        };
        let subject_enum = self.space.enum_for_type(&subject.ty).cloned();

        let mut end_jumps = Vec::new();
        for case in cases {
            let case_loc = if case.loc == Location::default() {
                loc
            } else {
                case.loc
            };
            self.check_bindings(&case.pattern, case_loc);

            let mut arm = ArmPattern {
                slot,
                fail_jumps: Vec::new(),
                bindings: Vec::new(),
            };
            self.pattern_test(
                &case.pattern,
                subject_enum.as_deref(),
                &PatternPath::new(),
                &mut arm,
                case_loc,
            );

            self.begin_scope();
            for (name, path) in &arm.bindings {
                self.load_path(slot, path, case_loc.line);
                self.define_local(name, case_loc);
            }
            self.block_body(&case.body);
            self.end_scope();

            end_jumps.push(self.emit_jump(OpCode::Jump, line));
            for jump in arm.fail_jumps {
                self.patch_jump(jump, case_loc);
            }
        }

        if let Some(else_branch) = else_branch {
            self.scoped_block(else_branch);
        }
        for jump in end_jumps {
            self.patch_jump(jump, loc);
        }
        self.end_scope();
    }

    /// Emit the tests for `pattern` against the value at `path`, each
    /// jumping away on failure, and record the names it binds
    fn pattern_test<'p>(
        &mut self,
        pattern: &'p Pattern,
        ty: Option<&EnumType>,
        path: &PatternPath,
        arm: &mut ArmPattern<'p>,
        loc: Location,
    ) {
        let line = loc.line;
        match pattern {
            Pattern::Wildcard => {}

            Pattern::Binding(name) => arm.bindings.push((name.as_str(), path.clone())),

            Pattern::Value(expr) => {
                self.load_path(arm.slot, path, line);
                self.expression(expr);
                self.emit_op(OpCode::Equal, line);
                arm.fail_jumps.push(self.emit_jump(OpCode::JumpIfFalse, line));
            }

            Pattern::Case { name, values } => {
                let Some(ty) = ty else {
                    self.error(
                        CompileErrorKind::InvalidPattern(format!(
                            "case pattern '.{name}' needs a value of enum type"
                        )),
                        loc,
                    );
                    return;
                };
                let Some((index, case)) = ty.case_type(name) else {
                    self.error(
                        CompileErrorKind::UnknownMember {
                            ty: ty.symbol.name().to_string(),
                            name: name.clone(),
                        },
                        loc,
                    );
                    return;
                };
                if case.values.len() != values.len() {
                    self.error(
                        CompileErrorKind::CaseArityMismatch {
                            case: name.clone(),
                            expected: case.values.len(),
                            got: values.len(),
                        },
                        loc,
                    );
                    return;
                }

                self.load_path(arm.slot, path, line);
                let symbol = self.symbol_operand(&ty.symbol, loc);
                self.emit_op_u16(OpCode::MatchCase, symbol, line);
                self.current_mut().chunk.write_byte(index as u8, line);
                arm.fail_jumps.push(self.emit_jump(OpCode::JumpIfFalse, line));

                for (i, (value, value_ty)) in values.iter().zip(&case.values).enumerate() {
                    let nested = self.space.enum_for_type(value_ty).cloned();
                    let mut inner = path.clone();
                    inner.push(i as u8);
                    self.pattern_test(value, nested.as_deref(), &inner, arm, loc);
                }
            }
        }
    }

    fn check_bindings(&mut self, pattern: &Pattern, loc: Location) {
        let names = pattern.bindings();
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                self.error(
                    CompileErrorKind::InvalidPattern(format!("'{name}' is bound more than once")),
                    loc,
                );
            }
        }
    }

    /// Push the value a pattern path addresses
    fn load_path(&mut self, slot: u8, path: &PatternPath, line: u32) {
        self.emit_op_u8(OpCode::GetLocal, slot, line);
        for index in path {
            self.emit_op_u8(OpCode::GetAssociated, *index, line);
        }
    }

    fn return_statement(&mut self, value: Option<&Expr>, loc: Location) {
        let line = loc.line;
        if self.current().kind == FunctionKind::Initializer {
            // Initializers always produce the receiver
            if let Some(value) = value {
                self.expression(value);
                self.emit_op(OpCode::Pop, line);
            }
            self.emit_op(OpCode::GetSelf, line);
        } else {
            match value {
                Some(value) => self.expression(value),
                None => self.emit_op(OpCode::None, line),
            }
        }
        self.emit_op(OpCode::Return, line);
    }

    /// A function declared inside a body binds a local before its closure
    /// is made, so the body can call itself through a capture
    fn local_function(&mut self, decl: &FuncDecl, loc: Location) {
        let Some(name) = decl.name.as_deref() else {
            self.error(
                CompileErrorKind::Internal("function declaration without a name".into()),
                loc,
            );
            return;
        };
        self.bind_function(name, decl, loc);
        self.emit_op(OpCode::Pop, loc.line);
    }

    /// Bind `name` to the closure over `decl`, leaving the closure on the
    /// stack
    fn bind_function(&mut self, name: &str, decl: &FuncDecl, loc: Location) {
        let line = loc.line;
        self.emit_op(OpCode::None, line);
        let Some(slot) = self.define_local(name, loc) else {
            return;
        };
        let symbol = self.nested_function(decl);
        self.emit_symbol_op(OpCode::MakeClosure, &symbol, loc);
        self.emit_op_u8(OpCode::SetLocal, slot, line);
    }

    // ===== Expressions =====

    fn expression(&mut self, expr: &Expr) {
        let loc = expr.loc;
        let line = loc.line;

        match &expr.kind {
            ExprKind::Literal(literal) => match literal {
                Literal::Int(n) => self.emit_constant(Value::Int(*n), loc),
                Literal::Bool(true) => self.emit_op(OpCode::True, line),
                Literal::Bool(false) => self.emit_op(OpCode::False, line),
                Literal::String(s) => self.emit_constant(Value::string(s), loc),
                Literal::None => self.emit_op(OpCode::None, line),
            },

            ExprKind::Var(name) => self.variable(name, loc),

            ExprKind::SelfRef => self.self_reference(loc),

            ExprKind::Unary { op, expr } => {
                self.expression(expr);
                let op = match op {
                    UnaryOp::Neg => OpCode::Negate,
                    UnaryOp::Not => OpCode::Not,
                };
                self.emit_op(op, line);
            }

            ExprKind::Binary { left, op, right } => self.binary(left, *op, right, loc),

            ExprKind::Assign { target, value } => self.assignment(target, value, loc),

            ExprKind::Call { callee, args } => self.call(callee, args, loc),

            ExprKind::Member { receiver, name } => self.member(receiver, name, loc),

            ExprKind::Subscript { receiver, index } => {
                self.expression(receiver);
                self.expression(index);
                self.emit_op(OpCode::Get, line);
            }

            ExprKind::Func(decl) => match decl.name.as_deref() {
                // A named literal sees itself through a scope of its own
                Some(name) => {
                    self.begin_scope();
                    self.bind_function(name, decl, loc);
                    self.end_scope();
                }
                None => {
                    let symbol = self.nested_function(decl);
                    self.emit_symbol_op(OpCode::MakeClosure, &symbol, loc);
                }
            },

            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.expression(cond);
                let else_jump = self.emit_jump(OpCode::JumpIfFalse, line);
                self.expression(then_branch);
                let end_jump = self.emit_jump(OpCode::Jump, line);
                self.patch_jump(else_jump, loc);
                self.expression(else_branch);
                self.patch_jump(end_jump, loc);
            }

            ExprKind::Array(elements) => {
                for element in elements {
                    self.expression(element);
                }
                let count = self.count_operand(elements.len(), loc);
                self.emit_op_u16(OpCode::InitArray, count, line);
            }

            ExprKind::Dictionary(entries) => {
                for (key, value) in entries {
                    self.expression(key);
                    self.expression(value);
                }
                let count = self.count_operand(entries.len(), loc);
                self.emit_op_u16(OpCode::InitDict, count, line);
            }
        }
    }

    fn binary(&mut self, left: &Expr, op: BinOp, right: &Expr, loc: Location) {
        let line = loc.line;

        match op {
            BinOp::And => {
                self.expression(left);
                let false_jump = self.emit_jump(OpCode::JumpIfFalse, line);
                self.expression(right);
                let end_jump = self.emit_jump(OpCode::Jump, line);
                self.patch_jump(false_jump, loc);
                self.emit_op(OpCode::False, line);
                self.patch_jump(end_jump, loc);
            }
            BinOp::Or => {
                self.expression(left);
                let right_jump = self.emit_jump(OpCode::JumpIfFalse, line);
                self.emit_op(OpCode::True, line);
                let end_jump = self.emit_jump(OpCode::Jump, line);
                self.patch_jump(right_jump, loc);
                self.expression(right);
                self.patch_jump(end_jump, loc);
            }
            _ => {
                self.expression(left);
                self.expression(right);
                if let Some(opcode) = binary_opcode(op) {
                    self.emit_op(opcode, line);
                }
            }
        }
    }

    fn variable(&mut self, name: &str, loc: Location) {
        let line = loc.line;

        if let Some(storage) = self.resolve_variable(name, loc) {
            match storage {
                Storage::Local(slot) => self.emit_op_u8(OpCode::GetLocal, slot, line),
                Storage::Capture(index) => self.emit_op_u8(OpCode::GetCapture, index, line),
            }
            return;
        }

        match self.space.resolve(name).cloned() {
            Some(Global::Function(symbol)) => {
                self.emit_symbol_op(OpCode::GetModuleFunction, &symbol, loc);
            }
            Some(Global::Value(symbol)) => {
                self.emit_symbol_op(OpCode::GetModuleValue, &symbol, loc);
            }
            Some(Global::Struct(symbol)) => self.emit_symbol_op(OpCode::GetStruct, &symbol, loc),
            Some(Global::Enum(_)) => {
                self.error(CompileErrorKind::TypeUsedAsValue(name.to_string()), loc);
                self.emit_op(OpCode::None, line);
            }
            None => match Builtin::from_name(name) {
                Some(builtin) => self.emit_symbol_op(OpCode::GetBuiltin, &builtin.symbol(), loc),
                None => {
                    self.error(CompileErrorKind::UnresolvedSymbol(name.to_string()), loc);
                    self.emit_op(OpCode::None, line);
                }
            },
        }
    }

    fn self_reference(&mut self, loc: Location) {
        let line = loc.line;
        if self.current().kind.has_receiver() {
            self.emit_op(OpCode::GetSelf, line);
            return;
        }

        // A closure inside a method captures the receiver slot
        let in_method = self.states.iter().any(|s| s.kind.has_receiver());
        match self.resolve_variable("self", loc) {
            Some(Storage::Capture(index)) if in_method => {
                self.emit_op_u8(OpCode::GetCapture, index, line);
            }
            _ => {
                self.error(CompileErrorKind::SelfOutsideMethod, loc);
                self.emit_op(OpCode::None, line);
            }
        }
    }

    fn assignment(&mut self, target: &Expr, value: &Expr, loc: Location) {
        let line = loc.line;

        match &target.kind {
            ExprKind::Var(name) => {
                self.expression(value);
                if let Some(storage) = self.resolve_variable(name, loc) {
                    match storage {
                        Storage::Local(slot) => self.emit_op_u8(OpCode::SetLocal, slot, line),
                        Storage::Capture(index) => {
                            self.emit_op_u8(OpCode::SetCapture, index, line);
                        }
                    }
                    return;
                }
                match self.space.resolve(name).cloned() {
                    Some(Global::Value(symbol)) => {
                        self.emit_symbol_op(OpCode::SetModuleValue, &symbol, loc);
                    }
                    Some(_) => self.error(CompileErrorKind::InvalidAssignmentTarget, loc),
                    None => {
                        self.error(CompileErrorKind::UnresolvedSymbol(name.clone()), loc);
                    }
                }
            }

            ExprKind::Member { receiver, name } => {
                let offset = self.property_offset(receiver, name, loc);
                self.expression(value);
                self.expression(receiver);
                if let Some(offset) = offset {
                    self.emit_op_u8(OpCode::SetProperty, offset, line);
                } else {
                    self.emit_op(OpCode::Pop, line);
                }
            }

            ExprKind::Subscript { receiver, index } => {
                self.expression(value);
                self.expression(receiver);
                self.expression(index);
                self.emit_op(OpCode::SetSubscript, line);
            }

            _ => {
                self.error(CompileErrorKind::InvalidAssignmentTarget, loc);
                self.expression(value);
            }
        }
    }

    fn member(&mut self, receiver: &Expr, name: &str, loc: Location) {
        let line = loc.line;

        if let Some(case) = self.enum_case(receiver, name, loc) {
            self.emit_constant(case, loc);
            return;
        }

        let ty = self.space.struct_for_type(&receiver.ty).cloned();
        let Some(ty) = ty else {
            self.unknown_member(receiver, name, loc);
            return;
        };

        if let Some(offset) = ty.property_offset(name) {
            self.expression(receiver);
            self.emit_op_u8(OpCode::GetProperty, offset_operand(offset), line);
        } else if let Some(method) = ty.method(name) {
            self.expression(receiver);
            self.emit_symbol_op(OpCode::GetMethod, method, loc);
        } else {
            self.unknown_member(receiver, name, loc);
        }
    }

    /// The enum a receiver names, when it names one rather than a binding
    fn named_enum(&self, receiver: &Expr) -> Option<Rc<EnumType>> {
        let ExprKind::Var(enum_name) = &receiver.kind else {
            return None;
        };
        if self.is_lexical(enum_name) {
            return None;
        }
        let Some(Global::Enum(symbol)) = self.space.resolve(enum_name) else {
            return None;
        };
        self.space.enum_type(symbol).cloned()
    }

    /// `Enum.case`: the case, or its constructor when it carries values
    fn enum_case(&mut self, receiver: &Expr, name: &str, loc: Location) -> Option<Value> {
        let ty = self.named_enum(receiver)?;
        match ty.case(name) {
            Some(case) => Some(Value::EnumCase(Rc::new(case))),
            None => {
                self.error(
                    CompileErrorKind::UnknownMember {
                        ty: ty.symbol.name().to_string(),
                        name: name.to_string(),
                    },
                    loc,
                );
                Some(Value::None)
            }
        }
    }

    fn unknown_member(&mut self, receiver: &Expr, name: &str, loc: Location) {
        self.error(
            CompileErrorKind::UnknownMember {
                ty: receiver.ty.to_string(),
                name: name.to_string(),
            },
            loc,
        );
        self.emit_op(OpCode::None, loc.line);
    }

    fn property_offset(&mut self, receiver: &Expr, name: &str, loc: Location) -> Option<u8> {
        let offset = self
            .space
            .struct_for_type(&receiver.ty)
            .and_then(|ty| ty.property_offset(name));
        if offset.is_none() {
            self.error(
                CompileErrorKind::UnknownMember {
                    ty: receiver.ty.to_string(),
                    name: name.to_string(),
                },
                loc,
            );
        }
        offset.map(offset_operand)
    }

    fn store_self_property(&mut self, owner: &StructType, name: &str, loc: Location) {
        let line = loc.line;
        self.emit_op(OpCode::GetSelf, line);
        match owner.property_offset(name) {
            Some(offset) => self.emit_op_u8(OpCode::SetProperty, offset_operand(offset), line),
            None => {
                self.error(
                    CompileErrorKind::UnknownMember {
                        ty: owner.name.clone(),
                        name: name.to_string(),
                    },
                    loc,
                );
                self.emit_op(OpCode::Pop, line);
            }
        }
        self.emit_op(OpCode::Pop, line);
    }

    fn call(&mut self, callee: &Expr, args: &[Argument], loc: Location) {
        let line = loc.line;

        // receiver.method(args) dispatches without materializing a bound method
        if let ExprKind::Member { receiver, name } = &callee.kind {
            let method = self
                .space
                .struct_for_type(&receiver.ty)
                .filter(|ty| ty.property_offset(name).is_none())
                .and_then(|ty| ty.method(name))
                .cloned();
            if let Some(method) = method {
                self.expression(receiver);
                let params = self.space.param_names(&method).map(<[String]>::to_vec);
                let argc = self.arguments(name, params, args, loc);
                let index = self.symbol_operand(&method, loc);
                self.emit_op_u16(OpCode::InvokeMethod, index, line);
                self.current_mut().chunk.write_byte(argc, line);
                return;
            }
        }

        if let ExprKind::Member { receiver, name } = &callee.kind {
            let declared = self
                .named_enum(receiver)
                .and_then(|ty| ty.case_type(name).map(|(_, case)| case.values.len()));
            if let Some(expected) = declared.filter(|expected| *expected != args.len()) {
                self.error(
                    CompileErrorKind::CaseArityMismatch {
                        case: name.clone(),
                        expected,
                        got: args.len(),
                    },
                    loc,
                );
            }
        }

        let params = self.callee_params(callee);
        self.expression(callee);
        let label = match &callee.kind {
            ExprKind::Var(name) => name.as_str(),
            _ => "<callee>",
        };
        let argc = self.arguments(label, params, args, loc);
        self.emit_op_u8(OpCode::Call, argc, line);
    }

    /// Parameter names of a call target known at compile time
    fn callee_params(&self, callee: &Expr) -> Option<Vec<String>> {
        let ExprKind::Var(name) = &callee.kind else {
            return None;
        };
        if self.is_lexical(name) {
            return None;
        }
        match self.space.resolve(name)? {
            Global::Struct(symbol) => self.space.struct_type(symbol).map(|ty| ty.init_params.clone()),
            Global::Function(symbol) => self.space.param_names(symbol).map(<[String]>::to_vec),
            _ => None,
        }
    }

    /// Emit call arguments in parameter order, returning the count
    ///
    /// Labelled arguments go to the parameter of that name; unlabelled ones
    /// fill the remaining parameters left to right.
    fn arguments(
        &mut self,
        callee: &str,
        params: Option<Vec<String>>,
        args: &[Argument],
        loc: Location,
    ) -> u8 {
        let labelled = args.iter().any(|arg| arg.label.is_some());
        let ordered: Vec<&Expr> = match params {
            Some(params) if labelled => {
                let mut slots: Vec<Option<&Expr>> = vec![None; params.len().max(args.len())];
                let mut positional = Vec::new();
                for arg in args {
                    let Some(label) = &arg.label else {
                        positional.push(&arg.value);
                        continue;
                    };
                    match params.iter().position(|p| p == label) {
                        Some(i) if slots[i].is_none() => slots[i] = Some(&arg.value),
                        Some(_) => self.error(
                            CompileErrorKind::DuplicateArgumentLabel {
                                callee: callee.to_string(),
                                label: label.clone(),
                            },
                            arg.value.loc,
                        ),
                        None => self.error(
                            CompileErrorKind::UnknownArgumentLabel {
                                callee: callee.to_string(),
                                label: label.clone(),
                            },
                            arg.value.loc,
                        ),
                    }
                }
                let mut positional = positional.into_iter();
                for slot in slots.iter_mut().filter(|slot| slot.is_none()) {
                    *slot = positional.next();
                }
                slots.into_iter().flatten().collect()
            }
            _ => args.iter().map(|arg| &arg.value).collect(),
        };

        if ordered.len() > MAX_ARGS {
            self.error(CompileErrorKind::TooManyArguments, loc);
        }
        for arg in &ordered {
            self.expression(arg);
        }
        ordered.len().min(MAX_ARGS) as u8
    }

    // ===== Variables and Scopes =====

    fn begin_scope(&mut self) {
        self.current_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let state = self.current_mut();
        state.scope_depth -= 1;
        let depth = state.scope_depth;
        while state.locals.last().is_some_and(|local| local.depth > depth) {
            state.locals.pop();
        }
    }

    /// Reserve a fresh slot for `name` in the current scope
    fn declare_local(&mut self, name: &str, loc: Location) -> Option<u8> {
        let state = self.current_mut();
        let slot = state.chunk.local_names.len();
        if slot >= MAX_LOCALS {
            self.error(CompileErrorKind::TooManyLocals, loc);
            return None;
        }

        let depth = state.scope_depth;
        state.chunk.local_names.push(name.to_string());
        state.locals.push(Local {
            name: name.to_string(),
            depth,
            slot: slot as u8,
            define_offset: None,
            captured: false,
        });
        Some(slot as u8)
    }

    /// Bind the value on top of the stack to a new local
    fn define_local(&mut self, name: &str, loc: Location) -> Option<u8> {
        let Some(slot) = self.declare_local(name, loc) else {
            self.emit_op(OpCode::Pop, loc.line);
            return None;
        };
        let state = self.current_mut();
        let offset = state.chunk.current_offset();
        state.chunk.write_op_u8(OpCode::DefineLocal, slot, loc.line);
        if let Some(local) = state.locals.last_mut() {
            local.define_offset = Some(offset);
        }
        Some(slot)
    }

    /// Whether `name` is bound by any enclosing chunk's locals or captures
    fn is_lexical(&self, name: &str) -> bool {
        self.states.iter().any(|state| {
            state.find_local(name).is_some() || state.chunk.captures.iter().any(|c| c.name == name)
        })
    }

    fn resolve_variable(&mut self, name: &str, loc: Location) -> Option<Storage> {
        let top = self.states.len() - 1;
        if let Some(i) = self.states[top].find_local(name) {
            return Some(Storage::Local(self.states[top].locals[i].slot));
        }
        self.resolve_capture(top, name, loc).map(Storage::Capture)
    }

    /// Resolve `name` as a capture of the chunk at `level`, recording the
    /// capture in every chunk between it and the defining one
    fn resolve_capture(&mut self, level: usize, name: &str, loc: Location) -> Option<u8> {
        if let Some(i) = self.states[level]
            .chunk
            .captures
            .iter()
            .position(|c| c.name == name)
        {
            return Some(i as u8);
        }
        if level == 0 {
            return None;
        }

        let enclosing = level - 1;
        let source = match self.states[enclosing].find_local(name) {
            Some(i) => {
                self.mark_captured(enclosing, i);
                CaptureSource::Local(self.states[enclosing].locals[i].slot)
            }
            None => CaptureSource::Capture(self.resolve_capture(enclosing, name, loc)?),
        };
        self.add_capture(level, name, source, loc)
    }

    fn mark_captured(&mut self, level: usize, index: usize) {
        let state = &mut self.states[level];
        let local = &mut state.locals[index];
        if local.captured {
            return;
        }
        local.captured = true;
        if let Some(offset) = local.define_offset {
            state.chunk.patch_op(offset, OpCode::DefineCell);
        }
    }

    fn add_capture(
        &mut self,
        level: usize,
        name: &str,
        source: CaptureSource,
        loc: Location,
    ) -> Option<u8> {
        let captures = &mut self.states[level].chunk.captures;
        if captures.len() >= MAX_CAPTURES {
            self.error(CompileErrorKind::TooManyCaptures, loc);
            return None;
        }
        captures.push(CaptureInfo {
            name: name.to_string(),
            source,
        });
        Some((captures.len() - 1) as u8)
    }

    // ===== Bytecode Emission Helpers =====

    fn emit_op(&mut self, op: OpCode, line: u32) {
        self.current_mut().chunk.write_op(op, line);
    }

    fn emit_op_u8(&mut self, op: OpCode, operand: u8, line: u32) {
        self.current_mut().chunk.write_op_u8(op, operand, line);
    }

    fn emit_op_u16(&mut self, op: OpCode, operand: u16, line: u32) {
        self.current_mut().chunk.write_op_u16(op, operand, line);
    }

    fn emit_symbol_op(&mut self, op: OpCode, symbol: &Symbol, loc: Location) {
        let index = self.symbol_operand(symbol, loc);
        self.emit_op_u16(op, index, loc.line);
    }

    fn symbol_operand(&mut self, symbol: &Symbol, loc: Location) -> u16 {
        match self.current_mut().chunk.add_symbol(symbol) {
            Some(index) => index,
            None => {
                self.error(CompileErrorKind::TooManySymbols, loc);
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value, loc: Location) {
        if self.current_mut().chunk.emit_constant(value, loc.line).is_none() {
            self.error(CompileErrorKind::TooManyConstants, loc);
        }
    }

    fn count_operand(&mut self, count: usize, loc: Location) -> u16 {
        u16::try_from(count).unwrap_or_else(|_| {
            self.error(CompileErrorKind::TooManyArguments, loc);
            u16::MAX
        })
    }

    fn emit_jump(&mut self, op: OpCode, line: u32) -> usize {
        self.current_mut().chunk.emit_jump(op, line)
    }

    fn patch_jump(&mut self, offset: usize, loc: Location) {
        if self.current_mut().chunk.patch_jump(offset).is_none() {
            self.error(CompileErrorKind::JumpTooLarge, loc);
        }
    }

    fn emit_loop(&mut self, start: usize, loc: Location) {
        if self.current_mut().chunk.emit_loop(start, loc.line).is_none() {
            self.error(CompileErrorKind::JumpTooLarge, loc);
        }
    }

    // ===== Error Handling =====

    fn error(&mut self, kind: CompileErrorKind, loc: Location) {
        self.errors
            .push(CompileError::new(kind, self.path.clone(), loc));
    }
}

/// Parameters of the initializer synthesized for a struct without `init`
pub(crate) fn synthesized_params(decl: &StructDecl) -> Vec<Param> {
    decl.properties
        .iter()
        .filter(|p| p.default.is_none())
        .map(|p| Param::new(p.name.clone(), p.ty.clone()))
        .collect()
}

/// Opcode of a non-short-circuit binary operator
fn binary_opcode(op: BinOp) -> Option<OpCode> {
    Some(match op {
        BinOp::Add => OpCode::Add,
        BinOp::Sub => OpCode::Subtract,
        BinOp::Mul => OpCode::Multiply,
        BinOp::Div => OpCode::Divide,
        BinOp::Mod => OpCode::Modulo,
        BinOp::Eq => OpCode::Equal,
        BinOp::Ne => OpCode::NotEqual,
        BinOp::Lt => OpCode::Less,
        BinOp::Le => OpCode::LessEqual,
        BinOp::Gt => OpCode::Greater,
        BinOp::Ge => OpCode::GreaterEqual,
        BinOp::And | BinOp::Or => return None,
    })
}

/// Property offsets are bounded when the struct is collected
fn offset_operand(offset: usize) -> u8 {
    u8::try_from(offset).unwrap_or(u8::MAX)
}
