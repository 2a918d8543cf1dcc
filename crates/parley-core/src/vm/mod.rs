//! Virtual machine for the Parley programming language
//!
//! A stack-based bytecode interpreter over a linked [`Module`]. Execution is
//! a single fetch-decode-execute loop over a value stack and a call-frame
//! stack; it either returns from the outermost frame or traps.
//!
//! Captured variables live in heap cells (see [`heap`]). A local slot is
//! promoted to a cell either by a `DEFINE_CELL` at its binding site or, for
//! parameters, the first time `MAKE_CLOSURE` captures it. Every holder of
//! the cell then observes every write.

pub mod builtins;
mod config;
mod error;
mod frame;
pub mod heap;
mod host;
mod output;

pub use builtins::Builtin;
pub use config::{VmConfig, DEFAULT_MAX_FRAMES, DEFAULT_MAX_STACK};
pub use error::{RuntimeError, RuntimeErrorKind, RuntimeResult, StackFrame};
pub use heap::{Heap, HeapError};
pub use output::{with_output_capture, OutputCapture};

use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::bytecode::{
    decode_instruction, BoundMethod, CaptureSource, Chunk, Closure, Module, OpCode, StructType,
    Symbol, Value,
};
use crate::standard;

use frame::{CallFrame, Slot};
use heap::{CellRef, InstanceRef};
use host::HostTypes;

/// Outcome of running a module to completion
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    /// The outermost frame returned
    Ok {
        /// The returned value
        value: Value,
        /// Wall-clock time spent executing
        elapsed: Duration,
    },
    /// Execution trapped; the message carries the trap location
    Error(String),
}

impl ExecutionResult {
    /// Returns true for a successful run
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, ExecutionResult::Ok { .. })
    }

    /// The returned value, if the run succeeded
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            ExecutionResult::Ok { value, .. } => Some(value),
            ExecutionResult::Error(_) => None,
        }
    }

    /// The error message, if the run trapped
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            ExecutionResult::Ok { .. } => None,
            ExecutionResult::Error(message) => Some(message),
        }
    }
}

/// The Parley virtual machine
pub struct VirtualMachine {
    /// The module being executed, with its import graph
    module: Rc<Module>,

    /// Limits and switches
    config: VmConfig,

    /// Value stack
    stack: Vec<Value>,

    /// Call stack
    frames: Vec<CallFrame>,

    /// Cells, instances and raw blocks
    heap: Heap,

    /// Module values that have been initialized
    module_values: HashMap<Symbol, Value>,

    /// One closure per module function, so function values compare equal
    functions: HashMap<Symbol, Rc<Closure>>,

    /// Descriptors for host-backed collections
    host_types: HostTypes,

    /// Offset of the instruction being executed
    op_start: usize,
}

impl VirtualMachine {
    /// Create a VM for a linked module
    ///
    /// # Errors
    /// Returns `NotExecutable` if the module carries diagnostics or has no
    /// entry chunk.
    pub fn new(module: impl Into<Rc<Module>>, config: VmConfig) -> RuntimeResult<Self> {
        let module = module.into();
        if !module.is_executable() {
            return Err(RuntimeError::new(RuntimeErrorKind::NotExecutable(
                module.name.clone(),
            )));
        }

        let host_types = HostTypes {
            array: host_type(&module, standard::ARRAY, standard::array_type),
            dictionary: host_type(&module, standard::DICTIONARY, standard::dictionary_type),
        };

        let heap = Heap::with_block_limit(config.max_block_slots);
        Ok(Self {
            module,
            config,
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(16),
            heap,
            module_values: HashMap::new(),
            functions: HashMap::new(),
            host_types,
            op_start: 0,
        })
    }

    /// Run the module's entry chunk to completion
    ///
    /// # Errors
    /// Returns the trap that halted execution.
    pub fn run(&mut self) -> RuntimeResult<Value> {
        self.stack.clear();
        self.frames.clear();
        self.module_values.clear();

        let main = self.module.main.clone().ok_or_else(|| {
            RuntimeError::new(RuntimeErrorKind::NotExecutable(self.module.name.clone()))
        })?;

        debug!(module = %self.module.name, "starting execution");
        self.frames.push(CallFrame::new(Rc::new(Closure::new(main)), 0));

        let result = self.execute_loop();
        match &result {
            Ok(value) => debug!(module = %self.module.name, %value, "execution finished"),
            Err(error) => debug!(module = %self.module.name, kind = %error.kind, "execution trapped"),
        }
        self.frames.clear();
        result
    }

    /// Run the module and time it
    pub fn execute(&mut self) -> ExecutionResult {
        let start = Instant::now();
        match self.run() {
            Ok(value) => ExecutionResult::Ok {
                value,
                elapsed: start.elapsed(),
            },
            Err(error) => ExecutionResult::Error(error.to_string()),
        }
    }

    /// The heap, for inspecting instances after a run
    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// The module being executed
    #[must_use]
    pub fn module(&self) -> &Rc<Module> {
        &self.module
    }

    /// Main execution loop
    fn execute_loop(&mut self) -> RuntimeResult<Value> {
        loop {
            let opcode = self.fetch()?;

            if self.config.trace_execution {
                self.trace_instruction();
            }

            // Frames are popped here rather than in execute_opcode
            if opcode == OpCode::Return {
                let result = self.pop()?;
                let Some(frame) = self.frames.pop() else {
                    return Err(self.error(RuntimeErrorKind::StackUnderflow));
                };

                if self.frames.is_empty() {
                    return Ok(result);
                }

                self.stack.truncate(frame.stack_base);
                self.push(result)?;
                continue;
            }

            self.execute_opcode(opcode)?;
        }
    }

    fn fetch(&mut self) -> RuntimeResult<OpCode> {
        let frame = self.frame();
        let ip = frame.ip;
        let byte = frame.chunk().read_byte(ip);
        self.op_start = ip;

        let Some(byte) = byte else {
            return Err(self.error(RuntimeErrorKind::Internal(
                "execution ran past the end of the chunk".to_string(),
            )));
        };
        let opcode =
            OpCode::try_from(byte).map_err(|op| self.error(RuntimeErrorKind::InvalidOpcode(op)))?;

        self.frame_mut().ip += 1;
        Ok(opcode)
    }

    fn trace_instruction(&self) {
        let frame = self.frame();
        if let Some(instruction) = decode_instruction(frame.chunk(), self.op_start) {
            trace!(
                chunk = %frame.chunk().name,
                depth = self.stack.len(),
                frames = self.frames.len(),
                "{:04} {instruction}",
                self.op_start
            );
        }
    }

    fn execute_opcode(&mut self, opcode: OpCode) -> RuntimeResult<()> {
        match opcode {
            OpCode::Constant => {
                let index = self.read_u16()?;
                let value = self.frame().chunk().get_constant(index).cloned();
                let value = value.ok_or_else(|| {
                    self.error(RuntimeErrorKind::Internal(format!(
                        "constant index {index} out of range"
                    )))
                })?;
                self.push(value)?;
            }

            OpCode::None => self.push(Value::None)?,
            OpCode::True => self.push(Value::Bool(true))?,
            OpCode::False => self.push(Value::Bool(false))?,

            OpCode::Pop => {
                self.pop()?;
            }

            // ===== Locals =====
            OpCode::GetLocal => {
                let slot = usize::from(self.read_u8()?);
                let value = self.get_local(slot)?;
                self.push(value)?;
            }

            OpCode::SetLocal => {
                let slot = usize::from(self.read_u8()?);
                let value = self.peek(0)?.clone();
                self.set_local(slot, value)?;
            }

            OpCode::DefineLocal => {
                let slot = usize::from(self.read_u8()?);
                let value = self.pop()?;
                *self.frame_mut().slot_mut(slot) = Slot::Value(value);
            }

            OpCode::DefineCell => {
                let slot = usize::from(self.read_u8()?);
                let value = self.pop()?;
                let cell = self.heap.allocate_cell(value);
                *self.frame_mut().slot_mut(slot) = Slot::Cell(cell);
            }

            // ===== Captures =====
            OpCode::GetCapture => {
                let index = usize::from(self.read_u8()?);
                let cell = self.capture(index)?;
                let value = self.read_cell(cell)?;
                self.push(value)?;
            }

            OpCode::SetCapture => {
                let index = usize::from(self.read_u8()?);
                let cell = self.capture(index)?;
                let value = self.peek(0)?.clone();
                self.write_cell(cell, value)?;
            }

            // ===== Module Symbols =====
            OpCode::GetModuleValue => {
                let symbol = self.read_symbol()?;
                if let Some(value) = self.module_values.get(&symbol) {
                    let value = value.clone();
                    self.push(value)?;
                } else {
                    // First access runs the initializer, which stores and
                    // returns the value
                    let Some(initializer) = self.module.value_initializer(&symbol).cloned() else {
                        return Err(self.error(RuntimeErrorKind::UnresolvedSymbol(
                            symbol.to_string(),
                        )));
                    };
                    trace!(%symbol, "initializing module value");
                    let base = self.stack.len();
                    self.push_frame(Rc::new(Closure::new(initializer)), base, Vec::new(), None)?;
                }
            }

            OpCode::SetModuleValue => {
                let symbol = self.read_symbol()?;
                let value = self.peek(0)?.clone();
                self.module_values.insert(symbol, value);
            }

            OpCode::GetModuleFunction => {
                let symbol = self.read_symbol()?;
                let closure = self.module_function(&symbol)?;
                self.push(Value::Closure(closure))?;
            }

            OpCode::GetStruct => {
                let symbol = self.read_symbol()?;
                let Some(ty) = self.module.struct_type(&symbol).cloned() else {
                    return Err(self.error(RuntimeErrorKind::UnresolvedSymbol(symbol.to_string())));
                };
                self.push(Value::Struct(ty))?;
            }

            OpCode::GetBuiltin => {
                let symbol = self.read_symbol()?;
                let Some(builtin) = Builtin::from_symbol(&symbol) else {
                    return Err(self.error(RuntimeErrorKind::UnresolvedSymbol(symbol.to_string())));
                };
                self.push(Value::Builtin(builtin))?;
            }

            OpCode::GetSelf => {
                if !self.frame().chunk().has_receiver {
                    return Err(self.error(RuntimeErrorKind::Internal(
                        "self read outside a method".to_string(),
                    )));
                }
                let receiver = self.get_local(0)?;
                self.push(receiver)?;
            }

            // ===== Functions =====
            OpCode::MakeClosure => {
                let symbol = self.read_symbol()?;
                let chunk = self.lookup_chunk(&symbol)?;

                let mut captures = Vec::with_capacity(chunk.captures.len());
                for capture in &chunk.captures {
                    let cell = match capture.source {
                        CaptureSource::Local(slot) => self.promote_local(usize::from(slot)),
                        CaptureSource::Capture(index) => self.capture(usize::from(index))?,
                    };
                    captures.push(cell);
                }

                self.push(Value::Closure(Rc::new(Closure { chunk, captures })))?;
            }

            OpCode::Call => {
                let argc = self.read_u8()?;
                self.call_value(argc)?;
            }

            OpCode::CallChunk => {
                let symbol = self.read_symbol()?;
                let chunk = self.lookup_chunk(&symbol)?;
                let base = self.stack.len();
                self.push_frame(Rc::new(Closure::new(chunk)), base, Vec::new(), None)?;
            }

            OpCode::InvokeMethod => {
                let method = self.read_symbol()?;
                let argc = self.read_u8()?;
                let base = self.callee_index(argc)?;
                let receiver = self.expect_instance(&self.stack[base], "method call")?;
                self.call_method(receiver, &method, base)?;
            }

            OpCode::GetMethod => {
                let method = self.read_symbol()?;
                let value = self.pop()?;
                let receiver = self.expect_instance(&value, "method access")?;
                self.push(Value::BoundMethod(Rc::new(BoundMethod { receiver, method })))?;
            }

            OpCode::Return => {
                return Err(self.error(RuntimeErrorKind::Internal(
                    "return dispatched outside the run loop".to_string(),
                )));
            }

            // ===== Struct Instances =====
            OpCode::GetProperty => {
                let offset = usize::from(self.read_u8()?);
                let value = self.pop()?;
                let instance = self.expect_instance(&value, "property access")?;
                let property = self
                    .heap
                    .get_field(instance, offset)
                    .map_err(|e| self.error(e.into()))?;
                self.push(property)?;
            }

            OpCode::SetProperty => {
                let offset = usize::from(self.read_u8()?);
                let target = self.pop()?;
                let instance = self.expect_instance(&target, "property assignment")?;
                let value = self.peek(0)?.clone();
                self.heap
                    .set_field(instance, offset, value)
                    .map_err(|e| self.error(e.into()))?;
            }

            // ===== Collections =====
            OpCode::InitArray => {
                let count = usize::from(self.read_u16()?);
                let elements = self.pop_many(count)?;
                let array = host::new_array(&mut self.heap, &self.host_types, elements)
                    .map_err(|kind| self.error(kind))?;
                self.push(array)?;
            }

            OpCode::InitDict => {
                let count = usize::from(self.read_u16()?);
                let mut flat = self.pop_many(count * 2)?.into_iter();
                let mut entries = Vec::with_capacity(count);
                while let (Some(key), Some(value)) = (flat.next(), flat.next()) {
                    entries.push((key, value));
                }
                let dict = host::new_dictionary(&mut self.heap, &self.host_types, entries)
                    .map_err(|kind| self.error(kind))?;
                self.push(dict)?;
            }

            OpCode::Get => {
                let index = self.pop()?;
                let receiver = self.pop()?;
                let element = host::subscript_get(&self.heap, &receiver, &index)
                    .map_err(|kind| self.error(kind))?;
                self.push(element)?;
            }

            OpCode::SetSubscript => {
                let index = self.pop()?;
                let receiver = self.pop()?;
                let value = self.peek(0)?.clone();
                host::subscript_set(&mut self.heap, &receiver, &index, value)
                    .map_err(|kind| self.error(kind))?;
            }

            // ===== Arithmetic and Comparison =====
            OpCode::Add
            | OpCode::Subtract
            | OpCode::Multiply
            | OpCode::Divide
            | OpCode::Modulo
            | OpCode::Less
            | OpCode::Greater
            | OpCode::LessEqual
            | OpCode::GreaterEqual => {
                let b = self.pop()?;
                let a = self.pop()?;
                let result = binary_op(opcode, &a, &b).map_err(|kind| self.error(kind))?;
                self.push(result)?;
            }

            OpCode::Equal => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Bool(a == b))?;
            }

            OpCode::NotEqual => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Bool(a != b))?;
            }

            OpCode::Negate => {
                let value = self.pop()?;
                let negated = match value {
                    Value::Int(n) => n
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or(RuntimeErrorKind::IntegerOverflow("negation")),
                    other => Err(RuntimeErrorKind::TypeMismatch {
                        expected: "int",
                        got: other.type_name(),
                        operation: "negation",
                    }),
                };
                let negated = negated.map_err(|kind| self.error(kind))?;
                self.push(negated)?;
            }

            OpCode::Not => {
                let value = self.pop()?;
                self.push(Value::Bool(!value.is_truthy()))?;
            }

            // ===== Control Flow =====
            OpCode::Jump | OpCode::Loop => {
                let offset = self.read_i16()?;
                self.jump(offset)?;
            }

            OpCode::JumpIfFalse => {
                let offset = self.read_i16()?;
                let condition = self.pop()?;
                if !condition.is_truthy() {
                    self.jump(offset)?;
                }
            }

            OpCode::MatchCase => {
                let owner = self.read_symbol()?;
                let index = u32::from(self.read_u8()?);
                let value = self.pop()?;
                let matched = matches!(
                    &value,
                    Value::EnumCase(case)
                        if case.owner == owner && case.index == index && !case.is_constructor()
                );
                self.push(Value::Bool(matched))?;
            }

            OpCode::GetAssociated => {
                let index = self.read_u8()?;
                let value = self.pop()?;
                let Value::EnumCase(case) = &value else {
                    return Err(self.error(RuntimeErrorKind::TypeMismatch {
                        expected: "enum case",
                        got: value.type_name(),
                        operation: "associated value access",
                    }));
                };
                let associated = case.values.get(usize::from(index)).cloned().ok_or_else(|| {
                    self.error(RuntimeErrorKind::IndexOutOfBounds {
                        index: i64::from(index),
                        length: case.values.len(),
                    })
                })?;
                self.push(associated)?;
            }
        }

        Ok(())
    }

    // ===== Stack operations =====

    #[inline]
    fn push(&mut self, value: Value) -> RuntimeResult<()> {
        if self.stack.len() >= self.config.max_stack {
            return Err(self.error(RuntimeErrorKind::StackOverflow));
        }
        self.stack.push(value);
        Ok(())
    }

    #[inline]
    fn pop(&mut self) -> RuntimeResult<Value> {
        match self.stack.pop() {
            Some(value) => Ok(value),
            None => Err(self.error(RuntimeErrorKind::StackUnderflow)),
        }
    }

    #[inline]
    fn peek(&self, distance: usize) -> RuntimeResult<&Value> {
        self.stack
            .len()
            .checked_sub(1 + distance)
            .and_then(|i| self.stack.get(i))
            .ok_or_else(|| self.error(RuntimeErrorKind::StackUnderflow))
    }

    /// Pop `count` values, returned in push order
    fn pop_many(&mut self, count: usize) -> RuntimeResult<Vec<Value>> {
        let Some(start) = self.stack.len().checked_sub(count) else {
            return Err(self.error(RuntimeErrorKind::StackUnderflow));
        };
        Ok(self.stack.split_off(start))
    }

    /// Stack index of the callee (or receiver) below `argc` arguments
    fn callee_index(&self, argc: u8) -> RuntimeResult<usize> {
        self.stack
            .len()
            .checked_sub(usize::from(argc) + 1)
            .ok_or_else(|| self.error(RuntimeErrorKind::StackUnderflow))
    }

    // ===== Frame operations =====

    #[inline]
    fn frame(&self) -> &CallFrame {
        &self.frames[self.frames.len() - 1]
    }

    #[inline]
    fn frame_mut(&mut self) -> &mut CallFrame {
        let len = self.frames.len();
        &mut self.frames[len - 1]
    }

    // ===== Bytecode reading =====

    fn read_u8(&mut self) -> RuntimeResult<u8> {
        let frame = self.frame_mut();
        let byte = frame.chunk().read_byte(frame.ip);
        frame.ip += 1;
        byte.ok_or_else(|| self.truncated())
    }

    fn read_u16(&mut self) -> RuntimeResult<u16> {
        let frame = self.frame_mut();
        let value = frame.chunk().read_u16(frame.ip);
        frame.ip += 2;
        value.ok_or_else(|| self.truncated())
    }

    fn read_i16(&mut self) -> RuntimeResult<i16> {
        let frame = self.frame_mut();
        let value = frame.chunk().read_i16(frame.ip);
        frame.ip += 2;
        value.ok_or_else(|| self.truncated())
    }

    fn read_symbol(&mut self) -> RuntimeResult<Symbol> {
        let index = self.read_u16()?;
        let symbol = self.frame().chunk().get_symbol(index).cloned();
        symbol.ok_or_else(|| {
            self.error(RuntimeErrorKind::Internal(format!(
                "symbol index {index} out of range"
            )))
        })
    }

    fn truncated(&self) -> RuntimeError {
        self.error(RuntimeErrorKind::Internal(
            "truncated instruction operand".to_string(),
        ))
    }

    fn jump(&mut self, offset: i16) -> RuntimeResult<()> {
        let frame = self.frame_mut();
        match frame.ip.checked_add_signed(isize::from(offset)) {
            Some(target) => {
                frame.ip = target;
                Ok(())
            }
            None => Err(self.error(RuntimeErrorKind::Internal(format!(
                "jump by {offset} leaves the chunk"
            )))),
        }
    }

    // ===== Locals and cells =====

    fn get_local(&self, slot: usize) -> RuntimeResult<Value> {
        match self.frame().locals.get(slot) {
            Some(Slot::Value(value)) => Ok(value.clone()),
            Some(Slot::Cell(cell)) => self.read_cell(*cell),
            _ => Err(self.error(RuntimeErrorKind::Internal(format!(
                "read of unbound local slot {slot}"
            )))),
        }
    }

    fn set_local(&mut self, slot: usize, value: Value) -> RuntimeResult<()> {
        let cell = match self.frame().locals.get(slot) {
            Some(Slot::Cell(cell)) => Some(*cell),
            _ => None,
        };
        match cell {
            Some(cell) => self.write_cell(cell, value),
            None => {
                *self.frame_mut().slot_mut(slot) = Slot::Value(value);
                Ok(())
            }
        }
    }

    /// Move a local into a cell (if it is not in one already) and return
    /// the cell
    fn promote_local(&mut self, slot: usize) -> CellRef {
        let current = std::mem::replace(self.frame_mut().slot_mut(slot), Slot::Empty);
        let cell = match current {
            Slot::Cell(cell) => cell,
            Slot::Value(value) => self.heap.allocate_cell(value),
            Slot::Empty => self.heap.allocate_cell(Value::None),
        };
        *self.frame_mut().slot_mut(slot) = Slot::Cell(cell);
        cell
    }

    fn capture(&self, index: usize) -> RuntimeResult<CellRef> {
        self.frame()
            .closure
            .captures
            .get(index)
            .copied()
            .ok_or_else(|| {
                self.error(RuntimeErrorKind::Internal(format!(
                    "capture index {index} out of range"
                )))
            })
    }

    fn read_cell(&self, cell: CellRef) -> RuntimeResult<Value> {
        self.heap.read_cell(cell).map_err(|e| self.error(e.into()))
    }

    fn write_cell(&mut self, cell: CellRef, value: Value) -> RuntimeResult<()> {
        self.heap
            .write_cell(cell, value)
            .map_err(|e| self.error(e.into()))
    }

    // ===== Function calls =====

    fn lookup_chunk(&self, symbol: &Symbol) -> RuntimeResult<Rc<Chunk>> {
        self.module
            .chunk(symbol)
            .cloned()
            .ok_or_else(|| self.error(RuntimeErrorKind::UnresolvedSymbol(symbol.to_string())))
    }

    fn module_function(&mut self, symbol: &Symbol) -> RuntimeResult<Rc<Closure>> {
        if let Some(closure) = self.functions.get(symbol) {
            return Ok(Rc::clone(closure));
        }
        let closure = Rc::new(Closure::new(self.lookup_chunk(symbol)?));
        self.functions.insert(symbol.clone(), Rc::clone(&closure));
        Ok(closure)
    }

    fn expect_instance(&self, value: &Value, operation: &'static str) -> RuntimeResult<InstanceRef> {
        match value {
            Value::Instance(instance) => Ok(*instance),
            other => Err(self.error(RuntimeErrorKind::TypeMismatch {
                expected: "instance",
                got: other.type_name(),
                operation,
            })),
        }
    }

    /// Call the value below the top `argc` stack values
    fn call_value(&mut self, argc: u8) -> RuntimeResult<()> {
        let base = self.callee_index(argc)?;
        let callee = self.stack[base].clone();

        match callee {
            Value::Closure(closure) => {
                let args = self.stack.split_off(base + 1);
                self.push_frame(closure, base, args, None)
            }
            Value::BoundMethod(bound) => self.call_method(bound.receiver, &bound.method, base),
            Value::Struct(ty) => self.construct(&ty, base),
            Value::EnumCase(case) if case.is_constructor() => {
                if argc != case.arity {
                    return Err(self.error(RuntimeErrorKind::ArityMismatch {
                        callee: case.to_string(),
                        expected: case.arity,
                        got: argc,
                    }));
                }
                let values = self.stack.split_off(base + 1);
                self.stack.truncate(base);
                self.push(Value::EnumCase(Rc::new(case.with_values(values))))
            }
            Value::Builtin(builtin) => {
                if argc != builtin.arity() {
                    return Err(self.error(RuntimeErrorKind::ArityMismatch {
                        callee: builtin.name().to_string(),
                        expected: builtin.arity(),
                        got: argc,
                    }));
                }
                let args = self.stack.split_off(base + 1);
                self.stack.truncate(base);
                let result = builtin
                    .call(&mut self.heap, &args)
                    .map_err(|kind| self.error(kind))?;
                self.push(result)
            }
            other => Err(self.error(RuntimeErrorKind::NotCallable(other.type_name()))),
        }
    }

    /// Call a method whose receiver sits at `base` with arguments above it
    fn call_method(
        &mut self,
        receiver: InstanceRef,
        method: &Symbol,
        base: usize,
    ) -> RuntimeResult<()> {
        let args = self.stack.split_off(base + 1);

        if method.is_standard() {
            self.stack.truncate(base);
            let result = host::invoke(&mut self.heap, method, receiver, &args)
                .map_err(|kind| self.error(kind))?;
            return self.push(result);
        }

        let chunk = self.lookup_chunk(method)?;
        self.push_frame(Rc::new(Closure::new(chunk)), base, args, Some(receiver))
    }

    /// Construct an instance of a struct whose type value sits at `base`
    fn construct(&mut self, ty: &Rc<StructType>, base: usize) -> RuntimeResult<()> {
        let args = self.stack.split_off(base + 1);

        if ty.symbol.is_standard() {
            self.stack.truncate(base);
            let value = host::construct(&mut self.heap, &self.host_types, &ty.name, args)
                .map_err(|kind| self.error(kind))?;
            return self.push(value);
        }

        let instance = self.heap.allocate_instance(Rc::clone(ty));
        match &ty.initializer {
            Some(initializer) => {
                let chunk = self.lookup_chunk(initializer)?;
                self.push_frame(Rc::new(Closure::new(chunk)), base, args, Some(instance))
            }
            None if args.is_empty() => {
                self.stack.truncate(base);
                self.push(Value::Instance(instance))
            }
            None => Err(self.error(RuntimeErrorKind::ArityMismatch {
                callee: ty.name.clone(),
                expected: 0,
                got: args.len() as u8,
            })),
        }
    }

    /// Push a frame binding the receiver (if any) and arguments in order
    fn push_frame(
        &mut self,
        closure: Rc<Closure>,
        stack_base: usize,
        args: Vec<Value>,
        receiver: Option<InstanceRef>,
    ) -> RuntimeResult<()> {
        let chunk = &closure.chunk;
        if args.len() != usize::from(chunk.arity) {
            return Err(self.error(RuntimeErrorKind::ArityMismatch {
                callee: chunk.name.clone(),
                expected: chunk.arity,
                got: args.len() as u8,
            }));
        }

        if self.frames.len() >= self.config.max_frames {
            return Err(self.error(RuntimeErrorKind::StackOverflow));
        }

        let mut frame = CallFrame::new(Rc::clone(&closure), stack_base);
        let mut first_param = 0;
        if chunk.has_receiver {
            let Some(receiver) = receiver else {
                return Err(self.error(RuntimeErrorKind::Internal(format!(
                    "{} called without a receiver",
                    chunk.name
                ))));
            };
            *frame.slot_mut(0) = Slot::Value(Value::Instance(receiver));
            first_param = 1;
        }
        for (i, arg) in args.into_iter().enumerate() {
            *frame.slot_mut(first_param + i) = Slot::Value(arg);
        }

        self.frames.push(frame);
        Ok(())
    }

    // ===== Error handling =====

    /// Build a trap located at the executing instruction
    fn error(&self, kind: RuntimeErrorKind) -> RuntimeError {
        let stack_trace: Vec<StackFrame> = self
            .frames
            .iter()
            .rev()
            .enumerate()
            .map(|(depth, frame)| {
                let chunk = frame.chunk();
                let offset = if depth == 0 {
                    self.op_start
                } else {
                    frame.ip.saturating_sub(1)
                };
                StackFrame {
                    chunk: chunk.name.clone(),
                    offset,
                    line: chunk.get_line(offset),
                    source: (!chunk.path.is_empty()).then(|| chunk.path.clone()),
                }
            })
            .collect();

        let mut error = RuntimeError::new(kind);
        if let Some(top) = stack_trace.first() {
            error.chunk = top.chunk.clone();
            error.offset = top.offset;
            error.line = top.line;
        }
        error.with_trace(stack_trace)
    }
}

/// Prefer the descriptor from the module graph, falling back to a fresh one
/// for modules assembled without the `Standard` import
fn host_type(module: &Module, name: &str, fallback: fn() -> StructType) -> Rc<StructType> {
    module
        .struct_type(&standard::struct_symbol(name))
        .cloned()
        .unwrap_or_else(|| Rc::new(fallback()))
}

/// Arithmetic and ordering on two operands
fn binary_op(op: OpCode, a: &Value, b: &Value) -> Result<Value, RuntimeErrorKind> {
    let operation = op.name();
    let mismatch = |expected: &'static str, got: &Value| RuntimeErrorKind::TypeMismatch {
        expected,
        got: got.type_name(),
        operation,
    };

    match (op, a, b) {
        (OpCode::Add, Value::String(x), Value::String(y)) => {
            let mut joined = String::with_capacity(x.len() + y.len());
            joined.push_str(x);
            joined.push_str(y);
            Ok(Value::string(joined))
        }
        (OpCode::Add | OpCode::Subtract, Value::Pointer(p), Value::Int(n)) => {
            let delta = if op == OpCode::Add { Some(*n) } else { n.checked_neg() };
            delta
                .and_then(|d| p.offset_by(d))
                .map(Value::Pointer)
                .ok_or_else(|| RuntimeErrorKind::DanglingPointer(format!("{p} offset by {n}")))
        }
        (_, Value::Int(x), Value::Int(y)) => {
            let (x, y) = (*x, *y);
            let result = match op {
                OpCode::Add => x.checked_add(y),
                OpCode::Subtract => x.checked_sub(y),
                OpCode::Multiply => x.checked_mul(y),
                OpCode::Divide | OpCode::Modulo if y == 0 => {
                    return Err(RuntimeErrorKind::DivisionByZero)
                }
                OpCode::Divide => x.checked_div(y),
                OpCode::Modulo => x.checked_rem(y),
                OpCode::Less => return Ok(Value::Bool(x < y)),
                OpCode::Greater => return Ok(Value::Bool(x > y)),
                OpCode::LessEqual => return Ok(Value::Bool(x <= y)),
                OpCode::GreaterEqual => return Ok(Value::Bool(x >= y)),
                _ => return Err(RuntimeErrorKind::Internal(format!("{operation} is not binary"))),
            };
            result
                .map(Value::Int)
                .ok_or(RuntimeErrorKind::IntegerOverflow(operation))
        }
        (
            OpCode::Less | OpCode::Greater | OpCode::LessEqual | OpCode::GreaterEqual,
            Value::String(x),
            Value::String(y),
        ) => Ok(Value::Bool(match op {
            OpCode::Less => x < y,
            OpCode::Greater => x > y,
            OpCode::LessEqual => x <= y,
            _ => x >= y,
        })),
        (OpCode::Add, Value::String(_), other) => Err(mismatch("string", other)),
        (_, Value::Int(_), other) => Err(mismatch("int", other)),
        (_, other, _) => Err(mismatch("int", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_with_main(chunk: Chunk) -> Module {
        let mut module = Module::new("test");
        module.main = Some(Rc::new(chunk));
        module
    }

    fn run_chunk(chunk: Chunk) -> RuntimeResult<Value> {
        VirtualMachine::new(module_with_main(chunk), VmConfig::default())?.run()
    }

    fn main_chunk() -> Chunk {
        Chunk::new("<main>", Symbol::function("test", "<main>", vec![])).with_path("test.pl")
    }

    #[test]
    fn test_push_constants() {
        let mut chunk = main_chunk();
        chunk.emit_constant(Value::Int(42), 1);
        chunk.write_op(OpCode::Pop, 1);
        chunk.emit_constant(Value::string("hello"), 1);
        chunk.write_op(OpCode::Return, 1);

        assert_eq!(run_chunk(chunk).unwrap(), Value::string("hello"));
    }

    #[test]
    fn test_arithmetic() {
        // (10 + 20) * 2
        let mut chunk = main_chunk();
        chunk.emit_constant(Value::Int(10), 1);
        chunk.emit_constant(Value::Int(20), 1);
        chunk.write_op(OpCode::Add, 1);
        chunk.emit_constant(Value::Int(2), 1);
        chunk.write_op(OpCode::Multiply, 1);
        chunk.write_op(OpCode::Return, 1);

        assert_eq!(run_chunk(chunk).unwrap(), Value::Int(60));
    }

    #[test]
    fn test_integer_semantics() {
        let op = |op, a, b| binary_op(op, &Value::Int(a), &Value::Int(b));

        assert_eq!(op(OpCode::Modulo, 5, 2), Ok(Value::Int(1)));
        assert_eq!(op(OpCode::Modulo, 4, 2), Ok(Value::Int(0)));
        assert_eq!(op(OpCode::Modulo, -7, 2), Ok(Value::Int(-1)));
        assert_eq!(op(OpCode::Divide, 7, 2), Ok(Value::Int(3)));
        assert_eq!(op(OpCode::Divide, -7, 2), Ok(Value::Int(-3)));
        assert_eq!(op(OpCode::Divide, 1, 0), Err(RuntimeErrorKind::DivisionByZero));
        assert_eq!(op(OpCode::Modulo, 1, 0), Err(RuntimeErrorKind::DivisionByZero));
        assert_eq!(
            op(OpCode::Add, i64::MAX, 1),
            Err(RuntimeErrorKind::IntegerOverflow("ADD"))
        );
        assert_eq!(op(OpCode::LessEqual, 2, 2), Ok(Value::Bool(true)));
    }

    #[test]
    fn test_string_operations() {
        let a = Value::string("a");
        let b = Value::string("b");
        assert_eq!(binary_op(OpCode::Add, &a, &b), Ok(Value::string("ab")));
        assert_eq!(binary_op(OpCode::Less, &a, &b), Ok(Value::Bool(true)));
        assert!(matches!(
            binary_op(OpCode::Add, &a, &Value::Int(1)),
            Err(RuntimeErrorKind::TypeMismatch {
                expected: "string",
                got: "int",
                ..
            })
        ));
        assert!(matches!(
            binary_op(OpCode::Multiply, &Value::Bool(true), &Value::Int(1)),
            Err(RuntimeErrorKind::TypeMismatch { got: "bool", .. })
        ));
    }

    #[test]
    fn test_trap_location() {
        let mut chunk = main_chunk();
        chunk.emit_constant(Value::Int(1), 1);
        chunk.emit_constant(Value::Int(0), 2);
        chunk.write_op(OpCode::Divide, 3);
        chunk.write_op(OpCode::Return, 3);

        let error = run_chunk(chunk).unwrap_err();
        assert_eq!(error.kind, RuntimeErrorKind::DivisionByZero);
        assert_eq!(error.chunk, "<main>");
        assert_eq!(error.offset, 6);
        assert_eq!(error.line, 3);
        assert_eq!(error.stack_trace[0].source.as_deref(), Some("test.pl"));
    }

    #[test]
    fn test_jump_if_false() {
        // if false { 1 } else { 2 }
        let mut chunk = main_chunk();
        chunk.write_op(OpCode::False, 1);
        let else_jump = chunk.emit_jump(OpCode::JumpIfFalse, 1);
        chunk.emit_constant(Value::Int(1), 1);
        let end_jump = chunk.emit_jump(OpCode::Jump, 1);
        chunk.patch_jump(else_jump);
        chunk.emit_constant(Value::Int(2), 1);
        chunk.patch_jump(end_jump);
        chunk.write_op(OpCode::Return, 1);

        assert_eq!(run_chunk(chunk).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_loop_with_locals() {
        // var i = 0; while i < 5 { i = i + 1 }; return i
        let mut chunk = main_chunk();
        chunk.local_names.push("i".into());
        chunk.emit_constant(Value::Int(0), 1);
        chunk.write_op_u8(OpCode::DefineLocal, 0, 1);

        let loop_start = chunk.current_offset();
        chunk.write_op_u8(OpCode::GetLocal, 0, 2);
        chunk.emit_constant(Value::Int(5), 2);
        chunk.write_op(OpCode::Less, 2);
        let exit = chunk.emit_jump(OpCode::JumpIfFalse, 2);
        chunk.write_op_u8(OpCode::GetLocal, 0, 3);
        chunk.emit_constant(Value::Int(1), 3);
        chunk.write_op(OpCode::Add, 3);
        chunk.write_op_u8(OpCode::SetLocal, 0, 3);
        chunk.write_op(OpCode::Pop, 3);
        chunk.emit_loop(loop_start, 3);
        chunk.patch_jump(exit);

        chunk.write_op_u8(OpCode::GetLocal, 0, 4);
        chunk.write_op(OpCode::Return, 4);

        assert_eq!(run_chunk(chunk).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_cell_writes_visible_through_local() {
        // DEFINE_CELL then SET_LOCAL writes through the cell
        let mut chunk = main_chunk();
        chunk.local_names.push("x".into());
        chunk.emit_constant(Value::Int(1), 1);
        chunk.write_op_u8(OpCode::DefineCell, 0, 1);
        chunk.emit_constant(Value::Int(9), 2);
        chunk.write_op_u8(OpCode::SetLocal, 0, 2);
        chunk.write_op(OpCode::Pop, 2);
        chunk.write_op_u8(OpCode::GetLocal, 0, 3);
        chunk.write_op(OpCode::Return, 3);

        let mut vm = VirtualMachine::new(module_with_main(chunk), VmConfig::default()).unwrap();
        assert_eq!(vm.run().unwrap(), Value::Int(9));
        assert_eq!(vm.heap().stats().0, 1);
    }

    #[test]
    fn test_builtin_call_and_arity() {
        let print = Symbol::primitive("print");

        let mut chunk = main_chunk();
        let index = chunk.add_symbol(&print).unwrap();
        chunk.write_op_u16(OpCode::GetBuiltin, index, 1);
        chunk.emit_constant(Value::string("hi"), 1);
        chunk.write_op_u8(OpCode::Call, 1, 1);
        chunk.write_op(OpCode::Return, 1);

        let (result, output) = with_output_capture(|| run_chunk(chunk));
        assert_eq!(result.unwrap(), Value::None);
        assert_eq!(output.stdout, vec!["hi"]);

        let mut chunk = main_chunk();
        let index = chunk.add_symbol(&print).unwrap();
        chunk.write_op_u16(OpCode::GetBuiltin, index, 1);
        chunk.write_op_u8(OpCode::Call, 0, 1);
        chunk.write_op(OpCode::Return, 1);
        assert!(matches!(
            run_chunk(chunk).unwrap_err().kind,
            RuntimeErrorKind::ArityMismatch { expected: 1, got: 0, .. }
        ));
    }

    #[test]
    fn test_not_callable() {
        let mut chunk = main_chunk();
        chunk.emit_constant(Value::Int(3), 1);
        chunk.write_op_u8(OpCode::Call, 0, 1);
        chunk.write_op(OpCode::Return, 1);

        assert_eq!(
            run_chunk(chunk).unwrap_err().kind,
            RuntimeErrorKind::NotCallable("int")
        );
    }

    #[test]
    fn test_collections() {
        // [10, 20][1]
        let mut chunk = main_chunk();
        chunk.emit_constant(Value::Int(10), 1);
        chunk.emit_constant(Value::Int(20), 1);
        chunk.write_op_u16(OpCode::InitArray, 2, 1);
        chunk.emit_constant(Value::Int(1), 1);
        chunk.write_op(OpCode::Get, 1);
        chunk.write_op(OpCode::Return, 1);

        assert_eq!(run_chunk(chunk).unwrap(), Value::Int(20));
    }

    #[test]
    fn test_invalid_opcode() {
        let mut chunk = main_chunk();
        chunk.write_byte(0xEE, 1);

        assert_eq!(
            run_chunk(chunk).unwrap_err().kind,
            RuntimeErrorKind::InvalidOpcode(0xEE)
        );
    }

    #[test]
    fn test_module_must_be_executable() {
        let module = Module::new("empty");
        let error = VirtualMachine::new(module, VmConfig::default())
            .err()
            .unwrap();
        assert_eq!(
            error.kind,
            RuntimeErrorKind::NotExecutable("empty".to_string())
        );
    }

    #[test]
    fn test_execution_result() {
        let mut chunk = main_chunk();
        chunk.write_op(OpCode::True, 1);
        chunk.write_op(OpCode::Return, 1);

        let mut vm = VirtualMachine::new(module_with_main(chunk), VmConfig::default()).unwrap();
        let result = vm.execute();
        assert!(result.is_ok());
        assert_eq!(result.value(), Some(&Value::Bool(true)));
        assert_eq!(result.error(), None);
    }
}
