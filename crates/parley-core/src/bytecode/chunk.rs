//! Bytecode chunk - one compiled function or file body

use super::opcode::OpCode;
use super::symbol::Symbol;
use super::value::Value;

/// Where a closure's capture comes from when the closure is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSource {
    /// A local slot of the enclosing frame
    Local(u8),
    /// One of the enclosing closure's own captures
    Capture(u8),
}

/// One entry of a chunk's capture list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureInfo {
    /// Name of the captured variable
    pub name: String,
    /// Provenance in the defining frame
    pub source: CaptureSource,
}

/// A chunk of bytecode
///
/// Holds the raw instructions, a deduplicated constant pool, a symbol table
/// for cross-chunk references, and run-length encoded line information.
/// Chunks are built by the compiler and never mutated once wrapped in `Rc`.
#[derive(Clone)]
pub struct Chunk {
    /// Display name (function name or file path)
    pub name: String,

    /// The symbol this chunk is registered under in its module
    pub symbol: Symbol,

    /// Source file the chunk was compiled from
    pub path: String,

    /// Number of parameters
    pub arity: u8,

    /// Whether slot 0 holds the method receiver
    pub has_receiver: bool,

    /// Local slot names, indexed by slot
    pub local_names: Vec<String>,

    /// Captures to snapshot when a closure over this chunk is created
    pub captures: Vec<CaptureInfo>,

    /// Raw bytecode instructions
    code: Vec<u8>,

    /// Constant pool
    constants: Vec<Value>,

    /// Symbols referenced by instructions
    symbols: Vec<Symbol>,

    /// Line number information (run-length encoded)
    /// Each entry is (line_number, count) meaning `count` bytes at this line
    lines: Vec<(u32, u32)>,
}

impl Chunk {
    /// Create a new empty chunk
    #[must_use]
    pub fn new(name: impl Into<String>, symbol: Symbol) -> Self {
        Self {
            name: name.into(),
            symbol,
            path: String::new(),
            arity: 0,
            has_receiver: false,
            local_names: Vec::new(),
            captures: Vec::new(),
            code: Vec::new(),
            constants: Vec::new(),
            symbols: Vec::new(),
            lines: Vec::new(),
        }
    }

    /// Set the source path
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Returns the number of bytes in the chunk
    #[must_use]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Returns true if the chunk is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Returns the raw bytecode
    #[must_use]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Returns the constant pool
    #[must_use]
    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    /// Get a constant by index
    #[must_use]
    pub fn get_constant(&self, index: u16) -> Option<&Value> {
        self.constants.get(index as usize)
    }

    /// Returns the symbol table
    #[must_use]
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Get a symbol by index
    #[must_use]
    pub fn get_symbol(&self, index: u16) -> Option<&Symbol> {
        self.symbols.get(index as usize)
    }

    /// Number of local slots a frame for this chunk needs
    #[must_use]
    pub fn local_count(&self) -> usize {
        self.local_names.len()
    }

    /// Write a single byte to the chunk
    pub fn write_byte(&mut self, byte: u8, line: u32) {
        self.code.push(byte);
        self.add_line(line, 1);
    }

    /// Write an opcode to the chunk
    pub fn write_op(&mut self, op: OpCode, line: u32) {
        self.write_byte(op as u8, line);
    }

    /// Write an opcode with a u8 operand
    pub fn write_op_u8(&mut self, op: OpCode, operand: u8, line: u32) {
        self.write_byte(op as u8, line);
        self.write_byte(operand, line);
    }

    /// Write an opcode with a u16 operand
    pub fn write_op_u16(&mut self, op: OpCode, operand: u16, line: u32) {
        self.write_byte(op as u8, line);
        self.write_u16(operand, line);
    }

    /// Write a u16 value (little-endian)
    pub fn write_u16(&mut self, value: u16, line: u32) {
        self.write_byte((value & 0xFF) as u8, line);
        self.write_byte((value >> 8) as u8, line);
    }

    /// Write an i16 value (little-endian)
    pub fn write_i16(&mut self, value: i16, line: u32) {
        self.write_u16(value as u16, line);
    }

    /// Read a byte at a position
    #[must_use]
    pub fn read_byte(&self, offset: usize) -> Option<u8> {
        self.code.get(offset).copied()
    }

    /// Read a u16 at a position (little-endian)
    #[must_use]
    pub fn read_u16(&self, offset: usize) -> Option<u16> {
        let low = u16::from(self.code.get(offset).copied()?);
        let high = u16::from(self.code.get(offset + 1).copied()?);
        Some(low | (high << 8))
    }

    /// Read an i16 at a position (little-endian)
    #[must_use]
    pub fn read_i16(&self, offset: usize) -> Option<i16> {
        self.read_u16(offset).map(|u| u as i16)
    }

    /// Patch a u16 value at a position
    pub fn patch_u16(&mut self, offset: usize, value: u16) {
        self.code[offset] = (value & 0xFF) as u8;
        self.code[offset + 1] = (value >> 8) as u8;
    }

    /// Patch an i16 value at a position
    pub fn patch_i16(&mut self, offset: usize, value: i16) {
        self.patch_u16(offset, value as u16);
    }

    /// Replace the opcode at a position with one of the same size
    pub fn patch_op(&mut self, offset: usize, op: OpCode) {
        debug_assert_eq!(
            OpCode::try_from(self.code[offset]).map(OpCode::size),
            Ok(op.size())
        );
        self.code[offset] = op as u8;
    }

    /// Add a constant to the pool and return its index
    ///
    /// Returns `None` if the constant pool is full (> 65535 constants).
    pub fn add_constant(&mut self, value: Value) -> Option<u16> {
        // Check for existing identical constant (deduplication)
        if let Some(i) = self
            .constants
            .iter()
            .position(|existing| values_identical(existing, &value))
        {
            return Some(i as u16);
        }

        let index = self.constants.len();
        if index > u16::MAX as usize {
            return None;
        }
        self.constants.push(value);
        Some(index as u16)
    }

    /// Emit a constant instruction
    ///
    /// Writes `OpCode::Constant` followed by the constant index.
    /// Returns `None` if the constant pool is full.
    pub fn emit_constant(&mut self, value: Value, line: u32) -> Option<u16> {
        let index = self.add_constant(value)?;
        self.write_op_u16(OpCode::Constant, index, line);
        Some(index)
    }

    /// Add a symbol to the symbol table and return its index
    ///
    /// Returns `None` if the table is full (> 65535 symbols).
    pub fn add_symbol(&mut self, symbol: &Symbol) -> Option<u16> {
        if let Some(i) = self.symbols.iter().position(|s| s == symbol) {
            return Some(i as u16);
        }

        let index = self.symbols.len();
        if index > u16::MAX as usize {
            return None;
        }
        self.symbols.push(symbol.clone());
        Some(index as u16)
    }

    /// Add line information for `count` bytes
    fn add_line(&mut self, line: u32, count: u32) {
        if let Some(last) = self.lines.last_mut() {
            if last.0 == line {
                // Same line, extend the count
                last.1 += count;
                return;
            }
        }
        // New line
        self.lines.push((line, count));
    }

    /// Get the line number for a bytecode offset
    #[must_use]
    pub fn get_line(&self, offset: usize) -> u32 {
        let mut current_offset = 0;
        for (line, count) in &self.lines {
            current_offset += *count as usize;
            if offset < current_offset {
                return *line;
            }
        }
        // Default to last line or 0
        self.lines.last().map_or(0, |(line, _)| *line)
    }

    /// Get the current bytecode offset (for jump targets)
    #[must_use]
    pub fn current_offset(&self) -> usize {
        self.code.len()
    }

    /// Emit a jump instruction and return the offset to patch
    ///
    /// The jump offset is reserved as 0 and must be patched once the target
    /// is known.
    pub fn emit_jump(&mut self, op: OpCode, line: u32) -> usize {
        self.write_op(op, line);
        let patch_offset = self.code.len();
        self.write_i16(0, line); // Placeholder
        patch_offset
    }

    /// Patch a jump instruction to land at the current position
    ///
    /// Returns `None` if the distance does not fit in an i16.
    pub fn patch_jump(&mut self, patch_offset: usize) -> Option<i16> {
        let distance = self.code.len().checked_sub(patch_offset + 2)?;
        let offset = i16::try_from(distance).ok()?;
        self.patch_i16(patch_offset, offset);
        Some(offset)
    }

    /// Emit a loop instruction that jumps back to the given offset
    ///
    /// Returns `None` if the distance does not fit in an i16.
    pub fn emit_loop(&mut self, loop_start: usize, line: u32) -> Option<i16> {
        // Offset is measured from the end of the 3-byte instruction
        let distance = self.code.len() + 3 - loop_start;
        let offset = i16::try_from(distance).ok()?;
        self.write_op(OpCode::Loop, line);
        self.write_i16(-offset, line);
        Some(-offset)
    }
}

/// Check if two values are identical (for constant deduplication)
fn values_identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::EnumCase(a), Value::EnumCase(b)) => a == b,
        // Don't deduplicate other types
        _ => false,
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("name", &self.name)
            .field("symbol", &self.symbol.to_string())
            .field("code_len", &self.code.len())
            .field("constants_len", &self.constants.len())
            .field("locals", &self.local_names.len())
            .field("captures", &self.captures.len())
            .finish()
    }
}
