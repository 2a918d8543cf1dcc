//! Bytecode disassembler for tests and tooling

use std::fmt;

use super::chunk::Chunk;
use super::opcode::{OpCode, OperandKind};
use super::symbol::Symbol;
use super::value::Value;

/// A decoded operand
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Constant { index: u16, value: Value },
    Slot(u8),
    Capture(u8),
    Symbol { index: u16, symbol: Symbol },
    ArgCount(u8),
    Count(u16),
    Property(u8),
    /// Relative offset and the absolute offset it lands on
    Jump { offset: i16, target: usize },
    Invoke { symbol: Symbol, argc: u8 },
    Case { symbol: Symbol, index: u8 },
    Associated(u8),
}

/// One decoded instruction
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Byte offset of the opcode
    pub offset: usize,
    /// Source line
    pub line: u32,
    /// The opcode
    pub opcode: OpCode,
    /// The decoded operand
    pub operand: Operand,
}

impl Instruction {
    /// Offset of the instruction that follows this one
    #[must_use]
    pub fn next_offset(&self) -> usize {
        self.offset + self.opcode.size()
    }

    /// The count operand used for stack accounting
    #[must_use]
    pub fn count(&self) -> u16 {
        match self.operand {
            Operand::ArgCount(n) | Operand::Invoke { argc: n, .. } => u16::from(n),
            Operand::Count(n) => n,
            _ => 0,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.opcode.name();
        match &self.operand {
            Operand::None => write!(f, "{name}"),
            Operand::Constant { index, value } => write!(f, "{name:20} {index:4} '{value}'"),
            Operand::Slot(slot) => write!(f, "{name:20} {slot:4}"),
            Operand::Capture(index) => write!(f, "{name:20} {index:4}"),
            Operand::Symbol { index, symbol } => write!(f, "{name:20} {index:4} {symbol}"),
            Operand::ArgCount(argc) => write!(f, "{name:20} {argc:4}"),
            Operand::Count(count) => write!(f, "{name:20} {count:4}"),
            Operand::Property(offset) => write!(f, "{name:20} {offset:4}"),
            Operand::Jump { offset, target } => {
                write!(f, "{name:20} {offset:4} -> {target:04}")
            }
            Operand::Invoke { symbol, argc } => write!(f, "{name:20} {argc:4} {symbol}"),
            Operand::Case { symbol, index } => write!(f, "{name:20} {index:4} {symbol}"),
            Operand::Associated(index) => write!(f, "{name:20} {index:4}"),
        }
    }
}

/// Decode the instruction starting at `offset`
///
/// Returns `None` past the end of the chunk, on an unknown opcode byte, or on
/// a truncated or dangling operand.
#[must_use]
pub fn decode_instruction(chunk: &Chunk, offset: usize) -> Option<Instruction> {
    let opcode = OpCode::try_from(chunk.read_byte(offset)?).ok()?;
    let operand_at = offset + 1;
    let operand = match opcode.operand_kind() {
        OperandKind::None => Operand::None,
        OperandKind::Constant => {
            let index = chunk.read_u16(operand_at)?;
            Operand::Constant {
                index,
                value: chunk.get_constant(index)?.clone(),
            }
        }
        OperandKind::Slot => Operand::Slot(chunk.read_byte(operand_at)?),
        OperandKind::Capture => Operand::Capture(chunk.read_byte(operand_at)?),
        OperandKind::Symbol => {
            let index = chunk.read_u16(operand_at)?;
            Operand::Symbol {
                index,
                symbol: chunk.get_symbol(index)?.clone(),
            }
        }
        OperandKind::ArgCount => Operand::ArgCount(chunk.read_byte(operand_at)?),
        OperandKind::Count => Operand::Count(chunk.read_u16(operand_at)?),
        OperandKind::Property => Operand::Property(chunk.read_byte(operand_at)?),
        OperandKind::Jump => {
            let relative = chunk.read_i16(operand_at)?;
            let end = offset + opcode.size();
            let target = end.checked_add_signed(isize::from(relative))?;
            Operand::Jump {
                offset: relative,
                target,
            }
        }
        OperandKind::Invoke => {
            let index = chunk.read_u16(operand_at)?;
            Operand::Invoke {
                symbol: chunk.get_symbol(index)?.clone(),
                argc: chunk.read_byte(operand_at + 2)?,
            }
        }
        OperandKind::Case => {
            let index = chunk.read_u16(operand_at)?;
            Operand::Case {
                symbol: chunk.get_symbol(index)?.clone(),
                index: chunk.read_byte(operand_at + 2)?,
            }
        }
        OperandKind::Associated => Operand::Associated(chunk.read_byte(operand_at)?),
    };

    Some(Instruction {
        offset,
        line: chunk.get_line(offset),
        opcode,
        operand,
    })
}

/// Decode a whole chunk into instructions
///
/// Decoding stops at the first byte that is not a valid instruction.
#[must_use]
pub fn disassemble(chunk: &Chunk) -> Vec<Instruction> {
    let mut instructions = Vec::new();
    let mut offset = 0;
    while let Some(instruction) = decode_instruction(chunk, offset) {
        offset = instruction.next_offset();
        instructions.push(instruction);
    }
    instructions
}

/// Render a chunk as a human-readable listing
#[must_use]
pub fn disassemble_chunk(chunk: &Chunk) -> String {
    let mut output = format!("== {} ==\n", chunk.name);

    if !chunk.local_names.is_empty() {
        output.push_str(&format!("locals: {}\n", chunk.local_names.join(", ")));
    }
    if !chunk.captures.is_empty() {
        let names: Vec<&str> = chunk.captures.iter().map(|c| c.name.as_str()).collect();
        output.push_str(&format!("captures: {}\n", names.join(", ")));
    }

    let mut previous_line = None;
    let mut end = 0;
    for instruction in disassemble(chunk) {
        // Line number, or | if same as previous
        let line = if previous_line == Some(instruction.line) {
            "   |".to_string()
        } else {
            format!("{:4}", instruction.line)
        };
        previous_line = Some(instruction.line);
        output.push_str(&format!("{:04} {line} {instruction}\n", instruction.offset));
        end = instruction.next_offset();
    }

    if end < chunk.len() {
        output.push_str(&format!("{end:04} <invalid bytecode>\n"));
    }

    output
}
