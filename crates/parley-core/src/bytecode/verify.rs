//! Static stack-depth verification
//!
//! Walks every control-flow path of a chunk, accumulating each
//! instruction's stack effect. A well-formed chunk never underflows, reaches
//! every instruction at a single consistent depth, and returns with exactly
//! its result on the stack.

use std::collections::HashMap;

use thiserror::Error;

use super::chunk::Chunk;
use super::debug::{decode_instruction, Instruction, Operand};
use super::opcode::OpCode;

/// A violation of the stack discipline
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    #[error("{op} at {offset:04} needs {needed} values but the stack holds {depth}")]
    Underflow {
        offset: usize,
        op: &'static str,
        needed: i32,
        depth: i32,
    },

    #[error("offset {offset:04} reached with depth {first} and {second}")]
    InconsistentDepth {
        offset: usize,
        first: i32,
        second: i32,
    },

    #[error("RETURN at {offset:04} leaves {depth} values on the stack")]
    UnbalancedReturn { offset: usize, depth: i32 },

    #[error("invalid instruction at {offset:04}")]
    InvalidInstruction { offset: usize },

    #[error("execution falls off the end of the chunk after {offset:04}")]
    FallsOffEnd { offset: usize },
}

/// Depths observed by a successful verification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackReport {
    /// Stack depth on entry to each reachable instruction
    pub depths: HashMap<usize, i32>,
    /// Deepest point on any path
    pub max_depth: i32,
}

/// Number of values an instruction consumes before pushing its result
fn inputs(op: OpCode, count: u16) -> i32 {
    let count = i32::from(count);
    match op {
        OpCode::Pop
        | OpCode::SetLocal
        | OpCode::DefineLocal
        | OpCode::DefineCell
        | OpCode::SetCapture
        | OpCode::SetModuleValue
        | OpCode::GetMethod
        | OpCode::Return
        | OpCode::GetProperty
        | OpCode::Negate
        | OpCode::Not
        | OpCode::JumpIfFalse
        | OpCode::MatchCase
        | OpCode::GetAssociated => 1,

        OpCode::SetProperty
        | OpCode::Get
        | OpCode::Add
        | OpCode::Subtract
        | OpCode::Multiply
        | OpCode::Divide
        | OpCode::Modulo
        | OpCode::Equal
        | OpCode::NotEqual
        | OpCode::Less
        | OpCode::Greater
        | OpCode::LessEqual
        | OpCode::GreaterEqual => 2,

        OpCode::SetSubscript => 3,

        OpCode::Call | OpCode::InvokeMethod => count + 1,
        OpCode::InitArray => count,
        OpCode::InitDict => count * 2,

        _ => 0,
    }
}

fn successors(instruction: &Instruction) -> Vec<usize> {
    let next = instruction.next_offset();
    match (instruction.opcode, &instruction.operand) {
        (OpCode::Return, _) => Vec::new(),
        (OpCode::Jump | OpCode::Loop, Operand::Jump { target, .. }) => vec![*target],
        (OpCode::JumpIfFalse, Operand::Jump { target, .. }) => vec![next, *target],
        _ => vec![next],
    }
}

/// Simulate stack depth along every path through `chunk`
pub fn verify_stack(chunk: &Chunk) -> Result<StackReport, StackError> {
    let mut report = StackReport::default();
    let mut worklist = vec![(0usize, 0i32)];

    while let Some((offset, depth)) = worklist.pop() {
        if let Some(&seen) = report.depths.get(&offset) {
            if seen != depth {
                return Err(StackError::InconsistentDepth {
                    offset,
                    first: seen,
                    second: depth,
                });
            }
            continue;
        }
        report.depths.insert(offset, depth);

        let instruction =
            decode_instruction(chunk, offset).ok_or(StackError::InvalidInstruction { offset })?;
        let count = instruction.count();

        let needed = inputs(instruction.opcode, count);
        if depth < needed {
            return Err(StackError::Underflow {
                offset,
                op: instruction.opcode.name(),
                needed,
                depth,
            });
        }

        let after = depth + instruction.opcode.stack_effect(count);
        report.max_depth = report.max_depth.max(after).max(depth);

        if instruction.opcode == OpCode::Return && depth != 1 {
            return Err(StackError::UnbalancedReturn { offset, depth });
        }

        for target in successors(&instruction) {
            if target >= chunk.len() {
                return Err(StackError::FallsOffEnd { offset });
            }
            worklist.push((target, after));
        }
    }

    Ok(report)
}
