//! Call frames

use std::rc::Rc;

use super::heap::CellRef;
use crate::bytecode::{Chunk, Closure, Value};

/// Storage behind one local slot
#[derive(Debug, Clone)]
pub(crate) enum Slot {
    /// Not yet bound in this activation
    Empty,
    /// A plain binding owned by the frame
    Value(Value),
    /// A binding promoted to a heap cell shared with closures
    Cell(CellRef),
}

/// One function activation
///
/// Locals live in the frame rather than on the value stack, so a frame can
/// be released on `return` without any per-scope cleanup. `stack_base` is
/// the value-stack height to restore when the frame returns; for `call` it
/// is the callee's position, so the callee is discarded with the frame.
#[derive(Debug)]
pub(crate) struct CallFrame {
    /// The closure being executed
    pub closure: Rc<Closure>,

    /// Instruction pointer (index into chunk code)
    pub ip: usize,

    /// Value-stack height to restore on return
    pub stack_base: usize,

    /// Local slots; slot 0 holds the receiver for methods and initializers
    pub locals: Vec<Slot>,
}

impl CallFrame {
    pub fn new(closure: Rc<Closure>, stack_base: usize) -> Self {
        let locals = vec![Slot::Empty; closure.chunk.local_count()];
        Self {
            closure,
            ip: 0,
            stack_base,
            locals,
        }
    }

    #[inline]
    pub fn chunk(&self) -> &Chunk {
        &self.closure.chunk
    }

    /// Make sure `slot` exists, growing the local table if needed
    pub fn slot_mut(&mut self, slot: usize) -> &mut Slot {
        if slot >= self.locals.len() {
            self.locals.resize(slot + 1, Slot::Empty);
        }
        &mut self.locals[slot]
    }
}
