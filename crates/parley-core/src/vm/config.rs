//! Virtual machine limits and switches

use serde::{Deserialize, Serialize};

/// Default maximum call depth
pub const DEFAULT_MAX_FRAMES: usize = 256;

/// Default maximum value-stack size
pub const DEFAULT_MAX_STACK: usize = 65536;

/// Default maximum slots in one raw block
pub const DEFAULT_MAX_BLOCK_SLOTS: usize = 1 << 20;

/// Configuration for one [`VirtualMachine`](super::VirtualMachine)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmConfig {
    /// Call depth at which a call traps with `StackOverflow`
    pub max_frames: usize,

    /// Value-stack size at which a push traps with `StackOverflow`
    pub max_stack: usize,

    /// Largest block `_allocate` or a collection may request before the
    /// request traps with `AllocationTooLarge`
    pub max_block_slots: usize,

    /// Emit a `trace!` event for every executed instruction
    pub trace_execution: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_frames: DEFAULT_MAX_FRAMES,
            max_stack: DEFAULT_MAX_STACK,
            max_block_slots: DEFAULT_MAX_BLOCK_SLOTS,
            trace_execution: false,
        }
    }
}

impl VmConfig {
    /// Set the maximum call depth
    #[must_use]
    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }

    /// Set the largest raw block a program may allocate
    #[must_use]
    pub fn with_max_block_slots(mut self, max_block_slots: usize) -> Self {
        self.max_block_slots = max_block_slots;
        self
    }

    /// Enable or disable per-instruction tracing
    #[must_use]
    pub fn with_trace(mut self, trace_execution: bool) -> Self {
        self.trace_execution = trace_execution;
        self
    }
}
