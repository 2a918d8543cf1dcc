//! Heap for capture cells, struct instances and raw blocks
//!
//! Every heap object lives in an [`Arena`] slot addressed by a [`Handle`]
//! that pairs the slot index with the slot's generation. Frames, closures
//! and values hold handles, never references, so shared mutable storage is
//! expressed without aliasing borrows. Freeing a slot bumps its generation,
//! which turns any later use of a stale handle into an error instead of a
//! read of whatever reused the slot.
//!
//! Cells and instances are never freed while the VM runs; they are released
//! together when the VM is dropped. Raw blocks are freed explicitly.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::rc::Rc;

use thiserror::Error;

use crate::bytecode::{StructType, Value};

use super::config::DEFAULT_MAX_BLOCK_SLOTS;

/// Errors raised by heap accesses
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeapError {
    #[error("use of a freed or invalid {0} handle")]
    DanglingHandle(&'static str),

    #[error("property '{property}' of {type_name} read before initialization")]
    UninitializedProperty { type_name: String, property: String },

    #[error("property offset {offset} out of range for {type_name}")]
    NoSuchProperty { type_name: String, offset: usize },

    #[error("pointer offset {offset} outside block of {capacity} slots")]
    OutOfBounds { offset: usize, capacity: usize },

    #[error("pointer slot {offset} read before it was stored")]
    UninitializedSlot { offset: usize },

    #[error("block of {requested} slots exceeds the limit of {limit}")]
    BlockTooLarge { requested: usize, limit: usize },
}

/// Generation-checked index into an [`Arena`]
pub struct Handle<T> {
    index: u32,
    generation: u32,
    marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Slot index, for display purposes
    #[must_use]
    pub fn index(self) -> u32 {
        self.index
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}@{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot storage with generation-checked handles and slot reuse
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }
}

impl<T> Arena<T> {
    /// Store a value, returning its handle
    pub fn insert(&mut self, value: T) -> Handle<T> {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Handle {
                index,
                generation: slot.generation,
                marker: PhantomData,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        Handle {
            index,
            generation: 0,
            marker: PhantomData,
        }
    }

    /// Borrow the value behind a live handle
    #[must_use]
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_ref()
    }

    /// Mutably borrow the value behind a live handle
    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Release a slot; later uses of `handle` fail
    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.live -= 1;
        Some(value)
    }

    /// Number of live values
    #[must_use]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns true if no values are live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

/// Shared storage for one captured variable
pub type CellRef = Handle<Value>;

/// Reference to a struct instance
pub type InstanceRef = Handle<StructInstance>;

/// Reference to a raw block
pub type BlockRef = Handle<Block>;

/// A struct instance: its type plus offset-addressed property slots
#[derive(Debug)]
pub struct StructInstance {
    /// The instance's type
    pub ty: Rc<StructType>,
    /// Property values by offset; `None` until first stored
    pub fields: Vec<Option<Value>>,
}

/// A fixed-capacity block of value slots, addressed by [`Pointer`]s
#[derive(Debug)]
pub struct Block {
    slots: Vec<Option<Value>>,
}

impl Block {
    /// Number of slots
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// An address inside a raw block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pointer {
    /// The block
    pub block: BlockRef,
    /// Slot offset from the start of the block
    pub offset: usize,
}

impl Pointer {
    /// Offset the pointer by `delta` slots
    #[must_use]
    pub fn offset_by(self, delta: i64) -> Option<Self> {
        let offset = self.offset.checked_add_signed(isize::try_from(delta).ok()?)?;
        Some(Self { offset, ..self })
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.block.index(), self.offset)
    }
}

/// The VM heap
pub struct Heap {
    cells: Arena<Value>,
    instances: Arena<StructInstance>,
    blocks: Arena<Block>,
    max_block_slots: usize,
}

impl Default for Heap {
    fn default() -> Self {
        Self::with_block_limit(DEFAULT_MAX_BLOCK_SLOTS)
    }
}

impl Heap {
    /// Create an empty heap
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty heap whose blocks hold at most `max_block_slots`
    #[must_use]
    pub fn with_block_limit(max_block_slots: usize) -> Self {
        Self {
            cells: Arena::default(),
            instances: Arena::default(),
            blocks: Arena::default(),
            max_block_slots,
        }
    }

    /// Largest block [`Heap::allocate_block`] accepts
    #[must_use]
    pub fn max_block_slots(&self) -> usize {
        self.max_block_slots
    }

    // ===== Capture Cells =====

    /// Allocate a cell holding `initial`
    pub fn allocate_cell(&mut self, initial: Value) -> CellRef {
        self.cells.insert(initial)
    }

    /// Read the latest value written to a cell
    pub fn read_cell(&self, cell: CellRef) -> Result<Value, HeapError> {
        self.cells
            .get(cell)
            .cloned()
            .ok_or(HeapError::DanglingHandle("cell"))
    }

    /// Write a cell; every holder observes the new value
    pub fn write_cell(&mut self, cell: CellRef, value: Value) -> Result<(), HeapError> {
        let slot = self
            .cells
            .get_mut(cell)
            .ok_or(HeapError::DanglingHandle("cell"))?;
        *slot = value;
        Ok(())
    }

    // ===== Struct Instances =====

    /// Allocate an instance with every property uninitialized
    pub fn allocate_instance(&mut self, ty: Rc<StructType>) -> InstanceRef {
        let fields = vec![None; ty.property_count()];
        self.instances.insert(StructInstance { ty, fields })
    }

    /// Borrow an instance
    pub fn instance(&self, instance: InstanceRef) -> Result<&StructInstance, HeapError> {
        self.instances
            .get(instance)
            .ok_or(HeapError::DanglingHandle("instance"))
    }

    /// Read a property by offset
    pub fn get_field(&self, instance: InstanceRef, offset: usize) -> Result<Value, HeapError> {
        let object = self.instance(instance)?;
        match object.fields.get(offset) {
            Some(Some(value)) => Ok(value.clone()),
            Some(None) => Err(HeapError::UninitializedProperty {
                type_name: object.ty.name.clone(),
                property: object.ty.properties()[offset].clone(),
            }),
            None => Err(HeapError::NoSuchProperty {
                type_name: object.ty.name.clone(),
                offset,
            }),
        }
    }

    /// Store a property by offset
    pub fn set_field(
        &mut self,
        instance: InstanceRef,
        offset: usize,
        value: Value,
    ) -> Result<(), HeapError> {
        let object = self
            .instances
            .get_mut(instance)
            .ok_or(HeapError::DanglingHandle("instance"))?;
        let type_name = &object.ty.name;
        match object.fields.get_mut(offset) {
            Some(slot) => {
                *slot = Some(value);
                Ok(())
            }
            None => Err(HeapError::NoSuchProperty {
                type_name: type_name.clone(),
                offset,
            }),
        }
    }

    // ===== Raw Blocks =====

    /// Allocate a block of `capacity` empty slots, returning a pointer to
    /// its first slot
    pub fn allocate_block(&mut self, capacity: usize) -> Result<Pointer, HeapError> {
        if capacity > self.max_block_slots {
            return Err(HeapError::BlockTooLarge {
                requested: capacity,
                limit: self.max_block_slots,
            });
        }
        let block = self.blocks.insert(Block {
            slots: vec![None; capacity],
        });
        Ok(Pointer { block, offset: 0 })
    }

    /// Capacity of the block a pointer points into
    pub fn block_capacity(&self, pointer: Pointer) -> Result<usize, HeapError> {
        self.blocks
            .get(pointer.block)
            .map(Block::capacity)
            .ok_or(HeapError::DanglingHandle("pointer"))
    }

    /// Read the slot a pointer addresses
    pub fn load(&self, pointer: Pointer) -> Result<Value, HeapError> {
        let block = self
            .blocks
            .get(pointer.block)
            .ok_or(HeapError::DanglingHandle("pointer"))?;
        match block.slots.get(pointer.offset) {
            Some(Some(value)) => Ok(value.clone()),
            Some(None) => Err(HeapError::UninitializedSlot {
                offset: pointer.offset,
            }),
            None => Err(HeapError::OutOfBounds {
                offset: pointer.offset,
                capacity: block.capacity(),
            }),
        }
    }

    /// Write the slot a pointer addresses
    pub fn store(&mut self, pointer: Pointer, value: Value) -> Result<(), HeapError> {
        let block = self
            .blocks
            .get_mut(pointer.block)
            .ok_or(HeapError::DanglingHandle("pointer"))?;
        let capacity = block.capacity();
        let slot = block
            .slots
            .get_mut(pointer.offset)
            .ok_or(HeapError::OutOfBounds {
                offset: pointer.offset,
                capacity,
            })?;
        *slot = Some(value);
        Ok(())
    }

    /// Release a block
    pub fn free(&mut self, pointer: Pointer) -> Result<(), HeapError> {
        self.blocks
            .remove(pointer.block)
            .map(|_| ())
            .ok_or(HeapError::DanglingHandle("pointer"))
    }

    /// Live object counts: (cells, instances, blocks)
    #[must_use]
    pub fn stats(&self) -> (usize, usize, usize) {
        (self.cells.len(), self.instances.len(), self.blocks.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Symbol;

    fn person() -> Rc<StructType> {
        let mut ty = StructType::new(Symbol::structure("main", "Person"));
        ty.add_property("age");
        ty.add_property("name");
        Rc::new(ty)
    }

    #[test]
    fn cell_writes_are_shared() {
        let mut heap = Heap::new();
        let cell = heap.allocate_cell(Value::Int(1));
        let alias = cell;

        heap.write_cell(alias, Value::Int(2)).unwrap();
        assert_eq!(heap.read_cell(cell).unwrap(), Value::Int(2));
    }

    #[test]
    fn instance_fields_start_uninitialized() {
        let mut heap = Heap::new();
        let p = heap.allocate_instance(person());

        assert_eq!(
            heap.get_field(p, 1),
            Err(HeapError::UninitializedProperty {
                type_name: "Person".into(),
                property: "name".into()
            })
        );

        heap.set_field(p, 0, Value::Int(9)).unwrap();
        assert_eq!(heap.get_field(p, 0).unwrap(), Value::Int(9));
        assert!(matches!(
            heap.set_field(p, 5, Value::None),
            Err(HeapError::NoSuchProperty { offset: 5, .. })
        ));
    }

    #[test]
    fn freed_block_handles_go_stale() {
        let mut heap = Heap::new();
        let ptr = heap.allocate_block(2).unwrap();
        heap.store(ptr, Value::Int(1)).unwrap();
        heap.free(ptr).unwrap();

        // The slot is reused, but the old pointer does not see the new block
        let fresh = heap.allocate_block(2).unwrap();
        heap.store(fresh, Value::Int(7)).unwrap();

        assert_eq!(heap.load(ptr), Err(HeapError::DanglingHandle("pointer")));
        assert_eq!(heap.load(fresh).unwrap(), Value::Int(7));
        assert_eq!(heap.free(ptr), Err(HeapError::DanglingHandle("pointer")));
    }

    #[test]
    fn pointer_bounds() {
        let mut heap = Heap::new();
        let ptr = heap.allocate_block(2).unwrap();
        let second = ptr.offset_by(1).unwrap();
        let past_end = ptr.offset_by(2).unwrap();

        heap.store(second, Value::Bool(true)).unwrap();
        assert_eq!(heap.load(second).unwrap(), Value::Bool(true));
        assert_eq!(
            heap.load(ptr),
            Err(HeapError::UninitializedSlot { offset: 0 })
        );
        assert_eq!(
            heap.store(past_end, Value::None),
            Err(HeapError::OutOfBounds {
                offset: 2,
                capacity: 2
            })
        );
        assert!(ptr.offset_by(-1).is_none());
    }

    #[test]
    fn oversized_blocks_are_refused() {
        let mut heap = Heap::with_block_limit(8);
        assert!(heap.allocate_block(8).is_ok());
        assert_eq!(
            heap.allocate_block(9),
            Err(HeapError::BlockTooLarge {
                requested: 9,
                limit: 8
            })
        );
        assert_eq!(heap.stats().2, 1);
    }

    #[test]
    fn arena_counts_live_values() {
        let mut arena = Arena::default();
        let a = arena.insert(1);
        let b = arena.insert(2);
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.remove(a), Some(1));
        assert_eq!(arena.remove(a), None);
        assert_eq!(arena.get(b), Some(&2));
        assert_eq!(arena.len(), 1);
    }
}
