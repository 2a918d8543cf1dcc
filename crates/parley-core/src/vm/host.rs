//! Host logic behind the `Standard` collection structs
//!
//! Arrays and dictionaries are ordinary struct instances whose properties
//! point into raw heap blocks. The functions here receive the raw instance
//! and arguments directly from the VM; no frame is pushed for them.

use std::rc::Rc;

use super::builtins::NativeResult;
use super::error::RuntimeErrorKind;
use super::heap::{Heap, InstanceRef, Pointer};
use crate::bytecode::{StructType, Symbol, SymbolKind, Value};
use crate::standard::{self, array, dictionary};

/// Capacity of the first block allocated for a collection
const MIN_CAPACITY: usize = 4;

/// Descriptors of the host-backed structs
#[derive(Debug, Clone)]
pub struct HostTypes {
    pub array: Rc<StructType>,
    pub dictionary: Rc<StructType>,
}

/// Create an array holding `elements`
pub fn new_array(heap: &mut Heap, types: &HostTypes, elements: Vec<Value>) -> NativeResult {
    let capacity = elements.len().max(MIN_CAPACITY);
    let storage = heap.allocate_block(capacity)?;
    let count = elements.len();
    for (i, element) in elements.into_iter().enumerate() {
        heap.store(at(storage, i), element)?;
    }

    let instance = heap.allocate_instance(Rc::clone(&types.array));
    heap.set_field(instance, array::STORAGE, Value::Pointer(storage))?;
    heap.set_field(instance, array::COUNT, int(count))?;
    heap.set_field(instance, array::CAPACITY, int(capacity))?;
    Ok(Value::Instance(instance))
}

/// Create a dictionary holding `entries`; later duplicates overwrite
/// earlier ones
pub fn new_dictionary(
    heap: &mut Heap,
    types: &HostTypes,
    entries: Vec<(Value, Value)>,
) -> NativeResult {
    let capacity = entries.len().max(MIN_CAPACITY);
    let keys = heap.allocate_block(capacity)?;
    let values = heap.allocate_block(capacity)?;

    let instance = heap.allocate_instance(Rc::clone(&types.dictionary));
    heap.set_field(instance, dictionary::KEYS, Value::Pointer(keys))?;
    heap.set_field(instance, dictionary::VALUES, Value::Pointer(values))?;
    heap.set_field(instance, dictionary::COUNT, int(0))?;
    heap.set_field(instance, dictionary::CAPACITY, int(capacity))?;

    for (key, value) in entries {
        dict_set(heap, instance, key, value)?;
    }
    Ok(Value::Instance(instance))
}

/// Construct a `Standard` struct from a call such as `Array()`
pub fn construct(heap: &mut Heap, types: &HostTypes, name: &str, args: Vec<Value>) -> NativeResult {
    match name {
        standard::ARRAY => new_array(heap, types, args),
        standard::DICTIONARY if args.is_empty() => new_dictionary(heap, types, Vec::new()),
        standard::DICTIONARY => Err(RuntimeErrorKind::ArityMismatch {
            callee: name.to_string(),
            expected: 0,
            got: args.len() as u8,
        }),
        _ => Err(RuntimeErrorKind::UnresolvedSymbol(
            standard::struct_symbol(name).to_string(),
        )),
    }
}

/// Run a host method
pub fn invoke(
    heap: &mut Heap,
    method: &Symbol,
    receiver: InstanceRef,
    args: &[Value],
) -> NativeResult {
    let SymbolKind::Method { owner, name, params } = &method.kind else {
        return Err(RuntimeErrorKind::Internal(format!(
            "{method} is not a method symbol"
        )));
    };
    if args.len() != params.len() {
        return Err(RuntimeErrorKind::ArityMismatch {
            callee: format!("{owner}.{name}"),
            expected: params.len() as u8,
            got: args.len() as u8,
        });
    }

    match (owner.as_str(), name.as_str()) {
        (standard::ARRAY, "append") => {
            array_append(heap, receiver, args[0].clone())?;
            Ok(Value::None)
        }
        (standard::ARRAY, "get") => array_get(heap, receiver, &args[0]),
        (standard::ARRAY, "set") => {
            array_set(heap, receiver, &args[0], args[1].clone())?;
            Ok(Value::None)
        }
        (standard::ARRAY, "remove") => array_remove(heap, receiver, &args[0]),
        (standard::ARRAY, "contains") => {
            let count = count_of(heap, receiver, array::COUNT)?;
            let storage = pointer_field(heap, receiver, array::STORAGE)?;
            Ok(Value::Bool(position(heap, storage, count, &args[0])?.is_some()))
        }
        (standard::DICTIONARY, "get") => dict_get(heap, receiver, &args[0]),
        (standard::DICTIONARY, "set") => {
            dict_set(heap, receiver, args[0].clone(), args[1].clone())?;
            Ok(Value::None)
        }
        (standard::DICTIONARY, "remove") => dict_remove(heap, receiver, &args[0]),
        (standard::DICTIONARY, "contains") => {
            let count = count_of(heap, receiver, dictionary::COUNT)?;
            let keys = pointer_field(heap, receiver, dictionary::KEYS)?;
            Ok(Value::Bool(position(heap, keys, count, &args[0])?.is_some()))
        }
        _ => Err(RuntimeErrorKind::UnknownMethod {
            type_name: owner.clone(),
            method: name.clone(),
        }),
    }
}

/// Subscript read: `array[index]` or `dictionary[key]`
pub fn subscript_get(heap: &Heap, receiver: &Value, index: &Value) -> NativeResult {
    let (instance, owner) = collection(heap, receiver)?;
    match owner.as_str() {
        standard::ARRAY => array_get(heap, instance, index),
        _ => dict_get(heap, instance, index),
    }
}

/// Subscript write: `array[index] = value` or `dictionary[key] = value`
pub fn subscript_set(
    heap: &mut Heap,
    receiver: &Value,
    index: &Value,
    value: Value,
) -> Result<(), RuntimeErrorKind> {
    let (instance, owner) = collection(heap, receiver)?;
    match owner.as_str() {
        standard::ARRAY => array_set(heap, instance, index, value),
        _ => dict_set(heap, instance, index.clone(), value),
    }
}

fn collection(heap: &Heap, receiver: &Value) -> Result<(InstanceRef, String), RuntimeErrorKind> {
    let mismatch = || RuntimeErrorKind::TypeMismatch {
        expected: "Array or Dictionary",
        got: receiver.type_name(),
        operation: "subscript",
    };
    let Value::Instance(instance) = receiver else {
        return Err(mismatch());
    };
    let ty = &heap.instance(*instance)?.ty;
    if !ty.symbol.is_standard() {
        return Err(mismatch());
    }
    Ok((*instance, ty.name.clone()))
}

// ===== Arrays =====

fn array_append(heap: &mut Heap, receiver: InstanceRef, value: Value) -> Result<(), RuntimeErrorKind> {
    let count = count_of(heap, receiver, array::COUNT)?;
    let capacity = count_of(heap, receiver, array::CAPACITY)?;
    let mut storage = pointer_field(heap, receiver, array::STORAGE)?;

    if count == capacity {
        let grown = grow(heap, capacity);
        storage = reallocate(heap, storage, count, grown)?;
        heap.set_field(receiver, array::STORAGE, Value::Pointer(storage))?;
        heap.set_field(receiver, array::CAPACITY, int(grown))?;
    }

    heap.store(at(storage, count), value)?;
    heap.set_field(receiver, array::COUNT, int(count + 1))?;
    Ok(())
}

fn array_get(heap: &Heap, receiver: InstanceRef, index: &Value) -> NativeResult {
    let count = count_of(heap, receiver, array::COUNT)?;
    let slot = checked_index(index, count)?;
    let storage = pointer_field(heap, receiver, array::STORAGE)?;
    Ok(heap.load(at(storage, slot))?)
}

fn array_set(
    heap: &mut Heap,
    receiver: InstanceRef,
    index: &Value,
    value: Value,
) -> Result<(), RuntimeErrorKind> {
    let count = count_of(heap, receiver, array::COUNT)?;
    let slot = checked_index(index, count)?;
    let storage = pointer_field(heap, receiver, array::STORAGE)?;
    heap.store(at(storage, slot), value)?;
    Ok(())
}

fn array_remove(heap: &mut Heap, receiver: InstanceRef, index: &Value) -> NativeResult {
    let count = count_of(heap, receiver, array::COUNT)?;
    let slot = checked_index(index, count)?;
    let storage = pointer_field(heap, receiver, array::STORAGE)?;

    let removed = heap.load(at(storage, slot))?;
    for i in slot + 1..count {
        let moved = heap.load(at(storage, i))?;
        heap.store(at(storage, i - 1), moved)?;
    }
    heap.set_field(receiver, array::COUNT, int(count - 1))?;
    Ok(removed)
}

// ===== Dictionaries =====

fn dict_get(heap: &Heap, receiver: InstanceRef, key: &Value) -> NativeResult {
    let count = count_of(heap, receiver, dictionary::COUNT)?;
    let keys = pointer_field(heap, receiver, dictionary::KEYS)?;
    match position(heap, keys, count, key)? {
        Some(slot) => {
            let values = pointer_field(heap, receiver, dictionary::VALUES)?;
            Ok(heap.load(at(values, slot))?)
        }
        None => Ok(Value::None),
    }
}

fn dict_set(
    heap: &mut Heap,
    receiver: InstanceRef,
    key: Value,
    value: Value,
) -> Result<(), RuntimeErrorKind> {
    let count = count_of(heap, receiver, dictionary::COUNT)?;
    let mut keys = pointer_field(heap, receiver, dictionary::KEYS)?;
    let mut values = pointer_field(heap, receiver, dictionary::VALUES)?;

    if let Some(slot) = position(heap, keys, count, &key)? {
        heap.store(at(values, slot), value)?;
        return Ok(());
    }

    let capacity = count_of(heap, receiver, dictionary::CAPACITY)?;
    if count == capacity {
        let grown = grow(heap, capacity);
        keys = reallocate(heap, keys, count, grown)?;
        values = reallocate(heap, values, count, grown)?;
        heap.set_field(receiver, dictionary::KEYS, Value::Pointer(keys))?;
        heap.set_field(receiver, dictionary::VALUES, Value::Pointer(values))?;
        heap.set_field(receiver, dictionary::CAPACITY, int(grown))?;
    }

    heap.store(at(keys, count), key)?;
    heap.store(at(values, count), value)?;
    heap.set_field(receiver, dictionary::COUNT, int(count + 1))?;
    Ok(())
}

fn dict_remove(heap: &mut Heap, receiver: InstanceRef, key: &Value) -> NativeResult {
    let count = count_of(heap, receiver, dictionary::COUNT)?;
    let keys = pointer_field(heap, receiver, dictionary::KEYS)?;
    let Some(slot) = position(heap, keys, count, key)? else {
        return Ok(Value::None);
    };
    let values = pointer_field(heap, receiver, dictionary::VALUES)?;
    let removed = heap.load(at(values, slot))?;

    // Move the last entry into the hole
    let last = count - 1;
    if slot != last {
        let last_key = heap.load(at(keys, last))?;
        let last_value = heap.load(at(values, last))?;
        heap.store(at(keys, slot), last_key)?;
        heap.store(at(values, slot), last_value)?;
    }
    heap.set_field(receiver, dictionary::COUNT, int(last))?;
    Ok(removed)
}

// ===== Helpers =====

fn int(n: usize) -> Value {
    Value::Int(n as i64)
}

fn at(pointer: Pointer, slot: usize) -> Pointer {
    Pointer {
        offset: pointer.offset + slot,
        ..pointer
    }
}

fn count_of(heap: &Heap, receiver: InstanceRef, offset: usize) -> Result<usize, RuntimeErrorKind> {
    match heap.get_field(receiver, offset)? {
        Value::Int(n) => usize::try_from(n)
            .map_err(|_| RuntimeErrorKind::Internal(format!("negative collection size {n}"))),
        other => Err(RuntimeErrorKind::TypeMismatch {
            expected: "int",
            got: other.type_name(),
            operation: "collection size",
        }),
    }
}

fn pointer_field(
    heap: &Heap,
    receiver: InstanceRef,
    offset: usize,
) -> Result<Pointer, RuntimeErrorKind> {
    match heap.get_field(receiver, offset)? {
        Value::Pointer(p) => Ok(p),
        other => Err(RuntimeErrorKind::TypeMismatch {
            expected: "pointer",
            got: other.type_name(),
            operation: "collection storage",
        }),
    }
}

fn checked_index(index: &Value, count: usize) -> Result<usize, RuntimeErrorKind> {
    let Value::Int(n) = index else {
        return Err(RuntimeErrorKind::TypeMismatch {
            expected: "int",
            got: index.type_name(),
            operation: "array index",
        });
    };
    usize::try_from(*n)
        .ok()
        .filter(|i| *i < count)
        .ok_or(RuntimeErrorKind::IndexOutOfBounds {
            index: *n,
            length: count,
        })
}

fn position(
    heap: &Heap,
    block: Pointer,
    count: usize,
    needle: &Value,
) -> Result<Option<usize>, RuntimeErrorKind> {
    for i in 0..count {
        if heap.load(at(block, i))? == *needle {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

/// Next capacity for a full collection, clamped to the heap's block limit
/// so the request either fits or traps in `allocate_block`
fn grow(heap: &Heap, capacity: usize) -> usize {
    let doubled = capacity.saturating_mul(2).max(MIN_CAPACITY);
    if doubled > heap.max_block_slots() && capacity < heap.max_block_slots() {
        heap.max_block_slots()
    } else {
        doubled
    }
}

/// Copy the first `count` slots into a new block and free the old one
fn reallocate(
    heap: &mut Heap,
    old: Pointer,
    count: usize,
    capacity: usize,
) -> Result<Pointer, RuntimeErrorKind> {
    let fresh = heap.allocate_block(capacity)?;
    for i in 0..count {
        let value = heap.load(at(old, i))?;
        heap.store(at(fresh, i), value)?;
    }
    heap.free(old)?;
    Ok(fresh)
}
