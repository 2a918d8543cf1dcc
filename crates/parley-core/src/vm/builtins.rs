//! Host functions of the `[builtin]` module

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::error::RuntimeErrorKind;
use super::heap::{Heap, Pointer};
use super::output;
use crate::bytecode::{Symbol, Value};

/// Result type for host functions
pub type NativeResult = Result<Value, RuntimeErrorKind>;

/// A function implemented by the host rather than by a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    /// `print(value)`
    Print,
    /// `_allocate(slots) -> pointer`
    Allocate,
    /// `_deref(pointer) -> value`
    Deref,
    /// `_storePtr(pointer, value)`
    StorePtr,
    /// `_free(pointer)`
    Free,
    /// `_hash(value) -> int`
    Hash,
}

impl Builtin {
    /// Every builtin, in registration order
    pub const ALL: [Builtin; 6] = [
        Builtin::Print,
        Builtin::Allocate,
        Builtin::Deref,
        Builtin::StorePtr,
        Builtin::Free,
        Builtin::Hash,
    ];

    /// Source-level name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Allocate => "_allocate",
            Builtin::Deref => "_deref",
            Builtin::StorePtr => "_storePtr",
            Builtin::Free => "_free",
            Builtin::Hash => "_hash",
        }
    }

    /// Number of parameters
    #[must_use]
    pub const fn arity(self) -> u8 {
        match self {
            Builtin::StorePtr => 2,
            _ => 1,
        }
    }

    /// Look up a builtin by source name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }

    /// The primitive symbol the compiler emits for this builtin
    #[must_use]
    pub fn symbol(self) -> Symbol {
        Symbol::primitive(self.name())
    }

    /// Resolve a primitive symbol back to its builtin
    #[must_use]
    pub fn from_symbol(symbol: &Symbol) -> Option<Self> {
        if symbol.module != crate::bytecode::BUILTIN_MODULE {
            return None;
        }
        Self::from_name(symbol.name())
    }

    /// Run the builtin; `args.len()` has already been checked against
    /// [`Builtin::arity`]
    pub fn call(self, heap: &mut Heap, args: &[Value]) -> NativeResult {
        match self {
            Builtin::Print => {
                output::print_line(&args[0].to_string());
                Ok(Value::None)
            }
            Builtin::Allocate => {
                let slots = expect_int(&args[0], "_allocate")?;
                let slots = usize::try_from(slots).map_err(|_| {
                    RuntimeErrorKind::IndexOutOfBounds {
                        index: slots,
                        length: 0,
                    }
                })?;
                Ok(Value::Pointer(heap.allocate_block(slots)?))
            }
            Builtin::Deref => {
                let pointer = expect_pointer(&args[0], "_deref")?;
                Ok(heap.load(pointer)?)
            }
            Builtin::StorePtr => {
                let pointer = expect_pointer(&args[0], "_storePtr")?;
                heap.store(pointer, args[1].clone())?;
                Ok(Value::None)
            }
            Builtin::Free => {
                let pointer = expect_pointer(&args[0], "_free")?;
                heap.free(pointer)?;
                Ok(Value::None)
            }
            Builtin::Hash => Ok(Value::Int(hash_value(&args[0])?)),
        }
    }
}

fn expect_int(value: &Value, operation: &'static str) -> Result<i64, RuntimeErrorKind> {
    value.as_int().ok_or(RuntimeErrorKind::TypeMismatch {
        expected: "int",
        got: value.type_name(),
        operation,
    })
}

fn expect_pointer(value: &Value, operation: &'static str) -> Result<Pointer, RuntimeErrorKind> {
    match value {
        Value::Pointer(p) => Ok(*p),
        other => Err(RuntimeErrorKind::TypeMismatch {
            expected: "pointer",
            got: other.type_name(),
            operation,
        }),
    }
}

/// Hash a value by content for scalars and by identity for references
pub fn hash_value(value: &Value) -> Result<i64, RuntimeErrorKind> {
    let mut hasher = DefaultHasher::new();
    match value {
        Value::None => 0u8.hash(&mut hasher),
        Value::Int(n) => n.hash(&mut hasher),
        Value::Bool(b) => b.hash(&mut hasher),
        Value::String(s) => s.hash(&mut hasher),
        Value::Pointer(p) => p.hash(&mut hasher),
        Value::Instance(r) => r.hash(&mut hasher),
        Value::EnumCase(c) => {
            c.owner.hash(&mut hasher);
            c.index.hash(&mut hasher);
            for value in &c.values {
                hash_value(value)?.hash(&mut hasher);
            }
        }
        other => {
            return Err(RuntimeErrorKind::TypeMismatch {
                expected: "hashable value",
                got: other.type_name(),
                operation: "_hash",
            })
        }
    }
    Ok(hasher.finish() as i64)
}
