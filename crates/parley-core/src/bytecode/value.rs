//! Runtime value representation for the Parley virtual machine

use std::fmt;
use std::rc::Rc;

use super::chunk::Chunk;
use super::module::StructType;
use super::symbol::Symbol;
use crate::vm::builtins::Builtin;
use crate::vm::heap::{CellRef, InstanceRef, Pointer};

/// A runtime value
///
/// Non-reference variants are copied by value. `Instance`, `Pointer` and the
/// capture cells held by a `Closure` are heap handles: copying the value
/// aliases the same heap slot.
#[derive(Clone)]
pub enum Value {
    /// The absence of a value
    None,

    /// 64-bit signed integer
    Int(i64),

    /// Boolean
    Bool(bool),

    /// Immutable string
    String(Rc<str>),

    /// Address inside a raw heap block
    Pointer(Pointer),

    /// Reference to a struct instance
    Instance(InstanceRef),

    /// A chunk plus its captured cells
    Closure(Rc<Closure>),

    /// A struct type; calling it constructs an instance
    Struct(Rc<StructType>),

    /// A method bound to its receiver
    BoundMethod(Rc<BoundMethod>),

    /// A host function
    Builtin(Builtin),

    /// An enum case, with its associated values once constructed
    EnumCase(Rc<EnumCase>),
}

/// A closure: a compiled chunk and the capture cells it closed over
///
/// The capture list is fixed when the closure is created.
#[derive(Debug)]
pub struct Closure {
    /// The compiled function body
    pub chunk: Rc<Chunk>,
    /// Capture cells in the order of `chunk.captures`
    pub captures: Vec<CellRef>,
}

impl Closure {
    /// Create a closure with no captures
    #[must_use]
    pub fn new(chunk: Rc<Chunk>) -> Self {
        Self {
            chunk,
            captures: Vec::new(),
        }
    }
}

/// A struct method paired with the instance it was read from
#[derive(Debug, Clone)]
pub struct BoundMethod {
    /// The receiver
    pub receiver: InstanceRef,
    /// The method symbol
    pub method: Symbol,
}

/// One case of an enum
///
/// A case declared with associated values is first seen as a constructor
/// (`values` empty, `arity` > 0); calling it yields the case carrying its
/// arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumCase {
    /// The enum's symbol
    pub owner: Symbol,
    /// Case name
    pub name: String,
    /// Position in the enum declaration
    pub index: u32,
    /// Number of associated values the case declares
    pub arity: u8,
    /// Associated values, in declaration order
    pub values: Vec<Value>,
}

impl EnumCase {
    /// Whether calling this value constructs the case
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.arity > 0 && self.values.is_empty()
    }

    /// The constructed case carrying `values`
    #[must_use]
    pub fn with_values(&self, values: Vec<Value>) -> Self {
        Self {
            values,
            ..self.clone()
        }
    }
}

impl fmt::Display for EnumCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner.name(), self.name)?;
        if !self.values.is_empty() {
            write!(f, "(")?;
            for (i, value) in self.values.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{value}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl Value {
    /// Create a string value
    #[must_use]
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Rc::from(s.as_ref()))
    }

    /// Returns true if this value is considered truthy
    ///
    /// `none` and `false` are falsy; everything else is truthy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::None | Value::Bool(false))
    }

    /// Returns true for `none`
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Returns the integer payload, if any
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the type name for error messages
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::String(_) => "string",
            Value::Pointer(_) => "pointer",
            Value::Instance(_) => "instance",
            Value::Closure(_) => "function",
            Value::Struct(_) => "struct",
            Value::BoundMethod(_) => "method",
            Value::Builtin(_) => "builtin",
            Value::EnumCase(_) => "enum case",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Pointer(a), Value::Pointer(b)) => a == b,
            (Value::Instance(a), Value::Instance(b)) => a == b,
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Struct(a), Value::Struct(b)) => a.symbol == b.symbol,
            (Value::BoundMethod(a), Value::BoundMethod(b)) => {
                a.receiver == b.receiver && a.method == b.method
            }
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::EnumCase(a), Value::EnumCase(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Int(n) => write!(f, "Int({n})"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Pointer(p) => write!(f, "Pointer({p})"),
            Value::Instance(r) => write!(f, "Instance({r:?})"),
            Value::Closure(c) => write!(f, "Closure({})", c.chunk.name),
            Value::Struct(s) => write!(f, "Struct({})", s.name),
            Value::BoundMethod(m) => write!(f, "BoundMethod({})", m.method),
            Value::Builtin(b) => write!(f, "Builtin({})", b.name()),
            Value::EnumCase(c) => write!(f, "EnumCase({c})"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "none"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Pointer(p) => write!(f, "<pointer {p}>"),
            Value::Instance(r) => write!(f, "<instance #{}>", r.index()),
            Value::Closure(c) => write!(f, "<fn {}>", c.chunk.name),
            Value::Struct(s) => write!(f, "<struct {}>", s.name),
            Value::BoundMethod(m) => write!(f, "<method {}>", m.method.name()),
            Value::Builtin(b) => write!(f, "<builtin {}>", b.name()),
            Value::EnumCase(c) => write!(f, "{c}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_truthiness() {
        assert!(!Value::None.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::string("").is_truthy());
    }

    #[test]
    fn value_equality() {
        assert_eq!(Value::Int(42), Value::Int(42));
        assert_ne!(Value::Int(42), Value::Bool(true));
        assert_eq!(Value::string("ab"), Value::string("ab"));
        assert_eq!(Value::None, Value::None);

        let chunk = Rc::new(Chunk::new("f", Symbol::function("main", "f", vec![])));
        let a = Rc::new(Closure::new(Rc::clone(&chunk)));
        let b = Rc::new(Closure::new(chunk));
        assert_eq!(Value::Closure(Rc::clone(&a)), Value::Closure(Rc::clone(&a)));
        assert_ne!(Value::Closure(a), Value::Closure(b));
    }

    #[test]
    fn value_type_name() {
        assert_eq!(Value::Int(1).type_name(), "int");
        assert_eq!(Value::string("x").type_name(), "string");
        assert_eq!(Value::None.type_name(), "none");
    }

    #[test]
    fn enum_case_display() {
        let case = EnumCase {
            owner: Symbol::enumeration("main", "Color"),
            name: "red".to_string(),
            index: 0,
            arity: 0,
            values: Vec::new(),
        };
        assert_eq!(Value::EnumCase(Rc::new(case)).to_string(), "Color.red");
    }

    #[test]
    fn associated_values_take_part_in_equality() {
        let circle = EnumCase {
            owner: Symbol::enumeration("main", "Shape"),
            name: "circle".to_string(),
            index: 1,
            arity: 1,
            values: Vec::new(),
        };
        assert!(circle.is_constructor());

        let small = circle.with_values(vec![Value::Int(3)]);
        assert!(!small.is_constructor());
        assert_eq!(small.to_string(), "Shape.circle(3)");
        assert_eq!(
            Value::EnumCase(Rc::new(small.clone())),
            Value::EnumCase(Rc::new(circle.with_values(vec![Value::Int(3)])))
        );
        assert_ne!(
            Value::EnumCase(Rc::new(small)),
            Value::EnumCase(Rc::new(circle.with_values(vec![Value::Int(4)])))
        );
    }
}
