//! Inferred types attached to analyzed expressions

use std::fmt;

use serde::{Deserialize, Serialize};

/// The type the analyzer inferred for an expression or declaration
///
/// The compiler only inspects types where storage depends on them: member
/// access needs the receiver's struct to find property offsets and method
/// symbols, and function symbols are qualified by their parameter types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    Int,
    Bool,
    String,
    Pointer,
    #[default]
    None,
    /// Unconstrained; accepted anywhere
    Any,
    Function {
        params: Vec<Type>,
        returns: Box<Type>,
    },
    /// Instance of the named struct
    Struct(String),
    /// Case of the named enum
    Enum(String),
    Array(Box<Type>),
    Dictionary(Box<Type>, Box<Type>),
}

impl Type {
    /// Create a function type
    #[must_use]
    pub fn function(params: Vec<Type>, returns: Type) -> Self {
        Type::Function {
            params,
            returns: Box::new(returns),
        }
    }

    /// Create a struct instance type
    #[must_use]
    pub fn structure(name: impl Into<String>) -> Self {
        Type::Struct(name.into())
    }

    /// Create an enum case type
    #[must_use]
    pub fn enumeration(name: impl Into<String>) -> Self {
        Type::Enum(name.into())
    }

    /// Create an array type
    #[must_use]
    pub fn array(element: Type) -> Self {
        Type::Array(Box::new(element))
    }

    /// Create a dictionary type
    #[must_use]
    pub fn dictionary(key: Type, value: Type) -> Self {
        Type::Dictionary(Box::new(key), Box::new(value))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Bool => write!(f, "bool"),
            Type::String => write!(f, "string"),
            Type::Pointer => write!(f, "pointer"),
            Type::None => write!(f, "none"),
            Type::Any => write!(f, "any"),
            Type::Function { params, returns } => {
                write!(f, "fn(")?;
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{param}")?;
                }
                write!(f, ") -> {returns}")
            }
            Type::Struct(name) | Type::Enum(name) => write!(f, "{name}"),
            Type::Array(element) => write!(f, "Array<{element}>"),
            Type::Dictionary(key, value) => write!(f, "Dictionary<{key}, {value}>"),
        }
    }
}
