//! Structural identifiers for every nameable declaration
//!
//! Instructions never refer to functions, globals or types by raw index.
//! They refer to a [`Symbol`], whose identity is its content: the owning
//! module, the declaration kind and the qualifying names. Two independently
//! compiled modules therefore agree on a symbol without renumbering.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Module name under which host builtins (`print`, `_allocate`, ...) live
pub const BUILTIN_MODULE: &str = "[builtin]";

/// Reserved module whose structs are backed by host methods
pub const STANDARD_MODULE: &str = "Standard";

/// The kind of declaration a symbol names, plus its qualifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    /// A function, qualified by its parameter type names
    Function { name: String, params: Vec<String> },
    /// A module-level value
    Value(String),
    /// A struct type
    Struct(String),
    /// A stored property of a struct
    Property { owner: String, name: String },
    /// A method of a struct, qualified by its parameter type names
    Method {
        owner: String,
        name: String,
        params: Vec<String>,
    },
    /// A host primitive
    Primitive(String),
    /// An enum type
    Enum(String),
}

/// Immutable, structurally compared declaration key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol {
    /// Name of the module that owns the declaration
    pub module: String,
    /// Kind and qualifiers
    pub kind: SymbolKind,
}

impl Symbol {
    /// Create a symbol from its parts
    #[must_use]
    pub fn new(module: impl Into<String>, kind: SymbolKind) -> Self {
        Self {
            module: module.into(),
            kind,
        }
    }

    /// Function symbol
    #[must_use]
    pub fn function(module: impl Into<String>, name: impl Into<String>, params: Vec<String>) -> Self {
        Self::new(
            module,
            SymbolKind::Function {
                name: name.into(),
                params,
            },
        )
    }

    /// Module value symbol
    #[must_use]
    pub fn value(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(module, SymbolKind::Value(name.into()))
    }

    /// Struct type symbol
    #[must_use]
    pub fn structure(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(module, SymbolKind::Struct(name.into()))
    }

    /// Property symbol
    #[must_use]
    pub fn property(
        module: impl Into<String>,
        owner: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::new(
            module,
            SymbolKind::Property {
                owner: owner.into(),
                name: name.into(),
            },
        )
    }

    /// Method symbol
    #[must_use]
    pub fn method(
        module: impl Into<String>,
        owner: impl Into<String>,
        name: impl Into<String>,
        params: Vec<String>,
    ) -> Self {
        Self::new(
            module,
            SymbolKind::Method {
                owner: owner.into(),
                name: name.into(),
                params,
            },
        )
    }

    /// Host primitive symbol in the builtin module
    #[must_use]
    pub fn primitive(name: impl Into<String>) -> Self {
        Self::new(BUILTIN_MODULE, SymbolKind::Primitive(name.into()))
    }

    /// Enum type symbol
    #[must_use]
    pub fn enumeration(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(module, SymbolKind::Enum(name.into()))
    }

    /// The unqualified declaration name
    #[must_use]
    pub fn name(&self) -> &str {
        match &self.kind {
            SymbolKind::Function { name, .. }
            | SymbolKind::Value(name)
            | SymbolKind::Struct(name)
            | SymbolKind::Property { name, .. }
            | SymbolKind::Method { name, .. }
            | SymbolKind::Primitive(name)
            | SymbolKind::Enum(name) => name,
        }
    }

    /// Whether the symbol belongs to the host-backed standard module
    #[must_use]
    pub fn is_standard(&self) -> bool {
        self.module == STANDARD_MODULE
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let module = &self.module;
        match &self.kind {
            SymbolKind::Function { name, params } => {
                write!(f, "$F{module}${name}${}", params.join("_"))
            }
            SymbolKind::Value(name) => write!(f, "$V{module}${name}"),
            SymbolKind::Struct(name) => write!(f, "$S{module}${name}"),
            SymbolKind::Property { owner, name } => write!(f, "$P{module}${owner}${name}"),
            SymbolKind::Method {
                owner,
                name,
                params,
            } => write!(f, "$M{module}${owner}${name}${}", params.join("_")),
            SymbolKind::Primitive(name) => write!(f, "$B{name}"),
            SymbolKind::Enum(name) => write!(f, "$E{module}${name}"),
        }
    }
}
