//! Compiled modules and the type descriptors they carry

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use super::chunk::Chunk;
use super::error::CompileError;
use super::symbol::Symbol;
use super::value::EnumCase;
use crate::ast::Type;

/// Run-time descriptor of a struct type
///
/// Property offsets follow declaration order and never change for the
/// lifetime of the type, so property access is a direct index.
#[derive(Debug, Clone, PartialEq)]
pub struct StructType {
    /// The struct's symbol
    pub symbol: Symbol,
    /// Struct name
    pub name: String,
    /// Property names, indexed by offset
    properties: Vec<String>,
    /// Initializer chunk symbol
    pub initializer: Option<Symbol>,
    /// Initializer parameter names, used to place labelled arguments
    pub init_params: Vec<String>,
    /// Method name to method symbol
    methods: BTreeMap<String, Symbol>,
}

impl StructType {
    /// Create a struct descriptor with no properties or methods
    #[must_use]
    pub fn new(symbol: Symbol) -> Self {
        Self {
            name: symbol.name().to_string(),
            symbol,
            properties: Vec::new(),
            initializer: None,
            init_params: Vec::new(),
            methods: BTreeMap::new(),
        }
    }

    /// Append a property, returning its offset
    pub fn add_property(&mut self, name: impl Into<String>) -> usize {
        self.properties.push(name.into());
        self.properties.len() - 1
    }

    /// Register a method
    pub fn add_method(&mut self, name: impl Into<String>, symbol: Symbol) {
        self.methods.insert(name.into(), symbol);
    }

    /// Property names in offset order
    #[must_use]
    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    /// Number of property slots an instance needs
    #[must_use]
    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    /// Offset of a property
    #[must_use]
    pub fn property_offset(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p == name)
    }

    /// Symbol of a method
    #[must_use]
    pub fn method(&self, name: &str) -> Option<&Symbol> {
        self.methods.get(name)
    }

    /// All methods, ordered by name
    pub fn methods(&self) -> impl Iterator<Item = (&str, &Symbol)> {
        self.methods.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// One declared case of an enum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseType {
    /// Case name
    pub name: String,
    /// Types of the associated values
    pub values: Vec<Type>,
}

impl From<&str> for CaseType {
    fn from(name: &str) -> Self {
        Self {
            name: name.to_string(),
            values: Vec::new(),
        }
    }
}

/// Run-time descriptor of an enum type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumType {
    /// The enum's symbol
    pub symbol: Symbol,
    /// Cases in declaration order
    pub cases: Vec<CaseType>,
}

impl EnumType {
    /// Index and declaration of a case
    #[must_use]
    pub fn case_type(&self, name: &str) -> Option<(usize, &CaseType)> {
        self.cases.iter().enumerate().find(|(_, c)| c.name == name)
    }

    /// The value a reference to `Enum.name` evaluates to: the case itself,
    /// or its constructor when it has associated values
    #[must_use]
    pub fn case(&self, name: &str) -> Option<EnumCase> {
        let (index, case) = self.case_type(name)?;
        Some(EnumCase {
            owner: self.symbol.clone(),
            name: name.to_string(),
            index: index as u32,
            arity: u8::try_from(case.values.len()).unwrap_or(u8::MAX),
            values: Vec::new(),
        })
    }
}

/// A top-level declaration visible to other chunks and other modules
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Global {
    Function(Symbol),
    Value(Symbol),
    Struct(Symbol),
    Enum(Symbol),
}

impl Global {
    /// The declaration's symbol
    #[must_use]
    pub fn symbol(&self) -> &Symbol {
        match self {
            Global::Function(s) | Global::Value(s) | Global::Struct(s) | Global::Enum(s) => s,
        }
    }
}

/// The linked output of one compilation unit
#[derive(Debug, Clone)]
pub struct Module {
    /// Module name; owns every symbol whose `module` field matches
    pub name: String,

    /// Entry chunk
    pub main: Option<Rc<Chunk>>,

    /// Every compiled chunk, keyed by symbol
    pub chunks: HashMap<Symbol, Rc<Chunk>>,

    /// Lazy initializers for module values
    pub value_initializers: HashMap<Symbol, Rc<Chunk>>,

    /// Struct descriptors
    pub structs: HashMap<Symbol, Rc<StructType>>,

    /// Enum descriptors
    pub enums: HashMap<Symbol, Rc<EnumType>>,

    /// Top-level names other modules may import
    pub exports: BTreeMap<String, Global>,

    /// Modules whose exports this module links against
    pub imports: Vec<Rc<Module>>,

    /// Diagnostics produced while compiling; any entry makes the module
    /// non-executable
    pub diagnostics: Vec<CompileError>,
}

impl Module {
    /// Create an empty module
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            main: None,
            chunks: HashMap::new(),
            value_initializers: HashMap::new(),
            structs: HashMap::new(),
            enums: HashMap::new(),
            exports: BTreeMap::new(),
            imports: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Whether the module may be handed to the virtual machine
    #[must_use]
    pub fn is_executable(&self) -> bool {
        self.main.is_some() && self.diagnostics.is_empty()
    }

    /// Find a module by name in this module's import graph
    #[must_use]
    pub fn find_module(&self, name: &str) -> Option<&Module> {
        if self.name == name {
            return Some(self);
        }
        self.imports.iter().find_map(|m| m.find_module(name))
    }

    /// Look up a chunk anywhere in the import graph
    #[must_use]
    pub fn chunk(&self, symbol: &Symbol) -> Option<&Rc<Chunk>> {
        self.find_module(&symbol.module)?.chunks.get(symbol)
    }

    /// Look up a module value's initializer anywhere in the import graph
    #[must_use]
    pub fn value_initializer(&self, symbol: &Symbol) -> Option<&Rc<Chunk>> {
        self.find_module(&symbol.module)?
            .value_initializers
            .get(symbol)
    }

    /// Look up a struct descriptor anywhere in the import graph
    #[must_use]
    pub fn struct_type(&self, symbol: &Symbol) -> Option<&Rc<StructType>> {
        self.find_module(&symbol.module)?.structs.get(symbol)
    }

    /// Look up an enum descriptor anywhere in the import graph
    #[must_use]
    pub fn enum_type(&self, symbol: &Symbol) -> Option<&Rc<EnumType>> {
        self.find_module(&symbol.module)?.enums.get(symbol)
    }

    /// Resolve a name against the exports of the direct imports, latest
    /// import first
    #[must_use]
    pub fn imported(&self, name: &str) -> Option<&Global> {
        self.imports.iter().rev().find_map(|m| m.exports.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_offsets_follow_declaration_order() {
        let mut ty = StructType::new(Symbol::structure("main", "Person"));
        assert_eq!(ty.add_property("age"), 0);
        assert_eq!(ty.add_property("name"), 1);

        assert_eq!(ty.property_offset("age"), Some(0));
        assert_eq!(ty.property_offset("name"), Some(1));
        assert_eq!(ty.property_offset("height"), None);
        assert_eq!(ty.property_count(), 2);
    }

    #[test]
    fn enum_case_lookup() {
        let ty = EnumType {
            symbol: Symbol::enumeration("main", "Color"),
            cases: vec![
                "red".into(),
                "green".into(),
                CaseType {
                    name: "custom".into(),
                    values: vec![Type::Int, Type::Int, Type::Int],
                },
            ],
        };
        assert_eq!(ty.case("green").map(|c| c.index), Some(1));
        assert!(ty.case("blue").is_none());

        let custom = ty.case("custom").unwrap();
        assert_eq!(custom.arity, 3);
        assert!(custom.is_constructor());
        assert_eq!(ty.case_type("custom").map(|(i, _)| i), Some(2));
    }

    #[test]
    fn import_graph_lookup() {
        let mut dep = Module::new("dep");
        let symbol = Symbol::function("dep", "helper", vec![]);
        dep.chunks.insert(
            symbol.clone(),
            Rc::new(Chunk::new("helper", symbol.clone())),
        );
        dep.exports
            .insert("helper".into(), Global::Function(symbol.clone()));

        let mut root = Module::new("root");
        root.imports.push(Rc::new(dep));

        assert!(root.chunk(&symbol).is_some());
        assert_eq!(root.imported("helper"), Some(&Global::Function(symbol)));
        assert!(!root.is_executable());
    }
}
