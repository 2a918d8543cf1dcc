//! Module-level name resolution shared by every chunk of a compilation unit

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use crate::ast::{FuncDecl, Param, Type};
use crate::bytecode::{EnumType, Global, Module, StructType, Symbol};
use crate::standard;

/// Every top-level name visible while compiling one module
///
/// Filled in by the module compiler's collection pass; read by the chunk
/// compiler while emitting bodies.
#[derive(Debug, Clone)]
pub struct SymbolSpace {
    module: String,
    globals: BTreeMap<String, Global>,
    structs: HashMap<Symbol, Rc<StructType>>,
    enums: HashMap<Symbol, Rc<EnumType>>,
    params: HashMap<Symbol, Vec<String>>,
    imports: Vec<Rc<Module>>,
}

impl SymbolSpace {
    /// Create an empty space for `module` linking against `imports`
    #[must_use]
    pub fn new(module: impl Into<String>, imports: Vec<Rc<Module>>) -> Self {
        Self {
            module: module.into(),
            globals: BTreeMap::new(),
            structs: HashMap::new(),
            enums: HashMap::new(),
            params: HashMap::new(),
            imports,
        }
    }

    /// Name of the module being compiled
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Bind a top-level name, returning the definition it replaced
    pub fn define(&mut self, name: impl Into<String>, global: Global) -> Option<Global> {
        self.globals.insert(name.into(), global)
    }

    /// Register a struct descriptor and bind its name
    pub fn define_struct(&mut self, ty: StructType) -> Option<Global> {
        let previous = self.define(ty.name.clone(), Global::Struct(ty.symbol.clone()));
        self.structs.insert(ty.symbol.clone(), Rc::new(ty));
        previous
    }

    /// Register an enum descriptor and bind its name
    pub fn define_enum(&mut self, name: impl Into<String>, ty: EnumType) -> Option<Global> {
        let previous = self.define(name, Global::Enum(ty.symbol.clone()));
        self.enums.insert(ty.symbol.clone(), Rc::new(ty));
        previous
    }

    /// Record the parameter names of a function, for labelled arguments
    pub fn set_params(&mut self, symbol: Symbol, names: Vec<String>) {
        self.params.insert(symbol, names);
    }

    /// Resolve a name against this module's globals, then the imports
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&Global> {
        self.globals
            .get(name)
            .or_else(|| self.imports.iter().rev().find_map(|m| m.exports.get(name)))
    }

    /// Look up a struct descriptor by symbol
    #[must_use]
    pub fn struct_type(&self, symbol: &Symbol) -> Option<&Rc<StructType>> {
        self.structs
            .get(symbol)
            .or_else(|| self.imports.iter().find_map(|m| m.struct_type(symbol)))
    }

    /// Look up an enum descriptor by symbol
    #[must_use]
    pub fn enum_type(&self, symbol: &Symbol) -> Option<&Rc<EnumType>> {
        self.enums
            .get(symbol)
            .or_else(|| self.imports.iter().find_map(|m| m.enum_type(symbol)))
    }

    /// The enum descriptor of an inferred enum type
    #[must_use]
    pub fn enum_for_type(&self, ty: &Type) -> Option<&Rc<EnumType>> {
        let Type::Enum(name) = ty else {
            return None;
        };
        match self.resolve(name)? {
            Global::Enum(symbol) => self.enum_type(symbol),
            _ => None,
        }
    }

    /// The struct descriptor backing values of an inferred type
    #[must_use]
    pub fn struct_for_type(&self, ty: &Type) -> Option<&Rc<StructType>> {
        let symbol = match ty {
            Type::Struct(name) => match self.resolve(name)? {
                Global::Struct(symbol) => symbol.clone(),
                _ => return None,
            },
            Type::Array(_) => standard::struct_symbol(standard::ARRAY),
            Type::Dictionary(..) => standard::struct_symbol(standard::DICTIONARY),
            _ => return None,
        };
        self.struct_type(&symbol)
    }

    /// Parameter names of a function or initializer, if known
    #[must_use]
    pub fn param_names(&self, symbol: &Symbol) -> Option<&[String]> {
        self.params.get(symbol).map(Vec::as_slice)
    }

    /// Top-level bindings declared by this module
    #[must_use]
    pub fn globals(&self) -> &BTreeMap<String, Global> {
        &self.globals
    }

    /// Split into the parts a linked module keeps
    pub(crate) fn into_parts(
        self,
    ) -> (
        BTreeMap<String, Global>,
        HashMap<Symbol, Rc<StructType>>,
        HashMap<Symbol, Rc<EnumType>>,
        Vec<Rc<Module>>,
    ) {
        (self.globals, self.structs, self.enums, self.imports)
    }
}

/// Parameter type names that qualify a function or method symbol
pub(crate) fn param_types(params: &[Param]) -> Vec<String> {
    params.iter().map(|p| p.ty.to_string()).collect()
}

/// Symbol of a top-level function
pub(crate) fn function_symbol(module: &str, name: &str, decl: &FuncDecl) -> Symbol {
    Symbol::function(module, name, param_types(&decl.params))
}

/// Symbol of the chunk holding one file's top-level statements
pub(crate) fn file_symbol(module: &str, path: &str) -> Symbol {
    Symbol::function(module, format!("<file {path}>"), Vec::new())
}

/// Symbol of the synthesized entry chunk
pub(crate) fn main_symbol(module: &str) -> Symbol {
    Symbol::function(module, "<main>", Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_globals_shadow_imports() {
        let mut library = Module::new("lib");
        library.exports.insert(
            "helper".into(),
            Global::Function(Symbol::function("lib", "helper", vec![])),
        );

        let mut space = SymbolSpace::new("main", vec![Rc::new(library)]);
        assert_eq!(
            space.resolve("helper").map(Global::symbol).map(|s| s.module.as_str()),
            Some("lib")
        );

        space.define(
            "helper",
            Global::Function(Symbol::function("main", "helper", vec![])),
        );
        assert_eq!(
            space.resolve("helper").map(Global::symbol).map(|s| s.module.as_str()),
            Some("main")
        );
        assert!(space.resolve("missing").is_none());
    }

    #[test]
    fn collection_types_resolve_to_standard_structs() {
        let space = SymbolSpace::new("main", vec![Rc::new(standard::module())]);
        let array = space.struct_for_type(&Type::array(Type::Int)).unwrap();
        assert_eq!(array.name, standard::ARRAY);
        assert_eq!(array.property_offset("count"), Some(standard::array::COUNT));
        assert!(space.struct_for_type(&Type::Int).is_none());
    }

    #[test]
    fn redefinition_returns_previous() {
        let mut space = SymbolSpace::new("main", Vec::new());
        let first = Global::Value(Symbol::value("main", "x"));
        assert!(space.define("x", first.clone()).is_none());
        assert_eq!(
            space.define("x", Global::Value(Symbol::value("main", "x"))),
            Some(first)
        );
    }
}
