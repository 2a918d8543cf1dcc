//! The host-backed `Standard` module
//!
//! `Standard` declares the collection structs `Array` and `Dictionary`. Their
//! descriptors are ordinary struct types, so the compiler resolves property
//! offsets and method symbols for them like any other struct, but no chunk is
//! ever compiled for their methods: the VM recognizes the reserved module
//! name on the method symbol and runs host logic instead.
//!
//! Both collections keep their elements in raw heap blocks addressed by the
//! `_storage` (or `_keys`/`_values`) pointer property.

use std::rc::Rc;

use crate::bytecode::{Global, Module, StructType, Symbol, STANDARD_MODULE};

/// Name of the array struct
pub const ARRAY: &str = "Array";

/// Name of the dictionary struct
pub const DICTIONARY: &str = "Dictionary";

/// Array property offsets
pub mod array {
    /// Pointer to the element block
    pub const STORAGE: usize = 0;
    /// Number of elements
    pub const COUNT: usize = 1;
    /// Slots in the element block
    pub const CAPACITY: usize = 2;
}

/// Dictionary property offsets
pub mod dictionary {
    /// Pointer to the key block
    pub const KEYS: usize = 0;
    /// Pointer to the value block
    pub const VALUES: usize = 1;
    /// Number of entries
    pub const COUNT: usize = 2;
    /// Slots in each block
    pub const CAPACITY: usize = 3;
}

/// Methods of `Array` with their parameter type names
const ARRAY_METHODS: &[(&str, &[&str])] = &[
    ("append", &["any"]),
    ("get", &["int"]),
    ("set", &["int", "any"]),
    ("remove", &["int"]),
    ("contains", &["any"]),
];

/// Methods of `Dictionary` with their parameter type names
const DICTIONARY_METHODS: &[(&str, &[&str])] = &[
    ("get", &["any"]),
    ("set", &["any", "any"]),
    ("remove", &["any"]),
    ("contains", &["any"]),
];

/// Symbol of a `Standard` struct
#[must_use]
pub fn struct_symbol(name: &str) -> Symbol {
    Symbol::structure(STANDARD_MODULE, name)
}

fn host_struct(name: &str, properties: &[&str], methods: &[(&str, &[&str])]) -> StructType {
    let mut ty = StructType::new(struct_symbol(name));
    for property in properties {
        ty.add_property(*property);
    }
    for (method, params) in methods {
        let params = params.iter().map(|p| (*p).to_string()).collect();
        ty.add_method(*method, Symbol::method(STANDARD_MODULE, name, *method, params));
    }
    ty
}

/// Descriptor of `Array`
#[must_use]
pub fn array_type() -> StructType {
    host_struct(ARRAY, &["_storage", "count", "capacity"], ARRAY_METHODS)
}

/// Descriptor of `Dictionary`
#[must_use]
pub fn dictionary_type() -> StructType {
    host_struct(
        DICTIONARY,
        &["_keys", "_values", "count", "capacity"],
        DICTIONARY_METHODS,
    )
}

/// Build the `Standard` module's descriptors
#[must_use]
pub fn module() -> Module {
    let mut module = Module::new(STANDARD_MODULE);

    for ty in [array_type(), dictionary_type()] {
        module
            .exports
            .insert(ty.name.clone(), Global::Struct(ty.symbol.clone()));
        module.structs.insert(ty.symbol.clone(), Rc::new(ty));
    }

    module
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_match_descriptors() {
        let standard = module();
        let list = &standard.structs[&struct_symbol(ARRAY)];
        assert_eq!(list.property_offset("_storage"), Some(array::STORAGE));
        assert_eq!(list.property_offset("count"), Some(array::COUNT));
        assert_eq!(list.property_offset("capacity"), Some(array::CAPACITY));

        let map = &standard.structs[&struct_symbol(DICTIONARY)];
        assert_eq!(map.property_offset("_keys"), Some(dictionary::KEYS));
        assert_eq!(map.property_offset("_values"), Some(dictionary::VALUES));
        assert_eq!(map.property_offset("count"), Some(dictionary::COUNT));
        assert_eq!(map.property_offset("capacity"), Some(dictionary::CAPACITY));
    }

    #[test]
    fn methods_are_standard_symbols() {
        let standard = module();
        let list = &standard.structs[&struct_symbol(ARRAY)];
        let append = list.method("append").unwrap();
        assert!(append.is_standard());
        assert_eq!(append.to_string(), "$MStandard$Array$append$any");
        assert!(standard.chunks.is_empty());
        assert!(standard.imported("Array").is_none());
        assert!(standard.exports.contains_key("Dictionary"));
    }
}
