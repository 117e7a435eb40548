// Copyright contributors to the frt compiler project
// SPDX-License-Identifier: Apache-2.0

use frt_asr::asr::{Access, Intent, Presence, Storage, Symbol, Variable};
use frt_asr::location::Location;
use frt_asr::symbols::{canonical_name, valid_name, StoreError, SymbolStore};
use frt_asr::types::Ttype;

//
// Test the API of the symbol store: tables, lookup, canonicalisation.
//

fn new_variable(store: &mut SymbolStore, table: frt_asr::symbols::SymtabId, name: &str) -> frt_asr::symbols::SymbolId {
    store.alloc_symbol(Symbol::Variable(Variable {
        name: canonical_name(name),
        parent_symtab: table,
        ty: Ttype::Integer { kind: 4 },
        symbolic_value: None,
        value: None,
        intent: Intent::Local,
        storage: Storage::Default,
        access: Access::Public,
        presence: Presence::Required,
        dependencies: Vec::new(),
        type_declaration: None,
        loc: Location::default(),
    }))
}

#[test]
fn test_store_create() {
    let mut store = SymbolStore::new();
    let root = store.new_symtab(None);
    assert!(store.table(root).parent().is_none());
    assert!(store.table(root).is_empty());
    assert!(store.get_symbol(root, "x").is_none());
}

#[test]
fn test_add_and_lookup() {
    let mut store = SymbolStore::new();
    let root = store.new_symtab(None);
    let x = new_variable(&mut store, root, "x");
    assert!(store.add_symbol(root, "x", x).is_ok());
    assert_eq!(store.get_symbol(root, "x"), Some(x));
    // Lookups canonicalise to lowercase.
    assert_eq!(store.get_symbol(root, "X"), Some(x));
    assert_eq!(
        store.add_symbol(root, "X", x),
        Err(StoreError::DuplicateSymbol("x".to_string()))
    );
}

#[test]
fn test_resolve_walks_parents() {
    let mut store = SymbolStore::new();
    let root = store.new_symtab(None);
    let inner = store.new_symtab(Some(root));
    let x = new_variable(&mut store, root, "x");
    store.add_symbol(root, "x", x).unwrap();
    assert_eq!(store.resolve_symbol(inner, "x"), Some(x));
    assert!(store.get_symbol(inner, "x").is_none());
    // The nearest binding wins.
    let shadow = new_variable(&mut store, inner, "x");
    store.add_symbol(inner, "x", shadow).unwrap();
    assert_eq!(store.resolve_symbol(inner, "x"), Some(shadow));
}

#[test]
fn test_counters_are_unique() {
    let mut store = SymbolStore::new();
    let a = store.new_symtab(None);
    let b = store.new_symtab(Some(a));
    let c = store.new_symtab(Some(a));
    let counters = [
        store.table(a).counter(),
        store.table(b).counter(),
        store.table(c).counter(),
    ];
    let mut sorted = counters.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), 3);
    // Counters stay unique across stores in the same process.
    let mut other = SymbolStore::new();
    let d = other.new_symtab(None);
    assert!(!counters.contains(&other.table(d).counter()));
}

#[test]
fn test_overwrite_and_remove() {
    let mut store = SymbolStore::new();
    let root = store.new_symtab(None);
    let first = new_variable(&mut store, root, "v");
    let second = new_variable(&mut store, root, "v");
    store.add_symbol(root, "v", first).unwrap();
    store.add_or_overwrite_symbol(root, "v", second).unwrap();
    assert_eq!(store.get_symbol(root, "v"), Some(second));
    assert_eq!(store.remove_symbol(root, "v"), Some(second));
    assert!(store.get_symbol(root, "v").is_none());
}

#[test]
fn test_name_validity() {
    assert!(valid_name("area_2"));
    assert!(!valid_name("no spaces"));
    assert!(!valid_name(""));
    // Reserved aggregate names are storable but not valid identifiers.
    assert!(!valid_name("~assign"));
    let mut store = SymbolStore::new();
    let root = store.new_symtab(None);
    let v = new_variable(&mut store, root, "x");
    assert!(store.add_symbol(root, "~assign", v).is_ok());
    assert!(matches!(
        store.add_symbol(root, "not valid", v),
        Err(StoreError::LexicalName(_))
    ));
}

#[test]
fn test_canonicalisation_is_idempotent() {
    for name in ["X", "MixedCase", "lower", "UNDER_SCORE_9"] {
        let once = canonical_name(name);
        assert_eq!(canonical_name(&once), once);
    }
}

#[test]
fn test_iteration_order_is_insertion_order() {
    let mut store = SymbolStore::new();
    let root = store.new_symtab(None);
    for name in ["delta", "alpha", "zeta", "beta"] {
        let sym = new_variable(&mut store, root, name);
        store.add_symbol(root, name, sym).unwrap();
    }
    let names: Vec<&str> = store.table(root).scope().keys().map(|k| k.as_str()).collect();
    assert_eq!(names, ["delta", "alpha", "zeta", "beta"]);
}
