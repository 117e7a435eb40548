// Copyright contributors to the frt compiler project
// SPDX-License-Identifier: Apache-2.0

// The symbol store: an arena owning every symbol table and every symbol
// node of a compilation unit. Tables form a tree rooted at the translation
// unit. All references between nodes are ids into the arena, so node
// identity is id equality. The arena is freed as a whole when the store is
// dropped.

use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use thiserror::Error;

use crate::asr::Symbol;

/// Handle of a symbol node in a `SymbolStore`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(usize);

impl From<SymbolId> for usize {
    fn from(id: SymbolId) -> usize {
        id.0
    }
}

/// Handle of a symbol table in a `SymbolStore`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SymtabId(usize);

impl From<SymtabId> for usize {
    fn from(id: SymtabId) -> usize {
        id.0
    }
}

// Table counters are unique across the whole process, not per store, so
// that trees from separately compiled units can be linked without
// renumbering. `fetch_add` keeps this sound if a driver ever compiles
// units on several threads.
static SYMTAB_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_symtab_counter() -> u64 {
    SYMTAB_COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("symbol `{0}` is already bound in this scope")]
    DuplicateSymbol(String),
    #[error("`{0}` is not a valid symbol name")]
    LexicalName(String),
}

fn valid_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Validity rule for user-visible identifiers: non-empty ASCII
/// alphanumerics plus underscore.
pub fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(valid_char)
}

// Names carrying the reserved markers `~` (operator aggregates, renamed
// generic constituents) and `@` (constituents imported through a generic)
// are accepted by the store but are not valid user identifiers.
fn storable_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| valid_char(c) || c == '~' || c == '@')
}

/// All names in the store are lowercase; insertion and lookup both
/// canonicalise.
pub fn canonical_name(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// One lexical scope: a mapping from canonical name to symbol node, plus
/// the parent link and the back-pointer to the owning ASR node. Iteration
/// over `scope` is in insertion order, which keeps diagnostics and
/// dependency lists deterministic.
#[derive(Clone, Debug)]
pub struct SymbolTable {
    counter: u64,
    parent: Option<SymtabId>,
    asr_owner: Option<SymbolId>,
    scope: IndexMap<String, SymbolId>,
}

impl SymbolTable {
    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn parent(&self) -> Option<SymtabId> {
        self.parent
    }

    pub fn asr_owner(&self) -> Option<SymbolId> {
        self.asr_owner
    }

    pub fn scope(&self) -> &IndexMap<String, SymbolId> {
        &self.scope
    }

    pub fn len(&self) -> usize {
        self.scope.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scope.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct SymbolStore {
    tables: Vec<SymbolTable>,
    symbols: Vec<Symbol>,
}

impl SymbolStore {
    pub fn new() -> SymbolStore {
        SymbolStore::default()
    }

    /// Create a fresh empty table. The owner is attached in a second step
    /// with `set_owner`, once the owning node exists; the owning node needs
    /// the table id first, and the table needs the owner id.
    pub fn new_symtab(&mut self, parent: Option<SymtabId>) -> SymtabId {
        let id = SymtabId(self.tables.len());
        self.tables.push(SymbolTable {
            counter: next_symtab_counter(),
            parent,
            asr_owner: None,
            scope: IndexMap::new(),
        });
        id
    }

    pub fn set_owner(&mut self, table: SymtabId, owner: SymbolId) {
        self.tables[table.0].asr_owner = Some(owner);
    }

    pub fn alloc_symbol(&mut self, symbol: Symbol) -> SymbolId {
        let id = SymbolId(self.symbols.len());
        self.symbols.push(symbol);
        id
    }

    pub fn table(&self, id: SymtabId) -> &SymbolTable {
        &self.tables[id.0]
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0]
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0]
    }

    pub fn symbol_name(&self, id: SymbolId) -> &str {
        self.symbol(id).name()
    }

    /// Bind `name` in `table`. Fails with `DuplicateSymbol` when the name is
    /// already bound there; import shadowing goes through
    /// `add_or_overwrite_symbol` instead.
    pub fn add_symbol(
        &mut self,
        table: SymtabId,
        name: &str,
        symbol: SymbolId,
    ) -> Result<(), StoreError> {
        if !storable_name(name) {
            return Err(StoreError::LexicalName(name.to_string()));
        }
        let key = canonical_name(name);
        let scope = &mut self.tables[table.0].scope;
        if scope.contains_key(&key) {
            return Err(StoreError::DuplicateSymbol(key));
        }
        scope.insert(key, symbol);
        Ok(())
    }

    /// Bind `name` in `table`, replacing any existing binding. Used for
    /// module-import shadowing and aggregate merging.
    pub fn add_or_overwrite_symbol(
        &mut self,
        table: SymtabId,
        name: &str,
        symbol: SymbolId,
    ) -> Result<(), StoreError> {
        if !storable_name(name) {
            return Err(StoreError::LexicalName(name.to_string()));
        }
        self.tables[table.0]
            .scope
            .insert(canonical_name(name), symbol);
        Ok(())
    }

    /// Remove a binding, e.g. when a partly-resolved declaration is dropped
    /// on error. Returns the removed symbol. Uses a shift-remove so the
    /// iteration order of the survivors is preserved.
    pub fn remove_symbol(&mut self, table: SymtabId, name: &str) -> Option<SymbolId> {
        self.tables[table.0]
            .scope
            .shift_remove(&canonical_name(name))
    }

    /// Local lookup in a single table.
    pub fn get_symbol(&self, table: SymtabId, name: &str) -> Option<SymbolId> {
        self.tables[table.0]
            .scope
            .get(&canonical_name(name))
            .copied()
    }

    /// Lookup walking the parent chain; returns the nearest binding.
    pub fn resolve_symbol(&self, table: SymtabId, name: &str) -> Option<SymbolId> {
        let key = canonical_name(name);
        let mut current = Some(table);
        while let Some(id) = current {
            let t = &self.tables[id.0];
            if let Some(sym) = t.scope.get(&key) {
                return Some(*sym);
            }
            current = t.parent;
        }
        None
    }

    /// Multi-hop lookup used by `ExternalSymbol`: descend from `table`
    /// through the tables owned by the symbols named in `scope_names`, then
    /// look up `original_name` locally.
    pub fn find_scoped_symbol(
        &self,
        table: SymtabId,
        original_name: &str,
        scope_names: &[String],
    ) -> Option<SymbolId> {
        let mut current = table;
        for scope_name in scope_names {
            let sym = self.get_symbol(current, scope_name)?;
            current = self.symbol(sym).own_symtab()?;
        }
        self.get_symbol(current, original_name)
    }

    /// Follow an `ExternalSymbol` exactly one step. An external must never
    /// point at another external, so one step suffices.
    pub fn symbol_get_past_external(&self, id: SymbolId) -> SymbolId {
        match self.symbol(id) {
            Symbol::ExternalSymbol(ext) => ext.external.unwrap_or(id),
            _ => id,
        }
    }

    /// The table a symbol is owned by: the parent of its own table for the
    /// table-owning variants, the recorded parent table for the rest.
    pub fn parent_symtab(&self, id: SymbolId) -> Option<SymtabId> {
        let sym = self.symbol(id);
        match sym.own_symtab() {
            Some(own) => self.table(own).parent(),
            None => sym.recorded_parent_symtab(),
        }
    }

    /// The nearest enclosing Module of a symbol, walking owner links.
    pub fn enclosing_module(&self, id: SymbolId) -> Option<SymbolId> {
        let mut table = self.parent_symtab(id);
        while let Some(t) = table {
            if let Some(owner) = self.table(t).asr_owner() {
                if matches!(self.symbol(owner), Symbol::Module(_)) {
                    return Some(owner);
                }
                table = self.parent_symtab(owner);
            } else {
                return None;
            }
        }
        None
    }

    /// The ASR node owning the table a symbol lives in.
    pub fn asr_owner_of(&self, id: SymbolId) -> Option<SymbolId> {
        self.parent_symtab(id)
            .and_then(|t| self.table(t).asr_owner())
    }

    pub fn num_tables(&self) -> usize {
        self.tables.len()
    }

    pub fn num_symbols(&self) -> usize {
        self.symbols.len()
    }
}

impl std::ops::Index<SymbolId> for SymbolStore {
    type Output = Symbol;

    fn index(&self, id: SymbolId) -> &Self::Output {
        self.symbol(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_name() {
        assert!(valid_name("x"));
        assert!(valid_name("long_name_42"));
        assert!(!valid_name(""));
        assert!(!valid_name("has space"));
        assert!(!valid_name("~assign"));
        assert!(storable_name("~assign"));
        assert!(storable_name("plus@generic"));
    }

    #[test]
    fn test_counter_monotone() {
        let mut store = SymbolStore::new();
        let t1 = store.new_symtab(None);
        let t2 = store.new_symtab(Some(t1));
        assert!(store.table(t2).counter() > store.table(t1).counter());
    }
}
