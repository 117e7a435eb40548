// Copyright contributors to the frt compiler project
// SPDX-License-Identifier: Apache-2.0

// The resolver context: the store and diagnostics handles, the current
// scope pointer, the per-scope accumulators, and the dependency trackers.
// Scope state is restored along every return path, including the
// `SemanticAbort` unwind, so a dropped declaration never leaves the
// resolver pointing into a dead scope.

use hashbrown::HashSet;
use indexmap::IndexMap;
use thiserror::Error;

use frt_asr::asr::{Access, Symbol};
use frt_asr::diagnostics::{Diagnostic, Diagnostics, ErrorKind, Label, Level, Stage};
use frt_asr::location::Location;
use frt_asr::symbols::{SymbolId, SymbolStore, SymtabId};

use crate::config::ResolverConfig;
use crate::implicit::ImplicitDictionary;

/// The unwind signal popping out of arbitrarily deep visitor recursion to
/// the nearest scope boundary.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("semantic analysis aborted")]
pub struct SemanticAbort;

pub type SResult<T> = Result<T, SemanticAbort>;

/// A type-bound procedure binding waiting for its Struct body to close.
#[derive(Clone, Debug)]
pub struct MethodBinding {
    pub binding_name: String,
    pub proc_name: String,
    pub deferred: bool,
    pub nopass: bool,
    pub pass_name: Option<String>,
    pub loc: Location,
}

/// A Variable whose Struct has not been emitted yet; the type-declaration
/// field is patched when the Struct is finalised.
#[derive(Clone, Debug)]
pub struct DeferredStructVar {
    pub var: SymbolId,
    pub struct_name: String,
    pub loc: Location,
}

/// Per-scope accumulators, swapped out and back when entering a nested
/// unit scope and drained at scope finalisation.
#[derive(Clone, Debug)]
pub struct Accumulators {
    /// generic name -> candidate procedure names.
    pub generic_procedures: IndexMap<String, Vec<String>>,
    /// intrinsic operator spelling (`+`, `==`, ...) -> procedure names.
    pub overloaded_op_procs: IndexMap<String, Vec<String>>,
    /// user-defined operator bare name -> procedure names.
    pub defined_op_procs: IndexMap<String, Vec<String>>,
    /// procedures of `interface assignment (=)`.
    pub assignment_procs: Vec<String>,
    /// struct name -> type-bound procedure bindings.
    pub class_procedures: IndexMap<String, Vec<MethodBinding>>,
    /// struct name -> generic binding name -> constituent binding names.
    pub generic_class_procedures: IndexMap<String, IndexMap<String, Vec<String>>>,
    pub deferred_struct_vars: Vec<DeferredStructVar>,
    /// variables named by a `simd` pragma in this scope.
    pub simd_variables: Vec<(String, Location)>,
    pub default_access: Access,
    /// names given explicit access by `public`/`private` statements.
    pub explicit_access: IndexMap<String, Access>,
}

impl Default for Accumulators {
    fn default() -> Accumulators {
        Accumulators {
            generic_procedures: IndexMap::new(),
            overloaded_op_procs: IndexMap::new(),
            defined_op_procs: IndexMap::new(),
            assignment_procs: Vec::new(),
            class_procedures: IndexMap::new(),
            generic_class_procedures: IndexMap::new(),
            deferred_struct_vars: Vec::new(),
            simd_variables: Vec::new(),
            default_access: Access::Public,
            explicit_access: IndexMap::new(),
        }
    }
}

pub struct Context<'a> {
    pub store: &'a mut SymbolStore,
    pub diagnostics: &'a mut Diagnostics,
    pub config: ResolverConfig,
    pub translation_unit: SymbolId,
    pub root_scope: SymtabId,
    pub current_scope: SymtabId,
    pub implicit_stack: Vec<ImplicitDictionary>,
    pub current_module_dependencies: Vec<String>,
    pub current_function_dependencies: Vec<String>,
    pub current_procedure_args: Vec<String>,
    /// (table counter, name) pairs of parameter constants that have
    /// received their single allowed assignment.
    pub const_assigned: HashSet<(u64, String)>,
    pub accumulators: Accumulators,
    /// entry or original procedure name -> positions of its formals in the
    /// master's formal list.
    pub entry_argument_map: IndexMap<String, Vec<usize>>,
    /// Type parameters of the template currently being declared; names in
    /// this list resolve to `Ttype::TypeParameter`.
    pub current_template_params: Vec<String>,
    pub nameless_enum_count: u32,
}

/// Everything that belongs to one unit resolution, saved around re-entrant
/// module loading.
pub struct SavedUnitState {
    current_scope: SymtabId,
    implicit_depth: usize,
    module_dependencies: Vec<String>,
    function_dependencies: Vec<String>,
    procedure_args: Vec<String>,
    accumulators: Accumulators,
    template_params: Vec<String>,
}

impl<'a> Context<'a> {
    pub fn new(
        store: &'a mut SymbolStore,
        diagnostics: &'a mut Diagnostics,
        config: ResolverConfig,
        translation_unit: SymbolId,
        root_scope: SymtabId,
    ) -> Context<'a> {
        Context {
            store,
            diagnostics,
            config,
            translation_unit,
            root_scope,
            current_scope: root_scope,
            implicit_stack: Vec::new(),
            current_module_dependencies: Vec::new(),
            current_function_dependencies: Vec::new(),
            current_procedure_args: Vec::new(),
            const_assigned: HashSet::new(),
            accumulators: Accumulators::default(),
            entry_argument_map: IndexMap::new(),
            current_template_params: Vec::new(),
            nameless_enum_count: 0,
        }
    }

    /// Record an Error and hand back the abort token; the caller unwinds
    /// with it, or drops it at a scope boundary under continue-on-error.
    pub fn error<T: ToString>(&mut self, kind: ErrorKind, message: T, loc: Location) -> SemanticAbort {
        self.diagnostics.add(
            Diagnostic::new(
                message,
                Level::Error,
                Stage::Semantic,
                vec![Label::primary(loc)],
            )
            .with_kind(kind),
        );
        SemanticAbort
    }

    pub fn warn<T: ToString>(&mut self, message: T, loc: Location) {
        self.diagnostics.add_warning(message, vec![Label::primary(loc)]);
    }

    /// Bind `name` in the current scope. An existing `ExternalSymbol`
    /// binding is shadowed with a warning; any other existing binding is a
    /// `DuplicateSymbol` error.
    pub fn add_symbol_checked(
        &mut self,
        name: &str,
        symbol: SymbolId,
        loc: Location,
    ) -> SResult<()> {
        if let Some(existing) = self.store.get_symbol(self.current_scope, name) {
            if matches!(self.store.symbol(existing), Symbol::ExternalSymbol(_)) {
                self.warn(
                    format!("`{name}` shadows a symbol imported from a module"),
                    loc,
                );
                self.store
                    .add_or_overwrite_symbol(self.current_scope, name, symbol)
                    .map_err(|e| self.error(ErrorKind::LexicalName, e.to_string(), loc))?;
                return Ok(());
            }
            return Err(self.error(
                ErrorKind::DuplicateSymbol,
                format!("symbol `{name}` is already declared in this scope"),
                loc,
            ));
        }
        self.store
            .add_symbol(self.current_scope, name, symbol)
            .map_err(|e| self.error(ErrorKind::LexicalName, e.to_string(), loc))
    }

    /// The implicit dictionary of the current scope.
    pub fn implicit_dictionary(&self) -> Option<&ImplicitDictionary> {
        self.implicit_stack.last()
    }

    pub fn implicit_dictionary_mut(&mut self) -> Option<&mut ImplicitDictionary> {
        self.implicit_stack.last_mut()
    }

    /// Record a call target in the function dependency list when the call
    /// crosses the current scope. A target bound in the current table or
    /// any of its ancestors up to and including the enclosing Function's
    /// table is local, however deeply the Block and AssociateBlock scopes
    /// nest. ExternalSymbol and Variable targets are never function
    /// dependencies.
    pub fn record_function_dependency(&mut self, name: SymbolId) {
        let target = self.store.symbol_get_past_external(name);
        if matches!(self.store.symbol(target), Symbol::StructMethodDeclaration(_)) {
            let method_name = self.store.symbol_name(target).to_string();
            if !self.current_function_dependencies.contains(&method_name) {
                self.current_function_dependencies.push(method_name);
            }
            return;
        }
        if matches!(
            self.store.symbol(name),
            Symbol::ExternalSymbol(_) | Symbol::Variable(_)
        ) {
            return;
        }
        let mut local_counters = vec![self.store.table(self.current_scope).counter()];
        let mut scope = self.current_scope;
        loop {
            let owner = self
                .store
                .table(scope)
                .asr_owner()
                .map(|o| self.store.symbol(o));
            if !matches!(owner, Some(Symbol::Block(_)) | Some(Symbol::AssociateBlock(_))) {
                break;
            }
            let Some(parent) = self.store.table(scope).parent() else {
                break;
            };
            scope = parent;
            local_counters.push(self.store.table(scope).counter());
        }
        let target_counter = self
            .store
            .parent_symtab(name)
            .map(|t| self.store.table(t).counter());
        if target_counter.map_or(true, |c| !local_counters.contains(&c)) {
            let dep = self.store.symbol_name(name).to_string();
            if !self.current_function_dependencies.contains(&dep) {
                self.current_function_dependencies.push(dep);
            }
        }
    }

    /// A reference through an ExternalSymbol makes the origin module a
    /// dependency of the enclosing module or program.
    pub fn record_external_reference(&mut self, sym: SymbolId) {
        if let Symbol::ExternalSymbol(ext) = self.store.symbol(sym) {
            let from_module = ext
                .external
                .map(|e| {
                    self.store
                        .asr_owner_of(e)
                        .map(|o| matches!(self.store.symbol(o), Symbol::Module(_)))
                        .unwrap_or(false)
                })
                .unwrap_or(true);
            if from_module {
                let module_name = ext.module_name.clone();
                if !self.current_module_dependencies.contains(&module_name) {
                    self.current_module_dependencies.push(module_name);
                }
            }
        }
    }

    /// Swap in fresh unit state for a re-entrant module load; the caller
    /// restores with `restore_unit_state`.
    pub fn save_unit_state(&mut self) -> SavedUnitState {
        SavedUnitState {
            current_scope: std::mem::replace(&mut self.current_scope, self.root_scope),
            implicit_depth: self.implicit_stack.len(),
            module_dependencies: std::mem::take(&mut self.current_module_dependencies),
            function_dependencies: std::mem::take(&mut self.current_function_dependencies),
            procedure_args: std::mem::take(&mut self.current_procedure_args),
            accumulators: std::mem::take(&mut self.accumulators),
            template_params: std::mem::take(&mut self.current_template_params),
        }
    }

    pub fn restore_unit_state(&mut self, saved: SavedUnitState) {
        self.current_scope = saved.current_scope;
        self.implicit_stack.truncate(saved.implicit_depth);
        self.current_module_dependencies = saved.module_dependencies;
        self.current_function_dependencies = saved.function_dependencies;
        self.current_procedure_args = saved.procedure_args;
        self.accumulators = saved.accumulators;
        self.current_template_params = saved.template_params;
    }
}

/// Run `f` with `scope` as the current scope and restore the previous
/// scope on every return path, including the abort unwind.
pub fn with_scope<T>(
    ctx: &mut Context,
    scope: SymtabId,
    f: impl FnOnce(&mut Context) -> SResult<T>,
) -> SResult<T> {
    let saved = std::mem::replace(&mut ctx.current_scope, scope);
    let result = f(ctx);
    ctx.current_scope = saved;
    result
}

/// Deduplicate preserving first-occurrence order, so diagnostics stay
/// stable.
pub fn dedup_preserving_order(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .filter(|name| seen.insert(name.clone()))
        .collect()
}
