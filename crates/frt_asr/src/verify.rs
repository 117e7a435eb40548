// Copyright contributors to the frt compiler project
// SPDX-License-Identifier: Apache-2.0

// The ASR verifier: a read-only post-order walk over a translation unit
// that re-checks every structural invariant the resolver is supposed to
// have established. It never mutates; on the first violation it records an
// Error diagnostic and unwinds with `VerifyAbort`.
//
// Two modes: pre-link (`check_external == false`, ExternalSymbols may still
// be unresolved) and post-link (every reference must resolve).

use hashbrown::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

use crate::asr::{
    extract_integer_value, is_value_constant, Assignment, CallArg, Enum, EnumValueType, Expr,
    ExternalSymbol, Function, Intent, Module, Program, Select, Stmt, Storage,
    StructMethodDeclaration, Symbol, TExpr, TranslationUnit, UnitItem, Var,
};
use crate::diagnostics::{Diagnostics, ErrorKind, Level, Stage};
use crate::location::Location;
use crate::symbols::{valid_name, SymbolId, SymbolStore, SymtabId};
use crate::types::{LengthKind, StringPhysical, Ttype};

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("ASR verification aborted")]
pub struct VerifyAbort;

type VResult = Result<(), VerifyAbort>;

// Requires `cond` to hold; records an Error and unwinds otherwise.
macro_rules! require {
    ($self:ident, $cond:expr, $loc:expr, $($arg:tt)+) => {
        if !($cond) {
            return Err($self.fail(None, format!($($arg)+), $loc));
        }
    };
}

macro_rules! require_kind {
    ($self:ident, $kind:expr, $cond:expr, $loc:expr, $($arg:tt)+) => {
        if !($cond) {
            return Err($self.fail(Some($kind), format!($($arg)+), $loc));
        }
    };
}

struct VerifyVisitor<'a> {
    store: &'a SymbolStore,
    check_external: bool,
    diagnostics: &'a mut Diagnostics,
    current_symtab: Option<SymtabId>,
    current_name: String,
    // All reachable table counters; everything else must point into this
    // set, i.e. no duplicates and no orphans.
    id_symtab_map: HashMap<u64, SymtabId>,
    function_dependencies: Vec<String>,
    module_dependencies: Vec<String>,
    variable_dependencies: Vec<String>,
    const_assigned: HashSet<(u64, String)>,
    in_string_physical_cast: bool,
}

impl<'a> VerifyVisitor<'a> {
    fn new(
        store: &'a SymbolStore,
        check_external: bool,
        diagnostics: &'a mut Diagnostics,
    ) -> VerifyVisitor<'a> {
        VerifyVisitor {
            store,
            check_external,
            diagnostics,
            current_symtab: None,
            current_name: String::new(),
            id_symtab_map: HashMap::new(),
            function_dependencies: Vec::new(),
            module_dependencies: Vec::new(),
            variable_dependencies: Vec::new(),
            const_assigned: HashSet::new(),
            in_string_physical_cast: false,
        }
    }

    fn fail(&mut self, kind: Option<ErrorKind>, message: String, loc: Location) -> VerifyAbort {
        let mut diagnostic = crate::diagnostics::Diagnostic::new(
            message,
            Level::Error,
            Stage::AsrVerify,
            vec![crate::diagnostics::Label::primary(loc)],
        );
        diagnostic.kind = kind;
        self.diagnostics.add(diagnostic);
        VerifyAbort
    }

    fn symbol(&self, id: SymbolId) -> &'a Symbol {
        self.store.symbol(id)
    }

    // Returns true if the parent table of `sym` is the current table or any
    // of its ancestors *and* that table binds `sym`'s name to exactly this
    // symbol object.
    fn symtab_in_scope(&mut self, symtab: SymtabId, sym: SymbolId, loc: Location) -> VResult {
        let parent = match self.store.parent_symtab(sym) {
            Some(p) => p,
            None => {
                return Err(self.fail(
                    None,
                    "symbol has no parent symbol table".to_string(),
                    loc,
                ))
            }
        };
        let target_counter = self.store.table(parent).counter();
        let name = self.store.symbol_name(sym).to_string();
        let mut current = Some(symtab);
        while let Some(t) = current {
            let table = self.store.table(t);
            if table.counter() == target_counter {
                return match self.store.get_symbol(t, &name) {
                    Some(found) if found == sym => Ok(()),
                    Some(_) => Err(self.fail(
                        None,
                        format!(
                            "the symbol table was found and the symbol in it shares the name \
                             `{name}`, but is a different symbol"
                        ),
                        loc,
                    )),
                    None => Err(self.fail(
                        None,
                        format!("the symbol table was found, but `{name}` is not in it"),
                        loc,
                    )),
                };
            }
            current = table.parent();
        }
        Err(self.fail(
            None,
            format!("the symbol table of `{name}` is not in scope"),
            loc,
        ))
    }

    // Common scope-integrity checks for every node that owns a table.
    fn enter_owned_table(
        &mut self,
        what: &str,
        sym: SymbolId,
        symtab: SymtabId,
        loc: Location,
    ) -> VResult {
        let table = self.store.table(symtab);
        require!(
            self,
            table.parent() == self.current_symtab,
            loc,
            "{what}::symtab->parent is not the right parent"
        );
        require!(
            self,
            !self.id_symtab_map.contains_key(&table.counter()),
            loc,
            "{what}::symtab->counter must be unique"
        );
        require!(
            self,
            table.asr_owner() == Some(sym),
            loc,
            "{what}::symtab::asr_owner must point back to the owning node"
        );
        require!(
            self,
            self.symbol(sym).own_symtab() == Some(symtab),
            loc,
            "the asr_owner invariant failed for {what}"
        );
        self.id_symtab_map.insert(table.counter(), symtab);
        Ok(())
    }

    // The handle a method call leaves behind: an ExternalSymbol in `symtab`
    // whose target is a StructMethodDeclaration named `method`.
    fn method_handle_for(&self, symtab: SymtabId, method: &str) -> Option<SymbolId> {
        for sym in self.store.table(symtab).scope().values() {
            if let Symbol::ExternalSymbol(ext) = self.symbol(*sym) {
                if ext.original_name == method {
                    let target = self.store.symbol_get_past_external(*sym);
                    if matches!(self.symbol(target), Symbol::StructMethodDeclaration(_)) {
                        return Some(*sym);
                    }
                }
            }
        }
        None
    }

    fn visit_scope_symbols(&mut self, symtab: SymtabId) -> VResult {
        // Iteration is in insertion order; the scope map guarantees it.
        let ids: Vec<SymbolId> = self.store.table(symtab).scope().values().copied().collect();
        for id in ids {
            self.visit_symbol(id)?;
        }
        Ok(())
    }

    fn verify_unique_dependencies(
        &mut self,
        dependencies: &[String],
        name: &str,
        loc: Location,
    ) -> VResult {
        let mut seen = HashSet::new();
        for dep in dependencies {
            require_kind!(
                self,
                ErrorKind::DependencyDrift,
                seen.insert(dep.as_str()),
                loc,
                "symbol `{dep}` is duplicated in the dependency list of `{name}`"
            );
        }
        Ok(())
    }

    // Both-ways set equality between a stored dependency list and the set
    // accumulated by the walk.
    fn verify_dependency_equality(
        &mut self,
        what: &str,
        name: &str,
        stored: &[String],
        walked: &[String],
        loc: Location,
    ) -> VResult {
        for dep in stored {
            require_kind!(
                self,
                ErrorKind::DependencyDrift,
                walked.iter().any(|d| d == dep),
                loc,
                "{what} `{name}` doesn't depend on `{dep}` but it is found in its dependency list"
            );
        }
        for dep in walked {
            require_kind!(
                self,
                ErrorKind::DependencyDrift,
                stored.iter().any(|d| d == dep),
                loc,
                "{what} `{name}` depends on `{dep}` but it isn't found in its dependency list"
            );
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Symbols.

    fn visit_translation_unit(&mut self, unit: SymbolId) -> VResult {
        let tu = match self.symbol(unit) {
            Symbol::TranslationUnit(tu) => tu,
            other => {
                let loc = other.loc();
                return Err(self.fail(
                    None,
                    "verification must start at a TranslationUnit".to_string(),
                    loc,
                ));
            }
        };
        let TranslationUnit { symtab, items, loc } = tu;
        let table = self.store.table(*symtab);
        require!(
            self,
            table.parent().is_none(),
            *loc,
            "the TranslationUnit::symtab->parent must be absent"
        );
        require!(
            self,
            table.asr_owner() == Some(unit),
            *loc,
            "the TranslationUnit::symtab::asr_owner must point to itself"
        );
        self.id_symtab_map.insert(table.counter(), *symtab);
        self.current_symtab = Some(*symtab);
        self.visit_scope_symbols(*symtab)?;
        for item in items {
            match item {
                UnitItem::Stmt(stmt) => self.visit_stmt(stmt)?,
                UnitItem::Expr(expr) => self.visit_expr(expr)?,
            }
        }
        self.current_symtab = None;
        Ok(())
    }

    fn visit_symbol(&mut self, id: SymbolId) -> VResult {
        match self.symbol(id) {
            Symbol::TranslationUnit(tu) => {
                let loc = tu.loc;
                Err(self.fail(
                    None,
                    "a TranslationUnit cannot be nested inside a scope".to_string(),
                    loc,
                ))
            }
            Symbol::Program(p) => self.visit_program(id, p),
            Symbol::Module(m) => self.visit_module(id, m),
            Symbol::Function(f) => self.visit_function(id, f),
            Symbol::Variable(_) => self.visit_variable(id),
            Symbol::Struct(_) => self.visit_struct(id),
            Symbol::Enum(e) => self.visit_enum(id, e),
            Symbol::Union(u) => {
                let (symtab, loc) = (u.symtab, u.loc);
                let saved = self.current_symtab;
                self.enter_owned_table("Union", id, symtab, loc)?;
                self.current_symtab = Some(symtab);
                self.visit_scope_symbols(symtab)?;
                self.current_symtab = saved;
                Ok(())
            }
            Symbol::GenericProcedure(g) => {
                let loc = g.loc;
                require!(self, !g.name.is_empty(), loc, "GenericProcedure::name cannot be empty");
                for proc in &g.procs {
                    let target = self.store.symbol_get_past_external(*proc);
                    require!(
                        self,
                        matches!(
                            self.symbol(target),
                            Symbol::Function(_)
                                | Symbol::StructMethodDeclaration(_)
                                | Symbol::ExternalSymbol(_)
                        ),
                        loc,
                        "GenericProcedure `{}` has a constituent that is not a procedure",
                        g.name
                    );
                }
                Ok(())
            }
            Symbol::CustomOperator(c) => {
                let loc = c.loc;
                require!(self, !c.name.is_empty(), loc, "CustomOperator::name cannot be empty");
                for proc in &c.procs {
                    let target = self.store.symbol_get_past_external(*proc);
                    require!(
                        self,
                        matches!(
                            self.symbol(target),
                            Symbol::Function(_)
                                | Symbol::StructMethodDeclaration(_)
                                | Symbol::ExternalSymbol(_)
                        ),
                        loc,
                        "CustomOperator `{}` has a constituent that is not a procedure",
                        c.name
                    );
                }
                Ok(())
            }
            Symbol::StructMethodDeclaration(m) => self.visit_struct_method_declaration(id, m),
            Symbol::ExternalSymbol(e) => self.visit_external_symbol(id, e),
            Symbol::Block(b) => {
                let (symtab, loc) = (b.symtab, b.loc);
                let body = b.body.clone();
                let saved = self.current_symtab;
                self.enter_owned_table("Block", id, symtab, loc)?;
                self.current_symtab = Some(symtab);
                self.visit_scope_symbols(symtab)?;
                for stmt in &body {
                    self.visit_stmt(stmt)?;
                }
                self.current_symtab = saved;
                Ok(())
            }
            Symbol::AssociateBlock(b) => {
                let (symtab, loc) = (b.symtab, b.loc);
                let body = b.body.clone();
                let saved = self.current_symtab;
                self.enter_owned_table("AssociateBlock", id, symtab, loc)?;
                self.current_symtab = Some(symtab);
                self.visit_scope_symbols(symtab)?;
                for stmt in &body {
                    self.visit_stmt(stmt)?;
                }
                self.current_symtab = saved;
                Ok(())
            }
            Symbol::Requirement(r) => {
                let (symtab, loc) = (r.symtab, r.loc);
                let saved = self.current_symtab;
                self.enter_owned_table("Requirement", id, symtab, loc)?;
                self.current_symtab = Some(symtab);
                self.visit_scope_symbols(symtab)?;
                self.current_symtab = saved;
                Ok(())
            }
            Symbol::Template(t) => {
                let (symtab, loc) = (t.symtab, t.loc);
                let saved = self.current_symtab;
                self.enter_owned_table("Template", id, symtab, loc)?;
                self.current_symtab = Some(symtab);
                self.visit_scope_symbols(symtab)?;
                self.current_symtab = saved;
                Ok(())
            }
        }
    }

    fn visit_program(&mut self, id: SymbolId, p: &Program) -> VResult {
        let Program {
            name,
            symtab,
            body,
            dependencies,
            loc,
        } = p.clone();
        let saved_module_deps = std::mem::take(&mut self.module_dependencies);
        let saved = self.current_symtab;
        self.enter_owned_table("Program", id, symtab, loc)?;
        require!(
            self,
            self.store
                .table(symtab)
                .parent()
                .map(|t| self.store.table(t).parent().is_none())
                .unwrap_or(false),
            loc,
            "the Program::symtab's parent must be the TranslationUnit"
        );
        require!(self, !name.is_empty(), loc, "Program name is required");
        self.current_symtab = Some(symtab);
        self.visit_scope_symbols(symtab)?;
        for stmt in &body {
            self.visit_stmt(stmt)?;
        }
        self.verify_unique_dependencies(&dependencies, &name, loc)?;
        let collected = std::mem::replace(&mut self.module_dependencies, saved_module_deps);
        self.verify_module_dependency_list(&name, &dependencies, &collected, loc)?;
        self.current_symtab = saved;
        Ok(())
    }

    fn verify_module_dependency_list(
        &mut self,
        name: &str,
        stored: &[String],
        collected: &[String],
        loc: Location,
    ) -> VResult {
        for dep in stored {
            require!(self, !dep.is_empty(), loc, "a module dependency must not be empty");
            require!(
                self,
                valid_name(dep),
                loc,
                "a module dependency must be a valid name, found `{dep}`"
            );
        }
        let collected: Vec<&String> = collected.iter().filter(|d| d.as_str() != name).collect();
        for dep in &collected {
            require_kind!(
                self,
                ErrorKind::DependencyDrift,
                stored.iter().any(|d| &d == dep),
                loc,
                "`{name}` dependencies must contain `{dep}` because a symbol of that module is \
                 referenced in `{name}`"
            );
        }
        for dep in stored {
            require_kind!(
                self,
                ErrorKind::DependencyDrift,
                collected.iter().any(|d| *d == dep),
                loc,
                "`{name}` does not reference module `{dep}` but it is present in its dependency \
                 list"
            );
        }
        Ok(())
    }

    fn visit_module(&mut self, id: SymbolId, m: &Module) -> VResult {
        let Module {
            name,
            symtab,
            dependencies,
            loc,
            ..
        } = m.clone();
        let saved_module_deps = std::mem::take(&mut self.module_dependencies);
        let saved = self.current_symtab;
        self.enter_owned_table("Module", id, symtab, loc)?;
        require!(
            self,
            self.store
                .table(symtab)
                .parent()
                .map(|t| self.store.table(t).parent().is_none())
                .unwrap_or(false),
            loc,
            "the Module::symtab's parent must be the TranslationUnit"
        );
        require!(self, !name.is_empty(), loc, "Module name is required");
        self.current_symtab = Some(symtab);
        self.visit_scope_symbols(symtab)?;
        self.verify_unique_dependencies(&dependencies, &name, loc)?;
        let collected = std::mem::replace(&mut self.module_dependencies, saved_module_deps);
        self.verify_module_dependency_list(&name, &dependencies, &collected, loc)?;
        self.current_symtab = saved;
        Ok(())
    }

    fn visit_function(&mut self, id: SymbolId, f: &Function) -> VResult {
        let Function {
            name,
            symtab,
            args,
            body,
            return_var,
            signature,
            dependencies,
            loc,
            ..
        } = f.clone();
        let saved_function_deps = std::mem::take(&mut self.function_dependencies);
        let saved = self.current_symtab;
        self.enter_owned_table("Function", id, symtab, loc)?;
        require!(self, !name.is_empty(), loc, "Function name is required");
        let signature_type = match &signature {
            Ttype::FunctionType(t) => t,
            _ => {
                return Err(self.fail(
                    None,
                    format!("a function signature is required for `{name}`"),
                    loc,
                ))
            }
        };
        require_kind!(
            self,
            ErrorKind::ArityMismatch,
            signature_type.arg_types.len() == args.len(),
            loc,
            "number of argument types in the signature of `{name}` must equal the number of \
             arguments"
        );
        self.current_symtab = Some(symtab);
        self.visit_scope_symbols(symtab)?;
        // Struct-typed locals whose declaration lives outside the function
        // are dependencies of the function.
        let local_ids: Vec<SymbolId> =
            self.store.table(symtab).scope().values().copied().collect();
        for local in local_ids {
            if let Symbol::Variable(v) = self.symbol(local) {
                if let Some(type_decl) = v.type_declaration {
                    let is_struct = matches!(
                        self.symbol(self.store.symbol_get_past_external(type_decl)),
                        Symbol::Struct(_)
                    );
                    if is_struct && self.store.parent_symtab(type_decl) != Some(symtab) {
                        self.function_dependencies
                            .push(self.store.symbol_name(type_decl).to_string());
                    }
                }
            }
        }
        self.visit_ttype(&signature, loc)?;
        for arg in &args {
            self.visit_expr(arg)?;
        }
        for stmt in &body {
            self.visit_stmt(stmt)?;
        }
        if let Some(ret) = &return_var {
            self.visit_expr(ret)?;
        }
        self.verify_unique_dependencies(&dependencies, &name, loc)?;
        // Dependencies of the function must resolve from the function's
        // parent table, not its own. A type-bound procedure dependency is
        // carried under the method's name and resolves through the handle
        // the call site left in the function's own table.
        let parent_table = self.store.table(symtab).parent();
        for dep in &dependencies {
            let resolved = parent_table
                .and_then(|t| self.store.resolve_symbol(t, dep))
                .is_some()
                || self.method_handle_for(symtab, dep).is_some();
            require_kind!(
                self,
                ErrorKind::DependencyDrift,
                resolved,
                loc,
                "dependency `{dep}` of function `{name}` does not resolve in the parent scope"
            );
        }
        let walked = std::mem::replace(&mut self.function_dependencies, saved_function_deps);
        self.verify_dependency_equality("function", &name, &dependencies, &walked, loc)?;
        self.current_symtab = saved;
        Ok(())
    }

    fn visit_variable(&mut self, id: SymbolId) -> VResult {
        let v = match self.symbol(id) {
            Symbol::Variable(v) => v.clone(),
            _ => unreachable!(),
        };
        let loc = v.loc;
        let current_name_copy = std::mem::replace(&mut self.current_name, v.name.clone());
        self.variable_dependencies.clear();
        let symtab = v.parent_symtab;
        let bound = self.store.get_symbol(symtab, &v.name);
        require!(
            self,
            bound.is_some(),
            loc,
            "Variable `{}` not found in its parent symbol table",
            v.name
        );
        require!(
            self,
            bound == Some(id),
            loc,
            "Variable `{}`'s parent symbol table does not point to it",
            v.name
        );
        require!(
            self,
            self.current_symtab == Some(symtab),
            loc,
            "Variable `{}`'s recorded parent table and the actual parent table don't match",
            v.name
        );
        require!(
            self,
            self.id_symtab_map
                .contains_key(&self.store.table(symtab).counter()),
            loc,
            "Variable::parent_symtab of `{}` must be present in the ASR",
            v.name
        );

        // Initializers of body-scope variables must reduce to compile time
        // constants; module, struct and unit scope initializers are
        // finalised later by constant evaluation.
        let owner_kind = self.store.table(symtab).asr_owner().map(|o| self.symbol(o));
        let in_body_scope = matches!(
            owner_kind,
            Some(Symbol::Function(_)) | Some(Symbol::Program(_)) | Some(Symbol::Block(_))
                | Some(Symbol::AssociateBlock(_))
        );
        if in_body_scope {
            if let (Some(symbolic), None) = (&v.symbolic_value, &v.value) {
                require!(
                    self,
                    is_value_constant(symbolic),
                    loc,
                    "initialisation of `{}` must reduce to a compile time constant",
                    v.name
                );
            }
        }

        if v.ty.is_character() {
            self.verify_string_variable(&v, loc)?;
        }
        if matches!(v.ty.extract_type(), Ttype::StructType { .. }) {
            require!(
                self,
                v.type_declaration.is_some(),
                loc,
                "Variable `{}` of struct type must have a type declaration",
                v.name
            );
        }
        if let Some(symbolic) = &v.symbolic_value {
            self.visit_expr(symbolic)?;
        }
        if let Some(value) = &v.value {
            self.visit_expr(value)?;
        }
        self.visit_ttype(&v.ty, loc)?;

        self.verify_unique_dependencies(&v.dependencies, &v.name, loc)?;
        let walked = std::mem::take(&mut self.variable_dependencies);
        self.verify_dependency_equality("variable", &v.name, &v.dependencies, &walked, loc)?;
        self.current_name = current_name_copy;
        Ok(())
    }

    fn verify_string_variable(&mut self, v: &crate::asr::Variable, loc: Location) -> VResult {
        let str_ty = v.ty.string_type().unwrap().clone();
        require_kind!(
            self,
            ErrorKind::TypeShape,
            str_ty.len_kind != LengthKind::ImplicitLength,
            loc,
            "variable `{}` of string type cannot have a length of kind ImplicitLength",
            v.name
        );
        if str_ty.len_kind == LengthKind::DeferredLength {
            require_kind!(
                self,
                ErrorKind::TypeShape,
                v.ty.is_allocatable() || v.ty.is_pointer(),
                loc,
                "variable `{}` of string type with DeferredLength must be allocatable or pointer",
                v.name
            );
        }
        if str_ty.physical == StringPhysical::CChar {
            require_kind!(
                self,
                ErrorKind::TypeShape,
                v.intent != Intent::Local,
                loc,
                "the CChar string physical type cannot be used with local variables"
            );
            if !v.ty.is_array() {
                require_kind!(
                    self,
                    ErrorKind::TypeShape,
                    str_ty.len_kind == LengthKind::ExpressionLength,
                    loc,
                    "a C-bound character variable that isn't local must have length kind \
                     ExpressionLength"
                );
                let len = str_ty.len.as_ref().and_then(extract_integer_value);
                require_kind!(
                    self,
                    ErrorKind::TypeShape,
                    len == Some(1),
                    loc,
                    "a C-bound character variable that isn't local must have length 1"
                );
            }
        }
        Ok(())
    }

    fn visit_struct(&mut self, id: SymbolId) -> VResult {
        let s = match self.symbol(id) {
            Symbol::Struct(s) => s.clone(),
            _ => unreachable!(),
        };
        let loc = s.loc;
        let saved = self.current_symtab;
        self.enter_owned_table("Struct", id, s.symtab, loc)?;
        require!(self, !s.name.is_empty(), loc, "Struct name is required");
        self.current_symtab = Some(s.symtab);

        let member_ids: Vec<SymbolId> =
            self.store.table(s.symtab).scope().values().copied().collect();
        let mut struct_dependencies: Vec<String> = Vec::new();
        for member in member_ids {
            self.visit_symbol(member)?;
            let member_sym = self.symbol(member);
            let var = match member_sym {
                Symbol::Variable(var) => var,
                // Methods, nested types and aggregates contribute nothing to
                // the dependency set.
                _ => continue,
            };
            if let Some(type_decl) = var.type_declaration {
                let dep = self.store.symbol_name(type_decl).to_string();
                // A recursive struct is not its own dependency.
                if dep != s.name {
                    struct_dependencies.push(dep);
                }
            }
            match var.ty.type_get_past_pointer() {
                Ttype::EnumType { decl } | Ttype::UnionType { decl } => {
                    if self.store.parent_symtab(*decl) != Some(s.symtab) {
                        struct_dependencies.push(self.store.symbol_name(*decl).to_string());
                    }
                }
                _ => {}
            }
        }
        struct_dependencies.dedup();
        self.verify_unique_dependencies(&s.dependencies, &s.name, loc)?;
        self.verify_dependency_equality(
            "struct",
            &s.name,
            &s.dependencies,
            &struct_dependencies,
            loc,
        )?;

        if let Some(alignment) = &s.alignment {
            let value = extract_integer_value(alignment);
            require!(
                self,
                value.is_some(),
                loc,
                "alignment of `{}` must evaluate to a constant expression",
                s.name
            );
            let value = value.unwrap();
            require!(
                self,
                value > 0 && (value & (value - 1)) == 0,
                loc,
                "alignment {value} of `{}` is not a positive power of 2",
                s.name
            );
        }
        self.current_symtab = saved;
        Ok(())
    }

    fn visit_enum(&mut self, id: SymbolId, e: &Enum) -> VResult {
        let Enum {
            name,
            symtab,
            ty,
            members,
            value_type,
            loc,
        } = e.clone();
        let saved = self.current_symtab;
        self.enter_owned_table("Enum", id, symtab, loc)?;
        self.current_symtab = Some(symtab);
        self.visit_scope_symbols(symtab)?;

        let mut value2count: HashMap<i64, usize> = HashMap::new();
        let member_ids: Vec<SymbolId> =
            self.store.table(symtab).scope().values().copied().collect();
        for member in member_ids {
            let var = match self.symbol(member) {
                Symbol::Variable(var) => var,
                other => {
                    let mloc = other.loc();
                    return Err(self.fail(
                        None,
                        format!("all members of Enum `{name}` must be Variables"),
                        mloc,
                    ));
                }
            };
            require!(
                self,
                var.symbolic_value.is_some(),
                loc,
                "all members of Enum `{name}` must have their values set; `{}` does not",
                var.name
            );
            require!(
                self,
                crate::types::check_equal_type(&var.ty, &ty),
                loc,
                "all members of Enum `{name}` must have the common type; `{}` does not",
                var.name
            );
            let value = var
                .value
                .as_ref()
                .or(var.symbolic_value.as_ref())
                .and_then(extract_integer_value)
                .unwrap_or(-1);
            *value2count.entry(value).or_insert(0) += 1;
        }

        let is_enum_integer = ty.is_integer();
        let classification_ok = match value_type {
            EnumValueType::IntegerConsecutiveFromZero => {
                is_enum_integer
                    && value2count.len() == members.len()
                    && (members.is_empty()
                        || (value2count.contains_key(&0)
                            && (0..members.len() as i64)
                                .all(|v| value2count.contains_key(&v))))
            }
            EnumValueType::IntegerNotUnique => {
                is_enum_integer && value2count.len() != members.len()
            }
            EnumValueType::IntegerUnique => is_enum_integer && value2count.len() == members.len(),
            EnumValueType::NonInteger => !is_enum_integer,
        };
        require!(
            self,
            classification_ok,
            loc,
            "the member values of Enum `{name}` do not correspond to its value classification"
        );
        self.current_symtab = saved;
        Ok(())
    }

    fn visit_struct_method_declaration(
        &mut self,
        id: SymbolId,
        m: &StructMethodDeclaration,
    ) -> VResult {
        let m = m.clone();
        let loc = m.loc;
        require!(self, !m.name.is_empty(), loc, "StructMethodDeclaration::name cannot be empty");
        require!(
            self,
            !m.proc_name.is_empty(),
            loc,
            "StructMethodDeclaration::proc_name cannot be empty"
        );
        let bound = self.store.get_symbol(m.parent_symtab, &m.name);
        require!(
            self,
            bound == Some(id),
            loc,
            "StructMethodDeclaration `{}`'s parent symbol table does not point to it",
            m.name
        );
        require!(
            self,
            self.id_symtab_map
                .contains_key(&self.store.table(m.parent_symtab).counter()),
            loc,
            "StructMethodDeclaration::parent_symtab must be present in the ASR ({})",
            m.name
        );
        if let Some(self_argument) = &m.self_argument {
            let proc = self.store.symbol_get_past_external(m.proc);
            if let Symbol::Function(f) = self.symbol(proc) {
                let arg_found = f.args.iter().any(|arg| match arg.expression() {
                    Expr::Var(Var { sym }) => self.store.symbol_name(*sym) == self_argument,
                    _ => false,
                });
                require!(
                    self,
                    arg_found,
                    loc,
                    "`{self_argument}` must be present among the formals of `{}`",
                    m.name
                );
            }
        }
        Ok(())
    }

    fn visit_external_symbol(&mut self, _id: SymbolId, e: &ExternalSymbol) -> VResult {
        if !self.check_external {
            return Ok(());
        }
        let e = e.clone();
        let loc = e.loc;
        require!(
            self,
            e.external.is_some(),
            loc,
            "ExternalSymbol::external of `{}` cannot be absent",
            e.name
        );
        let external = e.external.unwrap();
        require!(
            self,
            !matches!(self.symbol(external), Symbol::ExternalSymbol(_)),
            loc,
            "ExternalSymbol::external of `{}` cannot be an ExternalSymbol",
            e.name
        );
        let orig_name = self.store.symbol_name(external);
        require!(
            self,
            e.original_name == orig_name,
            loc,
            "ExternalSymbol::original_name `{}` must match the external's name `{orig_name}`",
            e.original_name
        );
        let owner = self.store.asr_owner_of(external);
        require!(
            self,
            owner.is_some(),
            loc,
            "ExternalSymbol::external of `{}` has no owning node",
            e.name
        );
        let owner = owner.unwrap();
        let owner_sym = self.symbol(owner);
        require!(
            self,
            matches!(
                owner_sym,
                Symbol::Module(_)
                    | Symbol::Struct(_)
                    | Symbol::Enum(_)
                    | Symbol::Union(_)
                    | Symbol::Function(_)
            ),
            loc,
            "ExternalSymbol::external of `{}` is not owned by a module, struct, enum, union or \
             function",
            e.name
        );
        let owner_name = owner_sym.name();
        require!(
            self,
            e.module_name == owner_name,
            loc,
            "ExternalSymbol::module_name `{}` must match the external's owner name `{owner_name}`",
            e.module_name
        );
        let owner_table = owner_sym.own_symtab().unwrap();
        let found = if matches!(owner_sym, Symbol::Module(_)) {
            self.store
                .find_scoped_symbol(owner_table, &e.original_name, &e.scope_names)
        } else {
            self.store.resolve_symbol(owner_table, &e.original_name)
        };
        require!(
            self,
            found.is_some(),
            loc,
            "ExternalSymbol::original_name `{}` + scope names not found in `{owner_name}`",
            e.original_name
        );
        require!(
            self,
            found == Some(external),
            loc,
            "ExternalSymbol `{}` found by scoped lookup but not equal to its external target",
            e.name
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Statements and expressions.

    fn visit_stmt(&mut self, stmt: &Stmt) -> VResult {
        match stmt {
            Stmt::Assignment(assignment) => self.visit_assignment(assignment),
            Stmt::SubroutineCall(call) => {
                self.visit_call_common(call.name, &call.args, call.loc, false)
            }
            Stmt::Select(select) => self.visit_select(select),
            Stmt::BlockCall(call) => {
                let loc = call.loc;
                require!(
                    self,
                    matches!(self.symbol(call.block), Symbol::Block(_)),
                    loc,
                    "BlockCall must be made to a Block"
                );
                self.symtab_in_scope(self.current_symtab.unwrap(), call.block, loc)
            }
            Stmt::AssociateBlockCall(call) => {
                let loc = call.loc;
                require!(
                    self,
                    matches!(self.symbol(call.block), Symbol::AssociateBlock(_)),
                    loc,
                    "AssociateBlockCall must be made to an AssociateBlock"
                );
                self.symtab_in_scope(self.current_symtab.unwrap(), call.block, loc)
            }
            Stmt::Return(_) => Ok(()),
            Stmt::ExprStmt(expr) => self.visit_expr(expr),
        }
    }

    fn visit_assignment(&mut self, assignment: &Assignment) -> VResult {
        let loc = assignment.loc;
        if let Expr::Var(Var { sym }) = assignment.target.expression() {
            let target = self.store.symbol_get_past_external(*sym);
            if let Symbol::Variable(var) = self.symbol(target) {
                require_kind!(
                    self,
                    ErrorKind::IntentViolation,
                    var.intent != Intent::In,
                    loc,
                    "assignment target `{}` with intent `in` is not allowed",
                    var.name
                );
                if var.storage == Storage::Parameter {
                    let key = (
                        self.store
                            .table(self.current_symtab.unwrap())
                            .counter(),
                        var.name.clone(),
                    );
                    require_kind!(
                        self,
                        ErrorKind::IntentViolation,
                        !self.const_assigned.contains(&key),
                        loc,
                        "assignment target `{}` is a parameter constant and cannot be re-assigned",
                        var.name
                    );
                    self.const_assigned.insert(key);
                }
            }
        }
        if self.check_external && assignment.realloc_lhs {
            require_kind!(
                self,
                ErrorKind::TypeShape,
                assignment.target.get_type().is_allocatable(),
                loc,
                "reallocation of a non-allocatable target is not allowed"
            );
        }
        self.visit_expr(&assignment.target)?;
        self.visit_expr(&assignment.value)
    }

    fn visit_select(&mut self, select: &Select) -> VResult {
        let loc = select.loc;
        let fall_through = select.cases.iter().any(|case| case.fall_through);
        require!(
            self,
            fall_through == select.enable_fall_through,
            loc,
            "Select::enable_fall_through should be {fall_through}"
        );
        self.visit_expr(&select.test)?;
        for case in &select.cases {
            for value in &case.values {
                self.visit_expr(value)?;
            }
            for stmt in &case.body {
                self.visit_stmt(stmt)?;
            }
        }
        for stmt in &select.default {
            self.visit_stmt(stmt)?;
        }
        Ok(())
    }

    // Shared checks of SubroutineCall and FunctionCall. Records the call in
    // the dependency trackers.
    fn visit_call_common(
        &mut self,
        name: SymbolId,
        args: &[CallArg],
        loc: Location,
        is_function: bool,
    ) -> VResult {
        self.symtab_in_scope(self.current_symtab.unwrap(), name, loc)?;
        let callee_name = self.store.symbol_name(name).to_string();
        if is_function {
            self.variable_dependencies.push(callee_name.clone());
        }
        let target = self.store.symbol_get_past_external(name);
        if self.check_external {
            let target_sym = self.symbol(target);
            let ok = match target_sym {
                Symbol::Function(_) | Symbol::StructMethodDeclaration(_) => true,
                Symbol::Variable(v) => {
                    matches!(v.ty, Ttype::FunctionType(_)) && v.type_declaration.is_some()
                }
                _ => false,
            };
            require!(
                self,
                ok,
                loc,
                "call target `{callee_name}` must be a Function, a Variable of function type, or \
                 a StructMethodDeclaration"
            );
        }

        // Record the call as a function dependency when it crosses the
        // current scope. A target bound in the current table or any of its
        // ancestors up to and including the enclosing Function's table is
        // local, however deeply the Block and AssociateBlock scopes nest.
        // A type-bound procedure target always counts, under the method's
        // own name.
        let current = self.current_symtab.unwrap();
        let owner = self.store.table(current).asr_owner().map(|o| self.symbol(o));
        let is_external = matches!(self.symbol(name), Symbol::ExternalSymbol(_));
        let is_variable = matches!(self.symbol(name), Symbol::Variable(_));
        if matches!(self.symbol(target), Symbol::StructMethodDeclaration(_)) {
            self.function_dependencies
                .push(self.store.symbol_name(target).to_string());
        } else if owner.is_some() && !is_external && !is_variable {
            let mut local_counters = vec![self.store.table(current).counter()];
            let mut scope = current;
            loop {
                let scope_owner = self
                    .store
                    .table(scope)
                    .asr_owner()
                    .map(|o| self.symbol(o));
                if !matches!(
                    scope_owner,
                    Some(Symbol::Block(_)) | Some(Symbol::AssociateBlock(_))
                ) {
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
                self.function_dependencies.push(callee_name.clone());
            }
        }
        self.record_external_reference(name);

        // Required arguments may not be missing unless the corresponding
        // formal is optional.
        if let Symbol::Function(func) = self.symbol(target) {
            require_kind!(
                self,
                ErrorKind::ArityMismatch,
                args.len() == func.args.len(),
                loc,
                "call to `{callee_name}` passes {} arguments but {} are declared",
                args.len(),
                func.args.len()
            );
            if is_function {
                require!(
                    self,
                    func.return_var.is_some(),
                    loc,
                    "FunctionCall target `{callee_name}` must return a value"
                );
            }
            for (i, arg) in args.iter().enumerate() {
                if arg.value.is_none() {
                    let formal_optional = match func.args[i].expression() {
                        Expr::Var(Var { sym }) => match self.symbol(*sym) {
                            Symbol::Variable(v) => v.presence == crate::asr::Presence::Optional,
                            _ => false,
                        },
                        _ => false,
                    };
                    require!(
                        self,
                        formal_optional,
                        loc,
                        "required argument {} of `{callee_name}` cannot be missing",
                        i + 1
                    );
                }
            }
        }
        for arg in args {
            if let Some(value) = &arg.value {
                self.visit_expr(value)?;
            }
        }
        Ok(())
    }

    // References through an ExternalSymbol make the origin module a
    // dependency of the enclosing module.
    fn record_external_reference(&mut self, name: SymbolId) {
        if let Symbol::ExternalSymbol(ext) = self.symbol(name) {
            if let Some(external) = ext.external {
                if self
                    .store
                    .asr_owner_of(external)
                    .map(|o| matches!(self.symbol(o), Symbol::Module(_)))
                    .unwrap_or(false)
                {
                    self.module_dependencies.push(ext.module_name.clone());
                }
            } else if !self.check_external {
                self.module_dependencies.push(ext.module_name.clone());
            }
        }
    }

    fn visit_expr(&mut self, expr: &TExpr) -> VResult {
        let loc = expr.loc();
        match expr.expression() {
            Expr::Var(Var { sym }) => {
                let name = self.store.symbol_name(*sym).to_string();
                let target = if self.check_external {
                    self.store.symbol_get_past_external(*sym)
                } else {
                    *sym
                };
                require!(
                    self,
                    matches!(
                        self.symbol(target),
                        Symbol::Variable(_)
                            | Symbol::Function(_)
                            | Symbol::Enum(_)
                            | Symbol::ExternalSymbol(_)
                    ),
                    loc,
                    "Var `{name}` does not point to a Variable, Function or Enum (possibly \
                     behind an ExternalSymbol)"
                );
                self.symtab_in_scope(self.current_symtab.unwrap(), *sym, loc)?;
                if name != self.current_name {
                    self.variable_dependencies.push(name);
                }
                self.record_external_reference(*sym);
                Ok(())
            }
            Expr::FunctionCall(call) => {
                self.visit_call_common(call.name, &call.args, loc, true)?;
                self.visit_ttype(expr.get_type(), loc)
            }
            Expr::IntegerConstant(_)
            | Expr::RealConstant(_)
            | Expr::LogicalConstant(_)
            | Expr::StringConstant(_) => Ok(()),
            Expr::BinaryOp(b) => {
                self.visit_expr(&b.left)?;
                self.visit_expr(&b.right)
            }
            Expr::Cast(c) => {
                self.visit_expr(&c.arg)?;
                self.visit_ttype(expr.get_type(), loc)
            }
            Expr::StringPhysicalCast(c) => {
                let str_ty = match expr.get_type() {
                    Ttype::String(s) => s,
                    _ => {
                        return Err(self.fail(
                            Some(ErrorKind::TypeShape),
                            "StringPhysicalCast must be of string type".to_string(),
                            loc,
                        ))
                    }
                };
                require_kind!(
                    self,
                    ErrorKind::TypeShape,
                    str_ty.len.is_none(),
                    loc,
                    "the StringPhysicalCast return type must not carry a length"
                );
                require_kind!(
                    self,
                    ErrorKind::TypeShape,
                    str_ty.len_kind == LengthKind::ImplicitLength,
                    loc,
                    "a StringPhysicalCast expression must have length kind ImplicitLength"
                );
                let saved = std::mem::replace(&mut self.in_string_physical_cast, true);
                let result = self.visit_ttype(expr.get_type(), loc);
                self.in_string_physical_cast = saved;
                result?;
                self.visit_expr(&c.arg)
            }
        }
    }

    // ------------------------------------------------------------------
    // Types.

    fn visit_ttype(&mut self, ty: &Ttype, loc: Location) -> VResult {
        match ty {
            Ttype::Integer { .. }
            | Ttype::Real { .. }
            | Ttype::Complex { .. }
            | Ttype::Logical { .. }
            | Ttype::TypeParameter { .. }
            | Ttype::EnumType { .. }
            | Ttype::UnionType { .. } => Ok(()),
            Ttype::StructType { decl, is_c_struct } => {
                require_kind!(
                    self,
                    ErrorKind::TypeShape,
                    decl.is_some(),
                    loc,
                    "a StructType must refer to its Struct declaration"
                );
                let target = self.store.symbol_get_past_external(decl.unwrap());
                if let Symbol::Struct(s) = self.symbol(target) {
                    require_kind!(
                        self,
                        ErrorKind::TypeShape,
                        *is_c_struct == s.is_c_interop,
                        loc,
                        "the C-interop flag of a StructType must match the struct declaration \
                         `{}`",
                        s.name
                    );
                }
                Ok(())
            }
            Ttype::String(s) => {
                if let Some(len) = &s.len {
                    require_kind!(
                        self,
                        ErrorKind::TypeShape,
                        len.get_type().is_integer(),
                        loc,
                        "a string length must be of integer type"
                    );
                    if let Some(value) = extract_integer_value(len) {
                        require_kind!(
                            self,
                            ErrorKind::TypeShape,
                            value >= 0,
                            loc,
                            "a string length must be non-negative, found {value}"
                        );
                    }
                    require_kind!(
                        self,
                        ErrorKind::TypeShape,
                        s.len_kind == LengthKind::ExpressionLength,
                        loc,
                        "a string with an explicit length must have length kind ExpressionLength"
                    );
                    self.visit_expr(len)?;
                } else {
                    require_kind!(
                        self,
                        ErrorKind::TypeShape,
                        matches!(
                            s.len_kind,
                            LengthKind::AssumedLength
                                | LengthKind::DeferredLength
                                | LengthKind::ImplicitLength
                        ),
                        loc,
                        "a string without a length must have an assumed, deferred or implicit \
                         length kind"
                    );
                }
                if s.len_kind == LengthKind::ImplicitLength {
                    require_kind!(
                        self,
                        ErrorKind::TypeShape,
                        self.in_string_physical_cast,
                        loc,
                        "an implicit length kind may appear only in a string physical cast \
                         expression"
                    );
                }
                Ok(())
            }
            Ttype::Array(a) => {
                require_kind!(
                    self,
                    ErrorKind::TypeShape,
                    !a.dims.is_empty(),
                    loc,
                    "an array type cannot have 0 dimensions"
                );
                require_kind!(
                    self,
                    ErrorKind::TypeShape,
                    !matches!(a.elem, Ttype::Array(_)),
                    loc,
                    "an array type cannot be nested"
                );
                require_kind!(
                    self,
                    ErrorKind::TypeShape,
                    !matches!(a.elem, Ttype::Allocatable(_)),
                    loc,
                    "an allocatable cannot be inside an array"
                );
                if a.elem.is_character() {
                    require_kind!(
                        self,
                        ErrorKind::TypeShape,
                        a.physical != crate::types::ArrayPhysical::FixedSize,
                        loc,
                        "the physical type of an array of strings cannot be FixedSize"
                    );
                }
                if a.physical == crate::types::ArrayPhysical::Simd {
                    require_kind!(
                        self,
                        ErrorKind::TypeShape,
                        a.dims.iter().all(|d| d.length.is_some()),
                        loc,
                        "an array with the SIMD physical type must have a fixed shape"
                    );
                }
                for dim in &a.dims {
                    if let Some(start) = &dim.start {
                        require_kind!(
                            self,
                            ErrorKind::TypeShape,
                            !self.check_external || start.get_type().is_integer(),
                            loc,
                            "a dimension start must be an integer"
                        );
                        self.visit_expr(start)?;
                    }
                    if let Some(length) = &dim.length {
                        require_kind!(
                            self,
                            ErrorKind::TypeShape,
                            !self.check_external || length.get_type().is_integer(),
                            loc,
                            "a dimension length must be an integer"
                        );
                        self.visit_expr(length)?;
                    }
                }
                self.visit_ttype(&a.elem, loc)
            }
            Ttype::Pointer(inner) => {
                require_kind!(
                    self,
                    ErrorKind::TypeShape,
                    !matches!(**inner, Ttype::Allocatable(_)),
                    loc,
                    "a pointer type conflicts with an allocatable type"
                );
                if let Ttype::Array(a) = &**inner {
                    for dim in &a.dims {
                        require_kind!(
                            self,
                            ErrorKind::TypeShape,
                            dim.is_deferred(),
                            loc,
                            "an array type inside a pointer must have deferred shape"
                        );
                    }
                }
                self.visit_ttype(inner, loc)
            }
            Ttype::Allocatable(inner) => {
                require_kind!(
                    self,
                    ErrorKind::TypeShape,
                    !matches!(**inner, Ttype::Pointer(_) | Ttype::Allocatable(_)),
                    loc,
                    "an allocatable type conflicts with a pointer or allocatable type"
                );
                if let Ttype::Array(a) = &**inner {
                    for dim in &a.dims {
                        require_kind!(
                            self,
                            ErrorKind::TypeShape,
                            dim.length.is_none(),
                            loc,
                            "the length of an allocatable dimension must be deferred (absent)"
                        );
                    }
                }
                self.visit_ttype(inner, loc)
            }
            Ttype::FunctionType(f) => {
                for arg in &f.arg_types {
                    self.visit_ttype(arg, loc)?;
                }
                if let Some(ret) = &f.return_type {
                    self.visit_ttype(ret, loc)?;
                }
                Ok(())
            }
        }
    }
}

/// Verify a translation unit. Returns `true` when every invariant holds; on
/// the first violation an Error diagnostic is recorded and `false` is
/// returned.
pub fn verify(
    store: &SymbolStore,
    unit: SymbolId,
    check_external: bool,
    diagnostics: &mut Diagnostics,
) -> bool {
    debug!(check_external, "verifying translation unit");
    let mut visitor = VerifyVisitor::new(store, check_external, diagnostics);
    match visitor.visit_translation_unit(unit) {
        Ok(()) => true,
        Err(VerifyAbort) => {
            debug_assert!(visitor.diagnostics.has_error());
            false
        }
    }
}
