// Copyright contributors to the frt compiler project
// SPDX-License-Identifier: Apache-2.0

// The declaration-phase visitor: walks the syntactic tree and builds
// symbol tables and symbols in dependency order. Within a scope the work
// splits into a structural phase (use directives, declarations, interface
// blocks, derived types, procedure headers) and a body phase (initializer,
// bound and length expressions, procedure bodies), with generic and
// operator aggregates assembled at scope finalisation.

use indexmap::IndexMap;
use tracing::debug;

use frt_asr::asr::{
    Function, Module, Presence, Program, Symbol, TranslationUnit, Var, Variable,
};
use frt_asr::diagnostics::{Diagnostics, ErrorKind};
use frt_asr::location::Location;
use frt_asr::symbols::{canonical_name, SymbolId, SymbolStore, SymtabId};
use frt_asr::types::{
    check_equal_type, Abi, ArrayPhysical, Deftype, FunctionType, Ttype,
};
use frt_syntax::ast;

use crate::body::{self, lower_stmts};
use crate::classes;
use crate::config::ResolverConfig;
use crate::context::{dedup_preserving_order, with_scope, Context, SResult, SemanticAbort};
use crate::decls;
use crate::implicit::ImplicitDictionary;
use crate::loader::ModuleLoader;
use crate::templates;
use crate::uses;

/// What the resolver hands to later passes.
pub struct Resolution {
    /// The TranslationUnit symbol in the store.
    pub unit: SymbolId,
    /// For procedures with entry statements: the positions of each entry
    /// point's formals within the master's formal list.
    pub entry_argument_map: IndexMap<String, Vec<usize>>,
}

/// Resolve a whole translation unit. Top-level items are visited in source
/// order; under continue-on-error a failing item is dropped and resolution
/// continues with the next one.
pub fn resolve_translation_unit(
    unit: &ast::TranslationUnit,
    store: &mut SymbolStore,
    diagnostics: &mut Diagnostics,
    config: ResolverConfig,
    loader: &mut dyn ModuleLoader,
) -> Result<Resolution, SemanticAbort> {
    let root = store.new_symtab(None);
    let tu = store.alloc_symbol(Symbol::TranslationUnit(TranslationUnit {
        symtab: root,
        items: Vec::new(),
        loc: Location::default(),
    }));
    store.set_owner(root, tu);
    let continue_on_error = config.continue_on_error;
    let mut ctx = Context::new(store, diagnostics, config, tu, root);
    for item in &unit.items {
        let result = match item {
            ast::Item::Module(m) => module_to_asr(&mut ctx, loader, m).map(|_| ()),
            ast::Item::Submodule(s) => submodule_to_asr(&mut ctx, loader, s).map(|_| ()),
            ast::Item::Program(p) => program_to_asr(&mut ctx, loader, p).map(|_| ()),
            ast::Item::Procedure(p) => {
                let mut pending = Vec::new();
                let result =
                    procedure_to_asr(&mut ctx, loader, p, Deftype::Implementation, &mut pending)
                        .map(|_| ());
                match result {
                    Ok(()) => lower_pending_bodies(&mut ctx, pending),
                    err => err,
                }
            }
        };
        if let Err(abort) = result {
            if !continue_on_error {
                return Err(abort);
            }
        }
    }
    Ok(Resolution {
        unit: tu,
        entry_argument_map: ctx.entry_argument_map.clone(),
    })
}

// ------------------------------------------------------------------
// Units.

pub(crate) fn module_to_asr(
    ctx: &mut Context,
    loader: &mut dyn ModuleLoader,
    m: &ast::Module,
) -> SResult<SymbolId> {
    module_like_to_asr(ctx, loader, &m.name, None, &m.decls, &m.contains, m.loc)
}

pub(crate) fn submodule_to_asr(
    ctx: &mut Context,
    loader: &mut dyn ModuleLoader,
    s: &ast::Submodule,
) -> SResult<SymbolId> {
    let parent_name = canonical_name(&s.parent);
    let parent_sym = match ctx.store.get_symbol(ctx.root_scope, &parent_name) {
        Some(sym) => sym,
        None => loader
            .load_module(ctx, &parent_name, s.loc)
            .map_err(|e| ctx.error(ErrorKind::UnresolvedSymbol, e.to_string(), s.loc))?,
    };
    let id = module_like_to_asr(
        ctx,
        loader,
        &s.name,
        Some(&parent_name),
        &s.decls,
        &s.contains,
        s.loc,
    )?;
    if let Symbol::Module(parent) = ctx.store.symbol_mut(parent_sym) {
        parent.has_submodules = true;
    }
    match_forward_declarations(ctx, parent_sym, id, s.loc)?;
    Ok(id)
}

fn module_like_to_asr(
    ctx: &mut Context,
    loader: &mut dyn ModuleLoader,
    name: &str,
    parent_module: Option<&str>,
    decls: &[ast::UnitDecl],
    contains: &[ast::Procedure],
    loc: Location,
) -> SResult<SymbolId> {
    let name = canonical_name(name);
    debug!(module = %name, "resolving module");
    // Loading is idempotent: a module already in the unit is reused.
    if let Some(existing) = ctx.store.get_symbol(ctx.root_scope, &name) {
        return Ok(existing);
    }
    let saved_module_deps = std::mem::take(&mut ctx.current_module_dependencies);
    let saved_function_deps = std::mem::take(&mut ctx.current_function_dependencies);
    let saved_accumulators = std::mem::take(&mut ctx.accumulators);
    ctx.implicit_stack.push(default_dictionary(&ctx.config));

    let symtab = ctx.store.new_symtab(Some(ctx.root_scope));
    let inner = with_scope(ctx, symtab, |ctx| {
        if let Some(parent_name) = parent_module {
            // The parent module's scope acts as a virtual parent: every
            // public symbol becomes visible here.
            let parent_sym = ctx
                .store
                .get_symbol(ctx.root_scope, parent_name)
                .expect("parent module is resolved before its submodules");
            uses::import_all_public(ctx, parent_sym, parent_name, loc)?;
        }
        let leftover = process_unit_decls(ctx, loader, decls)?;
        retry_deferred_decls(ctx, &leftover)?;
        let mut pending = Vec::new();
        for procedure in contains {
            let result =
                procedure_to_asr(ctx, loader, procedure, Deftype::Implementation, &mut pending)
                    .map(|_| ());
            if let Err(abort) = result {
                if !ctx.config.continue_on_error {
                    return Err(abort);
                }
            }
        }
        finalize_scope(ctx, true)?;
        lower_pending_bodies(ctx, pending)?;
        Ok(())
    });

    ctx.implicit_stack.pop();
    let module_deps =
        std::mem::replace(&mut ctx.current_module_dependencies, saved_module_deps);
    ctx.current_function_dependencies = saved_function_deps;
    ctx.accumulators = saved_accumulators;
    inner?;

    let mut dependencies = dedup_preserving_order(module_deps);
    dependencies.retain(|dep| dep != &name);
    let has_submodules = ctx
        .store
        .table(symtab)
        .scope()
        .values()
        .any(|sym| match ctx.store.symbol(*sym) {
            Symbol::Function(f) => match &f.signature {
                Ttype::FunctionType(t) => t.module_procedure,
                _ => false,
            },
            _ => false,
        });
    let module = Module {
        name: name.clone(),
        symtab,
        dependencies,
        parent_module: parent_module.map(|p| p.to_string()),
        has_submodules,
        loc,
    };
    let id = ctx.store.alloc_symbol(Symbol::Module(module));
    ctx.store.set_owner(symtab, id);
    ctx.store
        .add_symbol(ctx.root_scope, &name, id)
        .map_err(|e| ctx.error(ErrorKind::DuplicateSymbol, e.to_string(), loc))?;
    Ok(id)
}

// Forward declarations in the parent module are matched with submodule
// implementations by name and signature.
fn match_forward_declarations(
    ctx: &mut Context,
    parent_sym: SymbolId,
    submodule_sym: SymbolId,
    loc: Location,
) -> SResult<()> {
    let (parent_table, submodule_table) = match (
        ctx.store.symbol(parent_sym),
        ctx.store.symbol(submodule_sym),
    ) {
        (Symbol::Module(p), Symbol::Module(s)) => (p.symtab, s.symtab),
        _ => return Ok(()),
    };
    let forward: Vec<(String, Ttype)> = ctx
        .store
        .table(parent_table)
        .scope()
        .iter()
        .filter_map(|(name, sym)| match ctx.store.symbol(*sym) {
            Symbol::Function(f) => match &f.signature {
                Ttype::FunctionType(t)
                    if t.module_procedure && t.deftype == Deftype::Interface =>
                {
                    Some((name.clone(), f.signature.clone()))
                }
                _ => None,
            },
            _ => None,
        })
        .collect();
    for (name, declared) in forward {
        let implementation = ctx.store.get_symbol(submodule_table, &name);
        let Some(implementation) = implementation else {
            continue; // may be implemented by another submodule
        };
        let matches = match ctx.store.symbol(implementation) {
            Symbol::Function(f) => check_equal_type(&f.signature, &declared),
            _ => false,
        };
        if !matches {
            return Err(ctx.error(
                ErrorKind::TypeShape,
                format!(
                    "module procedure `{name}` does not match the signature declared in the \
                     parent module"
                ),
                loc,
            ));
        }
    }
    Ok(())
}

pub(crate) fn program_to_asr(
    ctx: &mut Context,
    loader: &mut dyn ModuleLoader,
    p: &ast::Program,
) -> SResult<SymbolId> {
    let name = canonical_name(&p.name);
    debug!(program = %name, "resolving program");
    let saved_module_deps = std::mem::take(&mut ctx.current_module_dependencies);
    let saved_function_deps = std::mem::take(&mut ctx.current_function_dependencies);
    let saved_accumulators = std::mem::take(&mut ctx.accumulators);
    ctx.implicit_stack.push(default_dictionary(&ctx.config));

    let symtab = ctx.store.new_symtab(Some(ctx.root_scope));
    let inner = with_scope(ctx, symtab, |ctx| {
        let leftover = process_unit_decls(ctx, loader, &p.decls)?;
        retry_deferred_decls(ctx, &leftover)?;
        let mut pending = Vec::new();
        for procedure in &p.contains {
            let result =
                procedure_to_asr(ctx, loader, procedure, Deftype::Implementation, &mut pending)
                    .map(|_| ());
            if let Err(abort) = result {
                if !ctx.config.continue_on_error {
                    return Err(abort);
                }
            }
        }
        finalize_scope(ctx, false)?;
        lower_pending_bodies(ctx, pending)?;
        lower_stmts(ctx, &p.body)
    });

    ctx.implicit_stack.pop();
    let module_deps =
        std::mem::replace(&mut ctx.current_module_dependencies, saved_module_deps);
    ctx.current_function_dependencies = saved_function_deps;
    ctx.accumulators = saved_accumulators;
    let body = inner?;

    let mut dependencies = dedup_preserving_order(module_deps);
    dependencies.retain(|dep| dep != &name);
    let program = Program {
        name: name.clone(),
        symtab,
        body,
        dependencies,
        loc: p.loc,
    };
    let id = ctx.store.alloc_symbol(Symbol::Program(program));
    ctx.store.set_owner(symtab, id);
    ctx.store
        .add_symbol(ctx.root_scope, &name, id)
        .map_err(|e| ctx.error(ErrorKind::DuplicateSymbol, e.to_string(), p.loc))?;
    Ok(id)
}

fn default_dictionary(config: &ResolverConfig) -> ImplicitDictionary {
    if config.implicit_typing {
        ImplicitDictionary::with_defaults(config.default_integer_kind)
    } else {
        ImplicitDictionary::empty()
    }
}

// ------------------------------------------------------------------
// Declaration sections.

/// Process the declaration part of a scope. Use directives come first,
/// then access statements, implicit statements, and the remaining
/// declarations in source order. Procedure-variable declarations whose
/// interface is not resolvable yet are returned for a later retry.
pub(crate) fn process_unit_decls(
    ctx: &mut Context,
    loader: &mut dyn ModuleLoader,
    decls: &[ast::UnitDecl],
) -> SResult<Vec<ast::Declaration>> {
    for decl in decls {
        if let ast::UnitDecl::Use(use_decl) = decl {
            let result = uses::visit_use(ctx, loader, use_decl);
            if let Err(abort) = result {
                if !ctx.config.continue_on_error {
                    return Err(abort);
                }
            }
        }
    }
    for decl in decls {
        if let ast::UnitDecl::AccessStmt(access) = decl {
            let mapped = match access.access {
                ast::AccessSpec::Public => frt_asr::asr::Access::Public,
                ast::AccessSpec::Private => frt_asr::asr::Access::Private,
            };
            if access.names.is_empty() {
                ctx.accumulators.default_access = mapped;
            } else {
                for name in &access.names {
                    ctx.accumulators
                        .explicit_access
                        .insert(canonical_name(name), mapped);
                }
            }
        }
    }
    decls::process_implicit_statements(ctx, decls)?;

    let mut deferred = Vec::new();
    for decl in decls {
        let result = match decl {
            ast::UnitDecl::Use(_)
            | ast::UnitDecl::AccessStmt(_)
            | ast::UnitDecl::Implicit(_) => Ok(()),
            ast::UnitDecl::Declaration(declaration) => {
                if decls::is_deferred_procedure_decl(ctx, declaration) {
                    deferred.push(declaration.clone());
                    Ok(())
                } else {
                    decls::declaration_to_asr(ctx, declaration)
                }
            }
            ast::UnitDecl::Interface(interface) => interface_to_asr(ctx, loader, interface),
            ast::UnitDecl::DerivedType(dt) => {
                classes::derived_type_to_asr(ctx, dt).map(|_| ())
            }
            ast::UnitDecl::EnumDef(e) => classes::enum_to_asr(ctx, e).map(|_| ()),
            ast::UnitDecl::UnionDef(u) => classes::union_to_asr(ctx, u).map(|_| ()),
            ast::UnitDecl::Template(t) => templates::template_to_asr(ctx, loader, t).map(|_| ()),
            ast::UnitDecl::Requirement(r) => {
                templates::requirement_to_asr(ctx, loader, r).map(|_| ())
            }
            ast::UnitDecl::Instantiate(inst) => templates::instantiate_to_asr(ctx, loader, inst),
            ast::UnitDecl::Pragma(pragma) => {
                pragma_to_asr(ctx, pragma);
                Ok(())
            }
        };
        if let Err(abort) = result {
            if !ctx.config.continue_on_error {
                return Err(abort);
            }
        }
    }

    // First retry: interfaces declared later in the same section are now
    // visible. Whatever still cannot resolve is handed to the caller.
    let mut still_deferred = Vec::new();
    for declaration in deferred {
        if decls::is_deferred_procedure_decl(ctx, &declaration) {
            still_deferred.push(declaration);
        } else {
            let result = decls::declaration_to_asr(ctx, &declaration);
            if let Err(abort) = result {
                if !ctx.config.continue_on_error {
                    return Err(abort);
                }
            }
        }
    }
    Ok(still_deferred)
}

// The final retry at a unit scope: nothing else will make these resolve.
fn retry_deferred_decls(ctx: &mut Context, leftover: &[ast::Declaration]) -> SResult<()> {
    for declaration in leftover {
        let result = decls::declaration_to_asr(ctx, declaration);
        if let Err(abort) = result {
            if !ctx.config.continue_on_error {
                return Err(abort);
            }
        }
    }
    Ok(())
}

fn pragma_to_asr(ctx: &mut Context, pragma: &ast::Pragma) {
    let mut words = pragma.text.split_whitespace();
    if words.next() != Some("simd") {
        return;
    }
    for name in words {
        ctx.accumulators
            .simd_variables
            .push((canonical_name(name), pragma.loc));
    }
}

// ------------------------------------------------------------------
// Interface blocks.

fn interface_to_asr(
    ctx: &mut Context,
    loader: &mut dyn ModuleLoader,
    interface: &ast::Interface,
) -> SResult<()> {
    enum Sink {
        Generic(String),
        Operator(String),
        DefinedOperator(String),
        Assignment,
        Headers,
    }
    let sink = match &interface.header {
        ast::InterfaceHeader::Name(name) => {
            let key = canonical_name(name);
            ctx.accumulators
                .generic_procedures
                .entry(key.clone())
                .or_default();
            Sink::Generic(key)
        }
        ast::InterfaceHeader::Operator(op) => {
            let key = op.clone();
            ctx.accumulators
                .overloaded_op_procs
                .entry(key.clone())
                .or_default();
            Sink::Operator(key)
        }
        ast::InterfaceHeader::DefinedOperator(name) => {
            let key = canonical_name(name);
            ctx.accumulators
                .defined_op_procs
                .entry(key.clone())
                .or_default();
            Sink::DefinedOperator(key)
        }
        ast::InterfaceHeader::Assignment => Sink::Assignment,
        ast::InterfaceHeader::None => Sink::Headers,
    };
    let mut names = Vec::new();
    for item in &interface.items {
        match item {
            ast::InterfaceItem::Procedure(procedure) => {
                let mut pending = Vec::new();
                procedure_to_asr(ctx, loader, procedure, Deftype::Interface, &mut pending)?;
                lower_pending_bodies(ctx, pending)?;
                names.push(canonical_name(&procedure.name));
            }
            ast::InterfaceItem::ModuleProcedure { names: listed, .. } => {
                names.extend(listed.iter().map(|n| canonical_name(n)));
            }
        }
    }
    match sink {
        Sink::Generic(key) => ctx
            .accumulators
            .generic_procedures
            .entry(key)
            .or_default()
            .extend(names),
        Sink::Operator(key) => ctx
            .accumulators
            .overloaded_op_procs
            .entry(key)
            .or_default()
            .extend(names),
        Sink::DefinedOperator(key) => ctx
            .accumulators
            .defined_op_procs
            .entry(key)
            .or_default()
            .extend(names),
        Sink::Assignment => ctx.accumulators.assignment_procs.extend(names),
        Sink::Headers => {}
    }
    Ok(())
}

// ------------------------------------------------------------------
// Procedures.

pub(crate) type PendingBodies = Vec<(SymbolId, ast::Procedure)>;

pub(crate) fn procedure_to_asr(
    ctx: &mut Context,
    loader: &mut dyn ModuleLoader,
    proc: &ast::Procedure,
    deftype: Deftype,
    pending: &mut PendingBodies,
) -> SResult<SymbolId> {
    let has_entries = proc
        .body
        .iter()
        .any(|stmt| matches!(stmt, ast::Stmt::Entry { .. }));
    if has_entries {
        return rewrite_entry_functions(ctx, loader, proc, deftype);
    }
    let sym = procedure_symbol(ctx, loader, proc, deftype)?;
    if !proc.body.is_empty() {
        pending.push((sym, proc.clone()));
    }
    Ok(sym)
}

fn procedure_symbol(
    ctx: &mut Context,
    loader: &mut dyn ModuleLoader,
    proc: &ast::Procedure,
    deftype: Deftype,
) -> SResult<SymbolId> {
    debug!(procedure = %proc.name, "resolving procedure header");
    let saved_deps = std::mem::take(&mut ctx.current_function_dependencies);
    let saved_args = std::mem::replace(
        &mut ctx.current_procedure_args,
        proc.args.iter().map(|a| canonical_name(a)).collect(),
    );
    let dict = ctx
        .implicit_dictionary()
        .cloned()
        .unwrap_or_else(|| default_dictionary(&ctx.config));
    ctx.implicit_stack.push(dict);
    // The procedure gets fresh accumulators; the enclosing scope's are
    // still consulted for the generic-collision rename.
    let parent_accumulators = std::mem::take(&mut ctx.accumulators);

    let result = procedure_symbol_inner(ctx, loader, proc, deftype, &parent_accumulators);

    ctx.accumulators = parent_accumulators;
    ctx.implicit_stack.pop();
    ctx.current_procedure_args = saved_args;
    ctx.current_function_dependencies = saved_deps;
    result
}

fn procedure_symbol_inner(
    ctx: &mut Context,
    loader: &mut dyn ModuleLoader,
    proc: &ast::Procedure,
    deftype: Deftype,
    parent_accumulators: &crate::context::Accumulators,
) -> SResult<SymbolId> {
    let symtab = ctx.store.new_symtab(Some(ctx.current_scope));
    let deferred = with_scope(ctx, symtab, |ctx| {
        let deferred = process_unit_decls(ctx, loader, &proc.decls)?;
        // Any argument that was not declared falls back to implicit typing.
        for arg in &proc.args {
            if ctx.store.get_symbol(symtab, arg).is_none() {
                body::implicit_declare(ctx, arg, proc.loc)?;
            }
        }
        Ok(deferred)
    })?;

    // Argument expressions and types, in formal order.
    let mut args = Vec::new();
    let mut arg_types = Vec::new();
    for arg in &proc.args {
        let sym = ctx
            .store
            .get_symbol(symtab, arg)
            .expect("every formal is bound by now");
        let ty = match ctx.store.symbol_mut(sym) {
            Symbol::Variable(v) => {
                if v.intent == frt_asr::asr::Intent::Local {
                    v.intent = frt_asr::asr::Intent::InOut;
                }
                v.ty.clone()
            }
            other => {
                let loc = other.loc();
                return Err(ctx.error(
                    ErrorKind::TypeShape,
                    format!("formal `{arg}` of `{}` is not a variable", proc.name),
                    loc,
                ));
            }
        };
        arg_types.push(ty.clone());
        args.push(Var::new(sym).to_texpr(ty, proc.loc));
    }

    // Function result: the named result variable, or the function name.
    let (return_var, return_type) = if proc.kind == ast::ProcKind::Function {
        let result_name = canonical_name(proc.result.as_deref().unwrap_or(&proc.name));
        let sym = match ctx.store.get_symbol(symtab, &result_name) {
            Some(sym) => sym,
            None => {
                with_scope(ctx, symtab, |ctx| {
                    body::implicit_declare(ctx, &result_name, proc.loc).map(|(sym, _)| sym)
                })?
            }
        };
        let ty = match ctx.store.symbol_mut(sym) {
            Symbol::Variable(v) => {
                v.intent = frt_asr::asr::Intent::ReturnVar;
                v.ty.clone()
            }
            _ => {
                return Err(ctx.error(
                    ErrorKind::TypeShape,
                    format!("result `{result_name}` is not a variable"),
                    proc.loc,
                ))
            }
        };
        (Some(Var::new(sym).to_texpr(ty.clone(), proc.loc)), Some(ty))
    } else {
        (None, None)
    };

    let signature = FunctionType {
        arg_types,
        return_type,
        abi: if proc.attrs.bind_c.is_some() {
            Abi::BindC
        } else {
            Abi::Source
        },
        deftype,
        bind_name: proc.attrs.bind_c.clone().flatten(),
        pure_function: proc.attrs.pure_procedure,
        elemental: proc.attrs.elemental,
        module_procedure: proc.attrs.module_procedure,
    };

    // A procedure whose name collides with a generic accumulated in the
    // enclosing scope is stored under a reserved suffix; the aggregate
    // takes the plain name at finalisation.
    let mut name = canonical_name(&proc.name);
    if parent_accumulators.generic_procedures.contains_key(&name) {
        name = format!("{name}~genericprocedure");
    }

    // Struct-typed locals make their type declarations dependencies of the
    // function.
    for dep in struct_type_contribution(ctx, symtab) {
        if !ctx.current_function_dependencies.contains(&dep) {
            ctx.current_function_dependencies.push(dep);
        }
    }

    let function = Function {
        name: name.clone(),
        symtab,
        args,
        body: Vec::new(),
        return_var,
        signature: signature.to_ttype(),
        dependencies: dedup_preserving_order(ctx.current_function_dependencies.clone()),
        access: frt_asr::asr::Access::Public,
        loc: proc.loc,
    };
    let id = ctx.store.alloc_symbol(Symbol::Function(function));
    ctx.store.set_owner(symtab, id);
    ctx.add_symbol_checked(&name, id, proc.loc)?;

    // Self-referential procedure declarations resolve now that the symbol
    // exists; the procedure's own interface aggregates finalise in its own
    // scope before the contained bodies are lowered.
    with_scope(ctx, symtab, |ctx| {
        retry_deferred_decls(ctx, &deferred)?;
        let mut pending = Vec::new();
        for contained in &proc.contains {
            procedure_to_asr(ctx, loader, contained, Deftype::Implementation, &mut pending)?;
        }
        finalize_scope(ctx, false)?;
        lower_pending_bodies(ctx, pending)
    })?;
    Ok(id)
}

// The names of struct declarations referenced by this scope's variables,
// when the declaration lives outside the scope.
fn struct_type_contribution(ctx: &Context, symtab: SymtabId) -> Vec<String> {
    let mut out = Vec::new();
    for sym in ctx.store.table(symtab).scope().values() {
        if let Symbol::Variable(v) = ctx.store.symbol(*sym) {
            if let Some(type_decl) = v.type_declaration {
                if matches!(
                    ctx.store
                        .symbol(ctx.store.symbol_get_past_external(type_decl)),
                    Symbol::Struct(_)
                ) && ctx.store.parent_symtab(type_decl) != Some(symtab)
                {
                    out.push(ctx.store.symbol_name(type_decl).to_string());
                }
            }
        }
    }
    out
}

/// Lower the deferred bodies of this scope's procedures, now that the
/// scope's aggregates and type-bound procedures exist.
pub(crate) fn lower_pending_bodies(ctx: &mut Context, pending: PendingBodies) -> SResult<()> {
    for (sym, proc) in pending {
        let result = lower_function_body(ctx, sym, &proc);
        if let Err(abort) = result {
            if !ctx.config.continue_on_error {
                return Err(abort);
            }
        }
    }
    Ok(())
}

fn lower_function_body(ctx: &mut Context, sym: SymbolId, proc: &ast::Procedure) -> SResult<()> {
    let symtab = match ctx.store.symbol(sym) {
        Symbol::Function(f) => f.symtab,
        _ => return Ok(()),
    };
    let saved_deps = std::mem::take(&mut ctx.current_function_dependencies);
    let saved_args = std::mem::replace(
        &mut ctx.current_procedure_args,
        proc.args.iter().map(|a| canonical_name(a)).collect(),
    );
    let dict = ctx
        .implicit_dictionary()
        .cloned()
        .unwrap_or_else(|| default_dictionary(&ctx.config));
    ctx.implicit_stack.push(dict);
    let inner = with_scope(ctx, symtab, |ctx| {
        decls::process_implicit_statements(ctx, &proc.decls)?;
        lower_stmts(ctx, &proc.body)
    });
    ctx.implicit_stack.pop();
    ctx.current_procedure_args = saved_args;
    let body_deps = std::mem::replace(&mut ctx.current_function_dependencies, saved_deps);
    let body = inner?;

    // Late-bound struct types may have been patched since the header was
    // built; recompute their contribution.
    let struct_deps = struct_type_contribution(ctx, symtab);
    if let Symbol::Function(f) = ctx.store.symbol_mut(sym) {
        f.body = body;
        let mut dependencies = std::mem::take(&mut f.dependencies);
        dependencies.extend(body_deps);
        dependencies.extend(struct_deps);
        f.dependencies = dedup_preserving_order(dependencies);
    }
    Ok(())
}

// ------------------------------------------------------------------
// Entry statements.

// An `entry` defines an alternative entry point. The procedure is
// rewritten into one stub per entry point (delegating to the master with
// an integer discriminator) plus a master whose formal list is the union
// of every entry's formals behind the discriminator.
fn rewrite_entry_functions(
    ctx: &mut Context,
    loader: &mut dyn ModuleLoader,
    proc: &ast::Procedure,
    deftype: Deftype,
) -> SResult<SymbolId> {
    let proc_name = canonical_name(&proc.name);
    debug!(procedure = %proc_name, "rewriting entry statements");
    let mut entries: Vec<(String, Vec<String>, Location)> = Vec::new();
    let mut main_body = Vec::new();
    for stmt in &proc.body {
        match stmt {
            ast::Stmt::Entry { name, args, loc } => entries.push((
                canonical_name(name),
                args.iter().map(|a| canonical_name(a)).collect(),
                *loc,
            )),
            other => main_body.push(other.clone()),
        }
    }

    let master_name = format!("{proc_name}_main__lcompilers");
    let mut master_args: Vec<String> = vec!["entry__lcompilers".to_string()];
    for arg in proc.args.iter().map(|a| canonical_name(a)) {
        if !master_args.contains(&arg) {
            master_args.push(arg);
        }
    }
    for (_, args, _) in &entries {
        for arg in args {
            if !master_args.contains(arg) {
                master_args.push(arg.clone());
            }
        }
    }

    let mut master_decls = proc.decls.to_vec();
    master_decls.push(ast::UnitDecl::Declaration(ast::Declaration {
        type_spec: ast::TypeSpec::Integer { kind: None },
        attrs: Vec::new(),
        entities: vec![ast::EntityDecl {
            name: "entry__lcompilers".to_string(),
            dims: None,
            init: None,
            loc: proc.loc,
        }],
        loc: proc.loc,
    }));
    let master_ast = ast::Procedure {
        kind: proc.kind,
        name: master_name.clone(),
        args: master_args.clone(),
        result: proc.result.clone(),
        attrs: proc.attrs.clone(),
        decls: master_decls,
        body: main_body,
        contains: proc.contains.clone(),
        loc: proc.loc,
    };
    let master = procedure_symbol(ctx, loader, &master_ast, deftype)?;

    // Every formal behind the discriminator becomes optional: each entry
    // point passes only its own formals.
    let formal_syms: Vec<SymbolId> = match ctx.store.symbol(master) {
        Symbol::Function(f) => f
            .args
            .iter()
            .skip(1)
            .filter_map(|arg| match arg.expression() {
                frt_asr::asr::Expr::Var(Var { sym }) => Some(*sym),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    for formal in formal_syms {
        if let Symbol::Variable(v) = ctx.store.symbol_mut(formal) {
            v.presence = Presence::Optional;
        }
    }
    if !master_ast.body.is_empty() {
        lower_function_body(ctx, master, &master_ast)?;
    }

    // One template stub per entry point, the original header first.
    let mut entry_points: Vec<(String, Vec<String>, Location)> = vec![(
        proc_name.clone(),
        proc.args.iter().map(|a| canonical_name(a)).collect(),
        proc.loc,
    )];
    entry_points.extend(entries);
    let mut first_stub = None;
    for (discriminator, (entry_name, entry_args, entry_loc)) in
        entry_points.iter().enumerate()
    {
        let positions: Vec<usize> = entry_args
            .iter()
            .filter_map(|arg| master_args.iter().position(|m| m == arg))
            .collect();
        ctx.entry_argument_map
            .insert(entry_name.clone(), positions);

        let mut call_args: Vec<Option<ast::Expr>> =
            vec![Some(ast::Expr::int(discriminator as i64 + 1, *entry_loc))];
        for master_arg in &master_args[1..] {
            call_args.push(if entry_args.contains(master_arg) {
                Some(ast::Expr::name(master_arg, *entry_loc))
            } else {
                None
            });
        }
        let stub_ast = ast::Procedure {
            kind: proc.kind,
            name: entry_name.clone(),
            args: entry_args.clone(),
            result: proc.result.clone(),
            attrs: proc.attrs.clone(),
            decls: filter_decls_for_args(&proc.decls, entry_args),
            body: vec![ast::Stmt::Call {
                target: ast::CallTarget::Name(master_name.clone()),
                args: call_args,
                loc: *entry_loc,
            }],
            contains: Vec::new(),
            loc: *entry_loc,
        };
        let stub = procedure_symbol(ctx, loader, &stub_ast, deftype)?;
        lower_function_body(ctx, stub, &stub_ast)?;
        first_stub.get_or_insert(stub);
    }
    Ok(first_stub.expect("at least the original entry point exists"))
}

// Keep only the declarations an entry stub needs: its own formals and the
// implicit statements.
fn filter_decls_for_args(decls: &[ast::UnitDecl], args: &[String]) -> Vec<ast::UnitDecl> {
    let mut filtered = Vec::new();
    for decl in decls {
        match decl {
            ast::UnitDecl::Implicit(_) => filtered.push(decl.clone()),
            ast::UnitDecl::Declaration(declaration) => {
                let entities: Vec<ast::EntityDecl> = declaration
                    .entities
                    .iter()
                    .filter(|entity| args.contains(&canonical_name(&entity.name)))
                    .cloned()
                    .collect();
                if !entities.is_empty() {
                    filtered.push(ast::UnitDecl::Declaration(ast::Declaration {
                        type_spec: declaration.type_spec.clone(),
                        attrs: declaration.attrs.clone(),
                        entities,
                        loc: declaration.loc,
                    }));
                }
            }
            _ => {}
        }
    }
    filtered
}

// ------------------------------------------------------------------
// Scope finalisation.

fn finalize_scope(ctx: &mut Context, apply_access: bool) -> SResult<()> {
    add_overloaded_procedures(ctx)?;
    add_assignment_procedures(ctx)?;
    add_generic_procedures(ctx)?;
    classes::add_class_procedures(ctx)?;
    classes::add_generic_class_procedures(ctx)?;
    classes::report_unresolved_struct_vars(ctx)?;
    process_simd_variables(ctx)?;
    if apply_access {
        apply_default_access(ctx);
    }
    Ok(())
}

fn resolve_aggregate_constituents(
    ctx: &mut Context,
    aggregate_name: &str,
    proc_names: &[String],
    rename_colliding: bool,
    loc: Location,
) -> SResult<Vec<SymbolId>> {
    let mut procs = Vec::new();
    for proc_name in proc_names {
        let lookup_name = if rename_colliding && proc_name == aggregate_name {
            format!("{proc_name}~genericprocedure")
        } else {
            proc_name.clone()
        };
        match ctx.store.resolve_symbol(ctx.current_scope, &lookup_name) {
            Some(sym) => procs.push(sym),
            None => {
                return Err(ctx.error(
                    ErrorKind::UnresolvedSymbol,
                    format!("procedure `{proc_name}` of `{aggregate_name}` does not exist"),
                    loc,
                ))
            }
        }
    }
    Ok(procs)
}

fn add_custom_operator(
    ctx: &mut Context,
    aggregate_name: &str,
    proc_names: &[String],
    loc: Location,
) -> SResult<()> {
    let mut procs =
        resolve_aggregate_constituents(ctx, aggregate_name, proc_names, false, loc)?;
    // Merge with an aggregate already imported into this scope.
    if let Some(existing) = ctx.store.get_symbol(ctx.current_scope, aggregate_name) {
        if let Symbol::CustomOperator(c) = ctx.store.symbol(existing) {
            let imported = c.procs.clone();
            for candidate in imported {
                let target = ctx.store.symbol_get_past_external(candidate);
                if !procs
                    .iter()
                    .any(|p| ctx.store.symbol_get_past_external(*p) == target)
                {
                    procs.push(candidate);
                }
            }
        }
    }
    let operator = frt_asr::asr::CustomOperator {
        name: aggregate_name.to_string(),
        parent_symtab: ctx.current_scope,
        procs,
        access: frt_asr::asr::Access::Public,
        loc,
    };
    let id = ctx.store.alloc_symbol(Symbol::CustomOperator(operator));
    ctx.store
        .add_or_overwrite_symbol(ctx.current_scope, aggregate_name, id)
        .map_err(|e| ctx.error(ErrorKind::LexicalName, e.to_string(), loc))?;
    Ok(())
}

fn add_overloaded_procedures(ctx: &mut Context) -> SResult<()> {
    let overloaded = std::mem::take(&mut ctx.accumulators.overloaded_op_procs);
    for (op, proc_names) in overloaded {
        if proc_names.is_empty() {
            continue;
        }
        let Some(aggregate_name) = body::intrinsic_op_aggregate_name(&op) else {
            let loc = Location::default();
            return Err(ctx.error(
                ErrorKind::UnresolvedSymbol,
                format!("`{op}` is not an overloadable operator"),
                loc,
            ));
        };
        add_custom_operator(ctx, aggregate_name, &proc_names, Location::default())?;
    }
    let defined = std::mem::take(&mut ctx.accumulators.defined_op_procs);
    for (name, proc_names) in defined {
        if proc_names.is_empty() {
            continue;
        }
        let aggregate_name = body::defined_op_aggregate_name(&name);
        add_custom_operator(ctx, &aggregate_name, &proc_names, Location::default())?;
    }
    Ok(())
}

fn add_assignment_procedures(ctx: &mut Context) -> SResult<()> {
    let proc_names = std::mem::take(&mut ctx.accumulators.assignment_procs);
    if proc_names.is_empty() {
        return Ok(());
    }
    add_custom_operator(ctx, "~assign", &proc_names, Location::default())
}

fn add_generic_procedures(ctx: &mut Context) -> SResult<()> {
    let generics = std::mem::take(&mut ctx.accumulators.generic_procedures);
    for (generic_name, proc_names) in generics {
        if proc_names.is_empty() {
            continue;
        }
        let loc = Location::default();
        let mut procs =
            resolve_aggregate_constituents(ctx, &generic_name, &proc_names, true, loc)?;
        if let Some(existing) = ctx.store.get_symbol(ctx.current_scope, &generic_name) {
            if let Symbol::GenericProcedure(g) = ctx.store.symbol(existing) {
                let imported = g.procs.clone();
                for candidate in imported {
                    let target = ctx.store.symbol_get_past_external(candidate);
                    if !procs
                        .iter()
                        .any(|p| ctx.store.symbol_get_past_external(*p) == target)
                    {
                        procs.push(candidate);
                    }
                }
            }
        }
        let generic = frt_asr::asr::GenericProcedure {
            name: generic_name.clone(),
            parent_symtab: ctx.current_scope,
            procs,
            access: frt_asr::asr::Access::Public,
            loc,
        };
        let id = ctx.store.alloc_symbol(Symbol::GenericProcedure(generic));
        ctx.store
            .add_or_overwrite_symbol(ctx.current_scope, &generic_name, id)
            .map_err(|e| ctx.error(ErrorKind::LexicalName, e.to_string(), loc))?;
    }
    Ok(())
}

// Variables named in a `simd` pragma get the SIMD physical kind on their
// array type; only fixed-shape arrays qualify.
fn process_simd_variables(ctx: &mut Context) -> SResult<()> {
    let simd = std::mem::take(&mut ctx.accumulators.simd_variables);
    for (name, loc) in simd {
        let sym = match ctx.store.get_symbol(ctx.current_scope, &name) {
            Some(sym) => sym,
            None => {
                return Err(ctx.error(
                    ErrorKind::UnresolvedSymbol,
                    format!("simd pragma names unknown variable `{name}`"),
                    loc,
                ))
            }
        };
        let ok = match ctx.store.symbol_mut(sym) {
            Symbol::Variable(Variable {
                ty: Ttype::Array(array),
                ..
            }) if array.dims.iter().all(|d| d.length.is_some()) => {
                array.physical = ArrayPhysical::Simd;
                true
            }
            _ => false,
        };
        if !ok {
            return Err(ctx.error(
                ErrorKind::TypeShape,
                format!("simd pragma requires `{name}` to be a fixed-shape array"),
                loc,
            ));
        }
    }
    Ok(())
}

// The module's default access applies to every symbol without an explicit
// access statement or attribute.
fn apply_default_access(ctx: &mut Context) {
    let default = ctx.accumulators.default_access;
    let explicit = ctx.accumulators.explicit_access.clone();
    let entries: Vec<(String, SymbolId)> = ctx
        .store
        .table(ctx.current_scope)
        .scope()
        .iter()
        .map(|(name, sym)| (name.clone(), *sym))
        .collect();
    for (name, sym) in entries {
        let access = explicit.get(&name).copied().unwrap_or(default);
        match ctx.store.symbol_mut(sym) {
            Symbol::Function(f) => f.access = access,
            Symbol::Variable(v) => v.access = access,
            Symbol::GenericProcedure(g) => g.access = access,
            Symbol::CustomOperator(c) => c.access = access,
            Symbol::ExternalSymbol(e) => e.access = access,
            _ => {}
        }
    }
}
