// Copyright contributors to the frt compiler project
// SPDX-License-Identifier: Apache-2.0

// Resolution of `use` directives: full imports, only-lists and renames,
// shadow-and-replace semantics, unwrapping of external-of-external
// indirections, and the merging of generic procedures and custom operators
// across modules. Imports are driven by a FIFO worklist so indirect
// imports (constituents of an imported aggregate) reach a fixed point.

use std::collections::VecDeque;

use hashbrown::HashMap;
use tracing::debug;

use frt_asr::asr::{Access, CustomOperator, ExternalSymbol, GenericProcedure, Symbol};
use frt_asr::diagnostics::ErrorKind;
use frt_asr::location::Location;
use frt_asr::symbols::{canonical_name, SymbolId, SymtabId};
use frt_syntax::ast;

use crate::context::{Context, SResult};
use crate::loader::{LoaderError, ModuleLoader};

fn symbol_access(store: &frt_asr::symbols::SymbolStore, sym: SymbolId) -> Access {
    match store.symbol(sym) {
        Symbol::Function(f) => f.access,
        Symbol::Variable(v) => v.access,
        Symbol::GenericProcedure(g) => g.access,
        Symbol::CustomOperator(c) => c.access,
        Symbol::ExternalSymbol(e) => e.access,
        _ => Access::Public,
    }
}

fn module_table(ctx: &Context, module_sym: SymbolId) -> Option<SymtabId> {
    match ctx.store.symbol(module_sym) {
        Symbol::Module(m) => Some(m.symtab),
        _ => None,
    }
}

pub(crate) fn visit_use(
    ctx: &mut Context,
    loader: &mut dyn ModuleLoader,
    use_decl: &ast::Use,
) -> SResult<()> {
    let module_name = canonical_name(&use_decl.module);
    debug!(module = %module_name, only = use_decl.only, "resolving use");
    let module_sym = match ctx.store.get_symbol(ctx.root_scope, &module_name) {
        Some(sym) => sym,
        None => match loader.load_module(ctx, &module_name, use_decl.loc) {
            Ok(sym) => sym,
            Err(LoaderError::Cycle(name)) => {
                return Err(ctx.error(
                    ErrorKind::CyclicImport,
                    format!("`use {name}` forms an import cycle"),
                    use_decl.loc,
                ))
            }
            Err(err) => {
                return Err(ctx.error(
                    ErrorKind::UnresolvedSymbol,
                    err.to_string(),
                    use_decl.loc,
                ))
            }
        },
    };
    let Some(table) = module_table(ctx, module_sym) else {
        return Err(ctx.error(
            ErrorKind::UnresolvedSymbol,
            format!("`{module_name}` is not a module"),
            use_decl.loc,
        ));
    };

    // (remote name, local name) pairs, processed first-in first-out.
    let mut worklist: VecDeque<(String, String)> = VecDeque::new();
    if use_decl.only {
        for item in &use_decl.symbols {
            match item {
                ast::UseItem::Name(name) => {
                    let name = canonical_name(name);
                    worklist.push_back((name.clone(), name));
                }
                ast::UseItem::Rename { local, orig } => {
                    worklist.push_back((canonical_name(orig), canonical_name(local)));
                }
            }
        }
    } else {
        let mut renames: HashMap<String, String> = HashMap::new();
        for item in &use_decl.symbols {
            if let ast::UseItem::Rename { local, orig } = item {
                renames.insert(canonical_name(orig), canonical_name(local));
            }
        }
        let public: Vec<(String, SymbolId)> = ctx
            .store
            .table(table)
            .scope()
            .iter()
            .map(|(name, sym)| (name.clone(), *sym))
            .collect();
        for (name, sym) in public {
            if symbol_access(ctx.store, sym) != Access::Public {
                continue;
            }
            // Mangled constituents are pulled in on demand, never eagerly.
            if name.contains('@') {
                continue;
            }
            let local = renames.get(&name).cloned().unwrap_or_else(|| name.clone());
            worklist.push_back((name, local));
        }
    }

    while let Some((remote, local)) = worklist.pop_front() {
        let result = import_symbol(
            ctx,
            module_sym,
            &module_name,
            &remote,
            &local,
            use_decl.only,
            use_decl.loc,
        );
        if let Err(abort) = result {
            if !ctx.config.continue_on_error {
                return Err(abort);
            }
        }
    }
    Ok(())
}

/// Import every public symbol of `module_sym`, as a submodule does with its
/// parent module.
pub(crate) fn import_all_public(
    ctx: &mut Context,
    module_sym: SymbolId,
    module_name: &str,
    loc: Location,
) -> SResult<()> {
    let Some(table) = module_table(ctx, module_sym) else {
        return Err(ctx.error(
            ErrorKind::UnresolvedSymbol,
            format!("`{module_name}` is not a module"),
            loc,
        ));
    };
    let public: Vec<String> = ctx
        .store
        .table(table)
        .scope()
        .iter()
        .filter(|(name, sym)| {
            symbol_access(ctx.store, **sym) == Access::Public && !name.contains('@')
        })
        .map(|(name, _)| name.clone())
        .collect();
    for name in public {
        import_symbol(ctx, module_sym, module_name, &name, &name, false, loc)?;
    }
    Ok(())
}

fn import_symbol(
    ctx: &mut Context,
    module_sym: SymbolId,
    module_name: &str,
    remote: &str,
    local: &str,
    explicit: bool,
    loc: Location,
) -> SResult<()> {
    let table = module_table(ctx, module_sym).expect("import source must be a module");
    let sym = match ctx.store.get_symbol(table, remote) {
        Some(sym) => sym,
        None => {
            return Err(ctx.error(
                ErrorKind::UnresolvedSymbol,
                format!("`{remote}` is not found in module `{module_name}`"),
                loc,
            ))
        }
    };
    if explicit && symbol_access(ctx.store, sym) != Access::Public {
        return Err(ctx.error(
            ErrorKind::UnresolvedSymbol,
            format!("`{remote}` is private to module `{module_name}`"),
            loc,
        ));
    }
    match ctx.store.symbol(sym).clone() {
        // External-of-external is unwrapped to the real target before
        // insertion; at most one hop survives.
        Symbol::ExternalSymbol(ext) => {
            let target = match ext.external {
                Some(target) => target,
                None => {
                    return Err(ctx.error(
                        ErrorKind::UnresolvedSymbol,
                        format!("`{remote}` of module `{module_name}` is unresolved"),
                        loc,
                    ))
                }
            };
            insert_external(
                ctx,
                local,
                target,
                &ext.module_name,
                &ext.original_name,
                loc,
            )
            .map(|_| ())
        }
        Symbol::GenericProcedure(generic) => {
            import_generic(ctx, module_sym, module_name, &generic, local, loc)
        }
        Symbol::CustomOperator(operator) => {
            import_operator(ctx, module_sym, module_name, &operator, local, loc)
        }
        _ => insert_external(ctx, local, sym, module_name, remote, loc).map(|_| ()),
    }
}

// Create (or reuse) an ExternalSymbol binding `local` to `target`. An
// existing binding for the same target is reused; anything else is
// shadowed with a warning.
fn insert_external(
    ctx: &mut Context,
    local: &str,
    target: SymbolId,
    module_name: &str,
    original_name: &str,
    loc: Location,
) -> SResult<SymbolId> {
    if let Some(existing) = ctx.store.get_symbol(ctx.current_scope, local) {
        if ctx.store.symbol_get_past_external(existing) == target
            && matches!(ctx.store.symbol(existing), Symbol::ExternalSymbol(_))
        {
            return Ok(existing);
        }
        ctx.warn(
            format!("`use` of `{original_name}` shadows the existing binding of `{local}`"),
            loc,
        );
    }
    let external = ExternalSymbol {
        name: canonical_name(local),
        parent_symtab: ctx.current_scope,
        external: Some(target),
        module_name: module_name.to_string(),
        original_name: original_name.to_string(),
        scope_names: Vec::new(),
        access: Access::Public,
        loc,
    };
    let id = ctx.store.alloc_symbol(Symbol::ExternalSymbol(external));
    ctx.store
        .add_or_overwrite_symbol(ctx.current_scope, local, id)
        .map_err(|e| ctx.error(ErrorKind::LexicalName, e.to_string(), loc))?;
    Ok(id)
}

// Make one constituent of an imported aggregate visible in the current
// scope, reusing an existing import when it already points at the same
// procedure. Private constituents come in under the mangled name
// `proc@aggregate`.
fn import_constituent(
    ctx: &mut Context,
    module_name: &str,
    aggregate_local: &str,
    proc: SymbolId,
    loc: Location,
) -> SResult<SymbolId> {
    let target = ctx.store.symbol_get_past_external(proc);
    let proc_name = ctx.store.symbol_name(proc).to_string();
    let (origin_module, original_name) = match ctx.store.symbol(proc) {
        Symbol::ExternalSymbol(e) => (e.module_name.clone(), e.original_name.clone()),
        _ => (module_name.to_string(), proc_name.clone()),
    };
    if let Some(existing) = ctx.store.get_symbol(ctx.current_scope, &proc_name) {
        if ctx.store.symbol_get_past_external(existing) == target {
            return Ok(existing);
        }
    }
    let private = symbol_access(ctx.store, proc) != Access::Public;
    let taken = ctx.store.get_symbol(ctx.current_scope, &proc_name).is_some();
    let local_name = if private || taken {
        format!("{proc_name}@{aggregate_local}")
    } else {
        proc_name
    };
    if let Some(existing) = ctx.store.get_symbol(ctx.current_scope, &local_name) {
        if ctx.store.symbol_get_past_external(existing) == target {
            return Ok(existing);
        }
    }
    let external = ExternalSymbol {
        name: local_name.clone(),
        parent_symtab: ctx.current_scope,
        external: Some(target),
        module_name: origin_module,
        original_name,
        scope_names: Vec::new(),
        access: if private {
            Access::Private
        } else {
            Access::Public
        },
        loc,
    };
    let id = ctx.store.alloc_symbol(Symbol::ExternalSymbol(external));
    ctx.store
        .add_or_overwrite_symbol(ctx.current_scope, &local_name, id)
        .map_err(|e| ctx.error(ErrorKind::LexicalName, e.to_string(), loc))?;
    Ok(id)
}

// Aggregates merge: importing a generic over an existing generic of the
// same name yields the union of the constituent lists, in stable order.
fn import_generic(
    ctx: &mut Context,
    _module_sym: SymbolId,
    module_name: &str,
    generic: &GenericProcedure,
    local: &str,
    loc: Location,
) -> SResult<()> {
    let mut imported = Vec::new();
    for proc in &generic.procs {
        imported.push(import_constituent(ctx, module_name, local, *proc, loc)?);
    }
    let mut procs: Vec<SymbolId> = Vec::new();
    if let Some(existing) = ctx.store.get_symbol(ctx.current_scope, local) {
        match ctx.store.symbol(existing) {
            Symbol::GenericProcedure(g) => procs = g.procs.clone(),
            _ => ctx.warn(
                format!("`use` of generic `{}` shadows the existing binding of `{local}`", generic.name),
                loc,
            ),
        }
    }
    for candidate in imported {
        let target = ctx.store.symbol_get_past_external(candidate);
        let present = procs
            .iter()
            .any(|p| ctx.store.symbol_get_past_external(*p) == target);
        if !present {
            procs.push(candidate);
        }
    }
    let aggregate = GenericProcedure {
        name: canonical_name(local),
        parent_symtab: ctx.current_scope,
        procs,
        access: Access::Public,
        loc,
    };
    let id = ctx.store.alloc_symbol(Symbol::GenericProcedure(aggregate));
    ctx.store
        .add_or_overwrite_symbol(ctx.current_scope, local, id)
        .map_err(|e| ctx.error(ErrorKind::LexicalName, e.to_string(), loc))?;
    Ok(())
}

fn import_operator(
    ctx: &mut Context,
    _module_sym: SymbolId,
    module_name: &str,
    operator: &CustomOperator,
    local: &str,
    loc: Location,
) -> SResult<()> {
    let mut imported = Vec::new();
    for proc in &operator.procs {
        imported.push(import_constituent(ctx, module_name, local, *proc, loc)?);
    }
    let mut procs: Vec<SymbolId> = Vec::new();
    if let Some(existing) = ctx.store.get_symbol(ctx.current_scope, local) {
        if let Symbol::CustomOperator(c) = ctx.store.symbol(existing) {
            procs = c.procs.clone();
        }
    }
    for candidate in imported {
        let target = ctx.store.symbol_get_past_external(candidate);
        let present = procs
            .iter()
            .any(|p| ctx.store.symbol_get_past_external(*p) == target);
        if !present {
            procs.push(candidate);
        }
    }
    let aggregate = CustomOperator {
        name: canonical_name(local),
        parent_symtab: ctx.current_scope,
        procs,
        access: Access::Public,
        loc,
    };
    let id = ctx.store.alloc_symbol(Symbol::CustomOperator(aggregate));
    ctx.store
        .add_or_overwrite_symbol(ctx.current_scope, local, id)
        .map_err(|e| ctx.error(ErrorKind::LexicalName, e.to_string(), loc))?;
    Ok(())
}
