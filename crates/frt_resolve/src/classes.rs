// Copyright contributors to the frt compiler project
// SPDX-License-Identifier: Apache-2.0

// Derived types, enums and unions: single inheritance, the deferred
// struct-declaration table, and the side-table of type-bound procedures
// that is emitted into each struct's own symbol table once the scope
// closes.

use frt_asr::asr::{
    Abstract, Access, Enum, EnumValueType, Expr, GenericProcedure, IntegerConstant, Intent,
    Presence, Storage, Struct, StructMethodDeclaration, Symbol, Union, Var, Variable,
};
use frt_asr::diagnostics::ErrorKind;
use frt_asr::symbols::{canonical_name, SymbolId};
use frt_asr::types::Ttype;
use frt_syntax::ast;

use crate::body::{collect_expr_dependencies, fold_constant, lower_expr};
use crate::context::{dedup_preserving_order, with_scope, Context, MethodBinding, SResult};
use crate::decls;

// Rewrite an unresolved struct reference inside `ty` to point at `decl`,
// carrying the struct's C-interop flag onto the type.
fn patch_struct_reference(ty: &mut Ttype, decl: SymbolId, is_c_struct: bool) -> bool {
    match ty {
        Ttype::StructType {
            decl: slot @ None,
            is_c_struct: flag,
        } => {
            *slot = Some(decl);
            *flag = is_c_struct;
            true
        }
        Ttype::Pointer(inner) | Ttype::Allocatable(inner) => {
            patch_struct_reference(inner, decl, is_c_struct)
        }
        Ttype::Array(array) => patch_struct_reference(&mut array.elem, decl, is_c_struct),
        _ => false,
    }
}

// Variables that were declared before their struct existed get their type
// and type-declaration fields filled now.
fn patch_deferred_struct_vars(ctx: &mut Context, struct_name: &str, struct_sym: SymbolId) {
    let is_c_struct = match ctx.store.symbol(struct_sym) {
        Symbol::Struct(s) => s.is_c_interop,
        _ => false,
    };
    let mut remaining = Vec::new();
    for entry in std::mem::take(&mut ctx.accumulators.deferred_struct_vars) {
        if entry.struct_name != struct_name {
            remaining.push(entry);
            continue;
        }
        if let Symbol::Variable(var) = ctx.store.symbol_mut(entry.var) {
            if patch_struct_reference(&mut var.ty, struct_sym, is_c_struct) {
                var.type_declaration = Some(struct_sym);
            }
        }
    }
    ctx.accumulators.deferred_struct_vars = remaining;
}

// The dependency set of a struct: type declarations of its members, plus
// enum and union types declared outside the struct itself. Self references
// of a recursive struct are not dependencies.
fn compute_struct_dependencies(ctx: &Context, symtab: frt_asr::symbols::SymtabId, name: &str) -> Vec<String> {
    let mut dependencies = Vec::new();
    for sym in ctx.store.table(symtab).scope().values() {
        let var = match ctx.store.symbol(*sym) {
            Symbol::Variable(var) => var,
            _ => continue,
        };
        if let Some(type_decl) = var.type_declaration {
            let dep = ctx.store.symbol_name(type_decl).to_string();
            if dep != name {
                dependencies.push(dep);
            }
        }
        match var.ty.type_get_past_pointer() {
            Ttype::EnumType { decl } | Ttype::UnionType { decl } => {
                if ctx.store.parent_symtab(*decl) != Some(symtab) {
                    dependencies.push(ctx.store.symbol_name(*decl).to_string());
                }
            }
            _ => {}
        }
    }
    dedup_preserving_order(dependencies)
}

pub(crate) fn derived_type_to_asr(ctx: &mut Context, dt: &ast::DerivedType) -> SResult<SymbolId> {
    let name = canonical_name(&dt.name);
    let parent = match &dt.extends {
        Some(parent_name) => {
            let sym = ctx
                .store
                .resolve_symbol(ctx.current_scope, parent_name)
                .ok_or_else(|| {
                    ctx.error(
                        ErrorKind::UnresolvedSymbol,
                        format!("parent type `{parent_name}` is not declared"),
                        dt.loc,
                    )
                })?;
            if !matches!(
                ctx.store.symbol(ctx.store.symbol_get_past_external(sym)),
                Symbol::Struct(_)
            ) {
                return Err(ctx.error(
                    ErrorKind::TypeShape,
                    format!("`{parent_name}` is not a derived type"),
                    dt.loc,
                ));
            }
            Some(sym)
        }
        None => None,
    };

    let symtab = ctx.store.new_symtab(Some(ctx.current_scope));
    let mut members = Vec::new();
    for member in &dt.members {
        for entity in &member.entities {
            members.push(canonical_name(&entity.name));
        }
    }
    with_scope(ctx, symtab, |ctx| {
        for member in &dt.members {
            decls::declaration_to_asr(ctx, member)?;
        }
        Ok(())
    })?;

    let alignment = match &dt.alignment {
        Some(expr) => {
            let lowered = lower_expr(ctx, expr)?;
            let folded = fold_constant(ctx.store, &lowered).ok_or_else(|| {
                ctx.error(
                    ErrorKind::TypeShape,
                    "alignment must evaluate to a constant expression",
                    dt.loc,
                )
            })?;
            match folded.expression() {
                Expr::IntegerConstant(c) if c.value > 0 && (c.value & (c.value - 1)) == 0 => {}
                _ => {
                    return Err(ctx.error(
                        ErrorKind::TypeShape,
                        "alignment must be a positive power of 2",
                        dt.loc,
                    ))
                }
            }
            Some(folded)
        }
        None => None,
    };

    let is_abstract = if dt.is_abstract {
        Abstract::True
    } else {
        Abstract::False
    };
    let struct_sym = ctx.store.alloc_symbol(Symbol::Struct(Struct {
        name: name.clone(),
        symtab,
        members,
        parent,
        dependencies: Vec::new(),
        alignment,
        is_abstract,
        is_c_interop: dt.bind_c,
        loc: dt.loc,
    }));
    ctx.store.set_owner(symtab, struct_sym);
    ctx.add_symbol_checked(&name, struct_sym, dt.loc)?;
    patch_deferred_struct_vars(ctx, &name, struct_sym);

    let dependencies = compute_struct_dependencies(ctx, symtab, &name);
    if let Symbol::Struct(s) = ctx.store.symbol_mut(struct_sym) {
        s.dependencies = dependencies;
    }

    // Accumulate the type-bound procedures; they are emitted into the
    // struct's table when the enclosing scope finalises, once every
    // referenced procedure exists.
    for binding in &dt.bindings {
        match binding {
            ast::TypeBoundItem::Procedure(proc) => {
                ctx.accumulators
                    .class_procedures
                    .entry(name.clone())
                    .or_default()
                    .push(MethodBinding {
                        binding_name: canonical_name(&proc.binding_name),
                        proc_name: canonical_name(
                            proc.proc_name.as_deref().unwrap_or(&proc.binding_name),
                        ),
                        deferred: proc.deferred,
                        nopass: proc.nopass,
                        pass_name: proc.pass_name.as_deref().map(canonical_name),
                        loc: proc.loc,
                    });
            }
            ast::TypeBoundItem::GenericBinding {
                generic_name,
                proc_names,
                loc: _,
            } => {
                ctx.accumulators
                    .generic_class_procedures
                    .entry(name.clone())
                    .or_default()
                    .entry(canonical_name(generic_name))
                    .or_default()
                    .extend(proc_names.iter().map(|n| canonical_name(n)));
            }
        }
    }
    Ok(struct_sym)
}

pub(crate) fn enum_to_asr(ctx: &mut Context, e: &ast::EnumDef) -> SResult<SymbolId> {
    let name = match &e.name {
        Some(name) => canonical_name(name),
        None => {
            ctx.nameless_enum_count += 1;
            format!("lcompilers__nameless_enum_{}", ctx.nameless_enum_count)
        }
    };
    let underlying = Ttype::Integer {
        kind: ctx.config.default_integer_kind,
    };
    let symtab = ctx.store.new_symtab(Some(ctx.current_scope));
    let mut members = Vec::new();
    let mut values: Vec<i64> = Vec::new();
    let mut next_value: i64 = 0;
    for (member_name, init) in &e.members {
        let member_name = canonical_name(member_name);
        let (symbolic_value, value) = match init {
            Some(expr) => {
                let lowered = with_scope(ctx, symtab, |ctx| lower_expr(ctx, expr))?;
                let folded = fold_constant(ctx.store, &lowered).and_then(|f| {
                    match f.expression() {
                        Expr::IntegerConstant(c) => Some((f.clone(), c.value)),
                        _ => None,
                    }
                });
                match folded {
                    Some((folded, v)) => {
                        next_value = v;
                        (lowered, folded)
                    }
                    None => {
                        return Err(ctx.error(
                            ErrorKind::TypeShape,
                            format!(
                                "enumerator `{member_name}` must have a constant integer value"
                            ),
                            expr.loc(),
                        ))
                    }
                }
            }
            None => {
                let constant =
                    IntegerConstant::new(next_value).to_texpr(underlying.clone(), e.loc);
                (constant.clone(), constant)
            }
        };
        values.push(next_value);
        next_value += 1;

        let mut dependencies = Vec::new();
        collect_expr_dependencies(ctx.store, &symbolic_value, &member_name, &mut dependencies);
        collect_expr_dependencies(ctx.store, &value, &member_name, &mut dependencies);
        let variable = Variable {
            name: member_name.clone(),
            parent_symtab: symtab,
            ty: underlying.clone(),
            symbolic_value: Some(symbolic_value),
            value: Some(value),
            intent: Intent::Local,
            storage: Storage::Parameter,
            access: Access::Public,
            presence: Presence::Required,
            dependencies: dedup_preserving_order(dependencies),
            type_declaration: None,
            loc: e.loc,
        };
        let sym = ctx.store.alloc_symbol(Symbol::Variable(variable));
        ctx.store
            .add_symbol(symtab, &member_name, sym)
            .map_err(|err| ctx.error(ErrorKind::DuplicateSymbol, err.to_string(), e.loc))?;
        members.push(member_name);
    }
    if members.is_empty() {
        return Err(ctx.error(
            ErrorKind::TypeShape,
            "an enum needs at least one enumerator",
            e.loc,
        ));
    }

    let mut distinct = values.clone();
    distinct.sort_unstable();
    distinct.dedup();
    let value_type = if distinct.len() != values.len() {
        EnumValueType::IntegerNotUnique
    } else if values.iter().min() == Some(&0)
        && (0..values.len() as i64).all(|v| values.contains(&v))
    {
        EnumValueType::IntegerConsecutiveFromZero
    } else {
        EnumValueType::IntegerUnique
    };

    let enum_sym = ctx.store.alloc_symbol(Symbol::Enum(Enum {
        name: name.clone(),
        symtab,
        ty: underlying,
        members,
        value_type,
        loc: e.loc,
    }));
    ctx.store.set_owner(symtab, enum_sym);
    ctx.add_symbol_checked(&name, enum_sym, e.loc)?;
    Ok(enum_sym)
}

pub(crate) fn union_to_asr(ctx: &mut Context, u: &ast::UnionDef) -> SResult<SymbolId> {
    let name = canonical_name(&u.name);
    let symtab = ctx.store.new_symtab(Some(ctx.current_scope));
    let mut members = Vec::new();
    for member in &u.members {
        for entity in &member.entities {
            members.push(canonical_name(&entity.name));
        }
    }
    with_scope(ctx, symtab, |ctx| {
        for member in &u.members {
            decls::declaration_to_asr(ctx, member)?;
        }
        Ok(())
    })?;
    let union_sym = ctx.store.alloc_symbol(Symbol::Union(Union {
        name: name.clone(),
        symtab,
        members,
        loc: u.loc,
    }));
    ctx.store.set_owner(symtab, union_sym);
    ctx.add_symbol_checked(&name, union_sym, u.loc)?;
    Ok(union_sym)
}

// Is `candidate` the struct itself or one of its ancestors?
fn is_struct_or_ancestor(ctx: &Context, struct_sym: SymbolId, candidate: SymbolId) -> bool {
    let candidate = ctx.store.symbol_get_past_external(candidate);
    let mut current = Some(struct_sym);
    while let Some(sym) = current {
        if sym == candidate {
            return true;
        }
        current = match ctx.store.symbol(sym) {
            Symbol::Struct(s) => s.parent.map(|p| ctx.store.symbol_get_past_external(p)),
            _ => None,
        };
    }
    false
}

/// Emit the accumulated type-bound procedure bindings of every struct in
/// the finalising scope.
pub(crate) fn add_class_procedures(ctx: &mut Context) -> SResult<()> {
    let class_procedures = std::mem::take(&mut ctx.accumulators.class_procedures);
    for (struct_name, bindings) in class_procedures {
        let struct_sym = match ctx.store.get_symbol(ctx.current_scope, &struct_name) {
            Some(sym) => sym,
            None => {
                let loc = bindings.first().map(|b| b.loc).unwrap_or_default();
                return Err(ctx.error(
                    ErrorKind::UnresolvedSymbol,
                    format!("type `{struct_name}` was never declared"),
                    loc,
                ));
            }
        };
        // An imported struct's bindings live with its defining module.
        if matches!(ctx.store.symbol(struct_sym), Symbol::ExternalSymbol(_)) {
            continue;
        }
        let (struct_table, struct_abstract) = match ctx.store.symbol(struct_sym) {
            Symbol::Struct(s) => (s.symtab, s.is_abstract),
            _ => continue,
        };
        for binding in bindings {
            let proc = match ctx.store.resolve_symbol(ctx.current_scope, &binding.proc_name) {
                Some(proc) => proc,
                None => {
                    return Err(ctx.error(
                        ErrorKind::UnresolvedSymbol,
                        format!(
                            "type-bound procedure `{}` of `{struct_name}` does not exist",
                            binding.proc_name
                        ),
                        binding.loc,
                    ))
                }
            };
            if binding.deferred && struct_abstract == Abstract::False {
                return Err(ctx.error(
                    ErrorKind::TypeShape,
                    format!(
                        "deferred binding `{}` is only allowed in an abstract type",
                        binding.binding_name
                    ),
                    binding.loc,
                ));
            }
            if !binding.deferred && !binding.nopass {
                check_pass_object(ctx, struct_sym, &struct_name, proc, &binding)?;
            }
            let method = StructMethodDeclaration {
                name: binding.binding_name.clone(),
                parent_symtab: struct_table,
                proc,
                proc_name: binding.proc_name.clone(),
                self_argument: binding.pass_name.clone(),
                is_deferred: binding.deferred,
                is_nopass: binding.nopass,
                loc: binding.loc,
            };
            let sym = ctx
                .store
                .alloc_symbol(Symbol::StructMethodDeclaration(method));
            ctx.store
                .add_symbol(struct_table, &binding.binding_name, sym)
                .map_err(|err| {
                    ctx.error(ErrorKind::DuplicateSymbol, err.to_string(), binding.loc)
                })?;
        }
    }
    Ok(())
}

// The pass-object dummy (the named one, or the first formal) must have a
// type compatible with the struct: the struct itself or an ancestor.
fn check_pass_object(
    ctx: &mut Context,
    struct_sym: SymbolId,
    struct_name: &str,
    proc: SymbolId,
    binding: &MethodBinding,
) -> SResult<()> {
    let function = match ctx.store.symbol(ctx.store.symbol_get_past_external(proc)) {
        Symbol::Function(f) => f,
        _ => {
            return Err(ctx.error(
                ErrorKind::TypeShape,
                format!("`{}` is not a procedure", binding.proc_name),
                binding.loc,
            ))
        }
    };
    let formal = match &binding.pass_name {
        Some(pass_name) => function.args.iter().find(|arg| match arg.expression() {
            Expr::Var(Var { sym }) => ctx.store.symbol_name(*sym) == pass_name,
            _ => false,
        }),
        None => function.args.first(),
    };
    let formal_ty: Option<Ttype> = formal.and_then(|arg| match arg.expression() {
        Expr::Var(Var { sym }) => match ctx.store.symbol(*sym) {
            Symbol::Variable(v) => Some(v.ty.clone()),
            _ => None,
        },
        _ => None,
    });
    let compatible = match formal_ty.as_ref().map(Ttype::extract_type) {
        Some(Ttype::StructType {
            decl: Some(decl), ..
        }) => is_struct_or_ancestor(ctx, struct_sym, *decl),
        _ => false,
    };
    if !compatible {
        return Err(ctx.error(
            ErrorKind::TypeShape,
            format!(
                "the pass-object argument of `{}` must be of type `{struct_name}` or an ancestor",
                binding.proc_name
            ),
            binding.loc,
        ));
    }
    Ok(())
}

/// Emit the accumulated `generic :: name => p, q` bindings as
/// GenericProcedure symbols inside each struct's table.
pub(crate) fn add_generic_class_procedures(ctx: &mut Context) -> SResult<()> {
    let generic_class_procedures =
        std::mem::take(&mut ctx.accumulators.generic_class_procedures);
    for (struct_name, generics) in generic_class_procedures {
        let struct_sym = match ctx.store.get_symbol(ctx.current_scope, &struct_name) {
            Some(sym) => sym,
            None => continue,
        };
        if matches!(ctx.store.symbol(struct_sym), Symbol::ExternalSymbol(_)) {
            continue;
        }
        let (struct_table, struct_loc) = match ctx.store.symbol(struct_sym) {
            Symbol::Struct(s) => (s.symtab, s.loc),
            _ => continue,
        };
        for (generic_name, candidates) in generics {
            let mut procs = Vec::new();
            for candidate in &candidates {
                match ctx.store.get_symbol(struct_table, candidate) {
                    Some(sym) => procs.push(sym),
                    None => {
                        return Err(ctx.error(
                            ErrorKind::UnresolvedSymbol,
                            format!(
                                "`{candidate}` does not exist inside type `{struct_name}`"
                            ),
                            struct_loc,
                        ))
                    }
                }
            }
            let generic = GenericProcedure {
                name: generic_name.clone(),
                parent_symtab: struct_table,
                procs,
                access: Access::Public,
                loc: struct_loc,
            };
            let sym = ctx.store.alloc_symbol(Symbol::GenericProcedure(generic));
            ctx.store
                .add_symbol(struct_table, &generic_name, sym)
                .map_err(|err| {
                    ctx.error(ErrorKind::DuplicateSymbol, err.to_string(), struct_loc)
                })?;
        }
    }
    Ok(())
}

/// Variables still waiting for a struct after the scope closed reference a
/// type that does not exist.
pub(crate) fn report_unresolved_struct_vars(ctx: &mut Context) -> SResult<()> {
    let deferred = std::mem::take(&mut ctx.accumulators.deferred_struct_vars);
    let mut first_error = None;
    for entry in deferred {
        let var_name = ctx.store.symbol_name(entry.var).to_string();
        let parent = ctx.store.symbol(entry.var).recorded_parent_symtab();
        let abort = ctx.error(
            ErrorKind::UnresolvedSymbol,
            format!(
                "derived type `{}` of variable `{var_name}` was never declared",
                entry.struct_name
            ),
            entry.loc,
        );
        // The partly-resolved variable never reaches the tree.
        if let Some(parent) = parent {
            ctx.store.remove_symbol(parent, &var_name);
        }
        first_error.get_or_insert(abort);
    }
    match first_error {
        Some(abort) if !ctx.config.continue_on_error => Err(abort),
        _ => Ok(()),
    }
}
