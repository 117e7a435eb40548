// Copyright contributors to the frt compiler project
// SPDX-License-Identifier: Apache-2.0

// Parametric polymorphism: requirements, templates and instantiation.
// Instantiation deep-copies the template's symbols into the instantiation
// scope through a duplicator that rewrites internal references from the
// source table to the fresh destination tables, substituting type
// parameters along the way.

use hashbrown::HashMap;
use tracing::debug;

use frt_asr::asr::{
    Access, Assignment, BinOp, BinaryOp, BlockCall, CallArg, CaseStmt, Cast, Expr, Function,
    FunctionCall, Intent, Presence, Require, Requirement, Select, Stmt, Storage,
    StringPhysicalCast, SubroutineCall, Symbol, TExpr, Template, Var, Variable,
};
use frt_asr::diagnostics::ErrorKind;
use frt_asr::location::Location;
use frt_asr::symbols::{canonical_name, SymbolId, SymtabId};
use frt_asr::types::{check_equal_type, FunctionType, Ttype};
use frt_syntax::ast;

use crate::body::{defined_op_aggregate_name, intrinsic_op_aggregate_name};
use crate::context::{dedup_preserving_order, with_scope, Context, SResult};
use crate::decls::{build_type, DeclAttrs};
use crate::loader::ModuleLoader;
use crate::resolver;

#[derive(Debug, Default)]
struct Substitution {
    types: HashMap<String, Ttype>,
    symbols: HashMap<String, SymbolId>,
}

fn substitute_type(subs: &Substitution, ty: &Ttype) -> Ttype {
    match ty {
        Ttype::TypeParameter { name } => subs
            .types
            .get(name)
            .cloned()
            .unwrap_or_else(|| ty.clone()),
        Ttype::Pointer(inner) => Ttype::Pointer(Box::new(substitute_type(subs, inner))),
        Ttype::Allocatable(inner) => Ttype::Allocatable(Box::new(substitute_type(subs, inner))),
        Ttype::Array(array) => {
            let mut array = array.clone();
            array.elem = substitute_type(subs, &array.elem);
            Ttype::Array(array)
        }
        Ttype::FunctionType(f) => {
            let mut f = f.clone();
            f.arg_types = f
                .arg_types
                .iter()
                .map(|t| substitute_type(subs, t))
                .collect();
            f.return_type = f.return_type.as_ref().map(|t| substitute_type(subs, t));
            Ttype::FunctionType(f)
        }
        _ => ty.clone(),
    }
}

pub(crate) fn requirement_to_asr(
    ctx: &mut Context,
    loader: &mut dyn ModuleLoader,
    r: &ast::Requirement,
) -> SResult<SymbolId> {
    let name = canonical_name(&r.name);
    debug!(requirement = %name, "resolving requirement");
    let params: Vec<String> = r.params.iter().map(|p| canonical_name(p)).collect();
    let saved_params = std::mem::replace(&mut ctx.current_template_params, params.clone());
    let saved_accumulators = std::mem::take(&mut ctx.accumulators);

    let symtab = ctx.store.new_symtab(Some(ctx.current_scope));
    let inner = with_scope(ctx, symtab, |ctx| {
        resolver::process_unit_decls(ctx, loader, &r.decls).map(|_| ())
    });

    ctx.current_template_params = saved_params;
    ctx.accumulators = saved_accumulators;
    inner?;

    let requirement = Requirement {
        name: name.clone(),
        symtab,
        args: params,
        requires: Vec::new(),
        loc: r.loc,
    };
    let id = ctx.store.alloc_symbol(Symbol::Requirement(requirement));
    ctx.store.set_owner(symtab, id);
    ctx.add_symbol_checked(&name, id, r.loc)?;
    Ok(id)
}

pub(crate) fn template_to_asr(
    ctx: &mut Context,
    loader: &mut dyn ModuleLoader,
    t: &ast::Template,
) -> SResult<SymbolId> {
    let name = canonical_name(&t.name);
    debug!(template = %name, "resolving template");
    let params: Vec<String> = t.params.iter().map(|p| canonical_name(p)).collect();

    // Each require clause names a visible requirement with the right
    // number of arguments.
    let mut requires = Vec::new();
    for clause in &t.requires {
        let requirement_name = canonical_name(&clause.name);
        let sym = ctx
            .store
            .resolve_symbol(ctx.current_scope, &requirement_name);
        let arity = sym.and_then(|sym| {
            match ctx.store.symbol(ctx.store.symbol_get_past_external(sym)) {
                Symbol::Requirement(req) => Some(req.args.len()),
                _ => None,
            }
        });
        match arity {
            Some(arity) if arity == clause.args.len() => {}
            Some(arity) => {
                return Err(ctx.error(
                    ErrorKind::TemplateMisuse,
                    format!(
                        "requirement `{requirement_name}` takes {arity} parameters, {} given",
                        clause.args.len()
                    ),
                    clause.loc,
                ))
            }
            None => {
                return Err(ctx.error(
                    ErrorKind::TemplateMisuse,
                    format!("`{requirement_name}` does not name a requirement"),
                    clause.loc,
                ))
            }
        }
        requires.push(Require {
            name: requirement_name,
            args: clause.args.iter().map(|a| canonical_name(a)).collect(),
        });
    }

    let saved_params = std::mem::replace(&mut ctx.current_template_params, params.clone());
    let saved_accumulators = std::mem::take(&mut ctx.accumulators);
    let symtab = ctx.store.new_symtab(Some(ctx.current_scope));
    let inner = with_scope(ctx, symtab, |ctx| {
        resolver::process_unit_decls(ctx, loader, &t.decls)?;
        let mut pending = Vec::new();
        for procedure in &t.contains {
            resolver::procedure_to_asr(
                ctx,
                loader,
                procedure,
                frt_asr::types::Deftype::Implementation,
                &mut pending,
            )?;
        }
        resolver::lower_pending_bodies(ctx, pending)
    });
    ctx.current_template_params = saved_params;
    ctx.accumulators = saved_accumulators;
    inner?;

    let template = Template {
        name: name.clone(),
        symtab,
        args: params,
        requires,
        loc: t.loc,
    };
    let id = ctx.store.alloc_symbol(Symbol::Template(template));
    ctx.store.set_owner(symtab, id);
    ctx.add_symbol_checked(&name, id, t.loc)?;
    Ok(id)
}

pub(crate) fn instantiate_to_asr(
    ctx: &mut Context,
    _loader: &mut dyn ModuleLoader,
    inst: &ast::Instantiate,
) -> SResult<()> {
    let template_name = canonical_name(&inst.template);
    debug!(template = %template_name, "instantiating");
    let template_sym = ctx
        .store
        .resolve_symbol(ctx.current_scope, &template_name)
        .ok_or_else(|| {
            ctx.error(
                ErrorKind::UnresolvedSymbol,
                format!("template `{template_name}` is not visible in this scope"),
                inst.loc,
            )
        })?;
    let template = match ctx
        .store
        .symbol(ctx.store.symbol_get_past_external(template_sym))
    {
        Symbol::Template(t) => t.clone(),
        _ => {
            return Err(ctx.error(
                ErrorKind::TemplateMisuse,
                format!("`{template_name}` is not a template"),
                inst.loc,
            ))
        }
    };
    if template.args.len() != inst.args.len() {
        return Err(ctx.error(
            ErrorKind::TemplateMisuse,
            format!(
                "template `{template_name}` takes {} parameters, {} given",
                template.args.len(),
                inst.args.len()
            ),
            inst.loc,
        ));
    }

    let mut subs = Substitution::default();
    for (param, arg) in template.args.iter().zip(&inst.args) {
        match arg {
            ast::TemplateArg::Type(spec) => {
                let resolved = build_type(ctx, spec, &DeclAttrs::default(), None, inst.loc)?;
                subs.types.insert(param.clone(), resolved.ty);
            }
            ast::TemplateArg::Symbol(name) => {
                let sym = ctx
                    .store
                    .resolve_symbol(ctx.current_scope, name)
                    .ok_or_else(|| {
                        ctx.error(
                            ErrorKind::UnresolvedSymbol,
                            format!("`{name}` is not visible in this scope"),
                            inst.loc,
                        )
                    })?;
                check_function_restriction(ctx, &template, &subs, param, sym, inst.loc)?;
                subs.symbols.insert(param.clone(), sym);
            }
            ast::TemplateArg::Operator(spelling) => {
                let synthesised =
                    synthesise_operator_function(ctx, &template, &subs, param, spelling, inst.loc)?;
                subs.symbols.insert(param.clone(), synthesised);
            }
        }
    }

    // Fresh, non-generic copies of the template's procedures.
    let targets: Vec<(String, String)> = if inst.renames.is_empty() {
        ctx.store
            .table(template.symtab)
            .scope()
            .iter()
            .filter(|(name, sym)| {
                !template.args.contains(name)
                    && matches!(ctx.store.symbol(**sym), Symbol::Function(_))
            })
            .map(|(name, _)| (name.clone(), name.clone()))
            .collect()
    } else {
        inst.renames
            .iter()
            .map(|(local, remote)| (canonical_name(local), canonical_name(remote)))
            .collect()
    };
    for (local, remote) in targets {
        let sym = ctx
            .store
            .get_symbol(template.symtab, &remote)
            .ok_or_else(|| {
                ctx.error(
                    ErrorKind::TemplateMisuse,
                    format!("`{remote}` is not declared by template `{template_name}`"),
                    inst.loc,
                )
            })?;
        duplicate_function(ctx, template.symtab, sym, &subs, &local, inst.loc)?;
    }
    Ok(())
}

// A function bound to a template parameter must satisfy the parameter's
// declared signature up to type substitution.
fn check_function_restriction(
    ctx: &mut Context,
    template: &Template,
    subs: &Substitution,
    param: &str,
    concrete: SymbolId,
    loc: Location,
) -> SResult<()> {
    let declared = match ctx.store.get_symbol(template.symtab, param) {
        Some(sym) => match ctx.store.symbol(sym) {
            Symbol::Function(f) => Some(f.signature.clone()),
            _ => None,
        },
        None => None,
    };
    let Some(Ttype::FunctionType(declared)) = declared else {
        return Ok(()); // an unconstrained symbol parameter
    };
    let concrete_signature = match ctx
        .store
        .symbol(ctx.store.symbol_get_past_external(concrete))
    {
        Symbol::Function(f) => f.signature.clone(),
        _ => {
            return Err(ctx.error(
                ErrorKind::TemplateMisuse,
                format!("template parameter `{param}` must be bound to a procedure"),
                loc,
            ))
        }
    };
    let Ttype::FunctionType(concrete_signature) = concrete_signature else {
        return Err(ctx.error(
            ErrorKind::Internal,
            "function without a function type signature",
            loc,
        ));
    };
    if declared.arg_types.len() != concrete_signature.arg_types.len() {
        return Err(ctx.error(
            ErrorKind::TemplateMisuse,
            format!(
                "procedure bound to `{param}` takes {} arguments, {} required",
                concrete_signature.arg_types.len(),
                declared.arg_types.len()
            ),
            loc,
        ));
    }
    for (declared_ty, concrete_ty) in declared
        .arg_types
        .iter()
        .zip(&concrete_signature.arg_types)
    {
        let declared_ty = substitute_type(subs, declared_ty);
        if !matches!(declared_ty, Ttype::TypeParameter { .. })
            && !check_equal_type(&declared_ty, concrete_ty)
        {
            return Err(ctx.error(
                ErrorKind::TemplateMisuse,
                format!("procedure bound to `{param}` does not satisfy its restriction"),
                loc,
            ));
        }
    }
    Ok(())
}

// An intrinsic operator bound to a template parameter becomes a
// synthesised function that applies the operator, registered as a
// constituent of the matching operator aggregate in the enclosing scope.
fn synthesise_operator_function(
    ctx: &mut Context,
    template: &Template,
    subs: &Substitution,
    param: &str,
    spelling: &str,
    loc: Location,
) -> SResult<SymbolId> {
    let declared = match ctx.store.get_symbol(template.symtab, param) {
        Some(sym) => match ctx.store.symbol(sym) {
            Symbol::Function(f) => match &f.signature {
                Ttype::FunctionType(t) => Some((t.arg_types.clone(), t.return_type.clone())),
                _ => None,
            },
            _ => None,
        },
        None => None,
    };
    let Some((declared_args, declared_return)) = declared else {
        return Err(ctx.error(
            ErrorKind::TemplateMisuse,
            format!("operator parameter `{param}` has no declared signature in the template"),
            loc,
        ));
    };
    if declared_args.len() != 2 {
        return Err(ctx.error(
            ErrorKind::TemplateMisuse,
            format!("operator parameter `{param}` must take two operands"),
            loc,
        ));
    }
    let arg_types: Vec<Ttype> = declared_args
        .iter()
        .map(|t| substitute_type(subs, t))
        .collect();
    let return_type = declared_return
        .as_ref()
        .map(|t| substitute_type(subs, t))
        .unwrap_or_else(|| arg_types[0].clone());
    let op = match spelling {
        "+" => BinOp::Add,
        "-" => BinOp::Sub,
        "*" => BinOp::Mul,
        "/" => BinOp::Div,
        "==" => BinOp::Eq,
        "/=" => BinOp::NotEq,
        "<" => BinOp::Lt,
        "<=" => BinOp::LtE,
        ">" => BinOp::Gt,
        ">=" => BinOp::GtE,
        _ => {
            return Err(ctx.error(
                ErrorKind::TemplateMisuse,
                format!("`{spelling}` is not an intrinsic operator"),
                loc,
            ))
        }
    };

    let function_name = format!("{param}_{}", arg_types[0].type_code());
    if let Some(existing) = ctx.store.get_symbol(ctx.current_scope, &function_name) {
        // A previous instantiation with the same substitution already
        // produced this function.
        if matches!(ctx.store.symbol(existing), Symbol::Function(_)) {
            return Ok(existing);
        }
    }

    let symtab = ctx.store.new_symtab(Some(ctx.current_scope));
    let mut formals = Vec::new();
    for (formal_name, ty) in [("a", &arg_types[0]), ("b", &arg_types[1])] {
        let variable = Variable {
            name: formal_name.to_string(),
            parent_symtab: symtab,
            ty: ty.clone(),
            symbolic_value: None,
            value: None,
            intent: Intent::In,
            storage: Storage::Default,
            access: Access::Public,
            presence: Presence::Required,
            dependencies: Vec::new(),
            type_declaration: None,
            loc,
        };
        let sym = ctx.store.alloc_symbol(Symbol::Variable(variable));
        ctx.store
            .add_symbol(symtab, formal_name, sym)
            .map_err(|e| ctx.error(ErrorKind::Internal, e.to_string(), loc))?;
        formals.push(Var::new(sym).to_texpr(ty.clone(), loc));
    }
    let ret_var = Variable {
        name: "ret".to_string(),
        parent_symtab: symtab,
        ty: return_type.clone(),
        symbolic_value: None,
        value: None,
        intent: Intent::ReturnVar,
        storage: Storage::Default,
        access: Access::Public,
        presence: Presence::Required,
        dependencies: Vec::new(),
        type_declaration: None,
        loc,
    };
    let ret_sym = ctx.store.alloc_symbol(Symbol::Variable(ret_var));
    ctx.store
        .add_symbol(symtab, "ret", ret_sym)
        .map_err(|e| ctx.error(ErrorKind::Internal, e.to_string(), loc))?;
    let ret_expr = Var::new(ret_sym).to_texpr(return_type.clone(), loc);

    let body = vec![Assignment {
        target: ret_expr.clone(),
        value: BinaryOp::new(op, formals[0].clone(), formals[1].clone())
            .to_texpr(return_type.clone(), loc),
        realloc_lhs: false,
        loc,
    }
    .to_stmt()];
    let signature = FunctionType::new(arg_types, Some(return_type)).to_ttype();
    let function = Function {
        name: function_name.clone(),
        symtab,
        args: formals,
        body,
        return_var: Some(ret_expr),
        signature,
        dependencies: Vec::new(),
        access: Access::Public,
        loc,
    };
    let id = ctx.store.alloc_symbol(Symbol::Function(function));
    ctx.store.set_owner(symtab, id);
    ctx.add_symbol_checked(&function_name, id, loc)?;

    // Register the synthesised function with the operator aggregate.
    let aggregate_name = match intrinsic_op_aggregate_name(spelling) {
        Some(name) => name.to_string(),
        None => defined_op_aggregate_name(spelling),
    };
    let mut procs = match ctx.store.get_symbol(ctx.current_scope, &aggregate_name) {
        Some(existing) => match ctx.store.symbol(existing) {
            Symbol::CustomOperator(c) => c.procs.clone(),
            _ => Vec::new(),
        },
        None => Vec::new(),
    };
    if !procs.contains(&id) {
        procs.push(id);
    }
    let operator = frt_asr::asr::CustomOperator {
        name: aggregate_name.clone(),
        parent_symtab: ctx.current_scope,
        procs,
        access: Access::Public,
        loc,
    };
    let op_id = ctx.store.alloc_symbol(Symbol::CustomOperator(operator));
    ctx.store
        .add_or_overwrite_symbol(ctx.current_scope, &aggregate_name, op_id)
        .map_err(|e| ctx.error(ErrorKind::LexicalName, e.to_string(), loc))?;
    Ok(id)
}

// ------------------------------------------------------------------
// The duplicator.

fn rewrite_texpr(expr: &TExpr, id_map: &HashMap<SymbolId, SymbolId>, subs: &Substitution) -> TExpr {
    let ty = substitute_type(subs, expr.get_type());
    let loc = expr.loc();
    let rewritten = match expr.expression() {
        Expr::Var(Var { sym }) => Expr::Var(Var::new(*id_map.get(sym).unwrap_or(sym))),
        Expr::FunctionCall(call) => {
            let name = *id_map.get(&call.name).unwrap_or(&call.name);
            let args = call
                .args
                .iter()
                .map(|arg| CallArg {
                    value: arg.value.as_ref().map(|v| rewrite_texpr(v, id_map, subs)),
                })
                .collect();
            Expr::FunctionCall(Box::new(FunctionCall::new(name, args)))
        }
        Expr::BinaryOp(b) => Expr::BinaryOp(Box::new(BinaryOp::new(
            b.op,
            rewrite_texpr(&b.left, id_map, subs),
            rewrite_texpr(&b.right, id_map, subs),
        ))),
        Expr::Cast(c) => Expr::Cast(Box::new(Cast::new(rewrite_texpr(&c.arg, id_map, subs)))),
        Expr::StringPhysicalCast(c) => Expr::StringPhysicalCast(Box::new(StringPhysicalCast {
            arg: rewrite_texpr(&c.arg, id_map, subs),
            old: c.old,
            new: c.new,
        })),
        constant => constant.clone(),
    };
    TExpr::new(rewritten, ty, loc)
}

fn rewrite_stmt(stmt: &Stmt, id_map: &HashMap<SymbolId, SymbolId>, subs: &Substitution) -> Stmt {
    match stmt {
        Stmt::Assignment(a) => Assignment {
            target: rewrite_texpr(&a.target, id_map, subs),
            value: rewrite_texpr(&a.value, id_map, subs),
            realloc_lhs: a.realloc_lhs,
            loc: a.loc,
        }
        .to_stmt(),
        Stmt::SubroutineCall(call) => SubroutineCall {
            name: *id_map.get(&call.name).unwrap_or(&call.name),
            args: call
                .args
                .iter()
                .map(|arg| CallArg {
                    value: arg.value.as_ref().map(|v| rewrite_texpr(v, id_map, subs)),
                })
                .collect(),
            loc: call.loc,
        }
        .to_stmt(),
        Stmt::Select(select) => Select {
            test: rewrite_texpr(&select.test, id_map, subs),
            cases: select
                .cases
                .iter()
                .map(|case| CaseStmt {
                    values: case
                        .values
                        .iter()
                        .map(|v| rewrite_texpr(v, id_map, subs))
                        .collect(),
                    body: case
                        .body
                        .iter()
                        .map(|s| rewrite_stmt(s, id_map, subs))
                        .collect(),
                    fall_through: case.fall_through,
                })
                .collect(),
            default: select
                .default
                .iter()
                .map(|s| rewrite_stmt(s, id_map, subs))
                .collect(),
            enable_fall_through: select.enable_fall_through,
            loc: select.loc,
        }
        .to_stmt(),
        Stmt::BlockCall(call) => BlockCall {
            block: *id_map.get(&call.block).unwrap_or(&call.block),
            loc: call.loc,
        }
        .to_stmt(),
        Stmt::AssociateBlockCall(call) => frt_asr::asr::AssociateBlockCall {
            block: *id_map.get(&call.block).unwrap_or(&call.block),
            loc: call.loc,
        }
        .to_stmt(),
        Stmt::Return(r) => Stmt::Return(r.clone()),
        Stmt::ExprStmt(expr) => Stmt::ExprStmt(rewrite_texpr(expr, id_map, subs)),
    }
}

// Re-derive the dependency list of a freshly copied function from its
// rewritten body, against its new home scope.
fn collect_call_dependencies(
    ctx: &Context,
    symtab: SymtabId,
    body: &[Stmt],
    out: &mut Vec<String>,
) {
    fn walk_expr(ctx: &Context, symtab: SymtabId, expr: &TExpr, out: &mut Vec<String>) {
        match expr.expression() {
            Expr::FunctionCall(call) => {
                note_call(ctx, symtab, call.name, out);
                for arg in &call.args {
                    if let Some(value) = &arg.value {
                        walk_expr(ctx, symtab, value, out);
                    }
                }
            }
            Expr::BinaryOp(b) => {
                walk_expr(ctx, symtab, &b.left, out);
                walk_expr(ctx, symtab, &b.right, out);
            }
            Expr::Cast(c) => walk_expr(ctx, symtab, &c.arg, out),
            Expr::StringPhysicalCast(c) => walk_expr(ctx, symtab, &c.arg, out),
            _ => {}
        }
    }
    fn note_call(ctx: &Context, symtab: SymtabId, name: SymbolId, out: &mut Vec<String>) {
        if matches!(
            ctx.store.symbol(name),
            Symbol::ExternalSymbol(_) | Symbol::Variable(_)
        ) {
            return;
        }
        if ctx.store.parent_symtab(name) != Some(symtab) {
            let dep = ctx.store.symbol_name(name).to_string();
            if !out.contains(&dep) {
                out.push(dep);
            }
        }
    }
    for stmt in body {
        match stmt {
            Stmt::Assignment(a) => {
                walk_expr(ctx, symtab, &a.target, out);
                walk_expr(ctx, symtab, &a.value, out);
            }
            Stmt::SubroutineCall(call) => {
                note_call(ctx, symtab, call.name, out);
                for arg in &call.args {
                    if let Some(value) = &arg.value {
                        walk_expr(ctx, symtab, value, out);
                    }
                }
            }
            Stmt::Select(select) => {
                walk_expr(ctx, symtab, &select.test, out);
                for case in &select.cases {
                    for value in &case.values {
                        walk_expr(ctx, symtab, value, out);
                    }
                    collect_call_dependencies(ctx, symtab, &case.body, out);
                }
                collect_call_dependencies(ctx, symtab, &select.default, out);
            }
            Stmt::ExprStmt(expr) => walk_expr(ctx, symtab, expr, out),
            Stmt::BlockCall(_) | Stmt::AssociateBlockCall(_) | Stmt::Return(_) => {}
        }
    }
}

// Deep-copy one template function into the current scope, substituting
// type parameters and rewriting symbol references from the template table
// to the fresh copy.
fn duplicate_function(
    ctx: &mut Context,
    template_table: SymtabId,
    src: SymbolId,
    subs: &Substitution,
    new_name: &str,
    loc: Location,
) -> SResult<SymbolId> {
    let source = match ctx.store.symbol(src) {
        Symbol::Function(f) => f.clone(),
        _ => {
            return Err(ctx.error(
                ErrorKind::TemplateMisuse,
                format!("only procedures can be instantiated, `{new_name}` is not one"),
                loc,
            ))
        }
    };
    let symtab = ctx.store.new_symtab(Some(ctx.current_scope));
    let mut id_map: HashMap<SymbolId, SymbolId> = HashMap::new();

    // Template parameters bound to concrete symbols: references to the
    // parameter placeholder are rewritten to the bound symbol.
    for (param, bound) in &subs.symbols {
        if let Some(placeholder) = ctx.store.get_symbol(template_table, param) {
            id_map.insert(placeholder, *bound);
        }
    }

    // First pass: copy every local variable so the id map is complete.
    let locals: Vec<(String, SymbolId)> = ctx
        .store
        .table(source.symtab)
        .scope()
        .iter()
        .map(|(name, sym)| (name.clone(), *sym))
        .collect();
    for (local_name, local_sym) in &locals {
        if let Symbol::Variable(v) = ctx.store.symbol(*local_sym) {
            let mut copy = v.clone();
            copy.parent_symtab = symtab;
            copy.ty = substitute_type(subs, &copy.ty);
            let new_sym = ctx.store.alloc_symbol(Symbol::Variable(copy));
            ctx.store
                .add_symbol(symtab, local_name, new_sym)
                .map_err(|e| ctx.error(ErrorKind::Internal, e.to_string(), loc))?;
            id_map.insert(*local_sym, new_sym);
        }
    }
    // Second pass: rewrite the initializer expressions of the copies.
    for (_, local_sym) in &locals {
        let Some(new_sym) = id_map.get(local_sym).copied() else {
            continue;
        };
        let (symbolic_value, value) = match ctx.store.symbol(new_sym) {
            Symbol::Variable(v) => (v.symbolic_value.clone(), v.value.clone()),
            _ => continue,
        };
        if let Symbol::Variable(v) = ctx.store.symbol_mut(new_sym) {
            v.symbolic_value = symbolic_value.map(|e| rewrite_texpr(&e, &id_map, subs));
            v.value = value.map(|e| rewrite_texpr(&e, &id_map, subs));
        }
    }

    let args: Vec<TExpr> = source
        .args
        .iter()
        .map(|arg| rewrite_texpr(arg, &id_map, subs))
        .collect();
    let return_var = source
        .return_var
        .as_ref()
        .map(|ret| rewrite_texpr(ret, &id_map, subs));
    let body: Vec<Stmt> = source
        .body
        .iter()
        .map(|stmt| rewrite_stmt(stmt, &id_map, subs))
        .collect();
    let signature = substitute_type(subs, &source.signature);

    let mut dependencies = Vec::new();
    collect_call_dependencies(ctx, symtab, &body, &mut dependencies);
    let function = Function {
        name: canonical_name(new_name),
        symtab,
        args,
        body,
        return_var,
        signature,
        dependencies: dedup_preserving_order(dependencies),
        access: Access::Public,
        loc,
    };
    let id = ctx.store.alloc_symbol(Symbol::Function(function));
    ctx.store.set_owner(symtab, id);
    ctx.add_symbol_checked(&canonical_name(new_name), id, loc)?;
    Ok(id)
}
