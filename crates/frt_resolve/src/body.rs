// Copyright contributors to the frt compiler project
// SPDX-License-Identifier: Apache-2.0

// Lowering of the expressions and statements the declaration phase owns:
// default initializers, array bounds, string lengths, and the bodies of
// programs and procedures as far as dependency recording and the verifier
// need them. Everything else about statement semantics belongs to the
// later body pass.

use frt_asr::asr::{
    is_value_constant, Assignment, BinOp, BinaryOp, BlockCall, CallArg, Cast, CaseStmt, Expr,
    FunctionCall, Intent, IntegerConstant, LogicalConstant, RealConstant, Return, Select, Stmt,
    Storage, StringConstant, SubroutineCall, Symbol, TExpr, Var,
};
use frt_asr::diagnostics::ErrorKind;
use frt_asr::location::Location;
use frt_asr::symbols::{SymbolId, SymbolStore};
use frt_asr::types::{self, LengthKind, StringPhysical, StringType, Ttype};
use frt_syntax::ast;

use crate::context::{Context, SResult};

/// The reserved aggregate name an intrinsic operator overload is stored
/// under, e.g. `+` -> `~add`.
pub(crate) fn intrinsic_op_aggregate_name(spelling: &str) -> Option<&'static str> {
    Some(match spelling {
        "+" => "~add",
        "-" => "~sub",
        "*" => "~mul",
        "/" => "~div",
        "==" => "~eq",
        "/=" => "~neq",
        "<" => "~lt",
        "<=" => "~lte",
        ">" => "~gt",
        ">=" => "~gte",
        _ => return None,
    })
}

/// A user-defined operator `.op.` is canonicalised to `~~op~~` in the
/// symbol table so it can never clash with an identifier.
pub(crate) fn defined_op_aggregate_name(name: &str) -> String {
    format!("~~{}~~", name.to_ascii_lowercase())
}

fn binop_kind(op: ast::BinOpKind) -> BinOp {
    use ast::BinOpKind as K;
    match op {
        K::Add => BinOp::Add,
        K::Sub => BinOp::Sub,
        K::Mul => BinOp::Mul,
        K::Div => BinOp::Div,
        K::Eq => BinOp::Eq,
        K::NotEq => BinOp::NotEq,
        K::Lt => BinOp::Lt,
        K::LtE => BinOp::LtE,
        K::Gt => BinOp::Gt,
        K::GtE => BinOp::GtE,
    }
}

/// The Function behind a call target, looking through one external hop.
pub(crate) fn function_of(store: &SymbolStore, sym: SymbolId) -> Option<&frt_asr::asr::Function> {
    match store.symbol(store.symbol_get_past_external(sym)) {
        Symbol::Function(f) => Some(f),
        Symbol::StructMethodDeclaration(m) => match store.symbol(store.symbol_get_past_external(m.proc)) {
            Symbol::Function(f) => Some(f),
            _ => None,
        },
        _ => None,
    }
}

fn value_type_of(store: &SymbolStore, sym: SymbolId) -> Option<Ttype> {
    match store.symbol(store.symbol_get_past_external(sym)) {
        Symbol::Variable(v) => Some(v.ty.clone()),
        Symbol::Function(f) => Some(f.signature.clone()),
        Symbol::Enum(e) => Some(e.ty.clone()),
        _ => None,
    }
}

pub(crate) fn lower_expr(ctx: &mut Context, expr: &ast::Expr) -> SResult<TExpr> {
    match expr {
        ast::Expr::Int { value, loc } => Ok(IntegerConstant::new(*value).to_texpr(
            Ttype::Integer {
                kind: ctx.config.default_integer_kind,
            },
            *loc,
        )),
        ast::Expr::Real { value, loc } => {
            Ok(RealConstant::new(value).to_texpr(Ttype::Real { kind: 4 }, *loc))
        }
        ast::Expr::Logical { value, loc } => {
            Ok(LogicalConstant::new(*value).to_texpr(Ttype::Logical { kind: 4 }, *loc))
        }
        ast::Expr::Str { value, loc } => {
            let len = IntegerConstant::new(value.chars().count() as i64).to_texpr(
                Ttype::Integer {
                    kind: ctx.config.default_integer_kind,
                },
                *loc,
            );
            let ty = Ttype::String(Box::new(StringType {
                len: Some(len),
                len_kind: LengthKind::ExpressionLength,
                physical: StringPhysical::Descriptor,
            }));
            Ok(StringConstant::new(value).to_texpr(ty, *loc))
        }
        ast::Expr::Name { name, loc } => lower_name(ctx, name, *loc),
        ast::Expr::BinOp {
            op,
            left,
            right,
            loc,
        } => {
            let left = lower_expr(ctx, left)?;
            let right = lower_expr(ctx, right)?;
            lower_binop(ctx, *op, left, right, *loc)
        }
        ast::Expr::DefinedOp {
            name,
            left,
            right,
            loc,
        } => {
            let left = lower_expr(ctx, left)?;
            let right = lower_expr(ctx, right)?;
            lower_operator_call(ctx, &defined_op_aggregate_name(name), left, right, *loc)
        }
        ast::Expr::Call { name, args, loc } => {
            let call = lower_call(ctx, name, args, *loc)?;
            match call {
                LoweredCall::Function(texpr) => Ok(texpr),
                LoweredCall::Subroutine(_) => Err(ctx.error(
                    ErrorKind::TypeShape,
                    format!("`{name}` does not return a value and cannot appear in an expression"),
                    *loc,
                )),
            }
        }
        ast::Expr::MethodCall {
            base,
            name,
            args,
            loc,
        } => match lower_method_call(ctx, base, name, args, *loc)? {
            LoweredCall::Function(texpr) => Ok(texpr),
            LoweredCall::Subroutine(_) => Err(ctx.error(
                ErrorKind::TypeShape,
                format!("`{name}` does not return a value and cannot appear in an expression"),
                *loc,
            )),
        },
    }
}

fn lower_name(ctx: &mut Context, name: &str, loc: Location) -> SResult<TExpr> {
    if let Some(sym) = ctx.store.resolve_symbol(ctx.current_scope, name) {
        let ty = match value_type_of(ctx.store, sym) {
            Some(ty) => ty,
            None => {
                return Err(ctx.error(
                    ErrorKind::UnresolvedSymbol,
                    format!("`{name}` does not name a value"),
                    loc,
                ))
            }
        };
        ctx.record_external_reference(sym);
        return Ok(Var::new(sym).to_texpr(ty, loc));
    }
    // Undeclared names fall back to the implicit dictionary, declaring the
    // variable on first reference.
    implicit_declare(ctx, name, loc).map(|(sym, ty)| Var::new(sym).to_texpr(ty, loc))
}

pub(crate) fn implicit_declare(
    ctx: &mut Context,
    name: &str,
    loc: Location,
) -> SResult<(SymbolId, Ttype)> {
    let implicit_type = ctx
        .implicit_dictionary()
        .and_then(|dict| dict.type_of(name))
        .cloned();
    let ty = match implicit_type {
        Some(ty) if ctx.config.implicit_typing => ty,
        _ => {
            return Err(ctx.error(
                ErrorKind::UnresolvedSymbol,
                format!("`{name}` is not declared"),
                loc,
            ))
        }
    };
    let variable = frt_asr::asr::Variable {
        name: frt_asr::symbols::canonical_name(name),
        parent_symtab: ctx.current_scope,
        ty: ty.clone(),
        symbolic_value: None,
        value: None,
        intent: Intent::Local,
        storage: Storage::Default,
        access: frt_asr::asr::Access::Public,
        presence: frt_asr::asr::Presence::Required,
        dependencies: Vec::new(),
        type_declaration: None,
        loc,
    };
    let sym = ctx.store.alloc_symbol(Symbol::Variable(variable));
    ctx.add_symbol_checked(name, sym, loc)?;
    Ok((sym, ty))
}

fn lower_binop(
    ctx: &mut Context,
    op: ast::BinOpKind,
    left: TExpr,
    right: TExpr,
    loc: Location,
) -> SResult<TExpr> {
    let lt = left.get_type().clone();
    let rt = right.get_type().clone();
    let promoted = types::promote_types(&lt, &rt);
    let promoted = match promoted {
        Some(promoted) => promoted,
        None => {
            // No intrinsic meaning; try an operator overload aggregate.
            let aggregate = intrinsic_op_aggregate_name(op.spelling())
                .expect("every binary operator has an aggregate name");
            return lower_operator_call(ctx, aggregate, left, right, loc);
        }
    };
    let new_left = if types::check_equal_type(&lt, &promoted) {
        left
    } else {
        let lloc = left.loc();
        Cast::new(left).to_texpr(promoted.clone(), lloc)
    };
    let new_right = if types::check_equal_type(&rt, &promoted) {
        right
    } else {
        let rloc = right.loc();
        Cast::new(right).to_texpr(promoted.clone(), rloc)
    };
    let result_type = match op {
        ast::BinOpKind::Eq
        | ast::BinOpKind::NotEq
        | ast::BinOpKind::Lt
        | ast::BinOpKind::LtE
        | ast::BinOpKind::Gt
        | ast::BinOpKind::GtE => Ttype::Logical { kind: 4 },
        _ => promoted,
    };
    Ok(BinaryOp::new(binop_kind(op), new_left, new_right).to_texpr(result_type, loc))
}

// Rewrite `left op right` as a call of a constituent of the operator's
// aggregate symbol.
fn lower_operator_call(
    ctx: &mut Context,
    aggregate_name: &str,
    left: TExpr,
    right: TExpr,
    loc: Location,
) -> SResult<TExpr> {
    let aggregate = match ctx.store.resolve_symbol(ctx.current_scope, aggregate_name) {
        Some(sym) => sym,
        None => {
            return Err(ctx.error(
                ErrorKind::UnresolvedSymbol,
                format!("no operator overload `{aggregate_name}` is visible in this scope"),
                loc,
            ))
        }
    };
    let procs = match ctx.store.symbol(ctx.store.symbol_get_past_external(aggregate)) {
        Symbol::CustomOperator(c) => c.procs.clone(),
        _ => {
            return Err(ctx.error(
                ErrorKind::UnresolvedSymbol,
                format!("`{aggregate_name}` is not an operator aggregate"),
                loc,
            ))
        }
    };
    let chosen = procs.iter().copied().find(|proc| {
        function_of(ctx.store, *proc)
            .map(|f| f.args.len() == 2)
            .unwrap_or(false)
    });
    let chosen = match chosen {
        Some(chosen) => chosen,
        None => {
            return Err(ctx.error(
                ErrorKind::ArityMismatch,
                format!("no constituent of `{aggregate_name}` accepts two operands"),
                loc,
            ))
        }
    };
    let return_type = function_of(ctx.store, chosen)
        .and_then(|f| match &f.signature {
            Ttype::FunctionType(t) => t.return_type.clone(),
            _ => None,
        })
        .ok_or_else(|| {
            ctx.error(
                ErrorKind::TypeShape,
                format!("operator procedure of `{aggregate_name}` must return a value"),
                loc,
            )
        })?;
    ctx.record_function_dependency(chosen);
    ctx.record_external_reference(chosen);
    let args = vec![
        CallArg { value: Some(left) },
        CallArg {
            value: Some(right),
        },
    ];
    Ok(FunctionCall::new(chosen, args).to_texpr(return_type, loc))
}

pub(crate) enum LoweredCall {
    Function(TExpr),
    Subroutine(Stmt),
}

// Pad the provided arguments out to the formal count, requiring the
// skipped formals to be optional.
fn lower_call_args(
    ctx: &mut Context,
    callee: &str,
    provided: &[Option<ast::Expr>],
    target: SymbolId,
    loc: Location,
) -> SResult<Vec<CallArg>> {
    let formals: Option<Vec<(bool, usize)>> = function_of(ctx.store, target).map(|f| {
        f.args
            .iter()
            .enumerate()
            .map(|(i, arg)| {
                let optional = match arg.expression() {
                    Expr::Var(Var { sym }) => match ctx.store.symbol(*sym) {
                        Symbol::Variable(v) => {
                            v.presence == frt_asr::asr::Presence::Optional
                        }
                        _ => false,
                    },
                    _ => false,
                };
                (optional, i)
            })
            .collect()
    });
    let mut args = Vec::new();
    for arg in provided {
        args.push(CallArg {
            value: match arg {
                Some(expr) => Some(lower_expr(ctx, expr)?),
                None => None,
            },
        });
    }
    if let Some(formals) = formals {
        if args.len() > formals.len() {
            return Err(ctx.error(
                ErrorKind::ArityMismatch,
                format!(
                    "call to `{callee}` passes {} arguments but only {} are declared",
                    args.len(),
                    formals.len()
                ),
                loc,
            ));
        }
        for (i, (optional, _)) in formals.iter().enumerate() {
            if i < args.len() {
                if args[i].value.is_none() && !optional {
                    return Err(ctx.error(
                        ErrorKind::ArityMismatch,
                        format!("required argument {} of `{callee}` cannot be omitted", i + 1),
                        loc,
                    ));
                }
            } else if !optional {
                return Err(ctx.error(
                    ErrorKind::ArityMismatch,
                    format!("required argument {} of `{callee}` is missing", i + 1),
                    loc,
                ));
            }
        }
        while args.len() < formals.len() {
            args.push(CallArg { value: None });
        }
    }
    Ok(args)
}

fn lower_call(
    ctx: &mut Context,
    name: &str,
    provided: &[Option<ast::Expr>],
    loc: Location,
) -> SResult<LoweredCall> {
    let sym = match ctx.store.resolve_symbol(ctx.current_scope, name) {
        Some(sym) => sym,
        None => {
            return Err(ctx.error(
                ErrorKind::UnresolvedSymbol,
                format!("procedure `{name}` is not visible in this scope"),
                loc,
            ))
        }
    };
    // A generic resolves to the first candidate whose formal list admits
    // the provided argument count; exact overload selection by type is the
    // body pass's job.
    let target = match ctx.store.symbol(ctx.store.symbol_get_past_external(sym)) {
        Symbol::GenericProcedure(g) => {
            let procs = g.procs.clone();
            let chosen = procs.iter().copied().find(|proc| {
                function_of(ctx.store, *proc)
                    .map(|f| admits_arity(ctx.store, f, provided.len()))
                    .unwrap_or(false)
            });
            match chosen {
                Some(chosen) => chosen,
                None => {
                    return Err(ctx.error(
                        ErrorKind::ArityMismatch,
                        format!(
                            "no candidate of generic `{name}` accepts {} arguments",
                            provided.len()
                        ),
                        loc,
                    ))
                }
            }
        }
        Symbol::Function(_)
        | Symbol::StructMethodDeclaration(_)
        | Symbol::ExternalSymbol(_) => sym,
        Symbol::Variable(v) => {
            if !matches!(v.ty, Ttype::FunctionType(_)) {
                return Err(ctx.error(
                    ErrorKind::TypeShape,
                    format!("`{name}` is not callable"),
                    loc,
                ));
            }
            sym
        }
        _ => {
            return Err(ctx.error(
                ErrorKind::TypeShape,
                format!("`{name}` is not callable"),
                loc,
            ))
        }
    };
    let args = lower_call_args(ctx, name, provided, target, loc)?;
    ctx.record_function_dependency(target);
    ctx.record_external_reference(target);
    let return_type = match ctx.store.symbol(ctx.store.symbol_get_past_external(target)) {
        Symbol::Variable(v) => match &v.ty {
            Ttype::FunctionType(t) => t.return_type.clone(),
            _ => None,
        },
        _ => function_of(ctx.store, target).and_then(|f| match &f.signature {
            Ttype::FunctionType(t) => t.return_type.clone(),
            _ => None,
        }),
    };
    match return_type {
        Some(ty) => Ok(LoweredCall::Function(FunctionCall::new(target, args).to_texpr(ty, loc))),
        None => Ok(LoweredCall::Subroutine(
            SubroutineCall {
                name: target,
                args,
                loc,
            }
            .to_stmt(),
        )),
    }
}

fn admits_arity(store: &SymbolStore, f: &frt_asr::asr::Function, provided: usize) -> bool {
    if provided > f.args.len() {
        return false;
    }
    f.args[provided..].iter().all(|arg| match arg.expression() {
        Expr::Var(Var { sym }) => match store.symbol(*sym) {
            Symbol::Variable(v) => v.presence == frt_asr::asr::Presence::Optional,
            _ => false,
        },
        _ => false,
    })
}

// `base%name(...)`: resolve the binding by walking the struct inheritance
// chain, then call it through a local ExternalSymbol handle so the call
// target stays resolvable from the current scope.
fn lower_method_call(
    ctx: &mut Context,
    base: &str,
    method: &str,
    provided: &[Option<ast::Expr>],
    loc: Location,
) -> SResult<LoweredCall> {
    let base_expr = lower_name(ctx, base, loc)?;
    let struct_decl = match base_expr.get_type().extract_type() {
        Ttype::StructType { decl: Some(decl), .. } => {
            ctx.store.symbol_get_past_external(*decl)
        }
        _ => {
            return Err(ctx.error(
                ErrorKind::TypeShape,
                format!("`{base}` is not a value of derived type"),
                loc,
            ))
        }
    };
    // Walk the inheritance chain.
    let mut current = Some(struct_decl);
    let mut found: Option<(SymbolId, String)> = None;
    while let Some(decl) = current {
        let s = match ctx.store.symbol(decl) {
            Symbol::Struct(s) => s,
            _ => break,
        };
        if let Some(sym) = ctx.store.get_symbol(s.symtab, method) {
            found = Some((sym, s.name.clone()));
            break;
        }
        current = s.parent.map(|p| ctx.store.symbol_get_past_external(p));
    }
    let (method_sym, owner_name) = match found {
        Some(found) => found,
        None => {
            return Err(ctx.error(
                ErrorKind::UnresolvedSymbol,
                format!("`{method}` is not a type-bound procedure of `{base}`"),
                loc,
            ))
        }
    };
    let binding = match ctx.store.symbol(method_sym) {
        Symbol::StructMethodDeclaration(m) => m.clone(),
        _ => {
            return Err(ctx.error(
                ErrorKind::TypeShape,
                format!("`{method}` is not a type-bound procedure"),
                loc,
            ))
        }
    };
    // The local handle: `method@struct`, reused across calls in the scope.
    let local_name = format!("{method}@{owner_name}");
    let handle = match ctx.store.get_symbol(ctx.current_scope, &local_name) {
        Some(existing) => existing,
        None => {
            let external = frt_asr::asr::ExternalSymbol {
                name: local_name.clone(),
                parent_symtab: ctx.current_scope,
                external: Some(method_sym),
                module_name: owner_name,
                original_name: binding.name.clone(),
                scope_names: Vec::new(),
                access: frt_asr::asr::Access::Private,
                loc,
            };
            let id = ctx.store.alloc_symbol(Symbol::ExternalSymbol(external));
            ctx.store
                .add_or_overwrite_symbol(ctx.current_scope, &local_name, id)
                .map_err(|e| ctx.error(ErrorKind::LexicalName, e.to_string(), loc))?;
            id
        }
    };
    // The pass-object argument is passed explicitly unless `nopass`.
    let mut all_args: Vec<Option<ast::Expr>> = Vec::new();
    if !binding.is_nopass {
        all_args.push(Some(ast::Expr::name(base, loc)));
    }
    all_args.extend(provided.iter().cloned());
    let args = lower_call_args(ctx, method, &all_args, handle, loc)?;
    ctx.record_function_dependency(handle);
    let return_type = function_of(ctx.store, handle).and_then(|f| match &f.signature {
        Ttype::FunctionType(t) => t.return_type.clone(),
        _ => None,
    });
    match return_type {
        Some(ty) => Ok(LoweredCall::Function(
            FunctionCall::new(handle, args).to_texpr(ty, loc),
        )),
        None => Ok(LoweredCall::Subroutine(
            SubroutineCall {
                name: handle,
                args,
                loc,
            }
            .to_stmt(),
        )),
    }
}

pub(crate) fn lower_stmt(ctx: &mut Context, stmt: &ast::Stmt) -> SResult<Stmt> {
    match stmt {
        ast::Stmt::Assignment { target, value, loc } => {
            lower_assignment(ctx, target, value, *loc)
        }
        ast::Stmt::Call { target, args, loc } => {
            let lowered = match target {
                ast::CallTarget::Name(name) => lower_call(ctx, name, args, *loc)?,
                ast::CallTarget::Method { base, name } => {
                    lower_method_call(ctx, base, name, args, *loc)?
                }
            };
            match lowered {
                LoweredCall::Subroutine(stmt) => Ok(stmt),
                // A function called at statement level; keep the value as
                // an expression statement.
                LoweredCall::Function(texpr) => Ok(Stmt::ExprStmt(texpr)),
            }
        }
        ast::Stmt::Select {
            test,
            cases,
            default,
            loc,
        } => {
            let test = lower_expr(ctx, test)?;
            let mut lowered_cases = Vec::new();
            for case in cases {
                let mut values = Vec::new();
                for value in &case.values {
                    values.push(lower_expr(ctx, value)?);
                }
                lowered_cases.push(CaseStmt {
                    values,
                    body: lower_stmts(ctx, &case.body)?,
                    fall_through: case.fall_through,
                });
            }
            let default = lower_stmts(ctx, default)?;
            let enable_fall_through = lowered_cases.iter().any(|case| case.fall_through);
            Ok(Select {
                test,
                cases: lowered_cases,
                default,
                enable_fall_through,
                loc: *loc,
            }
            .to_stmt())
        }
        ast::Stmt::Block {
            name,
            decls,
            body,
            loc,
        } => lower_block(ctx, name, decls, body, *loc),
        ast::Stmt::Associate {
            associations,
            body,
            loc,
        } => lower_associate(ctx, associations, body, *loc),
        ast::Stmt::Return { loc } => Ok(Return { loc: *loc }.to_stmt()),
        ast::Stmt::ExprStmt { expr, .. } => Ok(Stmt::ExprStmt(lower_expr(ctx, expr)?)),
        ast::Stmt::Entry { loc, .. } => {
            // Entries are rewritten before body lowering; reaching one here
            // is a resolver bug.
            Err(ctx.error(
                ErrorKind::Internal,
                "entry statement survived until body lowering",
                *loc,
            ))
        }
    }
}

fn lower_assignment(
    ctx: &mut Context,
    target: &ast::Expr,
    value: &ast::Expr,
    loc: Location,
) -> SResult<Stmt> {
    let value = lower_expr(ctx, value)?;
    let name = match target {
        ast::Expr::Name { name, .. } => name.clone(),
        _ => {
            return Err(ctx.error(
                ErrorKind::TypeShape,
                "only variable targets are assignable in the declaration phase",
                target.loc(),
            ))
        }
    };
    let target_loc = target.loc();
    let target = lower_name(ctx, &name, target_loc)?;
    let sym = match target.expression() {
        Expr::Var(Var { sym }) => *sym,
        _ => unreachable!(),
    };
    let resolved = ctx.store.symbol_get_past_external(sym);
    let (intent, storage, target_type, var_name) = match ctx.store.symbol(resolved) {
        Symbol::Variable(v) => (v.intent, v.storage, v.ty.clone(), v.name.clone()),
        _ => {
            return Err(ctx.error(
                ErrorKind::TypeShape,
                format!("`{name}` is not an assignable variable"),
                target_loc,
            ))
        }
    };
    if intent == Intent::In {
        return Err(ctx.error(
            ErrorKind::IntentViolation,
            format!("assignment to `{var_name}` with intent `in` is not allowed"),
            loc,
        ));
    }
    if storage == Storage::Parameter {
        let key = (
            ctx.store.table(ctx.current_scope).counter(),
            var_name.clone(),
        );
        if ctx.const_assigned.contains(&key) {
            return Err(ctx.error(
                ErrorKind::IntentViolation,
                format!("`{var_name}` is a parameter constant and cannot be re-assigned"),
                loc,
            ));
        }
        ctx.const_assigned.insert(key);
    }
    let value_type = value.get_type().clone();
    let value = if types::check_equal_type(&target_type, &value_type) {
        value
    } else if is_value_constant(&value) && types::can_cast_literal(&target_type, &value_type) {
        let vloc = value.loc();
        Cast::new(value).to_texpr(target_type.clone(), vloc)
    } else {
        match types::promote_types(&target_type, &value_type) {
            Some(promoted) if types::check_equal_type(&promoted, &target_type) => {
                let vloc = value.loc();
                Cast::new(value).to_texpr(target_type.clone(), vloc)
            }
            _ => {
                return Err(ctx.error(
                    ErrorKind::TypeShape,
                    format!("incompatible types in assignment to `{var_name}`"),
                    loc,
                ))
            }
        }
    };
    let realloc_lhs = target_type.is_allocatable();
    Ok(Assignment {
        target,
        value,
        realloc_lhs,
        loc,
    }
    .to_stmt())
}

fn lower_block(
    ctx: &mut Context,
    name: &str,
    decls: &[ast::UnitDecl],
    body: &[ast::Stmt],
    loc: Location,
) -> SResult<Stmt> {
    let block_name = if name.is_empty() {
        format!("block_{}", ctx.store.num_symbols())
    } else {
        name.to_string()
    };
    // The symbol is created first so the ownership chain is complete while
    // the body is lowered; the body is patched in afterwards.
    let symtab = ctx.store.new_symtab(Some(ctx.current_scope));
    let block = frt_asr::asr::Block {
        name: block_name.clone(),
        symtab,
        body: Vec::new(),
        loc,
    };
    let id = ctx.store.alloc_symbol(Symbol::Block(block));
    ctx.store.set_owner(symtab, id);
    ctx.add_symbol_checked(&block_name, id, loc)?;
    let lowered = crate::context::with_scope(ctx, symtab, |ctx| {
        for decl in decls {
            match decl {
                ast::UnitDecl::Declaration(declaration) => {
                    crate::decls::declaration_to_asr(ctx, declaration)?;
                }
                other => {
                    let dloc = unit_decl_loc(other);
                    return Err(ctx.error(
                        ErrorKind::TypeShape,
                        "only type declarations are allowed inside a block",
                        dloc,
                    ));
                }
            }
        }
        lower_stmts(ctx, body)
    });
    let lowered = match lowered {
        Ok(lowered) => lowered,
        Err(abort) => {
            // A partly-resolved block never stays in the scope.
            ctx.store.remove_symbol(ctx.current_scope, &block_name);
            return Err(abort);
        }
    };
    if let Symbol::Block(block) = ctx.store.symbol_mut(id) {
        block.body = lowered;
    }
    Ok(BlockCall { block: id, loc }.to_stmt())
}

// `associate (y => expr, ...)`: an own-table scope binding each name to
// the type of its selector; the bindings are carried as the leading
// statements of the block body.
fn lower_associate(
    ctx: &mut Context,
    associations: &[ast::Association],
    body: &[ast::Stmt],
    loc: Location,
) -> SResult<Stmt> {
    let block_name = format!("associate_{}", ctx.store.num_symbols());
    let symtab = ctx.store.new_symtab(Some(ctx.current_scope));
    let block = frt_asr::asr::AssociateBlock {
        name: block_name.clone(),
        symtab,
        body: Vec::new(),
        loc,
    };
    let id = ctx.store.alloc_symbol(Symbol::AssociateBlock(block));
    ctx.store.set_owner(symtab, id);
    ctx.add_symbol_checked(&block_name, id, loc)?;
    let lowered = crate::context::with_scope(ctx, symtab, |ctx| {
        let mut stmts = Vec::new();
        for association in associations {
            let selector = lower_expr(ctx, &association.selector)?;
            let assoc_name = frt_asr::symbols::canonical_name(&association.name);
            let ty = selector.get_type().clone();
            let type_declaration = match ty.extract_type() {
                Ttype::StructType { decl, .. } => *decl,
                _ => None,
            };
            let variable = frt_asr::asr::Variable {
                name: assoc_name.clone(),
                parent_symtab: symtab,
                ty: ty.clone(),
                symbolic_value: None,
                value: None,
                intent: Intent::Local,
                storage: Storage::Default,
                access: frt_asr::asr::Access::Public,
                presence: frt_asr::asr::Presence::Required,
                dependencies: Vec::new(),
                type_declaration,
                loc: association.selector.loc(),
            };
            let sym = ctx.store.alloc_symbol(Symbol::Variable(variable));
            ctx.store
                .add_symbol(symtab, &assoc_name, sym)
                .map_err(|e| ctx.error(ErrorKind::DuplicateSymbol, e.to_string(), loc))?;
            let realloc_lhs = ty.is_allocatable();
            stmts.push(
                Assignment {
                    target: Var::new(sym).to_texpr(ty, association.selector.loc()),
                    value: selector,
                    realloc_lhs,
                    loc,
                }
                .to_stmt(),
            );
        }
        stmts.extend(lower_stmts(ctx, body)?);
        Ok(stmts)
    });
    let lowered = match lowered {
        Ok(lowered) => lowered,
        Err(abort) => {
            ctx.store.remove_symbol(ctx.current_scope, &block_name);
            return Err(abort);
        }
    };
    if let Symbol::AssociateBlock(block) = ctx.store.symbol_mut(id) {
        block.body = lowered;
    }
    Ok(frt_asr::asr::AssociateBlockCall { block: id, loc }.to_stmt())
}

fn unit_decl_loc(decl: &ast::UnitDecl) -> Location {
    use ast::UnitDecl::*;
    match decl {
        Use(d) => d.loc,
        Implicit(d) => d.loc,
        Declaration(d) => d.loc,
        Interface(d) => d.loc,
        DerivedType(d) => d.loc,
        EnumDef(d) => d.loc,
        UnionDef(d) => d.loc,
        Template(d) => d.loc,
        Requirement(d) => d.loc,
        Instantiate(d) => d.loc,
        AccessStmt(d) => d.loc,
        Pragma(d) => d.loc,
    }
}

/// Lower a statement list. Under continue-on-error a failing statement is
/// dropped and lowering resumes with the next one.
pub(crate) fn lower_stmts(ctx: &mut Context, stmts: &[ast::Stmt]) -> SResult<Vec<Stmt>> {
    let mut lowered = Vec::new();
    for stmt in stmts {
        match lower_stmt(ctx, stmt) {
            Ok(stmt) => lowered.push(stmt),
            Err(abort) => {
                if !ctx.config.continue_on_error {
                    return Err(abort);
                }
            }
        }
    }
    Ok(lowered)
}

/// Reduce an expression to a constant, looking through parameter
/// constants. Used for enum values, alignments and array extents.
pub(crate) fn fold_constant(store: &SymbolStore, expr: &TExpr) -> Option<TExpr> {
    match expr.expression() {
        Expr::IntegerConstant(_)
        | Expr::RealConstant(_)
        | Expr::LogicalConstant(_)
        | Expr::StringConstant(_) => Some(expr.clone()),
        Expr::Var(Var { sym }) => {
            match store.symbol(store.symbol_get_past_external(*sym)) {
                Symbol::Variable(v) if v.storage == Storage::Parameter => {
                    v.value.as_ref().and_then(|value| fold_constant(store, value))
                }
                _ => None,
            }
        }
        Expr::Cast(c) => fold_constant(store, &c.arg)
            .map(|v| TExpr::new(v.expression().clone(), expr.get_type().clone(), expr.loc())),
        Expr::BinaryOp(b) => {
            let left = fold_constant(store, &b.left)?;
            let right = fold_constant(store, &b.right)?;
            match (left.expression(), right.expression()) {
                (Expr::IntegerConstant(l), Expr::IntegerConstant(r)) => {
                    let value = match b.op {
                        BinOp::Add => l.value.checked_add(r.value)?,
                        BinOp::Sub => l.value.checked_sub(r.value)?,
                        BinOp::Mul => l.value.checked_mul(r.value)?,
                        BinOp::Div => l.value.checked_div(r.value)?,
                        _ => return None,
                    };
                    Some(IntegerConstant::new(value).to_texpr(expr.get_type().clone(), expr.loc()))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// Collect the names an expression references, excluding `exclude`
/// (self-references). Mirrors the walk the verifier performs when it
/// re-derives a variable's dependency set.
pub(crate) fn collect_expr_dependencies(
    store: &SymbolStore,
    expr: &TExpr,
    exclude: &str,
    out: &mut Vec<String>,
) {
    match expr.expression() {
        Expr::Var(Var { sym }) => {
            let name = store.symbol_name(*sym).to_string();
            if name != exclude {
                out.push(name);
            }
        }
        Expr::FunctionCall(call) => {
            out.push(store.symbol_name(call.name).to_string());
            for arg in &call.args {
                if let Some(value) = &arg.value {
                    collect_expr_dependencies(store, value, exclude, out);
                }
            }
        }
        Expr::BinaryOp(b) => {
            collect_expr_dependencies(store, &b.left, exclude, out);
            collect_expr_dependencies(store, &b.right, exclude, out);
        }
        Expr::Cast(c) => collect_expr_dependencies(store, &c.arg, exclude, out),
        Expr::StringPhysicalCast(c) => collect_expr_dependencies(store, &c.arg, exclude, out),
        Expr::IntegerConstant(_)
        | Expr::RealConstant(_)
        | Expr::LogicalConstant(_)
        | Expr::StringConstant(_) => {}
    }
}

/// Collect the names referenced from the expressions embedded in a type:
/// array bounds and string lengths.
pub(crate) fn collect_type_dependencies(
    store: &SymbolStore,
    ty: &Ttype,
    exclude: &str,
    out: &mut Vec<String>,
) {
    match ty {
        Ttype::String(s) => {
            if let Some(len) = &s.len {
                collect_expr_dependencies(store, len, exclude, out);
            }
        }
        Ttype::Array(a) => {
            for dim in &a.dims {
                if let Some(start) = &dim.start {
                    collect_expr_dependencies(store, start, exclude, out);
                }
                if let Some(length) = &dim.length {
                    collect_expr_dependencies(store, length, exclude, out);
                }
            }
            collect_type_dependencies(store, &a.elem, exclude, out);
        }
        Ttype::Pointer(inner) | Ttype::Allocatable(inner) => {
            collect_type_dependencies(store, inner, exclude, out);
        }
        Ttype::FunctionType(f) => {
            for arg in &f.arg_types {
                collect_type_dependencies(store, arg, exclude, out);
            }
            if let Some(ret) = &f.return_type {
                collect_type_dependencies(store, ret, exclude, out);
            }
        }
        _ => {}
    }
}
