// Copyright contributors to the frt compiler project
// SPDX-License-Identifier: Apache-2.0

// Lowering of type declaration statements into Variable symbols: attribute
// digestion, construction of the `Ttype`, initializer typing, and the
// dependency set of each entity.

use frt_asr::asr::{
    is_value_constant, Access, Cast, Intent, IntegerConstant, Presence, Storage, Symbol, Variable,
};
use frt_asr::diagnostics::ErrorKind;
use frt_asr::location::Location;
use frt_asr::symbols::{canonical_name, SymbolId};
use frt_asr::types::{
    self, ArrayPhysical, ArrayType, Dimension, LengthKind, StringPhysical, StringType, Ttype,
};
use frt_syntax::ast;

use crate::body::{collect_expr_dependencies, collect_type_dependencies, fold_constant, lower_expr};
use crate::context::{dedup_preserving_order, Context, DeferredStructVar, SResult};

/// The digested form of a declaration's attribute list.
#[derive(Clone, Debug, Default)]
pub(crate) struct DeclAttrs {
    pub intent: Option<ast::IntentSpec>,
    pub parameter: bool,
    pub save: bool,
    pub pointer: bool,
    pub allocatable: bool,
    pub dimension: Option<Vec<ast::DimSpec>>,
    pub optional: bool,
    pub access: Option<ast::AccessSpec>,
    pub bind_c: bool,
}

pub(crate) fn digest_attrs(attrs: &[ast::DeclAttr]) -> DeclAttrs {
    let mut digested = DeclAttrs::default();
    for attr in attrs {
        match attr {
            ast::DeclAttr::Intent(intent) => digested.intent = Some(*intent),
            ast::DeclAttr::Parameter => digested.parameter = true,
            ast::DeclAttr::Save => digested.save = true,
            ast::DeclAttr::Pointer => digested.pointer = true,
            ast::DeclAttr::Allocatable => digested.allocatable = true,
            ast::DeclAttr::Dimension(dims) => digested.dimension = Some(dims.clone()),
            ast::DeclAttr::Optional => digested.optional = true,
            ast::DeclAttr::Access(access) => digested.access = Some(*access),
            ast::DeclAttr::BindC { .. } => digested.bind_c = true,
        }
    }
    digested
}

/// A resolved type together with the bookkeeping an entity needs.
pub(crate) struct ResolvedType {
    pub ty: Ttype,
    /// Present when the named struct is not declared yet; the variable is
    /// parked in the deferred table and patched when the struct closes.
    pub deferred_struct: Option<String>,
    pub type_declaration: Option<SymbolId>,
}

impl ResolvedType {
    fn plain(ty: Ttype) -> ResolvedType {
        ResolvedType {
            ty,
            deferred_struct: None,
            type_declaration: None,
        }
    }
}

fn lower_dims(ctx: &mut Context, dims: &[ast::DimSpec]) -> SResult<Vec<Dimension>> {
    let mut lowered = Vec::new();
    for dim in dims {
        let start = match &dim.start {
            Some(expr) => Some(lower_expr(ctx, expr)?),
            None => None,
        };
        let length = match &dim.length {
            Some(expr) => Some(lower_expr(ctx, expr)?),
            None => None,
        };
        lowered.push(Dimension { start, length });
    }
    Ok(lowered)
}

/// Build the `Ttype` of one declared entity from its type-spec, attributes
/// and dimension list.
pub(crate) fn build_type(
    ctx: &mut Context,
    spec: &ast::TypeSpec,
    attrs: &DeclAttrs,
    entity_dims: Option<&[ast::DimSpec]>,
    loc: Location,
) -> SResult<ResolvedType> {
    let mut resolved = base_type(ctx, spec, attrs, loc)?;
    let dims = entity_dims.or(attrs.dimension.as_deref());
    if let Some(dims) = dims {
        let dims = lower_dims(ctx, dims)?;
        if dims.is_empty() {
            return Err(ctx.error(
                ErrorKind::TypeShape,
                "an array declaration needs at least one dimension",
                loc,
            ));
        }
        if attrs.pointer && !dims.iter().all(Dimension::is_deferred) {
            return Err(ctx.error(
                ErrorKind::TypeShape,
                "an array pointer must have deferred shape",
                loc,
            ));
        }
        if attrs.allocatable && dims.iter().any(|d| d.length.is_some()) {
            return Err(ctx.error(
                ErrorKind::TypeShape,
                "every dimension length of an allocatable must be deferred",
                loc,
            ));
        }
        let all_fixed = !dims.is_empty()
            && dims.iter().all(|d| {
                d.length
                    .as_ref()
                    .and_then(|l| fold_constant(ctx.store, l))
                    .is_some()
            });
        let physical = if attrs.pointer || attrs.allocatable {
            ArrayPhysical::Descriptor
        } else if all_fixed && !resolved.ty.is_character() {
            ArrayPhysical::FixedSize
        } else {
            ArrayPhysical::Descriptor
        };
        resolved.ty = Ttype::Array(Box::new(ArrayType {
            elem: resolved.ty,
            dims,
            physical,
        }));
    }
    if attrs.pointer && attrs.allocatable {
        return Err(ctx.error(
            ErrorKind::TypeShape,
            "the pointer and allocatable attributes conflict",
            loc,
        ));
    }
    if attrs.allocatable {
        resolved.ty = Ttype::Allocatable(Box::new(resolved.ty));
    } else if attrs.pointer {
        resolved.ty = Ttype::Pointer(Box::new(resolved.ty));
    }
    Ok(resolved)
}

fn base_type(
    ctx: &mut Context,
    spec: &ast::TypeSpec,
    attrs: &DeclAttrs,
    loc: Location,
) -> SResult<ResolvedType> {
    let default_integer = ctx.config.default_integer_kind;
    Ok(match spec {
        ast::TypeSpec::Integer { kind } => ResolvedType::plain(Ttype::Integer {
            kind: kind.unwrap_or(default_integer),
        }),
        ast::TypeSpec::Real { kind } => ResolvedType::plain(Ttype::Real {
            kind: kind.unwrap_or(4),
        }),
        ast::TypeSpec::Complex { kind } => ResolvedType::plain(Ttype::Complex {
            kind: kind.unwrap_or(4),
        }),
        ast::TypeSpec::Logical { kind } => ResolvedType::plain(Ttype::Logical {
            kind: kind.unwrap_or(4),
        }),
        ast::TypeSpec::Character { len, .. } => {
            let (len, len_kind) = match len {
                Some(ast::LenSpec::Expr(expr)) => {
                    let len = lower_expr(ctx, expr)?;
                    if !len.get_type().is_integer() {
                        return Err(ctx.error(
                            ErrorKind::TypeShape,
                            "a character length must be an integer expression",
                            loc,
                        ));
                    }
                    (Some(len), LengthKind::ExpressionLength)
                }
                Some(ast::LenSpec::Assumed) => (None, LengthKind::AssumedLength),
                Some(ast::LenSpec::Deferred) => (None, LengthKind::DeferredLength),
                None => (
                    Some(
                        IntegerConstant::new(1).to_texpr(
                            Ttype::Integer {
                                kind: default_integer,
                            },
                            loc,
                        ),
                    ),
                    LengthKind::ExpressionLength,
                ),
            };
            let physical = if attrs.bind_c {
                StringPhysical::CChar
            } else {
                StringPhysical::Descriptor
            };
            ResolvedType::plain(Ttype::String(Box::new(StringType {
                len,
                len_kind,
                physical,
            })))
        }
        ast::TypeSpec::Named { name } | ast::TypeSpec::Class { name } => {
            let key = canonical_name(name);
            if ctx.current_template_params.contains(&key) {
                return Ok(ResolvedType::plain(Ttype::TypeParameter { name: key }));
            }
            match ctx.store.resolve_symbol(ctx.current_scope, &key) {
                Some(sym) => {
                    let target = ctx.store.symbol_get_past_external(sym);
                    match ctx.store.symbol(target) {
                        Symbol::Struct(s) => ResolvedType {
                            ty: Ttype::StructType {
                                decl: Some(sym),
                                is_c_struct: s.is_c_interop,
                            },
                            deferred_struct: None,
                            type_declaration: Some(sym),
                        },
                        Symbol::Enum(_) => ResolvedType::plain(Ttype::EnumType { decl: sym }),
                        Symbol::Union(_) => ResolvedType::plain(Ttype::UnionType { decl: sym }),
                        _ => {
                            return Err(ctx.error(
                                ErrorKind::UnresolvedSymbol,
                                format!("`{name}` does not name a type"),
                                loc,
                            ))
                        }
                    }
                }
                // Self-referential and forward-referenced derived types:
                // park the entity until the struct is emitted.
                None => ResolvedType {
                    ty: Ttype::StructType {
                        decl: None,
                        is_c_struct: false,
                    },
                    deferred_struct: Some(key),
                    type_declaration: None,
                },
            }
        }
        ast::TypeSpec::ProcedureType { interface } => {
            let (signature, declaration) = match interface {
                Some(interface_name) => {
                    match ctx.store.resolve_symbol(ctx.current_scope, interface_name) {
                        Some(sym) => {
                            match ctx.store.symbol(ctx.store.symbol_get_past_external(sym)) {
                                Symbol::Function(f) => (f.signature.clone(), sym),
                                _ => {
                                    return Err(ctx.error(
                                        ErrorKind::UnresolvedSymbol,
                                        format!("`{interface_name}` does not name a procedure"),
                                        loc,
                                    ))
                                }
                            }
                        }
                        None => {
                            return Err(ctx.error(
                                ErrorKind::UnresolvedSymbol,
                                format!("interface `{interface_name}` is not declared"),
                                loc,
                            ))
                        }
                    }
                }
                None => {
                    // `procedure() :: p` takes the signature of the
                    // enclosing procedure; only resolvable once that symbol
                    // exists, which the deferral in the caller guarantees.
                    let owner = ctx
                        .store
                        .table(ctx.current_scope)
                        .asr_owner()
                        .filter(|o| matches!(ctx.store.symbol(*o), Symbol::Function(_)));
                    match owner {
                        Some(owner) => match ctx.store.symbol(owner) {
                            Symbol::Function(f) => (f.signature.clone(), owner),
                            _ => unreachable!(),
                        },
                        None => {
                            return Err(ctx.error(
                                ErrorKind::UnresolvedSymbol,
                                "a procedure declaration without an interface is only valid \
                                 inside a procedure",
                                loc,
                            ))
                        }
                    }
                }
            };
            ResolvedType {
                ty: signature,
                deferred_struct: None,
                type_declaration: Some(declaration),
            }
        }
    })
}

/// True when this declaration must wait for the end of the structural
/// phase: a procedure variable whose interface is not resolvable yet.
pub(crate) fn is_deferred_procedure_decl(ctx: &Context, decl: &ast::Declaration) -> bool {
    match &decl.type_spec {
        ast::TypeSpec::ProcedureType { interface } => match interface {
            Some(name) => ctx
                .store
                .resolve_symbol(ctx.current_scope, name)
                .is_none(),
            None => true,
        },
        _ => false,
    }
}

pub(crate) fn declaration_to_asr(ctx: &mut Context, decl: &ast::Declaration) -> SResult<()> {
    let attrs = digest_attrs(&decl.attrs);
    for entity in &decl.entities {
        match entity_to_variable(ctx, decl, &attrs, entity) {
            Ok(()) => {}
            Err(abort) => {
                // The entity was never inserted; drop it and continue when
                // the caller asked for that.
                if !ctx.config.continue_on_error {
                    return Err(abort);
                }
            }
        }
    }
    Ok(())
}

fn entity_to_variable(
    ctx: &mut Context,
    decl: &ast::Declaration,
    attrs: &DeclAttrs,
    entity: &ast::EntityDecl,
) -> SResult<()> {
    let loc = entity.loc;
    let name = canonical_name(&entity.name);
    let resolved = build_type(ctx, &decl.type_spec, attrs, entity.dims.as_deref(), loc)?;

    let is_dummy = ctx.current_procedure_args.contains(&name);
    let intent = match attrs.intent {
        Some(ast::IntentSpec::In) => Intent::In,
        Some(ast::IntentSpec::Out) => Intent::Out,
        Some(ast::IntentSpec::InOut) => Intent::InOut,
        None if is_dummy => Intent::InOut,
        None => Intent::Local,
    };
    let storage = if attrs.parameter {
        Storage::Parameter
    } else if attrs.save {
        Storage::Save
    } else {
        Storage::Default
    };
    let presence = if attrs.optional {
        Presence::Optional
    } else {
        Presence::Required
    };
    if let Some(access) = attrs.access {
        let access = match access {
            ast::AccessSpec::Public => Access::Public,
            ast::AccessSpec::Private => Access::Private,
        };
        ctx.accumulators.explicit_access.insert(name.clone(), access);
    }

    let mut symbolic_value = match &entity.init {
        Some(init) => Some(lower_expr(ctx, init)?),
        None => None,
    };
    if attrs.parameter && symbolic_value.is_none() {
        return Err(ctx.error(
            ErrorKind::IntentViolation,
            format!("parameter constant `{name}` requires an initializer"),
            loc,
        ));
    }
    // Make any implicit conversion of the initializer explicit.
    if let Some(init) = symbolic_value.take() {
        let init_type = init.get_type().clone();
        let init = if types::check_equal_type(&resolved.ty, &init_type) {
            init
        } else if is_value_constant(&init) && types::can_cast_literal(&resolved.ty, &init_type) {
            let iloc = init.loc();
            Cast::new(init).to_texpr(resolved.ty.clone(), iloc)
        } else {
            match types::promote_types(&resolved.ty, &init_type) {
                Some(promoted) if types::check_equal_type(&promoted, &resolved.ty) => {
                    let iloc = init.loc();
                    Cast::new(init).to_texpr(resolved.ty.clone(), iloc)
                }
                _ => {
                    return Err(ctx.error(
                        ErrorKind::TypeShape,
                        format!("initializer of `{name}` has an incompatible type"),
                        loc,
                    ))
                }
            }
        };
        symbolic_value = Some(init);
    }
    let value = symbolic_value
        .as_ref()
        .and_then(|init| fold_constant(ctx.store, init));

    let mut dependencies = Vec::new();
    if let Some(init) = &symbolic_value {
        collect_expr_dependencies(ctx.store, init, &name, &mut dependencies);
    }
    if let Some(v) = &value {
        collect_expr_dependencies(ctx.store, v, &name, &mut dependencies);
    }
    collect_type_dependencies(ctx.store, &resolved.ty, &name, &mut dependencies);
    let dependencies = dedup_preserving_order(dependencies);

    let variable = Variable {
        name: name.clone(),
        parent_symtab: ctx.current_scope,
        ty: resolved.ty,
        symbolic_value,
        value,
        intent,
        storage,
        access: Access::Public,
        presence,
        dependencies,
        type_declaration: resolved.type_declaration,
        loc,
    };
    let sym = ctx.store.alloc_symbol(Symbol::Variable(variable));
    ctx.add_symbol_checked(&name, sym, loc)?;
    if attrs.parameter {
        let key = (ctx.store.table(ctx.current_scope).counter(), name.clone());
        ctx.const_assigned.insert(key);
    }
    if let Some(struct_name) = resolved.deferred_struct {
        ctx.accumulators.deferred_struct_vars.push(DeferredStructVar {
            var: sym,
            struct_name,
            loc,
        });
    }
    Ok(())
}

/// Scan a declaration section for implicit statements and apply them to
/// the current dictionary, before any entity is typed.
pub(crate) fn process_implicit_statements(
    ctx: &mut Context,
    decls: &[ast::UnitDecl],
) -> SResult<()> {
    for decl in decls {
        let implicit = match decl {
            ast::UnitDecl::Implicit(implicit) => implicit.clone(),
            _ => continue,
        };
        match &implicit.spec {
            None => {
                if let Some(dict) = ctx.implicit_dictionary_mut() {
                    dict.clear();
                }
            }
            Some(spec) => {
                if !ctx.config.implicit_typing {
                    let abort = ctx.error(
                        ErrorKind::TypeShape,
                        "implicit typing is disabled; only `implicit none` is allowed",
                        implicit.loc,
                    );
                    if !ctx.config.continue_on_error {
                        return Err(abort);
                    }
                    continue;
                }
                let attrs = DeclAttrs::default();
                let ty = match spec.type_spec {
                    ast::TypeSpec::Integer { .. }
                    | ast::TypeSpec::Real { .. }
                    | ast::TypeSpec::Complex { .. }
                    | ast::TypeSpec::Logical { .. }
                    | ast::TypeSpec::Character { .. } => {
                        build_type(ctx, &spec.type_spec, &attrs, None, implicit.loc)?.ty
                    }
                    _ => {
                        return Err(ctx.error(
                            ErrorKind::TypeShape,
                            "an implicit statement needs an intrinsic type",
                            implicit.loc,
                        ))
                    }
                };
                for (first, last) in &spec.ranges {
                    if first > last || !first.is_ascii_alphabetic() || !last.is_ascii_alphabetic()
                    {
                        return Err(ctx.error(
                            ErrorKind::LexicalName,
                            format!("invalid implicit letter range `{first}-{last}`"),
                            implicit.loc,
                        ));
                    }
                    if let Some(dict) = ctx.implicit_dictionary_mut() {
                        dict.fill_range(*first, *last, &ty);
                    }
                }
            }
        }
    }
    Ok(())
}
