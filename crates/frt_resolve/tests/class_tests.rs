// Copyright contributors to the frt compiler project
// SPDX-License-Identifier: Apache-2.0

use frt_asr::asr::{Expr, Stmt, Symbol};
use frt_asr::diagnostics::Diagnostics;
use frt_asr::symbols::{SymbolStore, SymtabId};
use frt_asr::verify::verify;
use frt_asr::Location;
use frt_resolve::{resolve_translation_unit, NoLoader, Resolution, ResolverConfig};
use frt_syntax::ast;

fn loc() -> Location {
    Location::default()
}

fn typed_decl(type_spec: ast::TypeSpec, name: &str) -> ast::Declaration {
    ast::Declaration {
        type_spec,
        attrs: Vec::new(),
        entities: vec![ast::EntityDecl {
            name: name.to_string(),
            dims: None,
            init: None,
            loc: loc(),
        }],
        loc: loc(),
    }
}

fn real_decl(name: &str) -> ast::Declaration {
    typed_decl(ast::TypeSpec::Real { kind: None }, name)
}

fn named_decl(type_name: &str, name: &str) -> ast::Declaration {
    typed_decl(
        ast::TypeSpec::Named {
            name: type_name.to_string(),
        },
        name,
    )
}

// The shapes module: an abstract `shape` with a deferred `area`, and a
// `circle` extending it with an override.
fn shapes_module() -> ast::Module {
    ast::Module {
        name: "shapes".to_string(),
        decls: vec![
            ast::UnitDecl::DerivedType(ast::DerivedType {
                name: "shape".to_string(),
                extends: None,
                is_abstract: true,
                bind_c: false,
                alignment: None,
                members: vec![real_decl("origin")],
                bindings: vec![ast::TypeBoundItem::Procedure(ast::TypeBoundProc {
                    binding_name: "area".to_string(),
                    proc_name: Some("area_iface".to_string()),
                    deferred: true,
                    nopass: false,
                    pass_name: None,
                    loc: loc(),
                })],
                loc: loc(),
            }),
            ast::UnitDecl::Interface(ast::Interface {
                header: ast::InterfaceHeader::None,
                items: vec![ast::InterfaceItem::Procedure(ast::Procedure {
                    kind: ast::ProcKind::Function,
                    name: "area_iface".to_string(),
                    args: vec!["self".to_string()],
                    result: None,
                    attrs: ast::ProcAttrs::default(),
                    decls: vec![
                        ast::UnitDecl::Declaration(named_decl("shape", "self")),
                        ast::UnitDecl::Declaration(real_decl("area_iface")),
                    ],
                    body: Vec::new(),
                    contains: Vec::new(),
                    loc: loc(),
                })],
                loc: loc(),
            }),
            ast::UnitDecl::DerivedType(ast::DerivedType {
                name: "circle".to_string(),
                extends: Some("shape".to_string()),
                is_abstract: false,
                bind_c: false,
                alignment: None,
                members: vec![real_decl("radius")],
                bindings: vec![ast::TypeBoundItem::Procedure(ast::TypeBoundProc {
                    binding_name: "area".to_string(),
                    proc_name: Some("circle_area".to_string()),
                    deferred: false,
                    nopass: false,
                    pass_name: None,
                    loc: loc(),
                })],
                loc: loc(),
            }),
        ],
        contains: vec![
            ast::Procedure {
                kind: ast::ProcKind::Function,
                name: "circle_area".to_string(),
                args: vec!["self".to_string()],
                result: None,
                attrs: ast::ProcAttrs::default(),
                decls: vec![
                    ast::UnitDecl::Declaration(named_decl("circle", "self")),
                    ast::UnitDecl::Declaration(real_decl("circle_area")),
                ],
                body: vec![ast::Stmt::Assignment {
                    target: ast::Expr::name("circle_area", loc()),
                    value: ast::Expr::Real {
                        value: "3.14".to_string(),
                        loc: loc(),
                    },
                    loc: loc(),
                }],
                contains: Vec::new(),
                loc: loc(),
            },
            ast::Procedure {
                kind: ast::ProcKind::Subroutine,
                name: "use_area".to_string(),
                args: Vec::new(),
                result: None,
                attrs: ast::ProcAttrs::default(),
                decls: vec![ast::UnitDecl::Declaration(named_decl("circle", "c"))],
                body: vec![ast::Stmt::Call {
                    target: ast::CallTarget::Method {
                        base: "c".to_string(),
                        name: "area".to_string(),
                    },
                    args: Vec::new(),
                    loc: loc(),
                }],
                contains: Vec::new(),
                loc: loc(),
            },
        ],
        loc: loc(),
    }
}

fn resolve_shapes() -> (SymbolStore, Diagnostics, Option<Resolution>) {
    let unit = ast::TranslationUnit {
        items: vec![ast::Item::Module(shapes_module())],
    };
    let mut store = SymbolStore::new();
    let mut diagnostics = Diagnostics::new();
    let mut loader = NoLoader;
    let resolution = resolve_translation_unit(
        &unit,
        &mut store,
        &mut diagnostics,
        ResolverConfig::default(),
        &mut loader,
    )
    .ok();
    (store, diagnostics, resolution)
}

fn module_table(store: &SymbolStore, resolution: &Resolution) -> SymtabId {
    let root = match store.symbol(resolution.unit) {
        Symbol::TranslationUnit(tu) => tu.symtab,
        _ => unreachable!(),
    };
    let module = store.get_symbol(root, "shapes").unwrap();
    match store.symbol(module) {
        Symbol::Module(m) => m.symtab,
        _ => unreachable!(),
    }
}

#[test]
fn test_inherited_method_resolves_to_override() {
    let (store, mut diagnostics, resolution) = resolve_shapes();
    assert!(!diagnostics.has_error(), "{:?}", diagnostics.drain());
    let resolution = resolution.unwrap();
    let table = module_table(&store, &resolution);

    let circle = store.get_symbol(table, "circle").unwrap();
    let circle_table = match store.symbol(circle) {
        Symbol::Struct(s) => {
            assert!(s.parent.is_some());
            s.symtab
        }
        _ => unreachable!(),
    };
    let area_override = store.get_symbol(circle_table, "area").unwrap();
    assert!(matches!(
        store.symbol(area_override),
        Symbol::StructMethodDeclaration(_)
    ));

    // The call site resolves to the override in `circle`, not to the
    // deferred binding in `shape`.
    let use_area = store.get_symbol(table, "use_area").unwrap();
    let body = match store.symbol(use_area) {
        Symbol::Function(f) => &f.body,
        _ => unreachable!(),
    };
    let call_target = match &body[0] {
        Stmt::ExprStmt(expr) => match expr.expression() {
            Expr::FunctionCall(call) => call.name,
            _ => unreachable!(),
        },
        _ => unreachable!(),
    };
    assert_eq!(store.symbol_get_past_external(call_target), area_override);
}

#[test]
fn test_method_call_dependencies() {
    let (store, _diagnostics, resolution) = resolve_shapes();
    let resolution = resolution.unwrap();
    let table = module_table(&store, &resolution);
    let use_area = store.get_symbol(table, "use_area").unwrap();
    match store.symbol(use_area) {
        Symbol::Function(f) => {
            assert_eq!(f.dependencies, vec!["circle", "area"]);
        }
        _ => unreachable!(),
    }
}

#[test]
fn test_shapes_tree_verifies() {
    let (store, _diagnostics, resolution) = resolve_shapes();
    let resolution = resolution.unwrap();
    let mut verify_diagnostics = Diagnostics::new();
    let accepted = verify(&store, resolution.unit, true, &mut verify_diagnostics);
    assert!(
        accepted,
        "verification failed: {:?}",
        verify_diagnostics.drain()
    );
}

#[test]
fn test_deferred_binding_requires_abstract_type() {
    let mut module = shapes_module();
    // Make `shape` concrete while keeping its deferred binding.
    if let ast::UnitDecl::DerivedType(dt) = &mut module.decls[0] {
        dt.is_abstract = false;
    }
    let unit = ast::TranslationUnit {
        items: vec![ast::Item::Module(module)],
    };
    let mut store = SymbolStore::new();
    let mut diagnostics = Diagnostics::new();
    let mut loader = NoLoader;
    let resolution = resolve_translation_unit(
        &unit,
        &mut store,
        &mut diagnostics,
        ResolverConfig::default(),
        &mut loader,
    );
    assert!(resolution.is_err());
    assert!(diagnostics.has_error());
}

#[test]
fn test_bind_c_struct_marks_struct_type() {
    // `bind(c)` on a derived type propagates to every StructType referring
    // to it, including references patched through the deferred table.
    let module = ast::Module {
        name: "cbind".to_string(),
        decls: vec![
            ast::UnitDecl::DerivedType(ast::DerivedType {
                name: "cpoint".to_string(),
                extends: None,
                is_abstract: false,
                bind_c: true,
                alignment: None,
                members: vec![
                    real_decl("x"),
                    ast::Declaration {
                        type_spec: ast::TypeSpec::Named {
                            name: "cpoint".to_string(),
                        },
                        attrs: vec![ast::DeclAttr::Pointer],
                        entities: vec![ast::EntityDecl {
                            name: "next".to_string(),
                            dims: None,
                            init: None,
                            loc: loc(),
                        }],
                        loc: loc(),
                    },
                ],
                bindings: Vec::new(),
                loc: loc(),
            }),
            ast::UnitDecl::Declaration(named_decl("cpoint", "p")),
        ],
        contains: Vec::new(),
        loc: loc(),
    };
    let unit = ast::TranslationUnit {
        items: vec![ast::Item::Module(module)],
    };
    let mut store = SymbolStore::new();
    let mut diagnostics = Diagnostics::new();
    let mut loader = NoLoader;
    let resolution = resolve_translation_unit(
        &unit,
        &mut store,
        &mut diagnostics,
        ResolverConfig::default(),
        &mut loader,
    )
    .unwrap();
    assert!(!diagnostics.has_error());
    let root = match store.symbol(resolution.unit) {
        Symbol::TranslationUnit(tu) => tu.symtab,
        _ => unreachable!(),
    };
    let module = store.get_symbol(root, "cbind").unwrap();
    let table = match store.symbol(module) {
        Symbol::Module(m) => m.symtab,
        _ => unreachable!(),
    };
    let cpoint = store.get_symbol(table, "cpoint").unwrap();
    let cpoint_table = match store.symbol(cpoint) {
        Symbol::Struct(s) => {
            assert!(s.is_c_interop);
            s.symtab
        }
        _ => unreachable!(),
    };
    // Resolved after the type closed.
    let p = store.get_symbol(table, "p").unwrap();
    match store.symbol(p) {
        Symbol::Variable(v) => match &v.ty {
            frt_asr::types::Ttype::StructType { is_c_struct, .. } => assert!(*is_c_struct),
            other => panic!("expected a struct type, found {other:?}"),
        },
        _ => unreachable!(),
    }
    // Patched through the deferred table while the type was still open.
    let next = store.get_symbol(cpoint_table, "next").unwrap();
    match store.symbol(next) {
        Symbol::Variable(v) => match v.ty.type_get_past_pointer() {
            frt_asr::types::Ttype::StructType { is_c_struct, .. } => assert!(*is_c_struct),
            other => panic!("expected a struct type, found {other:?}"),
        },
        _ => unreachable!(),
    }
    let mut verify_diagnostics = Diagnostics::new();
    assert!(verify(&store, resolution.unit, true, &mut verify_diagnostics));
}

#[test]
fn test_self_referential_struct() {
    // A linked node: a struct with a pointer member of its own type.
    let module = ast::Module {
        name: "lists".to_string(),
        decls: vec![ast::UnitDecl::DerivedType(ast::DerivedType {
            name: "node".to_string(),
            extends: None,
            is_abstract: false,
            bind_c: false,
            alignment: None,
            members: vec![
                real_decl("value"),
                ast::Declaration {
                    type_spec: ast::TypeSpec::Named {
                        name: "node".to_string(),
                    },
                    attrs: vec![ast::DeclAttr::Pointer],
                    entities: vec![ast::EntityDecl {
                        name: "next".to_string(),
                        dims: None,
                        init: None,
                        loc: loc(),
                    }],
                    loc: loc(),
                },
            ],
            bindings: Vec::new(),
            loc: loc(),
        })],
        contains: Vec::new(),
        loc: loc(),
    };
    let unit = ast::TranslationUnit {
        items: vec![ast::Item::Module(module)],
    };
    let mut store = SymbolStore::new();
    let mut diagnostics = Diagnostics::new();
    let mut loader = NoLoader;
    let resolution = resolve_translation_unit(
        &unit,
        &mut store,
        &mut diagnostics,
        ResolverConfig::default(),
        &mut loader,
    )
    .unwrap();
    assert!(!diagnostics.has_error());
    // The deferred reference was patched once the struct closed.
    let root = match store.symbol(resolution.unit) {
        Symbol::TranslationUnit(tu) => tu.symtab,
        _ => unreachable!(),
    };
    let module = store.get_symbol(root, "lists").unwrap();
    let table = match store.symbol(module) {
        Symbol::Module(m) => m.symtab,
        _ => unreachable!(),
    };
    let node = store.get_symbol(table, "node").unwrap();
    let node_table = match store.symbol(node) {
        Symbol::Struct(s) => s.symtab,
        _ => unreachable!(),
    };
    let next = store.get_symbol(node_table, "next").unwrap();
    match store.symbol(next) {
        Symbol::Variable(v) => assert_eq!(v.type_declaration, Some(node)),
        _ => unreachable!(),
    }
    let mut verify_diagnostics = Diagnostics::new();
    assert!(verify(&store, resolution.unit, true, &mut verify_diagnostics));
}
