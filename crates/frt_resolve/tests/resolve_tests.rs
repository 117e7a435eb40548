// Copyright contributors to the frt compiler project
// SPDX-License-Identifier: Apache-2.0

use frt_asr::asr::{Stmt, Storage, Symbol};
use frt_asr::diagnostics::{Diagnostics, ErrorKind, Level};
use frt_asr::symbols::{SymbolStore, SymtabId};
use frt_asr::types::{ArrayPhysical, Ttype};
use frt_asr::verify::verify;
use frt_asr::Location;
use frt_resolve::{resolve_translation_unit, NoLoader, Resolution, ResolverConfig};
use frt_syntax::ast;

fn loc() -> Location {
    Location::default()
}

fn resolve_unit(
    unit: &ast::TranslationUnit,
    config: ResolverConfig,
) -> (SymbolStore, Diagnostics, Option<Resolution>) {
    let mut store = SymbolStore::new();
    let mut diagnostics = Diagnostics::new();
    let mut loader = NoLoader;
    let resolution =
        resolve_translation_unit(unit, &mut store, &mut diagnostics, config, &mut loader).ok();
    (store, diagnostics, resolution)
}

fn root_scope(store: &SymbolStore, resolution: &Resolution) -> SymtabId {
    match store.symbol(resolution.unit) {
        Symbol::TranslationUnit(tu) => tu.symtab,
        _ => unreachable!(),
    }
}

fn integer_decl(names: &[&str], attrs: Vec<ast::DeclAttr>, init: Option<ast::Expr>) -> ast::UnitDecl {
    ast::UnitDecl::Declaration(ast::Declaration {
        type_spec: ast::TypeSpec::Integer { kind: None },
        attrs,
        entities: names
            .iter()
            .map(|name| ast::EntityDecl {
                name: name.to_string(),
                dims: None,
                init: init.clone(),
                loc: loc(),
            })
            .collect(),
        loc: loc(),
    })
}

// module m with `function foo(x)` returning an integer.
fn module_with_foo() -> ast::Module {
    ast::Module {
        name: "m".to_string(),
        decls: Vec::new(),
        contains: vec![ast::Procedure {
            kind: ast::ProcKind::Function,
            name: "foo".to_string(),
            args: vec!["x".to_string()],
            result: None,
            attrs: ast::ProcAttrs::default(),
            decls: vec![
                integer_decl(&["x"], Vec::new(), None),
                integer_decl(&["foo"], Vec::new(), None),
            ],
            body: vec![ast::Stmt::Assignment {
                target: ast::Expr::name("foo", loc()),
                value: ast::Expr::name("x", loc()),
                loc: loc(),
            }],
            contains: Vec::new(),
            loc: loc(),
        }],
        loc: loc(),
    }
}

#[test]
fn test_use_and_shadow() {
    let unit = ast::TranslationUnit {
        items: vec![
            ast::Item::Module(module_with_foo()),
            ast::Item::Program(ast::Program {
                name: "p".to_string(),
                decls: vec![
                    ast::UnitDecl::Use(ast::Use {
                        module: "m".to_string(),
                        only: false,
                        symbols: Vec::new(),
                        loc: loc(),
                    }),
                    integer_decl(&["foo"], Vec::new(), None),
                ],
                body: vec![ast::Stmt::Assignment {
                    target: ast::Expr::name("foo", loc()),
                    value: ast::Expr::int(3, loc()),
                    loc: loc(),
                }],
                contains: Vec::new(),
                loc: loc(),
            }),
        ],
    };
    let (store, diagnostics, resolution) = resolve_unit(&unit, ResolverConfig::default());
    assert!(!diagnostics.has_error());
    // The local declaration shadows the import with a warning.
    let warnings = diagnostics
        .iter()
        .filter(|d| d.level == Level::Warning)
        .count();
    assert_eq!(warnings, 1);
    let resolution = resolution.unwrap();
    let root = root_scope(&store, &resolution);
    let program = store.get_symbol(root, "p").unwrap();
    let program_table = match store.symbol(program) {
        Symbol::Program(p) => p.symtab,
        _ => unreachable!(),
    };
    let foo = store.get_symbol(program_table, "foo").unwrap();
    assert!(matches!(store.symbol(foo), Symbol::Variable(_)));

    let mut verify_diagnostics = Diagnostics::new();
    assert!(verify(&store, resolution.unit, true, &mut verify_diagnostics));
}

#[test]
fn test_parameter_reassignment_rejected() {
    let unit = ast::TranslationUnit {
        items: vec![ast::Item::Program(ast::Program {
            name: "p".to_string(),
            decls: vec![integer_decl(
                &["n"],
                vec![ast::DeclAttr::Parameter],
                Some(ast::Expr::int(3, loc())),
            )],
            body: vec![ast::Stmt::Assignment {
                target: ast::Expr::name("n", loc()),
                value: ast::Expr::int(4, loc()),
                loc: loc(),
            }],
            contains: Vec::new(),
            loc: loc(),
        })],
    };
    let config = ResolverConfig {
        continue_on_error: true,
        ..ResolverConfig::default()
    };
    let (store, diagnostics, resolution) = resolve_unit(&unit, config);
    assert_eq!(diagnostics.error_kinds(), vec![ErrorKind::IntentViolation]);
    // The statement is dropped; compilation continued.
    let resolution = resolution.unwrap();
    let root = root_scope(&store, &resolution);
    let program = store.get_symbol(root, "p").unwrap();
    match store.symbol(program) {
        Symbol::Program(p) => assert!(p.body.is_empty()),
        _ => unreachable!(),
    }
    let mut verify_diagnostics = Diagnostics::new();
    assert!(verify(&store, resolution.unit, true, &mut verify_diagnostics));
}

#[test]
fn test_parameter_requires_initializer() {
    let unit = ast::TranslationUnit {
        items: vec![ast::Item::Program(ast::Program {
            name: "p".to_string(),
            decls: vec![integer_decl(&["n"], vec![ast::DeclAttr::Parameter], None)],
            body: Vec::new(),
            contains: Vec::new(),
            loc: loc(),
        })],
    };
    let (_store, diagnostics, resolution) = resolve_unit(&unit, ResolverConfig::default());
    assert!(diagnostics.has_error());
    assert!(resolution.is_none());
}

#[test]
fn test_implicit_typing_declares_on_reference() {
    let unit = ast::TranslationUnit {
        items: vec![ast::Item::Program(ast::Program {
            name: "p".to_string(),
            decls: Vec::new(),
            body: vec![
                ast::Stmt::Assignment {
                    target: ast::Expr::name("i", loc()),
                    value: ast::Expr::int(1, loc()),
                    loc: loc(),
                },
                ast::Stmt::Assignment {
                    target: ast::Expr::name("x", loc()),
                    value: ast::Expr::Real {
                        value: "2.5".to_string(),
                        loc: loc(),
                    },
                    loc: loc(),
                },
            ],
            contains: Vec::new(),
            loc: loc(),
        })],
    };
    let config = ResolverConfig {
        implicit_typing: true,
        ..ResolverConfig::default()
    };
    let (store, diagnostics, resolution) = resolve_unit(&unit, config);
    assert!(!diagnostics.has_error());
    let resolution = resolution.unwrap();
    let root = root_scope(&store, &resolution);
    let program = store.get_symbol(root, "p").unwrap();
    let table = match store.symbol(program) {
        Symbol::Program(p) => p.symtab,
        _ => unreachable!(),
    };
    let i = store.get_symbol(table, "i").unwrap();
    match store.symbol(i) {
        Symbol::Variable(v) => assert_eq!(v.ty, Ttype::Integer { kind: 4 }),
        _ => unreachable!(),
    }
    let x = store.get_symbol(table, "x").unwrap();
    match store.symbol(x) {
        Symbol::Variable(v) => assert_eq!(v.ty, Ttype::Real { kind: 4 }),
        _ => unreachable!(),
    }
    let mut verify_diagnostics = Diagnostics::new();
    assert!(verify(&store, resolution.unit, true, &mut verify_diagnostics));
}

#[test]
fn test_undeclared_name_without_implicit_typing() {
    let unit = ast::TranslationUnit {
        items: vec![ast::Item::Program(ast::Program {
            name: "p".to_string(),
            decls: Vec::new(),
            body: vec![ast::Stmt::Assignment {
                target: ast::Expr::name("i", loc()),
                value: ast::Expr::int(1, loc()),
                loc: loc(),
            }],
            contains: Vec::new(),
            loc: loc(),
        })],
    };
    let (_store, diagnostics, resolution) = resolve_unit(&unit, ResolverConfig::default());
    assert!(resolution.is_none());
    assert_eq!(diagnostics.error_kinds(), vec![ErrorKind::UnresolvedSymbol]);
}

#[test]
fn test_implicit_statement_rejected_when_disabled() {
    let unit = ast::TranslationUnit {
        items: vec![ast::Item::Program(ast::Program {
            name: "p".to_string(),
            decls: vec![ast::UnitDecl::Implicit(ast::Implicit {
                spec: Some(ast::ImplicitSpec {
                    type_spec: ast::TypeSpec::Logical { kind: None },
                    ranges: vec![('a', 'c')],
                }),
                loc: loc(),
            })],
            body: Vec::new(),
            contains: Vec::new(),
            loc: loc(),
        })],
    };
    let (_store, diagnostics, resolution) = resolve_unit(&unit, ResolverConfig::default());
    assert!(resolution.is_none());
    assert!(diagnostics.has_error());
}

#[test]
fn test_select_fall_through_flag() {
    let case = |fall_through| ast::Case {
        values: vec![ast::Expr::int(1, loc())],
        body: Vec::new(),
        fall_through,
    };
    let program = |name: &str, cases: Vec<ast::Case>| {
        ast::Item::Program(ast::Program {
            name: name.to_string(),
            decls: vec![integer_decl(&["n"], Vec::new(), None)],
            body: vec![ast::Stmt::Select {
                test: ast::Expr::name("n", loc()),
                cases,
                default: Vec::new(),
                loc: loc(),
            }],
            contains: Vec::new(),
            loc: loc(),
        })
    };
    let unit = ast::TranslationUnit {
        items: vec![
            program("p1", vec![case(false), case(true)]),
            program("p2", vec![case(false), case(false)]),
        ],
    };
    let (store, diagnostics, resolution) = resolve_unit(&unit, ResolverConfig::default());
    assert!(!diagnostics.has_error());
    let resolution = resolution.unwrap();
    let root = root_scope(&store, &resolution);
    for (name, expected) in [("p1", true), ("p2", false)] {
        let program = store.get_symbol(root, name).unwrap();
        let body = match store.symbol(program) {
            Symbol::Program(p) => &p.body,
            _ => unreachable!(),
        };
        match &body[0] {
            Stmt::Select(select) => assert_eq!(select.enable_fall_through, expected),
            _ => unreachable!(),
        }
    }
    let mut verify_diagnostics = Diagnostics::new();
    assert!(verify(&store, resolution.unit, true, &mut verify_diagnostics));
}

#[test]
fn test_simd_pragma_marks_arrays() {
    let unit = ast::TranslationUnit {
        items: vec![ast::Item::Program(ast::Program {
            name: "p".to_string(),
            decls: vec![
                ast::UnitDecl::Declaration(ast::Declaration {
                    type_spec: ast::TypeSpec::Integer { kind: None },
                    attrs: Vec::new(),
                    entities: vec![ast::EntityDecl {
                        name: "v".to_string(),
                        dims: Some(vec![ast::DimSpec {
                            start: None,
                            length: Some(ast::Expr::int(8, loc())),
                        }]),
                        init: None,
                        loc: loc(),
                    }],
                    loc: loc(),
                }),
                ast::UnitDecl::Pragma(ast::Pragma {
                    text: "simd v".to_string(),
                    loc: loc(),
                }),
            ],
            body: Vec::new(),
            contains: Vec::new(),
            loc: loc(),
        })],
    };
    let (store, diagnostics, resolution) = resolve_unit(&unit, ResolverConfig::default());
    assert!(!diagnostics.has_error());
    let resolution = resolution.unwrap();
    let root = root_scope(&store, &resolution);
    let program = store.get_symbol(root, "p").unwrap();
    let table = match store.symbol(program) {
        Symbol::Program(p) => p.symtab,
        _ => unreachable!(),
    };
    let v = store.get_symbol(table, "v").unwrap();
    match store.symbol(v) {
        Symbol::Variable(var) => match &var.ty {
            Ttype::Array(array) => assert_eq!(array.physical, ArrayPhysical::Simd),
            _ => unreachable!(),
        },
        _ => unreachable!(),
    }
    let mut verify_diagnostics = Diagnostics::new();
    assert!(verify(&store, resolution.unit, true, &mut verify_diagnostics));
}

#[test]
fn test_associate_construct() {
    let unit = ast::TranslationUnit {
        items: vec![ast::Item::Program(ast::Program {
            name: "p".to_string(),
            decls: vec![integer_decl(&["x"], Vec::new(), None)],
            body: vec![ast::Stmt::Associate {
                associations: vec![ast::Association {
                    name: "y".to_string(),
                    selector: ast::Expr::name("x", loc()),
                }],
                body: vec![ast::Stmt::Assignment {
                    target: ast::Expr::name("y", loc()),
                    value: ast::Expr::int(2, loc()),
                    loc: loc(),
                }],
                loc: loc(),
            }],
            contains: Vec::new(),
            loc: loc(),
        })],
    };
    let (store, diagnostics, resolution) = resolve_unit(&unit, ResolverConfig::default());
    assert!(!diagnostics.has_error());
    let resolution = resolution.unwrap();
    let root = root_scope(&store, &resolution);
    let program = store.get_symbol(root, "p").unwrap();
    let body = match store.symbol(program) {
        Symbol::Program(p) => &p.body,
        _ => unreachable!(),
    };
    // The association becomes an own-table scope entered through a call.
    let block = match &body[0] {
        Stmt::AssociateBlockCall(call) => call.block,
        other => panic!("expected an associate call, found {other:?}"),
    };
    let block_table = match store.symbol(block) {
        Symbol::AssociateBlock(b) => b.symtab,
        _ => unreachable!(),
    };
    let y = store.get_symbol(block_table, "y").unwrap();
    match store.symbol(y) {
        Symbol::Variable(v) => assert_eq!(v.ty, Ttype::Integer { kind: 4 }),
        _ => unreachable!(),
    }
    let mut verify_diagnostics = Diagnostics::new();
    assert!(verify(&store, resolution.unit, true, &mut verify_diagnostics));
}

#[test]
fn test_nested_blocks_keep_dependencies_minimal() {
    // A call from a doubly nested block to a procedure contained in the
    // enclosing subroutine stays local: the whole ancestor chain up to the
    // subroutine's table counts, not just one level.
    let g = ast::Procedure {
        kind: ast::ProcKind::Subroutine,
        name: "g".to_string(),
        args: Vec::new(),
        result: None,
        attrs: ast::ProcAttrs::default(),
        decls: Vec::new(),
        body: Vec::new(),
        contains: Vec::new(),
        loc: loc(),
    };
    let f = ast::Procedure {
        kind: ast::ProcKind::Subroutine,
        name: "f".to_string(),
        args: Vec::new(),
        result: None,
        attrs: ast::ProcAttrs::default(),
        decls: Vec::new(),
        body: vec![ast::Stmt::Block {
            name: String::new(),
            decls: Vec::new(),
            body: vec![ast::Stmt::Block {
                name: String::new(),
                decls: Vec::new(),
                body: vec![ast::Stmt::Call {
                    target: ast::CallTarget::Name("g".to_string()),
                    args: Vec::new(),
                    loc: loc(),
                }],
                loc: loc(),
            }],
            loc: loc(),
        }],
        contains: vec![g],
        loc: loc(),
    };
    let unit = ast::TranslationUnit {
        items: vec![ast::Item::Module(ast::Module {
            name: "m".to_string(),
            decls: Vec::new(),
            contains: vec![f],
            loc: loc(),
        })],
    };
    let (store, diagnostics, resolution) = resolve_unit(&unit, ResolverConfig::default());
    assert!(!diagnostics.has_error());
    let resolution = resolution.unwrap();
    let root = root_scope(&store, &resolution);
    let module = store.get_symbol(root, "m").unwrap();
    let table = match store.symbol(module) {
        Symbol::Module(m) => m.symtab,
        _ => unreachable!(),
    };
    let f = store.get_symbol(table, "f").unwrap();
    match store.symbol(f) {
        Symbol::Function(f) => assert!(f.dependencies.is_empty(), "{:?}", f.dependencies),
        _ => unreachable!(),
    }
    let mut verify_diagnostics = Diagnostics::new();
    let accepted = verify(&store, resolution.unit, true, &mut verify_diagnostics);
    assert!(
        accepted,
        "verification failed: {:?}",
        verify_diagnostics.drain()
    );
}

#[test]
fn test_parameter_constant_folds() {
    let unit = ast::TranslationUnit {
        items: vec![ast::Item::Program(ast::Program {
            name: "p".to_string(),
            decls: vec![
                integer_decl(
                    &["n"],
                    vec![ast::DeclAttr::Parameter],
                    Some(ast::Expr::int(3, loc())),
                ),
                integer_decl(
                    &["m"],
                    vec![ast::DeclAttr::Parameter],
                    Some(ast::Expr::BinOp {
                        op: ast::BinOpKind::Mul,
                        left: Box::new(ast::Expr::name("n", loc())),
                        right: Box::new(ast::Expr::int(2, loc())),
                        loc: loc(),
                    }),
                ),
            ],
            body: Vec::new(),
            contains: Vec::new(),
            loc: loc(),
        })],
    };
    let (store, diagnostics, resolution) = resolve_unit(&unit, ResolverConfig::default());
    assert!(!diagnostics.has_error());
    let resolution = resolution.unwrap();
    let root = root_scope(&store, &resolution);
    let program = store.get_symbol(root, "p").unwrap();
    let table = match store.symbol(program) {
        Symbol::Program(p) => p.symtab,
        _ => unreachable!(),
    };
    let m = store.get_symbol(table, "m").unwrap();
    match store.symbol(m) {
        Symbol::Variable(v) => {
            assert_eq!(v.storage, Storage::Parameter);
            let value = v.value.as_ref().expect("folded constant");
            assert_eq!(frt_asr::asr::extract_integer_value(value), Some(6));
            assert_eq!(v.dependencies, vec!["n".to_string()]);
        }
        _ => unreachable!(),
    }
    let mut verify_diagnostics = Diagnostics::new();
    assert!(verify(&store, resolution.unit, true, &mut verify_diagnostics));
}
