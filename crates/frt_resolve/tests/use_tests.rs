// Copyright contributors to the frt compiler project
// SPDX-License-Identifier: Apache-2.0

use frt_asr::asr::Symbol;
use frt_asr::diagnostics::{Diagnostics, ErrorKind};
use frt_asr::symbols::{SymbolStore, SymtabId};
use frt_asr::verify::verify;
use frt_asr::Location;
use frt_resolve::{
    resolve_translation_unit, ModuleLoader, ModuleRegistry, NoLoader, Resolution, ResolverConfig,
};
use frt_syntax::ast;

fn loc() -> Location {
    Location::default()
}

fn integer_decl(name: &str) -> ast::UnitDecl {
    ast::UnitDecl::Declaration(ast::Declaration {
        type_spec: ast::TypeSpec::Integer { kind: None },
        attrs: Vec::new(),
        entities: vec![ast::EntityDecl {
            name: name.to_string(),
            dims: None,
            init: None,
            loc: loc(),
        }],
        loc: loc(),
    })
}

// `function <name>(x)` returning an integer.
fn integer_function(name: &str) -> ast::Procedure {
    ast::Procedure {
        kind: ast::ProcKind::Function,
        name: name.to_string(),
        args: vec!["x".to_string()],
        result: None,
        attrs: ast::ProcAttrs::default(),
        decls: vec![integer_decl("x"), integer_decl(name)],
        body: vec![ast::Stmt::Assignment {
            target: ast::Expr::name(name, loc()),
            value: ast::Expr::name("x", loc()),
            loc: loc(),
        }],
        contains: Vec::new(),
        loc: loc(),
    }
}

// A module exposing a generic `plus` aggregating the named functions.
fn module_with_generic(name: &str, candidates: &[&str]) -> ast::Module {
    ast::Module {
        name: name.to_string(),
        decls: vec![ast::UnitDecl::Interface(ast::Interface {
            header: ast::InterfaceHeader::Name("plus".to_string()),
            items: vec![ast::InterfaceItem::ModuleProcedure {
                names: candidates.iter().map(|c| c.to_string()).collect(),
                loc: loc(),
            }],
            loc: loc(),
        })],
        contains: candidates.iter().map(|c| integer_function(c)).collect(),
        loc: loc(),
    }
}

fn program_using(modules: &[&str]) -> ast::Program {
    ast::Program {
        name: "p".to_string(),
        decls: modules
            .iter()
            .map(|module| {
                ast::UnitDecl::Use(ast::Use {
                    module: module.to_string(),
                    only: false,
                    symbols: Vec::new(),
                    loc: loc(),
                })
            })
            .collect(),
        body: Vec::new(),
        contains: Vec::new(),
        loc: loc(),
    }
}

fn resolve_unit(
    unit: &ast::TranslationUnit,
    config: ResolverConfig,
    loader: &mut dyn ModuleLoader,
) -> (SymbolStore, Diagnostics, Option<Resolution>) {
    let mut store = SymbolStore::new();
    let mut diagnostics = Diagnostics::new();
    let resolution =
        resolve_translation_unit(unit, &mut store, &mut diagnostics, config, loader).ok();
    (store, diagnostics, resolution)
}

fn program_table(store: &SymbolStore, resolution: &Resolution) -> SymtabId {
    let root = match store.symbol(resolution.unit) {
        Symbol::TranslationUnit(tu) => tu.symtab,
        _ => unreachable!(),
    };
    let program = store.get_symbol(root, "p").unwrap();
    match store.symbol(program) {
        Symbol::Program(p) => p.symtab,
        _ => unreachable!(),
    }
}

fn generic_candidates(store: &SymbolStore, table: SymtabId, name: &str) -> Vec<String> {
    let generic = store.get_symbol(table, name).unwrap();
    match store.symbol(generic) {
        Symbol::GenericProcedure(g) => g
            .procs
            .iter()
            .map(|proc| {
                store
                    .symbol_name(store.symbol_get_past_external(*proc))
                    .to_string()
            })
            .collect(),
        other => panic!("`{name}` is not a generic procedure: {other:?}"),
    }
}

#[test]
fn test_generic_merge_across_two_uses() {
    let unit = ast::TranslationUnit {
        items: vec![
            ast::Item::Module(module_with_generic("a", &["pa1", "pa2"])),
            ast::Item::Module(module_with_generic("b", &["pb1"])),
            ast::Item::Program(program_using(&["a", "b"])),
        ],
    };
    let mut loader = NoLoader;
    let (store, diagnostics, resolution) =
        resolve_unit(&unit, ResolverConfig::default(), &mut loader);
    assert!(!diagnostics.has_error());
    let resolution = resolution.unwrap();
    let table = program_table(&store, &resolution);
    assert_eq!(
        generic_candidates(&store, table, "plus"),
        vec!["pa1", "pa2", "pb1"]
    );
    let mut verify_diagnostics = Diagnostics::new();
    assert!(verify(&store, resolution.unit, true, &mut verify_diagnostics));
}

#[test]
fn test_generic_merge_is_commutative_as_a_set() {
    let unit = ast::TranslationUnit {
        items: vec![
            ast::Item::Module(module_with_generic("a", &["pa1", "pa2"])),
            ast::Item::Module(module_with_generic("b", &["pb1"])),
            ast::Item::Program(program_using(&["b", "a"])),
        ],
    };
    let mut loader = NoLoader;
    let (store, diagnostics, resolution) =
        resolve_unit(&unit, ResolverConfig::default(), &mut loader);
    assert!(!diagnostics.has_error());
    let resolution = resolution.unwrap();
    let table = program_table(&store, &resolution);
    let mut candidates = generic_candidates(&store, table, "plus");
    candidates.sort();
    assert_eq!(candidates, vec!["pa1", "pa2", "pb1"]);
}

#[test]
fn test_generic_merge_is_idempotent() {
    let unit = ast::TranslationUnit {
        items: vec![
            ast::Item::Module(module_with_generic("a", &["pa1", "pa2"])),
            ast::Item::Program(program_using(&["a", "a"])),
        ],
    };
    let mut loader = NoLoader;
    let (store, diagnostics, resolution) =
        resolve_unit(&unit, ResolverConfig::default(), &mut loader);
    assert!(!diagnostics.has_error());
    let resolution = resolution.unwrap();
    let table = program_table(&store, &resolution);
    assert_eq!(
        generic_candidates(&store, table, "plus"),
        vec!["pa1", "pa2"]
    );
}

#[test]
fn test_only_list_and_rename() {
    let module = ast::Module {
        name: "m".to_string(),
        decls: Vec::new(),
        contains: vec![integer_function("f"), integer_function("g")],
        loc: loc(),
    };
    let unit = ast::TranslationUnit {
        items: vec![
            ast::Item::Module(module),
            ast::Item::Program(ast::Program {
                name: "p".to_string(),
                decls: vec![ast::UnitDecl::Use(ast::Use {
                    module: "m".to_string(),
                    only: true,
                    symbols: vec![ast::UseItem::Rename {
                        local: "h".to_string(),
                        orig: "f".to_string(),
                    }],
                    loc: loc(),
                })],
                body: Vec::new(),
                contains: Vec::new(),
                loc: loc(),
            }),
        ],
    };
    let mut loader = NoLoader;
    let (store, diagnostics, resolution) =
        resolve_unit(&unit, ResolverConfig::default(), &mut loader);
    assert!(!diagnostics.has_error());
    let resolution = resolution.unwrap();
    let table = program_table(&store, &resolution);
    let h = store.get_symbol(table, "h").unwrap();
    match store.symbol(h) {
        Symbol::ExternalSymbol(e) => {
            assert_eq!(e.original_name, "f");
            assert_eq!(e.module_name, "m");
        }
        _ => unreachable!(),
    }
    assert!(store.get_symbol(table, "g").is_none());
    let mut verify_diagnostics = Diagnostics::new();
    assert!(verify(&store, resolution.unit, true, &mut verify_diagnostics));
}

#[test]
fn test_private_symbol_not_importable() {
    let module = ast::Module {
        name: "m".to_string(),
        decls: vec![ast::UnitDecl::AccessStmt(ast::AccessStmt {
            access: ast::AccessSpec::Private,
            names: vec!["f".to_string()],
            loc: loc(),
        })],
        contains: vec![integer_function("f")],
        loc: loc(),
    };
    let unit = ast::TranslationUnit {
        items: vec![
            ast::Item::Module(module),
            ast::Item::Program(ast::Program {
                name: "p".to_string(),
                decls: vec![ast::UnitDecl::Use(ast::Use {
                    module: "m".to_string(),
                    only: true,
                    symbols: vec![ast::UseItem::Name("f".to_string())],
                    loc: loc(),
                })],
                body: Vec::new(),
                contains: Vec::new(),
                loc: loc(),
            }),
        ],
    };
    let mut loader = NoLoader;
    let config = ResolverConfig {
        continue_on_error: true,
        ..ResolverConfig::default()
    };
    let (_store, diagnostics, resolution) = resolve_unit(&unit, config, &mut loader);
    assert!(resolution.is_some());
    assert_eq!(diagnostics.error_kinds(), vec![ErrorKind::UnresolvedSymbol]);
}

#[test]
fn test_module_loaded_through_registry() {
    let mut registry = ModuleRegistry::new();
    registry.register(module_with_generic("a", &["pa1"]));
    let unit = ast::TranslationUnit {
        items: vec![ast::Item::Program(program_using(&["a"]))],
    };
    let (store, diagnostics, resolution) =
        resolve_unit(&unit, ResolverConfig::default(), &mut registry);
    assert!(!diagnostics.has_error());
    let resolution = resolution.unwrap();
    let table = program_table(&store, &resolution);
    assert_eq!(generic_candidates(&store, table, "plus"), vec!["pa1"]);
    let mut verify_diagnostics = Diagnostics::new();
    assert!(verify(&store, resolution.unit, true, &mut verify_diagnostics));
}

#[test]
fn test_cyclic_import_reported() {
    let use_of = |module: &str| {
        ast::UnitDecl::Use(ast::Use {
            module: module.to_string(),
            only: false,
            symbols: Vec::new(),
            loc: loc(),
        })
    };
    let mut registry = ModuleRegistry::new();
    registry.register(ast::Module {
        name: "a".to_string(),
        decls: vec![use_of("b")],
        contains: vec![integer_function("fa")],
        loc: loc(),
    });
    registry.register(ast::Module {
        name: "b".to_string(),
        decls: vec![use_of("a")],
        contains: vec![integer_function("fb")],
        loc: loc(),
    });
    let unit = ast::TranslationUnit {
        items: vec![ast::Item::Program(program_using(&["a"]))],
    };
    let config = ResolverConfig {
        continue_on_error: true,
        ..ResolverConfig::default()
    };
    let (_store, diagnostics, resolution) = resolve_unit(&unit, config, &mut registry);
    assert!(resolution.is_some());
    assert!(diagnostics
        .error_kinds()
        .contains(&ErrorKind::CyclicImport));
}

#[test]
fn test_import_shadow_warning_on_reimport() {
    // Importing a plain function over an existing local import of a
    // different symbol warns and replaces.
    let module_a = ast::Module {
        name: "a".to_string(),
        decls: Vec::new(),
        contains: vec![integer_function("f")],
        loc: loc(),
    };
    let module_b = ast::Module {
        name: "b".to_string(),
        decls: Vec::new(),
        contains: vec![integer_function("f")],
        loc: loc(),
    };
    let unit = ast::TranslationUnit {
        items: vec![
            ast::Item::Module(module_a),
            ast::Item::Module(module_b),
            ast::Item::Program(program_using(&["a", "b"])),
        ],
    };
    let mut loader = NoLoader;
    let (store, diagnostics, resolution) =
        resolve_unit(&unit, ResolverConfig::default(), &mut loader);
    assert!(!diagnostics.has_error());
    assert_eq!(diagnostics.len(), 1); // the shadow warning
    let resolution = resolution.unwrap();
    let table = program_table(&store, &resolution);
    let f = store.get_symbol(table, "f").unwrap();
    match store.symbol(f) {
        Symbol::ExternalSymbol(e) => assert_eq!(e.module_name, "b"),
        _ => unreachable!(),
    }
}
