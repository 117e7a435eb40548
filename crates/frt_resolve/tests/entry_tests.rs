// Copyright contributors to the frt compiler project
// SPDX-License-Identifier: Apache-2.0

use frt_asr::asr::{Expr, Presence, Stmt, Symbol};
use frt_asr::diagnostics::Diagnostics;
use frt_asr::symbols::SymbolStore;
use frt_asr::verify::verify;
use frt_asr::Location;
use frt_resolve::{resolve_translation_unit, NoLoader, Resolution, ResolverConfig};
use frt_syntax::ast;

fn loc() -> Location {
    Location::default()
}

fn integer_decl(names: &[&str]) -> ast::UnitDecl {
    ast::UnitDecl::Declaration(ast::Declaration {
        type_spec: ast::TypeSpec::Integer { kind: None },
        attrs: Vec::new(),
        entities: names
            .iter()
            .map(|name| ast::EntityDecl {
                name: name.to_string(),
                dims: None,
                init: None,
                loc: loc(),
            })
            .collect(),
        loc: loc(),
    })
}

// subroutine s(a, b) with `entry e(b, c)`.
fn subroutine_with_entry() -> ast::Procedure {
    ast::Procedure {
        kind: ast::ProcKind::Subroutine,
        name: "s".to_string(),
        args: vec!["a".to_string(), "b".to_string()],
        result: None,
        attrs: ast::ProcAttrs::default(),
        decls: vec![integer_decl(&["a", "b", "c"])],
        body: vec![ast::Stmt::Entry {
            name: "e".to_string(),
            args: vec!["b".to_string(), "c".to_string()],
            loc: loc(),
        }],
        contains: Vec::new(),
        loc: loc(),
    }
}

fn resolve_entry_unit() -> (SymbolStore, Diagnostics, Resolution) {
    let unit = ast::TranslationUnit {
        items: vec![ast::Item::Procedure(subroutine_with_entry())],
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
    (store, diagnostics, resolution)
}

fn arg_names(store: &SymbolStore, function: frt_asr::symbols::SymbolId) -> Vec<String> {
    match store.symbol(function) {
        Symbol::Function(f) => f
            .args
            .iter()
            .map(|arg| match arg.expression() {
                Expr::Var(var) => store.symbol_name(var.sym).to_string(),
                _ => unreachable!(),
            })
            .collect(),
        _ => unreachable!(),
    }
}

#[test]
fn test_entry_rewrite_produces_three_symbols() {
    let (store, diagnostics, resolution) = resolve_entry_unit();
    assert!(!diagnostics.has_error());
    let root = match store.symbol(resolution.unit) {
        Symbol::TranslationUnit(tu) => tu.symtab,
        _ => unreachable!(),
    };
    for name in ["s", "e", "s_main__lcompilers"] {
        let sym = store.get_symbol(root, name).unwrap();
        assert!(matches!(store.symbol(sym), Symbol::Function(_)));
    }
}

#[test]
fn test_master_formals_are_the_union() {
    let (store, _diagnostics, resolution) = resolve_entry_unit();
    let root = match store.symbol(resolution.unit) {
        Symbol::TranslationUnit(tu) => tu.symtab,
        _ => unreachable!(),
    };
    let master = store.get_symbol(root, "s_main__lcompilers").unwrap();
    assert_eq!(
        arg_names(&store, master),
        vec!["entry__lcompilers", "a", "b", "c"]
    );
    // Everything behind the discriminator is optional.
    match store.symbol(master) {
        Symbol::Function(f) => {
            for arg in f.args.iter().skip(1) {
                let sym = match arg.expression() {
                    Expr::Var(var) => var.sym,
                    _ => unreachable!(),
                };
                match store.symbol(sym) {
                    Symbol::Variable(v) => assert_eq!(v.presence, Presence::Optional),
                    _ => unreachable!(),
                }
            }
        }
        _ => unreachable!(),
    }
}

#[test]
fn test_entry_argument_positions() {
    let (_store, _diagnostics, resolution) = resolve_entry_unit();
    assert_eq!(resolution.entry_argument_map.get("s"), Some(&vec![1, 2]));
    assert_eq!(resolution.entry_argument_map.get("e"), Some(&vec![2, 3]));
}

#[test]
fn test_stubs_delegate_to_master() {
    let (store, _diagnostics, resolution) = resolve_entry_unit();
    let root = match store.symbol(resolution.unit) {
        Symbol::TranslationUnit(tu) => tu.symtab,
        _ => unreachable!(),
    };
    let master = store.get_symbol(root, "s_main__lcompilers").unwrap();
    for (name, discriminator, present) in [("s", 1, [true, true, false]), ("e", 2, [false, true, true])]
    {
        let stub = store.get_symbol(root, name).unwrap();
        let (body, dependencies) = match store.symbol(stub) {
            Symbol::Function(f) => (&f.body, &f.dependencies),
            _ => unreachable!(),
        };
        assert_eq!(dependencies, &vec!["s_main__lcompilers".to_string()]);
        let call = match &body[0] {
            Stmt::SubroutineCall(call) => call,
            other => panic!("expected a delegation call, found {other:?}"),
        };
        assert_eq!(call.name, master);
        assert_eq!(call.args.len(), 4);
        let first = call.args[0].value.as_ref().unwrap();
        assert_eq!(frt_asr::asr::extract_integer_value(first), Some(discriminator));
        for (arg, expected_present) in call.args[1..].iter().zip(present) {
            assert_eq!(arg.value.is_some(), expected_present);
        }
    }
}

#[test]
fn test_entry_rewrite_verifies() {
    let (store, _diagnostics, resolution) = resolve_entry_unit();
    let mut verify_diagnostics = Diagnostics::new();
    let accepted = verify(&store, resolution.unit, true, &mut verify_diagnostics);
    assert!(
        accepted,
        "verification failed: {:?}",
        verify_diagnostics.drain()
    );
}
