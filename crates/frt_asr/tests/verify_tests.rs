// Copyright contributors to the frt compiler project
// SPDX-License-Identifier: Apache-2.0

use expect_test::expect;

use frt_asr::asr::{
    Access, Assignment, Expr, Intent, IntegerConstant, Presence, Program, Stmt, Storage, Symbol,
    TranslationUnit, Var, Variable,
};
use frt_asr::diagnostics::{Diagnostics, ErrorKind};
use frt_asr::location::Location;
use frt_asr::symbols::{SymbolId, SymbolStore, SymtabId};
use frt_asr::types::{ArrayPhysical, ArrayType, Dimension, Ttype};
use frt_asr::verify::verify;

//
// The verifier over hand-built trees: accept well-formed ones, reject each
// violated invariant.
//

fn loc() -> Location {
    Location::default()
}

fn new_unit(store: &mut SymbolStore) -> (SymbolId, SymtabId) {
    let root = store.new_symtab(None);
    let tu = store.alloc_symbol(Symbol::TranslationUnit(TranslationUnit {
        symtab: root,
        items: Vec::new(),
        loc: loc(),
    }));
    store.set_owner(root, tu);
    (tu, root)
}

fn new_program(store: &mut SymbolStore, root: SymtabId, name: &str) -> (SymbolId, SymtabId) {
    let symtab = store.new_symtab(Some(root));
    let program = store.alloc_symbol(Symbol::Program(Program {
        name: name.to_string(),
        symtab,
        body: Vec::new(),
        dependencies: Vec::new(),
        loc: loc(),
    }));
    store.set_owner(symtab, program);
    store.add_symbol(root, name, program).unwrap();
    (program, symtab)
}

fn new_variable(store: &mut SymbolStore, table: SymtabId, name: &str, ty: Ttype) -> SymbolId {
    let sym = store.alloc_symbol(Symbol::Variable(Variable {
        name: name.to_string(),
        parent_symtab: table,
        ty,
        symbolic_value: None,
        value: None,
        intent: Intent::Local,
        storage: Storage::Default,
        access: Access::Public,
        presence: Presence::Required,
        dependencies: Vec::new(),
        type_declaration: None,
        loc: loc(),
    }));
    store.add_symbol(table, name, sym).unwrap();
    sym
}

#[test]
fn test_empty_unit_verifies() {
    let mut store = SymbolStore::new();
    let (tu, _root) = new_unit(&mut store);
    let mut diagnostics = Diagnostics::new();
    assert!(verify(&store, tu, true, &mut diagnostics));
    assert!(diagnostics.is_empty());
}

#[test]
fn test_missing_owner_rejected() {
    let mut store = SymbolStore::new();
    let root = store.new_symtab(None);
    let tu = store.alloc_symbol(Symbol::TranslationUnit(TranslationUnit {
        symtab: root,
        items: Vec::new(),
        loc: loc(),
    }));
    // set_owner was never called; the back-pointer is absent.
    let mut diagnostics = Diagnostics::new();
    assert!(!verify(&store, tu, true, &mut diagnostics));
    assert!(diagnostics.has_error());
}

#[test]
fn test_program_with_variable_verifies() {
    let mut store = SymbolStore::new();
    let (tu, root) = new_unit(&mut store);
    let (_program, symtab) = new_program(&mut store, root, "main");
    new_variable(&mut store, symtab, "n", Ttype::Integer { kind: 4 });
    let mut diagnostics = Diagnostics::new();
    assert!(verify(&store, tu, true, &mut diagnostics));
}

#[test]
fn test_variable_in_wrong_table_rejected() {
    let mut store = SymbolStore::new();
    let (tu, root) = new_unit(&mut store);
    let (_program, symtab) = new_program(&mut store, root, "main");
    // The variable claims a different parent table than the one binding it.
    let sym = store.alloc_symbol(Symbol::Variable(Variable {
        name: "n".to_string(),
        parent_symtab: root,
        ty: Ttype::Integer { kind: 4 },
        symbolic_value: None,
        value: None,
        intent: Intent::Local,
        storage: Storage::Default,
        access: Access::Public,
        presence: Presence::Required,
        dependencies: Vec::new(),
        type_declaration: None,
        loc: loc(),
    }));
    store.add_symbol(symtab, "n", sym).unwrap();
    let mut diagnostics = Diagnostics::new();
    assert!(!verify(&store, tu, true, &mut diagnostics));
}

#[test]
fn test_dependency_drift_rejected() {
    let mut store = SymbolStore::new();
    let (tu, root) = new_unit(&mut store);
    let (_program, symtab) = new_program(&mut store, root, "main");
    let sym = new_variable(&mut store, symtab, "n", Ttype::Integer { kind: 4 });
    if let Symbol::Variable(v) = store.symbol_mut(sym) {
        // Claim a dependency the initializer never references.
        v.dependencies.push("ghost".to_string());
    }
    let mut diagnostics = Diagnostics::new();
    assert!(!verify(&store, tu, true, &mut diagnostics));
    assert_eq!(diagnostics.error_kinds(), vec![ErrorKind::DependencyDrift]);
}

#[test]
fn test_pointer_of_allocatable_rejected() {
    let mut store = SymbolStore::new();
    let (tu, root) = new_unit(&mut store);
    let (_program, symtab) = new_program(&mut store, root, "main");
    let bad = Ttype::Pointer(Box::new(Ttype::Allocatable(Box::new(Ttype::Real {
        kind: 8,
    }))));
    new_variable(&mut store, symtab, "p", bad);
    let mut diagnostics = Diagnostics::new();
    assert!(!verify(&store, tu, true, &mut diagnostics));
    assert_eq!(diagnostics.error_kinds(), vec![ErrorKind::TypeShape]);
}

#[test]
fn test_nested_array_rejected() {
    let mut store = SymbolStore::new();
    let (tu, root) = new_unit(&mut store);
    let (_program, symtab) = new_program(&mut store, root, "main");
    let inner = Ttype::Array(Box::new(ArrayType {
        elem: Ttype::Integer { kind: 4 },
        dims: vec![Dimension::default()],
        physical: ArrayPhysical::Descriptor,
    }));
    let bad = Ttype::Array(Box::new(ArrayType {
        elem: inner,
        dims: vec![Dimension::default()],
        physical: ArrayPhysical::Descriptor,
    }));
    new_variable(&mut store, symtab, "m", bad);
    let mut diagnostics = Diagnostics::new();
    assert!(!verify(&store, tu, true, &mut diagnostics));
}

#[test]
fn test_assignment_to_intent_in_rejected() {
    let mut store = SymbolStore::new();
    let (tu, root) = new_unit(&mut store);
    let (program, symtab) = new_program(&mut store, root, "main");
    let sym = new_variable(&mut store, symtab, "n", Ttype::Integer { kind: 4 });
    if let Symbol::Variable(v) = store.symbol_mut(sym) {
        v.intent = Intent::In;
    }
    let assignment = Assignment {
        target: Var::new(sym).to_texpr(Ttype::Integer { kind: 4 }, loc()),
        value: IntegerConstant::new(1).to_texpr(Ttype::Integer { kind: 4 }, loc()),
        realloc_lhs: false,
        loc: loc(),
    }
    .to_stmt();
    if let Symbol::Program(p) = store.symbol_mut(program) {
        p.body.push(assignment);
        // The walked set picks up the reference; keep the list coherent.
    }
    let mut diagnostics = Diagnostics::new();
    assert!(!verify(&store, tu, true, &mut diagnostics));
    assert_eq!(diagnostics.error_kinds(), vec![ErrorKind::IntentViolation]);
}

#[test]
fn test_parameter_single_assignment() {
    let mut store = SymbolStore::new();
    let (tu, root) = new_unit(&mut store);
    let (program, symtab) = new_program(&mut store, root, "main");
    let sym = new_variable(&mut store, symtab, "c", Ttype::Integer { kind: 4 });
    if let Symbol::Variable(v) = store.symbol_mut(sym) {
        v.storage = Storage::Parameter;
    }
    let assign = || {
        Assignment {
            target: Var::new(sym).to_texpr(Ttype::Integer { kind: 4 }, loc()),
            value: IntegerConstant::new(1).to_texpr(Ttype::Integer { kind: 4 }, loc()),
            realloc_lhs: false,
            loc: loc(),
        }
        .to_stmt()
    };
    if let Symbol::Program(p) = store.symbol_mut(program) {
        p.body.push(assign());
    }
    let mut diagnostics = Diagnostics::new();
    assert!(verify(&store, tu, true, &mut diagnostics));

    // The second assignment in the same scope is the violation.
    if let Symbol::Program(p) = store.symbol_mut(program) {
        p.body.push(assign());
    }
    let mut diagnostics = Diagnostics::new();
    assert!(!verify(&store, tu, true, &mut diagnostics));
    assert_eq!(diagnostics.error_kinds(), vec![ErrorKind::IntentViolation]);
}

#[test]
fn test_duplicate_counter_rejected() {
    // Two nodes claiming the same table: the owner round-trip breaks for
    // one of them.
    let mut store = SymbolStore::new();
    let (tu, root) = new_unit(&mut store);
    let (_program, symtab) = new_program(&mut store, root, "first");
    let second = store.alloc_symbol(Symbol::Program(Program {
        name: "second".to_string(),
        symtab,
        body: Vec::new(),
        dependencies: Vec::new(),
        loc: loc(),
    }));
    store.add_symbol(root, "second", second).unwrap();
    let mut diagnostics = Diagnostics::new();
    assert!(!verify(&store, tu, true, &mut diagnostics));
}

#[test]
fn test_diagnostic_messages_are_stable() {
    let mut store = SymbolStore::new();
    let (tu, root) = new_unit(&mut store);
    let (_program, symtab) = new_program(&mut store, root, "main");
    let sym = new_variable(&mut store, symtab, "n", Ttype::Integer { kind: 4 });
    if let Symbol::Variable(v) = store.symbol_mut(sym) {
        v.dependencies.push("ghost".to_string());
    }
    let mut diagnostics = Diagnostics::new();
    assert!(!verify(&store, tu, true, &mut diagnostics));
    let rendered: Vec<String> = diagnostics
        .iter()
        .map(|d| format!("{:?}: {}", d.level, d.message))
        .collect();
    expect![[r#"
        Error: variable `n` doesn't depend on `ghost` but it is found in its dependency list
    "#]]
    .assert_eq(&format!("{}\n", rendered.join("\n")));
}

#[test]
fn test_expr_stmt_in_unit_items() {
    let mut store = SymbolStore::new();
    let (tu, _root) = new_unit(&mut store);
    if let Symbol::TranslationUnit(unit) = store.symbol_mut(tu) {
        unit.items.push(frt_asr::asr::UnitItem::Stmt(Stmt::ExprStmt(
            IntegerConstant::new(42).to_texpr(Ttype::Integer { kind: 4 }, loc()),
        )));
    }
    let mut diagnostics = Diagnostics::new();
    assert!(verify(&store, tu, true, &mut diagnostics));
}

#[test]
fn test_var_outside_scope_rejected() {
    let mut store = SymbolStore::new();
    let (tu, root) = new_unit(&mut store);
    let (first_program, first_symtab) = new_program(&mut store, root, "first");
    let (_second_program, second_symtab) = new_program(&mut store, root, "second");
    let foreign = new_variable(&mut store, second_symtab, "x", Ttype::Integer { kind: 4 });
    let _ = first_symtab;
    if let Symbol::Program(p) = store.symbol_mut(first_program) {
        // `first` references a variable owned by `second`'s table, which is
        // not an ancestor scope.
        p.body.push(Stmt::ExprStmt(
            Var::new(foreign).to_texpr(Ttype::Integer { kind: 4 }, loc()),
        ));
    }
    let mut diagnostics = Diagnostics::new();
    assert!(!verify(&store, tu, true, &mut diagnostics));
}

#[test]
fn test_expr_is_constant_helpers() {
    let int = IntegerConstant::new(7).to_texpr(Ttype::Integer { kind: 4 }, loc());
    assert!(frt_asr::asr::is_value_constant(&int));
    assert_eq!(frt_asr::asr::extract_integer_value(&int), Some(7));
    match int.expression() {
        Expr::IntegerConstant(c) => assert_eq!(c.value, 7),
        _ => unreachable!(),
    }
}
