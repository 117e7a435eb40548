// Copyright contributors to the frt compiler project
// SPDX-License-Identifier: Apache-2.0

// The syntactic AST. Every node carries the `Location` the parser attached
// to it; the resolver copies locations into the semantic tree and into
// diagnostics, and never reads source text itself.

use frt_asr::Location;

#[derive(Clone, Debug, PartialEq, Default)]
pub struct TranslationUnit {
    pub items: Vec<Item>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Item {
    Module(Module),
    Submodule(Submodule),
    Program(Program),
    Procedure(Procedure),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Module {
    pub name: String,
    pub decls: Vec<UnitDecl>,
    pub contains: Vec<Procedure>,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Submodule {
    pub name: String,
    /// The module this submodule extends.
    pub parent: String,
    pub decls: Vec<UnitDecl>,
    pub contains: Vec<Procedure>,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    pub name: String,
    pub decls: Vec<UnitDecl>,
    pub body: Vec<Stmt>,
    pub contains: Vec<Procedure>,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub enum UnitDecl {
    Use(Use),
    Implicit(Implicit),
    Declaration(Declaration),
    Interface(Interface),
    DerivedType(DerivedType),
    EnumDef(EnumDef),
    UnionDef(UnionDef),
    Template(Template),
    Requirement(Requirement),
    Instantiate(Instantiate),
    AccessStmt(AccessStmt),
    Pragma(Pragma),
}

/// A bare `public` / `private` statement. With no names it sets the scope
/// default; with names it sets the access of those entities.
#[derive(Clone, Debug, PartialEq)]
pub struct AccessStmt {
    pub access: AccessSpec,
    pub names: Vec<String>,
    pub loc: Location,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessSpec {
    Public,
    Private,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Use {
    pub module: String,
    /// `use M, only: ...`
    pub only: bool,
    pub symbols: Vec<UseItem>,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub enum UseItem {
    Name(String),
    /// `use M, local => orig`
    Rename { local: String, orig: String },
}

/// `implicit none` when `spec` is absent, otherwise an
/// `implicit <type> (letter-ranges)` statement.
#[derive(Clone, Debug, PartialEq)]
pub struct Implicit {
    pub spec: Option<ImplicitSpec>,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImplicitSpec {
    pub type_spec: TypeSpec,
    pub ranges: Vec<(char, char)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Declaration {
    pub type_spec: TypeSpec,
    pub attrs: Vec<DeclAttr>,
    pub entities: Vec<EntityDecl>,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DeclAttr {
    Intent(IntentSpec),
    Parameter,
    Save,
    Pointer,
    Allocatable,
    Dimension(Vec<DimSpec>),
    Optional,
    Access(AccessSpec),
    BindC { name: Option<String> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntentSpec {
    In,
    Out,
    InOut,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EntityDecl {
    pub name: String,
    /// Per-entity dimensions, overriding a `dimension` attribute.
    pub dims: Option<Vec<DimSpec>>,
    pub init: Option<Expr>,
    pub loc: Location,
}

/// One dimension specifier; `start` and `length` both absent spells the
/// deferred shape `:`.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct DimSpec {
    pub start: Option<Expr>,
    pub length: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypeSpec {
    Integer { kind: Option<u8> },
    Real { kind: Option<u8> },
    Complex { kind: Option<u8> },
    Logical { kind: Option<u8> },
    Character { len: Option<LenSpec>, kind: Option<u8> },
    /// `type(T)`: a derived type, or a template type parameter.
    Named { name: String },
    /// `class(T)`: the polymorphic pass-object form of `type(T)`.
    Class { name: String },
    /// `procedure(f)`: a procedure variable with the signature of `f`; with
    /// no interface name, the signature of the enclosing procedure.
    ProcedureType { interface: Option<String> },
}

#[derive(Clone, Debug, PartialEq)]
pub enum LenSpec {
    Expr(Expr),
    /// `len=*`
    Assumed,
    /// `len=:`
    Deferred,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Interface {
    pub header: InterfaceHeader,
    pub items: Vec<InterfaceItem>,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InterfaceHeader {
    /// A named generic: `interface plus`.
    Name(String),
    /// An intrinsic operator overload: `interface operator (+)`. Carries
    /// the operator spelling, e.g. `+`, `==`.
    Operator(String),
    /// A user-defined operator: `interface operator (.op.)`. Carries the
    /// bare name `op`.
    DefinedOperator(String),
    /// `interface assignment (=)`.
    Assignment,
    /// An anonymous interface block holding headers of external procedures.
    None,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InterfaceItem {
    /// An interface body: a procedure header with no executable part.
    Procedure(Procedure),
    /// `module procedure p, q` naming procedures declared elsewhere.
    ModuleProcedure { names: Vec<String>, loc: Location },
}

#[derive(Clone, Debug, PartialEq)]
pub struct DerivedType {
    pub name: String,
    pub extends: Option<String>,
    pub is_abstract: bool,
    pub bind_c: bool,
    pub alignment: Option<Expr>,
    pub members: Vec<Declaration>,
    pub bindings: Vec<TypeBoundItem>,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypeBoundItem {
    Procedure(TypeBoundProc),
    /// `generic :: name => p, q`
    GenericBinding {
        generic_name: String,
        proc_names: Vec<String>,
        loc: Location,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeBoundProc {
    pub binding_name: String,
    /// `procedure :: binding => proc`; absent when the procedure shares the
    /// binding name.
    pub proc_name: Option<String>,
    pub deferred: bool,
    pub nopass: bool,
    /// `pass(self_name)`.
    pub pass_name: Option<String>,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumDef {
    pub name: Option<String>,
    pub members: Vec<(String, Option<Expr>)>,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UnionDef {
    pub name: String,
    pub members: Vec<Declaration>,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Requirement {
    pub name: String,
    pub params: Vec<String>,
    pub decls: Vec<UnitDecl>,
    pub loc: Location,
}

/// One `require r(a, b)` clause inside a template.
#[derive(Clone, Debug, PartialEq)]
pub struct Require {
    pub name: String,
    pub args: Vec<String>,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Template {
    pub name: String,
    pub params: Vec<String>,
    pub requires: Vec<Require>,
    pub decls: Vec<UnitDecl>,
    pub contains: Vec<Procedure>,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Instantiate {
    pub template: String,
    pub args: Vec<TemplateArg>,
    /// `instantiate T(integer), only: add_integer => add` pairs of
    /// (local name, template symbol name).
    pub renames: Vec<(String, String)>,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TemplateArg {
    Type(TypeSpec),
    Symbol(String),
    /// An intrinsic operator spelling such as `+`.
    Operator(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Pragma {
    /// The pragma line without the directive word. The resolver recognises
    /// `simd <var>...`.
    pub text: String,
    pub loc: Location,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcKind {
    Subroutine,
    Function,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct ProcAttrs {
    pub pure_procedure: bool,
    pub elemental: bool,
    /// `module subroutine` / `module function`: forward-declared in a
    /// module, implemented in a submodule.
    pub module_procedure: bool,
    /// `bind(c)` with an optional explicit binding name.
    pub bind_c: Option<Option<String>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Procedure {
    pub kind: ProcKind,
    pub name: String,
    pub args: Vec<String>,
    /// Function result name; the function name itself when absent.
    pub result: Option<String>,
    pub attrs: ProcAttrs,
    pub decls: Vec<UnitDecl>,
    pub body: Vec<Stmt>,
    pub contains: Vec<Procedure>,
    pub loc: Location,
}

// ------------------------------------------------------------------
// Statements.

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Assignment {
        target: Expr,
        value: Expr,
        loc: Location,
    },
    Call {
        target: CallTarget,
        args: Vec<Option<Expr>>,
        loc: Location,
    },
    /// An alternative entry point with its own formal list.
    Entry {
        name: String,
        args: Vec<String>,
        loc: Location,
    },
    Select {
        test: Expr,
        cases: Vec<Case>,
        default: Vec<Stmt>,
        loc: Location,
    },
    Block {
        name: String,
        decls: Vec<UnitDecl>,
        body: Vec<Stmt>,
        loc: Location,
    },
    /// `associate (name => selector, ...) ... end associate`.
    Associate {
        associations: Vec<Association>,
        body: Vec<Stmt>,
        loc: Location,
    },
    Return {
        loc: Location,
    },
    ExprStmt {
        expr: Expr,
        loc: Location,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum CallTarget {
    Name(String),
    /// `base%name(...)`: a type-bound procedure call.
    Method { base: String, name: String },
}

/// One `name => selector` association.
#[derive(Clone, Debug, PartialEq)]
pub struct Association {
    pub name: String,
    pub selector: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Case {
    pub values: Vec<Expr>,
    pub body: Vec<Stmt>,
    pub fall_through: bool,
}

// ------------------------------------------------------------------
// Expressions.

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Name {
        name: String,
        loc: Location,
    },
    Int {
        value: i64,
        loc: Location,
    },
    Real {
        value: String,
        loc: Location,
    },
    Logical {
        value: bool,
        loc: Location,
    },
    Str {
        value: String,
        loc: Location,
    },
    BinOp {
        op: BinOpKind,
        left: Box<Expr>,
        right: Box<Expr>,
        loc: Location,
    },
    /// `left .op. right` with a user-defined operator.
    DefinedOp {
        name: String,
        left: Box<Expr>,
        right: Box<Expr>,
        loc: Location,
    },
    /// A call of a named procedure. `None` arguments are omitted optional
    /// arguments.
    Call {
        name: String,
        args: Vec<Option<Expr>>,
        loc: Location,
    },
    /// `base%name(...)`.
    MethodCall {
        base: String,
        name: String,
        args: Vec<Option<Expr>>,
        loc: Location,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
}

impl BinOpKind {
    /// The source spelling, which is also the accumulator key for operator
    /// overload interfaces.
    pub fn spelling(&self) -> &'static str {
        use BinOpKind::*;
        match self {
            Add => "+",
            Sub => "-",
            Mul => "*",
            Div => "/",
            Eq => "==",
            NotEq => "/=",
            Lt => "<",
            LtE => "<=",
            Gt => ">",
            GtE => ">=",
        }
    }
}

impl Expr {
    pub fn loc(&self) -> Location {
        use Expr::*;
        match self {
            Name { loc, .. }
            | Int { loc, .. }
            | Real { loc, .. }
            | Logical { loc, .. }
            | Str { loc, .. }
            | BinOp { loc, .. }
            | DefinedOp { loc, .. }
            | Call { loc, .. }
            | MethodCall { loc, .. } => *loc,
        }
    }

    pub fn name<T: ToString>(name: T, loc: Location) -> Expr {
        Expr::Name {
            name: name.to_string(),
            loc,
        }
    }

    pub fn int(value: i64, loc: Location) -> Expr {
        Expr::Int { value, loc }
    }
}

impl Stmt {
    pub fn loc(&self) -> Location {
        use Stmt::*;
        match self {
            Assignment { loc, .. }
            | Call { loc, .. }
            | Entry { loc, .. }
            | Select { loc, .. }
            | Block { loc, .. }
            | Associate { loc, .. }
            | Return { loc }
            | ExprStmt { loc, .. } => *loc,
        }
    }
}
