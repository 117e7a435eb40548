// Copyright contributors to the frt compiler project
// SPDX-License-Identifier: Apache-2.0

// The definition of the abstract semantic representation (ASR): the symbol
// node variants, the statements and expressions that may appear in
// declaration-phase bodies, and the typed expression wrapper.
// Construction of this typed tree from the syntactic AST happens in the
// frt_resolve crate; invariants over it are re-checked in verify.rs.

use boolenum::BoolEnum;

use crate::location::Location;
use crate::symbols::{SymbolId, SymtabId};
use crate::types::{StringPhysical, Ttype};

#[derive(BoolEnum, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Abstract {
    True,
    False,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Intent {
    Local,
    In,
    Out,
    InOut,
    ReturnVar,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Storage {
    Default,
    Parameter,
    Save,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Access {
    Public,
    Private,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Presence {
    Required,
    Optional,
}

/// Classification of the value distribution of an Enum's members, recorded
/// by the resolver and re-derived by the verifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EnumValueType {
    IntegerConsecutiveFromZero,
    IntegerUnique,
    IntegerNotUnique,
    NonInteger,
}

// ------------------------------------------------------------------
// Symbols.
//
// Every symbol node is owned by exactly one symbol table; references
// between symbols are `SymbolId` handles into the store, never ownership
// edges. Variants that own a table carry `symtab`; the others carry
// `parent_symtab`.

#[derive(Clone, Debug, PartialEq)]
pub enum Symbol {
    TranslationUnit(TranslationUnit),
    Program(Program),
    Module(Module),
    Function(Function),
    Variable(Variable),
    Struct(Struct),
    Enum(Enum),
    Union(Union),
    GenericProcedure(GenericProcedure),
    CustomOperator(CustomOperator),
    StructMethodDeclaration(StructMethodDeclaration),
    ExternalSymbol(ExternalSymbol),
    Block(Block),
    AssociateBlock(AssociateBlock),
    Requirement(Requirement),
    Template(Template),
}

#[derive(Clone, Debug, PartialEq)]
pub enum UnitItem {
    Stmt(Stmt),
    Expr(TExpr),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TranslationUnit {
    pub symtab: SymtabId,
    pub items: Vec<UnitItem>,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    pub name: String,
    pub symtab: SymtabId,
    pub body: Vec<Stmt>,
    pub dependencies: Vec<String>,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Module {
    pub name: String,
    pub symtab: SymtabId,
    pub dependencies: Vec<String>,
    /// Set on submodules: the name of the module this one extends.
    pub parent_module: Option<String>,
    pub has_submodules: bool,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    pub name: String,
    pub symtab: SymtabId,
    /// `Var` expressions pointing at the argument Variables in `symtab`.
    pub args: Vec<TExpr>,
    pub body: Vec<Stmt>,
    pub return_var: Option<TExpr>,
    /// Always a `Ttype::FunctionType`; carries abi, purity and deftype.
    pub signature: Ttype,
    pub dependencies: Vec<String>,
    pub access: Access,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    pub name: String,
    pub parent_symtab: SymtabId,
    pub ty: Ttype,
    /// The initializer as written.
    pub symbolic_value: Option<TExpr>,
    /// The initializer reduced to a constant, when that was possible.
    pub value: Option<TExpr>,
    pub intent: Intent,
    pub storage: Storage,
    pub access: Access,
    pub presence: Presence,
    pub dependencies: Vec<String>,
    /// For struct-typed variables, the Struct (or ExternalSymbol) the type
    /// refers to.
    pub type_declaration: Option<SymbolId>,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Struct {
    pub name: String,
    pub symtab: SymtabId,
    /// Member names in declaration order.
    pub members: Vec<String>,
    /// Single inheritance: the parent Struct, if any. Members are not
    /// flattened; lookups walk the parent chain.
    pub parent: Option<SymbolId>,
    pub dependencies: Vec<String>,
    pub alignment: Option<TExpr>,
    pub is_abstract: Abstract,
    /// Set on `bind(c)` derived types; every `StructType` referring to this
    /// struct carries the same flag.
    pub is_c_interop: bool,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Enum {
    pub name: String,
    pub symtab: SymtabId,
    /// The common underlying type of every member.
    pub ty: Ttype,
    pub members: Vec<String>,
    pub value_type: EnumValueType,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Union {
    pub name: String,
    pub symtab: SymtabId,
    pub members: Vec<String>,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GenericProcedure {
    pub name: String,
    pub parent_symtab: SymtabId,
    pub procs: Vec<SymbolId>,
    pub access: Access,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CustomOperator {
    pub name: String,
    pub parent_symtab: SymtabId,
    pub procs: Vec<SymbolId>,
    pub access: Access,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructMethodDeclaration {
    pub name: String,
    /// Always the symbol table of the owning Struct.
    pub parent_symtab: SymtabId,
    pub proc: SymbolId,
    pub proc_name: String,
    /// The name of the pass-object dummy argument, when one is declared.
    pub self_argument: Option<String>,
    pub is_deferred: bool,
    pub is_nopass: bool,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExternalSymbol {
    pub name: String,
    pub parent_symtab: SymtabId,
    /// The actual symbol in another table. Absent only in pre-link trees.
    /// Must never point at another ExternalSymbol.
    pub external: Option<SymbolId>,
    pub module_name: String,
    pub original_name: String,
    /// Names of the nested tables between the module table and the target.
    pub scope_names: Vec<String>,
    pub access: Access,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub name: String,
    pub symtab: SymtabId,
    pub body: Vec<Stmt>,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssociateBlock {
    pub name: String,
    pub symtab: SymtabId,
    pub body: Vec<Stmt>,
    pub loc: Location,
}

/// One `require` clause of a Requirement or Template.
#[derive(Clone, Debug, PartialEq)]
pub struct Require {
    pub name: String,
    pub args: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Requirement {
    pub name: String,
    pub symtab: SymtabId,
    pub args: Vec<String>,
    pub requires: Vec<Require>,
    pub loc: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Template {
    pub name: String,
    pub symtab: SymtabId,
    pub args: Vec<String>,
    pub requires: Vec<Require>,
    pub loc: Location,
}

impl Symbol {
    pub fn name(&self) -> &str {
        use Symbol::*;
        match self {
            TranslationUnit(_) => "",
            Program(s) => &s.name,
            Module(s) => &s.name,
            Function(s) => &s.name,
            Variable(s) => &s.name,
            Struct(s) => &s.name,
            Enum(s) => &s.name,
            Union(s) => &s.name,
            GenericProcedure(s) => &s.name,
            CustomOperator(s) => &s.name,
            StructMethodDeclaration(s) => &s.name,
            ExternalSymbol(s) => &s.name,
            Block(s) => &s.name,
            AssociateBlock(s) => &s.name,
            Requirement(s) => &s.name,
            Template(s) => &s.name,
        }
    }

    pub fn loc(&self) -> Location {
        use Symbol::*;
        match self {
            TranslationUnit(s) => s.loc,
            Program(s) => s.loc,
            Module(s) => s.loc,
            Function(s) => s.loc,
            Variable(s) => s.loc,
            Struct(s) => s.loc,
            Enum(s) => s.loc,
            Union(s) => s.loc,
            GenericProcedure(s) => s.loc,
            CustomOperator(s) => s.loc,
            StructMethodDeclaration(s) => s.loc,
            ExternalSymbol(s) => s.loc,
            Block(s) => s.loc,
            AssociateBlock(s) => s.loc,
            Requirement(s) => s.loc,
            Template(s) => s.loc,
        }
    }

    /// The table this symbol owns, for the table-owning variants.
    pub fn own_symtab(&self) -> Option<SymtabId> {
        use Symbol::*;
        match self {
            TranslationUnit(s) => Some(s.symtab),
            Program(s) => Some(s.symtab),
            Module(s) => Some(s.symtab),
            Function(s) => Some(s.symtab),
            Struct(s) => Some(s.symtab),
            Enum(s) => Some(s.symtab),
            Union(s) => Some(s.symtab),
            Block(s) => Some(s.symtab),
            AssociateBlock(s) => Some(s.symtab),
            Requirement(s) => Some(s.symtab),
            Template(s) => Some(s.symtab),
            Variable(_) | GenericProcedure(_) | CustomOperator(_)
            | StructMethodDeclaration(_) | ExternalSymbol(_) => None,
        }
    }

    /// The table recorded on the non-owning variants.
    pub fn recorded_parent_symtab(&self) -> Option<SymtabId> {
        use Symbol::*;
        match self {
            Variable(s) => Some(s.parent_symtab),
            GenericProcedure(s) => Some(s.parent_symtab),
            CustomOperator(s) => Some(s.parent_symtab),
            StructMethodDeclaration(s) => Some(s.parent_symtab),
            ExternalSymbol(s) => Some(s.parent_symtab),
            _ => None,
        }
    }

    pub fn dependencies(&self) -> Option<&[String]> {
        use Symbol::*;
        match self {
            Program(s) => Some(&s.dependencies),
            Module(s) => Some(&s.dependencies),
            Function(s) => Some(&s.dependencies),
            Variable(s) => Some(&s.dependencies),
            Struct(s) => Some(&s.dependencies),
            _ => None,
        }
    }
}

// ------------------------------------------------------------------
// Expressions.

/// Typed expression: an `Expr` tagged with its `Ttype` and a source
/// location. Declaration-phase expressions always carry a resolved type;
/// errors are recorded in the diagnostics sink and the offending
/// declaration is dropped rather than represented.
#[derive(Clone, Debug, PartialEq)]
pub struct TExpr {
    expression: Expr,
    ty: Ttype,
    loc: Location,
}

impl TExpr {
    pub fn new(expression: Expr, ty: Ttype, loc: Location) -> TExpr {
        TExpr {
            expression,
            ty,
            loc,
        }
    }

    pub fn expression(&self) -> &Expr {
        &self.expression
    }

    pub fn get_type(&self) -> &Ttype {
        &self.ty
    }

    pub fn loc(&self) -> Location {
        self.loc
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Var(Var),
    FunctionCall(Box<FunctionCall>),
    IntegerConstant(IntegerConstant),
    RealConstant(RealConstant),
    LogicalConstant(LogicalConstant),
    StringConstant(StringConstant),
    BinaryOp(Box<BinaryOp>),
    Cast(Box<Cast>),
    StringPhysicalCast(Box<StringPhysicalCast>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Var {
    pub sym: SymbolId,
}

impl Var {
    pub fn new(sym: SymbolId) -> Var {
        Var { sym }
    }

    pub fn to_texpr(self, ty: Ttype, loc: Location) -> TExpr {
        TExpr::new(Expr::Var(self), ty, loc)
    }
}

/// One actual argument of a call. `value` is absent when an optional
/// parameter was not passed.
#[derive(Clone, Debug, PartialEq)]
pub struct CallArg {
    pub value: Option<TExpr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionCall {
    pub name: SymbolId,
    pub args: Vec<CallArg>,
}

impl FunctionCall {
    pub fn new(name: SymbolId, args: Vec<CallArg>) -> FunctionCall {
        FunctionCall { name, args }
    }

    pub fn to_texpr(self, ty: Ttype, loc: Location) -> TExpr {
        TExpr::new(Expr::FunctionCall(Box::new(self)), ty, loc)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct IntegerConstant {
    pub value: i64,
}

impl IntegerConstant {
    pub fn new(value: i64) -> IntegerConstant {
        IntegerConstant { value }
    }

    pub fn to_texpr(self, ty: Ttype, loc: Location) -> TExpr {
        TExpr::new(Expr::IntegerConstant(self), ty, loc)
    }
}

// Floats are carried as their source text, which keeps `Eq` available for
// the nodes that embed expressions.
#[derive(Clone, Debug, PartialEq)]
pub struct RealConstant {
    pub value: String,
}

impl RealConstant {
    pub fn new<T: ToString>(value: T) -> RealConstant {
        RealConstant {
            value: value.to_string(),
        }
    }

    pub fn to_texpr(self, ty: Ttype, loc: Location) -> TExpr {
        TExpr::new(Expr::RealConstant(self), ty, loc)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LogicalConstant {
    pub value: bool,
}

impl LogicalConstant {
    pub fn new(value: bool) -> LogicalConstant {
        LogicalConstant { value }
    }

    pub fn to_texpr(self, ty: Ttype, loc: Location) -> TExpr {
        TExpr::new(Expr::LogicalConstant(self), ty, loc)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StringConstant {
    pub value: String,
}

impl StringConstant {
    pub fn new<T: ToString>(value: T) -> StringConstant {
        StringConstant {
            value: value.to_string(),
        }
    }

    pub fn to_texpr(self, ty: Ttype, loc: Location) -> TExpr {
        TExpr::new(Expr::StringConstant(self), ty, loc)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
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

impl BinOp {
    /// The operator spelling used as the accumulator key for operator
    /// overloads, e.g. `+`, `==`.
    pub fn intrinsic_name(&self) -> &'static str {
        use BinOp::*;
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

#[derive(Clone, Debug, PartialEq)]
pub struct BinaryOp {
    pub op: BinOp,
    pub left: TExpr,
    pub right: TExpr,
}

impl BinaryOp {
    pub fn new(op: BinOp, left: TExpr, right: TExpr) -> BinaryOp {
        BinaryOp { op, left, right }
    }

    pub fn to_texpr(self, ty: Ttype, loc: Location) -> TExpr {
        TExpr::new(Expr::BinaryOp(Box::new(self)), ty, loc)
    }
}

/// An implicit or explicit conversion; the target type is the wrapping
/// `TExpr`'s type.
#[derive(Clone, Debug, PartialEq)]
pub struct Cast {
    pub arg: TExpr,
}

impl Cast {
    pub fn new(arg: TExpr) -> Cast {
        Cast { arg }
    }

    pub fn to_texpr(self, ty: Ttype, loc: Location) -> TExpr {
        TExpr::new(Expr::Cast(Box::new(self)), ty, loc)
    }
}

/// Conversion between string physical representations. Its type is always a
/// `String` with `ImplicitLength`; the verifier rejects `ImplicitLength`
/// anywhere else.
#[derive(Clone, Debug, PartialEq)]
pub struct StringPhysicalCast {
    pub arg: TExpr,
    pub old: StringPhysical,
    pub new: StringPhysical,
}

impl StringPhysicalCast {
    pub fn to_texpr(self, ty: Ttype, loc: Location) -> TExpr {
        TExpr::new(Expr::StringPhysicalCast(Box::new(self)), ty, loc)
    }
}

/// Reduce an expression to `Some(i64)` when it is a compile-time integer
/// constant (possibly behind casts).
pub fn extract_integer_value(expr: &TExpr) -> Option<i64> {
    match expr.expression() {
        Expr::IntegerConstant(c) => Some(c.value),
        Expr::Cast(c) => extract_integer_value(&c.arg),
        _ => None,
    }
}

/// Return `true` if the expression is a compile-time constant.
pub fn is_value_constant(expr: &TExpr) -> bool {
    match expr.expression() {
        Expr::IntegerConstant(_)
        | Expr::RealConstant(_)
        | Expr::LogicalConstant(_)
        | Expr::StringConstant(_) => true,
        Expr::Cast(c) => is_value_constant(&c.arg),
        Expr::BinaryOp(b) => is_value_constant(&b.left) && is_value_constant(&b.right),
        _ => false,
    }
}

// ------------------------------------------------------------------
// Statements.

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Assignment(Box<Assignment>),
    SubroutineCall(SubroutineCall),
    Select(Select),
    BlockCall(BlockCall),
    AssociateBlockCall(AssociateBlockCall),
    Return(Return),
    ExprStmt(TExpr),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Assignment {
    pub target: TExpr,
    pub value: TExpr,
    /// Set when the assignment may reallocate the target; only legal on
    /// allocatable targets.
    pub realloc_lhs: bool,
    pub loc: Location,
}

impl Assignment {
    pub fn to_stmt(self) -> Stmt {
        Stmt::Assignment(Box::new(self))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubroutineCall {
    pub name: SymbolId,
    pub args: Vec<CallArg>,
    pub loc: Location,
}

impl SubroutineCall {
    pub fn to_stmt(self) -> Stmt {
        Stmt::SubroutineCall(self)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CaseStmt {
    pub values: Vec<TExpr>,
    pub body: Vec<Stmt>,
    pub fall_through: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Select {
    pub test: TExpr,
    pub cases: Vec<CaseStmt>,
    pub default: Vec<Stmt>,
    /// Must equal the OR of the `fall_through` flags of `cases`.
    pub enable_fall_through: bool,
    pub loc: Location,
}

impl Select {
    pub fn to_stmt(self) -> Stmt {
        Stmt::Select(self)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BlockCall {
    pub block: SymbolId,
    pub loc: Location,
}

impl BlockCall {
    pub fn to_stmt(self) -> Stmt {
        Stmt::BlockCall(self)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssociateBlockCall {
    pub block: SymbolId,
    pub loc: Location,
}

impl AssociateBlockCall {
    pub fn to_stmt(self) -> Stmt {
        Stmt::AssociateBlockCall(self)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Return {
    pub loc: Location,
}

impl Return {
    pub fn to_stmt(self) -> Stmt {
        Stmt::Return(self)
    }
}
