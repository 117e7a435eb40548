// Copyright contributors to the frt compiler project
// SPDX-License-Identifier: Apache-2.0

// Defines the data structures representing the types attached to symbols and
// to expressions of the typed tree.
// This file should include all code that manipulates types in isolation. In
// particular kind promotion for initializer typing is implemented here.
// Anything that needs the expression tree as well (casting, length
// evaluation) lives in asr.rs or in the resolver.

use crate::asr::TExpr;
use crate::symbols::SymbolId;

/// Storage width selector of the numeric types, in bytes. The default
/// integer kind is a front-end configuration option; everything in this
/// crate treats kinds as opaque.
pub type Kind = u8;

/// How the length of a string type was specified at the declaration site.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LengthKind {
    /// `character(len=<expr>)`; the expression is stored alongside.
    ExpressionLength,
    /// `character(len=*)`, length taken from the actual argument.
    AssumedLength,
    /// `character(len=:)`, length fixed at allocation time.
    DeferredLength,
    /// Length implied by the physical representation. Valid only as the
    /// type of a string-physical-cast expression.
    ImplicitLength,
}

/// Storage layout of a string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StringPhysical {
    Descriptor,
    CChar,
}

/// Storage layout of an array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArrayPhysical {
    Descriptor,
    FixedSize,
    Simd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Abi {
    Source,
    BindC,
}

/// Whether a function symbol is an interface (header only) or carries an
/// implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Deftype {
    Implementation,
    Interface,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StringType {
    pub len: Option<TExpr>,
    pub len_kind: LengthKind,
    pub physical: StringPhysical,
}

/// One dimension of an array type. A deferred dimension has both fields
/// absent; an explicit-shape dimension carries at least a length.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Dimension {
    pub start: Option<TExpr>,
    pub length: Option<TExpr>,
}

impl Dimension {
    pub fn is_deferred(&self) -> bool {
        self.start.is_none() && self.length.is_none()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ArrayType {
    pub elem: Ttype,
    pub dims: Vec<Dimension>,
    pub physical: ArrayPhysical,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionType {
    pub arg_types: Vec<Ttype>,
    pub return_type: Option<Ttype>,
    pub abi: Abi,
    pub deftype: Deftype,
    pub bind_name: Option<String>,
    pub pure_function: bool,
    pub elemental: bool,
    /// Set on module procedures: forward-declared in a module interface and
    /// implemented in a submodule.
    pub module_procedure: bool,
}

impl FunctionType {
    pub fn new(arg_types: Vec<Ttype>, return_type: Option<Ttype>) -> FunctionType {
        FunctionType {
            arg_types,
            return_type,
            abi: Abi::Source,
            deftype: Deftype::Implementation,
            bind_name: None,
            pure_function: false,
            elemental: false,
            module_procedure: false,
        }
    }

    pub fn to_ttype(self) -> Ttype {
        Ttype::FunctionType(Box::new(self))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Ttype {
    Integer { kind: Kind },
    Real { kind: Kind },
    Complex { kind: Kind },
    Logical { kind: Kind },
    String(Box<StringType>),
    Array(Box<ArrayType>),
    Pointer(Box<Ttype>),
    Allocatable(Box<Ttype>),
    /// `decl` is the Struct symbol; it is absent only transiently inside the
    /// resolver while a self-referential derived type is being built. The
    /// verifier requires it to be present.
    StructType {
        decl: Option<SymbolId>,
        is_c_struct: bool,
    },
    EnumType { decl: SymbolId },
    UnionType { decl: SymbolId },
    FunctionType(Box<FunctionType>),
    /// A template type parameter, substituted away at instantiation time.
    TypeParameter { name: String },
}

impl Ttype {
    pub fn is_integer(&self) -> bool {
        matches!(self, Ttype::Integer { .. })
    }

    pub fn is_character(&self) -> bool {
        matches!(self.extract_type(), Ttype::String(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.type_get_past_pointer(), Ttype::Array(_))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Ttype::Pointer(_))
    }

    pub fn is_allocatable(&self) -> bool {
        matches!(self, Ttype::Allocatable(_))
    }

    /// Strip `Pointer` and `Allocatable` wrappers.
    pub fn type_get_past_pointer(&self) -> &Ttype {
        match self {
            Ttype::Pointer(t) | Ttype::Allocatable(t) => t.type_get_past_pointer(),
            t => t,
        }
    }

    /// Strip `Pointer`, `Allocatable` and `Array` down to the element type.
    pub fn extract_type(&self) -> &Ttype {
        match self.type_get_past_pointer() {
            Ttype::Array(a) => a.elem.extract_type(),
            t => t,
        }
    }

    pub fn string_type(&self) -> Option<&StringType> {
        match self.extract_type() {
            Ttype::String(s) => Some(s),
            _ => None,
        }
    }

    /// Array rank; `0` for non-array types.
    pub fn rank(&self) -> usize {
        match self.type_get_past_pointer() {
            Ttype::Array(a) => a.dims.len(),
            _ => 0,
        }
    }

    pub fn kind(&self) -> Option<Kind> {
        use Ttype::*;
        match self {
            Integer { kind } | Real { kind } | Complex { kind } | Logical { kind } => Some(*kind),
            _ => None,
        }
    }

    /// A short stable code used when mangling synthesised names, e.g. `i4`,
    /// `r8`.
    pub fn type_code(&self) -> String {
        use Ttype::*;
        match self {
            Integer { kind } => format!("i{kind}"),
            Real { kind } => format!("r{kind}"),
            Complex { kind } => format!("c{kind}"),
            Logical { kind } => format!("l{kind}"),
            String(_) => "str".to_string(),
            Array(a) => format!("a{}{}", a.dims.len(), a.elem.type_code()),
            Pointer(t) => format!("p{}", t.type_code()),
            Allocatable(t) => format!("alloc{}", t.type_code()),
            StructType { .. } => "struct".to_string(),
            EnumType { .. } => "enum".to_string(),
            UnionType { .. } => "union".to_string(),
            FunctionType(_) => "fn".to_string(),
            TypeParameter { name } => format!("tp_{name}"),
        }
    }
}

/// Structural equality that looks through `Pointer`/`Allocatable` wrappers
/// and ignores array dimension expressions (only rank must agree). This is
/// the equality used when matching forward declarations against submodule
/// implementations and when checking template restrictions.
pub fn check_equal_type(ty1: &Ttype, ty2: &Ttype) -> bool {
    use Ttype::*;
    let ty1 = ty1.type_get_past_pointer();
    let ty2 = ty2.type_get_past_pointer();
    match (ty1, ty2) {
        (Integer { kind: k1 }, Integer { kind: k2 })
        | (Real { kind: k1 }, Real { kind: k2 })
        | (Complex { kind: k1 }, Complex { kind: k2 })
        | (Logical { kind: k1 }, Logical { kind: k2 }) => k1 == k2,
        (String(_), String(_)) => true,
        (Array(a1), Array(a2)) => {
            a1.dims.len() == a2.dims.len() && check_equal_type(&a1.elem, &a2.elem)
        }
        (StructType { decl: d1, .. }, StructType { decl: d2, .. }) => d1 == d2,
        (EnumType { decl: d1 }, EnumType { decl: d2 }) => d1 == d2,
        (UnionType { decl: d1 }, UnionType { decl: d2 }) => d1 == d2,
        (TypeParameter { name: n1 }, TypeParameter { name: n2 }) => n1 == n2,
        (FunctionType(f1), FunctionType(f2)) => {
            f1.arg_types.len() == f2.arg_types.len()
                && f1
                    .arg_types
                    .iter()
                    .zip(&f2.arg_types)
                    .all(|(a, b)| check_equal_type(a, b))
                && match (&f1.return_type, &f2.return_type) {
                    (Some(r1), Some(r2)) => check_equal_type(r1, r2),
                    (None, None) => true,
                    _ => false,
                }
        }
        _ => false,
    }
}

//
// Promotion
//

// Return the greater of the kinds of the two types.
fn promote_kind(ty1: &Ttype, ty2: &Ttype) -> Kind {
    std::cmp::max(ty1.kind().unwrap_or(0), ty2.kind().unwrap_or(0))
}

/// Promotion suitable for the binary operations the declaration phase must
/// type, e.g. `+`, `-`, `*` in initializers and array bounds. Types that
/// cannot be promoted yield `None`; the caller reports the error.
pub fn promote_types(ty1: &Ttype, ty2: &Ttype) -> Option<Ttype> {
    use Ttype::*;
    if check_equal_type(ty1, ty2) {
        return Some(ty1.clone());
    }
    match (ty1, ty2) {
        (Integer { .. }, Integer { .. }) => Some(Integer {
            kind: promote_kind(ty1, ty2),
        }),
        (Real { .. }, Real { .. }) => Some(Real {
            kind: promote_kind(ty1, ty2),
        }),
        (Complex { .. }, Complex { .. }) => Some(Complex {
            kind: promote_kind(ty1, ty2),
        }),
        (Integer { .. }, Real { .. }) | (Real { .. }, Integer { .. }) => Some(Real {
            kind: promote_kind(ty1, ty2),
        }),
        (Integer { .. }, Complex { .. })
        | (Complex { .. }, Integer { .. })
        | (Real { .. }, Complex { .. })
        | (Complex { .. }, Real { .. }) => Some(Complex {
            kind: promote_kind(ty1, ty2),
        }),
        _ => None,
    }
}

/// Can a literal of type `ty_lit` initialize a target of type `ty1` with at
/// most an implicit cast? Kind widths never matter for literals.
pub fn can_cast_literal(ty1: &Ttype, ty_lit: &Ttype) -> bool {
    use Ttype::*;
    matches!(
        (ty1, ty_lit),
        (Integer { .. }, Integer { .. })
            | (Real { .. }, Integer { .. })
            | (Real { .. }, Real { .. })
            | (Complex { .. }, Integer { .. })
            | (Complex { .. }, Real { .. })
            | (Complex { .. }, Complex { .. })
            | (Logical { .. }, Logical { .. })
            | (String(_), String(_))
    )
}

#[test]
fn test_ttype_predicates() {
    let t = Ttype::Integer { kind: 4 };
    assert!(t.is_integer());
    assert!(!t.is_array());
    assert_eq!(t.kind(), Some(4));
    assert_eq!(t.type_code(), "i4");
}

#[test]
fn test_ttype_past_pointer() {
    let t = Ttype::Pointer(Box::new(Ttype::Array(Box::new(ArrayType {
        elem: Ttype::Real { kind: 8 },
        dims: vec![Dimension::default()],
        physical: ArrayPhysical::Descriptor,
    }))));
    assert!(t.is_pointer());
    assert!(t.is_array());
    assert_eq!(t.rank(), 1);
    assert!(matches!(t.extract_type(), Ttype::Real { kind: 8 }));
}

#[test]
fn test_promote_types() {
    let i = Ttype::Integer { kind: 4 };
    let r = Ttype::Real { kind: 8 };
    assert_eq!(promote_types(&i, &r), Some(Ttype::Real { kind: 8 }));
    assert_eq!(promote_types(&i, &i), Some(i.clone()));
    let l = Ttype::Logical { kind: 4 };
    assert_eq!(promote_types(&i, &l), None);
}
