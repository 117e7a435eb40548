// Copyright contributors to the frt compiler project
// SPDX-License-Identifier: Apache-2.0

//! Abstract semantic representation (ASR) of a Fortran-like front-end.
//! This crate implements:
//!    The symbol store: an arena of symbol tables and symbol nodes.
//!    The typed tree itself: symbols, statements, expressions, types.
//!    The verifier, which re-checks every structural invariant of a tree
//!    before later passes are allowed to touch it.
//!
//! Construction of trees from the syntactic AST lives in the `frt_resolve`
//! crate; this crate never sees syntax.

pub mod asr;
pub mod diagnostics;
pub mod location;
pub mod report;
pub mod symbols;
pub mod types;
pub mod verify;

pub use location::Location;
