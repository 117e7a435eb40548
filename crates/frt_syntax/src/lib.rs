// Copyright contributors to the frt compiler project
// SPDX-License-Identifier: Apache-2.0

//! The syntactic tree handed to the declaration resolver by the parser.
//! The parser itself is an external collaborator; this crate only fixes the
//! shape of the trees it must produce. Trees are plain owned values, so
//! tests (and alternative front ends) can also build them directly.

pub mod ast;

pub use frt_asr::Location;
