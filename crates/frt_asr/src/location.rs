// Copyright contributors to the frt compiler project
// SPDX-License-Identifier: Apache-2.0

/// A byte range in a source file, carried by every syntactic and semantic
/// node. `first` and `last` are zero-indexed offsets; the range is
/// inclusive of `first` and exclusive of `last`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Location {
    pub file_id: u32,
    pub first: u32,
    pub last: u32,
}

impl Location {
    pub fn new(file_id: u32, first: u32, last: u32) -> Location {
        Location {
            file_id,
            first,
            last,
        }
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.first as usize..self.last as usize
    }
}
