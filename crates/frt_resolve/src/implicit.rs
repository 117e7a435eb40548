// Copyright contributors to the frt compiler project
// SPDX-License-Identifier: Apache-2.0

// The per-scope implicit dictionary: the legacy rule assigning default
// types to undeclared names by their first letter. A dictionary is pushed
// on entry to a module or program so nested subprograms inherit the
// enclosing mapping, and popped on exit.

use hashbrown::HashMap;

use frt_asr::types::Ttype;

#[derive(Clone, Debug, Default)]
pub struct ImplicitDictionary {
    map: HashMap<char, Ttype>,
}

impl ImplicitDictionary {
    pub fn empty() -> ImplicitDictionary {
        ImplicitDictionary::default()
    }

    /// The default rule: `i` through `n` are integers, everything else is
    /// a single precision real.
    pub fn with_defaults(default_integer_kind: u8) -> ImplicitDictionary {
        let mut map = HashMap::new();
        for ch in 'a'..='h' {
            map.insert(ch, Ttype::Real { kind: 4 });
        }
        for ch in 'i'..='n' {
            map.insert(
                ch,
                Ttype::Integer {
                    kind: default_integer_kind,
                },
            );
        }
        for ch in 'o'..='z' {
            map.insert(ch, Ttype::Real { kind: 4 });
        }
        ImplicitDictionary { map }
    }

    /// `implicit none`.
    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Fill one `implicit <type> (first-last)` letter range.
    pub fn fill_range(&mut self, first: char, last: char, ty: &Ttype) {
        for ch in first..=last {
            self.map
                .insert(ch.to_ascii_lowercase(), ty.clone());
        }
    }

    /// The implicit type of `name`, from its first letter.
    pub fn type_of(&self, name: &str) -> Option<&Ttype> {
        let first = name.chars().next()?.to_ascii_lowercase();
        self.map.get(&first)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rule() {
        let dict = ImplicitDictionary::with_defaults(4);
        assert_eq!(dict.type_of("i_counter"), Some(&Ttype::Integer { kind: 4 }));
        assert_eq!(dict.type_of("x"), Some(&Ttype::Real { kind: 4 }));
        assert_eq!(dict.type_of("N"), Some(&Ttype::Integer { kind: 4 }));
    }

    #[test]
    fn test_implicit_none() {
        let mut dict = ImplicitDictionary::with_defaults(4);
        dict.clear();
        assert!(dict.type_of("x").is_none());
        assert!(dict.is_empty());
    }

    #[test]
    fn test_fill_range() {
        let mut dict = ImplicitDictionary::empty();
        dict.fill_range('a', 'c', &Ttype::Logical { kind: 4 });
        assert_eq!(dict.type_of("b"), Some(&Ttype::Logical { kind: 4 }));
        assert!(dict.type_of("d").is_none());
    }
}
