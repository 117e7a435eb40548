// Copyright contributors to the frt compiler project
// SPDX-License-Identifier: Apache-2.0

/// Front-end configuration consumed by the resolver. The driver owns
/// parsing of CLI flags and environment; only the resolved options cross
/// into this crate.
#[derive(Clone, Debug)]
pub struct ResolverConfig {
    /// Enable the legacy first-letter implicit typing rule. When disabled,
    /// any implicit statement other than `implicit none` is an error.
    pub implicit_typing: bool,
    /// Keep resolving after a recoverable semantic error. The offending
    /// declaration is dropped either way.
    pub continue_on_error: bool,
    pub default_integer_kind: u8,
}

impl Default for ResolverConfig {
    fn default() -> ResolverConfig {
        ResolverConfig {
            implicit_typing: false,
            continue_on_error: false,
            default_integer_kind: 4,
        }
    }
}
