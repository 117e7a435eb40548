// Copyright contributors to the frt compiler project
// SPDX-License-Identifier: Apache-2.0

// The module loader seam. The resolver asks the loader for a module when a
// `use` names one that is not yet in the translation unit; the loader is
// idempotent and caches by canonical module name, with an in-flight
// sentinel so cyclic `use` graphs fail with a cycle error instead of
// recursing forever.

use either::Either;
use hashbrown::HashMap;
use thiserror::Error;
use tracing::debug;

use frt_asr::location::Location;
use frt_asr::symbols::{canonical_name, SymbolId};
use frt_syntax::ast;

use crate::context::Context;
use crate::resolver;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LoaderError {
    #[error("module `{0}` not found")]
    NotFound(String),
    #[error("cyclic import of module `{0}`")]
    Cycle(String),
    #[error("resolution of module `{0}` failed")]
    Failed(String),
}

pub trait ModuleLoader {
    /// Produce the Module symbol for `name`, loading and resolving the
    /// module if necessary.
    fn load_module(
        &mut self,
        ctx: &mut Context,
        name: &str,
        loc: Location,
    ) -> Result<SymbolId, LoaderError>;
}

/// A loader with nothing to offer; every request fails. Useful for
/// translation units that are known to be self-contained.
pub struct NoLoader;

impl ModuleLoader for NoLoader {
    fn load_module(
        &mut self,
        _ctx: &mut Context,
        name: &str,
        _loc: Location,
    ) -> Result<SymbolId, LoaderError> {
        Err(LoaderError::NotFound(canonical_name(name)))
    }
}

#[derive(Clone, Copy, Debug)]
enum CacheEntry {
    InFlight,
    Loaded(SymbolId),
}

/// Loads modules from a registry of syntactic trees, resolving each at
/// most once per cache lifetime. The cache lives from driver init to
/// teardown; `clear_cache` starts a fresh compilation.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, ast::Module>,
    cache: HashMap<String, CacheEntry>,
}

impl ModuleRegistry {
    pub fn new() -> ModuleRegistry {
        ModuleRegistry::default()
    }

    pub fn register(&mut self, module: ast::Module) {
        self.modules
            .insert(canonical_name(&module.name), module);
    }

    /// Drop every cached load; registered module sources are kept.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }
}

impl ModuleLoader for ModuleRegistry {
    fn load_module(
        &mut self,
        ctx: &mut Context,
        name: &str,
        _loc: Location,
    ) -> Result<SymbolId, LoaderError> {
        let key = canonical_name(name);
        match self.cache.get(&key) {
            Some(CacheEntry::Loaded(sym)) => return Ok(*sym),
            Some(CacheEntry::InFlight) => return Err(LoaderError::Cycle(key)),
            None => {}
        }
        // A module resolved earlier in the same translation unit is reused
        // as-is; otherwise the registered syntactic tree is resolved now.
        let source: Either<SymbolId, ast::Module> =
            match ctx.store.get_symbol(ctx.root_scope, &key) {
                Some(sym) => Either::Left(sym),
                None => match self.modules.get(&key) {
                    Some(module) => Either::Right(module.clone()),
                    None => return Err(LoaderError::NotFound(key)),
                },
            };
        let module_ast = match source {
            Either::Left(sym) => {
                self.cache.insert(key, CacheEntry::Loaded(sym));
                return Ok(sym);
            }
            Either::Right(module_ast) => module_ast,
        };
        // Sentinel before resolving: the module may `use` others, and those
        // loads re-enter this loader.
        self.cache.insert(key.clone(), CacheEntry::InFlight);
        debug!(module = %key, "loading module");
        let saved = ctx.save_unit_state();
        let result = resolver::module_to_asr(ctx, self, &module_ast);
        ctx.restore_unit_state(saved);
        match result {
            Ok(sym) => {
                self.cache.insert(key, CacheEntry::Loaded(sym));
                Ok(sym)
            }
            Err(_) => {
                self.cache.remove(&key);
                Err(LoaderError::Failed(key))
            }
        }
    }
}
