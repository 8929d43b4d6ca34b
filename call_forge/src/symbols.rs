// Copyright 2026 the Call Forge Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Resolved-function table and the native symbol-resolver boundary.
//!
//! The table owns loaded module handles together with their resolved entry
//! addresses and issues opaque [`Accessor`] tokens for later reference.
//! Resolution itself happens behind [`SymbolResolver`] so that embedders and
//! tests can substitute the platform loader.

use core::fmt;
use std::collections::BTreeMap;

use crate::accessor::{Accessor, AccessorKind, TokenSource, UnknownAccessor};
use crate::asm::Addr;

/// Errors from loading a module or resolving a symbol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolveError {
    /// The named module could not be loaded.
    ModuleNotFound {
        /// Module name as passed to the resolver.
        module: String,
        /// Loader-reported reason.
        reason: String,
    },
    /// The module loaded but does not export the named symbol.
    SymbolNotFound {
        /// Module name as passed to the resolver.
        module: String,
        /// Symbol name as passed to the resolver.
        symbol: String,
        /// Loader-reported reason.
        reason: String,
    },
    /// The symbol resolved, but its address does not fit the fixed 4-byte
    /// width the encoder embeds. This happens for native resolution on
    /// 64-bit hosts; the address is reported, never truncated.
    AddressOutOfRange {
        /// Module name as passed to the resolver.
        module: String,
        /// Symbol name as passed to the resolver.
        symbol: String,
    },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModuleNotFound { module, reason } => {
                write!(f, "failed to load module '{module}': {reason}")
            }
            Self::SymbolNotFound {
                module,
                symbol,
                reason,
            } => write!(f, "failed to resolve '{symbol}' in '{module}': {reason}"),
            Self::AddressOutOfRange { module, symbol } => write!(
                f,
                "entry address of '{symbol}' in '{module}' does not fit 32 bits"
            ),
        }
    }
}

impl std::error::Error for ResolveError {}

/// Native symbol resolution boundary.
///
/// `Module` is whatever handle keeps the loaded module alive; dropping it
/// unloads the module, so no generated code may run after the owning record
/// is destroyed.
pub trait SymbolResolver {
    /// Opaque loaded-module handle.
    type Module;

    /// Loads the named module.
    fn load(&mut self, module: &str) -> Result<Self::Module, ResolveError>;

    /// Resolves a symbol in a previously loaded module to its entry address.
    fn resolve(&mut self, module: &Self::Module, symbol: &str) -> Result<Addr, ResolveError>;
}

/// Production resolver backed by the platform dynamic loader.
#[derive(Debug, Default)]
pub struct DlResolver;

impl SymbolResolver for DlResolver {
    type Module = libloading::Library;

    fn load(&mut self, module: &str) -> Result<Self::Module, ResolveError> {
        // Safety: loading a library runs its initializers; the caller decides
        // which modules are trusted by naming them.
        unsafe { libloading::Library::new(module) }.map_err(|e| ResolveError::ModuleNotFound {
            module: module.into(),
            reason: e.to_string(),
        })
    }

    fn resolve(&mut self, module: &Self::Module, symbol: &str) -> Result<Addr, ResolveError> {
        // Safety: the symbol is only used as an opaque entry address here; it
        // is never called through this typed handle.
        // The module name is not recoverable from the handle; `register`
        // fills it in before the error reaches the caller.
        let sym = unsafe { module.get::<unsafe extern "C" fn()>(symbol.as_bytes()) };
        let entry = match sym {
            Ok(s) => *s,
            Err(e) => {
                return Err(ResolveError::SymbolNotFound {
                    module: String::new(),
                    symbol: symbol.into(),
                    reason: e.to_string(),
                });
            }
        };
        u32::try_from(entry as usize)
            .map(Addr)
            .map_err(|_| ResolveError::AddressOutOfRange {
                module: String::new(),
                symbol: symbol.into(),
            })
    }
}

/// A resolved native function: module handle plus entry address.
#[derive(Debug)]
struct ResolvedFn<M> {
    /// Keeps the module loaded for as long as the record lives.
    _module: M,
    addr: Addr,
}

/// Owns resolved functions and issues accessors for them.
#[derive(Debug)]
pub struct FunctionTable<M> {
    entries: BTreeMap<Accessor, ResolvedFn<M>>,
    tokens: TokenSource,
}

impl<M> FunctionTable<M> {
    /// Creates an empty table with a fresh random token stream.
    #[must_use]
    pub fn new() -> Self {
        Self::with_tokens(TokenSource::new())
    }

    /// Creates an empty table drawing tokens from `tokens`.
    #[must_use]
    pub fn with_tokens(tokens: TokenSource) -> Self {
        Self {
            entries: BTreeMap::new(),
            tokens,
        }
    }

    /// Loads `module`, resolves `symbol`, and stores the result under a
    /// fresh accessor.
    ///
    /// The table is left unmodified on failure. Each registration loads the
    /// module anew; the handle is owned by the new record and released when
    /// the record is dropped.
    pub fn register<R>(
        &mut self,
        resolver: &mut R,
        module: &str,
        symbol: &str,
    ) -> Result<Accessor, ResolveError>
    where
        R: SymbolResolver<Module = M>,
    {
        let handle = resolver.load(module)?;
        let addr = match resolver.resolve(&handle, symbol) {
            Ok(addr) => addr,
            Err(ResolveError::SymbolNotFound { symbol, reason, .. }) => {
                return Err(ResolveError::SymbolNotFound {
                    module: module.into(),
                    symbol,
                    reason,
                });
            }
            Err(ResolveError::AddressOutOfRange { symbol, .. }) => {
                return Err(ResolveError::AddressOutOfRange {
                    module: module.into(),
                    symbol,
                });
            }
            Err(e) => return Err(e),
        };
        let accessor = loop {
            let t = self.tokens.next_token();
            if !self.entries.contains_key(&t) {
                break t;
            }
        };
        self.entries.insert(
            accessor,
            ResolvedFn {
                _module: handle,
                addr,
            },
        );
        Ok(accessor)
    }

    /// Returns the resolved entry address for `accessor`.
    pub fn address_of(&self, accessor: Accessor) -> Result<Addr, UnknownAccessor> {
        self.entries
            .get(&accessor)
            .map(|r| r.addr)
            .ok_or(UnknownAccessor {
                accessor,
                kind: AccessorKind::Function,
            })
    }

    /// Returns the number of registered functions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no function is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<M> Default for FunctionTable<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Resolver over a fixed in-memory symbol map.
    struct StaticResolver;

    impl SymbolResolver for StaticResolver {
        type Module = &'static str;

        fn load(&mut self, module: &str) -> Result<Self::Module, ResolveError> {
            match module {
                "libgood" => Ok("libgood"),
                _ => Err(ResolveError::ModuleNotFound {
                    module: module.into(),
                    reason: String::from("not in table"),
                }),
            }
        }

        fn resolve(&mut self, module: &Self::Module, symbol: &str) -> Result<Addr, ResolveError> {
            match symbol {
                "f" => Ok(Addr(0x1000)),
                "g" => Ok(Addr(0x2000)),
                _ => Err(ResolveError::SymbolNotFound {
                    module: (*module).into(),
                    symbol: symbol.into(),
                    reason: String::from("not exported"),
                }),
            }
        }
    }

    #[test]
    fn register_and_resolve_address() {
        let mut table = FunctionTable::with_tokens(TokenSource::from_seed(1));
        let acc = table.register(&mut StaticResolver, "libgood", "f").unwrap();
        assert_eq!(table.address_of(acc), Ok(Addr(0x1000)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn missing_module_leaves_table_unmodified() {
        let mut table = FunctionTable::with_tokens(TokenSource::from_seed(2));
        let err = table
            .register(&mut StaticResolver, "libmissing", "f")
            .unwrap_err();
        assert!(matches!(err, ResolveError::ModuleNotFound { .. }));
        assert!(table.is_empty());
    }

    #[test]
    fn missing_symbol_reports_module_and_symbol() {
        let mut table = FunctionTable::with_tokens(TokenSource::from_seed(3));
        let err = table
            .register(&mut StaticResolver, "libgood", "nope")
            .unwrap_err();
        match err {
            ResolveError::SymbolNotFound { module, symbol, .. } => {
                assert_eq!(module, "libgood");
                assert_eq!(symbol, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(table.is_empty());
    }

    #[test]
    fn unknown_accessor_is_reported_as_function_kind() {
        let table: FunctionTable<&'static str> =
            FunctionTable::with_tokens(TokenSource::from_seed(4));
        let mut src = TokenSource::from_seed(99);
        let bogus = src.next_token();
        let err = table.address_of(bogus).unwrap_err();
        assert_eq!(err.accessor, bogus);
        assert_eq!(err.kind, AccessorKind::Function);
    }

    #[test]
    fn accessors_differ_across_registrations() {
        let mut table = FunctionTable::with_tokens(TokenSource::from_seed(5));
        let a = table.register(&mut StaticResolver, "libgood", "f").unwrap();
        let b = table.register(&mut StaticResolver, "libgood", "g").unwrap();
        assert_ne!(a, b);
        assert_eq!(table.address_of(b), Ok(Addr(0x2000)));
    }
}
