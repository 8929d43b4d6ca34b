// Copyright 2026 the Call Forge Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Call-stub builder.
//!
//! [`StubBuilder`] owns the resolver, both registration tables, and the
//! instruction buffer, and appends one calling-convention-compliant call
//! sequence per [`StubBuilder::push_call`]. Finalizing with
//! [`StubBuilder::finish`] appends the terminating return and produces a
//! [`Stub`], which owns the tables for as long as the generated code can
//! reference them and can be executed at most once (running consumes it).
//!
//! The build states are encoded in the types rather than checked at runtime:
//! a [`StubBuilder`] can only grow, a [`Stub`] can only run, and a consumed
//! [`Stub`] is gone.

use core::fmt;

use crate::accessor::{Accessor, UnknownAccessor};
use crate::asm::{Addr, CallConv, StubAsm};
use crate::data::{BlobError, DataTable};
use crate::exec::{ExecEngine, ExecError, run_stub};
use crate::symbols::{DlResolver, FunctionTable, ResolveError, SymbolResolver};
use crate::trace::{TraceMask, TraceSink};

/// One declared call argument.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Arg {
    /// A literal pushed as-is.
    Imm(u32),
    /// The address of a registered data blob, resolved at build time.
    Data(Accessor),
}

/// Errors from appending a call sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildError {
    /// The call target or a data argument named an unregistered accessor.
    UnknownAccessor(UnknownAccessor),
    /// A data blob's native address does not fit the fixed 4-byte immediate
    /// width. Happens on 64-bit hosts without low-memory blob storage.
    AddressOutOfRange {
        /// The data accessor whose address overflowed.
        accessor: Accessor,
    },
    /// Too many arguments for the caller-cleanup encoding (8-bit immediate).
    TooManyArgs {
        /// Declared argument count.
        count: usize,
    },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAccessor(e) => write!(f, "{e}"),
            Self::AddressOutOfRange { accessor } => {
                write!(f, "address of data blob {accessor} does not fit 32 bits")
            }
            Self::TooManyArgs { count } => {
                write!(f, "{count} arguments exceed the single-call limit")
            }
        }
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::UnknownAccessor(e) => Some(e),
            _ => None,
        }
    }
}

impl From<UnknownAccessor> for BuildError {
    fn from(e: UnknownAccessor) -> Self {
        Self::UnknownAccessor(e)
    }
}

/// Most arguments a single cdecl call can carry: the cleanup instruction
/// encodes `4 * count` in a signed 8-bit immediate.
pub const MAX_CALL_ARGS: usize = 31;

/// Builder for a single-shot call stub.
pub struct StubBuilder<R: SymbolResolver = DlResolver> {
    resolver: R,
    conv: CallConv,
    functions: FunctionTable<R::Module>,
    data: DataTable,
    code: StubAsm,
}

impl StubBuilder<DlResolver> {
    /// Creates a builder over the platform dynamic loader.
    #[must_use]
    pub fn native(conv: CallConv) -> Self {
        Self::new(DlResolver, conv)
    }
}

impl<R: SymbolResolver> StubBuilder<R> {
    /// Creates an empty builder.
    #[must_use]
    pub fn new(resolver: R, conv: CallConv) -> Self {
        Self {
            resolver,
            conv,
            functions: FunctionTable::new(),
            data: DataTable::new(),
            code: StubAsm::new(),
        }
    }

    /// Loads `module`, resolves `symbol`, and registers the result.
    ///
    /// The tables are unmodified on failure and the builder stays usable.
    pub fn register_function(
        &mut self,
        module: &str,
        symbol: &str,
    ) -> Result<Accessor, ResolveError> {
        self.functions.register(&mut self.resolver, module, symbol)
    }

    /// Copies `bytes` (plus a trailing NUL) into pinned storage and
    /// registers the blob.
    pub fn register_data(&mut self, bytes: &[u8]) -> Result<Accessor, BlobError> {
        self.data.register(bytes)
    }

    /// Returns the resolved entry address of a registered function.
    pub fn function_address(&self, accessor: Accessor) -> Result<Addr, UnknownAccessor> {
        self.functions.address_of(accessor)
    }

    /// Returns the pinned native address of a registered blob.
    pub fn data_address(&self, accessor: Accessor) -> Result<usize, UnknownAccessor> {
        self.data.address_of(accessor)
    }

    /// Returns the stored bytes of a registered blob, terminator included.
    pub fn data_bytes(&self, accessor: Accessor) -> Result<&[u8], UnknownAccessor> {
        self.data.stored_bytes(accessor)
    }

    /// Appends a complete call sequence for `function` with `args`.
    ///
    /// Arguments are declared left-to-right and pushed in reverse, so the
    /// callee sees the first declared argument at the lowest stack offset.
    /// Every accessor is resolved before the first byte is appended; on any
    /// error the buffer is left exactly as it was.
    ///
    /// Growth is deterministic in the argument count `n`: five bytes per
    /// push plus seven for the load/call pair, plus three bytes of stack
    /// cleanup for [`CallConv::Cdecl`] calls with `n > 0`.
    pub fn push_call(&mut self, function: Accessor, args: &[Arg]) -> Result<(), BuildError> {
        let entry = self.functions.address_of(function)?;
        if self.conv == CallConv::Cdecl && args.len() > MAX_CALL_ARGS {
            return Err(BuildError::TooManyArgs { count: args.len() });
        }

        let mut words = Vec::with_capacity(args.len());
        for arg in args {
            let word = match *arg {
                Arg::Imm(v) => v,
                Arg::Data(accessor) => {
                    let raw = self.data.address_of(accessor)?;
                    u32::try_from(raw)
                        .map_err(|_| BuildError::AddressOutOfRange { accessor })?
                }
            };
            words.push(word);
        }

        for &word in words.iter().rev() {
            self.code.push_imm32(word);
        }
        self.code.mov_eax_imm32(entry);
        self.code.call_eax();
        if self.conv == CallConv::Cdecl && !args.is_empty() {
            let cleanup = 4 * args.len();
            self.code.add_esp_imm8(cleanup as u8);
        }
        Ok(())
    }

    /// Appends an `int3` breakpoint into the stub itself.
    pub fn append_break(&mut self) {
        self.code.brk();
    }

    /// Returns the instruction bytes appended so far.
    #[must_use]
    pub fn code(&self) -> &[u8] {
        self.code.as_bytes()
    }

    /// Appends the terminating return and seals the stub.
    ///
    /// The registration tables move into the returned [`Stub`], so every
    /// address embedded in the code stays valid until the stub is dropped.
    #[must_use]
    pub fn finish(mut self) -> Stub<R::Module> {
        self.code.ret();
        Stub {
            code: self.code.into_bytes(),
            functions: self.functions,
            data: self.data,
        }
    }
}

impl<R: SymbolResolver> fmt::Debug for StubBuilder<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StubBuilder")
            .field("conv", &self.conv)
            .field("functions", &self.functions.len())
            .field("data", &self.data.len())
            .field("code_len", &self.code.pc())
            .finish()
    }
}

/// A finalized, single-shot instruction buffer.
///
/// Owns the resolved-function and data tables whose addresses the code
/// embeds. Executing consumes the stub; the tables (and with them the loaded
/// module handles) are released only after the run finishes.
pub struct Stub<M> {
    code: Vec<u8>,
    functions: FunctionTable<M>,
    data: DataTable,
}

impl<M> Stub<M> {
    /// Returns the finalized instruction bytes.
    #[must_use]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Executes the stub through `engine` and releases everything.
    ///
    /// If `halt` is set the engine's breakpoint fires after the code is
    /// loaded and before control transfers. Trace events selected by `mask`
    /// are delivered to `sink`.
    pub fn run<E: ExecEngine>(
        self,
        engine: &mut E,
        halt: bool,
        mask: TraceMask,
        sink: Option<&mut dyn TraceSink>,
    ) -> Result<(), ExecError> {
        run_stub(engine, &self.code, halt, mask, sink)
        // `self` drops here: blobs and module handles outlive the run.
    }
}

impl<M> fmt::Debug for Stub<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stub")
            .field("code_len", &self.code.len())
            .field("functions", &self.functions.len())
            .field("data", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm;

    struct StaticResolver;

    impl SymbolResolver for StaticResolver {
        type Module = ();

        fn load(&mut self, module: &str) -> Result<Self::Module, ResolveError> {
            if module == "libfake" {
                Ok(())
            } else {
                Err(ResolveError::ModuleNotFound {
                    module: module.into(),
                    reason: String::from("not in table"),
                })
            }
        }

        fn resolve(&mut self, _module: &Self::Module, symbol: &str) -> Result<Addr, ResolveError> {
            match symbol {
                "target" => Ok(Addr(0x00C0_FFEE)),
                _ => Err(ResolveError::SymbolNotFound {
                    module: String::new(),
                    symbol: symbol.into(),
                    reason: String::from("not exported"),
                }),
            }
        }
    }

    fn builder(conv: CallConv) -> StubBuilder<StaticResolver> {
        StubBuilder::new(StaticResolver, conv)
    }

    #[test]
    fn stdcall_growth_is_five_n_plus_seven() {
        for n in [0usize, 1, 2, 4, 16, 64] {
            let mut b = builder(CallConv::Stdcall);
            let f = b.register_function("libfake", "target").unwrap();
            let args = vec![Arg::Imm(9); n];
            let before = b.code().len();
            b.push_call(f, &args).unwrap();
            assert_eq!(b.code().len() - before, 5 * n + 7, "n = {n}");
        }
    }

    #[test]
    fn cdecl_growth_adds_three_bytes_of_cleanup() {
        for n in [1usize, 2, 4, 16, 31] {
            let mut b = builder(CallConv::Cdecl);
            let f = b.register_function("libfake", "target").unwrap();
            let args = vec![Arg::Imm(9); n];
            let before = b.code().len();
            b.push_call(f, &args).unwrap();
            assert_eq!(b.code().len() - before, 5 * n + 10, "n = {n}");
        }
    }

    #[test]
    fn empty_argument_list_emits_only_the_load_call_pair() {
        let mut b = builder(CallConv::Cdecl);
        let f = b.register_function("libfake", "target").unwrap();
        b.push_call(f, &[]).unwrap();
        assert_eq!(
            b.code(),
            [0xB8, 0xEE, 0xFF, 0xC0, 0x00, 0xFF, 0xD0],
            "mov eax, target; call eax"
        );
    }

    #[test]
    fn arguments_are_pushed_in_reverse_declared_order() {
        let mut b = builder(CallConv::Stdcall);
        let f = b.register_function("libfake", "target").unwrap();
        b.push_call(f, &[Arg::Imm(1), Arg::Imm(2), Arg::Imm(3)])
            .unwrap();
        let mut expected = Vec::new();
        expected.extend_from_slice(&asm::push_imm32(3));
        expected.extend_from_slice(&asm::push_imm32(2));
        expected.extend_from_slice(&asm::push_imm32(1));
        expected.extend_from_slice(&asm::mov_eax_imm32(Addr(0x00C0_FFEE)));
        expected.extend_from_slice(&asm::call_eax());
        assert_eq!(b.code(), expected);
    }

    #[test]
    fn unknown_function_accessor_leaves_buffer_untouched() {
        let mut b = builder(CallConv::Stdcall);
        let bogus = {
            let mut src = crate::accessor::TokenSource::from_seed(11);
            src.next_token()
        };
        let err = b.push_call(bogus, &[Arg::Imm(1)]).unwrap_err();
        assert!(matches!(err, BuildError::UnknownAccessor(_)));
        assert!(b.code().is_empty());
    }

    #[test]
    fn unknown_data_accessor_leaves_buffer_untouched() {
        let mut b = builder(CallConv::Stdcall);
        let f = b.register_function("libfake", "target").unwrap();
        let bogus = {
            let mut src = crate::accessor::TokenSource::from_seed(12);
            src.next_token()
        };
        let before = b.code().len();
        let err = b
            .push_call(f, &[Arg::Imm(0), Arg::Data(bogus)])
            .unwrap_err();
        assert!(matches!(err, BuildError::UnknownAccessor(_)));
        assert_eq!(b.code().len(), before);
    }

    #[test]
    fn cdecl_rejects_more_arguments_than_the_cleanup_can_encode() {
        let mut b = builder(CallConv::Cdecl);
        let f = b.register_function("libfake", "target").unwrap();
        let args = vec![Arg::Imm(0); MAX_CALL_ARGS + 1];
        let err = b.push_call(f, &args).unwrap_err();
        assert_eq!(
            err,
            BuildError::TooManyArgs {
                count: MAX_CALL_ARGS + 1
            }
        );
        assert!(b.code().is_empty());
    }

    #[test]
    fn finish_appends_the_terminating_return() {
        let mut b = builder(CallConv::Stdcall);
        let f = b.register_function("libfake", "target").unwrap();
        b.push_call(f, &[Arg::Imm(0)]).unwrap();
        let before = b.code().len();
        let stub = b.finish();
        assert_eq!(stub.code().len(), before + 1);
        assert_eq!(stub.code().last(), Some(&0xC3));
    }

    #[test]
    fn finish_on_an_empty_builder_yields_a_bare_return() {
        let stub = builder(CallConv::Stdcall).finish();
        assert_eq!(stub.code(), [0xC3]);
    }
}
