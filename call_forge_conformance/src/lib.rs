// Copyright 2026 the Call Forge Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Test doubles for `call_forge` conformance testing.
//!
//! The doubles sit on the two collaborator boundaries: [`StaticResolver`]
//! replaces the platform loader with a fixed symbol map, and the engines
//! replace executable memory. [`CountingEngine`] observes the region
//! lifecycle; [`DecodingEngine`] additionally interprets the loaded stub
//! instead of jumping to it, so tests can check what a call would have done
//! without running foreign code.

use std::collections::BTreeMap;

use call_forge::asm::Addr;
use call_forge::exec::{ExecEngine, ExecError};
use call_forge::opcode;
use call_forge::symbols::{ResolveError, SymbolResolver};

/// Resolver over a fixed in-memory module/symbol map.
#[derive(Debug, Default)]
pub struct StaticResolver {
    modules: BTreeMap<String, BTreeMap<String, u32>>,
}

impl StaticResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module exporting the given symbol/address pairs.
    #[must_use]
    pub fn module(mut self, name: &str, symbols: &[(&str, u32)]) -> Self {
        let table = symbols
            .iter()
            .map(|&(s, a)| (s.to_string(), a))
            .collect::<BTreeMap<_, _>>();
        self.modules.insert(name.to_string(), table);
        self
    }
}

impl SymbolResolver for StaticResolver {
    type Module = String;

    fn load(&mut self, module: &str) -> Result<Self::Module, ResolveError> {
        if self.modules.contains_key(module) {
            Ok(module.to_string())
        } else {
            Err(ResolveError::ModuleNotFound {
                module: module.into(),
                reason: String::from("not in the static map"),
            })
        }
    }

    fn resolve(&mut self, module: &Self::Module, symbol: &str) -> Result<Addr, ResolveError> {
        self.modules
            .get(module)
            .and_then(|t| t.get(symbol))
            .map(|&a| Addr(a))
            .ok_or_else(|| ResolveError::SymbolNotFound {
                module: module.clone(),
                symbol: symbol.into(),
                reason: String::from("not in the static map"),
            })
    }
}

/// Engine over plain vectors that records its lifecycle.
#[derive(Debug, Default)]
pub struct CountingEngine {
    /// Number of successful allocations.
    pub allocated: usize,
    /// Number of released regions.
    pub released: usize,
    /// Number of control transfers.
    pub invoked: usize,
    /// Number of breakpoint triggers.
    pub breakpoints: usize,
    /// Fail the next allocation when set.
    pub fail_alloc: bool,
    /// Fail the load/protect step when set.
    pub fail_load: bool,
}

impl ExecEngine for CountingEngine {
    type Region = Vec<u8>;

    fn allocate(&mut self, len: usize) -> Result<Self::Region, ExecError> {
        if self.fail_alloc {
            return Err(ExecError::AllocationFailed { len });
        }
        self.allocated += 1;
        Ok(vec![0; len])
    }

    fn load(&mut self, region: &mut Self::Region, code: &[u8]) -> Result<(), ExecError> {
        if self.fail_load {
            return Err(ExecError::ProtectFailed { len: region.len() });
        }
        region.copy_from_slice(code);
        Ok(())
    }

    fn breakpoint(&mut self) {
        self.breakpoints += 1;
    }

    unsafe fn invoke(&mut self, _region: &Self::Region) {
        self.invoked += 1;
    }

    fn release(&mut self, _region: Self::Region) {
        self.released += 1;
    }
}

/// One call decoded out of a loaded stub.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedCall {
    /// Call target (the accumulator value at the call).
    pub target: u32,
    /// Arguments in declared (leftmost-first) order.
    pub args: Vec<u32>,
}

/// Engine that interprets the loaded stub instead of executing it.
///
/// The decoder understands exactly the fixed instruction set the builder
/// emits. Each `call` consumes the pushes accumulated since the previous
/// call, un-reversing them back into declared order.
#[derive(Debug, Default)]
pub struct DecodingEngine {
    /// Decoded calls in stub order.
    pub calls: Vec<DecodedCall>,
    /// Stack-cleanup byte counts seen after calls.
    pub cleanups: Vec<u8>,
    /// Number of `int3` bytes decoded inside the stub.
    pub soft_breaks: usize,
    /// Whether the stub ended in a return instruction.
    pub returned: bool,
    /// Number of released regions.
    pub released: usize,
}

impl DecodingEngine {
    /// Creates a fresh decoder engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn decode(&mut self, code: &[u8]) {
        let mut pushes: Vec<u32> = Vec::new();
        let mut eax: u32 = 0;
        let mut pc = 0;
        while pc < code.len() {
            let op = code[pc];
            if op == opcode::PUSH_IMM32 {
                let imm = u32::from_le_bytes(code[pc + 1..pc + 5].try_into().unwrap());
                pushes.push(imm);
                pc += 5;
            } else if op == opcode::PUSH_IMM8 {
                pushes.push(u32::from(code[pc + 1]));
                pc += 2;
            } else if op == opcode::MOV_EAX_IMM32 {
                eax = u32::from_le_bytes(code[pc + 1..pc + 5].try_into().unwrap());
                pc += 5;
            } else if code[pc..].starts_with(&opcode::CALL_EAX) {
                let mut args: Vec<u32> = pushes.drain(..).collect();
                args.reverse();
                self.calls.push(DecodedCall { target: eax, args });
                pc += 2;
            } else if code[pc..].starts_with(&opcode::ADD_ESP_IMM8) {
                self.cleanups.push(code[pc + 2]);
                pc += 3;
            } else if op == opcode::RET {
                self.returned = true;
                return;
            } else if op == opcode::BRK {
                self.soft_breaks += 1;
                pc += 1;
            } else {
                panic!("undecodable byte 0x{op:02x} at offset {pc}");
            }
        }
    }
}

impl ExecEngine for DecodingEngine {
    type Region = Vec<u8>;

    fn allocate(&mut self, len: usize) -> Result<Self::Region, ExecError> {
        Ok(vec![0; len])
    }

    fn load(&mut self, region: &mut Self::Region, code: &[u8]) -> Result<(), ExecError> {
        region.copy_from_slice(code);
        Ok(())
    }

    unsafe fn invoke(&mut self, region: &Self::Region) {
        let code = region.clone();
        self.decode(&code);
    }

    fn release(&mut self, _region: Self::Region) {
        self.released += 1;
    }
}
