// Copyright 2026 the Call Forge Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `call_forge`: a dynamic call-stub assembler and executor for x86-32.
//!
//! Given a native function resolved by name and an ordered argument list
//! (immediates or registered data blobs), the builder emits a fixed
//! push-then-call instruction sequence into an append-only buffer. The
//! finished stub is copied into executable memory and run exactly once.
//!
//! The instruction set is fixed and tiny; there is no instruction selection,
//! no disassembly, and no second architecture. What the crate does guarantee:
//!
//! - blob and entry addresses baked into the code stay valid until the run
//!   finishes (the tables move into the finalized [`builder::Stub`]);
//! - a stub executes at most once (running consumes it);
//! - the executable region is released on success and failure alike.
//!
//! ## Example
//!
//! ```no_run
//! use call_forge::asm::CallConv;
//! use call_forge::builder::{Arg, StubBuilder};
//! use call_forge::exec::MmapEngine;
//! use call_forge::trace::TraceMask;
//!
//! let mut b = StubBuilder::native(CallConv::Cdecl);
//! let puts = b.register_function("libc.so.6", "puts")?;
//! let text = b.register_data(b"forged at runtime")?;
//! b.push_call(puts, &[Arg::Data(text)])?;
//!
//! let stub = b.finish();
//! stub.run(&mut MmapEngine, false, TraceMask::NONE, None)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Executing for real requires an x86-32 host; everything up to the control
//! transfer (registration, encoding, sequencing) is host-independent and is
//! what the test suites exercise.

#![warn(missing_docs)]

pub mod accessor;
pub mod asm;
pub mod builder;
pub mod data;
pub mod exec;
pub mod opcode;
pub mod symbols;
pub mod trace;
