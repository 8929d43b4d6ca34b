// Copyright 2026 the Call Forge Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Traces a minimal native run to stderr.
//!
//! Run with:
//! `cargo run -p call_forge_profiling --example stderr_trace`
//!
//! The stub is a bare return, which encodes identically on x86 and x86-64,
//! so the full native path (map, protect, call, unmap) runs on either.

#[cfg(all(unix, any(target_arch = "x86", target_arch = "x86_64")))]
fn main() {
    use call_forge::asm;
    use call_forge::exec::{MmapEngine, run_stub};
    use call_forge::trace::TraceSink;
    use call_forge_profiling::StderrTraceSink;

    let mut sink = StderrTraceSink;
    let mask = sink.mask();
    let code = asm::ret();
    match run_stub(&mut MmapEngine, &code, false, mask, Some(&mut sink)) {
        Ok(()) => eprintln!("done"),
        Err(e) => eprintln!("failed: {e}"),
    }
}

#[cfg(not(all(unix, any(target_arch = "x86", target_arch = "x86_64"))))]
fn main() {
    eprintln!("this example needs a unix x86 or x86-64 host");
}
