// Copyright 2026 the Call Forge Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Assembles a stub that calls `puts` with a registered string blob.
//!
//! Run with:
//! `cargo run -p call_forge --example hello_call [-- --run]`
//!
//! Without `--run` the stub is only assembled and hex-dumped. Transferring
//! control requires an x86-32 host; on anything else registration already
//! reports that the entry address does not fit the encoded width.

use call_forge::asm::CallConv;
use call_forge::builder::{Arg, Stub, StubBuilder};

fn main() {
    let execute = std::env::args().any(|a| a == "--run");

    let mut b = StubBuilder::native(CallConv::Cdecl);
    let puts = match b.register_function("libc.so.6", "puts") {
        Ok(acc) => acc,
        Err(e) => {
            eprintln!("cannot resolve puts: {e}");
            return;
        }
    };
    let text = b.register_data(b"hello from a forged stub").unwrap();
    b.push_call(puts, &[Arg::Data(text)]).unwrap();

    let stub = b.finish();
    for (i, chunk) in stub.code().chunks(16).enumerate() {
        print!("{:04x}:", i * 16);
        for byte in chunk {
            print!(" {byte:02x}");
        }
        println!();
    }

    if execute {
        run(stub);
    }
}

#[cfg(all(unix, target_arch = "x86"))]
fn run(stub: Stub<libloading::Library>) {
    use call_forge::exec::MmapEngine;
    use call_forge::trace::TraceMask;

    if let Err(e) = stub.run(&mut MmapEngine, false, TraceMask::NONE, None) {
        eprintln!("execution failed: {e}");
    }
}

#[cfg(not(all(unix, target_arch = "x86")))]
fn run(_stub: Stub<libloading::Library>) {
    eprintln!("--run needs an x86-32 unix host");
}
