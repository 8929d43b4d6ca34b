// Copyright 2026 the Call Forge Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

#![doc = "Call-script driver for `call_forge`.\n\n\
          Reads a declarative TOML script naming modules, symbols, data \
          blobs, and calls, assembles the stub, and prints it or runs it. \
          This is a std-only host tool; the core stays embeddable.\n"]

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use call_forge::accessor::Accessor;
use call_forge::asm::CallConv;
use call_forge::builder::{Arg, Stub, StubBuilder};

#[derive(Deserialize)]
struct Script {
    /// "stdcall" (default) or "cdecl".
    convention: Option<String>,
    #[serde(default)]
    blobs: Vec<BlobSpec>,
    #[serde(default)]
    functions: Vec<FunctionSpec>,
    #[serde(default)]
    calls: Vec<CallSpec>,
}

#[derive(Deserialize)]
struct BlobSpec {
    name: String,
    text: Option<String>,
    bytes: Option<Vec<u8>>,
}

#[derive(Deserialize)]
struct FunctionSpec {
    name: String,
    module: String,
    symbol: String,
}

#[derive(Deserialize)]
struct CallSpec {
    function: String,
    #[serde(default)]
    args: Vec<ArgSpec>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ArgSpec {
    Imm {
        imm: u32,
    },
    Data {
        data: String,
    },
}

struct Options {
    script: PathBuf,
    run: bool,
    halt: bool,
}

fn parse_args() -> Result<Options> {
    let mut script = None;
    let mut run = false;
    let mut halt = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--run" => run = true,
            "--halt" => halt = true,
            "--help" | "-h" => {
                bail!("usage: call_forge_driver [--run] [--halt] <script.toml>")
            }
            _ if arg.starts_with('-') => bail!("unknown flag '{arg}'"),
            _ => {
                if script.replace(PathBuf::from(&arg)).is_some() {
                    bail!("more than one script given");
                }
            }
        }
    }
    let Some(script) = script else {
        bail!("usage: call_forge_driver [--run] [--halt] <script.toml>")
    };
    Ok(Options { script, run, halt })
}

fn parse_convention(s: Option<&str>) -> Result<CallConv> {
    match s {
        None | Some("stdcall") => Ok(CallConv::Stdcall),
        Some("cdecl") => Ok(CallConv::Cdecl),
        Some(other) => bail!("unknown calling convention '{other}'"),
    }
}

fn blob_payload(spec: &BlobSpec) -> Result<Vec<u8>> {
    match (&spec.text, &spec.bytes) {
        (Some(text), None) => Ok(text.clone().into_bytes()),
        (None, Some(bytes)) => Ok(bytes.clone()),
        _ => bail!("blob '{}' needs exactly one of 'text' or 'bytes'", spec.name),
    }
}

fn assemble(script: &Script) -> Result<Stub<libloading::Library>> {
    let conv = parse_convention(script.convention.as_deref())?;
    let mut builder = StubBuilder::native(conv);

    let mut blobs: BTreeMap<&str, Accessor> = BTreeMap::new();
    for spec in &script.blobs {
        let payload = blob_payload(spec)?;
        let acc = builder
            .register_data(&payload)
            .with_context(|| format!("registering blob '{}'", spec.name))?;
        if blobs.insert(spec.name.as_str(), acc).is_some() {
            bail!("duplicate blob name '{}'", spec.name);
        }
    }

    let mut functions: BTreeMap<&str, Accessor> = BTreeMap::new();
    for spec in &script.functions {
        let acc = builder
            .register_function(&spec.module, &spec.symbol)
            .with_context(|| format!("registering function '{}'", spec.name))?;
        if functions.insert(spec.name.as_str(), acc).is_some() {
            bail!("duplicate function name '{}'", spec.name);
        }
    }

    for (i, call) in script.calls.iter().enumerate() {
        let Some(&target) = functions.get(call.function.as_str()) else {
            bail!("call #{i} names unregistered function '{}'", call.function);
        };
        let mut args = Vec::with_capacity(call.args.len());
        for spec in &call.args {
            args.push(match spec {
                ArgSpec::Imm { imm } => Arg::Imm(*imm),
                ArgSpec::Data { data } => {
                    let Some(&acc) = blobs.get(data.as_str()) else {
                        bail!("call #{i} names unregistered blob '{data}'");
                    };
                    Arg::Data(acc)
                }
            });
        }
        builder
            .push_call(target, &args)
            .with_context(|| format!("appending call #{i} to '{}'", call.function))?;
    }

    Ok(builder.finish())
}

fn dump(stub: &Stub<libloading::Library>) {
    for (i, chunk) in stub.code().chunks(16).enumerate() {
        print!("{:04x}:", i * 16);
        for byte in chunk {
            print!(" {byte:02x}");
        }
        println!();
    }
}

#[cfg(unix)]
fn run(stub: Stub<libloading::Library>, halt: bool) -> Result<()> {
    use call_forge::exec::MmapEngine;
    use call_forge::trace::TraceMask;

    stub.run(&mut MmapEngine, halt, TraceMask::NONE, None)
        .context("executing stub")?;
    eprintln!("stub returned");
    Ok(())
}

#[cfg(not(unix))]
fn run(_stub: Stub<libloading::Library>, _halt: bool) -> Result<()> {
    bail!("--run is only supported on unix hosts")
}

fn main() -> Result<()> {
    let opts = parse_args()?;
    let raw = fs::read_to_string(&opts.script)
        .with_context(|| format!("reading {}", opts.script.display()))?;
    let script: Script =
        toml::from_str(&raw).with_context(|| format!("parsing {}", opts.script.display()))?;

    let stub = assemble(&script)?;
    dump(&stub);
    if opts.run {
        run(stub, opts.halt)?;
    }
    Ok(())
}
