// Copyright 2026 the Call Forge Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use criterion::{BatchSize, BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use call_forge::accessor::TokenSource;
use call_forge::asm::{Addr, CallConv, StubAsm};
use call_forge::builder::{Arg, StubBuilder};
use call_forge::data::DataTable;
use call_forge::symbols::{ResolveError, SymbolResolver};

/// Resolver that maps every symbol to a fixed low address.
struct FlatResolver;

impl SymbolResolver for FlatResolver {
    type Module = ();

    fn load(&mut self, _module: &str) -> Result<Self::Module, ResolveError> {
        Ok(())
    }

    fn resolve(&mut self, _module: &Self::Module, _symbol: &str) -> Result<Addr, ResolveError> {
        Ok(Addr(0x0040_0000))
    }
}

fn bench_stub(c: &mut Criterion) {
    bench_encode_chain(c);
    bench_push_call(c);
    bench_register_data(c);
    bench_token_stream(c);
}

fn bench_encode_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_chain");
    for &n in &[16usize, 256, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let mut a = StubAsm::new();
                for i in 0..n {
                    a.push_imm32(i as u32);
                }
                a.mov_eax_imm32(Addr(0x0040_0000)).call_eax().ret();
                black_box(a.into_bytes());
            });
        });
    }
    group.finish();
}

fn bench_push_call(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_call");
    for &arity in &[0usize, 4, 16, 31] {
        let args = vec![Arg::Imm(7); arity];
        group.bench_with_input(BenchmarkId::from_parameter(arity), &args, |b, args| {
            b.iter_batched(
                || {
                    let mut builder = StubBuilder::new(FlatResolver, CallConv::Cdecl);
                    let f = builder.register_function("flat", "f").unwrap();
                    (builder, f)
                },
                |(mut builder, f)| {
                    for _ in 0..64 {
                        builder.push_call(f, args).unwrap();
                    }
                    black_box(builder.finish());
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_register_data(c: &mut Criterion) {
    let mut group = c.benchmark_group("register_data");
    for &len in &[8usize, 256, 4096] {
        let payload = vec![0x5A_u8; len];
        group.bench_with_input(BenchmarkId::from_parameter(len), &payload, |b, payload| {
            b.iter_batched(
                DataTable::new,
                |mut table| {
                    for _ in 0..64 {
                        black_box(table.register(payload).unwrap());
                    }
                    table
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_token_stream(c: &mut Criterion) {
    c.bench_function("token_stream_1k", |b| {
        let mut src = TokenSource::from_seed(0x5EED);
        b.iter(|| {
            for _ in 0..1024 {
                black_box(src.next_token());
            }
        });
    });
}

criterion_group!(benches, bench_stub);
criterion_main!(benches);
