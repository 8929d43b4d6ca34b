// Copyright 2026 the Call Forge Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Benchmark harness crate for `call_forge`. See `benches/`.
