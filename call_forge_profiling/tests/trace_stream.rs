// Copyright 2026 the Call Forge Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

#![allow(missing_docs, reason = "integration test crate")]

use call_forge::exec::{ExecEngine, ExecError, run_stub};
use call_forge::trace::{TraceMask, TraceSink};

use call_forge_profiling::{RecordingTraceSink, TraceEvent};

/// Minimal engine: loads into a vector, never transfers control.
#[derive(Default)]
struct NopEngine {
    fail_load: bool,
}

impl ExecEngine for NopEngine {
    type Region = Vec<u8>;

    fn allocate(&mut self, len: usize) -> Result<Self::Region, ExecError> {
        Ok(vec![0; len])
    }

    fn load(&mut self, region: &mut Self::Region, code: &[u8]) -> Result<(), ExecError> {
        if self.fail_load {
            return Err(ExecError::ProtectFailed { len: region.len() });
        }
        region.copy_from_slice(code);
        Ok(())
    }

    unsafe fn invoke(&mut self, _region: &Self::Region) {}

    fn release(&mut self, _region: Self::Region) {}
}

#[test]
fn successful_run_emits_the_full_stream_in_order() {
    let mut sink = RecordingTraceSink::new(TraceMask::RUN | TraceMask::REGION);
    let mask = sink.mask();
    run_stub(&mut NopEngine::default(), &[0xC3], true, mask, Some(&mut sink)).unwrap();

    assert_eq!(
        sink.events,
        vec![
            TraceEvent::RunStart { code_len: 1 },
            TraceEvent::RegionAllocated { len: 1 },
            TraceEvent::Breakpoint,
            TraceEvent::RegionReleased,
            TraceEvent::RunEnd { ok: true },
        ]
    );
}

#[test]
fn failed_run_still_reports_the_release() {
    let mut sink = RecordingTraceSink::new(TraceMask::RUN | TraceMask::REGION);
    let mask = sink.mask();
    let mut engine = NopEngine { fail_load: true };
    run_stub(&mut engine, &[0xC3], false, mask, Some(&mut sink)).unwrap_err();

    assert_eq!(
        sink.events,
        vec![
            TraceEvent::RunStart { code_len: 1 },
            TraceEvent::RegionAllocated { len: 1 },
            TraceEvent::RegionReleased,
            TraceEvent::RunEnd { ok: false },
        ]
    );
}

#[test]
fn masked_out_events_are_not_delivered() {
    let mut sink = RecordingTraceSink::new(TraceMask::REGION);
    run_stub(
        &mut NopEngine::default(),
        &[0xC3],
        false,
        TraceMask::REGION,
        Some(&mut sink),
    )
    .unwrap();

    assert_eq!(
        sink.events,
        vec![
            TraceEvent::RegionAllocated { len: 1 },
            TraceEvent::RegionReleased,
        ]
    );
}

#[test]
fn empty_program_produces_no_events() {
    let mut sink = RecordingTraceSink::new(TraceMask::RUN | TraceMask::REGION);
    let mask = sink.mask();
    let err = run_stub(&mut NopEngine::default(), &[], false, mask, Some(&mut sink)).unwrap_err();
    assert_eq!(err, ExecError::EmptyProgram);
    assert!(sink.events.is_empty());
}
