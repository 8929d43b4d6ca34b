// Copyright 2026 the Call Forge Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Reusable trace sinks for `call_forge`.
//!
//! [`RecordingTraceSink`] captures the event stream for assertions;
//! [`StderrTraceSink`] prints it, which is usually all the logging a
//! single-shot stub run needs.

use call_forge::trace::{TraceMask, TraceOutcome, TraceSink};

/// One captured executor event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TraceEvent {
    /// A run started with a stub of this many bytes.
    RunStart {
        /// Stub size in bytes.
        code_len: usize,
    },
    /// The executable region was acquired.
    RegionAllocated {
        /// Region size in bytes.
        len: usize,
    },
    /// The halt-before-run breakpoint fired.
    Breakpoint,
    /// The executable region was released.
    RegionReleased,
    /// The run finished.
    RunEnd {
        /// Whether the stub ran to its return.
        ok: bool,
    },
}

/// Sink that records every requested event in order.
#[derive(Debug)]
pub struct RecordingTraceSink {
    mask: TraceMask,
    /// Captured events, oldest first.
    pub events: Vec<TraceEvent>,
}

impl RecordingTraceSink {
    /// Creates a sink requesting the events in `mask`.
    #[must_use]
    pub fn new(mask: TraceMask) -> Self {
        Self {
            mask,
            events: Vec::new(),
        }
    }
}

impl TraceSink for RecordingTraceSink {
    fn mask(&self) -> TraceMask {
        self.mask
    }

    fn run_start(&mut self, code_len: usize) {
        self.events.push(TraceEvent::RunStart { code_len });
    }

    fn region_allocated(&mut self, len: usize) {
        self.events.push(TraceEvent::RegionAllocated { len });
    }

    fn breakpoint(&mut self) {
        self.events.push(TraceEvent::Breakpoint);
    }

    fn region_released(&mut self) {
        self.events.push(TraceEvent::RegionReleased);
    }

    fn run_end(&mut self, outcome: TraceOutcome<'_>) {
        self.events.push(TraceEvent::RunEnd {
            ok: matches!(outcome, TraceOutcome::Ok),
        });
    }
}

/// Sink that writes events to stderr.
#[derive(Debug, Default)]
pub struct StderrTraceSink;

impl TraceSink for StderrTraceSink {
    fn mask(&self) -> TraceMask {
        TraceMask::RUN | TraceMask::REGION
    }

    fn run_start(&mut self, code_len: usize) {
        eprintln!("stub run: {code_len} bytes");
    }

    fn region_allocated(&mut self, len: usize) {
        eprintln!("region allocated: {len} bytes");
    }

    fn breakpoint(&mut self) {
        eprintln!("breakpoint before control transfer");
    }

    fn region_released(&mut self) {
        eprintln!("region released");
    }

    fn run_end(&mut self, outcome: TraceOutcome<'_>) {
        match outcome {
            TraceOutcome::Ok => eprintln!("stub returned"),
            TraceOutcome::Failed(e) => eprintln!("stub failed: {e}"),
        }
    }
}
