// Copyright 2026 the Call Forge Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Executor for finished instruction buffers.
//!
//! The executor copies a stub into an executable region obtained from an
//! [`ExecEngine`] and transfers control to its first byte exactly once. The
//! control transfer is an ordinary synchronous native call: the invoking
//! thread is suspended until the generated code executes its `ret`, and
//! there is no timeout, cancellation, or recovery if the code never returns
//! or crashes. That risk is inherent to running generated code and is left
//! visible rather than wrapped.
//!
//! The region is released exactly once on every exit path.

use core::fmt;

use crate::trace::{TraceMask, TraceOutcome, TraceSink};

/// Errors from executing an instruction buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecError {
    /// The instruction buffer was empty; nothing was allocated.
    EmptyProgram,
    /// The engine could not provide an executable region.
    AllocationFailed {
        /// Requested region size in bytes.
        len: usize,
    },
    /// The region was acquired but could not be made executable.
    ProtectFailed {
        /// Region size in bytes.
        len: usize,
    },
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyProgram => write!(f, "instruction buffer is empty"),
            Self::AllocationFailed { len } => {
                write!(f, "failed to allocate {len} bytes of executable memory")
            }
            Self::ProtectFailed { len } => {
                write!(f, "failed to make a {len}-byte region executable")
            }
        }
    }
}

impl std::error::Error for ExecError {}

/// Platform executable-memory provider and control transfer.
///
/// Splitting this out of the executor keeps the run sequencing testable: a
/// test engine can count allocations, fail on demand, or decode the loaded
/// bytes instead of jumping to them.
pub trait ExecEngine {
    /// An acquired region. Released exactly once via [`ExecEngine::release`].
    type Region;

    /// Acquires a writable region of at least `len` bytes.
    fn allocate(&mut self, len: usize) -> Result<Self::Region, ExecError>;

    /// Copies `code` verbatim into the region and makes it executable.
    ///
    /// Engines that cannot hold write and execute permission simultaneously
    /// implement this as the two-step write-then-protect sequence.
    fn load(&mut self, region: &mut Self::Region, code: &[u8]) -> Result<(), ExecError>;

    /// Triggers a debugger breakpoint. Diagnostic aid only.
    fn breakpoint(&mut self) {}

    /// Transfers control to the first byte of the region as a zero-argument,
    /// no-return-value native call.
    ///
    /// # Safety
    ///
    /// The region must contain a complete instruction sequence for the host
    /// CPU that terminates with a return, and every address embedded in it
    /// must still be valid. The call blocks until the generated code
    /// returns; a stub that misbehaves takes the process with it.
    unsafe fn invoke(&mut self, region: &Self::Region);

    /// Releases the region.
    fn release(&mut self, region: Self::Region);
}

/// Runs `code` through `engine` as a single-shot program.
///
/// This is the single-shot core used by [`crate::builder::Stub::run`]:
/// reject empty input, allocate, load, optionally halt, invoke, and release
/// on success and failure alike.
pub fn run_stub<E: ExecEngine>(
    engine: &mut E,
    code: &[u8],
    halt: bool,
    mask: TraceMask,
    mut sink: Option<&mut dyn TraceSink>,
) -> Result<(), ExecError> {
    if code.is_empty() {
        return Err(ExecError::EmptyProgram);
    }

    if mask.contains(TraceMask::RUN) {
        if let Some(s) = sink.as_deref_mut() {
            s.run_start(code.len());
        }
    }

    let mut region = engine.allocate(code.len())?;
    if mask.contains(TraceMask::REGION) {
        if let Some(s) = sink.as_deref_mut() {
            s.region_allocated(code.len());
        }
    }

    let result = match engine.load(&mut region, code) {
        Err(e) => Err(e),
        Ok(()) => {
            if halt {
                if mask.contains(TraceMask::RUN) {
                    if let Some(s) = sink.as_deref_mut() {
                        s.breakpoint();
                    }
                }
                engine.breakpoint();
            }
            // Safety: the buffer was finalized with a terminating return and
            // the tables whose addresses it embeds are still alive; see the
            // caller in `builder`.
            unsafe { engine.invoke(&region) };
            Ok(())
        }
    };

    engine.release(region);
    if mask.contains(TraceMask::REGION) {
        if let Some(s) = sink.as_deref_mut() {
            s.region_released();
        }
    }

    if mask.contains(TraceMask::RUN) {
        if let Some(s) = sink.as_deref_mut() {
            match &result {
                Ok(()) => s.run_end(TraceOutcome::Ok),
                Err(e) => s.run_end(TraceOutcome::Failed(e)),
            }
        }
    }

    result
}

/// Production engine backed by anonymous memory mappings.
///
/// Allocation maps the region read/write; `load` copies the stub and flips
/// the mapping to read/execute, so writable and executable permission are
/// never held together.
#[cfg(unix)]
#[derive(Debug, Default)]
pub struct MmapEngine;

/// An executable mapping owned by [`MmapEngine`].
#[cfg(unix)]
#[derive(Debug)]
pub struct MmapRegion {
    base: *mut u8,
    len: usize,
}

#[cfg(unix)]
impl MmapRegion {
    /// Returns the start address of the mapping.
    #[must_use]
    pub fn base(&self) -> *const u8 {
        self.base
    }
}

#[cfg(unix)]
impl ExecEngine for MmapEngine {
    type Region = MmapRegion;

    fn allocate(&mut self, len: usize) -> Result<Self::Region, ExecError> {
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(ExecError::AllocationFailed { len });
        }
        Ok(MmapRegion {
            base: base.cast(),
            len,
        })
    }

    fn load(&mut self, region: &mut Self::Region, code: &[u8]) -> Result<(), ExecError> {
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), region.base, code.len());
        }
        let rc = unsafe {
            libc::mprotect(
                region.base.cast(),
                region.len,
                libc::PROT_READ | libc::PROT_EXEC,
            )
        };
        if rc != 0 {
            return Err(ExecError::ProtectFailed { len: region.len });
        }
        Ok(())
    }

    fn breakpoint(&mut self) {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        unsafe {
            core::arch::asm!("int3");
        }
    }

    unsafe fn invoke(&mut self, region: &Self::Region) {
        let entry =
            unsafe { std::mem::transmute::<*mut u8, unsafe extern "C" fn()>(region.base) };
        unsafe { entry() };
    }

    fn release(&mut self, region: Self::Region) {
        let rc = unsafe { libc::munmap(region.base.cast(), region.len) };
        debug_assert_eq!(rc, 0);
    }
}
