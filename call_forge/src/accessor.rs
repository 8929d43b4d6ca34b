// Copyright 2026 the Call Forge Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Opaque accessor tokens for registered functions and data blobs.
//!
//! Accessors are random rather than sequential so that a token cannot be
//! guessed, forged from an index, or accidentally reused across tables. The
//! generator is a SplitMix64 stream seeded once per source from the standard
//! library's per-process random state; tables draw from it and re-draw on the
//! (negligible) chance that a token is already occupied.

use core::fmt;
use std::hash::{BuildHasher, Hasher};

/// An opaque token identifying a registered function or data blob.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Accessor(u32);

impl Accessor {
    /// Returns the raw token value.
    ///
    /// The value carries no structure; it is only useful for diagnostics.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Which table an accessor was expected in.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AccessorKind {
    /// The resolved-function table.
    Function,
    /// The data-blob table.
    Data,
}

/// An accessor was not present in the table it was used against.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UnknownAccessor {
    /// The token that failed to resolve.
    pub accessor: Accessor,
    /// The table the lookup ran against.
    pub kind: AccessorKind,
}

impl fmt::Display for UnknownAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            AccessorKind::Function => write!(f, "unknown function accessor {}", self.accessor),
            AccessorKind::Data => write!(f, "unknown data accessor {}", self.accessor),
        }
    }
}

impl std::error::Error for UnknownAccessor {}

/// A stream of well-distributed random tokens.
///
/// SplitMix64 folded to 32 bits. Not cryptographic; the requirement is only
/// that tokens are unpredictable and collisions are negligible at realistic
/// table sizes (about `n^2 / 2^33` for `n` live entries, by birthday bound).
#[derive(Clone, Debug)]
pub struct TokenSource {
    state: u64,
}

impl TokenSource {
    const GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

    /// Creates a source seeded from the process-wide random hasher state.
    #[must_use]
    pub fn new() -> Self {
        let seed = std::collections::hash_map::RandomState::new()
            .build_hasher()
            .finish();
        Self::from_seed(seed)
    }

    /// Creates a source with a fixed seed. Intended for tests.
    #[must_use]
    pub const fn from_seed(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Returns the next token in the stream.
    pub fn next_token(&mut self) -> Accessor {
        self.state = self.state.wrapping_add(Self::GAMMA);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        Accessor((z >> 32) as u32 ^ z as u32)
    }
}

impl Default for TokenSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_stream_is_deterministic() {
        let mut a = TokenSource::from_seed(7);
        let mut b = TokenSource::from_seed(7);
        for _ in 0..16 {
            assert_eq!(a.next_token(), b.next_token());
        }
    }

    #[test]
    fn tokens_are_not_sequential() {
        let mut src = TokenSource::from_seed(0);
        let t0 = src.next_token().raw();
        let t1 = src.next_token().raw();
        let t2 = src.next_token().raw();
        assert_ne!(t1, t0.wrapping_add(1));
        assert_ne!(t2, t1.wrapping_add(1));
    }

    #[test]
    fn short_streams_do_not_collide() {
        let mut src = TokenSource::from_seed(42);
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..4096 {
            assert!(seen.insert(src.next_token()));
        }
    }
}
