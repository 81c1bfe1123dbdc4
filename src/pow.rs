//! # PoW — One Prime-Gap Puzzle Instance
//!
//! A `GapPow` bundles the puzzle inputs (hash, shift, adder, target
//! difficulty, nonce) and derives everything else on demand: the gap
//! endpoints, the gap length, merit, difficulty, and validity. Nothing is
//! cached — callers query sparingly and always see values consistent with
//! the current fields.
//!
//! Failure is non-fatal throughout: a malformed instance (shift out of
//! range, hash not 256 bits, adder wider than the shift, composite start)
//! simply derives `None` endpoints, and the scalar queries return the 0 /
//! `false` sentinels.

use std::fmt;

use rug::integer::{IsPrime, Order};
use rug::Integer;

use crate::arith::GapArith;
use crate::{has_small_factor, mr_screened_test};

/// Smallest allowed shift. Below this the adder search space is too small
/// to contain a gap of any interesting merit.
pub const MIN_SHIFT: u16 = 14;

/// Miller–Rabin rounds for final primality validation.
pub const MR_ROUNDS: u32 = 25;

/// One proof-of-work candidate: `start = hash · 2^shift + adder`.
#[derive(Clone, Debug)]
pub struct GapPow {
    hash: Integer,
    shift: u16,
    adder: Integer,
    target_difficulty: u64,
    nonce: u32,
    max_shift: Option<u16>,
    arith: GapArith,
}

impl GapPow {
    /// Build from native big integers; the nonce starts at 0 and the shift
    /// is uncapped.
    pub fn new(hash: Integer, shift: u16, adder: Integer, target_difficulty: u64) -> Self {
        GapPow {
            hash,
            shift,
            adder,
            target_difficulty,
            nonce: 0,
            max_shift: None,
            arith: GapArith::new(),
        }
    }

    /// Build from little-endian byte encodings of the hash and adder.
    pub fn from_le_bytes(
        hash: &[u8],
        shift: u16,
        adder: &[u8],
        target_difficulty: u64,
        nonce: u32,
    ) -> Self {
        let mut pow = GapPow::new(
            Integer::from_digits(hash, Order::Lsf),
            shift,
            Integer::from_digits(adder, Order::Lsf),
            target_difficulty,
        );
        pow.nonce = nonce;
        pow
    }

    /// Derive the gap endpoints, or `None` when this instance is not a
    /// well-formed proof: the shift must lie in [14, max_shift], the hash
    /// must be exactly 256 bits, the adder must fit in the shift, and
    /// `start` must survive 25 Miller–Rabin rounds. On success `end` is the
    /// next prime above `start`.
    pub fn end_points(&self) -> Option<(Integer, Integer)> {
        if self.shift < MIN_SHIFT {
            return None;
        }
        if let Some(cap) = self.max_shift {
            if self.shift > cap {
                return None;
            }
        }
        if self.hash < 0 || self.hash.significant_bits() != 256 {
            return None;
        }
        if self.adder < 0 || self.adder.significant_bits() > u32::from(self.shift) {
            return None;
        }

        let start = Integer::from(&self.hash << u32::from(self.shift)) + &self.adder;
        if has_small_factor(&start) {
            return None;
        }
        if mr_screened_test(&start, MR_ROUNDS) == IsPrime::No {
            return None;
        }

        let end = start.clone().next_prime();
        Some((start, end))
    }

    /// Difficulty of this proof's gap; 0 when the proof is malformed.
    pub fn difficulty(&self) -> u64 {
        match self.end_points() {
            Some((start, end)) => self.arith.difficulty(&start, &end),
            None => 0,
        }
    }

    /// Merit of this proof's gap; 0 when the proof is malformed.
    pub fn merit(&self) -> u64 {
        match self.end_points() {
            Some((start, end)) => self.arith.merit(&start, &end),
            None => 0,
        }
    }

    /// Gap length `end − start`; 0 when the proof is malformed.
    pub fn gap_len(&self) -> u64 {
        match self.end_points() {
            Some((start, end)) => Integer::from(&end - &start).to_u64().unwrap_or(0),
            None => 0,
        }
    }

    /// A proof is valid when its gap difficulty meets the target.
    pub fn valid(&self) -> bool {
        match self.end_points() {
            Some((start, end)) => {
                self.arith.difficulty(&start, &end) >= self.target_difficulty
            }
            None => false,
        }
    }

    /// Minimum gap length meeting this proof's target difficulty at `start`.
    pub fn target_size(&self, start: &Integer) -> u64 {
        self.arith.target_size(start, self.target_difficulty)
    }

    pub fn hash(&self) -> &Integer {
        &self.hash
    }

    pub fn set_hash(&mut self, hash: Integer) {
        self.hash = hash;
    }

    pub fn shift(&self) -> u16 {
        self.shift
    }

    pub fn set_shift(&mut self, shift: u16) {
        self.shift = shift;
    }

    pub fn adder(&self) -> &Integer {
        &self.adder
    }

    /// Adder as minimal little-endian bytes.
    pub fn adder_le_bytes(&self) -> Vec<u8> {
        self.adder.to_digits::<u8>(Order::Lsf)
    }

    pub fn set_adder(&mut self, adder: Integer) {
        self.adder = adder;
    }

    pub fn set_adder_le_bytes(&mut self, adder: &[u8]) {
        self.adder = Integer::from_digits(adder, Order::Lsf);
    }

    pub fn nonce(&self) -> u32 {
        self.nonce
    }

    pub fn set_nonce(&mut self, nonce: u32) {
        self.nonce = nonce;
    }

    pub fn target_difficulty(&self) -> u64 {
        self.target_difficulty
    }

    /// Optional upper bound on the shift, a guard against resource
    /// exhaustion from absurd adder search spaces. `None` means uncapped.
    pub fn set_max_shift(&mut self, max_shift: Option<u16>) {
        self.max_shift = max_shift;
    }
}

impl fmt::Display for GapPow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hash: {:x}, shift: {}, adder: {:x}, difficulty: {:.6}, nonce: {}",
            self.hash,
            self.shift,
            self.adder,
            GapArith::readable_difficulty(self.target_difficulty),
            self.nonce
        )
    }
}
