//! # Sieve — Segmented Prime-Gap Search Engine
//!
//! Scans a window of `sievesize` odd offsets above `hash · 2^shift + offset`
//! for prime gaps at least as long as the target size implied by the proof's
//! difficulty. Three stages:
//!
//! 1. **Small-prime filter.** A plain Eratosthenes pass at construction time
//!    yields the first `n_primes` primes. Per segment, each odd prime marks
//!    its multiples in a word-packed bitset (set bit = composite), starting
//!    from the least odd index divisible by it.
//! 2. **Fermat filter.** Surviving candidates are checked with a base-2
//!    Fermat test (`2^(p−1) ≡ 1 mod p`). Final acceptance is always the
//!    proof validator's 25-round Miller–Rabin, so Fermat liars cost time,
//!    never correctness.
//! 3. **Reverse gap scan.** From the last confirmed probable prime `low`,
//!    the scan jumps ahead by the minimum useful gap length and walks
//!    *backward*; the first probable prime found becomes the new `low`. A
//!    backward walk that exhausts without a hit proves the window
//!    `(low, low + min_len]` is free of probable primes — a reportable gap.
//!
//! The engine is single-threaded and owns all of its state; callers
//! parallelize by running independent engines over disjoint offset ranges.
//! Within one segment, hits are reported in ascending adder order.
//!
//! ## Telemetry
//!
//! Throughput counters (estimated primes passed, Fermat tests, elapsed
//! microseconds) are kept twice: lifetime totals and a current interval.
//! Reading an interval rate arms a reset flag that the next `run_sieve`
//! consumes, so each interval starts fresh after it is observed. The prime
//! count is the `sievesize / ln(start)` density estimate, not an exact
//! count — telemetry is advisory.

use anyhow::Result;
use rug::integer::Order;
use rug::{Assign, Integer};
use tracing::debug;

use crate::arith::GapArith;
use crate::config::SieveConfig;
use crate::pow::GapPow;
use crate::GapProcessor;

/// Word-packed composite flags. A set bit means the odd offset at that index
/// was eliminated by the small-prime filter.
struct CompositeBits {
    words: Vec<u64>,
    len: u64,
}

impl CompositeBits {
    fn new(len_bits: u64) -> Self {
        CompositeBits {
            words: vec![0u64; ((len_bits + 63) / 64) as usize],
            len: len_bits,
        }
    }

    #[inline]
    fn mark(&mut self, index: u64) {
        debug_assert!(index < self.len);
        self.words[(index / 64) as usize] |= 1u64 << (index % 64);
    }

    #[inline]
    fn is_marked(&self, index: u64) -> bool {
        debug_assert!(index < self.len);
        self.words[(index / 64) as usize] & (1u64 << (index % 64)) != 0
    }

    fn clear_all(&mut self) {
        for word in &mut self.words {
            *word = 0;
        }
    }
}

/// First `n` primes via a plain Eratosthenes pass.
///
/// The bit array is sized by the Rosser bound `n·(ln n + ln ln n)`, which
/// contains the nth prime for all n >= 6, rounded up to a whole word; tiny
/// requests fall back to a 64-bit array.
fn first_primes(n: u64) -> Vec<u32> {
    let mut primes = Vec::with_capacity(n as usize);
    if n == 0 {
        return primes;
    }

    let bound = if n < 6 {
        64
    } else {
        let n_f = n as f64;
        (n_f * (n_f.ln() + n_f.ln().ln())).ceil() as u64
    };
    let limit = (bound + 63) & !63u64;

    let mut composite = CompositeBits::new(limit);
    primes.push(2);
    let mut i = 3u64;
    while i < limit && (primes.len() as u64) < n {
        if !composite.is_marked(i) {
            primes.push(i as u32);
            let mut multiple = i * i;
            while multiple < limit {
                composite.mark(multiple);
                multiple += 2 * i;
            }
        }
        i += 2;
    }
    primes
}

/// Segmented prime-gap search engine.
///
/// Owns its prime tables, bitset, scratch big integers, and counters; no
/// shared mutable state. Construction allocates everything up front and
/// `run_sieve` reuses it, so the per-segment cost is arithmetic only.
pub struct GapSieve {
    processor: Box<dyn GapProcessor>,

    primes: Vec<u32>,
    primes2: Vec<u64>,
    starts: Vec<u64>,
    sievesize: u64,
    composite: CompositeBits,

    seg_start: Integer,
    cand: Integer,
    exp: Integer,
    residue: Integer,
    two: Integer,

    found_primes: u64,
    tests: u64,
    passed_time: u64,
    cur_found_primes: u64,
    cur_tests: u64,
    cur_passed_time: u64,
    reset_stats: bool,
}

impl GapSieve {
    /// Build an engine with the first `n_primes` filter primes and a segment
    /// of `sievesize` bits (rounded up to a whole 64-bit word).
    pub fn new(processor: Box<dyn GapProcessor>, n_primes: u64, sievesize: u64) -> Self {
        let sievesize = (sievesize + 63) & !63u64;
        let primes = first_primes(n_primes);
        let primes2: Vec<u64> = primes.iter().map(|&p| 2 * u64::from(p)).collect();
        let starts = vec![0u64; primes.len()];

        GapSieve {
            processor,
            composite: CompositeBits::new(sievesize),
            primes,
            primes2,
            starts,
            sievesize,
            seg_start: Integer::new(),
            cand: Integer::new(),
            exp: Integer::new(),
            residue: Integer::new(),
            two: Integer::from(2u32),
            found_primes: 0,
            tests: 0,
            passed_time: 0,
            cur_found_primes: 0,
            cur_tests: 0,
            cur_passed_time: 0,
            reset_stats: false,
        }
    }

    /// Build from a validated [`SieveConfig`].
    pub fn from_config(processor: Box<dyn GapProcessor>, config: &SieveConfig) -> Result<Self> {
        config.validate()?;
        Ok(GapSieve::new(processor, config.n_primes, config.sievesize))
    }

    /// Replace the hit sink.
    pub fn set_processor(&mut self, processor: Box<dyn GapProcessor>) {
        self.processor = processor;
    }

    /// Scan one segment at `hash · 2^shift + offset` (little-endian bytes,
    /// empty = 0, forced even) and report every gap whose difficulty meets
    /// the proof's target through the processor.
    ///
    /// Input errors are never signalled: a malformed proof scans normally
    /// but cannot produce a hit, because `GapPow::valid` rejects it.
    pub fn run_sieve(&mut self, pow: &mut GapPow, offset: &[u8]) {
        let time_begin = GapArith::gettime_usec();
        if self.reset_stats {
            self.reset_stats = false;
            self.cur_found_primes = 0;
            self.cur_tests = 0;
            self.cur_passed_time = 0;
        }

        let mut offset_int = if offset.is_empty() {
            Integer::new()
        } else {
            Integer::from_digits(offset, Order::Lsf)
        };
        if offset_int.is_odd() {
            offset_int += 1u32;
        }

        // segment base is even: hash · 2^shift with shift >= 14, plus an
        // even offset
        self.seg_start.assign(pow.hash());
        self.seg_start <<= u32::from(pow.shift());
        self.seg_start += &offset_int;

        self.composite.clear_all();

        // least odd index with seg_start + index ≡ 0 (mod p), per odd prime
        for i in 1..self.primes.len() {
            let p = u64::from(self.primes[i]);
            let r = u64::from(self.seg_start.mod_u(self.primes[i]));
            let mut first = p - r;
            if first == p {
                first = 0;
            }
            if first & 1 == 0 {
                first += p;
            }
            self.starts[i] = first;
        }

        for i in 1..self.primes.len() {
            let step = self.primes2[i];
            let mut k = self.starts[i];
            while k < self.sievesize {
                self.composite.mark(k);
                k += step;
            }
        }

        let min_len = (pow.target_size(&self.seg_start) & !1u64).max(2);
        let mut n_tests = 0u64;

        // first probable prime of the segment anchors the gap chain
        let mut first_prime = None;
        let mut i = 1u64;
        while i < self.sievesize {
            if !self.composite.is_marked(i) {
                n_tests += 1;
                if self.fermat_test(i) {
                    first_prime = Some(i);
                    break;
                }
            }
            i += 2;
        }

        if let Some(first) = first_prime {
            let mut low = first;
            let mut i = low + min_len;
            while i < self.sievesize {
                // reverse scan: the highest probable prime at or below i
                // becomes the new chain anchor
                let mut hit = 0u64;
                let mut j = i;
                while j > low {
                    if !self.composite.is_marked(j) {
                        n_tests += 1;
                        if self.fermat_test(j) {
                            hit = j;
                            break;
                        }
                    }
                    j -= 2;
                }

                if hit != 0 {
                    low = hit;
                    i = low + min_len;
                } else {
                    // (low, low + min_len] holds no probable prime
                    pow.set_adder(Integer::from(&offset_int + low));
                    if pow.valid() {
                        debug!(
                            adder_index = low,
                            gap_len = pow.gap_len(),
                            "gap meets target difficulty"
                        );
                        if !self.processor.process(pow) {
                            break;
                        }
                    }
                    i += min_len;
                }
            }
        }

        // density estimate of primes passed; advisory only
        let ln_start = f64::from(self.seg_start.significant_bits()) * std::f64::consts::LN_2;
        let approx_primes = if ln_start > 0.0 {
            (self.sievesize as f64 / ln_start) as u64
        } else {
            0
        };
        self.found_primes += approx_primes;
        self.cur_found_primes += approx_primes;
        self.tests += n_tests;
        self.cur_tests += n_tests;

        let time_end = GapArith::gettime_usec();
        if time_begin != u64::MAX && time_end != u64::MAX {
            let elapsed = time_end.saturating_sub(time_begin);
            self.passed_time += elapsed;
            self.cur_passed_time += elapsed;
        }

        debug!(
            sievesize = self.sievesize,
            fermat_tests = n_tests,
            min_len,
            "segment scan complete"
        );
    }

    /// Base-2 Fermat probable-prime test of `seg_start + index`, on reused
    /// scratch integers.
    fn fermat_test(&mut self, index: u64) -> bool {
        self.cand.assign(&self.seg_start);
        self.cand += index;
        self.exp.assign(&self.cand);
        self.exp -= 1u32;
        self.residue.assign(&self.two);
        if self.residue.pow_mod_mut(&self.exp, &self.cand).is_err() {
            return false;
        }
        self.residue == 1u32
    }

    /// Estimated primes per second over the current interval; arms the
    /// interval reset consumed by the next `run_sieve`.
    pub fn primes_per_sec(&mut self) -> f64 {
        self.reset_stats = true;
        Self::rate(self.cur_found_primes, self.cur_passed_time)
    }

    /// Estimated primes per second over the engine's lifetime.
    pub fn avg_primes_per_sec(&self) -> f64 {
        Self::rate(self.found_primes, self.passed_time)
    }

    /// Fermat tests per second over the current interval; arms the interval
    /// reset consumed by the next `run_sieve`.
    pub fn tests_per_second(&mut self) -> f64 {
        self.reset_stats = true;
        Self::rate(self.cur_tests, self.cur_passed_time)
    }

    /// Fermat tests per second over the engine's lifetime.
    pub fn avg_tests_per_second(&self) -> f64 {
        Self::rate(self.tests, self.passed_time)
    }

    /// Lifetime estimate of primes passed during scanning.
    pub fn found_primes(&self) -> u64 {
        self.found_primes
    }

    fn rate(count: u64, usec: u64) -> f64 {
        // usec::MAX means the clock failed; show zero throughput
        if usec == 0 || usec == u64::MAX {
            return 0.0;
        }
        count as f64 * 1_000_000.0 / usec as f64
    }
}
