//! # Arith — Fixed-Point Difficulty Arithmetic
//!
//! Every quantity the gap proof-of-work consumes is derived here from integer
//! arithmetic over arbitrary-precision numbers, so that two independent nodes
//! on different machines agree bit-for-bit. Floating point appears only in
//! display helpers (`readable_difficulty`, `gaps_per_day`) that never feed
//! back into consensus.
//!
//! ## Fixed-point convention
//!
//! Difficulty and merit values are `u64` interpreted as `value · 2^48`
//! (48 fractional bits). One integer unit is 2^-48 in human terms.
//!
//! ## Algorithm: bit-by-bit log2
//!
//! [`GapArith::log2`] computes `⌊log2(n) · 2^acc⌋` by the classical squaring
//! recurrence: normalize `y = n / 2^(bitlen-1)` into [1, 2), then square `y`
//! once per fractional bit — each squaring either crosses 2 (bit is 1, halve)
//! or stays below (bit is 0). The mantissa is carried as an integer scaled by
//! `2^(acc + bitlen - 1)`, so the whole iteration is shifts and multiplies.
//!
//! ## Merit and difficulty
//!
//! The merit of a gap is `(end − start) / ln(start)` — the gap length in
//! units of the average gap near `start` (prime number theorem). Difficulty
//! adds a deterministic sub-merit tie-break derived from a double SHA-256 of
//! the gap endpoints, so equal-length gaps at the same start size still order
//! totally without ever crossing into the next discrete merit step.
//!
//! ## References
//!
//! - Crandall & Pomerance, "Prime Numbers: A Computational Perspective",
//!   §1.4 (gap statistics), §3 (probable-prime testing).
//! - Tomás Oliveira e Silva, "Gaps between consecutive primes" tables,
//!   <http://sweet.ua.pt/tos/gaps.html> (merit as the gap quality measure).

use std::time::{SystemTime, UNIX_EPOCH};

use rug::integer::Order;
use rug::{Float, Integer};
use sha2::{Digest, Sha256};

/// 2^48, one difficulty unit in human terms.
pub const TWO_POW48: u64 = 1u64 << 48;

/// Smallest difficulty the main network accepts (16.0).
pub const MIN_DIFFICULTY: u64 = 16 * TWO_POW48;

/// Smallest difficulty the test network accepts (1.0).
pub const MIN_TEST_DIFFICULTY: u64 = TWO_POW48;

/// Desired seconds between blocks.
pub const TARGET_SPACING: u64 = 150;

/// ln(150) · 2^48, the retarget set point.
pub const LOG_150_48: u64 = 0x502b8fea053a6;

/// Retarget step per elapsed 174 · 150 seconds in [`GapArith::max_difficulty_decrease`].
const DECREASE_INTERVAL: i64 = 174 * TARGET_SPACING as i64;

/// log2(e) · 2^112, hex digits of the binary expansion.
const LOG2_E_112_HEX: &str = "171547652b82fe1777d0ffda0d23a";

/// log2(e) · 2^64.
const LOG2_E_64_HEX: &str = "171547652b82fe177";

/// Fixed-point arithmetic context.
///
/// Owns the scaled log2(e) constants; instances are independent and cheap to
/// clone, so each `GapPow` carries its own.
#[derive(Clone, Debug)]
pub struct GapArith {
    log2_e_112: Integer,
    log2_e_64: Integer,
}

impl Default for GapArith {
    fn default() -> Self {
        Self::new()
    }
}

impl GapArith {
    pub fn new() -> Self {
        GapArith {
            log2_e_112: Integer::from(
                Integer::parse_radix(LOG2_E_112_HEX, 16).expect("constant parses"),
            ),
            log2_e_64: Integer::from(
                Integer::parse_radix(LOG2_E_64_HEX, 16).expect("constant parses"),
            ),
        }
    }

    /// `⌊log2(n) · 2^acc⌋` for positive n; 0 for n <= 1.
    ///
    /// The mantissa `x` is kept scaled by `2^shift` with
    /// `shift = acc + bitlen(n) - 1`, so `x / 2^shift` starts in [1, 2).
    /// Each squaring advances one fractional bit position: crossing 2 emits a
    /// 1-bit and halves, staying below emits a 0-bit.
    pub fn log2(&self, src: &Integer, acc: u32) -> Integer {
        if *src <= 1 {
            return Integer::new();
        }

        let int_part = src.significant_bits() - 1;
        let shift = acc + int_part;

        let mut log = Integer::from(int_part) << acc;
        let mut x = Integer::from(src << acc);

        let mut bits = 0u32;
        loop {
            // square until the mantissa crosses 2 or the fraction is full
            while bits <= acc && x.significant_bits() <= shift + 1 {
                x.square_mut();
                x >>= shift;
                bits += 1;
            }
            if bits > acc {
                break;
            }
            log += Integer::from(1) << (acc - bits);
            x >>= 1;
        }
        log
    }

    /// Merit of the gap [start, end): `(end − start) / ln(start)` as a
    /// fixed-point u64. Returns 0 when the value overflows 64 bits; callers
    /// treat 0 as "no merit".
    pub fn merit(&self, start: &Integer, end: &Integer) -> u64 {
        if *start < 2 || end <= start {
            return 0;
        }
        let gap = Integer::from(end - start);
        let m = gap * &self.log2_e_112 / self.log2(start, 64);
        m.to_u64().unwrap_or(0)
    }

    /// Deterministic per-gap pseudo-random: double SHA-256 over the
    /// concatenated little-endian encodings of start and end, folded into a
    /// u64 by XOR of the four little-endian words of the second digest.
    pub fn rand(&self, start: &Integer, end: &Integer) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(start.to_digits::<u8>(Order::Lsf));
        hasher.update(end.to_digits::<u8>(Order::Lsf));
        let first = hasher.finalize();
        let second = Sha256::digest(first);

        let mut folded = 0u64;
        for word in second.chunks_exact(8) {
            folded ^= u64::from_le_bytes(word.try_into().unwrap());
        }
        folded
    }

    /// Difficulty of the gap [start, end): merit plus a sub-step tie-break.
    ///
    /// The tie-break is `rand(start, end)` reduced modulo the merit
    /// equivalent of a +2 gap-length step, so gaps of equal length order
    /// totally without ever outranking the next discrete merit.
    pub fn difficulty(&self, start: &Integer, end: &Integer) -> u64 {
        if *start < 2 || end <= start {
            return 0;
        }
        let step = Integer::from(&self.log2_e_112 * 2u32) / self.log2(start, 64);
        let step = step.to_u64().unwrap_or(0).max(1);
        self.merit(start, end)
            .saturating_add(self.rand(start, end) % step)
    }

    /// Minimum gap length whose merit meets `difficulty` at this start:
    /// `⌊difficulty · log2(start) / log2(e)⌋ = ⌊(difficulty/2^48) · ln(start)⌋`.
    pub fn target_size(&self, start: &Integer, difficulty: u64) -> u64 {
        let size = Integer::from(difficulty) * self.log2(start, 64) / &self.log2_e_112;
        size.to_u64().unwrap_or(u64::MAX)
    }

    /// Expected number of candidate primes to test for one gap of the given
    /// difficulty: `⌊e^(difficulty / 2^48)⌋`, little-endian bytes.
    ///
    /// This is the only place arbitrary-precision floats appear; the result
    /// is floor-cast so it is still reproducible across nodes.
    pub fn target_work(&self, difficulty: u64) -> Vec<u8> {
        let human = difficulty as f64 / TWO_POW48 as f64;
        let prec = (human * std::f64::consts::LOG2_E).ceil() as u32 + 64;

        let exponent = Float::with_val(prec, difficulty) >> 48u32;
        let work = exponent.exp().floor();
        work.to_integer()
            .unwrap_or_default()
            .to_digits::<u8>(Order::Lsf)
    }

    /// Next block difficulty from the previous difficulty and the observed
    /// block time, with asymmetric damping.
    ///
    /// Slow blocks (actual > 150 s) decay with damping shift 6, fast blocks
    /// tighten with shift 8; the asymmetry pulls a stalled chain back to the
    /// reachable range four times faster than it climbs. The per-block delta
    /// is clamped to ±1.0 (±2^48) and the result never drops below the
    /// network floor.
    pub fn next_difficulty(&self, difficulty: u64, actual_timespan: u64, testnet: bool) -> u64 {
        let floor = if testnet {
            MIN_TEST_DIFFICULTY
        } else {
            MIN_DIFFICULTY
        };

        // ln(actual) · 2^48 = log2(actual, 112) / (log2(e) · 2^64)
        let span = Integer::from(actual_timespan.max(1));
        let ln_actual = (self.log2(&span, 112) / &self.log2_e_64)
            .to_u64()
            .unwrap_or(u64::MAX);

        let shift = if ln_actual > LOG_150_48 { 6 } else { 8 };
        let gain = LOG_150_48 >> shift;
        let loss = ln_actual >> shift;

        let mut next = if loss > gain {
            // slow blocks: difficulty falls, clamped at the floor
            let dec = loss - gain;
            if difficulty < dec {
                floor
            } else {
                difficulty - dec
            }
        } else {
            difficulty.saturating_add(gain - loss)
        };

        if next > difficulty {
            next = next.min(difficulty.saturating_add(TWO_POW48));
        } else {
            next = next.max(difficulty.saturating_sub(TWO_POW48));
        }
        next.max(floor)
    }

    /// Largest difficulty still reachable after `time` seconds without a
    /// block: one unit (2^48) is forgiven per elapsed 174 · 150 seconds.
    /// On testnet a stall beyond 15000 seconds resets to the testnet floor.
    pub fn max_difficulty_decrease(&self, difficulty: u64, time: i64, testnet: bool) -> u64 {
        let floor = if testnet {
            MIN_TEST_DIFFICULTY
        } else {
            MIN_DIFFICULTY
        };
        if testnet && time > (TARGET_SPACING as i64) * 100 {
            return MIN_TEST_DIFFICULTY;
        }

        let mut difficulty = difficulty;
        let mut remaining = time;
        while remaining > 0 && difficulty > floor {
            difficulty = difficulty.saturating_sub(TWO_POW48);
            remaining -= DECREASE_INTERVAL;
        }
        difficulty.max(floor)
    }

    /// Wall-clock microseconds since the epoch; `u64::MAX` on clock failure.
    /// Telemetry only — never part of consensus.
    pub fn gettime_usec() -> u64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_micros() as u64,
            Err(_) => u64::MAX,
        }
    }

    /// Fixed-point difficulty as a display float.
    pub fn readable_difficulty(difficulty: u64) -> f64 {
        difficulty as f64 / TWO_POW48 as f64
    }

    /// Expected gaps per day at `pps` primes per second and the given
    /// difficulty: `86400 · pps / e^(difficulty / 2^48)`.
    pub fn gaps_per_day(pps: f64, difficulty: u64) -> f64 {
        86400.0 * pps / Self::readable_difficulty(difficulty).exp()
    }
}
