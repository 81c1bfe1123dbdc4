//! # Config — Engine Tunables
//!
//! Serde-backed knobs for the sieve engine and the network difficulty floor.
//! Embedders deserialize a `SieveConfig` from their own settings layer (JSON
//! shown in the tests), validate once, and hand it to
//! [`GapSieve::from_config`](crate::sieve::GapSieve::from_config).

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use crate::arith::{MIN_DIFFICULTY, MIN_TEST_DIFFICULTY};
use crate::pow::MIN_SHIFT;

/// Largest accepted filter-prime count. Beyond this the prime table no
/// longer fits any sensible cache, and the sieve spends longer marking
/// than testing.
pub const MAX_N_PRIMES: u64 = 1 << 26;

/// Tunables for one sieve engine instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SieveConfig {
    /// Number of small filter primes, `primes[0] = 2` included.
    pub n_primes: u64,
    /// Segment size in bits; rounded up to a 64-bit word multiple on use.
    pub sievesize: u64,
    /// Optional cap on the proof shift, a guard against oversized adder
    /// search spaces. `None` means uncapped.
    #[serde(default)]
    pub max_shift: Option<u16>,
    /// Test network: lowers the difficulty floor from 16.0 to 1.0.
    #[serde(default)]
    pub testnet: bool,
}

impl Default for SieveConfig {
    fn default() -> Self {
        SieveConfig {
            n_primes: 256_000,
            sievesize: 1 << 22,
            max_shift: None,
            testnet: false,
        }
    }
}

impl SieveConfig {
    /// Difficulty floor for the configured network.
    pub fn min_difficulty(&self) -> u64 {
        if self.testnet {
            MIN_TEST_DIFFICULTY
        } else {
            MIN_DIFFICULTY
        }
    }

    /// Reject configurations the engine cannot run sensibly.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.n_primes >= 2,
            "n_primes must be at least 2, got {}",
            self.n_primes
        );
        ensure!(
            self.n_primes <= MAX_N_PRIMES,
            "n_primes must be at most {}, got {}",
            MAX_N_PRIMES,
            self.n_primes
        );
        ensure!(self.sievesize > 0, "sievesize must be positive");
        if let Some(cap) = self.max_shift {
            ensure!(
                cap >= MIN_SHIFT,
                "max_shift {} is below the minimum shift {}",
                cap,
                MIN_SHIFT
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SieveConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.testnet);
        assert_eq!(config.min_difficulty(), MIN_DIFFICULTY);
    }

    #[test]
    fn testnet_lowers_the_floor() {
        let config = SieveConfig {
            testnet: true,
            ..SieveConfig::default()
        };
        assert_eq!(config.min_difficulty(), MIN_TEST_DIFFICULTY);
    }

    #[test]
    fn rejects_degenerate_values() {
        let mut config = SieveConfig {
            n_primes: 1,
            ..SieveConfig::default()
        };
        assert!(config.validate().is_err());

        config.n_primes = MAX_N_PRIMES + 1;
        assert!(config.validate().is_err());

        config = SieveConfig {
            sievesize: 0,
            ..SieveConfig::default()
        };
        assert!(config.validate().is_err());

        config = SieveConfig {
            max_shift: Some(13),
            ..SieveConfig::default()
        };
        assert!(config.validate().is_err());
        config.max_shift = Some(14);
        assert!(config.validate().is_ok());
    }

    /// JSON round-trip, with the optional fields defaulting when absent.
    #[test]
    fn serde_round_trip_and_defaults() {
        let config = SieveConfig {
            n_primes: 50_000,
            sievesize: 1 << 20,
            max_shift: Some(64),
            testnet: true,
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: SieveConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);

        let sparse: SieveConfig =
            serde_json::from_str(r#"{"n_primes": 1000, "sievesize": 4096}"#).unwrap();
        assert_eq!(sparse.max_shift, None);
        assert!(!sparse.testnet);
        assert!(sparse.validate().is_ok());
    }
}
