// KawPow Runner - Free and Open Source Software Statement
//
// This project, kawpow-runner, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/core/difficulty.rs
// Version: 1.0.0
//
// This file contains the 256-bit target type and conversions between pool
// targets, difficulties and the 64-bit boundary the search kernel compares
// against.

use crate::core::error::RunnerError;
use log::{debug, warn};
use uint::construct_uint;

const LOG_TARGET: &str = "kawpow::runner::difficulty";

// The crate `Result` alias must stay out of scope for `construct_uint!`
construct_uint! {
    pub struct U256(4);
}

/// Parse a big-endian hex target of at most 32 bytes.
pub fn target_from_hex(target_hex: &str) -> crate::Result<U256> {
    let trimmed = target_hex.trim_start_matches("0x");
    let bytes = hex::decode(trimmed)
        .map_err(|e| RunnerError::InvalidTarget(format!("{}: {}", target_hex, e)))?;
    if bytes.len() > 32 {
        return Err(RunnerError::InvalidTarget(format!(
            "{} bytes is wider than 256 bits",
            bytes.len()
        )));
    }
    let target = U256::from_big_endian(&bytes);
    debug!(target: LOG_TARGET, "Parsed target: {:064x}", target);
    Ok(target)
}

/// Target for a difficulty: `MAX / difficulty`. Zero difficulty yields the
/// maximum target.
pub fn target_from_difficulty(difficulty: u64) -> U256 {
    if difficulty == 0 {
        warn!(target: LOG_TARGET, "Zero difficulty, using maximum target");
        return U256::MAX;
    }
    U256::MAX / U256::from(difficulty)
}

/// The kernel compares the most significant 64 bits of the hash against
/// the most significant 64 bits of the target.
pub fn kernel_boundary(target: &U256) -> u64 {
    target.0[3]
}

/// Approximate difficulty represented by a 64-bit boundary
pub fn boundary_difficulty(boundary: u64) -> u64 {
    if boundary == 0 {
        u64::MAX
    } else {
        u64::MAX / boundary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_extremes() {
        assert_eq!(kernel_boundary(&U256::MAX), u64::MAX);
        assert_eq!(kernel_boundary(&U256::zero()), 0);
    }

    #[test]
    fn test_target_from_hex() {
        let target =
            target_from_hex("00000000ffff0000000000000000000000000000000000000000000000000000")
                .unwrap();
        assert_eq!(kernel_boundary(&target), 0x0000_0000_ffff_0000);

        let short = target_from_hex("ff").unwrap();
        assert_eq!(short, U256::from(0xffu64));

        assert!(target_from_hex("zz").is_err());
        assert!(target_from_hex(&"00".repeat(33)).is_err());
    }

    #[test]
    fn test_generated_u256_parsing() {
        let parsed = U256::from_dec_str("1000").unwrap();
        assert_eq!(parsed, U256::from(1000u64));
        assert!(U256::from_dec_str("12a").is_err());
        assert_eq!(U256::from_str_radix("ff", 16).unwrap(), target_from_hex("ff").unwrap());
    }

    #[test]
    fn test_target_from_difficulty() {
        assert_eq!(target_from_difficulty(0), U256::MAX);
        assert_eq!(target_from_difficulty(1), U256::MAX);
        assert_eq!(kernel_boundary(&target_from_difficulty(2)), u64::MAX / 2);
        assert_eq!(boundary_difficulty(u64::MAX / 1000), 1000);
        assert_eq!(boundary_difficulty(0), u64::MAX);
    }
}
