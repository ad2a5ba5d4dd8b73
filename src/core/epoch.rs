// KawPow Runner - Free and Open Source Software Statement
//
// This project, kawpow-runner, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/core/epoch.rs
// Version: 1.0.0
//
// Epoch geometry for KawPow: which light cache and dataset are valid for a
// block height, how large they are, and how the light cache is derived from
// the epoch seed. The dataset itself is only ever expanded on the device.
//
// Tree Location:
// - src/core/epoch.rs (epoch parameters and host light cache)
// - Depends on: sha3

use crate::Result;
use crate::core::error::RunnerError;
use log::debug;
use sha3::{Digest, Keccak256, Keccak512};

const LOG_TARGET: &str = "kawpow::runner::epoch";

/// Blocks per epoch (one light cache / dataset generation)
pub const EPOCH_LENGTH: u64 = 7500;

/// Blocks per search program period
pub const PERIOD_LENGTH: u64 = 3;

/// Bytes in one light cache or dataset node
pub const HASH_BYTES: usize = 64;

/// Bytes fetched from the dataset per mix round
pub const MIX_BYTES: usize = 128;

const CACHE_BYTES_INIT: u64 = 1 << 24;
const CACHE_BYTES_GROWTH: u64 = 1 << 17;
const DATASET_BYTES_INIT: u64 = 1 << 30;
const DATASET_BYTES_GROWTH: u64 = 1 << 23;
const CACHE_ROUNDS: usize = 3;

/// Epoch index for a block height
pub fn epoch_of(height: u64) -> u32 {
    (height / EPOCH_LENGTH) as u32
}

/// Search program period for a block height
pub fn period_of(height: u64) -> u64 {
    height / PERIOD_LENGTH
}

fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut d = 3u64;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

/// Light cache size in bytes for an epoch
pub fn cache_size(epoch: u32) -> u64 {
    let step = HASH_BYTES as u64;
    let mut size = CACHE_BYTES_INIT + CACHE_BYTES_GROWTH * epoch as u64 - step;
    while !is_prime(size / step) {
        size -= 2 * step;
    }
    size
}

/// Full dataset size in bytes for an epoch
pub fn dataset_size(epoch: u32) -> u64 {
    let step = MIX_BYTES as u64;
    let mut size = DATASET_BYTES_INIT + DATASET_BYTES_GROWTH * epoch as u64 - step;
    while !is_prime(size / step) {
        size -= 2 * step;
    }
    size
}

/// Seed for an epoch: Keccak-256 applied `epoch` times to 32 zero bytes
pub fn seed_hash(epoch: u32) -> [u8; 32] {
    let mut seed = [0u8; 32];
    for _ in 0..epoch {
        let next = Keccak256::digest(seed);
        seed.copy_from_slice(&next);
    }
    seed
}

/// Build the light cache for `epoch` into `out`.
///
/// `out` is cleared and refilled; its allocation is kept when it is already
/// large enough, so repeated epochs reuse the same backing storage.
pub fn build_light_cache(epoch: u32, out: &mut Vec<u8>) -> Result<()> {
    let size = cache_size(epoch) as usize;
    let nodes = size / HASH_BYTES;

    out.clear();
    out.try_reserve_exact(size)
        .map_err(|e| RunnerError::CacheBuild {
            epoch,
            reason: e.to_string(),
        })?;

    let seed = seed_hash(epoch);
    let mut node = [0u8; HASH_BYTES];
    node.copy_from_slice(&Keccak512::digest(seed));
    out.extend_from_slice(&node);
    for _ in 1..nodes {
        let next = Keccak512::digest(node);
        node.copy_from_slice(&next);
        out.extend_from_slice(&node);
    }

    // RandMemoHash
    let mut mixed = [0u8; HASH_BYTES];
    for _ in 0..CACHE_ROUNDS {
        for i in 0..nodes {
            let prev = (i + nodes - 1) % nodes;
            let head = i * HASH_BYTES;
            let first_word = u32::from_le_bytes([out[head], out[head + 1], out[head + 2], out[head + 3]]);
            let other = first_word as usize % nodes;

            for (k, byte) in mixed.iter_mut().enumerate() {
                *byte = out[prev * HASH_BYTES + k] ^ out[other * HASH_BYTES + k];
            }
            let digest = Keccak512::digest(mixed);
            out[head..head + HASH_BYTES].copy_from_slice(&digest);
        }
    }

    debug!(target: LOG_TARGET,
        "Light cache for epoch {} built: {} nodes ({} bytes)",
        epoch, nodes, size
    );
    Ok(())
}

/// Source of epoch geometry and light cache contents.
///
/// The shared light cache owns one of these so every worker sizing its
/// dataset agrees with the cache it uploads.
pub trait EpochParams: Send + Sync {
    fn cache_size(&self, epoch: u32) -> u64;

    fn dataset_size(&self, epoch: u32) -> u64;

    /// Fill `out` with the light cache for `epoch`, reusing its allocation.
    fn build_cache(&self, epoch: u32, out: &mut Vec<u8>) -> Result<()>;
}

/// Production KawPow epoch parameters
#[derive(Debug, Clone, Copy, Default)]
pub struct KawPowEpochs;

impl EpochParams for KawPowEpochs {
    fn cache_size(&self, epoch: u32) -> u64 {
        cache_size(epoch)
    }

    fn dataset_size(&self, epoch: u32) -> u64 {
        dataset_size(epoch)
    }

    fn build_cache(&self, epoch: u32, out: &mut Vec<u8>) -> Result<()> {
        build_light_cache(epoch, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_and_period_of_height() {
        assert_eq!(epoch_of(0), 0);
        assert_eq!(epoch_of(7499), 0);
        assert_eq!(epoch_of(7500), 1);
        assert_eq!(epoch_of(1_500_000), 200);
        assert_eq!(period_of(8), 2);
        assert_eq!(period_of(9), 3);
    }

    #[test]
    fn test_primality() {
        assert!(!is_prime(0));
        assert!(!is_prime(1));
        assert!(is_prime(2));
        assert!(is_prime(262139));
        assert!(!is_prime(262143));
    }

    #[test]
    fn test_known_sizes() {
        assert_eq!(cache_size(0), 16_776_896);
        assert_eq!(cache_size(1), 16_907_456);
        assert_eq!(dataset_size(0), 1_073_739_904);
        assert_eq!(dataset_size(1), 1_082_130_304);
    }

    #[test]
    fn test_sizes_are_node_aligned_and_grow() {
        for epoch in [0u32, 1, 10, 100, 300] {
            assert_eq!(cache_size(epoch) % HASH_BYTES as u64, 0);
            assert_eq!(dataset_size(epoch) % MIX_BYTES as u64, 0);
            assert!(cache_size(epoch + 1) > cache_size(epoch));
            assert!(dataset_size(epoch + 1) > dataset_size(epoch));
        }
    }

    #[test]
    fn test_seed_hash() {
        assert_eq!(seed_hash(0), [0u8; 32]);
        assert_eq!(
            hex::encode(seed_hash(1)),
            "290decd9548b62a8d60345a988386fc84ba6bc95484008f6362f93160ef3e563"
        );
        assert_ne!(seed_hash(2), seed_hash(1));
    }
}
