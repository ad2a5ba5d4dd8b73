// KawPow Runner - Free and Open Source Software Statement
//
// This project, kawpow-runner, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/core/mod.rs
// Version: 1.0.0
//
// This file is the module declaration for the core functionality of the
// KawPow runner. It declares submodules and re-exports key types for use
// throughout the project.

pub mod difficulty;
pub mod epoch;
pub mod error;
pub mod types;

// Re-export the most commonly used items
pub use difficulty::{U256, kernel_boundary, target_from_difficulty, target_from_hex};
pub use epoch::{EPOCH_LENGTH, EpochParams, HASH_BYTES, KawPowEpochs, PERIOD_LENGTH};
pub use error::RunnerError;
pub use types::{
    BLOB_SIZE, GpuVendor, Job, MAX_RESULTS, OverflowPolicy, RunnerSettings, SearchResults,
};
