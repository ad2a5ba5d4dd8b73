// KawPow Runner - Free and Open Source Software Statement
//
// This project, kawpow-runner, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/lib.rs
// Version: 1.0.0
//
// Library entry point for the KawPow GPU runner. Exports the epoch and target
// math, the shared light cache and the device pipeline.
//
// Tree Location:
// - src/lib.rs (root library file)
// - Exports modules: core, miner, utils

pub mod core;
pub mod miner;
pub mod utils;

// Re-export commonly used types at the crate root for convenience
pub use crate::core::error::RunnerError;
pub use crate::core::types::{Job, OverflowPolicy, RunnerSettings, SearchResults};
pub use crate::core::{difficulty, epoch};
pub use crate::miner::{KawPowRunner, LightCache, RunnerState, SharedLightCache};

pub type Result<T> = std::result::Result<T, RunnerError>;
