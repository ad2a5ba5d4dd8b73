// KawPow Runner - Free and Open Source Software Statement
//
// This project, kawpow-runner, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/miner/mod.rs
// Version: 1.0.0
//
// Module declaration for the execution side of the runner: the shared epoch
// light cache and the per-device GPU pipeline.
//
// Tree Location:
// - src/miner/mod.rs (miner module entry point)
// - Submodules: gpu, light_cache

pub mod gpu;
pub mod light_cache;

// Re-export key types for convenience
pub use gpu::{ComputeDevice, DeviceBufferSet, KawPowRunner, RunnerState};
pub use light_cache::{LightCache, LightCacheView, SharedLightCache};
