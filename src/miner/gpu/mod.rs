// KawPow Runner - Free and Open Source Software Statement
//
// This project, kawpow-runner, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/miner/gpu/mod.rs
// Version: 1.0.0
//
// This file is the module entry point for GPU execution in the KawPow runner.
//
// Features:
// - Backend-neutral runner, buffer set, DAG generator and search dispatcher
// - OpenCL backend for NVIDIA, AMD and Intel GPUs
// - Optional compilation of the OpenCL backend via the "gpu" feature flag

pub mod buffers;
pub mod compute;
pub mod dag;
pub mod kernels;
pub mod runner;
pub mod search;

// The OpenCL backend is only available when the "gpu" feature is enabled
#[cfg(feature = "gpu")]
pub mod opencl;

pub use buffers::{DeviceBufferSet, GrowableBuffer};
pub use compute::{BufferRegion, ComputeDevice, ProgramId, Transfer};
pub use dag::{DagGenerator, DagReport};
pub use kernels::{FileKernelSource, KernelSource};
pub use runner::{KawPowRunner, RunnerState};
pub use search::SearchDispatcher;

#[cfg(feature = "gpu")]
pub use opencl::{OpenClBackend, OpenClDevice};
