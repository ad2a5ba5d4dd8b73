// KawPow Runner - Free and Open Source Software Statement
//
// File: src/miner/gpu/opencl/mod.rs
// Version: 1.0.0
//
// OpenCL backend for the KawPow runner

pub mod backend;
pub mod device;

pub use backend::{ClBuffer, OpenClBackend};
pub use device::OpenClDevice;
