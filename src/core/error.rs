// KawPow Runner - Free and Open Source Software Statement
//
// This project, kawpow-runner, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/core/error.rs
// Version: 1.0.0
//
// Error taxonomy shared by the light cache, the device seam and the runner.
// Device failures are never retried internally; they surface to the caller
// that owns the worker, which decides whether to tear it down and rebuild.

use std::fmt::Display;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    /// A buffer operation or kernel enqueue returned a non-success status.
    #[error("device error {message} when calling {op}")]
    Device { op: &'static str, message: String },

    #[error("failed to build kernel {kernel}: {message}")]
    KernelBuild { kernel: String, message: String },

    #[error("light cache for epoch {epoch} could not be built: {reason}")]
    CacheBuild { epoch: u32, reason: String },

    #[error("runner is {state}, {op} requires {expected}")]
    InvalidState {
        op: &'static str,
        state: &'static str,
        expected: &'static str,
    },

    #[error("header blob must be {expected} bytes, got {actual}")]
    InvalidBlob { expected: usize, actual: usize },

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("dataset of {bytes} bytes for epoch {epoch} exceeds the addressable node range")]
    DatasetTooLarge { epoch: u32, bytes: u64 },

    #[error("kernel source unavailable: {0}")]
    KernelSource(String),
}

impl RunnerError {
    /// Tag a device-reported error with the operation that produced it.
    pub fn device(op: &'static str, err: impl Display) -> Self {
        RunnerError::Device {
            op,
            message: err.to_string(),
        }
    }

    /// True for errors raised by the compute device rather than by host logic.
    pub fn is_device_failure(&self) -> bool {
        matches!(
            self,
            RunnerError::Device { .. } | RunnerError::KernelBuild { .. }
        )
    }
}
