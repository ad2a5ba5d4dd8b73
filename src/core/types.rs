// KawPow Runner - Free and Open Source Software Statement
//
// This project, kawpow-runner, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/core/types.rs
// Version: 1.0.0
//
// This file defines core data structures for the KawPow runner: the job
// descriptor, the bounded search result set, runner settings and the GPU
// vendor classification used to pick work-group sizes.
//
// Tree Location:
// - src/core/types.rs (core data structures)
// - Depends on: serde, serde_json, uint

use crate::Result;
use crate::core::difficulty::{U256, kernel_boundary};
use crate::core::epoch::{epoch_of, period_of};
use crate::core::error::RunnerError;
use crate::miner::gpu::dag::DAG_CHUNK_NODES;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Header blob length consumed by the search kernel
pub const BLOB_SIZE: usize = 40;

/// Most candidates a single dispatch can report
pub const MAX_RESULTS: usize = 15;

/// Output block layout: one count word followed by the candidate words
pub const RESULT_BLOCK_WORDS: usize = MAX_RESULTS + 1;
pub const RESULT_BLOCK_BYTES: usize = RESULT_BLOCK_WORDS * std::mem::size_of::<u32>();

/// Width of the historical fixed output array
pub const LEGACY_OUTPUT_WORDS: usize = 0x100;

/// Immutable per-work-unit descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Job identifier from the work source
    pub job_id: String,

    /// Block height, selects the epoch and the search program period
    pub height: u64,

    /// Header blob uploaded to the input buffer
    pub blob: [u8; BLOB_SIZE],

    /// A hash passes when it is at or below this value
    pub target: U256,
}

impl Job {
    pub fn new(job_id: impl Into<String>, height: u64, blob: &[u8], target: U256) -> Result<Self> {
        let blob: [u8; BLOB_SIZE] = blob.try_into().map_err(|_| RunnerError::InvalidBlob {
            expected: BLOB_SIZE,
            actual: blob.len(),
        })?;
        Ok(Self {
            job_id: job_id.into(),
            height,
            blob,
            target,
        })
    }

    pub fn epoch(&self) -> u32 {
        epoch_of(self.height)
    }

    pub fn period(&self) -> u64 {
        period_of(self.height)
    }

    /// 64-bit boundary bound into the search kernel
    pub fn boundary(&self) -> u64 {
        kernel_boundary(&self.target)
    }
}

/// Candidates reported by one search dispatch.
///
/// Holds at most `MAX_RESULTS` words in device order. `device_count` keeps
/// the raw counter the kernel produced, which may be larger when more lanes
/// passed than the block can hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResults {
    words: Vec<u32>,
    device_count: u32,
}

impl SearchResults {
    /// Decode an output block; the count is clamped before any copy.
    pub fn from_output_block(block: &[u32; RESULT_BLOCK_WORDS]) -> Self {
        let device_count = block[0];
        let count = (device_count as usize).min(MAX_RESULTS);
        Self {
            words: block[1..=count].to_vec(),
            device_count,
        }
    }

    pub fn count(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn device_count(&self) -> u32 {
        self.device_count
    }

    /// More lanes passed than the result block can carry
    pub fn saturated(&self) -> bool {
        self.device_count as usize > MAX_RESULTS
    }

    pub fn dropped(&self) -> u32 {
        self.device_count.saturating_sub(MAX_RESULTS as u32)
    }

    /// Render the historical 256-slot array whose last slot carries the count
    pub fn legacy_output(&self) -> [u32; LEGACY_OUTPUT_WORDS] {
        let mut output = [0u32; LEGACY_OUTPUT_WORDS];
        output[..self.words.len()].copy_from_slice(&self.words);
        output[LEGACY_OUTPUT_WORDS - 1] = self.words.len() as u32;
        output
    }
}

/// What to do when a dispatch finds more candidates than it can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Drop the excess silently
    Drop,
    /// Drop the excess and log a possible missed share
    #[default]
    Warn,
}

/// Tunables for one runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Parallel search lanes requested per dispatch
    pub intensity: u32,

    /// Search kernel work-group size
    pub local_work_size: usize,

    /// DAG kernel work-group size; `None` picks the vendor default
    pub dag_work_group_size: Option<usize>,

    /// Dataset nodes generated per DAG dispatch
    pub dag_chunk_nodes: u32,

    /// Dataset buffer capacity granularity in bytes
    pub dataset_alignment: usize,

    /// Light cache buffer capacity granularity in bytes
    pub light_cache_alignment: usize,

    pub overflow_policy: OverflowPolicy,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            intensity: 1 << 18,
            local_work_size: 128,
            dag_work_group_size: None,
            dag_chunk_nodes: DAG_CHUNK_NODES,
            dataset_alignment: 16 * 1024 * 1024,
            light_cache_alignment: 2 * 1024 * 1024,
            overflow_policy: OverflowPolicy::Warn,
        }
    }
}

impl RunnerSettings {
    /// Validate settings and return helpful errors
    pub fn validate(&self) -> Result<()> {
        if self.local_work_size == 0 {
            return Err(RunnerError::InvalidSettings(
                "local_work_size must be greater than 0".to_string(),
            ));
        }
        if (self.intensity as usize) < self.local_work_size {
            return Err(RunnerError::InvalidSettings(format!(
                "intensity {} is smaller than one work group ({})",
                self.intensity, self.local_work_size
            )));
        }
        if self.dag_chunk_nodes == 0 {
            return Err(RunnerError::InvalidSettings(
                "dag_chunk_nodes must be greater than 0".to_string(),
            ));
        }
        if self.dag_work_group_size == Some(0) {
            return Err(RunnerError::InvalidSettings(
                "dag_work_group_size must be greater than 0".to_string(),
            ));
        }
        for (name, alignment) in [
            ("dataset_alignment", self.dataset_alignment),
            ("light_cache_alignment", self.light_cache_alignment),
        ] {
            if !alignment.is_power_of_two() {
                return Err(RunnerError::InvalidSettings(format!(
                    "{} must be a power of two, got {}",
                    name, alignment
                )));
            }
        }
        Ok(())
    }

    /// DAG work-group size for a vendor unless overridden
    pub fn dag_work_group_size_for(&self, vendor: &GpuVendor) -> usize {
        self.dag_work_group_size.unwrap_or(match vendor {
            GpuVendor::NVIDIA => 32,
            _ => 64,
        })
    }

    /// Load settings from a JSON file; missing fields keep their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RunnerError::InvalidSettings(format!("cannot read {}: {}", path.display(), e))
        })?;
        let settings: RunnerSettings = serde_json::from_str(&content).map_err(|e| {
            RunnerError::InvalidSettings(format!("cannot parse {}: {}", path.display(), e))
        })?;
        settings.validate()?;
        Ok(settings)
    }
}

/// GPU vendor enumeration
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum GpuVendor {
    NVIDIA,
    AMD,
    Intel,
    Unknown,
}

impl GpuVendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            GpuVendor::NVIDIA => "NVIDIA",
            GpuVendor::AMD => "AMD",
            GpuVendor::Intel => "Intel",
            GpuVendor::Unknown => "Unknown",
        }
    }

    /// Classify a vendor string as reported by the driver
    pub fn from_vendor_name(vendor: &str) -> Self {
        let name = vendor.trim().to_lowercase();
        if name.contains("nvidia") {
            GpuVendor::NVIDIA
        } else if name.contains("advanced micro devices") || name.contains("amd") {
            GpuVendor::AMD
        } else if name.contains("intel") {
            GpuVendor::Intel
        } else {
            GpuVendor::Unknown
        }
    }

    /// Classify a PCI vendor id
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => GpuVendor::NVIDIA,
            0x1002 | 0x1022 => GpuVendor::AMD,
            0x8086 => GpuVendor::Intel,
            _ => GpuVendor::Unknown,
        }
    }
}
