// KawPow Runner - Free and Open Source Software Statement
//
// File: src/miner/gpu/kernels.rs
// Version: 1.0.0
//
// Kernel source boundary. Generating the per-period search program is the
// job of an external compilation service; the runner only asks for source
// text by period and compiles what it is given.

use crate::Result;
use crate::core::error::RunnerError;
use log::debug;
use std::path::{Path, PathBuf};

const LOG_TARGET: &str = "kawpow::runner::kernels";

/// Entry point of the dataset generation kernel
pub const DAG_KERNEL_NAME: &str = "ethash_calculate_dag_item";

/// Entry point of the nonce search kernel
pub const SEARCH_KERNEL_NAME: &str = "progpow_search";

pub const DAG_SOURCE_FILE: &str = "kawpow_dag.cl";
pub const SEARCH_SOURCE_FILE: &str = "kawpow_search.cl";

/// Supplies OpenCL C source for the two kernels
pub trait KernelSource: Send {
    fn dag_source(&self) -> Result<String>;

    fn search_source(&self, period: u64) -> Result<String>;
}

/// Reads kernel sources from a directory.
///
/// The search kernel is looked up as `kawpow_search_<period>.cl` first and
/// falls back to `kawpow_search.cl`.
#[derive(Debug, Clone)]
pub struct FileKernelSource {
    directory: PathBuf,
}

impl FileKernelSource {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn read(&self, path: &Path) -> Result<String> {
        std::fs::read_to_string(path)
            .map_err(|e| RunnerError::KernelSource(format!("{}: {}", path.display(), e)))
    }
}

impl KernelSource for FileKernelSource {
    fn dag_source(&self) -> Result<String> {
        self.read(&self.directory.join(DAG_SOURCE_FILE))
    }

    fn search_source(&self, period: u64) -> Result<String> {
        let per_period = self.directory.join(format!("kawpow_search_{}.cl", period));
        if per_period.is_file() {
            debug!(target: LOG_TARGET, "Using search source for period {}", period);
            return self.read(&per_period);
        }
        self.read(&self.directory.join(SEARCH_SOURCE_FILE))
    }
}
