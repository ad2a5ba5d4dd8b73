// KawPow Runner - Free and Open Source Software Statement
//
// File: src/miner/gpu/compute.rs
// Version: 1.0.0
//
// The seam between the runner and a compute device. The runner only ever
// talks to a device through this trait: buffer primitives, one in-order
// command queue, and the two kernels (dataset generation and nonce search).

use crate::Result;
use crate::core::types::GpuVendor;

/// The four device memory regions used by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferRegion {
    LightCache,
    Dataset,
    Input,
    Output,
}

impl BufferRegion {
    pub fn as_str(&self) -> &'static str {
        match self {
            BufferRegion::LightCache => "light cache",
            BufferRegion::Dataset => "dataset",
            BufferRegion::Input => "input",
            BufferRegion::Output => "output",
        }
    }

    /// Whether kernels only read this region
    pub fn is_read_only(&self) -> bool {
        matches!(self, BufferRegion::LightCache | BufferRegion::Input)
    }
}

/// Host to device transfer mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// Returns once the data has landed on the device
    Blocking,
    /// Returns immediately; queue order guarantees later commands see the data
    NonBlocking,
}

/// Identity of a compiled search program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u64);

/// Arguments of the dataset generation kernel (the start offset is set per chunk)
pub struct DagBindings<'a, B> {
    pub light_cache: &'a B,
    pub dataset: &'a B,
    pub dataset_nodes: u32,
    pub light_cache_nodes: u32,
}

/// Arguments of the search kernel; they persist across dispatches
pub struct SearchBindings<'a, B> {
    pub dataset: &'a B,
    pub input: &'a B,
    pub boundary: u64,
    pub output: &'a B,
}

/// A compute device with a single in-order command queue.
///
/// Buffers are released when their handle is dropped. Implementations must
/// keep the source of a non-blocking write valid until the queue reaches the
/// next blocking point (`read` or `finish`); callers may reuse their slice
/// as soon as `write` returns.
pub trait ComputeDevice {
    type Buffer;

    fn name(&self) -> &str;

    fn vendor(&self) -> GpuVendor;

    fn allocate(&mut self, region: BufferRegion, bytes: usize) -> Result<Self::Buffer>;

    fn write(
        &mut self,
        buffer: &mut Self::Buffer,
        offset: usize,
        data: &[u8],
        transfer: Transfer,
    ) -> Result<()>;

    /// Blocking read; every command queued before it has completed on return
    fn read(&mut self, buffer: &Self::Buffer, offset: usize, out: &mut [u8]) -> Result<()>;

    /// Block until every queued command has completed
    fn finish(&mut self) -> Result<()>;

    fn build_dag_kernel(&mut self) -> Result<()>;

    fn bind_dag_kernel(&mut self, bindings: DagBindings<'_, Self::Buffer>) -> Result<()>;

    fn set_dag_start(&mut self, start: u32) -> Result<()>;

    fn enqueue_dag_kernel(&mut self, global_work_size: usize, local_work_size: usize) -> Result<()>;

    /// Acquire the search kernel for a program period. Returns the same id
    /// while the program is unchanged; a new id means arguments must be rebound.
    fn load_search_kernel(&mut self, period: u64) -> Result<ProgramId>;

    fn bind_search_kernel(&mut self, bindings: SearchBindings<'_, Self::Buffer>) -> Result<()>;

    fn enqueue_search_kernel(
        &mut self,
        global_work_offset: u64,
        global_work_size: usize,
        local_work_size: usize,
    ) -> Result<()>;

    /// Drop every kernel and program handle. Safe to call repeatedly.
    fn release_kernels(&mut self);
}
