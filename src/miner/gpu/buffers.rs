// KawPow Runner - Free and Open Source Software Statement
//
// File: src/miner/gpu/buffers.rs
// Version: 1.0.0
//
// Device buffer set: the light cache, dataset, input and output regions owned
// by one runner. Capacities only grow, in aligned steps, and contents are not
// preserved across growth.

use super::compute::{BufferRegion, ComputeDevice};
use crate::Result;
use crate::core::error::RunnerError;
use crate::core::types::{BLOB_SIZE, RESULT_BLOCK_BYTES, RunnerSettings};
use crate::utils::format::FormatUtils;
use log::debug;

const LOG_TARGET: &str = "kawpow::runner::buffers";

/// Round `value` up to a multiple of the power-of-two `alignment`
pub fn align_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// One device region whose capacity only grows
pub struct GrowableBuffer<B> {
    region: BufferRegion,
    alignment: usize,
    handle: Option<B>,
    capacity: usize,
    generation: u64,
}

impl<B> GrowableBuffer<B> {
    pub fn new(region: BufferRegion, alignment: usize) -> Self {
        Self {
            region,
            alignment,
            handle: None,
            capacity: 0,
            generation: 0,
        }
    }

    /// Make sure the buffer holds at least `required` bytes.
    ///
    /// Returns `true` when a new allocation was made, in which case the
    /// previous contents are gone and the caller must rewrite them.
    pub fn ensure_capacity<D>(&mut self, device: &mut D, required: usize) -> Result<bool>
    where
        D: ComputeDevice<Buffer = B>,
    {
        if self.handle.is_some() && required <= self.capacity {
            return Ok(false);
        }

        let capacity = align_up(required.max(1), self.alignment).max(self.capacity);
        let previous = self.capacity;

        // Release before allocating so both never coexist in device memory
        self.handle = None;
        self.handle = Some(device.allocate(self.region, capacity)?);
        self.capacity = capacity;
        self.generation += 1;

        debug!(target: LOG_TARGET,
            "{} buffer on {}: {} -> {}",
            self.region.as_str(),
            device.name(),
            FormatUtils::format_bytes(previous as u64),
            FormatUtils::format_bytes(capacity as u64)
        );
        Ok(true)
    }

    pub fn region(&self) -> BufferRegion {
        self.region
    }

    pub fn handle(&self) -> Result<&B> {
        self.handle.as_ref().ok_or(RunnerError::InvalidState {
            op: "buffer access",
            state: "unallocated",
            expected: self.region.as_str(),
        })
    }

    pub fn handle_mut(&mut self) -> Result<&mut B> {
        let region = self.region;
        self.handle.as_mut().ok_or(RunnerError::InvalidState {
            op: "buffer access",
            state: "unallocated",
            expected: region.as_str(),
        })
    }

    pub fn is_allocated(&self) -> bool {
        self.handle.is_some()
    }

    /// Allocated bytes; never decreases while the buffer is alive
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bumped on every allocation; kernels bound to an older generation are stale
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn release(&mut self) {
        self.handle = None;
    }
}

/// All device memory owned by one runner
pub struct DeviceBufferSet<B> {
    pub light_cache: GrowableBuffer<B>,
    pub dataset: GrowableBuffer<B>,
    pub input: GrowableBuffer<B>,
    pub output: GrowableBuffer<B>,
}

impl<B> DeviceBufferSet<B> {
    pub fn new(settings: &RunnerSettings) -> Self {
        Self {
            light_cache: GrowableBuffer::new(BufferRegion::LightCache, settings.light_cache_alignment),
            dataset: GrowableBuffer::new(BufferRegion::Dataset, settings.dataset_alignment),
            input: GrowableBuffer::new(BufferRegion::Input, 1),
            output: GrowableBuffer::new(BufferRegion::Output, 1),
        }
    }

    /// Allocate the fixed-size blob and result buffers
    pub fn ensure_io<D>(&mut self, device: &mut D) -> Result<()>
    where
        D: ComputeDevice<Buffer = B>,
    {
        self.input.ensure_capacity(device, BLOB_SIZE)?;
        self.output.ensure_capacity(device, RESULT_BLOCK_BYTES)?;
        Ok(())
    }

    /// Release every region; regions never allocated are skipped
    pub fn release_all(&mut self) {
        self.output.release();
        self.input.release();
        self.dataset.release();
        self.light_cache.release();
    }
}

#[cfg(test)]
mod tests {
    use super::align_up;

    #[test]
    fn test_align_up() {
        const MIB16: usize = 16 * 1024 * 1024;
        assert_eq!(align_up(1, MIB16), MIB16);
        assert_eq!(align_up(MIB16, MIB16), MIB16);
        assert_eq!(align_up(MIB16 + 1, MIB16), 2 * MIB16);
        assert_eq!(align_up(1_073_739_904, MIB16), 1_073_741_824);
        assert_eq!(align_up(40, 1), 40);
    }
}
