// KawPow Runner - Free and Open Source Software Statement
//
// File: src/miner/gpu/search.rs
// Version: 1.0.0
//
// One nonce-search dispatch per call: stage the blob, zero the result
// counter, launch over `intensity` rounded down to whole work groups, then
// read back and clamp the result block.

use super::buffers::DeviceBufferSet;
use super::compute::{ComputeDevice, Transfer};
use crate::Result;
use crate::core::types::{
    BLOB_SIZE, OverflowPolicy, RESULT_BLOCK_BYTES, RESULT_BLOCK_WORDS, RunnerSettings,
    SearchResults,
};
use log::{error, warn};

const LOG_TARGET: &str = "kawpow::runner::search";

/// Nonces covered by one dispatch: `intensity` truncated to whole work groups
pub fn global_work_size(intensity: u32, local_work_size: usize) -> usize {
    let intensity = intensity as usize;
    intensity - (intensity % local_work_size)
}

#[derive(Debug, Clone)]
pub struct SearchDispatcher {
    global_work_size: usize,
    local_work_size: usize,
    overflow_policy: OverflowPolicy,
}

impl SearchDispatcher {
    pub fn new(settings: &RunnerSettings) -> Self {
        Self {
            global_work_size: global_work_size(settings.intensity, settings.local_work_size),
            local_work_size: settings.local_work_size,
            overflow_policy: settings.overflow_policy,
        }
    }

    pub fn global_work_size(&self) -> usize {
        self.global_work_size
    }

    pub fn local_work_size(&self) -> usize {
        self.local_work_size
    }

    /// Search `[nonce, nonce + global_work_size)` against the bound job.
    ///
    /// The kernel arguments must already be bound; only the blob and the
    /// result counter are rewritten here.
    pub fn dispatch<D: ComputeDevice>(
        &self,
        device: &mut D,
        buffers: &mut DeviceBufferSet<D::Buffer>,
        blob: &[u8; BLOB_SIZE],
        nonce: u64,
    ) -> Result<SearchResults> {
        device.write(buffers.input.handle_mut()?, 0, blob, Transfer::NonBlocking)?;
        device.write(
            buffers.output.handle_mut()?,
            0,
            &0u32.to_le_bytes(),
            Transfer::NonBlocking,
        )?;

        device
            .enqueue_search_kernel(nonce, self.global_work_size, self.local_work_size)
            .inspect_err(|e| {
                error!(target: LOG_TARGET,
                    "{} error {} when calling enqueue for kernel progpow_search",
                    device.name(), e
                );
            })?;

        let mut raw = [0u8; RESULT_BLOCK_BYTES];
        device.read(buffers.output.handle()?, 0, &mut raw)?;

        let mut block = [0u32; RESULT_BLOCK_WORDS];
        for (word, bytes) in block.iter_mut().zip(raw.chunks_exact(4)) {
            *word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        }

        let results = SearchResults::from_output_block(&block);
        if results.saturated() && self.overflow_policy == OverflowPolicy::Warn {
            warn!(target: LOG_TARGET,
                "{}: {} candidates at nonce {}, {} dropped (possible missed share)",
                device.name(),
                results.device_count(),
                nonce,
                results.dropped()
            );
        }
        Ok(results)
    }
}
