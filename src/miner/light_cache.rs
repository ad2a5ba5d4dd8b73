// KawPow Runner - Free and Open Source Software Statement
//
// File: src/miner/light_cache.rs
// Version: 1.0.0
//
// Epoch-keyed host light cache shared by every device worker. Regeneration is
// serialized by one mutex per cache instance: the first worker to observe a
// new epoch builds it, the others block on the lock and then see the finished
// buffer. Readers receive reference-counted snapshots, so a worker still
// uploading epoch N is never disturbed by the transition to N + 1.

use crate::Result;
use crate::core::epoch::{EpochParams, HASH_BYTES, KawPowEpochs};
use crate::utils::format::FormatUtils;
use log::{debug, error, info};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

const LOG_TARGET: &str = "kawpow::runner::light_cache";

/// Handle injected into each runner at construction
pub type SharedLightCache = Arc<LightCache>;

/// Read-only snapshot of a fully built light cache
#[derive(Debug, Clone)]
pub struct LightCacheView {
    epoch: u32,
    data: Arc<Vec<u8>>,
}

impl LightCacheView {
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Node count bound into the DAG kernel
    pub fn nodes(&self) -> u32 {
        (self.data.len() / HASH_BYTES) as u32
    }
}

struct CacheSlot {
    // None until the first complete cache is published
    epoch: Option<u32>,
    data: Arc<Vec<u8>>,
    // Retired storage no snapshot refers to any more, reused by the next build
    spare: Vec<u8>,
    generations: u64,
}

pub struct LightCache {
    slot: Mutex<CacheSlot>,
    params: Box<dyn EpochParams>,
}

impl LightCache {
    /// Light cache using the production KawPow epoch parameters
    pub fn new() -> Self {
        Self::with_params(KawPowEpochs)
    }

    pub fn with_params(params: impl EpochParams + 'static) -> Self {
        Self {
            slot: Mutex::new(CacheSlot {
                epoch: None,
                data: Arc::new(Vec::new()),
                spare: Vec::new(),
                generations: 0,
            }),
            params: Box::new(params),
        }
    }

    pub fn shared(self) -> SharedLightCache {
        Arc::new(self)
    }

    fn lock(&self) -> MutexGuard<'_, CacheSlot> {
        // Builds run on spare storage, so a panicking builder never touches
        // the published cache
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ensure the cache holds `epoch` and return a snapshot of it.
    ///
    /// Builds at most once per epoch transition no matter how many workers
    /// call concurrently. The new cache is built off to the side and swapped
    /// in only when complete: a failed build returns the error and leaves the
    /// previously published epoch in place.
    pub fn ensure(&self, epoch: u32) -> Result<LightCacheView> {
        let mut slot = self.lock();

        if slot.epoch != Some(epoch) {
            let mut storage = std::mem::take(&mut slot.spare);

            let start = Instant::now();
            if let Err(e) = self.params.build_cache(epoch, &mut storage) {
                error!(target: LOG_TARGET, "Light cache for epoch {} failed: {}", epoch, e);
                storage.clear();
                slot.spare = storage;
                return Err(e);
            }

            let retired = std::mem::replace(&mut slot.data, Arc::new(storage));
            // Workers still uploading the old epoch keep it alive on their own
            if let Ok(mut buffer) = Arc::try_unwrap(retired) {
                buffer.clear();
                slot.spare = buffer;
            }
            slot.epoch = Some(epoch);
            slot.generations += 1;

            info!(target: LOG_TARGET,
                "Light cache for epoch {} ready: {} ({} ms)",
                epoch,
                FormatUtils::format_bytes(slot.data.len() as u64),
                start.elapsed().as_millis()
            );
        } else {
            debug!(target: LOG_TARGET, "Light cache already at epoch {}", epoch);
        }

        Ok(LightCacheView {
            epoch,
            data: Arc::clone(&slot.data),
        })
    }

    /// Epoch currently published, if any
    pub fn current_epoch(&self) -> Option<u32> {
        self.lock().epoch
    }

    /// Logical size of the published cache in bytes
    pub fn size(&self) -> usize {
        let slot = self.lock();
        if slot.epoch.is_some() { slot.data.len() } else { 0 }
    }

    /// Number of completed regenerations over the cache's lifetime
    pub fn generations(&self) -> u64 {
        self.lock().generations
    }

    pub fn cache_size(&self, epoch: u32) -> u64 {
        self.params.cache_size(epoch)
    }

    pub fn dataset_size(&self, epoch: u32) -> u64 {
        self.params.dataset_size(epoch)
    }
}

impl Default for LightCache {
    fn default() -> Self {
        Self::new()
    }
}
