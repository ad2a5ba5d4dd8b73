// KawPow Runner - Free and Open Source Software Statement
//
// File: src/miner/gpu/runner.rs
// Version: 1.0.0
//
// Per-device KawPow runner. Sequences the shared light cache, the device
// buffers, dataset generation and the search dispatcher across the
// lifecycle build -> set(job) -> run(nonce)* -> release.

use super::buffers::DeviceBufferSet;
use super::compute::{ComputeDevice, ProgramId, SearchBindings, Transfer};
use super::dag::{DagGenerator, DagReport};
use super::search::SearchDispatcher;
use crate::Result;
use crate::core::epoch::HASH_BYTES;
use crate::core::error::RunnerError;
use crate::core::types::{BLOB_SIZE, Job, RunnerSettings, SearchResults};
use crate::miner::light_cache::SharedLightCache;
use log::{debug, error, info};
use std::time::Duration;

const LOG_TARGET: &str = "kawpow::runner::runner";

/// Lifecycle of a runner. Dispatching happens inside `JobBound` and does not
/// change the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Constructed,
    Built,
    JobBound,
    Destroyed,
}

impl RunnerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerState::Constructed => "constructed",
            RunnerState::Built => "built",
            RunnerState::JobBound => "job-bound",
            RunnerState::Destroyed => "destroyed",
        }
    }
}

// What the search kernel arguments currently point at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SearchBinding {
    program: ProgramId,
    dataset_generation: u64,
    boundary: u64,
}

pub struct KawPowRunner<D: ComputeDevice> {
    index: usize,
    settings: RunnerSettings,
    cache: SharedLightCache,
    dag: DagGenerator,
    search: SearchDispatcher,
    state: RunnerState,
    epoch: Option<u32>,
    light_cache_size: usize,
    dataset_nodes: u32,
    bound: Option<SearchBinding>,
    blob: [u8; BLOB_SIZE],
    height: u64,
    last_dag: Option<DagReport>,
    // Buffers are declared before the device so they are released first
    buffers: DeviceBufferSet<D::Buffer>,
    device: D,
}

impl<D: ComputeDevice> KawPowRunner<D> {
    pub fn new(
        index: usize,
        device: D,
        cache: SharedLightCache,
        settings: RunnerSettings,
    ) -> Result<Self> {
        settings.validate()?;

        let dag_work_group_size = settings.dag_work_group_size_for(&device.vendor());
        if settings.dag_chunk_nodes as usize % dag_work_group_size != 0 {
            return Err(RunnerError::InvalidSettings(format!(
                "dag_chunk_nodes {} is not a multiple of the DAG work-group size {}",
                settings.dag_chunk_nodes, dag_work_group_size
            )));
        }

        debug!(target: LOG_TARGET,
            "Runner #{} on {} ({}): intensity={}, local={}, dag_wg={}",
            index,
            device.name(),
            device.vendor().as_str(),
            settings.intensity,
            settings.local_work_size,
            dag_work_group_size
        );

        Ok(Self {
            index,
            dag: DagGenerator::new(settings.dag_chunk_nodes, dag_work_group_size),
            search: SearchDispatcher::new(&settings),
            buffers: DeviceBufferSet::new(&settings),
            settings,
            cache,
            state: RunnerState::Constructed,
            epoch: None,
            light_cache_size: 0,
            dataset_nodes: 0,
            bound: None,
            blob: [0u8; BLOB_SIZE],
            height: 0,
            last_dag: None,
            device,
        })
    }

    fn require(&self, op: &'static str, allowed: &[RunnerState], expected: &'static str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(RunnerError::InvalidState {
                op,
                state: self.state.as_str(),
                expected,
            })
        }
    }

    /// Compile the dataset kernel and allocate the blob and result buffers
    pub fn build(&mut self) -> Result<()> {
        self.require("build", &[RunnerState::Constructed], "a constructed runner")?;

        self.device.build_dag_kernel()?;
        self.buffers.ensure_io(&mut self.device)?;
        self.state = RunnerState::Built;

        info!(target: LOG_TARGET, "Runner #{} built on {}", self.index, self.device.name());
        Ok(())
    }

    /// Bind a job. Blocks while the light cache and dataset are regenerated
    /// on an epoch change. On failure no job is bound and `run` is refused
    /// until a later `set` succeeds.
    pub fn set(&mut self, job: &Job) -> Result<()> {
        self.require(
            "set",
            &[RunnerState::Built, RunnerState::JobBound],
            "a built runner",
        )?;

        match self.bind_job(job) {
            Ok(()) => {
                self.state = RunnerState::JobBound;
                Ok(())
            }
            Err(e) => {
                error!(target: LOG_TARGET,
                    "Runner #{} failed to bind job {} (height {}): {}",
                    self.index, job.job_id, job.height, e
                );
                self.bound = None;
                self.state = RunnerState::Built;
                Err(e)
            }
        }
    }

    fn bind_job(&mut self, job: &Job) -> Result<()> {
        let program = self.device.load_search_kernel(job.period())?;

        let epoch = job.epoch();
        let dataset_bytes = self.cache.dataset_size(epoch);
        let dataset_nodes = u32::try_from(dataset_bytes / HASH_BYTES as u64)
            .map_err(|_| RunnerError::DatasetTooLarge {
                epoch,
                bytes: dataset_bytes,
            })?;

        if self
            .buffers
            .dataset
            .ensure_capacity(&mut self.device, dataset_bytes as usize)?
        {
            // Fresh allocation: whatever was generated before is gone
            self.epoch = None;
        }

        if self.epoch != Some(epoch) {
            // Invalid until the new dataset is complete
            self.epoch = None;
            self.regenerate(epoch, dataset_nodes)?;
            self.epoch = Some(epoch);
            self.dataset_nodes = dataset_nodes;
        }

        let binding = SearchBinding {
            program,
            dataset_generation: self.buffers.dataset.generation(),
            boundary: job.boundary(),
        };
        if self.bound != Some(binding) {
            self.bound = None;
            self.device.bind_search_kernel(SearchBindings {
                dataset: self.buffers.dataset.handle()?,
                input: self.buffers.input.handle()?,
                boundary: binding.boundary,
                output: self.buffers.output.handle()?,
            })?;
            self.bound = Some(binding);
        }

        self.blob = job.blob;
        self.height = job.height;
        self.device.write(
            self.buffers.input.handle_mut()?,
            0,
            &self.blob,
            Transfer::Blocking,
        )?;
        Ok(())
    }

    fn regenerate(&mut self, epoch: u32, dataset_nodes: u32) -> Result<()> {
        let view = self.cache.ensure(epoch)?;

        self.buffers
            .light_cache
            .ensure_capacity(&mut self.device, view.len())?;
        self.device.write(
            self.buffers.light_cache.handle_mut()?,
            0,
            view.as_bytes(),
            Transfer::Blocking,
        )?;
        self.light_cache_size = view.len();
        let light_cache_nodes = view.nodes();
        drop(view);

        let report = self.dag.generate(
            &mut self.device,
            self.buffers.light_cache.handle()?,
            light_cache_nodes,
            self.buffers.dataset.handle()?,
            dataset_nodes,
        )?;

        info!(target: LOG_TARGET,
            "KawPow DAG for epoch {} calculated ({} ms)",
            epoch,
            report.elapsed.as_millis()
        );
        self.last_dag = Some(report);
        Ok(())
    }

    /// One search dispatch starting at `nonce`. Callers advance the nonce by
    /// `nonces_per_dispatch()` between calls.
    pub fn run(&mut self, nonce: u64) -> Result<SearchResults> {
        self.require("run", &[RunnerState::JobBound], "a bound job")?;

        self.search
            .dispatch(&mut self.device, &mut self.buffers, &self.blob, nonce)
            .inspect_err(|e| {
                error!(target: LOG_TARGET,
                    "Runner #{} dispatch at nonce {} failed on {}: {}",
                    self.index,
                    nonce,
                    self.device.name(),
                    e
                );
                // The queue state is unknown after a failed dispatch
                self.state = RunnerState::Built;
                self.bound = None;
            })
    }

    /// Release every device buffer and kernel. Idempotent, and safe on a
    /// runner that was never built.
    pub fn release(&mut self) {
        if self.state == RunnerState::Destroyed {
            return;
        }
        self.buffers.release_all();
        self.device.release_kernels();
        self.bound = None;
        self.epoch = None;
        self.state = RunnerState::Destroyed;
        debug!(target: LOG_TARGET, "Runner #{} released", self.index);
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Epoch of the dataset currently resident on the device
    pub fn epoch(&self) -> Option<u32> {
        self.epoch
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn dataset_nodes(&self) -> u32 {
        self.dataset_nodes
    }

    pub fn dag_capacity(&self) -> usize {
        self.buffers.dataset.capacity()
    }

    pub fn light_cache_capacity(&self) -> usize {
        self.buffers.light_cache.capacity()
    }

    pub fn light_cache_size(&self) -> usize {
        self.light_cache_size
    }

    pub fn last_dag_report(&self) -> Option<DagReport> {
        self.last_dag
    }

    /// Wall-clock time of the most recent dataset generation
    pub fn last_dag_duration(&self) -> Option<Duration> {
        self.last_dag.map(|report| report.elapsed)
    }

    pub fn nonces_per_dispatch(&self) -> u64 {
        self.search.global_work_size() as u64
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    pub fn device(&self) -> &D {
        &self.device
    }
}

impl<D: ComputeDevice> Drop for KawPowRunner<D> {
    fn drop(&mut self) {
        self.release();
    }
}
