// KawPow Runner - Free and Open Source Software Statement
//
// This project, kawpow-runner, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: tests/common/mod.rs
// Version: 1.0.0
//
// Host-memory compute device and tiny epoch parameters shared by the
// integration tests. The simulated kernels follow the device contract: the
// DAG kernel skips nodes past the dataset end, and the search kernel bumps
// the result counter for every passing lane but only stores the first
// fifteen.

#![allow(dead_code)]

use kawpow_runner::core::epoch::{EpochParams, HASH_BYTES};
use kawpow_runner::core::types::{GpuVendor, MAX_RESULTS};
use kawpow_runner::miner::gpu::compute::{
    BufferRegion, ComputeDevice, DagBindings, ProgramId, SearchBindings, Transfer,
};
use kawpow_runner::{Result, RunnerError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Everything the simulated device did, in queue order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Allocate { region: BufferRegion, bytes: usize, id: u64 },
    Release { id: u64, region: BufferRegion },
    Write { region: BufferRegion, offset: usize, bytes: usize, transfer: Transfer },
    Read { region: BufferRegion, bytes: usize },
    Finish,
    BuildDag,
    BindDag { dataset_nodes: u32, light_cache_nodes: u32 },
    DagStart(u32),
    DagEnqueue { global: usize, local: usize },
    LoadSearch { period: u64 },
    BindSearch { boundary: u64 },
    Search { offset: u64, global: usize, local: usize },
    ReleaseKernels,
}

#[derive(Debug, Clone, Copy)]
struct DagArgs {
    light_cache: u64,
    dataset: u64,
    dataset_nodes: u32,
    light_cache_nodes: u32,
    start: u32,
}

#[derive(Debug, Clone, Copy)]
struct SearchArgs {
    dataset: u64,
    input: u64,
    boundary: u64,
    output: u64,
}

#[derive(Debug, Default)]
pub struct SimState {
    next_buffer: u64,
    next_program: u64,
    pub memory: HashMap<u64, Vec<u8>>,
    pub events: Vec<Event>,
    /// Operation name that fails until cleared
    pub fail_on: Option<&'static str>,
    /// Fail the DAG dispatch starting at this node
    pub fail_dag_start: Option<u32>,
    /// Writes per dataset node since the last DAG bind
    pub node_writes: Vec<u32>,
    dag_kernel: bool,
    dag: Option<DagArgs>,
    program: Option<(u64, ProgramId)>,
    search: Option<SearchArgs>,
}

impl SimState {
    fn check(&self, op: &'static str) -> Result<()> {
        if self.fail_on == Some(op) {
            return Err(RunnerError::device(op, "CL_OUT_OF_RESOURCES"));
        }
        Ok(())
    }

    fn memory_mut(&mut self, id: u64) -> Result<&mut Vec<u8>> {
        self.memory
            .get_mut(&id)
            .ok_or_else(|| RunnerError::device("sim", format!("buffer {} released", id)))
    }
}

/// Inspection handle that outlives the device moved into a runner
#[derive(Clone)]
pub struct SimProbe(Arc<Mutex<SimState>>);

impl SimProbe {
    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.0.lock().unwrap()
    }

    pub fn events(&self) -> Vec<Event> {
        self.state().events.clone()
    }

    pub fn clear_events(&self) {
        self.state().events.clear();
    }

    pub fn fail_on(&self, op: Option<&'static str>) {
        self.state().fail_on = op;
    }

    pub fn fail_dag_start(&self, start: Option<u32>) {
        self.state().fail_dag_start = start;
    }

    pub fn live_buffers(&self) -> usize {
        self.state().memory.len()
    }

    pub fn count(&self, matches: impl Fn(&Event) -> bool) -> usize {
        self.state().events.iter().filter(|event| matches(event)).count()
    }

    /// Contents of the most recently allocated buffer of `region`
    pub fn contents(&self, region: BufferRegion) -> Vec<u8> {
        let state = self.state();
        let id = state
            .events
            .iter()
            .rev()
            .find_map(|event| match event {
                Event::Allocate { region: r, id, .. } if *r == region => Some(*id),
                _ => None,
            })
            .expect("region was never allocated");
        state.memory.get(&id).cloned().expect("region was released")
    }
}

pub struct SimBuffer {
    id: u64,
    region: BufferRegion,
    state: Arc<Mutex<SimState>>,
}

impl Drop for SimBuffer {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.memory.remove(&self.id);
        state.events.push(Event::Release {
            id: self.id,
            region: self.region,
        });
    }
}

pub struct SimDevice {
    name: String,
    vendor: GpuVendor,
    state: Arc<Mutex<SimState>>,
}

impl SimDevice {
    pub fn new() -> Self {
        Self::with_vendor(GpuVendor::AMD)
    }

    pub fn with_vendor(vendor: GpuVendor) -> Self {
        Self {
            name: format!("sim-{}", vendor.as_str()),
            vendor,
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    pub fn probe(&self) -> SimProbe {
        SimProbe(Arc::clone(&self.state))
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }
}

/// Dataset node as the simulated DAG kernel computes it
pub fn sim_dag_node(light_cache: &[u8], light_cache_nodes: u32, index: u32) -> [u8; HASH_BYTES] {
    let parent = (index % light_cache_nodes) as usize * HASH_BYTES;
    let salt = index.wrapping_mul(0x9E37_79B1).to_le_bytes();
    let mut node = [0u8; HASH_BYTES];
    for (k, byte) in node.iter_mut().enumerate() {
        *byte = light_cache[parent + k] ^ salt[k % 4] ^ k as u8;
    }
    node
}

/// Whole dataset computed in one pass, for comparison with chunked output
pub fn reference_dataset(light_cache: &[u8], dataset_nodes: u32) -> Vec<u8> {
    let light_cache_nodes = (light_cache.len() / HASH_BYTES) as u32;
    let mut out = Vec::with_capacity(dataset_nodes as usize * HASH_BYTES);
    for index in 0..dataset_nodes {
        out.extend_from_slice(&sim_dag_node(light_cache, light_cache_nodes, index));
    }
    out
}

/// Lane hash of the simulated search kernel, never zero
pub fn sim_lane_hash(blob: &[u8], nonce: u64, dataset_head: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in blob
        .iter()
        .chain(nonce.to_le_bytes().iter())
        .chain(dataset_head.iter())
    {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash.max(1)
}

impl ComputeDevice for SimDevice {
    type Buffer = SimBuffer;

    fn name(&self) -> &str {
        &self.name
    }

    fn vendor(&self) -> GpuVendor {
        self.vendor.clone()
    }

    fn allocate(&mut self, region: BufferRegion, bytes: usize) -> Result<SimBuffer> {
        let mut state = self.lock();
        state.check("allocate")?;
        state.next_buffer += 1;
        let id = state.next_buffer;
        state.memory.insert(id, vec![0u8; bytes]);
        state.events.push(Event::Allocate { region, bytes, id });
        Ok(SimBuffer {
            id,
            region,
            state: Arc::clone(&self.state),
        })
    }

    fn write(
        &mut self,
        buffer: &mut SimBuffer,
        offset: usize,
        data: &[u8],
        transfer: Transfer,
    ) -> Result<()> {
        let mut state = self.lock();
        state.check("write")?;
        let memory = state.memory_mut(buffer.id)?;
        if offset + data.len() > memory.len() {
            return Err(RunnerError::device("write", "CL_INVALID_VALUE"));
        }
        memory[offset..offset + data.len()].copy_from_slice(data);
        state.events.push(Event::Write {
            region: buffer.region,
            offset,
            bytes: data.len(),
            transfer,
        });
        Ok(())
    }

    fn read(&mut self, buffer: &SimBuffer, offset: usize, out: &mut [u8]) -> Result<()> {
        let mut state = self.lock();
        state.check("read")?;
        let memory = state.memory_mut(buffer.id)?;
        if offset + out.len() > memory.len() {
            return Err(RunnerError::device("read", "CL_INVALID_VALUE"));
        }
        out.copy_from_slice(&memory[offset..offset + out.len()]);
        state.events.push(Event::Read {
            region: buffer.region,
            bytes: out.len(),
        });
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.check("finish")?;
        state.events.push(Event::Finish);
        Ok(())
    }

    fn build_dag_kernel(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.check("build_dag_kernel")?;
        state.dag_kernel = true;
        state.events.push(Event::BuildDag);
        Ok(())
    }

    fn bind_dag_kernel(&mut self, bindings: DagBindings<'_, SimBuffer>) -> Result<()> {
        let mut state = self.lock();
        if !state.dag_kernel {
            return Err(RunnerError::device("bind_dag_kernel", "CL_INVALID_KERNEL"));
        }
        state.dag = Some(DagArgs {
            light_cache: bindings.light_cache.id,
            dataset: bindings.dataset.id,
            dataset_nodes: bindings.dataset_nodes,
            light_cache_nodes: bindings.light_cache_nodes,
            start: 0,
        });
        state.node_writes = vec![0; bindings.dataset_nodes as usize];
        state.events.push(Event::BindDag {
            dataset_nodes: bindings.dataset_nodes,
            light_cache_nodes: bindings.light_cache_nodes,
        });
        Ok(())
    }

    fn set_dag_start(&mut self, start: u32) -> Result<()> {
        let mut state = self.lock();
        let dag = state
            .dag
            .as_mut()
            .ok_or_else(|| RunnerError::device("set_dag_start", "CL_INVALID_KERNEL_ARGS"))?;
        dag.start = start;
        state.events.push(Event::DagStart(start));
        Ok(())
    }

    fn enqueue_dag_kernel(&mut self, global_work_size: usize, local_work_size: usize) -> Result<()> {
        let mut state = self.lock();
        state.check("enqueue_dag_kernel")?;
        if global_work_size % local_work_size != 0 {
            return Err(RunnerError::device(
                "enqueue_dag_kernel",
                "CL_INVALID_WORK_GROUP_SIZE",
            ));
        }
        let dag = state
            .dag
            .ok_or_else(|| RunnerError::device("enqueue_dag_kernel", "CL_INVALID_KERNEL_ARGS"))?;
        if state.fail_dag_start == Some(dag.start) {
            return Err(RunnerError::device("enqueue_dag_kernel", "CL_OUT_OF_RESOURCES"));
        }

        let light_cache = state
            .memory
            .get(&dag.light_cache)
            .cloned()
            .ok_or_else(|| RunnerError::device("enqueue_dag_kernel", "CL_INVALID_MEM_OBJECT"))?;
        for gid in 0..global_work_size as u32 {
            let node = dag.start + gid;
            if node >= dag.dataset_nodes {
                continue;
            }
            let item = sim_dag_node(&light_cache, dag.light_cache_nodes, node);
            let head = node as usize * HASH_BYTES;
            let dataset = state.memory_mut(dag.dataset)?;
            dataset[head..head + HASH_BYTES].copy_from_slice(&item);
            state.node_writes[node as usize] += 1;
        }

        state.events.push(Event::DagEnqueue {
            global: global_work_size,
            local: local_work_size,
        });
        Ok(())
    }

    fn load_search_kernel(&mut self, period: u64) -> Result<ProgramId> {
        let mut state = self.lock();
        state.check("load_search_kernel")?;
        if let Some((loaded, id)) = state.program {
            if loaded == period {
                return Ok(id);
            }
        }
        state.next_program += 1;
        let id = ProgramId(state.next_program);
        state.program = Some((period, id));
        state.search = None;
        state.events.push(Event::LoadSearch { period });
        Ok(id)
    }

    fn bind_search_kernel(&mut self, bindings: SearchBindings<'_, SimBuffer>) -> Result<()> {
        let mut state = self.lock();
        if state.program.is_none() {
            return Err(RunnerError::device("bind_search_kernel", "CL_INVALID_KERNEL"));
        }
        state.search = Some(SearchArgs {
            dataset: bindings.dataset.id,
            input: bindings.input.id,
            boundary: bindings.boundary,
            output: bindings.output.id,
        });
        state.events.push(Event::BindSearch {
            boundary: bindings.boundary,
        });
        Ok(())
    }

    fn enqueue_search_kernel(
        &mut self,
        global_work_offset: u64,
        global_work_size: usize,
        local_work_size: usize,
    ) -> Result<()> {
        let mut state = self.lock();
        state.check("enqueue_search_kernel")?;
        if global_work_size % local_work_size != 0 {
            return Err(RunnerError::device(
                "enqueue_search_kernel",
                "CL_INVALID_WORK_GROUP_SIZE",
            ));
        }
        let args = state
            .search
            .ok_or_else(|| RunnerError::device("enqueue_search_kernel", "CL_INVALID_KERNEL_ARGS"))?;

        let blob = state.memory_mut(args.input)?[..40].to_vec();
        let dataset_head = state.memory_mut(args.dataset)?[..HASH_BYTES].to_vec();
        let output = state.memory_mut(args.output)?;

        let mut count = u32::from_le_bytes([output[0], output[1], output[2], output[3]]);
        for gid in 0..global_work_size as u32 {
            let nonce = global_work_offset.wrapping_add(gid as u64);
            if sim_lane_hash(&blob, nonce, &dataset_head) > args.boundary {
                continue;
            }
            let slot = count as usize;
            count += 1;
            if slot < MAX_RESULTS {
                let head = (slot + 1) * 4;
                output[head..head + 4].copy_from_slice(&gid.to_le_bytes());
            }
        }
        output[..4].copy_from_slice(&count.to_le_bytes());

        state.events.push(Event::Search {
            offset: global_work_offset,
            global: global_work_size,
            local: local_work_size,
        });
        Ok(())
    }

    fn release_kernels(&mut self) {
        let mut state = self.lock();
        state.dag_kernel = false;
        state.dag = None;
        state.program = None;
        state.search = None;
        state.events.push(Event::ReleaseKernels);
    }
}

/// Small deterministic epoch geometry so tests run on megabytes, not gigabytes
pub struct TestEpochs {
    pub cache_nodes: u64,
    // Light cache nodes added per epoch
    pub cache_growth: u64,
    pub dataset_bytes: fn(u32) -> u64,
    pub builds: Arc<AtomicUsize>,
    pub fail_epoch: Option<u32>,
    pub build_delay: Duration,
}

impl TestEpochs {
    pub fn new() -> Self {
        Self {
            cache_nodes: 32,
            cache_growth: 0,
            dataset_bytes: |epoch| (1024 + epoch as u64 * 512) * HASH_BYTES as u64,
            builds: Arc::new(AtomicUsize::new(0)),
            fail_epoch: None,
            build_delay: Duration::ZERO,
        }
    }

    pub fn with_dataset(dataset_bytes: fn(u32) -> u64) -> Self {
        Self {
            dataset_bytes,
            ..Self::new()
        }
    }

    pub fn build_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.builds)
    }

    pub fn cache_nodes_for(&self, epoch: u32) -> u64 {
        self.cache_nodes + self.cache_growth * epoch as u64
    }
}

/// Light cache contents TestEpochs produces for `epoch`
pub fn test_cache_bytes(epoch: u32, cache_nodes: u64) -> Vec<u8> {
    (0..cache_nodes as usize * HASH_BYTES)
        .map(|i| (i as u32).wrapping_mul(31).wrapping_add(epoch.wrapping_mul(97)) as u8)
        .collect()
}

impl EpochParams for TestEpochs {
    fn cache_size(&self, epoch: u32) -> u64 {
        self.cache_nodes_for(epoch) * HASH_BYTES as u64
    }

    fn dataset_size(&self, epoch: u32) -> u64 {
        (self.dataset_bytes)(epoch)
    }

    fn build_cache(&self, epoch: u32, out: &mut Vec<u8>) -> Result<()> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if !self.build_delay.is_zero() {
            std::thread::sleep(self.build_delay);
        }
        if self.fail_epoch == Some(epoch) {
            return Err(RunnerError::CacheBuild {
                epoch,
                reason: "out of memory".to_string(),
            });
        }
        out.clear();
        out.extend_from_slice(&test_cache_bytes(epoch, self.cache_nodes_for(epoch)));
        Ok(())
    }
}
