// KawPow Runner - Free and Open Source Software Statement
//
// File: src/miner/gpu/dag.rs
// Version: 1.0.0
//
// Chunked dataset generation. One dispatch covers `chunk_nodes` nodes starting
// at `start`; the kernel skips node indices past the dataset end, so the last
// chunk may be short. Chunks write disjoint ranges and need no synchronization
// between them, only one full barrier at the end.

use super::compute::{ComputeDevice, DagBindings};
use crate::Result;
use log::{debug, error};
use std::time::{Duration, Instant};

const LOG_TARGET: &str = "kawpow::runner::dag";

/// Default nodes per DAG dispatch
pub const DAG_CHUNK_NODES: u32 = 1 << 18;

/// Start offsets of every chunk covering `[0, dataset_nodes)`
pub fn chunk_starts(dataset_nodes: u32, chunk_nodes: u32) -> impl Iterator<Item = u32> {
    (0..dataset_nodes).step_by(chunk_nodes.max(1) as usize)
}

/// Outcome of one complete dataset generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DagReport {
    pub dataset_nodes: u32,
    pub dispatches: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct DagGenerator {
    chunk_nodes: u32,
    work_group_size: usize,
}

impl DagGenerator {
    pub fn new(chunk_nodes: u32, work_group_size: usize) -> Self {
        Self {
            chunk_nodes,
            work_group_size,
        }
    }

    pub fn chunk_nodes(&self) -> u32 {
        self.chunk_nodes
    }

    pub fn work_group_size(&self) -> usize {
        self.work_group_size
    }

    /// Fill the dataset buffer from the light cache already on the device.
    ///
    /// Any dispatch failure aborts the whole generation; the caller must
    /// treat the dataset as invalid.
    pub fn generate<D: ComputeDevice>(
        &self,
        device: &mut D,
        light_cache: &D::Buffer,
        light_cache_nodes: u32,
        dataset: &D::Buffer,
        dataset_nodes: u32,
    ) -> Result<DagReport> {
        let start_time = Instant::now();

        device.bind_dag_kernel(DagBindings {
            light_cache,
            dataset,
            dataset_nodes,
            light_cache_nodes,
        })?;

        let mut dispatches = 0u32;
        for start in chunk_starts(dataset_nodes, self.chunk_nodes) {
            device.set_dag_start(start)?;
            device
                .enqueue_dag_kernel(self.chunk_nodes as usize, self.work_group_size)
                .inspect_err(|e| {
                    error!(target: LOG_TARGET,
                        "{} DAG chunk at node {} failed: {}",
                        device.name(), start, e
                    );
                })?;
            dispatches += 1;
        }

        device.finish()?;

        let elapsed = start_time.elapsed();
        debug!(target: LOG_TARGET,
            "{} dataset nodes in {} dispatch(es) of {} on {}",
            dataset_nodes,
            dispatches,
            self.chunk_nodes,
            device.name()
        );

        Ok(DagReport {
            dataset_nodes,
            dispatches,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_starts_exact_multiple() {
        let starts: Vec<u32> = chunk_starts(1 << 19, DAG_CHUNK_NODES).collect();
        assert_eq!(starts, vec![0, 1 << 18]);
    }

    #[test]
    fn test_chunk_starts_with_short_tail() {
        let starts: Vec<u32> = chunk_starts((1 << 18) + 10, DAG_CHUNK_NODES).collect();
        assert_eq!(starts, vec![0, 1 << 18]);
    }

    #[test]
    fn test_chunks_cover_every_node_once() {
        for (nodes, chunk) in [(1u32, 4u32), (7, 4), (8, 4), (1000, 64), (1025, 1024)] {
            let mut seen = vec![0u8; nodes as usize];
            for start in chunk_starts(nodes, chunk) {
                for node in start..(start + chunk).min(nodes) {
                    seen[node as usize] += 1;
                }
            }
            assert!(seen.iter().all(|&count| count == 1), "nodes={} chunk={}", nodes, chunk);
        }
    }

    #[test]
    fn test_empty_dataset_has_no_chunks() {
        assert_eq!(chunk_starts(0, DAG_CHUNK_NODES).count(), 0);
    }
}
