// KawPow Runner - Free and Open Source Software Statement
//
// File: src/miner/gpu/opencl/backend.rs
// Version: 1.0.0
//
// OpenCL implementation of the compute device seam: one context, one
// in-order queue, the DAG kernel and the current period's search kernel.

use super::device::OpenClDevice;
use crate::Result;
use crate::core::error::RunnerError;
use crate::core::types::GpuVendor;
use crate::miner::gpu::compute::{
    BufferRegion, ComputeDevice, DagBindings, ProgramId, SearchBindings, Transfer,
};
use crate::miner::gpu::kernels::{DAG_KERNEL_NAME, KernelSource, SEARCH_KERNEL_NAME};
use log::{debug, error, info};
use opencl3::{
    command_queue::CommandQueue,
    context::Context,
    kernel::Kernel,
    memory::{Buffer, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE, ClMem},
    program::Program,
    types::{CL_FALSE, CL_TRUE, cl_uint, cl_ulong},
};
use std::ptr;

const LOG_TARGET: &str = "kawpow::runner::opencl";

/// Device memory region backed by an OpenCL buffer
pub struct ClBuffer {
    inner: Buffer<u8>,
    bytes: usize,
}

impl ClBuffer {
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

struct SearchProgram {
    kernel: Kernel,
    _program: Program,
    period: u64,
    id: ProgramId,
}

struct DagProgram {
    kernel: Kernel,
    _program: Program,
}

/// # Safety
/// `value` must match the type the kernel declares for argument `index`.
unsafe fn set_arg<T>(kernel: &Kernel, index: cl_uint, value: &T) -> Result<()> {
    unsafe { kernel.set_arg(index, value) }.map_err(|e| RunnerError::device("clSetKernelArg", e))
}

pub struct OpenClBackend {
    // Kernels and programs are released before the queue and context
    search: Option<SearchProgram>,
    dag: Option<DagProgram>,
    // Host copies of non-blocking writes, alive until the next blocking point
    staging: Vec<Box<[u8]>>,
    queue: CommandQueue,
    context: Context,
    device: OpenClDevice,
    sources: Box<dyn KernelSource>,
    options: String,
    next_program: u64,
}

impl OpenClBackend {
    pub fn new(device: OpenClDevice, sources: Box<dyn KernelSource>) -> Result<Self> {
        let context = Context::from_device(device.device())
            .map_err(|e| RunnerError::device("clCreateContext", e))?;
        let queue = CommandQueue::create_default(&context, 0)
            .map_err(|e| RunnerError::device("clCreateCommandQueue", e))?;

        let mut options = String::new();
        if device.vendor == GpuVendor::NVIDIA {
            options.push_str(" -DPLATFORM=OPENCL_PLATFORM_NVIDIA");
        }

        debug!(target: LOG_TARGET, "OpenCL backend for {} (options:{})", device.name(), options);

        Ok(Self {
            search: None,
            dag: None,
            staging: Vec::new(),
            queue,
            context,
            device,
            sources,
            options,
            next_program: 0,
        })
    }

    pub fn opencl_device(&self) -> &OpenClDevice {
        &self.device
    }

    fn build_program(&self, kernel: &str, source: &str) -> Result<Program> {
        Program::create_and_build_from_source(&self.context, source, &self.options).map_err(
            |log| {
                error!(target: LOG_TARGET, "Build log for {} on {}: {}", kernel, self.device.name(), log);
                RunnerError::KernelBuild {
                    kernel: kernel.to_string(),
                    message: log,
                }
            },
        )
    }

    fn dag_kernel(&self) -> Result<&Kernel> {
        self.dag
            .as_ref()
            .map(|dag| &dag.kernel)
            .ok_or(RunnerError::InvalidState {
                op: "DAG dispatch",
                state: "unbuilt",
                expected: "a built DAG kernel",
            })
    }

    fn search_kernel(&self) -> Result<&Kernel> {
        self.search
            .as_ref()
            .map(|search| &search.kernel)
            .ok_or(RunnerError::InvalidState {
                op: "search dispatch",
                state: "unloaded",
                expected: "a loaded search kernel",
            })
    }
}

impl ComputeDevice for OpenClBackend {
    type Buffer = ClBuffer;

    fn name(&self) -> &str {
        self.device.name()
    }

    fn vendor(&self) -> GpuVendor {
        self.device.vendor.clone()
    }

    fn allocate(&mut self, region: BufferRegion, bytes: usize) -> Result<ClBuffer> {
        let flags = if region.is_read_only() {
            CL_MEM_READ_ONLY
        } else {
            CL_MEM_READ_WRITE
        };
        let inner = unsafe { Buffer::<u8>::create(&self.context, flags, bytes, ptr::null_mut()) }
            .map_err(|e| RunnerError::device("clCreateBuffer", e))?;
        Ok(ClBuffer { inner, bytes })
    }

    fn write(
        &mut self,
        buffer: &mut ClBuffer,
        offset: usize,
        data: &[u8],
        transfer: Transfer,
    ) -> Result<()> {
        match transfer {
            Transfer::Blocking => {
                unsafe {
                    self.queue
                        .enqueue_write_buffer(&mut buffer.inner, CL_TRUE, offset, data, &[])
                }
                .map_err(|e| RunnerError::device("clEnqueueWriteBuffer", e))?;
            }
            Transfer::NonBlocking => {
                // The boxed copy keeps its heap address when moved into `staging`
                let staged: Box<[u8]> = data.into();
                unsafe {
                    self.queue
                        .enqueue_write_buffer(&mut buffer.inner, CL_FALSE, offset, &staged, &[])
                }
                .map_err(|e| RunnerError::device("clEnqueueWriteBuffer", e))?;
                self.staging.push(staged);
            }
        }
        Ok(())
    }

    fn read(&mut self, buffer: &ClBuffer, offset: usize, out: &mut [u8]) -> Result<()> {
        unsafe {
            self.queue
                .enqueue_read_buffer(&buffer.inner, CL_TRUE, offset, out, &[])
        }
        .map_err(|e| RunnerError::device("clEnqueueReadBuffer", e))?;
        self.staging.clear();
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.queue
            .finish()
            .map_err(|e| RunnerError::device("clFinish", e))?;
        self.staging.clear();
        Ok(())
    }

    fn build_dag_kernel(&mut self) -> Result<()> {
        let source = self.sources.dag_source()?;
        let program = self.build_program(DAG_KERNEL_NAME, &source)?;
        let kernel = Kernel::create(&program, DAG_KERNEL_NAME)
            .map_err(|e| RunnerError::device("clCreateKernel", e))?;

        info!(target: LOG_TARGET, "DAG kernel built for {}", self.device.name());
        self.dag = Some(DagProgram {
            kernel,
            _program: program,
        });
        Ok(())
    }

    fn bind_dag_kernel(&mut self, bindings: DagBindings<'_, ClBuffer>) -> Result<()> {
        let kernel = self.dag_kernel()?;
        let start: cl_uint = 0;
        let dataset_nodes: cl_uint = bindings.dataset_nodes;
        let light_cache_nodes: cl_uint = bindings.light_cache_nodes;
        unsafe {
            set_arg(kernel, 0, &start)?;
            set_arg(kernel, 1, &bindings.light_cache.inner.get())?;
            set_arg(kernel, 2, &bindings.dataset.inner.get())?;
            set_arg(kernel, 3, &dataset_nodes)?;
            set_arg(kernel, 4, &light_cache_nodes)
        }
    }

    fn set_dag_start(&mut self, start: u32) -> Result<()> {
        let kernel = self.dag_kernel()?;
        let start: cl_uint = start;
        unsafe { set_arg(kernel, 0, &start) }
    }

    fn enqueue_dag_kernel(&mut self, global_work_size: usize, local_work_size: usize) -> Result<()> {
        let kernel = self.dag_kernel()?;
        unsafe {
            self.queue.enqueue_nd_range_kernel(
                kernel.get(),
                1,
                ptr::null(),
                &global_work_size,
                &local_work_size,
                &[],
            )
        }
        .map(|_| ())
        .map_err(|e| RunnerError::device("clEnqueueNDRangeKernel", e))
    }

    fn load_search_kernel(&mut self, period: u64) -> Result<ProgramId> {
        if let Some(search) = &self.search {
            if search.period == period {
                return Ok(search.id);
            }
        }

        let source = self.sources.search_source(period)?;
        let program = self.build_program(SEARCH_KERNEL_NAME, &source)?;
        let kernel = Kernel::create(&program, SEARCH_KERNEL_NAME)
            .map_err(|e| RunnerError::device("clCreateKernel", e))?;

        self.next_program += 1;
        let id = ProgramId(self.next_program);
        debug!(target: LOG_TARGET, "Search program for period {} loaded on {}", period, self.device.name());

        self.search = Some(SearchProgram {
            kernel,
            _program: program,
            period,
            id,
        });
        Ok(id)
    }

    fn bind_search_kernel(&mut self, bindings: SearchBindings<'_, ClBuffer>) -> Result<()> {
        let kernel = self.search_kernel()?;
        let boundary: cl_ulong = bindings.boundary;
        let hack_false: cl_uint = 0;
        unsafe {
            set_arg(kernel, 0, &bindings.dataset.inner.get())?;
            set_arg(kernel, 1, &bindings.input.inner.get())?;
            set_arg(kernel, 2, &boundary)?;
            set_arg(kernel, 3, &hack_false)?;
            set_arg(kernel, 4, &bindings.output.inner.get())
        }
    }

    fn enqueue_search_kernel(
        &mut self,
        global_work_offset: u64,
        global_work_size: usize,
        local_work_size: usize,
    ) -> Result<()> {
        let kernel = self.search_kernel()?;
        let offset = global_work_offset as usize;
        unsafe {
            self.queue.enqueue_nd_range_kernel(
                kernel.get(),
                1,
                &offset,
                &global_work_size,
                &local_work_size,
                &[],
            )
        }
        .map(|_| ())
        .map_err(|e| RunnerError::device("clEnqueueNDRangeKernel", e))
    }

    fn release_kernels(&mut self) {
        self.search = None;
        self.dag = None;
    }
}
