// KawPow Runner - Free and Open Source Software Statement
//
// File: src/miner/gpu/opencl/device.rs
// Version: 1.0.0
//
// OpenCL device detection and description for the KawPow runner

use crate::Result;
use crate::core::epoch::dataset_size;
use crate::core::error::RunnerError;
use crate::core::types::GpuVendor;
use crate::utils::format::FormatUtils;
use log::{debug, info, warn};
use opencl3::{
    device::{CL_DEVICE_TYPE_GPU, Device},
    platform::get_platforms,
};

const LOG_TARGET: &str = "kawpow::runner::device";

/// OpenCL device information
#[derive(Debug, Clone)]
pub struct OpenClDevice {
    pub name: String,
    pub device_id: u32,
    pub platform_name: String,
    pub vendor: GpuVendor,
    pub max_work_group_size: usize,
    pub max_compute_units: u32,
    pub global_mem_size: u64,
    pub max_mem_alloc_size: u64,
    pub device: Device,
}

impl OpenClDevice {
    /// Describe an OpenCL device
    pub fn new(device: Device, device_id: u32, platform_name: String) -> Self {
        let name = device
            .name()
            .unwrap_or_else(|_| "Unknown Device".to_string());
        let vendor = match device.vendor_id() {
            Ok(id) if GpuVendor::from_vendor_id(id) != GpuVendor::Unknown => {
                GpuVendor::from_vendor_id(id)
            }
            _ => GpuVendor::from_vendor_name(&device.vendor().unwrap_or_default()),
        };
        let max_work_group_size = device.max_work_group_size().unwrap_or(256);
        let max_compute_units = device.max_compute_units().unwrap_or(1);
        let global_mem_size = device.global_mem_size().unwrap_or(0);
        let max_mem_alloc_size = device.max_mem_alloc_size().unwrap_or(0);

        debug!(target: LOG_TARGET,
            "Created OpenCL device: {} ({}, CU: {}, WG: {})",
            name,
            vendor.as_str(),
            max_compute_units,
            max_work_group_size
        );

        Self {
            name,
            device_id,
            platform_name,
            vendor,
            max_work_group_size,
            max_compute_units,
            global_mem_size,
            max_mem_alloc_size,
            device,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Detect all available OpenCL GPU devices
    pub fn detect_devices() -> Result<Vec<OpenClDevice>> {
        let platforms = get_platforms().map_err(|e| RunnerError::device("clGetPlatformIDs", e))?;

        if platforms.is_empty() {
            warn!(target: LOG_TARGET, "No OpenCL platforms found");
            return Ok(Vec::new());
        }

        let mut all_devices = Vec::new();
        let mut device_counter = 0;

        for platform in platforms {
            let platform_name = platform
                .name()
                .unwrap_or_else(|_| "Unknown Platform".to_string());

            match platform.get_devices(CL_DEVICE_TYPE_GPU) {
                Ok(devices) => {
                    for device_cl_id in devices {
                        let device =
                            OpenClDevice::new(Device::new(device_cl_id), device_counter, platform_name.clone());
                        info!(target: LOG_TARGET,
                            "Detected OpenCL device {}: {}",
                            device_counter,
                            device.info_string()
                        );
                        all_devices.push(device);
                        device_counter += 1;
                    }
                }
                Err(e) => {
                    debug!(target: LOG_TARGET, "No GPU devices found on platform {}: {}", platform_name, e);
                }
            }
        }

        if all_devices.is_empty() {
            warn!(target: LOG_TARGET, "No OpenCL GPU devices detected");
        }
        Ok(all_devices)
    }

    /// Get device info string for display
    pub fn info_string(&self) -> String {
        format!(
            "{} [{}] (CU: {}, WG: {}, MEM: {}, Platform: {})",
            self.name,
            self.vendor.as_str(),
            self.max_compute_units,
            self.max_work_group_size,
            FormatUtils::format_bytes(self.global_mem_size),
            self.platform_name
        )
    }

    /// Whether the dataset for `epoch` fits in a single allocation
    pub fn can_hold_epoch(&self, epoch: u32) -> bool {
        let required = dataset_size(epoch);
        required <= self.global_mem_size && required <= self.max_mem_alloc_size
    }
}
