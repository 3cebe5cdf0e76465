//! GPU contexts.
//!
//! There is no native CUDA binding in this crate: both GPU contexts are
//! served by the shared `wgpu` runtime when the `wgpu` feature is enabled.
//! The runtime exposes one adapter, so only device index `0` exists.

use crate::backend::{Device, DeviceOption};
use crate::error::{OpError, Result};
#[cfg(feature = "wgpu")]
use crate::ops::wgpu::{self as gpu, GpuRuntime};

use super::Context;

/// Generic GPU context.
pub struct CudaContext {
    option: DeviceOption,
    #[cfg(feature = "wgpu")]
    runtime: &'static GpuRuntime,
}

impl CudaContext {
    /// The runtime kernels launch on.
    #[cfg(feature = "wgpu")]
    pub fn runtime(&self) -> &'static GpuRuntime {
        self.runtime
    }

    fn failure(&self, message: impl ToString) -> OpError {
        OpError::DeviceFailure {
            device: self.option.device_type,
            message: message.to_string(),
        }
    }
}

impl Context for CudaContext {
    #[cfg(feature = "wgpu")]
    fn new(option: &DeviceOption) -> Result<Self> {
        let failure = |message: &str| OpError::DeviceFailure {
            device: option.device_type,
            message: message.to_owned(),
        };
        if option.device_id != 0 {
            return Err(failure("only device 0 is exposed by the wgpu runtime"));
        }
        let runtime = gpu::runtime().ok_or_else(|| failure("no GPU adapter is available"))?;
        Ok(Self {
            option: *option,
            runtime,
        })
    }

    #[cfg(not(feature = "wgpu"))]
    fn new(option: &DeviceOption) -> Result<Self> {
        Err(OpError::DeviceFailure {
            device: option.device_type,
            message: "opcore was built without the `wgpu` feature".to_owned(),
        })
    }

    fn option(&self) -> &DeviceOption {
        &self.option
    }

    fn device(&self) -> Device {
        Device::Gpu(self.option.device_id)
    }

    fn switch_to_device(&mut self) -> Result<()> {
        // single adapter, single queue: nothing to bind
        Ok(())
    }

    fn finish_device_computation(&mut self) -> Result<()> {
        #[cfg(feature = "wgpu")]
        {
            self.runtime.synchronize().map_err(|e| self.failure(e))
        }
        #[cfg(not(feature = "wgpu"))]
        {
            Err(self.failure("no GPU runtime"))
        }
    }
}

/// GPU context whose kernels use the runtime's precompiled library pipelines.
pub struct CudnnContext {
    cuda: CudaContext,
}

impl CudnnContext {
    /// The underlying generic GPU context.
    pub fn cuda(&self) -> &CudaContext {
        &self.cuda
    }

    /// The library handle kernels launch through.
    #[cfg(feature = "wgpu")]
    pub fn handle(&self) -> &'static GpuRuntime {
        self.cuda.runtime()
    }
}

impl Context for CudnnContext {
    fn new(option: &DeviceOption) -> Result<Self> {
        Ok(Self {
            cuda: CudaContext::new(option)?,
        })
    }

    fn option(&self) -> &DeviceOption {
        self.cuda.option()
    }

    fn device(&self) -> Device {
        self.cuda.device()
    }

    fn switch_to_device(&mut self) -> Result<()> {
        self.cuda.switch_to_device()
    }

    fn finish_device_computation(&mut self) -> Result<()> {
        self.cuda.finish_device_computation()
    }
}
