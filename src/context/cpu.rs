use crate::backend::{Device, DeviceOption};
use crate::error::Result;

use super::Context;

/// Host context. Kernels run synchronously on the calling thread (and
/// rayon's pool), so there is nothing to switch to or wait for.
#[derive(Debug, Clone)]
pub struct CpuContext {
    option: DeviceOption,
}

impl Context for CpuContext {
    fn new(option: &DeviceOption) -> Result<Self> {
        Ok(Self { option: *option })
    }

    fn option(&self) -> &DeviceOption {
        &self.option
    }

    fn device(&self) -> Device {
        Device::Cpu
    }

    fn switch_to_device(&mut self) -> Result<()> {
        Ok(())
    }

    fn finish_device_computation(&mut self) -> Result<()> {
        Ok(())
    }
}
