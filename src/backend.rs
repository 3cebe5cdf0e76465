//! Device backends and placement.
//!
//! This module defines the device backends an operator descriptor can ask
//! for and where a tensor's storage currently lives.
//!
//! # Supported Backends
//!
//! - `Cpu`: Pure Rust backend running kernels on the host (default).
//! - `Cuda`: GPU backend. Served by the `wgpu` runtime when the `wgpu`
//!   (or `cuda`) feature is enabled.
//! - `Cudnn`: The CUDA backend augmented with library handles; kernels
//!   registered here take precedence over plain CUDA kernels.

use core::convert::TryFrom;
use core::fmt;

use serde::{Deserialize, Serialize};

/// Enumeration of device backends, one registry each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceType {
    /// Host CPU (default).
    #[default]
    Cpu = 0,
    /// Generic GPU backend.
    Cuda,
    /// GPU backend with library-specialized kernels.
    Cudnn,
}

impl DeviceType {
    /// The protobuf-style spelling of the device type.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::Cuda => "CUDA",
            Self::Cudnn => "CUDNN",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u8> for DeviceType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Cpu),
            1 => Ok(Self::Cuda),
            2 => Ok(Self::Cudnn),
            _ => Err(()),
        }
    }
}

/// Device selection carried by an operator descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceOption {
    /// Backend the operator runs on.
    #[serde(default)]
    pub device_type: DeviceType,
    /// Index of the device within its backend.
    #[serde(default)]
    pub device_id: u32,
}

impl DeviceOption {
    /// Host CPU.
    pub const fn cpu() -> Self {
        Self {
            device_type: DeviceType::Cpu,
            device_id: 0,
        }
    }

    /// GPU `device_id` on the generic backend.
    pub const fn cuda(device_id: u32) -> Self {
        Self {
            device_type: DeviceType::Cuda,
            device_id,
        }
    }

    /// GPU `device_id` with library-specialized kernels.
    pub const fn cudnn(device_id: u32) -> Self {
        Self {
            device_type: DeviceType::Cudnn,
            device_id,
        }
    }
}

/// Where a tensor's storage currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    /// Host memory.
    #[default]
    Cpu,
    /// Memory of the GPU with the given index.
    Gpu(u32),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Gpu(id) => write!(f, "gpu:{id}"),
        }
    }
}
