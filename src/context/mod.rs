//! Device contexts.
//!
//! A context is owned by exactly one operator and lives as long as it does.
//! It is constructed from the descriptor's [`DeviceOption`], made current at
//! the start of every `run`, and asked to block until the device has
//! finished at the end of it.
//!
//! ## Implementations
//!
//! - [`CpuContext`]: host execution, every hook is a no-op
//! - [`CudaContext`]: GPU execution through the `wgpu` runtime
//! - [`CudnnContext`]: [`CudaContext`] plus the cached library pipelines
//!
//! Without the `wgpu` feature the GPU contexts still exist but refuse to be
//! constructed, so GPU descriptors fail at creation with a device failure.

use crate::backend::{Device, DeviceOption};
use crate::error::Result;

mod cpu;
pub use self::cpu::CpuContext;

mod cuda;
pub use self::cuda::{CudaContext, CudnnContext};

/// Capability set every kernel is generic over.
pub trait Context: Send + Sized + 'static {
    /// Builds the context for `option`.
    ///
    /// # Errors
    ///
    /// [`OpError::DeviceFailure`](crate::error::OpError::DeviceFailure) when
    /// the requested device is unavailable.
    fn new(option: &DeviceOption) -> Result<Self>;

    /// The option this context was built from.
    fn option(&self) -> &DeviceOption;

    /// Placement tensors must migrate to before a kernel touches them.
    fn device(&self) -> Device;

    /// Makes this context's device, stream and handles current.
    ///
    /// # Errors
    ///
    /// Device failures.
    fn switch_to_device(&mut self) -> Result<()>;

    /// Blocks until every command issued through this context has finished.
    ///
    /// # Errors
    ///
    /// Device failures surfaced by the synchronization.
    fn finish_device_computation(&mut self) -> Result<()>;
}
