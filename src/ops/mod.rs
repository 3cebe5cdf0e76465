//! # Built-in Operators
//!
//! Kernel implementations and the dispatcher that instantiates them.
//!
//! ## Submodules
//!
//! - [`cpu`]: host kernels parallelized with `rayon` (always available)
//! - [`wgpu`] *(opt-in)*: GPU runtime and device kernels on `wgpu`
//! - [`dispatch`]: `create_operator`, the single entry point of graph executors
//!
//! ## Registration
//!
//! [`register_builtins`] installs:
//!
//! - every host kernel in the CPU registry
//! - `Softmax`, `InnerProduct` and `Dropout` in the CUDA registry through
//!   their host kernels
//! - with `wgpu`: GPU `Add`/`Sub`/`Mul`/`Div`/`Relu` in the CUDA registry
//!   and GPU `Relu` in the cuDNN registry; without it the host kernels
//!   stand in for them in the CUDA registry
//!
//! ## Feature Flags
//!
//! - `wgpu`: enables the GPU runtime and kernels
//! - `cuda`: alias for `wgpu`, the CUDA registry is served by it

pub mod cpu;
pub mod dispatch;
#[cfg(feature = "wgpu")]
pub mod wgpu;

use crate::error::Result;
use crate::registry::Registries;

use self::cpu::{
    Add, BinaryOp, Div, DropoutKernel, ElementwiseKernel, InnerProductKernel, Mul, ReluKernel, SoftmaxKernel, Sub,
};

fn deploy_binary<O: BinaryOp>(registries: &mut Registries) -> Result<()> {
    registries.deploy_cpu::<ElementwiseKernel<O>>(O::TYPE)?;
    #[cfg(feature = "wgpu")]
    registries.deploy_cuda::<ElementwiseKernel<O>>(O::TYPE)?;
    #[cfg(not(feature = "wgpu"))]
    registries.deploy_cpu_cuda::<ElementwiseKernel<O>>(O::TYPE)?;
    Ok(())
}

/// Installs every built-in kernel into `registries`.
///
/// # Errors
///
/// [`OpError::DuplicateRegistration`](crate::error::OpError::DuplicateRegistration)
/// if one of the built-in types is already registered.
pub fn register_builtins(registries: &mut Registries) -> Result<()> {
    deploy_binary::<Add>(registries)?;
    deploy_binary::<Sub>(registries)?;
    deploy_binary::<Mul>(registries)?;
    deploy_binary::<Div>(registries)?;

    registries.deploy_cpu::<ReluKernel>("Relu")?;
    #[cfg(feature = "wgpu")]
    {
        registries.deploy_cuda::<ReluKernel>("Relu")?;
        registries.deploy_cudnn::<ReluKernel>("Relu")?;
    }
    #[cfg(not(feature = "wgpu"))]
    registries.deploy_cpu_cuda::<ReluKernel>("Relu")?;

    registries.deploy_cpu::<SoftmaxKernel>("Softmax")?;
    registries.deploy_cpu_cuda::<SoftmaxKernel>("Softmax")?;
    registries.deploy_cpu::<InnerProductKernel>("InnerProduct")?;
    registries.deploy_cpu_cuda::<InnerProductKernel>("InnerProduct")?;
    registries.deploy_cpu::<DropoutKernel>("Dropout")?;
    registries.deploy_cpu_cuda::<DropoutKernel>("Dropout")?;
    Ok(())
}
