//! Device implementations of the host kernels.
//!
//! The GPU variants reuse the host kernel types so each operator type keeps
//! a single set of parsed arguments; only `run_on_device` differs.

use crate::backend::DeviceType;
use crate::context::{Context, CudaContext, CudnnContext};
use crate::error::{OpError, Result};
use crate::operator::{DeviceOperator, Kernel};
use crate::ops::cpu::{BinaryOp, ElementwiseKernel, ReluKernel, check_operands};
use crate::tensors::{self, TensorFloat};

use super::{GpuError, GpuRuntime};

fn device_failure(device: DeviceType) -> impl FnOnce(GpuError) -> OpError {
    move |err| OpError::DeviceFailure {
        device,
        message: err.to_string(),
    }
}

fn launch_binary<C: Context, O: BinaryOp>(runtime: &GpuRuntime, op: &DeviceOperator<C>) -> Result<()> {
    let (a, b) = (op.input(0)?, op.input(1)?);
    let (shape, y) = {
        let a = tensors::read(&a);
        let b = tensors::read(&b);
        check_operands(op, a.count(), b.count())?;
        let y: Vec<TensorFloat> = runtime
            .binary(O::CODE, a.data(), b.data())
            .map_err(device_failure(op.ctx().option().device_type))?;
        (a.shape().to_vec(), y)
    };
    tensors::write(&op.output(0)?).assign(shape, y);
    Ok(())
}

fn launch_relu<C: Context>(runtime: &GpuRuntime, op: &DeviceOperator<C>, slope: TensorFloat) -> Result<()> {
    let (shape, y) = {
        let x = op.input(0)?;
        let x = tensors::read(&x);
        let y = runtime
            .relu(x.data(), slope)
            .map_err(device_failure(op.ctx().option().device_type))?;
        (x.shape().to_vec(), y)
    };
    tensors::write(&op.output(0)?).assign(shape, y);
    Ok(())
}

impl<O: BinaryOp> Kernel<CudaContext> for ElementwiseKernel<O> {
    fn new(op: &DeviceOperator<CudaContext>) -> Result<Self> {
        Self::parse(op)
    }

    fn run_on_device(&mut self, op: &mut DeviceOperator<CudaContext>) -> Result<()> {
        launch_binary::<_, O>(op.ctx().runtime(), op)
    }
}

impl Kernel<CudaContext> for ReluKernel {
    fn new(op: &DeviceOperator<CudaContext>) -> Result<Self> {
        Self::parse(op)
    }

    fn run_on_device(&mut self, op: &mut DeviceOperator<CudaContext>) -> Result<()> {
        launch_relu(op.ctx().runtime(), op, self.slope())
    }
}

impl Kernel<CudnnContext> for ReluKernel {
    fn new(op: &DeviceOperator<CudnnContext>) -> Result<Self> {
        Self::parse(op)
    }

    fn run_on_device(&mut self, op: &mut DeviceOperator<CudnnContext>) -> Result<()> {
        launch_relu(op.ctx().handle(), op, self.slope())
    }
}
