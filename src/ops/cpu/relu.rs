use rayon::prelude::*;

use crate::context::{Context, CpuContext};
use crate::error::Result;
use crate::operator::{DeviceOperator, Kernel};
use crate::tensors::{self, TensorFloat};

/// Leaky rectifier: `y = x > 0 ? x : slope * x`.
#[derive(Debug)]
pub struct ReluKernel {
    slope: TensorFloat,
}

impl ReluKernel {
    /// Reads `slope` (default `0`) and checks the 1-in / 1-out arity.
    pub(crate) fn parse<C: Context>(op: &DeviceOperator<C>) -> Result<Self> {
        if op.input_size() != 1 || op.output_size() != 1 {
            return Err(op.kernel_error("Relu expects 1 input and 1 output"));
        }
        Ok(Self {
            slope: op.get_single_arg("slope", 0.0)?,
        })
    }

    /// Negative-side slope.
    pub fn slope(&self) -> TensorFloat {
        self.slope
    }
}

impl Kernel<CpuContext> for ReluKernel {
    fn new(op: &DeviceOperator<CpuContext>) -> Result<Self> {
        Self::parse(op)
    }

    fn run_on_device(&mut self, op: &mut DeviceOperator<CpuContext>) -> Result<()> {
        let slope = self.slope;
        let (shape, y) = {
            let x = op.input(0)?;
            let x = tensors::read(&x);
            let y: Vec<TensorFloat> = x
                .data()
                .par_iter()
                .map(|&v| if v > 0.0 { v } else { slope * v })
                .collect();
            (x.shape().to_vec(), y)
        };
        tensors::write(&op.output(0)?).assign(shape, y);
        Ok(())
    }
}
