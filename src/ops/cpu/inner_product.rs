use rayon::prelude::*;

use crate::context::CpuContext;
use crate::error::Result;
use crate::operator::{DeviceOperator, Kernel};
use crate::tensors::{self, TensorFloat};

/// Fully connected layer: `Y = X · Wᵀ + 1 · Bᵀ`.
///
/// `X` is flattened to `[M, K]` around `axis`. `W` is `[N, K]` when
/// `transW` is set (the default) and `[K, N]` otherwise. Weights and bias
/// are lazily initialized from their registered fillers on first run. A
/// bias input named `"ignore"` counts as no bias.
#[derive(Debug)]
pub struct InnerProductKernel {
    num_output: usize,
    axis: usize,
    trans_w: bool,
}

impl InnerProductKernel {
    /// Output features per row.
    pub fn num_output(&self) -> usize {
        self.num_output
    }
}

impl Kernel<CpuContext> for InnerProductKernel {
    fn new(op: &DeviceOperator<CpuContext>) -> Result<Self> {
        if !(2..=3).contains(&op.input_size()) || op.output_size() != 1 {
            return Err(op.kernel_error("InnerProduct expects X, W and an optional B, and 1 output"));
        }
        let num_output: usize = op.get_single_arg("num_output", 0)?;
        if num_output == 0 {
            return Err(op.kernel_error("`num_output` must be positive"));
        }
        Ok(Self {
            num_output,
            axis: op.get_single_arg("axis", 1)?,
            trans_w: op.get_single_arg("transW", true)?,
        })
    }

    fn run_on_device(&mut self, op: &mut DeviceOperator<CpuContext>) -> Result<()> {
        let x = op.input(0)?;
        let x_shape = op.input_shape(0)?;
        if self.axis > x_shape.len() {
            return Err(op.kernel_error(format!(
                "axis {} is out of range for a {}-d input",
                self.axis,
                x_shape.len()
            )));
        }
        let m: usize = x_shape[..self.axis].iter().product();
        let k: usize = x_shape[self.axis..].iter().product();
        let n = self.num_output;

        let w = op.input(1)?;
        let w_shape = if self.trans_w { [n, k] } else { [k, n] };
        op.tensor_fill(&w, &w_shape)?;

        let bias = match op.input_size() {
            3 => Some(op.input(2)?).filter(|b| !tensors::read(b).is_ignored()),
            _ => None,
        };
        let bias = match bias {
            Some(b) => {
                op.tensor_fill(&b, &[n])?;
                Some((b, op.init_multiplier(m)))
            }
            None => None,
        };

        let mut y = vec![0.0; m * n];
        {
            let x = tensors::read(&x);
            let w = tensors::read(&w);
            let (xd, wd) = (x.data(), w.data());
            let trans_w = self.trans_w;
            y.par_chunks_mut(n).enumerate().for_each(|(row, out)| {
                let xr = &xd[row * k..(row + 1) * k];
                for (col, acc) in out.iter_mut().enumerate() {
                    *acc = if trans_w {
                        xr.iter().zip(&wd[col * k..(col + 1) * k]).map(|(a, b)| a * b).sum()
                    } else {
                        xr.iter().enumerate().map(|(i, a)| a * wd[i * n + col]).sum()
                    };
                }
            });
        }
        if let Some((b, multiplier)) = bias {
            let b = tensors::read(&b);
            let ones = tensors::read(&multiplier);
            let (bd, od): (&[TensorFloat], &[TensorFloat]) = (b.data(), ones.data());
            y.par_chunks_mut(n).zip(od[..m].par_iter()).for_each(|(out, &one)| {
                for (acc, &bias) in out.iter_mut().zip(bd) {
                    *acc += one * bias;
                }
            });
        }

        let mut y_shape = x_shape[..self.axis].to_vec();
        y_shape.push(n);
        tensors::write(&op.output(0)?).assign(y_shape, y);
        Ok(())
    }
}
