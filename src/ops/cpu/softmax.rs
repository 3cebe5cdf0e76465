use std::sync::RwLockWriteGuard;

use rayon::prelude::*;

use crate::context::CpuContext;
use crate::error::Result;
use crate::operator::{DeviceOperator, Kernel};
use crate::tensors::{self, Tensor, TensorFloat, TensorRef};

/// Numerically stable softmax along `axis` (default `1`, negative values
/// count from the last dimension).
///
/// The per-row maxima and sums live in a scratch buffer borrowed from the
/// workspace pool in `share_before_run` and returned in `clear_after_run`.
/// In debug mode both hooks are skipped and the kernel allocates locally.
#[derive(Debug)]
pub struct SoftmaxKernel {
    axis: i64,
    scratch: Option<TensorRef>,
}

impl SoftmaxKernel {
    /// Softmax axis.
    pub fn axis(&self) -> i64 {
        self.axis
    }

    fn resolve_axis(&self, ndim: usize) -> Option<usize> {
        let rank = i64::try_from(ndim).ok()?;
        let axis = if self.axis < 0 { self.axis + rank } else { self.axis };
        usize::try_from(axis).ok().filter(|&a| a < ndim)
    }
}

fn softmax_blocks(data: &mut [TensorFloat], stats: &mut [TensorFloat], dim: usize, inner: usize) {
    data.par_chunks_mut(dim * inner)
        .zip(stats.par_chunks_mut(inner))
        .for_each(|(block, stat)| {
            stat.copy_from_slice(&block[..inner]);
            for row in block.chunks(inner).skip(1) {
                for (m, &v) in stat.iter_mut().zip(row) {
                    *m = m.max(v);
                }
            }
            for row in block.chunks_mut(inner) {
                for (v, &m) in row.iter_mut().zip(stat.iter()) {
                    *v = (*v - m).exp();
                }
            }
            stat.fill(0.0);
            for row in block.chunks(inner) {
                for (s, &v) in stat.iter_mut().zip(row) {
                    *s += v;
                }
            }
            for row in block.chunks_mut(inner) {
                for (v, &s) in row.iter_mut().zip(stat.iter()) {
                    *v /= s;
                }
            }
        });
}

impl Kernel<CpuContext> for SoftmaxKernel {
    fn new(op: &DeviceOperator<CpuContext>) -> Result<Self> {
        if op.input_size() != 1 || op.output_size() != 1 {
            return Err(op.kernel_error("Softmax expects 1 input and 1 output"));
        }
        Ok(Self {
            axis: op.get_single_arg("axis", 1)?,
            scratch: None,
        })
    }

    fn share_before_run(&mut self, op: &mut DeviceOperator<CpuContext>) -> Result<()> {
        // a failed run skips clear_after_run and leaves the buffer here
        if self.scratch.is_none() {
            self.scratch = Some(op.ws().get_buffer());
        }
        Ok(())
    }

    fn run_on_device(&mut self, op: &mut DeviceOperator<CpuContext>) -> Result<()> {
        let (shape, outer, inner, mut y) = {
            let x = op.input(0)?;
            let x = tensors::read(&x);
            let Some(axis) = self.resolve_axis(x.ndim()) else {
                return Err(op.kernel_error(format!(
                    "axis {} is out of range for a {}-d input",
                    self.axis,
                    x.ndim()
                )));
            };
            let outer = x.count_range(0, axis);
            let inner = x.count_range(axis + 1, x.ndim());
            (x.shape().to_vec(), outer, inner, x.data().to_vec())
        };
        let dim = y.len() / (outer * inner).max(1);

        if !y.is_empty() {
            let mut pooled: RwLockWriteGuard<'_, Tensor>;
            let mut local: Vec<TensorFloat>;
            let stats: &mut [TensorFloat] = match &self.scratch {
                Some(buffer) => {
                    pooled = tensors::write(buffer);
                    pooled.reshape([outer * inner]);
                    pooled.data_mut()
                }
                None => {
                    local = vec![0.0; outer * inner];
                    &mut local
                }
            };
            softmax_blocks(&mut y, stats, dim, inner);
        }

        tensors::write(&op.output(0)?).assign(shape, y);
        Ok(())
    }

    fn clear_after_run(&mut self, op: &mut DeviceOperator<CpuContext>) -> Result<()> {
        if let Some(buffer) = self.scratch.take() {
            op.ws().release_buffer(buffer);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_sum_to_one_along_the_middle_axis() {
        // shape [1, 3, 2]: softmax over 3 with inner stride 2
        let mut data = vec![1.0, 0.0, 2.0, 0.0, 3.0, 0.0];
        let mut stats = vec![0.0; 2];
        softmax_blocks(&mut data, &mut stats, 3, 2);
        let first: f32 = [data[0], data[2], data[4]].iter().sum();
        assert!((first - 1.0).abs() < 1e-6);
        assert!((data[1] - 1.0 / 3.0).abs() < 1e-6);
        assert!(data[4] > data[2] && data[2] > data[0]);
    }

    #[test]
    fn negative_axis_counts_from_the_end() {
        let kernel = SoftmaxKernel { axis: -1, scratch: None };
        assert_eq!(kernel.resolve_axis(3), Some(2));
        let kernel = SoftmaxKernel { axis: -4, scratch: None };
        assert_eq!(kernel.resolve_axis(3), None);
        let kernel = SoftmaxKernel { axis: 3, scratch: None };
        assert_eq!(kernel.resolve_axis(3), None);
    }
}
