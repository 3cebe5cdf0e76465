use rand::Rng;
use rayon::prelude::*;

use crate::context::CpuContext;
use crate::error::Result;
use crate::operator::{DeviceOperator, Kernel, Phase};
use crate::tensors::{self, TensorFloat};

/// Inverted dropout.
///
/// In [`Phase::Train`] each element is kept with probability `1 - prob`
/// and, when `scale` is set, rescaled by `1 / (1 - prob)`. The keep mask is
/// stored in the workspace as `/mnt/<anchor>/dropout/mask`. In
/// [`Phase::Test`] the input passes through unchanged when `scale` is set,
/// and is multiplied by `1 - prob` otherwise.
#[derive(Debug)]
pub struct DropoutKernel {
    prob: f32,
    scale: bool,
    mask: String,
}

impl DropoutKernel {
    /// Drop probability.
    pub fn prob(&self) -> f32 {
        self.prob
    }

    /// Workspace name of the keep mask.
    pub fn mask_name(&self) -> &str {
        &self.mask
    }
}

impl Kernel<CpuContext> for DropoutKernel {
    fn new(op: &DeviceOperator<CpuContext>) -> Result<Self> {
        if op.input_size() != 1 || op.output_size() != 1 {
            return Err(op.kernel_error("Dropout expects 1 input and 1 output"));
        }
        let prob: f32 = op.get_single_arg("prob", 0.5)?;
        if !(0.0..1.0).contains(&prob) {
            return Err(op.kernel_error(format!("`prob` must lie in [0, 1), got {prob}")));
        }
        let anchor: String = op.get_single_arg("anchor", op.name().to_owned())?;
        Ok(Self {
            prob,
            scale: op.get_single_arg("scale", true)?,
            mask: format!("/mnt/{anchor}/dropout/mask"),
        })
    }

    fn run_on_device(&mut self, op: &mut DeviceOperator<CpuContext>) -> Result<()> {
        let keep = 1.0 - self.prob;
        let (shape, mut y) = {
            let x = op.input(0)?;
            let x = tensors::read(&x);
            (x.shape().to_vec(), x.data().to_vec())
        };

        match op.phase() {
            Phase::Test => {
                if !self.scale {
                    y.par_iter_mut().for_each(|v| *v *= keep);
                }
            }
            Phase::Train => {
                let mut rng = rand::rng();
                let mask: Vec<TensorFloat> = (0..y.len())
                    .map(|_| if rng.random_bool(f64::from(keep)) { 1.0 } else { 0.0 })
                    .collect();
                let factor = if self.scale { 1.0 / keep } else { 1.0 };
                y.par_iter_mut().zip(mask.par_iter()).for_each(|(v, &m)| *v *= m * factor);
                let mask_tensor = op.ws().create_tensor(&self.mask);
                tensors::write(&mask_tensor).assign(shape.clone(), mask);
            }
        }

        tensors::write(&op.output(0)?).assign(shape, y);
        Ok(())
    }
}
