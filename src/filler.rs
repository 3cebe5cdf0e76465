//! Named tensor initializers.
//!
//! A [`FillerDef`] is registered in the workspace under the name of the
//! tensor it initializes. Operators consult it the first time they meet that
//! tensor empty (see `OperatorBase::tensor_fill`), build a [`Filler`] with
//! [`create_filler`] and let it populate the freshly reshaped tensor.

use rand::distr::Uniform;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{OpError, Result};
use crate::tensors::{Tensor, TensorFloat};

/// Which fan the variance-scaling fillers normalize by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VarianceNorm {
    /// `count / shape[0]`.
    #[default]
    FanIn,
    /// `count / shape[1]`.
    FanOut,
    /// Mean of both fans.
    FanAvg,
}

/// The distribution a filler draws from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FillerKind {
    /// Every element equals `value`.
    Constant {
        /// Fill value.
        value: f32,
    },
    /// Uniform in `[low, high)`.
    Uniform {
        /// Inclusive lower bound.
        low: f32,
        /// Exclusive upper bound.
        high: f32,
    },
    /// Gaussian.
    Normal {
        /// Mean.
        mean: f32,
        /// Standard deviation.
        std: f32,
    },
    /// Gaussian restricted to `[low, high]` by rejection.
    TruncatedNormal {
        /// Mean.
        mean: f32,
        /// Standard deviation.
        std: f32,
        /// Lower bound.
        low: f32,
        /// Upper bound.
        high: f32,
    },
    /// Uniform in `±sqrt(3 * scale / fan)`.
    Xavier {
        /// Variance scale.
        scale: f32,
        /// Fan used as denominator.
        variance_norm: VarianceNorm,
    },
    /// Gaussian with `std = sqrt(2 * scale / fan)`.
    Msra {
        /// Variance scale.
        scale: f32,
        /// Fan used as denominator.
        variance_norm: VarianceNorm,
    },
}

/// A filler registered in the workspace for one tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillerDef {
    /// Name of the tensor this filler initializes.
    pub tensor: String,
    /// Distribution.
    pub kind: FillerKind,
    /// Fixed seed for reproducible random fills.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl FillerDef {
    /// Constant filler for `tensor`.
    pub fn constant(tensor: impl Into<String>, value: f32) -> Self {
        Self::new(tensor, FillerKind::Constant { value })
    }

    /// Filler of any kind for `tensor`.
    pub fn new(tensor: impl Into<String>, kind: FillerKind) -> Self {
        Self {
            tensor: tensor.into(),
            kind,
            seed: None,
        }
    }

    /// Fixes the random seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Populates a tensor that already has its target shape.
pub trait Filler {
    /// Overwrites every element of `tensor`.
    ///
    /// # Errors
    ///
    /// Fails when the filler parameters cannot describe a distribution.
    fn fill(&self, tensor: &mut Tensor) -> Result<()>;
}

/// Builds the filler described by `def`.
pub fn create_filler(def: &FillerDef) -> Box<dyn Filler> {
    match def.kind {
        FillerKind::Constant { value } => Box::new(ConstantFiller { value }),
        _ => Box::new(RandomFiller { def: def.clone() }),
    }
}

struct ConstantFiller {
    value: TensorFloat,
}

impl Filler for ConstantFiller {
    fn fill(&self, tensor: &mut Tensor) -> Result<()> {
        tensor.data_mut().fill(self.value);
        Ok(())
    }
}

struct RandomFiller {
    def: FillerDef,
}

impl RandomFiller {
    fn invalid(&self, reason: impl ToString) -> OpError {
        OpError::InvalidFiller {
            tensor: self.def.tensor.clone(),
            reason: reason.to_string(),
        }
    }

    fn rng(&self) -> StdRng {
        match self.def.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        }
    }

    fn normal(&self, mean: f32, std: f32) -> Result<Normal<f32>> {
        if !(std.is_finite() && std >= 0.0) {
            return Err(self.invalid(format!("std must be finite and non-negative, got {std}")));
        }
        Normal::new(mean, std).map_err(|e| self.invalid(e))
    }

    /// `factor * scale / fan`, the variance of the fan-scaled fillers.
    fn scaled_variance(&self, shape: &[usize], factor: f32, scale: f32, norm: VarianceNorm) -> Result<f32> {
        if !(scale.is_finite() && scale >= 0.0) {
            return Err(self.invalid(format!("scale must be finite and non-negative, got {scale}")));
        }
        let fan = fan(shape, norm);
        if !(fan.is_finite() && fan > 0.0) {
            return Err(self.invalid(format!("{norm:?} of shape {shape:?} is zero")));
        }
        Ok(factor * scale / fan)
    }
}

/// Draws allowed per element before a truncated normal gives up.
const MAX_REJECTIONS: usize = 1000;

#[allow(clippy::cast_precision_loss)]
fn fan(shape: &[usize], norm: VarianceNorm) -> f32 {
    let count: usize = shape.iter().product();
    let fan_in = count / shape.first().copied().unwrap_or(1).max(1);
    let fan_out = if shape.len() > 1 {
        count / shape[1].max(1)
    } else {
        count
    };
    match norm {
        VarianceNorm::FanIn => fan_in as f32,
        VarianceNorm::FanOut => fan_out as f32,
        VarianceNorm::FanAvg => (fan_in + fan_out) as f32 / 2.0,
    }
}

impl Filler for RandomFiller {
    fn fill(&self, tensor: &mut Tensor) -> Result<()> {
        let mut rng = self.rng();
        match self.def.kind {
            FillerKind::Constant { value } => tensor.data_mut().fill(value),
            FillerKind::Uniform { low, high } => {
                let dist = Uniform::new(low, high).map_err(|e| self.invalid(e))?;
                tensor.data_mut().iter_mut().for_each(|x| *x = dist.sample(&mut rng));
            }
            FillerKind::Normal { mean, std } => {
                let dist = self.normal(mean, std)?;
                tensor.data_mut().iter_mut().for_each(|x| *x = dist.sample(&mut rng));
            }
            FillerKind::TruncatedNormal { mean, std, low, high } => {
                if low.is_nan() || high.is_nan() || low >= high {
                    return Err(self.invalid(format!("empty truncation range [{low}, {high}]")));
                }
                let dist = self.normal(mean, std)?;
                for x in tensor.data_mut() {
                    *x = std::iter::repeat_with(|| dist.sample(&mut rng))
                        .take(MAX_REJECTIONS)
                        .find(|v| (low..=high).contains(v))
                        .ok_or_else(|| {
                            self.invalid(format!(
                                "N({mean}, {std}) rarely falls in [{low}, {high}]"
                            ))
                        })?;
                }
            }
            FillerKind::Xavier { scale, variance_norm } => {
                let bound = self
                    .scaled_variance(tensor.shape(), 3.0, scale, variance_norm)?
                    .sqrt();
                tensor
                    .data_mut()
                    .iter_mut()
                    .for_each(|x| *x = rng.random_range(-bound..=bound));
            }
            FillerKind::Msra { scale, variance_norm } => {
                let std = self
                    .scaled_variance(tensor.shape(), 2.0, scale, variance_norm)?
                    .sqrt();
                let dist = self.normal(0.0, std)?;
                tensor.data_mut().iter_mut().for_each(|x| *x = dist.sample(&mut rng));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(def: &FillerDef, shape: Vec<usize>) -> Result<Tensor> {
        let mut tensor = Tensor::empty(def.tensor.clone());
        tensor.reshape(shape);
        create_filler(def).fill(&mut tensor)?;
        Ok(tensor)
    }

    #[test]
    fn constant_fills_every_element() {
        let t = filled(&FillerDef::constant("w", 0.5), vec![2, 3]).unwrap();
        assert!(t.data().iter().all(|&x| x == 0.5));
    }

    #[test]
    fn uniform_respects_bounds() {
        let def = FillerDef::new("w", FillerKind::Uniform { low: -0.1, high: 0.1 }).with_seed(7);
        let t = filled(&def, vec![64]).unwrap();
        assert!(t.data().iter().all(|&x| (-0.1..0.1).contains(&x)));
    }

    #[test]
    fn seeded_fill_is_reproducible() {
        let def = FillerDef::new("w", FillerKind::Normal { mean: 0.0, std: 1.0 }).with_seed(42);
        let a = filled(&def, vec![16]).unwrap();
        let b = filled(&def, vec![16]).unwrap();
        assert_eq!(a.data(), b.data());
    }

    #[test]
    fn truncated_normal_stays_in_range() {
        let def = FillerDef::new(
            "w",
            FillerKind::TruncatedNormal { mean: 0.0, std: 1.0, low: -0.5, high: 0.5 },
        )
        .with_seed(3);
        let t = filled(&def, vec![128]).unwrap();
        assert!(t.data().iter().all(|&x| (-0.5..=0.5).contains(&x)));
    }

    #[test]
    fn xavier_bound_follows_fan_in() {
        let def = FillerDef::new(
            "w",
            FillerKind::Xavier { scale: 1.0, variance_norm: VarianceNorm::FanIn },
        )
        .with_seed(1);
        let t = filled(&def, vec![4, 3]).unwrap();
        let bound = 1.0f32;
        assert!(t.data().iter().all(|&x| x.abs() <= bound));
    }

    #[test]
    fn negative_std_is_rejected() {
        let def = FillerDef::new("w", FillerKind::Normal { mean: 0.0, std: -1.0 });
        assert!(matches!(filled(&def, vec![2]), Err(OpError::InvalidFiller { .. })));
    }

    #[test]
    fn negative_scale_is_rejected() {
        for kind in [
            FillerKind::Xavier { scale: -1.0, variance_norm: VarianceNorm::FanIn },
            FillerKind::Msra { scale: -1.0, variance_norm: VarianceNorm::FanOut },
        ] {
            let def = FillerDef::new("w", kind);
            assert!(matches!(filled(&def, vec![2, 2]), Err(OpError::InvalidFiller { .. })));
        }
    }

    #[test]
    fn zero_fan_is_rejected() {
        let def = FillerDef::new(
            "w",
            FillerKind::Msra { scale: 1.0, variance_norm: VarianceNorm::FanIn },
        );
        assert!(matches!(filled(&def, vec![3, 0]), Err(OpError::InvalidFiller { .. })));
    }

    #[test]
    fn unreachable_truncation_range_gives_up() {
        let def = FillerDef::new(
            "w",
            FillerKind::TruncatedNormal { mean: 0.0, std: 1.0, low: 50.0, high: 60.0 },
        )
        .with_seed(9);
        let err = filled(&def, vec![4]).unwrap_err();
        assert!(matches!(err, OpError::InvalidFiller { ref tensor, .. } if tensor == "w"));
    }
}
