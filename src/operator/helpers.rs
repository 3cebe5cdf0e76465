use tracing::debug;

use crate::error::{OpError, Result};
use crate::filler::{FillerDef, create_filler};
use crate::tensors::{self, TensorRef};

use super::OperatorBase;

/// Name of the shared ones-vector in the workspace.
pub const MULTIPLIER: &str = "_t_multiplier";

impl OperatorBase {
    /// Gives `tensor` the shape `shape`, initializing it on first use.
    ///
    /// An empty tensor is populated by the filler registered under its name.
    /// A non-empty tensor keeps its data and must already hold exactly
    /// `∏shape` elements.
    ///
    /// # Errors
    ///
    /// [`OpError::MissingFiller`] when an empty tensor has no filler,
    /// [`OpError::ShapeMismatch`] when the element counts disagree, or the
    /// filler's own failure.
    pub fn tensor_fill(&self, tensor: &TensorRef, shape: &[usize]) -> Result<()> {
        let mut guard = tensors::write(tensor);
        let expected: usize = shape.iter().product();

        if guard.count() == 0 {
            let def: FillerDef = self.ws().get_filler(guard.name()).ok_or_else(|| OpError::MissingFiller {
                tensor: guard.name().to_owned(),
            })?;
            debug!(op = %self.name(), tensor = %guard.name(), shape = ?shape, kind = ?def.kind, "filling tensor");
            guard.reshape(shape);
            let filled = create_filler(&def).fill(&mut guard);
            if filled.is_err() {
                guard.reshape([0]);
            }
            return filled;
        }

        if guard.count() != expected {
            return Err(OpError::ShapeMismatch {
                tensor: guard.name().to_owned(),
                expected,
                actual: guard.count(),
            });
        }
        guard.reshape(shape);
        Ok(())
    }

    /// Returns the workspace ones-vector, grown to at least `size` elements.
    ///
    /// The vector never shrinks; callers read its first `size` elements.
    pub fn init_multiplier(&self, size: usize) -> TensorRef {
        let multiplier = self.ws().create_tensor(MULTIPLIER);
        {
            let mut guard = tensors::write(&multiplier);
            if guard.count() < size {
                guard.reshape([size]);
                guard.data_mut().fill(1.0);
            }
        }
        multiplier
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::proto::OperatorDef;
    use crate::workspace::Workspace;

    use super::*;

    fn base(ws: &Arc<Workspace>) -> OperatorBase {
        OperatorBase::new(OperatorDef::new("InnerProduct", "fc"), Arc::clone(ws)).unwrap()
    }

    #[test]
    fn nonempty_tensor_is_reshaped_in_place() {
        let ws = Arc::new(Workspace::default());
        let w = ws.feed_tensor("w", &[6], (0..6).map(|x| x as f32).collect()).unwrap();
        base(&ws).tensor_fill(&w, &[2, 3]).unwrap();
        let guard = tensors::read(&w);
        assert_eq!(guard.shape(), &[2, 3]);
        assert_eq!(guard.data()[5], 5.0);
    }

    #[test]
    fn empty_tensor_without_filler_fails() {
        let ws = Arc::new(Workspace::default());
        let w = ws.create_tensor("w");
        let err = base(&ws).tensor_fill(&w, &[2]).unwrap_err();
        assert!(matches!(err, OpError::MissingFiller { ref tensor } if tensor == "w"));
        assert_eq!(tensors::read(&w).count(), 0);
    }

    #[test]
    fn multiplier_grows_but_never_shrinks() {
        let ws = Arc::new(Workspace::default());
        let op = base(&ws);
        let m = op.init_multiplier(3);
        assert_eq!(tensors::read(&m).data(), &[1.0, 1.0, 1.0]);
        let again = op.init_multiplier(1);
        assert!(Arc::ptr_eq(&m, &again));
        assert_eq!(tensors::read(&m).count(), 3);
    }
}
