//! Named tensors stored in a [`Workspace`](crate::workspace::Workspace).
//!
//! # Core Tensor Utilities
//!
//! A [`Tensor`] is a named, row-major buffer of [`TensorFloat`] values with a
//! shape and a placement. Operators never own tensors: they hold
//! [`TensorRef`] handles into the workspace map.
//!
//! ## Design Highlights
//! - `count()` is the product of the shape, `0` for a freshly created tensor
//! - `reshape` grows or shrinks the storage to match the new shape
//! - `switch_to_device` moves the placement tag; host data stays canonical
//! - The name `"ignore"` is reserved for outputs the caller does not want
//!
//! ## Example
//!
//! ```rust
//! use opcore::tensors::Tensor;
//! let t = Tensor::from_data("w", vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! assert_eq!(t.count(), 6);
//! ```

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::backend::Device;

/// The float stored in tensors (`f32`).
pub type TensorFloat = f32;

/// Name of the sentinel tensor meaning "omit from this invocation".
pub const IGNORE: &str = "ignore";

/// Shared handle to a workspace-owned tensor.
pub type TensorRef = Arc<RwLock<Tensor>>;

/// Represents a named N-dimensional tensor with flat row-major data.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    name: String,
    shape: Vec<usize>,
    data: Vec<TensorFloat>,
    device: Device,
}

impl Tensor {
    /// Creates an empty tensor (`count() == 0`) on the host.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shape: vec![0],
            data: Vec::new(),
            device: Device::Cpu,
        }
    }

    /// Creates a tensor holding `data` laid out as `shape`.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape product.
    pub fn from_data(name: impl Into<String>, shape: impl Into<Vec<usize>>, data: Vec<TensorFloat>) -> Self {
        let shape = shape.into();
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "shape {:?} is incompatible with {} data elements",
            shape,
            data.len()
        );
        Self {
            name: name.into(),
            shape,
            data,
            device: Device::Cpu,
        }
    }

    /// The workspace key of this tensor.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this is the `"ignore"` sentinel.
    pub fn is_ignored(&self) -> bool {
        self.name == IGNORE
    }

    /// Dimensions, row-major.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of elements.
    pub fn count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Element count of the dimensions in `[start, end)`, clamped to the rank.
    pub fn count_range(&self, start: usize, end: usize) -> usize {
        let end = end.min(self.shape.len());
        self.shape[start.min(end)..end].iter().product()
    }

    /// Read-only view of the data.
    pub fn data(&self) -> &[TensorFloat] {
        &self.data
    }

    /// Mutable view of the data.
    pub fn data_mut(&mut self) -> &mut [TensorFloat] {
        &mut self.data
    }

    /// Changes the shape, zero-extending or truncating storage to match.
    pub fn reshape(&mut self, shape: impl Into<Vec<usize>>) {
        self.shape = shape.into();
        let count = self.count();
        self.data.resize(count, 0.0);
    }

    /// Replaces shape and data at once.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape product.
    pub fn assign(&mut self, shape: impl Into<Vec<usize>>, data: Vec<TensorFloat>) {
        let shape = shape.into();
        assert_eq!(shape.iter().product::<usize>(), data.len(), "shape/data mismatch");
        self.shape = shape;
        self.data = data;
    }

    /// Current placement.
    pub fn device(&self) -> Device {
        self.device
    }

    /// Migrates storage to `device`. A no-op when already there.
    pub fn switch_to_device(&mut self, device: Device) {
        if self.device != device {
            tracing::trace!(tensor = %self.name, from = %self.device, to = %device, "migrating tensor");
            self.device = device;
        }
    }
}

/// Wraps a tensor into a fresh handle.
pub fn share(tensor: Tensor) -> TensorRef {
    Arc::new(RwLock::new(tensor))
}

/// Read-locks a handle. A poisoned lock still yields the tensor: the panic
/// that poisoned it is reported by whoever caused it.
pub fn read(tensor: &TensorRef) -> RwLockReadGuard<'_, Tensor> {
    tensor.read().unwrap_or_else(PoisonError::into_inner)
}

/// Write-locks a handle, see [`read`].
pub fn write(tensor: &TensorRef) -> RwLockWriteGuard<'_, Tensor> {
    tensor.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tensor_has_zero_count() {
        let t = Tensor::empty("w");
        assert_eq!(t.count(), 0);
        assert_eq!(t.device(), Device::Cpu);
    }

    #[test]
    fn reshape_keeps_existing_prefix() {
        let mut t = Tensor::from_data("w", vec![2], vec![1.0, 2.0]);
        t.reshape(vec![2, 2]);
        assert_eq!(t.data(), &[1.0, 2.0, 0.0, 0.0]);
        t.reshape(vec![1]);
        assert_eq!(t.data(), &[1.0]);
    }

    #[test]
    fn mismatched_data_panics() {
        let result = std::panic::catch_unwind(|| Tensor::from_data("x", vec![2, 2], vec![1.0, 2.0, 3.0]));
        assert!(result.is_err());
    }

    #[test]
    fn count_range_multiplies_sub_shape() {
        let t = Tensor::from_data("x", vec![2, 3, 4], vec![0.0; 24]);
        assert_eq!(t.count_range(0, 1), 2);
        assert_eq!(t.count_range(1, 3), 12);
        assert_eq!(t.count_range(3, 3), 1);
        assert_eq!(t.count_range(4, 5), 1);
        assert_eq!(t.count_range(1, 9), 12);
    }
}
