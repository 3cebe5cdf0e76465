//! The process-scoped store that owns tensors and fillers by name.
//!
//! Operators borrow [`TensorRef`] handles from the workspace at construction
//! and resolve nothing else by name afterwards. The workspace keeps the only
//! long-lived map from names to tensors; dropping it drops every tensor no
//! operator still holds.
//!
//! Besides named tensors it keeps a small pool of anonymous scratch buffers
//! that kernels borrow in `share_before_run` and give back in
//! `clear_after_run`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::debug;

use crate::error::{OpError, Result};
use crate::filler::FillerDef;
use crate::tensors::{self, IGNORE, Tensor, TensorFloat, TensorRef};

/// Prefix of the pooled scratch buffers.
pub const BUFFER_PREFIX: &str = "_t_buffer_";

/// Named tensor and filler store shared by every operator of a graph.
#[derive(Debug)]
pub struct Workspace {
    name: String,
    tensors: RwLock<HashMap<String, TensorRef>>,
    fillers: RwLock<HashMap<String, FillerDef>>,
    free_buffers: Mutex<Vec<TensorRef>>,
    buffer_count: Mutex<usize>,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new("default")
    }
}

impl Workspace {
    /// Creates a workspace holding only the `"ignore"` sentinel.
    pub fn new(name: impl Into<String>) -> Self {
        let ws = Self {
            name: name.into(),
            tensors: RwLock::new(HashMap::new()),
            fillers: RwLock::new(HashMap::new()),
            free_buffers: Mutex::new(Vec::new()),
            buffer_count: Mutex::new(0),
        };
        ws.create_tensor(IGNORE);
        ws
    }

    /// Workspace name, used in diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the tensor called `name`, creating an empty one if needed.
    pub fn create_tensor(&self, name: &str) -> TensorRef {
        if let Some(tensor) = self.get_tensor(name) {
            return tensor;
        }
        let mut map = self.tensors.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            map.entry(name.to_owned())
                .or_insert_with(|| tensors::share(Tensor::empty(name))),
        )
    }

    /// Looks up an existing tensor.
    pub fn get_tensor(&self, name: &str) -> Option<TensorRef> {
        let map = self.tensors.read().unwrap_or_else(PoisonError::into_inner);
        map.get(name).map(Arc::clone)
    }

    /// Whether a tensor called `name` exists.
    pub fn has_tensor(&self, name: &str) -> bool {
        let map = self.tensors.read().unwrap_or_else(PoisonError::into_inner);
        map.contains_key(name)
    }

    /// Names of every tensor, sorted.
    pub fn tensor_names(&self) -> Vec<String> {
        let map = self.tensors.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = map.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Writes `data` laid out as `shape` into the tensor called `name`,
    /// creating it if needed.
    ///
    /// # Errors
    ///
    /// [`OpError::ShapeMismatch`] if `data` does not hold `∏shape` elements.
    pub fn feed_tensor(&self, name: &str, shape: &[usize], data: Vec<TensorFloat>) -> Result<TensorRef> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(OpError::ShapeMismatch {
                tensor: name.to_owned(),
                expected,
                actual: data.len(),
            });
        }
        let tensor = self.create_tensor(name);
        tensors::write(&tensor).assign(shape.to_vec(), data);
        Ok(tensor)
    }

    /// Copies the data of the tensor called `name`.
    pub fn fetch_tensor(&self, name: &str) -> Option<Vec<TensorFloat>> {
        self.get_tensor(name).map(|t| tensors::read(&t).data().to_vec())
    }

    /// Registers a filler for the tensor named in `def`, replacing any
    /// previous one, and returns that tensor. The tensor is created empty
    /// when missing so operators can list it as an input before it is filled.
    pub fn create_filler(&self, def: FillerDef) -> TensorRef {
        debug!(workspace = %self.name, tensor = %def.tensor, kind = ?def.kind, "registering filler");
        let tensor = self.create_tensor(&def.tensor);
        let mut map = self.fillers.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(def.tensor.clone(), def);
        tensor
    }

    /// The filler registered for `name`, if any.
    pub fn get_filler(&self, name: &str) -> Option<FillerDef> {
        let map = self.fillers.read().unwrap_or_else(PoisonError::into_inner);
        map.get(name).cloned()
    }

    /// Borrows a scratch buffer, creating a new one when the pool is empty.
    pub fn get_buffer(&self) -> TensorRef {
        let mut free = self.free_buffers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(buffer) = free.pop() {
            return buffer;
        }
        let mut count = self.buffer_count.lock().unwrap_or_else(PoisonError::into_inner);
        let name = format!("{BUFFER_PREFIX}{count}");
        *count += 1;
        self.create_tensor(&name)
    }

    /// Returns a scratch buffer to the pool.
    pub fn release_buffer(&self, buffer: TensorRef) {
        let mut free = self.free_buffers.lock().unwrap_or_else(PoisonError::into_inner);
        if !free.iter().any(|b| Arc::ptr_eq(b, &buffer)) {
            free.push(buffer);
        }
    }

    /// Number of scratch buffers currently in the pool.
    pub fn free_buffer_count(&self) -> usize {
        self.free_buffers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
