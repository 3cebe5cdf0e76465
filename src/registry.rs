//! Per-device operator catalogs.
//!
//! Three registries exist, one per [`DeviceType`]: `CPUOperatorRegistry`,
//! `CUDAOperatorRegistry` and `CUDNNOperatorRegistry`. Each maps an operator
//! type name to an [`OperatorFactory`] that builds a fresh operator from a
//! descriptor and a workspace.
//!
//! The process-wide [`Registries`] are built lazily on first use: the
//! built-in kernels are installed by [`register_builtin_operators`], and
//! applications add their own with [`register_operator`] before dispatching.
//! Keys are unique per registry; registering one twice is an error.
//!
//! # Example
//!
//! ```
//! use opcore::backend::DeviceType;
//! use opcore::registry;
//!
//! assert!(registry::registered_types(DeviceType::Cpu).contains(&"Add".to_string()));
//! ```

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::backend::DeviceType;
use crate::context::{Context, CpuContext, CudaContext, CudnnContext};
use crate::error::{OpError, Result};
use crate::operator::{Kernel, KernelOp, Operator};
use crate::proto::OperatorDef;
use crate::workspace::Workspace;

/// Builds an operator from a descriptor bound to a workspace.
pub type OperatorFactory = fn(&OperatorDef, &Arc<Workspace>) -> Result<Box<dyn Operator>>;

/// Factory instantiating `K` on context `C`.
pub fn kernel_factory<C: Context, K: Kernel<C>>(def: &OperatorDef, ws: &Arc<Workspace>) -> Result<Box<dyn Operator>> {
    Ok(Box::new(KernelOp::<C, K>::new(def.clone(), Arc::clone(ws))?))
}

/// A `type -> factory` table for one device backend.
#[derive(Debug)]
pub struct OperatorRegistry {
    name: &'static str,
    factories: HashMap<String, OperatorFactory>,
}

impl OperatorRegistry {
    /// Empty registry called `name`.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            factories: HashMap::new(),
        }
    }

    /// Registry name used in diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Installs `factory` under `op_type`.
    ///
    /// # Errors
    ///
    /// [`OpError::DuplicateRegistration`] if `op_type` is already present.
    pub fn register(&mut self, op_type: impl Into<String>, factory: OperatorFactory) -> Result<()> {
        let op_type = op_type.into();
        if self.factories.contains_key(&op_type) {
            return Err(OpError::DuplicateRegistration {
                op_type,
                registry: self.name,
            });
        }
        debug!(registry = self.name, op_type = %op_type, "registering operator");
        self.factories.insert(op_type, factory);
        Ok(())
    }

    /// Whether `op_type` is registered.
    pub fn has(&self, op_type: &str) -> bool {
        self.factories.contains_key(op_type)
    }

    /// Registered type names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.factories.keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Instantiates the operator registered under `def.op_type`.
    ///
    /// # Errors
    ///
    /// [`OpError::UnknownOperator`] naming this registry, or the factory's
    /// own failure.
    pub fn create(&self, def: &OperatorDef, ws: &Arc<Workspace>) -> Result<Box<dyn Operator>> {
        let factory = self
            .factories
            .get(&def.op_type)
            .ok_or_else(|| OpError::UnknownOperator {
                op_type: def.op_type.clone(),
                registry: self.name,
            })?;
        factory(def, ws)
    }
}

/// The three per-device registries.
#[derive(Debug)]
pub struct Registries {
    /// `CPUOperatorRegistry`.
    pub cpu: OperatorRegistry,
    /// `CUDAOperatorRegistry`.
    pub cuda: OperatorRegistry,
    /// `CUDNNOperatorRegistry`.
    pub cudnn: OperatorRegistry,
}

impl Default for Registries {
    fn default() -> Self {
        Self::new()
    }
}

impl Registries {
    /// Three empty registries.
    pub fn new() -> Self {
        Self {
            cpu: OperatorRegistry::new("CPUOperatorRegistry"),
            cuda: OperatorRegistry::new("CUDAOperatorRegistry"),
            cudnn: OperatorRegistry::new("CUDNNOperatorRegistry"),
        }
    }

    /// The registry serving `device`.
    pub fn get(&self, device: DeviceType) -> &OperatorRegistry {
        match device {
            DeviceType::Cpu => &self.cpu,
            DeviceType::Cuda => &self.cuda,
            DeviceType::Cudnn => &self.cudnn,
        }
    }

    /// Mutable registry serving `device`.
    pub fn get_mut(&mut self, device: DeviceType) -> &mut OperatorRegistry {
        match device {
            DeviceType::Cpu => &mut self.cpu,
            DeviceType::Cuda => &mut self.cuda,
            DeviceType::Cudnn => &mut self.cudnn,
        }
    }

    /// Registers host kernel `K` as `op_type` in the CPU registry.
    ///
    /// # Errors
    ///
    /// [`OpError::DuplicateRegistration`].
    pub fn deploy_cpu<K: Kernel<CpuContext>>(&mut self, op_type: &str) -> Result<()> {
        self.cpu.register(op_type, kernel_factory::<CpuContext, K>)
    }

    /// Registers GPU kernel `K` as `op_type` in the CUDA registry.
    ///
    /// # Errors
    ///
    /// [`OpError::DuplicateRegistration`].
    pub fn deploy_cuda<K: Kernel<CudaContext>>(&mut self, op_type: &str) -> Result<()> {
        self.cuda.register(op_type, kernel_factory::<CudaContext, K>)
    }

    /// Registers host kernel `K` as `op_type` in the CUDA registry, for
    /// operators that have no device implementation.
    ///
    /// # Errors
    ///
    /// [`OpError::DuplicateRegistration`].
    pub fn deploy_cpu_cuda<K: Kernel<CpuContext>>(&mut self, op_type: &str) -> Result<()> {
        self.cuda.register(op_type, kernel_factory::<CpuContext, K>)
    }

    /// Registers library kernel `K` as `op_type` in the cuDNN registry.
    ///
    /// # Errors
    ///
    /// [`OpError::DuplicateRegistration`].
    pub fn deploy_cudnn<K: Kernel<CudnnContext>>(&mut self, op_type: &str) -> Result<()> {
        self.cudnn.register(op_type, kernel_factory::<CudnnContext, K>)
    }

    /// Picks the registry for `def`'s device and instantiates the operator.
    ///
    /// CPU descriptors use the CPU registry. CUDA and cuDNN descriptors use
    /// the cuDNN registry when it holds the type and the CUDA registry
    /// otherwise.
    ///
    /// # Errors
    ///
    /// [`OpError::UnknownOperator`] or the factory's failure.
    pub fn create_operator(&self, def: &OperatorDef, ws: &Arc<Workspace>) -> Result<Box<dyn Operator>> {
        let registry = match def.device_option.device_type {
            DeviceType::Cpu => &self.cpu,
            DeviceType::Cuda | DeviceType::Cudnn if self.cudnn.has(&def.op_type) => &self.cudnn,
            DeviceType::Cuda | DeviceType::Cudnn => &self.cuda,
        };
        let op = registry.create(def, ws)?;
        debug!(op = %def.name, op_type = %def.op_type, registry = registry.name(), "created operator");
        Ok(op)
    }
}

/// Installs every built-in kernel into `registries`.
///
/// # Errors
///
/// [`OpError::DuplicateRegistration`] if any built-in type is already present.
pub fn register_builtin_operators(registries: &mut Registries) -> Result<()> {
    crate::ops::register_builtins(registries)
}

#[allow(clippy::expect_used)]
fn builtin_registries() -> Registries {
    let mut registries = Registries::new();
    register_builtin_operators(&mut registries).expect("built-in operators registered twice");
    registries
}

lazy_static::lazy_static! {
    static ref REGISTRIES: RwLock<Registries> = RwLock::new(builtin_registries());
}

/// Runs `f` against the process-wide registries.
pub fn with_registries<R>(f: impl FnOnce(&Registries) -> R) -> R {
    let registries = REGISTRIES.read().unwrap_or_else(PoisonError::into_inner);
    f(&*registries)
}

/// Adds `factory` to the process-wide registry of `device`.
///
/// # Errors
///
/// [`OpError::DuplicateRegistration`].
pub fn register_operator(device: DeviceType, op_type: &str, factory: OperatorFactory) -> Result<()> {
    let mut registries = REGISTRIES.write().unwrap_or_else(PoisonError::into_inner);
    registries.get_mut(device).register(op_type, factory)
}

/// Type names registered in the process-wide registry of `device`, sorted.
pub fn registered_types(device: DeviceType) -> Vec<String> {
    with_registries(|r| r.get(device).keys())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::cpu::ReluKernel;

    #[test]
    fn duplicate_registration_names_the_registry() {
        let mut registries = Registries::new();
        registries.deploy_cpu::<ReluKernel>("Relu").unwrap();
        let err = registries.deploy_cpu::<ReluKernel>("Relu").unwrap_err();
        assert!(matches!(
            err,
            OpError::DuplicateRegistration { registry: "CPUOperatorRegistry", .. }
        ));
        // the same key in another registry is fine
        registries.deploy_cpu_cuda::<ReluKernel>("Relu").unwrap();
    }

    #[test]
    fn builtins_cover_every_device_that_needs_them() {
        let cpu = registered_types(DeviceType::Cpu);
        for ty in ["Add", "Sub", "Mul", "Div", "Relu", "Softmax", "InnerProduct", "Dropout"] {
            assert!(cpu.contains(&ty.to_string()), "{ty} missing on CPU");
        }
        let cuda = registered_types(DeviceType::Cuda);
        for ty in ["Softmax", "InnerProduct", "Dropout"] {
            assert!(cuda.contains(&ty.to_string()), "{ty} missing on CUDA");
        }
    }
}
