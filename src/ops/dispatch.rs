//! Operator Dispatch Layer
//!
//! Turns a descriptor into a running operator: the descriptor's
//! `device_option` selects the registry, its `type` selects the factory.
//!
//! # Example
//! ```rust
//! use std::sync::Arc;
//! use opcore::ops::dispatch::create_operator;
//! use opcore::proto::OperatorDef;
//! use opcore::workspace::Workspace;
//!
//! let ws = Arc::new(Workspace::default());
//! ws.feed_tensor("a", &[3], vec![1.0, 2.0, 3.0])?;
//! ws.feed_tensor("b", &[3], vec![4.0, 5.0, 6.0])?;
//!
//! let def = OperatorDef::new("Add", "add").with_inputs(["a", "b"]).with_outputs(["c"]);
//! let mut op = create_operator(&def, &ws)?;
//! op.run()?;
//! assert_eq!(ws.fetch_tensor("c"), Some(vec![5.0, 7.0, 9.0]));
//! # Ok::<(), opcore::error::OpError>(())
//! ```

use std::sync::Arc;

use crate::error::Result;
use crate::operator::Operator;
use crate::proto::OperatorDef;
use crate::registry;
use crate::workspace::Workspace;

/// Instantiates `def` from the process-wide registries.
///
/// CPU descriptors resolve in `CPUOperatorRegistry`. CUDA and cuDNN
/// descriptors resolve in `CUDNNOperatorRegistry` when it holds the type and
/// in `CUDAOperatorRegistry` otherwise.
///
/// # Errors
///
/// [`OpError::UnknownOperator`](crate::error::OpError::UnknownOperator) when
/// no registry holds the type, or any construction failure of the operator.
pub fn create_operator(def: &OperatorDef, ws: &Arc<Workspace>) -> Result<Box<dyn Operator>> {
    registry::with_registries(|registries| registries.create_operator(def, ws))
}
