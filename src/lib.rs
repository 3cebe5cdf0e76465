//! opcore: the operator dispatch and execution substrate of a deep-learning runtime.
//!
//! Kernels are described once as named, typed, device-parameterized units,
//! registered into per-device catalogs, instantiated from a graph node
//! descriptor and executed against a shared tensor workspace with a fixed
//! lifecycle.
//!
//! # Features
//!
//! - Typed access to descriptor arguments with explicit kind checks.
//! - Operators generic over a device [`Context`](context::Context): CPU, CUDA, cuDNN.
//! - A run sequence that always synchronizes the device, even when the kernel fails.
//! - Per-device registries with duplicate detection and a cuDNN-first GPU dispatch policy.
//! - Lazy weight initialization from named fillers and a shared ones-multiplier.
//! - A rank gate that disables operators on processes not listed in `"mpi_rank"`.
//!
//! # Modules
//!
//! - [`proto`]: operator descriptors and arguments.
//! - [`args`]: typed coercion of argument values.
//! - [`workspace`] / [`tensors`] / [`filler`]: named tensor storage and initializers.
//! - [`context`]: device contexts.
//! - [`operator`]: operator base, device operator, kernel lifecycle and fill helpers.
//! - [`registry`]: per-device catalogs.
//! - [`ops`]: built-in kernels and the dispatcher.
//! - [`comm`]: the process rank.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use opcore::filler::FillerDef;
//! use opcore::ops::dispatch::create_operator;
//! use opcore::proto::{Argument, OperatorDef};
//! use opcore::workspace::Workspace;
//!
//! let ws = Arc::new(Workspace::new("net"));
//! ws.feed_tensor("x", &[2, 3], vec![1.0; 6])?;
//! ws.create_filler(FillerDef::constant("fc/W", 0.5));
//! ws.create_filler(FillerDef::constant("fc/b", 1.0));
//!
//! let def = OperatorDef::new("InnerProduct", "fc")
//!     .with_inputs(["x", "fc/W", "fc/b"])
//!     .with_outputs(["y"])
//!     .with_arg(Argument::int("num_output", 4));
//! let mut op = create_operator(&def, &ws)?;
//! op.run()?;
//! assert_eq!(ws.fetch_tensor("y"), Some(vec![2.5; 8]));
//! # Ok::<(), opcore::error::OpError>(())
//! ```

pub mod args;
pub mod backend;
pub mod comm;
pub mod context;
pub mod error;
pub mod filler;
pub mod operator;
pub mod ops;
pub mod proto;
pub mod registry;
pub mod tensors;
pub mod workspace;

pub use crate::error::{OpError, Result};
pub use crate::operator::{Operator, Phase};
pub use crate::ops::dispatch::create_operator;
pub use crate::proto::{Argument, OperatorDef};
pub use crate::workspace::Workspace;
