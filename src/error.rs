//! Error taxonomy shared by every layer of the crate.
//!
//! Nothing in `opcore` recovers from an [`OpError`]: each variant describes a
//! programming or configuration mistake (bad index, unregistered type, missing
//! filler, ...) or a device failure. The error is returned to the caller, who
//! decides whether to abort the process.

use briny::prelude::ValidationError;
use thiserror::Error;

use crate::backend::DeviceType;

/// Errors raised while building, dispatching or running operators.
#[derive(Debug, Error)]
pub enum OpError {
    /// An input/output index fell outside `[-n, n)`.
    #[error("{kind} index {index} is out of range for operator `{op}` with {len} {kind}s")]
    IndexOutOfRange {
        /// Operator name.
        op: String,
        /// `"input"` or `"output"`.
        kind: &'static str,
        /// Requested index.
        index: isize,
        /// Declared arity.
        len: usize,
    },

    /// The descriptor's type is not registered for the selected device.
    #[error("operator type `{op_type}` is not registered in {registry}")]
    UnknownOperator {
        /// The unresolved type key.
        op_type: String,
        /// Name of the registry that was searched.
        registry: &'static str,
    },

    /// A type key was registered twice in the same registry.
    #[error("operator type `{op_type}` is already registered in {registry}")]
    DuplicateRegistration {
        /// The colliding type key.
        op_type: String,
        /// Name of the registry holding the first registration.
        registry: &'static str,
    },

    /// A lazy fill hit an empty tensor that has no filler.
    #[error("Tensor({tensor}) is empty, may be specify a filler for it?")]
    MissingFiller {
        /// Name of the empty tensor.
        tensor: String,
    },

    /// A non-empty tensor does not hold the number of elements a model asks for.
    #[error("model request Tensor({tensor})'s size is {expected} but now is {actual}, may be feed the incorrect Tensor before?")]
    ShapeMismatch {
        /// Tensor name.
        tensor: String,
        /// Element count implied by the requested shape.
        expected: usize,
        /// Element count the tensor currently holds.
        actual: usize,
    },

    /// An argument exists but holds a different kind of value.
    #[error("argument `{arg}` of operator `{op}` holds {found}, not {expected}")]
    ArgumentKindMismatch {
        /// Operator name.
        op: String,
        /// Argument name.
        arg: String,
        /// Kind requested by the accessor.
        expected: &'static str,
        /// Kind stored in the descriptor.
        found: &'static str,
    },

    /// An argument value does not fit in the requested type.
    #[error("argument `{arg}` of operator `{op}` overflows {target}")]
    ArgumentOverflow {
        /// Operator name.
        op: String,
        /// Argument name.
        arg: String,
        /// Requested Rust type.
        target: &'static str,
    },

    /// The same argument name appears twice in one descriptor.
    #[error("argument `{arg}` is declared more than once on operator `{op}`")]
    DuplicateArgument {
        /// Operator name.
        op: String,
        /// Repeated argument name.
        arg: String,
    },

    /// An input names a tensor the workspace does not hold.
    #[error("input Tensor({tensor}) of operator `{op}` does not exist in workspace `{workspace}`")]
    TensorNotFound {
        /// Operator name.
        op: String,
        /// Missing tensor name.
        tensor: String,
        /// Workspace name.
        workspace: String,
    },

    /// The device context reported a failure.
    #[error("{device} device failure: {message}")]
    DeviceFailure {
        /// Device backend that failed.
        device: DeviceType,
        /// Backend-provided description.
        message: String,
    },

    /// A filler descriptor cannot produce values.
    #[error("invalid filler for Tensor({tensor}): {reason}")]
    InvalidFiller {
        /// Tensor the filler is attached to.
        tensor: String,
        /// What is wrong with the parameters.
        reason: String,
    },

    /// Kernel-specific precondition failure.
    #[error("operator `{op}`: {message}")]
    Kernel {
        /// Operator name.
        op: String,
        /// Description of the violated precondition.
        message: String,
    },

    /// Structural validation of a descriptor failed.
    #[error("invalid operator descriptor: {0}")]
    InvalidDescriptor(#[from] ValidationError),

    /// A serialized descriptor could not be decoded.
    #[error("malformed operator descriptor: {0}")]
    Json(#[from] serde_json::Error),
}

/// Specialized result type for operator operations.
pub type Result<T> = std::result::Result<T, OpError>;

impl OpError {
    /// Shorthand for [`OpError::Kernel`].
    pub fn kernel(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Kernel {
            op: op.into(),
            message: message.into(),
        }
    }
}
