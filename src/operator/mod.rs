//! Operators: named, typed compute units instantiated from a descriptor.
//!
//! # Layers
//!
//! - [`OperatorBase`]: device-agnostic state: the descriptor, the
//!   workspace, the phase, the resolved input/output handles and the
//!   argument index. Everything here is a read or a bounds-checked lookup.
//! - [`DeviceOperator`]: the base plus a device [`Context`] and the
//!   construction-time `allow_run` decision.
//! - [`Kernel`]: the per-operator computation with its optional
//!   `share_before_run` / `clear_after_run` hooks.
//! - [`KernelOp`]: binds a kernel to its device operator and implements
//!   the finalized run sequence of the [`Operator`] trait.
//!
//! The dispatcher hands out `Box<dyn Operator>`; callers only ever see the
//! trait.
//!
//! [`Context`]: crate::context::Context

use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::args::{ArgType, Coerce};
use crate::error::{OpError, Result};
use crate::proto::{Argument, OperatorDef};
use crate::tensors::{self, IGNORE, TensorRef};
use crate::workspace::Workspace;

mod device;
pub use self::device::{DeviceOperator, Kernel, KernelOp};

mod helpers;
pub use self::helpers::MULTIPLIER;

/// Execution phase, switched externally between training and evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    /// Training step.
    Train,
    /// Evaluation (default).
    #[default]
    Test,
}

impl Phase {
    /// `"TRAIN"` or `"TEST"`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Train => "TRAIN",
            Self::Test => "TEST",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device-agnostic operator state.
pub struct OperatorBase {
    def: OperatorDef,
    ws: Arc<Workspace>,
    phase: Phase,
    inputs: Vec<TensorRef>,
    outputs: Vec<TensorRef>,
    // argument name -> position in `def.arg`
    args: HashMap<String, usize>,
}

impl fmt::Debug for OperatorBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorBase")
            .field("name", &self.def.name)
            .field("type", &self.def.op_type)
            .field("phase", &self.phase)
            .field("workspace", &self.ws.name())
            .finish_non_exhaustive()
    }
}

impl OperatorBase {
    /// Resolves the descriptor's tensors in `ws` and indexes its arguments.
    ///
    /// Inputs must already exist (`"ignore"` always does); outputs are
    /// created on demand.
    ///
    /// # Errors
    ///
    /// [`OpError::TensorNotFound`] for a missing input,
    /// [`OpError::DuplicateArgument`] for a repeated argument name.
    pub fn new(def: OperatorDef, ws: Arc<Workspace>) -> Result<Self> {
        let inputs = def
            .input
            .iter()
            .map(|name| {
                ws.get_tensor(name).ok_or_else(|| OpError::TensorNotFound {
                    op: def.name.clone(),
                    tensor: name.clone(),
                    workspace: ws.name().to_owned(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let outputs = def.output.iter().map(|name| ws.create_tensor(name)).collect();

        let mut args = HashMap::with_capacity(def.arg.len());
        for (idx, arg) in def.arg.iter().enumerate() {
            if args.insert(arg.name.clone(), idx).is_some() {
                return Err(OpError::DuplicateArgument {
                    op: def.name.clone(),
                    arg: arg.name.clone(),
                });
            }
        }

        debug!(op = %def.name, op_type = %def.op_type, inputs = ?def.input, outputs = ?def.output, "operator bound to workspace");
        Ok(Self {
            def,
            ws,
            phase: Phase::default(),
            inputs,
            outputs,
            args,
        })
    }

    fn resolve(&self, kind: &'static str, handles: &[TensorRef], idx: isize) -> Result<TensorRef> {
        let len = handles.len();
        let out_of_range = || OpError::IndexOutOfRange {
            op: self.def.name.clone(),
            kind,
            index: idx,
            len,
        };
        let signed_len = isize::try_from(len).map_err(|_| out_of_range())?;
        if idx < -signed_len || idx >= signed_len {
            return Err(out_of_range());
        }
        let pos = if idx < 0 { idx + signed_len } else { idx };
        let pos = usize::try_from(pos).map_err(|_| out_of_range())?;
        Ok(Arc::clone(&handles[pos]))
    }

    /// The `idx`-th input; negative indices count from the end.
    ///
    /// # Errors
    ///
    /// [`OpError::IndexOutOfRange`] outside `[-InputSize, InputSize)`.
    pub fn input(&self, idx: isize) -> Result<TensorRef> {
        self.resolve("input", &self.inputs, idx)
    }

    /// The `idx`-th output; negative indices count from the end.
    ///
    /// # Errors
    ///
    /// [`OpError::IndexOutOfRange`] outside `[-OutputSize, OutputSize)`.
    pub fn output(&self, idx: isize) -> Result<TensorRef> {
        self.resolve("output", &self.outputs, idx)
    }

    /// Number of declared inputs.
    pub fn input_size(&self) -> usize {
        self.inputs.len()
    }

    /// Number of declared outputs.
    pub fn output_size(&self) -> usize {
        self.outputs.len()
    }

    /// Switches between training and evaluation.
    pub fn switch_to_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    /// Operator name.
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Registry key.
    pub fn op_type(&self) -> &str {
        &self.def.op_type
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The workspace tensors are resolved in.
    pub fn ws(&self) -> &Arc<Workspace> {
        &self.ws
    }

    /// The descriptor this operator was built from.
    pub fn op_def(&self) -> &OperatorDef {
        &self.def
    }

    /// Protobuf text rendering of the descriptor.
    pub fn debug_string(&self) -> String {
        self.def.debug_string()
    }

    /// The argument called `name`.
    pub fn arg(&self, name: &str) -> Option<&Argument> {
        self.args.get(name).map(|&idx| &self.def.arg[idx])
    }

    /// Every argument, keyed by name.
    pub fn args(&self) -> impl Iterator<Item = (&str, &Argument)> + '_ {
        self.args
            .iter()
            .map(|(name, &idx)| (name.as_str(), &self.def.arg[idx]))
    }

    fn coerce_error(&self, name: &str, found: &'static str, err: Coerce) -> OpError {
        match err {
            Coerce::Kind(expected) => OpError::ArgumentKindMismatch {
                op: self.def.name.clone(),
                arg: name.to_owned(),
                expected,
                found,
            },
            Coerce::Overflow(target) => OpError::ArgumentOverflow {
                op: self.def.name.clone(),
                arg: name.to_owned(),
                target,
            },
        }
    }

    /// The scalar argument `name` as `T`, or `default` when absent.
    ///
    /// # Errors
    ///
    /// Kind mismatch or overflow.
    pub fn get_single_arg<T: ArgType>(&self, name: &str, default: T) -> Result<T> {
        match self.arg(name) {
            None => Ok(default),
            Some(arg) => T::from_single(&arg.value).map_err(|e| self.coerce_error(name, arg.value.kind(), e)),
        }
    }

    /// The repeated argument `name` as `Vec<T>`, empty when absent.
    ///
    /// # Errors
    ///
    /// Kind mismatch or overflow of any element.
    pub fn get_repeated_arg<T: ArgType>(&self, name: &str) -> Result<Vec<T>> {
        match self.arg(name) {
            None => Ok(Vec::new()),
            Some(arg) => T::from_repeated(&arg.value).map_err(|e| self.coerce_error(name, arg.value.kind(), e)),
        }
    }

    /// Whether the declared output list is exactly `["ignore"]`.
    pub fn outputs_ignored(&self) -> bool {
        self.def.output.len() == 1 && self.def.output[0] == IGNORE
    }

    /// Tensors to migrate before a kernel runs: every input and output not named `"ignore"`.
    pub(crate) fn live_tensors(&self) -> impl Iterator<Item = &TensorRef> + '_ {
        self.def
            .input
            .iter()
            .zip(&self.inputs)
            .chain(self.def.output.iter().zip(&self.outputs))
            .filter(|(name, _)| name.as_str() != IGNORE)
            .map(|(_, handle)| handle)
    }

    /// Shorthand for [`OpError::kernel`] naming this operator.
    pub fn kernel_error(&self, message: impl Into<String>) -> OpError {
        OpError::kernel(self.def.name.clone(), message)
    }

    /// Shape of the `idx`-th input.
    ///
    /// # Errors
    ///
    /// [`OpError::IndexOutOfRange`].
    pub fn input_shape(&self, idx: isize) -> Result<Vec<usize>> {
        Ok(tensors::read(&self.input(idx)?).shape().to_vec())
    }
}

/// Polymorphic handle returned by the dispatcher.
pub trait Operator: Send {
    /// Device-agnostic state.
    fn base(&self) -> &OperatorBase;

    /// Mutable device-agnostic state.
    fn base_mut(&mut self) -> &mut OperatorBase;

    /// Executes one step.
    ///
    /// # Errors
    ///
    /// Any kernel or device failure.
    fn run(&mut self) -> Result<()>;

    /// Whether `run` does anything on this process.
    fn allow_run(&self) -> bool;

    /// Logical identity for tooling: the `"anchor"` argument, else the name.
    ///
    /// # Errors
    ///
    /// [`OpError::ArgumentKindMismatch`] if `"anchor"` is not a string.
    fn anchor(&self) -> Result<String> {
        let base = self.base();
        base.get_single_arg("anchor", base.name().to_owned())
    }

    /// Operator name.
    fn name(&self) -> &str {
        self.base().name()
    }

    /// Registry key.
    fn op_type(&self) -> &str {
        self.base().op_type()
    }

    /// Current phase.
    fn phase(&self) -> Phase {
        self.base().phase()
    }

    /// Switches between training and evaluation.
    fn switch_to_phase(&mut self, phase: Phase) {
        self.base_mut().switch_to_phase(phase);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::Argument;

    fn workspace() -> Arc<Workspace> {
        let ws = Workspace::new("unit");
        ws.feed_tensor("a", &[2], vec![1.0, 2.0]).unwrap();
        ws.feed_tensor("b", &[2], vec![3.0, 4.0]).unwrap();
        Arc::new(ws)
    }

    #[test]
    fn negative_indices_count_from_the_end() {
        let def = OperatorDef::new("Add", "add").with_inputs(["a", "b"]).with_outputs(["c"]);
        let op = OperatorBase::new(def, workspace()).unwrap();
        assert!(Arc::ptr_eq(&op.input(-1).unwrap(), &op.input(1).unwrap()));
        assert!(Arc::ptr_eq(&op.input(-2).unwrap(), &op.input(0).unwrap()));
        assert!(matches!(op.input(2), Err(OpError::IndexOutOfRange { index: 2, len: 2, .. })));
        assert!(matches!(op.input(-3), Err(OpError::IndexOutOfRange { .. })));
        assert!(matches!(op.output(1), Err(OpError::IndexOutOfRange { kind: "output", .. })));
    }

    #[test]
    fn outputs_are_created_inputs_are_not() {
        let ws = workspace();
        let def = OperatorDef::new("Add", "add").with_inputs(["a", "missing"]).with_outputs(["c"]);
        let err = OperatorBase::new(def, Arc::clone(&ws)).unwrap_err();
        assert!(matches!(err, OpError::TensorNotFound { ref tensor, .. } if tensor == "missing"));
        assert!(!ws.has_tensor("c"));

        let def = OperatorDef::new("Add", "add").with_inputs(["a", "ignore"]).with_outputs(["c"]);
        OperatorBase::new(def, Arc::clone(&ws)).unwrap();
        assert!(ws.has_tensor("c"));
    }

    #[test]
    fn duplicate_arguments_are_rejected() {
        let def = OperatorDef::new("Relu", "r")
            .with_arg(Argument::float("slope", 0.1))
            .with_arg(Argument::int("slope", 1));
        let err = OperatorBase::new(def, workspace()).unwrap_err();
        assert!(matches!(err, OpError::DuplicateArgument { ref arg, .. } if arg == "slope"));
    }

    #[test]
    fn phase_defaults_to_test() {
        let mut op = OperatorBase::new(OperatorDef::new("Relu", "r"), workspace()).unwrap();
        assert_eq!(op.phase(), Phase::Test);
        op.switch_to_phase(Phase::Train);
        assert_eq!(op.phase().to_string(), "TRAIN");
    }

    #[test]
    fn argument_accessors_report_kind_mismatch() {
        let def = OperatorDef::new("Softmax", "sm").with_arg(Argument::string("axis", "last"));
        let op = OperatorBase::new(def, workspace()).unwrap();
        let err = op.get_single_arg::<i64>("axis", 1).unwrap_err();
        assert!(matches!(
            err,
            OpError::ArgumentKindMismatch { expected: "int", found: "string", .. }
        ));
        assert_eq!(op.get_single_arg::<i64>("missing", 7).unwrap(), 7);
        assert!(op.get_repeated_arg::<f32>("missing").unwrap().is_empty());
    }
}
