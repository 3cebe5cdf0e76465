use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::comm;
use crate::context::Context;
use crate::error::Result;
use crate::proto::OperatorDef;
use crate::tensors;
use crate::workspace::Workspace;

use super::{Operator, OperatorBase};

/// An operator bound to a device context.
///
/// Dereferences to [`OperatorBase`], so kernels reach inputs, outputs and
/// arguments directly.
pub struct DeviceOperator<C: Context> {
    base: OperatorBase,
    ctx: C,
    allow_run: bool,
}

impl<C: Context> DeviceOperator<C> {
    /// Builds the base, the context, and decides `allow_run` once.
    ///
    /// The operator is disabled when the `"mpi_rank"` argument excludes this
    /// process, or when its only output is `"ignore"`.
    ///
    /// # Errors
    ///
    /// Base construction failures, an `"mpi_rank"` argument that is not a
    /// list of integers, or a context that cannot be created.
    pub fn new(def: OperatorDef, ws: Arc<Workspace>) -> Result<Self> {
        let base = OperatorBase::new(def, ws)?;
        let ctx = C::new(&base.op_def().device_option)?;

        let ranks: Vec<i32> = base.get_repeated_arg(comm::RANK_ARG)?;
        let rank_ok = comm::rank_allowed(&ranks);
        let wanted = !base.outputs_ignored();
        if !rank_ok {
            debug!(op = %base.name(), rank = comm::rank(), ranks = ?ranks, "operator disabled on this rank");
        } else if !wanted {
            debug!(op = %base.name(), "operator disabled, its only output is ignored");
        }

        Ok(Self {
            base,
            ctx,
            allow_run: rank_ok && wanted,
        })
    }

    /// The device context.
    pub fn ctx(&self) -> &C {
        &self.ctx
    }

    /// Mutable device context.
    pub fn ctx_mut(&mut self) -> &mut C {
        &mut self.ctx
    }

    /// Whether `run` executes anything.
    pub fn allow_run(&self) -> bool {
        self.allow_run
    }

    /// Migrates every input and output not named `"ignore"` to this context's device.
    pub fn memory_switch(&self) {
        let device = self.ctx.device();
        for handle in self.base.live_tensors() {
            tensors::write(handle).switch_to_device(device);
        }
    }
}

impl<C: Context> Deref for DeviceOperator<C> {
    type Target = OperatorBase;

    fn deref(&self) -> &OperatorBase {
        &self.base
    }
}

impl<C: Context> DerefMut for DeviceOperator<C> {
    fn deref_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }
}

/// The computation of one operator type on one device.
///
/// A kernel is built once per operator, after the device operator, so it
/// can parse and cache its arguments.
pub trait Kernel<C: Context>: Sized + Send + 'static {
    /// Parses arguments and checks arity.
    ///
    /// # Errors
    ///
    /// Invalid arguments or arity.
    fn new(op: &DeviceOperator<C>) -> Result<Self>;

    /// Optional memory-sharing step. Skipped in debug mode.
    ///
    /// # Errors
    ///
    /// Kernel specific.
    fn share_before_run(&mut self, _op: &mut DeviceOperator<C>) -> Result<()> {
        Ok(())
    }

    /// The kernel body.
    ///
    /// # Errors
    ///
    /// Kernel specific.
    fn run_on_device(&mut self, op: &mut DeviceOperator<C>) -> Result<()>;

    /// Optional cleanup of temporaries. Skipped in debug mode.
    ///
    /// # Errors
    ///
    /// Kernel specific.
    fn clear_after_run(&mut self, _op: &mut DeviceOperator<C>) -> Result<()> {
        Ok(())
    }
}

/// A kernel bound to its device operator.
pub struct KernelOp<C: Context, K: Kernel<C>> {
    op: DeviceOperator<C>,
    kernel: K,
}

impl<C: Context, K: Kernel<C>> KernelOp<C, K> {
    /// Builds the device operator, then the kernel.
    ///
    /// # Errors
    ///
    /// See [`DeviceOperator::new`] and [`Kernel::new`].
    pub fn new(def: OperatorDef, ws: Arc<Workspace>) -> Result<Self> {
        let op = DeviceOperator::new(def, ws)?;
        let kernel = K::new(&op)?;
        Ok(Self { op, kernel })
    }

    /// The device operator.
    pub fn device_op(&self) -> &DeviceOperator<C> {
        &self.op
    }

    /// The kernel.
    pub fn kernel(&self) -> &K {
        &self.kernel
    }
}

impl<C: Context, K: Kernel<C>> Operator for KernelOp<C, K> {
    fn base(&self) -> &OperatorBase {
        &self.op
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.op
    }

    fn allow_run(&self) -> bool {
        self.op.allow_run
    }

    /// Runs one step: activate the context, share (unless debugging), migrate
    /// tensors, compute, clear (unless debugging).
    ///
    /// The context is synchronized exactly once on every exit path of a
    /// permitted run, including kernel errors and panics; a panic is resumed
    /// after the synchronization.
    fn run(&mut self) -> Result<()> {
        if !self.op.allow_run {
            return Ok(());
        }
        let debug_mode = self.op.op_def().debug_mode;
        let Self { op, kernel } = self;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<()> {
            op.ctx.switch_to_device()?;
            if !debug_mode {
                trace!(op = %op.name(), "share_before_run");
                kernel.share_before_run(op)?;
            }
            op.memory_switch();
            trace!(op = %op.name(), "run_on_device");
            kernel.run_on_device(op)?;
            if !debug_mode {
                trace!(op = %op.name(), "clear_after_run");
                kernel.clear_after_run(op)?;
            }
            Ok(())
        }));

        let synced = op.ctx.finish_device_computation();
        match outcome {
            Ok(Ok(())) => synced,
            Ok(Err(err)) => {
                if let Err(sync_err) = synced {
                    warn!(op = %op.name(), error = %sync_err, "device synchronization failed after kernel error");
                }
                Err(err)
            }
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}
