use core::marker::PhantomData;

use rayon::prelude::*;

use crate::context::{Context, CpuContext};
use crate::error::Result;
use crate::operator::{DeviceOperator, Kernel};
use crate::tensors::{self, TensorFloat};

/// A binary arithmetic operation applied element by element.
pub trait BinaryOp: Send + Sync + 'static {
    /// Registry key.
    const TYPE: &'static str;
    /// Opcode understood by the GPU `binary` shader.
    const CODE: u32;

    /// Applies the operation to one pair.
    fn apply(a: TensorFloat, b: TensorFloat) -> TensorFloat;
}

macro_rules! binary_op {
    ($name:ident, $code:expr, |$a:ident, $b:ident| $body:expr) => {
        #[doc = concat!("`", stringify!($name), "`: `", stringify!($body), "`.")]
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        impl BinaryOp for $name {
            const TYPE: &'static str = stringify!($name);
            const CODE: u32 = $code;

            #[inline]
            fn apply($a: TensorFloat, $b: TensorFloat) -> TensorFloat {
                $body
            }
        }
    };
}

binary_op!(Add, 0, |a, b| a + b);
binary_op!(Sub, 1, |a, b| a - b);
binary_op!(Mul, 2, |a, b| a * b);
binary_op!(Div, 3, |a, b| a / b);

/// Checks that `(a, b)` element counts are compatible: equal, or `b` is a scalar.
pub(crate) fn check_operands<C: Context>(op: &DeviceOperator<C>, a: usize, b: usize) -> Result<()> {
    if a == b || b == 1 {
        Ok(())
    } else {
        Err(op.kernel_error(format!(
            "cannot combine {a} elements with {b} elements, the second operand must match or be a scalar"
        )))
    }
}

/// `Y = A (op) B` on the host.
#[derive(Debug)]
pub struct ElementwiseKernel<O: BinaryOp> {
    _op: PhantomData<O>,
}

impl<O: BinaryOp> ElementwiseKernel<O> {
    /// Checks the 2-in / 1-out arity.
    pub(crate) fn parse<C: Context>(op: &DeviceOperator<C>) -> Result<Self> {
        if op.input_size() != 2 || op.output_size() != 1 {
            return Err(op.kernel_error(format!(
                "{} expects 2 inputs and 1 output, got {} and {}",
                O::TYPE,
                op.input_size(),
                op.output_size()
            )));
        }
        Ok(Self { _op: PhantomData })
    }
}

impl<O: BinaryOp> Kernel<CpuContext> for ElementwiseKernel<O> {
    fn new(op: &DeviceOperator<CpuContext>) -> Result<Self> {
        Self::parse(op)
    }

    fn run_on_device(&mut self, op: &mut DeviceOperator<CpuContext>) -> Result<()> {
        let (a, b) = (op.input(0)?, op.input(1)?);
        // computed before the output is locked: Y may alias A or B
        let (shape, y) = {
            let a = tensors::read(&a);
            let b = tensors::read(&b);
            check_operands(op, a.count(), b.count())?;
            let y: Vec<TensorFloat> = if b.count() == 1 && a.count() != 1 {
                let s = b.data()[0];
                a.data().par_iter().map(|&x| O::apply(x, s)).collect()
            } else {
                a.data()
                    .par_iter()
                    .zip(b.data().par_iter())
                    .map(|(&x, &y)| O::apply(x, y))
                    .collect()
            };
            (a.shape().to_vec(), y)
        };
        tensors::write(&op.output(0)?).assign(shape, y);
        Ok(())
    }
}
