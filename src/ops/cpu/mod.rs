//! Host kernels.
//!
//! Every kernel here runs on [`CpuContext`](crate::context::CpuContext) and
//! parallelizes over elements or rows with [`rayon`](https://docs.rs/rayon).
//! Outputs are computed into fresh storage and assigned at the end, so an
//! output may share its name with an input.
//!
//! ## Implemented Kernels
//!
//! - [`ElementwiseKernel`]: `Add`, `Sub`, `Mul`, `Div`, second operand may be a scalar
//! - [`ReluKernel`]: leaky rectifier
//! - [`SoftmaxKernel`]: softmax along an axis with a pooled scratch buffer
//! - [`InnerProductKernel`]: fully connected layer with lazily filled weights
//! - [`DropoutKernel`]: phase dependent inverted dropout

mod dropout;
mod elementwise;
mod inner_product;
mod relu;
mod softmax;

pub use self::dropout::DropoutKernel;
pub(crate) use self::elementwise::check_operands;
pub use self::elementwise::{Add, BinaryOp, Div, ElementwiseKernel, Mul, Sub};
pub use self::inner_product::InnerProductKernel;
pub use self::relu::ReluKernel;
pub use self::softmax::SoftmaxKernel;
