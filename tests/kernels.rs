mod common;

use std::sync::Arc;

use opcore::Operator;
use opcore::context::CpuContext;
use opcore::error::OpError;
use opcore::operator::{KernelOp, Phase};
use opcore::ops::cpu::{DropoutKernel, InnerProductKernel, ReluKernel, SoftmaxKernel};
use opcore::ops::dispatch::create_operator;
use opcore::proto::{Argument, OperatorDef};
use opcore::workspace::{BUFFER_PREFIX, Workspace};
use rand::Rng;

use common::{assert_close, workspace_ab};

fn binary(op_type: &str, b: &str, out: &str) -> OperatorDef {
    OperatorDef::new(op_type, op_type.to_lowercase())
        .with_inputs(["a", b])
        .with_outputs([out])
}

#[test]
fn test_arithmetic_with_scalar_operand() {
    let ws = workspace_ab();
    ws.feed_tensor("s", &[1], vec![2.0]).unwrap();
    for (op_type, expected) in [
        ("Add", [3.0, 4.0, 5.0, 6.0]),
        ("Sub", [-1.0, 0.0, 1.0, 2.0]),
        ("Mul", [2.0, 4.0, 6.0, 8.0]),
        ("Div", [0.5, 1.0, 1.5, 2.0]),
    ] {
        create_operator(&binary(op_type, "s", "y"), &ws).unwrap().run().unwrap();
        assert_close(&ws.fetch_tensor("y").unwrap(), &expected);
    }
}

#[test]
fn test_incompatible_operands_are_rejected() {
    let ws = workspace_ab();
    ws.feed_tensor("three", &[3], vec![1.0; 3]).unwrap();
    let mut op = create_operator(&binary("Add", "three", "y"), &ws).unwrap();
    assert!(matches!(op.run(), Err(OpError::Kernel { .. })));
}

#[test]
fn test_output_may_alias_an_input() {
    let ws = workspace_ab();
    let mut op = create_operator(&binary("Add", "b", "a"), &ws).unwrap();
    op.run().unwrap();
    op.run().unwrap();
    assert_close(&ws.fetch_tensor("a").unwrap(), &[21.0, 42.0, 63.0, 84.0]);
}

#[test]
fn test_wrong_arity_fails_at_creation() {
    let ws = workspace_ab();
    let def = OperatorDef::new("Mul", "mul").with_inputs(["a"]).with_outputs(["y"]);
    assert!(matches!(create_operator(&def, &ws), Err(OpError::Kernel { .. })));
}

#[test]
fn test_relu_with_and_without_slope() {
    let ws = Arc::new(Workspace::default());
    ws.feed_tensor("x", &[4], vec![-2.0, -0.5, 0.0, 3.0]).unwrap();

    let def = OperatorDef::new("Relu", "relu").with_inputs(["x"]).with_outputs(["y"]);
    create_operator(&def, &ws).unwrap().run().unwrap();
    assert_close(&ws.fetch_tensor("y").unwrap(), &[0.0, 0.0, 0.0, 3.0]);

    let leaky = def.with_arg(Argument::float("slope", 0.1));
    create_operator(&leaky, &ws).unwrap().run().unwrap();
    assert_close(&ws.fetch_tensor("y").unwrap(), &[-0.2, -0.05, 0.0, 3.0]);
}

fn softmax_def() -> OperatorDef {
    OperatorDef::new("Softmax", "softmax").with_inputs(["x"]).with_outputs(["y"])
}

#[test]
fn test_softmax_rows_sum_to_one() {
    common::init_logging();
    let ws = Arc::new(Workspace::default());
    let mut rng = rand::rng();
    let data: Vec<f32> = (0..12).map(|_| rng.random_range(-5.0..5.0)).collect();
    ws.feed_tensor("x", &[3, 4], data.clone()).unwrap();

    let mut op = create_operator(&softmax_def(), &ws).unwrap();
    op.run().unwrap();
    let y = ws.fetch_tensor("y").unwrap();
    for (row, x) in y.chunks(4).zip(data.chunks(4)) {
        let sum: f32 = row.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        let argmax = |v: &[f32]| {
            v.iter()
                .enumerate()
                .fold(0, |best, (i, &e)| if e > v[best] { i } else { best })
        };
        assert_eq!(argmax(row), argmax(x));
    }
}

#[test]
fn test_softmax_is_stable_for_large_inputs() {
    let ws = Arc::new(Workspace::default());
    ws.feed_tensor("x", &[1, 2], vec![1000.0, 1000.0]).unwrap();
    create_operator(&softmax_def(), &ws).unwrap().run().unwrap();
    assert_close(&ws.fetch_tensor("y").unwrap(), &[0.5, 0.5]);
}

#[test]
fn test_softmax_returns_its_scratch_buffer() {
    let ws = Arc::new(Workspace::default());
    ws.feed_tensor("x", &[2, 2], vec![0.0, 0.0, 1.0, 1.0]).unwrap();

    let mut op = create_operator(&softmax_def(), &ws).unwrap();
    op.run().unwrap();
    assert_eq!(ws.free_buffer_count(), 1);
    op.run().unwrap();
    assert_eq!(ws.free_buffer_count(), 1);

    let debug = Arc::new(Workspace::default());
    debug.feed_tensor("x", &[2, 2], vec![0.0, 0.0, 1.0, 1.0]).unwrap();
    let mut op = create_operator(&softmax_def().with_debug_mode(true), &debug).unwrap();
    op.run().unwrap();
    assert_eq!(debug.free_buffer_count(), 0);
    assert_close(&debug.fetch_tensor("y").unwrap(), &[0.5, 0.5, 0.5, 0.5]);
}

#[test]
fn test_failed_softmax_runs_reuse_one_buffer() {
    let ws = Arc::new(Workspace::default());
    ws.feed_tensor("x", &[4], vec![0.0; 4]).unwrap();
    let mut op = create_operator(&softmax_def(), &ws).unwrap();
    for _ in 0..3 {
        assert!(op.run().is_err());
    }
    let buffers: Vec<String> = ws
        .tensor_names()
        .into_iter()
        .filter(|n| n.starts_with(BUFFER_PREFIX))
        .collect();
    assert_eq!(buffers, ["_t_buffer_0"]);

    // the buffer goes back to the pool once a run succeeds
    ws.feed_tensor("x", &[1, 4], vec![0.0; 4]).unwrap();
    op.run().unwrap();
    assert_eq!(ws.free_buffer_count(), 1);
}

#[test]
fn test_softmax_accepts_negative_axis() {
    let ws = Arc::new(Workspace::default());
    ws.feed_tensor("x", &[2, 1, 2], vec![0.0, 0.0, 3.0, 1.0]).unwrap();
    let def = softmax_def().with_arg(Argument::int("axis", -1));
    create_operator(&def, &ws).unwrap().run().unwrap();
    let y = ws.fetch_tensor("y").unwrap();
    assert_close(&y[..2], &[0.5, 0.5]);
    assert!((y[2] + y[3] - 1.0).abs() < 1e-6);
    assert!(y[2] > y[3]);
}

#[test]
fn test_kernels_parse_their_arguments() {
    let ws = Arc::new(Workspace::new("args"));
    ws.feed_tensor("x", &[2, 2], vec![0.0; 4]).unwrap();
    let unary = |op_type: &str| {
        OperatorDef::new(op_type, "k").with_inputs(["x"]).with_outputs(["y"])
    };

    let relu = KernelOp::<CpuContext, ReluKernel>::new(
        unary("Relu").with_arg(Argument::float("slope", 0.2)),
        Arc::clone(&ws),
    )
    .unwrap();
    assert!((relu.kernel().slope() - 0.2).abs() < 1e-7);

    let softmax =
        KernelOp::<CpuContext, SoftmaxKernel>::new(unary("Softmax"), Arc::clone(&ws)).unwrap();
    assert_eq!(softmax.kernel().axis(), 1);

    let dropout = KernelOp::<CpuContext, DropoutKernel>::new(
        unary("Dropout").with_arg(Argument::float("prob", 0.3)),
        Arc::clone(&ws),
    )
    .unwrap();
    assert!((dropout.kernel().prob() - 0.3).abs() < 1e-7);
    assert_eq!(dropout.kernel().mask_name(), "/mnt/k/dropout/mask");

    let fc = KernelOp::<CpuContext, InnerProductKernel>::new(
        OperatorDef::new("InnerProduct", "k")
            .with_inputs(["x", "w"])
            .with_outputs(["y"])
            .with_arg(Argument::int("num_output", 5)),
        Arc::clone(&ws),
    );
    // "w" was never created
    assert!(matches!(fc, Err(OpError::TensorNotFound { .. })));
    ws.create_tensor("w");
    let fc = KernelOp::<CpuContext, InnerProductKernel>::new(
        OperatorDef::new("InnerProduct", "k")
            .with_inputs(["x", "w"])
            .with_outputs(["y"])
            .with_arg(Argument::int("num_output", 5)),
        ws,
    )
    .unwrap();
    assert_eq!(fc.kernel().num_output(), 5);
    assert!(fc.device_op().allow_run());
}

#[test]
fn test_softmax_rejects_axis_past_the_rank() {
    let ws = Arc::new(Workspace::default());
    ws.feed_tensor("x", &[4], vec![0.0; 4]).unwrap();
    let mut op = create_operator(&softmax_def(), &ws).unwrap();
    assert!(matches!(op.run(), Err(OpError::Kernel { .. })));
}

fn dropout_def(prob: f64, scale: bool) -> OperatorDef {
    OperatorDef::new("Dropout", "drop")
        .with_inputs(["x"])
        .with_outputs(["y"])
        .with_arg(Argument::float("prob", prob))
        .with_arg(Argument::boolean("scale", scale))
}

#[test]
fn test_dropout_depends_on_phase() {
    let ws = Arc::new(Workspace::default());
    ws.feed_tensor("x", &[1000], vec![1.0; 1000]).unwrap();

    let mut op = create_operator(&dropout_def(0.5, true), &ws).unwrap();
    op.run().unwrap();
    assert_eq!(ws.fetch_tensor("y").unwrap(), vec![1.0; 1000]);

    op.switch_to_phase(Phase::Train);
    op.run().unwrap();
    let y = ws.fetch_tensor("y").unwrap();
    assert!(y.iter().all(|&v| v == 0.0 || v == 2.0));
    let kept = y.iter().filter(|&&v| v == 2.0).count();
    assert!((300..=700).contains(&kept), "kept {kept} of 1000");

    let mask = ws.fetch_tensor("/mnt/drop/dropout/mask").unwrap();
    assert_eq!(mask.iter().filter(|&&m| m == 1.0).count(), kept);
}

#[test]
fn test_unscaled_dropout_scales_at_test_time() {
    let ws = Arc::new(Workspace::default());
    ws.feed_tensor("x", &[2], vec![1.0, 4.0]).unwrap();
    let mut op = create_operator(&dropout_def(0.25, false), &ws).unwrap();
    op.run().unwrap();
    assert_close(&ws.fetch_tensor("y").unwrap(), &[0.75, 3.0]);
}

#[test]
fn test_dropout_probability_is_validated() {
    let ws = Arc::new(Workspace::default());
    ws.feed_tensor("x", &[2], vec![1.0, 4.0]).unwrap();
    assert!(matches!(
        create_operator(&dropout_def(1.0, true), &ws),
        Err(OpError::Kernel { .. })
    ));
}

#[cfg(feature = "wgpu")]
mod gpu {
    use super::*;
    use opcore::backend::DeviceOption;

    #[test]
    #[ignore = "requires GPU"]
    fn test_gpu_add_matches_host() {
        let ws = workspace_ab();
        let def = binary("Add", "b", "y").with_device(DeviceOption::cuda(0));
        create_operator(&def, &ws).unwrap().run().unwrap();
        assert_close(&ws.fetch_tensor("y").unwrap(), &[11.0, 22.0, 33.0, 44.0]);
    }

    #[test]
    #[ignore = "requires GPU"]
    fn test_cudnn_relu_matches_host() {
        let ws = Arc::new(Workspace::default());
        ws.feed_tensor("x", &[3], vec![-1.0, 0.0, 2.0]).unwrap();
        let def = OperatorDef::new("Relu", "relu")
            .with_inputs(["x"])
            .with_outputs(["y"])
            .with_device(DeviceOption::cudnn(0));
        create_operator(&def, &ws).unwrap().run().unwrap();
        assert_close(&ws.fetch_tensor("y").unwrap(), &[0.0, 0.0, 2.0]);
    }
}
