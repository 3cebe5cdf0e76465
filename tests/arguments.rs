use std::sync::Arc;

use opcore::error::OpError;
use opcore::operator::OperatorBase;
use opcore::proto::{Argument, OperatorDef};
use opcore::workspace::Workspace;

fn op_with(args: Vec<Argument>) -> OperatorBase {
    let def = args.into_iter().fold(OperatorDef::new("Args", "args"), OperatorDef::with_arg);
    OperatorBase::new(def, Arc::new(Workspace::default())).unwrap()
}

#[test]
fn test_repeated_arguments_round_trip() {
    let op = op_with(vec![
        Argument::ints("dims", [3, -1, 7]),
        Argument::floats("scales", [0.5, 2.0]),
        Argument::strings("names", ["x", "y"]),
    ]);
    assert_eq!(op.get_repeated_arg::<i64>("dims").unwrap(), vec![3, -1, 7]);
    assert_eq!(op.get_repeated_arg::<i32>("dims").unwrap(), vec![3, -1, 7]);
    assert_eq!(op.get_repeated_arg::<f32>("scales").unwrap(), vec![0.5, 2.0]);
    assert_eq!(op.get_repeated_arg::<f64>("scales").unwrap(), vec![0.5, 2.0]);
    assert_eq!(op.get_repeated_arg::<String>("names").unwrap(), vec!["x", "y"]);
}

#[test]
fn test_absent_arguments_yield_defaults() {
    let op = op_with(Vec::new());
    assert_eq!(op.get_single_arg("axis", -1i64).unwrap(), -1);
    assert_eq!(op.get_single_arg("scale", 0.25f32).unwrap(), 0.25);
    assert!(op.get_single_arg("flag", true).unwrap());
    assert_eq!(op.get_single_arg("mode", String::from("avg")).unwrap(), "avg");
    assert!(op.get_repeated_arg::<i64>("dims").unwrap().is_empty());
    assert!(op.get_repeated_arg::<String>("names").unwrap().is_empty());
}

#[test]
fn test_scalar_arguments_are_read_from_their_slot() {
    let op = op_with(vec![
        Argument::int("axis", 2),
        Argument::float("slope", 0.1),
        Argument::boolean("transW", false),
        Argument::string("mode", "max"),
    ]);
    assert_eq!(op.get_single_arg::<usize>("axis", 0).unwrap(), 2);
    assert!((op.get_single_arg::<f32>("slope", 0.0).unwrap() - 0.1).abs() < 1e-7);
    assert!(!op.get_single_arg("transW", true).unwrap());
    assert_eq!(op.get_single_arg("mode", String::new()).unwrap(), "max");
}

#[test]
fn test_kind_mismatch_is_an_error() {
    let op = op_with(vec![Argument::float("slope", 0.1), Argument::ints("dims", [1, 2])]);

    let err = op.get_single_arg::<i64>("slope", 0).unwrap_err();
    assert!(matches!(
        err,
        OpError::ArgumentKindMismatch { ref arg, expected: "int", found: "float", .. } if arg == "slope"
    ));

    // a scalar read of a repeated slot is a mismatch too
    assert!(matches!(
        op.get_single_arg::<i64>("dims", 0),
        Err(OpError::ArgumentKindMismatch { found: "ints", .. })
    ));
    assert!(matches!(
        op.get_repeated_arg::<f32>("dims"),
        Err(OpError::ArgumentKindMismatch { expected: "floats", .. })
    ));
}

#[test]
fn test_narrowing_overflow_is_an_error() {
    let op = op_with(vec![Argument::int("big", i64::from(u32::MAX) + 1), Argument::int("neg", -1)]);
    assert!(matches!(
        op.get_single_arg::<u32>("big", 0),
        Err(OpError::ArgumentOverflow { target: "u32", .. })
    ));
    assert!(matches!(
        op.get_single_arg::<usize>("neg", 0),
        Err(OpError::ArgumentOverflow { target: "usize", .. })
    ));
    assert_eq!(op.get_single_arg::<u64>("big", 0).unwrap(), 1 << 32);
}
