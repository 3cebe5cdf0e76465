#![allow(dead_code)]

use std::sync::{Arc, Once};

use opcore::workspace::Workspace;

static LOGGING: Once = Once::new();

/// Installs a fmt subscriber once per test binary; `RUST_LOG`-style
/// filtering is not needed, everything at `debug` goes to the test writer.
pub fn init_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// Fresh workspace with `a = [1, 2, 3, 4]` and `b = [10, 20, 30, 40]`.
pub fn workspace_ab() -> Arc<Workspace> {
    init_logging();
    let ws = Workspace::new("test");
    ws.feed_tensor("a", &[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
    ws.feed_tensor("b", &[2, 2], vec![10.0, 20.0, 30.0, 40.0]).unwrap();
    Arc::new(ws)
}

pub fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len(), "length mismatch: {actual:?} vs {expected:?}");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!((a - e).abs() < 1e-5, "element {i}: {a} != {e}");
    }
}
