//! Collective-communication rank gate.
//!
//! An operator descriptor may carry a repeated `"mpi_rank"` argument listing
//! the process ranks allowed to execute it. Every other rank constructs the
//! operator but never runs it.
//!
//! The rank of the current process is installed once by the launcher through
//! [`set_rank`]; it is stored in a relaxed global atomic because it changes
//! at most once per process, before any operator is created.
//!
//! When the `collective` feature is disabled the gate is compiled out and
//! [`rank_allowed`] always returns `true`.

#[cfg(feature = "collective")]
use core::sync::atomic::{AtomicI32, Ordering};

/// Name of the argument holding the allowed ranks.
pub const RANK_ARG: &str = "mpi_rank";

#[cfg(feature = "collective")]
static CURRENT_RANK: AtomicI32 = AtomicI32::new(0);

/// Installs the rank of the current process.
///
/// # Example
///
/// ```
/// opcore::comm::set_rank(0);
/// assert_eq!(opcore::comm::rank(), 0);
/// ```
pub fn set_rank(rank: i32) {
    #[cfg(feature = "collective")]
    CURRENT_RANK.store(rank, Ordering::Release);
    #[cfg(not(feature = "collective"))]
    let _ = rank;
}

/// Returns the rank of the current process (`0` unless [`set_rank`] was called).
pub fn rank() -> i32 {
    #[cfg(feature = "collective")]
    {
        CURRENT_RANK.load(Ordering::Acquire)
    }
    #[cfg(not(feature = "collective"))]
    {
        0
    }
}

/// Whether an operator restricted to `allowed` may run on this process.
///
/// An empty list places no restriction.
pub fn rank_allowed(allowed: &[i32]) -> bool {
    #[cfg(feature = "collective")]
    {
        allowed.is_empty() || allowed.contains(&rank())
    }
    #[cfg(not(feature = "collective"))]
    {
        let _ = allowed;
        true
    }
}
