//! Privileged executor implementations.
//!
//! [`UnixExecutor`] is what the daemon runs with; [`mock::RecordingExecutor`]
//! stands in for it in tests.

pub mod mock;
pub mod unix;

pub use unix::UnixExecutor;
