//! Supervision primitives for rosetta-op
//!
//! A [`CancellationScope`] is shared by every task of a run, a [`TaskGroup`]
//! runs named tasks under that scope and surfaces the first failure, and a
//! [`SignalWatcher`] turns the first termination signal into a cancellation.

pub mod error;
pub mod scope;
pub mod signal;
pub mod task_group;

pub use error::TaskFailure;
pub use scope::CancellationScope;
pub use signal::{OsSignals, SignalFlag, SignalSource, SignalWatcher, WatcherHandle};
pub use task_group::{RunningGroup, TaskGroup};
