//! Shared types for the Drover task queue.
//!
//! This crate holds everything the scheduler and the storage adapters have to
//! agree on: the task record and its lifecycle transitions, the retry policy,
//! the storage trait and the common error type. Adapter crates depend only on
//! this crate, so they compile in parallel with the scheduler core.

#![forbid(unsafe_code)]

pub mod error;
pub mod prelude;
pub mod retry;
pub mod task;
pub mod task_store;
pub mod types;

/// Lock a `std::sync::Mutex`, mapping a poisoned lock to `Error::Internal`.
///
/// ```ignore
/// let queue = lock!(self.queue, "queue")?;
/// ```
#[macro_export]
macro_rules! lock {
	($mutex:expr) => {
		$mutex
			.lock()
			.map_err(|_| $crate::error::Error::Internal("mutex poisoned".into()))
	};
	($mutex:expr, $name:literal) => {
		$mutex.lock().map_err(|_| {
			$crate::prelude::error!("Mutex poisoned: {}", $name);
			$crate::error::Error::Internal(concat!("mutex poisoned: ", $name).into())
		})
	};
}

// vim: ts=4
