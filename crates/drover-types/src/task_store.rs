//! Task storage adapter trait.
//!
//! A `TaskStore` owns the authoritative copy of every task record. Records are
//! passed in and handed back by value: callers never mutate a shared instance,
//! they submit a snapshot and receive the persisted result.

use async_trait::async_trait;
use std::{
	fmt::Debug,
	sync::atomic::{AtomicU64, Ordering},
};

use crate::prelude::*;
use crate::retry::RetryPolicy;
use crate::task::TaskRecord;

/// Number of select-then-update rounds a store attempts before giving up a poll cycle
pub const MAX_LOCK_ATTEMPTS: usize = 10;

#[async_trait]
pub trait TaskStore: Debug + Send + Sync {
	/// Insert or fully overwrite a record. Assigns an id when `task.id == 0`.
	async fn save(&self, task: &TaskRecord) -> DrResult<TaskRecord>;

	async fn read_task(&self, id: TaskId) -> DrResult<Option<TaskRecord>>;

	/// Look up a task by its custom key, in any state
	async fn find_by_custom_key(&self, key: &str) -> DrResult<Option<TaskRecord>>;

	/// All tasks that are not completed. Called once when the scheduler boots.
	async fn load_tasks(&self) -> DrResult<Vec<TaskRecord>>;

	/// Claim a task. Returns the locked record, or `None` if the task is already
	/// locked, terminal, or another claimant won the race.
	async fn lock_for_processing(
		&self,
		task: &TaskRecord,
		now: Timestamp,
	) -> DrResult<Option<TaskRecord>>;

	/// Atomically find the earliest eligible task of `local_mode` and claim it.
	///
	/// Only stores shared between processes implement this.
	async fn find_and_lock_next(
		&self,
		_now: Timestamp,
		_local_mode: &str,
	) -> DrResult<Option<TaskRecord>> {
		Err(Error::Unsupported("find_and_lock_next"))
	}

	/// Write the payload and schedule of `merged` (see [`TaskRecord::apply_merge`])
	/// provided the stored row is still the one `merged` was derived from. Returns
	/// `None` when the task was claimed, completed or failed in the meantime.
	async fn update_if_unchanged(
		&self,
		merged: &TaskRecord,
		now: Timestamp,
	) -> DrResult<Option<TaskRecord>>;

	async fn mark_complete(&self, task: &TaskRecord, now: Timestamp) -> DrResult<TaskRecord>;

	/// Count a failed attempt and persist either the rescheduled or the
	/// permanently failed record (see [`TaskRecord::record_failure`]).
	async fn mark_failed(
		&self,
		task: &TaskRecord,
		error: &str,
		policy: &RetryPolicy,
		now: Timestamp,
	) -> DrResult<TaskRecord>;

	/// Operator reset of lock, failure and try count fields
	async fn reset_for_retry(&self, id: TaskId, now: Timestamp) -> DrResult<Option<TaskRecord>>;

	/// Delete tasks completed before `before`. Returns the number removed.
	async fn delete_old_tasks(&self, before: Timestamp) -> DrResult<u64>;

	/// Not completed, and originally scheduled before `before`
	async fn count_stuck(&self, before: Timestamp) -> DrResult<u64>;

	async fn count_completed(&self) -> DrResult<u64>;

	/// Count claimable tasks of `local_mode`, regardless of their execution time
	async fn count_pending(&self, local_mode: &str) -> DrResult<u64>;

	/// Collect tasks an operator dropped into the manual retry area, already reset.
	async fn take_manual_retries(&self, _now: Timestamp) -> DrResult<Vec<TaskRecord>> {
		Ok(Vec::new())
	}
}

/// Time-derived ticket ids: `epoch_ms * 1000 + sequence`, strictly increasing
/// within a process.
#[derive(Debug, Default)]
pub struct TicketGenerator {
	last: AtomicU64,
}

impl TicketGenerator {
	pub fn new() -> Self {
		Self::default()
	}

	/// Make sure future tickets are greater than an id seen in storage
	pub fn observe(&self, id: TaskId) {
		self.last.fetch_max(id, Ordering::SeqCst);
	}

	pub fn next_id(&self) -> TaskId {
		let candidate = (Timestamp::now().0.max(0) as u64).saturating_mul(1000);
		let mut last = self.last.load(Ordering::SeqCst);
		loop {
			let next = candidate.max(last + 1);
			match self.last.compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst) {
				Ok(_) => return next,
				Err(actual) => last = actual,
			}
		}
	}
}


// vim: ts=4
