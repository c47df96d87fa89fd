//! The task record: the durable unit of work, and its lifecycle transitions.
//!
//! A record is always in exactly one [`TaskState`], which is derived from the
//! timestamp and lock fields rather than stored separately. Every transition is
//! a method on the record so all storage backends apply the same rules and only
//! differ in how they persist the result.

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::retry::RetryPolicy;
use crate::types::{TaskId, Timestamp, SECOND_MS};

/// How far in the past an "as soon as possible" task is scheduled. Keeps it ahead
/// of future-dated tasks and eligible on hosts whose clocks lag slightly.
pub const IMMEDIATE_OFFSET_MS: i64 = 15 * SECOND_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
	Pending,
	Locked,
	Completed,
	Failed,
}

impl std::fmt::Display for TaskState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			TaskState::Pending => "pending",
			TaskState::Locked => "locked",
			TaskState::Completed => "completed",
			TaskState::Failed => "failed",
		};
		f.write_str(s)
	}
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskRecord {
	pub id: TaskId,
	pub custom_key: Option<Box<str>>,
	pub handler_name: Box<str>,
	pub data_json: Box<str>,
	pub created_at: Timestamp,
	pub updated_at: Timestamp,
	pub execute_at: Timestamp,
	pub originally_scheduled_for: Timestamp,
	pub locked_at: Timestamp,
	pub lock_uuid: Box<str>,
	pub try_count: u32,
	pub never_retry: bool,
	pub failed_at: Timestamp,
	pub completed_at: Timestamp,
	pub error_message: Box<str>,
	pub local_mode: Box<str>,
}

impl TaskRecord {
	pub fn new(handler_name: impl Into<Box<str>>, data_json: impl Into<Box<str>>) -> Self {
		Self { handler_name: handler_name.into(), data_json: data_json.into(), ..Default::default() }
	}

	pub fn with_custom_key(mut self, key: Option<&str>) -> Self {
		self.custom_key = key.filter(|k| !k.is_empty()).map(Into::into);
		self
	}

	pub fn with_execute_at(mut self, execute_at: Timestamp) -> Self {
		self.execute_at = execute_at;
		self
	}

	pub fn state(&self) -> TaskState {
		if self.completed_at.is_set() {
			TaskState::Completed
		} else if self.failed_at.is_set() {
			TaskState::Failed
		} else if self.is_locked() {
			TaskState::Locked
		} else {
			TaskState::Pending
		}
	}

	pub fn is_locked(&self) -> bool {
		self.locked_at.is_set() || !self.lock_uuid.is_empty()
	}

	pub fn is_completed(&self) -> bool {
		self.completed_at.is_set()
	}

	pub fn is_failed(&self) -> bool {
		self.failed_at.is_set()
	}

	/// Pending, unlocked, and not terminal: may be claimed once `execute_at` arrives
	pub fn is_claimable(&self) -> bool {
		self.state() == TaskState::Pending
	}

	/// A rescheduled task keeps its original target; a first-time schedule captures it.
	pub fn align_schedule(&mut self) {
		if self.originally_scheduled_for.is_set() {
			self.execute_at = self.originally_scheduled_for;
		} else if self.execute_at.is_set() {
			self.originally_scheduled_for = self.execute_at;
		}
	}

	/// Give an unscheduled task an execution time slightly in the past.
	pub fn schedule_immediately_if_unset(&mut self, now: Timestamp) {
		if !self.execute_at.is_set() {
			self.execute_at = now.add_ms(-IMMEDIATE_OFFSET_MS);
			if !self.originally_scheduled_for.is_set() {
				self.originally_scheduled_for = self.execute_at;
			}
		}
	}

	pub fn apply_lock(&mut self, lock_uuid: impl Into<Box<str>>, now: Timestamp) {
		self.lock_uuid = lock_uuid.into();
		self.locked_at = now;
		self.updated_at = now;
	}

	pub fn clear_lock(&mut self) {
		self.lock_uuid = "".into();
		self.locked_at = Timestamp::ZERO;
	}

	pub fn record_completion(&mut self, now: Timestamp) {
		self.completed_at = now;
		self.updated_at = now;
	}

	/// Count a failed attempt. Either reschedules the task with backoff (clearing
	/// the lock so it can be claimed again) or marks it permanently failed.
	pub fn record_failure(&mut self, error: &str, policy: &RetryPolicy, now: Timestamp) {
		self.try_count += 1;
		self.error_message = error.into();
		self.updated_at = now;
		if self.never_retry || !policy.should_retry(self.try_count) {
			self.failed_at = now;
		} else {
			self.execute_at = now.add_ms(policy.backoff_ms(self.try_count));
			self.clear_lock();
		}
	}

	/// Fold a re-enqueued copy into this record. The payload is always replaced;
	/// the schedule only moves while no attempt has been made. Returns whether
	/// the schedule moved.
	pub fn merge_enqueued(&mut self, task: &TaskRecord) -> bool {
		self.handler_name.clone_from(&task.handler_name);
		self.data_json.clone_from(&task.data_json);
		let moved = self.try_count == 0
			&& task.execute_at.is_set()
			&& task.execute_at != self.execute_at;
		if moved {
			self.execute_at = task.execute_at;
			self.originally_scheduled_for = task.originally_scheduled_for;
		}
		moved
	}

	/// Whether this stored record is still the one `snapshot` was read from, as far
	/// as claiming, attempts and terminal states go
	pub fn is_unchanged_since(&self, snapshot: &TaskRecord) -> bool {
		!self.is_completed()
			&& self.lock_uuid == snapshot.lock_uuid
			&& self.locked_at == snapshot.locked_at
			&& self.try_count == snapshot.try_count
			&& self.failed_at == snapshot.failed_at
	}

	/// Copy the fields a merge may change from `merged`
	pub fn apply_merge(&mut self, merged: &TaskRecord, now: Timestamp) {
		self.handler_name.clone_from(&merged.handler_name);
		self.data_json.clone_from(&merged.data_json);
		self.execute_at = merged.execute_at;
		self.originally_scheduled_for = merged.originally_scheduled_for;
		self.updated_at = now;
	}

	/// Operator reset: forget previous attempts and make the task eligible again.
	/// A completed task is left as it is.
	pub fn reset_for_retry(&mut self, now: Timestamp) {
		if self.is_completed() {
			return;
		}
		self.clear_lock();
		self.try_count = 0;
		self.failed_at = Timestamp::ZERO;
		self.error_message = "".into();
		self.execute_at = now.add_ms(-IMMEDIATE_OFFSET_MS);
		self.updated_at = now;
	}

	/// Originally due before `before` and still not done
	pub fn is_stuck(&self, before: Timestamp) -> bool {
		!self.is_completed()
			&& self.originally_scheduled_for.is_set()
			&& self.originally_scheduled_for < before
	}
}


// vim: ts=4
