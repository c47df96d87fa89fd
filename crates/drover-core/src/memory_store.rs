//! In-memory task store. Nothing survives a restart; used in tests and for
//! embedding the scheduler where durability is not needed.

use async_trait::async_trait;
use std::{collections::BTreeMap, sync::Mutex};

use drover_types::task_store::TicketGenerator;

use crate::prelude::*;

#[derive(Debug, Default)]
pub struct MemoryTaskStore {
	tasks: Mutex<BTreeMap<TaskId, TaskRecord>>,
	tickets: TicketGenerator,
}

impl MemoryTaskStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn update<F>(&self, id: TaskId, f: F) -> DrResult<TaskRecord>
	where
		F: FnOnce(&mut TaskRecord),
	{
		let mut tasks = lock!(self.tasks, "tasks")?;
		let task = tasks.get_mut(&id).ok_or(Error::NotFound)?;
		f(task);
		Ok(task.clone())
	}
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
	async fn save(&self, task: &TaskRecord) -> DrResult<TaskRecord> {
		let mut task = task.clone();
		if task.id == 0 {
			task.id = self.tickets.next_id();
		} else {
			self.tickets.observe(task.id);
		}
		let now = Timestamp::now();
		if !task.created_at.is_set() {
			task.created_at = now;
		}
		task.updated_at = now;

		let mut tasks = lock!(self.tasks, "tasks")?;
		if let Some(key) = &task.custom_key
			&& tasks.values().any(|t| t.id != task.id && t.custom_key.as_ref() == Some(key))
		{
			return Err(Error::Configuration(format!("duplicate custom key: {}", key)));
		}
		tasks.insert(task.id, task.clone());
		Ok(task)
	}

	async fn read_task(&self, id: TaskId) -> DrResult<Option<TaskRecord>> {
		Ok(lock!(self.tasks, "tasks")?.get(&id).cloned())
	}

	async fn find_by_custom_key(&self, key: &str) -> DrResult<Option<TaskRecord>> {
		let tasks = lock!(self.tasks, "tasks")?;
		Ok(tasks.values().find(|t| t.custom_key.as_deref() == Some(key)).cloned())
	}

	async fn load_tasks(&self) -> DrResult<Vec<TaskRecord>> {
		let tasks = lock!(self.tasks, "tasks")?;
		Ok(tasks.values().filter(|t| !t.is_completed()).cloned().collect())
	}

	async fn lock_for_processing(
		&self,
		task: &TaskRecord,
		now: Timestamp,
	) -> DrResult<Option<TaskRecord>> {
		let mut tasks = lock!(self.tasks, "tasks")?;
		let Some(stored) = tasks.get_mut(&task.id) else {
			return Ok(None);
		};
		if !stored.is_claimable() {
			return Ok(None);
		}
		stored.apply_lock(uuid::Uuid::new_v4().to_string(), now);
		Ok(Some(stored.clone()))
	}

	async fn find_and_lock_next(
		&self,
		now: Timestamp,
		local_mode: &str,
	) -> DrResult<Option<TaskRecord>> {
		let mut tasks = lock!(self.tasks, "tasks")?;
		let next = tasks
			.values_mut()
			.filter(|t| {
				t.is_claimable() && t.execute_at <= now && t.local_mode.as_ref() == local_mode
			})
			.min_by_key(|t| (t.execute_at, t.id));
		Ok(next.map(|task| {
			task.apply_lock(uuid::Uuid::new_v4().to_string(), now);
			task.clone()
		}))
	}

	async fn update_if_unchanged(
		&self,
		merged: &TaskRecord,
		now: Timestamp,
	) -> DrResult<Option<TaskRecord>> {
		let mut tasks = lock!(self.tasks, "tasks")?;
		let Some(stored) = tasks.get_mut(&merged.id) else {
			return Ok(None);
		};
		if !stored.is_unchanged_since(merged) {
			return Ok(None);
		}
		stored.apply_merge(merged, now);
		Ok(Some(stored.clone()))
	}

	async fn mark_complete(&self, task: &TaskRecord, now: Timestamp) -> DrResult<TaskRecord> {
		self.update(task.id, |t| t.record_completion(now))
	}

	async fn mark_failed(
		&self,
		task: &TaskRecord,
		error: &str,
		policy: &RetryPolicy,
		now: Timestamp,
	) -> DrResult<TaskRecord> {
		self.update(task.id, |t| t.record_failure(error, policy, now))
	}

	async fn reset_for_retry(&self, id: TaskId, now: Timestamp) -> DrResult<Option<TaskRecord>> {
		match self.update(id, |t| t.reset_for_retry(now)) {
			Ok(task) => Ok(Some(task)),
			Err(Error::NotFound) => Ok(None),
			Err(err) => Err(err),
		}
	}

	async fn delete_old_tasks(&self, before: Timestamp) -> DrResult<u64> {
		let mut tasks = lock!(self.tasks, "tasks")?;
		let count = tasks.len();
		tasks.retain(|_, t| !(t.is_completed() && t.completed_at < before));
		Ok((count - tasks.len()) as u64)
	}

	async fn count_stuck(&self, before: Timestamp) -> DrResult<u64> {
		let tasks = lock!(self.tasks, "tasks")?;
		Ok(tasks.values().filter(|t| t.is_stuck(before)).count() as u64)
	}

	async fn count_completed(&self) -> DrResult<u64> {
		let tasks = lock!(self.tasks, "tasks")?;
		Ok(tasks.values().filter(|t| t.is_completed()).count() as u64)
	}

	async fn count_pending(&self, local_mode: &str) -> DrResult<u64> {
		let tasks = lock!(self.tasks, "tasks")?;
		Ok(tasks
			.values()
			.filter(|t| t.is_claimable() && t.local_mode.as_ref() == local_mode)
			.count() as u64)
	}
}


// vim: ts=4
