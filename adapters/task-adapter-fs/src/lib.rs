//! Filesystem-backed task store.
//!
//! Each task is a JSON file in the folder matching its state. Claiming a task
//! renames its file from `pending/` to `locked/`; the rename is atomic, so when
//! several processes share a directory exactly one of them wins. Mutations made
//! by one process are serialized behind an async mutex.

use async_trait::async_trait;
use std::path::Path;
use tokio::{
	fs::{self, create_dir_all},
	sync::Mutex,
};

use drover_types::{
	prelude::*,
	retry::RetryPolicy,
	task::TaskRecord,
	task_store::{TaskStore, TicketGenerator},
};

pub mod folder;

use folder::{
	Folder, list_ids, parse_file_name, read_in, read_record, remove_if_exists, task_path,
	write_record,
};

const LIVE: [Folder; 3] = [Folder::Pending, Folder::Locked, Folder::Failed];

#[derive(Debug)]
pub struct TaskAdapterFs {
	base_dir: Box<Path>,
	tickets: TicketGenerator,
	write_lock: Mutex<()>,
}

impl TaskAdapterFs {
	pub async fn new(base_dir: impl AsRef<Path>) -> DrResult<Self> {
		let base_dir: Box<Path> = base_dir.as_ref().into();
		let tickets = TicketGenerator::new();
		for folder in Folder::ALL {
			create_dir_all(base_dir.join(folder.name())).await?;
			for id in list_ids(&base_dir, folder).await? {
				tickets.observe(id);
			}
		}
		info!("File task store at {:?}", base_dir);
		Ok(Self { base_dir, tickets, write_lock: Mutex::new(()) })
	}

	pub fn base_dir(&self) -> &Path {
		&self.base_dir
	}

	/// Find the authoritative copy of a task
	async fn locate(&self, id: TaskId) -> DrResult<Option<(Folder, TaskRecord)>> {
		for folder in Folder::STATES {
			if let Some(task) = read_in(&self.base_dir, folder, id).await? {
				return Ok(Some((folder, task)));
			}
		}
		Ok(None)
	}

	async fn scan(&self, folders: &[Folder]) -> DrResult<Vec<TaskRecord>> {
		let mut tasks = Vec::new();
		for &folder in folders {
			for id in list_ids(&self.base_dir, folder).await? {
				match read_in(&self.base_dir, folder, id).await {
					Ok(Some(task)) => tasks.push(task),
					// Moved by someone else since the listing
					Ok(None) => {}
					Err(err) => {
						warn!("Skipping unreadable task file {}/{}.json: {}", folder.name(), id, err);
					}
				}
			}
		}
		Ok(tasks)
	}

	/// Write a record into the folder of its state and drop the copy it replaces
	async fn store(&self, task: &TaskRecord, previous: Option<Folder>) -> DrResult<()> {
		let folder = Folder::of(task);
		write_record(&self.base_dir, folder, task).await?;
		if let Some(previous) = previous.filter(|p| *p != folder) {
			remove_if_exists(&task_path(&self.base_dir, previous, task.id)).await?;
		}
		Ok(())
	}

	async fn update<F>(&self, id: TaskId, f: F) -> DrResult<Option<TaskRecord>>
	where
		F: FnOnce(&mut TaskRecord) + Send,
	{
		let _guard = self.write_lock.lock().await;
		let Some((folder, mut task)) = self.locate(id).await? else {
			return Ok(None);
		};
		f(&mut task);
		self.store(&task, Some(folder)).await?;
		Ok(Some(task))
	}
}

#[async_trait]
impl TaskStore for TaskAdapterFs {
	async fn save(&self, task: &TaskRecord) -> DrResult<TaskRecord> {
		let _guard = self.write_lock.lock().await;
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

		if let Some(key) = &task.custom_key
			&& let Some(other) = self.find_by_custom_key(key).await?
			&& other.id != task.id
		{
			return Err(Error::Configuration(format!("duplicate custom key: {}", key)));
		}

		let previous = self.locate(task.id).await?.map(|(folder, _)| folder);
		self.store(&task, previous).await?;
		Ok(task)
	}

	async fn read_task(&self, id: TaskId) -> DrResult<Option<TaskRecord>> {
		Ok(self.locate(id).await?.map(|(_, task)| task))
	}

	async fn find_by_custom_key(&self, key: &str) -> DrResult<Option<TaskRecord>> {
		let tasks = self.scan(&Folder::STATES).await?;
		Ok(tasks.into_iter().find(|t| t.custom_key.as_deref() == Some(key)))
	}

	async fn load_tasks(&self) -> DrResult<Vec<TaskRecord>> {
		self.scan(&LIVE).await
	}

	async fn lock_for_processing(
		&self,
		task: &TaskRecord,
		now: Timestamp,
	) -> DrResult<Option<TaskRecord>> {
		let _guard = self.write_lock.lock().await;
		let pending = task_path(&self.base_dir, Folder::Pending, task.id);
		let locked = task_path(&self.base_dir, Folder::Locked, task.id);
		match fs::rename(&pending, &locked).await {
			Ok(()) => {}
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
				debug!("Task {} is no longer pending", task.id);
				return Ok(None);
			}
			Err(err) => return Err(err.into()),
		}

		let Some(mut stored) = read_record(&locked).await? else {
			return Ok(None);
		};
		stored.apply_lock(uuid::Uuid::new_v4().to_string(), now);
		write_record(&self.base_dir, Folder::Locked, &stored).await?;
		Ok(Some(stored))
	}

	async fn update_if_unchanged(
		&self,
		merged: &TaskRecord,
		now: Timestamp,
	) -> DrResult<Option<TaskRecord>> {
		let _guard = self.write_lock.lock().await;
		let Some((folder, mut task)) = self.locate(merged.id).await? else {
			return Ok(None);
		};
		if !task.is_unchanged_since(merged) {
			debug!("Task {} changed since it was read, merge skipped", merged.id);
			return Ok(None);
		}
		task.apply_merge(merged, now);
		self.store(&task, Some(folder)).await?;
		Ok(Some(task))
	}

	async fn mark_complete(&self, task: &TaskRecord, now: Timestamp) -> DrResult<TaskRecord> {
		self.update(task.id, |t| t.record_completion(now)).await?.ok_or(Error::NotFound)
	}

	async fn mark_failed(
		&self,
		task: &TaskRecord,
		error: &str,
		policy: &RetryPolicy,
		now: Timestamp,
	) -> DrResult<TaskRecord> {
		self.update(task.id, |t| t.record_failure(error, policy, now))
			.await?
			.ok_or(Error::NotFound)
	}

	async fn reset_for_retry(&self, id: TaskId, now: Timestamp) -> DrResult<Option<TaskRecord>> {
		self.update(id, |t| t.reset_for_retry(now)).await
	}

	async fn delete_old_tasks(&self, before: Timestamp) -> DrResult<u64> {
		let _guard = self.write_lock.lock().await;
		let mut deleted = 0;
		for task in self.scan(&[Folder::Completed]).await? {
			if task.completed_at < before
				&& remove_if_exists(&task_path(&self.base_dir, Folder::Completed, task.id)).await?
			{
				deleted += 1;
			}
		}
		Ok(deleted)
	}

	async fn count_stuck(&self, before: Timestamp) -> DrResult<u64> {
		let tasks = self.scan(&LIVE).await?;
		Ok(tasks.iter().filter(|t| t.is_stuck(before)).count() as u64)
	}

	async fn count_completed(&self) -> DrResult<u64> {
		Ok(list_ids(&self.base_dir, Folder::Completed).await?.len() as u64)
	}

	async fn count_pending(&self, local_mode: &str) -> DrResult<u64> {
		let tasks = self.scan(&[Folder::Pending]).await?;
		Ok(tasks
			.iter()
			.filter(|t| t.is_claimable() && t.local_mode.as_ref() == local_mode)
			.count() as u64)
	}

	async fn take_manual_retries(&self, now: Timestamp) -> DrResult<Vec<TaskRecord>> {
		let _guard = self.write_lock.lock().await;
		let mut tasks = Vec::new();
		let mut entries = fs::read_dir(self.base_dir.join(Folder::ManualRetry.name())).await?;
		while let Some(entry) = entries.next_entry().await? {
			let Some(file_id) = entry.file_name().to_str().and_then(parse_file_name) else {
				continue;
			};
			let path = entry.path();
			let mut task = match read_record(&path).await {
				Ok(Some(task)) => task,
				Ok(None) => continue,
				Err(err) => {
					warn!("Invalid manual retry file {:?}: {}", path, err);
					fs::rename(&path, path.with_extension("json.invalid")).await?;
					continue;
				}
			};
			if task.id == 0 {
				task.id = file_id;
			}
			self.tickets.observe(task.id);

			for folder in Folder::STATES {
				remove_if_exists(&task_path(&self.base_dir, folder, task.id)).await?;
			}
			task.completed_at = Timestamp::ZERO;
			task.reset_for_retry(now);
			write_record(&self.base_dir, Folder::Pending, &task).await?;
			remove_if_exists(&path).await?;
			info!("Task {} picked up from {}", task.id, Folder::ManualRetry.name());
			tasks.push(task);
		}
		Ok(tasks)
	}
}

// vim: ts=4
