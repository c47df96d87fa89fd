//! SQLite-backed task store.
//!
//! Claims are a conditional `UPDATE` that only matches unlocked, non-terminal
//! rows, so any number of worker processes can share one database file. This is
//! the store for the shared scheduling strategy: it answers
//! [`TaskStore::find_and_lock_next`] directly in SQL.

use async_trait::async_trait;
use sqlx::sqlite::{self, SqlitePool};
use std::path::Path;

use drover_types::{prelude::*, retry::RetryPolicy, task::TaskRecord, task_store::TaskStore};

mod schema;
mod task;
mod utils;

use utils::db_err;

#[derive(Debug)]
pub struct TaskAdapterSqlite {
	db: SqlitePool,
}

impl TaskAdapterSqlite {
	/// Open (or create) the database file at `path`
	pub async fn new(path: impl AsRef<Path>) -> DrResult<Self> {
		let path = path.as_ref();
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			tokio::fs::create_dir_all(parent).await?;
		}
		let opts = sqlite::SqliteConnectOptions::new()
			.filename(path)
			.create_if_missing(true)
			.journal_mode(sqlite::SqliteJournalMode::Wal);
		let db = sqlite::SqlitePoolOptions::new()
			.max_connections(5)
			.connect_with(opts)
			.await
			.map_err(db_err)?;

		schema::init_db(&db).await.map_err(db_err)?;
		let version = schema::schema_version(&db).await.map_err(db_err)?;
		info!("SQLite task store at {:?} (schema v{})", path, version.unwrap_or_default());

		Ok(Self { db })
	}

	/// Read a task, apply a transition and write it back
	async fn update<F>(&self, id: TaskId, f: F) -> DrResult<Option<TaskRecord>>
	where
		F: FnOnce(&mut TaskRecord) + Send,
	{
		let Some(mut task) = task::read(&self.db, id).await? else {
			return Ok(None);
		};
		f(&mut task);
		task::save(&self.db, &task).await.map(Some)
	}
}

#[async_trait]
impl TaskStore for TaskAdapterSqlite {
	async fn save(&self, task: &TaskRecord) -> DrResult<TaskRecord> {
		task::save(&self.db, task).await
	}

	async fn read_task(&self, id: TaskId) -> DrResult<Option<TaskRecord>> {
		task::read(&self.db, id).await
	}

	async fn find_by_custom_key(&self, key: &str) -> DrResult<Option<TaskRecord>> {
		task::find_by_custom_key(&self.db, key).await
	}

	async fn load_tasks(&self) -> DrResult<Vec<TaskRecord>> {
		task::list_open(&self.db).await
	}

	async fn lock_for_processing(
		&self,
		task: &TaskRecord,
		now: Timestamp,
	) -> DrResult<Option<TaskRecord>> {
		task::lock(&self.db, task.id, now).await
	}

	async fn find_and_lock_next(
		&self,
		now: Timestamp,
		local_mode: &str,
	) -> DrResult<Option<TaskRecord>> {
		task::find_and_lock_next(&self.db, now, local_mode).await
	}

	async fn update_if_unchanged(
		&self,
		merged: &TaskRecord,
		now: Timestamp,
	) -> DrResult<Option<TaskRecord>> {
		task::update_if_unchanged(&self.db, merged, now).await
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
		task::reset(&self.db, id, now).await
	}

	async fn delete_old_tasks(&self, before: Timestamp) -> DrResult<u64> {
		task::delete_completed_before(&self.db, before).await
	}

	async fn count_stuck(&self, before: Timestamp) -> DrResult<u64> {
		task::count_stuck(&self.db, before).await
	}

	async fn count_completed(&self) -> DrResult<u64> {
		task::count_completed(&self.db).await
	}

	async fn count_pending(&self, local_mode: &str) -> DrResult<u64> {
		task::count_pending(&self.db, local_mode).await
	}
}

// vim: ts=4
