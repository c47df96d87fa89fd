//! Task persistence queries

use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use drover_types::{
	prelude::*,
	task::{IMMEDIATE_OFFSET_MS, TaskRecord},
	task_store::MAX_LOCK_ATTEMPTS,
	types::DAY_MS,
};

use crate::utils::*;

/// Tasks scheduled further back than this are left for the health check to report
const STALE_AFTER_MS: i64 = 2 * DAY_MS;

fn read_row(row: &SqliteRow) -> Result<TaskRecord, sqlx::Error> {
	Ok(TaskRecord {
		id: row.try_get::<i64, _>("id")? as u64,
		custom_key: row.try_get("custom_key")?,
		handler_name: row.try_get("handler_name")?,
		data_json: row.try_get("data_json")?,
		created_at: row.try_get("created_at").map(Timestamp)?,
		updated_at: row.try_get("updated_at").map(Timestamp)?,
		execute_at: row.try_get("execute_at").map(Timestamp)?,
		originally_scheduled_for: row.try_get("originally_scheduled_for").map(Timestamp)?,
		locked_at: row.try_get("locked_at").map(Timestamp)?,
		lock_uuid: row.try_get("lock_uuid")?,
		try_count: row.try_get::<i64, _>("try_count")? as u32,
		never_retry: row.try_get("never_retry")?,
		failed_at: row.try_get("failed_at").map(Timestamp)?,
		completed_at: row.try_get("completed_at").map(Timestamp)?,
		error_message: row.try_get("error_message")?,
		local_mode: row.try_get("local_mode")?,
	})
}

fn map_save_err(err: sqlx::Error, task: &TaskRecord) -> Error {
	if let sqlx::Error::Database(db_err) = &err
		&& db_err.is_unique_violation()
	{
		let key = task.custom_key.as_deref().unwrap_or_default();
		return Error::Configuration(format!("duplicate custom key: {}", key));
	}
	db_err(err)
}

/// Insert a new row, or overwrite the row with the same id
pub(crate) async fn save(db: &SqlitePool, task: &TaskRecord) -> DrResult<TaskRecord> {
	let mut task = task.clone();
	let now = Timestamp::now();
	if !task.created_at.is_set() {
		task.created_at = now;
	}
	task.updated_at = now;

	// NULL lets SQLite pick the next row id
	let id = (task.id != 0).then_some(task.id as i64);
	let res = sqlx::query(
		"INSERT INTO tasks (id, custom_key, handler_name, data_json, created_at, updated_at,
			execute_at, originally_scheduled_for, locked_at, lock_uuid, try_count, never_retry,
			failed_at, completed_at, error_message, local_mode)
		VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
		ON CONFLICT(id) DO UPDATE SET
			custom_key=excluded.custom_key, handler_name=excluded.handler_name,
			data_json=excluded.data_json, updated_at=excluded.updated_at,
			execute_at=excluded.execute_at,
			originally_scheduled_for=excluded.originally_scheduled_for,
			locked_at=excluded.locked_at, lock_uuid=excluded.lock_uuid,
			try_count=excluded.try_count, never_retry=excluded.never_retry,
			failed_at=excluded.failed_at, completed_at=excluded.completed_at,
			error_message=excluded.error_message, local_mode=excluded.local_mode
		RETURNING id",
	)
	.bind(id)
	.bind(task.custom_key.as_deref())
	.bind(task.handler_name.as_ref())
	.bind(task.data_json.as_ref())
	.bind(task.created_at.0)
	.bind(task.updated_at.0)
	.bind(task.execute_at.0)
	.bind(task.originally_scheduled_for.0)
	.bind(task.locked_at.0)
	.bind(task.lock_uuid.as_ref())
	.bind(i64::from(task.try_count))
	.bind(task.never_retry)
	.bind(task.failed_at.0)
	.bind(task.completed_at.0)
	.bind(task.error_message.as_ref())
	.bind(task.local_mode.as_ref())
	.fetch_one(db)
	.await
	.map_err(|err| map_save_err(err, &task))?;

	task.id = row_id(&res)?;
	Ok(task)
}

fn row_id(row: &SqliteRow) -> DrResult<TaskId> {
	row.try_get::<i64, _>("id").map(|id| id as u64).map_err(db_err)
}

pub(crate) async fn read(db: &SqlitePool, id: TaskId) -> DrResult<Option<TaskRecord>> {
	let res = sqlx::query("SELECT * FROM tasks WHERE id=?")
		.bind(id as i64)
		.fetch_optional(db)
		.await
		.map_err(db_err)?;
	res.as_ref().map(read_row).transpose().map_err(db_err)
}

pub(crate) async fn find_by_custom_key(db: &SqlitePool, key: &str) -> DrResult<Option<TaskRecord>> {
	let res = sqlx::query("SELECT * FROM tasks WHERE custom_key=?")
		.bind(key)
		.fetch_optional(db)
		.await
		.map_err(db_err)?;
	res.as_ref().map(read_row).transpose().map_err(db_err)
}

/// Everything not completed, in execution order
pub(crate) async fn list_open(db: &SqlitePool) -> DrResult<Vec<TaskRecord>> {
	let res =
		sqlx::query("SELECT * FROM tasks WHERE completed_at=0 ORDER BY execute_at, id")
			.fetch_all(db)
			.await
			.map_err(db_err)?;
	collect_res(res.iter().map(read_row))
}

/// Conditional claim: only an unlocked, non-terminal row is updated
pub(crate) async fn lock(
	db: &SqlitePool,
	id: TaskId,
	now: Timestamp,
) -> DrResult<Option<TaskRecord>> {
	let lock_uuid = uuid::Uuid::new_v4().to_string();
	let res = sqlx::query(
		"UPDATE tasks SET lock_uuid=?, locked_at=?, updated_at=?
		WHERE id=? AND lock_uuid='' AND locked_at=0 AND completed_at=0 AND failed_at=0
		RETURNING *",
	)
	.bind(&lock_uuid)
	.bind(now.0)
	.bind(now.0)
	.bind(id as i64)
	.fetch_optional(db)
	.await
	.map_err(db_err)?;
	res.as_ref().map(read_row).transpose().map_err(db_err)
}

/// Conditional merge: the payload and schedule are only written while the row
/// still carries the lock, attempt and failure state `merged` was read with
pub(crate) async fn update_if_unchanged(
	db: &SqlitePool,
	merged: &TaskRecord,
	now: Timestamp,
) -> DrResult<Option<TaskRecord>> {
	let res = sqlx::query(
		"UPDATE tasks SET handler_name=?, data_json=?, execute_at=?, originally_scheduled_for=?,
			updated_at=?
		WHERE id=? AND completed_at=0 AND failed_at=? AND lock_uuid=? AND locked_at=?
			AND try_count=?
		RETURNING *",
	)
	.bind(merged.handler_name.as_ref())
	.bind(merged.data_json.as_ref())
	.bind(merged.execute_at.0)
	.bind(merged.originally_scheduled_for.0)
	.bind(now.0)
	.bind(merged.id as i64)
	.bind(merged.failed_at.0)
	.bind(merged.lock_uuid.as_ref())
	.bind(merged.locked_at.0)
	.bind(i64::from(merged.try_count))
	.fetch_optional(db)
	.await
	.map_err(db_err)?;
	res.as_ref().map(read_row).transpose().map_err(db_err)
}

/// Operator reset of an unfinished row. A completed row is returned as stored.
pub(crate) async fn reset(
	db: &SqlitePool,
	id: TaskId,
	now: Timestamp,
) -> DrResult<Option<TaskRecord>> {
	let res = sqlx::query(
		"UPDATE tasks SET lock_uuid='', locked_at=0, try_count=0, failed_at=0,
			error_message='', execute_at=?, updated_at=?
		WHERE id=? AND completed_at=0
		RETURNING *",
	)
	.bind(now.add_ms(-IMMEDIATE_OFFSET_MS).0)
	.bind(now.0)
	.bind(id as i64)
	.fetch_optional(db)
	.await
	.map_err(db_err)?;
	match res.as_ref().map(read_row).transpose().map_err(db_err)? {
		Some(task) => Ok(Some(task)),
		None => read(db, id).await,
	}
}

/// Pick the earliest due row of `local_mode` and claim it, retrying when another
/// worker claims the same row first
pub(crate) async fn find_and_lock_next(
	db: &SqlitePool,
	now: Timestamp,
	local_mode: &str,
) -> DrResult<Option<TaskRecord>> {
	let stale = now.add_ms(-STALE_AFTER_MS);
	for attempt in 1..=MAX_LOCK_ATTEMPTS {
		let id: Option<i64> = sqlx::query_scalar(
			"SELECT id FROM tasks
			WHERE lock_uuid='' AND locked_at=0 AND completed_at=0 AND failed_at=0
				AND execute_at<=? AND execute_at>? AND local_mode=?
			ORDER BY execute_at, id LIMIT 1",
		)
		.bind(now.0)
		.bind(stale.0)
		.bind(local_mode)
		.fetch_optional(db)
		.await
		.map_err(db_err)?;

		let Some(id) = id else {
			return Ok(None);
		};
		if let Some(task) = lock(db, id as u64, now).await? {
			return Ok(Some(task));
		}
		debug!("Lost the claim on task {} (attempt {})", id, attempt);
	}
	debug!("No task claimed after {} attempts", MAX_LOCK_ATTEMPTS);
	Ok(None)
}

pub(crate) async fn delete_completed_before(db: &SqlitePool, before: Timestamp) -> DrResult<u64> {
	let res = sqlx::query("DELETE FROM tasks WHERE completed_at>0 AND completed_at<?")
		.bind(before.0)
		.execute(db)
		.await
		.map_err(db_err)?;
	Ok(res.rows_affected())
}

pub(crate) async fn count_stuck(db: &SqlitePool, before: Timestamp) -> DrResult<u64> {
	let res = sqlx::query(
		"SELECT count(*) AS cnt FROM tasks
		WHERE completed_at=0 AND originally_scheduled_for>0 AND originally_scheduled_for<?",
	)
	.bind(before.0)
	.fetch_one(db)
	.await;
	map_res(res, |row| row.try_get::<i64, _>("cnt")).map(|n| n as u64)
}

pub(crate) async fn count_completed(db: &SqlitePool) -> DrResult<u64> {
	let res = sqlx::query("SELECT count(*) AS cnt FROM tasks WHERE completed_at>0")
		.fetch_one(db)
		.await;
	map_res(res, |row| row.try_get::<i64, _>("cnt")).map(|n| n as u64)
}

pub(crate) async fn count_pending(db: &SqlitePool, local_mode: &str) -> DrResult<u64> {
	let res = sqlx::query(
		"SELECT count(*) AS cnt FROM tasks
		WHERE lock_uuid='' AND locked_at=0 AND completed_at=0 AND failed_at=0 AND local_mode=?",
	)
	.bind(local_mode)
	.fetch_one(db)
	.await;
	map_res(res, |row| row.try_get::<i64, _>("cnt")).map(|n| n as u64)
}

// vim: ts=4
