//! SQLite task store operation tests

use drover_task_adapter_sqlite::TaskAdapterSqlite;
use drover_types::error::Error;
use drover_types::retry::RetryPolicy;
use drover_types::task::TaskRecord;
use drover_types::task_store::TaskStore;
use drover_types::types::{DAY_MS, MINUTE_MS, Timestamp};
use tempfile::TempDir;

async fn create_test_adapter() -> (TaskAdapterSqlite, TempDir) {
	let temp_dir = TempDir::new().expect("Failed to create temp directory");
	let adapter = TaskAdapterSqlite::new(temp_dir.path().join("tasks.db"))
		.await
		.expect("Failed to create adapter");
	(adapter, temp_dir)
}

fn due_task(offset_ms: i64) -> TaskRecord {
	let mut task =
		TaskRecord::new("SendEmail", "{}").with_execute_at(Timestamp::from_now_ms(offset_ms));
	task.align_schedule();
	task
}

#[tokio::test]
async fn test_save_assigns_row_ids() {
	let (adapter, _temp) = create_test_adapter().await;
	let first = adapter.save(&TaskRecord::new("h", r#"{"n":1}"#)).await.unwrap();
	let second = adapter.save(&TaskRecord::new("h", r#"{"n":2}"#)).await.unwrap();
	assert!(first.id > 0);
	assert!(second.id > first.id);

	let read = adapter.read_task(first.id).await.unwrap().expect("Task not found");
	assert_eq!(read, first);
	assert!(adapter.read_task(9999).await.unwrap().is_none());
}

#[tokio::test]
async fn test_save_overwrites_existing_row() {
	let (adapter, _temp) = create_test_adapter().await;
	let mut task = adapter.save(&TaskRecord::new("h", "{}").with_custom_key(Some("k"))).await.unwrap();
	task.data_json = r#"{"changed":true}"#.into();
	task.execute_at = Timestamp(42);
	adapter.save(&task).await.unwrap();

	let read = adapter.find_by_custom_key("k").await.unwrap().expect("Key not found");
	assert_eq!(read.id, task.id);
	assert_eq!(read.data_json.as_ref(), r#"{"changed":true}"#);
	assert_eq!(read.execute_at, Timestamp(42));
}

#[tokio::test]
async fn test_duplicate_custom_key_is_rejected() {
	let (adapter, _temp) = create_test_adapter().await;
	let task = TaskRecord::new("h", "{}").with_custom_key(Some("evt-42"));
	adapter.save(&task).await.unwrap();
	let res = adapter.save(&task).await;
	assert!(matches!(res, Err(Error::Configuration(_))));
}

#[tokio::test]
async fn test_lock_is_conditional() {
	let (adapter, _temp) = create_test_adapter().await;
	let task = adapter.save(&TaskRecord::new("h", "{}")).await.unwrap();

	let locked = adapter.lock_for_processing(&task, Timestamp::now()).await.unwrap();
	let locked = locked.expect("First lock should succeed");
	assert!(locked.is_locked());
	assert!(!locked.lock_uuid.is_empty());
	assert!(adapter.lock_for_processing(&task, Timestamp::now()).await.unwrap().is_none());

	let done = adapter.mark_complete(&locked, Timestamp::now()).await.unwrap();
	assert!(done.is_completed());
	assert!(adapter.lock_for_processing(&done, Timestamp::now()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_find_and_lock_next_in_order() {
	let (adapter, _temp) = create_test_adapter().await;
	let later = adapter.save(&due_task(-MINUTE_MS)).await.unwrap();
	let earlier = adapter.save(&due_task(-2 * MINUTE_MS)).await.unwrap();
	adapter.save(&due_task(MINUTE_MS)).await.unwrap();

	let now = Timestamp::now();
	let first = adapter.find_and_lock_next(now, "").await.unwrap().expect("Expected a task");
	assert_eq!(first.id, earlier.id);
	let second = adapter.find_and_lock_next(now, "").await.unwrap().expect("Expected a task");
	assert_eq!(second.id, later.id);
	// Only the future task is left
	assert!(adapter.find_and_lock_next(now, "").await.unwrap().is_none());
}

#[tokio::test]
async fn test_find_and_lock_next_filters() {
	let (adapter, _temp) = create_test_adapter().await;
	let mut mine = due_task(-MINUTE_MS);
	mine.local_mode = "alice".into();
	let mine = adapter.save(&mine).await.unwrap();
	// Too old for the poller; reported by the health check instead
	adapter.save(&due_task(-3 * DAY_MS)).await.unwrap();

	let now = Timestamp::now();
	assert!(adapter.find_and_lock_next(now, "").await.unwrap().is_none());
	let claimed = adapter.find_and_lock_next(now, "alice").await.unwrap().expect("Expected a task");
	assert_eq!(claimed.id, mine.id);
	assert_eq!(adapter.count_pending("").await.unwrap(), 1);
	assert_eq!(adapter.count_pending("alice").await.unwrap(), 0);
}

#[tokio::test]
async fn test_failure_and_operator_reset() {
	let (adapter, _temp) = create_test_adapter().await;
	let policy = RetryPolicy::default().with_jitter(0.0);
	let mut task = adapter.save(&TaskRecord::new("h", "{}")).await.unwrap();

	for attempt in 1..=5 {
		let locked = adapter.lock_for_processing(&task, Timestamp::now()).await.unwrap().unwrap();
		task = adapter.mark_failed(&locked, "boom", &policy, Timestamp::now()).await.unwrap();
		assert_eq!(task.try_count, attempt);
		assert_eq!(task.is_failed(), attempt == 5);
	}
	assert_eq!(task.error_message.as_ref(), "boom");
	assert!(adapter.lock_for_processing(&task, Timestamp::now()).await.unwrap().is_none());

	let reset = adapter.reset_for_retry(task.id, Timestamp::now()).await.unwrap().unwrap();
	assert_eq!(reset.try_count, 0);
	assert!(reset.is_claimable());
	assert!(reset.execute_at < Timestamp::now());
	assert!(adapter.reset_for_retry(9999, Timestamp::now()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_reset_leaves_completed_row_alone() {
	let (adapter, _temp) = create_test_adapter().await;
	let task = adapter.save(&TaskRecord::new("h", "{}")).await.unwrap();
	let done = adapter.mark_complete(&task, Timestamp::now()).await.unwrap();

	let after = adapter.reset_for_retry(task.id, Timestamp::now()).await.unwrap().unwrap();
	assert_eq!(after, done);
}

#[tokio::test]
async fn test_merge_update_is_conditional() {
	let (adapter, _temp) = create_test_adapter().await;
	let task = TaskRecord::new("h", "{}").with_custom_key(Some("k"));
	let snapshot = adapter.save(&task).await.unwrap();
	let mut merged = snapshot.clone();
	merged.data_json = r#"{"v":2}"#.into();

	let locked = adapter.lock_for_processing(&snapshot, Timestamp::now()).await.unwrap().unwrap();
	assert!(adapter.update_if_unchanged(&merged, Timestamp::now()).await.unwrap().is_none());
	let done = adapter.mark_complete(&locked, Timestamp::now()).await.unwrap();

	let mut merged = done.clone();
	merged.data_json = r#"{"v":3}"#.into();
	assert!(adapter.update_if_unchanged(&merged, Timestamp::now()).await.unwrap().is_none());

	let stored = adapter.read_task(snapshot.id).await.unwrap().unwrap();
	assert_eq!(stored, done);
	assert!(adapter.find_and_lock_next(Timestamp::now(), "").await.unwrap().is_none());

	let pending = adapter.save(&TaskRecord::new("h", "{}")).await.unwrap();
	let mut merged = pending.clone();
	merged.data_json = r#"{"v":4}"#.into();
	let updated = adapter.update_if_unchanged(&merged, Timestamp::now()).await.unwrap().unwrap();
	assert_eq!(updated.data_json.as_ref(), r#"{"v":4}"#);
	assert!(updated.is_claimable());
}

#[tokio::test]
async fn test_load_counts_and_retention() {
	let (adapter, _temp) = create_test_adapter().await;
	let stuck = adapter.save(&due_task(-DAY_MS)).await.unwrap();
	let old = adapter.save(&TaskRecord::new("h", "{}")).await.unwrap();
	let recent = adapter.save(&TaskRecord::new("h", "{}")).await.unwrap();
	adapter.mark_complete(&old, Timestamp::from_now_ms(-41 * DAY_MS)).await.unwrap();
	adapter.mark_complete(&recent, Timestamp::now()).await.unwrap();

	let loaded = adapter.load_tasks().await.unwrap();
	assert_eq!(loaded.len(), 1);
	assert_eq!(loaded[0].id, stuck.id);
	assert_eq!(adapter.count_stuck(Timestamp::from_now_ms(-30 * MINUTE_MS)).await.unwrap(), 1);
	assert_eq!(adapter.count_completed().await.unwrap(), 2);

	let deleted = adapter.delete_old_tasks(Timestamp::from_now_ms(-40 * DAY_MS)).await.unwrap();
	assert_eq!(deleted, 1);
	assert_eq!(adapter.count_completed().await.unwrap(), 1);
	assert!(adapter.read_task(old.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_reopen_keeps_tasks() {
	let temp = TempDir::new().unwrap();
	let path = temp.path().join("nested").join("tasks.db");
	let saved = {
		let adapter = TaskAdapterSqlite::new(&path).await.unwrap();
		adapter.save(&TaskRecord::new("h", "{}").with_custom_key(Some("k"))).await.unwrap()
	};
	let adapter = TaskAdapterSqlite::new(&path).await.unwrap();
	let read = adapter.find_by_custom_key("k").await.unwrap().unwrap();
	assert_eq!(read.id, saved.id);
}

// vim: ts=4
