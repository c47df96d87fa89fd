//! File task store operation tests
//!
//! Tests the folder layout and every state transition

use drover_task_adapter_fs::{TaskAdapterFs, folder::Folder};
use drover_types::retry::RetryPolicy;
use drover_types::task::TaskRecord;
use drover_types::task_store::TaskStore;
use drover_types::types::{DAY_MS, Timestamp};
use tempfile::TempDir;

async fn create_test_adapter() -> (TaskAdapterFs, TempDir) {
	let temp_dir = TempDir::new().expect("Failed to create temp directory");
	let adapter = TaskAdapterFs::new(temp_dir.path()).await.expect("Failed to create adapter");
	(adapter, temp_dir)
}

fn file_exists(temp: &TempDir, folder: Folder, id: u64) -> bool {
	temp.path().join(folder.name()).join(format!("{}.json", id)).exists()
}

#[tokio::test]
async fn test_creates_folder_layout() {
	let (_adapter, temp) = create_test_adapter().await;
	for folder in ["pending", "locked", "failed", "completed", "manualRetry"] {
		assert!(temp.path().join(folder).is_dir(), "missing {}", folder);
	}
}

#[tokio::test]
async fn test_save_and_read() {
	let (adapter, temp) = create_test_adapter().await;
	let task = TaskRecord::new("SendEmail", r#"{"to":"a@b.c"}"#).with_custom_key(Some("evt-42"));
	let saved = adapter.save(&task).await.expect("Failed to save task");

	assert!(saved.id > 0);
	assert!(file_exists(&temp, Folder::Pending, saved.id));
	let read = adapter.read_task(saved.id).await.unwrap().expect("Task not found");
	assert_eq!(read, saved);
	let by_key = adapter.find_by_custom_key("evt-42").await.unwrap().expect("Key not found");
	assert_eq!(by_key.id, saved.id);
}

#[tokio::test]
async fn test_duplicate_custom_key_is_rejected() {
	let (adapter, _temp) = create_test_adapter().await;
	let task = TaskRecord::new("h", "{}").with_custom_key(Some("k"));
	let saved = adapter.save(&task).await.unwrap();
	assert!(adapter.save(&task).await.is_err());
	// Saving the same record again is an update, not a duplicate
	assert!(adapter.save(&saved).await.is_ok());
}

#[tokio::test]
async fn test_lock_moves_file_and_is_exclusive() {
	let (adapter, temp) = create_test_adapter().await;
	let task = adapter.save(&TaskRecord::new("h", "{}")).await.unwrap();

	let locked = adapter.lock_for_processing(&task, Timestamp::now()).await.unwrap();
	let locked = locked.expect("First lock should succeed");
	assert!(locked.is_locked());
	assert!(!file_exists(&temp, Folder::Pending, task.id));
	assert!(file_exists(&temp, Folder::Locked, task.id));

	assert!(adapter.lock_for_processing(&task, Timestamp::now()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_complete_moves_to_completed() {
	let (adapter, temp) = create_test_adapter().await;
	let task = adapter.save(&TaskRecord::new("h", "{}")).await.unwrap();
	let locked = adapter.lock_for_processing(&task, Timestamp::now()).await.unwrap().unwrap();

	let done = adapter.mark_complete(&locked, Timestamp::now()).await.unwrap();
	assert!(done.is_completed());
	assert!(file_exists(&temp, Folder::Completed, task.id));
	assert!(!file_exists(&temp, Folder::Locked, task.id));
	assert_eq!(adapter.count_completed().await.unwrap(), 1);
	assert!(adapter.load_tasks().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failure_goes_back_to_pending_then_failed() {
	let (adapter, temp) = create_test_adapter().await;
	let policy = RetryPolicy::new((2, 3600), 2).with_jitter(0.0);
	let task = adapter.save(&TaskRecord::new("h", "{}")).await.unwrap();

	let locked = adapter.lock_for_processing(&task, Timestamp::now()).await.unwrap().unwrap();
	let retry = adapter.mark_failed(&locked, "boom", &policy, Timestamp::now()).await.unwrap();
	assert_eq!(retry.try_count, 1);
	assert!(file_exists(&temp, Folder::Pending, task.id));

	let locked = adapter.lock_for_processing(&retry, Timestamp::now()).await.unwrap().unwrap();
	let failed = adapter.mark_failed(&locked, "boom", &policy, Timestamp::now()).await.unwrap();
	assert!(failed.is_failed());
	assert!(file_exists(&temp, Folder::Failed, task.id));
	assert!(!file_exists(&temp, Folder::Locked, task.id));

	let reset = adapter.reset_for_retry(task.id, Timestamp::now()).await.unwrap().unwrap();
	assert_eq!(reset.try_count, 0);
	assert!(file_exists(&temp, Folder::Pending, task.id));
	assert!(!file_exists(&temp, Folder::Failed, task.id));
}

#[tokio::test]
async fn test_boot_load_and_stuck_count() {
	let (adapter, _temp) = create_test_adapter().await;
	let mut old = TaskRecord::new("h", "{}").with_execute_at(Timestamp::from_now_ms(-DAY_MS));
	old.align_schedule();
	let old = adapter.save(&old).await.unwrap();
	let fresh = adapter.save(&TaskRecord::new("h", "{}")).await.unwrap();
	adapter.lock_for_processing(&fresh, Timestamp::now()).await.unwrap().unwrap();

	let loaded = adapter.load_tasks().await.unwrap();
	assert_eq!(loaded.len(), 2);
	assert_eq!(adapter.count_stuck(Timestamp::from_now_ms(-60_000)).await.unwrap(), 1);
	assert_eq!(adapter.count_pending("").await.unwrap(), 1);
	assert!(loaded.iter().any(|t| t.id == old.id && t.is_claimable()));
}

#[tokio::test]
async fn test_delete_old_tasks() {
	let (adapter, _temp) = create_test_adapter().await;
	let old = adapter.save(&TaskRecord::new("h", "{}")).await.unwrap();
	let recent = adapter.save(&TaskRecord::new("h", "{}")).await.unwrap();
	adapter.mark_complete(&old, Timestamp::from_now_ms(-41 * DAY_MS)).await.unwrap();
	adapter.mark_complete(&recent, Timestamp::now()).await.unwrap();

	let deleted = adapter.delete_old_tasks(Timestamp::from_now_ms(-40 * DAY_MS)).await.unwrap();
	assert_eq!(deleted, 1);
	assert!(adapter.read_task(old.id).await.unwrap().is_none());
	assert!(adapter.read_task(recent.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_manual_retry_folder() {
	let (adapter, temp) = create_test_adapter().await;
	let policy = RetryPolicy::new((2, 3600), 1);
	let task = adapter.save(&TaskRecord::new("h", "{}")).await.unwrap();
	let locked = adapter.lock_for_processing(&task, Timestamp::now()).await.unwrap().unwrap();
	let failed = adapter.mark_failed(&locked, "boom", &policy, Timestamp::now()).await.unwrap();
	assert!(failed.is_failed());

	// Operator moves the file into manualRetry/
	std::fs::rename(
		temp.path().join("failed").join(format!("{}.json", task.id)),
		temp.path().join("manualRetry").join(format!("{}.json", task.id)),
	)
	.unwrap();

	let retried = adapter.take_manual_retries(Timestamp::now()).await.unwrap();
	assert_eq!(retried.len(), 1);
	assert_eq!(retried[0].id, task.id);
	assert!(retried[0].is_claimable());
	assert_eq!(retried[0].try_count, 0);
	assert!(file_exists(&temp, Folder::Pending, task.id));
	assert!(!file_exists(&temp, Folder::ManualRetry, task.id));
	assert!(adapter.take_manual_retries(Timestamp::now()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_interrupted_claim_reads_as_locked() {
	let temp = TempDir::new().unwrap();
	let task = {
		let adapter = TaskAdapterFs::new(temp.path()).await.unwrap();
		adapter.save(&TaskRecord::new("h", "{}")).await.unwrap()
	};
	// A process stopped right after moving the file into locked/
	std::fs::rename(
		temp.path().join("pending").join(format!("{}.json", task.id)),
		temp.path().join("locked").join(format!("{}.json", task.id)),
	)
	.unwrap();

	let adapter = TaskAdapterFs::new(temp.path()).await.unwrap();
	let loaded = adapter.load_tasks().await.unwrap();
	assert_eq!(loaded.len(), 1);
	assert!(loaded[0].is_locked());
	assert!(!loaded[0].is_claimable());
	assert_eq!(adapter.count_pending("").await.unwrap(), 0);

	let reset = adapter.reset_for_retry(task.id, Timestamp::now()).await.unwrap().unwrap();
	assert!(reset.is_claimable());
	assert!(file_exists(&temp, Folder::Pending, task.id));
	assert!(!file_exists(&temp, Folder::Locked, task.id));
	assert!(adapter.lock_for_processing(&reset, Timestamp::now()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_merge_update_respects_concurrent_changes() {
	let (adapter, temp) = create_test_adapter().await;
	let task = TaskRecord::new("h", "{}").with_custom_key(Some("k"));
	let snapshot = adapter.save(&task).await.unwrap();
	let mut merged = snapshot.clone();
	merged.data_json = r#"{"v":2}"#.into();

	let locked = adapter.lock_for_processing(&snapshot, Timestamp::now()).await.unwrap().unwrap();
	adapter.mark_complete(&locked, Timestamp::now()).await.unwrap();
	assert!(adapter.update_if_unchanged(&merged, Timestamp::now()).await.unwrap().is_none());

	let stored = adapter.read_task(snapshot.id).await.unwrap().unwrap();
	assert!(stored.is_completed());
	assert_eq!(&*stored.data_json, "{}");
	assert!(file_exists(&temp, Folder::Completed, snapshot.id));
	assert!(!file_exists(&temp, Folder::Pending, snapshot.id));

	let pending = adapter.save(&TaskRecord::new("h", "{}")).await.unwrap();
	let mut merged = pending.clone();
	merged.data_json = r#"{"v":3}"#.into();
	let updated = adapter.update_if_unchanged(&merged, Timestamp::now()).await.unwrap().unwrap();
	assert_eq!(&*updated.data_json, r#"{"v":3}"#);
	assert!(file_exists(&temp, Folder::Pending, pending.id));
}

#[tokio::test]
async fn test_reset_leaves_completed_task_alone() {
	let (adapter, temp) = create_test_adapter().await;
	let task = adapter.save(&TaskRecord::new("h", "{}")).await.unwrap();
	let done = adapter.mark_complete(&task, Timestamp::now()).await.unwrap();

	let after = adapter.reset_for_retry(task.id, Timestamp::now()).await.unwrap().unwrap();
	assert!(after.is_completed());
	assert_eq!(after.execute_at, done.execute_at);
	assert!(file_exists(&temp, Folder::Completed, task.id));
}

#[tokio::test]
async fn test_ids_continue_after_reopen() {
	let temp = TempDir::new().unwrap();
	let first = {
		let adapter = TaskAdapterFs::new(temp.path()).await.unwrap();
		adapter.save(&TaskRecord::new("h", "{}")).await.unwrap()
	};
	let adapter = TaskAdapterFs::new(temp.path()).await.unwrap();
	let second = adapter.save(&TaskRecord::new("h", "{}")).await.unwrap();
	assert!(second.id > first.id);
	assert_eq!(adapter.read_task(first.id).await.unwrap().unwrap().id, first.id);
}

// vim: ts=4
