//! On-disk layout: one JSON file per task, in the folder matching its state.
//!
//! `<base>/{pending,locked,failed,completed,manualRetry}/<id>.json`

use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use drover_types::{prelude::*, task::TaskRecord, task::TaskState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Folder {
	Pending,
	Locked,
	Failed,
	Completed,
	/// Drop zone for operators: files placed here are requeued
	ManualRetry,
}

impl Folder {
	pub const ALL: [Folder; 5] =
		[Folder::Pending, Folder::Locked, Folder::Failed, Folder::Completed, Folder::ManualRetry];

	/// Folders holding the authoritative copy of a task, in lookup order
	pub const STATES: [Folder; 4] =
		[Folder::Pending, Folder::Locked, Folder::Failed, Folder::Completed];

	pub fn name(self) -> &'static str {
		match self {
			Folder::Pending => "pending",
			Folder::Locked => "locked",
			Folder::Failed => "failed",
			Folder::Completed => "completed",
			Folder::ManualRetry => "manualRetry",
		}
	}

	pub fn of(task: &TaskRecord) -> Folder {
		match task.state() {
			TaskState::Pending => Folder::Pending,
			TaskState::Locked => Folder::Locked,
			TaskState::Failed => Folder::Failed,
			TaskState::Completed => Folder::Completed,
		}
	}
}

pub fn task_path(base_dir: &Path, folder: Folder, id: TaskId) -> PathBuf {
	base_dir.join(folder.name()).join(format!("{}.json", id))
}

/// Parse the task id out of a `<id>.json` file name
pub fn parse_file_name(name: &str) -> Option<TaskId> {
	name.strip_suffix(".json")?.parse().ok()
}

pub async fn read_record(path: &Path) -> DrResult<Option<TaskRecord>> {
	match fs::read_to_string(path).await {
		Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
		Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(err) => Err(err.into()),
	}
}

/// Lock owner given to a file found in `locked/` without lock fields. A process
/// that stops between claiming a task and writing its lock leaves such a file.
pub const INTERRUPTED_LOCK: &str = "interrupted";

/// Read the copy of a task held in `folder`. Anything in `locked/` reads as locked.
pub async fn read_in(
	base_dir: &Path,
	folder: Folder,
	id: TaskId,
) -> DrResult<Option<TaskRecord>> {
	let task = read_record(&task_path(base_dir, folder, id)).await?;
	Ok(task.map(|mut task| {
		if folder == Folder::Locked && !task.is_locked() {
			task.lock_uuid = INTERRUPTED_LOCK.into();
			task.locked_at = task.updated_at;
		}
		task
	}))
}

/// Write via a temporary file and a rename so readers never see a partial record
pub async fn write_record(base_dir: &Path, folder: Folder, task: &TaskRecord) -> DrResult<()> {
	let path = task_path(base_dir, folder, task.id);
	let tmp_path = base_dir.join(folder.name()).join(format!(".{}.json.tmp", task.id));
	let json = serde_json::to_vec_pretty(task)?;

	let mut file = File::create(&tmp_path).await?;
	file.write_all(&json).await?;
	file.sync_all().await?;
	fs::rename(&tmp_path, &path).await?;
	Ok(())
}

pub async fn remove_if_exists(path: &Path) -> DrResult<bool> {
	match fs::remove_file(path).await {
		Ok(()) => Ok(true),
		Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
		Err(err) => Err(err.into()),
	}
}

/// Ids of all task files in a folder
pub async fn list_ids(base_dir: &Path, folder: Folder) -> DrResult<Vec<TaskId>> {
	let mut ids = Vec::new();
	let mut entries = fs::read_dir(base_dir.join(folder.name())).await?;
	while let Some(entry) = entries.next_entry().await? {
		if let Some(id) = entry.file_name().to_str().and_then(parse_file_name) {
			ids.push(id);
		}
	}
	ids.sort_unstable();
	Ok(ids)
}


// vim: ts=4
