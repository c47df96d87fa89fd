//! Handlers shipped with the reference worker.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::Arc};

use drover_core::{Scheduler, TaskContext, TaskHandler};
use drover_types::prelude::*;

/// State shared by all handlers of this worker
#[derive(Clone, Debug)]
pub struct WorkerState {
	/// Where `WriteFile` puts its output
	pub out_dir: Arc<PathBuf>,
}

impl WorkerState {
	pub fn new(out_dir: PathBuf) -> Self {
		Self { out_dir: Arc::new(out_dir) }
	}
}

pub fn register(scheduler: &Scheduler<WorkerState>) -> DrResult<()> {
	scheduler.register::<LogMessage>()?.register::<WriteFile>()?;
	Ok(())
}

// LogMessage //
//************//
#[derive(Debug, Serialize, Deserialize)]
pub struct LogMessage {
	pub message: String,
}

#[async_trait]
impl TaskHandler<WorkerState> for LogMessage {
	fn kind() -> &'static str {
		"LogMessage"
	}

	fn serialize(&self) -> DrResult<String> {
		Ok(serde_json::to_string(self)?)
	}

	async fn process(&self, ctx: &TaskContext, _state: &WorkerState) -> DrResult<()> {
		info!("[task {}] {}", ctx.id(), self.message);
		Ok(())
	}

	fn kind_of(&self) -> &'static str {
		"LogMessage"
	}
}

// WriteFile //
//***********//
/// Write `contents` to `name` under the output directory. I/O errors are
/// retried like any other handler failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct WriteFile {
	pub name: String,
	pub contents: String,
}

#[async_trait]
impl TaskHandler<WorkerState> for WriteFile {
	fn kind() -> &'static str {
		"WriteFile"
	}

	fn serialize(&self) -> DrResult<String> {
		Ok(serde_json::to_string(self)?)
	}

	async fn process(&self, ctx: &TaskContext, state: &WorkerState) -> DrResult<()> {
		if self.name.is_empty() || self.name.contains(['/', '\\']) || self.name.starts_with('.') {
			return Err(Error::Execution(format!("invalid file name {:?}", self.name)));
		}
		tokio::fs::create_dir_all(state.out_dir.as_path()).await?;
		let path = state.out_dir.join(&self.name);
		tokio::fs::write(&path, self.contents.as_bytes()).await?;
		debug!("[task {}] wrote {:?}", ctx.id(), path);
		Ok(())
	}

	fn kind_of(&self) -> &'static str {
		"WriteFile"
	}
}


// vim: ts=4
