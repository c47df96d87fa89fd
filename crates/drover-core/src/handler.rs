//! The handler contract: the user-supplied code that performs a task's work.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::prelude::*;

/// A unit of work that can be persisted and rebuilt later.
///
/// `kind()` is the handler name stored on the task record. The registry rebuilds
/// the handler by deserializing the JSON produced by `serialize()`, possibly in
/// another process or after a restart.
#[async_trait]
pub trait TaskHandler<S: Clone>: Send + Sync + Debug {
	fn kind() -> &'static str
	where
		Self: Sized;
	fn serialize(&self) -> DrResult<String>;
	async fn process(&self, ctx: &TaskContext, state: &S) -> DrResult<()>;

	fn kind_of(&self) -> &'static str;
}

/// The persisted record a handler is executing on behalf of
#[derive(Debug, Clone)]
pub struct TaskContext {
	task: TaskRecord,
}

impl TaskContext {
	pub fn new(task: TaskRecord) -> Self {
		Self { task }
	}

	pub fn id(&self) -> TaskId {
		self.task.id
	}

	pub fn custom_key(&self) -> Option<&str> {
		self.task.custom_key.as_deref()
	}

	/// Number of earlier failed attempts
	pub fn try_count(&self) -> u32 {
		self.task.try_count
	}

	pub fn record(&self) -> &TaskRecord {
		&self.task
	}
}

// vim: ts=4
