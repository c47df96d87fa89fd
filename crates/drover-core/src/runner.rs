//! Executes one claimed task and records the outcome.

use futures::FutureExt;
use std::{panic::AssertUnwindSafe, sync::Arc};
use tracing::Instrument;

use crate::handler::TaskContext;
use crate::prelude::*;
use crate::queue::TaskQueue;
use crate::registry::TaskRegistry;

pub struct TaskRunner<S: Clone> {
	task: TaskRecord,
	registry: Arc<TaskRegistry<S>>,
	queue: Arc<dyn TaskQueue>,
	state: S,
}

impl<S: Clone + Send + Sync + 'static> TaskRunner<S> {
	pub fn new(
		task: TaskRecord,
		registry: Arc<TaskRegistry<S>>,
		queue: Arc<dyn TaskQueue>,
		state: S,
	) -> Self {
		Self { task, registry, queue, state }
	}

	/// Run the handler, then mark the task completed or failed.
	///
	/// Failures never escape unless `synchronous` is set, in which case the
	/// outcome is still recorded and the handler error is returned as well.
	pub async fn run(self, synchronous: bool) -> DrResult<()> {
		let span = info_span!("task", id = self.task.id, handler = %self.task.handler_name);
		self.run_inner(synchronous).instrument(span).await
	}

	async fn run_inner(self, synchronous: bool) -> DrResult<()> {
		let id = self.task.id;
		info!("Executing task {}", id);

		match self.execute().await {
			Ok(()) => {
				debug!("Task {} completed successfully", id);
				if let Err(err) = self.queue.mark_completed(&self.task).await {
					error!("Failed to mark task {} as completed: {}", id, err);
				}
				Ok(())
			}
			Err(err) => {
				error!(
					"Task {} failed (handler={} customKey={:?} attempt={}): {}",
					id,
					self.task.handler_name,
					self.task.custom_key,
					self.task.try_count + 1,
					err
				);
				match serde_json::to_string(&self.task) {
					Ok(dump) => error!("Failed task: {}", dump),
					Err(dump_err) => error!("Failed task could not be serialized: {}", dump_err),
				}
				self.record_failure(&err).await;
				if synchronous { Err(err) } else { Ok(()) }
			}
		}
	}

	async fn execute(&self) -> DrResult<()> {
		let handler = self.registry.build(&self.task)?;
		let ctx = TaskContext::new(self.task.clone());
		AssertUnwindSafe(handler.process(&ctx, &self.state))
			.catch_unwind()
			.await
			.map_err(|_| Error::Execution(format!("handler {} panicked", self.task.handler_name)))?
	}

	async fn record_failure(&self, err: &Error) {
		match self.queue.mark_failed(&self.task, &err.to_string()).await {
			Ok(updated) if updated.is_failed() => {
				warn!(
					"Task {} failed permanently after {} attempts, it needs a manual retry",
					updated.id, updated.try_count
				);
			}
			Ok(updated) => {
				info!("Task {} will be retried at {}", updated.id, updated.execute_at);
				if let Err(err) = self.queue.requeue(updated) {
					error!("Failed to requeue task {}: {}", self.task.id, err);
				}
			}
			Err(persist_err) => {
				error!("Failed to persist failure of task {}: {}", self.task.id, persist_err);
			}
		}
	}
}

// vim: ts=4
