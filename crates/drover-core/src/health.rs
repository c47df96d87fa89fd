//! Health reporting.

use serde::Serialize;

use crate::opts::duration_ms;
use crate::prelude::*;
use crate::scheduler::Scheduler;

/// Health status of the task queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskHealth {
	/// Tasks waiting to be claimed
	pub pending: usize,
	/// Not completed and originally scheduled longer ago than the stuck window
	pub stuck: u64,
	pub completed: u64,
}

impl TaskHealth {
	pub fn is_healthy(&self) -> bool {
		self.stuck == 0
	}
}

impl<S: Clone + Send + Sync + 'static> Scheduler<S> {
	pub async fn health_check(&self) -> DrResult<TaskHealth> {
		let before = Timestamp::now().add_ms(-duration_ms(self.opts().stuck_after));
		let health = TaskHealth {
			pending: self.pending_task_count().await?,
			stuck: self.store().count_stuck(before).await?,
			completed: self.store().count_completed().await?,
		};
		if !health.is_healthy() {
			warn!("TASK HEALTH: {} tasks stuck since before {}", health.stuck, before);
		}
		Ok(health)
	}
}


// vim: ts=4
