//! Queueing strategies.
//!
//! [`LocalQueue`] keeps due-ordering in a process-local priority queue and uses
//! the store only for persistence and claiming. [`SharedQueue`] keeps nothing in
//! memory: every poll asks the store for the next eligible task, so several
//! processes can work off one database.

use async_trait::async_trait;
use std::{
	cmp::Ordering,
	collections::{BinaryHeap, HashSet},
	fmt::Debug,
	sync::{
		Arc, Mutex,
		atomic::{self, AtomicU64},
	},
};

use crate::prelude::*;

#[async_trait]
pub trait TaskQueue: Send + Sync + Debug {
	fn store(&self) -> &Arc<dyn TaskStore>;

	async fn save_new_task(&self, task: &TaskRecord) -> DrResult<TaskRecord>;

	/// Persist a merged update of an existing task. Returns `None` when the stored
	/// task changed since `task` was read from it.
	async fn update_task(
		&self,
		task: &TaskRecord,
		execute_at_changed: bool,
	) -> DrResult<Option<TaskRecord>>;

	/// Claim the task that should run next, if any is due at `now`
	async fn find_and_lock_next_task(&self, now: Timestamp) -> DrResult<Option<TaskRecord>>;

	async fn mark_completed(&self, task: &TaskRecord) -> DrResult<TaskRecord>;

	/// Record a failed attempt; the result is either rescheduled or permanently failed
	async fn mark_failed(&self, task: &TaskRecord, error: &str) -> DrResult<TaskRecord>;

	/// Make a rescheduled task visible to the dispatcher again
	fn requeue(&self, task: TaskRecord) -> DrResult<()>;

	/// Drop any queued entry for a task that was run outside the dispatcher
	fn forget(&self, _id: TaskId) -> DrResult<()> {
		Ok(())
	}

	/// Offer a task found in the store at boot. Returns whether it was queued.
	fn on_load_task_on_boot(&self, task: TaskRecord) -> DrResult<bool>;

	async fn pending_task_count(&self) -> DrResult<usize>;

	async fn has_task_with_id(&self, id: TaskId) -> DrResult<bool>;
}

// QueueEntry
//************
#[derive(Debug)]
struct QueueEntry {
	execute_at: Timestamp,
	seq: u64,
	task: TaskRecord,
}

impl PartialEq for QueueEntry {
	fn eq(&self, other: &Self) -> bool {
		self.execute_at == other.execute_at && self.seq == other.seq
	}
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for QueueEntry {
	// BinaryHeap is a max-heap: reverse so the earliest (then oldest insertion) is on top
	fn cmp(&self, other: &Self) -> Ordering {
		other.execute_at.cmp(&self.execute_at).then_with(|| other.seq.cmp(&self.seq))
	}
}

// LocalQueue
//************
#[derive(Debug)]
pub struct LocalQueue {
	store: Arc<dyn TaskStore>,
	policy: RetryPolicy,
	heap: Mutex<BinaryHeap<QueueEntry>>,
	/// Ids claimed by this process and still running. Guards against a task being
	/// offered twice within one process.
	seen: Mutex<HashSet<TaskId>>,
	seq: AtomicU64,
}

impl LocalQueue {
	pub fn new(store: Arc<dyn TaskStore>, policy: RetryPolicy) -> Self {
		Self {
			store,
			policy,
			heap: Mutex::new(BinaryHeap::new()),
			seen: Mutex::new(HashSet::new()),
			seq: AtomicU64::new(0),
		}
	}

	fn push(&self, task: TaskRecord) -> DrResult<()> {
		let seq = self.seq.fetch_add(1, atomic::Ordering::SeqCst);
		lock!(self.heap, "heap")?.push(QueueEntry { execute_at: task.execute_at, seq, task });
		Ok(())
	}
}

#[async_trait]
impl TaskQueue for LocalQueue {
	fn store(&self) -> &Arc<dyn TaskStore> {
		&self.store
	}

	async fn save_new_task(&self, task: &TaskRecord) -> DrResult<TaskRecord> {
		let saved = self.store.save(task).await?;
		self.push(saved.clone())?;
		Ok(saved)
	}

	async fn update_task(
		&self,
		task: &TaskRecord,
		execute_at_changed: bool,
	) -> DrResult<Option<TaskRecord>> {
		let Some(saved) = self.store.update_if_unchanged(task, Timestamp::now()).await? else {
			return Ok(None);
		};

		// Entries are snapshots: replace the queued one so the new payload is used
		let was_queued = {
			let mut heap = lock!(self.heap, "heap")?;
			let before = heap.len();
			heap.retain(|e| e.task.id != saved.id);
			heap.len() != before
		};
		let claimed = lock!(self.seen, "seen")?.contains(&saved.id);
		if saved.is_claimable() && !claimed && (was_queued || execute_at_changed) {
			self.push(saved.clone())?;
		}
		Ok(Some(saved))
	}

	async fn find_and_lock_next_task(&self, now: Timestamp) -> DrResult<Option<TaskRecord>> {
		let head = {
			let mut heap = lock!(self.heap, "heap")?;
			match heap.peek() {
				Some(entry) if entry.execute_at <= now => heap.pop(),
				_ => None,
			}
		};
		let Some(QueueEntry { task, .. }) = head else {
			return Ok(None);
		};

		if task.is_locked() {
			warn!("Task {} in the queue is already locked, dropping it", task.id);
			return Ok(None);
		}
		if !lock!(self.seen, "seen")?.insert(task.id) {
			warn!("Task {} was already claimed by this process, dropping it", task.id);
			return Ok(None);
		}

		match self.store.lock_for_processing(&task, now).await {
			Ok(Some(locked)) => Ok(Some(locked)),
			Ok(None) => {
				warn!("Unable to lock task {}", task.id);
				Ok(None)
			}
			Err(err) => {
				lock!(self.seen, "seen")?.remove(&task.id);
				self.push(task)?;
				Err(err)
			}
		}
	}

	async fn mark_completed(&self, task: &TaskRecord) -> DrResult<TaskRecord> {
		lock!(self.seen, "seen")?.remove(&task.id);
		self.store.mark_complete(task, Timestamp::now()).await
	}

	async fn mark_failed(&self, task: &TaskRecord, error: &str) -> DrResult<TaskRecord> {
		lock!(self.seen, "seen")?.remove(&task.id);
		self.store.mark_failed(task, error, &self.policy, Timestamp::now()).await
	}

	fn requeue(&self, task: TaskRecord) -> DrResult<()> {
		if !task.is_claimable() {
			return Ok(());
		}
		lock!(self.seen, "seen")?.remove(&task.id);
		lock!(self.heap, "heap")?.retain(|e| e.task.id != task.id);
		self.push(task)
	}

	fn forget(&self, id: TaskId) -> DrResult<()> {
		lock!(self.heap, "heap")?.retain(|e| e.task.id != id);
		Ok(())
	}

	fn on_load_task_on_boot(&self, task: TaskRecord) -> DrResult<bool> {
		if !task.is_claimable() || lock!(self.heap, "heap")?.iter().any(|e| e.task.id == task.id) {
			return Ok(false);
		}
		self.push(task)?;
		Ok(true)
	}

	async fn pending_task_count(&self) -> DrResult<usize> {
		Ok(lock!(self.heap, "heap")?.len())
	}

	async fn has_task_with_id(&self, id: TaskId) -> DrResult<bool> {
		Ok(lock!(self.heap, "heap")?.iter().any(|e| e.task.id == id))
	}
}

// SharedQueue
//*************
#[derive(Debug)]
pub struct SharedQueue {
	store: Arc<dyn TaskStore>,
	policy: RetryPolicy,
	local_mode: Box<str>,
}

impl SharedQueue {
	pub fn new(store: Arc<dyn TaskStore>, policy: RetryPolicy, local_mode: &str) -> Self {
		Self { store, policy, local_mode: local_mode.into() }
	}
}

#[async_trait]
impl TaskQueue for SharedQueue {
	fn store(&self) -> &Arc<dyn TaskStore> {
		&self.store
	}

	async fn save_new_task(&self, task: &TaskRecord) -> DrResult<TaskRecord> {
		let mut task = task.clone();
		task.local_mode.clone_from(&self.local_mode);
		self.store.save(&task).await
	}

	async fn update_task(
		&self,
		task: &TaskRecord,
		_execute_at_changed: bool,
	) -> DrResult<Option<TaskRecord>> {
		self.store.update_if_unchanged(task, Timestamp::now()).await
	}

	async fn find_and_lock_next_task(&self, now: Timestamp) -> DrResult<Option<TaskRecord>> {
		self.store.find_and_lock_next(now, &self.local_mode).await
	}

	async fn mark_completed(&self, task: &TaskRecord) -> DrResult<TaskRecord> {
		self.store.mark_complete(task, Timestamp::now()).await
	}

	async fn mark_failed(&self, task: &TaskRecord, error: &str) -> DrResult<TaskRecord> {
		self.store.mark_failed(task, error, &self.policy, Timestamp::now()).await
	}

	// The store is the queue; a rescheduled record is already visible to every process
	fn requeue(&self, _task: TaskRecord) -> DrResult<()> {
		Ok(())
	}

	fn on_load_task_on_boot(&self, _task: TaskRecord) -> DrResult<bool> {
		Ok(false)
	}

	async fn pending_task_count(&self) -> DrResult<usize> {
		Ok(self.store.count_pending(&self.local_mode).await? as usize)
	}

	async fn has_task_with_id(&self, id: TaskId) -> DrResult<bool> {
		Ok(self.store.read_task(id).await?.is_some_and(|t| !t.is_completed()))
	}
}


// vim: ts=4
