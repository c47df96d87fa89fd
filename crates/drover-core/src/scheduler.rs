//! Scheduler subsystem. Enqueues tasks, runs the dispatcher loop that feeds the
//! worker pool, and exposes the operator calls (force run, manual retry,
//! retention sweep, shutdown).

use futures::FutureExt;
use serde::de::DeserializeOwned;
use std::{
	panic::AssertUnwindSafe,
	sync::{
		Arc, Mutex, OnceLock,
		atomic::{AtomicBool, Ordering},
	},
	time::Duration,
};
use tokio::{sync::Notify, task::JoinHandle, time::Instant};

use drover_types::{task_store::MAX_LOCK_ATTEMPTS, types::MINUTE_MS};

use crate::handler::TaskHandler;
use crate::opts::{SchedulerOpts, duration_ms};
use crate::pool::TaskPool;
use crate::prelude::*;
use crate::queue::{LocalQueue, SharedQueue, TaskQueue};
use crate::registry::{HandlerResolver, TaskRegistry};
use crate::runner::TaskRunner;

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Builder for scheduling tasks with a fluent API
pub struct TaskSchedulerBuilder<'a, S: Clone> {
	scheduler: &'a Scheduler<S>,
	handler: Arc<dyn TaskHandler<S>>,
	key: Option<String>,
	execute_at: Option<Timestamp>,
	never_retry: bool,
}

impl<'a, S: Clone + Send + Sync + 'static> TaskSchedulerBuilder<'a, S> {
	fn new(scheduler: &'a Scheduler<S>, handler: Arc<dyn TaskHandler<S>>) -> Self {
		Self { scheduler, handler, key: None, execute_at: None, never_retry: false }
	}

	/// Deduplication key: enqueueing again with the same key updates the existing task
	pub fn key(mut self, key: impl Into<String>) -> Self {
		self.key = Some(key.into());
		self
	}

	pub fn execute_at(mut self, ts: Timestamp) -> Self {
		self.execute_at = Some(ts);
		self
	}

	pub fn after_ms(mut self, ms: i64) -> Self {
		self.execute_at = Some(Timestamp::from_now_ms(ms));
		self
	}

	/// Mark the task permanently failed on its first error
	pub fn never_retry(mut self) -> Self {
		self.never_retry = true;
		self
	}

	pub async fn schedule(self) -> DrResult<TaskRecord> {
		let mut task = TaskRecord::new(self.handler.kind_of(), self.handler.serialize()?)
			.with_custom_key(self.key.as_deref());
		if let Some(ts) = self.execute_at {
			task.execute_at = ts;
		}
		task.never_retry = self.never_retry;
		self.scheduler.enqueue(task).await
	}
}

// SchedulerBuilder
//******************
#[derive(Debug, Clone, Default)]
pub struct SchedulerBuilder {
	opts: SchedulerOpts,
}

impl SchedulerBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn pool_size(&mut self, pool_size: usize) -> &mut Self {
		self.opts.pool_size = pool_size;
		self
	}

	pub fn poll_interval(&mut self, interval: Duration) -> &mut Self {
		self.opts.poll_interval = interval;
		self
	}

	pub fn synchronous(&mut self, synchronous: bool) -> &mut Self {
		self.opts.synchronous = synchronous;
		self
	}

	pub fn retry_policy(&mut self, policy: RetryPolicy) -> &mut Self {
		self.opts.retry_policy = policy;
		self
	}

	pub fn local_mode(&mut self, tag: impl Into<Box<str>>) -> &mut Self {
		self.opts.local_mode = tag.into();
		self
	}

	pub fn shutdown_timeout(&mut self, timeout: Duration) -> &mut Self {
		self.opts.shutdown_timeout = timeout;
		self
	}

	pub fn retention(&mut self, retention: Duration) -> &mut Self {
		self.opts.retention = retention;
		self
	}

	pub fn manual_retry_interval(&mut self, interval: Duration) -> &mut Self {
		self.opts.manual_retry_interval = interval;
		self
	}

	pub fn opts(&self) -> &SchedulerOpts {
		&self.opts
	}

	/// Scheduler ordering tasks in a process-local queue (memory and file stores)
	pub fn build_local<S: Clone + Send + Sync + 'static>(
		&self,
		store: Arc<dyn TaskStore>,
	) -> Scheduler<S> {
		let queue = LocalQueue::new(store, self.opts.retry_policy.clone());
		Scheduler::with_queue(Arc::new(queue), self.opts.clone())
	}

	/// Scheduler letting the store pick the next task (database stores shared by processes)
	pub fn build_shared<S: Clone + Send + Sync + 'static>(
		&self,
		store: Arc<dyn TaskStore>,
	) -> Scheduler<S> {
		let queue =
			SharedQueue::new(store, self.opts.retry_policy.clone(), &self.opts.local_mode);
		Scheduler::with_queue(Arc::new(queue), self.opts.clone())
	}
}

// Scheduler
//***********
#[derive(Clone)]
pub struct Scheduler<S: Clone> {
	registry: Arc<TaskRegistry<S>>,
	queue: Arc<dyn TaskQueue>,
	opts: Arc<SchedulerOpts>,
	state: Arc<OnceLock<S>>,
	started: Arc<AtomicBool>,
	stopping: Arc<AtomicBool>,
	pool: Arc<Mutex<Option<Arc<TaskPool>>>>,
	dispatcher: Arc<Mutex<Option<JoinHandle<()>>>>,
	notify: Arc<Notify>,
}

impl<S: Clone + Send + Sync + 'static> Scheduler<S> {
	/// Local-queue scheduler with default settings
	pub fn new(store: Arc<dyn TaskStore>) -> Self {
		SchedulerBuilder::new().build_local(store)
	}

	fn with_queue(queue: Arc<dyn TaskQueue>, opts: SchedulerOpts) -> Self {
		Self {
			registry: Arc::new(TaskRegistry::new()),
			queue,
			opts: Arc::new(opts),
			state: Arc::new(OnceLock::new()),
			started: Arc::new(AtomicBool::new(false)),
			stopping: Arc::new(AtomicBool::new(false)),
			pool: Arc::new(Mutex::new(None)),
			dispatcher: Arc::new(Mutex::new(None)),
			notify: Arc::new(Notify::new()),
		}
	}

	pub fn opts(&self) -> &SchedulerOpts {
		&self.opts
	}

	pub fn store(&self) -> &Arc<dyn TaskStore> {
		self.queue.store()
	}

	pub fn registry(&self) -> &Arc<TaskRegistry<S>> {
		&self.registry
	}

	pub fn is_synchronous(&self) -> bool {
		self.opts.synchronous
	}

	pub fn register<H: TaskHandler<S> + DeserializeOwned + 'static>(&self) -> DrResult<&Self> {
		self.registry.register::<H>()?;
		Ok(self)
	}

	pub fn register_fn<F>(&self, name: &str, factory: F) -> DrResult<&Self>
	where
		F: Fn(&str) -> DrResult<Arc<dyn TaskHandler<S>>> + Send + Sync + 'static,
	{
		self.registry.register_fn(name, factory)?;
		Ok(self)
	}

	pub fn register_plugin(&self, resolver: Arc<dyn HandlerResolver<S>>) -> DrResult<&Self> {
		self.registry.register_plugin(resolver)?;
		Ok(self)
	}

	pub fn register_resolver(&self, resolver: Arc<dyn HandlerResolver<S>>) -> DrResult<&Self> {
		self.registry.register_resolver(resolver)?;
		Ok(self)
	}

	/// Create a builder for scheduling a task using the fluent API
	pub fn task(&self, handler: Arc<dyn TaskHandler<S>>) -> TaskSchedulerBuilder<'_, S> {
		TaskSchedulerBuilder::new(self, handler)
	}

	/// Schedule a handler for immediate execution
	pub async fn add(&self, handler: Arc<dyn TaskHandler<S>>) -> DrResult<TaskRecord> {
		self.task(handler).schedule().await
	}

	/// Persist a task and make it visible to the dispatcher.
	///
	/// A task carrying a custom key that already exists updates the existing task
	/// instead (or is ignored if that task already completed).
	pub async fn enqueue(&self, mut task: TaskRecord) -> DrResult<TaskRecord> {
		if task.handler_name.trim().is_empty() {
			return Err(Error::Configuration("task enqueued without a handler name".into()));
		}
		task.align_schedule();

		let Some(key) = task.custom_key.clone() else {
			return self.insert(task).await;
		};
		// A worker may claim or finish the task between the lookup and the merge
		for attempt in 1..=MAX_LOCK_ATTEMPTS {
			let Some(existing) = self.store().find_by_custom_key(&key).await? else {
				return self.insert(task).await;
			};
			if let Some(merged) = self.merge_into_existing(existing, &task).await? {
				return Ok(merged);
			}
			debug!("Task with customKey={:?} changed while merging (attempt {})", key, attempt);
		}
		Err(Error::Internal(format!("task with customKey={:?} kept changing while merging", key)))
	}

	async fn insert(&self, mut task: TaskRecord) -> DrResult<TaskRecord> {
		let now = Timestamp::now();
		task.schedule_immediately_if_unset(now);
		let saved = self.queue.save_new_task(&task).await?;
		info!(
			"Added task {} handler={} customKey={:?} executeAt={}",
			saved.id, saved.handler_name, saved.custom_key, saved.execute_at
		);
		self.notify.notify_one();

		if self.opts.synchronous && saved.execute_at < now.add_ms(MINUTE_MS) {
			self.execute_next(Timestamp::now()).await?;
			return Ok(self.store().read_task(saved.id).await?.unwrap_or(saved));
		}
		Ok(saved)
	}

	/// Returns `None` when the stored task changed under the merge
	async fn merge_into_existing(
		&self,
		mut existing: TaskRecord,
		task: &TaskRecord,
	) -> DrResult<Option<TaskRecord>> {
		if existing.is_completed() {
			info!(
				"Task with customKey={:?} already ran (id={}), ignoring",
				existing.custom_key, existing.id
			);
			return Ok(Some(existing));
		}

		let execute_at_changed = existing.merge_enqueued(task);
		let Some(updated) = self.queue.update_task(&existing, execute_at_changed).await? else {
			return Ok(None);
		};
		info!(
			"Updated existing task {} customKey={:?} executeAt={}",
			updated.id, updated.custom_key, updated.execute_at
		);
		self.notify.notify_one();
		Ok(Some(updated))
	}

	/// Claim the next due task and hand it to the pool (or run it inline in
	/// synchronous mode). Returns whether a task was dispatched.
	pub async fn execute_next(&self, now: Timestamp) -> DrResult<bool> {
		let Some(state) = self.state.get() else {
			debug!("Scheduler not started, nothing is dispatched");
			return Ok(false);
		};
		let pool = if self.opts.synchronous { None } else { Some(self.pool()?) };

		let Some(task) = self.queue.find_and_lock_next_task(now).await? else {
			return Ok(false);
		};
		let id = task.id;
		let runner = self.runner(task, state.clone());
		match pool {
			None => runner.run(true).await?,
			Some(pool) => {
				pool.submit(async move {
					if let Err(err) = runner.run(false).await {
						error!("Task {} runner failed: {}", id, err);
					}
				})
				.inspect_err(|_| error!("Task {} was locked but could not be submitted", id))?;
			}
		}
		Ok(true)
	}

	/// Load stored tasks, then start the worker pool and the dispatcher.
	///
	/// In synchronous mode no background work is started.
	pub async fn start(&self, state: S) -> DrResult<()> {
		if self.started.swap(true, Ordering::SeqCst) {
			return Err(Error::Configuration("scheduler already started".into()));
		}
		let loaded = match self.load().await {
			Ok(loaded) => loaded,
			Err(err) => {
				self.started.store(false, Ordering::SeqCst);
				return Err(err);
			}
		};
		if self.state.set(state).is_err() {
			return Err(Error::Configuration("scheduler already started".into()));
		}
		info!("Scheduler started, {} tasks queued from storage", loaded);

		if self.opts.synchronous {
			if let Err(err) = self.delete_old_tasks().await {
				error!("Retention sweep failed: {}", err);
			}
			return Ok(());
		}

		*lock!(self.pool, "pool")? = Some(Arc::new(TaskPool::start(self.opts.pool_size)));
		let dispatcher = tokio::spawn(self.clone().dispatch_loop());
		*lock!(self.dispatcher, "dispatcher")? = Some(dispatcher);
		Ok(())
	}

	async fn load(&self) -> DrResult<usize> {
		let tasks = self.store().load_tasks().await?;
		debug!("Loaded {} tasks from store", tasks.len());
		let mut queued = 0;
		for task in tasks {
			let id = task.id;
			if self.queue.on_load_task_on_boot(task)? {
				debug!("Queued task {} from storage", id);
				queued += 1;
			}
		}
		Ok(queued)
	}

	async fn dispatch_loop(self) {
		info!("Dispatcher started");
		let mut next_cleanup = Instant::now();
		let mut next_manual_scan = Instant::now();

		while !self.stopping.load(Ordering::SeqCst) {
			if Instant::now() >= next_cleanup {
				if let Err(err) = self.delete_old_tasks().await {
					error!("Retention sweep failed: {}", err);
				}
				next_cleanup = Instant::now() + self.opts.cleanup_interval;
			}
			if Instant::now() >= next_manual_scan {
				if let Err(err) = self.scan_manual_retries().await {
					error!("Manual retry scan failed: {}", err);
				}
				next_manual_scan = Instant::now() + self.opts.manual_retry_interval;
			}

			let cycle = AssertUnwindSafe(self.execute_next(Timestamp::now())).catch_unwind().await;
			let dispatched = match cycle {
				Ok(Ok(dispatched)) => dispatched,
				Ok(Err(err)) => {
					error!("Dispatcher cycle failed: {}", err);
					false
				}
				Err(_) => {
					error!("Dispatcher cycle panicked");
					false
				}
			};

			if !dispatched && !self.stopping.load(Ordering::SeqCst) {
				tokio::select! {
					() = tokio::time::sleep(self.opts.poll_interval) => (),
					() = self.notify.notified() => (),
				}
			}
		}
		info!("Dispatcher stopped");
	}

	fn pool(&self) -> DrResult<Arc<TaskPool>> {
		lock!(self.pool, "pool")?
			.clone()
			.ok_or(Error::Configuration("scheduler not started".into()))
	}

	fn runner(&self, task: TaskRecord, state: S) -> TaskRunner<S> {
		TaskRunner::new(task, Arc::clone(&self.registry), Arc::clone(&self.queue), state)
	}

	/// Operator force-run of a single task, executed inline.
	///
	/// Returns `false` when the task is locked (or cannot be locked) and `force`
	/// is not set. Handler errors are returned to the caller.
	pub async fn run_task_for_id(&self, id: TaskId, force: bool) -> DrResult<bool> {
		let state = self
			.state
			.get()
			.cloned()
			.ok_or(Error::Configuration("scheduler not started".into()))?;
		let task = self.store().read_task(id).await?.ok_or(Error::NotFound)?;

		if task.is_failed() && !force {
			return Err(Error::PermanentFailure(id));
		}
		if task.is_locked() && !force {
			warn!("Task {} is already locked, not running it", id);
			return Ok(false);
		}
		let task = match self.store().lock_for_processing(&task, Timestamp::now()).await? {
			Some(locked) => locked,
			None if force => {
				warn!("Unable to lock task {}, running it anyway", id);
				task
			}
			None => {
				warn!("Unable to lock task {}", id);
				return Ok(false);
			}
		};

		self.queue.forget(id)?;
		info!("Running task {} on operator request", id);
		self.runner(task, state).run(true).await?;
		Ok(true)
	}

	/// Operator reset of a (typically permanently failed) task so it runs again
	pub async fn retry_task(&self, id: TaskId) -> DrResult<TaskRecord> {
		let stored = self.store().read_task(id).await?.ok_or(Error::NotFound)?;
		if stored.is_completed() {
			warn!("Task {} already completed, not requeued", id);
			return Ok(stored);
		}
		// The store leaves a task alone that completed since the read
		let task =
			self.store().reset_for_retry(id, Timestamp::now()).await?.ok_or(Error::NotFound)?;
		if task.is_completed() {
			warn!("Task {} already completed, not requeued", id);
			return Ok(task);
		}
		info!("Task {} reset for retry", id);
		self.queue.requeue(task.clone())?;
		self.notify.notify_one();
		Ok(task)
	}

	/// Requeue tasks an operator dropped into the store's manual retry area
	async fn scan_manual_retries(&self) -> DrResult<usize> {
		let tasks = self.store().take_manual_retries(Timestamp::now()).await?;
		let count = tasks.len();
		for task in tasks {
			info!("Manual retry of task {} handler={}", task.id, task.handler_name);
			self.queue.requeue(task)?;
		}
		if count > 0 {
			self.notify.notify_one();
		}
		Ok(count)
	}

	/// Delete completed tasks past the retention window
	pub async fn delete_old_tasks(&self) -> DrResult<u64> {
		let before = Timestamp::now().add_ms(-duration_ms(self.opts.retention));
		let deleted = self.store().delete_old_tasks(before).await?;
		if deleted > 0 {
			info!("Deleted {} completed tasks older than {}", deleted, before);
		}
		Ok(deleted)
	}

	pub async fn pending_task_count(&self) -> DrResult<usize> {
		self.queue.pending_task_count().await
	}

	pub async fn has_task_with_id(&self, id: TaskId) -> DrResult<bool> {
		self.queue.has_task_with_id(id).await
	}

	/// A task with this key exists, is not completed, and has not come due yet
	pub async fn has_pending_task_with_custom_key(&self, key: &str) -> DrResult<bool> {
		let now = Timestamp::now();
		Ok(self.store().find_by_custom_key(key).await?.is_some_and(|t| {
			!t.is_completed() && (!t.execute_at.is_set() || t.execute_at > now)
		}))
	}

	pub async fn has_task_with_custom_key(&self, key: &str) -> DrResult<bool> {
		Ok(self.store().find_by_custom_key(key).await?.is_some())
	}

	fn stop_dispatcher(&self) {
		self.stopping.store(true, Ordering::SeqCst);
		self.notify.notify_one();
	}

	/// Stop immediately: the dispatcher and running handlers are cancelled
	pub fn shutdown_now(&self) -> DrResult<()> {
		info!("Shutting down scheduler now");
		self.stop_dispatcher();
		if let Some(dispatcher) = lock!(self.dispatcher, "dispatcher")?.take() {
			dispatcher.abort();
		}
		if let Some(pool) = lock!(self.pool, "pool")?.as_ref() {
			pool.abort()?;
		}
		Ok(())
	}

	/// Stop dispatching, let running handlers finish within the shutdown timeout,
	/// then cancel whatever is left.
	pub async fn graceful_shutdown(&self) -> DrResult<()> {
		info!("Shutting down scheduler gracefully");
		let deadline = Instant::now() + self.opts.shutdown_timeout;
		self.stop_dispatcher();

		let dispatcher = lock!(self.dispatcher, "dispatcher")?.take();
		if let Some(mut dispatcher) = dispatcher
			&& tokio::time::timeout_at(deadline, &mut dispatcher).await.is_err()
		{
			warn!("Dispatcher did not stop in time, aborting it");
			dispatcher.abort();
		}

		let pool = lock!(self.pool, "pool")?.clone();
		let Some(pool) = pool else {
			return Ok(());
		};
		pool.shutdown()?;
		let mut polls: u32 = 0;
		while !pool.is_terminated()? {
			if Instant::now() >= deadline {
				warn!(
					"{} tasks still running after {:?}, aborting them",
					pool.active(),
					self.opts.shutdown_timeout
				);
				pool.abort()?;
				break;
			}
			if polls % 50 == 0 {
				info!("Waiting for {} running tasks to finish", pool.active());
			}
			polls += 1;
			tokio::time::sleep(SHUTDOWN_POLL).await;
		}
		info!("Scheduler stopped");
		Ok(())
	}
}


// vim: ts=4
