//! Fixed-size worker pool. Jobs are futures sent over an unbounded channel and
//! picked up by whichever worker is idle.

use flume::{Receiver, Sender};
use futures::FutureExt;
use std::{
	future::Future,
	panic::AssertUnwindSafe,
	pin::Pin,
	sync::{
		Arc, Mutex,
		atomic::{AtomicUsize, Ordering},
	},
};
use tokio::task::JoinHandle;

use crate::prelude::*;

pub const DEFAULT_POOL_SIZE: usize = 4;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Debug)]
pub struct TaskPool {
	tx: Mutex<Option<Sender<Job>>>,
	workers: Mutex<Vec<JoinHandle<()>>>,
	active: Arc<AtomicUsize>,
}

impl TaskPool {
	/// Spawn `size` workers on the current tokio runtime
	pub fn start(size: usize) -> Self {
		let (tx, rx) = flume::unbounded();
		let rx = Arc::new(rx);
		let active = Arc::new(AtomicUsize::new(0));

		let workers = (0..size.max(1))
			.map(|n| {
				let rx = Arc::clone(&rx);
				let active = Arc::clone(&active);
				tokio::spawn(async move { worker_loop(n, &rx, &active).await })
			})
			.collect();

		Self { tx: Mutex::new(Some(tx)), workers: Mutex::new(workers), active }
	}

	pub fn submit<F>(&self, job: F) -> DrResult<()>
	where
		F: Future<Output = ()> + Send + 'static,
	{
		let tx = lock!(self.tx, "pool sender")?;
		let tx = tx.as_ref().ok_or(Error::Internal("worker pool is shut down".into()))?;
		tx.send(Box::pin(job)).map_err(|_| {
			error!("Failed to send job to worker queue");
			Error::Internal("worker queue closed".into())
		})
	}

	/// Stop accepting jobs. Workers finish what is already queued, then exit.
	pub fn shutdown(&self) -> DrResult<()> {
		lock!(self.tx, "pool sender")?.take();
		Ok(())
	}

	/// Stop accepting jobs and cancel running ones at their next await point
	pub fn abort(&self) -> DrResult<()> {
		self.shutdown()?;
		for worker in lock!(self.workers, "pool workers")?.iter() {
			worker.abort();
		}
		Ok(())
	}

	pub fn is_terminated(&self) -> DrResult<bool> {
		Ok(lock!(self.workers, "pool workers")?.iter().all(JoinHandle::is_finished))
	}

	/// Number of jobs currently executing
	pub fn active(&self) -> usize {
		self.active.load(Ordering::SeqCst)
	}
}

async fn worker_loop(n: usize, rx: &Receiver<Job>, active: &AtomicUsize) {
	debug!("Worker {} started", n);
	while let Ok(job) = rx.recv_async().await {
		active.fetch_add(1, Ordering::SeqCst);
		if AssertUnwindSafe(job).catch_unwind().await.is_err() {
			error!("Worker {}: job panicked", n);
		}
		active.fetch_sub(1, Ordering::SeqCst);
	}
	debug!("Worker {} stopped", n);
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	#[tokio::test]
	async fn test_jobs_run_and_pool_drains_on_shutdown() {
		let pool = TaskPool::start(2);
		let done = Arc::new(AtomicUsize::new(0));
		for _ in 0..10 {
			let done = Arc::clone(&done);
			pool.submit(async move {
				tokio::time::sleep(Duration::from_millis(10)).await;
				done.fetch_add(1, Ordering::SeqCst);
			})
			.unwrap();
		}
		pool.shutdown().unwrap();
		assert!(pool.submit(async {}).is_err());

		for _ in 0..100 {
			if pool.is_terminated().unwrap() {
				break;
			}
			tokio::time::sleep(Duration::from_millis(20)).await;
		}
		assert!(pool.is_terminated().unwrap());
		assert_eq!(done.load(Ordering::SeqCst), 10);
	}

	#[tokio::test]
	async fn test_panicking_job_does_not_kill_worker() {
		let pool = TaskPool::start(1);
		let done = Arc::new(AtomicUsize::new(0));
		pool.submit(async { panic!("boom") }).unwrap();
		let flag = Arc::clone(&done);
		pool.submit(async move {
			flag.fetch_add(1, Ordering::SeqCst);
		})
		.unwrap();
		pool.shutdown().unwrap();
		for _ in 0..100 {
			if pool.is_terminated().unwrap() {
				break;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		assert_eq!(done.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_abort_cancels_running_jobs() {
		let pool = TaskPool::start(1);
		pool.submit(async { tokio::time::sleep(Duration::from_secs(3600)).await }).unwrap();
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert_eq!(pool.active(), 1);
		pool.abort().unwrap();
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert!(pool.is_terminated().unwrap());
	}
}

// vim: ts=4
