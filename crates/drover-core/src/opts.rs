//! Scheduler settings.

use std::time::Duration;

use drover_types::types::slugify;

use crate::pool::DEFAULT_POOL_SIZE;
use crate::prelude::*;

/// Completed tasks older than this are deleted by the retention sweep
pub const RETENTION_DAYS: i64 = 40;

#[derive(Debug, Clone)]
pub struct SchedulerOpts {
	pub pool_size: usize,
	/// How long the dispatcher sleeps when nothing is due
	pub poll_interval: Duration,
	/// Run due tasks inline on the enqueuing caller instead of on the pool
	pub synchronous: bool,
	pub retry_policy: RetryPolicy,
	/// Partition tag for the shared strategy; empty means "all processes share"
	pub local_mode: Box<str>,
	pub shutdown_timeout: Duration,
	pub retention: Duration,
	pub cleanup_interval: Duration,
	pub manual_retry_interval: Duration,
	/// Age after which a task that has not completed counts as stuck
	pub stuck_after: Duration,
}

impl Default for SchedulerOpts {
	fn default() -> Self {
		Self {
			pool_size: DEFAULT_POOL_SIZE,
			poll_interval: Duration::from_secs(1),
			synchronous: false,
			retry_policy: RetryPolicy::default(),
			local_mode: "".into(),
			shutdown_timeout: Duration::from_secs(5 * 60),
			retention: Duration::from_secs(RETENTION_DAYS as u64 * 24 * 3600),
			cleanup_interval: Duration::from_secs(24 * 3600),
			manual_retry_interval: Duration::from_secs(10),
			stuck_after: Duration::from_secs(30 * 60),
		}
	}
}

/// Partition tag used in local mode: the `USER` environment variable, or a slug
/// of the data directory when it is not set.
pub fn local_mode_tag(data_dir: &str) -> Box<str> {
	match std::env::var("USER") {
		Ok(user) if !user.trim().is_empty() => user.trim().into(),
		_ => slugify(data_dir).into(),
	}
}

pub(crate) fn duration_ms(d: Duration) -> i64 {
	i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}


// vim: ts=4
