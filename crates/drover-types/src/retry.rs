//! Retry policy with capped exponential backoff.

use rand::RngExt;

use crate::types::SECOND_MS;

/// Number of attempts after which a task is marked permanently failed
pub const DEFAULT_RETRY_TIMES: u32 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
	/// Backoff bounds in seconds: first retry waits `min`, never more than `max`
	wait_min_max: (u64, u64),
	times: u32,
	/// Upper bound of the random extra delay, as a fraction of the computed backoff
	jitter: f64,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self { wait_min_max: (2, 3600), times: DEFAULT_RETRY_TIMES, jitter: 0.1 }
	}
}

impl RetryPolicy {
	/// Create a new RetryPolicy with custom min/max backoff and number of attempts
	pub fn new(wait_min_max: (u64, u64), times: u32) -> Self {
		Self { wait_min_max, times, jitter: 0.1 }
	}

	pub fn with_jitter(mut self, jitter: f64) -> Self {
		self.jitter = jitter.clamp(0.0, 1.0);
		self
	}

	pub fn times(&self) -> u32 {
		self.times
	}

	/// Calculate exponential backoff in seconds: min * (2^attempt), capped at max
	pub fn calculate_backoff(&self, attempt_count: u32) -> u64 {
		let (min, max) = self.wait_min_max;
		let factor = 1u64.checked_shl(attempt_count).unwrap_or(u64::MAX);
		min.saturating_mul(factor).min(max)
	}

	/// Backoff in milliseconds including a random jitter of up to `jitter * backoff`
	pub fn backoff_ms(&self, attempt_count: u32) -> i64 {
		let base = self.calculate_backoff(attempt_count) as i64 * SECOND_MS;
		let spread = (base as f64 * self.jitter) as i64;
		if spread <= 0 {
			return base;
		}
		let mut rng = rand::rng();
		base + rng.random_range(0..=spread)
	}

	/// Check if a task that has been tried `attempt_count` times may run again
	pub fn should_retry(&self, attempt_count: u32) -> bool {
		attempt_count < self.times
	}
}


// vim: ts=4
