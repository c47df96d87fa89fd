//! Common types used throughout Drover.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

pub type TaskId = u64;

pub const SECOND_MS: i64 = 1000;
pub const MINUTE_MS: i64 = 60 * SECOND_MS;
pub const HOUR_MS: i64 = 60 * MINUTE_MS;
pub const DAY_MS: i64 = 24 * HOUR_MS;

// Timestamp //
//***********//
/// Milliseconds since the unix epoch. `Timestamp(0)` means "not set".
#[derive(
	Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
	pub const ZERO: Timestamp = Timestamp(0);

	pub fn now() -> Timestamp {
		let res = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
		Timestamp(res.as_millis() as i64)
	}

	/// A timestamp `ms` milliseconds from now (negative values go to the past)
	pub fn from_now_ms(ms: i64) -> Timestamp {
		Timestamp::now().add_ms(ms)
	}

	pub fn add_ms(self, ms: i64) -> Timestamp {
		Timestamp(self.0.saturating_add(ms))
	}

	pub fn is_set(self) -> bool {
		self.0 != 0
	}
}

impl std::fmt::Display for Timestamp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Lowercase a string and replace every run of non-alphanumeric characters with a dash.
///
/// - `"/srv/My Site/"` → `"srv-my-site"`
pub fn slugify(s: &str) -> String {
	let mut slug = String::with_capacity(s.len());
	for c in s.chars() {
		if c.is_ascii_alphanumeric() {
			slug.push(c.to_ascii_lowercase());
		} else if !slug.is_empty() && !slug.ends_with('-') {
			slug.push('-');
		}
	}
	while slug.ends_with('-') {
		slug.pop();
	}
	slug
}


// vim: ts=4
