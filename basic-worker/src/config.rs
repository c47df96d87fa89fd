//! Worker configuration, read from the environment.

use std::{env, path::PathBuf};

use drover_types::prelude::*;

pub const DEFAULT_DATA_DIR: &str = "./data/tasks";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
	/// File store location, also the base for handler output
	pub data_dir: PathBuf,
	/// SQLite database; when set the shared strategy is used
	pub db_path: Option<PathBuf>,
	pub workers: Option<usize>,
	/// Partition tasks by user (or data dir) in a shared database
	pub local_mode: bool,
}

impl Config {
	pub fn from_env() -> DrResult<Self> {
		Self::from_lookup(|name| env::var(name).ok())
	}

	fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> DrResult<Self> {
		let workers = match lookup("DROVER_WORKERS").filter(|v| !v.trim().is_empty()) {
			None => None,
			Some(value) => match value.trim().parse::<usize>() {
				Ok(0) | Err(_) => {
					return Err(Error::Configuration(format!(
						"DROVER_WORKERS must be a positive number, got {:?}",
						value
					)));
				}
				Ok(n) => Some(n),
			},
		};

		Ok(Config {
			data_dir: PathBuf::from(
				lookup("DROVER_DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
			),
			db_path: lookup("DROVER_DB").filter(|v| !v.trim().is_empty()).map(PathBuf::from),
			workers,
			local_mode: lookup("DROVER_LOCAL_MODE").is_some_and(|v| v.trim() == "1"),
		})
	}
}


// vim: ts=4
