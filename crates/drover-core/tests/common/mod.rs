//! Handlers and state shared by the scheduler integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use drover_core::{TaskContext, TaskHandler};
use drover_types::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::{
	Arc, Mutex,
	atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

/// Application state handed to every handler: a log of delivered messages and a
/// switch that makes `Fragile` fail
#[derive(Clone, Debug, Default)]
pub struct Outbox {
	sent: Arc<Mutex<Vec<String>>>,
	broken: Arc<AtomicBool>,
}

impl Outbox {
	pub fn sent(&self) -> Vec<String> {
		self.sent.lock().unwrap().clone()
	}

	pub fn push(&self, entry: String) {
		self.sent.lock().unwrap().push(entry);
	}

	pub fn set_broken(&self, broken: bool) {
		self.broken.store(broken, Ordering::SeqCst);
	}

	pub fn is_broken(&self) -> bool {
		self.broken.load(Ordering::SeqCst)
	}
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendEmail {
	pub to: String,
	pub subject: String,
}

impl SendEmail {
	pub fn new(to: &str, subject: &str) -> Arc<Self> {
		Arc::new(Self { to: to.into(), subject: subject.into() })
	}
}

#[async_trait]
impl TaskHandler<Outbox> for SendEmail {
	fn kind() -> &'static str {
		"SendEmail"
	}

	fn serialize(&self) -> DrResult<String> {
		Ok(serde_json::to_string(self)?)
	}

	async fn process(&self, _ctx: &TaskContext, state: &Outbox) -> DrResult<()> {
		state.push(format!("{}:{}", self.to, self.subject));
		Ok(())
	}

	fn kind_of(&self) -> &'static str {
		"SendEmail"
	}
}

/// Fails until it has been tried `failures` times
#[derive(Debug, Serialize, Deserialize)]
pub struct Flaky {
	pub failures: u32,
}

#[async_trait]
impl TaskHandler<Outbox> for Flaky {
	fn kind() -> &'static str {
		"Flaky"
	}

	fn serialize(&self) -> DrResult<String> {
		Ok(serde_json::to_string(self)?)
	}

	async fn process(&self, ctx: &TaskContext, state: &Outbox) -> DrResult<()> {
		if ctx.try_count() < self.failures {
			return Err(Error::Execution(format!("attempt {} failed", ctx.try_count() + 1)));
		}
		state.push(format!("flaky:{}", ctx.try_count()));
		Ok(())
	}

	fn kind_of(&self) -> &'static str {
		"Flaky"
	}
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AlwaysFail;

#[async_trait]
impl TaskHandler<Outbox> for AlwaysFail {
	fn kind() -> &'static str {
		"AlwaysFail"
	}

	fn serialize(&self) -> DrResult<String> {
		Ok(serde_json::to_string(self)?)
	}

	async fn process(&self, _ctx: &TaskContext, _state: &Outbox) -> DrResult<()> {
		Err(Error::Execution("smtp unavailable".into()))
	}

	fn kind_of(&self) -> &'static str {
		"AlwaysFail"
	}
}

/// Fails while the outbox is marked broken
#[derive(Debug, Serialize, Deserialize)]
pub struct Fragile {
	pub label: String,
}

#[async_trait]
impl TaskHandler<Outbox> for Fragile {
	fn kind() -> &'static str {
		"Fragile"
	}

	fn serialize(&self) -> DrResult<String> {
		Ok(serde_json::to_string(self)?)
	}

	async fn process(&self, _ctx: &TaskContext, state: &Outbox) -> DrResult<()> {
		if state.is_broken() {
			return Err(Error::Execution("outbox is broken".into()));
		}
		state.push(self.label.clone());
		Ok(())
	}

	fn kind_of(&self) -> &'static str {
		"Fragile"
	}
}

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Poll `cond` every 20 ms for up to five seconds
pub async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
	for _ in 0..250 {
		if cond() {
			return true;
		}
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
	cond()
}

// vim: ts=4
