//! Reference worker process and operator CLI.
//!
//! `drover run` starts a worker; the other subcommands act on the configured
//! store once and exit. The store is chosen from the environment: `DROVER_DB`
//! selects the shared SQLite strategy, otherwise the file store in
//! `DROVER_DATA_DIR` is used with a process-local queue.

use clap::{Parser, Subcommand};
use std::{process::ExitCode, sync::Arc};

use drover_core::{Scheduler, SchedulerBuilder, local_mode_tag};
use drover_task_adapter_fs::TaskAdapterFs;
use drover_task_adapter_sqlite::TaskAdapterSqlite;
use drover_types::{prelude::*, task::TaskRecord, task_store::TaskStore};

mod config;
mod handlers;

use config::Config;
use handlers::WorkerState;

#[derive(Parser)]
#[command(name = "drover", version)]
#[command(about = "Durable task queue worker")]
struct Cli {
	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// Run the worker until interrupted
	Run,
	/// Store a new task. A running worker on the file store sees it after a restart.
	Enqueue {
		#[arg(long)]
		handler: String,
		/// Handler state as JSON
		#[arg(long, default_value = "{}")]
		data: String,
		/// Deduplication key
		#[arg(long)]
		key: Option<String>,
		#[arg(long, default_value_t = 0)]
		delay_secs: u64,
	},
	/// Run one task now, inline
	ForceTask {
		#[arg(long)]
		task_id: TaskId,
		/// Run even if the task is locked or permanently failed
		#[arg(long)]
		force: bool,
	},
	/// Reset a failed task so it is tried again
	RetryTask {
		#[arg(long)]
		task_id: TaskId,
	},
	/// Delete completed tasks past the retention window
	Cleanup,
	/// Print queue health as JSON
	Health,
}

#[tokio::main]
async fn main() -> ExitCode {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.with_target(false)
		.init();

	let cli = Cli::parse();
	match run(cli.command).await {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			error!("{}", err);
			ExitCode::FAILURE
		}
	}
}

async fn run(command: Command) -> DrResult<()> {
	let config = Config::from_env()?;
	let background = matches!(command, Command::Run);
	let scheduler = build_scheduler(&config, !background).await?;
	handlers::register(&scheduler)?;
	let state = WorkerState::new(config.data_dir.join("out"));

	match command {
		Command::Run => {
			scheduler.start(state).await?;
			info!("Worker running, press Ctrl-C to stop");
			tokio::signal::ctrl_c().await?;
			scheduler.graceful_shutdown().await?;
		}
		Command::Enqueue { handler, data, key, delay_secs } => {
			serde_json::from_str::<serde_json::Value>(&data)?;
			let execute_at = (delay_secs > 0)
				.then(|| Timestamp::from_now_ms(delay_secs.saturating_mul(1000) as i64));
			let mut task = TaskRecord::new(handler, data).with_custom_key(key.as_deref());
			if let Some(execute_at) = execute_at {
				task = task.with_execute_at(execute_at);
			}
			let task = scheduler.enqueue(task).await?;
			println!("{}", task.id);
		}
		Command::ForceTask { task_id, force } => {
			scheduler.start(state).await?;
			if !scheduler.run_task_for_id(task_id, force).await? {
				return Err(Error::Configuration(format!(
					"task {} is locked, use --force to run it anyway",
					task_id
				)));
			}
		}
		Command::RetryTask { task_id } => {
			let task = scheduler.retry_task(task_id).await?;
			info!("Task {} will run at {}", task.id, task.execute_at);
		}
		Command::Cleanup => {
			let deleted = scheduler.delete_old_tasks().await?;
			println!("{}", deleted);
		}
		Command::Health => {
			scheduler.start(state).await?;
			let health = scheduler.health_check().await?;
			println!("{}", serde_json::to_string_pretty(&health)?);
		}
	}
	Ok(())
}

async fn build_scheduler(config: &Config, synchronous: bool) -> DrResult<Scheduler<WorkerState>> {
	let mut builder = SchedulerBuilder::new();
	builder.synchronous(synchronous);
	if let Some(workers) = config.workers {
		builder.pool_size(workers);
	}

	let scheduler = match &config.db_path {
		Some(db_path) => {
			if config.local_mode {
				builder.local_mode(local_mode_tag(&config.data_dir.to_string_lossy()));
			}
			let store: Arc<dyn TaskStore> = Arc::new(TaskAdapterSqlite::new(db_path).await?);
			builder.build_shared(store)
		}
		None => {
			let store: Arc<dyn TaskStore> = Arc::new(TaskAdapterFs::new(&config.data_dir).await?);
			builder.build_local(store)
		}
	};
	Ok(scheduler)
}

// vim: ts=4
