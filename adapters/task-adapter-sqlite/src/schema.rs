//! Database schema initialization and migrations

use sqlx::SqlitePool;

/// Bumped whenever a migration is appended below
pub(crate) const SCHEMA_VERSION: i64 = 1;

/// Initialize the database schema with all required tables and indexes
pub(crate) async fn init_db(db: &SqlitePool) -> Result<(), sqlx::Error> {
	let mut tx = db.begin().await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS globals (
			key text NOT NULL,
			value text,
			PRIMARY KEY(key)
	)",
	)
	.execute(&mut *tx)
	.await?;

	// Tasks
	//*******
	// Timestamps are epoch milliseconds, 0 meaning "not set"
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS tasks (
		id integer PRIMARY KEY AUTOINCREMENT,
		custom_key text,
		handler_name text NOT NULL,
		data_json text NOT NULL DEFAULT '{}',
		created_at integer NOT NULL DEFAULT 0,
		updated_at integer NOT NULL DEFAULT 0,
		execute_at integer NOT NULL DEFAULT 0,
		originally_scheduled_for integer NOT NULL DEFAULT 0,
		locked_at integer NOT NULL DEFAULT 0,
		lock_uuid text NOT NULL DEFAULT '',
		try_count integer NOT NULL DEFAULT 0,
		never_retry boolean NOT NULL DEFAULT 0,
		failed_at integer NOT NULL DEFAULT 0,
		completed_at integer NOT NULL DEFAULT 0,
		error_message text NOT NULL DEFAULT '',
		local_mode text NOT NULL DEFAULT ''
	)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_custom_key ON tasks(custom_key)")
		.execute(&mut *tx)
		.await?;
	sqlx::query(
		"CREATE INDEX IF NOT EXISTS idx_tasks_next
		ON tasks(local_mode, completed_at, lock_uuid, execute_at)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"INSERT INTO globals (key, value) VALUES ('schema_version', ?)
		ON CONFLICT(key) DO NOTHING",
	)
	.bind(SCHEMA_VERSION.to_string())
	.execute(&mut *tx)
	.await?;

	tx.commit().await?;

	Ok(())
}

pub(crate) async fn schema_version(db: &SqlitePool) -> Result<Option<i64>, sqlx::Error> {
	let value: Option<String> =
		sqlx::query_scalar("SELECT value FROM globals WHERE key='schema_version'")
			.fetch_optional(db)
			.await?;
	Ok(value.and_then(|v| v.parse().ok()))
}

// vim: ts=4
