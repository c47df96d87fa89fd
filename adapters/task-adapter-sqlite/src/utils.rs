//! Error mapping helpers shared by the query modules.

use drover_types::prelude::*;
use sqlx::sqlite::SqliteRow;

pub(crate) fn inspect(err: &sqlx::Error) {
	warn!("DB: {:#?}", err);
}

/// Log a database error and collapse it into `Error::DbError`
pub(crate) fn db_err(err: sqlx::Error) -> Error {
	inspect(&err);
	Error::DbError
}

pub(crate) fn map_res<T, F>(row: Result<SqliteRow, sqlx::Error>, f: F) -> DrResult<T>
where
	F: FnOnce(SqliteRow) -> Result<T, sqlx::Error>,
{
	match row {
		Ok(row) => f(row).map_err(db_err),
		Err(sqlx::Error::RowNotFound) => Err(Error::NotFound),
		Err(err) => Err(db_err(err)),
	}
}

pub(crate) fn collect_res<T>(iter: impl Iterator<Item = Result<T, sqlx::Error>>) -> DrResult<Vec<T>> {
	let mut items = Vec::new();
	for item in iter {
		items.push(item.map_err(db_err)?);
	}
	Ok(items)
}

// vim: ts=4
