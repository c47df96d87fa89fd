//! Error type shared by the scheduler and all storage adapters.

pub type DrResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	/// Misuse of the API: double start, blank handler name, bad settings
	Configuration(String),
	/// No registered factory or resolver knows this handler name
	HandlerNotFound(Box<str>),
	/// A handler returned an error while processing a task
	Execution(String),
	/// The task ran out of retries and needs operator intervention
	PermanentFailure(u64),
	NotFound,
	DbError,
	/// The backend cannot perform the requested operation
	Unsupported(&'static str),
	Internal(String),

	// externals
	Io(std::io::Error),
	Json(serde_json::Error),
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		Self::Io(err)
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Self::Json(err)
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Error::Configuration(msg) => write!(f, "configuration error: {}", msg),
			Error::HandlerNotFound(name) => write!(f, "handler not found: {}", name),
			Error::Execution(msg) => write!(f, "execution error: {}", msg),
			Error::PermanentFailure(id) => {
				write!(f, "task {} failed permanently and needs a manual retry", id)
			}
			Error::NotFound => write!(f, "not found"),
			Error::DbError => write!(f, "database error"),
			Error::Unsupported(what) => write!(f, "unsupported by this backend: {}", what),
			Error::Internal(msg) => write!(f, "internal error: {}", msg),
			Error::Io(err) => write!(f, "io error: {}", err),
			Error::Json(err) => write!(f, "json error: {}", err),
		}
	}
}

impl std::error::Error for Error {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Error::Io(err) => Some(err),
			Error::Json(err) => Some(err),
			_ => None,
		}
	}
}


// vim: ts=4
