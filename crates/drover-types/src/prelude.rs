pub use crate::error::{DrResult, Error};
pub use crate::types::{TaskId, Timestamp};

pub use tracing::{debug, debug_span, error, error_span, info, info_span, warn, warn_span};

// vim: ts=4
