pub use drover_types::lock;
pub use drover_types::prelude::*;
pub use drover_types::retry::RetryPolicy;
pub use drover_types::task::TaskRecord;
pub use drover_types::task_store::TaskStore;

// vim: ts=4
