pub mod compute;
pub mod dispatcher;

pub use compute::{compute_diffs, ContentDiff};
pub use dispatcher::{DiffDispatcher, DEFAULT_IDLE_TIMEOUT};
