//! Catalog synchronization: state machine, write coordinator and pipeline.

pub mod pipeline;
pub mod state;
pub mod writer;

pub use pipeline::{ContentPipeline, SyncReport, DEFAULT_BATCH_SIZE};
pub use state::{SyncPhase, SyncState, SyncStateMachine};
pub use writer::{BatchOutcome, BulkWriter};
