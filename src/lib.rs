//! Offline-first media catalog synchronization with grouped navigation.
//!
//! A catalog provider serves one payload per [`ContentType`]. Each content
//! type syncs through its own [`ContentPipeline`] into a local SQLite store,
//! from which a filtered, grouped [`NavigationTree`] is built. Changes
//! between successive trees are delivered as [`ContentDiff`]s, held back
//! while the user is interacting.

pub mod catalog;
pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod navigation;
pub mod settings;
pub mod storage;
pub mod sync;
pub mod util;

pub use catalog::{CatalogSource, FetchError, HttpCatalogClient};
pub use config::Config;
pub use diff::ContentDiff;
pub use engine::{CatalogEngine, EngineOptions, TriggerOutcome};
pub use error::{SyncError, WriteError};
pub use navigation::{ContentFilterSettings, FilterMode, NavigationState, NavigationTree};
pub use storage::{ContentType, Database, DatabaseError};
pub use sync::{ContentPipeline, SyncPhase, SyncState};
