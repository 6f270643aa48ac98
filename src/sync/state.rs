//! Per-content-type sync phases and weighted progress.

use std::fmt;

use tokio::sync::watch;

use crate::storage::ContentType;

/// In-progress phase of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    Fetching,
    Parsing,
    Persisting,
    Indexing,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Fetching => "fetching",
            SyncPhase::Parsing => "parsing",
            SyncPhase::Persisting => "persisting",
            SyncPhase::Indexing => "indexing",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of one content type's sync pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Idle {
        has_cached_data: bool,
    },
    Fetching {
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
    },
    Parsing {
        items_parsed: u64,
        total_items: Option<u64>,
    },
    Persisting {
        items_written: u64,
        total_items: u64,
    },
    Indexing,
    Success {
        item_count: u64,
        duration_ms: u64,
    },
    /// Completed with row-level write failures.
    PartialSuccess {
        success_count: u64,
        failed_count: u64,
        cause: String,
    },
    Error {
        cause: String,
        phase: SyncPhase,
        has_cached_data: bool,
    },
}

impl Default for SyncState {
    fn default() -> Self {
        SyncState::Idle {
            has_cached_data: false,
        }
    }
}

fn percent(done: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    ((done as f64 / total as f64) * 100.0).min(100.0) as f32
}

impl SyncState {
    /// Phase of an in-progress state.
    pub fn phase(&self) -> Option<SyncPhase> {
        match self {
            SyncState::Fetching { .. } => Some(SyncPhase::Fetching),
            SyncState::Parsing { .. } => Some(SyncPhase::Parsing),
            SyncState::Persisting { .. } => Some(SyncPhase::Persisting),
            SyncState::Indexing => Some(SyncPhase::Indexing),
            _ => None,
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.phase().is_some()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncState::Success { .. } | SyncState::PartialSuccess { .. } | SyncState::Error { .. }
        )
    }

    pub fn has_cached_data(&self) -> bool {
        match self {
            SyncState::Idle { has_cached_data } => *has_cached_data,
            SyncState::Success { .. } | SyncState::PartialSuccess { .. } => true,
            SyncState::Error {
                has_cached_data, ..
            } => *has_cached_data,
            _ => false,
        }
    }

    /// Progress of the current phase, 0 to 100.
    ///
    /// An unknown total reports 0. A persisting run with nothing to write is
    /// complete.
    pub fn own_progress(&self) -> Option<f32> {
        match self {
            SyncState::Fetching {
                bytes_downloaded,
                total_bytes,
            } => Some(total_bytes.map_or(0.0, |t| percent(*bytes_downloaded, t))),
            SyncState::Parsing {
                items_parsed,
                total_items,
            } => Some(total_items.map_or(0.0, |t| percent(*items_parsed, t))),
            SyncState::Persisting {
                items_written,
                total_items,
            } => Some(if *total_items == 0 {
                100.0
            } else {
                percent(*items_written, *total_items)
            }),
            _ => None,
        }
    }

    /// Weighted progress of the whole run, 0 to 100.
    ///
    /// | phase       | overall              |
    /// |-------------|----------------------|
    /// | fetching    | own / 10             |
    /// | parsing     | 10 + own * 30 / 100  |
    /// | persisting  | 40 + own * 50 / 100  |
    /// | indexing    | 90                   |
    /// | success     | 100                  |
    ///
    /// `None` while idle or failed.
    pub fn overall_progress(&self) -> Option<f32> {
        match self {
            SyncState::Fetching { .. } => self.own_progress().map(|own| own / 10.0),
            SyncState::Parsing { .. } => self.own_progress().map(|own| 10.0 + own * 30.0 / 100.0),
            SyncState::Persisting { .. } => {
                self.own_progress().map(|own| 40.0 + own * 50.0 / 100.0)
            }
            SyncState::Indexing => Some(90.0),
            SyncState::Success { .. } | SyncState::PartialSuccess { .. } => Some(100.0),
            SyncState::Idle { .. } | SyncState::Error { .. } => None,
        }
    }

    /// Message to show the user, if any.
    ///
    /// Failures are only surfaced when no cached catalog is available; with a
    /// cache the last good content stays on screen and the error is logged.
    pub fn surfaced_error(&self) -> Option<String> {
        match self {
            SyncState::Error {
                cause,
                phase,
                has_cached_data: false,
            } => Some(format!(
                "Catalog sync failed while {}: {}. Retry to try again.",
                phase, cause
            )),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            SyncState::Idle { .. } => "idle",
            SyncState::Fetching { .. } => "fetching",
            SyncState::Parsing { .. } => "parsing",
            SyncState::Persisting { .. } => "persisting",
            SyncState::Indexing => "indexing",
            SyncState::Success { .. } => "success",
            SyncState::PartialSuccess { .. } => "partial_success",
            SyncState::Error { .. } => "error",
        }
    }
}

/// Whether `from → to` is a legal edge.
fn is_valid_transition(from: &SyncState, to: &SyncState) -> bool {
    use SyncState::*;

    match (from, to) {
        // A run starts from any resting state.
        (Idle { .. } | Success { .. } | PartialSuccess { .. } | Error { .. }, Fetching { .. }) => {
            true
        }
        (Idle { .. }, Idle { .. }) => true,

        (Fetching { .. }, Fetching { .. } | Parsing { .. }) => true,
        (Parsing { .. }, Parsing { .. } | Persisting { .. }) => true,
        (Persisting { .. }, Persisting { .. } | Indexing | PartialSuccess { .. }) => true,
        (Indexing, Success { .. }) => true,

        // Failure or cancellation of an in-progress run.
        (from, Error { .. } | Idle { .. }) => from.is_syncing(),

        _ => false,
    }
}

/// Owner of one content type's published [`SyncState`].
///
/// Observers receive the latest value on subscription and every accepted
/// change after that. Invalid transitions and same-phase progress
/// regressions are dropped.
#[derive(Debug)]
pub struct SyncStateMachine {
    content_type: ContentType,
    tx: watch::Sender<SyncState>,
}

impl SyncStateMachine {
    pub fn new(content_type: ContentType, has_cached_data: bool) -> Self {
        let (tx, _rx) = watch::channel(SyncState::Idle { has_cached_data });
        Self { content_type, tx }
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> SyncState {
        self.tx.borrow().clone()
    }

    /// Publish `next` if it is a legal successor of the current state.
    ///
    /// Returns whether the state was accepted. A value equal to the current
    /// one is accepted without notifying observers.
    pub fn transition(&self, next: SyncState) -> bool {
        let content_type = self.content_type;
        let mut accepted = false;

        self.tx.send_if_modified(|current| {
            if *current == next {
                accepted = true;
                return false;
            }

            if !is_valid_transition(current, &next) {
                tracing::warn!(
                    content_type = %content_type,
                    from = current.label(),
                    to = next.label(),
                    "Rejected invalid sync state transition"
                );
                return false;
            }

            if current.phase().is_some() && current.phase() == next.phase() {
                if let (Some(before), Some(after)) =
                    (current.overall_progress(), next.overall_progress())
                {
                    if after < before {
                        tracing::debug!(
                            content_type = %content_type,
                            before,
                            after,
                            "Ignored regressing progress update"
                        );
                        return false;
                    }
                }
            }

            if current.label() != next.label() {
                tracing::debug!(
                    content_type = %content_type,
                    from = current.label(),
                    to = next.label(),
                    "Sync state changed"
                );
            }

            *current = next.clone();
            accepted = true;
            true
        });

        accepted
    }
}
