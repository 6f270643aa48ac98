use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::state::{SyncPhase, SyncState, SyncStateMachine};
use super::writer::{BatchOutcome, BulkWriter};
use crate::catalog::{parse_catalog, CatalogSource, ParsedCatalog};
use crate::error::SyncError;
use crate::storage::{ContentType, IndexSummary};

/// Default number of items committed per transaction.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// What a completed run did.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub content_type: ContentType,
    pub generation: i64,
    pub batches: BatchOutcome,
    pub index: IndexSummary,
    /// Payload entries dropped by the parser.
    pub skipped: usize,
    pub duration: Duration,
}

impl SyncReport {
    pub fn is_partial(&self) -> bool {
        self.batches.failed_count > 0
    }
}

/// Race `fut` against cancellation of the run.
///
/// A dropped write future rolls back its open transaction, so cancelling
/// here never leaves a half-written batch behind.
async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, SyncError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        output = fut => Ok(output),
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<(), SyncError> {
    if cancel.is_cancelled() {
        Err(SyncError::Cancelled)
    } else {
        Ok(())
    }
}

/// The long-lived sync pipeline of one content type.
///
/// Owns the content type's [`SyncStateMachine`]; nothing else publishes
/// into it. Runs of different content types only meet at the shared
/// [`BulkWriter`].
pub struct ContentPipeline {
    content_type: ContentType,
    source: Arc<dyn CatalogSource>,
    writer: Arc<BulkWriter>,
    state: Arc<SyncStateMachine>,
    batch_size: usize,
}

impl ContentPipeline {
    pub fn new(
        content_type: ContentType,
        source: Arc<dyn CatalogSource>,
        writer: Arc<BulkWriter>,
        has_cached_data: bool,
    ) -> Self {
        Self {
            content_type,
            source,
            writer,
            state: Arc::new(SyncStateMachine::new(content_type, has_cached_data)),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    pub fn state(&self) -> &SyncStateMachine {
        &self.state
    }

    /// Run one full sync: fetch, parse, persist, index.
    ///
    /// Phase failures end in [`SyncState::Error`] and cancellation in
    /// [`SyncState::Idle`]; both are also returned as `Err`. Rows rejected
    /// by the store end the run in [`SyncState::PartialSuccess`].
    pub async fn run(&self, cancel: CancellationToken) -> Result<SyncReport, SyncError> {
        let has_cached_data = self.state.current().has_cached_data();
        let started = Instant::now();

        self.state.transition(SyncState::Fetching {
            bytes_downloaded: 0,
            total_bytes: None,
        });
        tracing::info!(content_type = %self.content_type, "Sync started");

        match self.execute(&cancel, started).await {
            Ok(report) => Ok(report),
            Err(SyncError::Cancelled) => {
                self.state.transition(SyncState::Idle { has_cached_data });
                tracing::info!(content_type = %self.content_type, "Sync cancelled");
                Err(SyncError::Cancelled)
            }
            Err(e) => {
                let phase = e
                    .phase()
                    .or_else(|| self.state.current().phase())
                    .unwrap_or(SyncPhase::Fetching);
                let cause = e.to_string();
                self.writer.record_failure(self.content_type, &cause).await;
                self.state.transition(SyncState::Error {
                    cause,
                    phase,
                    has_cached_data,
                });

                if has_cached_data {
                    tracing::warn!(
                        content_type = %self.content_type,
                        phase = %phase,
                        error = %e,
                        "Sync failed, keeping cached catalog"
                    );
                } else {
                    tracing::error!(
                        content_type = %self.content_type,
                        phase = %phase,
                        error = %e,
                        "Sync failed with no cached catalog"
                    );
                }
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<SyncReport, SyncError> {
        let bytes = self.fetch(cancel).await?;

        ensure_not_cancelled(cancel)?;
        let ParsedCatalog {
            categories,
            items,
            skipped,
        } = self.parse(cancel, bytes).await?;

        ensure_not_cancelled(cancel)?;
        let generation = until_cancelled(cancel, self.writer.begin_generation(self.content_type))
            .await??;
        until_cancelled(
            cancel,
            self.writer
                .replace_categories(self.content_type, generation, &categories),
        )
        .await??;

        let total_items = items.len() as u64;
        self.state.transition(SyncState::Persisting {
            items_written: 0,
            total_items,
        });

        let mut batches = BatchOutcome::default();
        for chunk in items.chunks(self.batch_size) {
            ensure_not_cancelled(cancel)?;
            let batch = until_cancelled(
                cancel,
                self.writer
                    .write_batch(self.content_type, generation, chunk),
            )
            .await??;
            batches.absorb(batch);
            self.state.transition(SyncState::Persisting {
                items_written: batches.attempted,
                total_items,
            });
        }

        // A degraded run still prunes stale rows, but its published state
        // stays in Persisting until it ends in PartialSuccess.
        ensure_not_cancelled(cancel)?;
        let partial = batches.failed_count > 0;
        if !partial {
            self.state.transition(SyncState::Indexing);
        }
        let index = until_cancelled(
            cancel,
            self.writer.rebuild_index(self.content_type, generation),
        )
        .await??;

        let duration = started.elapsed();
        if partial {
            let cause = batches
                .first_failure
                .clone()
                .unwrap_or_else(|| "rows rejected by the store".to_string());
            self.state.transition(SyncState::PartialSuccess {
                success_count: batches.success_count,
                failed_count: batches.failed_count,
                cause: cause.clone(),
            });
            tracing::warn!(
                content_type = %self.content_type,
                written = batches.success_count,
                failed = batches.failed_count,
                cause = %cause,
                "Sync completed with rejected rows"
            );
        } else {
            self.state.transition(SyncState::Success {
                item_count: index.item_count.max(0) as u64,
                duration_ms: duration.as_millis() as u64,
            });
            tracing::info!(
                content_type = %self.content_type,
                items = index.item_count,
                categories = index.category_count,
                pruned = index.pruned_items,
                duration_ms = duration.as_millis() as u64,
                "Sync completed"
            );
        }

        Ok(SyncReport {
            content_type: self.content_type,
            generation,
            batches,
            index,
            skipped,
            duration,
        })
    }

    async fn fetch(&self, cancel: &CancellationToken) -> Result<Vec<u8>, SyncError> {
        let state = Arc::clone(&self.state);
        let progress = move |bytes_downloaded: u64, total_bytes: Option<u64>| {
            state.transition(SyncState::Fetching {
                bytes_downloaded,
                total_bytes,
            });
        };

        let bytes =
            until_cancelled(cancel, self.source.fetch(self.content_type, &progress)).await??;
        Ok(bytes)
    }

    async fn parse(
        &self,
        cancel: &CancellationToken,
        bytes: Vec<u8>,
    ) -> Result<ParsedCatalog, SyncError> {
        self.state.transition(SyncState::Parsing {
            items_parsed: 0,
            total_items: None,
        });

        let state = Arc::clone(&self.state);
        let parse_cancel = cancel.clone();
        let mut task = tokio::task::spawn_blocking(move || {
            let progress = |items_parsed: u64, total_items: Option<u64>| {
                if !parse_cancel.is_cancelled() {
                    state.transition(SyncState::Parsing {
                        items_parsed,
                        total_items,
                    });
                }
            };
            parse_catalog(&bytes, &progress, &parse_cancel)
        });

        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // The parser stops at its next chunk boundary. Join it so it
                // cannot publish into a later run of this content type.
                let _ = (&mut task).await;
                return Err(SyncError::Cancelled);
            }
            joined = &mut task => joined,
        };

        joined
            .map_err(|e| SyncError::Parse(format!("parser task failed: {}", e)))?
            .map_err(|e| SyncError::Parse(format!("{:#}", e)))
    }
}
