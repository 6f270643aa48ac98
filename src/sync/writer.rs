//! The single write path into the catalog store.

use tokio::sync::Mutex;

use crate::error::{SyncError, WriteError};
use crate::navigation::ContentFilterSettings;
use crate::storage::{CatalogItem, Category, ContentType, Database, IndexSummary, RowOutcome};

/// Result of one committed batch.
///
/// `success_count + failed_count == attempted` always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub attempted: u64,
    pub success_count: u64,
    pub failed_count: u64,
    /// Reason of the first rejected row, if any.
    pub first_failure: Option<String>,
}

impl BatchOutcome {
    fn from_rows(outcomes: Vec<RowOutcome>) -> Self {
        let mut batch = BatchOutcome {
            attempted: outcomes.len() as u64,
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                RowOutcome::Written => batch.success_count += 1,
                RowOutcome::Rejected(reason) => {
                    batch.failed_count += 1;
                    batch.first_failure.get_or_insert(reason);
                }
            }
        }
        batch
    }

    /// Fold another batch into a running total.
    pub fn absorb(&mut self, other: BatchOutcome) {
        self.attempted += other.attempted;
        self.success_count += other.success_count;
        self.failed_count += other.failed_count;
        if self.first_failure.is_none() {
            self.first_failure = other.first_failure;
        }
    }
}

/// Serializes every write of every content-type pipeline.
///
/// Holds the store behind one `tokio::sync::Mutex`, whose waiters are
/// served in FIFO order, so a pipeline waiting for the lock is never
/// starved by another. Reads do not go through here.
pub struct BulkWriter {
    db: Mutex<Database>,
}

impl BulkWriter {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    /// Allocate the generation a new run writes under.
    pub async fn begin_generation(&self, content_type: ContentType) -> Result<i64, WriteError> {
        let db = self.db.lock().await;
        Ok(db.begin_generation(content_type).await?)
    }

    /// Write the category set of a generation in one transaction.
    pub async fn replace_categories(
        &self,
        content_type: ContentType,
        generation: i64,
        categories: &[Category],
    ) -> Result<usize, WriteError> {
        let db = self.db.lock().await;
        Ok(db
            .upsert_categories(content_type, generation, categories)
            .await?)
    }

    /// Write one batch of items in one transaction.
    ///
    /// Rows violating a constraint are rolled back individually and counted.
    /// An `Err` means the transaction did not commit and no row of the batch
    /// is stored.
    pub async fn write_batch(
        &self,
        content_type: ContentType,
        generation: i64,
        items: &[CatalogItem],
    ) -> Result<BatchOutcome, WriteError> {
        let db = self.db.lock().await;
        let outcomes = db.insert_batch(content_type, generation, items).await?;
        let batch = BatchOutcome::from_rows(outcomes);

        if batch.failed_count > 0 {
            tracing::debug!(
                content_type = %content_type,
                attempted = batch.attempted,
                failed = batch.failed_count,
                "Batch committed with rejected rows"
            );
        }
        Ok(batch)
    }

    /// Prune older generations and recompute counts, holding the lock for
    /// the whole rebuild. Call only after every batch of the run committed.
    pub async fn rebuild_index(
        &self,
        content_type: ContentType,
        generation: i64,
    ) -> Result<IndexSummary, SyncError> {
        let db = self.db.lock().await;
        db.finalize_generation(content_type, generation)
            .await
            .map_err(|e| SyncError::Index(e.to_string()))
    }

    /// Remember why a run failed. Best effort: a failure here is only logged.
    pub async fn record_failure(&self, content_type: ContentType, message: &str) {
        let db = self.db.lock().await;
        if let Err(e) = db.record_sync_error(content_type, message).await {
            tracing::warn!(content_type = %content_type, error = %e, "Failed to record sync error");
        }
    }

    pub async fn save_filter_settings(
        &self,
        content_type: ContentType,
        settings: &ContentFilterSettings,
    ) -> Result<(), WriteError> {
        let db = self.db.lock().await;
        Ok(db.save_filter_settings(content_type, settings).await?)
    }

    pub async fn clear_filter_settings(&self, content_type: ContentType) -> Result<bool, WriteError> {
        let db = self.db.lock().await;
        Ok(db.clear_filter_settings(content_type).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    async fn writer() -> (BulkWriter, Database) {
        let db = Database::open(":memory:").await.unwrap();
        (BulkWriter::new(db.clone()), db)
    }

    fn item(stream_id: i64, name: &str) -> CatalogItem {
        CatalogItem {
            stream_id,
            name: name.to_string(),
            category_id: Some("1".to_string()),
            icon_url: None,
            added_at: None,
            rating: None,
            position: None,
        }
    }

    #[tokio::test]
    async fn test_write_batch_counts_rejected_rows() {
        let (writer, db) = writer().await;
        let batch = writer
            .write_batch(
                ContentType::Live,
                1,
                &[item(1, "One"), item(0, "Zero"), item(3, ""), item(4, "Four")],
            )
            .await
            .unwrap();

        assert_eq!(batch.attempted, 4);
        assert_eq!(batch.success_count, 2);
        assert_eq!(batch.failed_count, 2);
        assert!(batch.first_failure.is_some());
        assert_eq!(db.item_count(ContentType::Live).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_fatal_failure_is_an_error() {
        let (writer, db) = writer().await;
        db.close().await;

        let result = writer
            .write_batch(ContentType::Live, 1, &[item(1, "One")])
            .await;
        assert!(matches!(result, Err(WriteError::Transaction(_))));
    }

    #[tokio::test]
    async fn test_concurrent_pipelines_serialize_writes() {
        let (writer, db) = writer().await;
        let writer = Arc::new(writer);

        let mut handles = Vec::new();
        for ct in ContentType::ALL {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                let generation = writer.begin_generation(ct).await.unwrap();
                for chunk in 0..5i64 {
                    let items: Vec<CatalogItem> = (1..=100)
                        .map(|i| item(chunk * 100 + i, &format!("{} {}", ct, i)))
                        .collect();
                    let batch = writer.write_batch(ct, generation, &items).await.unwrap();
                    assert_eq!(batch.success_count, 100);
                }
                writer.rebuild_index(ct, generation).await.unwrap()
            }));
        }

        for handle in handles {
            let summary = handle.await.unwrap();
            assert_eq!(summary.item_count, 500);
        }
        for ct in ContentType::ALL {
            assert_eq!(db.item_count(ct).await.unwrap(), 500);
        }
    }

    #[tokio::test]
    async fn test_rebuild_index_failure_maps_to_index_error() {
        let (writer, db) = writer().await;
        db.close().await;
        let result = writer.rebuild_index(ContentType::Movies, 1).await;
        assert!(matches!(result, Err(SyncError::Index(_))));
    }

    #[tokio::test]
    async fn test_record_failure_is_visible_in_metadata() {
        let (writer, db) = writer().await;
        writer.record_failure(ContentType::Series, "HTTP error: status 502").await;
        let meta = db.sync_metadata(ContentType::Series).await.unwrap();
        assert_eq!(meta.last_error.as_deref(), Some("HTTP error: status 502"));
    }

    #[test]
    fn test_absorb_keeps_first_failure() {
        let mut total = BatchOutcome::default();
        total.absorb(BatchOutcome {
            attempted: 2,
            success_count: 1,
            failed_count: 1,
            first_failure: Some("first".into()),
        });
        total.absorb(BatchOutcome {
            attempted: 3,
            success_count: 2,
            failed_count: 1,
            first_failure: Some("second".into()),
        });
        assert_eq!(total.attempted, 5);
        assert_eq!(total.first_failure.as_deref(), Some("first"));
    }

    proptest! {
        #[test]
        fn prop_batch_counts_add_up(rows in prop::collection::vec(any::<bool>(), 0..64)) {
            let outcomes: Vec<RowOutcome> = rows
                .iter()
                .map(|ok| if *ok { RowOutcome::Written } else { RowOutcome::Rejected("check".into()) })
                .collect();
            let batch = BatchOutcome::from_rows(outcomes);
            prop_assert_eq!(batch.success_count + batch.failed_count, batch.attempted);
            prop_assert_eq!(batch.attempted, rows.len() as u64);
            prop_assert_eq!(batch.first_failure.is_some(), batch.failed_count > 0);
        }
    }
}
