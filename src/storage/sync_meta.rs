use anyhow::Result;

use super::schema::Database;
use super::types::{ContentType, SyncMetadata};

/// Row counts after a generation has been finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSummary {
    pub item_count: i64,
    pub category_count: i64,
    pub pruned_items: u64,
    pub pruned_categories: u64,
}

impl Database {
    // ========================================================================
    // Sync Bookkeeping
    // ========================================================================

    /// Allocate the next sync generation for a content type.
    ///
    /// Returns the new generation number. Rows written by an abandoned run keep
    /// their (older) generation and are pruned by the next finalized run.
    pub async fn begin_generation(&self, content_type: ContentType) -> Result<i64> {
        let (generation,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO sync_meta (content_type, generation) VALUES (?, 1)
            ON CONFLICT(content_type) DO UPDATE SET generation = generation + 1
            RETURNING generation
        "#,
        )
        .bind(content_type.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(generation)
    }

    /// Finalize a generation: prune stale rows and recompute derived columns.
    ///
    /// All steps run in one transaction:
    /// 1. delete items and categories of older generations
    /// 2. recompute every category's `item_count` and `is_leaf`
    /// 3. record success time and item count, clear the last error
    pub async fn finalize_generation(
        &self,
        content_type: ContentType,
        generation: i64,
    ) -> Result<IndexSummary> {
        let ct = content_type.as_str();
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let pruned_items = sqlx::query("DELETE FROM items WHERE content_type = ? AND generation < ?")
            .bind(ct)
            .bind(generation)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let pruned_categories =
            sqlx::query("DELETE FROM categories WHERE content_type = ? AND generation < ?")
                .bind(ct)
                .bind(generation)
                .execute(&mut *tx)
                .await?
                .rows_affected();

        sqlx::query(
            r#"
            UPDATE categories SET
                item_count = (
                    SELECT COUNT(*) FROM items i
                    WHERE i.content_type = categories.content_type
                      AND i.category_id = categories.id
                ),
                is_leaf = NOT EXISTS (
                    SELECT 1 FROM categories c
                    WHERE c.content_type = categories.content_type
                      AND c.parent_id = categories.id
                )
            WHERE content_type = ?
        "#,
        )
        .bind(ct)
        .execute(&mut *tx)
        .await?;

        let (item_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM items WHERE content_type = ?")
                .bind(ct)
                .fetch_one(&mut *tx)
                .await?;
        let (category_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM categories WHERE content_type = ?")
                .bind(ct)
                .fetch_one(&mut *tx)
                .await?;

        sqlx::query(
            r#"
            INSERT INTO sync_meta (content_type, generation, last_success_at, item_count, last_error)
            VALUES (?, ?, ?, ?, NULL)
            ON CONFLICT(content_type) DO UPDATE SET
                last_success_at = excluded.last_success_at,
                item_count = excluded.item_count,
                last_error = NULL
        "#,
        )
        .bind(ct)
        .bind(generation)
        .bind(now)
        .bind(item_count)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(IndexSummary {
            item_count,
            category_count,
            pruned_items,
            pruned_categories,
        })
    }

    /// Remember the message of a failed run. Success clears it.
    pub async fn record_sync_error(&self, content_type: ContentType, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_meta (content_type, last_error) VALUES (?, ?)
            ON CONFLICT(content_type) DO UPDATE SET last_error = excluded.last_error
        "#,
        )
        .bind(content_type.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Bookkeeping for a content type; defaults when it never synced.
    pub async fn sync_metadata(&self, content_type: ContentType) -> Result<SyncMetadata> {
        let row: Option<(i64, Option<i64>, i64, Option<String>)> = sqlx::query_as(
            "SELECT generation, last_success_at, item_count, last_error FROM sync_meta WHERE content_type = ?",
        )
        .bind(content_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(
                |(generation, last_success_at, item_count, last_error)| SyncMetadata {
                    generation,
                    last_success_at,
                    item_count,
                    last_error,
                },
            )
            .unwrap_or_default())
    }
}
