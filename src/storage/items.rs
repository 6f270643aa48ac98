use anyhow::Result;

use super::schema::Database;
use super::types::{CatalogItem, ContentType, ItemRow, RowOutcome};

/// Maximum number of items to return from any single listing (OOM protection)
const MAX_ITEMS: i64 = 5000;

impl Database {
    // ========================================================================
    // Item Writes
    // ========================================================================

    /// Insert or update a batch of items in one transaction, isolating rows.
    ///
    /// Each row runs inside its own SAVEPOINT. A row that violates a constraint
    /// is rolled back on its own and reported as `RowOutcome::Rejected`; the
    /// rest of the batch continues. Any other failure (connection loss, disk
    /// full, failed commit) aborts the whole transaction and is returned as
    /// `Err`, in which case no row of the batch is committed.
    ///
    /// Outcomes are returned in input order.
    pub async fn insert_batch(
        &self,
        content_type: ContentType,
        generation: i64,
        items: &[CatalogItem],
    ) -> Result<Vec<RowOutcome>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let mut outcomes = Vec::with_capacity(items.len());
        let mut tx = self.pool.begin().await?;

        for item in items {
            sqlx::query("SAVEPOINT catalog_row").execute(&mut *tx).await?;

            let result = sqlx::query(
                r#"
                INSERT INTO items
                    (content_type, stream_id, name, category_id, icon_url,
                     added_at, rating, position, generation)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(content_type, stream_id) DO UPDATE SET
                    name = excluded.name,
                    category_id = excluded.category_id,
                    icon_url = excluded.icon_url,
                    added_at = excluded.added_at,
                    rating = excluded.rating,
                    position = excluded.position,
                    generation = excluded.generation
            "#,
            )
            .bind(content_type.as_str())
            .bind(item.stream_id)
            .bind(&item.name)
            .bind(&item.category_id)
            .bind(&item.icon_url)
            .bind(item.added_at)
            .bind(item.rating)
            .bind(item.position)
            .bind(generation)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(_) => {
                    sqlx::query("RELEASE SAVEPOINT catalog_row")
                        .execute(&mut *tx)
                        .await?;
                    outcomes.push(RowOutcome::Written);
                }
                Err(sqlx::Error::Database(db_err)) => {
                    // Constraint-level failure: undo this row only
                    sqlx::query("ROLLBACK TO SAVEPOINT catalog_row")
                        .execute(&mut *tx)
                        .await?;
                    sqlx::query("RELEASE SAVEPOINT catalog_row")
                        .execute(&mut *tx)
                        .await?;
                    tracing::debug!(
                        content_type = %content_type,
                        stream_id = item.stream_id,
                        error = %db_err,
                        "Catalog row rejected"
                    );
                    outcomes.push(RowOutcome::Rejected(db_err.message().to_string()));
                }
                Err(e) => return Err(e.into()),
            }
        }

        tx.commit().await?;
        Ok(outcomes)
    }

    // ========================================================================
    // Item Queries
    // ========================================================================

    /// List the items of one category in provider order, then by name.
    /// Hard cap at MAX_ITEMS to prevent unbounded allocation.
    pub async fn list_items(
        &self,
        content_type: ContentType,
        category_id: &str,
        limit: Option<i64>,
    ) -> Result<Vec<CatalogItem>> {
        let limit = limit.unwrap_or(500).clamp(1, MAX_ITEMS);

        let rows = sqlx::query_as::<_, ItemRow>(
            r#"
            SELECT stream_id, name, category_id, icon_url, added_at, rating, position
            FROM items
            WHERE content_type = ? AND category_id = ?
            ORDER BY position IS NULL, position, name
            LIMIT ?
        "#,
        )
        .bind(content_type.as_str())
        .bind(category_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ItemRow::into_item).collect())
    }

    /// Total number of stored items of a content type.
    pub async fn item_count(&self, content_type: ContentType) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items WHERE content_type = ?")
            .bind(content_type.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
