use anyhow::Result;
use sqlx::QueryBuilder;
use std::collections::HashMap;

use super::schema::Database;
use super::types::{Category, CategoryRow, ContentType};

impl Database {
    // ========================================================================
    // Category Operations
    // ========================================================================

    /// Upsert the category set of a sync generation.
    ///
    /// Runs in one transaction: either the whole set is written or nothing is.
    /// Categories of older generations stay until `finalize_generation` prunes
    /// them, so readers never see an empty category list mid-sync.
    /// Batch size of 100 keeps us under SQLite's parameter limit (6 columns * 100 = 600).
    pub async fn upsert_categories(
        &self,
        content_type: ContentType,
        generation: i64,
        categories: &[Category],
    ) -> Result<usize> {
        if categories.is_empty() {
            return Ok(0);
        }

        const BATCH_SIZE: usize = 100;
        let mut tx = self.pool.begin().await?;

        for chunk in categories.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO categories (content_type, id, name, parent_id, is_leaf, generation) ",
            );
            builder.push_values(chunk, |mut b, category| {
                b.push_bind(content_type.as_str())
                    .push_bind(&category.id)
                    .push_bind(&category.name)
                    .push_bind(&category.parent_id)
                    .push_bind(category.is_leaf)
                    .push_bind(generation);
            });
            builder.push(
                " ON CONFLICT(content_type, id) DO UPDATE SET \
                 name = excluded.name, parent_id = excluded.parent_id, \
                 generation = excluded.generation",
            );
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(categories.len())
    }

    /// List all categories of a content type, ordered by name.
    pub async fn list_categories(&self, content_type: ContentType) -> Result<Vec<Category>> {
        let rows = sqlx::query_as::<_, CategoryRow>(
            r#"
            SELECT id, name, parent_id, item_count, is_leaf
            FROM categories
            WHERE content_type = ?
            ORDER BY name, id
        "#,
        )
        .bind(content_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(CategoryRow::into_category).collect())
    }

    /// Live item count of a single category, straight from the items table.
    pub async fn count_by_category(
        &self,
        content_type: ContentType,
        category_id: &str,
    ) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM items WHERE content_type = ? AND category_id = ?",
        )
        .bind(content_type.as_str())
        .bind(category_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Live item counts of every category of a content type in one query.
    ///
    /// Categories without items are absent from the map.
    pub async fn category_item_counts(
        &self,
        content_type: ContentType,
    ) -> Result<HashMap<String, u64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT category_id, COUNT(*)
            FROM items
            WHERE content_type = ? AND category_id IS NOT NULL
            GROUP BY category_id
        "#,
        )
        .bind(content_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, count)| (id, u64::try_from(count).unwrap_or(0)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{CatalogItem, Category, ContentType, Database};

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn category(id: &str, name: &str) -> Category {
        Category {
            id: id.to_string(),
            name: name.to_string(),
            parent_id: None,
            item_count: 0,
            is_leaf: true,
        }
    }

    fn item(stream_id: i64, category_id: &str) -> CatalogItem {
        CatalogItem {
            stream_id,
            name: format!("Channel {}", stream_id),
            category_id: Some(category_id.to_string()),
            icon_url: None,
            added_at: None,
            rating: None,
            position: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_list_sorted_by_name() {
        let db = test_db().await;
        db.upsert_categories(
            ContentType::Live,
            1,
            &[category("2", "FR | News"), category("1", "EN | Action")],
        )
        .await
        .unwrap();

        let cats = db.list_categories(ContentType::Live).await.unwrap();
        let names: Vec<&str> = cats.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["EN | Action", "FR | News"]);
    }

    #[tokio::test]
    async fn test_categories_are_scoped_by_content_type() {
        let db = test_db().await;
        db.upsert_categories(ContentType::Live, 1, &[category("1", "EN | News")])
            .await
            .unwrap();
        db.upsert_categories(ContentType::Movies, 1, &[category("1", "EN | Drama")])
            .await
            .unwrap();

        let live = db.list_categories(ContentType::Live).await.unwrap();
        let movies = db.list_categories(ContentType::Movies).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].name, "EN | News");
        assert_eq!(movies[0].name, "EN | Drama");
    }

    #[tokio::test]
    async fn test_upsert_renames_existing_category() {
        let db = test_db().await;
        db.upsert_categories(ContentType::Live, 1, &[category("1", "Old")])
            .await
            .unwrap();
        db.upsert_categories(ContentType::Live, 2, &[category("1", "New")])
            .await
            .unwrap();

        let cats = db.list_categories(ContentType::Live).await.unwrap();
        assert_eq!(cats.len(), 1);
        assert_eq!(cats[0].name, "New");
    }

    #[tokio::test]
    async fn test_upsert_many_categories_crosses_chunk_boundary() {
        let db = test_db().await;
        let cats: Vec<Category> = (0..250)
            .map(|i| category(&i.to_string(), &format!("G{} | C{}", i % 7, i)))
            .collect();
        let written = db.upsert_categories(ContentType::Series, 1, &cats).await.unwrap();
        assert_eq!(written, 250);
        assert_eq!(db.list_categories(ContentType::Series).await.unwrap().len(), 250);
    }

    #[tokio::test]
    async fn test_count_by_category() {
        let db = test_db().await;
        db.insert_batch(ContentType::Live, 1, &[item(1, "10"), item(2, "10"), item(3, "11")])
            .await
            .unwrap();

        assert_eq!(db.count_by_category(ContentType::Live, "10").await.unwrap(), 2);
        assert_eq!(db.count_by_category(ContentType::Live, "11").await.unwrap(), 1);
        assert_eq!(db.count_by_category(ContentType::Live, "12").await.unwrap(), 0);
        assert_eq!(db.count_by_category(ContentType::Movies, "10").await.unwrap(), 0);

        let counts = db.category_item_counts(ContentType::Live).await.unwrap();
        assert_eq!(counts.get("10"), Some(&2));
        assert_eq!(counts.get("11"), Some(&1));
        assert_eq!(counts.get("12"), None);
    }
}
