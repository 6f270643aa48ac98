use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::{is_lock_message, DatabaseError};

// ============================================================================
// Database
// ============================================================================

/// Handle to the local catalog store.
///
/// Cloning is cheap (the pool is reference counted). Readers use any clone
/// directly; every write goes through `sync::BulkWriter`, which owns the one
/// clone used for writing.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process holds the
    /// database lock, `DatabaseError::Migration` if the schema could not be
    /// created, and `DatabaseError::Other` for anything else.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let in_memory = path == ":memory:";
        let url = format!("sqlite:{}?mode=rwc", path);

        // Pre-create the file user-only so there is no window with umask permissions
        #[cfg(unix)]
        if !in_memory {
            use std::os::unix::fs::OpenOptionsExt;
            let db_path = std::path::Path::new(path);
            if !db_path.exists() && db_path.parent().map_or(false, |p| p.exists()) {
                // If creation fails, SQLite reports the real error at connect time.
                let _ = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path);
            }
        }

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks before SQLITE_BUSY.
        let mut options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");
        if !in_memory {
            // WAL lets navigation reads proceed while a pipeline holds the write transaction.
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            if is_lock_message(&e.to_string()) {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Close every pooled connection. Subsequent queries fail with `PoolClosed`.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Categories are keyed per content type: providers reuse ids across types.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS categories (
                content_type TEXT NOT NULL,
                id TEXT NOT NULL,
                name TEXT NOT NULL,
                parent_id TEXT,
                item_count INTEGER NOT NULL DEFAULT 0,
                is_leaf INTEGER NOT NULL DEFAULT 1,
                generation INTEGER NOT NULL,
                PRIMARY KEY (content_type, id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Row-level CHECKs are what a batch isolates and counts as failed rows.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                content_type TEXT NOT NULL,
                stream_id INTEGER NOT NULL CHECK (stream_id > 0),
                name TEXT NOT NULL CHECK (length(trim(name)) > 0),
                category_id TEXT,
                icon_url TEXT,
                added_at INTEGER,
                rating REAL,
                position INTEGER,
                generation INTEGER NOT NULL,
                PRIMARY KEY (content_type, stream_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // count_by_category and list_items both filter on (content_type, category_id)
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_items_category ON items(content_type, category_id)",
        )
        .execute(&mut *tx)
        .await?;

        // Stale-generation pruning scans by generation
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_items_generation ON items(content_type, generation)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_meta (
                content_type TEXT PRIMARY KEY,
                generation INTEGER NOT NULL DEFAULT 0,
                last_success_at INTEGER,
                item_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Key-value store for user settings. Keys use dotted convention: filter.live, ...
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_preferences (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory_creates_schema() {
        let db = Database::open(":memory:").await.unwrap();
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&db.pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["categories", "items", "sync_meta", "user_preferences"]
        );
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let db = Database::open(":memory:").await.unwrap();
        db.migrate().await.unwrap();
        db.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_queries() {
        let db = Database::open(":memory:").await.unwrap();
        db.close().await;
        let result = sqlx::query("SELECT 1").execute(&db.pool).await;
        assert!(matches!(result, Err(sqlx::Error::PoolClosed)));
    }

    #[tokio::test]
    async fn test_open_file_database() {
        let dir = std::env::temp_dir().join("catalog_sync_schema_test_file");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("catalog.db");
        let _ = std::fs::remove_file(&path);

        let db = Database::open(path.to_str().unwrap()).await.unwrap();
        db.close().await;
        assert!(path.exists());

        std::fs::remove_dir_all(&dir).ok();
    }
}
