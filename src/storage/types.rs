use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("Another instance of catalog-sync appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Classify a sqlx error, mapping SQLite lock conditions to `InstanceLocked`.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all surface
/// through these messages.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Content Types
// ============================================================================

/// Kind of catalog content. Each kind syncs through its own pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Live,
    Movies,
    Series,
}

impl ContentType {
    pub const ALL: [ContentType; 3] = [ContentType::Live, ContentType::Movies, ContentType::Series];

    /// Stable string form used for storage keys, URLs and the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Live => "live",
            ContentType::Movies => "movies",
            ContentType::Series => "series",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "live" | "tv" => Ok(ContentType::Live),
            "movies" | "movie" | "vod" => Ok(ContentType::Movies),
            "series" => Ok(ContentType::Series),
            other => Err(format!(
                "unknown content type '{}' (expected live, movies or series)",
                other
            )),
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A catalog category as read from the store.
///
/// Immutable for a given sync generation: a new generation rewrites the row
/// rather than mutating a loaded value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    /// Number of items filed under this category at the last index rebuild.
    pub item_count: u64,
    /// False when other categories name this one as their parent.
    pub is_leaf: bool,
}

/// A single playable catalog entry (channel, movie or series).
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogItem {
    pub stream_id: i64,
    pub name: String,
    pub category_id: Option<String>,
    pub icon_url: Option<String>,
    /// Unix timestamp the provider reports the entry was added.
    pub added_at: Option<i64>,
    pub rating: Option<f64>,
    /// Provider-assigned ordering within the catalog.
    pub position: Option<i64>,
}

/// Outcome of writing one row inside a batch transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Written,
    /// The row violated a constraint and was rolled back on its own.
    Rejected(String),
}

/// Per-content-type bookkeeping kept alongside the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncMetadata {
    /// Generation of the most recent run that started persisting.
    pub generation: i64,
    /// Unix timestamp of the last run that completed indexing.
    pub last_success_at: Option<i64>,
    /// Items present after the last completed run.
    pub item_count: i64,
    /// Message of the last phase failure, cleared on success.
    pub last_error: Option<String>,
}

impl SyncMetadata {
    /// Whether a previous run left a usable catalog behind.
    pub fn has_cached_data(&self) -> bool {
        self.last_success_at.is_some()
    }
}

/// Internal row type for category queries.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CategoryRow {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub item_count: i64,
    pub is_leaf: bool,
}

impl CategoryRow {
    pub(crate) fn into_category(self) -> Category {
        Category {
            id: self.id,
            name: self.name,
            parent_id: self.parent_id,
            item_count: u64::try_from(self.item_count).unwrap_or(0),
            is_leaf: self.is_leaf,
        }
    }
}

/// Internal row type for item queries.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ItemRow {
    pub stream_id: i64,
    pub name: String,
    pub category_id: Option<String>,
    pub icon_url: Option<String>,
    pub added_at: Option<i64>,
    pub rating: Option<f64>,
    pub position: Option<i64>,
}

impl ItemRow {
    pub(crate) fn into_item(self) -> CatalogItem {
        CatalogItem {
            stream_id: self.stream_id,
            name: self.name,
            category_id: self.category_id,
            icon_url: self.icon_url,
            added_at: self.added_at,
            rating: self.rating,
            position: self.position,
        }
    }
}
