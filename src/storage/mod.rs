mod categories;
mod items;
mod preferences;
mod schema;
mod sync_meta;
mod types;

pub use schema::Database;
pub use sync_meta::IndexSummary;
pub use types::{
    CatalogItem, Category, ContentType, DatabaseError, RowOutcome, SyncMetadata,
};
