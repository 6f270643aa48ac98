//! Remote catalog access: the download seam and the payload parser.

mod client;
mod parser;

use async_trait::async_trait;

use crate::storage::ContentType;

pub use client::{FetchError, HttpCatalogClient};
pub use parser::{parse_catalog, ParsedCatalog};

/// Progress callback of a download or parse: `(done, total)`, where the
/// total is `None` while unknown.
pub type ProgressFn<'a> = dyn Fn(u64, Option<u64>) + Send + Sync + 'a;

/// Where catalog payloads come from.
///
/// Implementations return the raw payload of one content type; parsing is
/// done by the pipeline so every source shares one format.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch(
        &self,
        content_type: ContentType,
        progress: &ProgressFn<'_>,
    ) -> Result<Vec<u8>, FetchError>;
}
