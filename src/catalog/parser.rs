use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::ProgressFn;
use crate::storage::{CatalogItem, Category};
use crate::util::clean_label;

/// Items converted between two progress reports.
const PROGRESS_CHUNK: usize = 1000;

/// A decoded catalog payload.
#[derive(Debug, Clone, Default)]
pub struct ParsedCatalog {
    pub categories: Vec<Category>,
    pub items: Vec<CatalogItem>,
    /// Entries dropped because a required field was missing or unusable.
    pub skipped: usize,
}

#[derive(Debug, Deserialize)]
struct RawCatalog {
    #[serde(default)]
    categories: Vec<serde_json::Value>,
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

/// Providers send ids and numbers either as JSON numbers or as strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawScalar {
    Int(i64),
    Float(f64),
    Str(String),
}

impl RawScalar {
    fn as_id(&self) -> Option<String> {
        let id = match self {
            RawScalar::Int(n) => n.to_string(),
            RawScalar::Float(f) if f.fract() == 0.0 => (*f as i64).to_string(),
            RawScalar::Float(f) => f.to_string(),
            RawScalar::Str(s) => s.trim().to_string(),
        };
        (!id.is_empty()).then_some(id)
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            RawScalar::Int(n) => Some(*n),
            RawScalar::Float(f) if f.is_finite() => Some(*f as i64),
            RawScalar::Float(_) => None,
            RawScalar::Str(s) => s.trim().parse().ok(),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            RawScalar::Int(n) => Some(*n as f64),
            RawScalar::Float(f) => Some(*f),
            RawScalar::Str(s) => s.trim().parse().ok(),
        }
        .filter(|f: &f64| f.is_finite())
    }
}

#[derive(Debug, Deserialize)]
struct RawCategory {
    category_id: Option<RawScalar>,
    #[serde(default)]
    category_name: Option<String>,
    #[serde(default)]
    parent_id: Option<RawScalar>,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    stream_id: Option<RawScalar>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    category_id: Option<RawScalar>,
    #[serde(default)]
    stream_icon: Option<String>,
    #[serde(default)]
    added: Option<RawScalar>,
    #[serde(default)]
    rating: Option<RawScalar>,
    #[serde(default)]
    num: Option<RawScalar>,
}

fn convert_category(value: serde_json::Value) -> Option<Category> {
    let raw: RawCategory = serde_json::from_value(value).ok()?;
    let id = raw.category_id.as_ref().and_then(RawScalar::as_id)?;
    let name = clean_label(raw.category_name.as_deref().unwrap_or_default());
    if name.is_empty() {
        return None;
    }
    // "0" and "" both mean top level.
    let parent_id = raw
        .parent_id
        .as_ref()
        .and_then(RawScalar::as_id)
        .filter(|p| p != "0" && *p != id);

    Some(Category {
        id,
        name,
        parent_id,
        item_count: 0,
        is_leaf: true,
    })
}

/// Convert one raw item. Name and stream id are passed through even when
/// the store will reject them, so the rejection is counted per row.
fn convert_item(value: serde_json::Value) -> Option<CatalogItem> {
    let raw: RawItem = serde_json::from_value(value).ok()?;
    let stream_id = raw.stream_id.as_ref().and_then(RawScalar::as_i64)?;

    Some(CatalogItem {
        stream_id,
        name: clean_label(raw.name.as_deref().unwrap_or_default()),
        category_id: raw.category_id.as_ref().and_then(RawScalar::as_id),
        icon_url: raw
            .stream_icon
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        added_at: raw.added.as_ref().and_then(RawScalar::as_i64),
        rating: raw.rating.as_ref().and_then(RawScalar::as_f64),
        position: raw.num.as_ref().and_then(RawScalar::as_i64),
    })
}

/// Decode a catalog payload.
///
/// Fails only when the document itself is not a catalog. Individual
/// categories or items that cannot be read are skipped and counted.
/// `progress` receives `(items_converted, Some(total_items))`. Once `cancel`
/// fires, no further progress is reported and the parse stops at the next
/// chunk boundary.
pub fn parse_catalog(
    bytes: &[u8],
    progress: &ProgressFn<'_>,
    cancel: &CancellationToken,
) -> Result<ParsedCatalog> {
    progress(0, None);
    let raw: RawCatalog =
        serde_json::from_slice(bytes).context("Catalog payload is not a valid document")?;

    let mut skipped = 0;
    let mut categories = Vec::with_capacity(raw.categories.len());
    for value in raw.categories {
        match convert_category(value) {
            Some(category) => categories.push(category),
            None => skipped += 1,
        }
    }

    if cancel.is_cancelled() {
        bail!("Catalog parse cancelled");
    }
    let total = raw.items.len() as u64;
    let mut items = Vec::with_capacity(raw.items.len());
    progress(0, Some(total));

    for (index, value) in raw.items.into_iter().enumerate() {
        match convert_item(value) {
            Some(item) => items.push(item),
            None => skipped += 1,
        }
        let done = index + 1;
        if done % PROGRESS_CHUNK == 0 || done as u64 == total {
            if cancel.is_cancelled() {
                bail!("Catalog parse cancelled after {} items", done);
            }
            progress(done as u64, Some(total));
        }
    }

    if skipped > 0 {
        tracing::warn!(skipped, "Unreadable catalog entries skipped");
    }

    Ok(ParsedCatalog {
        categories,
        items,
        skipped,
    })
}
