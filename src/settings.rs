//! Filter settings that merge config.toml defaults with DB overrides.
//!
//! Config values serve as defaults; settings the user changed at runtime are
//! stored in the `user_preferences` table and override them. Writes always
//! go to the DB, never to the config file.
use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;

use crate::error::WriteError;
use crate::navigation::ContentFilterSettings;
use crate::storage::{ContentType, Database};
use crate::sync::BulkWriter;

// ============================================================================
// FilterSettingsStore
// ============================================================================

/// Effective filter settings of every content type.
///
/// Reads are served from memory. Writes go through the [`BulkWriter`] so
/// they queue behind running syncs instead of contending with them.
pub struct FilterSettingsStore {
    defaults: HashMap<ContentType, ContentFilterSettings>,
    current: RwLock<HashMap<ContentType, ContentFilterSettings>>,
}

impl FilterSettingsStore {
    /// Load stored overrides on top of `defaults`.
    ///
    /// Content types missing from `defaults` use `ContentFilterSettings::default()`.
    pub async fn load(
        defaults: HashMap<ContentType, ContentFilterSettings>,
        db: &Database,
    ) -> Result<Self> {
        let mut current = HashMap::new();
        for content_type in ContentType::ALL {
            let effective = match db.load_filter_settings(content_type).await? {
                Some(stored) => stored,
                None => defaults.get(&content_type).cloned().unwrap_or_default(),
            };
            current.insert(content_type, effective);
        }

        Ok(Self {
            defaults,
            current: RwLock::new(current),
        })
    }

    pub fn get(&self, content_type: ContentType) -> ContentFilterSettings {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&content_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Persist new settings and make them effective.
    pub async fn set(
        &self,
        writer: &BulkWriter,
        content_type: ContentType,
        settings: ContentFilterSettings,
    ) -> Result<(), WriteError> {
        writer.save_filter_settings(content_type, &settings).await?;
        self.current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(content_type, settings);
        Ok(())
    }

    /// Drop stored settings so the configured defaults apply again.
    pub async fn reset(
        &self,
        writer: &BulkWriter,
        content_type: ContentType,
    ) -> Result<ContentFilterSettings, WriteError> {
        writer.clear_filter_settings(content_type).await?;
        let defaults = self.defaults.get(&content_type).cloned().unwrap_or_default();
        self.current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(content_type, defaults.clone());
        Ok(defaults)
    }
}

// ============================================================================
// Tests
// ============================================================================
