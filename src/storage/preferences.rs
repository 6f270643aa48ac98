use anyhow::{Context, Result};

use super::schema::Database;
use super::types::ContentType;
use crate::navigation::ContentFilterSettings;

impl Database {
    // ========================================================================
    // User Preferences Operations
    // ========================================================================

    /// Get a single preference value by key.
    pub async fn get_preference(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM user_preferences WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(value,)| value))
    }

    /// Set a preference value (UPSERT).
    pub async fn set_preference(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_preferences (key, value, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Remove a preference. Returns whether a row existed.
    pub async fn delete_preference(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM user_preferences WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Filter Settings
    // ========================================================================

    fn filter_key(content_type: ContentType) -> String {
        format!("filter.{}", content_type)
    }

    /// Stored filter settings of a content type, if the user changed any.
    ///
    /// A value that no longer deserializes (older format, manual edit) is
    /// logged and treated as absent so the configured defaults apply.
    pub async fn load_filter_settings(
        &self,
        content_type: ContentType,
    ) -> Result<Option<ContentFilterSettings>> {
        let Some(raw) = self.get_preference(&Self::filter_key(content_type)).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<ContentFilterSettings>(&raw) {
            Ok(settings) => Ok(Some(settings)),
            Err(e) => {
                tracing::warn!(
                    content_type = %content_type,
                    error = %e,
                    "Stored filter settings are unreadable, falling back to defaults"
                );
                Ok(None)
            }
        }
    }

    /// Persist the filter settings of a content type.
    pub async fn save_filter_settings(
        &self,
        content_type: ContentType,
        settings: &ContentFilterSettings,
    ) -> Result<()> {
        let raw = serde_json::to_string(settings).context("Failed to serialize filter settings")?;
        self.set_preference(&Self::filter_key(content_type), &raw).await
    }

    /// Drop stored filter settings so the configured defaults apply again.
    pub async fn clear_filter_settings(&self, content_type: ContentType) -> Result<bool> {
        self.delete_preference(&Self::filter_key(content_type)).await
    }
}
