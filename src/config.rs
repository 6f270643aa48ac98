//! Configuration file parser for ~/.config/catalog-sync/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as warnings, since they are
//! usually typos.
use serde::{Deserialize, Deserializer};
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::navigation::ContentFilterSettings;
use crate::storage::ContentType;

/// Env var that overrides `api_token` from the file.
pub const API_TOKEN_ENV: &str = "CATALOG_API_TOKEN";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// `api_token` is masked in `Debug` output.
#[derive(Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the catalog provider; content types are served below it.
    pub catalog_url: Option<String>,

    /// Bearer token for the provider. `CATALOG_API_TOKEN` takes precedence.
    #[serde(deserialize_with = "deserialize_secret")]
    pub api_token: Option<SecretString>,

    /// Items committed per write transaction.
    pub batch_size: usize,

    /// Quiet period after user interaction before queued diffs are delivered.
    pub idle_timeout_ms: u64,

    /// Minimum age of the cache before a non-forced sync runs. 0 = always sync.
    pub refresh_interval_minutes: u64,

    pub request_timeout_secs: u64,

    /// Largest catalog payload accepted, in MiB.
    pub max_payload_mb: u64,

    /// Default filter settings per content type, e.g. `[filters.live]`.
    /// Settings changed at runtime are stored in the database and win.
    pub filters: BTreeMap<String, ContentFilterSettings>,
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .filter(|s| !s.trim().is_empty())
        .map(SecretString::from))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog_url: None,
            api_token: None,
            batch_size: 500,
            idle_timeout_ms: 3000,
            refresh_interval_minutes: 0,
            request_timeout_secs: 30,
            max_payload_mb: 64,
            filters: BTreeMap::new(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("catalog_url", &self.catalog_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("batch_size", &self.batch_size)
            .field("idle_timeout_ms", &self.idle_timeout_ms)
            .field("refresh_interval_minutes", &self.refresh_interval_minutes)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_payload_mb", &self.max_payload_mb)
            .field("filters", &self.filters)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 8] = [
        "catalog_url",
        "api_token",
        "batch_size",
        "idle_timeout_ms",
        "refresh_interval_minutes",
        "request_timeout_secs",
        "max_payload_mb",
        "filters",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        for key in config.filters.keys() {
            if let Err(e) = key.parse::<ContentType>() {
                tracing::warn!(section = %key, error = %e, "Ignoring filter defaults");
            }
        }
        tracing::info!(
            catalog_url = config.catalog_url.as_deref().unwrap_or("<unset>"),
            batch_size = config.batch_size,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Effective API token: the env var when set, otherwise the file value.
    pub fn resolved_api_token(&self) -> Option<SecretString> {
        match std::env::var(API_TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => Some(SecretString::from(token)),
            _ => self
                .api_token
                .as_ref()
                .map(|t| SecretString::from(t.expose_secret().to_string())),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_minutes.saturating_mul(60))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn max_payload_bytes(&self) -> usize {
        usize::try_from(self.max_payload_mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX)
    }

    /// Configured default filter settings of a content type.
    pub fn filter_defaults(&self, content_type: ContentType) -> ContentFilterSettings {
        self.filters
            .iter()
            .find(|(key, _)| key.parse::<ContentType>().ok() == Some(content_type))
            .map(|(_, settings)| settings.clone())
            .unwrap_or_default()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::FilterMode;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.catalog_url, None);
        assert!(config.api_token.is_none());
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.idle_timeout(), Duration::from_millis(3000));
        assert_eq!(config.refresh_interval_minutes, 0);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_payload_bytes(), 64 * 1024 * 1024);
        assert!(config.filters.is_empty());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/catalog_sync_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.batch_size, 500);
    }

    #[test]
    fn test_whitespace_only_returns_default() {
        let config = Config::parse("   \n  \n  ").unwrap();
        assert_eq!(config.batch_size, 500);
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let config = Config::parse("batch_size = 250\n").unwrap();
        assert_eq!(config.batch_size, 250);
        assert_eq!(config.idle_timeout_ms, 3000);
    }

    #[test]
    fn test_full_config() {
        let content = r#"
catalog_url = "https://provider.example/api"
api_token = "test-token-123"
batch_size = 1000
idle_timeout_ms = 1500
refresh_interval_minutes = 60
request_timeout_secs = 10
max_payload_mb = 8

[filters.live]
separator = "|"
filter_mode = "whitelist"
hidden_groups = ["EN", "FR"]

[filters.movies]
grouping_enabled = false
hidden_categories = ["Adult"]
"#;
        let config = Config::parse(content).unwrap();
        assert_eq!(config.catalog_url.as_deref(), Some("https://provider.example/api"));
        assert_eq!(
            config.api_token.as_ref().map(|t| t.expose_secret().to_string()),
            Some("test-token-123".to_string())
        );
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.refresh_interval(), Duration::from_secs(3600));
        assert_eq!(config.max_payload_bytes(), 8 * 1024 * 1024);

        let live = config.filter_defaults(ContentType::Live);
        assert_eq!(live.separator, "|");
        assert_eq!(live.filter_mode, FilterMode::Whitelist);
        assert!(live.grouping_enabled);
        assert_eq!(live.hidden_groups.len(), 2);

        let movies = config.filter_defaults(ContentType::Movies);
        assert!(!movies.grouping_enabled);
        assert!(movies.hidden_categories.contains("Adult"));

        assert_eq!(
            config.filter_defaults(ContentType::Series),
            ContentFilterSettings::default()
        );
    }

    #[test]
    fn test_empty_token_is_none() {
        let config = Config::parse("api_token = \"  \"\n").unwrap();
        assert!(config.api_token.is_none());
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let result = Config::parse("this is not [valid toml");
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let config = Config::parse("batch_size = 10\ntotally_fake_key = 1\n").unwrap();
        assert_eq!(config.batch_size, 10);
    }

    #[test]
    fn test_filter_sections_accept_aliases_and_ignore_unknown_types() {
        let config = Config::parse("[filters.vod]\nseparator = \"-\"\n[filters.radio]\nseparator = \"|\"\n").unwrap();
        assert_eq!(config.filter_defaults(ContentType::Movies).separator, "-");
        assert_eq!(
            config.filter_defaults(ContentType::Live),
            ContentFilterSettings::default()
        );
    }

    #[test]
    fn test_wrong_type_returns_error() {
        assert!(Config::parse("batch_size = \"many\"\n").is_err());
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("catalog_sync_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "a".repeat(1_048_577)).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_reads_file() {
        let dir = std::env::temp_dir().join("catalog_sync_config_test_load");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "idle_timeout_ms = 250\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.idle_timeout(), Duration::from_millis(250));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_debug_masks_api_token() {
        let config = Config::parse("api_token = \"super-secret-key-12345\"\n").unwrap();
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-key-12345"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
