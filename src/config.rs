//! Configuration file parser for clipfeed.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as warnings, since they are
//! most likely typos.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::source::DEFAULT_BASE_URL;
use crate::sync::{RetentionPolicy, SyncSettings};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file
    pub database_path: String,

    /// Minutes between scheduler cycles. Must be at least 1.
    pub refresh_interval_minutes: u64,

    pub sync: SyncSection,
    pub retention: RetentionSection,
    pub source: SourceSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    /// Items requested per page
    pub page_size: u32,
    /// Pages walked at most per incremental sync
    pub max_pages: u32,
    /// Deadline for a single page request, in seconds
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetentionSection {
    /// Newest items per user that are never pruned
    pub min_keep: u32,
    /// Age in days after which items beyond the floor are pruned
    pub max_age_days: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SourceSection {
    pub api_base_url: String,
    /// Per-request HTTP timeout, in seconds
    pub http_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "clipfeed.db".to_string(),
            refresh_interval_minutes: 10,
            sync: SyncSection::default(),
            retention: RetentionSection::default(),
            source: SourceSection::default(),
        }
    }
}

impl Default for SyncSection {
    fn default() -> Self {
        let settings = SyncSettings::default();
        Self {
            page_size: settings.page_size,
            max_pages: settings.max_pages,
            request_timeout_secs: settings.request_timeout.as_secs(),
        }
    }
}

impl Default for RetentionSection {
    fn default() -> Self {
        let policy = RetentionPolicy::default();
        Self {
            min_keep: policy.min_keep,
            max_age_days: policy.max_age.as_secs() / SECS_PER_DAY,
        }
    }
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_BASE_URL.to_string(),
            http_timeout_secs: 20,
        }
    }
}

const SECS_PER_DAY: u64 = 24 * 60 * 60;

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Out-of-range values → `Err(ConfigError::Invalid)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check size before reading so a huge file cannot exhaust memory
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
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw);
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            database = %config.database_path,
            refresh_interval_minutes = config.refresh_interval_minutes,
            "Loaded configuration"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.refresh_interval_minutes == 0, "refresh_interval_minutes must be at least 1"),
            (self.sync.page_size == 0, "sync.page_size must be at least 1"),
            (self.sync.max_pages == 0, "sync.max_pages must be at least 1"),
            (self.sync.request_timeout_secs == 0, "sync.request_timeout_secs must be at least 1"),
            (self.source.http_timeout_secs == 0, "source.http_timeout_secs must be at least 1"),
            (self.database_path.trim().is_empty(), "database_path must not be empty"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(ConfigError::Invalid((*message).to_string())),
            None => Ok(()),
        }
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            page_size: self.sync.page_size,
            max_pages: self.sync.max_pages,
            request_timeout: Duration::from_secs(self.sync.request_timeout_secs),
        }
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            min_keep: self.retention.min_keep,
            max_age: Duration::from_secs(self.retention.max_age_days.saturating_mul(SECS_PER_DAY)),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_minutes.saturating_mul(60))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.source.http_timeout_secs)
    }
}

fn warn_unknown_keys(raw: &toml::Table) {
    const TOP_LEVEL: &[&str] = &[
        "database_path",
        "refresh_interval_minutes",
        "sync",
        "retention",
        "source",
    ];
    const SECTIONS: &[(&str, &[&str])] = &[
        ("sync", &["page_size", "max_pages", "request_timeout_secs"]),
        ("retention", &["min_keep", "max_age_days"]),
        ("source", &["api_base_url", "http_timeout_secs"]),
    ];

    for key in raw.keys() {
        if !TOP_LEVEL.contains(&key.as_str()) {
            tracing::warn!(key = %key, "Unknown key in config file, ignoring");
        }
    }
    for (section, known) in SECTIONS {
        if let Some(table) = raw.get(*section).and_then(toml::Value::as_table) {
            for key in table.keys() {
                if !known.contains(&key.as_str()) {
                    tracing::warn!(section = %section, key = %key, "Unknown key in config file, ignoring");
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    /// Write `content` to a fresh config file under the temp dir.
    fn write_config(name: &str, content: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("clipfeed_config_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("clipfeed.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database_path, "clipfeed.db");
        assert_eq!(config.refresh_interval(), Duration::from_secs(600));
        assert_eq!(config.sync_settings(), SyncSettings::default());
        assert_eq!(config.retention_policy(), RetentionPolicy::default());
        assert_eq!(config.source.api_base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/clipfeed_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_empty_file_returns_default() {
        let (dir, path) = write_config("empty", "   \n  \n");
        assert_eq!(Config::load(&path).unwrap(), Config::default());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (dir, path) = write_config("partial", "[retention]\nmin_keep = 10\n");

        let config = Config::load(&path).unwrap();
        assert_eq!(config.retention.min_keep, 10);
        assert_eq!(config.retention.max_age_days, 30);
        assert_eq!(config.sync, SyncSection::default());
        assert_eq!(config.refresh_interval_minutes, 10);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let content = r#"
database_path = "/var/lib/clipfeed/feeds.db"
refresh_interval_minutes = 5

[sync]
page_size = 40
max_pages = 3
request_timeout_secs = 15

[retention]
min_keep = 100
max_age_days = 7

[source]
api_base_url = "http://localhost:8080/v2"
http_timeout_secs = 10
"#;
        let (dir, path) = write_config("full", content);

        let config = Config::load(&path).unwrap();
        assert_eq!(config.database_path, "/var/lib/clipfeed/feeds.db");
        assert_eq!(config.refresh_interval(), Duration::from_secs(300));
        assert_eq!(
            config.sync_settings(),
            SyncSettings {
                page_size: 40,
                max_pages: 3,
                request_timeout: Duration::from_secs(15),
            }
        );
        assert_eq!(
            config.retention_policy(),
            RetentionPolicy {
                min_keep: 100,
                max_age: Duration::from_secs(7 * 24 * 60 * 60),
            }
        );
        assert_eq!(config.source.api_base_url, "http://localhost:8080/v2");
        assert_eq!(config.http_timeout(), Duration::from_secs(10));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (dir, path) = write_config("invalid", "this is not [valid toml");

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let (dir, path) = write_config("wrongtype", "[sync]\npage_size = \"twenty\"\n");
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let content = r#"
totally_fake_key = "should not fail"

[sync]
page_sise = 10
"#;
        let (dir, path) = write_config("unknown", content);

        let config = Config::load(&path).unwrap();
        assert_eq!(config.sync.page_size, 20);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_zero_values_rejected() {
        for (name, content) in [
            ("zero_interval", "refresh_interval_minutes = 0\n"),
            ("zero_page", "[sync]\npage_size = 0\n"),
            ("zero_pages", "[sync]\nmax_pages = 0\n"),
        ] {
            let (dir, path) = write_config(name, content);
            let err = Config::load(&path).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{name}: {err}");
            std::fs::remove_dir_all(&dir).ok();
        }
    }

    #[test]
    fn test_zero_min_keep_allowed() {
        let (dir, path) = write_config("zero_keep", "[retention]\nmin_keep = 0\n");
        assert_eq!(Config::load(&path).unwrap().retention_policy().min_keep, 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (dir, path) = write_config("too_large", &"a".repeat(1_048_577));

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
