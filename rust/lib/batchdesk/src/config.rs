//! Client settings.
//!
//! Reads/writes `~/.batchdesk/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::PageRequest;
use crate::notify::Toast;
use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config encode: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// Client configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeskConfig {
    /// Backend base URL, including the `/api` prefix.
    pub server: String,

    /// Page size for list fetches.
    pub per_page: u32,

    /// Upper bound on any single guarded operation.
    pub op_timeout_secs: u64,

    /// How long a notification stays visible.
    pub notification_secs: u64,

    pub retry: RetryPolicy,
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            server: "http://localhost:5000/api".to_string(),
            per_page: 50,
            op_timeout_secs: 30,
            notification_secs: 5,
            retry: RetryPolicy::default(),
        }
    }
}

impl DeskConfig {
    /// Default config file path: ~/.batchdesk/config.toml.
    pub fn default_path() -> PathBuf {
        dirs_path().join("config.toml")
    }

    /// Load config from disk, or return default if file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.op_timeout_secs.max(1))
    }

    pub fn notification_ttl(&self) -> Duration {
        Duration::from_secs(self.notification_secs.max(1))
    }

    /// An empty notification area that dismisses after the configured interval.
    pub fn toast(&self) -> Toast {
        Toast::with_dismiss_after(self.notification_ttl())
    }

    /// First page at the configured size.
    pub fn first_page(&self) -> PageRequest {
        PageRequest::new(1, self.per_page)
    }
}

fn dirs_path() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".batchdesk")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = DeskConfig::default();
        assert_eq!(c.per_page, 50);
        assert_eq!(c.op_timeout(), Duration::from_secs(30));
        assert_eq!(c.notification_ttl(), Duration::from_secs(5));
        assert_eq!(c.retry.max_attempts, 3);
    }

    #[test]
    fn toast_uses_configured_interval() {
        let mut c = DeskConfig::default();
        assert_eq!(c.toast().dismiss_after(), Duration::from_secs(5));

        c.notification_secs = 12;
        assert_eq!(c.toast().dismiss_after(), Duration::from_secs(12));

        // Zero would hide every message immediately.
        c.notification_secs = 0;
        assert_eq!(c.notification_ttl(), Duration::from_secs(1));
    }

    #[test]
    fn missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let c = DeskConfig::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(c, DeskConfig::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut c = DeskConfig::default();
        c.server = "http://10.0.0.5:5000/api".into();
        c.retry.max_attempts = 5;
        c.save(&path).unwrap();

        assert_eq!(DeskConfig::load(&path).unwrap(), c);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let c: DeskConfig = toml::from_str(
            r#"
            per_page = 20
            [retry]
            base_backoff_ms = 50
            "#,
        )
        .unwrap();
        assert_eq!(c.per_page, 20);
        assert_eq!(c.op_timeout_secs, 30);
        assert_eq!(c.retry.max_attempts, 3);
        assert_eq!(c.retry.base_backoff_ms, 50);
        assert_eq!(c.first_page(), PageRequest::new(1, 20));
    }

    #[test]
    fn bad_toml_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "per_page = \"many\"").unwrap();
        assert!(matches!(DeskConfig::load(&path), Err(ConfigError::Parse(_))));
    }
}
