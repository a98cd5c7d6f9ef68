//! Persisted user settings
//!
//! A flat JSON object of string values, re-read on every access so that
//! two processes sharing the file see each other's writes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const SETTINGS_FILE: &str = "settings.json";

/// Key of the last destination the sender streamed to
pub const LAST_DESTINATION: &str = "last_destination";
/// Key of the last capture device the sender used
pub const LAST_DEVICE: &str = "last_device";

#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store in the platform config directory, or the working directory
    pub fn default_location() -> Self {
        let dir = crate::config::config_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::open(dir.join(SETTINGS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All settings; a missing, empty or unreadable file reads as empty
    pub fn load(&self) -> BTreeMap<String, String> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Cannot read settings {}: {}", self.path.display(), e);
                }
                return BTreeMap::new();
            }
        };
        if content.trim().is_empty() {
            return BTreeMap::new();
        }

        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("Ignoring corrupt settings {}: {}", self.path.display(), e);
            BTreeMap::new()
        })
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.load().remove(key)
    }

    pub fn set(&self, key: &str, value: impl Into<String>) -> Result<()> {
        let mut settings = self.load();
        settings.insert(key.to_string(), value.into());
        self.save(&settings)
    }

    fn save(&self, settings: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(settings)
            .map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}
