//! Persistent key/value storage.
//!
//! Values are JSON files in the platform-appropriate config directory:
//! - Linux: `~/.config/chatline/`
//! - macOS: `~/Library/Application Support/chatline/`
//! - Windows: `%APPDATA%\chatline\`

use std::path::PathBuf;

use serde::{de::DeserializeOwned, Serialize};

#[derive(Debug, Clone)]
pub struct Storage {
    dir: Option<PathBuf>,
}

impl Storage {
    /// Storage rooted at the platform config directory.
    pub fn new() -> Self {
        Self {
            dir: dirs::config_dir().map(|dir| dir.join("chatline")),
        }
    }

    /// Storage rooted at an explicit directory (used by tests).
    pub fn at(dir: PathBuf) -> Self {
        Self { dir: Some(dir) }
    }

    /// Save a value. Returns `true` if the operation succeeded.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> bool {
        let Ok(json) = serde_json::to_string(value) else {
            return false;
        };
        let Some(path) = self.file_path(key) else {
            return false;
        };
        std::fs::write(path, json).is_ok()
    }

    /// Load a value. `None` if the key doesn't exist or fails to decode.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.file_path(key)?;
        let json = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&json).ok()
    }

    pub fn remove(&self, key: &str) {
        if let Some(path) = self.file_path(key) {
            let _ = std::fs::remove_file(path);
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        self.file_path(key)
            .map(|path| path.exists())
            .unwrap_or(false)
    }

    fn file_path(&self, key: &str) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        if !dir.exists() {
            std::fs::create_dir_all(dir).ok()?;
        }
        // Sanitize key to be a valid filename
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        Some(dir.join(format!("{safe_key}.json")))
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}
