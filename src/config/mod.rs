//! Configuration for PlugDeck
//!
//! Configuration is read from `~/.plugdeck/config.json` (when present) and
//! then overlaid with `PLUGDECK_*` environment variables. Every field has a
//! default, so an empty or missing file yields a working setup.
//!
//! # Example config.json
//!
//! ```json
//! {
//!   "storage": {
//!     "private_root": "/var/lib/plugdeck/storage",
//!     "public_root": "/var/www/public"
//!   },
//!   "uploads": { "max_size_bytes": 52428800 },
//!   "runtime": { "app_url": "http://127.0.0.1:8000" }
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DeckError, Result};

/// Default upload cap: 50MB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 52_428_800;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub uploads: UploadConfig,
    pub runtime: RuntimeConfig,
}

/// Where packages live on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Private storage root. Uploads, extraction scratch space and installed
    /// packages live here; it must never be web-served.
    pub private_root: PathBuf,
    /// Public document root that receives published assets and preview images.
    pub public_root: PathBuf,
    /// SQLite database holding package records.
    pub database: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let dir = Config::dir();
        Self {
            private_root: dir.join("storage"),
            public_root: dir.join("public"),
            database: dir.join("plugdeck.db"),
        }
    }
}

/// Upload validation and archive limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_size_bytes: u64,
    pub allowed_mime_types: Vec<String>,
    /// Extensions rejected anywhere inside a plugin archive. Host-language
    /// source files are not listed: uploads are admin-only and trusted.
    pub disallowed_extensions: Vec<String>,
    /// Upper bound on the declared uncompressed size of an archive.
    pub max_extracted_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_mime_types: vec![
                "application/zip".to_string(),
                "application/x-zip-compressed".to_string(),
            ],
            disallowed_extensions: ["exe", "bat", "sh", "ps1", "scr", "com", "pif"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_extracted_bytes: 256 * 1024 * 1024,
        }
    }
}

/// Runtime capability resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Base URL of the host application, used for plugin API self-calls.
    /// When unset the API step of the data fallback chain is skipped.
    pub app_url: Option<String>,
    pub http_timeout_secs: u64,
    pub http_retries: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            app_url: None,
            http_timeout_secs: 5,
            http_retries: 1,
        }
    }
}

impl Config {
    /// The PlugDeck home directory (`~/.plugdeck`).
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".plugdeck")
    }

    /// Default config file path.
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load from the default path, then apply environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path())
    }

    /// Load from an explicit path. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| {
                DeckError::Config(format!("Failed to read {}: {}", path.display(), e))
            })?;
            serde_json::from_str(&content).map_err(|e| {
                DeckError::Config(format!("Invalid config file {}: {}", path.display(), e))
            })?
        } else {
            debug!(path = %path.display(), "Config file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Overlay `PLUGDECK_*` environment variables onto this config.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PLUGDECK_STORAGE_PRIVATE_ROOT") {
            self.storage.private_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("PLUGDECK_STORAGE_PUBLIC_ROOT") {
            self.storage.public_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("PLUGDECK_STORAGE_DATABASE") {
            self.storage.database = PathBuf::from(v);
        }
        if let Some(v) = lookup("PLUGDECK_UPLOADS_MAX_SIZE_BYTES") {
            match v.parse() {
                Ok(n) => self.uploads.max_size_bytes = n,
                Err(_) => tracing::warn!(value = %v, "Ignoring invalid PLUGDECK_UPLOADS_MAX_SIZE_BYTES"),
            }
        }
        if let Some(v) = lookup("PLUGDECK_RUNTIME_APP_URL") {
            self.runtime.app_url = if v.trim().is_empty() { None } else { Some(v) };
        }
        if let Some(v) = lookup("PLUGDECK_RUNTIME_HTTP_TIMEOUT_SECS") {
            match v.parse() {
                Ok(n) => self.runtime.http_timeout_secs = n,
                Err(_) => {
                    tracing::warn!(value = %v, "Ignoring invalid PLUGDECK_RUNTIME_HTTP_TIMEOUT_SECS")
                }
            }
        }
    }

    /// Reject layouts where the private tree would be web-served.
    pub fn validate(&self) -> Result<()> {
        if self.storage.private_root.starts_with(&self.storage.public_root) {
            return Err(DeckError::Config(format!(
                "Private storage root {} must not be inside the public root {}",
                self.storage.private_root.display(),
                self.storage.public_root.display()
            )));
        }
        if self.uploads.max_size_bytes == 0 {
            return Err(DeckError::Config(
                "uploads.max_size_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// A config rooted entirely under `base`. Used by tests and `--root`.
    pub fn rooted_at(base: &Path) -> Self {
        Self {
            storage: StorageConfig {
                private_root: base.join("storage"),
                public_root: base.join("public"),
                database: base.join("plugdeck.db"),
            },
            ..Default::default()
        }
    }
}
