//! Package types for PlugDeck
//!
//! This module defines the package kinds, the manifest wrapper returned by
//! the manifest reader, and the persisted package record.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DeckError, Result};

/// The two kinds of uploadable package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageKind {
    Plugin,
    Theme,
}

impl PackageKind {
    /// Identifier stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageKind::Plugin => "plugin",
            PackageKind::Theme => "theme",
        }
    }

    /// Capitalized name for user-facing messages.
    pub fn label(&self) -> &'static str {
        match self {
            PackageKind::Plugin => "Plugin",
            PackageKind::Theme => "Theme",
        }
    }

    /// Name of the manifest file at the root of an extracted package.
    pub fn manifest_file(&self) -> &'static str {
        match self {
            PackageKind::Plugin => "plugin.json",
            PackageKind::Theme => "theme.json",
        }
    }

    /// Top-level directory under both the private and the public roots.
    pub fn dir_name(&self) -> &'static str {
        match self {
            PackageKind::Plugin => "plugins",
            PackageKind::Theme => "themes",
        }
    }
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageKind {
    type Err = DeckError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "plugin" => Ok(PackageKind::Plugin),
            "theme" => Ok(PackageKind::Theme),
            other => Err(DeckError::Config(format!("Unknown package kind '{}'", other))),
        }
    }
}

/// Runtime entry-point declaration from a manifest's `runtime` section.
///
/// ```json
/// "runtime": {
///   "entry": "http",
///   "endpoint": "http://127.0.0.1:9300",
///   "capabilities": ["getPluginData", "getStats"]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSpec {
    /// Identifier of the service factory that builds this package's service.
    pub entry: String,

    /// Base URL of an out-of-process plugin service.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Capability names the service claims to implement.
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Static capability payloads, keyed by capability name.
    #[serde(default)]
    pub data: Map<String, Value>,

    /// Per-call timeout override in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// The full parsed content of a `plugin.json` / `theme.json`.
///
/// Only `name`, `slug` and `version` are guaranteed (the manifest reader
/// rejects documents without them); everything else is optional metadata
/// that downstream code reads without touching the file again.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(Map<String, Value>);

impl Manifest {
    /// Wrap a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(DeckError::Manifest(
                "Manifest must be a JSON object".to_string(),
            )),
        }
    }

    /// A top-level string field, if present and a string.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn name(&self) -> &str {
        self.str_field("name").unwrap_or_default()
    }

    pub fn slug(&self) -> &str {
        self.str_field("slug").unwrap_or_default()
    }

    pub fn version(&self) -> &str {
        self.str_field("version").unwrap_or_default()
    }

    pub fn description(&self) -> Option<&str> {
        self.str_field("description")
    }

    /// Author as a plain string, or the `name` of an author object.
    pub fn author(&self) -> Option<String> {
        match self.0.get("author")? {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => obj.get("name").and_then(Value::as_str).map(str::to_string),
            _ => None,
        }
    }

    /// Declared features (list or mapping). Empty list when absent.
    pub fn features(&self) -> Value {
        self.0
            .get("features")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()))
    }

    /// Declared asset directories, relative to the package root.
    pub fn assets(&self) -> Vec<String> {
        match self.0.get("assets") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    /// Runtime entry-point declaration, if any.
    pub fn runtime(&self) -> Result<Option<RuntimeSpec>> {
        match self.0.get("runtime") {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| DeckError::Manifest(format!("Invalid runtime section: {}", e))),
        }
    }

    /// Path of the plugin's own data API, when the manifest declares one.
    ///
    /// `"api": true` uses the conventional `/api/plugins/{slug}/data`; a string
    /// or an object with a `data` key names the path explicitly.
    pub fn api_data_path(&self) -> Option<String> {
        match self.0.get("api")? {
            Value::Bool(true) => Some(format!("/api/plugins/{}/data", self.slug())),
            Value::String(path) => Some(path.clone()),
            Value::Object(obj) => obj.get("data").and_then(Value::as_str).map(str::to_string),
            _ => None,
        }
    }

    /// Look up a dotted key such as `extra.providers`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let mut parts = key.split('.');
        let first = parts.next()?;
        let mut current = self.0.get(first)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Set a dotted key, creating intermediate objects as needed.
    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(DeckError::Manifest(format!("Invalid manifest key '{}'", key)));
        }

        let (last, parents) = parts.split_last().ok_or_else(|| {
            DeckError::Manifest(format!("Invalid manifest key '{}'", key))
        })?;

        let mut current = &mut self.0;
        for part in parents {
            let entry = current
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            current = entry.as_object_mut().ok_or_else(|| {
                DeckError::Manifest(format!(
                    "Cannot set '{}': '{}' is not an object",
                    key, part
                ))
            })?;
        }
        current.insert(last.to_string(), value);
        Ok(())
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// A persisted package record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub id: i64,
    pub kind: PackageKind,
    pub name: String,
    pub slug: String,
    pub version: String,
    pub description: Option<String>,
    pub author: Option<String>,
    /// Location of the extracted content, relative to the private root.
    pub file_path: String,
    pub manifest: Manifest,
    pub is_active: bool,
    /// Plugins only: whether lifecycle setup succeeded.
    pub is_installed: bool,
    pub installed_at: Option<DateTime<Utc>>,
    /// Themes only: public path of the published preview image.
    pub preview_image: Option<String>,
    /// SHA-256 of the uploaded archive.
    pub checksum: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Package {
    pub fn is_theme(&self) -> bool {
        self.kind == PackageKind::Theme
    }

    pub fn is_plugin(&self) -> bool {
        self.kind == PackageKind::Plugin
    }
}

/// Fields for a package record about to be created.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPackage {
    pub kind: PackageKind,
    pub name: String,
    pub slug: String,
    pub version: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub file_path: String,
    pub manifest: Manifest,
    pub checksum: Option<String>,
    pub preview_image: Option<String>,
    pub is_installed: bool,
    pub installed_at: Option<DateTime<Utc>>,
}

impl NewPackage {
    /// Build a record from a validated manifest.
    ///
    /// Plugins are marked installed with the current timestamp; themes have
    /// no installed flag and simply exist inactive.
    pub fn from_manifest(kind: PackageKind, manifest: Manifest, file_path: String) -> Self {
        let installed = kind == PackageKind::Plugin;
        Self {
            kind,
            name: manifest.name().to_string(),
            slug: manifest.slug().to_string(),
            version: manifest.version().to_string(),
            description: manifest.description().map(str::to_string),
            author: manifest.author(),
            file_path,
            checksum: None,
            preview_image: None,
            is_installed: installed,
            installed_at: installed.then(Utc::now),
            manifest,
        }
    }
}
