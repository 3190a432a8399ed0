//! Manifest reading and validation
//!
//! Reads `plugin.json` / `theme.json` from the root of an extracted package
//! and enforces the required identity fields before anything is moved into
//! permanent storage.

use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::error::{DeckError, Result};
use crate::security::validate_slug;

use super::types::{Manifest, PackageKind};

/// Fields every manifest must carry as non-empty strings, checked in order.
pub const REQUIRED_FIELDS: [&str; 3] = ["name", "slug", "version"];

/// Stateless reader for package manifests.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestReader;

impl ManifestReader {
    pub fn new() -> Self {
        Self
    }

    /// Read and validate the manifest at the root of `dir`.
    ///
    /// # Errors
    /// - `DeckError::Manifest` if the manifest file does not exist
    /// - `DeckError::Manifest` if the JSON is malformed or not an object
    /// - `DeckError::Manifest` naming the first missing required field
    /// - `DeckError::Manifest` if the slug is not path/URL safe
    pub fn read(&self, dir: &Path, kind: PackageKind) -> Result<Manifest> {
        let file_name = kind.manifest_file();
        let manifest_path = dir.join(file_name);

        if !manifest_path.is_file() {
            return Err(DeckError::Manifest(format!(
                "{} configuration file ({}) not found.",
                kind.label(),
                file_name
            )));
        }

        let content = fs::read_to_string(&manifest_path).map_err(|e| {
            DeckError::Manifest(format!("Failed to read {}: {}", manifest_path.display(), e))
        })?;

        let value: Value = serde_json::from_str(&content).map_err(|e| {
            DeckError::Manifest(format!(
                "Invalid {} configuration file: {}",
                kind.as_str(),
                e
            ))
        })?;

        let manifest = Manifest::from_value(value).map_err(|_| {
            DeckError::Manifest(format!(
                "Invalid {} configuration file: expected a JSON object",
                kind.as_str()
            ))
        })?;

        validate_manifest(&manifest)?;

        debug!(
            slug = %manifest.slug(),
            version = %manifest.version(),
            "Read {} manifest",
            kind
        );
        Ok(manifest)
    }
}

/// Validate the required identity fields of a manifest.
pub fn validate_manifest(manifest: &Manifest) -> Result<()> {
    for field in REQUIRED_FIELDS {
        match manifest.str_field(field) {
            Some(value) if !value.trim().is_empty() => {}
            _ => {
                return Err(DeckError::Manifest(format!(
                    "Missing required field: {}",
                    field
                )))
            }
        }
    }

    validate_slug(manifest.slug())?;

    manifest.runtime()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_manifest(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_read_valid_plugin_manifest() {
        let tmp = TempDir::new().unwrap();
        write_manifest(
            tmp.path(),
            "plugin.json",
            r#"{
                "name": "Sample Test Plugin",
                "slug": "sample-test-plugin",
                "version": "1.0.0",
                "description": "Exercises every extension point",
                "features": ["routes", "migrations"],
                "extra": { "providers": ["SampleTestPluginServiceProvider"] }
            }"#,
        );

        let manifest = ManifestReader::new()
            .read(tmp.path(), PackageKind::Plugin)
            .unwrap();
        assert_eq!(manifest.name(), "Sample Test Plugin");
        assert_eq!(manifest.slug(), "sample-test-plugin");
        assert_eq!(manifest.version(), "1.0.0");
        // Optional metadata is preserved
        assert!(manifest.get("extra.providers").is_some());
        assert_eq!(manifest.features().as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_read_theme_uses_theme_json() {
        let tmp = TempDir::new().unwrap();
        write_manifest(
            tmp.path(),
            "plugin.json",
            r#"{"name": "x", "slug": "x", "version": "1"}"#,
        );

        let err = ManifestReader::new()
            .read(tmp.path(), PackageKind::Theme)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Manifest error: Theme configuration file (theme.json) not found."
        );
    }

    #[test]
    fn test_missing_manifest() {
        let tmp = TempDir::new().unwrap();
        let err = ManifestReader::new()
            .read(tmp.path(), PackageKind::Plugin)
            .unwrap_err();
        assert!(matches!(err, DeckError::Manifest(_)));
        assert!(err.to_string().contains("plugin.json) not found"));
    }

    #[test]
    fn test_malformed_json_is_distinct_from_missing() {
        let tmp = TempDir::new().unwrap();
        write_manifest(tmp.path(), "plugin.json", "{ not valid json }");

        let err = ManifestReader::new()
            .read(tmp.path(), PackageKind::Plugin)
            .unwrap_err();
        assert!(err.to_string().contains("Invalid plugin configuration file"));
        assert!(!err.to_string().contains("not found"));
    }

    #[test]
    fn test_non_object_json() {
        let tmp = TempDir::new().unwrap();
        write_manifest(tmp.path(), "plugin.json", r#"["name", "slug"]"#);

        let err = ManifestReader::new()
            .read(tmp.path(), PackageKind::Plugin)
            .unwrap_err();
        assert!(err.to_string().contains("expected a JSON object"));
    }

    #[test]
    fn test_missing_required_fields_are_named() {
        let tmp = TempDir::new().unwrap();
        let reader = ManifestReader::new();

        write_manifest(tmp.path(), "plugin.json", r#"{"slug": "x", "version": "1"}"#);
        let err = reader.read(tmp.path(), PackageKind::Plugin).unwrap_err();
        assert_eq!(err.to_string(), "Manifest error: Missing required field: name");

        write_manifest(tmp.path(), "plugin.json", r#"{"name": "X", "version": "1"}"#);
        let err = reader.read(tmp.path(), PackageKind::Plugin).unwrap_err();
        assert_eq!(err.to_string(), "Manifest error: Missing required field: slug");

        write_manifest(
            tmp.path(),
            "plugin.json",
            r#"{"name": "X", "slug": "x", "version": ""}"#,
        );
        let err = reader.read(tmp.path(), PackageKind::Plugin).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Manifest error: Missing required field: version"
        );

        write_manifest(
            tmp.path(),
            "plugin.json",
            r#"{"name": "X", "slug": "x", "version": 2}"#,
        );
        let err = reader.read(tmp.path(), PackageKind::Plugin).unwrap_err();
        assert!(err.to_string().contains("Missing required field: version"));
    }

    #[test]
    fn test_unsafe_slug_rejected() {
        let tmp = TempDir::new().unwrap();
        write_manifest(
            tmp.path(),
            "plugin.json",
            r#"{"name": "X", "slug": "../../etc", "version": "1"}"#,
        );

        let err = ManifestReader::new()
            .read(tmp.path(), PackageKind::Plugin)
            .unwrap_err();
        assert!(err.to_string().contains("Invalid slug"));
    }

    #[test]
    fn test_invalid_runtime_section_rejected() {
        let tmp = TempDir::new().unwrap();
        write_manifest(
            tmp.path(),
            "plugin.json",
            r#"{"name": "X", "slug": "x", "version": "1", "runtime": {"capabilities": "nope"}}"#,
        );

        let err = ManifestReader::new()
            .read(tmp.path(), PackageKind::Plugin)
            .unwrap_err();
        assert!(err.to_string().contains("Invalid runtime section"));
    }
}
