//! On-disk placement of package content
//!
//! The store owns two roots:
//!
//! ```text
//! <private_root>/
//! ├── uploads/plugins/<uuid>.zip        raw archives (transient)
//! ├── plugins/extracted/<uuid>/         extraction scratch (transient)
//! ├── plugins/<slug>/                   installed plugin content
//! └── themes/<slug>/                    installed theme content
//!
//! <public_root>/
//! ├── plugins/<slug>/assets/...         published plugin assets
//! └── themes/<slug>/preview.png         published theme preview
//! ```
//!
//! Permanent locations are derived from validated slugs only. The store
//! never removes anything under the public root except through
//! [`PackageStore::unpublish`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::error::{DeckError, Result};
use crate::security::{validate_path_in_root, validate_slug, SafePath};

use super::types::PackageKind;

/// Directory name reserved for extraction scratch space inside each kind's tree.
pub const EXTRACTED_DIR: &str = "extracted";

/// Owns package placement under the private root and publication under the
/// public root.
#[derive(Debug, Clone)]
pub struct PackageStore {
    private_root: PathBuf,
    public_root: PathBuf,
}

impl PackageStore {
    pub fn new(private_root: impl Into<PathBuf>, public_root: impl Into<PathBuf>) -> Self {
        Self {
            private_root: private_root.into(),
            public_root: public_root.into(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.private_root, &config.public_root)
    }

    pub fn private_root(&self) -> &Path {
        &self.private_root
    }

    pub fn public_root(&self) -> &Path {
        &self.public_root
    }

    /// Absolute path of a location relative to the private root.
    pub fn path(&self, relative: &str) -> Result<PathBuf> {
        Ok(validate_path_in_root(relative, &self.private_root)?.into_path_buf())
    }

    /// A location inside an installed package, e.g. its asset directory.
    pub fn path_within(&self, file_path: &str, relative: &str) -> Result<SafePath> {
        let package_root = self.path(file_path)?;
        validate_path_in_root(relative, &package_root)
    }

    /// Permanent relative location for a package, derived from its slug.
    pub fn package_dir(&self, kind: PackageKind, slug: &str) -> Result<String> {
        validate_slug(slug)?;
        if slug == EXTRACTED_DIR {
            return Err(DeckError::Manifest(format!(
                "Slug '{}' is reserved",
                EXTRACTED_DIR
            )));
        }
        Ok(format!("{}/{}", kind.dir_name(), slug))
    }

    /// Directory receiving raw uploaded archives.
    pub fn uploads_dir(&self, kind: PackageKind) -> PathBuf {
        self.private_root.join("uploads").join(kind.dir_name())
    }

    /// A fresh, randomly named extraction directory (not yet created).
    pub fn new_extraction_dir(&self, kind: PackageKind) -> PathBuf {
        self.private_root
            .join(kind.dir_name())
            .join(EXTRACTED_DIR)
            .join(Uuid::new_v4().to_string())
    }

    /// Whether a relative location exists under the private root.
    pub fn exists(&self, relative: &str) -> bool {
        self.path(relative).map(|p| p.exists()).unwrap_or(false)
    }

    /// Move an extracted tree to its permanent relative location.
    ///
    /// Fails with `Conflict` if the target already exists, so an existing
    /// installation is never overwritten.
    pub fn move_dir(&self, from: &Path, to_relative: &str) -> Result<PathBuf> {
        let to = self.path(to_relative)?;

        if to.exists() {
            return Err(DeckError::Conflict(format!(
                "Target directory already exists: {}",
                to_relative
            )));
        }

        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                DeckError::Filesystem(format!(
                    "Failed to create {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        match fs::rename(from, &to) {
            Ok(()) => {}
            Err(_) if to.exists() => {
                return Err(DeckError::Conflict(format!(
                    "Target directory already exists: {}",
                    to_relative
                )));
            }
            Err(e) => {
                // Rename fails across filesystems; fall back to copy + remove.
                debug!(error = %e, "Rename failed, copying package tree instead");
                if let Err(copy_err) = copy_tree(from, &to) {
                    return Err(DeckError::Filesystem(format!(
                        "Failed to move {} to {}: {}",
                        from.display(),
                        to_relative,
                        copy_err
                    )));
                }
                if let Err(e) = fs::remove_dir_all(from) {
                    warn!(path = %from.display(), error = %e, "Failed to remove moved source tree");
                }
            }
        }

        debug!(to = %to.display(), "Moved package tree");
        Ok(to)
    }

    /// Delete a package tree under the private root. Returns whether it existed.
    pub fn remove(&self, relative: &str) -> Result<bool> {
        let path = self.path(relative)?;
        if path == self.path("")? {
            return Err(DeckError::SecurityViolation(
                "Refusing to remove the storage root".to_string(),
            ));
        }
        remove_tree(&path)
    }

    /// Public directory for a package: `<public_root>/<kind>/<slug>`.
    pub fn public_dir(&self, kind: PackageKind, slug: &str) -> Result<PathBuf> {
        validate_slug(slug)?;
        Ok(self.public_root.join(kind.dir_name()).join(slug))
    }

    /// Publish a directory tree, replacing any previously published copy at
    /// `<public_root>/<kind>/<slug>/<target>`.
    pub fn publish_dir(
        &self,
        src: &SafePath,
        kind: PackageKind,
        slug: &str,
        target: &str,
    ) -> Result<PathBuf> {
        let public_dir = self.public_dir(kind, slug)?;
        let dest = validate_path_in_root(target, &public_dir)?.into_path_buf();

        if dest.exists() {
            fs::remove_dir_all(&dest).map_err(|e| {
                DeckError::Filesystem(format!(
                    "Failed to replace published copy {}: {}",
                    dest.display(),
                    e
                ))
            })?;
        }

        copy_dir_recursive(src.as_path(), &dest).map_err(|e| {
            DeckError::Filesystem(format!(
                "Failed to publish {} to {}: {}",
                src.as_path().display(),
                dest.display(),
                e
            ))
        })?;

        debug!(dest = %dest.display(), "Published package assets");
        Ok(dest)
    }

    /// Publish a single file. Returns its path relative to the public root.
    pub fn publish_file(&self, src: &SafePath, kind: PackageKind, slug: &str) -> Result<String> {
        let file_name = src
            .as_path()
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                DeckError::Filesystem(format!(
                    "Cannot publish {}: no file name",
                    src.as_path().display()
                ))
            })?
            .to_string();

        let public_dir = self.public_dir(kind, slug)?;
        fs::create_dir_all(&public_dir).map_err(|e| {
            DeckError::Filesystem(format!(
                "Failed to create {}: {}",
                public_dir.display(),
                e
            ))
        })?;
        fs::copy(src.as_path(), public_dir.join(&file_name)).map_err(|e| {
            DeckError::Filesystem(format!("Failed to publish {}: {}", file_name, e))
        })?;

        Ok(format!("{}/{}/{}", kind.dir_name(), slug, file_name))
    }

    /// Remove everything published for a package. Returns whether anything existed.
    pub fn unpublish(&self, kind: PackageKind, slug: &str) -> Result<bool> {
        let public_dir = self.public_dir(kind, slug)?;
        remove_tree(&public_dir)
    }

    /// The manifest currently on disk for an installed package. Empty when
    /// the file is missing or unreadable.
    pub fn installed_manifest(&self, kind: PackageKind, file_path: &str) -> Map<String, Value> {
        let Ok(path) = self.path_within(file_path, kind.manifest_file()) else {
            return Map::new();
        };
        let Ok(content) = fs::read_to_string(path.as_path()) else {
            return Map::new();
        };

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => map,
            Ok(_) => Map::new(),
            Err(e) => {
                warn!(path = %file_path, error = %e, "Installed manifest is not valid JSON");
                Map::new()
            }
        }
    }

    /// Slugs of the package directories present on disk for a kind.
    pub fn list_package_dirs(&self, kind: PackageKind) -> Result<Vec<String>> {
        let root = self.private_root.join(kind.dir_name());
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let mut slugs = Vec::new();
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if name != EXTRACTED_DIR {
                    slugs.push(name.to_string());
                }
            }
        }
        slugs.sort();
        Ok(slugs)
    }
}

fn remove_tree(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| {
        DeckError::Filesystem(format!("Failed to remove {}: {}", path.display(), e))
    })?;
    Ok(true)
}

/// Copy `from` to `to`, removing whatever was copied if the copy fails.
fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    if let Err(e) = copy_dir_recursive(from, to) {
        if let Err(cleanup) = remove_tree(to) {
            warn!(path = %to.display(), error = %cleanup, "Failed to remove partial copy");
        }
        return Err(e);
    }
    Ok(())
}

/// Recursively copy `src` into `dst`, creating `dst`. Symlinks are skipped.
pub(crate) fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<u64> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dst.join(entry.file_name());

        if file_type.is_symlink() {
            continue;
        } else if file_type.is_dir() {
            copied += copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}
