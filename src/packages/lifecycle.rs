//! Package lifecycle orchestration
//!
//! `LifecycleManager` drives a package from upload to deletion:
//!
//! ```text
//! upload ─► validate ─► store ─► extract ─► scan ─► manifest ─► unique? ─► move ─► record
//!                                                                                  │
//!                          delete ◄── deactivate ◄── activate ◄───────────────────┘
//! ```
//!
//! Every install step before the record is written runs under an
//! [`InstallScratch`] guard, so a failed install never leaves the raw
//! archive or the extraction directory behind.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{DeckError, Result};

use super::archive::{ArchiveHandler, UploadedFile};
use super::manifest::ManifestReader;
use super::migrations::MigrationRunner;
use super::repository::PackageRepository;
use super::store::PackageStore;
use super::types::{Manifest, NewPackage, Package, PackageKind};

/// Asset directory published when a manifest declares no `assets`.
pub const DEFAULT_ASSETS_DIR: &str = "resources/assets";

/// Public sub-directory receiving the default asset directory.
pub const PUBLISHED_ASSETS_DIR: &str = "assets";

/// Manifest keys mirrored in record columns; they cannot be edited in place.
pub const IDENTITY_KEYS: [&str; 3] = ["name", "slug", "version"];

/// Theme preview images, in order of preference.
pub const PREVIEW_CANDIDATES: [&str; 4] = [
    "preview.jpg",
    "preview.png",
    "screenshot.jpg",
    "screenshot.png",
];

/// Invalidates host state derived from the set of active packages.
///
/// Invalidation is a hint: failures are logged and never abort the
/// operation that triggered them.
#[cfg_attr(test, mockall::automock)]
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self, reason: &str) -> Result<()>;
}

/// Invalidator for hosts with no derived caches.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCacheInvalidator;

impl CacheInvalidator for LogCacheInvalidator {
    fn invalidate(&self, reason: &str) -> Result<()> {
        debug!(reason = %reason, "Cache invalidation requested");
        Ok(())
    }
}

/// A mismatch between package records and package directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inconsistency {
    /// A record whose content directory is gone.
    MissingFiles {
        kind: PackageKind,
        slug: String,
        file_path: String,
    },
    /// A package directory no record points to.
    OrphanedDirectory { kind: PackageKind, path: String },
}

/// Removes the raw archive and extraction directory of an install attempt
/// when dropped.
struct InstallScratch<'a> {
    archives: &'a ArchiveHandler,
    archive: Option<PathBuf>,
    extraction: Option<PathBuf>,
}

impl<'a> InstallScratch<'a> {
    fn new(archives: &'a ArchiveHandler) -> Self {
        Self {
            archives,
            archive: None,
            extraction: None,
        }
    }
}

impl Drop for InstallScratch<'_> {
    fn drop(&mut self) {
        if let Some(path) = self.archive.take() {
            if let Err(e) = self.archives.delete(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove uploaded archive");
            }
        }
        if let Some(path) = self.extraction.take() {
            if let Err(e) = self.archives.delete_dir(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove extraction directory");
            }
        }
    }
}

/// Orchestrates install, activation, deactivation and deletion of packages.
pub struct LifecycleManager {
    archives: ArchiveHandler,
    manifests: ManifestReader,
    store: PackageStore,
    repo: Arc<dyn PackageRepository>,
    migrations: Arc<dyn MigrationRunner>,
    invalidators: Vec<Arc<dyn CacheInvalidator>>,
}

impl LifecycleManager {
    pub fn new(
        archives: ArchiveHandler,
        store: PackageStore,
        repo: Arc<dyn PackageRepository>,
        migrations: Arc<dyn MigrationRunner>,
    ) -> Self {
        Self {
            archives,
            manifests: ManifestReader::new(),
            store,
            repo,
            migrations,
            invalidators: Vec::new(),
        }
    }

    /// Add a cache invalidator notified after activation state changes.
    pub fn with_invalidator(mut self, invalidator: Arc<dyn CacheInvalidator>) -> Self {
        self.invalidators.push(invalidator);
        self
    }

    pub fn store(&self) -> &PackageStore {
        &self.store
    }

    pub fn repository(&self) -> &Arc<dyn PackageRepository> {
        &self.repo
    }

    // ------------------------------------------------------------------
    // Install
    // ------------------------------------------------------------------

    /// Install an uploaded archive as an inactive package.
    ///
    /// # Errors
    /// - `Validation` with every failed upload rule
    /// - `Archive` / `DisallowedFiles` for corrupt or dangerous archives
    /// - `Manifest` for a missing, malformed or incomplete manifest
    /// - `Conflict` if the slug is already installed
    /// - `Filesystem` if the package cannot be moved into place
    pub fn install(&self, kind: PackageKind, file: &UploadedFile) -> Result<Package> {
        let errors = self.archives.validate(file);
        if !errors.is_empty() {
            warn!(file = %file.original_name, ?errors, "Rejected {} upload", kind);
            return Err(DeckError::Validation(errors));
        }

        let mut scratch = InstallScratch::new(&self.archives);

        let archive = self.archives.store(file, kind)?;
        scratch.archive = Some(archive.clone());

        let extraction = self.store.new_extraction_dir(kind);
        scratch.extraction = Some(extraction.clone());
        self.archives.extract(&archive, &extraction)?;

        let hits = self.archives.scan_for_disallowed(&extraction)?;
        if !hits.is_empty() {
            warn!(files = ?hits, "Archive contains disallowed files");
            return Err(DeckError::DisallowedFiles(hits));
        }

        let manifest = self.manifests.read(&extraction, kind)?;
        let slug = manifest.slug().to_string();

        if self.repo.find_by_slug(kind, &slug)?.is_some() {
            return Err(DeckError::Conflict(format!(
                "A {} with slug '{}' already exists.",
                kind, slug
            )));
        }

        let checksum = self.archives.checksum(&archive)?;
        let target = self.store.package_dir(kind, &slug)?;
        self.store.move_dir(&extraction, &target)?;

        let package = match self.record_install(kind, manifest, &target, checksum) {
            Ok(package) => package,
            Err(e) => {
                // The moved tree is ours; an existing install would have
                // made the move fail.
                if let Err(cleanup) = self.store.remove(&target) {
                    warn!(path = %target, error = %cleanup, "Failed to remove moved package tree");
                }
                if let Err(cleanup) = self.store.unpublish(kind, &slug) {
                    warn!(slug = %slug, error = %cleanup, "Failed to unpublish package");
                }
                return Err(e);
            }
        };

        drop(scratch);
        info!(slug = %package.slug, version = %package.version, "Installed {}", kind);
        Ok(package)
    }

    fn record_install(
        &self,
        kind: PackageKind,
        manifest: Manifest,
        target: &str,
        checksum: String,
    ) -> Result<Package> {
        let mut record = NewPackage::from_manifest(kind, manifest, target.to_string());
        record.checksum = Some(checksum);
        if kind == PackageKind::Theme {
            record.preview_image = self.publish_preview(&record.slug, target)?;
        }
        self.repo.insert(&record)
    }

    fn publish_preview(&self, slug: &str, file_path: &str) -> Result<Option<String>> {
        for candidate in PREVIEW_CANDIDATES {
            let src = self.store.path_within(file_path, candidate)?;
            if src.as_path().is_file() {
                let public = self.store.publish_file(&src, PackageKind::Theme, slug)?;
                debug!(slug = %slug, preview = %public, "Published theme preview");
                return Ok(Some(public));
            }
        }
        Ok(None)
    }

    // ------------------------------------------------------------------
    // Activation
    // ------------------------------------------------------------------

    /// Activate a package. Already-active packages are returned unchanged.
    ///
    /// Plugins: the flag is flipped, then migrations run and assets are
    /// published. If either fails the flag is flipped back and
    /// `ActivationFailed` is returned. Themes: assets are published, then
    /// the theme becomes the only active one in a single transaction.
    pub fn activate(&self, kind: PackageKind, id: i64) -> Result<Package> {
        let package = self.get(kind, id)?;
        if package.is_active {
            debug!(slug = %package.slug, "{} already active", kind);
            return Ok(package);
        }

        match kind {
            PackageKind::Plugin => self.activate_plugin(&package)?,
            PackageKind::Theme => self.activate_theme(&package)?,
        }

        self.invalidate(&format!("activated {} '{}'", kind, package.slug));
        info!(slug = %package.slug, "Activated {}", kind);
        self.get(kind, id)
    }

    fn activate_plugin(&self, package: &Package) -> Result<()> {
        self.repo.set_active(PackageKind::Plugin, package.id, true)?;

        if let Err(e) = self.run_plugin_setup(package) {
            warn!(slug = %package.slug, error = %e, "Plugin setup failed, rolling back activation");
            if let Err(rollback) = self.repo.set_active(PackageKind::Plugin, package.id, false) {
                warn!(slug = %package.slug, error = %rollback, "Failed to roll back activation");
            }
            return Err(DeckError::ActivationFailed {
                slug: package.slug.clone(),
                source: Box::new(e),
            });
        }
        Ok(())
    }

    fn run_plugin_setup(&self, package: &Package) -> Result<()> {
        let root = self.store.path(&package.file_path)?;
        let applied = self.migrations.run(&package.slug, &root)?;
        if !applied.is_empty() {
            info!(slug = %package.slug, count = applied.len(), "Ran plugin migrations");
        }
        self.publish_assets(package)
    }

    fn activate_theme(&self, package: &Package) -> Result<()> {
        self.publish_assets(package)
            .map_err(|e| DeckError::ActivationFailed {
                slug: package.slug.clone(),
                source: Box::new(e),
            })?;
        self.repo.activate_exclusive(PackageKind::Theme, package.id)
    }

    /// Copy the package's asset directories to the public root, replacing
    /// previously published copies.
    fn publish_assets(&self, package: &Package) -> Result<()> {
        let declared = package.manifest.assets();
        let sources: Vec<(String, String)> = if declared.is_empty() {
            vec![(
                DEFAULT_ASSETS_DIR.to_string(),
                PUBLISHED_ASSETS_DIR.to_string(),
            )]
        } else {
            declared.into_iter().map(|d| (d.clone(), d)).collect()
        };

        for (source, target) in sources {
            let src = self.store.path_within(&package.file_path, &source)?;
            if !src.as_path().is_dir() {
                debug!(slug = %package.slug, dir = %source, "No asset directory to publish");
                continue;
            }
            self.store
                .publish_dir(&src, package.kind, &package.slug, &target)?;
        }
        Ok(())
    }

    /// Deactivate a package. Assets and migrations are left in place.
    pub fn deactivate(&self, kind: PackageKind, id: i64) -> Result<Package> {
        let package = self.get(kind, id)?;
        if !package.is_active {
            return Ok(package);
        }

        self.repo.set_active(kind, id, false)?;
        self.invalidate(&format!("deactivated {} '{}'", kind, package.slug));
        info!(slug = %package.slug, "Deactivated {}", kind);
        self.get(kind, id)
    }

    /// Flip the activation state.
    pub fn toggle(&self, kind: PackageKind, id: i64) -> Result<Package> {
        if self.get(kind, id)?.is_active {
            self.deactivate(kind, id)
        } else {
            self.activate(kind, id)
        }
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    /// Delete a package: private tree, published copies, then the record.
    ///
    /// Returns `false` if no such record exists. The active theme cannot be
    /// deleted.
    pub fn delete(&self, kind: PackageKind, id: i64) -> Result<bool> {
        let Some(package) = self.repo.find(kind, id)? else {
            return Ok(false);
        };

        if package.is_theme() && package.is_active {
            return Err(DeckError::Conflict(
                "Cannot delete the active theme. Activate another theme first.".to_string(),
            ));
        }

        // Files go first: a crash leaves a record pointing at nothing,
        // which reconcile() reports.
        self.store.remove(&package.file_path)?;
        self.store.unpublish(kind, &package.slug)?;
        self.repo.delete(kind, id)?;

        if package.is_active {
            self.invalidate(&format!("deleted {} '{}'", kind, package.slug));
        }
        info!(slug = %package.slug, "Deleted {}", kind);
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn list(&self, kind: PackageKind) -> Result<Vec<Package>> {
        self.repo.list(kind)
    }

    pub fn find(&self, kind: PackageKind, id: i64) -> Result<Option<Package>> {
        self.repo.find(kind, id)
    }

    pub fn find_by_slug(&self, kind: PackageKind, slug: &str) -> Result<Option<Package>> {
        self.repo.find_by_slug(kind, slug)
    }

    /// Like [`find_by_slug`](Self::find_by_slug) but missing is an error.
    pub fn require_by_slug(&self, kind: PackageKind, slug: &str) -> Result<Package> {
        self.find_by_slug(kind, slug)?
            .ok_or_else(|| DeckError::NotFound(format!("{} '{}'", kind, slug)))
    }

    pub fn active_theme(&self) -> Result<Option<Package>> {
        self.repo.active_theme()
    }

    fn get(&self, kind: PackageKind, id: i64) -> Result<Package> {
        self.repo
            .find(kind, id)?
            .ok_or_else(|| DeckError::NotFound(format!("{} #{}", kind, id)))
    }

    /// The manifest as currently found on disk. Empty when the file is
    /// missing or unreadable.
    pub fn package_info(&self, package: &Package) -> Map<String, Value> {
        self.store.installed_manifest(package.kind, &package.file_path)
    }

    /// Update one dotted manifest key on the stored record.
    ///
    /// Identity keys (`name`, `slug`, `version`) are rejected; they change
    /// only by installing a new package.
    pub fn set_manifest_value(
        &self,
        kind: PackageKind,
        id: i64,
        key: &str,
        value: Value,
    ) -> Result<Package> {
        if IDENTITY_KEYS.contains(&key) {
            return Err(DeckError::Manifest(format!(
                "Manifest key '{}' identifies the {} and cannot be changed",
                key, kind
            )));
        }
        let mut package = self.get(kind, id)?;
        package.manifest.set(key, value)?;
        self.repo.update_manifest(kind, id, &package.manifest)?;
        self.get(kind, id)
    }

    /// Compare records against package directories and report mismatches.
    pub fn reconcile(&self, kind: PackageKind) -> Result<Vec<Inconsistency>> {
        let records = self.repo.list(kind)?;
        let mut issues = Vec::new();

        for package in &records {
            if !self.store.exists(&package.file_path) {
                warn!(slug = %package.slug, path = %package.file_path, "Package record has no files");
                issues.push(Inconsistency::MissingFiles {
                    kind,
                    slug: package.slug.clone(),
                    file_path: package.file_path.clone(),
                });
            }
        }

        for dir in self.store.list_package_dirs(kind)? {
            let path = format!("{}/{}", kind.dir_name(), dir);
            if !records.iter().any(|p| p.file_path == path) {
                warn!(path = %path, "Package directory has no record");
                issues.push(Inconsistency::OrphanedDirectory { kind, path });
            }
        }

        Ok(issues)
    }

    fn invalidate(&self, reason: &str) {
        for invalidator in &self.invalidators {
            if let Err(e) = invalidator.invalidate(reason) {
                warn!(reason = %reason, error = %e, "Cache invalidation failed");
            }
        }
    }
}
