//! Package lifecycle engine
//!
//! Plugins and themes arrive as ZIP uploads and move through:
//!
//! 1. [`ArchiveHandler`] validates, stores, extracts and scans the upload
//! 2. [`ManifestReader`] reads `plugin.json` / `theme.json`
//! 3. [`PackageStore`] moves the content to its slug-derived location
//! 4. [`PackageRepository`] records the package
//! 5. [`LifecycleManager`] activates, deactivates and deletes it
//!
//! # Example
//!
//! ```rust,ignore
//! use plugdeck::packages::{LifecycleManager, PackageKind, UploadedFile};
//!
//! let upload = UploadedFile::from_path("hello-world.zip")?;
//! let package = manager.install(PackageKind::Plugin, &upload)?;
//! manager.activate(PackageKind::Plugin, package.id)?;
//! ```

pub mod archive;
pub mod browser;
pub mod lifecycle;
pub mod manifest;
pub mod migrations;
pub mod repository;
pub mod store;
pub mod types;

pub use archive::{sniff_mime, ArchiveHandler, UploadedFile};
pub use browser::{Entry, EntryType, FileDetails, Listing, PackageBrowser};
pub use lifecycle::{CacheInvalidator, Inconsistency, LifecycleManager, LogCacheInvalidator};
pub use manifest::{validate_manifest, ManifestReader};
pub use migrations::{MigrationRunner, SqlMigrationRunner};
pub use repository::{PackageRepository, SqlitePackageRepository};
pub use store::PackageStore;
pub use types::{Manifest, NewPackage, Package, PackageKind, RuntimeSpec};
