//! Host wiring: builds the package engine from a [`Config`].

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::packages::{
    ArchiveHandler, Inconsistency, LifecycleManager, Listing, LogCacheInvalidator, Package,
    PackageBrowser, PackageKind, PackageStore, SqlMigrationRunner, SqlitePackageRepository,
};
use crate::runtime::{BootReport, Capability, DataResolver, HttpTransport, ResolvedData, RuntimeRegistry};

/// Result of a consistency check across both package kinds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DoctorReport {
    pub plugins: Vec<Inconsistency>,
    pub themes: Vec<Inconsistency>,
    pub runtime: BootReport,
}

impl DoctorReport {
    pub fn is_healthy(&self) -> bool {
        self.plugins.is_empty() && self.themes.is_empty() && self.runtime.failed.is_empty()
    }
}

/// The assembled package engine.
pub struct PackageHost {
    lifecycle: LifecycleManager,
    registry: Arc<RuntimeRegistry>,
    resolver: DataResolver,
    browser: PackageBrowser,
}

impl PackageHost {
    /// Open the database and storage roots named by `config`.
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;

        let db = Database::open(&config.storage.database)?;
        let store = PackageStore::from_config(&config.storage);
        let archives = ArchiveHandler::new(config.uploads.clone(), store.clone());
        let repo = Arc::new(SqlitePackageRepository::new(db.clone()));
        let migrations = Arc::new(SqlMigrationRunner::new(db));
        let registry = Arc::new(RuntimeRegistry::with_builtins(&config.runtime)?);

        let lifecycle = LifecycleManager::new(archives, store.clone(), repo, migrations)
            .with_invalidator(Arc::new(LogCacheInvalidator))
            .with_invalidator(registry.clone());

        let resolver = DataResolver::new(
            registry.clone(),
            store,
            HttpTransport::from_config(&config.runtime)?,
            config.runtime.app_url.clone(),
        );

        info!(
            private_root = %config.storage.private_root.display(),
            public_root = %config.storage.public_root.display(),
            "Package host ready"
        );

        Ok(Self {
            lifecycle,
            registry,
            resolver,
            browser: PackageBrowser::new(),
        })
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn registry(&self) -> &Arc<RuntimeRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &DataResolver {
        &self.resolver
    }

    /// Bind services for every active plugin.
    pub fn boot(&self) -> Result<BootReport> {
        let plugins = self.lifecycle.list(PackageKind::Plugin)?;
        Ok(self.registry.boot(&plugins))
    }

    /// Capability data for an active plugin, binding its service on demand.
    pub async fn plugin_data(&self, slug: &str, capability: &Capability) -> Result<ResolvedData> {
        let package = self.lifecycle.require_by_slug(PackageKind::Plugin, slug)?;
        if package.is_active && self.registry.resolve(slug).is_none() {
            if let Err(e) = self.registry.bind(&package) {
                warn!(slug = %slug, error = %e, "Failed to resolve plugin service");
            }
        }
        self.resolver.fetch(&package, capability).await
    }

    /// Browse an installed package's files.
    pub fn browse(&self, kind: PackageKind, slug: &str, relative: &str) -> Result<Listing> {
        let package = self.lifecycle.require_by_slug(kind, slug)?;
        let root = self.lifecycle.store().path(&package.file_path)?;
        self.browser.browse(&root, relative)
    }

    /// Reconcile both kinds and report which runtimes resolve.
    pub fn doctor(&self) -> Result<DoctorReport> {
        Ok(DoctorReport {
            plugins: self.lifecycle.reconcile(PackageKind::Plugin)?,
            themes: self.lifecycle.reconcile(PackageKind::Theme)?,
            runtime: self.boot()?,
        })
    }

    pub fn require(&self, kind: PackageKind, slug: &str) -> Result<Package> {
        self.lifecycle.require_by_slug(kind, slug)
    }
}
