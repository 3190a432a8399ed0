//! Runtime registry: binds active plugins' services under their slugs.
//!
//! Each active plugin whose manifest declares `runtime.entry` is resolved
//! through the factory registered for that entry. Resolution failures are
//! isolated per package: a broken plugin is reported and skipped, and
//! every other plugin still binds.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::error::{DeckError, Result};
use crate::packages::{CacheInvalidator, Package};

use super::declared::DeclaredServiceFactory;
use super::http::HttpServiceFactory;
use super::types::{Capability, RuntimeHandle, ServiceFactory};

/// Outcome of a boot pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BootReport {
    /// Slugs bound to a service.
    pub bound: Vec<String>,
    /// Active plugins without a runtime declaration.
    pub skipped: Vec<String>,
    /// `(slug, reason)` for plugins whose service could not be built.
    pub failed: Vec<(String, String)>,
}

/// Registry of service factories and slug bindings.
#[derive(Default)]
pub struct RuntimeRegistry {
    factories: RwLock<HashMap<String, Arc<dyn ServiceFactory>>>,
    bindings: RwLock<HashMap<String, RuntimeHandle>>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the `http` and `declared` factories registered.
    pub fn with_builtins(config: &RuntimeConfig) -> Result<Self> {
        let registry = Self::new();
        registry.register_factory("http", Arc::new(HttpServiceFactory::new(config.clone())?));
        registry.register_factory("declared", Arc::new(DeclaredServiceFactory));
        Ok(registry)
    }

    /// Register a factory under an entry identifier, replacing any previous one.
    pub fn register_factory(&self, entry: &str, factory: Arc<dyn ServiceFactory>) {
        if self
            .factories_mut()
            .insert(entry.to_string(), factory)
            .is_some()
        {
            warn!(entry = %entry, "Replaced existing service factory");
        }
    }

    pub fn has_factory(&self, entry: &str) -> bool {
        self.factories().contains_key(entry)
    }

    /// Resolve and bind every active plugin in `packages`.
    pub fn boot(&self, packages: &[Package]) -> BootReport {
        let mut report = BootReport::default();

        for package in packages.iter().filter(|p| p.is_plugin() && p.is_active) {
            match self.bind(package) {
                Ok(true) => report.bound.push(package.slug.clone()),
                Ok(false) => report.skipped.push(package.slug.clone()),
                Err(e) => {
                    warn!(slug = %package.slug, error = %e, "Failed to resolve plugin service");
                    report.failed.push((package.slug.clone(), e.to_string()));
                }
            }
        }

        info!(
            bound = report.bound.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Runtime boot complete"
        );
        report
    }

    /// Bind a single package. Returns `false` when it declares no runtime.
    pub fn bind(&self, package: &Package) -> Result<bool> {
        let Some(spec) = package.manifest.runtime()? else {
            debug!(slug = %package.slug, "No runtime declared");
            return Ok(false);
        };

        let factory = self.factories().get(&spec.entry).cloned().ok_or_else(|| {
            DeckError::RuntimeResolution(format!(
                "No service factory registered for entry '{}'",
                spec.entry
            ))
        })?;

        let service = factory.create(package, &spec)?;
        let handle = RuntimeHandle::new(package.slug.clone(), spec.entry.clone(), service);
        self.bindings_mut().insert(package.slug.clone(), handle);
        debug!(slug = %package.slug, entry = %spec.entry, "Bound plugin service");
        Ok(true)
    }

    pub fn resolve(&self, slug: &str) -> Option<RuntimeHandle> {
        self.bindings().get(slug).cloned()
    }

    /// Whether the bound service implements `capability`.
    pub fn probe(&self, handle: &RuntimeHandle, capability: &Capability) -> bool {
        handle.service().supports(capability)
    }

    /// Invoke a capability after probing for it.
    pub async fn invoke(
        &self,
        handle: &RuntimeHandle,
        capability: &Capability,
        args: Value,
    ) -> Result<Value> {
        if !self.probe(handle, capability) {
            return Err(DeckError::RuntimeResolution(format!(
                "Plugin '{}' does not implement {}",
                handle.slug(),
                capability
            )));
        }
        handle.service().invoke(capability, args).await
    }

    /// Remove a binding. Returns whether one existed.
    pub fn unbind(&self, slug: &str) -> bool {
        self.bindings_mut().remove(slug).is_some()
    }

    /// Drop every binding; the next boot re-resolves from scratch.
    pub fn clear(&self) {
        self.bindings_mut().clear();
    }

    pub fn bound_slugs(&self) -> Vec<String> {
        let mut slugs: Vec<String> = self.bindings().keys().cloned().collect();
        slugs.sort();
        slugs
    }

    fn factories(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<dyn ServiceFactory>>> {
        self.factories.read().unwrap_or_else(|e| e.into_inner())
    }

    fn factories_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<dyn ServiceFactory>>> {
        self.factories.write().unwrap_or_else(|e| e.into_inner())
    }

    fn bindings(&self) -> RwLockReadGuard<'_, HashMap<String, RuntimeHandle>> {
        self.bindings.read().unwrap_or_else(|e| e.into_inner())
    }

    fn bindings_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, RuntimeHandle>> {
        self.bindings.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl CacheInvalidator for RuntimeRegistry {
    fn invalidate(&self, reason: &str) -> Result<()> {
        let dropped = self.bindings().len();
        self.clear();
        debug!(reason = %reason, dropped, "Dropped runtime bindings");
        Ok(())
    }
}
