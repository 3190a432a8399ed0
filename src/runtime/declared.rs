//! Services whose capability payloads are declared in the manifest.
//!
//! ```json
//! "runtime": {
//!   "entry": "declared",
//!   "data": { "getPluginData": { "greeting": "Hello!" } }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{DeckError, Result};
use crate::packages::{Package, RuntimeSpec};

use super::types::{Capability, PluginService, ServiceFactory};

/// Returns static payloads keyed by capability name.
#[derive(Debug, Clone)]
pub struct DeclaredDataService {
    slug: String,
    data: Map<String, Value>,
    capabilities: Vec<Capability>,
}

impl DeclaredDataService {
    /// Advertised capabilities default to the keys of `data`.
    pub fn new(slug: impl Into<String>, data: Map<String, Value>, capabilities: &[String]) -> Self {
        let capabilities = if capabilities.is_empty() {
            data.keys().map(|k| Capability::from_name(k)).collect()
        } else {
            capabilities.iter().map(|c| Capability::from_name(c)).collect()
        };
        Self {
            slug: slug.into(),
            data,
            capabilities,
        }
    }
}

#[async_trait]
impl PluginService for DeclaredDataService {
    fn capabilities(&self) -> Vec<Capability> {
        self.capabilities.clone()
    }

    async fn invoke(&self, capability: &Capability, _args: Value) -> Result<Value> {
        self.data.get(capability.name()).cloned().ok_or_else(|| {
            DeckError::RuntimeResolution(format!(
                "Plugin '{}' declares no data for {}",
                self.slug, capability
            ))
        })
    }
}

/// Builds [`DeclaredDataService`]s for `"entry": "declared"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclaredServiceFactory;

impl ServiceFactory for DeclaredServiceFactory {
    fn create(&self, package: &Package, spec: &RuntimeSpec) -> Result<Arc<dyn PluginService>> {
        Ok(Arc::new(DeclaredDataService::new(
            package.slug.clone(),
            spec.data.clone(),
            &spec.capabilities,
        )))
    }
}
