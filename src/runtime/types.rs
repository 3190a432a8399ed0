//! Core runtime types: capabilities, plugin services and their factories.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::packages::{Package, RuntimeSpec};

/// A named optional operation a plugin service may implement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    /// `getPluginData`: the plugin's interface data.
    PluginData,
    /// `getDashboardData`: data for the plugin's dashboard.
    DashboardData,
    /// `getStats`: summary statistics.
    Stats,
    /// Any other capability a plugin chooses to advertise.
    Other(String),
}

impl Capability {
    /// The wire name of the capability.
    pub fn name(&self) -> &str {
        match self {
            Capability::PluginData => "getPluginData",
            Capability::DashboardData => "getDashboardData",
            Capability::Stats => "getStats",
            Capability::Other(name) => name,
        }
    }

    /// Parse a capability name. Unknown names become [`Capability::Other`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "getPluginData" => Capability::PluginData,
            "getDashboardData" => Capability::DashboardData,
            "getStats" => Capability::Stats,
            other => Capability::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A plugin's runtime object.
///
/// Every capability is optional; callers must [`supports`](Self::supports)
/// before invoking.
#[async_trait]
pub trait PluginService: Send + Sync {
    /// Capabilities this service implements.
    fn capabilities(&self) -> Vec<Capability>;

    fn supports(&self, capability: &Capability) -> bool {
        self.capabilities().contains(capability)
    }

    /// Invoke a capability. Results are JSON mappings.
    async fn invoke(&self, capability: &Capability, args: Value) -> Result<Value>;
}

/// Builds a plugin service from a package's `runtime` declaration.
///
/// Factories are registered under the entry identifier that manifests name
/// in `runtime.entry`.
pub trait ServiceFactory: Send + Sync {
    fn create(&self, package: &Package, spec: &RuntimeSpec) -> Result<Arc<dyn PluginService>>;
}

/// A service bound to a package slug.
#[derive(Clone)]
pub struct RuntimeHandle {
    slug: String,
    entry: String,
    service: Arc<dyn PluginService>,
}

impl RuntimeHandle {
    pub fn new(slug: impl Into<String>, entry: impl Into<String>, service: Arc<dyn PluginService>) -> Self {
        Self {
            slug: slug.into(),
            entry: entry.into(),
            service,
        }
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// The factory identifier that produced this service.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn service(&self) -> &Arc<dyn PluginService> {
        &self.service
    }
}

impl fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("slug", &self.slug)
            .field("entry", &self.entry)
            .field("capabilities", &self.service.capabilities())
            .finish()
    }
}
