//! Capability data resolution with fallbacks.
//!
//! Plugins are not required to implement any capability, but the host
//! always needs something to render. [`DataResolver::fetch`] tries, in
//! order:
//!
//! 1. the bound plugin service
//! 2. the plugin's own data API on the host (`api` in the manifest)
//! 3. data derived from the installed manifest and `config/*.json`
//! 4. a synthesized placeholder
//!
//! Every result carries a `method` key naming the strategy that produced it.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use rand::seq::SliceRandom;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::error::{DeckError, Result};
use crate::packages::{Package, PackageStore};

use super::http::HttpTransport;
use super::registry::RuntimeRegistry;
use super::types::Capability;

/// Package paths reported in the placeholder's `structure` map.
const STRUCTURE_PATHS: [(&str, &str); 10] = [
    ("routes", "routes"),
    ("web_routes", "routes/web.json"),
    ("api_routes", "routes/api.json"),
    ("migrations", "database/migrations"),
    ("views", "resources/views"),
    ("assets", "resources/assets"),
    ("models", "src/models"),
    ("services", "src/services"),
    ("providers", "src/providers"),
    ("controllers", "src/controllers"),
];

/// Which strategy produced a [`ResolvedData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    Service,
    ServiceStats,
    Api,
    Config,
    Fallback,
}

impl ResolutionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionMethod::Service => "service",
            ResolutionMethod::ServiceStats => "service_stats",
            ResolutionMethod::Api => "api",
            ResolutionMethod::Config => "config",
            ResolutionMethod::Fallback => "fallback",
        }
    }
}

/// Capability data plus the strategy that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedData {
    pub method: ResolutionMethod,
    /// Always contains a `method` key.
    pub data: Map<String, Value>,
}

impl ResolvedData {
    fn new(method: ResolutionMethod, mut data: Map<String, Value>) -> Self {
        data.insert("method".to_string(), Value::String(method.as_str().to_string()));
        Self { method, data }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.data)
    }
}

/// Resolves capability data for active plugins.
pub struct DataResolver {
    registry: Arc<RuntimeRegistry>,
    store: PackageStore,
    transport: HttpTransport,
    app_url: Option<String>,
}

impl DataResolver {
    pub fn new(
        registry: Arc<RuntimeRegistry>,
        store: PackageStore,
        transport: HttpTransport,
        app_url: Option<String>,
    ) -> Self {
        Self {
            registry,
            store,
            transport,
            app_url,
        }
    }

    /// Resolve `capability` for an active plugin.
    pub async fn fetch(&self, package: &Package, capability: &Capability) -> Result<ResolvedData> {
        if !package.is_plugin() {
            return Err(DeckError::RuntimeResolution(format!(
                "'{}' is a {}, not a plugin",
                package.slug, package.kind
            )));
        }
        if !package.is_active {
            return Err(DeckError::Conflict(format!(
                "Plugin '{}' is not active",
                package.slug
            )));
        }

        if let Some(resolved) = self.from_service(package, capability).await {
            return Ok(resolved);
        }
        if let Some(resolved) = self.from_api(package).await {
            return Ok(resolved);
        }
        if let Some(resolved) = self.from_config(package) {
            return Ok(resolved);
        }
        Ok(self.placeholder(package, capability))
    }

    async fn from_service(&self, package: &Package, capability: &Capability) -> Option<ResolvedData> {
        let handle = self.registry.resolve(&package.slug)?;

        if self.registry.probe(&handle, capability) {
            match self.registry.invoke(&handle, capability, Value::Null).await {
                Ok(Value::Object(map)) if !map.is_empty() => {
                    return Some(ResolvedData::new(ResolutionMethod::Service, map));
                }
                Ok(_) => debug!(slug = %package.slug, %capability, "Service returned no data"),
                Err(e) => warn!(slug = %package.slug, %capability, error = %e, "Service call failed"),
            }
            return None;
        }

        // Dashboards can be built from stats alone.
        if *capability == Capability::DashboardData && self.registry.probe(&handle, &Capability::Stats) {
            match self.registry.invoke(&handle, &Capability::Stats, Value::Null).await {
                Ok(stats) => {
                    let mut data = Map::new();
                    data.insert(
                        "message".to_string(),
                        Value::String(format!("{} Dashboard", package.name)),
                    );
                    data.insert("stats".to_string(), stats);
                    return Some(ResolvedData::new(ResolutionMethod::ServiceStats, data));
                }
                Err(e) => warn!(slug = %package.slug, error = %e, "Stats call failed"),
            }
        }

        None
    }

    async fn from_api(&self, package: &Package) -> Option<ResolvedData> {
        let path = package.manifest.api_data_path()?;
        let base = self.app_url.as_deref()?;
        let url = format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'));

        match self.transport.get_json(&url).await {
            Ok(Value::Object(mut body)) => {
                let data = match body.remove("data") {
                    Some(Value::Object(inner)) => inner,
                    Some(other) => {
                        let mut wrapped = Map::new();
                        wrapped.insert("data".to_string(), other);
                        wrapped
                    }
                    None => body,
                };
                if data.is_empty() {
                    return None;
                }
                Some(ResolvedData::new(ResolutionMethod::Api, data))
            }
            Ok(_) => {
                debug!(url = %url, "Plugin API returned a non-object body");
                None
            }
            Err(e) => {
                warn!(slug = %package.slug, url = %url, error = %e, "Plugin API call failed");
                None
            }
        }
    }

    fn from_config(&self, package: &Package) -> Option<ResolvedData> {
        let info = self.store.installed_manifest(package.kind, &package.file_path);
        if info.is_empty() {
            return None;
        }

        let field = |key: &str, fallback: Value| info.get(key).cloned().unwrap_or(fallback);
        let mut data = Map::new();
        data.insert("name".to_string(), field("name", json!(package.name)));
        data.insert("version".to_string(), field("version", json!(package.version)));
        data.insert(
            "description".to_string(),
            field("description", json!(package.description)),
        );
        data.insert("features".to_string(), field("features", json!([])));

        let configs = self.read_config_dir(package);
        for config in configs.values() {
            if let Some(greeting) = config
                .get("greetings")
                .and_then(Value::as_array)
                .and_then(|g| g.choose(&mut rand::thread_rng()))
            {
                data.insert("random_greeting".to_string(), greeting.clone());
            }
            if let Some(features) = config.get("features") {
                data.insert("available_features".to_string(), features.clone());
            }
        }
        if !configs.is_empty() {
            data.insert("configuration".to_string(), Value::Object(configs));
        }

        Some(ResolvedData::new(ResolutionMethod::Config, data))
    }

    /// `config/*.json`, keyed by file stem. Unreadable files are skipped.
    fn read_config_dir(&self, package: &Package) -> Map<String, Value> {
        let mut configs = Map::new();
        let Ok(dir) = self.store.path_within(&package.file_path, "config") else {
            return configs;
        };
        let Ok(entries) = fs::read_dir(dir.as_path()) else {
            return configs;
        };

        let mut files: Vec<_> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        files.sort();

        for path in files {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            match read_json_object(&path) {
                Ok(config) => {
                    configs.insert(stem, Value::Object(config));
                }
                Err(e) => {
                    warn!(slug = %package.slug, file = %path.display(), error = %e, "Skipping plugin config file")
                }
            }
        }
        configs
    }

    fn placeholder(&self, package: &Package, capability: &Capability) -> ResolvedData {
        let root = self.store.path(&package.file_path).ok();

        let mut structure = Map::new();
        for (key, relative) in STRUCTURE_PATHS {
            let available = root
                .as_ref()
                .map(|r| r.join(relative).exists())
                .unwrap_or(false);
            structure.insert(
                key.to_string(),
                Value::String(if available { "Available" } else { "Not Available" }.to_string()),
            );
        }

        let title = match capability {
            Capability::DashboardData => "Dashboard",
            _ => "Interface",
        };

        let mut data = Map::new();
        data.insert(
            "message".to_string(),
            Value::String(format!("{} {}", package.name, title)),
        );
        data.insert(
            "status".to_string(),
            Value::String(if package.is_active { "active" } else { "inactive" }.to_string()),
        );
        data.insert("version".to_string(), Value::String(package.version.clone()));
        data.insert("features".to_string(), package.manifest.features());
        data.insert("structure".to_string(), Value::Object(structure));
        data.insert(
            "generated_at".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );

        ResolvedData::new(ResolutionMethod::Fallback, data)
    }
}

fn read_json_object(path: &Path) -> Result<Map<String, Value>> {
    let content = fs::read_to_string(path)?;
    match serde_json::from_str(&content)? {
        Value::Object(map) => Ok(map),
        _ => Err(DeckError::Manifest(format!(
            "{} is not a JSON object",
            path.display()
        ))),
    }
}
