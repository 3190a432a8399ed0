//! HTTP-backed plugin services.
//!
//! A plugin declaring
//!
//! ```json
//! "runtime": { "entry": "http", "endpoint": "http://127.0.0.1:9300", "capabilities": ["getStats"] }
//! ```
//!
//! runs out of process. Invoking a capability sends
//! `POST {endpoint}/capabilities/{name}` with the arguments as the JSON body
//! and expects a JSON mapping back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::error::{DeckError, Result};
use crate::packages::{Package, RuntimeSpec};

use super::types::{Capability, PluginService, ServiceFactory};

const USER_AGENT: &str = concat!("plugdeck/", env!("CARGO_PKG_VERSION"));

/// Base delay between retries; doubles on each attempt.
const RETRY_BASE_DELAY_MS: u64 = 100;

/// Upper bound for a single retry delay.
const RETRY_MAX_DELAY_MS: u64 = 10_000;

fn retry_delay(attempt: u32) -> Duration {
    let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(
        RETRY_BASE_DELAY_MS
            .saturating_mul(factor)
            .min(RETRY_MAX_DELAY_MS),
    )
}

/// JSON-over-HTTP client with a timeout and bounded retries.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    retries: u32,
}

impl HttpTransport {
    pub fn new(timeout: Duration, retries: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, retries })
    }

    pub fn from_config(config: &RuntimeConfig) -> Result<Self> {
        Self::new(
            Duration::from_secs(config.http_timeout_secs),
            config.http_retries,
        )
    }

    /// GET a JSON document.
    pub async fn get_json(&self, url: &str) -> Result<Value> {
        self.send(url, || self.client.get(url)).await
    }

    /// POST a JSON body and read a JSON response.
    pub async fn post_json(&self, url: &str, body: &Value) -> Result<Value> {
        self.send(url, || self.client.post(url).json(body)).await
    }

    async fn send<F>(&self, url: &str, build: F) -> Result<Value>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let outcome = match build().send().await {
                Ok(response) if response.status().is_success() => {
                    return Ok(response.json::<Value>().await?);
                }
                Ok(response) if response.status().is_server_error() => {
                    Err(DeckError::RuntimeResolution(format!(
                        "{} returned {}",
                        url,
                        response.status()
                    )))
                }
                Ok(response) => {
                    return Err(DeckError::RuntimeResolution(format!(
                        "{} returned {}",
                        url,
                        response.status()
                    )));
                }
                Err(e) => Err(DeckError::from(e)),
            };

            if attempt >= self.retries {
                return outcome;
            }

            let delay = retry_delay(attempt);
            if let Err(e) = &outcome {
                warn!(url = %url, attempt = attempt + 1, delay_ms = ?delay, error = %e, "HTTP request failed, retrying");
            }
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// A plugin service reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPluginService {
    transport: HttpTransport,
    endpoint: Url,
    capabilities: Vec<Capability>,
}

impl HttpPluginService {
    pub fn new(transport: HttpTransport, endpoint: Url, capabilities: Vec<Capability>) -> Self {
        Self {
            transport,
            endpoint,
            capabilities,
        }
    }

    fn capability_url(&self, capability: &Capability) -> String {
        format!(
            "{}/capabilities/{}",
            self.endpoint.as_str().trim_end_matches('/'),
            capability.name()
        )
    }
}

#[async_trait]
impl PluginService for HttpPluginService {
    fn capabilities(&self) -> Vec<Capability> {
        self.capabilities.clone()
    }

    async fn invoke(&self, capability: &Capability, args: Value) -> Result<Value> {
        let url = self.capability_url(capability);
        debug!(url = %url, "Invoking plugin capability");
        self.transport.post_json(&url, &args).await
    }
}

/// Builds [`HttpPluginService`]s for `"entry": "http"`.
#[derive(Debug, Clone)]
pub struct HttpServiceFactory {
    transport: HttpTransport,
    config: RuntimeConfig,
}

impl HttpServiceFactory {
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        Ok(Self {
            transport: HttpTransport::from_config(&config)?,
            config,
        })
    }
}

impl ServiceFactory for HttpServiceFactory {
    fn create(&self, package: &Package, spec: &RuntimeSpec) -> Result<Arc<dyn PluginService>> {
        let endpoint = spec.endpoint.as_deref().ok_or_else(|| {
            DeckError::RuntimeResolution(format!(
                "Plugin '{}' declares an http runtime without an endpoint",
                package.slug
            ))
        })?;

        let url = Url::parse(endpoint).map_err(|e| {
            DeckError::RuntimeResolution(format!(
                "Plugin '{}' has an invalid endpoint '{}': {}",
                package.slug, endpoint, e
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DeckError::RuntimeResolution(format!(
                "Plugin '{}' endpoint must be http or https",
                package.slug
            )));
        }

        let transport = match spec.timeout_secs {
            Some(secs) => HttpTransport::new(Duration::from_secs(secs), self.config.http_retries)?,
            None => self.transport.clone(),
        };

        let capabilities = spec
            .capabilities
            .iter()
            .map(|name| Capability::from_name(name))
            .collect();

        Ok(Arc::new(HttpPluginService::new(transport, url, capabilities)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::packages::{Manifest, PackageKind};
    use chrono::Utc;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response per connection, `count` times.
    /// Returns the base URL.
    pub(crate) async fn serve(status: u16, body: &'static str, count: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            for _ in 0..count {
                let (mut socket, _) = listener.accept().await.unwrap();
                read_request(&mut socket).await;
                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });

        format!("http://{}", addr)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_lowercase();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    /// An address nothing listens on.
    pub(crate) async fn dead_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }

    fn package(runtime: Value) -> Package {
        Package {
            id: 1,
            kind: PackageKind::Plugin,
            name: "Remote".to_string(),
            slug: "remote".to_string(),
            version: "1.0.0".to_string(),
            description: None,
            author: None,
            file_path: "plugins/remote".to_string(),
            manifest: Manifest::from_value(json!({
                "name": "Remote", "slug": "remote", "version": "1.0.0", "runtime": runtime
            }))
            .unwrap(),
            is_active: true,
            is_installed: true,
            installed_at: Some(Utc::now()),
            preview_image: None,
            checksum: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn transport() -> HttpTransport {
        HttpTransport::new(Duration::from_secs(2), 1).unwrap()
    }

    #[tokio::test]
    async fn test_get_json() {
        let url = serve(200, r#"{"data": {"count": 3}}"#, 1).await;
        let value = transport().get_json(&url).await.unwrap();
        assert_eq!(value, json!({"data": {"count": 3}}));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let url = serve(404, r#"{"error": "missing"}"#, 1).await;
        let err = transport().get_json(&url).await.unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let url = serve(503, r#"{}"#, 2).await;
        let err = transport().get_json(&url).await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_connection_failure() {
        let url = dead_url().await;
        assert!(transport().get_json(&url).await.is_err());
    }

    #[tokio::test]
    async fn test_service_invokes_capability_endpoint() {
        let base = serve(200, r#"{"visits": 42}"#, 1).await;
        let factory = HttpServiceFactory::new(RuntimeConfig::default()).unwrap();
        let spec = RuntimeSpec {
            entry: "http".to_string(),
            endpoint: Some(base),
            capabilities: vec!["getStats".to_string()],
            data: Default::default(),
            timeout_secs: Some(2),
        };

        let service = factory.create(&package(json!(null)), &spec).unwrap();
        assert!(service.supports(&Capability::Stats));
        assert!(!service.supports(&Capability::PluginData));

        let stats = service
            .invoke(&Capability::Stats, json!({"period": "week"}))
            .await
            .unwrap();
        assert_eq!(stats, json!({"visits": 42}));
    }

    #[test]
    fn test_factory_rejects_bad_endpoints() {
        let factory = HttpServiceFactory::new(RuntimeConfig::default()).unwrap();
        let mut spec = RuntimeSpec {
            entry: "http".to_string(),
            endpoint: None,
            capabilities: vec![],
            data: Default::default(),
            timeout_secs: None,
        };
        let pkg = package(json!(null));

        assert!(factory.create(&pkg, &spec).is_err());
        spec.endpoint = Some("not a url".to_string());
        assert!(factory.create(&pkg, &spec).is_err());
        spec.endpoint = Some("file:///etc/passwd".to_string());
        assert!(factory.create(&pkg, &spec).is_err());
    }

    #[test]
    fn test_retry_delay_doubles_up_to_cap() {
        assert_eq!(retry_delay(0), Duration::from_millis(100));
        assert_eq!(retry_delay(3), Duration::from_millis(800));
        assert_eq!(retry_delay(7), Duration::from_millis(10_000));
        assert_eq!(retry_delay(57), Duration::from_millis(10_000));
        assert_eq!(retry_delay(u32::MAX), Duration::from_millis(10_000));
    }

    #[test]
    fn test_capability_url() {
        let service = HttpPluginService::new(
            transport(),
            Url::parse("http://127.0.0.1:9300/").unwrap(),
            vec![Capability::PluginData],
        );
        assert_eq!(
            service.capability_url(&Capability::PluginData),
            "http://127.0.0.1:9300/capabilities/getPluginData"
        );
    }
}
