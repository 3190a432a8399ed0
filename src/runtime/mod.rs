//! Plugin runtime for PlugDeck
//!
//! Active plugins may declare a `runtime` section naming the factory that
//! builds their service:
//! - `declared`: capability payloads written into the manifest
//! - `http`: an out-of-process service reached over HTTP
//!
//! [`RuntimeRegistry`] binds services at boot, and [`DataResolver`] answers
//! capability requests with a fallback chain when a plugin has no service.

pub mod declared;
pub mod fallback;
pub mod http;
pub mod registry;
pub mod types;

pub use declared::{DeclaredDataService, DeclaredServiceFactory};
pub use fallback::{DataResolver, ResolutionMethod, ResolvedData};
pub use http::{HttpPluginService, HttpServiceFactory, HttpTransport};
pub use registry::{BootReport, RuntimeRegistry};
pub use types::{Capability, PluginService, RuntimeHandle, ServiceFactory};
