//! PlugDeck - plugin and theme package lifecycle engine

pub mod config;
pub mod db;
pub mod error;
pub mod host;
pub mod packages;
pub mod runtime;
pub mod security;

pub use config::Config;
pub use error::{DeckError, ErrorKind, Result};
pub use host::{DoctorReport, PackageHost};
pub use packages::{LifecycleManager, Package, PackageKind, UploadedFile};
pub use runtime::{Capability, DataResolver, ResolvedData, RuntimeRegistry};
