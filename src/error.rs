//! Error types for PlugDeck
//!
//! This module defines all error types used by the package lifecycle engine.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.

use thiserror::Error;

/// The primary error type for PlugDeck operations.
#[derive(Error, Debug)]
pub enum DeckError {
    /// Upload rejected (size, MIME type, extension). Holds every failed rule.
    #[error("Validation failed: {}", .0.join(" "))]
    Validation(Vec<String>),

    /// Corrupt archive or path traversal attempt
    #[error("Archive error: {0}")]
    Archive(String),

    /// Archive contents matched the executable denylist
    #[error("Malicious files detected: {}", .0.join(", "))]
    DisallowedFiles(Vec<String>),

    /// Missing manifest, malformed JSON or missing required field
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// Duplicate slug, deleting the active theme, occupied target directory
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Move, copy or delete failure on the package trees
    #[error("Filesystem error: {0}")]
    Filesystem(String),

    /// Plugin service missing or failing during construction or invocation
    #[error("Runtime resolution error: {0}")]
    RuntimeResolution(String),

    /// A plugin's own schema migration failed
    #[error("Migration error: {0}")]
    Migration(String),

    /// A post-activation step failed and the activation was rolled back
    #[error("Failed to activate '{slug}': {source}")]
    ActivationFailed {
        slug: String,
        #[source]
        source: Box<DeckError>,
    },

    /// Resource not found (packages, files, bindings)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Security violations (path traversal attempts, escaping a root)
    #[error("Security violation: {0}")]
    SecurityViolation(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Package database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Low-level ZIP decoding errors
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Classification of a [`DeckError`] into the lifecycle error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Archive,
    Manifest,
    Conflict,
    Filesystem,
    RuntimeResolution,
    Migration,
    NotFound,
    Internal,
}

impl DeckError {
    /// Human-readable messages suitable for surfacing to the caller verbatim.
    ///
    /// Validation errors expand to one message per failed rule so an upload
    /// form can show all of them at once.
    pub fn messages(&self) -> Vec<String> {
        match self {
            DeckError::Validation(errors) => errors.clone(),
            other => vec![other.to_string()],
        }
    }

    /// The taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeckError::Validation(_) => ErrorKind::Validation,
            DeckError::Archive(_) | DeckError::DisallowedFiles(_) | DeckError::Zip(_) => {
                ErrorKind::Archive
            }
            DeckError::SecurityViolation(_) => ErrorKind::Archive,
            DeckError::Manifest(_) => ErrorKind::Manifest,
            DeckError::Conflict(_) => ErrorKind::Conflict,
            DeckError::Filesystem(_) | DeckError::Io(_) => ErrorKind::Filesystem,
            DeckError::RuntimeResolution(_) | DeckError::Http(_) => ErrorKind::RuntimeResolution,
            DeckError::Migration(_) => ErrorKind::Migration,
            DeckError::ActivationFailed { source, .. } => source.kind(),
            DeckError::NotFound(_) => ErrorKind::NotFound,
            DeckError::Config(_) | DeckError::Json(_) | DeckError::Database(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// A specialized `Result` type for PlugDeck operations.
pub type Result<T> = std::result::Result<T, DeckError>;
