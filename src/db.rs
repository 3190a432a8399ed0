//! Shared SQLite handle for package records and plugin migration history.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use tracing::debug;

use crate::error::{DeckError, Result};

/// A cloneable handle to the host database.
///
/// The repository and the migration runner share one connection so that
/// plugin migrations and package records live in the same database file.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Open (or create) the database at `path` and ensure the host schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DeckError::Config(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        debug!(path = %path.display(), "Opened package database");
        Self::from_connection(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize_schema()?;
        Ok(db)
    }

    /// Lock the underlying connection.
    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DeckError::Config("Database lock poisoned".to_string()))
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS packages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL CHECK(kind IN ('plugin', 'theme')),
                name TEXT NOT NULL,
                slug TEXT NOT NULL,
                version TEXT NOT NULL,
                description TEXT NULL,
                author TEXT NULL,
                file_path TEXT NOT NULL,
                manifest_json TEXT NOT NULL,
                checksum TEXT NULL,
                preview_image TEXT NULL,
                is_active INTEGER NOT NULL DEFAULT 0,
                is_installed INTEGER NOT NULL DEFAULT 0,
                installed_at TEXT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(kind, slug)
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_packages_single_active_theme
                ON packages (kind) WHERE kind = 'theme' AND is_active = 1;

            CREATE INDEX IF NOT EXISTS idx_packages_active ON packages (kind, is_active);

            CREATE TABLE IF NOT EXISTS package_migrations (
                package_slug TEXT NOT NULL,
                migration TEXT NOT NULL,
                applied_at TEXT NOT NULL,
                PRIMARY KEY (package_slug, migration)
            );
            "#,
        )?;
        Ok(())
    }
}
