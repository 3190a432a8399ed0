//! Plugin-owned schema migrations
//!
//! A plugin may ship `database/migrations/*.sql`. Files run in name order,
//! each inside its own transaction, and are recorded in
//! `package_migrations` under the plugin's slug so plugin history never
//! mixes with the host's own schema.

use std::fs;
use std::path::Path;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info};

use crate::db::Database;
use crate::error::{DeckError, Result};

/// Location of migrations inside a plugin package.
pub const MIGRATIONS_DIR: &str = "database/migrations";

/// Runs a package's migrations.
#[cfg_attr(test, mockall::automock)]
pub trait MigrationRunner: Send + Sync {
    /// Apply pending migrations for `slug` found under `package_root`.
    /// Returns the names of the migrations applied by this call.
    fn run(&self, slug: &str, package_root: &Path) -> Result<Vec<String>>;
}

/// Runs `.sql` migrations against the host database.
#[derive(Debug, Clone)]
pub struct SqlMigrationRunner {
    db: Database,
}

impl SqlMigrationRunner {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Migrations already recorded for a package.
    pub fn applied(&self, slug: &str) -> Result<Vec<String>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT migration FROM package_migrations WHERE package_slug = ?1 ORDER BY migration",
        )?;
        let names = stmt
            .query_map(params![slug], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }

    fn pending_files(dir: &Path) -> Result<Vec<(String, std::path::PathBuf)>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            if !name.to_lowercase().ends_with(".sql") {
                debug!(file = %name, "Ignoring non-SQL migration file");
                continue;
            }
            files.push((name, path));
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files)
    }
}

impl MigrationRunner for SqlMigrationRunner {
    fn run(&self, slug: &str, package_root: &Path) -> Result<Vec<String>> {
        let dir = package_root.join(MIGRATIONS_DIR);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut applied = Vec::new();
        for (name, path) in Self::pending_files(&dir)? {
            let sql = fs::read_to_string(&path).map_err(|e| {
                DeckError::Migration(format!("Failed to read migration {}: {}", name, e))
            })?;

            let mut conn = self.db.lock()?;
            let already: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM package_migrations WHERE package_slug = ?1 AND migration = ?2",
                    params![slug, name],
                    |row| row.get(0),
                )
                .optional()?;
            if already.is_some() {
                continue;
            }

            let tx = conn.transaction()?;
            tx.execute_batch(&sql).map_err(|e| {
                DeckError::Migration(format!("Migration {} of '{}' failed: {}", name, slug, e))
            })?;
            tx.execute(
                "INSERT INTO package_migrations (package_slug, migration, applied_at) VALUES (?1, ?2, ?3)",
                params![slug, name, Utc::now().to_rfc3339()],
            )?;
            tx.commit()?;

            info!(slug = %slug, migration = %name, "Applied plugin migration");
            applied.push(name);
        }

        Ok(applied)
    }
}
