//! Package record persistence
//!
//! The [`PackageRepository`] trait is the only way lifecycle code reads or
//! writes package records. The SQLite implementation relies on database
//! constraints for the two global invariants: `UNIQUE(kind, slug)` decides
//! concurrent installs, and a partial unique index admits at most one
//! active theme.

use chrono::{DateTime, Utc};
use rusqlite::{params, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use tracing::debug;

use crate::db::Database;
use crate::error::{DeckError, Result};

use super::types::{Manifest, NewPackage, Package, PackageKind};

/// Storage of package records.
pub trait PackageRepository: Send + Sync {
    /// Persist a new record. A duplicate `(kind, slug)` yields `Conflict`.
    fn insert(&self, package: &NewPackage) -> Result<Package>;

    fn find(&self, kind: PackageKind, id: i64) -> Result<Option<Package>>;

    fn find_by_slug(&self, kind: PackageKind, slug: &str) -> Result<Option<Package>>;

    /// All records of a kind, newest first.
    fn list(&self, kind: PackageKind) -> Result<Vec<Package>>;

    fn list_active(&self, kind: PackageKind) -> Result<Vec<Package>>;

    fn active_theme(&self) -> Result<Option<Package>>;

    /// Set the active flag of one record. `NotFound` if the record is gone.
    fn set_active(&self, kind: PackageKind, id: i64, active: bool) -> Result<()>;

    /// Atomically make `id` the only active record of its kind.
    fn activate_exclusive(&self, kind: PackageKind, id: i64) -> Result<()>;

    fn update_manifest(&self, kind: PackageKind, id: i64, manifest: &Manifest) -> Result<()>;

    /// Remove a record. Returns whether it existed.
    fn delete(&self, kind: PackageKind, id: i64) -> Result<bool>;
}

const COLUMNS: &str = "id, kind, name, slug, version, description, author, file_path, \
    manifest_json, checksum, preview_image, is_active, is_installed, installed_at, \
    created_at, updated_at";

/// SQLite-backed [`PackageRepository`].
#[derive(Debug, Clone)]
pub struct SqlitePackageRepository {
    db: Database,
}

impl SqlitePackageRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn query_many(&self, sql: &str, kind: PackageKind) -> Result<Vec<Package>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params![kind.as_str()], PackageRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(PackageRow::into_package).collect()
    }
}

impl PackageRepository for SqlitePackageRepository {
    fn insert(&self, package: &NewPackage) -> Result<Package> {
        let now = Utc::now();
        let manifest_json = serde_json::to_string(&package.manifest)?;

        let id = {
            let conn = self.db.lock()?;
            let result = conn.execute(
                r#"
                INSERT INTO packages (
                    kind, name, slug, version, description, author, file_path,
                    manifest_json, checksum, preview_image, is_active, is_installed,
                    installed_at, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?12, ?13, ?13)
                "#,
                params![
                    package.kind.as_str(),
                    package.name,
                    package.slug,
                    package.version,
                    package.description,
                    package.author,
                    package.file_path,
                    manifest_json,
                    package.checksum,
                    package.preview_image,
                    package.is_installed,
                    package.installed_at.map(timestamp_to_db),
                    timestamp_to_db(now),
                ],
            );

            match result {
                Ok(_) => conn.last_insert_rowid(),
                Err(e) if is_unique_violation(&e) => {
                    return Err(DeckError::Conflict(format!(
                        "A {} with slug '{}' already exists.",
                        package.kind, package.slug
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        };

        debug!(id, slug = %package.slug, kind = %package.kind, "Inserted package record");
        self.find(package.kind, id)?.ok_or_else(|| {
            DeckError::NotFound(format!("{} #{} vanished after insert", package.kind, id))
        })
    }

    fn find(&self, kind: PackageKind, id: i64) -> Result<Option<Package>> {
        let conn = self.db.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM packages WHERE kind = ?1 AND id = ?2", COLUMNS),
                params![kind.as_str(), id],
                PackageRow::from_row,
            )
            .optional()?;
        row.map(PackageRow::into_package).transpose()
    }

    fn find_by_slug(&self, kind: PackageKind, slug: &str) -> Result<Option<Package>> {
        let conn = self.db.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM packages WHERE kind = ?1 AND slug = ?2", COLUMNS),
                params![kind.as_str(), slug],
                PackageRow::from_row,
            )
            .optional()?;
        row.map(PackageRow::into_package).transpose()
    }

    fn list(&self, kind: PackageKind) -> Result<Vec<Package>> {
        self.query_many(
            &format!(
                "SELECT {} FROM packages WHERE kind = ?1 ORDER BY created_at DESC, id DESC",
                COLUMNS
            ),
            kind,
        )
    }

    fn list_active(&self, kind: PackageKind) -> Result<Vec<Package>> {
        self.query_many(
            &format!(
                "SELECT {} FROM packages WHERE kind = ?1 AND is_active = 1 ORDER BY id",
                COLUMNS
            ),
            kind,
        )
    }

    fn active_theme(&self) -> Result<Option<Package>> {
        Ok(self.list_active(PackageKind::Theme)?.into_iter().next())
    }

    fn set_active(&self, kind: PackageKind, id: i64, active: bool) -> Result<()> {
        let conn = self.db.lock()?;
        let changed = conn.execute(
            "UPDATE packages SET is_active = ?1, updated_at = ?2 WHERE kind = ?3 AND id = ?4",
            params![active, timestamp_to_db(Utc::now()), kind.as_str(), id],
        )?;
        if changed == 0 {
            return Err(DeckError::NotFound(format!("{} #{}", kind, id)));
        }
        Ok(())
    }

    fn activate_exclusive(&self, kind: PackageKind, id: i64) -> Result<()> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = timestamp_to_db(Utc::now());

        // Clear first: the partial index is checked per row.
        tx.execute(
            "UPDATE packages SET is_active = 0, updated_at = ?1 \
             WHERE kind = ?2 AND id != ?3 AND is_active = 1",
            params![now, kind.as_str(), id],
        )?;
        let changed = tx.execute(
            "UPDATE packages SET is_active = 1, updated_at = ?1 WHERE kind = ?2 AND id = ?3",
            params![now, kind.as_str(), id],
        )?;
        if changed == 0 {
            // Dropping the transaction rolls the clear back.
            return Err(DeckError::NotFound(format!("{} #{}", kind, id)));
        }

        tx.commit()?;
        debug!(id, kind = %kind, "Exclusively activated package");
        Ok(())
    }

    fn update_manifest(&self, kind: PackageKind, id: i64, manifest: &Manifest) -> Result<()> {
        let conn = self.db.lock()?;
        let changed = conn.execute(
            "UPDATE packages SET manifest_json = ?1, updated_at = ?2 WHERE kind = ?3 AND id = ?4",
            params![
                serde_json::to_string(manifest)?,
                timestamp_to_db(Utc::now()),
                kind.as_str(),
                id
            ],
        )?;
        if changed == 0 {
            return Err(DeckError::NotFound(format!("{} #{}", kind, id)));
        }
        Ok(())
    }

    fn delete(&self, kind: PackageKind, id: i64) -> Result<bool> {
        let conn = self.db.lock()?;
        let changed = conn.execute(
            "DELETE FROM packages WHERE kind = ?1 AND id = ?2",
            params![kind.as_str(), id],
        )?;
        Ok(changed > 0)
    }
}

/// Raw column values, converted to a [`Package`] outside the row callback.
struct PackageRow {
    id: i64,
    kind: String,
    name: String,
    slug: String,
    version: String,
    description: Option<String>,
    author: Option<String>,
    file_path: String,
    manifest_json: String,
    checksum: Option<String>,
    preview_image: Option<String>,
    is_active: bool,
    is_installed: bool,
    installed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl PackageRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            name: row.get(2)?,
            slug: row.get(3)?,
            version: row.get(4)?,
            description: row.get(5)?,
            author: row.get(6)?,
            file_path: row.get(7)?,
            manifest_json: row.get(8)?,
            checksum: row.get(9)?,
            preview_image: row.get(10)?,
            is_active: row.get(11)?,
            is_installed: row.get(12)?,
            installed_at: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }

    fn into_package(self) -> Result<Package> {
        Ok(Package {
            id: self.id,
            kind: self.kind.parse()?,
            name: self.name,
            slug: self.slug,
            version: self.version,
            description: self.description,
            author: self.author,
            file_path: self.file_path,
            manifest: serde_json::from_str(&self.manifest_json)?,
            is_active: self.is_active,
            is_installed: self.is_installed,
            installed_at: self
                .installed_at
                .as_deref()
                .map(timestamp_from_db)
                .transpose()?,
            preview_image: self.preview_image,
            checksum: self.checksum,
            created_at: timestamp_from_db(&self.created_at)?,
            updated_at: timestamp_from_db(&self.updated_at)?,
        })
    }
}

fn is_unique_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn timestamp_to_db(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn timestamp_from_db(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DeckError::Config(format!("Invalid timestamp '{}' in database: {}", raw, e)))
}
