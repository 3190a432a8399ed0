//! ZIP upload handling
//!
//! Validates uploaded archives, stores them under a random name, extracts
//! them into scratch space and scans the result for executable payloads.
//! Nothing here touches the public root.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;
use zip::ZipArchive;

use crate::config::UploadConfig;
use crate::error::{DeckError, Result};
use crate::security::contains_traversal_pattern;

use super::store::PackageStore;
use super::types::PackageKind;

/// An uploaded file as received from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Where the upload currently sits on disk.
    pub path: PathBuf,
    /// Client-supplied file name. Only its extension is ever consulted.
    pub original_name: String,
    pub size: u64,
}

impl UploadedFile {
    /// Describe a local file, taking the name and size from the filesystem.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let metadata = fs::metadata(&path).map_err(|e| {
            DeckError::Validation(vec![format!("Cannot read upload {}: {}", path.display(), e)])
        })?;
        let original_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            path,
            original_name,
            size: metadata.len(),
        })
    }
}

/// Detect the MIME type of an archive from its magic bytes.
///
/// Returns `None` for anything that is not a ZIP container.
pub fn sniff_mime(path: &Path) -> Option<&'static str> {
    let mut header = [0u8; 4];
    let mut file = File::open(path).ok()?;
    file.read_exact(&mut header).ok()?;

    match header {
        [b'P', b'K', 0x03, 0x04] | [b'P', b'K', 0x05, 0x06] | [b'P', b'K', 0x07, 0x08] => {
            Some("application/zip")
        }
        _ => None,
    }
}

/// Validates, stores, extracts and scans uploaded package archives.
#[derive(Debug, Clone)]
pub struct ArchiveHandler {
    config: UploadConfig,
    store: PackageStore,
}

impl ArchiveHandler {
    pub fn new(config: UploadConfig, store: PackageStore) -> Self {
        Self { config, store }
    }

    /// Check size, content type and extension. Every failed rule is reported.
    pub fn validate(&self, file: &UploadedFile) -> Vec<String> {
        let mut errors = Vec::new();

        if file.size > self.config.max_size_bytes {
            errors.push(format!(
                "File size exceeds {}MB limit.",
                self.config.max_size_bytes / (1024 * 1024)
            ));
        }

        let mime_ok = sniff_mime(&file.path)
            .map(|mime| self.config.allowed_mime_types.iter().any(|m| m == mime))
            .unwrap_or(false);
        if !mime_ok {
            errors.push("Only ZIP files are allowed.".to_string());
        }

        if !file.original_name.to_lowercase().ends_with(".zip") {
            errors.push("File must have .zip extension.".to_string());
        }

        errors
    }

    /// Copy the upload to `<private>/uploads/<kind>/<uuid>.zip`.
    pub fn store(&self, file: &UploadedFile, kind: PackageKind) -> Result<PathBuf> {
        let dir = self.store.uploads_dir(kind);
        fs::create_dir_all(&dir).map_err(|e| {
            DeckError::Filesystem(format!("Failed to create {}: {}", dir.display(), e))
        })?;

        let dest = dir.join(format!("{}.zip", Uuid::new_v4()));
        fs::copy(&file.path, &dest).map_err(|e| {
            DeckError::Filesystem(format!("Failed to store upload: {}", e))
        })?;

        debug!(archive = %dest.display(), "Stored uploaded archive");
        Ok(dest)
    }

    /// Extract `archive` into `dest`.
    ///
    /// Every entry name is checked before anything is written: a single
    /// traversal sequence rejects the whole archive. The declared
    /// uncompressed size is also bounded. Symlink entries are skipped.
    pub fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        let file = File::open(archive).map_err(|e| {
            DeckError::Archive(format!("Failed to open archive: {}", e))
        })?;
        let mut zip = ZipArchive::new(BufReader::new(file))
            .map_err(|e| DeckError::Archive(format!("Failed to open archive: {}", e)))?;

        let mut declared: u64 = 0;
        for i in 0..zip.len() {
            let entry = zip.by_index_raw(i)?;
            let name = entry.name();
            if contains_traversal_pattern(name) || entry.enclosed_name().is_none() {
                warn!(entry = %name, "Rejected archive with traversal entry");
                return Err(DeckError::Archive(format!(
                    "Archive entry '{}' contains an invalid path",
                    name
                )));
            }
            declared = declared.saturating_add(entry.size());
        }

        let limit = self.config.max_extracted_bytes;
        if declared > limit {
            return Err(DeckError::Archive(format!(
                "Archive expands to {} bytes, exceeding the {} byte limit",
                declared, limit
            )));
        }

        fs::create_dir_all(dest).map_err(|e| {
            DeckError::Filesystem(format!("Failed to create {}: {}", dest.display(), e))
        })?;

        let mut written: u64 = 0;
        for i in 0..zip.len() {
            let mut entry = zip.by_index(i)?;
            let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
                continue;
            };

            if let Some(mode) = entry.unix_mode() {
                if (mode & 0o170000) == 0o120000 {
                    debug!(entry = %entry.name(), "Skipping symlink entry");
                    continue;
                }
            }

            let out_path = dest.join(&relative);
            if entry.is_dir() {
                fs::create_dir_all(&out_path)?;
                continue;
            }

            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&out_path)?;
            let remaining = (limit - written).saturating_add(1);
            let copied = io::copy(&mut (&mut entry).take(remaining), &mut out)?;
            out.flush()?;
            written += copied;
            if written > limit {
                return Err(DeckError::Archive(format!(
                    "Archive expands beyond the {} byte limit",
                    limit
                )));
            }
        }

        debug!(dest = %dest.display(), bytes = written, "Extracted archive");
        Ok(())
    }

    /// Paths (relative to `dir`, `/`-separated) whose extension is on the
    /// denylist. Matching is case-insensitive.
    pub fn scan_for_disallowed(&self, dir: &Path) -> Result<Vec<String>> {
        let mut hits = Vec::new();
        self.scan_recursive(dir, dir, &mut hits)?;
        hits.sort();
        Ok(hits)
    }

    fn scan_recursive(&self, root: &Path, dir: &Path, hits: &mut Vec<String>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;

            if file_type.is_dir() {
                self.scan_recursive(root, &path, hits)?;
                continue;
            }

            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_lowercase);
            let Some(extension) = extension else {
                continue;
            };

            if self
                .config
                .disallowed_extensions
                .iter()
                .any(|denied| denied.eq_ignore_ascii_case(&extension))
            {
                let relative = path.strip_prefix(root).unwrap_or(&path);
                let relative = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                hits.push(relative);
            }
        }
        Ok(())
    }

    /// SHA-256 of a file, hex encoded.
    pub fn checksum(&self, path: &Path) -> Result<String> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)?;
        Ok(hex::encode(hasher.finalize()))
    }

    /// Delete a file. Missing files are fine.
    pub fn delete(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DeckError::Filesystem(format!(
                "Failed to delete {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Delete a directory tree. Missing directories are fine.
    pub fn delete_dir(&self, path: &Path) -> Result<()> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DeckError::Filesystem(format!(
                "Failed to delete {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    /// Build a ZIP at `path` from `(name, content)` pairs.
    pub(crate) fn build_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        for (name, content) in entries {
            zip.start_file(*name, FileOptions::default()).unwrap();
            zip.write_all(content).unwrap();
        }
        zip.finish().unwrap();
    }

    fn handler(tmp: &TempDir) -> ArchiveHandler {
        let store = PackageStore::new(tmp.path().join("storage"), tmp.path().join("public"));
        ArchiveHandler::new(UploadConfig::default(), store)
    }

    fn upload(tmp: &TempDir, name: &str, entries: &[(&str, &[u8])]) -> UploadedFile {
        let path = tmp.path().join(name);
        build_zip(&path, entries);
        UploadedFile::from_path(path).unwrap()
    }

    #[test]
    fn test_validate_accepts_zip() {
        let tmp = TempDir::new().unwrap();
        let file = upload(&tmp, "hello.zip", &[("plugin.json", b"{}")]);
        assert!(handler(&tmp).validate(&file).is_empty());
    }

    #[test]
    fn test_validate_extension_is_case_insensitive() {
        let tmp = TempDir::new().unwrap();
        let file = upload(&tmp, "HELLO.ZIP", &[("plugin.json", b"{}")]);
        assert!(handler(&tmp).validate(&file).is_empty());
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.txt");
        fs::write(&path, "just text").unwrap();
        let mut file = UploadedFile::from_path(&path).unwrap();
        file.size = DEFAULT_OVERSIZE;

        let errors = handler(&tmp).validate(&file);
        assert_eq!(
            errors,
            vec![
                "File size exceeds 50MB limit.",
                "Only ZIP files are allowed.",
                "File must have .zip extension.",
            ]
        );
    }

    const DEFAULT_OVERSIZE: u64 = 52_428_801;

    #[test]
    fn test_validate_does_not_trust_extension_for_type() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fake.zip");
        fs::write(&path, "MZ not a zip").unwrap();
        let file = UploadedFile::from_path(&path).unwrap();

        assert_eq!(handler(&tmp).validate(&file), vec!["Only ZIP files are allowed."]);
    }

    #[test]
    fn test_sniff_mime() {
        let tmp = TempDir::new().unwrap();
        let zip_path = tmp.path().join("a.zip");
        build_zip(&zip_path, &[("a.txt", b"a")]);
        assert_eq!(sniff_mime(&zip_path), Some("application/zip"));

        let empty = tmp.path().join("empty");
        fs::write(&empty, "").unwrap();
        assert_eq!(sniff_mime(&empty), None);
        assert_eq!(sniff_mime(&tmp.path().join("missing")), None);
    }

    #[test]
    fn test_store_uses_random_names() {
        let tmp = TempDir::new().unwrap();
        let handler = handler(&tmp);
        let file = upload(&tmp, "hello.zip", &[("plugin.json", b"{}")]);

        let a = handler.store(&file, PackageKind::Plugin).unwrap();
        let b = handler.store(&file, PackageKind::Plugin).unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with(tmp.path().join("storage/uploads/plugins")));
        assert!(a.exists() && b.exists());
    }

    #[test]
    fn test_extract() {
        let tmp = TempDir::new().unwrap();
        let handler = handler(&tmp);
        let archive = tmp.path().join("hello.zip");
        build_zip(
            &archive,
            &[
                ("plugin.json", br#"{"name":"Hello"}"#),
                ("resources/assets/js/app.js", b"console.log('hi')"),
            ],
        );

        let dest = tmp.path().join("out");
        handler.extract(&archive, &dest).unwrap();
        assert!(dest.join("plugin.json").is_file());
        assert_eq!(
            fs::read_to_string(dest.join("resources/assets/js/app.js")).unwrap(),
            "console.log('hi')"
        );
    }

    #[test]
    fn test_extract_rejects_traversal_before_writing() {
        let tmp = TempDir::new().unwrap();
        let handler = handler(&tmp);
        let archive = tmp.path().join("evil.zip");
        // The benign entry comes first; it must not be written either.
        build_zip(
            &archive,
            &[("plugin.json", b"{}"), ("../evil.txt", b"pwned")],
        );

        let dest = tmp.path().join("out");
        let err = handler.extract(&archive, &dest).unwrap_err();
        assert!(matches!(err, DeckError::Archive(_)));
        assert!(!dest.exists());
        assert!(!tmp.path().join("evil.txt").exists());
    }

    #[test]
    fn test_extract_rejects_corrupt_archive() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("broken.zip");
        fs::write(&archive, b"PK\x03\x04 definitely not a zip").unwrap();

        let err = handler(&tmp)
            .extract(&archive, &tmp.path().join("out"))
            .unwrap_err();
        assert!(matches!(err, DeckError::Archive(_)));
    }

    #[test]
    fn test_extract_enforces_size_limit() {
        let tmp = TempDir::new().unwrap();
        let store = PackageStore::new(tmp.path().join("storage"), tmp.path().join("public"));
        let config = UploadConfig {
            max_extracted_bytes: 16,
            ..Default::default()
        };
        let handler = ArchiveHandler::new(config, store);
        let archive = tmp.path().join("big.zip");
        build_zip(&archive, &[("big.txt", &[b'a'; 64])]);

        let dest = tmp.path().join("out");
        let err = handler.extract(&archive, &dest).unwrap_err();
        assert!(err.to_string().contains("limit"));
        assert!(!dest.exists());
    }

    #[test]
    fn test_scan_for_disallowed() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("pkg");
        fs::create_dir_all(dir.join("bin")).unwrap();
        fs::write(dir.join("plugin.json"), "{}").unwrap();
        fs::write(dir.join("bin/run.EXE"), "").unwrap();
        fs::write(dir.join("install.sh"), "").unwrap();
        fs::write(dir.join("src.php"), "").unwrap();
        fs::write(dir.join("README"), "").unwrap();

        let hits = handler(&tmp).scan_for_disallowed(&dir).unwrap();
        assert_eq!(hits, vec!["bin/run.EXE", "install.sh"]);
    }

    #[test]
    fn test_checksum() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data");
        fs::write(&path, "abc").unwrap();
        assert_eq!(
            handler(&tmp).checksum(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_delete_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let handler = handler(&tmp);
        let file = tmp.path().join("a.zip");
        let dir = tmp.path().join("dir");
        fs::write(&file, "x").unwrap();
        fs::create_dir_all(dir.join("nested")).unwrap();

        handler.delete(&file).unwrap();
        handler.delete(&file).unwrap();
        handler.delete_dir(&dir).unwrap();
        handler.delete_dir(&dir).unwrap();
        assert!(!file.exists());
        assert!(!dir.exists());
    }
}
