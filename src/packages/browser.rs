//! Read-only browsing of installed package files.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{DeckError, Result};
use crate::security::validate_path_in_root;

/// Extensions whose content is returned inline.
pub const TEXT_EXTENSIONS: [&str; 12] = [
    "php", "js", "css", "json", "md", "txt", "xml", "yml", "yaml", "env", "sql", "html",
];

/// Files at or above this size are never returned inline.
pub const MAX_INLINE_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Directory,
    File,
}

/// One item in a directory listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    pub name: String,
    /// Path relative to the package root, `/`-separated.
    pub path: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
    pub extension: Option<String>,
}

/// Details of a single file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileDetails {
    pub path: String,
    pub name: String,
    pub extension: Option<String>,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    /// Inline content for small text files.
    pub content: Option<String>,
    pub readable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Listing {
    Directory { path: String, items: Vec<Entry> },
    File(FileDetails),
}

/// Browses files below a package root.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackageBrowser;

impl PackageBrowser {
    pub fn new() -> Self {
        Self
    }

    /// List a directory or describe a file at `relative` under `root`.
    pub fn browse(&self, root: &Path, relative: &str) -> Result<Listing> {
        if !root.is_dir() {
            return Err(DeckError::NotFound(format!(
                "Package directory not found: {}",
                root.display()
            )));
        }
        let root = root.canonicalize()?;

        let relative = relative.trim_start_matches('/');
        let target = validate_path_in_root(relative, &root)?.into_path_buf();
        if !target.exists() {
            return Err(DeckError::NotFound(format!("Path not found: {}", relative)));
        }

        if target.is_dir() {
            let mut items = Vec::new();
            for entry in fs::read_dir(&target)? {
                let entry = entry?;
                let path = entry.path();
                let metadata = entry.metadata()?;
                let is_dir = metadata.is_dir();

                items.push(Entry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    path: relative_to(&root, &path),
                    entry_type: if is_dir { EntryType::Directory } else { EntryType::File },
                    size: (!is_dir).then(|| metadata.len()),
                    modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                    extension: if is_dir { None } else { extension_of(&path) },
                });
            }

            items.sort_by(|a, b| {
                (a.entry_type != EntryType::Directory, &a.name)
                    .cmp(&(b.entry_type != EntryType::Directory, &b.name))
            });

            return Ok(Listing::Directory {
                path: relative.to_string(),
                items,
            });
        }

        let metadata = fs::metadata(&target)?;
        let extension = extension_of(&target);
        let is_text = extension
            .as_deref()
            .map(|ext| TEXT_EXTENSIONS.contains(&ext))
            .unwrap_or(false);
        let content = if is_text && metadata.len() < MAX_INLINE_BYTES {
            fs::read_to_string(&target).ok()
        } else {
            None
        };

        Ok(Listing::File(FileDetails {
            path: relative.to_string(),
            name: target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            extension,
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            readable: content.is_some(),
            reason: content
                .is_none()
                .then(|| "File is too large or not a text file".to_string()),
            content,
        }))
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
}

fn relative_to(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
