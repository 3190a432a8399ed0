//! Path validation utilities for package storage
//!
//! This module prevents directory traversal when package content is
//! extracted, moved, browsed or published, and validates the slugs from
//! which permanent package locations are derived.

use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{DeckError, Result};

static SLUG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_\-]{0,63}$").expect("slug pattern is valid")
});

/// An absolute location proven to lie under a storage root.
///
/// Only [`validate_path_in_root`] constructs one, so any function taking a
/// `SafePath` can write to it without re-checking containment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafePath {
    path: PathBuf,
}

impl SafePath {
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.path
    }
}

impl AsRef<Path> for SafePath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

/// Resolve `relative` against `root` and prove the result stays inside it.
///
/// Raw input carrying a traversal sequence is refused outright. Otherwise
/// the joined path and the root are resolved the same way (see
/// [`normalize_path`]) and the path must start with the root.
///
/// ```
/// use std::path::Path;
/// use plugdeck::security::validate_path_in_root;
///
/// let root = Path::new("/srv/plugdeck/storage");
/// assert!(validate_path_in_root("plugins/hello-world", root).is_ok());
/// assert!(validate_path_in_root("../../etc/passwd", root).is_err());
/// ```
pub fn validate_path_in_root(relative: &str, root: &Path) -> Result<SafePath> {
    if contains_traversal_pattern(relative) {
        return Err(DeckError::SecurityViolation(format!(
            "Path contains suspicious traversal pattern: {}",
            relative
        )));
    }

    let candidate = Path::new(relative);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let resolved = normalize_path(&joined);

    let root = normalize_path(root);
    if !resolved.starts_with(&root) {
        return Err(DeckError::SecurityViolation(format!(
            "Path escapes storage root: {} is not within {}",
            relative,
            root.display()
        )));
    }

    Ok(SafePath { path: resolved })
}

/// Validate a package slug.
///
/// Slugs become folder names, URL segments and binding keys, so they are
/// restricted to 1-64 alphanumeric characters, hyphens and underscores,
/// starting with an alphanumeric character.
pub fn validate_slug(slug: &str) -> Result<()> {
    if !SLUG_RE.is_match(slug) {
        return Err(DeckError::Manifest(format!(
            "Invalid slug '{}': must be 1-64 alphanumeric characters, hyphens or underscores, starting with alphanumeric",
            slug
        )));
    }
    Ok(())
}

/// Drop `.` and apply `..` lexically, then canonicalize the deepest
/// ancestor that exists and re-append the rest.
///
/// Locations that are not created yet resolve through the same symlinks
/// as their root, and an existing symlink cannot point outside it.
fn normalize_path(path: &Path) -> PathBuf {
    let lexical = path.components().fold(PathBuf::new(), |mut acc, component| {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                acc.pop();
            }
            other => acc.push(other),
        }
        acc
    });

    let mut missing = Vec::new();
    let mut existing = lexical.as_path();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            return missing
                .iter()
                .rev()
                .fold(canonical, |acc, name| acc.join(name));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return lexical,
        }
    }
}

/// Whether `path` carries a parent-directory sequence in any common
/// encoding. ZIP entry names go through this too: one hit rejects the
/// whole archive.
pub fn contains_traversal_pattern(path: &str) -> bool {
    const PATTERNS: [&str; 5] = ["..", "%2e%2e", "%252e%252e", "%2e.", ".%2e"];

    let lower = path.to_lowercase();
    PATTERNS.iter().any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_existing_package_file() {
        let temp = tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("plugins/hello")).unwrap();
        std::fs::write(temp.path().join("plugins/hello/plugin.json"), "{}").unwrap();

        let safe = validate_path_in_root("plugins/hello/plugin.json", temp.path()).unwrap();
        assert!(safe.as_path().is_file());
    }

    #[test]
    fn test_location_not_yet_created() {
        let temp = tempdir().unwrap();
        let safe = validate_path_in_root("themes/extracted/abc", temp.path()).unwrap();
        assert!(safe.as_path().ends_with("themes/extracted/abc"));
        assert!(!safe.as_path().exists());
    }

    #[test]
    fn test_parent_sequences_are_rejected() {
        let temp = tempdir().unwrap();
        for attempt in [
            "../../../etc/passwd",
            "plugins/../../outside",
            "%2e%2e/etc/passwd",
            "..%2f../etc/passwd",
            "..\\..\\windows",
        ] {
            match validate_path_in_root(attempt, temp.path()) {
                Err(DeckError::SecurityViolation(msg)) => assert!(msg.contains("traversal")),
                other => panic!("{} was not rejected: {:?}", attempt, other),
            }
        }
    }

    #[test]
    fn test_absolute_path_elsewhere_escapes() {
        let temp = tempdir().unwrap();
        match validate_path_in_root("/etc/passwd", temp.path()) {
            Err(DeckError::SecurityViolation(msg)) => assert!(msg.contains("escapes storage root")),
            other => panic!("expected an escape, got {:?}", other),
        }
    }

    #[test]
    fn test_dot_segments_and_empty_path() {
        let temp = tempdir().unwrap();
        let root = temp.path().canonicalize().unwrap();
        std::fs::write(temp.path().join("readme.md"), "hi").unwrap();

        let safe = validate_path_in_root("./readme.md", temp.path()).unwrap();
        assert_eq!(safe.as_path(), root.join("readme.md"));
        let path: &Path = safe.as_ref();
        assert!(path.is_file());

        let safe = validate_path_in_root("", temp.path()).unwrap();
        assert_eq!(safe.into_path_buf(), root);
    }

    #[test]
    fn test_validate_slug() {
        assert!(validate_slug("hello-world").is_ok());
        assert!(validate_slug("sample_test_plugin2").is_ok());
        assert!(validate_slug("").is_err());
        assert!(validate_slug("-leading").is_err());
        assert!(validate_slug("has space").is_err());
        assert!(validate_slug("../etc").is_err());
        assert!(validate_slug("a/b").is_err());
        assert!(validate_slug(&"a".repeat(65)).is_err());
        assert!(validate_slug(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn test_contains_traversal_pattern() {
        assert!(contains_traversal_pattern("../evil.txt"));
        assert!(contains_traversal_pattern("assets/..hidden"));
        assert!(!contains_traversal_pattern("assets/app.js"));
    }

    #[cfg(unix)]
    #[test]
    fn test_root_behind_symlink() {
        let temp = tempdir().unwrap();
        let real = temp.path().join("real");
        std::fs::create_dir_all(real.join("storage/plugins")).unwrap();
        let link = temp.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();
        let root = link.join("storage");

        let safe = validate_path_in_root("plugins/hello", &root).unwrap();
        assert_eq!(
            safe.as_path(),
            real.canonicalize().unwrap().join("storage/plugins/hello")
        );
        assert!(validate_path_in_root("uploads/plugins/a.zip", &root).is_ok());
        assert!(validate_path_in_root("", &root).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_inside_root_cannot_escape() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("storage");
        let outside = temp.path().join("outside");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("plugins")).unwrap();

        match validate_path_in_root("plugins/hello", &root) {
            Err(DeckError::SecurityViolation(msg)) => assert!(msg.contains("escapes storage root")),
            other => panic!("expected an escape, got {:?}", other),
        }
    }

    #[test]
    fn test_normalize_path_is_lexical_for_missing_paths() {
        assert_eq!(
            normalize_path(Path::new("/nonexistent-root/plugins/./a/../b")),
            PathBuf::from("/nonexistent-root/plugins/b")
        );
    }
}
