//! End-to-end package lifecycle through the public API.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use plugdeck::packages::UploadedFile;
use plugdeck::{Capability, Config, ErrorKind, PackageHost, PackageKind};
use serde_json::{json, Value};
use tempfile::TempDir;
use uuid::Uuid;
use zip::write::FileOptions;
use zip::ZipWriter;

struct Deck {
    tmp: TempDir,
    host: PackageHost,
}

impl Deck {
    fn new() -> Self {
        Self::with_config(|_| {})
    }

    fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::rooted_at(tmp.path());
        adjust(&mut config);
        let host = PackageHost::open(&config).unwrap();
        Self { tmp, host }
    }

    fn zip(&self, name: &str, entries: &[(&str, &[u8])]) -> UploadedFile {
        let path = self.tmp.path().join("incoming").join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut zip = ZipWriter::new(File::create(&path).unwrap());
        for (entry, content) in entries {
            zip.start_file(*entry, FileOptions::default()).unwrap();
            zip.write_all(content).unwrap();
        }
        zip.finish().unwrap();
        UploadedFile::from_path(path).unwrap()
    }

    fn package_zip(&self, kind: PackageKind, manifest: Value, extra: &[(&str, &[u8])]) -> UploadedFile {
        let manifest = manifest.to_string();
        let mut entries: Vec<(&str, &[u8])> = vec![(kind.manifest_file(), manifest.as_bytes())];
        entries.extend_from_slice(extra);
        self.zip(&format!("{}.zip", Uuid::new_v4()), &entries)
    }

    fn storage(&self, relative: &str) -> PathBuf {
        self.tmp.path().join("storage").join(relative)
    }

    /// No upload copies or extraction directories are left for `kind`.
    fn assert_no_scratch(&self, kind: PackageKind) {
        assert_eq!(entries(&self.storage(&format!("uploads/{}", kind.dir_name()))), 0);
        assert_eq!(
            entries(&self.storage(&format!("{}/extracted", kind.dir_name()))),
            0
        );
    }
}

fn entries(dir: &Path) -> usize {
    fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

fn manifest(name: &str, slug: &str) -> Value {
    json!({"name": name, "slug": slug, "version": "1.0.0"})
}

#[test]
fn install_persists_one_package_with_its_manifest() {
    let deck = Deck::new();
    let lifecycle = deck.host.lifecycle();
    let upload = deck.package_zip(
        PackageKind::Plugin,
        manifest("Hello World", "hello-world"),
        &[("src/main.txt", b"hi")],
    );

    let package = lifecycle.install(PackageKind::Plugin, &upload).unwrap();

    assert_eq!(lifecycle.list(PackageKind::Plugin).unwrap().len(), 1);
    let root = lifecycle.store().path(&package.file_path).unwrap();
    assert!(root.join("plugin.json").is_file());
    assert!(root.join("src/main.txt").is_file());
    assert!(package.checksum.is_some());
    deck.assert_no_scratch(PackageKind::Plugin);
}

#[test]
fn oversized_or_misnamed_uploads_leave_no_trace() {
    let deck = Deck::with_config(|c| c.uploads.max_size_bytes = 16);
    let lifecycle = deck.host.lifecycle();

    let big = deck.package_zip(PackageKind::Plugin, manifest("Big", "big"), &[]);
    let err = lifecycle.install(PackageKind::Plugin, &big).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let deck = Deck::new();
    let lifecycle = deck.host.lifecycle();
    let archive = deck.package_zip(PackageKind::Plugin, manifest("Txt", "txt"), &[]);
    let renamed = archive.path.with_extension("txt");
    fs::rename(&archive.path, &renamed).unwrap();
    let upload = UploadedFile::from_path(renamed).unwrap();

    let err = lifecycle.install(PackageKind::Plugin, &upload).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.messages(), vec!["File must have .zip extension."]);

    assert!(lifecycle.list(PackageKind::Plugin).unwrap().is_empty());
    deck.assert_no_scratch(PackageKind::Plugin);
    assert!(!deck.storage("plugins/txt").exists());
}

#[test]
fn traversal_entries_abort_before_extraction() {
    let deck = Deck::new();
    let upload = deck.package_zip(
        PackageKind::Plugin,
        manifest("Evil", "evil"),
        &[("../../escaped.txt", b"pwned")],
    );

    let err = deck
        .host
        .lifecycle()
        .install(PackageKind::Plugin, &upload)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Archive);
    assert!(!deck.storage("escaped.txt").exists());
    assert!(!deck.storage("plugins/escaped.txt").exists());
    assert!(!deck.storage("plugins/evil").exists());
    deck.assert_no_scratch(PackageKind::Plugin);
}

#[test]
fn duplicate_slug_is_a_conflict_without_orphans() {
    let deck = Deck::new();
    let lifecycle = deck.host.lifecycle();

    let first = deck.package_zip(PackageKind::Plugin, manifest("First", "same"), &[]);
    lifecycle.install(PackageKind::Plugin, &first).unwrap();

    let second = deck.package_zip(
        PackageKind::Plugin,
        manifest("Second", "same"),
        &[("second.txt", b"2")],
    );
    let err = lifecycle.install(PackageKind::Plugin, &second).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(lifecycle.list(PackageKind::Plugin).unwrap().len(), 1);
    assert!(!deck.storage("plugins/same/second.txt").exists());
    deck.assert_no_scratch(PackageKind::Plugin);
}

#[test]
fn theme_activation_is_exclusive_and_active_theme_is_protected() {
    let deck = Deck::new();
    let lifecycle = deck.host.lifecycle();

    let a = lifecycle
        .install(
            PackageKind::Theme,
            &deck.package_zip(PackageKind::Theme, manifest("A", "theme-a"), &[]),
        )
        .unwrap();
    let b = lifecycle
        .install(
            PackageKind::Theme,
            &deck.package_zip(PackageKind::Theme, manifest("B", "theme-b"), &[]),
        )
        .unwrap();

    lifecycle.activate(PackageKind::Theme, a.id).unwrap();
    lifecycle.activate(PackageKind::Theme, b.id).unwrap();

    let themes = lifecycle.list(PackageKind::Theme).unwrap();
    let active: Vec<_> = themes.iter().filter(|t| t.is_active).map(|t| t.slug.as_str()).collect();
    assert_eq!(active, vec!["theme-b"]);
    assert_eq!(lifecycle.active_theme().unwrap().unwrap().slug, "theme-b");

    let err = lifecycle.delete(PackageKind::Theme, b.id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(deck.storage("themes/theme-b/theme.json").is_file());
    assert!(lifecycle.find(PackageKind::Theme, b.id).unwrap().is_some());

    assert!(lifecycle.delete(PackageKind::Theme, a.id).unwrap());
}

#[test]
fn deleting_an_inactive_plugin_removes_files_and_record() {
    let deck = Deck::new();
    let lifecycle = deck.host.lifecycle();
    let package = lifecycle
        .install(
            PackageKind::Plugin,
            &deck.package_zip(PackageKind::Plugin, manifest("Gone", "gone"), &[]),
        )
        .unwrap();

    assert!(lifecycle.delete(PackageKind::Plugin, package.id).unwrap());

    assert!(!deck.storage("plugins/gone").exists());
    assert!(lifecycle.find_by_slug(PackageKind::Plugin, "gone").unwrap().is_none());
    assert!(!lifecycle.delete(PackageKind::Plugin, package.id).unwrap());
}

#[tokio::test]
async fn sample_plugin_serves_its_manifest_data_once_active() {
    let deck = Deck::new();
    let lifecycle = deck.host.lifecycle();
    let upload = deck.package_zip(
        PackageKind::Plugin,
        manifest("Sample Test Plugin", "sample-test-plugin"),
        &[],
    );

    let package = lifecycle.install(PackageKind::Plugin, &upload).unwrap();
    assert_eq!(package.slug, "sample-test-plugin");
    assert!(package.is_installed);
    assert!(!package.is_active);

    let err = deck
        .host
        .plugin_data("sample-test-plugin", &Capability::PluginData)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let package = lifecycle.activate(PackageKind::Plugin, package.id).unwrap();
    assert!(package.is_active);

    let resolved = deck
        .host
        .plugin_data("sample-test-plugin", &Capability::PluginData)
        .await
        .unwrap();
    assert_eq!(resolved.data["name"], json!("Sample Test Plugin"));
    assert_eq!(resolved.data["version"], json!("1.0.0"));
    assert_eq!(resolved.data["method"], json!("config"));
}

#[cfg(unix)]
#[test]
fn symlinked_root_installs_activates_and_deletes() {
    let tmp = TempDir::new().unwrap();
    let real = tmp.path().join("real");
    fs::create_dir_all(&real).unwrap();
    let link = tmp.path().join("link");
    std::os::unix::fs::symlink(&real, &link).unwrap();
    let host = PackageHost::open(&Config::rooted_at(&link)).unwrap();
    let deck = Deck { tmp, host };
    let lifecycle = deck.host.lifecycle();

    let upload = deck.package_zip(
        PackageKind::Plugin,
        manifest("Linked", "linked"),
        &[("src/main.txt", b"hi")],
    );
    let package = lifecycle.install(PackageKind::Plugin, &upload).unwrap();

    let installed = real.join("storage/plugins/linked");
    assert!(installed.join("plugin.json").is_file());
    assert!(installed.join("src/main.txt").is_file());
    assert_eq!(entries(&real.join("storage/uploads/plugins")), 0);
    assert_eq!(entries(&real.join("storage/plugins/extracted")), 0);

    assert!(lifecycle.activate(PackageKind::Plugin, package.id).unwrap().is_active);
    lifecycle.deactivate(PackageKind::Plugin, package.id).unwrap();
    assert!(lifecycle.delete(PackageKind::Plugin, package.id).unwrap());
    assert!(!installed.exists());
}
