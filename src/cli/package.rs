//! Plugin and theme command handlers.

use anyhow::{Context, Result};
use serde_json::json;

use plugdeck::packages::UploadedFile;
use plugdeck::{Capability, PackageHost, PackageKind};

use super::print_json;
use crate::PackageAction;

pub(crate) fn run(host: &PackageHost, kind: PackageKind, action: PackageAction) -> Result<()> {
    let lifecycle = host.lifecycle();

    match action {
        PackageAction::Install { file } => {
            let upload = UploadedFile::from_path(&file)?;
            let package = lifecycle
                .install(kind, &upload)
                .with_context(|| format!("Failed to install {}", file.display()))?;
            eprintln!("{} '{}' installed.", kind.label(), package.slug);
            print_json(&package)
        }
        PackageAction::List => print_json(&lifecycle.list(kind)?),
        PackageAction::Show { slug } => {
            let package = host.require(kind, &slug)?;
            let on_disk = lifecycle.package_info(&package);
            print_json(&json!({ "package": package, "installed_manifest": on_disk }))
        }
        PackageAction::Activate { slug } => {
            let package = host.require(kind, &slug)?;
            print_json(&lifecycle.activate(kind, package.id)?)
        }
        PackageAction::Deactivate { slug } => {
            let package = host.require(kind, &slug)?;
            print_json(&lifecycle.deactivate(kind, package.id)?)
        }
        PackageAction::Toggle { slug } => {
            let package = host.require(kind, &slug)?;
            print_json(&lifecycle.toggle(kind, package.id)?)
        }
        PackageAction::Delete { slug } => {
            // Deleting something already gone is not an error.
            let deleted = match lifecycle.find_by_slug(kind, &slug)? {
                Some(package) => lifecycle.delete(kind, package.id)?,
                None => false,
            };
            print_json(&json!({ "slug": slug, "deleted": deleted }))
        }
        PackageAction::Files { slug, path } => {
            print_json(&host.browse(kind, &slug, path.as_deref().unwrap_or(""))?)
        }
    }
}

pub(crate) async fn cmd_data(host: &PackageHost, slug: &str, capability: &str) -> Result<()> {
    let resolved = host
        .plugin_data(slug, &Capability::from_name(capability))
        .await?;
    print_json(&resolved.into_value())
}
