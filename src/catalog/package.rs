//! Local platform installer for native catalog bundles
//!
//! A bundle is a zip archive with a `manifest.json` (plugin metadata) at its root.
//! It is extracted to `<native_dir>/<id>/`. A previous install is moved aside
//! first and restored if anything fails, so a broken update never replaces a
//! working package.

use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::catalog::events::{InstallationChangeEvent, InstallationChangeKind};
use crate::catalog::installer::PlatformInstaller;
use crate::core::error::{CatalogError, ErrorContext, Result};
use crate::core::utils::write_atomic;
use crate::plugin::types::PluginMetadata;
use crate::plugin::validator::ValidationEngine;

const MANIFEST_FILE: &str = "manifest.json";
const RECEIPT_FILE: &str = ".receipt.json";

/// Written next to the extracted files after a successful install
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallReceipt {
    pub metadata: PluginMetadata,
    /// SHA-256 of the bundle as downloaded
    pub bundle_checksum: String,
    /// SHA-256 over the extracted files
    pub content_checksum: String,
    pub installed_at: DateTime<Utc>,
}

/// Installs native bundles into a local directory
pub struct LocalPackageInstaller {
    root: PathBuf,
}

impl LocalPackageInstaller {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn package_dir(&self, catalog_id: &str) -> PathBuf {
        self.root.join(catalog_id)
    }

    /// Receipt of an installed package
    pub fn receipt(&self, catalog_id: &str) -> Result<InstallReceipt> {
        let path = self.package_dir(catalog_id).join(RECEIPT_FILE);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CatalogError::NotFound(format!("package {}", catalog_id)))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&raw)?)
    }

    fn install_blocking(root: &Path, expected: &PluginMetadata, bundle: &[u8]) -> Result<InstallationChangeEvent> {
        let bundle_checksum = format!("{:x}", Sha256::digest(bundle));

        let mut archive = zip::ZipArchive::new(Cursor::new(bundle))
            .context("Failed to open package archive")?;
        let manifest = read_manifest(&mut archive)?;
        check_manifest(&manifest, expected)?;

        let target = root.join(&expected.id);
        fs::create_dir_all(root)?;
        let existed = target.exists();
        let swap = PackageSwap::begin(&target)?;

        fs::create_dir_all(&target)?;
        extract_zip(&mut archive, &target)?;

        let receipt = InstallReceipt {
            metadata: manifest,
            bundle_checksum,
            content_checksum: content_checksum(&target)?,
            installed_at: Utc::now(),
        };
        write_atomic(
            &target.join(RECEIPT_FILE),
            serde_json::to_string_pretty(&receipt)?.as_bytes(),
        )?;
        swap.finish();

        tracing::debug!(
            catalog_id = %expected.id,
            checksum = %receipt.bundle_checksum,
            path = %target.display(),
            "Package extracted"
        );

        let kind = if existed {
            InstallationChangeKind::Updated
        } else {
            InstallationChangeKind::Installed
        };
        Ok(InstallationChangeEvent::new(
            expected.id.clone(),
            kind,
            Some(expected.version.clone()),
        ))
    }

    fn uninstall_blocking(root: &Path, catalog_id: &str) -> Result<InstallationChangeEvent> {
        let target = root.join(catalog_id);
        if !target.exists() {
            return Err(CatalogError::NotFound(format!("package {}", catalog_id)));
        }
        fs::remove_dir_all(&target)?;
        Ok(InstallationChangeEvent::new(
            catalog_id,
            InstallationChangeKind::Uninstalled,
            None,
        ))
    }
}

#[async_trait]
impl PlatformInstaller for LocalPackageInstaller {
    async fn install(&self, expected: &PluginMetadata, bundle: Bytes) -> Result<InstallationChangeEvent> {
        let root = self.root.clone();
        let expected = expected.clone();
        tokio::task::spawn_blocking(move || Self::install_blocking(&root, &expected, &bundle))
            .await
            .context("Package install task failed")?
    }

    async fn uninstall(&self, catalog_id: &str) -> Result<InstallationChangeEvent> {
        let root = self.root.clone();
        let catalog_id = catalog_id.to_string();
        tokio::task::spawn_blocking(move || Self::uninstall_blocking(&root, &catalog_id))
            .await
            .context("Package uninstall task failed")?
    }

    fn install_path(&self, catalog_id: &str) -> Option<PathBuf> {
        let dir = self.package_dir(catalog_id);
        dir.join(RECEIPT_FILE).exists().then_some(dir)
    }

    async fn verify(&self, catalog_id: &str) -> Result<()> {
        let receipt = self.receipt(catalog_id)?;
        let dir = self.package_dir(catalog_id);
        let actual = tokio::task::spawn_blocking(move || content_checksum(&dir))
            .await
            .context("Package verify task failed")??;

        if actual != receipt.content_checksum {
            tracing::warn!(catalog_id = %catalog_id, "Installed package was modified");
            return Err(CatalogError::ValidationError(format!(
                "installed files of {} do not match their receipt",
                catalog_id
            )));
        }
        Ok(())
    }
}

fn read_manifest(archive: &mut zip::ZipArchive<Cursor<&[u8]>>) -> Result<PluginMetadata> {
    let mut file = archive
        .by_name(MANIFEST_FILE)
        .map_err(|_| CatalogError::InstallError(format!("{} not found in package", MANIFEST_FILE)))?;
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    serde_json::from_str(&content)
        .map_err(|e| CatalogError::ValidationError(format!("Invalid {}: {}", MANIFEST_FILE, e)))
}

/// The bundle must describe exactly the catalog that was requested
fn check_manifest(manifest: &PluginMetadata, expected: &PluginMetadata) -> Result<()> {
    ValidationEngine::new().validate_metadata(manifest).into_result()?;

    if manifest.id != expected.id {
        return Err(CatalogError::InstallError(format!(
            "package manifest is for {}, expected {}",
            manifest.id, expected.id
        )));
    }
    if manifest.version != expected.version {
        return Err(CatalogError::InstallError(format!(
            "package manifest has version {}, expected {}",
            manifest.version, expected.version
        )));
    }
    Ok(())
}

fn extract_zip(archive: &mut zip::ZipArchive<Cursor<&[u8]>>, target: &Path) -> Result<()> {
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).context("Failed to read package entry")?;

        // Entries escaping the target directory are ignored
        let outpath = match file.enclosed_name() {
            Some(path) => target.join(path),
            None => {
                tracing::warn!(entry = %file.name(), "Skipping unsafe package entry");
                continue;
            }
        };

        if file.is_dir() {
            fs::create_dir_all(&outpath)?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile = fs::File::create(&outpath)?;
        std::io::copy(&mut file, &mut outfile)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                fs::set_permissions(&outpath, fs::Permissions::from_mode(mode))?;
            }
        }
    }
    Ok(())
}

/// SHA-256 over relative paths and contents of every file, in path order
fn content_checksum(dir: &Path) -> Result<String> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.file_name().map(|n| n != RECEIPT_FILE).unwrap_or(true))
        .collect();
    files.sort();

    let mut hasher = Sha256::new();
    for path in files {
        let relative = path.strip_prefix(dir).unwrap_or(&path);
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(fs::read(&path)?);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Previous package moved to `<id>.backup` while a new one is extracted
///
/// Dropping an unfinished swap restores the previous package.
struct PackageSwap {
    target: PathBuf,
    previous: Option<PathBuf>,
    finished: bool,
}

impl PackageSwap {
    fn begin(target: &Path) -> Result<Self> {
        let mut previous = None;
        if target.exists() {
            let aside = target.with_extension("backup");
            if aside.exists() {
                fs::remove_dir_all(&aside)?;
            }
            fs::rename(target, &aside)?;
            tracing::debug!(path = %aside.display(), "Previous package moved aside");
            previous = Some(aside);
        }
        Ok(Self {
            target: target.to_path_buf(),
            previous,
            finished: false,
        })
    }

    /// Keep the new package; a leftover backup is only logged
    fn finish(mut self) {
        self.finished = true;
        if let Some(aside) = self.previous.take() {
            if let Err(e) = fs::remove_dir_all(&aside) {
                tracing::warn!(path = %aside.display(), error = %e, "Stale package backup left behind");
            }
        }
    }

    fn restore(&mut self) -> std::io::Result<()> {
        tracing::warn!(path = %self.target.display(), "Restoring previous package");
        if self.target.exists() {
            fs::remove_dir_all(&self.target)?;
        }
        match self.previous.take() {
            Some(aside) => fs::rename(aside, &self.target),
            None => Ok(()),
        }
    }
}

impl Drop for PackageSwap {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.restore() {
            tracing::error!(path = %self.target.display(), error = %e, "Failed to restore previous package");
        }
    }
}
