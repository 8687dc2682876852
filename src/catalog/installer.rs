//! Catalog installation
//!
//! Native bundles are handed to a [`PlatformInstaller`]; script payloads are
//! validated and written to `<data_dir>/scripts/<id>.js`. Either way the bytes are
//! buffered in memory first, so a cancelled or timed-out download never leaves a
//! partial file behind.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::catalog::events::{InstallationChangeEvent, InstallationChangeKind, InstallationEvents};
use crate::catalog::index::IndexEntry;
use crate::catalog::types::InstallStep;
use crate::core::error::{CatalogError, Result};
use crate::core::http::{download_cancellable, HttpClient};
use crate::core::utils::write_atomic_async;
use crate::plugin::types::{CatalogKind, PluginMetadata};
use crate::plugin::validator::ValidationEngine;

/// Platform surface that installs native bundles
#[async_trait]
pub trait PlatformInstaller: Send + Sync {
    /// Install `bundle` for the catalog described by `expected`
    async fn install(&self, expected: &PluginMetadata, bundle: Bytes) -> Result<InstallationChangeEvent>;

    async fn uninstall(&self, catalog_id: &str) -> Result<InstallationChangeEvent>;

    /// Directory holding the installed package, if any
    fn install_path(&self, _catalog_id: &str) -> Option<PathBuf> {
        None
    }

    /// Check that the installed package was not modified since install
    async fn verify(&self, _catalog_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Timeouts applied to one install
#[derive(Debug, Clone, Copy)]
pub struct InstallTimeouts {
    pub download: Duration,
    pub platform: Duration,
}

impl InstallTimeouts {
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            download: timeout,
            platform: timeout,
        }
    }
}

/// Downloads packages and drives native and script installs
pub struct NativeInstaller {
    http: Arc<dyn HttpClient>,
    platform: Arc<dyn PlatformInstaller>,
    events: Arc<InstallationEvents>,
    scripts_dir: PathBuf,
    timeouts: InstallTimeouts,
    allow_localhost: bool,
    max_package_bytes: usize,
    validator: ValidationEngine,
}

/// Package size cap used until [`NativeInstaller::max_package_bytes`] sets one
pub const DEFAULT_MAX_PACKAGE_BYTES: usize = 64 * 1024 * 1024;

impl NativeInstaller {
    pub fn new(
        http: Arc<dyn HttpClient>,
        platform: Arc<dyn PlatformInstaller>,
        events: Arc<InstallationEvents>,
        scripts_dir: PathBuf,
        timeouts: InstallTimeouts,
    ) -> Self {
        Self {
            http,
            platform,
            events,
            scripts_dir,
            timeouts,
            allow_localhost: false,
            max_package_bytes: DEFAULT_MAX_PACKAGE_BYTES,
            validator: ValidationEngine::new(),
        }
    }

    /// Permit package URLs on loopback or private addresses
    pub fn allow_localhost(mut self, allow: bool) -> Self {
        self.allow_localhost = allow;
        self
    }

    /// Abort package downloads larger than `max_bytes`
    pub fn max_package_bytes(mut self, max_bytes: usize) -> Self {
        self.max_package_bytes = max_bytes;
        self
    }

    pub fn events(&self) -> &Arc<InstallationEvents> {
        &self.events
    }

    pub fn platform(&self) -> &Arc<dyn PlatformInstaller> {
        &self.platform
    }

    pub fn script_path(&self, catalog_id: &str) -> PathBuf {
        self.scripts_dir.join(format!("{}.js", catalog_id))
    }

    /// Download and install (or update) `entry`
    ///
    /// Publishes the resulting change event. Nothing on disk changes unless the
    /// download completed and the payload passed validation.
    pub async fn install(&self, entry: &IndexEntry, cancel: &CancellationToken) -> Result<InstallationChangeEvent> {
        let id = entry.id();

        self.validator
            .validate_network_request(&entry.url, self.allow_localhost)
            .into_result()?;

        self.events.report_progress(id, InstallStep::Downloading);
        tracing::info!(catalog_id = %id, version = %entry.metadata.version, url = %entry.url, "Downloading catalog package");
        let bundle = download_cancellable(
            self.http.as_ref(),
            &entry.url,
            cancel,
            self.timeouts.download,
            self.max_package_bytes,
        )
        .await?;

        self.events.report_progress(id, InstallStep::Installing);
        let event = match entry.kind {
            CatalogKind::Native => self.install_native(&entry.metadata, bundle).await?,
            CatalogKind::Script => self.install_script(&entry.metadata, bundle).await?,
        };

        if event.catalog_id != id {
            return Err(CatalogError::InstallError(format!(
                "installer reported {} while installing {}",
                event.catalog_id, id
            )));
        }

        tracing::info!(catalog_id = %id, kind = ?event.kind, version = ?event.version, "Catalog installed");
        self.events.publish(event.clone());
        Ok(event)
    }

    async fn install_native(&self, metadata: &PluginMetadata, bundle: Bytes) -> Result<InstallationChangeEvent> {
        match tokio::time::timeout(self.timeouts.platform, self.platform.install(metadata, bundle)).await {
            Ok(result) => result,
            Err(_) => Err(CatalogError::Timeout(format!(
                "platform install of {} exceeded {}s",
                metadata.id,
                self.timeouts.platform.as_secs()
            ))),
        }
    }

    async fn install_script(&self, metadata: &PluginMetadata, bundle: Bytes) -> Result<InstallationChangeEvent> {
        let source = std::str::from_utf8(&bundle).map_err(|_| {
            CatalogError::ValidationError(format!("script for {} is not valid UTF-8", metadata.id))
        })?;
        self.validator.validate(source, metadata).into_result()?;

        let path = self.script_path(&metadata.id);
        let existed = tokio::fs::try_exists(&path).await.unwrap_or(false);
        write_atomic_async(&path, source.as_bytes()).await?;

        let kind = if existed {
            InstallationChangeKind::Updated
        } else {
            InstallationChangeKind::Installed
        };
        Ok(InstallationChangeEvent::new(
            metadata.id.clone(),
            kind,
            Some(metadata.version.clone()),
        ))
    }

    /// Remove an installed catalog and publish the change
    pub async fn uninstall(&self, catalog_id: &str, kind: CatalogKind) -> Result<InstallationChangeEvent> {
        let event = match kind {
            CatalogKind::Native => {
                match tokio::time::timeout(self.timeouts.platform, self.platform.uninstall(catalog_id)).await {
                    Ok(result) => result?,
                    Err(_) => {
                        return Err(CatalogError::Timeout(format!(
                            "platform uninstall of {} exceeded {}s",
                            catalog_id,
                            self.timeouts.platform.as_secs()
                        )))
                    }
                }
            }
            CatalogKind::Script => {
                self.remove_script(catalog_id).await?;
                InstallationChangeEvent::new(catalog_id, InstallationChangeKind::Uninstalled, None)
            }
        };

        tracing::info!(catalog_id = %catalog_id, "Catalog uninstalled");
        self.events.publish(event.clone());
        Ok(event)
    }

    /// Delete a stored script; a missing file is not an error
    pub async fn remove_script(&self, catalog_id: &str) -> Result<()> {
        match tokio::fs::remove_file(self.script_path(catalog_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Stored script text
    pub async fn read_script(&self, catalog_id: &str) -> Result<String> {
        match tokio::fs::read_to_string(self.script_path(catalog_id)).await {
            Ok(source) => Ok(source),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CatalogError::NotFound(format!("script for {}", catalog_id)))
            }
            Err(e) => Err(e.into()),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakePlatformInstaller;
    use super::*;
    use crate::core::http::testing::FakeHttpClient;
    use tempfile::TempDir;

    const SCRIPT: &str = "function search(query) { return fetch(query); }";

    fn entry(id: &str, version: &str, kind: CatalogKind) -> IndexEntry {
        IndexEntry {
            metadata: PluginMetadata {
                id: id.to_string(),
                name: "Acme".to_string(),
                version: version.to_string(),
                site: "https://acme.example".to_string(),
                lang: "en".to_string(),
                icon: None,
                description: None,
                permissions: vec![],
            },
            kind,
            url: format!("https://cdn.example/{}-{}", id, version),
        }
    }

    struct Fixture {
        _dir: TempDir,
        http: Arc<FakeHttpClient>,
        platform: Arc<FakePlatformInstaller>,
        installer: NativeInstaller,
    }

    fn fixture_with(http: FakeHttpClient, platform: FakePlatformInstaller, timeout: Duration) -> Fixture {
        let dir = TempDir::new().unwrap();
        let http = Arc::new(http);
        let platform = Arc::new(platform);
        let installer = NativeInstaller::new(
            http.clone(),
            platform.clone(),
            Arc::new(InstallationEvents::default()),
            dir.path().join("scripts"),
            InstallTimeouts::uniform(timeout),
        );
        Fixture {
            _dir: dir,
            http,
            platform,
            installer,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(FakeHttpClient::new(), FakePlatformInstaller::new(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_native_install_publishes_event() {
        let f = fixture();
        let entry = entry("acme-reader", "1.0.0", CatalogKind::Native);
        f.http.serve(&entry.url, "bundle");
        let mut changes = f.installer.events().subscribe();
        let mut progress = f.installer.events().subscribe_progress();

        let event = f.installer.install(&entry, &CancellationToken::new()).await.unwrap();
        assert_eq!(event.kind, InstallationChangeKind::Installed);
        assert_eq!(f.platform.installs(), 1);
        assert_eq!(f.platform.installed_version("acme-reader").as_deref(), Some("1.0.0"));
        assert_eq!(changes.recv().await.unwrap().catalog_id, "acme-reader");
        assert_eq!(progress.recv().await.unwrap().step, InstallStep::Downloading);
        assert_eq!(progress.recv().await.unwrap().step, InstallStep::Installing);
    }

    #[tokio::test]
    async fn test_script_install_and_update() {
        let f = fixture();
        let v1 = entry("acme-script", "1.0.0", CatalogKind::Script);
        let v2 = entry("acme-script", "1.1.0", CatalogKind::Script);
        f.http.serve(&v1.url, SCRIPT);
        f.http.serve(&v2.url, SCRIPT);

        let first = f.installer.install(&v1, &CancellationToken::new()).await.unwrap();
        assert_eq!(first.kind, InstallationChangeKind::Installed);
        assert_eq!(f.installer.read_script("acme-script").await.unwrap(), SCRIPT);

        let second = f.installer.install(&v2, &CancellationToken::new()).await.unwrap();
        assert_eq!(second.kind, InstallationChangeKind::Updated);
        assert_eq!(f.platform.installs(), 0);
    }

    #[tokio::test]
    async fn test_dangerous_script_is_not_written() {
        let f = fixture();
        let entry = entry("evil", "1.0.0", CatalogKind::Script);
        f.http.serve(&entry.url, "function run() { eval(payload); }");

        let result = f.installer.install(&entry, &CancellationToken::new()).await;
        assert!(matches!(result, Err(CatalogError::ValidationError(_))));
        assert!(!f.installer.script_path("evil").exists());
    }

    #[tokio::test]
    async fn test_private_package_url_rejected() {
        let f = fixture();
        let mut entry = entry("acme-reader", "1.0.0", CatalogKind::Native);
        entry.url = "http://192.168.1.10/pkg.zip".to_string();

        let result = f.installer.install(&entry, &CancellationToken::new()).await;
        assert!(matches!(result, Err(CatalogError::ValidationError(_))));
        assert_eq!(f.http.requests(), 0);
    }

    #[tokio::test]
    async fn test_oversized_package_rejected() {
        let mut f = fixture();
        f.installer = f.installer.max_package_bytes(16);
        let entry = entry("acme-reader", "1.0.0", CatalogKind::Native);
        f.http.serve(&entry.url, vec![0u8; 17]);

        let result = f.installer.install(&entry, &CancellationToken::new()).await;
        assert!(matches!(result, Err(CatalogError::ValidationError(_))));
        assert_eq!(f.platform.installs(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_download_installs_nothing() {
        let f = fixture_with(
            FakeHttpClient::with_delay(Duration::from_secs(10)),
            FakePlatformInstaller::new(),
            Duration::from_secs(30),
        );
        let entry = entry("acme-script", "1.0.0", CatalogKind::Script);
        f.http.serve(&entry.url, SCRIPT);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = f.installer.install(&entry, &cancel).await;
        assert!(matches!(result, Err(CatalogError::Cancelled(_))));
        assert!(!f.installer.script_path("acme-script").exists());
    }

    #[tokio::test]
    async fn test_platform_timeout() {
        let f = fixture_with(
            FakeHttpClient::new(),
            FakePlatformInstaller::with_delay(Duration::from_millis(500)),
            Duration::from_millis(50),
        );
        let entry = entry("acme-reader", "1.0.0", CatalogKind::Native);
        f.http.serve(&entry.url, "bundle");

        let result = f.installer.install(&entry, &CancellationToken::new()).await;
        assert!(matches!(result, Err(CatalogError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_uninstall_script_and_native() {
        let f = fixture();
        let script = entry("acme-script", "1.0.0", CatalogKind::Script);
        f.http.serve(&script.url, SCRIPT);
        f.installer.install(&script, &CancellationToken::new()).await.unwrap();

        let event = f.installer.uninstall("acme-script", CatalogKind::Script).await.unwrap();
        assert_eq!(event.kind, InstallationChangeKind::Uninstalled);
        assert!(!f.installer.script_path("acme-script").exists());
        assert!(f.installer.read_script("acme-script").await.is_err());

        f.installer.uninstall("acme-reader", CatalogKind::Native).await.unwrap();
        assert_eq!(f.platform.uninstalls(), 1);
    }
}
