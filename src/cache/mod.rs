//! Plugin icon cache
//!
//! Icons live at `<cache_root>/plugin-icons/<pluginId>.png`. Only payloads that
//! start with PNG or JPEG magic bytes are stored. Every failure degrades to "no
//! icon"; nothing here returns an error to the caller.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::core::http::{download_cancellable, HttpClient};
use crate::core::utils::write_atomic_async;
use crate::plugin::validator::{ValidationEngine, ValidationResult};

const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_MAGIC: [u8; 3] = [0xFF, 0xD8, 0xFF];

/// Smallest payload considered an image
pub const MIN_ICON_BYTES: usize = 8;

lazy_static! {
    static ref SAFE_ID: Regex = Regex::new(r"^[a-z0-9-]+$").unwrap();
}

/// Image format detected from magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconFormat {
    Png,
    Jpeg,
}

/// Detect PNG or JPEG; anything else, or anything too short, is rejected
pub fn detect_icon_format(bytes: &[u8]) -> Option<IconFormat> {
    if bytes.len() < MIN_ICON_BYTES {
        return None;
    }
    if bytes.starts_with(&PNG_MAGIC) {
        Some(IconFormat::Png)
    } else if bytes.starts_with(&JPEG_MAGIC) {
        Some(IconFormat::Jpeg)
    } else {
        None
    }
}

/// Disk cache for plugin icons
pub struct IconCache {
    icon_dir: PathBuf,
    client: Arc<dyn HttpClient>,
    max_bytes: usize,
    download_timeout: Duration,
    shutdown: CancellationToken,
    allow_localhost: bool,
}

impl IconCache {
    /// Create a cache rooted at `<cache_root>/plugin-icons`
    pub fn new(cache_root: PathBuf, client: Arc<dyn HttpClient>, max_bytes: usize) -> Self {
        Self {
            icon_dir: cache_root.join("plugin-icons"),
            client,
            max_bytes,
            download_timeout: Duration::from_secs(30),
            shutdown: CancellationToken::new(),
            allow_localhost: false,
        }
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    /// Abort downloads when `token` is cancelled
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Permit icon URLs on loopback or private addresses
    pub fn allow_localhost(mut self, allow: bool) -> Self {
        self.allow_localhost = allow;
        self
    }

    /// Cache file for a plugin, or `None` if the id is not filesystem-safe
    pub fn icon_path(&self, plugin_id: &str) -> Option<PathBuf> {
        if !SAFE_ID.is_match(plugin_id) {
            return None;
        }
        Some(self.icon_dir.join(format!("{}.png", plugin_id)))
    }

    /// Cached icon, else fetched from `url` and cached
    ///
    /// `url` may be `http(s)` or a base64 `data:` URI. Other schemes yield `None`.
    pub async fn load_icon(&self, url: &str, plugin_id: &str) -> Option<Bytes> {
        let path = self.icon_path(plugin_id)?;

        match tokio::fs::read(&path).await {
            Ok(bytes) if detect_icon_format(&bytes).is_some() => return Some(Bytes::from(bytes)),
            Ok(_) => {
                tracing::debug!(plugin_id = %plugin_id, "Discarding invalid cached icon");
                let _ = tokio::fs::remove_file(&path).await;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::debug!(plugin_id = %plugin_id, error = %e, "Failed to read cached icon");
            }
        }

        let bytes = if url.starts_with("http://") || url.starts_with("https://") {
            // Icon URLs come from plugin metadata and must not reach the local network
            if let ValidationResult::Invalid(reason) =
                ValidationEngine::new().validate_network_request(url, self.allow_localhost)
            {
                tracing::warn!(plugin_id = %plugin_id, url = %url, reason = %reason, "Refusing icon URL");
                return None;
            }
            match download_cancellable(
                self.client.as_ref(),
                url,
                &self.shutdown,
                self.download_timeout,
                self.max_bytes,
            )
            .await
            {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::debug!(plugin_id = %plugin_id, url = %url, error = %e, "Icon download failed");
                    return None;
                }
            }
        } else if url.starts_with("data:") {
            decode_data_uri(url)?
        } else {
            return None;
        };

        if self.cache_icon(plugin_id, &bytes).await {
            Some(bytes)
        } else {
            None
        }
    }

    /// Validate and store an icon, returning whether it was stored
    pub async fn cache_icon(&self, plugin_id: &str, bytes: &[u8]) -> bool {
        if bytes.len() > self.max_bytes {
            tracing::debug!(plugin_id = %plugin_id, size = bytes.len(), "Icon exceeds size limit");
            return false;
        }
        if detect_icon_format(bytes).is_none() {
            tracing::debug!(plugin_id = %plugin_id, size = bytes.len(), "Rejected icon payload");
            return false;
        }
        let Some(path) = self.icon_path(plugin_id) else {
            return false;
        };

        match write_atomic_async(&path, bytes).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(plugin_id = %plugin_id, error = %e, "Failed to cache icon");
                false
            }
        }
    }

    /// Remove a plugin's cached icon
    pub async fn clear_cache(&self, plugin_id: &str) {
        let Some(path) = self.icon_path(plugin_id) else {
            return;
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!(plugin_id = %plugin_id, "Icon cache cleared"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::debug!(plugin_id = %plugin_id, error = %e, "Failed to clear icon"),
        }
    }

    /// Remove every cached icon
    pub async fn clear_all_cache(&self) {
        match tokio::fs::remove_dir_all(&self.icon_dir).await {
            Ok(()) => tracing::info!("Icon cache cleared"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::debug!(error = %e, "Failed to clear icon cache"),
        }
    }
}

fn decode_data_uri(uri: &str) -> Option<Bytes> {
    let (header, payload) = uri.strip_prefix("data:")?.split_once(',')?;
    if !header.ends_with(";base64") {
        return None;
    }
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .ok()
        .map(Bytes::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::http::testing::FakeHttpClient;
    use tempfile::TempDir;

    fn png() -> Vec<u8> {
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.extend_from_slice(b"anything at all");
        bytes
    }

    fn cache(dir: &TempDir, client: Arc<FakeHttpClient>) -> IconCache {
        IconCache::new(dir.path().to_path_buf(), client, 1024)
    }

    #[test]
    fn test_detect_icon_format() {
        assert_eq!(detect_icon_format(&png()), Some(IconFormat::Png));
        assert_eq!(detect_icon_format(&PNG_MAGIC), Some(IconFormat::Png));
        assert_eq!(
            detect_icon_format(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F']),
            Some(IconFormat::Jpeg)
        );
        assert_eq!(detect_icon_format(&[0xFF, 0xD8, 0xFF, 0xE0]), None);
        assert_eq!(detect_icon_format(b"GIF89a-not-allowed"), None);
    }

    #[tokio::test]
    async fn test_short_payload_rejected_without_network() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(FakeHttpClient::new());
        let cache = cache(&dir, client.clone());

        assert!(!cache.cache_icon("acme-reader", &[0x89, 0x50, 0x4E, 0x47]).await);
        assert!(!cache.icon_path("acme-reader").unwrap().exists());
        assert_eq!(client.requests(), 0);
    }

    #[tokio::test]
    async fn test_cache_first_then_download() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(FakeHttpClient::new());
        client.serve("https://acme.example/icon.png", png());
        let cache = cache(&dir, client.clone());

        let first = cache.load_icon("https://acme.example/icon.png", "acme-reader").await;
        assert_eq!(first.as_deref(), Some(&png()[..]));
        assert!(dir.path().join("plugin-icons/acme-reader.png").exists());

        let second = cache.load_icon("https://acme.example/icon.png", "acme-reader").await;
        assert!(second.is_some());
        assert_eq!(client.requests(), 1);
    }

    #[tokio::test]
    async fn test_invalid_download_not_cached() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(FakeHttpClient::new());
        client.serve("https://acme.example/icon.png", "<html>not found</html>");
        let cache = cache(&dir, client);

        assert!(cache.load_icon("https://acme.example/icon.png", "acme-reader").await.is_none());
        assert!(!cache.icon_path("acme-reader").unwrap().exists());
    }

    #[tokio::test]
    async fn test_non_http_urls_are_not_fetched() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(FakeHttpClient::new());
        let cache = cache(&dir, client.clone());

        assert!(cache.load_icon("file:///etc/icon.png", "acme-reader").await.is_none());
        assert!(cache.load_icon("ftp://acme.example/icon.png", "acme-reader").await.is_none());
        assert_eq!(client.requests(), 0);
    }

    #[tokio::test]
    async fn test_private_network_icon_not_fetched() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(FakeHttpClient::new());
        client.serve("http://192.168.1.20/icon.png", png());
        client.serve("http://127.0.0.1:8080/icon.png", png());
        let cache = cache(&dir, client.clone());

        assert!(cache.load_icon("http://192.168.1.20/icon.png", "acme-reader").await.is_none());
        assert!(cache.load_icon("http://127.0.0.1:8080/icon.png", "acme-reader").await.is_none());
        assert_eq!(client.requests(), 0);
        assert!(!cache.icon_path("acme-reader").unwrap().exists());

        let permissive = cache.allow_localhost(true);
        assert!(permissive.load_icon("http://127.0.0.1:8080/icon.png", "acme-reader").await.is_some());
        assert_eq!(client.requests(), 1);
    }

    #[tokio::test]
    async fn test_oversized_download_is_not_cached() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(FakeHttpClient::new());
        let mut big = png();
        big.resize(2048, 0);
        client.serve("https://acme.example/huge.png", big);
        let cache = cache(&dir, client);

        assert!(cache.load_icon("https://acme.example/huge.png", "acme-reader").await.is_none());
        assert!(!cache.icon_path("acme-reader").unwrap().exists());
    }

    #[tokio::test]
    async fn test_data_uri_icon() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir, Arc::new(FakeHttpClient::new()));
        let uri = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png())
        );

        assert!(cache.load_icon(&uri, "acme-reader").await.is_some());
        assert!(cache.icon_path("acme-reader").unwrap().exists());
    }

    #[tokio::test]
    async fn test_download_failure_returns_none() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir, Arc::new(FakeHttpClient::new()));

        assert!(cache.load_icon("https://acme.example/missing.png", "acme-reader").await.is_none());
    }

    #[tokio::test]
    async fn test_oversized_and_unsafe_ids() {
        let dir = TempDir::new().unwrap();
        let cache = IconCache::new(dir.path().to_path_buf(), Arc::new(FakeHttpClient::new()), 16);

        let mut big = png();
        big.resize(64, 0);
        assert!(!cache.cache_icon("acme-reader", &big).await);
        assert!(!cache.cache_icon("../escape", &png()).await);
        assert!(cache.icon_path("../escape").is_none());
    }

    #[tokio::test]
    async fn test_clear_cache() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir, Arc::new(FakeHttpClient::new()));

        assert!(cache.cache_icon("a", &png()).await);
        assert!(cache.cache_icon("b", &png()).await);

        cache.clear_cache("a").await;
        cache.clear_cache("never-cached").await;
        assert!(!cache.icon_path("a").unwrap().exists());
        assert!(cache.icon_path("b").unwrap().exists());

        cache.clear_all_cache().await;
        assert!(!cache.icon_path("b").unwrap().exists());
        assert!(cache.cache_icon("c", &png()).await);
    }
}
