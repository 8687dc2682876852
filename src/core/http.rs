//! HTTP layer used for index, package and icon downloads

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::{Client, Response};
use tokio_util::sync::CancellationToken;

use crate::core::config::NetworkConfig;
use crate::core::error::{CatalogError, Result};

/// Minimal GET capability; injected so downloads can be faked in tests
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Fetch the full body of `url`, failing on non-2xx status
    async fn get_bytes(&self, url: &str) -> Result<Bytes>;

    /// Like [`get_bytes`](Self::get_bytes), but gives up as soon as the body
    /// grows past `max_bytes` instead of buffering all of it
    async fn get_bytes_limited(&self, url: &str, max_bytes: usize) -> Result<Bytes>;
}

pub(crate) fn body_too_large(url: &str, max_bytes: usize) -> CatalogError {
    CatalogError::ValidationError(format!("body of {} exceeds the {} byte limit", url, max_bytes))
}

/// reqwest-backed client
#[derive(Clone)]
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| CatalogError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    async fn send(&self, url: &str) -> Result<Response> {
        tracing::debug!(url = %url, "HTTP GET");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::NetworkError(format!(
                "GET {} returned {}",
                url, status
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get_bytes(&self, url: &str) -> Result<Bytes> {
        Ok(self.send(url).await?.bytes().await?)
    }

    async fn get_bytes_limited(&self, url: &str, max_bytes: usize) -> Result<Bytes> {
        let response = self.send(url).await?;
        if response.content_length().is_some_and(|len| len > max_bytes as u64) {
            return Err(body_too_large(url, max_bytes));
        }

        // Content-Length may be absent or wrong, so count what actually arrives
        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if body.len() + chunk.len() > max_bytes {
                return Err(body_too_large(url, max_bytes));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }
}

/// Download at most `max_bytes` of `url` unless `cancel` fires or `timeout`
/// elapses first
///
/// The body is buffered in memory; callers persist it with an atomic write,
/// so an interrupted transfer never leaves a partial file behind.
pub async fn download_cancellable(
    client: &dyn HttpClient,
    url: &str,
    cancel: &CancellationToken,
    timeout: Duration,
    max_bytes: usize,
) -> Result<Bytes> {
    tokio::select! {
        _ = cancel.cancelled() => Err(CatalogError::Cancelled(format!("download of {}", url))),
        result = tokio::time::timeout(timeout, client.get_bytes_limited(url, max_bytes)) => match result {
            Ok(inner) => inner,
            Err(_) => Err(CatalogError::Timeout(format!(
                "download of {} exceeded {}s",
                url,
                timeout.as_secs()
            ))),
        },
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory client serving fixed bodies and counting requests
    #[derive(Default)]
    pub struct FakeHttpClient {
        bodies: Mutex<HashMap<String, Bytes>>,
        requests: AtomicUsize,
        delay: Option<Duration>,
    }

    impl FakeHttpClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_delay(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        pub fn serve(&self, url: &str, body: impl Into<Bytes>) {
            self.bodies.lock().unwrap().insert(url.to_string(), body.into());
        }

        pub fn forget(&self, url: &str) {
            self.bodies.lock().unwrap().remove(url);
        }

        pub fn requests(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpClient for FakeHttpClient {
        async fn get_bytes(&self, url: &str) -> Result<Bytes> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.bodies
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| CatalogError::NetworkError(format!("GET {} returned 404 Not Found", url)))
        }

        async fn get_bytes_limited(&self, url: &str, max_bytes: usize) -> Result<Bytes> {
            let body = self.get_bytes(url).await?;
            if body.len() > max_bytes {
                return Err(body_too_large(url, max_bytes));
            }
            Ok(body)
        }
    }
}
