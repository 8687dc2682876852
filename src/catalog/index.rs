//! Remote catalog index
//!
//! Accepted shapes: `{"catalogs": [entry, ...]}` or a bare `[entry, ...]`.
//! Entries are parsed one by one so that a single bad entry is skipped instead
//! of failing the whole index.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{CatalogError, Result};
use crate::core::http::HttpClient;
use crate::plugin::types::{CatalogKind, PluginMetadata};
use crate::plugin::validator::{check_version, ValidationEngine, ValidationResult};

/// One catalog offered by the remote index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    #[serde(flatten)]
    pub metadata: PluginMetadata,
    pub kind: CatalogKind,
    /// Package (native) or script download URL
    pub url: String,
}

impl IndexEntry {
    pub fn id(&self) -> &str {
        &self.metadata.id
    }
}

/// Entry dropped while parsing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    pub id: Option<String>,
    pub reason: String,
}

/// Parsed, validated index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteIndex {
    pub entries: Vec<IndexEntry>,
    pub skipped: Vec<SkippedEntry>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawIndex {
    Wrapped { catalogs: Vec<Value> },
    Bare(Vec<Value>),
}

impl RemoteIndex {
    /// Parse and validate an index document
    ///
    /// Fails only if the document itself is not an index. Invalid entries land in
    /// `skipped`; duplicate ids keep the highest version.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let raw: RawIndex = serde_json::from_slice(bytes)
            .map_err(|e| CatalogError::SerializationError(format!("Invalid catalog index: {}", e)))?;
        let values = match raw {
            RawIndex::Wrapped { catalogs } => catalogs,
            RawIndex::Bare(values) => values,
        };

        let engine = ValidationEngine::new();
        let mut index = RemoteIndex::default();
        let mut by_id: HashMap<String, (semver::Version, usize)> = HashMap::new();

        for value in values {
            let id = value.get("id").and_then(Value::as_str).map(str::to_string);

            let entry: IndexEntry = match serde_json::from_value(value) {
                Ok(entry) => entry,
                Err(e) => {
                    index.skipped.push(SkippedEntry { id, reason: e.to_string() });
                    continue;
                }
            };

            if let ValidationResult::Invalid(reason) = engine.validate_metadata(&entry.metadata) {
                index.skipped.push(SkippedEntry { id, reason });
                continue;
            }
            let version = match check_version(&entry.metadata.version) {
                Ok(version) => version,
                Err(e) => {
                    index.skipped.push(SkippedEntry { id, reason: e.to_string() });
                    continue;
                }
            };

            match by_id.get(&entry.metadata.id) {
                Some((existing, _)) if *existing >= version => {
                    index.skipped.push(SkippedEntry {
                        id,
                        reason: format!("duplicate entry superseded by version {}", existing),
                    });
                }
                Some((existing, position)) => {
                    let position = *position;
                    index.skipped.push(SkippedEntry {
                        id,
                        reason: format!("duplicate entry superseded by version {}", version),
                    });
                    tracing::debug!(catalog_id = %entry.metadata.id, old = %existing, new = %version, "Duplicate index entry");
                    by_id.insert(entry.metadata.id.clone(), (version, position));
                    index.entries[position] = entry;
                }
                None => {
                    by_id.insert(entry.metadata.id.clone(), (version, index.entries.len()));
                    index.entries.push(entry);
                }
            }
        }

        for skipped in &index.skipped {
            tracing::warn!(catalog_id = ?skipped.id, reason = %skipped.reason, "Skipping index entry");
        }

        Ok(index)
    }

    pub fn get(&self, id: &str) -> Option<&IndexEntry> {
        self.entries.iter().find(|e| e.id() == id)
    }
}

/// Where the remote index comes from
#[async_trait]
pub trait IndexSource: Send + Sync {
    async fn fetch_index(&self) -> Result<RemoteIndex>;
}

/// Index fetched over HTTP(S)
pub struct HttpIndexSource {
    url: String,
    client: Arc<dyn HttpClient>,
    allow_localhost: bool,
}

impl HttpIndexSource {
    pub fn new(url: impl Into<String>, client: Arc<dyn HttpClient>, allow_localhost: bool) -> Self {
        Self {
            url: url.into(),
            client,
            allow_localhost,
        }
    }
}

#[async_trait]
impl IndexSource for HttpIndexSource {
    async fn fetch_index(&self) -> Result<RemoteIndex> {
        ValidationEngine::new()
            .validate_network_request(&self.url, self.allow_localhost)
            .into_result()?;

        tracing::info!(url = %self.url, "Fetching catalog index");
        let bytes = self.client.get_bytes(&self.url).await?;
        let index = RemoteIndex::parse(&bytes)?;
        tracing::info!(
            entries = index.entries.len(),
            skipped = index.skipped.len(),
            "Catalog index fetched"
        );
        Ok(index)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Serves a mutable in-memory index and counts fetches
    #[derive(Default)]
    pub struct StaticIndexSource {
        entries: Mutex<Vec<IndexEntry>>,
        fetches: AtomicUsize,
        delay: Option<Duration>,
        fail: Mutex<bool>,
    }

    impl StaticIndexSource {
        pub fn new(entries: Vec<IndexEntry>) -> Self {
            Self {
                entries: Mutex::new(entries),
                ..Self::default()
            }
        }

        pub fn with_delay(entries: Vec<IndexEntry>, delay: Duration) -> Self {
            Self {
                entries: Mutex::new(entries),
                delay: Some(delay),
                ..Self::default()
            }
        }

        pub fn set_entries(&self, entries: Vec<IndexEntry>) {
            *self.entries.lock().unwrap() = entries;
        }

        pub fn entries(&self) -> Vec<IndexEntry> {
            self.entries.lock().unwrap().clone()
        }

        pub fn set_failing(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }

        pub fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IndexSource for StaticIndexSource {
        async fn fetch_index(&self) -> Result<RemoteIndex> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if *self.fail.lock().unwrap() {
                return Err(CatalogError::NetworkError("index unavailable".to_string()));
            }
            Ok(RemoteIndex {
                entries: self.entries.lock().unwrap().clone(),
                skipped: Vec::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::http::testing::FakeHttpClient;
    use serde_json::json;

    fn entry_json(id: &str, version: &str) -> Value {
        json!({
            "id": id,
            "name": "Acme",
            "version": version,
            "site": "https://acme.example",
            "lang": "en",
            "kind": "native",
            "url": format!("https://cdn.example/{}-{}.zip", id, version)
        })
    }

    #[test]
    fn test_parse_wrapped_and_bare() {
        let wrapped = json!({"catalogs": [entry_json("acme-reader", "1.0.0")]});
        let index = RemoteIndex::parse(wrapped.to_string().as_bytes()).unwrap();
        assert_eq!(index.entries.len(), 1);
        assert_eq!(index.entries[0].kind, CatalogKind::Native);

        let bare = json!([entry_json("acme-reader", "1.0.0"), entry_json("other", "0.1.0")]);
        let index = RemoteIndex::parse(bare.to_string().as_bytes()).unwrap();
        assert_eq!(index.entries.len(), 2);
        assert!(index.get("other").is_some());
    }

    #[test]
    fn test_invalid_entries_are_skipped() {
        let mut no_url = entry_json("no-url", "1.0.0");
        no_url.as_object_mut().unwrap().remove("url");
        let doc = json!([
            entry_json("Bad_Id", "1.0.0"),
            entry_json("bad-version", "1.0"),
            no_url,
            entry_json("good", "2.0.0")
        ]);

        let index = RemoteIndex::parse(doc.to_string().as_bytes()).unwrap();
        assert_eq!(index.entries.len(), 1);
        assert_eq!(index.entries[0].id(), "good");
        assert_eq!(index.skipped.len(), 3);
        assert_eq!(index.skipped[2].id.as_deref(), Some("no-url"));
    }

    #[test]
    fn test_duplicates_keep_highest_version() {
        let doc = json!([
            entry_json("acme-reader", "1.2.0"),
            entry_json("acme-reader", "1.10.0"),
            entry_json("acme-reader", "1.3.0")
        ]);

        let index = RemoteIndex::parse(doc.to_string().as_bytes()).unwrap();
        assert_eq!(index.entries.len(), 1);
        assert_eq!(index.entries[0].metadata.version, "1.10.0");
        assert_eq!(index.skipped.len(), 2);
    }

    #[test]
    fn test_not_an_index() {
        assert!(RemoteIndex::parse(b"{\"hello\": 1}").is_err());
        assert!(RemoteIndex::parse(b"garbage").is_err());
    }

    #[tokio::test]
    async fn test_http_source() {
        let client = Arc::new(FakeHttpClient::new());
        client.serve(
            "https://catalogs.example/index.json",
            json!([entry_json("acme-reader", "1.0.0")]).to_string(),
        );

        let source = HttpIndexSource::new("https://catalogs.example/index.json", client, false);
        let index = source.fetch_index().await.unwrap();
        assert_eq!(index.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_http_source_rejects_local_index() {
        let client = Arc::new(FakeHttpClient::new());
        let source = HttpIndexSource::new("http://127.0.0.1/index.json", client.clone(), false);

        let result = source.fetch_index().await;
        assert!(matches!(result, Err(CatalogError::ValidationError(_))));
        assert_eq!(client.requests(), 0);
    }
}
