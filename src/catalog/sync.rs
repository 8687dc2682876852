//! Remote index synchronization
//!
//! A sync fetches the index and reconciles it into the registry. Only one sync
//! runs at a time per process: callers that arrive while one is in flight wait
//! for it and share its outcome instead of fetching again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::catalog::index::{IndexSource, SkippedEntry};
use crate::catalog::registry::CatalogRegistry;
use crate::catalog::types::CatalogId;
use crate::core::error::{CatalogError, Result};

/// One catalog that could not be installed or updated
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub catalog_id: CatalogId,
    pub error_type: String,
    pub message: String,
}

impl SyncFailure {
    pub fn new(catalog_id: impl Into<CatalogId>, error: &CatalogError) -> Self {
        Self {
            catalog_id: catalog_id.into(),
            error_type: error.error_type().to_string(),
            message: error.to_string(),
        }
    }
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Newly installed
    pub installed: Vec<CatalogId>,
    pub updated: Vec<CatalogId>,
    /// Listed by the index but left uninstalled
    pub available: Vec<CatalogId>,
    /// Index entries that failed validation
    pub skipped: Vec<SkippedEntry>,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty()
    }
}

#[derive(Default)]
struct SyncState {
    last: Option<Result<SyncReport>>,
}

/// Single-flight driver for index reconciliation
pub struct RemoteIndexSync {
    source: Arc<dyn IndexSource>,
    state: Mutex<SyncState>,
    /// Incremented after every finished run, while `state` is held
    completed: AtomicU64,
}

impl RemoteIndexSync {
    pub fn new(source: Arc<dyn IndexSource>) -> Self {
        Self {
            source,
            state: Mutex::new(SyncState::default()),
            completed: AtomicU64::new(0),
        }
    }

    /// Sync `registry`, or wait for and share the sync already running
    pub async fn sync(&self, registry: &CatalogRegistry) -> Result<SyncReport> {
        let seen = self.completed.load(Ordering::SeqCst);
        let mut state = self.state.lock().await;

        if self.completed.load(Ordering::SeqCst) != seen {
            if let Some(last) = &state.last {
                tracing::debug!("Joined in-flight catalog sync");
                return last.clone();
            }
        }

        let result = self.run(registry).await;
        state.last = Some(result.clone());
        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn run(&self, registry: &CatalogRegistry) -> Result<SyncReport> {
        tracing::info!("Catalog sync started");

        // The registry is untouched if the index cannot be fetched
        let index = match self.source.fetch_index().await {
            Ok(index) => index,
            Err(e) => {
                tracing::warn!(error = %e, "Catalog index fetch failed");
                return Err(e);
            }
        };

        let report = registry.apply_index(index).await;
        tracing::info!(
            installed = report.installed.len(),
            updated = report.updated.len(),
            available = report.available.len(),
            skipped = report.skipped.len(),
            failures = report.failures.len(),
            "Catalog sync finished"
        );
        Ok(report)
    }

    /// Sync `registry` every `interval` until `cancel` fires
    ///
    /// The first sync runs immediately. Failures are logged and retried on the
    /// next tick.
    pub fn spawn_periodic(
        registry: Arc<CatalogRegistry>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("Periodic catalog sync stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = registry.sync_remote().await {
                            tracing::warn!(error = %e, retryable = e.is_retryable(), "Periodic catalog sync failed");
                        }
                    }
                }
            }
        })
    }
}
