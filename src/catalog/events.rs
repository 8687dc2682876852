//! Installation change notifications

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::catalog::types::{CatalogId, InstallStep};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InstallationChangeKind {
    Installed,
    Updated,
    Uninstalled,
}

/// Emitted once per completed install, update or uninstall
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallationChangeEvent {
    pub id: Uuid,
    pub catalog_id: CatalogId,
    pub kind: InstallationChangeKind,
    /// Version now on disk; `None` after an uninstall
    pub version: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl InstallationChangeEvent {
    pub fn new(catalog_id: impl Into<CatalogId>, kind: InstallationChangeKind, version: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            catalog_id: catalog_id.into(),
            kind,
            version,
            timestamp: Utc::now(),
        }
    }
}

/// Progress update for one catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallProgress {
    pub catalog_id: CatalogId,
    pub step: InstallStep,
}

/// Broadcast hub for change events and progress
///
/// Nothing is retained; subscribers that lag simply miss events.
pub struct InstallationEvents {
    changes: broadcast::Sender<InstallationChangeEvent>,
    progress: broadcast::Sender<InstallProgress>,
}

impl InstallationEvents {
    pub fn new(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity);
        let (progress, _) = broadcast::channel(capacity);
        Self { changes, progress }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InstallationChangeEvent> {
        self.changes.subscribe()
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<InstallProgress> {
        self.progress.subscribe()
    }

    pub fn publish(&self, event: InstallationChangeEvent) {
        tracing::debug!(
            catalog_id = %event.catalog_id,
            kind = ?event.kind,
            version = ?event.version,
            "Installation changed"
        );
        // No receivers is not an error
        let _ = self.changes.send(event);
    }

    pub fn report_progress(&self, catalog_id: &str, step: InstallStep) {
        let _ = self.progress.send(InstallProgress {
            catalog_id: catalog_id.to_string(),
            step,
        });
    }
}

impl Default for InstallationEvents {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_subscribe() {
        let events = InstallationEvents::default();
        let mut changes = events.subscribe();
        let mut progress = events.subscribe_progress();

        events.report_progress("acme-reader", InstallStep::Downloading);
        events.publish(InstallationChangeEvent::new(
            "acme-reader",
            InstallationChangeKind::Installed,
            Some("1.0.0".to_string()),
        ));

        let step = progress.recv().await.unwrap();
        assert_eq!(step.step, InstallStep::Downloading);

        let event = changes.recv().await.unwrap();
        assert_eq!(event.catalog_id, "acme-reader");
        assert_eq!(event.kind, InstallationChangeKind::Installed);
        assert_eq!(event.version.as_deref(), Some("1.0.0"));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let events = InstallationEvents::default();
        events.publish(InstallationChangeEvent::new(
            "acme-reader",
            InstallationChangeKind::Uninstalled,
            None,
        ));
    }
}
