//! Catalog data model

use serde::{Deserialize, Serialize};

use crate::catalog::index::IndexEntry;
use crate::plugin::types::{CatalogKind, PluginId, PluginMetadata};

/// Identifier of a catalog; the plugin id, stable across updates
pub type CatalogId = PluginId;

/// Lifecycle state of one catalog
///
/// ```text
/// NotInstalled -> Installing -> Installed -> Updating -> Installed -> Uninstalling -> (removed)
///                      |                        |
///                      +--------> Failed <------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InstallState {
    NotInstalled,
    Installing,
    Installed,
    Updating,
    Uninstalling,
    /// Last install or update attempt failed; `installed` tells whether a
    /// previous version is still in place
    Failed { reason: String, installed: bool },
}

impl InstallState {
    /// Whether a working copy of the catalog is on disk
    pub fn is_installed(&self) -> bool {
        match self {
            InstallState::Installed | InstallState::Updating | InstallState::Uninstalling => true,
            InstallState::Failed { installed, .. } => *installed,
            InstallState::NotInstalled | InstallState::Installing => false,
        }
    }

    /// Whether an operation is in flight
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            InstallState::Installing | InstallState::Updating | InstallState::Uninstalling
        )
    }
}

/// Fine-grained progress reported while an install runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", content = "message", rename_all = "snake_case")]
pub enum InstallStep {
    Idle,
    Pending,
    Downloading,
    Installing,
    Success,
    Error(String),
}

/// Immutable snapshot of one catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Catalog {
    /// Installed metadata when installed, otherwise the remote entry's
    pub metadata: PluginMetadata,
    pub kind: CatalogKind,
    pub install_state: InstallState,
    pub pinned: bool,
    /// Latest entry seen in the remote index
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<IndexEntry>,
}

impl Catalog {
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn version(&self) -> &str {
        &self.metadata.version
    }

    /// Installed and the remote index offers a strictly newer version
    pub fn has_update(&self) -> bool {
        if !self.install_state.is_installed() {
            return false;
        }
        match (&self.remote, self.metadata.semver()) {
            (Some(remote), Some(local)) => remote
                .metadata
                .semver()
                .map(|remote| remote > local)
                .unwrap_or(false),
            _ => false,
        }
    }
}
