//! Per-plugin capability grants
//!
//! Grants are persisted under `plugin_permissions_<pluginId>` as
//! `{"pluginId": ..., "grantedPermissions": [...]}`. A stored record, even an
//! empty one, means the plugin has been decided on; no record means never asked.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::core::error::Result;
use crate::core::preferences::PreferenceStore;

/// A named privilege a plugin may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    /// Outbound HTTP(S) to the plugin's hosting site
    Network,
    /// Plugin-private key/value and file storage
    Storage,
    Notifications,
    /// Binding a local server port
    LocalServer,
    /// Reading the reader's character database
    CharacterDatabase,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::Network,
        Capability::Storage,
        Capability::Notifications,
        Capability::LocalServer,
        Capability::CharacterDatabase,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Capability::Network => "NETWORK",
            Capability::Storage => "STORAGE",
            Capability::Notifications => "NOTIFICATIONS",
            Capability::LocalServer => "LOCAL_SERVER",
            Capability::CharacterDatabase => "CHARACTER_DATABASE",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a permission request
#[must_use = "a denied permission request must stop the privileged operation"]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionResult {
    Granted,
    /// `missing` lists the requested capabilities that are not granted
    Denied { missing: Vec<Capability> },
}

impl PermissionResult {
    pub fn is_granted(&self) -> bool {
        matches!(self, PermissionResult::Granted)
    }
}

/// Which capabilities are granted without a prompt on a plugin's first request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionPolicy {
    auto_grant: BTreeSet<Capability>,
}

impl PermissionPolicy {
    pub fn new(auto_grant: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            auto_grant: auto_grant.into_iter().collect(),
        }
    }

    /// Nothing is granted implicitly
    pub fn prompt_always() -> Self {
        Self::new([])
    }

    pub fn auto_grants(&self, capability: Capability) -> bool {
        self.auto_grant.contains(&capability)
    }
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self::new([Capability::Network, Capability::Storage])
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredPermissions {
    plugin_id: String,
    #[serde(default)]
    granted_permissions: Vec<String>,
}

/// Persisted capability grants, keyed by plugin id
pub struct PermissionStore {
    prefs: Arc<dyn PreferenceStore>,
    policy: PermissionPolicy,
    /// Serializes read-modify-write cycles on stored grant sets
    write_lock: Mutex<()>,
}

impl PermissionStore {
    pub fn new(prefs: Arc<dyn PreferenceStore>, policy: PermissionPolicy) -> Self {
        Self {
            prefs,
            policy,
            write_lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &PermissionPolicy {
        &self.policy
    }

    fn key(plugin_id: &str) -> String {
        format!("plugin_permissions_{}", plugin_id)
    }

    /// Stored grants, or `None` if the plugin was never decided on
    ///
    /// Unknown capability names are dropped. An unreadable record counts as
    /// decided with nothing granted.
    fn load(&self, plugin_id: &str) -> Option<BTreeSet<Capability>> {
        let raw = match self.prefs.get(&Self::key(plugin_id)) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(plugin_id = %plugin_id, error = %e, "Failed to read permissions");
                return Some(BTreeSet::new());
            }
        };

        match serde_json::from_str::<StoredPermissions>(&raw) {
            Ok(stored) => Some(
                stored
                    .granted_permissions
                    .iter()
                    .filter_map(|name| {
                        let cap = Capability::from_name(name);
                        if cap.is_none() {
                            tracing::debug!(plugin_id = %plugin_id, capability = %name, "Ignoring unknown capability");
                        }
                        cap
                    })
                    .collect(),
            ),
            Err(e) => {
                tracing::warn!(plugin_id = %plugin_id, error = %e, "Corrupt permission record");
                Some(BTreeSet::new())
            }
        }
    }

    fn save(&self, plugin_id: &str, granted: &BTreeSet<Capability>) -> Result<()> {
        let stored = StoredPermissions {
            plugin_id: plugin_id.to_string(),
            granted_permissions: granted.iter().map(|c| c.name().to_string()).collect(),
        };
        self.prefs
            .set(&Self::key(plugin_id), &serde_json::to_string(&stored)?)
    }

    fn update(
        &self,
        plugin_id: &str,
        f: impl FnOnce(&mut BTreeSet<Capability>),
    ) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut granted = self.load(plugin_id).unwrap_or_default();
        f(&mut granted);
        self.save(plugin_id, &granted)
    }

    pub fn has_permission(&self, plugin_id: &str, capability: Capability) -> bool {
        self.load(plugin_id)
            .map(|granted| granted.contains(&capability))
            .unwrap_or(false)
    }

    pub fn grant_permission(&self, plugin_id: &str, capability: Capability) -> Result<()> {
        self.update(plugin_id, |granted| {
            granted.insert(capability);
        })?;
        tracing::info!(plugin_id = %plugin_id, capability = %capability, "Permission granted");
        Ok(())
    }

    pub fn revoke_permission(&self, plugin_id: &str, capability: Capability) -> Result<()> {
        self.update(plugin_id, |granted| {
            granted.remove(&capability);
        })?;
        tracing::info!(plugin_id = %plugin_id, capability = %capability, "Permission revoked");
        Ok(())
    }

    pub fn grant_all_permissions(&self, plugin_id: &str, capabilities: &[Capability]) -> Result<()> {
        self.update(plugin_id, |granted| {
            granted.extend(capabilities.iter().copied());
        })?;
        tracing::info!(plugin_id = %plugin_id, count = capabilities.len(), "Permissions granted");
        Ok(())
    }

    /// Granted capabilities in declaration order
    pub fn get_granted_permissions(&self, plugin_id: &str) -> Vec<Capability> {
        self.load(plugin_id)
            .map(|granted| granted.into_iter().collect())
            .unwrap_or_default()
    }

    /// Whether a decision was ever recorded, even one granting nothing
    pub fn has_permissions_set(&self, plugin_id: &str) -> bool {
        self.load(plugin_id).is_some()
    }

    /// Ask for a set of capabilities
    ///
    /// Decided plugins get `Granted` only if everything requested is already held.
    /// Undecided plugins receive the policy's auto-grant subset, which is persisted;
    /// anything outside it stays undecided and is reported as missing.
    pub fn request_permissions(&self, plugin_id: &str, requested: &[Capability]) -> PermissionResult {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let granted = match self.load(plugin_id) {
            Some(granted) => granted,
            None => {
                let auto: BTreeSet<Capability> = requested
                    .iter()
                    .copied()
                    .filter(|c| self.policy.auto_grants(*c))
                    .collect();

                if !auto.is_empty() {
                    if let Err(e) = self.save(plugin_id, &auto) {
                        tracing::warn!(plugin_id = %plugin_id, error = %e, "Failed to persist auto-granted permissions");
                        return PermissionResult::Denied {
                            missing: requested.to_vec(),
                        };
                    }
                    tracing::info!(
                        plugin_id = %plugin_id,
                        granted = ?auto,
                        "Auto-granted permissions on first request"
                    );
                }
                auto
            }
        };

        let mut missing: Vec<Capability> = requested
            .iter()
            .copied()
            .filter(|c| !granted.contains(c))
            .collect();
        missing.sort();
        missing.dedup();

        if missing.is_empty() {
            PermissionResult::Granted
        } else {
            tracing::debug!(plugin_id = %plugin_id, missing = ?missing, "Permission request denied");
            PermissionResult::Denied { missing }
        }
    }

    pub fn clear_permissions(&self, plugin_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.prefs.remove(&Self::key(plugin_id))?;
        tracing::debug!(plugin_id = %plugin_id, "Permissions cleared");
        Ok(())
    }
}
