//! Catalog registry
//!
//! The registry owns the one authoritative table of catalogs. Every mutation of
//! a given catalog (install, update, uninstall, pin) runs under that catalog's
//! [`KeyedLocks`] entry; readers get cloned snapshots and never see a catalog
//! halfway through an operation.
//!
//! Persisted preferences:
//! - `installed_catalogs`: install records, used by [`CatalogRegistry::restore`]
//! - `pinned_catalogs`: pinned ids
//! - `user_removed_catalogs`: ids the user uninstalled, never auto-installed again

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use bytes::Bytes;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::cache::IconCache;
use crate::catalog::events::InstallationEvents;
use crate::catalog::index::{IndexEntry, IndexSource, RemoteIndex};
use crate::catalog::installer::NativeInstaller;
use crate::catalog::sync::{RemoteIndexSync, SyncFailure, SyncReport};
use crate::catalog::types::{Catalog, CatalogId, InstallState, InstallStep};
use crate::core::config::CatalogConfig;
use crate::core::error::{CatalogError, Result};
use crate::core::keyed_lock::KeyedLocks;
use crate::core::preferences::{PreferenceStore, PreferenceStoreExt};
use crate::plugin::filters::{FilterDefinition, FilterSchemaBridge};
use crate::plugin::logger::TracingPluginLogger;
use crate::plugin::permissions::{Capability, PermissionResult, PermissionStore};
use crate::plugin::sandbox::{ExecutionHandle, LoadRequest, SourceAccess, SourceRuntime};
use crate::plugin::types::{CatalogKind, PluginMetadata};
use crate::plugin::validator::{ValidationEngine, ValidationResult};

const INSTALLED_KEY: &str = "installed_catalogs";
const PINNED_KEY: &str = "pinned_catalogs";
const USER_REMOVED_KEY: &str = "user_removed_catalogs";

/// Reconciliation behaviour
#[derive(Debug, Clone, Copy)]
pub struct RegistryOptions {
    /// Install native catalogs that first appear in the remote index
    pub auto_install_new: bool,
    /// Update installed catalogs when the index offers a newer version
    pub auto_update: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            auto_install_new: true,
            auto_update: true,
        }
    }
}

impl From<&CatalogConfig> for RegistryOptions {
    fn from(config: &CatalogConfig) -> Self {
        Self {
            auto_install_new: config.auto_install_new,
            auto_update: config.auto_update,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InstallRecord {
    metadata: PluginMetadata,
    kind: CatalogKind,
}

/// Result of a batch update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    pub updated: Vec<CatalogId>,
    pub failures: Vec<SyncFailure>,
}

/// Authoritative catalog table and lifecycle orchestration
pub struct CatalogRegistry {
    catalogs: RwLock<HashMap<CatalogId, Catalog>>,
    locks: KeyedLocks<CatalogId>,
    installer: NativeInstaller,
    prefs: Arc<dyn PreferenceStore>,
    permissions: Arc<PermissionStore>,
    icons: Arc<IconCache>,
    runtime: Option<Arc<dyn SourceRuntime>>,
    sync: RemoteIndexSync,
    in_flight: Mutex<HashMap<CatalogId, CancellationToken>>,
    /// Serializes snapshot-and-write of the persisted id sets
    persist_lock: Mutex<()>,
    shutdown: CancellationToken,
    options: RegistryOptions,
    validator: ValidationEngine,
    filters: FilterSchemaBridge,
}

impl CatalogRegistry {
    pub fn new(
        installer: NativeInstaller,
        prefs: Arc<dyn PreferenceStore>,
        permissions: Arc<PermissionStore>,
        icons: Arc<IconCache>,
        index_source: Arc<dyn IndexSource>,
        options: RegistryOptions,
    ) -> Self {
        Self {
            catalogs: RwLock::new(HashMap::new()),
            locks: KeyedLocks::new(),
            installer,
            prefs,
            permissions,
            icons,
            runtime: None,
            sync: RemoteIndexSync::new(index_source),
            in_flight: Mutex::new(HashMap::new()),
            persist_lock: Mutex::new(()),
            shutdown: CancellationToken::new(),
            options,
            validator: ValidationEngine::new(),
            filters: FilterSchemaBridge::new(),
        }
    }

    /// Runtime used by [`get_source`](Self::get_source)
    pub fn with_runtime(mut self, runtime: Arc<dyn SourceRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Cancel every in-flight download when `token` fires
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn events(&self) -> &Arc<InstallationEvents> {
        self.installer.events()
    }

    pub fn permissions(&self) -> &Arc<PermissionStore> {
        &self.permissions
    }

    /// Rebuild the table from persisted install records
    ///
    /// Returns the number of installed catalogs restored. Unreadable records are
    /// logged and ignored.
    pub fn restore(&self) -> Result<usize> {
        let records: Vec<InstallRecord> = match self.prefs.get_json(INSTALLED_KEY) {
            Ok(records) => records.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable install records, starting empty");
                Vec::new()
            }
        };
        let pinned = self.pinned_ids();

        let mut catalogs = self.write_table();
        for record in &records {
            let id = record.metadata.id.clone();
            let previous = catalogs.remove(&id);
            catalogs.insert(
                id.clone(),
                Catalog {
                    pinned: pinned.contains(&id),
                    metadata: record.metadata.clone(),
                    kind: record.kind,
                    install_state: InstallState::Installed,
                    remote: previous.and_then(|c| c.remote),
                },
            );
        }

        tracing::info!(count = records.len(), "Restored installed catalogs");
        Ok(records.len())
    }

    pub fn get(&self, id: &str) -> Option<Catalog> {
        self.read_table().get(id).cloned()
    }

    /// Every known catalog, pinned first then by name
    pub fn catalogs(&self) -> Vec<Catalog> {
        let mut all: Vec<Catalog> = self.read_table().values().cloned().collect();
        sort_for_display(&mut all);
        all
    }

    /// Installed catalogs, pinned first then by name
    pub fn get_installed_catalogs(&self) -> Vec<Catalog> {
        let mut installed: Vec<Catalog> = self
            .read_table()
            .values()
            .filter(|c| c.install_state.is_installed())
            .cloned()
            .collect();
        sort_for_display(&mut installed);
        installed
    }

    /// Installed catalogs with a newer version in the remote index
    pub fn get_updatable_catalogs(&self) -> Vec<Catalog> {
        self.get_installed_catalogs()
            .into_iter()
            .filter(Catalog::has_update)
            .collect()
    }

    pub fn get_catalogs_by_lang(&self, lang: &str) -> Vec<Catalog> {
        self.catalogs()
            .into_iter()
            .filter(|c| c.metadata.lang.eq_ignore_ascii_case(lang))
            .collect()
    }

    /// Install a catalog listed in the remote index
    ///
    /// Already installed at the offered version (or newer) is a no-op, which is
    /// what a caller that queued behind a concurrent install of the same id sees.
    pub async fn install(&self, id: &str) -> Result<Catalog> {
        let _guard = self.locks.lock(&id.to_string()).await;

        let catalog = self
            .get(id)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
        if catalog.install_state.is_installed() && !catalog.has_update() {
            tracing::debug!(catalog_id = %id, version = %catalog.version(), "Already installed");
            return Ok(catalog);
        }
        let entry = catalog
            .remote
            .clone()
            .ok_or_else(|| CatalogError::NotFound(format!("{} is not in the remote index", id)))?;

        self.run_install(&catalog, entry).await
    }

    /// Update an installed catalog to the version offered by the remote index
    pub async fn update(&self, id: &str) -> Result<Catalog> {
        let _guard = self.locks.lock(&id.to_string()).await;

        let catalog = self
            .get(id)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
        if !catalog.install_state.is_installed() {
            return Err(CatalogError::InstallError(format!("{} is not installed", id)));
        }
        if !catalog.has_update() {
            tracing::debug!(catalog_id = %id, version = %catalog.version(), "Already up to date");
            return Ok(catalog);
        }
        let Some(entry) = catalog.remote.clone() else {
            return Ok(catalog);
        };

        self.run_install(&catalog, entry).await
    }

    /// Update every catalog with a newer remote version
    ///
    /// Catalogs are updated in parallel; one failure does not stop the others.
    pub async fn update_all(&self) -> UpdateReport {
        let ids: Vec<CatalogId> = self
            .get_updatable_catalogs()
            .into_iter()
            .map(|c| c.metadata.id)
            .collect();

        let results = join_all(ids.iter().map(|id| self.update(id))).await;

        let mut report = UpdateReport::default();
        for (id, result) in ids.into_iter().zip(results) {
            match result {
                Ok(_) => report.updated.push(id),
                Err(e) => report.failures.push(SyncFailure::new(id, &e)),
            }
        }
        report
    }

    /// Caller must hold the catalog's lock
    async fn run_install(&self, catalog: &Catalog, entry: IndexEntry) -> Result<Catalog> {
        let id = catalog.id().to_string();
        let previous = catalog.install_state.clone();
        let was_installed = previous.is_installed();

        self.set_state(
            &id,
            if was_installed {
                InstallState::Updating
            } else {
                InstallState::Installing
            },
        );
        self.events().report_progress(&id, InstallStep::Pending);

        let token = self.shutdown.child_token();
        self.lock_in_flight().insert(id.clone(), token.clone());
        let result = self.installer.install(&entry, &token).await;
        self.lock_in_flight().remove(&id);

        match result {
            Ok(_event) => {
                let snapshot = {
                    let mut catalogs = self.write_table();
                    let current = catalogs.entry(id.clone()).or_insert_with(|| catalog.clone());
                    current.metadata = entry.metadata.clone();
                    current.kind = entry.kind;
                    current.install_state = InstallState::Installed;
                    current.clone()
                };

                if let Err(e) = self.persist_installed() {
                    tracing::warn!(catalog_id = %id, error = %e, "Failed to persist install records");
                }
                if let Err(e) = self.set_user_removed(&id, false) {
                    tracing::warn!(catalog_id = %id, error = %e, "Failed to update removed catalogs");
                }
                self.refresh_icon(&snapshot.metadata).await;
                self.events().report_progress(&id, InstallStep::Success);
                Ok(snapshot)
            }
            Err(CatalogError::Cancelled(reason)) => {
                tracing::info!(catalog_id = %id, "Install cancelled");
                self.set_state(&id, previous);
                self.events().report_progress(&id, InstallStep::Idle);
                Err(CatalogError::Cancelled(reason))
            }
            Err(e) => {
                tracing::error!(catalog_id = %id, version = %entry.metadata.version, error = %e, "Install failed");
                self.set_state(
                    &id,
                    InstallState::Failed {
                        reason: e.to_string(),
                        installed: was_installed,
                    },
                );
                self.events().report_progress(&id, InstallStep::Error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Cancel the download of an in-flight install or update
    ///
    /// Returns whether anything was cancelled. The catalog returns to the state
    /// it had before the operation started.
    pub fn cancel_install(&self, id: &str) -> bool {
        match self.lock_in_flight().get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Uninstall a catalog and clear its pin, permissions, icon and records
    ///
    /// If the platform refuses, nothing is cleaned up and the catalog stays
    /// installed. Once the package is gone every cleanup step is attempted; any
    /// that fail are reported together.
    pub async fn uninstall(&self, id: &str) -> Result<()> {
        let _guard = self.locks.lock(&id.to_string()).await;

        let catalog = self
            .get(id)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
        if !catalog.install_state.is_installed() {
            return Err(CatalogError::InstallError(format!("{} is not installed", id)));
        }
        let previous = catalog.install_state.clone();
        self.set_state(id, InstallState::Uninstalling);

        match self.installer.uninstall(id, catalog.kind).await {
            Ok(_) | Err(CatalogError::NotFound(_)) => {}
            Err(e) => {
                tracing::error!(catalog_id = %id, error = %e, "Uninstall failed");
                self.set_state(id, previous);
                return Err(e);
            }
        }

        self.write_table().remove(id);

        let mut failures: Vec<String> = Vec::new();
        if let Err(e) = self.persist_pins() {
            failures.push(format!("pin: {}", e));
        }
        if let Err(e) = self.permissions.clear_permissions(id) {
            failures.push(format!("permissions: {}", e));
        }
        if let Err(e) = self.persist_installed() {
            failures.push(format!("install record: {}", e));
        }
        if let Err(e) = self.installer.remove_script(id).await {
            failures.push(format!("script: {}", e));
        }
        if let Err(e) = self.set_user_removed(id, true) {
            failures.push(format!("removed set: {}", e));
        }
        self.icons.clear_cache(id).await;

        if failures.is_empty() {
            tracing::info!(catalog_id = %id, "Catalog removed");
            Ok(())
        } else {
            tracing::error!(catalog_id = %id, failures = ?failures, "Incomplete uninstall cleanup");
            Err(CatalogError::InstallError(format!(
                "cleanup of {} incomplete: {}",
                id,
                failures.join("; ")
            )))
        }
    }

    /// Flip the pinned flag; returns the new value
    pub async fn toggle_pinned(&self, id: &str) -> Result<bool> {
        let _guard = self.locks.lock(&id.to_string()).await;

        let pinned = {
            let mut catalogs = self.write_table();
            let catalog = catalogs
                .get_mut(id)
                .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
            catalog.pinned = !catalog.pinned;
            catalog.pinned
        };
        self.persist_pins()?;
        tracing::debug!(catalog_id = %id, pinned, "Pin toggled");
        Ok(pinned)
    }

    /// Fetch the remote index and reconcile; single-flight per registry
    pub async fn sync_remote(&self) -> Result<SyncReport> {
        self.sync.sync(self).await
    }

    /// Merge a fetched index into the table and run the resulting installs
    pub(crate) async fn apply_index(&self, index: RemoteIndex) -> SyncReport {
        let mut report = SyncReport {
            skipped: index.skipped,
            ..SyncReport::default()
        };
        let user_removed = self.user_removed_ids();
        let pinned = self.pinned_ids();
        let mut to_install: Vec<CatalogId> = Vec::new();
        let mut to_update: Vec<CatalogId> = Vec::new();

        {
            let mut catalogs = self.write_table();
            for entry in index.entries {
                let id = entry.metadata.id.clone();
                match catalogs.get_mut(&id) {
                    None => {
                        let auto = entry.kind == CatalogKind::Native
                            && self.options.auto_install_new
                            && !user_removed.contains(&id);
                        catalogs.insert(
                            id.clone(),
                            Catalog {
                                metadata: entry.metadata.clone(),
                                kind: entry.kind,
                                install_state: InstallState::NotInstalled,
                                pinned: pinned.contains(&id),
                                remote: Some(entry),
                            },
                        );
                        if auto {
                            to_install.push(id);
                        } else {
                            report.available.push(id);
                        }
                    }
                    Some(catalog) => {
                        catalog.remote = Some(entry.clone());
                        if catalog.install_state.is_busy() {
                            continue;
                        }
                        if !catalog.install_state.is_installed() {
                            catalog.metadata = entry.metadata;
                            catalog.kind = entry.kind;
                            report.available.push(id);
                        } else if catalog.has_update() && self.options.auto_update {
                            to_update.push(id);
                        }
                    }
                }
            }
        }

        let installs = join_all(to_install.iter().map(|id| self.install(id)));
        let updates = join_all(to_update.iter().map(|id| self.update(id)));
        let (installs, updates) = futures::join!(installs, updates);

        for (id, result) in to_install.into_iter().zip(installs) {
            match result {
                Ok(_) => report.installed.push(id),
                Err(e) => report.failures.push(SyncFailure::new(id, &e)),
            }
        }
        for (id, result) in to_update.into_iter().zip(updates) {
            match result {
                Ok(_) => report.updated.push(id),
                Err(e) => report.failures.push(SyncFailure::new(id, &e)),
            }
        }

        report.installed.sort();
        report.updated.sort();
        report.available.sort();
        report
    }

    /// Hand out a runnable source, after validation and permission checks
    ///
    /// Script code and metadata are re-validated on every call. The catalog lock
    /// is held until permissions are settled, so a concurrent uninstall cannot
    /// leave grants behind.
    pub async fn get_source(&self, id: &str) -> SourceAccess {
        let guard = self.locks.lock(&id.to_string()).await;

        let Some(catalog) = self.get(id) else {
            return SourceAccess::Unavailable(format!("unknown catalog {}", id));
        };
        if !catalog.install_state.is_installed() {
            return SourceAccess::Unavailable(format!("{} is not installed", id));
        }
        let Some(runtime) = self.runtime.clone() else {
            return SourceAccess::Unavailable("no execution runtime configured".to_string());
        };

        if let ValidationResult::Invalid(reason) = self.validator.validate_metadata(&catalog.metadata) {
            return SourceAccess::Invalid(reason);
        }

        let script = match catalog.kind {
            CatalogKind::Script => match self.installer.read_script(id).await {
                Ok(source) => match self.validator.validate_code(&source) {
                    ValidationResult::Valid => Some(source),
                    ValidationResult::Invalid(reason) => {
                        tracing::warn!(catalog_id = %id, reason = %reason, "Installed script failed validation");
                        return SourceAccess::Invalid(reason);
                    }
                },
                Err(e) => return SourceAccess::Unavailable(e.to_string()),
            },
            CatalogKind::Native => {
                if let Err(e) = self.installer.platform().verify(id).await {
                    return if e.is_validation() {
                        SourceAccess::Invalid(e.to_string())
                    } else {
                        SourceAccess::Unavailable(e.to_string())
                    };
                }
                None
            }
        };
        let install_path = match catalog.kind {
            CatalogKind::Native => self.installer.platform().install_path(id),
            CatalogKind::Script => None,
        };

        let required = catalog.metadata.required_capabilities();
        if let PermissionResult::Denied { missing } = self.permissions.request_permissions(id, &required) {
            return SourceAccess::PermissionRequired(missing);
        }
        drop(guard);

        let request = LoadRequest {
            metadata: &catalog.metadata,
            kind: catalog.kind,
            script: script.as_deref(),
            install_path: install_path.as_deref(),
            logger: Arc::new(TracingPluginLogger::new(id)),
        };
        match runtime.load(request).await {
            Ok(context) => SourceAccess::Ready(ExecutionHandle::new(
                id.to_string(),
                context,
                self.permissions.clone(),
            )),
            Err(e) if e.is_validation() => SourceAccess::Invalid(e.to_string()),
            Err(e) => {
                tracing::warn!(catalog_id = %id, error = %e, "Runtime failed to load catalog");
                SourceAccess::Unavailable(e.to_string())
            }
        }
    }

    /// Typed filters of a loadable source; `None` if it cannot be loaded or declares none
    pub async fn get_filter_definitions(&self, id: &str) -> Option<BTreeMap<String, FilterDefinition>> {
        let handle = self.get_source(id).await.into_handle()?;
        let schema = handle.raw_filter_schema()?;
        Some(self.filters.convert_filters_value(&schema))
    }

    /// Ask for capabilities on behalf of an installed catalog
    pub async fn request_permissions(&self, id: &str, capabilities: &[Capability]) -> PermissionResult {
        let _guard = self.locks.lock(&id.to_string()).await;
        if !self.get(id).is_some_and(|c| c.install_state.is_installed()) {
            return PermissionResult::Denied {
                missing: capabilities.to_vec(),
            };
        }
        self.permissions.request_permissions(id, capabilities)
    }

    /// Icon bytes for a catalog, from cache or its declared source
    pub async fn load_icon(&self, id: &str) -> Option<Bytes> {
        let _guard = self.locks.lock(&id.to_string()).await;
        let catalog = self.get(id)?;
        let url = catalog.metadata.icon.as_deref()?;
        self.icons.load_icon(url, id).await
    }

    /// Replace whatever the previous version cached; caller must hold the catalog's lock
    async fn refresh_icon(&self, metadata: &PluginMetadata) {
        self.icons.clear_cache(&metadata.id).await;
        if let Some(url) = metadata.icon.as_deref() {
            self.icons.load_icon(url, &metadata.id).await;
        }
    }

    fn set_state(&self, id: &str, state: InstallState) {
        if let Some(catalog) = self.write_table().get_mut(id) {
            tracing::debug!(catalog_id = %id, from = ?catalog.install_state, to = ?state, "State change");
            catalog.install_state = state;
        }
    }

    fn read_table(&self) -> std::sync::RwLockReadGuard<'_, HashMap<CatalogId, Catalog>> {
        self.catalogs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_table(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<CatalogId, Catalog>> {
        self.catalogs.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<CatalogId, CancellationToken>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist_installed(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<InstallRecord> = self
            .read_table()
            .values()
            .filter(|c| c.install_state.is_installed())
            .map(|c| InstallRecord {
                metadata: c.metadata.clone(),
                kind: c.kind,
            })
            .collect();
        records.sort_by(|a, b| a.metadata.id.cmp(&b.metadata.id));
        self.prefs.set_json(INSTALLED_KEY, &records)
    }

    fn persist_pins(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().unwrap_or_else(|e| e.into_inner());
        let pinned: BTreeSet<CatalogId> = self
            .read_table()
            .values()
            .filter(|c| c.pinned)
            .map(|c| c.metadata.id.clone())
            .collect();
        self.prefs.set_json(PINNED_KEY, &pinned)
    }

    fn pinned_ids(&self) -> BTreeSet<CatalogId> {
        self.read_id_set(PINNED_KEY)
    }

    fn user_removed_ids(&self) -> BTreeSet<CatalogId> {
        self.read_id_set(USER_REMOVED_KEY)
    }

    fn read_id_set(&self, key: &str) -> BTreeSet<CatalogId> {
        match self.prefs.get_json(key) {
            Ok(ids) => ids.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Unreadable preference, treating as empty");
                BTreeSet::new()
            }
        }
    }

    fn set_user_removed(&self, id: &str, removed: bool) -> Result<()> {
        let _guard = self.persist_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids = self.user_removed_ids();
        let changed = if removed {
            ids.insert(id.to_string())
        } else {
            ids.remove(id)
        };
        if changed {
            self.prefs.set_json(USER_REMOVED_KEY, &ids)?;
        }
        Ok(())
    }
}

fn sort_for_display(catalogs: &mut [Catalog]) {
    catalogs.sort_by(|a, b| {
        b.pinned
            .cmp(&a.pinned)
            .then_with(|| a.metadata.name.to_lowercase().cmp(&b.metadata.name.to_lowercase()))
            .then_with(|| a.metadata.id.cmp(&b.metadata.id))
    });
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::catalog::index::testing::StaticIndexSource;
    use crate::catalog::installer::testing::FakePlatformInstaller;
    use crate::catalog::installer::InstallTimeouts;
    use crate::core::http::testing::FakeHttpClient;
    use crate::core::preferences::MemoryPreferenceStore;
    use crate::plugin::permissions::PermissionPolicy;
    use crate::plugin::sandbox::testing::EchoRuntime;
    use std::time::Duration;
    use tempfile::TempDir;

    pub const SCRIPT: &str = "function search(query) { return request(query); }";

    pub fn entry(id: &str, version: &str, kind: CatalogKind) -> IndexEntry {
        IndexEntry {
            metadata: PluginMetadata {
                id: id.to_string(),
                name: id.to_string(),
                version: version.to_string(),
                site: "https://acme.example".to_string(),
                lang: "en".to_string(),
                icon: None,
                description: None,
                permissions: vec![],
            },
            kind,
            url: format!("https://cdn.example/{}-{}.pkg", id, version),
        }
    }

    /// Registry wired to in-memory collaborators
    pub struct Harness {
        pub dir: TempDir,
        pub http: Arc<FakeHttpClient>,
        pub platform: Arc<FakePlatformInstaller>,
        pub source: Arc<StaticIndexSource>,
        pub prefs: Arc<MemoryPreferenceStore>,
        pub runtime: Arc<EchoRuntime>,
        pub registry: Arc<CatalogRegistry>,
    }

    impl Harness {
        pub fn new(entries: Vec<IndexEntry>) -> Self {
            Self::with_source(Arc::new(StaticIndexSource::new(entries)))
        }

        pub fn with_source(source: Arc<StaticIndexSource>) -> Self {
            Self::build(
                source,
                FakeHttpClient::new(),
                FakePlatformInstaller::new(),
                Arc::new(MemoryPreferenceStore::new()),
                EchoRuntime::default(),
            )
        }

        pub fn build(
            source: Arc<StaticIndexSource>,
            http: FakeHttpClient,
            platform: FakePlatformInstaller,
            prefs: Arc<MemoryPreferenceStore>,
            runtime: EchoRuntime,
        ) -> Self {
            let dir = TempDir::new().unwrap();
            let http = Arc::new(http);
            let platform = Arc::new(platform);
            let runtime = Arc::new(runtime);
            for entry in source.entries() {
                serve(&http, &entry);
            }

            let installer = NativeInstaller::new(
                http.clone(),
                platform.clone(),
                Arc::new(InstallationEvents::default()),
                dir.path().join("scripts"),
                InstallTimeouts::uniform(Duration::from_secs(5)),
            );
            let permissions = Arc::new(PermissionStore::new(prefs.clone(), PermissionPolicy::default()));
            let icons = Arc::new(IconCache::new(dir.path().join("cache"), http.clone(), 1024));
            let registry = CatalogRegistry::new(
                installer,
                prefs.clone(),
                permissions,
                icons,
                source.clone(),
                RegistryOptions::default(),
            )
            .with_runtime(runtime.clone());

            Self {
                dir,
                http,
                platform,
                source,
                prefs,
                runtime,
                registry: Arc::new(registry),
            }
        }

        pub fn set_index(&self, entries: Vec<IndexEntry>) {
            for entry in &entries {
                serve(&self.http, entry);
            }
            self.source.set_entries(entries);
        }
    }

    fn serve(http: &FakeHttpClient, entry: &IndexEntry) {
        match entry.kind {
            CatalogKind::Native => http.serve(&entry.url, "native bundle"),
            CatalogKind::Script => http.serve(&entry.url, SCRIPT),
        }
    }
}
