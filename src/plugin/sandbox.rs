//! Opaque execution boundary for plugin code
//!
//! The interpreter (or native loader) lives outside this crate behind
//! [`SourceRuntime`]. The core only ever hands out an [`ExecutionHandle`], which
//! checks the [`PermissionStore`] before each privileged call reaches the runtime.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::error::{CatalogError, Result};
use crate::plugin::permissions::{Capability, PermissionStore};
use crate::plugin::types::{CatalogKind, PluginLogger, PluginMetadata};

/// A loaded plugin instance inside the external runtime
#[async_trait]
pub trait ExecutionContext: Send + Sync {
    /// Invoke a plugin entry point (e.g. "search", "getChapters")
    async fn call(&self, method: &str, args: Value) -> Result<Value>;

    /// Raw filter schema the plugin declares, if any
    fn filter_schema(&self) -> Option<Value> {
        None
    }
}

/// Everything a runtime needs to instantiate one plugin
pub struct LoadRequest<'a> {
    pub metadata: &'a PluginMetadata,
    pub kind: CatalogKind,
    /// Validated script text, for script catalogs
    pub script: Option<&'a str>,
    /// Installed package directory, for native catalogs
    pub install_path: Option<&'a Path>,
    pub logger: Arc<dyn PluginLogger>,
}

/// Factory for execution contexts, provided by the host
#[async_trait]
pub trait SourceRuntime: Send + Sync {
    async fn load(&self, request: LoadRequest<'_>) -> Result<Arc<dyn ExecutionContext>>;
}

/// Capability-checked handle to a loaded plugin
#[derive(Clone)]
pub struct ExecutionHandle {
    plugin_id: String,
    context: Arc<dyn ExecutionContext>,
    permissions: Arc<PermissionStore>,
}

impl ExecutionHandle {
    pub(crate) fn new(
        plugin_id: String,
        context: Arc<dyn ExecutionContext>,
        permissions: Arc<PermissionStore>,
    ) -> Self {
        Self {
            plugin_id,
            context,
            permissions,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Call into the plugin after confirming it holds every capability in `needs`
    pub async fn call(&self, method: &str, args: Value, needs: &[Capability]) -> Result<Value> {
        let missing: Vec<Capability> = needs
            .iter()
            .copied()
            .filter(|c| !self.permissions.has_permission(&self.plugin_id, *c))
            .collect();

        if !missing.is_empty() {
            tracing::warn!(
                plugin_id = %self.plugin_id,
                method = %method,
                missing = ?missing,
                "Blocked plugin call lacking permissions"
            );
            return Err(CatalogError::PermissionDenied(format!(
                "{} requires {:?} for {}",
                self.plugin_id, missing, method
            )));
        }

        self.context.call(method, args).await
    }

    pub fn raw_filter_schema(&self) -> Option<Value> {
        self.context.filter_schema()
    }
}

impl std::fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("plugin_id", &self.plugin_id)
            .finish_non_exhaustive()
    }
}

/// Result of asking for a runnable source
#[must_use = "only a Ready source may be executed"]
#[derive(Debug)]
pub enum SourceAccess {
    Ready(ExecutionHandle),
    /// Static validation failed; the plugin must not run
    Invalid(String),
    /// The user has to grant these capabilities first
    PermissionRequired(Vec<Capability>),
    /// Not installed, unknown, or no runtime available
    Unavailable(String),
}

impl SourceAccess {
    pub fn into_handle(self) -> Option<ExecutionHandle> {
        match self {
            SourceAccess::Ready(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, SourceAccess::Ready(_))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Runtime whose contexts echo their arguments
    #[derive(Default)]
    pub struct EchoRuntime {
        pub loads: AtomicUsize,
        pub filter_schema: Option<Value>,
    }

    pub struct EchoContext {
        pub plugin_id: String,
        pub filter_schema: Option<Value>,
    }

    #[async_trait]
    impl ExecutionContext for EchoContext {
        async fn call(&self, method: &str, args: Value) -> Result<Value> {
            Ok(serde_json::json!({"plugin": self.plugin_id, "method": method, "args": args}))
        }

        fn filter_schema(&self) -> Option<Value> {
            self.filter_schema.clone()
        }
    }

    #[async_trait]
    impl SourceRuntime for EchoRuntime {
        async fn load(&self, request: LoadRequest<'_>) -> Result<Arc<dyn ExecutionContext>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            request.logger.info("loaded");
            Ok(Arc::new(EchoContext {
                plugin_id: request.metadata.id.clone(),
                filter_schema: self.filter_schema.clone(),
            }))
        }
    }
}
