//! Plugin trust layer
//!
//! This module provides everything that stands between untrusted plugin code
//! and execution:
//! - Static validation of script source and metadata
//! - Capability grants persisted per plugin
//! - Filter schema conversion between plugin and UI shapes
//! - The opaque execution boundary and plugin-scoped logging

pub mod filters;
pub mod logger;
pub mod permissions;
pub mod sandbox;
pub mod types;
pub mod validator;

pub use filters::{FilterDefinition, FilterOption, FilterSchemaBridge};
pub use logger::TracingPluginLogger;
pub use permissions::{Capability, PermissionPolicy, PermissionResult, PermissionStore};
pub use sandbox::{ExecutionContext, ExecutionHandle, LoadRequest, SourceAccess, SourceRuntime};
pub use types::{CatalogKind, PluginId, PluginLogger, PluginMetadata};
pub use validator::{check_version, ValidationEngine, ValidationResult};
