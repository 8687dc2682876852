//! Reader Catalogs Library
//!
//! Discovery, installation, verification and permission gating of third-party
//! content catalogs (native packages and sandboxed scripts) for a reading client.

pub mod cache;
pub mod catalog;
pub mod core;
pub mod plugin;

// Re-export commonly used types
pub use crate::cache::IconCache;
pub use crate::catalog::{Catalog, CatalogRegistry, InstallState, SyncReport};
pub use crate::core::{CatalogError, Config};
pub use crate::plugin::{FilterSchemaBridge, PermissionStore, ValidationEngine};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
