//! Catalog lifecycle
//!
//! This module provides the catalog layer including:
//! - The registry owning every known catalog and its install state
//! - Native and script installation with change events
//! - Local extraction of native bundles
//! - Remote index parsing and single-flight synchronization

pub mod events;
pub mod index;
pub mod installer;
pub mod package;
pub mod registry;
pub mod sync;
pub mod types;

pub use events::{InstallProgress, InstallationChangeEvent, InstallationChangeKind, InstallationEvents};
pub use index::{HttpIndexSource, IndexEntry, IndexSource, RemoteIndex, SkippedEntry};
pub use installer::{InstallTimeouts, NativeInstaller, PlatformInstaller};
pub use package::{InstallReceipt, LocalPackageInstaller};
pub use registry::{CatalogRegistry, RegistryOptions, UpdateReport};
pub use sync::{RemoteIndexSync, SyncFailure, SyncReport};
pub use types::{Catalog, CatalogId, InstallState, InstallStep};
