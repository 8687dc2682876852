//! Core infrastructure module
//!
//! This module provides the shared application layer including:
//! - Configuration management
//! - Structured logging system
//! - Error handling and type system
//! - Preference persistence
//! - HTTP downloads and per-key async locking

pub mod config;
pub mod error;
pub mod http;
pub mod keyed_lock;
pub mod logging;
pub mod preferences;
pub mod utils;

pub use config::Config;
pub use error::{CatalogError, ErrorContext, Result};
pub use http::{download_cancellable, HttpClient, ReqwestHttpClient};
pub use keyed_lock::{KeyedGuard, KeyedLocks};
pub use logging::Logger;
pub use preferences::{FilePreferenceStore, MemoryPreferenceStore, PreferenceStore, PreferenceStoreExt};
