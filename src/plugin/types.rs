//! Plugin type definitions
//!
//! Identity and metadata shared by every catalog plugin, native or script.

use serde::{Deserialize, Serialize};

use crate::plugin::permissions::Capability;

/// Unique identifier for a plugin, stable across updates
pub type PluginId = String;

/// Plugin metadata
///
/// Declared by the plugin (script header or native manifest) and mirrored by
/// every remote index entry. Well-formedness is checked by
/// [`ValidationEngine::validate_metadata`](crate::plugin::validator::ValidationEngine::validate_metadata),
/// never assumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Identifier, lowercase ASCII letters, digits and dashes
    pub id: PluginId,

    /// Display name
    pub name: String,

    /// Semantic version, `X.Y.Z`
    pub version: String,

    /// Base URL of the hosting site the plugin scrapes
    pub site: String,

    /// Content language code (e.g. "en", "all")
    pub lang: String,

    /// Icon URL or data URI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Capability names the plugin needs at runtime (e.g. "NETWORK")
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
}

impl PluginMetadata {
    /// Parsed semantic version, if well-formed
    pub fn semver(&self) -> Option<semver::Version> {
        crate::plugin::validator::check_version(&self.version).ok()
    }

    /// Declared capabilities; unknown names are ignored and an empty
    /// declaration means network access only
    pub fn required_capabilities(&self) -> Vec<Capability> {
        if self.permissions.is_empty() {
            return vec![Capability::Network];
        }
        let mut caps: Vec<Capability> = self
            .permissions
            .iter()
            .filter_map(|name| Capability::from_name(name))
            .collect();
        caps.sort();
        caps.dedup();
        caps
    }
}

/// How a catalog is delivered and executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogKind {
    /// Platform-installed package (binary + manifest)
    Native,
    /// Script payload interpreted by the sandboxed runtime
    Script,
}

impl std::fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogKind::Native => write!(f, "native"),
            CatalogKind::Script => write!(f, "script"),
        }
    }
}

/// Logging capability handed to plugin code
///
/// Implementations are expected to attribute every line to the owning plugin.
pub trait PluginLogger: Send + Sync {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}
