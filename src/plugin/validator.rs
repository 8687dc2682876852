//! Static safety checks for untrusted plugin code and metadata
//!
//! Every check here is pure and deterministic: no I/O, no caching. A script that
//! fails any check must never be handed to an execution context.

use std::net::{Ipv4Addr, Ipv6Addr};

use lazy_static::lazy_static;
use regex::Regex;
use url::{Host, Url};

use crate::core::error::{CatalogError, Result};
use crate::plugin::types::PluginMetadata;

lazy_static! {
    static ref PLUGIN_ID: Regex = Regex::new(r"^[a-z0-9-]+$").unwrap();
    static ref VERSION: Regex = Regex::new(r"^\d+\.\d+\.\d+$").unwrap();
    static ref FUNCTION_LIKE: Regex =
        Regex::new(r"\bfunction\b|=>|\bclass\s+[A-Za-z_$]|\b(module\.)?exports\b").unwrap();
    static ref DANGEROUS_REQUIRE: Regex = Regex::new(
        r#"\brequire\s*\(\s*['"`](node:)?(child_process|fs|fs/promises|os|vm|worker_threads|process|cluster|net|dgram|module)['"`]\s*\)"#
    )
    .unwrap();
    static ref DYNAMIC_IMPORT: Regex = Regex::new(r"\bimport\s*\(").unwrap();
    static ref DENIED: Vec<(Regex, &'static str)> = DENIED_PATTERNS
        .iter()
        .map(|(pattern, description)| (Regex::new(pattern).unwrap(), *description))
        .collect();
}

/// Constructs that are never allowed in plugin source
///
/// Member access and call sites tolerate whitespace around `.` and before `(`,
/// as the JavaScript grammar does.
const DENIED_PATTERNS: &[(&str, &str)] = &[
    (r"\beval\s*\(", "dynamic code evaluation (eval)"),
    (r"\bFunction\s*\(", "dynamic code evaluation (Function constructor)"),
    (r"\bprocess\s*\.\s*exit\b", "process termination"),
    (r"\bprocess\s*\.\s*binding\b", "native process bindings"),
    (r"\bprocess\s*\.\s*env\b", "host environment access"),
    (r"\bprocess\s*\.\s*mainModule\b", "host module introspection"),
    (r"\bprocess\s*\[", "computed process access"),
    (r"child_process", "subprocess spawning"),
    (r"__dirname|__filename", "host module path introspection"),
    (r"\brequire\s*\.\s*main\b", "host module introspection"),
    (r"\bmodule\s*\.\s*constructor\b", "host module loader access"),
    (r"\bglobalThis\s*\.\s*constructor\b", "global constructor escape"),
    (r#"\bset(Timeout|Interval)\s*\(\s*["'`]"#, "string-evaluated timer"),
    (r"\bDeno\s*\.", "host runtime API access"),
];

/// Outcome of a validation check
///
/// Callers must inspect this before executing anything; use
/// [`into_result`](Self::into_result) to propagate it with `?`.
#[must_use = "a validation result must be checked before running plugin code"]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid(String),
}

impl ValidationResult {
    pub fn invalid(reason: impl Into<String>) -> Self {
        ValidationResult::Invalid(reason.into())
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    /// Reason for rejection, if any
    pub fn reason(&self) -> Option<&str> {
        match self {
            ValidationResult::Valid => None,
            ValidationResult::Invalid(reason) => Some(reason),
        }
    }

    /// Chain another check, short-circuiting on the first failure
    pub fn and_then(self, next: impl FnOnce() -> ValidationResult) -> ValidationResult {
        match self {
            ValidationResult::Valid => next(),
            invalid => invalid,
        }
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            ValidationResult::Valid => Ok(()),
            ValidationResult::Invalid(reason) => Err(CatalogError::ValidationError(reason)),
        }
    }
}

/// Static validator for plugin source, metadata, file paths and network targets
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationEngine;

impl ValidationEngine {
    pub fn new() -> Self {
        Self
    }

    /// Validate script source
    ///
    /// Rejects blank sources, any deny-listed construct, and sources without a
    /// single function-like construct. The last check is a heuristic and only
    /// filters out payloads that cannot possibly be a plugin.
    pub fn validate_code(&self, source: &str) -> ValidationResult {
        if source.trim().is_empty() {
            return ValidationResult::invalid("plugin source is empty");
        }

        for (pattern, description) in DENIED.iter() {
            if let Some(found) = pattern.find(source) {
                return ValidationResult::invalid(format!(
                    "forbidden construct `{}`: {}",
                    found.as_str(),
                    description
                ));
            }
        }

        if let Some(found) = DANGEROUS_REQUIRE.find(source) {
            return ValidationResult::invalid(format!(
                "forbidden module import `{}`",
                found.as_str()
            ));
        }

        if DYNAMIC_IMPORT.is_match(source) {
            return ValidationResult::invalid("dynamic import() is not allowed");
        }

        if !FUNCTION_LIKE.is_match(source) {
            return ValidationResult::invalid("source does not contain any executable plugin code");
        }

        ValidationResult::Valid
    }

    /// Validate declared metadata
    pub fn validate_metadata(&self, meta: &PluginMetadata) -> ValidationResult {
        if !PLUGIN_ID.is_match(&meta.id) {
            return ValidationResult::invalid(format!(
                "invalid plugin id `{}`: only lowercase letters, digits and '-' are allowed",
                meta.id
            ));
        }

        if let Err(e) = check_version(&meta.version) {
            return ValidationResult::invalid(e.to_string());
        }

        if meta.name.trim().is_empty() {
            return ValidationResult::invalid("plugin name must not be blank");
        }
        if meta.site.trim().is_empty() {
            return ValidationResult::invalid("plugin site must not be blank");
        }
        if meta.lang.trim().is_empty() {
            return ValidationResult::invalid("plugin lang must not be blank");
        }

        if let Some(icon) = &meta.icon {
            let icon = icon.trim();
            let acceptable = icon.is_empty()
                || icon.starts_with("http://")
                || icon.starts_with("https://")
                || icon.starts_with("data:");
            if !acceptable {
                return ValidationResult::invalid(format!(
                    "icon must be an http(s) URL or a data URI, got `{}`",
                    icon
                ));
            }
        }

        ValidationResult::Valid
    }

    /// Validate metadata, then code
    pub fn validate(&self, source: &str, meta: &PluginMetadata) -> ValidationResult {
        self.validate_metadata(meta)
            .and_then(|| self.validate_code(source))
    }

    /// Validate a plugin-relative file path
    pub fn validate_file_access(&self, path: &str, plugin_id: &str) -> ValidationResult {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return ValidationResult::invalid(format!("plugin {} requested an empty path", plugin_id));
        }

        let is_absolute = trimmed.starts_with('/')
            || trimmed.starts_with('\\')
            || std::path::Path::new(trimmed).is_absolute()
            || has_drive_prefix(trimmed);
        if is_absolute {
            return ValidationResult::invalid(format!(
                "plugin {} requested absolute path `{}`",
                plugin_id, path
            ));
        }

        if trimmed.contains("..") {
            return ValidationResult::invalid(format!(
                "plugin {} requested path traversal `{}`",
                plugin_id, path
            ));
        }

        if trimmed.contains(['~', '$', '\0']) {
            return ValidationResult::invalid(format!(
                "plugin {} requested path with shell expansion characters `{}`",
                plugin_id, path
            ));
        }

        ValidationResult::Valid
    }

    /// Validate an outbound request URL
    ///
    /// Loopback, private, link-local and unspecified hosts are rejected unless
    /// `allow_localhost` is set.
    pub fn validate_network_request(&self, url: &str, allow_localhost: bool) -> ValidationResult {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => return ValidationResult::invalid(format!("malformed URL `{}`: {}", url, e)),
        };

        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return ValidationResult::invalid(format!("scheme `{}` is not allowed", other));
            }
        }

        let host = match parsed.host() {
            Some(host) => host,
            None => return ValidationResult::invalid(format!("URL `{}` has no host", url)),
        };

        if allow_localhost {
            return ValidationResult::Valid;
        }

        let local = match host {
            Host::Domain(domain) => {
                let domain = domain.trim_end_matches('.').to_ascii_lowercase();
                domain == "localhost" || domain.ends_with(".localhost")
            }
            Host::Ipv4(ip) => is_local_v4(ip),
            Host::Ipv6(ip) => is_local_v6(ip),
        };

        if local {
            return ValidationResult::invalid(format!(
                "requests to local or private addresses are not allowed: {}",
                url
            ));
        }

        ValidationResult::Valid
    }
}

/// Parse a declared version, enforcing the `X.Y.Z` shape
///
/// Components are read as plain integers, so `01.0.0` compares equal to `1.0.0`.
/// Only components that overflow fail to parse.
pub fn check_version(version: &str) -> Result<semver::Version> {
    if !VERSION.is_match(version) {
        return Err(CatalogError::IncompatibleVersion(format!(
            "version `{}` is not of the form X.Y.Z",
            version
        )));
    }

    let mut parts = version.split('.').map(str::parse::<u64>);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(Ok(major)), Some(Ok(minor)), Some(Ok(patch))) => {
            Ok(semver::Version::new(major, minor, patch))
        }
        _ => {
            tracing::warn!(version = %version, "Unparseable plugin version");
            Err(CatalogError::IncompatibleVersion(format!(
                "version `{}` has out-of-range components",
                version
            )))
        }
    }
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn is_local_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 100.64.0.0/10 carrier-grade NAT
        || (ip.octets()[0] == 100 && (ip.octets()[1] & 0xc0) == 64)
}

fn is_local_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_local_v4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}
