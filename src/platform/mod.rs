// src/platform/mod.rs

//! Collaborators the installation engine consumes through narrow interfaces
//!
//! The engine never touches OS-specific primitives directly. Everything that
//! mutates the machine outside plain file writes goes through one of these
//! traits so it can be swapped out (and faked in tests):
//!
//! - [`EnvironmentStore`]: persistent environment variables per scope
//! - [`ArchiveExtractor`]: archive decompression
//! - [`Downloader`]: artifact fetch with checksum verification
//! - [`Preparer`]: pre-install directory/env setup
//! - [`Verifier`]: post-install checks
//! - [`RegistryStore`] and [`ServiceManager`]: undo targets for the rollback executor

mod archive;
mod download;
mod env;
mod prepare;
mod service;
mod verify;

pub use archive::TarArchiveExtractor;
pub use download::HttpDownloader;
pub use env::{is_elevated, FileEnvironmentStore, PATH_SEPARATOR};
pub use prepare::DirectoryPreparer;
pub use service::SystemctlServiceManager;
pub use verify::CommandVerifier;

use crate::component::{Component, DownloadSpec};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Scope an environment variable is persisted in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvScope {
    #[default]
    User,
    /// Machine-wide; writes need elevated privilege
    System,
}

impl EnvScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::System => "system",
        }
    }
}

impl fmt::Display for EnvScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistent environment variable storage.
///
/// `System` writes without privilege must fail with
/// `Error::PrivilegeRequired`; stores never escalate on their own.
pub trait EnvironmentStore: Send + Sync {
    fn get(&self, name: &str, scope: EnvScope) -> Result<Option<String>>;

    fn set(&self, name: &str, value: &str, scope: EnvScope) -> Result<()>;

    fn unset(&self, name: &str, scope: EnvScope) -> Result<()>;

    /// Append `entry` to PATH unless already present
    fn add_to_path(&self, entry: &str, scope: EnvScope) -> Result<()> {
        let current = self.get("PATH", scope)?.unwrap_or_default();
        if current.split(PATH_SEPARATOR).any(|e| e == entry) {
            return Ok(());
        }
        self.set("PATH", &append_path_entry(&current, entry), scope)
    }

    /// Drop every occurrence of `entry` from PATH
    fn remove_from_path(&self, entry: &str, scope: EnvScope) -> Result<()> {
        let Some(current) = self.get("PATH", scope)? else {
            return Ok(());
        };
        let remaining: Vec<&str> = current
            .split(PATH_SEPARATOR)
            .filter(|e| !e.is_empty() && *e != entry)
            .collect();
        self.set("PATH", &remaining.join(&PATH_SEPARATOR.to_string()), scope)
    }
}

/// `current` with `entry` appended as a path-list element
pub fn append_path_entry(current: &str, entry: &str) -> String {
    if current.is_empty() {
        entry.to_string()
    } else if current.split(PATH_SEPARATOR).any(|e| e == entry) {
        current.to_string()
    } else {
        format!("{}{}{}", current, PATH_SEPARATOR, entry)
    }
}

pub trait ArchiveExtractor: Send + Sync {
    /// Unpack `archive` into `dest`, creating it if needed
    fn extract(&self, archive: &Path, dest: &Path) -> Result<()>;
}

/// Outcome of a download attempt across all mirrors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub success: bool,
    pub local_path: Option<PathBuf>,
    pub error_message: Option<String>,
}

impl DownloadOutcome {
    pub fn ok(path: PathBuf) -> Self {
        Self {
            success: true,
            local_path: Some(path),
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            local_path: None,
            error_message: Some(message.into()),
        }
    }
}

/// Fetches component payloads. Retries and mirrors are handled inside;
/// callers see a single blocking call.
pub trait Downloader: Send + Sync {
    fn fetch(&self, spec: &DownloadSpec, dest_dir: &Path) -> DownloadOutcome;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparationReport {
    pub success: bool,
    pub errors: Vec<String>,
}

/// Creates whatever the install step assumes already exists
pub trait Preparer: Send + Sync {
    fn prepare(&self, components: &[&Component]) -> PreparationReport;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    pub success: bool,
    pub installed_path: Option<PathBuf>,
    pub version: Option<String>,
    pub details: BTreeMap<String, String>,
}

pub trait Verifier: Send + Sync {
    fn verify(&self, component: &Component, install_path: &Path) -> VerificationReport;
}

/// Hierarchical key/value configuration store (a registry on platforms that have one)
pub trait RegistryStore: Send + Sync {
    fn get_value(&self, key: &str, name: &str) -> Result<Option<String>>;

    fn set_value(&self, key: &str, name: &str, value: &str) -> Result<()>;

    fn delete_value(&self, key: &str, name: &str) -> Result<()>;

    fn delete_key(&self, key: &str) -> Result<()>;
}

pub trait ServiceManager: Send + Sync {
    fn stop(&self, service: &str) -> Result<()>;

    fn remove(&self, service: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_path_entry() {
        let sep = PATH_SEPARATOR;
        assert_eq!(append_path_entry("", "/opt/go/bin"), "/opt/go/bin");
        assert_eq!(
            append_path_entry(&format!("/usr/bin{sep}/bin"), "/opt/go/bin"),
            format!("/usr/bin{sep}/bin{sep}/opt/go/bin")
        );
        assert_eq!(append_path_entry("/usr/bin", "/usr/bin"), "/usr/bin");
    }

    #[test]
    fn test_scope_serde() {
        let scope: EnvScope = serde_json::from_str("\"system\"").unwrap();
        assert_eq!(scope, EnvScope::System);
        assert_eq!(EnvScope::default().to_string(), "user");
    }
}
