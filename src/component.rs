// src/component.rs

//! Component descriptors
//!
//! A component is a named unit of installation (a runtime, SDK or dev-kit).
//! Descriptors come from a TOML catalog and are read-only to the engine:
//!
//! ```toml
//! [[component]]
//! name = "jdk"
//! version = "21.0.2"
//! install_method = "archive"
//! dependencies = []
//!
//! [component.download]
//! url = "https://example.org/jdk-21.tar.gz"
//! sha256 = "..."
//!
//! [[component.environment]]
//! name = "JAVA_HOME"
//! value = "{install_path}"
//! ```

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::platform::EnvScope;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Placeholder expanded to the component's install path in env values and arguments
pub const INSTALL_PATH_PLACEHOLDER: &str = "{install_path}";

/// How a component's payload is put on the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallMethod {
    /// Unpack an archive into the install path
    Archive,
    /// Run a downloaded self-installing executable
    Executable,
    /// Hand a native package to the system package tool
    InstallerPackage,
    /// Run an install script
    Script,
}

impl InstallMethod {
    pub const ALL: [InstallMethod; 4] = [
        InstallMethod::Archive,
        InstallMethod::Executable,
        InstallMethod::InstallerPackage,
        InstallMethod::Script,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Archive => "archive",
            Self::Executable => "executable",
            Self::InstallerPackage => "installer-package",
            Self::Script => "script",
        }
    }
}

impl fmt::Display for InstallMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstallMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| Error::ValidationError(format!("Unknown install method: {}", s)))
    }
}

/// Where to fetch a component's payload from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSpec {
    pub url: String,
    /// Tried in order after `url` fails
    #[serde(default)]
    pub mirrors: Vec<String>,
    /// Expected SHA-256 (hex); unchecked when absent
    #[serde(default)]
    pub sha256: Option<String>,
    /// Target filename; derived from the URL when absent
    #[serde(default)]
    pub filename: Option<String>,
}

impl DownloadSpec {
    /// Filename the download is stored under
    pub fn file_name(&self) -> String {
        if let Some(ref name) = self.filename {
            return name.clone();
        }
        let trimmed = self.url.split(['?', '#']).next().unwrap_or(&self.url);
        trimmed
            .rsplit('/')
            .find(|s| !s.is_empty())
            .unwrap_or("download")
            .to_string()
    }

    /// Primary URL followed by mirrors
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.url.as_str()).chain(self.mirrors.iter().map(String::as_str))
    }
}

/// Post-install checks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSpec {
    /// Paths that must exist (relative paths are taken from the install path)
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    /// Commands (argv) that must exit zero; the first one's stdout is taken as the version
    #[serde(default)]
    pub commands: Vec<Vec<String>>,
}

impl VerificationSpec {
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.commands.is_empty()
    }
}

/// Environment variable a component sets on install
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvSetting {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub scope: EnvScope,
    /// Append `value` to the variable as a path-list entry instead of replacing it
    #[serde(default)]
    pub append_to_path: bool,
}

fn default_true() -> bool {
    true
}

/// A named unit of installation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Components that must never be installed alongside this one
    #[serde(default)]
    pub conflicts: Vec<String>,
    pub install_method: InstallMethod,
    #[serde(default)]
    pub download: Option<DownloadSpec>,
    #[serde(default)]
    pub install_args: Vec<String>,
    /// Explicit install location; defaults to `{install_root}/{name}`
    #[serde(default)]
    pub install_path: Option<PathBuf>,
    /// Shared base this component builds on (e.g. "python"); used for version conflicts
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub environment: Vec<EnvSetting>,
    /// Command (argv) that reverses an executable or script install
    #[serde(default)]
    pub uninstall_command: Option<Vec<String>>,
    /// Services the installer registers; stopped and removed on rollback
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub verification: VerificationSpec,
    /// Whether this component may install concurrently with its level peers
    #[serde(default = "default_true")]
    pub parallel_safe: bool,
}

impl Component {
    /// Minimal descriptor, mostly for tests and programmatic catalogs
    pub fn new(name: impl Into<String>, install_method: InstallMethod) -> Self {
        Self {
            name: name.into(),
            version: None,
            dependencies: Vec::new(),
            conflicts: Vec::new(),
            install_method,
            download: None,
            install_args: Vec::new(),
            install_path: None,
            base: None,
            environment: Vec::new(),
            uninstall_command: None,
            services: Vec::new(),
            verification: VerificationSpec::default(),
            parallel_safe: true,
        }
    }

    pub fn with_dependencies(mut self, deps: &[&str]) -> Self {
        self.dependencies = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    /// Resolved install location
    pub fn install_path(&self, config: &EngineConfig) -> PathBuf {
        self.install_path
            .clone()
            .unwrap_or_else(|| config.install_root().join(&self.name))
    }

    /// Replace the install path placeholder in `value`
    pub fn expand(&self, value: &str, install_path: &Path) -> String {
        value.replace(INSTALL_PATH_PLACEHOLDER, &install_path.to_string_lossy())
    }

    /// Check the descriptor is well formed
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::ValidationError("Component name is empty".to_string()));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(Error::ValidationError(format!(
                "Component name '{}' may only contain letters, digits, '-', '_' and '.'",
                self.name
            )));
        }
        // "." and ".." would resolve to the install root or above it
        if self.name.chars().all(|c| c == '.') {
            return Err(Error::ValidationError(format!(
                "Component name '{}' is not a usable directory name",
                self.name
            )));
        }
        if self.dependencies.iter().any(|d| d == &self.name) {
            return Err(Error::ValidationError(format!(
                "Component '{}' depends on itself",
                self.name
            )));
        }

        let needs_download = match self.install_method {
            InstallMethod::Archive | InstallMethod::Executable | InstallMethod::InstallerPackage => {
                true
            }
            InstallMethod::Script => self.install_args.is_empty(),
        };
        if needs_download && self.download.is_none() {
            return Err(Error::ValidationError(format!(
                "Component '{}' uses the {} method but has no download",
                self.name, self.install_method
            )));
        }

        for setting in &self.environment {
            if setting.name.is_empty() || setting.name.contains('=') {
                return Err(Error::ValidationError(format!(
                    "Component '{}' sets an invalid environment variable name '{}'",
                    self.name, setting.name
                )));
            }
        }

        if self.verification.commands.iter().any(|c| c.is_empty()) {
            return Err(Error::ValidationError(format!(
                "Component '{}' has an empty verification command",
                self.name
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    component: Vec<Component>,
}

/// Read-only set of known components keyed by name
#[derive(Debug, Clone, Default)]
pub struct ComponentCatalog {
    components: BTreeMap<String, Component>,
}

impl ComponentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog, validating every descriptor and rejecting duplicates
    pub fn from_components(components: Vec<Component>) -> Result<Self> {
        let mut catalog = Self::new();
        for component in components {
            catalog.insert(component)?;
        }
        Ok(catalog)
    }

    /// Load a catalog from a TOML file of `[[component]]` tables
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read catalog {}: {}", path.display(), e))
        })?;
        Self::parse(&content).map_err(|e| match e {
            Error::Toml(inner) => {
                Error::ConfigError(format!("Failed to parse catalog {}: {}", path.display(), inner))
            }
            other => other,
        })
    }

    /// Parse catalog TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(content)?;
        Self::from_components(file.component)
    }

    pub fn insert(&mut self, component: Component) -> Result<()> {
        component.validate()?;
        if self.components.contains_key(&component.name) {
            return Err(Error::ValidationError(format!(
                "Duplicate component '{}'",
                component.name
            )));
        }
        self.components.insert(component.name.clone(), component);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Component> {
        self.components
            .get(name)
            .ok_or_else(|| Error::UnknownComponent(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.components.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Component -> direct dependencies, for the requested names that exist
    pub fn dependency_map(&self, names: &[String]) -> HashMap<String, Vec<String>> {
        names
            .iter()
            .filter_map(|n| self.components.get(n))
            .map(|c| (c.name.clone(), c.dependencies.clone()))
            .collect()
    }
}
