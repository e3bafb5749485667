// src/platform/env.rs

//! File-backed environment profile
//!
//! Variables are kept per scope in `{dir}/{scope}.json`. Shell integration
//! sources the generated profile; the store itself only records values.

use super::{EnvScope, EnvironmentStore};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

#[cfg(windows)]
pub const PATH_SEPARATOR: char = ';';
#[cfg(not(windows))]
pub const PATH_SEPARATOR: char = ':';

/// Whether the current process runs with an effective uid of 0
#[cfg(unix)]
pub fn is_elevated() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn is_elevated() -> bool {
    false
}

pub struct FileEnvironmentStore {
    dir: PathBuf,
    elevated: bool,
    lock: Mutex<()>,
}

impl FileEnvironmentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            elevated: is_elevated(),
            lock: Mutex::new(()),
        }
    }

    /// Override the privilege check (system-scope writes are refused when false)
    pub fn with_elevated(mut self, elevated: bool) -> Self {
        self.elevated = elevated;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn profile_path(&self, scope: EnvScope) -> PathBuf {
        self.dir.join(format!("{}.json", scope.as_str()))
    }

    fn read_profile(&self, scope: EnvScope) -> Result<BTreeMap<String, String>> {
        let path = self.profile_path(scope);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&path).map_err(|e| {
            Error::EnvironmentError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write_profile(&self, scope: EnvScope, vars: &BTreeMap<String, String>) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.profile_path(scope);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(vars)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn check_writable(&self, name: &str, scope: EnvScope) -> Result<()> {
        if scope == EnvScope::System && !self.elevated {
            return Err(Error::PrivilegeRequired(format!(
                "writing system environment variable {} requires elevated privilege",
                name
            )));
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| Error::EnvironmentError("environment store lock poisoned".to_string()))
    }
}

impl EnvironmentStore for FileEnvironmentStore {
    fn get(&self, name: &str, scope: EnvScope) -> Result<Option<String>> {
        let _guard = self.lock()?;
        Ok(self.read_profile(scope)?.get(name).cloned())
    }

    fn set(&self, name: &str, value: &str, scope: EnvScope) -> Result<()> {
        self.check_writable(name, scope)?;
        let _guard = self.lock()?;
        let mut vars = self.read_profile(scope)?;
        vars.insert(name.to_string(), value.to_string());
        self.write_profile(scope, &vars)?;
        debug!("Set {} environment variable {}", scope, name);
        Ok(())
    }

    fn unset(&self, name: &str, scope: EnvScope) -> Result<()> {
        self.check_writable(name, scope)?;
        let _guard = self.lock()?;
        let mut vars = self.read_profile(scope)?;
        if vars.remove(name).is_some() {
            self.write_profile(scope, &vars)?;
            debug!("Unset {} environment variable {}", scope, name);
        }
        Ok(())
    }
}
