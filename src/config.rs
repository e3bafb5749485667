// src/config.rs

//! Engine configuration
//!
//! All on-disk state lives under `base_path`:
//!
//! ```text
//! {base_path}/
//!   components/                     default install root
//!   downloads/{component}/          fetched artifacts
//!   env/{user,system}.json          environment profile (FileEnvironmentStore)
//!   transactions/{tx_id}/
//!     transaction.json              manifest
//!     backup/                       scratch directory for backups
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location when no platform data directory is available
pub const DEFAULT_BASE_PATH: &str = "/var/lib/toolrig";

/// Name of the manifest file inside each transaction directory
pub const MANIFEST_FILE: &str = "transaction.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root of all engine state
    pub base_path: PathBuf,
    /// Where components are installed when they do not name a path
    pub install_root: Option<PathBuf>,
    /// Where downloads are placed before installation
    pub downloads_dir: Option<PathBuf>,
    /// Upper bound on concurrently installed components within a level
    pub max_parallel: usize,
    /// Timeout applied to every run-command operation
    pub command_timeout_secs: u64,
    /// Attempts per component when recovery is enabled
    pub max_attempts: u32,
    /// Backoff base; the delay before retry `n` is `base * 2^n`
    pub retry_backoff_base_secs: f64,
    /// Retry recoverable failures and roll back completed components on critical failure
    pub enable_recovery: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let base_path = dirs::data_local_dir()
            .map(|d| d.join("toolrig"))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BASE_PATH));
        Self::with_base_path(base_path)
    }
}

impl EngineConfig {
    /// Create a config rooted at `base_path` with default tuning
    pub fn with_base_path(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            install_root: None,
            downloads_dir: None,
            max_parallel: 4,
            command_timeout_secs: 600,
            max_attempts: 3,
            retry_backoff_base_secs: 1.0,
            enable_recovery: true,
        }
    }

    /// Load a config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            Error::ConfigError(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel == 0 {
            return Err(Error::ConfigError("max_parallel must be at least 1".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(Error::ConfigError("max_attempts must be at least 1".to_string()));
        }
        if self.retry_backoff_base_secs < 0.0 || !self.retry_backoff_base_secs.is_finite() {
            return Err(Error::ConfigError(
                "retry_backoff_base_secs must be a non-negative number".to_string(),
            ));
        }
        Ok(())
    }

    pub fn install_root(&self) -> PathBuf {
        self.install_root
            .clone()
            .unwrap_or_else(|| self.base_path.join("components"))
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.downloads_dir
            .clone()
            .unwrap_or_else(|| self.base_path.join("downloads"))
    }

    pub fn transactions_dir(&self) -> PathBuf {
        self.base_path.join("transactions")
    }

    pub fn env_dir(&self) -> PathBuf {
        self.base_path.join("env")
    }

    /// Scratch directory reserved for one transaction's backups
    pub fn scratch_dir(&self, tx_id: &str) -> PathBuf {
        self.transactions_dir().join(tx_id).join("backup")
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2f64.powi(attempt as i32);
        Duration::from_secs_f64(self.retry_backoff_base_secs * factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_derived_paths() {
        let config = EngineConfig::with_base_path("/opt/rig");

        assert_eq!(config.install_root(), PathBuf::from("/opt/rig/components"));
        assert_eq!(config.downloads_dir(), PathBuf::from("/opt/rig/downloads"));
        assert_eq!(config.transactions_dir(), PathBuf::from("/opt/rig/transactions"));
        assert_eq!(
            config.scratch_dir("jdk-1"),
            PathBuf::from("/opt/rig/transactions/jdk-1/backup")
        );
    }

    #[test]
    fn test_retry_delay_doubles() {
        let config = EngineConfig::with_base_path("/opt/rig");

        assert_eq!(config.retry_delay(1), Duration::from_secs(2));
        assert_eq!(config.retry_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_load_partial_toml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("toolrig.toml");
        fs::write(
            &path,
            "base_path = \"/srv/rig\"\nmax_parallel = 2\nenable_recovery = false\n",
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.base_path, PathBuf::from("/srv/rig"));
        assert_eq!(config.max_parallel, 2);
        assert!(!config.enable_recovery);
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn test_load_rejects_zero_parallel() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("toolrig.toml");
        fs::write(&path, "max_parallel = 0\n").unwrap();

        let err = EngineConfig::load(&path).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }
}
