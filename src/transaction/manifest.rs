// src/transaction/manifest.rs

//! Durable transaction manifests
//!
//! Every committed or rolled-back transaction leaves
//! `{transactions_dir}/{tx_id}/transaction.json` behind. The manifest carries
//! the full operation log plus a flattened summary of what was touched, which
//! is enough to undo the transaction after the process that ran it is gone.

use super::operation::{AtomicOperation, OperationKind};
use super::TransactionState;
use crate::config::MANIFEST_FILE;
use crate::error::{Error, Result};
use crate::platform::EnvScope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Original value of an environment variable before the transaction touched it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvBackup {
    pub name: String,
    pub scope: EnvScope,
    /// `None` if the variable was unset
    pub original: Option<String>,
}

/// Summary of everything a transaction changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackInfo {
    pub backup_paths: Vec<PathBuf>,
    pub installed_files: Vec<PathBuf>,
    pub created_dirs: Vec<PathBuf>,
    pub modified_files: Vec<PathBuf>,
    pub env_backups: Vec<EnvBackup>,
    pub log: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionManifest {
    pub id: String,
    pub component: String,
    pub state: TransactionState,
    pub timestamp: DateTime<Utc>,
    pub operation_count: usize,
    pub rollback_info: RollbackInfo,
    pub operations: Vec<AtomicOperation>,
}

impl TransactionManifest {
    /// Build the manifest for a transaction's current operation log
    pub(super) fn build(
        id: &str,
        component: &str,
        state: TransactionState,
        operations: &[AtomicOperation],
        created_dirs: &[PathBuf],
        env_backups: &[EnvBackup],
        log: &[String],
    ) -> Self {
        let mut info = RollbackInfo {
            created_dirs: created_dirs.to_vec(),
            env_backups: env_backups.to_vec(),
            log: log.to_vec(),
            ..Default::default()
        };

        for op in operations.iter().filter(|op| op.completed) {
            if let Some(ref backup) = op.backup_path {
                info.backup_paths.push(backup.clone());
            }
            let Some(ref target) = op.target else {
                continue;
            };
            match op.kind {
                OperationKind::CreateFile if op.backup_path.is_none() => {
                    info.installed_files.push(target.clone())
                }
                OperationKind::CreateFile | OperationKind::ModifyFile => {
                    info.modified_files.push(target.clone())
                }
                OperationKind::ExtractArchive if op.metadata.created_target => {
                    info.installed_files.push(target.clone())
                }
                OperationKind::ExtractArchive => info.modified_files.push(target.clone()),
                _ => {}
            }
        }

        Self {
            id: id.to_string(),
            component: component.to_string(),
            state,
            timestamp: Utc::now(),
            operation_count: operations.len(),
            rollback_info: info,
            operations: operations.to_vec(),
        }
    }

    /// Whether a rollback of this manifest could still change anything
    pub fn rollback_available(&self) -> bool {
        matches!(
            self.state,
            TransactionState::Committed | TransactionState::Failed
        )
    }
}

/// Reads and writes manifests under the transactions directory
#[derive(Debug, Clone)]
pub struct ManifestStore {
    dir: PathBuf,
}

impl ManifestStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest_path(&self, tx_id: &str) -> PathBuf {
        self.dir.join(tx_id).join(MANIFEST_FILE)
    }

    /// Write `manifest`, replacing any earlier version for the same id
    pub fn save(&self, manifest: &TransactionManifest) -> Result<PathBuf> {
        let path = self.manifest_path(&manifest.id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(manifest)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| {
            Error::IoError(format!("Failed to write manifest {}: {}", tmp.display(), e))
        })?;
        fs::rename(&tmp, &path)?;

        debug!("Saved manifest for {} ({:?})", manifest.id, manifest.state);
        Ok(path)
    }

    pub fn load(&self, tx_id: &str) -> Result<TransactionManifest> {
        let path = self.manifest_path(tx_id);
        let content = fs::read_to_string(&path).map_err(|e| {
            Error::IoError(format!("Failed to read manifest {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Every readable manifest, ordered by transaction id
    pub fn list(&self) -> Result<Vec<TransactionManifest>> {
        let mut ids = self.ids()?;
        ids.sort();

        let mut manifests = Vec::with_capacity(ids.len());
        for id in ids {
            match self.load(&id) {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => warn!("Skipping unreadable manifest {}: {}", id, e),
            }
        }
        Ok(manifests)
    }

    /// Most recent manifest for `component`.
    ///
    /// Ids start with `{component}-` followed by a sortable timestamp, so the
    /// lexicographically greatest matching id is the latest. The recorded
    /// component name is checked too, since `go-` also prefixes `go-tools-`.
    pub fn latest_for(&self, component: &str) -> Result<Option<TransactionManifest>> {
        let prefix = format!("{}-", component);
        let mut ids: Vec<String> = self
            .ids()?
            .into_iter()
            .filter(|id| id.starts_with(&prefix))
            .collect();
        ids.sort_by(|a, b| b.cmp(a));

        for id in ids {
            match self.load(&id) {
                Ok(manifest) if manifest.component == component => return Ok(Some(manifest)),
                Ok(_) => continue,
                Err(e) => warn!("Skipping unreadable manifest {}: {}", id, e),
            }
        }
        Ok(None)
    }

    fn ids(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.path().join(MANIFEST_FILE).is_file() {
                ids.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        Ok(ids)
    }
}
