// src/transaction/mod.rs

//! Atomic transactions for component installs
//!
//! A transaction groups the reversible mutations of one install attempt.
//! Every mutation is recorded as an [`AtomicOperation`]; anything it would
//! destroy is copied into the transaction's scratch directory before it is
//! touched, so the whole attempt can be undone.
//!
//! # Lifecycle
//!
//! ```text
//! INACTIVE -> ACTIVE -> COMMITTING -> COMMITTED
//!                  \                      |
//!                   +----> ROLLING_BACK <-+
//!                              |
//!                              +-> ROLLED_BACK   (every inverse succeeded)
//!                              +-> FAILED        (partial rollback)
//! ```
//!
//! Operations execute in the order added and are undone in reverse. Created
//! directories and environment variable originals are restored in separate
//! passes after the operation walk, deepest directory first.

pub mod backup;
mod manifest;
mod operation;

pub use manifest::{EnvBackup, ManifestStore, RollbackInfo, TransactionManifest};
pub use operation::{AtomicOperation, OperationKind, OperationMetadata};

use crate::command::{run_checked, run_command};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::platform::{ArchiveExtractor, EnvironmentStore};
use crate::rollback::RollbackReport;
use backup::{copy_tree, first_missing_ancestor, is_non_empty_dir, remove_path};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Transaction state machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionState {
    /// Created, nothing recorded yet
    Inactive,
    /// Accepting and executing operations
    Active,
    Committing,
    Committed,
    RollingBack,
    /// Every inverse succeeded
    RolledBack,
    /// Rollback left some state un-reverted
    Failed,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::RollingBack => "rolling-back",
            Self::RolledBack => "rolled-back",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Failed)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build a transaction id that sorts by creation time within a component
pub fn new_transaction_id(component: &str) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}",
        component,
        Utc::now().format("%Y%m%d%H%M%S%3f"),
        &uuid[..8]
    )
}

/// Hands out transactions and replays persisted ones
pub struct TransactionEngine {
    config: EngineConfig,
    store: ManifestStore,
    env: Arc<dyn EnvironmentStore>,
    extractor: Arc<dyn ArchiveExtractor>,
}

impl TransactionEngine {
    pub fn new(
        config: &EngineConfig,
        env: Arc<dyn EnvironmentStore>,
        extractor: Arc<dyn ArchiveExtractor>,
    ) -> Result<Self> {
        fs::create_dir_all(config.transactions_dir())?;
        Ok(Self {
            config: config.clone(),
            store: ManifestStore::new(config.transactions_dir()),
            env,
            extractor,
        })
    }

    pub fn manifests(&self) -> &ManifestStore {
        &self.store
    }

    /// New inactive transaction for one install attempt of `component`
    pub fn create(&self, component: &str) -> AtomicTransaction {
        let id = new_transaction_id(component);
        AtomicTransaction {
            scratch_dir: self.config.scratch_dir(&id),
            id,
            component: component.to_string(),
            state: TransactionState::Inactive,
            operations: Vec::new(),
            created_dirs: Vec::new(),
            env_backups: Vec::new(),
            log: Vec::new(),
            started_at: Utc::now(),
            store: self.store.clone(),
            env: Arc::clone(&self.env),
            extractor: Arc::clone(&self.extractor),
            command_timeout: self.config.command_timeout(),
        }
    }

    /// Rebuild a transaction from its manifest so it can be rolled back
    pub fn restore(&self, manifest: TransactionManifest) -> AtomicTransaction {
        let info = manifest.rollback_info;
        AtomicTransaction {
            scratch_dir: self.config.scratch_dir(&manifest.id),
            id: manifest.id,
            component: manifest.component,
            state: manifest.state,
            operations: manifest.operations,
            created_dirs: info.created_dirs,
            env_backups: info.env_backups,
            log: info.log,
            started_at: manifest.timestamp,
            store: self.store.clone(),
            env: Arc::clone(&self.env),
            extractor: Arc::clone(&self.extractor),
            command_timeout: self.config.command_timeout(),
        }
    }

    /// Undo a persisted transaction
    pub fn rollback_manifest(&self, manifest: TransactionManifest) -> Result<RollbackReport> {
        if !manifest.rollback_available() {
            info!(
                "Transaction {} is {}; nothing to roll back",
                manifest.id, manifest.state
            );
            return Ok(RollbackReport::new());
        }
        self.restore(manifest).rollback()
    }

    /// Undo the most recent persisted transaction for `component`
    pub fn rollback_latest(&self, component: &str) -> Result<Option<RollbackReport>> {
        match self.store.latest_for(component)? {
            Some(manifest) => self.rollback_manifest(manifest).map(Some),
            None => Ok(None),
        }
    }
}

/// The reversible mutations of one install attempt
pub struct AtomicTransaction {
    id: String,
    component: String,
    state: TransactionState,
    operations: Vec<AtomicOperation>,
    scratch_dir: PathBuf,
    /// Outermost directories this transaction created
    created_dirs: Vec<PathBuf>,
    /// First captured value per (variable, scope)
    env_backups: Vec<EnvBackup>,
    log: Vec<String>,
    started_at: DateTime<Utc>,
    store: ManifestStore,
    env: Arc<dyn EnvironmentStore>,
    extractor: Arc<dyn ArchiveExtractor>,
    command_timeout: Duration,
}

impl AtomicTransaction {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn operations(&self) -> &[AtomicOperation] {
        &self.operations
    }

    pub fn operation(&self, id: &str) -> Option<&AtomicOperation> {
        self.operations.iter().find(|op| op.id == id)
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn created_dirs(&self) -> &[PathBuf] {
        &self.created_dirs
    }

    pub fn log(&self) -> &[String] {
        &self.log
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Snapshot of the transaction as it would be persisted now
    pub fn manifest(&self) -> TransactionManifest {
        TransactionManifest::build(
            &self.id,
            &self.component,
            self.state,
            &self.operations,
            &self.created_dirs,
            &self.env_backups,
            &self.log,
        )
    }

    fn note(&mut self, message: String) {
        debug!("[{}] {}", self.id, message);
        self.log.push(format!("{} {}", Utc::now().to_rfc3339(), message));
    }

    fn require_active(&self, action: &str) -> Result<()> {
        if self.state == TransactionState::Active {
            Ok(())
        } else {
            Err(Error::TransactionError(format!(
                "Cannot {} in transaction {}: state is {}",
                action, self.id, self.state
            )))
        }
    }

    /// Move from inactive to active and reserve the scratch directory
    pub fn begin(&mut self) -> Result<()> {
        if self.state != TransactionState::Inactive {
            return Err(Error::TransactionError(format!(
                "Cannot begin transaction {}: state is {}",
                self.id, self.state
            )));
        }
        fs::create_dir_all(&self.scratch_dir).map_err(|e| {
            Error::IoError(format!(
                "Failed to create scratch directory {}: {}",
                self.scratch_dir.display(),
                e
            ))
        })?;
        self.state = TransactionState::Active;
        self.note(format!("begin for {}", self.component));
        info!("Began transaction {}", self.id);
        Ok(())
    }

    /// Record `op` without executing it; returns its id
    pub fn add_operation(&mut self, op: AtomicOperation) -> Result<String> {
        self.require_active("add operation")?;
        let id = op.id.clone();
        self.note(format!("add {} ({})", op.describe(), id));
        self.operations.push(op);
        Ok(id)
    }

    /// Execute a previously added operation.
    ///
    /// A failed operation stays in the log with `completed = false`.
    /// Executing an already completed operation does nothing.
    pub fn execute_operation(&mut self, id: &str) -> Result<()> {
        self.require_active("execute operation")?;
        let index = self
            .operations
            .iter()
            .position(|op| op.id == id)
            .ok_or_else(|| {
                Error::TransactionError(format!(
                    "Operation {} is not part of transaction {}",
                    id, self.id
                ))
            })?;
        if self.operations[index].completed {
            return Ok(());
        }

        let mut op = self.operations[index].clone();
        let result = self.perform(&mut op);
        let label = op.describe();
        match result {
            Ok(()) => {
                op.completed = true;
                self.operations[index] = op;
                self.note(format!("done {}", label));
                Ok(())
            }
            Err(e) => {
                op.metadata.error = Some(e.to_string());
                self.operations[index] = op;
                warn!("Operation {} failed in {}: {}", label, self.id, e);
                self.note(format!("failed {}: {}", label, e));
                Err(Error::OperationFailed {
                    operation: label,
                    source: Box::new(e),
                })
            }
        }
    }

    /// Add and execute in one step
    pub fn apply(&mut self, op: AtomicOperation) -> Result<String> {
        let id = self.add_operation(op)?;
        self.execute_operation(&id)?;
        Ok(id)
    }

    fn backup_location(&self, op: &AtomicOperation, original: &Path) -> PathBuf {
        let name = original
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "root".to_string());
        self.scratch_dir.join(&op.id).join(name)
    }

    fn perform(&mut self, op: &mut AtomicOperation) -> Result<()> {
        match op.kind {
            OperationKind::CreateFile | OperationKind::ModifyFile => self.write_file(op),
            OperationKind::CreateDirectory => self.create_directory(op),
            OperationKind::SetEnvironmentVariable => self.set_env(op),
            OperationKind::RunCommand => self.run(op),
            OperationKind::ExtractArchive => self.extract(op),
        }
    }

    fn write_file(&mut self, op: &mut AtomicOperation) -> Result<()> {
        let target = required_target(op)?;
        let content = op.new_value.clone().unwrap_or_default();

        if target.is_dir() {
            return Err(Error::ValidationError(format!(
                "{} is a directory",
                target.display()
            )));
        }
        if target.symlink_metadata().is_ok() {
            if op.kind == OperationKind::ModifyFile {
                op.previous_value = fs::read_to_string(&target).ok();
            }
            let backup = self.backup_location(op, &target);
            copy_tree(&target, &backup)?;
            op.backup_path = Some(backup);
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, content).map_err(|e| {
            Error::IoError(format!("Failed to write {}: {}", target.display(), e))
        })?;
        op.metadata.created_target = op.backup_path.is_none();
        Ok(())
    }

    fn create_directory(&mut self, op: &mut AtomicOperation) -> Result<()> {
        let target = required_target(op)?;
        if target.is_dir() {
            return Ok(());
        }
        if target.exists() {
            return Err(Error::ValidationError(format!(
                "{} exists and is not a directory",
                target.display()
            )));
        }

        let outermost = first_missing_ancestor(&target).unwrap_or_else(|| target.clone());
        fs::create_dir_all(&target).map_err(|e| {
            Error::IoError(format!("Failed to create {}: {}", target.display(), e))
        })?;
        op.metadata.created_target = true;
        if !self.created_dirs.contains(&outermost) {
            self.created_dirs.push(outermost);
        }
        Ok(())
    }

    fn set_env(&mut self, op: &mut AtomicOperation) -> Result<()> {
        let name = op
            .metadata
            .env_name
            .clone()
            .ok_or_else(|| Error::ValidationError("environment operation has no name".to_string()))?;
        let scope = op.metadata.env_scope.unwrap_or_default();
        let value = op.new_value.clone().unwrap_or_default();

        let prior = self.env.get(&name, scope)?;
        op.previous_value = prior.clone();
        self.env.set(&name, &value, scope)?;

        if !self
            .env_backups
            .iter()
            .any(|b| b.name == name && b.scope == scope)
        {
            self.env_backups.push(EnvBackup {
                name,
                scope,
                original: prior,
            });
        }
        Ok(())
    }

    fn run(&mut self, op: &mut AtomicOperation) -> Result<()> {
        let command = op
            .metadata
            .command
            .clone()
            .ok_or_else(|| Error::ValidationError("run-command operation has no command".to_string()))?;
        let timeout = op
            .metadata
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.command_timeout);

        let output = run_command(&command, timeout)?;
        let exit_code = output.exit_code;
        let stderr = output.stderr.trim().to_string();
        op.metadata.output = Some(output);

        if exit_code != 0 {
            return Err(Error::CommandFailed {
                command: command.display(),
                exit_code,
                stderr,
            });
        }
        Ok(())
    }

    fn extract(&mut self, op: &mut AtomicOperation) -> Result<()> {
        let dest = required_target(op)?;
        let archive = op
            .new_value
            .as_ref()
            .map(PathBuf::from)
            .ok_or_else(|| Error::ValidationError("extract operation has no archive".to_string()))?;
        if !archive.is_file() {
            return Err(Error::ValidationError(format!(
                "archive {} does not exist",
                archive.display()
            )));
        }

        let existed = dest.exists();
        if is_non_empty_dir(&dest) {
            let backup = self.backup_location(op, &dest);
            copy_tree(&dest, &backup)?;
            op.backup_path = Some(backup);
        }
        op.metadata.created_target = !existed;

        self.extractor.extract(&archive, &dest)
    }

    /// Inverse of a completed operation.
    ///
    /// Directory creation and environment changes are reverted by the passes
    /// that follow the operation walk, so their inverse here is empty.
    fn undo(&self, op: &AtomicOperation) -> Result<()> {
        match op.kind {
            OperationKind::CreateFile | OperationKind::ModifyFile => {
                let target = required_target(op)?;
                match (&op.backup_path, &op.previous_value) {
                    (Some(backup), _) if backup.exists() => copy_tree(backup, &target),
                    (_, Some(text)) => fs::write(&target, text).map_err(Error::from),
                    (Some(backup), None) => Err(Error::RollbackError(format!(
                        "backup {} of {} is missing",
                        backup.display(),
                        target.display()
                    ))),
                    (None, None) => remove_path(&target),
                }
            }
            OperationKind::CreateDirectory | OperationKind::SetEnvironmentVariable => Ok(()),
            OperationKind::RunCommand => match op.metadata.compensating_command {
                Some(ref command) => run_checked(command, self.command_timeout).map(|_| ()),
                None => {
                    debug!("No compensating command for {}", op.describe());
                    Ok(())
                }
            },
            OperationKind::ExtractArchive => {
                let dest = required_target(op)?;
                remove_path(&dest)?;
                match op.backup_path {
                    Some(ref backup) => copy_tree(backup, &dest),
                    None if !op.metadata.created_target => {
                        fs::create_dir_all(&dest).map_err(Error::from)
                    }
                    None => Ok(()),
                }
            }
        }
    }

    /// Persist the manifest and move to committed.
    ///
    /// Committing an already committed transaction is a no-op.
    pub fn commit(&mut self) -> Result<()> {
        if self.state == TransactionState::Committed {
            debug!("Transaction {} already committed", self.id);
            return Ok(());
        }
        self.require_active("commit")?;

        self.state = TransactionState::Committing;
        self.note("commit".to_string());
        let mut manifest = self.manifest();
        manifest.state = TransactionState::Committed;
        if let Err(e) = self.store.save(&manifest) {
            self.state = TransactionState::Active;
            return Err(e);
        }

        self.state = TransactionState::Committed;
        info!(
            "Committed transaction {} ({} operations)",
            self.id,
            self.operations.len()
        );
        Ok(())
    }

    /// Undo every completed operation, newest first.
    ///
    /// Best effort: a failing inverse is logged and the walk continues. Ends in
    /// `RolledBack` if every inverse succeeded, otherwise `Failed`; a failed
    /// transaction can be rolled back again and only retries what is left.
    pub fn rollback(&mut self) -> Result<RollbackReport> {
        match self.state {
            TransactionState::Inactive | TransactionState::RolledBack => {
                debug!("Transaction {} has nothing to roll back", self.id);
                return Ok(RollbackReport::new());
            }
            TransactionState::Committing | TransactionState::RollingBack => {
                return Err(Error::TransactionError(format!(
                    "Cannot roll back transaction {}: state is {}",
                    self.id, self.state
                )));
            }
            TransactionState::Active | TransactionState::Committed | TransactionState::Failed => {}
        }

        info!("Rolling back transaction {}", self.id);
        self.state = TransactionState::RollingBack;
        let mut report = RollbackReport::new();

        for index in (0..self.operations.len()).rev() {
            let op = &self.operations[index];
            if !op.completed || op.rollback_completed {
                continue;
            }
            let label = format!("undo {}", op.describe());
            let deferred = matches!(
                op.kind,
                OperationKind::CreateDirectory | OperationKind::SetEnvironmentVariable
            );
            match self.undo(op) {
                Ok(()) => {
                    self.operations[index].rollback_completed = true;
                    if !deferred {
                        report.record_success(label);
                    }
                }
                Err(e) => {
                    warn!("Failed to {} in {}: {}", label, self.id, e);
                    report.record_failure(label, e);
                }
            }
        }

        self.remove_created_dirs(&mut report);
        self.restore_env(&mut report);

        self.state = if report.success {
            TransactionState::RolledBack
        } else {
            TransactionState::Failed
        };
        self.note(format!("rollback finished: {}", self.state));
        if let Err(e) = self.store.save(&self.manifest()) {
            warn!("Failed to persist manifest for {}: {}", self.id, e);
        }

        if report.success {
            info!("Rolled back transaction {}", self.id);
        } else {
            warn!(
                "Partial rollback of {}: {} steps failed",
                self.id,
                report.failures().count()
            );
        }
        Ok(report)
    }

    fn remove_created_dirs(&mut self, report: &mut RollbackReport) {
        let mut dirs = std::mem::take(&mut self.created_dirs);
        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));

        for dir in dirs {
            let label = format!("remove directory {}", dir.display());
            match remove_path(&dir) {
                Ok(()) => report.record_success(label),
                Err(e) => {
                    warn!("Failed to {}: {}", label, e);
                    report.record_failure(label, e);
                    self.created_dirs.push(dir);
                }
            }
        }
    }

    fn restore_env(&mut self, report: &mut RollbackReport) {
        let backups = std::mem::take(&mut self.env_backups);
        for backup in backups.into_iter().rev() {
            let (label, result) = match backup.original {
                Some(ref value) => (
                    format!("restore {} ({})", backup.name, backup.scope),
                    self.env.set(&backup.name, value, backup.scope),
                ),
                None => (
                    format!("unset {} ({})", backup.name, backup.scope),
                    self.env.unset(&backup.name, backup.scope),
                ),
            };
            match result {
                Ok(()) => report.record_success(label),
                Err(e) => {
                    warn!("Failed to {}: {}", label, e);
                    report.record_failure(label, e);
                    self.env_backups.insert(0, backup);
                }
            }
        }
    }
}

fn required_target(op: &AtomicOperation) -> Result<PathBuf> {
    op.target.clone().ok_or_else(|| {
        Error::ValidationError(format!("{} operation has no target path", op.kind))
    })
}
