// src/transaction/operation.rs

//! Reversible system mutations recorded by a transaction

use crate::command::{CommandOutput, CommandSpec};
use crate::platform::EnvScope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Kind of mutation an operation performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    CreateFile,
    CreateDirectory,
    ModifyFile,
    SetEnvironmentVariable,
    RunCommand,
    ExtractArchive,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateFile => "create-file",
            Self::CreateDirectory => "create-directory",
            Self::ModifyFile => "modify-file",
            Self::SetEnvironmentVariable => "set-environment-variable",
            Self::RunCommand => "run-command",
            Self::ExtractArchive => "extract-archive",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific parameters and results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationMetadata {
    /// Variable name for set-environment-variable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_scope: Option<EnvScope>,
    /// Command line for run-command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandSpec>,
    /// Per-operation override of the engine's command timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Run on rollback of a completed run-command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensating_command: Option<CommandSpec>,
    /// Captured result of run-command, kept whatever the exit status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<CommandOutput>,
    /// Set when execution created the target instead of replacing it
    #[serde(default)]
    pub created_target: bool,
    /// Why execution failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Free-form annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// One reversible mutation.
///
/// `previous_value` and `backup_path` are filled in during execution, before
/// the mutation is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicOperation {
    pub id: String,
    pub kind: OperationKind,
    pub target: Option<PathBuf>,
    /// Original text of a modified file, or the prior value of an environment variable
    pub previous_value: Option<String>,
    /// Content to write, value to set, or archive path to extract
    pub new_value: Option<String>,
    /// Copy of the original taken before mutation
    pub backup_path: Option<PathBuf>,
    #[serde(default)]
    pub metadata: OperationMetadata,
    pub completed: bool,
    pub rollback_completed: bool,
    pub created_at: DateTime<Utc>,
}

impl AtomicOperation {
    fn new(kind: OperationKind, target: Option<PathBuf>, new_value: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            target,
            previous_value: None,
            new_value,
            backup_path: None,
            metadata: OperationMetadata::default(),
            completed: false,
            rollback_completed: false,
            created_at: Utc::now(),
        }
    }

    /// Write `content` to `path`, backing up any existing file
    pub fn create_file(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self::new(OperationKind::CreateFile, Some(path.into()), Some(content.into()))
    }

    pub fn create_directory(path: impl Into<PathBuf>) -> Self {
        Self::new(OperationKind::CreateDirectory, Some(path.into()), None)
    }

    /// Replace the content of an existing file
    pub fn modify_file(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self::new(OperationKind::ModifyFile, Some(path.into()), Some(content.into()))
    }

    pub fn set_env(name: impl Into<String>, value: impl Into<String>, scope: EnvScope) -> Self {
        let mut op = Self::new(OperationKind::SetEnvironmentVariable, None, Some(value.into()));
        op.metadata.env_name = Some(name.into());
        op.metadata.env_scope = Some(scope);
        op
    }

    pub fn run_command(command: CommandSpec) -> Self {
        let mut op = Self::new(OperationKind::RunCommand, command.cwd.clone(), None);
        op.metadata.command = Some(command);
        op
    }

    /// Unpack `archive` into `dest`, backing up a non-empty destination
    pub fn extract_archive(archive: impl AsRef<Path>, dest: impl Into<PathBuf>) -> Self {
        Self::new(
            OperationKind::ExtractArchive,
            Some(dest.into()),
            Some(archive.as_ref().to_string_lossy().to_string()),
        )
    }

    /// Command to run when a completed run-command is rolled back
    pub fn with_compensating_command(mut self, command: CommandSpec) -> Self {
        self.metadata.compensating_command = Some(command);
        self
    }

    pub fn with_timeout_secs(mut self, seconds: u64) -> Self {
        self.metadata.timeout_secs = Some(seconds);
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    /// Short human-readable description used in logs and rollback reports
    pub fn describe(&self) -> String {
        match self.kind {
            OperationKind::SetEnvironmentVariable => format!(
                "{} {} ({})",
                self.kind,
                self.metadata.env_name.as_deref().unwrap_or("?"),
                self.metadata.env_scope.unwrap_or_default()
            ),
            OperationKind::RunCommand => format!(
                "{} {}",
                self.kind,
                self.metadata
                    .command
                    .as_ref()
                    .map(CommandSpec::display)
                    .unwrap_or_default()
            ),
            _ => match self.target {
                Some(ref target) => format!("{} {}", self.kind, target.display()),
                None => self.kind.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_fill_metadata() {
        let op = AtomicOperation::set_env("JAVA_HOME", "/opt/jdk", EnvScope::System);
        assert_eq!(op.kind, OperationKind::SetEnvironmentVariable);
        assert_eq!(op.metadata.env_name.as_deref(), Some("JAVA_HOME"));
        assert_eq!(op.metadata.env_scope, Some(EnvScope::System));
        assert!(!op.completed);
        assert_eq!(op.describe(), "set-environment-variable JAVA_HOME (system)");

        let op = AtomicOperation::run_command(CommandSpec::new(["make", "install"]))
            .with_compensating_command(CommandSpec::new(["make", "uninstall"]))
            .with_timeout_secs(30);
        assert_eq!(op.describe(), "run-command make install");
        assert_eq!(op.metadata.timeout_secs, Some(30));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = AtomicOperation::create_directory("/opt/a");
        let b = AtomicOperation::create_directory("/opt/a");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_serde_roundtrip_keeps_kind_names() {
        let op = AtomicOperation::extract_archive("/tmp/go.tar.gz", "/opt/go");
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"extract-archive\""));

        let back: AtomicOperation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }
}
