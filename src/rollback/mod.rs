// src/rollback/mod.rs

//! Stack-based undo for mutations made outside a transaction
//!
//! Collaborators that change the machine in ways a transaction does not model
//! (registry values, services, native packages) register a
//! [`RollbackDescriptor`] with the executor while a component's session is
//! open. On success the session is committed and the stack discarded; on
//! failure [`RollbackExecutor::trigger_rollback`] pops and runs every
//! descriptor in LIFO order, whoever registered it.

use crate::command::{run_checked, CommandSpec};
use crate::error::{Error, Result};
use crate::platform::{EnvScope, EnvironmentStore, RegistryStore, ServiceManager};
use crate::transaction::backup::{copy_tree, remove_path};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of a single undo step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackStep {
    pub label: String,
    pub success: bool,
    pub error: Option<String>,
}

/// Accumulated result of a best-effort rollback.
///
/// `success` is true only if every step succeeded; an empty report is a
/// successful one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub steps: Vec<RollbackStep>,
    pub success: bool,
}

impl Default for RollbackReport {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            success: true,
        }
    }
}

impl RollbackReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, label: impl Into<String>) {
        self.steps.push(RollbackStep {
            label: label.into(),
            success: true,
            error: None,
        });
    }

    pub fn record_failure(&mut self, label: impl Into<String>, error: impl fmt::Display) {
        self.steps.push(RollbackStep {
            label: label.into(),
            success: false,
            error: Some(error.to_string()),
        });
        self.success = false;
    }

    pub fn merge(&mut self, other: RollbackReport) {
        self.success &= other.success;
        self.steps.extend(other.steps);
    }

    pub fn failures(&self) -> impl Iterator<Item = &RollbackStep> {
        self.steps.iter().filter(|s| !s.success)
    }
}

/// How to undo one mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RollbackAction {
    /// Remove a file or directory tree that was created
    DeletePath { path: PathBuf },
    /// Put an environment variable back to its earlier value
    #[serde(rename = "restore-environment-variable")]
    RestoreEnvVar {
        name: String,
        value: String,
        scope: EnvScope,
    },
    #[serde(rename = "unset-environment-variable")]
    UnsetEnvVar { name: String, scope: EnvScope },
    RemoveFromPath { entry: String, scope: EnvScope },
    /// Restore a registry value, or delete it when there was none
    RestoreRegistryValue {
        key: String,
        name: String,
        value: Option<String>,
    },
    DeleteRegistryKey { key: String },
    /// Uninstall a native package through its package tool
    UninstallPackage { package: String, command: CommandSpec },
    StopAndRemoveService { service: String },
    RunCompensatingScript { command: CommandSpec },
    /// Replace `target` with the tree saved at `backup`
    RestoreBackupArchive { backup: PathBuf, target: PathBuf },
}

impl RollbackAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DeletePath { .. } => "delete-path",
            Self::RestoreEnvVar { .. } => "restore-environment-variable",
            Self::UnsetEnvVar { .. } => "unset-environment-variable",
            Self::RemoveFromPath { .. } => "remove-from-path",
            Self::RestoreRegistryValue { .. } => "restore-registry-value",
            Self::DeleteRegistryKey { .. } => "delete-registry-key",
            Self::UninstallPackage { .. } => "uninstall-package",
            Self::StopAndRemoveService { .. } => "stop-and-remove-service",
            Self::RunCompensatingScript { .. } => "run-compensating-script",
            Self::RestoreBackupArchive { .. } => "restore-backup-archive",
        }
    }
}

/// An undo instruction owned by a component's rollback session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackDescriptor {
    pub component: String,
    pub label: String,
    pub action: RollbackAction,
}

impl RollbackDescriptor {
    pub fn new(component: impl Into<String>, label: impl Into<String>, action: RollbackAction) -> Self {
        Self {
            component: component.into(),
            label: label.into(),
            action,
        }
    }
}

/// Per-component LIFO undo stacks
pub struct RollbackExecutor {
    sessions: Mutex<HashMap<String, Vec<RollbackDescriptor>>>,
    env: Option<Arc<dyn EnvironmentStore>>,
    registry: Option<Arc<dyn RegistryStore>>,
    services: Option<Arc<dyn ServiceManager>>,
    command_timeout: Duration,
}

impl RollbackExecutor {
    pub fn new(command_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            env: None,
            registry: None,
            services: None,
            command_timeout,
        }
    }

    pub fn with_environment(mut self, env: Arc<dyn EnvironmentStore>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn with_registry(mut self, registry: Arc<dyn RegistryStore>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_services(mut self, services: Arc<dyn ServiceManager>) -> Self {
        self.services = Some(services);
        self
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Vec<RollbackDescriptor>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open an empty undo stack for `component`
    pub fn start_session(&self, component: &str) {
        let mut sessions = self.sessions();
        if let Some(previous) = sessions.insert(component.to_string(), Vec::new())
            && !previous.is_empty()
        {
            warn!(
                "Restarted rollback session for {} with {} pending actions discarded",
                component,
                previous.len()
            );
        }
        debug!("Started rollback session for {}", component);
    }

    pub fn is_active(&self, component: &str) -> bool {
        self.sessions().contains_key(component)
    }

    /// Number of descriptors waiting on `component`'s stack
    pub fn pending(&self, component: &str) -> usize {
        self.sessions().get(component).map_or(0, Vec::len)
    }

    /// Push `descriptor` onto its component's stack.
    ///
    /// Returns false (and logs) when that component has no open session.
    pub fn register_action(&self, descriptor: RollbackDescriptor) -> bool {
        let mut sessions = self.sessions();
        match sessions.get_mut(&descriptor.component) {
            Some(stack) => {
                debug!(
                    "Registered {} for {}: {}",
                    descriptor.action.kind(),
                    descriptor.component,
                    descriptor.label
                );
                stack.push(descriptor);
                true
            }
            None => {
                warn!(
                    "Ignoring rollback action '{}' for {}: no active session",
                    descriptor.label, descriptor.component
                );
                false
            }
        }
    }

    /// Close the session, discarding its undo stack
    pub fn commit(&self, component: &str) {
        if let Some(stack) = self.sessions().remove(component) {
            debug!(
                "Committed rollback session for {} ({} actions discarded)",
                component,
                stack.len()
            );
        }
    }

    /// Close the session and undo everything on its stack, newest first
    pub fn trigger_rollback(&self, component: &str) -> RollbackReport {
        let Some(mut stack) = self.sessions().remove(component) else {
            debug!("No rollback session for {}", component);
            return RollbackReport::new();
        };

        info!("Rolling back {} actions for {}", stack.len(), component);
        let mut report = RollbackReport::new();
        while let Some(descriptor) = stack.pop() {
            match self.execute(&descriptor.action) {
                Ok(()) => report.record_success(descriptor.label),
                Err(e) => {
                    warn!(
                        "Failed to undo {} for {} ({}): {}",
                        descriptor.action.kind(),
                        component,
                        descriptor.label,
                        e
                    );
                    report.record_failure(descriptor.label, e);
                }
            }
        }

        if report.success {
            info!("Rollback of {} complete", component);
        } else {
            warn!("Rollback of {} was partial", component);
        }
        report
    }

    fn env(&self) -> Result<&dyn EnvironmentStore> {
        self.env
            .as_deref()
            .ok_or_else(|| Error::RollbackError("no environment store configured".to_string()))
    }

    fn registry(&self) -> Result<&dyn RegistryStore> {
        self.registry
            .as_deref()
            .ok_or_else(|| Error::RollbackError("no registry store configured".to_string()))
    }

    fn services(&self) -> Result<&dyn ServiceManager> {
        self.services
            .as_deref()
            .ok_or_else(|| Error::RollbackError("no service manager configured".to_string()))
    }

    fn execute(&self, action: &RollbackAction) -> Result<()> {
        match action {
            RollbackAction::DeletePath { path } => remove_path(path),
            RollbackAction::RestoreEnvVar { name, value, scope } => {
                self.env()?.set(name, value, *scope)
            }
            RollbackAction::UnsetEnvVar { name, scope } => self.env()?.unset(name, *scope),
            RollbackAction::RemoveFromPath { entry, scope } => {
                self.env()?.remove_from_path(entry, *scope)
            }
            RollbackAction::RestoreRegistryValue { key, name, value } => {
                let registry = self.registry()?;
                match value {
                    Some(value) => registry.set_value(key, name, value),
                    None => registry.delete_value(key, name),
                }
            }
            RollbackAction::DeleteRegistryKey { key } => self.registry()?.delete_key(key),
            RollbackAction::UninstallPackage { package, command } => {
                debug!("Uninstalling package {}", package);
                run_checked(command, self.command_timeout).map(|_| ())
            }
            RollbackAction::StopAndRemoveService { service } => {
                let services = self.services()?;
                // Removal is attempted even when the stop fails
                let stopped = services.stop(service);
                let removed = services.remove(service);
                match (stopped, removed) {
                    (Ok(()), removed) => removed,
                    (Err(stop), Ok(())) => Err(Error::RollbackError(format!(
                        "service {} was removed but failed to stop: {}",
                        service, stop
                    ))),
                    (Err(stop), Err(remove)) => Err(Error::RollbackError(format!(
                        "failed to stop service {}: {}; failed to remove it: {}",
                        service, stop, remove
                    ))),
                }
            }
            RollbackAction::RunCompensatingScript { command } => {
                run_checked(command, self.command_timeout).map(|_| ())
            }
            RollbackAction::RestoreBackupArchive { backup, target } => {
                if !backup.exists() {
                    return Err(Error::RollbackError(format!(
                        "backup {} no longer exists",
                        backup.display()
                    )));
                }
                remove_path(target)?;
                copy_tree(backup, target)
            }
        }
    }
}
