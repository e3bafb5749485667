// src/install/mod.rs

//! Installation orchestrator
//!
//! Drives one component through its phases:
//!
//! ```text
//! prepare -> download -> install (in a transaction) -> verify -> commit
//! ```
//!
//! Any failure after the transaction begins rolls it back, together with the
//! component's rollback-executor session, before the result is returned.
//! Batch installs (see [`batch`]) layer conflict checks, dependency levels and
//! retries on top of [`InstallationOrchestrator::install_component`].

pub mod batch;
pub mod recovery;
pub mod strategy;

pub use batch::BatchResult;
pub use recovery::{classify_error, classify_failure, FailureClass};
pub use strategy::{
    ArchiveStrategy, ExecutableStrategy, InstallContext, InstallStrategy,
    InstallerPackageStrategy, ScriptStrategy, StrategyRegistry,
};

use crate::component::{Component, ComponentCatalog};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::platform::{
    append_path_entry, ArchiveExtractor, CommandVerifier, DirectoryPreparer, Downloader,
    EnvironmentStore, FileEnvironmentStore, HttpDownloader, Preparer, RegistryStore,
    ServiceManager, SystemctlServiceManager, TarArchiveExtractor, Verifier,
};
use crate::progress::{InstallStatus, LogProgress, ProgressReporter};
use crate::rollback::{RollbackAction, RollbackDescriptor, RollbackExecutor, RollbackReport};
use crate::transaction::{AtomicOperation, AtomicTransaction, TransactionEngine};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// File written into every successful install path
pub const RECEIPT_FILE: &str = ".toolrig-receipt.json";

/// Outcome of one `install_component` call
#[derive(Debug, Clone, Serialize)]
pub struct InstallationResult {
    pub component: String,
    pub success: bool,
    pub status: InstallStatus,
    pub message: String,
    pub details: BTreeMap<String, String>,
    pub elapsed: Duration,
    pub transaction_id: Option<String>,
    /// Whether `rollback_component` could still undo something
    pub rollback_available: bool,
    /// Set on failures; drives retry and batch-stop decisions
    pub failure: Option<FailureClass>,
}

impl InstallationResult {
    fn new(component: &str, success: bool, status: InstallStatus, message: String) -> Self {
        Self {
            component: component.to_string(),
            success,
            status,
            message,
            details: BTreeMap::new(),
            elapsed: Duration::ZERO,
            transaction_id: None,
            rollback_available: false,
            failure: None,
        }
    }

    /// Result for a component that was never started
    pub fn skipped(component: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let mut result = Self::new(
            component,
            false,
            InstallStatus::Cancelled,
            format!("Skipped {}: {}", component, reason),
        );
        result.details.insert("reason".to_string(), reason);
        result
    }

    fn detail(mut self, key: &str, value: impl Into<String>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// External collaborators the orchestrator consumes
#[derive(Clone)]
pub struct Collaborators {
    pub preparer: Arc<dyn Preparer>,
    pub downloader: Arc<dyn Downloader>,
    pub verifier: Arc<dyn Verifier>,
    pub env: Arc<dyn EnvironmentStore>,
    pub extractor: Arc<dyn ArchiveExtractor>,
    pub registry: Option<Arc<dyn RegistryStore>>,
    pub services: Option<Arc<dyn ServiceManager>>,
}

impl Collaborators {
    /// The built-in implementations, rooted at `config`'s paths
    pub fn system(config: &EngineConfig) -> Result<Self> {
        Ok(Self {
            preparer: Arc::new(DirectoryPreparer::new(
                config.install_root(),
                config.downloads_dir(),
            )),
            downloader: Arc::new(HttpDownloader::new()?),
            verifier: Arc::new(CommandVerifier::new(config.command_timeout())),
            env: Arc::new(FileEnvironmentStore::new(config.env_dir())),
            extractor: Arc::new(TarArchiveExtractor::new()),
            registry: None,
            services: Some(Arc::new(SystemctlServiceManager::system(
                config.command_timeout(),
            ))),
        })
    }
}

/// In-memory bookkeeping shared by batch workers
#[derive(Default)]
struct InstallState {
    statuses: HashMap<String, InstallStatus>,
    transaction_ids: HashMap<String, Vec<String>>,
    /// Latest committed transaction per component, kept for rollback
    committed: HashMap<String, AtomicTransaction>,
}

pub struct InstallationOrchestrator {
    config: EngineConfig,
    catalog: ComponentCatalog,
    collaborators: Collaborators,
    engine: TransactionEngine,
    strategies: StrategyRegistry,
    rollback: RollbackExecutor,
    progress: Arc<dyn ProgressReporter>,
    state: Mutex<InstallState>,
}

impl InstallationOrchestrator {
    pub fn new(
        config: EngineConfig,
        catalog: ComponentCatalog,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;
        let engine = TransactionEngine::new(
            &config,
            Arc::clone(&collaborators.env),
            Arc::clone(&collaborators.extractor),
        )?;

        let mut rollback = RollbackExecutor::new(config.command_timeout())
            .with_environment(Arc::clone(&collaborators.env));
        if let Some(ref registry) = collaborators.registry {
            rollback = rollback.with_registry(Arc::clone(registry));
        }
        if let Some(ref services) = collaborators.services {
            rollback = rollback.with_services(Arc::clone(services));
        }

        Ok(Self {
            config,
            catalog,
            collaborators,
            engine,
            strategies: StrategyRegistry::with_defaults(),
            rollback,
            progress: Arc::new(LogProgress),
            state: Mutex::new(InstallState::default()),
        })
    }

    pub fn with_strategies(mut self, strategies: StrategyRegistry) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ComponentCatalog {
        &self.catalog
    }

    pub fn engine(&self) -> &TransactionEngine {
        &self.engine
    }

    /// Executor collaborators register out-of-transaction undo actions with
    pub fn rollback_executor(&self) -> &RollbackExecutor {
        &self.rollback
    }

    fn state(&self) -> MutexGuard<'_, InstallState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, component: &str, status: InstallStatus) {
        self.state().statuses.insert(component.to_string(), status);
        self.progress.update(component, status);
    }

    /// Last known phase of `component`
    pub fn status(&self, component: &str) -> Option<InstallStatus> {
        self.state().statuses.get(component).copied()
    }

    /// Ids of every transaction started for `component`, oldest first
    pub fn transaction_ids(&self, component: &str) -> Vec<String> {
        self.state()
            .transaction_ids
            .get(component)
            .cloned()
            .unwrap_or_default()
    }

    /// Install one component through all phases.
    ///
    /// Never returns an error: every failure is described by the result.
    pub fn install_component(&self, name: &str) -> InstallationResult {
        let started = Instant::now();
        let mut result = self.run_install(name);
        result.elapsed = started.elapsed();
        result
    }

    fn fail(&self, name: &str, message: String, class: FailureClass) -> InstallationResult {
        error!("{}", message);
        self.set_status(name, InstallStatus::Failed);
        let mut result = InstallationResult::new(name, false, InstallStatus::Failed, message.clone())
            .detail("error", message);
        result.failure = Some(class);
        result
    }

    fn fail_with(&self, name: &str, cause: Error) -> InstallationResult {
        let class = classify_error(&cause);
        self.fail(name, cause.to_string(), class)
    }

    fn run_install(&self, name: &str) -> InstallationResult {
        let component = match self.catalog.get(name) {
            Ok(component) => component,
            Err(e) => return self.fail_with(name, e),
        };
        let strategy = match self.strategies.get(component.install_method) {
            Ok(strategy) => strategy,
            Err(e) => return self.fail_with(name, e).detail("phase", "validate"),
        };
        let install_path = component.install_path(&self.config);
        info!("Installing {} into {}", name, install_path.display());

        self.set_status(name, InstallStatus::Preparing);
        let prepared = self.collaborators.preparer.prepare(&[component]);
        if !prepared.success {
            let errors = prepared.errors.join("; ");
            return self
                .fail(
                    name,
                    format!("Preparation for {} failed: {}", name, errors),
                    classify_failure(&errors),
                )
                .detail("phase", "prepare");
        }

        let artifact = match component.download {
            Some(ref download) => {
                self.set_status(name, InstallStatus::Downloading);
                let dest = self.config.downloads_dir().join(&component.name);
                let outcome = self.collaborators.downloader.fetch(download, &dest);
                match (outcome.success, outcome.local_path) {
                    (true, Some(path)) => Some(path),
                    _ => {
                        let reason = outcome
                            .error_message
                            .unwrap_or_else(|| "no file was produced".to_string());
                        let class = classify_error(&Error::DownloadError(reason.clone()));
                        return self
                            .fail(
                                name,
                                Error::DownloadError(format!("{}: {}", download.url, reason))
                                    .to_string(),
                                class,
                            )
                            .detail("phase", "download");
                    }
                }
            }
            None => None,
        };

        // The install root is shared between components and never rolled back
        if let Some(parent) = install_path.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            return self
                .fail(
                    name,
                    format!("Failed to create {}: {}", parent.display(), e),
                    classify_failure(&e.to_string()),
                )
                .detail("phase", "prepare");
        }

        let mut tx = self.engine.create(name);
        if let Err(e) = tx.begin() {
            return self.fail_with(name, e).detail("phase", "begin");
        }
        let tx_id = tx.id().to_string();
        self.state()
            .transaction_ids
            .entry(name.to_string())
            .or_default()
            .push(tx_id.clone());
        self.rollback.start_session(name);

        self.set_status(name, InstallStatus::Installing);
        let ctx = InstallContext {
            component,
            install_path: &install_path,
            artifact: artifact.as_deref(),
            rollback: &self.rollback,
        };
        if let Err(e) = self.install_payload(&ctx, strategy.as_ref(), &mut tx) {
            return self.abort(name, tx, "install", e);
        }

        self.set_status(name, InstallStatus::Verifying);
        let report = self.collaborators.verifier.verify(component, &install_path);
        if !report.success {
            let summary = report
                .details
                .iter()
                .map(|(k, v)| format!("{}: {}", k, v))
                .collect::<Vec<_>>()
                .join("; ");
            return self.abort(name, tx, "verify", Error::VerificationError(summary));
        }

        if let Err(e) = self.write_receipt(component, &install_path, &mut tx) {
            return self.abort(name, tx, "receipt", e);
        }
        if let Err(e) = tx.commit() {
            return self.abort(name, tx, "commit", e);
        }
        self.rollback.commit(name);

        let operations = tx.operations().len();
        self.state().committed.insert(name.to_string(), tx);
        self.set_status(name, InstallStatus::Completed);
        info!("Installed {} ({} operations)", name, operations);

        let mut result = InstallationResult::new(
            name,
            true,
            InstallStatus::Completed,
            format!("Installed {}", name),
        )
        .detail("install_path", install_path.display().to_string())
        .detail("method", component.install_method.as_str())
        .detail("operations", operations.to_string());
        if let Some(version) = report.version.or_else(|| component.version.clone()) {
            result = result.detail("version", version);
        }
        for (key, value) in report.details {
            result.details.entry(key).or_insert(value);
        }
        result.transaction_id = Some(tx_id);
        result.rollback_available = true;
        result
    }

    /// Roll back a failed attempt and describe it
    fn abort(
        &self,
        name: &str,
        mut tx: AtomicTransaction,
        phase: &str,
        cause: Error,
    ) -> InstallationResult {
        let message = format!("Installation of {} failed during {}: {}", name, phase, cause);
        error!("{}", message);
        self.set_status(name, InstallStatus::RollingBack);

        let mut report = match tx.rollback() {
            Ok(report) => report,
            Err(e) => {
                let mut report = RollbackReport::new();
                report.record_failure(format!("roll back transaction {}", tx.id()), e);
                report
            }
        };
        report.merge(self.rollback.trigger_rollback(name));

        let status = if report.success {
            InstallStatus::RolledBack
        } else {
            InstallStatus::Failed
        };
        self.set_status(name, status);

        let mut result = InstallationResult::new(name, false, status, message)
            .detail("phase", phase)
            .detail("error", cause.to_string())
            .detail("rollback", if report.success { "complete" } else { "partial" });
        result.failure = Some(classify_error(&cause));
        for failure in report.failures() {
            result.details.insert(
                format!("rollback_failed: {}", failure.label),
                failure.error.clone().unwrap_or_default(),
            );
        }
        result.transaction_id = Some(tx.id().to_string());
        result.rollback_available = !report.success;
        result
    }

    fn install_payload(
        &self,
        ctx: &InstallContext<'_>,
        strategy: &dyn InstallStrategy,
        tx: &mut AtomicTransaction,
    ) -> Result<()> {
        tx.apply(AtomicOperation::create_directory(ctx.install_path))?;
        strategy.install(ctx, tx)?;
        self.register_services(ctx.component);
        self.apply_environment(ctx.component, ctx.install_path, tx)
    }

    fn register_services(&self, component: &Component) {
        for service in &component.services {
            self.rollback.register_action(RollbackDescriptor::new(
                component.name.as_str(),
                format!("stop and remove service {}", service),
                RollbackAction::StopAndRemoveService {
                    service: service.clone(),
                },
            ));
        }
    }

    /// Environment settings as set-environment-variable operations
    fn apply_environment(
        &self,
        component: &Component,
        install_path: &Path,
        tx: &mut AtomicTransaction,
    ) -> Result<()> {
        for setting in &component.environment {
            let value = component.expand(&setting.value, install_path);
            let value = if setting.append_to_path {
                let current = self
                    .collaborators
                    .env
                    .get(&setting.name, setting.scope)?
                    .unwrap_or_default();
                append_path_entry(&current, &value)
            } else {
                value
            };
            debug!("Setting {}={} ({})", setting.name, value, setting.scope);
            tx.apply(AtomicOperation::set_env(&setting.name, value, setting.scope))?;
        }
        Ok(())
    }

    fn write_receipt(
        &self,
        component: &Component,
        install_path: &Path,
        tx: &mut AtomicTransaction,
    ) -> Result<()> {
        let receipt = serde_json::json!({
            "component": component.name,
            "version": component.version,
            "method": component.install_method,
            "transaction_id": tx.id(),
            "installed_at": Utc::now().to_rfc3339(),
        });
        let content = serde_json::to_string_pretty(&receipt)?;
        tx.apply(AtomicOperation::create_file(install_path.join(RECEIPT_FILE), content))?;
        Ok(())
    }

    /// Undo the latest install of `name`.
    ///
    /// Uses the in-memory transaction when this process committed it,
    /// otherwise the latest persisted manifest.
    pub fn rollback_component(&self, name: &str) -> Result<RollbackReport> {
        let in_memory = self.state().committed.remove(name);
        self.set_status(name, InstallStatus::RollingBack);

        let report = match in_memory {
            Some(mut tx) => tx.rollback(),
            None => match self.engine.rollback_latest(name) {
                Ok(Some(report)) => Ok(report),
                Ok(None) => Err(Error::RollbackError(format!(
                    "No transaction recorded for {}",
                    name
                ))),
                Err(e) => Err(e),
            },
        };

        match report {
            Ok(report) => {
                let status = if report.success {
                    InstallStatus::RolledBack
                } else {
                    InstallStatus::Failed
                };
                self.set_status(name, status);
                Ok(report)
            }
            Err(e) => {
                self.set_status(name, InstallStatus::Failed);
                Err(e)
            }
        }
    }

    /// Install path the orchestrator would use for `name`
    pub fn install_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.catalog.get(name)?.install_path(&self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{DownloadSpec, EnvSetting, InstallMethod};
    use crate::platform::{DownloadOutcome, EnvScope, PreparationReport, VerificationReport};
    use tempfile::TempDir;

    struct NoopPreparer;
    impl Preparer for NoopPreparer {
        fn prepare(&self, _components: &[&Component]) -> PreparationReport {
            PreparationReport {
                success: true,
                errors: Vec::new(),
            }
        }
    }

    struct NoDownloads;
    impl Downloader for NoDownloads {
        fn fetch(&self, _spec: &DownloadSpec, _dest_dir: &Path) -> DownloadOutcome {
            DownloadOutcome::failed("network unreachable")
        }
    }

    struct PassVerifier;
    impl Verifier for PassVerifier {
        fn verify(&self, _component: &Component, install_path: &Path) -> VerificationReport {
            VerificationReport {
                success: true,
                installed_path: Some(install_path.to_path_buf()),
                version: Some("1.0".to_string()),
                details: BTreeMap::new(),
            }
        }
    }

    fn orchestrator(temp_dir: &TempDir, components: Vec<Component>) -> InstallationOrchestrator {
        let mut config = EngineConfig::with_base_path(temp_dir.path().join("state"));
        config.retry_backoff_base_secs = 0.0;
        let collaborators = Collaborators {
            preparer: Arc::new(NoopPreparer),
            downloader: Arc::new(NoDownloads),
            verifier: Arc::new(PassVerifier),
            env: Arc::new(FileEnvironmentStore::new(config.env_dir()).with_elevated(false)),
            extractor: Arc::new(TarArchiveExtractor::new()),
            registry: None,
            services: None,
        };
        InstallationOrchestrator::new(
            config,
            ComponentCatalog::from_components(components).unwrap(),
            collaborators,
        )
        .unwrap()
        .with_progress(Arc::new(crate::progress::SilentProgress))
    }

    fn script(name: &str, command: &str) -> Component {
        let mut component = Component::new(name, InstallMethod::Script);
        component.install_args = vec!["sh".to_string(), "-c".to_string(), command.to_string()];
        component
    }

    #[test]
    fn test_script_install_writes_receipt_and_env() {
        let temp_dir = TempDir::new().unwrap();
        let mut component = script("tool", "mkdir -p bin && touch bin/tool");
        component.environment = vec![EnvSetting {
            name: "PATH".to_string(),
            value: "{install_path}/bin".to_string(),
            scope: EnvScope::User,
            append_to_path: true,
        }];
        let orchestrator = orchestrator(&temp_dir, vec![component]);

        let result = orchestrator.install_component("tool");
        assert!(result.success, "{}", result.message);
        assert_eq!(result.status, InstallStatus::Completed);
        assert!(result.rollback_available);
        assert_eq!(result.details["version"], "1.0");

        let install_path = orchestrator.install_path("tool").unwrap();
        assert!(install_path.join(RECEIPT_FILE).is_file());
        let path = orchestrator
            .collaborators
            .env
            .get("PATH", EnvScope::User)
            .unwrap()
            .unwrap();
        assert_eq!(path, install_path.join("bin").display().to_string());
        assert_eq!(orchestrator.status("tool"), Some(InstallStatus::Completed));
        assert_eq!(orchestrator.transaction_ids("tool").len(), 1);
    }

    #[test]
    fn test_failed_script_rolls_back() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&temp_dir, vec![script("broken", "touch partial; exit 1")]);

        let result = orchestrator.install_component("broken");
        assert!(!result.success);
        assert_eq!(result.status, InstallStatus::RolledBack);
        assert_eq!(result.details["phase"], "install");
        assert!(result.transaction_id.is_some());
        assert!(!result.rollback_available);
        assert_eq!(result.failure, Some(FailureClass::Unknown));
        assert!(!orchestrator.install_path("broken").unwrap().exists());
    }

    #[test]
    fn test_download_failure_creates_no_transaction() {
        let temp_dir = TempDir::new().unwrap();
        let mut component = Component::new("jdk", InstallMethod::Archive);
        component.download = Some(DownloadSpec {
            url: "https://example.invalid/jdk.tar.gz".to_string(),
            mirrors: Vec::new(),
            sha256: None,
            filename: None,
        });
        let orchestrator = orchestrator(&temp_dir, vec![component]);

        let result = orchestrator.install_component("jdk");
        assert!(!result.success);
        assert_eq!(result.status, InstallStatus::Failed);
        assert!(result.message.contains("network unreachable"));
        assert_eq!(result.failure, Some(FailureClass::Recoverable));
        assert!(result.transaction_id.is_none());
        assert!(orchestrator.transaction_ids("jdk").is_empty());
    }

    #[test]
    fn test_unknown_component_fails() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&temp_dir, Vec::new());
        let result = orchestrator.install_component("ghost");
        assert!(!result.success);
        assert!(result.message.contains("Unknown component"));
        assert_eq!(result.failure, Some(FailureClass::Unknown));
    }

    #[test]
    fn test_rollback_component_in_memory_then_noop() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&temp_dir, vec![script("tool", "touch marker")]);
        assert!(orchestrator.install_component("tool").success);
        let install_path = orchestrator.install_path("tool").unwrap();
        assert!(install_path.join("marker").exists());

        let report = orchestrator.rollback_component("tool").unwrap();
        assert!(report.success);
        assert!(!install_path.exists());
        assert_eq!(orchestrator.status("tool"), Some(InstallStatus::RolledBack));

        // Manifest now records the rollback, so a second call changes nothing
        let again = orchestrator.rollback_component("tool").unwrap();
        assert!(again.steps.is_empty());
    }

    #[test]
    fn test_rollback_component_without_history_errors() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&temp_dir, vec![script("tool", "true")]);
        assert!(matches!(
            orchestrator.rollback_component("tool"),
            Err(Error::RollbackError(_))
        ));
    }
}
