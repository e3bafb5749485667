// src/install/strategy.rs

//! Install strategies keyed by install method
//!
//! A strategy turns a prepared component into atomic operations on the
//! caller's transaction. Anything a transaction cannot undo by itself (a
//! native package database entry, for example) is registered with the
//! rollback executor instead.

use crate::command::CommandSpec;
use crate::component::{Component, InstallMethod};
use crate::error::{Error, Result};
use crate::rollback::{RollbackAction, RollbackDescriptor, RollbackExecutor};
use crate::transaction::{AtomicOperation, AtomicTransaction};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Everything a strategy needs besides the transaction
pub struct InstallContext<'a> {
    pub component: &'a Component,
    pub install_path: &'a Path,
    /// Downloaded payload, if the component has a download
    pub artifact: Option<&'a Path>,
    pub rollback: &'a RollbackExecutor,
}

impl InstallContext<'_> {
    pub fn artifact(&self) -> Result<&Path> {
        self.artifact.ok_or_else(|| {
            Error::ValidationError(format!(
                "{} install of '{}' needs a downloaded artifact",
                self.component.install_method, self.component.name
            ))
        })
    }

    /// Install arguments with the install path placeholder expanded
    pub fn args(&self) -> Vec<String> {
        self.component
            .install_args
            .iter()
            .map(|a| self.component.expand(a, self.install_path))
            .collect()
    }

    pub fn uninstall_command(&self) -> Option<CommandSpec> {
        self.component.uninstall_command.as_ref().map(|argv| {
            CommandSpec::new(argv.iter().map(|a| self.component.expand(a, self.install_path)))
        })
    }
}

pub trait InstallStrategy: Send + Sync {
    fn install(&self, ctx: &InstallContext<'_>, tx: &mut AtomicTransaction) -> Result<()>;
}

/// Unpack the artifact into the install path
#[derive(Debug, Default)]
pub struct ArchiveStrategy;

impl InstallStrategy for ArchiveStrategy {
    fn install(&self, ctx: &InstallContext<'_>, tx: &mut AtomicTransaction) -> Result<()> {
        tx.apply(AtomicOperation::extract_archive(ctx.artifact()?, ctx.install_path))?;
        Ok(())
    }
}

/// Run the downloaded artifact itself with the install arguments
#[derive(Debug, Default)]
pub struct ExecutableStrategy;

impl InstallStrategy for ExecutableStrategy {
    fn install(&self, ctx: &InstallContext<'_>, tx: &mut AtomicTransaction) -> Result<()> {
        let artifact = ctx.artifact()?;
        make_executable(artifact)?;

        let mut argv = vec![artifact.to_string_lossy().to_string()];
        argv.extend(ctx.args());
        let mut op = AtomicOperation::run_command(CommandSpec::new(argv).with_cwd(ctx.install_path));
        if let Some(uninstall) = ctx.uninstall_command() {
            op = op.with_compensating_command(uninstall);
        }
        tx.apply(op)?;
        Ok(())
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)?.permissions();
    if perms.mode() & 0o111 == 0 {
        perms.set_mode(perms.mode() | 0o755);
        fs::set_permissions(path, perms)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(path: &Path) -> Result<()> {
    fs::metadata(path)?;
    Ok(())
}

/// Hand a native package to the system package tool.
///
/// The package database entry lives outside the transaction, so the
/// uninstall is registered with the rollback executor.
#[derive(Debug, Default)]
pub struct InstallerPackageStrategy;

impl InstallerPackageStrategy {
    fn tool_commands(artifact: &Path, package: &str) -> Result<(Vec<String>, Vec<String>)> {
        let artifact = artifact.to_string_lossy().to_string();
        let extension = Path::new(&artifact)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "deb" => Ok((
                vec!["dpkg".to_string(), "-i".to_string(), artifact],
                vec!["dpkg".to_string(), "-r".to_string(), package.to_string()],
            )),
            "rpm" => Ok((
                vec!["rpm".to_string(), "-i".to_string(), artifact],
                vec!["rpm".to_string(), "-e".to_string(), package.to_string()],
            )),
            other => Err(Error::ValidationError(format!(
                "Unsupported installer package type '{}' for {}",
                other, package
            ))),
        }
    }
}

impl InstallStrategy for InstallerPackageStrategy {
    fn install(&self, ctx: &InstallContext<'_>, tx: &mut AtomicTransaction) -> Result<()> {
        let name = &ctx.component.name;
        let (mut install, uninstall) = Self::tool_commands(ctx.artifact()?, name)?;
        install.extend(ctx.args());

        tx.apply(AtomicOperation::run_command(CommandSpec::new(install)))?;

        let uninstall = ctx
            .uninstall_command()
            .unwrap_or_else(|| CommandSpec::new(uninstall));
        ctx.rollback.register_action(RollbackDescriptor::new(
            name.as_str(),
            format!("uninstall package {}", name),
            RollbackAction::UninstallPackage {
                package: name.clone(),
                command: uninstall,
            },
        ));
        Ok(())
    }
}

/// Run an install script: the install arguments if given, else the
/// downloaded artifact through `sh`
#[derive(Debug, Default)]
pub struct ScriptStrategy;

impl InstallStrategy for ScriptStrategy {
    fn install(&self, ctx: &InstallContext<'_>, tx: &mut AtomicTransaction) -> Result<()> {
        let argv = if ctx.component.install_args.is_empty() {
            vec!["sh".to_string(), ctx.artifact()?.to_string_lossy().to_string()]
        } else {
            ctx.args()
        };
        debug!("Running install script for {}", ctx.component.name);

        let mut op = AtomicOperation::run_command(
            CommandSpec::new(argv)
                .with_cwd(ctx.install_path)
                .with_env("TOOLRIG_INSTALL_PATH", ctx.install_path.to_string_lossy()),
        );
        if let Some(uninstall) = ctx.uninstall_command() {
            op = op.with_compensating_command(uninstall);
        }
        tx.apply(op)?;
        Ok(())
    }
}

/// Strategy lookup table, built once at startup
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<InstallMethod, Arc<dyn InstallStrategy>>,
}

impl StrategyRegistry {
    /// Registry without any strategies
    pub fn empty() -> Self {
        Self::default()
    }

    /// One built-in strategy per install method
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(InstallMethod::Archive, Arc::new(ArchiveStrategy));
        registry.register(InstallMethod::Executable, Arc::new(ExecutableStrategy));
        registry.register(InstallMethod::InstallerPackage, Arc::new(InstallerPackageStrategy));
        registry.register(InstallMethod::Script, Arc::new(ScriptStrategy));
        registry
    }

    /// Set the strategy for `method`, replacing any earlier one
    pub fn register(&mut self, method: InstallMethod, strategy: Arc<dyn InstallStrategy>) {
        self.strategies.insert(method, strategy);
    }

    pub fn get(&self, method: InstallMethod) -> Result<Arc<dyn InstallStrategy>> {
        self.strategies.get(&method).cloned().ok_or_else(|| {
            Error::ValidationError(format!("No install strategy registered for method {}", method))
        })
    }

    pub fn contains(&self, method: InstallMethod) -> bool {
        self.strategies.contains_key(&method)
    }
}
