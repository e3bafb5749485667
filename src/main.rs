// src/main.rs

mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use toolrig::resolver::{detect_conflicts, DependencyGraph};
use toolrig::{
    Collaborators, ComponentCatalog, EngineConfig, InstallStatus, InstallationOrchestrator,
    ManifestStore, ProgressReporter, SilentProgress,
};
use tracing::debug;

/// One spinner per component under an overall bar
struct CliProgress {
    multi: MultiProgress,
    overall: ProgressBar,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl CliProgress {
    fn new() -> Self {
        let multi = MultiProgress::new();
        let overall = ProgressBar::new(0);
        overall.set_style(
            ProgressStyle::default_bar()
                .template("{msg} ({pos}/{len}) [{bar:40.green/dim}] {percent}%")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        overall.set_message("Installing");
        let overall = multi.add(overall);

        Self {
            multi,
            overall,
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn bar(&self, component: &str) -> ProgressBar {
        let mut bars = self.bars.lock().unwrap_or_else(PoisonError::into_inner);
        bars.entry(component.to_string())
            .or_insert_with(|| {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::default_spinner()
                        .template("  {spinner:.cyan} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                bar.enable_steady_tick(Duration::from_millis(100));
                self.multi.add(bar)
            })
            .clone()
    }
}

impl ProgressReporter for CliProgress {
    fn update(&self, component: &str, status: InstallStatus) {
        let bar = self.bar(component);
        match status {
            InstallStatus::Completed => {
                bar.finish_with_message(format!("{} [done]", component));
                self.overall.inc(1);
            }
            InstallStatus::RolledBack | InstallStatus::Failed | InstallStatus::Cancelled => {
                bar.abandon_with_message(format!("{} [{}]", component, status));
                self.overall.inc(1);
            }
            _ => bar.set_message(format!("{} {}...", component, status)),
        }
    }

    fn batch_started(&self, components: &[String]) {
        self.overall.set_length(components.len() as u64);
    }

    fn batch_finished(&self, success: bool) {
        if success {
            self.overall.finish_with_message("Installed");
        } else {
            self.overall.abandon_with_message("Finished with failures");
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => Ok(EngineConfig::load(path)?),
        None => Ok(EngineConfig::default()),
    }
}

/// Load the catalog; a missing default catalog is empty unless `required`
fn load_catalog(
    path: Option<&Path>,
    config: &EngineConfig,
    required: bool,
) -> Result<ComponentCatalog> {
    let default_path = config.base_path.join("catalog.toml");
    let path = path.unwrap_or(&default_path);
    if !path.exists() && !required {
        debug!("No catalog at {}", path.display());
        return Ok(ComponentCatalog::new());
    }
    ComponentCatalog::load(path).with_context(|| format!("Loading catalog {}", path.display()))
}

fn orchestrator(
    config: EngineConfig,
    catalog: ComponentCatalog,
    quiet: bool,
) -> Result<InstallationOrchestrator> {
    let collaborators = Collaborators::system(&config)?;
    let orchestrator = InstallationOrchestrator::new(config, catalog, collaborators)?;
    Ok(if quiet {
        orchestrator.with_progress(Arc::new(SilentProgress))
    } else {
        orchestrator.with_progress(Arc::new(CliProgress::new()))
    })
}

fn cmd_install(
    config: EngineConfig,
    catalog: ComponentCatalog,
    components: &[String],
    parallel: Option<usize>,
    no_recovery: bool,
    quiet: bool,
) -> Result<()> {
    let max_parallel = parallel.unwrap_or(config.max_parallel);
    let enable_recovery = config.enable_recovery && !no_recovery;
    let orchestrator = orchestrator(config, catalog, quiet)?;

    let result = orchestrator.install_multiple(components, max_parallel, enable_recovery);

    for conflict in &result.conflicts {
        println!("  {}", conflict);
    }
    if let Some(ref error) = result.error {
        println!("Aborted: {}", error);
    }
    for name in &result.dependency_order {
        let Some(component) = result.results.get(name) else {
            continue;
        };
        let retries = result.recovery_attempts.get(name).copied().unwrap_or(0);
        let retries = if retries > 0 {
            format!(" after {} retries", retries)
        } else {
            String::new()
        };
        println!(
            "  {:<20} {:<12} {:.1?}{}",
            name,
            component.status.as_str(),
            component.elapsed,
            retries
        );
        if !component.success {
            println!("      {}", component.message);
        }
        if let Some(ref tx) = component.transaction_id {
            debug!("{} transaction {}", name, tx);
        }
    }
    for name in &result.rolled_back {
        println!("  rolled back {}", name);
    }

    println!(
        "{} completed, {} failed, {} skipped",
        result.completed.len(),
        result.failed.len(),
        result.skipped.len()
    );
    if !result.overall_success {
        bail!("installation did not complete");
    }
    Ok(())
}

fn cmd_rollback(config: EngineConfig, catalog: ComponentCatalog, component: &str) -> Result<()> {
    let orchestrator = orchestrator(config, catalog, true)?;
    let report = orchestrator
        .rollback_component(component)
        .with_context(|| format!("Rolling back {}", component))?;

    for step in &report.steps {
        match step.error {
            Some(ref error) => println!("  [FAILED] {}: {}", step.label, error),
            None => println!("  [ok] {}", step.label),
        }
    }
    if !report.success {
        bail!("rollback of {} was partial", component);
    }
    println!("Rolled back {}", component);
    Ok(())
}

fn cmd_plan(config: &EngineConfig, catalog: &ComponentCatalog, names: &[String]) -> Result<()> {
    let components = names
        .iter()
        .map(|n| catalog.get(n))
        .collect::<toolrig::Result<Vec<_>>>()?;

    let graph = DependencyGraph::from_map(&catalog.dependency_map(names));
    for unresolved in graph.unresolved() {
        println!(
            "Note: {} depends on {}, which is not requested",
            unresolved.component, unresolved.dependency
        );
    }

    let conflicts = detect_conflicts(&components, config);
    for conflict in &conflicts {
        println!("Conflict: {}", conflict);
    }

    let cycles = graph.detect_cycles();
    if !cycles.is_empty() {
        for cycle in &cycles {
            let mut path = cycle.clone();
            path.extend(cycle.first().cloned());
            println!("Cycle: {}", path.join(" -> "));
        }
        bail!("dependency graph has {} cycle(s)", cycles.len());
    }

    println!("Order: {}", graph.topological_sort()?.join(", "));
    for (index, level) in graph.levels()?.iter().enumerate() {
        println!("Level {}: {}", index, level.join(", "));
    }
    if conflicts.iter().any(|c| c.is_critical()) {
        bail!("critical conflicts would abort this install");
    }
    Ok(())
}

fn cmd_transactions(config: &EngineConfig, component: Option<&str>) -> Result<()> {
    let store = ManifestStore::new(config.transactions_dir());
    let manifests = store.list()?;

    let mut shown = 0;
    for manifest in manifests
        .iter()
        .filter(|m| component.is_none_or(|c| m.component == c))
    {
        println!(
            "{}  {:<12} {:<12} {} ops  {}",
            manifest.id,
            manifest.component,
            manifest.state.as_str(),
            manifest.operation_count,
            manifest.timestamp.format("%Y-%m-%d %H:%M:%S")
        );
        shown += 1;
    }
    if shown == 0 {
        println!("No transactions recorded in {}", store.dir().display());
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref())?;
    let catalog_path = cli.catalog.as_deref();

    match cli.command {
        Commands::Install {
            components,
            parallel,
            no_recovery,
        } => {
            let catalog = load_catalog(catalog_path, &config, true)?;
            cmd_install(config, catalog, &components, parallel, no_recovery, cli.quiet)
        }
        Commands::Rollback { component } => {
            let catalog = load_catalog(catalog_path, &config, false)?;
            cmd_rollback(config, catalog, &component)
        }
        Commands::Plan { components } => {
            let catalog = load_catalog(catalog_path, &config, true)?;
            cmd_plan(&config, &catalog, &components)
        }
        Commands::Transactions { component } => cmd_transactions(&config, component.as_deref()),
    }
}
