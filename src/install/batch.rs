// src/install/batch.rs

//! Multi-component installs
//!
//! The batch driver checks the request for conflicts and cycles, groups it
//! into dependency levels and installs level by level. Members of a level run
//! on a bounded rayon pool when all of them allow it. Recoverable failures are
//! retried with exponential backoff; a fatal failure skips every later level
//! and, with recovery enabled, rolls back what the batch already installed.

use super::recovery::FailureClass;
use super::{InstallationOrchestrator, InstallationResult};
use crate::component::Component;
use crate::error::Error;
use crate::progress::InstallStatus;
use crate::resolver::{detect_conflicts, ComponentConflict, DependencyGraph};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::thread;
use tracing::{error, info, warn};

/// Outcome of one `install_multiple` call
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    pub overall_success: bool,
    pub results: BTreeMap<String, InstallationResult>,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
    /// Completed components undone after a fatal failure
    pub rolled_back: Vec<String>,
    pub conflicts: Vec<ComponentConflict>,
    /// Retries beyond the first attempt, per component
    pub recovery_attempts: BTreeMap<String, u32>,
    /// Order the batch was scheduled in, dependencies first
    pub dependency_order: Vec<String>,
    /// Why the batch stopped before installing anything
    pub error: Option<String>,
}

impl BatchResult {
    fn aborted(names: &[String], reason: String) -> Self {
        error!("Batch aborted: {}", reason);
        let mut result = Self {
            skipped: names.to_vec(),
            error: Some(reason.clone()),
            ..Default::default()
        };
        for name in names {
            result
                .results
                .insert(name.clone(), InstallationResult::skipped(name, reason.clone()));
        }
        result
    }

    fn skip(&mut self, name: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Skipping {}: {}", name, reason);
        self.skipped.push(name.to_string());
        self.results
            .insert(name.to_string(), InstallationResult::skipped(name, reason));
    }
}

impl InstallationOrchestrator {
    /// Install `names` in dependency order.
    ///
    /// Component failures never escape as errors; they are collected into the
    /// returned [`BatchResult`].
    pub fn install_multiple(
        &self,
        names: &[String],
        max_parallel: usize,
        enable_recovery: bool,
    ) -> BatchResult {
        let mut requested: Vec<String> = Vec::new();
        for name in names {
            if !requested.contains(name) {
                requested.push(name.clone());
            }
        }
        self.progress.batch_started(&requested);
        let result = self.run_batch(&requested, max_parallel.max(1), enable_recovery);
        self.progress.batch_finished(result.overall_success);
        result
    }

    fn run_batch(
        &self,
        names: &[String],
        max_parallel: usize,
        enable_recovery: bool,
    ) -> BatchResult {
        let mut components: Vec<&Component> = Vec::new();
        for name in names {
            match self.catalog.get(name) {
                Ok(component) => components.push(component),
                Err(e) => return BatchResult::aborted(names, e.to_string()),
            }
        }

        let conflicts = detect_conflicts(&components, &self.config);
        for conflict in &conflicts {
            warn!("{}", conflict);
        }
        if let Some(critical) = conflicts.iter().find(|c| c.is_critical()) {
            let mut result =
                BatchResult::aborted(names, Error::ConflictError(critical.to_string()).to_string());
            result.conflicts = conflicts;
            return result;
        }

        let graph = DependencyGraph::from_map(&self.catalog.dependency_map(names));
        let cycles = graph.detect_cycles();
        if let Some(cycle) = cycles.first() {
            let mut path = cycle.clone();
            path.extend(cycle.first().cloned());
            let mut result =
                BatchResult::aborted(names, Error::CircularDependency { cycle: path }.to_string());
            result.conflicts = conflicts;
            return result;
        }
        let levels = match graph.levels() {
            Ok(levels) => levels,
            Err(e) => {
                let mut result = BatchResult::aborted(names, e.to_string());
                result.conflicts = conflicts;
                return result;
            }
        };

        let mut batch = BatchResult {
            dependency_order: levels.concat(),
            conflicts,
            ..Default::default()
        };
        info!(
            "Installing {} components in {} levels",
            batch.dependency_order.len(),
            levels.len()
        );

        let mut stop_reason: Option<String> = None;
        for (index, level) in levels.iter().enumerate() {
            if let Some(ref reason) = stop_reason {
                for name in level {
                    batch.skip(name, reason.clone());
                }
                continue;
            }

            let mut runnable: Vec<&str> = Vec::new();
            for name in level {
                let blocked: Vec<&str> = graph
                    .dependencies(name)
                    .iter()
                    .map(String::as_str)
                    .filter(|d| !batch.completed.iter().any(|c| c == d))
                    .collect();
                if blocked.is_empty() {
                    runnable.push(name);
                } else {
                    batch.skip(name, format!("dependency not installed: {}", blocked.join(", ")));
                }
            }

            let outcomes = self.install_level(
                index,
                &runnable,
                max_parallel,
                enable_recovery,
                &batch.conflicts,
            );

            for (result, attempts) in outcomes {
                let name = result.component.clone();
                batch.recovery_attempts.insert(name.clone(), attempts.saturating_sub(1));
                if result.success {
                    batch.completed.push(name.clone());
                } else {
                    if result.failure == Some(FailureClass::Fatal) {
                        error!("Critical failure installing {}: {}", name, result.message);
                        if stop_reason.is_none() {
                            stop_reason = Some(format!("critical failure in {}", name));
                        }
                    }
                    batch.failed.push(name.clone());
                }
                batch.results.insert(name, result);
            }

            if stop_reason.is_some() && enable_recovery {
                self.roll_back_completed(&mut batch);
            }
        }

        batch.overall_success =
            batch.failed.is_empty() && batch.skipped.is_empty() && batch.error.is_none();
        batch
    }

    /// Install one level, concurrently when every member allows it
    fn install_level(
        &self,
        index: usize,
        names: &[&str],
        max_parallel: usize,
        enable_recovery: bool,
        conflicts: &[ComponentConflict],
    ) -> Vec<(InstallationResult, u32)> {
        let parallel_safe = names.iter().all(|name| {
            self.catalog.get(name).is_ok_and(|c| c.parallel_safe)
                && !conflicts.iter().any(|c| c.involves(name))
        });
        let workers = max_parallel.min(names.len());

        if workers > 1 && parallel_safe {
            info!(
                "Level {}: installing {} components on {} workers",
                index,
                names.len(),
                workers
            );
            match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
                Ok(pool) => {
                    return pool.install(|| {
                        names
                            .par_iter()
                            .map(|name| self.install_with_recovery(name, enable_recovery))
                            .collect()
                    });
                }
                Err(e) => warn!("Failed to start worker pool, installing sequentially: {}", e),
            }
        } else if names.len() > 1 {
            info!("Level {}: installing {} components sequentially", index, names.len());
        }

        names
            .iter()
            .map(|name| self.install_with_recovery(name, enable_recovery))
            .collect()
    }

    /// `install_component` with bounded retries for recoverable failures.
    ///
    /// Returns the last result and how many attempts were made.
    pub fn install_with_recovery(
        &self,
        name: &str,
        enable_recovery: bool,
    ) -> (InstallationResult, u32) {
        let max_attempts = if enable_recovery {
            self.config.max_attempts.max(1)
        } else {
            1
        };

        let mut attempt = 1;
        loop {
            let result = self.install_component(name);
            if result.success || attempt >= max_attempts {
                return (result, attempt);
            }

            let class = result.failure.unwrap_or(FailureClass::Unknown);
            if class != FailureClass::Recoverable {
                info!("Not retrying {}: failure is {}", name, class);
                return (result, attempt);
            }

            let delay = self.config.retry_delay(attempt);
            warn!(
                "Attempt {}/{} for {} failed, retrying in {:?}: {}",
                attempt, max_attempts, name, delay, result.message
            );
            thread::sleep(delay);
            attempt += 1;
        }
    }

    /// Undo every component this batch completed, newest first.
    ///
    /// Fully undone components move from `completed` to `rolled_back`; a
    /// partial or failed rollback moves the component to `failed`.
    fn roll_back_completed(&self, batch: &mut BatchResult) {
        let completed: Vec<String> = batch.completed.drain(..).rev().collect();
        for name in completed {
            warn!("Rolling back {} after critical failure", name);
            let outcome = match self.rollback_component(&name) {
                Ok(report) if report.success => Ok(()),
                Ok(report) => Err(format!(
                    "partial rollback, {} steps failed",
                    report.failures().count()
                )),
                Err(e) => Err(e.to_string()),
            };

            let result = batch.results.get_mut(&name);
            match outcome {
                Ok(()) => {
                    if let Some(result) = result {
                        result.success = false;
                        result.status = InstallStatus::RolledBack;
                        result.rollback_available = false;
                        result.message = format!("Rolled back {} after critical failure", name);
                    }
                    batch.rolled_back.push(name);
                }
                Err(reason) => {
                    error!("Failed to roll back {}: {}", name, reason);
                    if let Some(result) = result {
                        result.success = false;
                        result.status = InstallStatus::Failed;
                        result.details.insert("rollback".to_string(), reason);
                    }
                    batch.failed.push(name);
                }
            }
        }
    }
}
