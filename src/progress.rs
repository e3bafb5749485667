// src/progress.rs

//! Install phase reporting
//!
//! The orchestrator reports every phase transition of every component through
//! a [`ProgressReporter`]. Implementations must be thread-safe since batch
//! installs report from worker threads.
//!
//! - `LogProgress`: logs transitions to tracing
//! - `SilentProgress`: no-op for scripted/quiet modes
//!
//! The CLI adds an indicatif-backed reporter on top of these.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// Phase of a single component install
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallStatus {
    Pending,
    Preparing,
    Downloading,
    Installing,
    Verifying,
    Completed,
    Failed,
    /// Never started, e.g. skipped after a dependency failed
    Cancelled,
    RollingBack,
    RolledBack,
}

impl InstallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Preparing => "preparing",
            Self::Downloading => "downloading",
            Self::Installing => "installing",
            Self::Verifying => "verifying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::RollingBack => "rolling-back",
            Self::RolledBack => "rolled-back",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::RolledBack
        )
    }
}

impl fmt::Display for InstallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives component phase transitions
pub trait ProgressReporter: Send + Sync {
    /// `component` entered `status`
    fn update(&self, component: &str, status: InstallStatus);

    /// A batch of `components` is about to start
    fn batch_started(&self, _components: &[String]) {}

    fn batch_finished(&self, _success: bool) {}
}

/// Progress reporter that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn update(&self, _component: &str, _status: InstallStatus) {}
}

/// Logs transitions at info level, failures at warn
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn update(&self, component: &str, status: InstallStatus) {
        match status {
            InstallStatus::Failed | InstallStatus::RollingBack => {
                warn!("{}: {}", component, status)
            }
            _ => info!("{}: {}", component, status),
        }
    }

    fn batch_started(&self, components: &[String]) {
        info!("Installing {} components: {}", components.len(), components.join(", "));
    }

    fn batch_finished(&self, success: bool) {
        if success {
            info!("Batch install complete");
        } else {
            warn!("Batch install finished with failures");
        }
    }
}
