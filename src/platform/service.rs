// src/platform/service.rs

use super::ServiceManager;
use crate::command::{run_checked, CommandSpec};
use crate::error::Result;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Manages system services through `systemctl`
#[derive(Debug, Clone)]
pub struct SystemctlServiceManager {
    unit_dir: PathBuf,
    user: bool,
    timeout: Duration,
}

impl SystemctlServiceManager {
    pub fn system(timeout: Duration) -> Self {
        Self {
            unit_dir: PathBuf::from("/etc/systemd/system"),
            user: false,
            timeout,
        }
    }

    pub fn user(unit_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            unit_dir: unit_dir.into(),
            user: true,
            timeout,
        }
    }

    fn systemctl(&self, args: &[&str]) -> CommandSpec {
        let mut argv = vec!["systemctl".to_string()];
        if self.user {
            argv.push("--user".to_string());
        }
        argv.extend(args.iter().map(|a| a.to_string()));
        CommandSpec::new(argv)
    }

    fn unit_name(service: &str) -> String {
        if service.contains('.') {
            service.to_string()
        } else {
            format!("{}.service", service)
        }
    }
}

impl ServiceManager for SystemctlServiceManager {
    fn stop(&self, service: &str) -> Result<()> {
        let unit = Self::unit_name(service);
        run_checked(&self.systemctl(&["stop", &unit]), self.timeout)?;
        info!("Stopped service {}", unit);
        Ok(())
    }

    fn remove(&self, service: &str) -> Result<()> {
        let unit = Self::unit_name(service);
        run_checked(&self.systemctl(&["disable", &unit]), self.timeout)?;

        let unit_file = self.unit_dir.join(&unit);
        if unit_file.exists() {
            fs::remove_file(&unit_file)?;
        }
        run_checked(&self.systemctl(&["daemon-reload"]), self.timeout)?;
        info!("Removed service {}", unit);
        Ok(())
    }
}
