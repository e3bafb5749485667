// src/platform/verify.rs

use super::{VerificationReport, Verifier};
use crate::command::{run_command, CommandSpec};
use crate::component::Component;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Checks required paths and runs verification commands
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    timeout: Duration,
}

impl CommandVerifier {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Verifier for CommandVerifier {
    fn verify(&self, component: &Component, install_path: &Path) -> VerificationReport {
        let mut report = VerificationReport {
            success: true,
            installed_path: install_path.exists().then(|| install_path.to_path_buf()),
            version: component.version.clone(),
            ..Default::default()
        };

        for path in &component.verification.paths {
            let full = if path.is_absolute() {
                path.clone()
            } else {
                install_path.join(path)
            };
            let present = full.exists();
            debug!("Verify path {}: {}", full.display(), present);
            report.details.insert(
                format!("path:{}", full.display()),
                if present { "present" } else { "missing" }.to_string(),
            );
            report.success &= present;
        }

        for (i, argv) in component.verification.commands.iter().enumerate() {
            let argv: Vec<String> = argv
                .iter()
                .map(|a| component.expand(a, install_path))
                .collect();
            let spec = CommandSpec::new(argv);
            let key = format!("command:{}", spec.display());

            match run_command(&spec, self.timeout) {
                Ok(output) if output.success() => {
                    if i == 0 {
                        if let Some(line) = output.stdout.lines().find(|l| !l.trim().is_empty()) {
                            report.version = Some(line.trim().to_string());
                        }
                    }
                    report.details.insert(key, "ok".to_string());
                }
                Ok(output) => {
                    report
                        .details
                        .insert(key, format!("exit code {}", output.exit_code));
                    report.success = false;
                }
                Err(e) => {
                    report.details.insert(key, e.to_string());
                    report.success = false;
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::InstallMethod;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_verify_paths_and_version() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("bin")).unwrap();
        fs::write(temp_dir.path().join("bin/tool"), "x").unwrap();

        let mut component = Component::new("tool", InstallMethod::Script);
        component.verification.paths = vec![PathBuf::from("bin/tool")];
        component.verification.commands =
            vec![vec!["sh".to_string(), "-c".to_string(), "echo 1.2.3".to_string()]];

        let report = CommandVerifier::new(Duration::from_secs(10)).verify(&component, temp_dir.path());
        assert!(report.success);
        assert_eq!(report.version.as_deref(), Some("1.2.3"));
        assert_eq!(report.installed_path.as_deref(), Some(temp_dir.path()));
    }

    #[test]
    fn test_verify_missing_path_fails() {
        let temp_dir = TempDir::new().unwrap();
        let mut component = Component::new("tool", InstallMethod::Script);
        component.verification.paths = vec![PathBuf::from("bin/tool")];

        let report = CommandVerifier::new(Duration::from_secs(10)).verify(&component, temp_dir.path());
        assert!(!report.success);
        assert!(report.details.values().any(|v| v == "missing"));
    }

    #[test]
    fn test_verify_failing_command() {
        let temp_dir = TempDir::new().unwrap();
        let mut component = Component::new("tool", InstallMethod::Script);
        component.verification.commands = vec![vec!["false".to_string()]];

        let report = CommandVerifier::new(Duration::from_secs(10)).verify(&component, temp_dir.path());
        assert!(!report.success);
    }
}
