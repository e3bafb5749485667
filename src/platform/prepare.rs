// src/platform/prepare.rs

use super::{PreparationReport, Preparer};
use crate::component::Component;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Creates the shared install root and per-component download directories.
///
/// Component install paths themselves are left alone: they are created inside
/// the install transaction so rollback can remove them.
#[derive(Debug, Clone)]
pub struct DirectoryPreparer {
    install_root: PathBuf,
    downloads_dir: PathBuf,
}

impl DirectoryPreparer {
    pub fn new(install_root: impl Into<PathBuf>, downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            install_root: install_root.into(),
            downloads_dir: downloads_dir.into(),
        }
    }
}

impl Preparer for DirectoryPreparer {
    fn prepare(&self, components: &[&Component]) -> PreparationReport {
        let mut dirs = vec![self.install_root.clone()];
        dirs.extend(
            components
                .iter()
                .filter(|c| c.download.is_some())
                .map(|c| self.downloads_dir.join(&c.name)),
        );

        let errors: Vec<String> = dirs
            .iter()
            .filter_map(|dir| {
                debug!("Preparing directory {}", dir.display());
                fs::create_dir_all(dir)
                    .err()
                    .map(|e| format!("Failed to create {}: {}", dir.display(), e))
            })
            .collect();

        PreparationReport {
            success: errors.is_empty(),
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{DownloadSpec, InstallMethod};
    use tempfile::TempDir;

    #[test]
    fn test_prepare_creates_roots() {
        let temp_dir = TempDir::new().unwrap();
        let preparer = DirectoryPreparer::new(
            temp_dir.path().join("components"),
            temp_dir.path().join("downloads"),
        );

        let mut jdk = Component::new("jdk", InstallMethod::Archive);
        jdk.download = Some(DownloadSpec {
            url: "https://example.org/jdk.tar.gz".to_string(),
            mirrors: vec![],
            sha256: None,
            filename: None,
        });

        let report = preparer.prepare(&[&jdk]);
        assert!(report.success);
        assert!(temp_dir.path().join("components").is_dir());
        assert!(temp_dir.path().join("downloads/jdk").is_dir());
        assert!(!temp_dir.path().join("components/jdk").exists());
    }

    #[test]
    fn test_prepare_reports_errors() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("file");
        fs::write(&blocker, "x").unwrap();

        let preparer = DirectoryPreparer::new(blocker.join("components"), blocker.join("dl"));
        let report = preparer.prepare(&[]);
        assert!(!report.success);
        assert_eq!(report.errors.len(), 1);
    }
}
