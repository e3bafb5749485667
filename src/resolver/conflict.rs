// src/resolver/conflict.rs

//! Pairwise conflict detection between requested components
//!
//! Only explicitly declared conflicts block a batch. Overlapping install
//! paths and differing versions of the same base are advisory: they are
//! reported and force sequential installation, nothing more.

use crate::component::Component;
use crate::config::EngineConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictKind {
    /// One component lists the other in `conflicts`
    Explicit,
    /// Install paths are equal or nested
    InstallPath,
    /// Same base, different versions
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentConflict {
    pub first: String,
    pub second: String,
    pub kind: ConflictKind,
    pub severity: ConflictSeverity,
    pub reason: String,
}

impl ComponentConflict {
    pub fn is_critical(&self) -> bool {
        self.severity == ConflictSeverity::Critical
    }

    pub fn involves(&self, name: &str) -> bool {
        self.first == name || self.second == name
    }
}

impl fmt::Display for ComponentConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            ConflictSeverity::Warning => "warning",
            ConflictSeverity::Critical => "critical",
        };
        write!(
            f,
            "{} conflict between {} and {}: {}",
            severity, self.first, self.second, self.reason
        )
    }
}

/// Check every pair of `components` for conflicts
pub fn detect_conflicts(components: &[&Component], config: &EngineConfig) -> Vec<ComponentConflict> {
    let mut conflicts = Vec::new();

    for (i, a) in components.iter().enumerate() {
        for b in &components[i + 1..] {
            if a.conflicts.contains(&b.name) || b.conflicts.contains(&a.name) {
                conflicts.push(ComponentConflict {
                    first: a.name.clone(),
                    second: b.name.clone(),
                    kind: ConflictKind::Explicit,
                    severity: ConflictSeverity::Critical,
                    reason: "declared as conflicting".to_string(),
                });
            }

            let path_a = a.install_path(config);
            let path_b = b.install_path(config);
            if path_a.starts_with(&path_b) || path_b.starts_with(&path_a) {
                conflicts.push(ComponentConflict {
                    first: a.name.clone(),
                    second: b.name.clone(),
                    kind: ConflictKind::InstallPath,
                    severity: ConflictSeverity::Warning,
                    reason: format!(
                        "install paths overlap ({} and {})",
                        path_a.display(),
                        path_b.display()
                    ),
                });
            }

            if let (Some(base_a), Some(base_b)) = (&a.base, &b.base)
                && base_a == base_b
                && let (Some(ver_a), Some(ver_b)) = (&a.version, &b.version)
                && ver_a != ver_b
            {
                conflicts.push(ComponentConflict {
                    first: a.name.clone(),
                    second: b.name.clone(),
                    kind: ConflictKind::Version,
                    severity: ConflictSeverity::Warning,
                    reason: format!(
                        "both build on {} but require versions {} and {}",
                        base_a, ver_a, ver_b
                    ),
                });
            }
        }
    }

    conflicts
}
