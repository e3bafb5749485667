// tests/batch_install.rs

//! Integration tests for multi-component installs.
//!
//! These tests verify that:
//! 1. Components install in dependency order, level by level
//! 2. Critical conflicts and cycles abort before any install runs
//! 3. Recoverable failures are retried up to the attempt ceiling
//! 4. A failed dependency skips its dependents
//! 5. A fatal failure rolls back what the batch already installed

mod common;

use common::{component, harness, harness_with, names, Behavior, ScriptDownloader, ScriptedStrategy};
use std::sync::Arc;
use std::time::Duration;
use toolrig::component::DownloadSpec;
use toolrig::{Component, FailureClass, InstallMethod, InstallStatus, StrategyRegistry};

#[test]
fn test_installs_in_dependency_order() {
    let h = harness(
        vec![
            component("A", &["B"]),
            component("B", &["C"]),
            component("C", &[]),
        ],
        ScriptedStrategy::new(),
    );

    let result = h
        .orchestrator
        .install_multiple(&names(&["A", "B", "C"]), 4, true);

    assert!(result.overall_success, "{:?}", result.error);
    assert_eq!(result.dependency_order, names(&["C", "B", "A"]));
    assert_eq!(h.strategy.order(), names(&["C", "B", "A"]));
    assert_eq!(result.completed, names(&["C", "B", "A"]));
    for name in ["A", "B", "C"] {
        let path = h.orchestrator.install_path(name).unwrap();
        assert!(path.join("payload.txt").is_file());
        assert_eq!(result.results[name].status, InstallStatus::Completed);
        assert_eq!(result.recovery_attempts[name], 0);
    }
}

#[test]
fn test_duplicate_names_install_once() {
    let h = harness(vec![component("C", &[])], ScriptedStrategy::new());
    let result = h.orchestrator.install_multiple(&names(&["C", "C"]), 2, true);
    assert!(result.overall_success);
    assert_eq!(h.strategy.calls("C"), 1);
    assert_eq!(result.completed, names(&["C"]));
}

#[test]
fn test_unknown_component_aborts_batch() {
    let h = harness(vec![component("A", &[])], ScriptedStrategy::new());
    let result = h
        .orchestrator
        .install_multiple(&names(&["A", "ghost"]), 2, true);

    assert!(!result.overall_success);
    assert!(result.error.unwrap().contains("Unknown component"));
    assert_eq!(h.strategy.total_calls(), 0);
    assert_eq!(result.skipped.len(), 2);
}

#[test]
fn test_critical_conflict_installs_nothing() {
    let mut openjdk = component("openjdk", &[]);
    openjdk.conflicts = vec!["oraclejdk".to_string()];
    let h = harness(
        vec![openjdk, component("oraclejdk", &[])],
        ScriptedStrategy::new(),
    );

    let result = h
        .orchestrator
        .install_multiple(&names(&["openjdk", "oraclejdk"]), 2, true);

    assert!(!result.overall_success);
    assert_eq!(h.strategy.total_calls(), 0);
    assert_eq!(result.conflicts.len(), 1);
    assert!(result.conflicts[0].is_critical());
    assert!(result.error.unwrap().contains("Critical conflict"));
    assert!(result.completed.is_empty());
    assert_eq!(
        result.results["openjdk"].status,
        InstallStatus::Cancelled
    );
}

#[test]
fn test_cycle_aborts_batch() {
    let h = harness(
        vec![component("A", &["B"]), component("B", &["A"])],
        ScriptedStrategy::new(),
    );

    let result = h.orchestrator.install_multiple(&names(&["A", "B"]), 2, true);

    assert!(!result.overall_success);
    assert_eq!(h.strategy.total_calls(), 0);
    let error = result.error.unwrap();
    assert!(error.contains("Circular dependency"), "{}", error);
    assert!(error.contains("A -> B -> A"), "{}", error);
}

#[test]
fn test_recoverable_failure_retried_to_ceiling() {
    let h = harness(
        vec![component("flaky", &[])],
        ScriptedStrategy::new().behave("flaky", Behavior::Fail("network timeout".to_string())),
    );

    let result = h.orchestrator.install_multiple(&names(&["flaky"]), 1, true);

    assert!(!result.overall_success);
    assert_eq!(h.strategy.calls("flaky"), 3);
    assert_eq!(result.recovery_attempts["flaky"], 2);
    assert_eq!(result.failed, names(&["flaky"]));
    assert_eq!(result.results["flaky"].status, InstallStatus::RolledBack);
}

#[test]
fn test_no_retries_without_recovery() {
    let h = harness(
        vec![component("flaky", &[])],
        ScriptedStrategy::new().behave("flaky", Behavior::Fail("network timeout".to_string())),
    );

    let result = h.orchestrator.install_multiple(&names(&["flaky"]), 1, false);

    assert!(!result.overall_success);
    assert_eq!(h.strategy.calls("flaky"), 1);
    assert_eq!(result.recovery_attempts["flaky"], 0);
}

#[test]
fn test_transient_failure_recovers() {
    let h = harness(
        vec![component("sdk", &[])],
        ScriptedStrategy::new().behave(
            "sdk",
            Behavior::FailTimes(1, "connection reset by peer".to_string()),
        ),
    );

    let result = h.orchestrator.install_multiple(&names(&["sdk"]), 1, true);

    assert!(result.overall_success);
    assert_eq!(h.strategy.calls("sdk"), 2);
    assert_eq!(result.recovery_attempts["sdk"], 1);
    // Each attempt runs in its own transaction
    assert_eq!(h.orchestrator.transaction_ids("sdk").len(), 2);
}

#[test]
fn test_unclassified_failure_not_retried() {
    let h = harness(
        vec![component("tool", &[])],
        ScriptedStrategy::new().behave("tool", Behavior::Fail("exit status 2".to_string())),
    );

    let (result, attempts) = h.orchestrator.install_with_recovery("tool", true);

    assert!(!result.success);
    assert_eq!(attempts, 1);
    assert_eq!(h.strategy.calls("tool"), 1);
}

#[test]
fn test_installer_exit_in_downloads_dir_not_retried() {
    let mut setup = Component::new("setup-tool", InstallMethod::Executable);
    setup.download = Some(DownloadSpec {
        url: "https://mirror.example/setup.sh".to_string(),
        mirrors: Vec::new(),
        sha256: None,
        filename: None,
    });
    let h = harness_with(vec![setup], ScriptedStrategy::new(), |c| {
        c.downloader = Arc::new(ScriptDownloader {
            body: "#!/bin/sh\necho 'unknown option' >&2\nexit 2\n".to_string(),
        })
    });
    let orchestrator = h.orchestrator.with_strategies(StrategyRegistry::with_defaults());

    let (result, attempts) = orchestrator.install_with_recovery("setup-tool", true);

    assert!(!result.success);
    // The installer runs from the downloads directory, yet its exit is not a download failure
    assert!(result.message.contains("/downloads/"), "{}", result.message);
    assert_eq!(result.failure, Some(FailureClass::Unknown));
    assert_eq!(attempts, 1);
    assert_eq!(orchestrator.transaction_ids("setup-tool").len(), 1);
}

#[test]
fn test_failed_dependency_skips_dependents() {
    let h = harness(
        vec![
            component("A", &["B"]),
            component("B", &[]),
            component("C", &[]),
        ],
        ScriptedStrategy::new().behave("B", Behavior::Fail("exit status 2".to_string())),
    );

    let result = h
        .orchestrator
        .install_multiple(&names(&["A", "B", "C"]), 1, true);

    assert!(!result.overall_success);
    assert_eq!(result.failed, names(&["B"]));
    assert_eq!(result.skipped, names(&["A"]));
    assert_eq!(result.completed, names(&["C"]));
    assert_eq!(h.strategy.calls("A"), 0);
    assert_eq!(result.results["A"].status, InstallStatus::Cancelled);
    assert!(result.results["A"].message.contains("B"));
    // Non-fatal failures leave completed components alone
    assert!(result.rolled_back.is_empty());
}

#[test]
fn test_fatal_failure_rolls_back_completed() {
    let h = harness(
        vec![
            component("A", &["B"]),
            component("B", &["C"]),
            component("C", &[]),
        ],
        ScriptedStrategy::new().behave("B", Behavior::Fail("permission denied".to_string())),
    );

    let result = h
        .orchestrator
        .install_multiple(&names(&["A", "B", "C"]), 1, true);

    assert!(!result.overall_success);
    assert_eq!(h.strategy.calls("B"), 1);
    assert_eq!(h.strategy.calls("A"), 0);
    assert_eq!(result.rolled_back, names(&["C"]));
    assert!(result.completed.is_empty());
    assert_eq!(result.failed, names(&["B"]));
    assert_eq!(result.skipped, names(&["A"]));
    let undone = &result.results["C"];
    assert_eq!(undone.status, InstallStatus::RolledBack);
    assert!(!undone.success);
    assert!(!undone.rollback_available);
    assert!(!h.orchestrator.install_path("C").unwrap().exists());
    assert_eq!(
        h.orchestrator.status("C"),
        Some(InstallStatus::RolledBack)
    );
}

#[test]
fn test_fatal_failure_without_recovery_keeps_completed() {
    let h = harness(
        vec![component("B", &["C"]), component("C", &[])],
        ScriptedStrategy::new().behave("B", Behavior::Fail("No space left on device".to_string())),
    );

    let result = h.orchestrator.install_multiple(&names(&["B", "C"]), 1, false);

    assert!(!result.overall_success);
    assert!(result.rolled_back.is_empty());
    assert_eq!(result.completed, names(&["C"]));
    assert!(
        h.orchestrator
            .install_path("C")
            .unwrap()
            .join("payload.txt")
            .is_file()
    );
}

#[test]
fn test_independent_components_install_concurrently() {
    let h = harness(
        vec![component("X", &[]), component("Y", &[])],
        ScriptedStrategy::new().with_delay(Duration::from_millis(300)),
    );

    let result = h.orchestrator.install_multiple(&names(&["X", "Y"]), 2, true);

    assert!(result.overall_success);
    assert_eq!(h.strategy.peak_concurrency(), 2);
}

#[test]
fn test_parallel_unsafe_member_forces_sequential_level() {
    let mut y = component("Y", &[]);
    y.parallel_safe = false;
    let h = harness(
        vec![component("X", &[]), y],
        ScriptedStrategy::new().with_delay(Duration::from_millis(50)),
    );

    let result = h.orchestrator.install_multiple(&names(&["X", "Y"]), 4, true);

    assert!(result.overall_success);
    assert_eq!(h.strategy.peak_concurrency(), 1);
}

#[test]
fn test_single_worker_installs_sequentially() {
    let h = harness(
        vec![component("X", &[]), component("Y", &[])],
        ScriptedStrategy::new().with_delay(Duration::from_millis(50)),
    );

    let result = h.orchestrator.install_multiple(&names(&["X", "Y"]), 1, true);

    assert!(result.overall_success);
    assert_eq!(h.strategy.peak_concurrency(), 1);
}
