// src/lib.rs

//! Toolrig: transactional installer for runtimes, SDKs and dev-kits
//!
//! Installs named components from a catalog so that a multi-step,
//! multi-component installation either completes or leaves the machine as it
//! was.
//!
//! # Architecture
//!
//! - Transactions: every file write, directory, environment change, archive
//!   extraction and command is a reversible atomic operation with its backup
//!   taken first
//! - Manifests: committed transactions are persisted as JSON so they can be
//!   rolled back after a restart
//! - Resolver: fixed dependency graph with cycle detection and parallel levels
//! - Orchestrator: prepare, download, install, verify and commit, with retries
//!   for transient failures
//! - Rollback executor: LIFO undo stacks for changes outside a transaction

pub mod command;
pub mod component;
pub mod config;
mod error;
pub mod install;
pub mod platform;
pub mod progress;
pub mod resolver;
pub mod rollback;
pub mod transaction;

pub use component::{Component, ComponentCatalog, InstallMethod};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use install::{
    BatchResult, Collaborators, FailureClass, InstallationOrchestrator, InstallationResult,
    StrategyRegistry,
};
pub use progress::{InstallStatus, LogProgress, ProgressReporter, SilentProgress};
pub use resolver::{detect_circular_dependencies, parallel_levels, resolve_order};
pub use rollback::{RollbackAction, RollbackDescriptor, RollbackExecutor, RollbackReport};
pub use transaction::{
    AtomicOperation, AtomicTransaction, ManifestStore, OperationKind, TransactionEngine,
    TransactionManifest, TransactionState,
};
