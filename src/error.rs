// src/error.rs

//! Error types shared across the installation engine

use thiserror::Error;

/// Errors produced by the installation engine
#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem failure described with its path context
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration or catalog could not be loaded
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Malformed component descriptor or unsupported install method
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unknown component: {0}")]
    UnknownComponent(String),

    /// Dependency graph contains a cycle
    #[error("Circular dependency detected: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    /// Transaction API called out of sequence
    #[error("Transaction error: {0}")]
    TransactionError(String),

    #[error("Operation {operation} failed: {source}")]
    OperationFailed {
        operation: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Command error: {0}")]
    CommandError(String),

    /// A command ran to completion with a non-zero exit code
    #[error("'{command}' exited with code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// A run-command operation exceeded its timeout
    #[error("Command '{command}' timed out after {seconds} seconds")]
    CommandTimeout { command: String, seconds: u64 },

    #[error("Download error: {0}")]
    DownloadError(String),

    #[error("Verification failed: {0}")]
    VerificationError(String),

    #[error("Environment error: {0}")]
    EnvironmentError(String),

    /// The caller lacks the privilege the operation needs
    #[error("Insufficient privilege: {0}")]
    PrivilegeRequired(String),

    #[error("Critical conflict: {0}")]
    ConflictError(String),

    #[error("Rollback error: {0}")]
    RollbackError(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
