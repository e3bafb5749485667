// src/install/recovery.rs

//! Failure classification for retry decisions
//!
//! Classification is a fixed keyword match on the failure text. Fatal
//! keywords win over recoverable ones, so "permission denied during download"
//! is never retried. Errors are classified by variant first; only the text a
//! failure reports about itself is matched, never the paths or command lines
//! it mentions.

use crate::error::Error;
use serde::Serialize;
use std::fmt;

/// How a failed install should be treated by the batch driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureClass {
    /// Transient; eligible for retry
    Recoverable,
    /// Never retried; stops later dependency levels
    Fatal,
    /// Neither; not retried, does not stop the batch
    Unknown,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Recoverable => "recoverable",
            Self::Fatal => "fatal",
            Self::Unknown => "unknown",
        })
    }
}

const FATAL_KEYWORDS: &[&str] = &[
    "privilege",
    "permission denied",
    "access denied",
    "disk space",
    "no space left",
    "circular dependency",
    "critical conflict",
];

const RECOVERABLE_KEYWORDS: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "download",
    "temporary",
    "temporarily",
    "connection",
];

pub fn classify_failure(message: &str) -> FailureClass {
    let message = message.to_lowercase();
    if FATAL_KEYWORDS.iter().any(|k| message.contains(k)) {
        FailureClass::Fatal
    } else if RECOVERABLE_KEYWORDS.iter().any(|k| message.contains(k)) {
        FailureClass::Recoverable
    } else {
        FailureClass::Unknown
    }
}

fn has_fatal_keyword(message: &str) -> bool {
    let message = message.to_lowercase();
    FATAL_KEYWORDS.iter().any(|k| message.contains(k))
}

/// Classify a structured error
pub fn classify_error(error: &Error) -> FailureClass {
    match error {
        Error::PrivilegeRequired(_)
        | Error::CircularDependency { .. }
        | Error::ConflictError(_) => FailureClass::Fatal,
        Error::CommandTimeout { .. } => FailureClass::Recoverable,
        Error::DownloadError(message) => {
            if has_fatal_keyword(message) {
                FailureClass::Fatal
            } else {
                FailureClass::Recoverable
            }
        }
        Error::OperationFailed { source, .. } => classify_error(source),
        Error::CommandFailed { stderr, .. } => classify_failure(stderr),
        Error::CommandError(message) => classify_failure(message),
        Error::Io(e) => classify_failure(&e.to_string()),
        // Path-bearing messages: only the fatal keywords are trusted
        Error::IoError(message) | Error::EnvironmentError(message) => {
            if has_fatal_keyword(message) {
                FailureClass::Fatal
            } else {
                FailureClass::Unknown
            }
        }
        _ => FailureClass::Unknown,
    }
}
