// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the replication engine.
//!
//! Store errors are wrapped with the operation and record type that produced
//! them. How each kind is treated by the reconciliation handler:
//!
//! | Kind | Treatment |
//! |------|-----------|
//! | NotFound | Expected signal, drives branch selection, never an error |
//! | Forbidden | Capability revoked remotely, logged at info, not retried |
//! | Conflict | Returned, requeued, no warning event |
//! | Other store errors | Returned, requeued with exponential backoff |
//! | `ResourceNotEmpty` | Refusal from a graceful stop, caller retries later |
//! | `Config` / `InvalidState` | Caller bug or bad configuration |
//!
//! Registry inconsistencies (an unregistered record type, a type started
//! twice) are not represented here: they panic.
//!
//! # Retry Behavior
//!
//! Use [`ReplicationError::is_retryable()`] to decide whether the work queue
//! should retry an item.

use crate::record::SectionError;
use crate::store::StoreError;
use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Which cluster a condition refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Local,
    Remote,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Local => write!(f, "local"),
            Side::Remote => write!(f, "remote"),
        }
    }
}

/// Errors that can occur during replication.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Control-plane API call failed.
    #[error("{side} store error ({operation} {resource}): {source}")]
    Store {
        side: Side,
        operation: String,
        resource: String,
        #[source]
        source: StoreError,
    },

    /// A graceful stop found records still belonging to the reflector.
    #[error("cannot stop reflection of {resource}: {count} {side} record(s) still present")]
    ResourceNotEmpty {
        resource: String,
        side: Side,
        count: usize,
    },

    /// A record payload lacks an expected section.
    #[error("record section error: {0}")]
    Section(#[from] SectionError),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No reflector exists for the named remote cluster.
    #[error("unknown remote cluster: {0}")]
    UnknownRemote(String),

    /// Engine state machine violation.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown in progress.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReplicationError {
    /// Wrap a store error with the operation that produced it.
    pub fn store(
        side: Side,
        operation: impl Into<String>,
        resource: impl ToString,
        source: StoreError,
    ) -> Self {
        Self::Store {
            side,
            operation: operation.into(),
            resource: resource.to_string(),
            source,
        }
    }

    /// The wrapped store error, if any.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Store { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Optimistic-concurrency collision.
    pub fn is_conflict(&self) -> bool {
        self.store_error().is_some_and(StoreError::is_conflict)
    }

    pub fn is_forbidden(&self) -> bool {
        self.store_error().is_some_and(StoreError::is_forbidden)
    }

    pub fn is_not_found(&self) -> bool {
        self.store_error().is_some_and(StoreError::is_not_found)
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store { source, .. } => !source.is_forbidden(),
            Self::ResourceNotEmpty { .. } => true, // Drains as mirrors are deleted
            Self::Section(_) => true,              // Payload may be fixed by its owner
            Self::Config(_) => false,
            Self::UnknownRemote(_) => false,
            Self::InvalidState { .. } => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }
}
