//! Error types for seeding, storage, and catch-up.

use crate::identity::{StoreId, TxId};
use std::path::PathBuf;
use thiserror::Error;

/// Result type for seeding and member startup operations.
pub type SeedResult<T> = std::result::Result<T, SeedError>;

/// Result type for catch-up operations.
pub type CatchupResult<T> = std::result::Result<T, CatchupError>;

/// Fatal errors raised before a member is allowed to participate in the
/// cluster. None of these are retried.
#[derive(Debug, Error)]
pub enum SeedError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Target store directory is occupied by conflicting content.
    ///
    /// The operator must resolve this; the placer never overwrites.
    #[error("Placement failed at {path}: {reason}")]
    Placement {
        /// Offending path inside the target directory.
        path: PathBuf,
        /// What made the target incompatible with the snapshot.
        reason: String,
    },

    /// The local store belongs to a different lineage than the cluster.
    #[error("Store identity mismatch: cluster has {expected}, local store has {actual}")]
    IdentityIncompatible {
        /// Identity already established by the cluster.
        expected: StoreId,
        /// Identity found in the local store directory.
        actual: StoreId,
    },

    /// Store error during startup.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the local store: the transaction log and batch application.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A batch did not continue exactly where the store left off.
    ///
    /// Nothing is applied; the caller re-issues the request from the
    /// correct transaction id.
    #[error("Non-contiguous batch: expected tx {expected}, got {found}")]
    NonContiguous {
        /// The next transaction id the store will accept.
        expected: TxId,
        /// The offending transaction id in the batch.
        found: TxId,
    },

    /// Store directory exists but carries no identity record.
    #[error("Store at {path} has no identity record")]
    MissingIdentity {
        /// The store directory.
        path: PathBuf,
    },

    /// The durable marker references a transaction the log does not hold.
    #[error("Applied marker is {marker} but the transaction log ends at {log_last}")]
    MarkerBeyondLog {
        /// Last transaction present in the log.
        log_last: TxId,
        /// The durable last-applied marker.
        marker: TxId,
    },

    /// The log was pruned below its own replay point; state cannot be
    /// rebuilt from it.
    #[error("Transaction log pruned up to {horizon}; cannot rebuild state")]
    Pruned {
        /// First transaction id still retained.
        horizon: TxId,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the catch-up protocol.
#[derive(Debug, Error)]
pub enum CatchupError {
    /// The requested range fell below the upstream's retention horizon.
    ///
    /// Recoverable only by reseeding from a fresh snapshot; never retried
    /// here.
    #[error("Transaction range unavailable upstream (requested from tx {requested})")]
    RangeUnavailable {
        /// First transaction id the client asked for.
        requested: TxId,
    },

    /// Retry budget exhausted. Durable state is unaffected; catch-up can be
    /// resumed later from the persisted marker.
    #[error("Catch-up failed after {attempts} attempts: {last_error}")]
    CatchupFailed {
        /// Consecutive failed attempts.
        attempts: u32,
        /// The error that exhausted the budget.
        last_error: String,
    },

    /// The upstream serves a different store lineage.
    #[error("Upstream serves a different store lineage: {upstream}")]
    StoreMismatch {
        /// The upstream's store id.
        upstream: StoreId,
    },

    /// No upstream peer is configured for this member.
    #[error("No upstream configured for catch-up")]
    NoUpstream,

    /// Applying a received batch failed.
    #[error("Apply failed: {0}")]
    Apply(#[from] StoreError),

    /// Transport error.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// RPC error.
    #[error("RPC error: {0}")]
    Rpc(tonic::Status),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Catch-up was aborted by a shutdown signal.
    #[error("Catch-up cancelled by shutdown")]
    Cancelled,
}

impl From<tonic::Status> for CatchupError {
    fn from(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::OutOfRange => {
                // The server reports the requested tx in the message; the
                // typed field is filled by the client where it is known.
                CatchupError::RangeUnavailable { requested: 0 }
            }
            _ => CatchupError::Rpc(status),
        }
    }
}

impl CatchupError {
    /// Whether the error is transient and worth retrying with backoff.
    ///
    /// Identity mismatches and retention misses are never retried; a
    /// non-contiguous batch is retried because the re-issued request uses
    /// the corrected transaction id.
    pub fn is_retryable(&self) -> bool {
        match self {
            CatchupError::Transport(_) => true,
            CatchupError::Rpc(status) => matches!(
                status.code(),
                tonic::Code::Unavailable
                    | tonic::Code::DeadlineExceeded
                    | tonic::Code::Cancelled
                    | tonic::Code::Unknown
            ),
            CatchupError::Apply(StoreError::NonContiguous { .. }) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_level_failures_are_retryable() {
        let err = CatchupError::Rpc(tonic::Status::unavailable("connection refused"));
        assert!(err.is_retryable());

        let err = CatchupError::Apply(StoreError::NonContiguous {
            expected: 5,
            found: 7,
        });
        assert!(err.is_retryable());
    }

    #[test]
    fn fatal_failures_are_not_retryable() {
        let err = CatchupError::RangeUnavailable { requested: 1 };
        assert!(!err.is_retryable());

        let err = CatchupError::StoreMismatch {
            upstream: StoreId::new(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn out_of_range_status_maps_to_range_unavailable() {
        let status = tonic::Status::out_of_range("tx 1 below horizon 50");
        let err = CatchupError::from(status);
        assert!(matches!(err, CatchupError::RangeUnavailable { .. }));
    }
}
