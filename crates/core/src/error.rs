//! Error types for Tessera
//!
//! One enum for the whole system, built with `thiserror`. The variant set
//! mirrors the error contracts the layers expose to each other: routing
//! staleness, storage conflicts, migration interference, change-stream
//! history loss.

use crate::types::{DocumentId, NamespaceId, ShardVersion};
use std::io;
use thiserror::Error;

/// Result type alias for Tessera operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the Tessera database
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (checkpoint/oplog files)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Durable file corruption (bad checksum, truncated frame)
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Router metadata is behind the shard's
    ///
    /// The shard reports what it owns (`wanted`) against what the request
    /// was stamped with (`got`). The router refreshes and retries.
    #[error("Stale config for {ns}: shard has {wanted}, request sent {got}")]
    StaleConfig {
        ns: NamespaceId,
        wanted: ShardVersion,
        got: ShardVersion,
    },

    /// Snapshot write-write conflict; the operation should be retried
    #[error("Write conflict")]
    WriteConflict,

    /// Could not acquire a collection/migration lock in time
    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    /// Insert of an `_id` that already exists
    #[error("Duplicate key: {0:?}")]
    DuplicateKey(DocumentId),

    /// Operation on a namespace that does not exist
    #[error("Namespace not found: {0}")]
    NamespaceNotFound(NamespaceId),

    /// Write concern could not be satisfied by the current member set
    #[error("Write concern failed: {0}")]
    WriteConcernFailed(String),

    /// Resume token points below the oplog's retained history
    #[error("Change stream history lost: resume point no longer in the oplog")]
    ChangeStreamHistoryLost,

    /// Retryable write referenced a statement the session has no record of
    #[error("Incomplete transaction history for session {0}")]
    IncompleteTransactionHistory(String),

    /// A migration is already running for the collection
    #[error("Migration conflict on {0}: {1}")]
    MigrationConflict(NamespaceId, String),

    /// Read timestamp is below the storage engine's oldest retained history
    #[error("Snapshot too old: requested {requested}, oldest retained {oldest}")]
    SnapshotTooOld { requested: String, oldest: String },

    /// Malformed namespace string
    #[error("Invalid namespace: {0:?}")]
    InvalidNamespace(String),

    /// Malformed document
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Malformed document id
    #[error("Invalid _id: {0}")]
    InvalidId(String),

    /// Shard key field missing from a document
    #[error("Missing shard key field: {0}")]
    ShardKeyNotFound(String),

    /// Malformed or foreign resume token
    #[error("Invalid resume token: {0}")]
    InvalidResumeToken(String),

    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl Error {
    /// True for errors a router-level retry loop is allowed to absorb.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StaleConfig { .. } | Error::WriteConflict)
    }
}
