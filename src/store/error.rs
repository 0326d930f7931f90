//! Store-specific error types.

use thiserror::Error;

use crate::sample::CodecError;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing file could not be acquired within the lock timeout,
    /// typically because another process holds an exclusive lock.
    #[error("sample store unavailable: {0}")]
    Unavailable(String),

    /// The backing file exists but is not a readable database.
    #[error("sample store corrupt: {0}")]
    Corrupt(String),

    /// Operation on a store that is not open (never prepared, or already
    /// shut down).
    #[error("sample store is not open")]
    Closed,

    /// A sample could not be encoded or decoded. Never aborts a batch;
    /// the offending sample is logged and dropped.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Buffered samples were discarded because the flush retention cap
    /// was exceeded after repeated persistence failures.
    #[error("flush retention overflow, dropped {count} buffered samples")]
    FlushDropped { count: usize },

    /// Any other database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
