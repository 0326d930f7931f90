//! Durable sample storage.
//!
//! The store is an ordered key→value map over a single SQLite file:
//! keys are the textual sample keys (byte-sorted by SQLite's BINARY
//! collation), values are the versioned binary sample encoding. Time
//! range queries are plain key range scans.

mod error;
mod sqlite;

pub use error::StoreError;
pub use sqlite::SampleStore;
