//! SQLite-backed sample store.
//!
//! One table, `samples (key TEXT PRIMARY KEY, value BLOB)`. SQLite
//! compares TEXT keys byte-wise under the default BINARY collation, so a
//! `key >= min AND key <= max` scan walks exactly the `(source_id, from,
//! to)` range the sample key format encodes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use sqlx::Row;

use crate::sample::{sample_key, Sample};
use crate::store::StoreError;

/// How long to wait for another process to release the database lock.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

const CREATE_SAMPLES_TABLE: &str =
    "CREATE TABLE IF NOT EXISTS samples (key TEXT PRIMARY KEY, value BLOB NOT NULL)";

const INSERT_SAMPLE: &str = "INSERT OR REPLACE INTO samples (key, value) VALUES (?, ?)";

const SELECT_RANGE: &str =
    "SELECT key, value FROM samples WHERE key >= ? AND key <= ? ORDER BY key ASC";

enum State {
    Idle,
    Open(SqlitePool),
    Closed,
}

/// Ordered durable key→value store for samples.
///
/// Lifecycle: construct with a path, [`prepare`](Self::prepare) to open,
/// [`shutdown`](Self::shutdown) to release. All data operations fail with
/// [`StoreError::Closed`] outside the open window.
pub struct SampleStore {
    path: PathBuf,
    state: State,
}

impl SampleStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            state: State::Idle,
        }
    }

    /// Open or create the backing file and ensure the samples table
    /// exists.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] when the file lock cannot be acquired
    /// within the timeout, [`StoreError::Corrupt`] when the file exists
    /// but is not a database, [`StoreError::Closed`] after shutdown.
    pub async fn prepare(&mut self) -> Result<(), StoreError> {
        match &self.state {
            State::Open(_) => return Ok(()),
            State::Closed => return Err(StoreError::Closed),
            State::Idle => {}
        }

        tracing::debug!(path = %self.path.display(), "opening sample store");

        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(ACQUIRE_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(classify)?;

        // First statement against the file; a foreign or corrupt file
        // surfaces here.
        sqlx::query(CREATE_SAMPLES_TABLE)
            .execute(&pool)
            .await
            .map_err(classify)?;

        self.state = State::Open(pool);
        Ok(())
    }

    /// Flush and release the backing file.
    ///
    /// Idempotent: shutting down an already-closed store is a no-op. Data
    /// operations after shutdown fail with [`StoreError::Closed`].
    pub async fn shutdown(&mut self) -> Result<(), StoreError> {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Open(pool) => {
                tracing::debug!(path = %self.path.display(), "closing sample store");
                pool.close().await;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Write a batch of samples in one transaction.
    ///
    /// Per-sample failures (encoding or individual writes) do not abort
    /// the batch: the remaining samples are still attempted and the first
    /// error encountered is returned afterwards. A duplicate key
    /// overwrites the prior value.
    pub async fn persist(&self, samples: &[Sample]) -> Result<(), StoreError> {
        if samples.is_empty() {
            return Ok(());
        }
        let pool = self.pool()?;

        tracing::debug!(count = samples.len(), "persisting samples");

        let mut tx = pool.begin().await.map_err(classify)?;
        let mut first_err: Option<StoreError> = None;

        for sample in samples {
            let bytes = match sample.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(key = %sample.key(), error = %e, "dropping unencodable sample");
                    first_err.get_or_insert(e.into());
                    continue;
                }
            };

            if let Err(e) = sqlx::query(INSERT_SAMPLE)
                .bind(sample.key())
                .bind(bytes)
                .execute(&mut *tx)
                .await
            {
                tracing::warn!(key = %sample.key(), error = %e, "failed to write sample");
                first_err.get_or_insert(classify(e));
            }
        }

        tx.commit().await.map_err(classify)?;

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// All persisted samples for `source_id` with `from <= timestamp <=
    /// to`, ascending by timestamp.
    ///
    /// Records that fail to decode are logged and skipped; the scan is
    /// not aborted.
    pub async fn get_samples(
        &self,
        source_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Sample>, StoreError> {
        let pool = self.pool()?;

        let min_key = sample_key(source_id, from);
        let max_key = sample_key(source_id, to);

        let rows = sqlx::query(SELECT_RANGE)
            .bind(&min_key)
            .bind(&max_key)
            .fetch_all(pool)
            .await
            .map_err(classify)?;

        let mut samples = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.try_get("key").map_err(classify)?;
            let bytes: Vec<u8> = row.try_get("value").map_err(classify)?;
            match Sample::decode(&bytes) {
                Ok(sample) => samples.push(sample),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "skipping undecodable sample");
                }
            }
        }

        Ok(samples)
    }

    fn pool(&self) -> Result<&SqlitePool, StoreError> {
        match &self.state {
            State::Open(pool) => Ok(pool),
            _ => Err(StoreError::Closed),
        }
    }
}

impl std::fmt::Debug for SampleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Map raw sqlx failures onto the store's lifecycle errors.
fn classify(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        let message = db.message().to_ascii_lowercase();
        if message.contains("database is locked") || message.contains("locking protocol") {
            return StoreError::Unavailable(message);
        }
        if message.contains("not a database") || message.contains("malformed") {
            return StoreError::Corrupt(message);
        }
    }
    StoreError::Database(err)
}
