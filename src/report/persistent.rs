//! Buffered persistent reporter.
//!
//! A single actor task owns the sample buffer and the store. Appends,
//! periodic flush ticks, in-buffer range queries, and lifecycle calls all
//! funnel through one command channel, so the buffer is never touched
//! from any other task and no locking is needed.

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use async_trait::async_trait;
use std::time::Duration;

use crate::report::{Reporter, ReporterError};
use crate::sample::Sample;
use crate::store::{SampleStore, StoreError};

/// Upper bound on samples retained across failed flushes. When repeated
/// persistence failures push the buffer past this cap, the oldest
/// overflow is dropped.
const RETENTION_CAP: usize = 10_000;

enum Command {
    /// Buffer one sample until the next flush.
    Append(Sample),
    /// Answer a range query over the still-unflushed buffer.
    Query {
        source_id: String,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        reply: oneshot::Sender<Vec<Sample>>,
    },
    /// Open the underlying store.
    Prepare {
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    /// Stop the ticker, flush the remaining buffer, close the store.
    Shutdown {
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
}

/// Reporter that batches samples in memory and periodically flushes them
/// into a [`SampleStore`], while answering low-latency range queries over
/// the in-memory buffer.
///
/// [`get_samples`](Self::get_samples) returns only the buffered, not yet
/// flushed matches; durable matches are served by the store itself.
#[derive(Clone)]
pub struct PersistentReporter {
    tx: mpsc::Sender<Command>,
}

impl PersistentReporter {
    /// Spawn the reporter's actor task around `store`, flushing every
    /// `flush_interval`.
    ///
    /// The store may be unopened; `prepare` opens it.
    pub fn new(store: SampleStore, flush_interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(run_actor(store, flush_interval, rx));
        Self { tx }
    }

    /// Buffered samples for `source_id` with `from <= timestamp <= to`,
    /// in insertion order.
    pub async fn get_samples(
        &self,
        source_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Sample>, ReporterError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Query {
                source_id: source_id.to_string(),
                from,
                to,
                reply,
            })
            .await
            .map_err(|_| ReporterError::ChannelClosed)?;
        rx.await.map_err(|_| ReporterError::ChannelClosed)
    }

    async fn lifecycle(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<(), StoreError>>) -> Command,
    ) -> Result<(), ReporterError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| ReporterError::ChannelClosed)?;
        rx.await
            .map_err(|_| ReporterError::ChannelClosed)?
            .map_err(ReporterError::Store)
    }
}

#[async_trait]
impl Reporter for PersistentReporter {
    async fn prepare(&self) -> Result<(), ReporterError> {
        self.lifecycle(|reply| Command::Prepare { reply }).await
    }

    async fn on_sample(&self, sample: Sample) {
        if self.tx.send(Command::Append(sample)).await.is_err() {
            tracing::warn!("buffered reporter is shut down, sample dropped");
        }
    }

    async fn shutdown(&self) -> Result<(), ReporterError> {
        self.lifecycle(|reply| Command::Shutdown { reply }).await
    }
}

async fn run_actor(
    mut store: SampleStore,
    flush_interval: Duration,
    mut rx: mpsc::Receiver<Command>,
) {
    let mut buffer: Vec<Sample> = Vec::new();
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick resolves immediately; consume it so flushes start
    // one interval in.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let _ = flush(&mut buffer, &store).await;
            }
            cmd = rx.recv() => match cmd {
                Some(Command::Append(sample)) => buffer.push(sample),
                Some(Command::Query { source_id, from, to, reply }) => {
                    let matches = buffer
                        .iter()
                        .filter(|s| {
                            s.source_id() == source_id
                                && s.timestamp() >= from
                                && s.timestamp() <= to
                        })
                        .cloned()
                        .collect();
                    let _ = reply.send(matches);
                }
                Some(Command::Prepare { reply }) => {
                    let _ = reply.send(store.prepare().await);
                }
                Some(Command::Shutdown { reply }) => {
                    let flushed = flush(&mut buffer, &store).await;
                    let closed = store.shutdown().await;
                    let _ = reply.send(flushed.and(closed));
                    break;
                }
                None => {
                    // All handles dropped: best-effort final flush.
                    let _ = flush(&mut buffer, &store).await;
                    let _ = store.shutdown().await;
                    break;
                }
            }
        }
    }
}

/// Persist the buffered samples and truncate the buffer.
///
/// Codec failures count as handled (the store already logged and dropped
/// the offending samples); transaction-level failures retain the batch
/// for the next tick, bounded by [`RETENTION_CAP`].
async fn flush(buffer: &mut Vec<Sample>, store: &SampleStore) -> Result<(), StoreError> {
    if buffer.is_empty() {
        return Ok(());
    }

    let batch = std::mem::take(buffer);
    let count = batch.len();
    match store.persist(&batch).await {
        Ok(()) => {
            tracing::debug!(count, "flushed samples");
            Ok(())
        }
        Err(e @ StoreError::Codec(_)) => {
            tracing::warn!(count, error = %e, "flush completed with codec failures");
            Err(e)
        }
        Err(e) => {
            tracing::error!(count, error = %e, "flush failed, retaining batch");
            *buffer = batch;
            if buffer.len() > RETENTION_CAP {
                let overflow = buffer.len() - RETENTION_CAP;
                buffer.drain(..overflow);
                tracing::error!(
                    error = %StoreError::FlushDropped { count: overflow },
                    "retention cap exceeded"
                );
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn ts(secs: i64, nanos: u32) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, nanos).unwrap()
    }

    /// A flush interval long enough to never fire during a test.
    const NEVER: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_buffer_query_filters_source_and_range() {
        let dir = tempdir().unwrap();
        let store = SampleStore::new(dir.path().join("buffer.db"));
        let reporter = PersistentReporter::new(store, NEVER);
        reporter.prepare().await.unwrap();

        reporter.on_sample(Sample::new("1", ts(100, 0), "ds-A")).await;
        reporter.on_sample(Sample::new("2", ts(200, 0), "ds-A")).await;
        reporter.on_sample(Sample::new("3", ts(300, 0), "ds-A")).await;
        reporter.on_sample(Sample::new("x", ts(200, 0), "ds-B")).await;

        let matches = reporter
            .get_samples("ds-A", ts(100, 0), ts(200, 0))
            .await
            .unwrap();
        let values: Vec<&str> = matches.iter().map(Sample::value).collect();
        assert_eq!(values, ["1", "2"]);

        reporter.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_buffer_is_empty_after_flush_tick() {
        let dir = tempdir().unwrap();
        let store = SampleStore::new(dir.path().join("tick.db"));
        let reporter = PersistentReporter::new(store, Duration::from_millis(50));
        reporter.prepare().await.unwrap();

        reporter.on_sample(Sample::new("1", ts(100, 0), "ds-A")).await;
        reporter.on_sample(Sample::new("2", ts(101, 0), "ds-A")).await;

        tokio::time::sleep(Duration::from_millis(150)).await;

        let buffered = reporter
            .get_samples("ds-A", ts(0, 0), ts(1_000, 0))
            .await
            .unwrap();
        assert!(buffered.is_empty(), "buffer should be empty after a flush");

        reporter.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_tick_persists_to_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persisted.db");
        let reporter = PersistentReporter::new(SampleStore::new(&path), Duration::from_millis(50));
        reporter.prepare().await.unwrap();

        reporter.on_sample(Sample::new("1", ts(100, 0), "ds-A")).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        reporter.shutdown().await.unwrap();

        let mut store = SampleStore::new(&path);
        store.prepare().await.unwrap();
        let persisted = store.get_samples("ds-A", ts(0, 0), ts(1_000, 0)).await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].value(), "1");
        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_flushes_remaining_buffer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("final_flush.db");
        let reporter = PersistentReporter::new(SampleStore::new(&path), NEVER);
        reporter.prepare().await.unwrap();

        reporter.on_sample(Sample::new("1", ts(100, 0), "ds-A")).await;
        reporter.on_sample(Sample::new("2", ts(101, 0), "ds-A")).await;

        // No tick ever fired, so only the shutdown flush can have
        // written these.
        reporter.shutdown().await.unwrap();

        let mut store = SampleStore::new(&path);
        store.prepare().await.unwrap();
        let persisted = store.get_samples("ds-A", ts(0, 0), ts(1_000, 0)).await.unwrap();
        let values: Vec<&str> = persisted.iter().map(Sample::value).collect();
        assert_eq!(values, ["1", "2"]);
        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_flush_retains_batch() {
        // Store never prepared: every persist fails with Closed, so the
        // batch must survive in the buffer.
        let dir = tempdir().unwrap();
        let store = SampleStore::new(dir.path().join("unopened.db"));
        let reporter = PersistentReporter::new(store, Duration::from_millis(50));

        reporter.on_sample(Sample::new("1", ts(100, 0), "ds-A")).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        let buffered = reporter
            .get_samples("ds-A", ts(0, 0), ts(1_000, 0))
            .await
            .unwrap();
        assert_eq!(buffered.len(), 1, "failed flush should retain the batch");
    }

    #[tokio::test]
    async fn test_query_preserves_insertion_order() {
        let dir = tempdir().unwrap();
        let store = SampleStore::new(dir.path().join("order.db"));
        let reporter = PersistentReporter::new(store, NEVER);
        reporter.prepare().await.unwrap();

        for i in 0..5i64 {
            reporter
                .on_sample(Sample::new(i.to_string(), ts(100 + i, 0), "ds-A"))
                .await;
        }

        let matches = reporter
            .get_samples("ds-A", ts(0, 0), ts(1_000, 0))
            .await
            .unwrap();
        let values: Vec<&str> = matches.iter().map(Sample::value).collect();
        assert_eq!(values, ["0", "1", "2", "3", "4"]);

        reporter.shutdown().await.unwrap();
    }
}
