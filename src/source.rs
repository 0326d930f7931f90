//! Data sources and the retrieve-and-distribute procedure.
//!
//! A data source produces at most one sample per pull into a single-shot
//! sink. [`retrieve_and_distribute`] races one pull against a timeout and
//! guarantees that exactly one sample reaches the engine: the pull's own
//! sample, or a timed-out error sample once the deadline passes.

pub mod http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::report::ReportingEngine;
use crate::sample::Sample;

/// Ceiling for the default per-pull timeout. Unless overridden, a pull
/// is given `min(source.interval(), RETRIEVAL_TIMEOUT_CEILING)`.
pub const RETRIEVAL_TIMEOUT_CEILING: Duration = Duration::from_secs(30);

/// Error text attached to samples synthesized on a pull timeout.
pub const RETRIEVAL_TIMED_OUT: &str = "sample retrieval timed out";

/// Errors constructing a data source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The HTTP client could not be built.
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Single-shot sample sink handed to [`DataSource::retrieve`].
///
/// Sending consumes the sink, so a pull can never produce more than one
/// sample. When the receiving side has given up (timeout), the sample is
/// dropped silently.
pub struct SampleSink {
    tx: oneshot::Sender<Sample>,
}

impl SampleSink {
    fn new(tx: oneshot::Sender<Sample>) -> Self {
        Self { tx }
    }

    pub fn send(self, sample: Sample) {
        if self.tx.send(sample).is_err() {
            tracing::debug!("sample sink receiver gone, sample dropped");
        }
    }
}

/// A source of samples, pulled on a recurring interval.
///
/// `retrieve` must never panic: every failure becomes a sample with an
/// error description.
#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    /// Stable identity of this source; keys its samples and its
    /// scheduler job.
    fn id(&self) -> &str;

    /// Kind of source, e.g. `"http"`.
    fn type_tag(&self) -> &'static str;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// How often this source should be pulled.
    fn interval(&self) -> Duration;

    /// Produce at most one sample on `sink` and return.
    async fn retrieve(&self, sink: SampleSink);
}

/// Run one pull of `source` and hand the outcome to `engine`.
///
/// The pull runs as a detached task racing a timeout (`timeout`, or
/// `min(source.interval(), 30s)` when `None`). If no sample arrives
/// within the deadline, a timed-out error sample is synthesized once the
/// deadline passes. Exactly one sample is distributed per call; a late
/// sample from a timed-out pull is dropped by the single-shot sink.
pub async fn retrieve_and_distribute(
    source: Arc<dyn DataSource>,
    engine: &ReportingEngine,
    timeout: Option<Duration>,
) {
    let timeout = effective_timeout(source.interval(), timeout);
    let (tx, rx) = oneshot::channel();

    let pull = Arc::clone(&source);
    tokio::spawn(async move {
        pull.retrieve(SampleSink::new(tx)).await;
    });

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    // A pull that returns without sending drops the sink, so the receive
    // arm never matches and only the deadline can resolve: the source is
    // indistinguishable from one that hung.
    let sample = tokio::select! {
        Ok(sample) = rx => sample,
        _ = &mut deadline => {
            tracing::warn!(source_id = %source.id(), timeout_ms = timeout.as_millis(), "sample retrieval timed out");
            Sample::failed(Utc::now(), source.id(), RETRIEVAL_TIMED_OUT)
        }
    };

    engine.distribute(sample).await;
}

fn effective_timeout(interval: Duration, timeout: Option<Duration>) -> Duration {
    timeout.unwrap_or_else(|| interval.min(RETRIEVAL_TIMEOUT_CEILING))
}
