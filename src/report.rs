//! Sample reporting: the reporter contract, the concrete reporters, and
//! the engine that fans samples out to all of them.
//!
//! Reporters are sinks with a lifecycle. The engine guarantees that
//! [`Reporter::on_sample`] is never invoked before `prepare` has
//! completed nor after `shutdown` has returned; beyond that, delivery is
//! concurrent and unordered, and each reporter is responsible for its own
//! failure isolation (`on_sample` has no error channel).

mod console;
mod engine;
mod persistent;
mod push;

pub use console::ConsoleReporter;
pub use engine::ReportingEngine;
pub use persistent::PersistentReporter;
pub use push::{PushReporter, SampleBroadcaster};

use async_trait::async_trait;
use thiserror::Error;

use crate::sample::Sample;
use crate::store::StoreError;

/// Errors surfaced by reporter lifecycle calls.
#[derive(Debug, Error)]
pub enum ReporterError {
    /// The underlying sample store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The reporter's worker task is gone.
    #[error("reporter channel closed")]
    ChannelClosed,
}

/// Errors surfaced by the reporting engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine's actor task is gone (already shut down).
    #[error("reporting engine is shut down")]
    ShutDown,

    /// A reporter failed during registration or shutdown.
    #[error(transparent)]
    Reporter(#[from] ReporterError),
}

/// A sink for samples with a prepare/shutdown lifecycle.
#[async_trait]
pub trait Reporter: Send + Sync + 'static {
    /// Acquire whatever resources the reporter needs before the first
    /// sample arrives.
    async fn prepare(&self) -> Result<(), ReporterError>;

    /// Deliver one sample. No error channel: failures stay inside the
    /// reporter.
    async fn on_sample(&self, sample: Sample);

    /// Release resources. No sample is delivered after this returns.
    async fn shutdown(&self) -> Result<(), ReporterError>;
}
