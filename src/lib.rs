//! Tidemark - Periodic Sampling Pipeline
//!
//! This crate samples data from configured sources on recurring
//! intervals, converts every outcome into an immutable [`Sample`], fans
//! each sample out to all registered reporters, and persists samples in
//! an ordered key/value store supporting time-range queries.
//!
//! # Architecture
//!
//! - **Scheduler**: actor owning a registry of recurring jobs keyed by
//!   source id
//! - **Reporting Engine**: actor distributing each sample to all
//!   reporters concurrently
//! - **Reporters**: console output, real-time push broadcast, and a
//!   buffered persistent reporter flushing into the store
//! - **Store**: SQLite-backed ordered key→value map; keys sort by
//!   `(source_id, timestamp)` so time-range queries are key range scans
//! - **Sources**: pull-based, one sample per pull through a single-shot
//!   sink; timeouts and failures become error samples
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tidemark::{
//!     ConsoleReporter, PersistentReporter, ReportingEngine, SampleStore, Scheduler,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // The buffered reporter owns the store; registration opens it.
//!     let store = SampleStore::new("tidemark.db");
//!     let buffered = PersistentReporter::new(store, Duration::from_secs(10));
//!
//!     let engine = ReportingEngine::new();
//!     engine.register(Arc::new(ConsoleReporter::new("sample> "))).await?;
//!     engine.register(Arc::new(buffered.clone())).await?;
//!
//!     // Jobs pull sources and distribute through the engine.
//!     let scheduler = Scheduler::new(engine.clone());
//!     // scheduler.schedule_source(...).await?;
//!
//!     scheduler.shutdown().await?;
//!     engine.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod report;
pub mod sample;
pub mod scheduler;
pub mod source;
pub mod store;

// Re-export public types
pub use config::{AppConfig, ConfigError, DatabaseConfig};
pub use report::{
    ConsoleReporter, EngineError, PersistentReporter, PushReporter, Reporter, ReporterError,
    ReportingEngine, SampleBroadcaster,
};
pub use sample::{sample_key, CodecError, Sample};
pub use scheduler::{JobFn, JobView, Scheduler, SchedulerError};
pub use source::http::{HttpSource, HttpSourceConfig};
pub use source::{retrieve_and_distribute, DataSource, SampleSink, SourceError};
pub use store::{SampleStore, StoreError};
