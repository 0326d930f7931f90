//! Scheduler: a single actor owning a registry of recurring jobs keyed
//! by data-source id.
//!
//! Every request carries its own response sink and error sink (oneshot
//! channels, so the actor never blocks on a disinterested caller). The
//! registry is read and written only inside the actor loop. A job is an
//! interval ticker task paired with a cancellation token; cancelling
//! awaits the task's termination and reports its terminal error.
//!
//! The scheduler moves one way from running to shut down: after
//! `shutdown`, every further request is rejected with
//! [`SchedulerError::ShutDown`].

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::report::ReportingEngine;
use crate::source::{retrieve_and_distribute, DataSource};

/// Future returned by a job body.
pub type JobFuture = Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

/// A job body: invoked once per tick with a handle to the reporting
/// engine.
pub type JobFn = Arc<dyn Fn(ReportingEngine) -> JobFuture + Send + Sync>;

/// Scheduler request outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// No job is registered under the given source id.
    #[error("no job registered for source {0}")]
    JobNotFound(String),

    /// A live job already exists under the given source id.
    #[error("a job for source {0} is already registered")]
    JobAlreadyExists(String),

    /// The scheduler has already been shut down.
    #[error("the scheduler has already been shut down")]
    ShutDown,

    /// The job's task terminated by panicking in its body.
    #[error("job task panicked: {0}")]
    JobPanicked(String),

    /// The scheduler actor is gone.
    #[error("scheduler is not running")]
    Disconnected,
}

/// One live job owned by the registry: ticker interval, cancellation
/// token, and the running task.
struct SchedulerJob {
    interval: Duration,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Value-copied snapshot of a registered job, safe to hand to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobView {
    pub source_id: String,
    pub interval: Duration,
    pub cancelled: bool,
}

struct Request {
    /// Error sink shared by all request kinds. Not sending means "no
    /// error".
    errors: oneshot::Sender<Option<SchedulerError>>,
    kind: RequestKind,
}

enum RequestKind {
    Add {
        source_id: String,
        interval: Duration,
        job_fn: JobFn,
        response: oneshot::Sender<String>,
    },
    List {
        response: oneshot::Sender<HashMap<String, JobView>>,
    },
    Cancel {
        source_id: String,
        response: oneshot::Sender<bool>,
    },
    Shutdown {
        response: oneshot::Sender<bool>,
    },
}

/// Handle to the scheduler actor. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    tx: mpsc::Sender<Request>,
}

impl Scheduler {
    /// Spawn the scheduler actor. Job bodies receive clones of `engine`.
    pub fn new(engine: ReportingEngine) -> Self {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(run_actor(engine, rx));
        Self { tx }
    }

    /// Register a recurring job under `source_id`, firing every
    /// `interval`.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::JobAlreadyExists`] when a live job with the same
    /// id exists, [`SchedulerError::ShutDown`] after shutdown.
    pub async fn schedule(
        &self,
        source_id: impl Into<String>,
        interval: Duration,
        job_fn: JobFn,
    ) -> Result<String, SchedulerError> {
        let (response, response_rx) = oneshot::channel();
        let (errors, errors_rx) = oneshot::channel();
        self.tx
            .send(Request {
                errors,
                kind: RequestKind::Add {
                    source_id: source_id.into(),
                    interval,
                    job_fn,
                    response,
                },
            })
            .await
            .map_err(|_| SchedulerError::Disconnected)?;

        match errors_rx.await {
            Ok(Some(e)) => Err(e),
            _ => response_rx.await.map_err(|_| SchedulerError::Disconnected),
        }
    }

    /// Register a job that pulls `source` on its own interval and
    /// distributes the outcome.
    pub async fn schedule_source(
        &self,
        source: Arc<dyn DataSource>,
    ) -> Result<String, SchedulerError> {
        let source_id = source.id().to_string();
        let interval = source.interval();
        let job_fn: JobFn = Arc::new(move |engine| {
            let source = Arc::clone(&source);
            Box::pin(async move {
                retrieve_and_distribute(source, &engine, None).await;
            })
        });
        self.schedule(source_id, interval, job_fn).await
    }

    /// Snapshot of the registry. The returned views are value copies;
    /// mutating them has no effect on the live jobs.
    pub async fn jobs(&self) -> Result<HashMap<String, JobView>, SchedulerError> {
        let (response, response_rx) = oneshot::channel();
        let (errors, errors_rx) = oneshot::channel();
        self.tx
            .send(Request {
                errors,
                kind: RequestKind::List { response },
            })
            .await
            .map_err(|_| SchedulerError::Disconnected)?;

        match errors_rx.await {
            Ok(Some(e)) => Err(e),
            _ => response_rx.await.map_err(|_| SchedulerError::Disconnected),
        }
    }

    /// Cancel the job under `source_id`: stop its ticker, remove it from
    /// the registry, and await its task's termination.
    ///
    /// Returns `(acknowledged, job_error)`: the acknowledgement is always
    /// `true` once the actor handled the request, while `job_error`
    /// carries [`SchedulerError::JobNotFound`] for an absent id or the
    /// task's terminal error.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::ShutDown`] when the scheduler is already shut
    /// down.
    pub async fn cancel(
        &self,
        source_id: &str,
    ) -> Result<(bool, Option<SchedulerError>), SchedulerError> {
        let (response, response_rx) = oneshot::channel();
        let (errors, errors_rx) = oneshot::channel();
        self.tx
            .send(Request {
                errors,
                kind: RequestKind::Cancel {
                    source_id: source_id.to_string(),
                    response,
                },
            })
            .await
            .map_err(|_| SchedulerError::Disconnected)?;

        Self::await_acknowledged(response_rx, errors_rx).await
    }

    /// Cancel all jobs, await their termination, and mark the scheduler
    /// shut down. Returns the acknowledgement plus the first non-clean
    /// task termination, if any. Terminal: every later request is
    /// rejected.
    pub async fn shutdown(&self) -> Result<(bool, Option<SchedulerError>), SchedulerError> {
        let (response, response_rx) = oneshot::channel();
        let (errors, errors_rx) = oneshot::channel();
        self.tx
            .send(Request {
                errors,
                kind: RequestKind::Shutdown { response },
            })
            .await
            .map_err(|_| SchedulerError::Disconnected)?;

        Self::await_acknowledged(response_rx, errors_rx).await
    }

    /// Join a `(response, errors)` sink pair for requests that always
    /// acknowledge. A missing acknowledgement means the request was
    /// rejected; the error sink then carries the reason.
    async fn await_acknowledged(
        response_rx: oneshot::Receiver<bool>,
        errors_rx: oneshot::Receiver<Option<SchedulerError>>,
    ) -> Result<(bool, Option<SchedulerError>), SchedulerError> {
        let err = errors_rx.await.ok().flatten();
        match response_rx.await {
            Ok(acknowledged) => Ok((acknowledged, err)),
            Err(_) => Err(err.unwrap_or(SchedulerError::Disconnected)),
        }
    }
}

async fn run_actor(engine: ReportingEngine, mut rx: mpsc::Receiver<Request>) {
    let mut registry: HashMap<String, SchedulerJob> = HashMap::new();
    let mut is_shut_down = false;

    while let Some(req) = rx.recv().await {
        if is_shut_down {
            let _ = req.errors.send(Some(SchedulerError::ShutDown));
            continue;
        }

        match req.kind {
            RequestKind::Add {
                source_id,
                interval,
                job_fn,
                response,
            } => {
                if registry.contains_key(&source_id) {
                    let _ = req.errors.send(Some(SchedulerError::JobAlreadyExists(source_id)));
                    continue;
                }

                let cancel = CancellationToken::new();
                let handle = tokio::spawn(run_job(
                    interval,
                    job_fn,
                    engine.clone(),
                    cancel.clone(),
                ));
                tracing::info!(source_id = %source_id, interval_ms = interval.as_millis(), "job scheduled");
                registry.insert(
                    source_id.clone(),
                    SchedulerJob {
                        interval,
                        cancel,
                        handle,
                    },
                );
                let _ = response.send(source_id);
            }
            RequestKind::List { response } => {
                let snapshot = registry
                    .iter()
                    .map(|(source_id, job)| {
                        (
                            source_id.clone(),
                            JobView {
                                source_id: source_id.clone(),
                                interval: job.interval,
                                cancelled: job.cancel.is_cancelled(),
                            },
                        )
                    })
                    .collect();
                let _ = response.send(snapshot);
            }
            RequestKind::Cancel {
                source_id,
                response,
            } => {
                let err = match registry.remove(&source_id) {
                    None => Some(SchedulerError::JobNotFound(source_id)),
                    Some(job) => {
                        let err = stop_job(job).await;
                        tracing::info!(source_id = %source_id, "job cancelled");
                        err
                    }
                };
                let _ = req.errors.send(err);
                let _ = response.send(true);
            }
            RequestKind::Shutdown { response } => {
                let mut first_err = None;
                for (source_id, job) in registry.drain() {
                    if let Some(e) = stop_job(job).await {
                        tracing::error!(source_id = %source_id, error = %e, "job terminated with error");
                        if first_err.is_none() {
                            first_err = Some(e);
                        }
                    }
                }
                is_shut_down = true;
                tracing::info!("scheduler shut down");
                let _ = req.errors.send(first_err);
                let _ = response.send(true);
            }
        }
    }
}

/// Tick loop for one job. Runs until the cancellation token fires; a
/// panic in the job body kills only this task and surfaces as the task's
/// terminal error.
async fn run_job(
    interval: Duration,
    job_fn: JobFn,
    engine: ReportingEngine,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick resolves immediately; consume it so the first
    // invocation happens one full interval after registration.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => job_fn(engine.clone()).await,
        }
    }
}

/// Stop a job and await its task, mapping a panic to the job's terminal
/// error.
async fn stop_job(job: SchedulerJob) -> Option<SchedulerError> {
    job.cancel.cancel();
    match job.handle.await {
        Ok(()) => None,
        Err(e) if e.is_panic() => Some(SchedulerError::JobPanicked(panic_message(e))),
        Err(_) => None,
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string()),
        Err(e) => e.to_string(),
    }
}
