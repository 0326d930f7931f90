//! Reporting engine: single actor fanning samples out to all registered
//! reporters.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::report::{EngineError, Reporter, ReporterError};
use crate::sample::Sample;

enum Command {
    Register {
        reporter: Arc<dyn Reporter>,
        reply: oneshot::Sender<Result<(), ReporterError>>,
    },
    Distribute(Sample),
    Shutdown {
        reply: oneshot::Sender<Option<ReporterError>>,
    },
}

/// Handle to the engine actor. Cheap to clone; all clones feed the same
/// reporter list.
///
/// `register` and `distribute` are safe to call from any task at any
/// time after construction. Delivery to reporters is concurrent and
/// unordered: each sample is handed to every reporter on its own
/// detached task, and the engine neither awaits completion nor observes
/// per-reporter failures.
#[derive(Clone)]
pub struct ReportingEngine {
    tx: mpsc::Sender<Command>,
}

impl ReportingEngine {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(run_actor(rx));
        Self { tx }
    }

    /// Append a reporter and run its `prepare`.
    ///
    /// A reporter whose preparation fails is not registered and the
    /// error is returned to the caller.
    pub async fn register(&self, reporter: Arc<dyn Reporter>) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Register { reporter, reply })
            .await
            .map_err(|_| EngineError::ShutDown)?;
        rx.await
            .map_err(|_| EngineError::ShutDown)?
            .map_err(EngineError::Reporter)
    }

    /// Hand one sample to every registered reporter.
    pub async fn distribute(&self, sample: Sample) {
        if self.tx.send(Command::Distribute(sample)).await.is_err() {
            tracing::warn!("reporting engine is shut down, sample dropped");
        }
    }

    /// Shut down every reporter in registration order and return the
    /// first error encountered.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown { reply })
            .await
            .map_err(|_| EngineError::ShutDown)?;
        match rx.await {
            Ok(Some(e)) => Err(EngineError::Reporter(e)),
            Ok(None) => Ok(()),
            Err(_) => Err(EngineError::ShutDown),
        }
    }
}

impl Default for ReportingEngine {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_actor(mut rx: mpsc::Receiver<Command>) {
    let mut reporters: Vec<Arc<dyn Reporter>> = Vec::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Register { reporter, reply } => {
                match reporter.prepare().await {
                    Ok(()) => {
                        reporters.push(reporter);
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "reporter preparation failed, not registered");
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Command::Distribute(sample) => {
                for reporter in &reporters {
                    let reporter = Arc::clone(reporter);
                    let sample = sample.clone();
                    tokio::spawn(async move {
                        reporter.on_sample(sample).await;
                    });
                }
            }
            Command::Shutdown { reply } => {
                let mut first_err = None;
                for reporter in &reporters {
                    if let Err(e) = reporter.shutdown().await {
                        tracing::error!(error = %e, "reporter shutdown failed");
                        if first_err.is_none() {
                            first_err = Some(e);
                        }
                    }
                }
                let _ = reply.send(first_err);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingReporter {
        prepared: AtomicUsize,
        delivered: AtomicUsize,
        shut_down: AtomicUsize,
    }

    #[async_trait]
    impl Reporter for CountingReporter {
        async fn prepare(&self) -> Result<(), ReporterError> {
            self.prepared.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_sample(&self, _sample: Sample) {
            self.delivered.fetch_add(1, Ordering::SeqCst);
        }

        async fn shutdown(&self) -> Result<(), ReporterError> {
            self.shut_down.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingReporter;

    #[async_trait]
    impl Reporter for FailingReporter {
        async fn prepare(&self) -> Result<(), ReporterError> {
            Err(ReporterError::Store(StoreError::Closed))
        }

        async fn on_sample(&self, _sample: Sample) {
            panic!("must never receive a sample");
        }

        async fn shutdown(&self) -> Result<(), ReporterError> {
            Ok(())
        }
    }

    struct OrderedReporter {
        name: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    #[async_trait]
    impl Reporter for OrderedReporter {
        async fn prepare(&self) -> Result<(), ReporterError> {
            Ok(())
        }

        async fn on_sample(&self, _sample: Sample) {}

        async fn shutdown(&self) -> Result<(), ReporterError> {
            self.order.lock().unwrap().push(self.name);
            if self.fail {
                Err(ReporterError::ChannelClosed)
            } else {
                Ok(())
            }
        }
    }

    async fn wait_for(check: impl Fn() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within a second");
    }

    #[tokio::test]
    async fn test_distribute_reaches_all_reporters() {
        let engine = ReportingEngine::new();
        let a = Arc::new(CountingReporter::default());
        let b = Arc::new(CountingReporter::default());

        engine.register(Arc::clone(&a) as Arc<dyn Reporter>).await.unwrap();
        engine.register(Arc::clone(&b) as Arc<dyn Reporter>).await.unwrap();
        assert_eq!(a.prepared.load(Ordering::SeqCst), 1);

        engine.distribute(Sample::new("1", Utc::now(), "ds-A")).await;
        engine.distribute(Sample::new("2", Utc::now(), "ds-A")).await;

        wait_for(|| {
            a.delivered.load(Ordering::SeqCst) == 2 && b.delivered.load(Ordering::SeqCst) == 2
        })
        .await;
    }

    #[tokio::test]
    async fn test_failed_prepare_rejects_registration() {
        let engine = ReportingEngine::new();
        let healthy = Arc::new(CountingReporter::default());

        let result = engine.register(Arc::new(FailingReporter)).await;
        assert!(matches!(
            result,
            Err(EngineError::Reporter(ReporterError::Store(StoreError::Closed)))
        ));

        engine
            .register(Arc::clone(&healthy) as Arc<dyn Reporter>)
            .await
            .unwrap();

        // The rejected reporter would panic on delivery; only the
        // healthy one may see samples.
        engine.distribute(Sample::new("1", Utc::now(), "ds-A")).await;
        wait_for(|| healthy.delivered.load(Ordering::SeqCst) == 1).await;

        engine.shutdown().await.unwrap();
        assert_eq!(healthy.shut_down.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_runs_in_registration_order_and_returns_first_error() {
        let engine = ReportingEngine::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (name, fail) in [("first", false), ("second", true), ("third", false)] {
            engine
                .register(Arc::new(OrderedReporter {
                    name,
                    order: Arc::clone(&order),
                    fail,
                }))
                .await
                .unwrap();
        }

        let result = engine.shutdown().await;
        assert!(matches!(
            result,
            Err(EngineError::Reporter(ReporterError::ChannelClosed))
        ));
        assert_eq!(order.lock().unwrap().as_slice(), &["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_calls_after_shutdown_report_shut_down() {
        let engine = ReportingEngine::new();
        engine.shutdown().await.unwrap();

        let result = engine.register(Arc::new(CountingReporter::default())).await;
        assert!(matches!(result, Err(EngineError::ShutDown)));

        // Does not error, but must not hang either.
        engine.distribute(Sample::new("1", Utc::now(), "ds-A")).await;
    }
}
