//! Push reporter: hands each sample to an injected broadcast transport.

use std::sync::Arc;

use async_trait::async_trait;

use crate::report::{Reporter, ReporterError};
use crate::sample::Sample;

/// Capability offered by a real-time push transport.
///
/// The transport itself (connection handling, HTTP endpoint) lives
/// outside this crate; the reporter only broadcasts.
pub trait SampleBroadcaster: Send + Sync + 'static {
    fn broadcast(&self, sample: &Sample);
}

/// Reporter that forwards every sample to a [`SampleBroadcaster`].
pub struct PushReporter {
    api: Arc<dyn SampleBroadcaster>,
}

impl PushReporter {
    pub fn new(api: Arc<dyn SampleBroadcaster>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Reporter for PushReporter {
    async fn prepare(&self) -> Result<(), ReporterError> {
        Ok(())
    }

    async fn on_sample(&self, sample: Sample) {
        self.api.broadcast(&sample);
    }

    async fn shutdown(&self) -> Result<(), ReporterError> {
        Ok(())
    }
}
