//! Console reporter: prints each sample to the diagnostic output.

use async_trait::async_trait;

use crate::report::{Reporter, ReporterError};
use crate::sample::Sample;

/// Reporter that writes every sample to stderr with a fixed prefix.
pub struct ConsoleReporter {
    prefix: String,
}

impl ConsoleReporter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn prepare(&self) -> Result<(), ReporterError> {
        Ok(())
    }

    async fn on_sample(&self, sample: Sample) {
        eprintln!("{}{}", self.prefix, sample);
    }

    async fn shutdown(&self) -> Result<(), ReporterError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_console_lifecycle_is_noop() {
        let reporter = ConsoleReporter::new("sample> ");
        reporter.prepare().await.unwrap();
        reporter
            .on_sample(Sample::new("1", Utc::now(), "ds-A"))
            .await;
        reporter.shutdown().await.unwrap();
    }
}
