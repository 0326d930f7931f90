//! HTTP polling source.
//!
//! Fetches a URL on each pull and uses the trimmed response body as the
//! sample value. Transport failures, non-success statuses, and empty
//! bodies become error samples.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sample::Sample;
use crate::source::{DataSource, SampleSink, SourceError};

/// Default pull interval (30 seconds).
const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Default request timeout (10 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// Configuration for one HTTP source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSourceConfig {
    /// Human-readable name for this source.
    pub name: String,

    /// Target URL.
    pub url: String,

    /// Pull interval.
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Request timeout.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl HttpSourceConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Data source that polls an HTTP endpoint.
pub struct HttpSource {
    id: String,
    config: HttpSourceConfig,
    client: Client,
}

impl HttpSource {
    /// Build a source with a generated `ds-<uuid>` identity.
    pub fn new(config: HttpSourceConfig) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            id: format!("ds-{}", Uuid::new_v4()),
            config,
            client,
        })
    }
}

impl std::fmt::Debug for HttpSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSource")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DataSource for HttpSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn type_tag(&self) -> &'static str {
        "http"
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn interval(&self) -> Duration {
        self.config.interval
    }

    async fn retrieve(&self, sink: SampleSink) {
        let now = Utc::now();

        let sample = match self.client.get(&self.config.url).send().await {
            Ok(response) => {
                let status = response.status();
                if !status.is_success() {
                    tracing::warn!(name = %self.config.name, url = %self.config.url, status = %status, "http pull returned non-success status");
                    Sample::failed(now, &self.id, format!("unexpected status {status}"))
                } else {
                    match response.text().await {
                        Ok(body) => {
                            let value = body.trim().to_string();
                            if value.is_empty() {
                                Sample::failed(now, &self.id, "empty response body")
                            } else {
                                Sample::new(value, now, &self.id)
                            }
                        }
                        Err(e) => {
                            tracing::warn!(name = %self.config.name, url = %self.config.url, error = %e, "failed to read response body");
                            Sample::failed(now, &self.id, format!("failed to read response body: {e}"))
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(name = %self.config.name, url = %self.config.url, error = %e, "http pull failed");
                Sample::failed(now, &self.id, format!("request failed: {e}"))
            }
        };

        sink.send(sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = HttpSourceConfig::new("api-health", "https://api.example.com/health");
        assert_eq!(config.interval, DEFAULT_INTERVAL);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_config_builder() {
        let config = HttpSourceConfig::new("fast", "http://localhost/metric")
            .with_interval(Duration::from_secs(5))
            .with_timeout(Duration::from_secs(2));
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_generated_ids_are_unique_and_prefixed() {
        let a = HttpSource::new(HttpSourceConfig::new("a", "http://localhost/")).unwrap();
        let b = HttpSource::new(HttpSourceConfig::new("b", "http://localhost/")).unwrap();
        assert!(a.id().starts_with("ds-"));
        assert!(b.id().starts_with("ds-"));
        assert_ne!(a.id(), b.id());
        assert_eq!(a.type_tag(), "http");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_produces_error_sample() {
        let config = HttpSourceConfig::new("dead", "http://127.0.0.1:1/metric")
            .with_timeout(Duration::from_millis(200));
        let source = HttpSource::new(config).unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel();
        source.retrieve(SampleSink::new(tx)).await;

        let sample = rx.await.unwrap();
        assert_eq!(sample.value(), "");
        assert!(sample.err().unwrap().contains("request failed"));
        assert_eq!(sample.source_id(), source.id());
    }
}
