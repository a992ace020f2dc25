//! Metrics for capture and replay.
//!
//! Counters go through the `metrics` facade and are no-ops until a recorder
//! is installed. [`MetricsServer`] installs the Prometheus recorder and its
//! HTTP scrape endpoint.
//!
//! # Example
//!
//! ```rust,no_run
//! use repeater_capture::telemetry::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("127.0.0.1:9090".parse()?);
//! server.start()?;
//! // Metrics available at http://127.0.0.1:9090/metrics
//! # Ok(())
//! # }
//! ```

use crate::record::RequestKind;
use metrics::{counter, describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics recorder
    #[error("Failed to install metrics recorder: {0}")]
    Install(String),
}

/// Prometheus recorder plus scrape endpoint.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsServer")
            .field("addr", &self.addr)
            .field("started", &self.handle.is_some())
            .finish()
    }
}

impl MetricsServer {
    /// Server that will listen on `addr`
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and spawn the HTTP listener.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or another
    /// recorder is already installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        metrics::set_global_recorder(recorder).map_err(|e| MetricsError::Install(e.to_string()))?;

        tokio::spawn(async move {
            if exporter.await.is_err() {
                tracing::warn!("Metrics exporter stopped");
            }
        });

        tracing::info!(addr = %self.addr, "Metrics available at http://{}/metrics", self.addr);
        self.handle = Some(handle);
        Ok(())
    }

    /// Render current metrics in Prometheus format, once started
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!("store.commands.total", "Actions reduced by the store");
    describe_histogram!(
        "store.reducer.duration_seconds",
        "Time spent inside the reducer per action"
    );
    describe_counter!("store.effects.executed", "Effects executed by the store");
    describe_counter!(
        "capture.records.created",
        "Records appended to the history, by kind"
    );
    describe_counter!(
        "capture.correlation.misses",
        "Lifecycle events that matched no record"
    );
    describe_counter!("replay.completed", "Replays that received a full response");
    describe_counter!("replay.failed", "Replays that ended in a transport failure");
}

/// Capture counters.
pub struct CaptureMetrics;

impl CaptureMetrics {
    /// A record was appended
    pub fn record_created(kind: RequestKind) {
        let kind = match kind {
            RequestKind::DocumentLoad => "document-load",
            RequestKind::ScriptCall => "script-call",
            RequestKind::Replayed => "replayed",
        };
        counter!("capture.records.created", "kind" => kind).increment(1);
    }

    /// A lifecycle event found no record
    pub fn record_miss(event: &'static str) {
        counter!("capture.correlation.misses", "event" => event).increment(1);
    }

    /// A replay completed
    pub fn replay_completed() {
        counter!("replay.completed").increment(1);
    }

    /// A replay failed
    pub fn replay_failed() {
        counter!("replay.failed").increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code
mod tests {
    use super::*;

    #[test]
    fn server_starts_unstarted() {
        let server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(server.render().is_none());
    }

    #[test]
    fn counters_are_noops_without_recorder() {
        CaptureMetrics::record_created(RequestKind::Replayed);
        CaptureMetrics::record_miss("response");
        CaptureMetrics::replay_completed();
        CaptureMetrics::replay_failed();
    }
}
