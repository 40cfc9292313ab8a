//! Logging utilities for Parley services.
//!
//! Provides structured logging setup plus a small per-process request
//! statistics collector.
//!
//! # Noise Filtering
//!
//! By default, noisy library modules (hyper, reqwest, h2, rustls,
//! tokio_util, redis) are set to `warn` level so business logs stay
//! readable at debug level.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Default noisy modules that should be filtered to warn level.
pub const NOISY_MODULES: &[&str] = &[
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
    "tokio_util",
    "redis",
];

/// Build the default EnvFilter with noise suppression.
///
/// `RUST_LOG` overrides everything when set.
fn build_filter(log_level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let mut directives = String::from(log_level);
    for module in NOISY_MODULES {
        directives.push_str(&format!(",{}=warn", module));
    }

    EnvFilter::new(&directives)
}

/// Initialize logging with the given configuration.
///
/// # Arguments
///
/// * `log_level` - Base log level (trace, debug, info, warn, error)
/// * `log_format` - Output format: "json" for structured JSON, "pretty" for human-readable
pub fn init_logging(log_level: &str, log_format: &str) {
    let filter = build_filter(log_level);

    let subscriber = tracing_subscriber::registry().with(filter);

    if log_format == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);
        let _ = subscriber.with(fmt_layer).try_init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true)
            .with_file(false)
            .with_line_number(false);
        let _ = subscriber.with(fmt_layer).try_init();
    }

    tracing::info!(
        log_level = %log_level,
        log_format = %log_format,
        noise_filtered = NOISY_MODULES.len(),
        "Logging initialized"
    );
}

// ============================================================================
// Request Statistics
// ============================================================================

/// Outcome of one coordinated generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Worker signalled and the final record was readable.
    Completed,
    /// The request surfaced an error (worker failure, not-found, backend).
    Failed,
    /// The coordinator deadline elapsed before the worker signalled.
    TimedOut,
}

/// Per-process counters for coordinated requests.
#[derive(Debug, Default)]
pub struct RequestStats {
    inner: Arc<RwLock<StatsInner>>,
}

#[derive(Debug, Default)]
struct StatsInner {
    requests: u64,
    failures: u64,
    timeouts: u64,
    total_duration_ms: u64,
}

impl RequestStats {
    /// Create a new statistics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one finished request.
    pub async fn record(&self, duration_ms: u64, outcome: RequestOutcome) {
        let mut inner = self.inner.write().await;
        inner.requests += 1;
        inner.total_duration_ms += duration_ms;
        match outcome {
            RequestOutcome::Completed => {}
            RequestOutcome::Failed => inner.failures += 1,
            RequestOutcome::TimedOut => {
                inner.failures += 1;
                inner.timeouts += 1;
            }
        }
    }

    /// Get current statistics summary.
    pub async fn summary(&self) -> StatsSummary {
        let inner = self.inner.read().await;
        StatsSummary {
            requests: inner.requests,
            failures: inner.failures,
            timeouts: inner.timeouts,
            avg_duration_ms: if inner.requests > 0 {
                inner.total_duration_ms / inner.requests
            } else {
                0
            },
        }
    }
}

/// Statistics summary for reporting.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatsSummary {
    pub requests: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub avg_duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noisy_modules_list() {
        assert!(NOISY_MODULES.contains(&"hyper"));
        assert!(NOISY_MODULES.contains(&"redis"));
    }

    #[tokio::test]
    async fn test_stats_recording() {
        let stats = RequestStats::new();
        stats.record(100, RequestOutcome::Completed).await;
        stats.record(200, RequestOutcome::Failed).await;
        stats.record(300, RequestOutcome::TimedOut).await;

        let summary = stats.summary().await;
        assert_eq!(summary.requests, 3);
        assert_eq!(summary.failures, 2);
        assert_eq!(summary.timeouts, 1);
        assert_eq!(summary.avg_duration_ms, 200);
    }

    #[tokio::test]
    async fn test_stats_empty_summary() {
        let stats = RequestStats::new();
        let summary = stats.summary().await;
        assert_eq!(summary.requests, 0);
        assert_eq!(summary.avg_duration_ms, 0);
    }
}
