//! Metrics collection and export module

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Instant;

/// Process-wide pipeline metrics
pub struct Metrics {
    registry: Registry,

    // Submission counters
    pub submissions_total: IntCounter,
    pub submissions_failed: IntCounterVec,
    pub fallback_switches: IntCounter,
    pub backoff_retries: IntCounter,
    pub token_accounts_created: IntCounter,

    // Pending lifecycle
    pub pending_marked_sent: IntCounter,
    pub pending_marked_timed_out: IntCounter,
    pub pending_collected: IntCounter,
    pub pending_live: IntGauge,

    // Histograms
    pub submit_latency: Histogram,
    pub build_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let submissions_total = IntCounter::with_opts(Opts::new(
            "submissions_total",
            "Number of transfers submitted to the network",
        ))?;

        let submissions_failed = IntCounterVec::new(
            Opts::new(
                "submissions_failed_total",
                "Number of failed submissions by classified kind",
            ),
            &["kind"],
        )?;

        let fallback_switches = IntCounter::with_opts(Opts::new(
            "fallback_switches_total",
            "Number of times an operation moved from the primary to the fallback RPC",
        ))?;

        let backoff_retries = IntCounter::with_opts(Opts::new(
            "backoff_retries_total",
            "Number of retries performed by the backoff executor",
        ))?;

        let token_accounts_created = IntCounter::with_opts(Opts::new(
            "token_accounts_created_total",
            "Number of token accounts created on-chain while building transfers",
        ))?;

        let pending_marked_sent = IntCounter::with_opts(Opts::new(
            "pending_marked_sent_total",
            "Pending transactions confirmed against polled history",
        ))?;

        let pending_marked_timed_out = IntCounter::with_opts(Opts::new(
            "pending_marked_timed_out_total",
            "Pending transactions that exceeded the wait window",
        ))?;

        let pending_collected = IntCounter::with_opts(Opts::new(
            "pending_collected_total",
            "Resolved pending transactions removed by the collector",
        ))?;

        let pending_live =
            IntGauge::with_opts(Opts::new("pending_live", "Pending transactions currently stored"))?;

        let submit_latency = Histogram::with_opts(
            HistogramOpts::new("submit_latency_seconds", "Sign-and-send latency")
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;

        let build_latency = Histogram::with_opts(
            HistogramOpts::new("build_latency_seconds", "Transaction build latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        )?;

        registry.register(Box::new(submissions_total.clone()))?;
        registry.register(Box::new(submissions_failed.clone()))?;
        registry.register(Box::new(fallback_switches.clone()))?;
        registry.register(Box::new(backoff_retries.clone()))?;
        registry.register(Box::new(token_accounts_created.clone()))?;
        registry.register(Box::new(pending_marked_sent.clone()))?;
        registry.register(Box::new(pending_marked_timed_out.clone()))?;
        registry.register(Box::new(pending_collected.clone()))?;
        registry.register(Box::new(pending_live.clone()))?;
        registry.register(Box::new(submit_latency.clone()))?;
        registry.register(Box::new(build_latency.clone()))?;

        Ok(Self {
            registry,
            submissions_total,
            submissions_failed,
            fallback_switches,
            backoff_retries,
            token_accounts_created,
            pending_marked_sent,
            pending_marked_timed_out,
            pending_collected,
            pending_live,
            submit_latency,
            build_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a failed submission under its classified kind label
    pub fn record_failure(&self, kind: &str) {
        self.submissions_failed.with_label_values(&[kind]).inc();
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe(&self, histogram: &Histogram) {
        histogram.observe(self.start.elapsed().as_secs_f64());
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        assert!(metrics.is_ok());
    }

    #[test]
    fn test_failure_labels_render() {
        let m = Metrics::new().unwrap();
        m.record_failure("network_transient");
        m.record_failure("network_transient");
        m.submissions_total.inc();

        let text = m.render().unwrap();
        assert!(text.contains("submissions_failed_total{kind=\"network_transient\"} 2"));
        assert!(text.contains("submissions_total 1"));
    }
}
