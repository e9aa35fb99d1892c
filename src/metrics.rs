//! Metrics collection and export module

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use std::time::Instant;

/// Relay metrics registry
pub struct Metrics {
    registry: Registry,

    // Counters
    pub send_attempts: IntCounter,
    pub send_failures: IntCounter,
    pub hops_completed: IntCounter,
    pub legs_skipped: IntCounter,
    pub runs_started: IntCounter,
    pub runs_failed: IntCounter,

    // Gauges
    pub active_runs: IntGauge,

    // Histograms
    pub hop_duration: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let send_attempts = IntCounter::with_opts(Opts::new(
            "relay_send_attempts_total",
            "Total number of send attempts, including retries",
        ))?;

        let send_failures = IntCounter::with_opts(Opts::new(
            "relay_send_failures_total",
            "Number of send attempts rejected by the ledger or session",
        ))?;

        let hops_completed = IntCounter::with_opts(Opts::new(
            "relay_hops_completed_total",
            "Number of hops or legs whose send was accepted",
        ))?;

        let legs_skipped = IntCounter::with_opts(Opts::new(
            "relay_legs_skipped_total",
            "Number of fan-in legs skipped for lack of sweepable balance",
        ))?;

        let runs_started =
            IntCounter::with_opts(Opts::new("relay_runs_started_total", "Relay runs started"))?;

        let runs_failed = IntCounter::with_opts(Opts::new(
            "relay_runs_failed_total",
            "Relay runs that ended with a fatal error",
        ))?;

        let active_runs =
            IntGauge::with_opts(Opts::new("relay_active_runs", "Relay runs in progress"))?;

        let hop_duration = Histogram::with_opts(
            HistogramOpts::new(
                "relay_hop_duration_seconds",
                "Time from opening a holder's session to an accepted send",
            )
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]),
        )?;

        registry.register(Box::new(send_attempts.clone()))?;
        registry.register(Box::new(send_failures.clone()))?;
        registry.register(Box::new(hops_completed.clone()))?;
        registry.register(Box::new(legs_skipped.clone()))?;
        registry.register(Box::new(runs_started.clone()))?;
        registry.register(Box::new(runs_failed.clone()))?;
        registry.register(Box::new(active_runs.clone()))?;
        registry.register(Box::new(hop_duration.clone()))?;

        Ok(Self {
            registry,
            send_attempts,
            send_failures,
            hops_completed,
            legs_skipped,
            runs_started,
            runs_failed,
            active_runs,
            hop_duration,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn gather_text(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Timer helper for measuring hop duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Finish the timer and record to the hop duration histogram
    pub fn finish(self) {
        metrics().hop_duration.observe(self.elapsed_secs());
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
