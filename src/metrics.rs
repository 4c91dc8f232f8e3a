//! Metrics collection and export module

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};
use std::time::Instant;

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Planning
    pub transactions_planned: IntCounter,

    // Execution
    pub transactions_sent: IntCounter,
    pub transactions_succeeded: IntCounter,
    pub transactions_failed: IntCounter,
    pub transactions_canceled: IntCounter,
    pub send_retries: IntCounter,

    // Decorators
    pub blockhash_cache_hits: IntCounter,
    pub blockhash_cache_misses: IntCounter,
    pub compute_unit_estimates: IntCounter,

    // Histograms
    pub planning_latency: Histogram,
    pub send_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let transactions_planned = IntCounter::with_opts(Opts::new(
            "transactions_planned_total",
            "Number of transactions produced by the planner",
        ))?;

        let transactions_sent = IntCounter::with_opts(Opts::new(
            "transactions_sent_total",
            "Number of transactions handed to the sender",
        ))?;

        let transactions_succeeded = IntCounter::with_opts(Opts::new(
            "transactions_succeeded_total",
            "Number of confirmed transactions",
        ))?;

        let transactions_failed = IntCounter::with_opts(Opts::new(
            "transactions_failed_total",
            "Number of transactions that failed after retries",
        ))?;

        let transactions_canceled = IntCounter::with_opts(Opts::new(
            "transactions_canceled_total",
            "Number of transactions canceled before being sent",
        ))?;

        let send_retries = IntCounter::with_opts(Opts::new(
            "send_retries_total",
            "Number of send attempts retried after an error",
        ))?;

        let blockhash_cache_hits = IntCounter::with_opts(Opts::new(
            "blockhash_cache_hits_total",
            "Blockhash lookups served from cache",
        ))?;

        let blockhash_cache_misses = IntCounter::with_opts(Opts::new(
            "blockhash_cache_misses_total",
            "Blockhash lookups that hit the network",
        ))?;

        let compute_unit_estimates = IntCounter::with_opts(Opts::new(
            "compute_unit_estimates_total",
            "Number of compute unit simulations",
        ))?;

        let planning_latency = Histogram::with_opts(
            HistogramOpts::new("planning_latency_seconds", "Instruction plan packing latency")
                .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
        )?;

        let send_latency = Histogram::with_opts(
            HistogramOpts::new("send_latency_seconds", "Send and confirm latency per transaction")
                .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        )?;

        // Register all metrics
        registry.register(Box::new(transactions_planned.clone()))?;
        registry.register(Box::new(transactions_sent.clone()))?;
        registry.register(Box::new(transactions_succeeded.clone()))?;
        registry.register(Box::new(transactions_failed.clone()))?;
        registry.register(Box::new(transactions_canceled.clone()))?;
        registry.register(Box::new(send_retries.clone()))?;
        registry.register(Box::new(blockhash_cache_hits.clone()))?;
        registry.register(Box::new(blockhash_cache_misses.clone()))?;
        registry.register(Box::new(compute_unit_estimates.clone()))?;
        registry.register(Box::new(planning_latency.clone()))?;
        registry.register(Box::new(send_latency.clone()))?;

        Ok(Self {
            registry,
            transactions_planned,
            transactions_sent,
            transactions_succeeded,
            transactions_failed,
            transactions_canceled,
            send_retries,
            blockhash_cache_hits,
            blockhash_cache_misses,
            compute_unit_estimates,
            planning_latency,
            send_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every metric in the Prometheus text format
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
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.elapsed_secs());
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
