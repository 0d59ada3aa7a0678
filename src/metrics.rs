//! Prometheus metrics for window caches.
//!
//! All counters carry a `variant` label (`local` or `shared`) so one registry
//! can serve both kinds of cache.

use prometheus::{IntCounterVec, Opts, Registry};

/// Counters updated by window caches on every refill and slice.
#[derive(Clone)]
pub struct WindowMetrics {
    pub refills: IntCounterVec,
    pub pull_failures: IntCounterVec,
    pub downgrades: IntCounterVec,
    pub empty_pulls: IntCounterVec,
    pub items_served: IntCounterVec,
    pub short_reads: IntCounterVec,
}

impl WindowMetrics {
    /// Create the counters and register them on `registry`.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let metrics = Self {
            refills: counter("window_cache_refills_total", "Successful non-empty refills")?,
            pull_failures: counter(
                "window_cache_pull_failures_total",
                "Upstream pulls that returned an error",
            )?,
            downgrades: counter(
                "window_cache_downgrades_total",
                "Failed refills served from stale data",
            )?,
            empty_pulls: counter(
                "window_cache_empty_pulls_total",
                "Upstream pulls that returned no items",
            )?,
            items_served: counter("window_cache_items_served_total", "Items handed to callers")?,
            short_reads: counter(
                "window_cache_short_reads_total",
                "Calls that returned fewer items than requested",
            )?,
        };

        registry.register(Box::new(metrics.refills.clone()))?;
        registry.register(Box::new(metrics.pull_failures.clone()))?;
        registry.register(Box::new(metrics.downgrades.clone()))?;
        registry.register(Box::new(metrics.empty_pulls.clone()))?;
        registry.register(Box::new(metrics.items_served.clone()))?;
        registry.register(Box::new(metrics.short_reads.clone()))?;

        Ok(metrics)
    }

    pub(crate) fn record_served(&self, variant: &str, requested: usize, served: usize) {
        self.items_served
            .with_label_values(&[variant])
            .inc_by(served as u64);
        if served < requested {
            self.short_reads.with_label_values(&[variant]).inc();
        }
    }
}

fn counter(name: &str, help: &str) -> Result<IntCounterVec, prometheus::Error> {
    IntCounterVec::new(Opts::new(name, help), &["variant"])
}

/// Render every metric in `registry` in the Prometheus text format.
pub fn render(registry: &Registry) -> Result<String, prometheus::Error> {
    let encoder = prometheus::TextEncoder::new();
    encoder.encode_to_string(&registry.gather())
}
