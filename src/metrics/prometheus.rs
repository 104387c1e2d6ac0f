//! Prometheus counters describing the metrics pipeline itself.
//!
//! Counters work standalone without a Registry; registration is only needed
//! for exposition.
//!
//! # Usage
//!
//! ```ignore
//! // Pattern 1: No exposition (counters still work internally)
//! let provider = MeterProviderBuilder::new().build()?;
//!
//! // Pattern 2: External registry for scraping
//! let registry = prometheus::Registry::new();
//! let provider = MeterProviderBuilder::new()
//!     .prometheus_registry(registry.clone())
//!     .build()?;
//! ```
//!
//! | Operation | Overhead |
//! |-----------|----------|
//! | Counter increment | atomic fetch_add |
//! | Registry lookup | never (direct field access) |

use prometheus::{IntCounter, IntGauge, Opts, Registry};

/// Self-observability counters of one provider and its readers.
#[derive(Clone)]
pub struct SdkMetrics {
    // === Gauges (current values) ===
    /// Readers registered with the provider
    pub registered_readers: IntGauge,

    /// Metric storages registered across all meters
    pub storages_registered: IntGauge,

    // === Counters (cumulative) ===
    /// Collection cycles run by any reader
    pub collections_total: IntCounter,

    /// Batches handed to an exporter
    pub exports_total: IntCounter,

    /// Export cycles that settled as failed, including exporter panics
    pub export_failures_total: IntCounter,

    /// Periodic ticks dropped because the previous export was still running
    pub dropped_ticks_total: IntCounter,

    /// Negative increments dropped on monotonic instruments
    pub dropped_measurements_total: IntCounter,
}

impl Default for SdkMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn sanitize(prefix: &str) -> String {
    // Valid chars: [a-zA-Z_:] for first char, [a-zA-Z0-9_:] for rest
    prefix
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let valid = if i == 0 {
                c.is_ascii_alphabetic() || c == '_' || c == ':'
            } else {
                c.is_ascii_alphanumeric() || c == '_' || c == ':'
            };
            if valid {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn counter(prefix: &str, name: &str, help: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(format!("{prefix}_{name}"), help))
        .expect("metric creation should not fail")
}

fn gauge(prefix: &str, name: &str, help: &str) -> IntGauge {
    IntGauge::with_opts(Opts::new(format!("{prefix}_{name}"), help))
        .expect("metric creation should not fail")
}

impl SdkMetrics {
    /// Create metrics with the default prefix "sdk_metrics".
    pub fn new() -> Self {
        Self::with_prefix("sdk_metrics")
    }

    /// Create metrics named `{prefix}_collections_total`, etc.
    ///
    /// The prefix is sanitized to a valid Prometheus name: hyphens and other
    /// invalid characters become underscores.
    pub fn with_prefix(prefix: &str) -> Self {
        let prefix = sanitize(prefix);
        Self {
            registered_readers: gauge(&prefix, "registered_readers", "Registered metric readers"),
            storages_registered: gauge(
                &prefix,
                "storages_registered",
                "Registered metric storages",
            ),
            collections_total: counter(&prefix, "collections_total", "Collection cycles"),
            exports_total: counter(&prefix, "exports_total", "Batches handed to exporters"),
            export_failures_total: counter(
                &prefix,
                "export_failures_total",
                "Export cycles that failed",
            ),
            dropped_ticks_total: counter(
                &prefix,
                "dropped_ticks_total",
                "Periodic ticks dropped while an export was in flight",
            ),
            dropped_measurements_total: counter(
                &prefix,
                "dropped_measurements_total",
                "Negative measurements dropped on monotonic instruments",
            ),
        }
    }

    /// Register all metrics with a Registry for exposition.
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register (e.g., duplicate names).
    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.registered_readers.clone()))?;
        registry.register(Box::new(self.storages_registered.clone()))?;
        registry.register(Box::new(self.collections_total.clone()))?;
        registry.register(Box::new(self.exports_total.clone()))?;
        registry.register(Box::new(self.export_failures_total.clone()))?;
        registry.register(Box::new(self.dropped_ticks_total.clone()))?;
        registry.register(Box::new(self.dropped_measurements_total.clone()))?;
        Ok(())
    }

    #[inline]
    pub fn record_collection(&self) {
        self.collections_total.inc();
    }

    /// Record the outcome of one export.
    #[inline]
    pub fn record_export(&self, success: bool) {
        self.exports_total.inc();
        if !success {
            self.export_failures_total.inc();
        }
    }

    #[inline]
    pub fn record_dropped_tick(&self) {
        self.dropped_ticks_total.inc();
    }

    #[inline]
    pub fn record_dropped_measurement(&self) {
        self.dropped_measurements_total.inc();
    }
}

impl std::fmt::Debug for SdkMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdkMetrics")
            .field("registered_readers", &self.registered_readers.get())
            .field("collections_total", &self.collections_total.get())
            .field("exports_total", &self.exports_total.get())
            .field("export_failures_total", &self.export_failures_total.get())
            .field("dropped_ticks_total", &self.dropped_ticks_total.get())
            .finish()
    }
}
