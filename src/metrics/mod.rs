//! Self-observability of the metrics pipeline.
//!
//! Prometheus counters track collections, exports, failures and dropped
//! ticks. They are always incremented and can optionally be exposed through a
//! Prometheus registry for scraping.
//!
//! # Available Metrics
//!
//! ## Gauges (current values)
//!
//! - `sdk_metrics_registered_readers` - Readers registered with the provider
//! - `sdk_metrics_storages_registered` - Metric storages across all meters
//!
//! ## Counters (cumulative)
//!
//! - `sdk_metrics_collections_total` - Collection cycles
//! - `sdk_metrics_exports_total` - Batches handed to exporters
//! - `sdk_metrics_export_failures_total` - Failed export cycles
//! - `sdk_metrics_dropped_ticks_total` - Periodic ticks dropped by the single-flight guard
//! - `sdk_metrics_dropped_measurements_total` - Negative increments on monotonic instruments
//!
//! # Example
//!
//! ```ignore
//! use prometheus::{Registry, TextEncoder};
//!
//! let registry = Registry::new();
//! let provider = MeterProviderBuilder::new()
//!     .prometheus_registry(registry.clone())
//!     .build()?;
//!
//! let mut buffer = String::new();
//! TextEncoder::new().encode_utf8(&registry.gather(), &mut buffer)?;
//! ```

mod prometheus;

pub use prometheus::SdkMetrics;
