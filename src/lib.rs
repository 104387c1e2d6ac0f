//! # sdk-metrics
//!
//! Core of a metrics SDK: instruments record measurements, views decide how
//! they are aggregated, and any number of readers collect the result with
//! their own temporality.
//!
//! ## Features
//!
//! - **Views**: rename metrics, pick an aggregation, filter or enrich attributes
//! - **Multi-reader collection**: one accumulator per storage, cumulative and delta readers side by side
//! - **Exemplars**: trace-based, always-on or always-off sampling into fixed-size or per-bucket reservoirs
//! - **Periodic export**: single-flight collect/export cycles on a tokio timer
//! - **Async completion**: every export, flush and shutdown reports through a [`CompletableResultCode`]
//! - **Flexible Configuration**: configure via files (TOML/YAML/JSON), environment variables, or code
//! - **CLI Integration**: built-in clap support for command-line overrides
//!
//! ## Architecture
//!
//! ```text
//!  SyncInstrument::record ──► SynchronousMetricStorage ──┐
//!                                                        │  per reader:
//!  observable callback ────► AsynchronousMetricStorage ──┤  CollectionInfo
//!                                                        ▼
//!  MetricReader ◄── MetricProducer ◄── MeterProvider::collect
//!       │
//!       └──► MetricExporter::export(batch) ──► CompletableResultCode
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use sdk_metrics::{
//!     Attributes, InMemoryMetricExporter, InstrumentDescriptor, InstrumentKind,
//!     InstrumentValueType, MeterInfo, MeterProviderBuilder,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let exporter = Arc::new(InMemoryMetricExporter::new());
//!     let provider = MeterProviderBuilder::new()
//!         .prefix("myapp")
//!         .export_interval(std::time::Duration::from_secs(10))
//!         .with_periodic_exporter(exporter.clone())
//!         .build()?;
//!
//!     let requests = provider.meter(MeterInfo::new("http")).register_instrument(
//!         InstrumentDescriptor::new("requests", InstrumentKind::Counter, InstrumentValueType::Long),
//!     )?;
//!     requests.record_long(1, &[("route", "/")].into_iter().collect());
//!
//!     // Final export, then stop the timer
//!     provider.shutdown().join(std::time::Duration::from_secs(5));
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! Configuration sources are merged in order (later sources override earlier):
//!
//! 1. Default values
//! 2. Config files (via `.file()`)
//! 3. Environment variables (via `.env_prefix()`)
//! 4. Programmatic overrides
//! 5. CLI arguments (via `.with_cli_args()`)
//!
//! ### Config File Example (TOML)
//!
//! ```toml
//! prefix = "myapp"
//! export_interval_ms = 10000
//! shutdown_timeout_ms = 5000
//! exemplar_filter = "trace_based"
//! exemplar_reservoir_size = 4
//! ```
//!
//! ### Environment Variables
//!
//! With `.env_prefix("SDK_METRICS")`:
//! - `SDK_METRICS_PREFIX=myapp`
//! - `SDK_METRICS_EXPORT_INTERVAL_MS=10000`
//! - `SDK_METRICS_EXEMPLAR_FILTER=always_on`
//!
//! ## Thread Naming
//!
//! Threads are named with the configured prefix:
//! - Periodic reader threads: `{prefix}-periodic-0000`
//! - Result callback threads: `{prefix}-callback-0000`, `{prefix}-callback-0001`, ...

pub mod aggregation;
pub mod attributes;
pub mod builder;
pub mod collection;
pub mod config;
pub mod context;
pub mod data;
pub mod descriptor;
pub mod error;
pub mod exemplar;
pub mod export;
pub mod metrics;
pub mod provider;
pub mod result;
pub mod storage;
pub mod view;

pub use aggregation::{Aggregation, Boundaries, DEFAULT_HISTOGRAM_BOUNDARIES};
pub use attributes::{AttributeValue, Attributes};
pub use builder::{MeterProviderBuilder, MetricsArgs};
pub use collection::{AggregationTemporality, CollectionHandle, CollectionInfo};
pub use config::SdkConfig;
pub use context::{Context, SpanContext};
pub use data::{
    Exemplar, HistogramPoint, MetricData, MetricPoints, Number, NumberPoint,
};
pub use descriptor::{
    InstrumentDescriptor, InstrumentKind, InstrumentValueType, MeterInfo, MetricDescriptor,
};
pub use error::{MetricsError, Result};
pub use exemplar::ExemplarFilter;
pub use export::{
    InMemoryMetricExporter, InMemoryMetricReader, MetricExporter, MetricProducer, MetricReader,
    PeriodicMetricReader,
};
pub use metrics::SdkMetrics;
pub use provider::{Meter, MeterProvider, ObservableMeasurement, SyncInstrument};
pub use result::CompletableResultCode;
pub use view::{InstrumentSelector, View};
