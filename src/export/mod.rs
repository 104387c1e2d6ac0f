//! The collect/export boundary.
//!
//! ```text
//!                 register(producer)
//! MeterProvider ───────────────────────► MetricReader
//!      ▲                                   │  pull: collect_all_metrics()
//!      └──────────── MetricProducer ◄──────┘
//!                                          │  push: export(batch)
//!                                          ▼
//!                                     MetricExporter
//! ```
//!
//! A [`MetricReader`] owns the decision of *when* to collect. Pull readers
//! ([`InMemoryMetricReader`]) collect on demand; the [`PeriodicMetricReader`]
//! collects on a timer and pushes each batch to a [`MetricExporter`].
//! Every export, flush and shutdown reports through a [`CompletableResultCode`].

mod in_memory;
mod periodic;

pub use in_memory::{InMemoryMetricExporter, InMemoryMetricReader};
pub use periodic::{PeriodicMetricReader, PeriodicMetricReaderBuilder};

use std::sync::Arc;

use crate::collection::AggregationTemporality;
use crate::data::MetricData;
use crate::error::Result;
use crate::result::{CallbackDispatcher, CompletableResultCode};

/// Push destination for collected metrics. Transport agnostic.
pub trait MetricExporter: Send + Sync {
    /// Export one batch. A failure or panic fails only this cycle.
    fn export(&self, metrics: Vec<MetricData>) -> CompletableResultCode;

    /// Export anything buffered.
    fn flush(&self) -> CompletableResultCode;

    /// Release resources. Exports after shutdown should fail.
    fn shutdown(&self) -> CompletableResultCode;

    fn preferred_temporality(&self) -> AggregationTemporality {
        AggregationTemporality::Cumulative
    }

    fn supported_temporality(&self) -> Vec<AggregationTemporality> {
        vec![
            AggregationTemporality::Cumulative,
            AggregationTemporality::Delta,
        ]
    }
}

/// Pull side of a provider, bound to one reader.
pub trait MetricProducer: Send + Sync {
    /// Collect every metric stream for the bound reader.
    ///
    /// Fails with [`MetricsError::AlreadyShutdown`](crate::MetricsError::AlreadyShutdown)
    /// once the provider has shut down.
    fn collect_all_metrics(&self) -> Result<Vec<MetricData>>;

    /// Where readers run the callbacks of the result codes they hand out.
    fn dispatcher(&self) -> Arc<CallbackDispatcher> {
        CallbackDispatcher::shared()
    }
}

/// Decides when collection happens and where the data goes.
pub trait MetricReader: Send + Sync {
    /// Called once by the provider when the reader is registered.
    fn register(&self, producer: Arc<dyn MetricProducer>);

    fn preferred_temporality(&self) -> AggregationTemporality {
        AggregationTemporality::Cumulative
    }

    fn supported_temporality(&self) -> Vec<AggregationTemporality> {
        vec![
            AggregationTemporality::Cumulative,
            AggregationTemporality::Delta,
        ]
    }

    /// Collect and export out of band.
    fn flush(&self) -> CompletableResultCode;

    /// Stop the reader. Safe to call once; later calls return a failed code.
    fn shutdown(&self) -> CompletableResultCode;
}
