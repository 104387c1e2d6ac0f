//! Configuration types for the metrics SDK.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MetricsError, Result};
use crate::exemplar::ExemplarFilter;
use prometheus::Registry;

/// Configuration for a [`MeterProvider`](crate::MeterProvider).
///
/// This struct can be deserialized from TOML, YAML, JSON, or environment variables
/// using figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SdkConfig {
    /// Thread name and self-metric prefix (default: "sdk_metrics")
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Interval of the periodic reader created by the builder (default: 60000)
    #[serde(default = "default_export_interval_ms")]
    pub export_interval_ms: u64,

    /// Bound on the final flush performed at shutdown (default: 5000)
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Which measurements are offered to exemplar reservoirs
    #[serde(default)]
    pub exemplar_filter: ExemplarFilter,

    /// Fixed-size reservoir capacity (default: available parallelism)
    #[serde(default)]
    pub exemplar_reservoir_size: Option<usize>,

    /// Upper bound on registered readers. When set, reader handle sets are
    /// fixed-width bit vectors instead of hash sets.
    #[serde(default)]
    pub max_readers: Option<usize>,

    /// Worker threads running result-code callbacks (default: 1)
    #[serde(default = "default_callback_threads")]
    pub callback_threads: usize,

    /// Prometheus registry for self-metrics exposition.
    /// Not serializable - must be set programmatically.
    #[serde(skip)]
    pub prometheus_registry: Option<Registry>,
}

fn default_prefix() -> String {
    "sdk_metrics".to_string()
}

fn default_export_interval_ms() -> u64 {
    60_000
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

fn default_callback_threads() -> usize {
    1
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            export_interval_ms: default_export_interval_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            exemplar_filter: ExemplarFilter::default(),
            exemplar_reservoir_size: None,
            max_readers: None,
            callback_threads: default_callback_threads(),
            prometheus_registry: None,
        }
    }
}

impl SdkConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn export_interval(&self) -> Duration {
        Duration::from_millis(self.export_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Reservoir capacity: the configured value or the available parallelism.
    pub fn effective_reservoir_size(&self) -> usize {
        self.exemplar_reservoir_size.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Reject values that can only be wrong.
    pub fn validate(&self) -> Result<()> {
        if self.export_interval_ms == 0 {
            return Err(MetricsError::InvalidInterval {
                what: "export interval",
            });
        }
        if self.shutdown_timeout_ms == 0 {
            return Err(MetricsError::InvalidInterval {
                what: "shutdown timeout",
            });
        }
        if self.exemplar_reservoir_size == Some(0) {
            return Err(MetricsError::InvalidReservoirSize);
        }
        Ok(())
    }
}
