//! Builder for constructing a [`MeterProvider`].
//!
//! The builder supports multiple configuration sources using figment:
//! - Default values
//! - Config files (TOML, YAML, JSON)
//! - Environment variables
//! - Programmatic overrides
//! - CLI arguments via clap
//!
//! Views and readers are not configuration data; they are registered in code
//! and handed to the provider as-is.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use prometheus::Registry;
use tracing::warn;

use crate::config::SdkConfig;
use crate::error::Result;
use crate::exemplar::ExemplarFilter;
use crate::export::{MetricExporter, MetricReader, PeriodicMetricReader};
use crate::metrics::SdkMetrics;
use crate::provider::MeterProvider;
use crate::result::CallbackDispatcher;
use crate::view::{InstrumentSelector, RegisteredView, View};

/// Builder for constructing a `MeterProvider`.
///
/// Configuration sources are merged in the following order (later sources override earlier):
/// 1. Default values
/// 2. Config files (in order added)
/// 3. Environment variables
/// 4. Programmatic overrides
///
/// # Examples
///
/// ```ignore
/// use sdk_metrics::{InMemoryMetricExporter, MeterProviderBuilder};
///
/// let provider = MeterProviderBuilder::new()
///     .file("metrics.toml")
///     .env_prefix("SDK_METRICS")
///     .export_interval(Duration::from_secs(10))
///     .with_periodic_exporter(Arc::new(InMemoryMetricExporter::new()))
///     .build()?;
/// ```
pub struct MeterProviderBuilder {
    figment: Figment,
    prometheus_registry: Option<Registry>,
    views: Vec<RegisteredView>,
    readers: Vec<Arc<dyn MetricReader>>,
    periodic_exporters: Vec<Arc<dyn MetricExporter>>,
}

impl Default for MeterProviderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MeterProviderBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeterProviderBuilder")
            .field("figment", &self.figment)
            .field(
                "prometheus_registry",
                &self.prometheus_registry.as_ref().map(|_| "<Registry>"),
            )
            .field("views", &self.views.len())
            .field("readers", &self.readers.len())
            .field("periodic_exporters", &self.periodic_exporters.len())
            .finish()
    }
}

impl MeterProviderBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            figment: Figment::from(Serialized::defaults(SdkConfig::default())),
            prometheus_registry: None,
            views: Vec::new(),
            readers: Vec::new(),
            periodic_exporters: Vec::new(),
        }
    }

    /// Add a configuration file.
    ///
    /// Supports TOML, YAML, and JSON formats (detected by extension).
    /// Files are merged in the order they are added.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        self.figment = match extension.to_lowercase().as_str() {
            "toml" => self.figment.merge(Toml::file(path)),
            "yaml" | "yml" => self.figment.merge(Yaml::file(path)),
            "json" => self.figment.merge(Json::file(path)),
            _ => {
                // Default to TOML
                self.figment.merge(Toml::file(path))
            }
        };
        self
    }

    /// Add environment variables with a prefix.
    ///
    /// Environment variables are expected in the format `{PREFIX}_{KEY}`,
    /// e.g. `SDK_METRICS_EXPORT_INTERVAL_MS`.
    ///
    /// # Arguments
    ///
    /// * `prefix` - The environment variable prefix (without trailing underscore)
    pub fn env_prefix(mut self, prefix: &str) -> Self {
        self.figment = self
            .figment
            .merge(Env::prefixed(&format!("{}_", prefix)));
        self
    }

    /// Set the thread name and self-metric prefix.
    ///
    /// Periodic reader threads are named `{prefix}-periodic-{NNNN}`.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("prefix", prefix.into()));
        self
    }

    /// Interval of periodic readers created with [`Self::with_periodic_exporter`].
    pub fn export_interval(mut self, interval: Duration) -> Self {
        self.figment = self.figment.merge(Serialized::default(
            "export_interval_ms",
            interval.as_millis() as u64,
        ));
        self
    }

    /// Bound on the final flush of periodic readers at shutdown.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.figment = self.figment.merge(Serialized::default(
            "shutdown_timeout_ms",
            timeout.as_millis() as u64,
        ));
        self
    }

    pub fn exemplar_filter(mut self, filter: ExemplarFilter) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("exemplar_filter", filter));
        self
    }

    /// Capacity of fixed-size exemplar reservoirs.
    ///
    /// Default is the available parallelism.
    pub fn exemplar_reservoir_size(mut self, size: usize) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("exemplar_reservoir_size", size));
        self
    }

    /// Bound the number of readers, switching reader sets to bit vectors.
    pub fn max_readers(mut self, max: usize) -> Self {
        self.figment = self.figment.merge(Serialized::default("max_readers", max));
        self
    }

    /// Worker threads running result-code callbacks.
    ///
    /// Each provider owns its own pool.
    pub fn callback_threads(mut self, n: usize) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("callback_threads", n));
        self
    }

    /// Provide an external Prometheus registry for the SDK's own metrics.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use prometheus::Registry;
    ///
    /// let registry = Registry::new();
    /// let provider = MeterProviderBuilder::new()
    ///     .prometheus_registry(registry.clone())
    ///     .build()?;
    ///
    /// let metric_families = registry.gather();
    /// ```
    pub fn prometheus_registry(mut self, registry: Registry) -> Self {
        self.prometheus_registry = Some(registry);
        self
    }

    /// Apply `view` to every instrument matching `selector`.
    pub fn register_view(mut self, selector: InstrumentSelector, view: View) -> Self {
        self.views.push(RegisteredView::new(selector, view));
        self
    }

    /// Register a reader. Each reader receives its own collection handle.
    pub fn register_reader(mut self, reader: Arc<dyn MetricReader>) -> Self {
        self.readers.push(reader);
        self
    }

    /// Register a periodic reader pushing to `exporter`, configured from the
    /// builder's interval, timeout and prefix.
    pub fn with_periodic_exporter(mut self, exporter: Arc<dyn MetricExporter>) -> Self {
        self.periodic_exporters.push(exporter);
        self
    }

    /// Apply CLI argument overrides.
    ///
    /// This method applies any non-None values from the `MetricsArgs` struct.
    pub fn with_cli_args(mut self, args: &MetricsArgs) -> Self {
        if let Some(ref prefix) = args.metrics_prefix {
            self.figment = self
                .figment
                .merge(Serialized::default("prefix", prefix.clone()));
        }
        if let Some(ms) = args.metrics_export_interval_ms {
            self.figment = self
                .figment
                .merge(Serialized::default("export_interval_ms", ms));
        }
        if let Some(ms) = args.metrics_shutdown_timeout_ms {
            self.figment = self
                .figment
                .merge(Serialized::default("shutdown_timeout_ms", ms));
        }
        if let Some(filter) = args.metrics_exemplar_filter {
            self.figment = self
                .figment
                .merge(Serialized::default("exemplar_filter", filter));
        }
        if let Some(size) = args.metrics_exemplar_reservoir_size {
            self.figment = self
                .figment
                .merge(Serialized::default("exemplar_reservoir_size", size));
        }
        self
    }

    fn extract(&self) -> Result<SdkConfig> {
        let config: SdkConfig = self.figment.extract().map_err(Box::new)?;
        Ok(config)
    }

    /// Build the provider.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration extraction fails
    /// - A duration or the reservoir size is zero
    /// - A periodic reader's runtime or the callback pool can't be built
    pub fn build(self) -> Result<MeterProvider> {
        let mut config = self.extract()?;
        config.prometheus_registry = self.prometheus_registry;
        config.validate()?;

        let metrics = SdkMetrics::with_prefix(&config.prefix);
        if let Some(ref registry) = config.prometheus_registry {
            if let Err(e) = metrics.register(registry) {
                warn!(%e, "failed to register sdk metrics with prometheus registry");
            }
        }

        let dispatcher =
            Arc::new(CallbackDispatcher::new(&config.prefix, config.callback_threads)?);

        let mut readers = self.readers;
        for exporter in self.periodic_exporters {
            let reader = PeriodicMetricReader::builder(exporter)
                .interval(config.export_interval())
                .timeout(config.shutdown_timeout())
                .prefix(config.prefix.clone())
                .metrics(metrics.clone())
                .build()?;
            readers.push(Arc::new(reader));
        }

        Ok(MeterProvider::from_parts(config, self.views, readers, metrics, dispatcher))
    }
}

/// CLI arguments for metrics SDK configuration.
///
/// Use with clap's `Parser` derive macro. These arguments can be applied
/// to a `MeterProviderBuilder` using `with_cli_args`.
///
/// # Examples
///
/// ```ignore
/// use clap::Parser;
/// use sdk_metrics::{MeterProviderBuilder, MetricsArgs};
///
/// #[derive(Parser)]
/// struct MyArgs {
///     #[command(flatten)]
///     metrics: MetricsArgs,
/// }
///
/// let args = MyArgs::parse();
/// let provider = MeterProviderBuilder::new()
///     .with_cli_args(&args.metrics)
///     .build()?;
/// ```
#[derive(Debug, Default, Clone, clap::Args)]
pub struct MetricsArgs {
    /// Thread name and self-metric prefix
    #[arg(long)]
    pub metrics_prefix: Option<String>,

    /// Periodic export interval in milliseconds
    #[arg(long)]
    pub metrics_export_interval_ms: Option<u64>,

    /// Bound on the final flush at shutdown, in milliseconds
    #[arg(long)]
    pub metrics_shutdown_timeout_ms: Option<u64>,

    /// Which measurements are offered to exemplar reservoirs
    #[arg(long, value_enum)]
    pub metrics_exemplar_filter: Option<ExemplarFilter>,

    /// Capacity of fixed-size exemplar reservoirs
    #[arg(long)]
    pub metrics_exemplar_reservoir_size: Option<usize>,
}
