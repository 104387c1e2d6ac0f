//! Error types for sdk-metrics.

use thiserror::Error;

use crate::descriptor::InstrumentKind;

/// Errors raised while configuring or driving the metrics pipeline.
///
/// Every variant except [`MetricsError::AlreadyShutdown`] is a configuration
/// error: it is returned synchronously from a builder or a registration call
/// and is never deferred to collection time.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Export interval (or another scheduling duration) is zero.
    #[error("invalid {what}: duration must be positive")]
    InvalidInterval {
        /// Which duration was rejected
        what: &'static str,
    },

    /// Histogram boundaries are not strictly increasing finite values.
    #[error("invalid histogram boundaries: {0}")]
    InvalidBoundaries(String),

    /// Exemplar reservoir size must be at least one.
    #[error("exemplar reservoir size must be positive")]
    InvalidReservoirSize,

    /// The chosen aggregation can't be applied to the instrument kind.
    #[error("aggregation {aggregation} is not compatible with instrument kind {kind:?}")]
    IncompatibleAggregation {
        /// Aggregation name
        aggregation: &'static str,
        /// Instrument kind the aggregation was applied to
        kind: InstrumentKind,
    },

    /// A metric with the same name but different identity is already registered.
    #[error("metric '{name}' is already registered with an incompatible descriptor: {reason}")]
    IncompatibleDescriptor {
        /// Metric name
        name: String,
        /// What differs
        reason: String,
    },

    /// Instrument kind is not valid for the requested registration call.
    #[error("instrument '{name}' of kind {kind:?} can't be registered as {expected}")]
    InvalidInstrumentKind {
        /// Instrument name
        name: String,
        /// Actual kind
        kind: InstrumentKind,
        /// Expected registration family
        expected: &'static str,
    },

    /// Operation attempted after shutdown completed.
    #[error("metrics pipeline has been shut down")]
    AlreadyShutdown,

    /// Error extracting configuration from figment.
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Error building the tokio runtime that drives a periodic reader.
    #[error("failed to build reader runtime: {0}")]
    RuntimeBuild(#[from] std::io::Error),

    /// Error building the callback worker pool.
    #[error("failed to build callback dispatcher: {0}")]
    DispatcherBuild(#[from] rayon::ThreadPoolBuildError),
}

/// Result type alias for sdk-metrics operations.
pub type Result<T> = std::result::Result<T, MetricsError>;
