//! Aggregation strategies.
//!
//! An [`Aggregation`] is a declarative choice carried by a view. At
//! registration it is resolved against the instrument and turned into an
//! [`Aggregator`], which creates one [`AggregatorHandle`] per attribute set.
//! Handles accumulate measurements between collections; the aggregator knows
//! how to merge, diff, and export their [`Accumulation`]s.
//!
//! ```text
//! Aggregation ──create_aggregator()──► Arc<dyn Aggregator>
//!                                        ├── create_handle() ──► AggregatorHandle (per attribute set)
//!                                        │     record() / accumulate_then_reset()
//!                                        ├── merge()  cumulative running totals
//!                                        ├── diff()   async delta
//!                                        └── to_metric_data()
//! ```
//!
//! # Bucket convention
//!
//! Buckets are upper-inclusive. With boundaries `b0 < b1 < ... < bn-1` a value
//! lands in bucket 0 when `value <= b0`, in bucket `i` when
//! `b(i-1) < value <= b(i)`, and in the overflow bucket `n` when `value > bn-1`.
//! See [`bucket_index`].

mod histogram;
mod last_value;
mod sum;

use std::fmt;
use std::sync::Arc;

use crate::attributes::Attributes;
use crate::collection::AggregationTemporality;
use crate::context::Context;
use crate::data::{Exemplar, MetricData, Number};
use crate::descriptor::{InstrumentDescriptor, InstrumentKind, MeterInfo, MetricDescriptor};
use crate::error::{MetricsError, Result};
use crate::exemplar::ExemplarFilter;

pub use histogram::HistogramAggregator;
pub use last_value::LastValueAggregator;
pub use sum::SumAggregator;

/// Boundaries used by histograms when no view overrides them.
pub const DEFAULT_HISTOGRAM_BOUNDARIES: [f64; 15] = [
    0.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0, 2500.0, 5000.0, 7500.0,
    10000.0,
];

/// Index of the bucket `value` falls in, for upper-inclusive buckets.
///
/// Returns a value in `0..=boundaries.len()`.
#[inline]
pub fn bucket_index(boundaries: &[f64], value: f64) -> usize {
    boundaries.partition_point(|&b| b < value)
}

/// Validated explicit histogram boundaries: finite and strictly increasing.
#[derive(Clone, Debug, PartialEq)]
pub struct Boundaries(Arc<[f64]>);

impl Boundaries {
    pub fn new(boundaries: Vec<f64>) -> Result<Self> {
        if let Some(bad) = boundaries.iter().find(|b| !b.is_finite()) {
            return Err(MetricsError::InvalidBoundaries(format!(
                "{bad} is not finite"
            )));
        }
        if let Some(pair) = boundaries.windows(2).find(|w| w[0] >= w[1]) {
            return Err(MetricsError::InvalidBoundaries(format!(
                "{} is not greater than {}",
                pair[1], pair[0]
            )));
        }
        Ok(Self(boundaries.into()))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub(crate) fn shared(&self) -> Arc<[f64]> {
        self.0.clone()
    }
}

impl Default for Boundaries {
    fn default() -> Self {
        Self(Arc::from(DEFAULT_HISTOGRAM_BOUNDARIES.as_slice()))
    }
}

/// Aggregation chosen by a view.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Aggregation {
    /// Pick per instrument kind: sums for counters, histograms for
    /// histograms, last value for gauges.
    #[default]
    Default,
    Sum,
    LastValue,
    ExplicitBucketHistogram(Boundaries),
    /// Suppress the metric entirely.
    Drop,
}

impl Aggregation {
    /// Explicit-bucket histogram with validated `boundaries`.
    pub fn explicit_bucket_histogram(boundaries: Vec<f64>) -> Result<Self> {
        Boundaries::new(boundaries).map(Self::ExplicitBucketHistogram)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Sum => "sum",
            Self::LastValue => "last_value",
            Self::ExplicitBucketHistogram(_) => "explicit_bucket_histogram",
            Self::Drop => "drop",
        }
    }

    /// Replace [`Aggregation::Default`] with the concrete choice for `kind`.
    pub fn resolve(&self, kind: InstrumentKind) -> Aggregation {
        match self {
            Self::Default => match kind {
                InstrumentKind::Counter
                | InstrumentKind::UpDownCounter
                | InstrumentKind::ObservableSum
                | InstrumentKind::ObservableUpDownSum => Self::Sum,
                InstrumentKind::Histogram => Self::ExplicitBucketHistogram(Boundaries::default()),
                InstrumentKind::ObservableGauge => Self::LastValue,
            },
            other => other.clone(),
        }
    }

    pub fn is_compatible_with(&self, kind: InstrumentKind) -> bool {
        match self.resolve(kind) {
            Self::Default | Self::Drop => true,
            Self::Sum => kind != InstrumentKind::ObservableGauge,
            Self::LastValue => kind == InstrumentKind::ObservableGauge,
            Self::ExplicitBucketHistogram(_) => {
                matches!(kind, InstrumentKind::Counter | InstrumentKind::Histogram)
            }
        }
    }

    /// Build the aggregator for `instrument`.
    ///
    /// Returns `Ok(None)` for [`Aggregation::Drop`]. Fails when the
    /// aggregation doesn't apply to the instrument kind.
    pub fn create_aggregator(
        &self,
        instrument: &InstrumentDescriptor,
        filter: ExemplarFilter,
        reservoir_size: usize,
    ) -> Result<Option<Arc<dyn Aggregator>>> {
        let kind = instrument.kind();
        if !self.is_compatible_with(kind) {
            return Err(MetricsError::IncompatibleAggregation {
                aggregation: self.name(),
                kind,
            });
        }
        let aggregator: Arc<dyn Aggregator> = match self.resolve(kind) {
            Self::Drop => return Ok(None),
            Self::Sum => Arc::new(SumAggregator::new(instrument, filter, reservoir_size)),
            Self::LastValue => Arc::new(LastValueAggregator),
            Self::ExplicitBucketHistogram(boundaries) => {
                Arc::new(HistogramAggregator::new(boundaries.shared(), filter))
            }
            Self::Default => unreachable!("resolve never returns Default"),
        };
        Ok(Some(aggregator))
    }
}

/// Accumulated histogram state for one attribute set.
#[derive(Clone, Debug, PartialEq)]
pub struct HistogramAccumulation {
    pub count: u64,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub counts: Vec<u64>,
    pub exemplars: Vec<Exemplar>,
}

/// The state of one attribute set at the end of an aggregation cycle.
#[derive(Clone, Debug, PartialEq)]
pub enum Accumulation {
    Sum {
        value: Number,
        exemplars: Vec<Exemplar>,
    },
    LastValue {
        value: Number,
        exemplars: Vec<Exemplar>,
    },
    Histogram(HistogramAccumulation),
}

impl Accumulation {
    pub fn exemplars(&self) -> &[Exemplar] {
        match self {
            Self::Sum { exemplars, .. } | Self::LastValue { exemplars, .. } => exemplars,
            Self::Histogram(h) => &h.exemplars,
        }
    }

    /// Forget sampled exemplars, keeping the aggregated value.
    pub fn clear_exemplars(&mut self) {
        match self {
            Self::Sum { exemplars, .. } | Self::LastValue { exemplars, .. } => exemplars.clear(),
            Self::Histogram(h) => h.exemplars.clear(),
        }
    }
}

/// Exemplars of `previous` followed by `current`, keeping the newest `limit`.
fn concat_exemplars(previous: &[Exemplar], current: &[Exemplar], limit: usize) -> Vec<Exemplar> {
    let skip = (previous.len() + current.len()).saturating_sub(limit);
    previous
        .iter()
        .chain(current)
        .skip(skip)
        .cloned()
        .collect()
}

/// Per-attribute-set accumulator.
pub trait AggregatorHandle: Send + Sync {
    /// Record a measurement. `attributes` are the raw measurement attributes,
    /// before any processor ran, and feed exemplar sampling.
    fn record(&self, value: Number, attributes: &Attributes, context: &Context);

    /// Take everything recorded since the last call, resetting the handle.
    ///
    /// Returns `None` when nothing was recorded.
    fn accumulate_then_reset(&self, point_attributes: &Attributes) -> Option<Accumulation>;
}

/// Strategy turning measurements into exported points.
pub trait Aggregator: Send + Sync + fmt::Debug {
    fn create_handle(&self) -> Box<dyn AggregatorHandle>;

    /// Accumulation of an absolute value reported by an observable callback.
    fn accumulate(&self, value: Number) -> Accumulation;

    /// Combine a running total with a newer accumulation.
    fn merge(&self, previous: &Accumulation, current: &Accumulation) -> Accumulation;

    /// The change from `previous` to `current`, for absolute observations.
    fn diff(&self, previous: &Accumulation, current: &Accumulation) -> Accumulation;

    /// Build the exported metric, or `None` when there are no points.
    #[allow(clippy::too_many_arguments)]
    fn to_metric_data(
        &self,
        scope: &MeterInfo,
        descriptor: &MetricDescriptor,
        accumulations: Vec<(Attributes, Accumulation)>,
        temporality: AggregationTemporality,
        start_epoch_nanos: u64,
        epoch_nanos: u64,
    ) -> Option<MetricData>;
}

fn metric_data(
    scope: &MeterInfo,
    descriptor: &MetricDescriptor,
    points: crate::data::MetricPoints,
) -> MetricData {
    MetricData {
        scope: scope.clone(),
        name: descriptor.name().to_string(),
        description: descriptor.description().to_string(),
        unit: descriptor.unit().to_string(),
        points,
    }
}
