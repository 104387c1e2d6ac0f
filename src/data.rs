//! Exported metric data model.
//!
//! A collection cycle produces one [`MetricData`] per metric stream. Points
//! carry start/end timestamps as nanoseconds since the Unix epoch.

use std::ops::{Add, Sub};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::attributes::Attributes;
use crate::collection::AggregationTemporality;
use crate::context::SpanContext;
use crate::descriptor::MeterInfo;

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub fn now_epoch_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// A measurement value of either numeric type.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Number {
    Long(i64),
    Double(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Long(v) => v as f64,
            Self::Double(v) => v,
        }
    }

    pub fn is_negative(self) -> bool {
        match self {
            Self::Long(v) => v < 0,
            Self::Double(v) => v < 0.0,
        }
    }
}

impl Add for Number {
    type Output = Number;

    fn add(self, rhs: Number) -> Number {
        match (self, rhs) {
            (Self::Long(a), Self::Long(b)) => Self::Long(a.wrapping_add(b)),
            (a, b) => Self::Double(a.as_f64() + b.as_f64()),
        }
    }
}

impl Sub for Number {
    type Output = Number;

    fn sub(self, rhs: Number) -> Number {
        match (self, rhs) {
            (Self::Long(a), Self::Long(b)) => Self::Long(a.wrapping_sub(b)),
            (a, b) => Self::Double(a.as_f64() - b.as_f64()),
        }
    }
}

/// A retained raw measurement attached to an aggregated point.
#[derive(Clone, Debug, PartialEq)]
pub struct Exemplar {
    /// Measurement attributes that were dropped from the point's attribute set
    pub filtered_attributes: Attributes,
    pub epoch_nanos: u64,
    pub value: Number,
    pub span_context: Option<SpanContext>,
}

/// A sum or gauge point.
#[derive(Clone, Debug, PartialEq)]
pub struct NumberPoint {
    pub start_epoch_nanos: u64,
    pub epoch_nanos: u64,
    pub attributes: Attributes,
    pub value: Number,
    pub exemplars: Vec<Exemplar>,
}

/// An explicit-bucket histogram point.
///
/// `counts` has `boundaries.len() + 1` entries; see
/// [`bucket_index`](crate::aggregation::bucket_index) for the bucket convention.
#[derive(Clone, Debug, PartialEq)]
pub struct HistogramPoint {
    pub start_epoch_nanos: u64,
    pub epoch_nanos: u64,
    pub attributes: Attributes,
    pub count: u64,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub boundaries: Vec<f64>,
    pub counts: Vec<u64>,
    pub exemplars: Vec<Exemplar>,
}

/// The aggregated points of one metric, by shape.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricPoints {
    Sum {
        monotonic: bool,
        temporality: AggregationTemporality,
        points: Vec<NumberPoint>,
    },
    Gauge {
        points: Vec<NumberPoint>,
    },
    Histogram {
        temporality: AggregationTemporality,
        points: Vec<HistogramPoint>,
    },
}

impl MetricPoints {
    pub fn len(&self) -> usize {
        match self {
            Self::Sum { points, .. } | Self::Gauge { points } => points.len(),
            Self::Histogram { points, .. } => points.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One metric stream as produced by a collection cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricData {
    pub scope: MeterInfo,
    pub name: String,
    pub description: String,
    pub unit: String,
    pub points: MetricPoints,
}

impl MetricData {
    /// Number points (sum or gauge), empty for histograms.
    pub fn number_points(&self) -> &[NumberPoint] {
        match &self.points {
            MetricPoints::Sum { points, .. } | MetricPoints::Gauge { points } => points,
            MetricPoints::Histogram { .. } => &[],
        }
    }

    /// Histogram points, empty for sums and gauges.
    pub fn histogram_points(&self) -> &[HistogramPoint] {
        match &self.points {
            MetricPoints::Histogram { points, .. } => points,
            _ => &[],
        }
    }

    /// Temporality of the points, `None` for gauges.
    pub fn temporality(&self) -> Option<AggregationTemporality> {
        match &self.points {
            MetricPoints::Sum { temporality, .. } | MetricPoints::Histogram { temporality, .. } => {
                Some(*temporality)
            }
            MetricPoints::Gauge { .. } => None,
        }
    }
}
