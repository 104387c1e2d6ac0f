use parking_lot::Mutex;

use super::{metric_data, Accumulation, Aggregator, AggregatorHandle};
use crate::attributes::Attributes;
use crate::collection::AggregationTemporality;
use crate::context::Context;
use crate::data::{MetricData, MetricPoints, Number, NumberPoint};
use crate::descriptor::{MeterInfo, MetricDescriptor};

/// Most recent value per attribute set, exported as a gauge.
///
/// Exemplars are never sampled for this aggregation.
#[derive(Debug, Default)]
pub struct LastValueAggregator;

struct LastValueHandle {
    value: Mutex<Option<Number>>,
}

impl AggregatorHandle for LastValueHandle {
    fn record(&self, value: Number, _attributes: &Attributes, _context: &Context) {
        *self.value.lock() = Some(value);
    }

    fn accumulate_then_reset(&self, _point_attributes: &Attributes) -> Option<Accumulation> {
        self.value.lock().take().map(|value| Accumulation::LastValue {
            value,
            exemplars: Vec::new(),
        })
    }
}

impl Aggregator for LastValueAggregator {
    fn create_handle(&self) -> Box<dyn AggregatorHandle> {
        Box::new(LastValueHandle {
            value: Mutex::new(None),
        })
    }

    fn accumulate(&self, value: Number) -> Accumulation {
        Accumulation::LastValue {
            value,
            exemplars: Vec::new(),
        }
    }

    fn merge(&self, _previous: &Accumulation, current: &Accumulation) -> Accumulation {
        current.clone()
    }

    fn diff(&self, _previous: &Accumulation, current: &Accumulation) -> Accumulation {
        current.clone()
    }

    fn to_metric_data(
        &self,
        scope: &MeterInfo,
        descriptor: &MetricDescriptor,
        accumulations: Vec<(Attributes, Accumulation)>,
        _temporality: AggregationTemporality,
        start_epoch_nanos: u64,
        epoch_nanos: u64,
    ) -> Option<MetricData> {
        let points: Vec<NumberPoint> = accumulations
            .into_iter()
            .filter_map(|(attributes, accumulation)| match accumulation {
                Accumulation::LastValue { value, exemplars } => Some(NumberPoint {
                    start_epoch_nanos,
                    epoch_nanos,
                    attributes,
                    value,
                    exemplars,
                }),
                _ => None,
            })
            .collect();
        if points.is_empty() {
            return None;
        }
        Some(metric_data(scope, descriptor, MetricPoints::Gauge { points }))
    }
}
