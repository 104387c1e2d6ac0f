use parking_lot::Mutex;

use super::{concat_exemplars, metric_data, Accumulation, Aggregator, AggregatorHandle};
use crate::attributes::Attributes;
use crate::collection::AggregationTemporality;
use crate::context::Context;
use crate::data::{MetricData, MetricPoints, Number, NumberPoint};
use crate::descriptor::{InstrumentDescriptor, MeterInfo, MetricDescriptor};
use crate::exemplar::{
    ExemplarFilter, ExemplarReservoir, FixedSizeExemplarReservoir, NoopExemplarReservoir,
};

/// Sum of measurements, monotonic for counters and histograms.
#[derive(Debug)]
pub struct SumAggregator {
    monotonic: bool,
    filter: ExemplarFilter,
    reservoir_size: usize,
}

impl SumAggregator {
    pub fn new(
        instrument: &InstrumentDescriptor,
        filter: ExemplarFilter,
        reservoir_size: usize,
    ) -> Self {
        Self {
            monotonic: instrument.kind().is_monotonic(),
            filter,
            reservoir_size,
        }
    }

    pub fn is_monotonic(&self) -> bool {
        self.monotonic
    }
}

struct SumHandle {
    value: Mutex<Option<Number>>,
    filter: ExemplarFilter,
    reservoir: Box<dyn ExemplarReservoir>,
}

impl AggregatorHandle for SumHandle {
    fn record(&self, value: Number, attributes: &Attributes, context: &Context) {
        {
            let mut sum = self.value.lock();
            *sum = Some(sum.map_or(value, |current| current + value));
        }
        if self.filter.should_sample(context) {
            self.reservoir.offer(value, attributes, context);
        }
    }

    fn accumulate_then_reset(&self, point_attributes: &Attributes) -> Option<Accumulation> {
        let value = self.value.lock().take()?;
        Some(Accumulation::Sum {
            value,
            exemplars: self.reservoir.collect_and_reset(point_attributes),
        })
    }
}

impl Aggregator for SumAggregator {
    fn create_handle(&self) -> Box<dyn AggregatorHandle> {
        let reservoir: Box<dyn ExemplarReservoir> = match self.filter {
            ExemplarFilter::AlwaysOff => Box::new(NoopExemplarReservoir),
            _ => Box::new(FixedSizeExemplarReservoir::new(self.reservoir_size)),
        };
        Box::new(SumHandle {
            value: Mutex::new(None),
            filter: self.filter,
            reservoir,
        })
    }

    fn accumulate(&self, value: Number) -> Accumulation {
        Accumulation::Sum {
            value,
            exemplars: Vec::new(),
        }
    }

    fn merge(&self, previous: &Accumulation, current: &Accumulation) -> Accumulation {
        match (previous, current) {
            (
                Accumulation::Sum {
                    value: prev,
                    exemplars: prev_exemplars,
                },
                Accumulation::Sum { value, exemplars },
            ) => Accumulation::Sum {
                value: *prev + *value,
                exemplars: concat_exemplars(prev_exemplars, exemplars, self.reservoir_size.max(1)),
            },
            _ => current.clone(),
        }
    }

    fn diff(&self, previous: &Accumulation, current: &Accumulation) -> Accumulation {
        match (previous, current) {
            (Accumulation::Sum { value: prev, .. }, Accumulation::Sum { value, exemplars }) => {
                Accumulation::Sum {
                    value: *value - *prev,
                    exemplars: exemplars.clone(),
                }
            }
            _ => current.clone(),
        }
    }

    fn to_metric_data(
        &self,
        scope: &MeterInfo,
        descriptor: &MetricDescriptor,
        accumulations: Vec<(Attributes, Accumulation)>,
        temporality: AggregationTemporality,
        start_epoch_nanos: u64,
        epoch_nanos: u64,
    ) -> Option<MetricData> {
        let points: Vec<NumberPoint> = accumulations
            .into_iter()
            .filter_map(|(attributes, accumulation)| match accumulation {
                Accumulation::Sum { value, exemplars } => Some(NumberPoint {
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
        Some(metric_data(
            scope,
            descriptor,
            MetricPoints::Sum {
                monotonic: self.monotonic,
                temporality,
                points,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SpanContext;
    use crate::descriptor::{InstrumentKind, InstrumentValueType};

    fn aggregator(filter: ExemplarFilter) -> SumAggregator {
        SumAggregator::new(
            &InstrumentDescriptor::new("c", InstrumentKind::Counter, InstrumentValueType::Long),
            filter,
            2,
        )
    }

    #[test]
    fn test_accumulate_then_reset() {
        let agg = aggregator(ExemplarFilter::AlwaysOff);
        let handle = agg.create_handle();
        let ctx = Context::root();
        assert!(handle.accumulate_then_reset(&Attributes::empty()).is_none());

        handle.record(Number::Long(5), &Attributes::empty(), &ctx);
        handle.record(Number::Long(3), &Attributes::empty(), &ctx);
        assert_eq!(
            handle.accumulate_then_reset(&Attributes::empty()),
            Some(Accumulation::Sum {
                value: Number::Long(8),
                exemplars: vec![]
            })
        );
        assert!(handle.accumulate_then_reset(&Attributes::empty()).is_none());
    }

    #[test]
    fn test_trace_based_exemplars() {
        let agg = aggregator(ExemplarFilter::TraceBased);
        let handle = agg.create_handle();
        let sampled = Context::root().with_span(SpanContext::new([3; 16], [4; 8], true));

        handle.record(Number::Long(1), &Attributes::empty(), &Context::root());
        handle.record(Number::Long(2), &Attributes::empty(), &sampled);

        match handle.accumulate_then_reset(&Attributes::empty()) {
            Some(Accumulation::Sum { value, exemplars }) => {
                assert_eq!(value, Number::Long(3));
                assert_eq!(exemplars.len(), 1);
                assert_eq!(exemplars[0].value, Number::Long(2));
            }
            other => panic!("unexpected accumulation {other:?}"),
        }
    }

    #[test]
    fn test_merge_and_diff() {
        let agg = aggregator(ExemplarFilter::AlwaysOff);
        let five = agg.accumulate(Number::Long(5));
        let eight = agg.accumulate(Number::Long(8));
        assert_eq!(agg.merge(&five, &eight), agg.accumulate(Number::Long(13)));
        assert_eq!(agg.diff(&five, &eight), agg.accumulate(Number::Long(3)));
    }

    #[test]
    fn test_merge_keeps_newest_exemplars() {
        let agg = aggregator(ExemplarFilter::AlwaysOn);
        let handle = agg.create_handle();
        let ctx = Context::root();
        let batch = |v: i64| {
            handle.record(Number::Long(v), &Attributes::empty(), &ctx);
            handle.accumulate_then_reset(&Attributes::empty()).unwrap()
        };
        let (first, second, third) = (batch(1), batch(2), batch(3));

        let merged = agg.merge(&agg.merge(&first, &second), &third);
        let kept: Vec<Number> = merged.exemplars().iter().map(|e| e.value).collect();
        assert_eq!(kept, vec![Number::Long(2), Number::Long(3)]);
        match merged {
            Accumulation::Sum { value, .. } => assert_eq!(value, Number::Long(6)),
            other => panic!("unexpected accumulation {other:?}"),
        }
    }

    #[test]
    fn test_to_metric_data() {
        let agg = aggregator(ExemplarFilter::AlwaysOff);
        let instrument =
            InstrumentDescriptor::new("c", InstrumentKind::Counter, InstrumentValueType::Long);
        let descriptor = MetricDescriptor::from_instrument(&instrument);
        let scope = MeterInfo::new("m");

        assert!(agg
            .to_metric_data(
                &scope,
                &descriptor,
                vec![],
                AggregationTemporality::Delta,
                1,
                2
            )
            .is_none());

        let data = agg
            .to_metric_data(
                &scope,
                &descriptor,
                vec![(Attributes::empty(), agg.accumulate(Number::Long(4)))],
                AggregationTemporality::Cumulative,
                1,
                2,
            )
            .unwrap();
        assert_eq!(data.name, "c");
        assert_eq!(data.temporality(), Some(AggregationTemporality::Cumulative));
        assert_eq!(data.number_points()[0].value, Number::Long(4));
        assert_eq!(data.number_points()[0].start_epoch_nanos, 1);
        assert!(matches!(
            data.points,
            MetricPoints::Sum {
                monotonic: true,
                ..
            }
        ));
    }
}
