use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    bucket_index, concat_exemplars, metric_data, Accumulation, Aggregator, AggregatorHandle,
    HistogramAccumulation,
};
use crate::attributes::Attributes;
use crate::collection::AggregationTemporality;
use crate::context::Context;
use crate::data::{HistogramPoint, MetricData, MetricPoints, Number};
use crate::descriptor::{MeterInfo, MetricDescriptor};
use crate::exemplar::{
    ExemplarFilter, ExemplarReservoir, HistogramBucketExemplarReservoir, NoopExemplarReservoir,
};

/// Explicit-bucket histogram with count, sum, min and max.
#[derive(Debug)]
pub struct HistogramAggregator {
    boundaries: Arc<[f64]>,
    filter: ExemplarFilter,
}

impl HistogramAggregator {
    pub fn new(boundaries: Arc<[f64]>, filter: ExemplarFilter) -> Self {
        Self { boundaries, filter }
    }

    pub fn boundaries(&self) -> &[f64] {
        &self.boundaries
    }

    fn empty_state(&self) -> HistogramAccumulation {
        HistogramAccumulation {
            count: 0,
            sum: 0.0,
            min: None,
            max: None,
            counts: vec![0; self.boundaries.len() + 1],
            exemplars: Vec::new(),
        }
    }
}

struct HistogramHandle {
    boundaries: Arc<[f64]>,
    state: Mutex<HistogramAccumulation>,
    filter: ExemplarFilter,
    reservoir: Box<dyn ExemplarReservoir>,
}

impl AggregatorHandle for HistogramHandle {
    fn record(&self, value: Number, attributes: &Attributes, context: &Context) {
        let v = value.as_f64();
        if v.is_nan() {
            return;
        }
        {
            let mut state = self.state.lock();
            state.count += 1;
            state.sum += v;
            state.min = Some(state.min.map_or(v, |m| m.min(v)));
            state.max = Some(state.max.map_or(v, |m| m.max(v)));
            state.counts[bucket_index(&self.boundaries, v)] += 1;
        }
        if self.filter.should_sample(context) {
            self.reservoir.offer(value, attributes, context);
        }
    }

    fn accumulate_then_reset(&self, point_attributes: &Attributes) -> Option<Accumulation> {
        let mut taken = {
            let mut state = self.state.lock();
            if state.count == 0 {
                return None;
            }
            let buckets = state.counts.len();
            std::mem::replace(
                &mut *state,
                HistogramAccumulation {
                    count: 0,
                    sum: 0.0,
                    min: None,
                    max: None,
                    counts: vec![0; buckets],
                    exemplars: Vec::new(),
                },
            )
        };
        taken.exemplars = self.reservoir.collect_and_reset(point_attributes);
        Some(Accumulation::Histogram(taken))
    }
}

impl Aggregator for HistogramAggregator {
    fn create_handle(&self) -> Box<dyn AggregatorHandle> {
        let reservoir: Box<dyn ExemplarReservoir> = match self.filter {
            ExemplarFilter::AlwaysOff => Box::new(NoopExemplarReservoir),
            _ => Box::new(HistogramBucketExemplarReservoir::new(self.boundaries.clone())),
        };
        Box::new(HistogramHandle {
            boundaries: self.boundaries.clone(),
            state: Mutex::new(self.empty_state()),
            filter: self.filter,
            reservoir,
        })
    }

    fn accumulate(&self, value: Number) -> Accumulation {
        let v = value.as_f64();
        let mut state = self.empty_state();
        if !v.is_nan() {
            state.count = 1;
            state.sum = v;
            state.min = Some(v);
            state.max = Some(v);
            state.counts[bucket_index(&self.boundaries, v)] = 1;
        }
        Accumulation::Histogram(state)
    }

    fn merge(&self, previous: &Accumulation, current: &Accumulation) -> Accumulation {
        match (previous, current) {
            (Accumulation::Histogram(prev), Accumulation::Histogram(cur))
                if prev.counts.len() == cur.counts.len() =>
            {
                Accumulation::Histogram(HistogramAccumulation {
                    count: prev.count + cur.count,
                    sum: prev.sum + cur.sum,
                    min: merge_extreme(prev.min, cur.min, f64::min),
                    max: merge_extreme(prev.max, cur.max, f64::max),
                    counts: prev
                        .counts
                        .iter()
                        .zip(&cur.counts)
                        .map(|(a, b)| a + b)
                        .collect(),
                    exemplars: concat_exemplars(
                        &prev.exemplars,
                        &cur.exemplars,
                        self.boundaries.len() + 1,
                    ),
                })
            }
            _ => current.clone(),
        }
    }

    /// Histograms only aggregate synchronous instruments, which already
    /// produce per-cycle accumulations.
    fn diff(&self, _previous: &Accumulation, current: &Accumulation) -> Accumulation {
        current.clone()
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
        let points: Vec<HistogramPoint> = accumulations
            .into_iter()
            .filter_map(|(attributes, accumulation)| match accumulation {
                Accumulation::Histogram(h) => Some(HistogramPoint {
                    start_epoch_nanos,
                    epoch_nanos,
                    attributes,
                    count: h.count,
                    sum: h.sum,
                    min: h.min,
                    max: h.max,
                    boundaries: self.boundaries.to_vec(),
                    counts: h.counts,
                    exemplars: h.exemplars,
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
            MetricPoints::Histogram {
                temporality,
                points,
            },
        ))
    }
}

fn merge_extreme(a: Option<f64>, b: Option<f64>, pick: fn(f64, f64) -> f64) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(pick(a, b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator(filter: ExemplarFilter) -> HistogramAggregator {
        HistogramAggregator::new(Arc::from(vec![10.0, 20.0]), filter)
    }

    fn histogram(acc: Option<Accumulation>) -> HistogramAccumulation {
        match acc {
            Some(Accumulation::Histogram(h)) => h,
            other => panic!("expected histogram, got {other:?}"),
        }
    }

    #[test]
    fn test_record_buckets() {
        let agg = aggregator(ExemplarFilter::AlwaysOff);
        let handle = agg.create_handle();
        let ctx = Context::root();
        for v in [1.0, 10.0, 15.0, 20.0, 21.0, f64::NAN] {
            handle.record(Number::Double(v), &Attributes::empty(), &ctx);
        }
        let h = histogram(handle.accumulate_then_reset(&Attributes::empty()));
        assert_eq!(h.count, 5);
        assert_eq!(h.sum, 67.0);
        assert_eq!(h.min, Some(1.0));
        assert_eq!(h.max, Some(21.0));
        assert_eq!(h.counts, vec![2, 2, 1]);
        assert!(handle.accumulate_then_reset(&Attributes::empty()).is_none());
    }

    #[test]
    fn test_exemplar_per_bucket() {
        let agg = aggregator(ExemplarFilter::AlwaysOn);
        let handle = agg.create_handle();
        let ctx = Context::root();
        for v in [1, 2, 30] {
            handle.record(Number::Long(v), &Attributes::empty(), &ctx);
        }
        let h = histogram(handle.accumulate_then_reset(&Attributes::empty()));
        assert_eq!(h.exemplars.len(), 2);
    }

    #[test]
    fn test_merge() {
        let agg = aggregator(ExemplarFilter::AlwaysOff);
        let merged = agg.merge(
            &agg.accumulate(Number::Double(5.0)),
            &agg.accumulate(Number::Double(25.0)),
        );
        let h = histogram(Some(merged));
        assert_eq!(h.count, 2);
        assert_eq!(h.sum, 30.0);
        assert_eq!(h.min, Some(5.0));
        assert_eq!(h.max, Some(25.0));
        assert_eq!(h.counts, vec![1, 0, 1]);
    }
}
