//! Per-reader temporality state shared by sync and async storages.
//!
//! Synchronous handles are drained once per collection no matter which reader
//! triggered it. The drained delta is the only copy of those measurements, so
//! it is parked for every other registered reader until that reader collects:
//!
//! ```text
//! collect(reader A)
//!   delta = drain handles
//!   for B in all_handles - {A}: B.unreported += delta
//!   A: merged = take(A.unreported) + delta
//!      cumulative -> A.last += merged, report A.last
//!      delta      -> report merged
//! ```
//!
//! Parked state is merged per attribute set, so a reader that rarely collects
//! holds at most one accumulation per attribute set. Cumulative totals drop
//! their exemplars once reported; each exemplar is exported at most once per
//! reader.
//!
//! Asynchronous observations are absolute, so each reader only remembers what
//! it last reported and derives deltas from that.

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::aggregation::{Accumulation, Aggregator};
use crate::attributes::Attributes;
use crate::collection::{AggregationTemporality, CollectionHandle, CollectionInfo};

type Accumulations = HashMap<Attributes, Accumulation>;

#[derive(Default)]
struct ReaderState {
    unreported: Accumulations,
    last: Accumulations,
    last_collection_nanos: Option<u64>,
}

/// Output of one temporal collection step.
pub(crate) struct TemporalPoints {
    pub temporality: AggregationTemporality,
    pub start_epoch_nanos: u64,
    pub accumulations: Vec<(Attributes, Accumulation)>,
}

/// Temporality the reader receives: its preference when supported, else the
/// first supported one.
pub(crate) fn select_temporality(info: &CollectionInfo) -> AggregationTemporality {
    let preferred = info.preferred_temporality();
    let supported = info.supported_temporality();
    if supported.is_empty() || supported.contains(&preferred) {
        preferred
    } else {
        supported[0]
    }
}

pub(crate) struct TemporalMetricStorage {
    aggregator: Arc<dyn Aggregator>,
    readers: Mutex<HashMap<CollectionHandle, ReaderState>>,
}

impl TemporalMetricStorage {
    pub fn new(aggregator: Arc<dyn Aggregator>) -> Self {
        Self {
            aggregator,
            readers: Mutex::new(HashMap::new()),
        }
    }

    /// Fold a freshly drained synchronous delta into `info`'s view.
    pub fn collect_delta(
        &self,
        info: &CollectionInfo,
        delta: Accumulations,
        provider_start_nanos: u64,
        epoch_nanos: u64,
    ) -> TemporalPoints {
        let temporality = select_temporality(info);
        let mut readers = self.readers.lock();

        if !delta.is_empty() {
            for handle in info.all_handles().iter() {
                if handle != info.handle() {
                    let parked = &mut readers.entry(handle).or_default().unreported;
                    for (attributes, accumulation) in &delta {
                        self.merge_into(parked, attributes, accumulation);
                    }
                }
            }
        }

        let state = readers.entry(info.handle()).or_default();
        let mut merged = mem::take(&mut state.unreported);
        for (attributes, accumulation) in &delta {
            self.merge_into(&mut merged, attributes, accumulation);
        }

        let start_epoch_nanos = match temporality {
            AggregationTemporality::Cumulative => provider_start_nanos,
            AggregationTemporality::Delta => {
                state.last_collection_nanos.unwrap_or(provider_start_nanos)
            }
        };
        state.last_collection_nanos = Some(epoch_nanos);

        let accumulations = match temporality {
            AggregationTemporality::Cumulative => {
                for (attributes, accumulation) in &merged {
                    self.merge_into(&mut state.last, attributes, accumulation);
                }
                let report: Vec<_> = state
                    .last
                    .iter()
                    .map(|(a, acc)| (a.clone(), acc.clone()))
                    .collect();
                for accumulation in state.last.values_mut() {
                    accumulation.clear_exemplars();
                }
                report
            }
            AggregationTemporality::Delta => merged.into_iter().collect(),
        };

        TemporalPoints {
            temporality,
            start_epoch_nanos,
            accumulations,
        }
    }

    /// Report absolute observations to `info`'s reader.
    pub fn collect_observed(
        &self,
        info: &CollectionInfo,
        observed: Accumulations,
        provider_start_nanos: u64,
        epoch_nanos: u64,
    ) -> TemporalPoints {
        let temporality = select_temporality(info);
        let mut readers = self.readers.lock();
        let state = readers.entry(info.handle()).or_default();

        let start_epoch_nanos = match temporality {
            AggregationTemporality::Cumulative => provider_start_nanos,
            AggregationTemporality::Delta => {
                state.last_collection_nanos.unwrap_or(provider_start_nanos)
            }
        };
        state.last_collection_nanos = Some(epoch_nanos);

        let accumulations = match temporality {
            AggregationTemporality::Cumulative => observed
                .iter()
                .map(|(a, acc)| (a.clone(), acc.clone()))
                .collect(),
            AggregationTemporality::Delta => observed
                .iter()
                .map(|(attributes, current)| {
                    let reported = match state.last.get(attributes) {
                        Some(previous) => self.aggregator.diff(previous, current),
                        None => current.clone(),
                    };
                    (attributes.clone(), reported)
                })
                .collect(),
        };
        state.last = observed;

        TemporalPoints {
            temporality,
            start_epoch_nanos,
            accumulations,
        }
    }

    fn merge_into(&self, target: &mut Accumulations, attributes: &Attributes, acc: &Accumulation) {
        match target.get_mut(attributes) {
            Some(existing) => *existing = self.aggregator.merge(existing, acc),
            None => {
                target.insert(attributes.clone(), acc.clone());
            }
        }
    }

    #[cfg(test)]
    fn parked_len(&self, handle: CollectionHandle) -> usize {
        self.readers
            .lock()
            .get(&handle)
            .map_or(0, |state| state.unreported.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::Aggregation;
    use crate::collection::{CollectionHandleSet, HandleSupplier};
    use crate::context::Context;
    use crate::data::Number;
    use crate::descriptor::{InstrumentDescriptor, InstrumentKind, InstrumentValueType};
    use crate::exemplar::ExemplarFilter;
    use crate::export::MetricReader;
    use crate::storage::testing::reader_info;

    struct Readers {
        a: CollectionInfo,
        b: CollectionInfo,
        _keep: (Arc<dyn MetricReader>, Arc<dyn MetricReader>),
    }

    fn readers(b_temporality: AggregationTemporality) -> Readers {
        let supplier = HandleSupplier::new();
        let (a, b) = (supplier.next_handle(), supplier.next_handle());
        let mut all = CollectionHandleSet::hashed();
        all.insert(a);
        all.insert(b);
        let all = Arc::new(all);
        let (info_a, reader_a) = reader_info(a, &all, AggregationTemporality::Delta);
        let (info_b, reader_b) = reader_info(b, &all, b_temporality);
        Readers {
            a: info_a,
            b: info_b,
            _keep: (reader_a, reader_b),
        }
    }

    fn sum_aggregator(filter: ExemplarFilter) -> Arc<dyn Aggregator> {
        let counter =
            InstrumentDescriptor::new("hits", InstrumentKind::Counter, InstrumentValueType::Long);
        Aggregation::Sum
            .create_aggregator(&counter, filter, 4)
            .unwrap()
            .unwrap()
    }

    fn total(points: &TemporalPoints) -> i64 {
        points
            .accumulations
            .iter()
            .map(|(_, acc)| match acc {
                Accumulation::Sum {
                    value: Number::Long(v),
                    ..
                } => *v,
                other => panic!("unexpected accumulation {other:?}"),
            })
            .sum()
    }

    /// A drained batch carrying one sampled exemplar.
    fn sampled_batch(aggregator: &Arc<dyn Aggregator>, value: i64) -> Accumulations {
        let handle = aggregator.create_handle();
        handle.record(Number::Long(value), &Attributes::empty(), &Context::root());
        let accumulation = handle.accumulate_then_reset(&Attributes::empty()).unwrap();
        HashMap::from([(Attributes::empty(), accumulation)])
    }

    #[test]
    fn test_parked_state_bounded_by_attribute_sets() {
        let r = readers(AggregationTemporality::Delta);
        let aggregator = sum_aggregator(ExemplarFilter::AlwaysOff);
        let storage = TemporalMetricStorage::new(aggregator.clone());

        for i in 0..1000u64 {
            let attributes: Attributes = [("shard", (i % 3) as i64)].into_iter().collect();
            let delta = HashMap::from([(attributes, aggregator.accumulate(Number::Long(1)))]);
            storage.collect_delta(&r.a, delta, 0, i + 1);
        }
        assert_eq!(storage.parked_len(r.b.handle()), 3);

        let points = storage.collect_delta(&r.b, HashMap::new(), 0, 2000);
        assert_eq!(points.accumulations.len(), 3);
        assert_eq!(total(&points), 1000);
        assert_eq!(storage.parked_len(r.b.handle()), 0);
    }

    #[test]
    fn test_parked_batches_keep_every_exemplar() {
        let r = readers(AggregationTemporality::Delta);
        let aggregator = sum_aggregator(ExemplarFilter::AlwaysOn);
        let storage = TemporalMetricStorage::new(aggregator.clone());

        storage.collect_delta(&r.a, sampled_batch(&aggregator, 1), 0, 1);
        storage.collect_delta(&r.a, sampled_batch(&aggregator, 2), 0, 2);

        let points = storage.collect_delta(&r.b, HashMap::new(), 0, 3);
        assert_eq!(total(&points), 3);
        let exemplars: Vec<Number> = points.accumulations[0]
            .1
            .exemplars()
            .iter()
            .map(|e| e.value)
            .collect();
        assert_eq!(exemplars, vec![Number::Long(1), Number::Long(2)]);
    }

    #[test]
    fn test_cumulative_reports_exemplars_once() {
        let r = readers(AggregationTemporality::Cumulative);
        let aggregator = sum_aggregator(ExemplarFilter::AlwaysOn);
        let storage = TemporalMetricStorage::new(aggregator.clone());

        let first = storage.collect_delta(&r.b, sampled_batch(&aggregator, 5), 0, 1);
        assert_eq!(first.accumulations[0].1.exemplars().len(), 1);

        let second = storage.collect_delta(&r.b, HashMap::new(), 0, 2);
        assert_eq!(total(&second), 5);
        assert!(second.accumulations[0].1.exemplars().is_empty());
    }
}
