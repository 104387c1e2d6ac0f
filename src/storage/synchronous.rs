use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::temporal::TemporalMetricStorage;
use super::MetricStorage;
use crate::aggregation::{Aggregator, AggregatorHandle};
use crate::attributes::Attributes;
use crate::collection::CollectionInfo;
use crate::context::Context;
use crate::data::{MetricData, Number};
use crate::descriptor::{MeterInfo, MetricDescriptor};
use crate::view::AttributesProcessor;

/// Storage for one metric stream of a synchronous instrument.
///
/// Holds one aggregator handle per processed attribute set. Handles are
/// created on first use and live as long as the storage.
pub struct SynchronousMetricStorage {
    scope: MeterInfo,
    descriptor: MetricDescriptor,
    aggregator: Arc<dyn Aggregator>,
    processor: AttributesProcessor,
    handles: RwLock<HashMap<Attributes, Arc<dyn AggregatorHandle>>>,
    temporal: TemporalMetricStorage,
}

impl SynchronousMetricStorage {
    pub fn new(
        scope: MeterInfo,
        descriptor: MetricDescriptor,
        aggregator: Arc<dyn Aggregator>,
        processor: AttributesProcessor,
    ) -> Self {
        Self {
            scope,
            descriptor,
            temporal: TemporalMetricStorage::new(aggregator.clone()),
            aggregator,
            processor,
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Whether recording needs the caller's context.
    pub fn uses_context(&self) -> bool {
        self.processor.uses_context()
    }

    pub fn record(&self, value: Number, attributes: &Attributes, context: &Context) {
        let key = self.processor.process(attributes, context);
        self.handle(key).record(value, attributes, context);
    }

    fn handle(&self, key: Attributes) -> Arc<dyn AggregatorHandle> {
        // Fast path: read lock
        if let Some(handle) = self.handles.read().get(&key) {
            return handle.clone();
        }

        let mut handles = self.handles.write();
        // Double-check after acquiring write lock
        handles
            .entry(key)
            .or_insert_with(|| Arc::from(self.aggregator.create_handle()))
            .clone()
    }
}

impl MetricStorage for SynchronousMetricStorage {
    fn descriptor(&self) -> &MetricDescriptor {
        &self.descriptor
    }

    fn collect(
        &self,
        info: &CollectionInfo,
        provider_start_nanos: u64,
        epoch_nanos: u64,
    ) -> Option<MetricData> {
        let delta: HashMap<_, _> = self
            .handles
            .read()
            .iter()
            .filter_map(|(attributes, handle)| {
                handle
                    .accumulate_then_reset(attributes)
                    .map(|acc| (attributes.clone(), acc))
            })
            .collect();

        let points = self
            .temporal
            .collect_delta(info, delta, provider_start_nanos, epoch_nanos);
        self.aggregator.to_metric_data(
            &self.scope,
            &self.descriptor,
            points.accumulations,
            points.temporality,
            points.start_epoch_nanos,
            epoch_nanos,
        )
    }
}

impl fmt::Debug for SynchronousMetricStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynchronousMetricStorage")
            .field("descriptor", &self.descriptor)
            .field("handles", &self.handles.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::Aggregation;
    use crate::collection::{AggregationTemporality, CollectionHandleSet, HandleSupplier};
    use crate::descriptor::{InstrumentDescriptor, InstrumentKind, InstrumentValueType};
    use crate::exemplar::ExemplarFilter;
    use crate::storage::testing::reader_info;

    fn counter_storage(processor: AttributesProcessor) -> SynchronousMetricStorage {
        let instrument =
            InstrumentDescriptor::new("hits", InstrumentKind::Counter, InstrumentValueType::Long);
        let aggregator = Aggregation::Sum
            .create_aggregator(&instrument, ExemplarFilter::AlwaysOff, 1)
            .unwrap()
            .unwrap();
        SynchronousMetricStorage::new(
            MeterInfo::new("m"),
            MetricDescriptor::from_instrument(&instrument),
            aggregator,
            processor,
        )
    }

    fn sum_of(data: &MetricData) -> i64 {
        data.number_points()
            .iter()
            .map(|p| match p.value {
                Number::Long(v) => v,
                Number::Double(v) => v as i64,
            })
            .sum()
    }

    #[test]
    fn test_two_readers_see_independent_temporality() {
        let supplier = HandleSupplier::new();
        let (a, b) = (supplier.next_handle(), supplier.next_handle());
        let mut all = CollectionHandleSet::with_max_index(4);
        all.insert(a);
        all.insert(b);
        let all = Arc::new(all);
        let (info_a, _reader_a) = reader_info(a, &all, AggregationTemporality::Cumulative);
        let (info_b, _reader_b) = reader_info(b, &all, AggregationTemporality::Delta);

        let storage = counter_storage(AttributesProcessor::noop());
        let ctx = Context::root();

        storage.record(Number::Long(5), &Attributes::empty(), &ctx);
        assert_eq!(sum_of(&storage.collect(&info_a, 0, 1).unwrap()), 5);
        assert_eq!(sum_of(&storage.collect(&info_b, 0, 1).unwrap()), 5);

        storage.record(Number::Long(3), &Attributes::empty(), &ctx);
        assert_eq!(sum_of(&storage.collect(&info_a, 0, 2).unwrap()), 8);
        let b_second = storage.collect(&info_b, 0, 2).unwrap();
        assert_eq!(sum_of(&b_second), 3);
        assert_eq!(b_second.number_points()[0].start_epoch_nanos, 1);
    }

    #[test]
    fn test_delta_reader_with_nothing_new_reports_nothing() {
        let supplier = HandleSupplier::new();
        let handle = supplier.next_handle();
        let mut all = CollectionHandleSet::hashed();
        all.insert(handle);
        let all = Arc::new(all);
        let (info, _reader) = reader_info(handle, &all, AggregationTemporality::Delta);

        let storage = counter_storage(AttributesProcessor::noop());
        storage.record(Number::Long(1), &Attributes::empty(), &Context::root());
        assert!(storage.collect(&info, 0, 1).is_some());
        assert!(storage.collect(&info, 0, 2).is_none());
    }

    #[test]
    fn test_processor_merges_attribute_sets() {
        let supplier = HandleSupplier::new();
        let handle = supplier.next_handle();
        let mut all = CollectionHandleSet::hashed();
        all.insert(handle);
        let all = Arc::new(all);
        let (info, _reader) = reader_info(handle, &all, AggregationTemporality::Cumulative);

        let storage = counter_storage(AttributesProcessor::filter_by_key_name(|k| k == "route"));
        let ctx = Context::root();
        let a: Attributes = [("route", "/a"), ("user", "1")].into_iter().collect();
        let b: Attributes = [("route", "/a"), ("user", "2")].into_iter().collect();
        storage.record(Number::Long(1), &a, &ctx);
        storage.record(Number::Long(2), &b, &ctx);

        let data = storage.collect(&info, 0, 1).unwrap();
        assert_eq!(data.number_points().len(), 1);
        assert_eq!(sum_of(&data), 3);
        assert_eq!(
            data.number_points()[0].attributes,
            [("route", "/a")].into_iter().collect::<Attributes>()
        );
    }

    #[test]
    fn test_debug_shows_descriptor_and_handles() {
        let storage = counter_storage(AttributesProcessor::noop());
        storage.record(Number::Long(1), &Attributes::empty(), &Context::root());
        let rendered = format!("{storage:?}");
        assert!(rendered.contains("hits"));
        assert!(rendered.contains("handles: 1"));
    }
}
