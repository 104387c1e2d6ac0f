use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::temporal::TemporalMetricStorage;
use super::MetricStorage;
use crate::aggregation::{Accumulation, Aggregator};
use crate::attributes::Attributes;
use crate::collection::CollectionInfo;
use crate::context::Context;
use crate::data::{MetricData, Number};
use crate::descriptor::{MeterInfo, MetricDescriptor};
use crate::view::AttributesProcessor;

/// Storage for one metric stream of an observable instrument.
///
/// The owning meter runs the instrument callback right before collecting;
/// observations land in a per-cycle buffer that collection drains.
pub struct AsynchronousMetricStorage {
    scope: MeterInfo,
    descriptor: MetricDescriptor,
    aggregator: Arc<dyn Aggregator>,
    processor: AttributesProcessor,
    observed: Mutex<HashMap<Attributes, Accumulation>>,
    temporal: TemporalMetricStorage,
}

impl AsynchronousMetricStorage {
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
            observed: Mutex::new(HashMap::new()),
        }
    }

    /// Record an absolute observation for the current cycle.
    ///
    /// Observations whose processed attributes collide are merged by the
    /// aggregator (summed for sums, last one wins for gauges).
    pub fn record(&self, value: Number, attributes: &Attributes, context: &Context) {
        let key = self.processor.process(attributes, context);
        let accumulation = self.aggregator.accumulate(value);
        let mut observed = self.observed.lock();
        match observed.get_mut(&key) {
            Some(existing) => *existing = self.aggregator.merge(existing, &accumulation),
            None => {
                observed.insert(key, accumulation);
            }
        }
    }
}

impl fmt::Debug for AsynchronousMetricStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsynchronousMetricStorage")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl MetricStorage for AsynchronousMetricStorage {
    fn descriptor(&self) -> &MetricDescriptor {
        &self.descriptor
    }

    fn collect(
        &self,
        info: &CollectionInfo,
        provider_start_nanos: u64,
        epoch_nanos: u64,
    ) -> Option<MetricData> {
        let observed = std::mem::take(&mut *self.observed.lock());
        let points = self
            .temporal
            .collect_observed(info, observed, provider_start_nanos, epoch_nanos);
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
