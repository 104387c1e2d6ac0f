//! Metric storage: where measurements live between collections.
//!
//! Each (instrument, view) pair gets one storage. Synchronous instruments
//! write into [`SynchronousMetricStorage`] on the recording thread;
//! observable instruments write into [`AsynchronousMetricStorage`] from their
//! callback during collection. Both share the per-reader temporality logic,
//! so any number of readers can collect the same storage with their own
//! cumulative or delta view.

mod asynchronous;
mod registry;
mod synchronous;
mod temporal;

pub use asynchronous::AsynchronousMetricStorage;
pub use registry::MetricStorageRegistry;
pub use synchronous::SynchronousMetricStorage;

use crate::collection::CollectionInfo;
use crate::data::MetricData;
use crate::descriptor::MetricDescriptor;

/// One metric stream's state, collectable per reader.
pub trait MetricStorage: Send + Sync {
    fn descriptor(&self) -> &MetricDescriptor;

    /// Produce this stream's data for `info`'s reader.
    ///
    /// Returns `None` when there is nothing to report.
    fn collect(
        &self,
        info: &CollectionInfo,
        provider_start_nanos: u64,
        epoch_nanos: u64,
    ) -> Option<MetricData>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use crate::collection::{
        AggregationTemporality, CollectionHandle, CollectionHandleSet, CollectionInfo,
    };
    use crate::export::{MetricProducer, MetricReader};
    use crate::result::CompletableResultCode;

    /// Reader that only reports a temporality preference.
    pub struct FixedTemporalityReader(pub AggregationTemporality);

    impl MetricReader for FixedTemporalityReader {
        fn register(&self, _producer: Arc<dyn MetricProducer>) {}

        fn preferred_temporality(&self) -> AggregationTemporality {
            self.0
        }

        fn flush(&self) -> CompletableResultCode {
            CompletableResultCode::of_success()
        }

        fn shutdown(&self) -> CompletableResultCode {
            CompletableResultCode::of_success()
        }
    }

    /// Collection info for a stub reader; keep the returned reader alive.
    pub fn reader_info(
        handle: CollectionHandle,
        all: &Arc<CollectionHandleSet>,
        temporality: AggregationTemporality,
    ) -> (CollectionInfo, Arc<dyn MetricReader>) {
        let reader: Arc<dyn MetricReader> = Arc::new(FixedTemporalityReader(temporality));
        (CollectionInfo::new(handle, all.clone(), &reader), reader)
    }
}
