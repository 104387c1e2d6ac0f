//! In-memory reader and exporter, mostly for tests and debugging.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{MetricExporter, MetricProducer, MetricReader};
use crate::collection::AggregationTemporality;
use crate::data::MetricData;
use crate::error::{MetricsError, Result};
use crate::result::{CallbackDispatcher, CompletableResultCode};

/// Pull reader collecting on demand with a fixed temporality.
///
/// # Example
///
/// ```ignore
/// let reader = Arc::new(InMemoryMetricReader::new(AggregationTemporality::Delta));
/// let provider = MeterProviderBuilder::new()
///     .register_reader(reader.clone())
///     .build()?;
/// // ... record ...
/// let metrics = reader.collect()?;
/// ```
pub struct InMemoryMetricReader {
    temporality: AggregationTemporality,
    producer: OnceLock<Arc<dyn MetricProducer>>,
    shutdown: AtomicBool,
}

impl Default for InMemoryMetricReader {
    fn default() -> Self {
        Self::new(AggregationTemporality::Cumulative)
    }
}

impl InMemoryMetricReader {
    pub fn new(temporality: AggregationTemporality) -> Self {
        Self {
            temporality,
            producer: OnceLock::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Collect everything recorded for this reader.
    ///
    /// Empty until the reader is registered; fails after shutdown.
    pub fn collect(&self) -> Result<Vec<MetricData>> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(MetricsError::AlreadyShutdown);
        }
        match self.producer.get() {
            Some(producer) => producer.collect_all_metrics(),
            None => Ok(Vec::new()),
        }
    }

    fn settled(&self, success: bool) -> CompletableResultCode {
        let dispatcher = self
            .producer
            .get()
            .map_or_else(CallbackDispatcher::shared, |p| p.dispatcher());
        CompletableResultCode::settled_with(dispatcher, success)
    }
}

impl MetricReader for InMemoryMetricReader {
    fn register(&self, producer: Arc<dyn MetricProducer>) {
        if self.producer.set(producer).is_err() {
            warn!("in-memory reader registered more than once, ignoring");
        }
    }

    fn preferred_temporality(&self) -> AggregationTemporality {
        self.temporality
    }

    fn supported_temporality(&self) -> Vec<AggregationTemporality> {
        vec![self.temporality]
    }

    fn flush(&self) -> CompletableResultCode {
        self.settled(!self.shutdown.load(Ordering::Acquire))
    }

    fn shutdown(&self) -> CompletableResultCode {
        self.settled(!self.shutdown.swap(true, Ordering::AcqRel))
    }
}

#[derive(Default)]
struct ExportTracking {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ExportTracking {
    fn begin(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_in_flight.fetch_max(now, Ordering::AcqRel);
    }

    fn end(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Exporter that keeps every batch it receives.
///
/// Failure, panics and slow exports can be switched on at run time to
/// exercise error paths.
pub struct InMemoryMetricExporter {
    temporality: AggregationTemporality,
    batches: Arc<Mutex<Vec<Vec<MetricData>>>>,
    tracking: Arc<ExportTracking>,
    fail: AtomicBool,
    panic: AtomicBool,
    delay_ms: AtomicU64,
    shutdown: AtomicBool,
}

impl Default for InMemoryMetricExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMetricExporter {
    /// A cumulative exporter.
    pub fn new() -> Self {
        Self::with_temporality(AggregationTemporality::Cumulative)
    }

    pub fn with_temporality(temporality: AggregationTemporality) -> Self {
        Self {
            temporality,
            batches: Arc::new(Mutex::new(Vec::new())),
            tracking: Arc::new(ExportTracking::default()),
            fail: AtomicBool::new(false),
            panic: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Make subsequent exports settle as failed.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::Release);
    }

    /// Make subsequent exports panic.
    pub fn set_panicking(&self, panic: bool) {
        self.panic.store(panic, Ordering::Release);
    }

    /// Settle subsequent exports only after `delay`, from a background thread.
    pub fn set_export_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::Release);
    }

    /// Every batch received so far, oldest first.
    pub fn exported_batches(&self) -> Vec<Vec<MetricData>> {
        self.batches.lock().clone()
    }

    /// The most recent batch.
    pub fn last_batch(&self) -> Option<Vec<MetricData>> {
        self.batches.lock().last().cloned()
    }

    pub fn export_count(&self) -> usize {
        self.batches.lock().len()
    }

    /// Highest number of exports observed in flight at once.
    pub fn max_concurrent_exports(&self) -> usize {
        self.tracking.max_in_flight.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.batches.lock().clear();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl MetricExporter for InMemoryMetricExporter {
    fn export(&self, metrics: Vec<MetricData>) -> CompletableResultCode {
        if self.is_shutdown() {
            debug!("export after shutdown");
            return CompletableResultCode::of_failure();
        }
        if self.panic.load(Ordering::Acquire) {
            panic!("in-memory exporter configured to panic");
        }

        self.tracking.begin();
        self.batches.lock().push(metrics);
        let success = !self.fail.load(Ordering::Acquire);
        let delay = self.delay_ms.load(Ordering::Acquire);

        if delay == 0 {
            self.tracking.end();
            return if success {
                CompletableResultCode::of_success()
            } else {
                CompletableResultCode::of_failure()
            };
        }

        let code = CompletableResultCode::new();
        let pending = code.clone();
        let tracking = self.tracking.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(delay));
            tracking.end();
            if success {
                pending.succeed();
            } else {
                pending.fail();
            }
        });
        code
    }

    fn flush(&self) -> CompletableResultCode {
        CompletableResultCode::of_success()
    }

    fn shutdown(&self) -> CompletableResultCode {
        self.shutdown.store(true, Ordering::Release);
        CompletableResultCode::of_success()
    }

    fn preferred_temporality(&self) -> AggregationTemporality {
        self.temporality
    }

    fn supported_temporality(&self) -> Vec<AggregationTemporality> {
        vec![self.temporality]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exporter_records_batches() {
        let exporter = InMemoryMetricExporter::new();
        assert!(exporter.export(Vec::new()).is_success());
        assert!(exporter.export(Vec::new()).is_success());
        assert_eq!(exporter.export_count(), 2);
        assert_eq!(exporter.max_concurrent_exports(), 1);

        exporter.set_failing(true);
        assert_eq!(exporter.export(Vec::new()).outcome(), Some(false));

        assert!(exporter.shutdown().is_success());
        assert_eq!(exporter.export(Vec::new()).outcome(), Some(false));
        assert_eq!(exporter.export_count(), 3);
    }

    #[test]
    fn test_delayed_export_settles_later() {
        let exporter = InMemoryMetricExporter::new();
        exporter.set_export_delay(Duration::from_millis(50));
        let code = exporter.export(Vec::new());
        assert!(!code.is_done());
        code.join(Duration::from_secs(5));
        assert!(code.is_success());
    }

    #[test]
    fn test_reader_before_registration_and_after_shutdown() {
        let reader = InMemoryMetricReader::new(AggregationTemporality::Delta);
        assert!(reader.collect().unwrap().is_empty());
        assert_eq!(reader.supported_temporality(), vec![AggregationTemporality::Delta]);

        assert!(reader.shutdown().is_success());
        assert!(matches!(reader.collect(), Err(MetricsError::AlreadyShutdown)));
        assert_eq!(reader.shutdown().outcome(), Some(false));
        assert_eq!(reader.flush().outcome(), Some(false));
    }
}
