//! The meter provider: owns views, readers and every metric storage.
//!
//! # Architecture
//!
//! ```text
//! MeterProvider
//!   ├── ViewRegistry            (read-only after build)
//!   ├── HandleSupplier          (one CollectionHandle per reader)
//!   ├── readers: [(MetricReader, CollectionInfo)]
//!   └── meters: MeterInfo -> MeterState
//!         ├── MetricStorageRegistry (name -> storage)
//!         └── observable callbacks
//!
//! SyncInstrument::record ──► [SynchronousMetricStorage per matching view]
//! MetricReader ──collect_all_metrics()──► ReaderProducer ──► every MeterState
//! ```
//!
//! Each reader is handed its own [`MetricProducer`] bound to its
//! [`CollectionInfo`], so a collection always knows which reader it serves
//! and which temporality that reader wants.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::aggregation::Aggregator;
use crate::attributes::Attributes;
use crate::builder::MeterProviderBuilder;
use crate::collection::{CollectionHandleSet, CollectionInfo, HandleSupplier};
use crate::config::SdkConfig;
use crate::context::Context;
use crate::data::{now_epoch_nanos, MetricData, Number};
use crate::descriptor::{InstrumentDescriptor, InstrumentValueType, MeterInfo, MetricDescriptor};
use crate::error::{MetricsError, Result};
use crate::exemplar::ExemplarFilter;
use crate::export::{MetricProducer, MetricReader};
use crate::metrics::SdkMetrics;
use crate::result::{CallbackDispatcher, CompletableResultCode};
use crate::storage::{
    AsynchronousMetricStorage, MetricStorage, MetricStorageRegistry, SynchronousMetricStorage,
};
use crate::view::{AttributesProcessor, RegisteredView, ViewRegistry};

struct RegisteredReader {
    reader: Arc<dyn MetricReader>,
    info: CollectionInfo,
}

struct ProviderShared {
    config: SdkConfig,
    views: ViewRegistry,
    handles: HandleSupplier,
    readers: Vec<RegisteredReader>,
    meters: RwLock<HashMap<MeterInfo, Arc<MeterState>>>,
    start_epoch_nanos: u64,
    reservoir_size: usize,
    metrics: SdkMetrics,
    dispatcher: Arc<CallbackDispatcher>,
    shutdown_started: AtomicBool,
    closed: Arc<AtomicBool>,
}

impl ProviderShared {
    fn collect(&self, info: &CollectionInfo) -> Result<Vec<MetricData>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(MetricsError::AlreadyShutdown);
        }

        let epoch_nanos = now_epoch_nanos();
        let meters: Vec<Arc<MeterState>> = self.meters.read().values().cloned().collect();
        let mut collected = Vec::new();
        for meter in meters {
            collected.extend(meter.collect(info, self.start_epoch_nanos, epoch_nanos));
        }

        self.metrics.record_collection();
        debug!(
            reader = %info.handle(),
            metrics = collected.len(),
            "collection complete"
        );
        Ok(collected)
    }
}

/// The [`MetricProducer`] handed to one reader.
struct ReaderProducer {
    provider: Weak<ProviderShared>,
    info: CollectionInfo,
    dispatcher: Arc<CallbackDispatcher>,
}

impl MetricProducer for ReaderProducer {
    fn collect_all_metrics(&self) -> Result<Vec<MetricData>> {
        let provider = self
            .provider
            .upgrade()
            .ok_or(MetricsError::AlreadyShutdown)?;
        provider.collect(&self.info)
    }

    fn dispatcher(&self) -> Arc<CallbackDispatcher> {
        self.dispatcher.clone()
    }
}

type ObservableCallback = Arc<dyn Fn(&ObservableMeasurement<'_>) + Send + Sync>;

#[derive(Clone)]
struct CallbackRegistration {
    instrument: InstrumentDescriptor,
    storages: Arc<[Arc<AsynchronousMetricStorage>]>,
    callback: ObservableCallback,
}

struct MeterState {
    info: MeterInfo,
    storages: MetricStorageRegistry,
    callbacks: RwLock<Vec<CallbackRegistration>>,
    /// Serializes observe-then-collect so concurrent readers don't drain each
    /// other's observations
    collect_lock: Mutex<()>,
}

impl MeterState {
    fn collect(
        &self,
        info: &CollectionInfo,
        provider_start_nanos: u64,
        epoch_nanos: u64,
    ) -> Vec<MetricData> {
        let _guard = self.collect_lock.lock();

        let callbacks = self.callbacks.read().clone();
        let context = Context::current();
        for registration in &callbacks {
            let measurement = ObservableMeasurement {
                value_type: registration.instrument.value_type(),
                storages: &registration.storages,
                context: &context,
            };
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| (registration.callback)(&measurement)));
            if outcome.is_err() {
                warn!(
                    instrument = registration.instrument.name(),
                    meter = %self.info.name(),
                    "observable callback panicked"
                );
            }
        }

        self.storages
            .storages()
            .iter()
            .filter_map(|storage| storage.collect(info, provider_start_nanos, epoch_nanos))
            .collect()
    }
}

/// Sink handed to observable instrument callbacks.
pub struct ObservableMeasurement<'a> {
    value_type: InstrumentValueType,
    storages: &'a [Arc<AsynchronousMetricStorage>],
    context: &'a Context,
}

impl ObservableMeasurement<'_> {
    /// Report the current absolute value for `attributes`.
    pub fn observe_long(&self, value: i64, attributes: &Attributes) {
        self.observe(Number::Long(value), attributes);
    }

    /// Report the current absolute value for `attributes`.
    pub fn observe_double(&self, value: f64, attributes: &Attributes) {
        self.observe(Number::Double(value), attributes);
    }

    fn observe(&self, value: Number, attributes: &Attributes) {
        let value = convert(value, self.value_type);
        for storage in self.storages {
            storage.record(value, attributes, self.context);
        }
    }
}

fn convert(value: Number, value_type: InstrumentValueType) -> Number {
    match (value, value_type) {
        (Number::Double(v), InstrumentValueType::Long) => Number::Long(v as i64),
        (Number::Long(v), InstrumentValueType::Double) => Number::Double(v as f64),
        (value, _) => value,
    }
}

struct SyncInstrumentInner {
    descriptor: InstrumentDescriptor,
    storages: Vec<Arc<SynchronousMetricStorage>>,
    needs_context: bool,
    root: Context,
    metrics: SdkMetrics,
}

/// Recording handle of a synchronous instrument.
///
/// Cheap to clone. Records into one storage per matching view.
#[derive(Clone)]
pub struct SyncInstrument {
    inner: Arc<SyncInstrumentInner>,
}

impl SyncInstrument {
    pub fn descriptor(&self) -> &InstrumentDescriptor {
        &self.inner.descriptor
    }

    /// Whether recording captures the thread's current context.
    pub fn needs_context(&self) -> bool {
        self.inner.needs_context
    }

    pub fn record_long(&self, value: i64, attributes: &Attributes) {
        self.record(Number::Long(value), attributes, None);
    }

    pub fn record_double(&self, value: f64, attributes: &Attributes) {
        self.record(Number::Double(value), attributes, None);
    }

    /// Record with an explicit context instead of the thread's current one.
    pub fn record_long_with_context(&self, value: i64, attributes: &Attributes, context: &Context) {
        self.record(Number::Long(value), attributes, Some(context));
    }

    /// Record with an explicit context instead of the thread's current one.
    pub fn record_double_with_context(
        &self,
        value: f64,
        attributes: &Attributes,
        context: &Context,
    ) {
        self.record(Number::Double(value), attributes, Some(context));
    }

    fn record(&self, value: Number, attributes: &Attributes, context: Option<&Context>) {
        let inner = &*self.inner;
        if inner.descriptor.kind().is_monotonic() && value.is_negative() {
            inner.metrics.record_dropped_measurement();
            debug!(
                instrument = inner.descriptor.name(),
                value = value.as_f64(),
                "negative value on monotonic instrument dropped"
            );
            return;
        }
        let value = convert(value, inner.descriptor.value_type());

        let captured;
        let context = match context {
            Some(context) => context,
            None if inner.needs_context => {
                captured = Context::current();
                &captured
            }
            None => &inner.root,
        };

        for storage in &inner.storages {
            storage.record(value, attributes, context);
        }
    }
}

impl fmt::Debug for SyncInstrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncInstrument")
            .field("descriptor", &self.inner.descriptor)
            .field("storages", &self.inner.storages.len())
            .finish()
    }
}

/// Registration surface of one instrumentation scope.
#[derive(Clone)]
pub struct Meter {
    provider: Arc<ProviderShared>,
    state: Arc<MeterState>,
}

impl Meter {
    pub fn info(&self) -> &MeterInfo {
        &self.state.info
    }

    /// Register a synchronous instrument.
    ///
    /// Fails when an applicable view's aggregation doesn't fit the instrument
    /// or when the metric name is taken by an incompatible registration.
    pub fn register_instrument(&self, descriptor: InstrumentDescriptor) -> Result<SyncInstrument> {
        if !descriptor.kind().is_synchronous() {
            return Err(MetricsError::InvalidInstrumentKind {
                name: descriptor.name().to_string(),
                kind: descriptor.kind(),
                expected: "a synchronous instrument",
            });
        }
        self.ensure_running()?;

        let storages = self.build_storages(&descriptor, SynchronousMetricStorage::new)?;
        let filter = self.provider.config.exemplar_filter;
        let needs_context = filter != ExemplarFilter::AlwaysOff
            || storages.iter().any(|storage| storage.uses_context());

        Ok(SyncInstrument {
            inner: Arc::new(SyncInstrumentInner {
                descriptor,
                storages,
                needs_context,
                root: Context::root(),
                metrics: self.provider.metrics.clone(),
            }),
        })
    }

    /// Register an observable instrument whose `callback` runs on every collection.
    pub fn register_observable<F>(
        &self,
        descriptor: InstrumentDescriptor,
        callback: F,
    ) -> Result<()>
    where
        F: Fn(&ObservableMeasurement<'_>) + Send + Sync + 'static,
    {
        if descriptor.kind().is_synchronous() {
            return Err(MetricsError::InvalidInstrumentKind {
                name: descriptor.name().to_string(),
                kind: descriptor.kind(),
                expected: "an observable instrument",
            });
        }
        self.ensure_running()?;

        let storages = self.build_storages(&descriptor, AsynchronousMetricStorage::new)?;
        self.state.callbacks.write().push(CallbackRegistration {
            instrument: descriptor,
            storages: storages.into(),
            callback: Arc::new(callback),
        });
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.provider.shutdown_started.load(Ordering::Acquire) {
            Err(MetricsError::AlreadyShutdown)
        } else {
            Ok(())
        }
    }

    /// Create one storage per matching view, then register them all at once
    /// so a failing view leaves nothing behind.
    fn build_storages<S, F>(
        &self,
        descriptor: &InstrumentDescriptor,
        make: F,
    ) -> Result<Vec<Arc<S>>>
    where
        S: MetricStorage + 'static,
        F: Fn(MeterInfo, MetricDescriptor, Arc<dyn Aggregator>, AttributesProcessor) -> S,
    {
        let provider = &self.provider;
        let mut candidates = Vec::new();
        for view in provider.views.find_views(descriptor, &self.state.info) {
            let aggregator = view.aggregation().create_aggregator(
                descriptor,
                provider.config.exemplar_filter,
                provider.reservoir_size,
            )?;
            let Some(aggregator) = aggregator else {
                debug!(instrument = descriptor.name(), "aggregation drop, no storage");
                continue;
            };
            candidates.push(Arc::new(make(
                self.state.info.clone(),
                MetricDescriptor::new(&view, descriptor),
                aggregator,
                view.attributes_processor().clone(),
            )));
        }

        let registered = self.state.storages.register_all(candidates)?;
        Ok(registered
            .into_iter()
            .map(|(storage, added)| {
                if added {
                    provider.metrics.storages_registered.inc();
                }
                storage
            })
            .collect())
    }
}

impl fmt::Debug for Meter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Meter")
            .field("info", &self.state.info)
            .field("storages", &self.state.storages.len())
            .finish()
    }
}

/// Owner of the whole metrics pipeline.
///
/// # Example
///
/// ```ignore
/// let reader = Arc::new(InMemoryMetricReader::new(AggregationTemporality::Cumulative));
/// let provider = MeterProvider::builder().register_reader(reader.clone()).build()?;
///
/// let counter = provider.meter(MeterInfo::new("http")).register_instrument(
///     InstrumentDescriptor::new("requests", InstrumentKind::Counter, InstrumentValueType::Long),
/// )?;
/// counter.record_long(1, &Attributes::empty());
///
/// let metrics = reader.collect()?;
/// provider.shutdown().join(Duration::from_secs(5));
/// ```
pub struct MeterProvider {
    shared: Arc<ProviderShared>,
}

impl MeterProvider {
    pub fn builder() -> MeterProviderBuilder {
        MeterProviderBuilder::new()
    }

    /// Assemble a provider from validated configuration and register its readers.
    pub(crate) fn from_parts(
        config: SdkConfig,
        views: Vec<RegisteredView>,
        readers: Vec<Arc<dyn MetricReader>>,
        metrics: SdkMetrics,
        dispatcher: Arc<CallbackDispatcher>,
    ) -> Self {
        let handles = HandleSupplier::new();
        let mut all = match config.max_readers {
            Some(max) => {
                if readers.len() > max {
                    warn!(
                        readers = readers.len(),
                        max_readers = max,
                        "more readers than max_readers"
                    );
                }
                CollectionHandleSet::with_max_index(max as u64)
            }
            None => CollectionHandleSet::hashed(),
        };
        let assigned: Vec<_> = readers
            .into_iter()
            .map(|reader| {
                let handle = handles.next_handle();
                all.insert(handle);
                (handle, reader)
            })
            .collect();
        let all = Arc::new(all);

        let registered: Vec<RegisteredReader> = assigned
            .into_iter()
            .map(|(handle, reader)| RegisteredReader {
                info: CollectionInfo::new(handle, all.clone(), &reader),
                reader,
            })
            .collect();

        let reservoir_size = config.effective_reservoir_size();
        let shared = Arc::new(ProviderShared {
            views: ViewRegistry::new(views),
            handles,
            readers: registered,
            meters: RwLock::new(HashMap::new()),
            start_epoch_nanos: now_epoch_nanos(),
            reservoir_size,
            metrics,
            dispatcher,
            shutdown_started: AtomicBool::new(false),
            closed: Arc::new(AtomicBool::new(false)),
            config,
        });

        for registered in &shared.readers {
            registered.reader.register(Arc::new(ReaderProducer {
                provider: Arc::downgrade(&shared),
                info: registered.info.clone(),
                dispatcher: shared.dispatcher.clone(),
            }));
            shared.metrics.registered_readers.inc();
            debug!(
                reader = %registered.info.handle(),
                temporality = ?registered.info.preferred_temporality(),
                "reader registered"
            );
        }

        info!(
            readers = shared.readers.len(),
            views = shared.views.len(),
            exemplar_filter = ?shared.config.exemplar_filter,
            reservoir_size,
            callback_threads = shared.dispatcher.threads(),
            "meter provider built"
        );
        Self { shared }
    }

    /// The meter for `info`, created on first use.
    pub fn meter(&self, info: MeterInfo) -> Meter {
        // Fast path: read lock
        if let Some(state) = self.shared.meters.read().get(&info) {
            return Meter {
                provider: self.shared.clone(),
                state: state.clone(),
            };
        }

        let mut meters = self.shared.meters.write();
        // Double-check after acquiring write lock
        let state = meters
            .entry(info.clone())
            .or_insert_with(|| {
                Arc::new(MeterState {
                    info,
                    storages: MetricStorageRegistry::new(),
                    callbacks: RwLock::new(Vec::new()),
                    collect_lock: Mutex::new(()),
                })
            })
            .clone();
        Meter {
            provider: self.shared.clone(),
            state,
        }
    }

    pub fn config(&self) -> &SdkConfig {
        &self.shared.config
    }

    pub fn views(&self) -> &ViewRegistry {
        &self.shared.views
    }

    pub fn metrics(&self) -> &SdkMetrics {
        &self.shared.metrics
    }

    pub fn reader_count(&self) -> usize {
        self.shared.readers.len()
    }

    /// Pool running the callbacks of this provider's result codes.
    pub fn dispatcher(&self) -> &Arc<CallbackDispatcher> {
        &self.shared.dispatcher
    }

    /// Flush every reader; succeeds only if all succeed.
    pub fn flush(&self) -> CompletableResultCode {
        let dispatcher = self.shared.dispatcher.clone();
        if self.shared.shutdown_started.load(Ordering::Acquire) {
            return CompletableResultCode::settled_with(dispatcher, false);
        }
        let flushes = self.shared.readers.iter().map(|r| r.reader.flush());
        CompletableResultCode::of_all_with(dispatcher, flushes)
    }

    /// Shut down every reader. Collections fail once the returned code settles.
    ///
    /// A second call returns a failed code.
    pub fn shutdown(&self) -> CompletableResultCode {
        if self.shared.shutdown_started.swap(true, Ordering::AcqRel) {
            warn!("meter provider already shut down");
            return CompletableResultCode::settled_with(self.shared.dispatcher.clone(), false);
        }

        let dispatcher = self.shared.dispatcher.clone();
        let shutdowns = self.shared.readers.iter().map(|r| r.reader.shutdown());
        let combined = CompletableResultCode::of_all_with(dispatcher.clone(), shutdowns);
        let result = CompletableResultCode::with_dispatcher(dispatcher);
        let closed = self.shared.closed.clone();
        let observed = combined.clone();
        let out = result.clone();
        combined.when_complete(move || {
            closed.store(true, Ordering::Release);
            let success = observed.is_success();
            info!(success, "meter provider shut down");
            if success {
                out.succeed();
            } else {
                out.fail();
            }
        });
        result
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown_started.load(Ordering::Acquire)
    }
}

impl fmt::Debug for MeterProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeterProvider")
            .field("readers", &self.shared.readers.len())
            .field("views", &self.shared.views.len())
            .field("meters", &self.shared.meters.read().len())
            .field("handles", &self.shared.handles)
            .finish()
    }
}
