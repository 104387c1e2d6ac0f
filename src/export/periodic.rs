//! Timer-driven collect-and-export.
//!
//! # Life cycle
//!
//! ```text
//!   Idle ──tick/flush──► Collecting ──► Exporting ──export settles──► Idle
//!    │                                                                 │
//!    └─────────────────────── shutdown() (terminal) ◄──────────────────┘
//! ```
//!
//! A single in-flight slot guards the pipeline. A timer tick that finds a
//! cycle in flight is dropped and reported as a failed result; it is never
//! queued. An explicit `flush()` is never dropped: it waits for the in-flight
//! cycle to settle and then runs its own.
//!
//! A dropped tick and a failed export are indistinguishable to the caller:
//! both surface as a failed [`CompletableResultCode`].
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use sdk_metrics::export::{InMemoryMetricExporter, PeriodicMetricReader};
//!
//! let exporter = Arc::new(InMemoryMetricExporter::new());
//! let reader = PeriodicMetricReader::builder(exporter.clone())
//!     .interval(Duration::from_secs(10))
//!     .build()?;
//! ```

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Handle, Runtime};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::{MetricExporter, MetricProducer, MetricReader};
use crate::collection::AggregationTemporality;
use crate::error::{MetricsError, Result};
use crate::metrics::SdkMetrics;
use crate::result::{CallbackDispatcher, CompletableResultCode};

/// Default time between exports.
pub const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Default bound on the final flush during shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Builder for [`PeriodicMetricReader`].
pub struct PeriodicMetricReaderBuilder {
    exporter: Arc<dyn MetricExporter>,
    interval: Duration,
    timeout: Duration,
    handle: Option<Handle>,
    prefix: String,
    metrics: Option<SdkMetrics>,
}

impl PeriodicMetricReaderBuilder {
    pub fn new(exporter: Arc<dyn MetricExporter>) -> Self {
        Self {
            exporter,
            interval: DEFAULT_EXPORT_INTERVAL,
            timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            handle: None,
            prefix: "sdk_metrics".to_string(),
            metrics: None,
        }
    }

    /// Time between exports. Must be positive.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Bound on the final flush performed by shutdown. Must be positive.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Drive the timer on an existing runtime instead of a dedicated one.
    pub fn runtime_handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Thread name prefix of the dedicated runtime.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Report pipeline counters into `metrics`.
    pub fn metrics(mut self, metrics: SdkMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate the configuration and create the reader.
    ///
    /// The timer starts when the reader is registered with a provider.
    pub fn build(self) -> Result<PeriodicMetricReader> {
        if self.interval.is_zero() {
            return Err(MetricsError::InvalidInterval {
                what: "export interval",
            });
        }
        if self.timeout.is_zero() {
            return Err(MetricsError::InvalidInterval {
                what: "shutdown timeout",
            });
        }

        let (runtime, handle) = match self.handle {
            Some(handle) => (None, handle),
            None => {
                let runtime = build_runtime(&self.prefix)?;
                let handle = runtime.handle().clone();
                (Some(runtime), handle)
            }
        };

        debug!(
            interval_ms = self.interval.as_millis() as u64,
            timeout_ms = self.timeout.as_millis() as u64,
            dedicated_runtime = runtime.is_some(),
            "periodic metric reader built"
        );

        Ok(PeriodicMetricReader {
            inner: Arc::new(Inner {
                exporter: self.exporter,
                interval: self.interval,
                timeout: self.timeout,
                handle,
                producer: OnceLock::new(),
                in_flight: Mutex::new(None),
                shutdown: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
                metrics: self
                    .metrics
                    .unwrap_or_else(|| SdkMetrics::with_prefix(&self.prefix)),
            }),
            runtime: Mutex::new(runtime),
        })
    }
}

fn build_runtime(prefix: &str) -> Result<Runtime> {
    let name_prefix = prefix.to_string();
    let thread_counter = AtomicUsize::new(0);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name_fn(move || {
            let id = thread_counter.fetch_add(1, Ordering::SeqCst);
            format!("{}-periodic-{:04}", name_prefix, id)
        })
        .enable_all()
        .build()?;
    Ok(runtime)
}

struct Inner {
    exporter: Arc<dyn MetricExporter>,
    interval: Duration,
    timeout: Duration,
    handle: Handle,
    producer: OnceLock<Arc<dyn MetricProducer>>,
    /// Single-flight slot: exporting is available when empty or settled
    in_flight: Mutex<Option<CompletableResultCode>>,
    shutdown: AtomicBool,
    cancel: CancellationToken,
    tracker: TaskTracker,
    metrics: SdkMetrics,
}

impl Inner {
    /// The registered provider's dispatcher, or the fallback before registration.
    fn dispatcher(&self) -> Arc<CallbackDispatcher> {
        self.producer
            .get()
            .map_or_else(CallbackDispatcher::shared, |p| p.dispatcher())
    }

    fn pending(&self) -> CompletableResultCode {
        CompletableResultCode::with_dispatcher(self.dispatcher())
    }

    fn settled(&self, success: bool) -> CompletableResultCode {
        CompletableResultCode::settled_with(self.dispatcher(), success)
    }

    /// Claim the slot and run one cycle, or hand back the cycle in flight.
    fn try_start_cycle(&self) -> std::result::Result<CompletableResultCode, CompletableResultCode> {
        let cycle = {
            let mut slot = self.in_flight.lock();
            if let Some(current) = slot.as_ref().filter(|code| !code.is_done()) {
                return Err(current.clone());
            }
            let cycle = self.pending();
            *slot = Some(cycle.clone());
            cycle
        };
        self.run_cycle(&cycle);
        Ok(cycle)
    }

    fn run_cycle(&self, cycle: &CompletableResultCode) {
        let Some(producer) = self.producer.get() else {
            warn!("periodic reader has no registered producer");
            cycle.fail();
            return;
        };

        let metrics = match producer.collect_all_metrics() {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!(%e, "metric collection failed");
                cycle.fail();
                return;
            }
        };

        let count = metrics.len();
        let exported = match panic::catch_unwind(AssertUnwindSafe(|| self.exporter.export(metrics)))
        {
            Ok(code) => code,
            Err(_) => {
                error!(metrics = count, "exporter panicked during export");
                self.settled(false)
            }
        };

        let observed = exported.clone();
        let cycle = cycle.clone();
        let sdk_metrics = self.metrics.clone();
        exported.when_complete(move || {
            let success = observed.is_success();
            sdk_metrics.record_export(success);
            if success {
                cycle.succeed();
            } else {
                warn!(metrics = count, "metric export failed");
                cycle.fail();
            }
        });
    }

    /// One timer tick: dropped when a cycle is still in flight.
    fn tick(&self) -> CompletableResultCode {
        match self.try_start_cycle() {
            Ok(cycle) => cycle,
            Err(_) => {
                self.metrics.record_dropped_tick();
                warn!(
                    interval_ms = self.interval.as_millis() as u64,
                    "previous export still in flight, dropping tick"
                );
                self.settled(false)
            }
        }
    }

    /// Run a cycle as soon as the slot frees up, settling `result` with its outcome.
    fn run_when_available(self: &Arc<Self>, result: CompletableResultCode) {
        match self.try_start_cycle() {
            Ok(cycle) => {
                cycle.propagate_to(result);
            }
            Err(in_flight) => {
                let inner = self.clone();
                in_flight.when_complete(move || inner.run_when_available(result));
            }
        }
    }

    fn start_timer(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let interval = self.interval;
        self.tracker.spawn_on(
            async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first tick completes immediately
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            let Some(inner) = weak.upgrade() else { break };
                            inner.tick();
                        }
                    }
                }
                debug!("periodic export timer stopped");
            },
            &self.handle,
        );
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "periodic export timer started"
        );
    }
}

/// Reader that collects and exports on a fixed interval.
pub struct PeriodicMetricReader {
    inner: Arc<Inner>,
    runtime: Mutex<Option<Runtime>>,
}

impl PeriodicMetricReader {
    pub fn builder(exporter: Arc<dyn MetricExporter>) -> PeriodicMetricReaderBuilder {
        PeriodicMetricReaderBuilder::new(exporter)
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    pub fn metrics(&self) -> &SdkMetrics {
        &self.inner.metrics
    }

    /// Run one collect+export cycle under the single-flight guard, the way a
    /// timer tick does.
    ///
    /// Returns a failed code without touching the exporter when a cycle is
    /// already in flight.
    pub fn collect_and_export(&self) -> CompletableResultCode {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return self.inner.settled(false);
        }
        self.inner.tick()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }
}

impl MetricReader for PeriodicMetricReader {
    fn register(&self, producer: Arc<dyn MetricProducer>) {
        if self.inner.producer.set(producer).is_err() {
            warn!("periodic reader registered more than once, ignoring");
            return;
        }
        if self.is_shutdown() {
            return;
        }
        self.inner.start_timer();
    }

    fn preferred_temporality(&self) -> AggregationTemporality {
        self.inner.exporter.preferred_temporality()
    }

    fn supported_temporality(&self) -> Vec<AggregationTemporality> {
        self.inner.exporter.supported_temporality()
    }

    fn flush(&self) -> CompletableResultCode {
        if self.is_shutdown() {
            debug!("flush requested after shutdown");
            return self.inner.settled(false);
        }

        let cycle = self.inner.pending();
        self.inner.run_when_available(cycle.clone());

        let result = self.inner.pending();
        let exporter = self.inner.exporter.clone();
        let dispatcher = self.inner.dispatcher();
        let observed = cycle.clone();
        let out = result.clone();
        cycle.when_complete(move || {
            CompletableResultCode::of_all_with(dispatcher, [observed, exporter.flush()])
                .propagate_to(out);
        });
        result
    }

    fn shutdown(&self) -> CompletableResultCode {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            warn!("periodic reader already shut down");
            return self.inner.settled(false);
        }
        self.inner.cancel.cancel();

        let final_flush = self.inner.pending();
        if self.inner.producer.get().is_some() {
            self.inner.run_when_available(final_flush.clone());
        } else {
            final_flush.succeed();
        }

        let result = self.inner.pending();
        let inner = self.inner.clone();
        let out = result.clone();
        self.inner.tracker.spawn_on(
            async move {
                let timeout_ms = inner.timeout.as_millis() as u64;
                let waited = tokio::time::timeout(inner.timeout, final_flush.completed()).await;
                let flushed = match waited {
                    Ok(success) => success,
                    Err(_) => {
                        warn!(timeout_ms, "final flush timed out");
                        false
                    }
                };

                let exporter_shutdown =
                    match panic::catch_unwind(AssertUnwindSafe(|| inner.exporter.shutdown())) {
                        Ok(code) => code,
                        Err(_) => {
                            error!("exporter panicked during shutdown");
                            inner.settled(false)
                        }
                    };
                let combined = CompletableResultCode::of_all_with(
                    inner.dispatcher(),
                    [inner.settled(flushed), exporter_shutdown],
                );
                let success = combined.completed().await;
                info!(success, "periodic metric reader shut down");
                combined.propagate_to(out);
            },
            &self.inner.handle,
        );
        self.inner.tracker.close();
        result
    }
}

impl Drop for PeriodicMetricReader {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }
    }
}

impl fmt::Debug for PeriodicMetricReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicMetricReader")
            .field("interval", &self.inner.interval)
            .field("timeout", &self.inner.timeout)
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}
