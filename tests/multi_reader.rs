//! Integration tests for several readers sharing one provider.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use sdk_metrics::{
    AggregationTemporality, Attributes, InMemoryMetricReader, InstrumentDescriptor,
    InstrumentKind, InstrumentValueType, MeterInfo, MeterProvider, MeterProviderBuilder, Number,
    SyncInstrument,
};

fn two_readers() -> (
    MeterProvider,
    Arc<InMemoryMetricReader>,
    Arc<InMemoryMetricReader>,
) {
    let cumulative = Arc::new(InMemoryMetricReader::new(AggregationTemporality::Cumulative));
    let delta = Arc::new(InMemoryMetricReader::new(AggregationTemporality::Delta));
    let provider = MeterProviderBuilder::new()
        .register_reader(cumulative.clone())
        .register_reader(delta.clone())
        .build()
        .unwrap();
    (provider, cumulative, delta)
}

fn counter(provider: &MeterProvider) -> SyncInstrument {
    provider
        .meter(MeterInfo::new("multi"))
        .register_instrument(InstrumentDescriptor::new(
            "requests",
            InstrumentKind::Counter,
            InstrumentValueType::Long,
        ))
        .unwrap()
}

fn single_value(reader: &InMemoryMetricReader) -> Option<Number> {
    let metrics = reader.collect().unwrap();
    metrics
        .first()
        .and_then(|m| m.number_points().first())
        .map(|p| p.value)
}

/// Cumulative and delta readers each see their own view of one counter
#[test_log::test]
fn test_cumulative_and_delta_readers() {
    let (provider, cumulative, delta) = two_readers();
    let requests = counter(&provider);
    let attrs = Attributes::empty();

    requests.record_long(5, &attrs);
    assert_eq!(single_value(&cumulative), Some(Number::Long(5)));
    assert_eq!(single_value(&delta), Some(Number::Long(5)));

    requests.record_long(3, &attrs);
    assert_eq!(single_value(&cumulative), Some(Number::Long(8)));
    assert_eq!(single_value(&delta), Some(Number::Long(3)));
}

/// A reader that skips a cycle still receives measurements drained by another
#[test]
fn test_interleaved_collections_lose_nothing() {
    let (provider, cumulative, delta) = two_readers();
    let requests = counter(&provider);
    let attrs: Attributes = [("route", "/")].into_iter().collect();

    requests.record_long(5, &attrs);
    assert_eq!(single_value(&cumulative), Some(Number::Long(5)));

    requests.record_long(3, &attrs);
    assert_eq!(single_value(&cumulative), Some(Number::Long(8)));
    assert_eq!(single_value(&delta), Some(Number::Long(8)));

    // Nothing new: delta reports no points, cumulative keeps its total
    assert_eq!(single_value(&delta), None);
    assert_eq!(single_value(&cumulative), Some(Number::Long(8)));
}

/// Delta points start where the previous collection ended
#[test]
fn test_delta_start_times_advance() {
    let (provider, cumulative, delta) = two_readers();
    let requests = counter(&provider);

    requests.record_long(1, &Attributes::empty());
    let first = delta.collect().unwrap();
    let first_point = first[0].number_points()[0].clone();

    requests.record_long(1, &Attributes::empty());
    let second = delta.collect().unwrap();
    let second_point = second[0].number_points()[0].clone();
    assert_eq!(second_point.start_epoch_nanos, first_point.epoch_nanos);

    let total = cumulative.collect().unwrap();
    assert_eq!(
        total[0].number_points()[0].start_epoch_nanos,
        first_point.start_epoch_nanos
    );
    assert_eq!(total[0].temporality(), Some(AggregationTemporality::Cumulative));
}

/// Observable sums report absolute values cumulatively and differences as deltas
#[test]
fn test_observable_sum_per_reader() {
    let (provider, cumulative, delta) = two_readers();
    let level = Arc::new(AtomicI64::new(10));
    let observed = level.clone();
    provider
        .meter(MeterInfo::new("multi"))
        .register_observable(
            InstrumentDescriptor::new(
                "bytes.sent",
                InstrumentKind::ObservableSum,
                InstrumentValueType::Long,
            ),
            move |m| m.observe_long(observed.load(Ordering::SeqCst), &Attributes::empty()),
        )
        .unwrap();

    assert_eq!(single_value(&cumulative), Some(Number::Long(10)));
    assert_eq!(single_value(&delta), Some(Number::Long(10)));

    level.store(15, Ordering::SeqCst);
    assert_eq!(single_value(&cumulative), Some(Number::Long(15)));
    assert_eq!(single_value(&delta), Some(Number::Long(5)));
}

/// Concurrent recording from many threads is never lost across readers
#[test]
fn test_concurrent_recording() {
    let (provider, cumulative, delta) = two_readers();
    let requests = counter(&provider);

    let threads: Vec<_> = (0..4)
        .map(|t| {
            let requests = requests.clone();
            std::thread::spawn(move || {
                let attrs: Attributes = [("thread", t as i64)].into_iter().collect();
                for _ in 0..1000 {
                    requests.record_long(1, &attrs);
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    let sum = |reader: &InMemoryMetricReader| -> f64 {
        reader.collect().unwrap()[0]
            .number_points()
            .iter()
            .map(|p| p.value.as_f64())
            .sum()
    };
    assert_eq!(sum(&cumulative), 4000.0);
    assert_eq!(sum(&delta), 4000.0);
}
