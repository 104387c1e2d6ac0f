//! Integration tests for exemplar sampling.

use std::sync::Arc;

use sdk_metrics::exemplar::{ExemplarReservoir, FixedSizeExemplarReservoir};
use sdk_metrics::view::AttributesProcessor;
use sdk_metrics::{
    Attributes, Context, ExemplarFilter, InMemoryMetricReader, InstrumentDescriptor,
    InstrumentKind, InstrumentSelector, InstrumentValueType, MeterInfo, MeterProviderBuilder,
    Number, SpanContext, View,
};

/// Every measurement of a cycle is retained with probability k / M
#[test]
fn test_fixed_size_reservoir_is_uniform() {
    const K: usize = 4;
    const M: usize = 20;
    const TRIALS: usize = 10_000;

    let reservoir = FixedSizeExemplarReservoir::with_seed(K, 0x5eed);
    let attrs = Attributes::empty();
    let context = Context::root();
    let mut hits = [0usize; M];

    for _ in 0..TRIALS {
        for i in 0..M {
            reservoir.offer(Number::Long(i as i64), &attrs, &context);
        }
        let sampled = reservoir.collect_and_reset(&attrs);
        assert_eq!(sampled.len(), K);
        for exemplar in sampled {
            match exemplar.value {
                Number::Long(i) => hits[i as usize] += 1,
                Number::Double(_) => unreachable!(),
            }
        }
    }

    let expected = TRIALS * K / M;
    for (value, &count) in hits.iter().enumerate() {
        assert!(
            count.abs_diff(expected) < expected / 8,
            "value {value} retained {count} times, expected about {expected}"
        );
    }
}

/// Histogram exemplars keep one per bucket and carry the attributes the view dropped
#[test_log::test]
fn test_histogram_exemplars_through_provider() {
    let reader = Arc::new(InMemoryMetricReader::default());
    let provider = MeterProviderBuilder::new()
        .exemplar_filter(ExemplarFilter::AlwaysOn)
        .register_view(
            InstrumentSelector::builder(InstrumentKind::Histogram).build(),
            View::builder()
                .attributes_processor(AttributesProcessor::filter_by_key_name(|k| {
                    k == "route"
                }))
                .build(),
        )
        .register_reader(reader.clone())
        .build()
        .unwrap();

    let latency = provider
        .meter(MeterInfo::new("http"))
        .register_instrument(InstrumentDescriptor::new(
            "latency",
            InstrumentKind::Histogram,
            InstrumentValueType::Double,
        ))
        .unwrap();

    let attrs: Attributes = [("route", "/"), ("user", "42")].into_iter().collect();
    let span = SpanContext::new([7; 16], [9; 8], true);
    let _guard = Context::root().with_span(span).attach();
    latency.record_double(1.0, &attrs);
    latency.record_double(2.0, &attrs);
    latency.record_double(7.0, &attrs);
    latency.record_double(50.0, &attrs);

    let metrics = reader.collect().unwrap();
    let point = &metrics[0].histogram_points()[0];
    assert_eq!(point.count, 4);
    let route_only: Attributes = [("route", "/")].into_iter().collect();
    assert_eq!(point.attributes, route_only);

    let mut values: Vec<f64> = point.exemplars.iter().map(|e| e.value.as_f64()).collect();
    values.sort_by(f64::total_cmp);
    assert_eq!(values, vec![2.0, 7.0, 50.0]);

    let user_only: Attributes = [("user", "42")].into_iter().collect();
    for exemplar in &point.exemplars {
        assert_eq!(exemplar.filtered_attributes, user_only);
        assert_eq!(exemplar.span_context, Some(span));
    }
}

/// Trace-based sampling ignores measurements outside a sampled span
#[test]
fn test_trace_based_filter_skips_unsampled() {
    let reader = Arc::new(InMemoryMetricReader::default());
    let provider = MeterProviderBuilder::new()
        .exemplar_filter(ExemplarFilter::TraceBased)
        .register_reader(reader.clone())
        .build()
        .unwrap();
    let counter = provider
        .meter(MeterInfo::new("m"))
        .register_instrument(InstrumentDescriptor::new(
            "c",
            InstrumentKind::Counter,
            InstrumentValueType::Long,
        ))
        .unwrap();

    counter.record_long(1, &Attributes::empty());
    let unsampled = SpanContext::new([1; 16], [1; 8], false);
    counter.record_long_with_context(
        1,
        &Attributes::empty(),
        &Context::root().with_span(unsampled),
    );

    let metrics = reader.collect().unwrap();
    assert!(metrics[0].number_points()[0].exemplars.is_empty());
}
