//! Reservoir algorithms retaining representative measurements.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::aggregation::bucket_index;
use crate::attributes::Attributes;
use crate::context::{Context, SpanContext};
use crate::data::{now_epoch_nanos, Exemplar, Number};

/// Storage for sampled exemplars within one aggregation cycle.
pub trait ExemplarReservoir: Send + Sync + fmt::Debug {
    /// Offer a measurement that passed the exemplar filter.
    fn offer(&self, value: Number, attributes: &Attributes, context: &Context);

    /// Drain the retained exemplars and reset for the next cycle.
    ///
    /// Exemplar attributes are reduced to those not present in `point_attributes`.
    fn collect_and_reset(&self, point_attributes: &Attributes) -> Vec<Exemplar>;
}

/// One retained measurement.
#[derive(Clone, Debug)]
struct Cell {
    value: Number,
    attributes: Attributes,
    epoch_nanos: u64,
    span_context: Option<SpanContext>,
}

impl Cell {
    fn capture(value: Number, attributes: &Attributes, context: &Context) -> Self {
        Self {
            value,
            attributes: attributes.clone(),
            epoch_nanos: now_epoch_nanos(),
            span_context: context.span().filter(|s| s.is_valid()).copied(),
        }
    }

    fn into_exemplar(self, point_attributes: &Attributes) -> Exemplar {
        Exemplar {
            filtered_attributes: self
                .attributes
                .filter_keys(|k| !point_attributes.contains_key(k)),
            epoch_nanos: self.epoch_nanos,
            value: self.value,
            span_context: self.span_context,
        }
    }
}

fn drain(slots: &mut [Option<Cell>], point_attributes: &Attributes) -> Vec<Exemplar> {
    slots
        .iter_mut()
        .filter_map(Option::take)
        .map(|cell| cell.into_exemplar(point_attributes))
        .collect()
}

/// Reservoir that never retains anything.
#[derive(Debug, Default)]
pub struct NoopExemplarReservoir;

impl ExemplarReservoir for NoopExemplarReservoir {
    fn offer(&self, _value: Number, _attributes: &Attributes, _context: &Context) {}

    fn collect_and_reset(&self, _point_attributes: &Attributes) -> Vec<Exemplar> {
        Vec::new()
    }
}

struct FixedSizeState {
    slots: Vec<Option<Cell>>,
    /// Measurements offered since the last reset
    count: u64,
    rng: SmallRng,
}

/// Uniform sample of `k` measurements over everything offered since the last reset.
///
/// Classic reservoir sampling: the first `k` offers fill the slots in order;
/// for the c-th offer after that, draw `r` uniformly in `[0, c)` and replace
/// slot `r` when `r < k`. Each of `M` offered measurements ends up retained
/// with probability `k / M`, independent of stream length. Resetting zeroes
/// the count so the next cycle starts with full sampling probability.
pub struct FixedSizeExemplarReservoir {
    state: Mutex<FixedSizeState>,
    size: usize,
}

impl FixedSizeExemplarReservoir {
    /// A reservoir of `size` slots seeded from OS entropy.
    pub fn new(size: usize) -> Self {
        Self::with_rng(size, SmallRng::from_entropy())
    }

    /// A reservoir using a deterministic seed.
    pub fn with_seed(size: usize, seed: u64) -> Self {
        Self::with_rng(size, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(size: usize, rng: SmallRng) -> Self {
        let size = size.max(1);
        Self {
            state: Mutex::new(FixedSizeState {
                slots: vec![None; size],
                count: 0,
                rng,
            }),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl ExemplarReservoir for FixedSizeExemplarReservoir {
    fn offer(&self, value: Number, attributes: &Attributes, context: &Context) {
        let mut state = self.state.lock();
        let seen = state.count;
        let count = seen + 1;
        state.count = count;

        let slot = if (seen as usize) < self.size {
            seen as usize
        } else {
            let r = state.rng.gen_range(0..count);
            if r >= self.size as u64 {
                return;
            }
            r as usize
        };
        state.slots[slot] = Some(Cell::capture(value, attributes, context));
    }

    fn collect_and_reset(&self, point_attributes: &Attributes) -> Vec<Exemplar> {
        let mut state = self.state.lock();
        state.count = 0;
        drain(&mut state.slots, point_attributes)
    }
}

impl fmt::Debug for FixedSizeExemplarReservoir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedSizeExemplarReservoir")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// One slot per histogram bucket; each measurement replaces its bucket's exemplar.
///
/// Most recent wins, no random sampling. Uses the same bucket convention as
/// the histogram aggregation.
pub struct HistogramBucketExemplarReservoir {
    boundaries: Arc<[f64]>,
    slots: Mutex<Vec<Option<Cell>>>,
}

impl HistogramBucketExemplarReservoir {
    pub fn new(boundaries: Arc<[f64]>) -> Self {
        let buckets = boundaries.len() + 1;
        Self {
            boundaries,
            slots: Mutex::new(vec![None; buckets]),
        }
    }
}

impl ExemplarReservoir for HistogramBucketExemplarReservoir {
    fn offer(&self, value: Number, attributes: &Attributes, context: &Context) {
        let index = bucket_index(&self.boundaries, value.as_f64());
        self.slots.lock()[index] = Some(Cell::capture(value, attributes, context));
    }

    fn collect_and_reset(&self, point_attributes: &Attributes) -> Vec<Exemplar> {
        drain(&mut self.slots.lock(), point_attributes)
    }
}

impl fmt::Debug for HistogramBucketExemplarReservoir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistogramBucketExemplarReservoir")
            .field("boundaries", &self.boundaries)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    fn values(exemplars: &[Exemplar]) -> Vec<i64> {
        let mut v: Vec<i64> = exemplars
            .iter()
            .map(|e| match e.value {
                Number::Long(v) => v,
                Number::Double(v) => v as i64,
            })
            .collect();
        v.sort_unstable();
        v
    }

    #[test]
    fn test_fixed_size_fills_before_sampling() {
        let reservoir = FixedSizeExemplarReservoir::with_seed(3, 7);
        let ctx = Context::root();
        for i in 0..3 {
            reservoir.offer(Number::Long(i), &Attributes::empty(), &ctx);
        }
        let exemplars = reservoir.collect_and_reset(&Attributes::empty());
        assert_eq!(values(&exemplars), vec![0, 1, 2]);
    }

    #[test]
    fn test_fixed_size_never_exceeds_capacity() {
        let reservoir = FixedSizeExemplarReservoir::with_seed(4, 1);
        let ctx = Context::root();
        for i in 0..1000 {
            reservoir.offer(Number::Long(i), &Attributes::empty(), &ctx);
        }
        assert_eq!(reservoir.collect_and_reset(&Attributes::empty()).len(), 4);
        assert!(reservoir.collect_and_reset(&Attributes::empty()).is_empty());
    }

    #[test]
    fn test_fixed_size_reset_restores_sampling() {
        let reservoir = FixedSizeExemplarReservoir::with_seed(1, 3);
        let ctx = Context::root();
        for i in 0..100 {
            reservoir.offer(Number::Long(i), &Attributes::empty(), &ctx);
        }
        reservoir.collect_and_reset(&Attributes::empty());

        // Count restarts at zero, so the first offer of the new cycle always lands.
        reservoir.offer(Number::Long(500), &Attributes::empty(), &ctx);
        let exemplars = reservoir.collect_and_reset(&Attributes::empty());
        assert_eq!(values(&exemplars), vec![500]);
    }

    #[test]
    fn test_exemplar_attributes_filtered_against_point() {
        let reservoir = FixedSizeExemplarReservoir::with_seed(1, 0);
        let span = SpanContext::new([9; 16], [8; 8], true);
        let ctx = Context::root().with_span(span);
        reservoir.offer(
            Number::Double(1.5),
            &attrs(&[("route", "/a"), ("user", "u1")]),
            &ctx,
        );

        let exemplars = reservoir.collect_and_reset(&attrs(&[("route", "/a")]));
        assert_eq!(exemplars.len(), 1);
        assert_eq!(exemplars[0].filtered_attributes, attrs(&[("user", "u1")]));
        assert_eq!(exemplars[0].span_context, Some(span));
        assert!(exemplars[0].epoch_nanos > 0);
    }

    #[test]
    fn test_bucket_reservoir_most_recent_wins() {
        let reservoir = HistogramBucketExemplarReservoir::new(Arc::from(vec![10.0, 20.0]));
        let ctx = Context::root();
        for v in [1.0, 5.0, 15.0, 25.0, 30.0] {
            reservoir.offer(Number::Double(v), &Attributes::empty(), &ctx);
        }
        let exemplars = reservoir.collect_and_reset(&Attributes::empty());
        let mut seen: Vec<f64> = exemplars.iter().map(|e| e.value.as_f64()).collect();
        seen.sort_by(f64::total_cmp);
        assert_eq!(seen, vec![5.0, 15.0, 30.0]);
        assert!(reservoir
            .collect_and_reset(&Attributes::empty())
            .is_empty());
    }

    #[test]
    fn test_bucket_reservoir_boundary_value_goes_to_lower_bucket() {
        let reservoir = HistogramBucketExemplarReservoir::new(Arc::from(vec![10.0, 20.0]));
        let ctx = Context::root();
        // 10.0 is the upper bound of bucket 0, so it replaces 3.0 there.
        reservoir.offer(Number::Double(3.0), &Attributes::empty(), &ctx);
        reservoir.offer(Number::Double(10.0), &Attributes::empty(), &ctx);
        let exemplars = reservoir.collect_and_reset(&Attributes::empty());
        assert_eq!(exemplars.len(), 1);
        assert_eq!(exemplars[0].value, Number::Double(10.0));
    }
}
