//! Exemplar sampling.
//!
//! Measurements first pass an [`ExemplarFilter`]; those that pass are offered
//! to the [`ExemplarReservoir`] of the aggregator handle they were recorded
//! into. Reservoirs live for one aggregation cycle and are drained when the
//! handle is collected.
//!
//! | Aggregation | Reservoir |
//! |-------------|-----------|
//! | Sum | [`FixedSizeExemplarReservoir`] (uniform sample of k) |
//! | Explicit-bucket histogram | [`HistogramBucketExemplarReservoir`] (latest per bucket) |
//! | Last value | none: gauges never sample exemplars |

mod filter;
mod reservoir;

pub use filter::ExemplarFilter;
pub use reservoir::{
    ExemplarReservoir, FixedSizeExemplarReservoir, HistogramBucketExemplarReservoir,
    NoopExemplarReservoir,
};
