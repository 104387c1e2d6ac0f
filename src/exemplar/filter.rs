use serde::{Deserialize, Serialize};

use crate::context::Context;

/// Gate deciding whether a measurement is offered to an exemplar reservoir.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ExemplarFilter {
    /// Offer every measurement.
    AlwaysOn,
    /// Offer nothing.
    AlwaysOff,
    /// Offer measurements taken while a sampled span is active.
    #[default]
    TraceBased,
}

impl ExemplarFilter {
    #[inline]
    pub fn should_sample(self, context: &Context) -> bool {
        match self {
            Self::AlwaysOn => true,
            Self::AlwaysOff => false,
            Self::TraceBased => context
                .span()
                .is_some_and(|span| span.is_valid() && span.is_sampled()),
        }
    }

    /// Whether [`should_sample`](Self::should_sample) reads the context.
    pub fn needs_context(self) -> bool {
        self == Self::TraceBased
    }
}
