//! Declarative views: what aggregation and identity each instrument gets.
//!
//! A [`View`] optionally renames an instrument's metric, overrides its
//! description, picks an [`Aggregation`], and transforms measurement attributes
//! with an [`AttributesProcessor`]. A [`RegisteredView`] pairs a view with an
//! [`InstrumentSelector`]; the [`ViewRegistry`] resolves every view that applies
//! to an instrument.
//!
//! # Example
//!
//! ```ignore
//! use sdk_metrics::view::{InstrumentSelector, View};
//! use sdk_metrics::{Aggregation, InstrumentKind, MeterProviderBuilder};
//!
//! let provider = MeterProviderBuilder::new()
//!     .register_view(
//!         InstrumentSelector::builder(InstrumentKind::Histogram)
//!             .name("http.server.duration")
//!             .build(),
//!         View::builder()
//!             .aggregation(Aggregation::explicit_bucket_histogram(vec![0.1, 0.5, 1.0])?)
//!             .build(),
//!     )
//!     .build()?;
//! ```

mod processor;
mod registry;
mod selector;

pub use processor::AttributesProcessor;
pub use registry::{RegisteredView, ViewRegistry};
pub use selector::{
    InstrumentSelector, InstrumentSelectorBuilder, MatchRule, MeterSelector, MeterSelectorBuilder,
};

use crate::aggregation::Aggregation;

/// Transformation rules applied to the instruments a selector matches.
#[derive(Clone, Debug, Default)]
pub struct View {
    name: Option<String>,
    description: Option<String>,
    aggregation: Aggregation,
    attributes_processor: AttributesProcessor,
}

impl View {
    pub fn builder() -> ViewBuilder {
        ViewBuilder::default()
    }

    /// Metric name override.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Metric description override.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn aggregation(&self) -> &Aggregation {
        &self.aggregation
    }

    pub fn attributes_processor(&self) -> &AttributesProcessor {
        &self.attributes_processor
    }
}

/// Builder for [`View`].
#[derive(Debug, Default)]
pub struct ViewBuilder {
    view: View,
}

impl ViewBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.view.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.view.description = Some(description.into());
        self
    }

    pub fn aggregation(mut self, aggregation: Aggregation) -> Self {
        self.view.aggregation = aggregation;
        self
    }

    /// Replace the processor chain.
    pub fn attributes_processor(mut self, processor: AttributesProcessor) -> Self {
        self.view.attributes_processor = processor;
        self
    }

    /// Append a processor to the existing chain.
    pub fn add_attributes_processor(mut self, processor: AttributesProcessor) -> Self {
        self.view.attributes_processor = self.view.attributes_processor.then(processor);
        self
    }

    pub fn build(self) -> View {
        self.view
    }
}
