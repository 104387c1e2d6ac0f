//! Attribute transformations applied to measurements before aggregation.

use std::fmt;
use std::sync::Arc;

use crate::attributes::Attributes;
use crate::context::Context;

type ProcessFn = Arc<dyn Fn(&Attributes, &Context) -> Attributes + Send + Sync>;

/// A pure function of (incoming attributes, context) to attributes.
///
/// Processors compose with [`then`](Self::then). The composed processor
/// reports [`uses_context`](Self::uses_context) if any part does, which lets
/// the recording path skip capturing the current context when no processor
/// reads it.
#[derive(Clone)]
pub struct AttributesProcessor {
    steps: Vec<ProcessFn>,
    uses_context: bool,
}

impl Default for AttributesProcessor {
    fn default() -> Self {
        Self::noop()
    }
}

impl AttributesProcessor {
    /// Returns incoming attributes unchanged.
    pub fn noop() -> Self {
        Self {
            steps: Vec::new(),
            uses_context: false,
        }
    }

    /// A processor from a function that ignores context.
    pub fn simple(f: impl Fn(&Attributes) -> Attributes + Send + Sync + 'static) -> Self {
        Self {
            steps: vec![Arc::new(move |attrs: &Attributes, _: &Context| f(attrs))],
            uses_context: false,
        }
    }

    /// A processor from a function that reads context.
    pub fn with_context(
        f: impl Fn(&Attributes, &Context) -> Attributes + Send + Sync + 'static,
    ) -> Self {
        Self {
            steps: vec![Arc::new(f)],
            uses_context: true,
        }
    }

    /// Keep only attributes whose key satisfies `keep`.
    pub fn filter_by_key_name(keep: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self::simple(move |attrs| attrs.filter_keys(&keep))
    }

    /// Copy baggage entries whose key satisfies `keep` onto the attributes.
    ///
    /// Attributes already present on the measurement win over baggage.
    pub fn append_baggage_by_key_name(
        keep: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::with_context(move |attrs, ctx| {
            let baggage = ctx.baggage().filter_keys(&keep);
            attrs.merge_missing(&baggage)
        })
    }

    /// Apply `self`, then `next` to its output.
    pub fn then(mut self, next: AttributesProcessor) -> Self {
        self.steps.extend(next.steps);
        self.uses_context |= next.uses_context;
        self
    }

    pub fn uses_context(&self) -> bool {
        self.uses_context
    }

    pub fn process(&self, attributes: &Attributes, context: &Context) -> Attributes {
        let mut current = attributes.clone();
        for step in &self.steps {
            current = step(&current, context);
        }
        current
    }
}

impl fmt::Debug for AttributesProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributesProcessor")
            .field("steps", &self.steps.len())
            .field("uses_context", &self.uses_context)
            .finish()
    }
}
