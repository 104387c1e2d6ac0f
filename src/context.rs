//! Immutable ambient context carried alongside measurements.
//!
//! A [`Context`] holds the active span linkage (if any) and baggage. It is
//! consumed by trace-based exemplar filtering and by attribute processors that
//! copy baggage onto measurements.
//!
//! Each thread has a "current" context slot. Attaching a context returns a
//! guard that restores the previous one on drop:
//!
//! ```ignore
//! use sdk_metrics::{Context, SpanContext};
//!
//! let ctx = Context::root().with_span(SpanContext::new([1; 16], [2; 8], true));
//! let _guard = ctx.attach();
//! // Instruments recording on this thread now see the sampled span.
//! ```

use std::cell::RefCell;
use std::sync::Arc;

use crate::attributes::Attributes;

thread_local! {
    static CURRENT_CONTEXT: RefCell<Context> = RefCell::new(Context::root());
}

/// Identity of the span active when a measurement was taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SpanContext {
    trace_id: [u8; 16],
    span_id: [u8; 8],
    sampled: bool,
}

impl SpanContext {
    pub fn new(trace_id: [u8; 16], span_id: [u8; 8], sampled: bool) -> Self {
        Self {
            trace_id,
            span_id,
            sampled,
        }
    }

    pub fn trace_id(&self) -> [u8; 16] {
        self.trace_id
    }

    pub fn span_id(&self) -> [u8; 8] {
        self.span_id
    }

    /// All-zero trace or span ids are invalid.
    pub fn is_valid(&self) -> bool {
        self.trace_id != [0; 16] && self.span_id != [0; 8]
    }

    pub fn is_sampled(&self) -> bool {
        self.sampled
    }
}

#[derive(Debug, Default)]
struct ContextInner {
    span: Option<SpanContext>,
    baggage: Attributes,
}

/// An immutable context. Cloning shares the underlying data.
#[derive(Clone, Debug, Default)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// The empty context.
    pub fn root() -> Self {
        Self::default()
    }

    /// Snapshot of the context attached to the calling thread.
    pub fn current() -> Self {
        CURRENT_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    /// A copy of this context carrying `span`.
    pub fn with_span(&self, span: SpanContext) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                span: Some(span),
                baggage: self.inner.baggage.clone(),
            }),
        }
    }

    /// A copy of this context carrying `baggage`.
    pub fn with_baggage(&self, baggage: Attributes) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                span: self.inner.span,
                baggage,
            }),
        }
    }

    pub fn span(&self) -> Option<&SpanContext> {
        self.inner.span.as_ref()
    }

    pub fn baggage(&self) -> &Attributes {
        &self.inner.baggage
    }

    /// Make this the current context for the calling thread until the guard drops.
    pub fn attach(self) -> ContextGuard {
        let previous = CURRENT_CONTEXT.with(|ctx| std::mem::replace(&mut *ctx.borrow_mut(), self));
        ContextGuard {
            previous: Some(previous),
        }
    }
}

/// Restores the previously attached context on drop.
#[must_use = "dropping the guard immediately detaches the context"]
#[derive(Debug)]
pub struct ContextGuard {
    previous: Option<Context>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            CURRENT_CONTEXT.with(|ctx| {
                *ctx.borrow_mut() = previous;
            });
        }
    }
}
