//! Resolution of the views applicable to an instrument.

use std::sync::Arc;

use tracing::debug;

use super::selector::InstrumentSelector;
use super::View;
use crate::descriptor::{InstrumentDescriptor, MeterInfo};

/// A selector paired with the view applied to the instruments it matches.
#[derive(Clone, Debug)]
pub struct RegisteredView {
    selector: InstrumentSelector,
    view: Arc<View>,
}

impl RegisteredView {
    pub fn new(selector: InstrumentSelector, view: View) -> Self {
        Self {
            selector,
            view: Arc::new(view),
        }
    }

    pub fn selector(&self) -> &InstrumentSelector {
        &self.selector
    }

    pub fn view(&self) -> &Arc<View> {
        &self.view
    }
}

/// Ordered list of registered views plus the fallback default view.
///
/// Built once when the provider is constructed and read-only afterwards.
#[derive(Clone, Debug)]
pub struct ViewRegistry {
    views: Vec<RegisteredView>,
    default_view: Arc<View>,
}

impl Default for ViewRegistry {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ViewRegistry {
    pub fn new(views: Vec<RegisteredView>) -> Self {
        Self {
            views,
            default_view: Arc::new(View::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// The view used when no selector matches.
    pub fn default_view(&self) -> &Arc<View> {
        &self.default_view
    }

    /// Every view whose selector matches, in registration order.
    ///
    /// Never empty: falls back to the default view when nothing matches.
    pub fn find_views(
        &self,
        instrument: &InstrumentDescriptor,
        meter: &MeterInfo,
    ) -> Vec<Arc<View>> {
        let matched: Vec<Arc<View>> = self
            .views
            .iter()
            .filter(|registered| registered.selector.matches(instrument, meter))
            .map(|registered| registered.view.clone())
            .collect();

        if matched.is_empty() {
            debug!(
                instrument = instrument.name(),
                meter = meter.name(),
                "no view matched, using default view"
            );
            vec![self.default_view.clone()]
        } else {
            matched
        }
    }
}
