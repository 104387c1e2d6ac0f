//! Instrument and metric identity.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::view::View;

/// The kind of a registered instrument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentKind {
    Counter,
    UpDownCounter,
    Histogram,
    ObservableSum,
    ObservableUpDownSum,
    ObservableGauge,
}

impl InstrumentKind {
    /// Whether measurements are pushed by the caller (as opposed to observed
    /// by a callback at collection time).
    pub fn is_synchronous(self) -> bool {
        matches!(self, Self::Counter | Self::UpDownCounter | Self::Histogram)
    }

    /// Whether the sum of measurements can only grow.
    pub fn is_monotonic(self) -> bool {
        matches!(self, Self::Counter | Self::Histogram | Self::ObservableSum)
    }
}

/// Numeric type of an instrument's measurements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentValueType {
    Long,
    Double,
}

/// Where an instrument was registered, for diagnosing conflicting registrations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SourceInfo {
    pub file: Option<&'static str>,
    pub line: Option<u32>,
}

impl SourceInfo {
    /// Capture the caller's location.
    #[track_caller]
    pub fn caller() -> Self {
        let location = std::panic::Location::caller();
        Self {
            file: Some(location.file()),
            line: Some(location.line()),
        }
    }
}

impl fmt::Display for SourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{}:{}", file, line),
            (Some(file), None) => f.write_str(file),
            _ => f.write_str("<unknown source>"),
        }
    }
}

/// Identity and static metadata of a registered instrument. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InstrumentDescriptor {
    name: Arc<str>,
    description: Arc<str>,
    unit: Arc<str>,
    kind: InstrumentKind,
    value_type: InstrumentValueType,
    source: SourceInfo,
}

impl InstrumentDescriptor {
    #[track_caller]
    pub fn new(
        name: impl Into<Arc<str>>,
        kind: InstrumentKind,
        value_type: InstrumentValueType,
    ) -> Self {
        Self {
            name: name.into(),
            description: "".into(),
            unit: "".into(),
            kind,
            value_type,
            source: SourceInfo::caller(),
        }
    }

    pub fn with_description(mut self, description: impl Into<Arc<str>>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<Arc<str>>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }

    pub fn value_type(&self) -> InstrumentValueType {
        self.value_type
    }

    pub fn source(&self) -> &SourceInfo {
        &self.source
    }
}

/// Identity of the meter (instrumentation scope) an instrument belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MeterInfo {
    name: Arc<str>,
    version: Option<Arc<str>>,
    schema_url: Option<Arc<str>>,
}

impl MeterInfo {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            version: None,
            schema_url: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<Arc<str>>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_schema_url(mut self, schema_url: impl Into<Arc<str>>) -> Self {
        self.schema_url = Some(schema_url.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn schema_url(&self) -> Option<&str> {
        self.schema_url.as_deref()
    }
}

/// Identity of the metric stream produced by applying a [`View`] to an instrument.
///
/// Name, description and unit come from the view when it overrides them and
/// from the instrument otherwise.
#[derive(Clone, Debug)]
pub struct MetricDescriptor {
    name: Arc<str>,
    description: Arc<str>,
    unit: Arc<str>,
    source_view: Option<Arc<View>>,
    source_instrument: InstrumentDescriptor,
}

impl MetricDescriptor {
    /// Descriptor for `instrument` as transformed by `view`.
    pub fn new(view: &Arc<View>, instrument: &InstrumentDescriptor) -> Self {
        Self {
            name: view
                .name()
                .map(Arc::from)
                .unwrap_or_else(|| instrument.name.clone()),
            description: view
                .description()
                .map(Arc::from)
                .unwrap_or_else(|| instrument.description.clone()),
            unit: instrument.unit.clone(),
            source_view: Some(view.clone()),
            source_instrument: instrument.clone(),
        }
    }

    /// Descriptor carrying the instrument identity with no view applied.
    pub fn from_instrument(instrument: &InstrumentDescriptor) -> Self {
        Self {
            name: instrument.name.clone(),
            description: instrument.description.clone(),
            unit: instrument.unit.clone(),
            source_view: None,
            source_instrument: instrument.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn source_view(&self) -> Option<&Arc<View>> {
        self.source_view.as_ref()
    }

    pub fn source_instrument(&self) -> &InstrumentDescriptor {
        &self.source_instrument
    }

    /// Two descriptors are compatible iff name, description and unit all match.
    pub fn is_compatible_with(&self, other: &MetricDescriptor) -> bool {
        self.name == other.name && self.description == other.description && self.unit == other.unit
    }

    /// Human readable description of why `other` is incompatible, if it is.
    pub(crate) fn incompatibility(&self, other: &MetricDescriptor) -> Option<String> {
        if self.name != other.name {
            Some(format!("name '{}' != '{}'", self.name, other.name))
        } else if self.description != other.description {
            Some(format!(
                "description '{}' != '{}'",
                self.description, other.description
            ))
        } else if self.unit != other.unit {
            Some(format!("unit '{}' != '{}'", self.unit, other.unit))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter(name: &str) -> InstrumentDescriptor {
        InstrumentDescriptor::new(name, InstrumentKind::Counter, InstrumentValueType::Long)
    }

    #[test]
    fn test_kind_properties() {
        assert!(InstrumentKind::Counter.is_synchronous());
        assert!(!InstrumentKind::ObservableGauge.is_synchronous());
        assert!(InstrumentKind::Counter.is_monotonic());
        assert!(!InstrumentKind::UpDownCounter.is_monotonic());
        assert!(!InstrumentKind::ObservableUpDownSum.is_monotonic());
    }

    #[test]
    fn test_source_info_captured() {
        let descriptor = counter("requests");
        assert_eq!(descriptor.source().file, Some(file!()));
        assert!(descriptor.source().to_string().contains("descriptor.rs"));
    }

    #[test]
    fn test_view_overrides_name_and_description() {
        let instrument = counter("requests").with_description("raw").with_unit("1");
        let view = Arc::new(View::builder().name("http.requests").build());
        let metric = MetricDescriptor::new(&view, &instrument);
        assert_eq!(metric.name(), "http.requests");
        assert_eq!(metric.description(), "raw");
        assert_eq!(metric.unit(), "1");
        assert!(metric.source_view().is_some());
    }

    #[test]
    fn test_compatibility() {
        let a = MetricDescriptor::from_instrument(&counter("x").with_unit("ms"));
        let b = MetricDescriptor::from_instrument(&counter("x").with_unit("ms"));
        let c = MetricDescriptor::from_instrument(&counter("x").with_unit("s"));
        assert!(a.is_compatible_with(&b));
        assert!(!a.is_compatible_with(&c));
        assert!(a.incompatibility(&c).unwrap().contains("unit"));
    }
}
