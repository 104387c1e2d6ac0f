//! Predicates choosing which instruments a view applies to.

use std::fmt;
use std::sync::Arc;

use glob::Pattern;

use crate::descriptor::{InstrumentDescriptor, InstrumentKind, MeterInfo};

type Predicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// How one string field of an instrument or meter is matched.
#[derive(Clone, Default)]
pub enum MatchRule {
    /// Matches every value.
    #[default]
    Any,
    /// Exact string equality.
    Exact(String),
    /// Glob-style pattern (`*`, `?`, `[...]`).
    Pattern(Pattern),
    /// Arbitrary predicate.
    Predicate(Predicate),
}

impl MatchRule {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => expected == value,
            Self::Pattern(pattern) => pattern.matches(value),
            Self::Predicate(predicate) => predicate(value),
        }
    }

    /// Match an optional field. An absent value always matches.
    pub fn matches_optional(&self, value: Option<&str>) -> bool {
        value.map_or(true, |v| self.matches(v))
    }
}

impl fmt::Debug for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("Any"),
            Self::Exact(s) => f.debug_tuple("Exact").field(s).finish(),
            Self::Pattern(p) => f.debug_tuple("Pattern").field(&p.as_str()).finish(),
            Self::Predicate(_) => f.write_str("Predicate(<fn>)"),
        }
    }
}

/// Matches meters by name, version and schema URL.
///
/// Version and schema URL rules only apply when the meter supplies a value.
#[derive(Clone, Debug, Default)]
pub struct MeterSelector {
    name: MatchRule,
    version: MatchRule,
    schema_url: MatchRule,
}

impl MeterSelector {
    /// A selector matching every meter.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn builder() -> MeterSelectorBuilder {
        MeterSelectorBuilder::default()
    }

    pub fn matches(&self, meter: &MeterInfo) -> bool {
        self.name.matches(meter.name())
            && self.version.matches_optional(meter.version())
            && self.schema_url.matches_optional(meter.schema_url())
    }
}

/// Builder for [`MeterSelector`].
///
/// Setting a rule for a field replaces any earlier rule for that field.
#[derive(Debug, Default)]
pub struct MeterSelectorBuilder {
    selector: MeterSelector,
}

impl MeterSelectorBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.selector.name = MatchRule::Exact(name.into());
        self
    }

    pub fn name_pattern(mut self, pattern: Pattern) -> Self {
        self.selector.name = MatchRule::Pattern(pattern);
        self
    }

    pub fn name_filter(mut self, filter: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.selector.name = MatchRule::Predicate(Arc::new(filter));
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.selector.version = MatchRule::Exact(version.into());
        self
    }

    pub fn version_pattern(mut self, pattern: Pattern) -> Self {
        self.selector.version = MatchRule::Pattern(pattern);
        self
    }

    pub fn version_filter(mut self, filter: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.selector.version = MatchRule::Predicate(Arc::new(filter));
        self
    }

    pub fn schema_url(mut self, url: impl Into<String>) -> Self {
        self.selector.schema_url = MatchRule::Exact(url.into());
        self
    }

    pub fn schema_url_pattern(mut self, pattern: Pattern) -> Self {
        self.selector.schema_url = MatchRule::Pattern(pattern);
        self
    }

    pub fn schema_url_filter(
        mut self,
        filter: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.selector.schema_url = MatchRule::Predicate(Arc::new(filter));
        self
    }

    pub fn build(self) -> MeterSelector {
        self.selector
    }
}

/// Matches instruments by exact kind, name rule and meter.
#[derive(Clone, Debug)]
pub struct InstrumentSelector {
    kind: InstrumentKind,
    name: MatchRule,
    meter: MeterSelector,
}

impl InstrumentSelector {
    /// Start a selector for instruments of `kind`.
    pub fn builder(kind: InstrumentKind) -> InstrumentSelectorBuilder {
        InstrumentSelectorBuilder {
            selector: InstrumentSelector {
                kind,
                name: MatchRule::Any,
                meter: MeterSelector::any(),
            },
        }
    }

    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }

    pub fn matches(&self, instrument: &InstrumentDescriptor, meter: &MeterInfo) -> bool {
        instrument.kind() == self.kind
            && self.name.matches(instrument.name())
            && self.meter.matches(meter)
    }
}

/// Builder for [`InstrumentSelector`].
///
/// Setting a rule for a field replaces any earlier rule for that field.
#[derive(Debug)]
pub struct InstrumentSelectorBuilder {
    selector: InstrumentSelector,
}

impl InstrumentSelectorBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.selector.name = MatchRule::Exact(name.into());
        self
    }

    pub fn name_pattern(mut self, pattern: Pattern) -> Self {
        self.selector.name = MatchRule::Pattern(pattern);
        self
    }

    pub fn name_filter(mut self, filter: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.selector.name = MatchRule::Predicate(Arc::new(filter));
        self
    }

    pub fn meter(mut self, meter: MeterSelector) -> Self {
        self.selector.meter = meter;
        self
    }

    pub fn build(self) -> InstrumentSelector {
        self.selector
    }
}
