//! Immutable, sorted key-value attribute sets.
//!
//! Attributes identify a time series within a metric. The container is cheap to
//! clone (shared `Arc`), hashable, and always iterates in key order so that two
//! sets built from the same pairs in any order compare and hash equal.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A single attribute value.
#[derive(Clone, Debug)]
pub enum AttributeValue {
    String(Arc<str>),
    Bool(bool),
    I64(i64),
    F64(f64),
}

impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::I64(a), Self::I64(b)) => a == b,
            // Bitwise so that Eq and Hash agree (NaN == NaN here).
            (Self::F64(a), Self::F64(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for AttributeValue {}

impl Hash for AttributeValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::String(s) => s.hash(state),
            Self::Bool(b) => b.hash(state),
            Self::I64(i) => i.hash(state),
            Self::F64(f) => f.to_bits().hash(state),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{}", b),
            Self::I64(i) => write!(f, "{}", i),
            Self::F64(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        Self::String(s.into())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        Self::String(s.into())
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        Self::I64(i)
    }
}

impl From<f64> for AttributeValue {
    fn from(f: f64) -> Self {
        Self::F64(f)
    }
}

/// An immutable set of attributes sorted by key.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Attributes {
    inner: Arc<BTreeMap<Arc<str>, AttributeValue>>,
}

impl Attributes {
    /// The empty attribute set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Look up a value by key.
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.inner.get(key)
    }

    /// Whether the set has an entry for `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.inner.iter().map(|(k, v)| (k.as_ref(), v))
    }

    /// Keep only entries whose key satisfies `keep`.
    ///
    /// Returns a clone sharing the same storage when nothing is removed.
    pub fn filter_keys(&self, keep: impl Fn(&str) -> bool) -> Self {
        if self.inner.keys().all(|k| keep(k)) {
            return self.clone();
        }
        let filtered = self
            .inner
            .iter()
            .filter(|(k, _)| keep(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self {
            inner: Arc::new(filtered),
        }
    }

    /// Merge `other` into a copy of `self`; entries already present in `self` win.
    pub fn merge_missing(&self, other: &Attributes) -> Self {
        if other.is_empty() {
            return self.clone();
        }
        let mut merged = (*self.inner).clone();
        for (k, v) in other.inner.iter() {
            merged.entry(k.clone()).or_insert_with(|| v.clone());
        }
        Self {
            inner: Arc::new(merged),
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Attributes
where
    K: Into<Arc<str>>,
    V: Into<AttributeValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            inner: Arc::new(
                iter.into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
