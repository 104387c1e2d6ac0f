use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use super::MetricStorage;
use crate::descriptor::MetricDescriptor;
use crate::error::{MetricsError, Result};

struct Entry {
    storage: Arc<dyn MetricStorage>,
    any: Arc<dyn Any + Send + Sync>,
}

/// Metric storages of one meter, keyed by case-insensitive metric name.
#[derive(Default)]
pub struct MetricStorageRegistry {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MetricStorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `storage`, or return the already registered storage for the
    /// same metric when it is compatible and of the same storage kind.
    pub fn register<S>(&self, storage: Arc<S>) -> Result<Arc<S>>
    where
        S: MetricStorage + Any,
    {
        let mut entries = self.entries.lock();
        register_locked(&mut entries, storage).map(|(registered, _)| registered)
    }

    /// Register every storage of one instrument, or none of them.
    ///
    /// Each returned flag is `true` when the storage was newly added rather
    /// than reused. On error, storages added by this call are removed again.
    pub fn register_all<S>(&self, storages: Vec<Arc<S>>) -> Result<Vec<(Arc<S>, bool)>>
    where
        S: MetricStorage + Any,
    {
        let mut entries = self.entries.lock();
        let mut registered = Vec::with_capacity(storages.len());
        for storage in storages {
            match register_locked(&mut entries, storage) {
                Ok(entry) => registered.push(entry),
                Err(err) => {
                    for (storage, added) in &registered {
                        if *added {
                            entries.remove(&key_of(storage.descriptor()));
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(registered)
    }

    /// Snapshot of every registered storage, ordered by metric name.
    pub fn storages(&self) -> Vec<Arc<dyn MetricStorage>> {
        let entries = self.entries.lock();
        let mut keyed: Vec<_> = entries.iter().collect();
        keyed.sort_unstable_by(|a, b| a.0.cmp(b.0));
        keyed
            .into_iter()
            .map(|(_, entry)| entry.storage.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn key_of(descriptor: &MetricDescriptor) -> String {
    descriptor.name().to_ascii_lowercase()
}

fn register_locked<S>(
    entries: &mut HashMap<String, Entry>,
    storage: Arc<S>,
) -> Result<(Arc<S>, bool)>
where
    S: MetricStorage + Any,
{
    let key = key_of(storage.descriptor());
    if let Some(existing) = entries.get(&key) {
        let reason = conflict(existing.storage.descriptor(), storage.descriptor());
        let reused = existing.any.clone().downcast::<S>().ok();
        return match (reason, reused) {
            (None, Some(reused)) => Ok((reused, false)),
            (reason, _) => {
                let reason =
                    reason.unwrap_or_else(|| "registered with a different storage kind".into());
                let name = storage.descriptor().name();
                warn!(metric = %name, %reason, "duplicate metric registration");
                Err(MetricsError::IncompatibleDescriptor {
                    name: name.to_string(),
                    reason,
                })
            }
        };
    }

    entries.insert(
        key,
        Entry {
            storage: storage.clone(),
            any: storage.clone(),
        },
    );
    Ok((storage, true))
}

fn conflict(existing: &MetricDescriptor, new: &MetricDescriptor) -> Option<String> {
    if let Some(reason) = existing.incompatibility(new) {
        return Some(reason);
    }
    let (a, b) = (existing.source_instrument(), new.source_instrument());
    if a.kind() != b.kind() {
        Some(format!("instrument kind {:?} != {:?}", a.kind(), b.kind()))
    } else if a.value_type() != b.value_type() {
        Some(format!(
            "value type {:?} != {:?}",
            a.value_type(),
            b.value_type()
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::Aggregation;
    use crate::descriptor::{InstrumentDescriptor, InstrumentKind, InstrumentValueType, MeterInfo};
    use crate::exemplar::ExemplarFilter;
    use crate::storage::SynchronousMetricStorage;
    use crate::view::AttributesProcessor;

    fn storage(instrument: InstrumentDescriptor) -> Arc<SynchronousMetricStorage> {
        let aggregator = Aggregation::Default
            .create_aggregator(&instrument, ExemplarFilter::AlwaysOff, 1)
            .unwrap()
            .unwrap();
        Arc::new(SynchronousMetricStorage::new(
            MeterInfo::new("m"),
            MetricDescriptor::from_instrument(&instrument),
            aggregator,
            AttributesProcessor::noop(),
        ))
    }

    fn counter(name: &str) -> InstrumentDescriptor {
        InstrumentDescriptor::new(name, InstrumentKind::Counter, InstrumentValueType::Long)
    }

    #[test]
    fn test_compatible_duplicate_is_reused() {
        let registry = MetricStorageRegistry::new();
        let first = registry.register(storage(counter("hits"))).unwrap();
        let second = registry.register(storage(counter("HITS"))).unwrap_err();
        // Case-insensitive key, but the stored name differs, so it's rejected.
        assert!(matches!(second, MetricsError::IncompatibleDescriptor { .. }));

        let again = registry.register(storage(counter("hits"))).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_incompatible_duplicate_rejected() {
        let registry = MetricStorageRegistry::new();
        registry.register(storage(counter("hits"))).unwrap();

        let described = counter("hits").with_description("other");
        assert!(registry.register(storage(described)).is_err());

        let histogram =
            InstrumentDescriptor::new("hits", InstrumentKind::Histogram, InstrumentValueType::Long);
        assert!(registry.register(storage(histogram)).is_err());
        assert_eq!(registry.storages().len(), 1);
    }

    #[test]
    fn test_register_all_rolls_back_on_conflict() {
        let registry = MetricStorageRegistry::new();
        registry.register(storage(counter("used"))).unwrap();

        let histogram =
            InstrumentDescriptor::new("used", InstrumentKind::Histogram, InstrumentValueType::Long);
        let err = registry
            .register_all(vec![storage(counter("fresh")), storage(histogram)])
            .unwrap_err();
        assert!(matches!(err, MetricsError::IncompatibleDescriptor { .. }));
        assert_eq!(registry.len(), 1);

        let registered = registry
            .register_all(vec![storage(counter("fresh")), storage(counter("used"))])
            .unwrap();
        let added: Vec<bool> = registered.iter().map(|(_, added)| *added).collect();
        assert_eq!(added, vec![true, false]);
        assert_eq!(registry.len(), 2);
    }
}
