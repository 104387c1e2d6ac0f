//! Per-reader identity and temporality negotiation for collection cycles.
//!
//! Every registered reader gets one [`CollectionHandle`] from the provider's
//! [`HandleSupplier`]. The handle keys all per-reader state inside metric
//! storages, which is what lets several readers share one accumulator while
//! each sees its own cumulative or delta view.
//!
//! # Architecture
//!
//! ```text
//! MeterProvider
//!   ├── HandleSupplier (1, 2, 3, ... never reused)
//!   └── per reader: CollectionInfo
//!         ├── handle:  CollectionHandle(n)
//!         ├── all:     Arc<CollectionHandleSet>  (every registered handle)
//!         └── reader:  Weak<dyn MetricReader> + cached temporality
//! ```

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::export::MetricReader;

/// Whether reported values are cumulative since start or delta since the last collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationTemporality {
    Cumulative,
    Delta,
}

/// Opaque reader identity backed by a strictly increasing index.
///
/// Equality and hashing depend only on the index.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CollectionHandle {
    index: u64,
}

impl CollectionHandle {
    pub fn index(&self) -> u64 {
        self.index
    }
}

impl Hash for CollectionHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.index);
    }
}

impl fmt::Debug for CollectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CollectionHandle({})", self.index)
    }
}

impl fmt::Display for CollectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reader-{}", self.index)
    }
}

/// Monotonic source of collection handles, owned by one provider.
#[derive(Debug)]
pub struct HandleSupplier {
    next: AtomicU64,
}

impl Default for HandleSupplier {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleSupplier {
    /// Create a supplier whose first handle has index 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate the next handle. Indices are never reused.
    pub fn next_handle(&self) -> CollectionHandle {
        CollectionHandle {
            index: self.next.fetch_add(1, Ordering::Relaxed),
        }
    }
}

const WORD_BITS: u64 = 64;

/// A set of collection handles.
///
/// When the number of readers is bounded and known up front the set is a
/// fixed-width bit vector indexed by handle index; otherwise it is a hash set.
/// Membership, union and iteration (ascending index) behave the same either way.
#[derive(Clone, Debug)]
pub enum CollectionHandleSet {
    Bits { words: Vec<u64> },
    Hashed(HashSet<CollectionHandle>),
}

impl CollectionHandleSet {
    /// An empty set able to hold handles with index up to `max_index` in bit form.
    pub fn with_max_index(max_index: u64) -> Self {
        let words = (max_index / WORD_BITS + 1) as usize;
        Self::Bits {
            words: vec![0; words],
        }
    }

    /// An empty hash-backed set.
    pub fn hashed() -> Self {
        Self::Hashed(HashSet::new())
    }

    /// Insert a handle, returning `true` if it was not present.
    ///
    /// A bit set grows when a handle beyond its initial width is inserted.
    pub fn insert(&mut self, handle: CollectionHandle) -> bool {
        match self {
            Self::Bits { words } => {
                let (word, bit) = Self::position(handle);
                if word >= words.len() {
                    words.resize(word + 1, 0);
                }
                let was_set = words[word] & bit != 0;
                words[word] |= bit;
                !was_set
            }
            Self::Hashed(set) => set.insert(handle),
        }
    }

    pub fn contains(&self, handle: CollectionHandle) -> bool {
        match self {
            Self::Bits { words } => {
                let (word, bit) = Self::position(handle);
                words.get(word).is_some_and(|w| w & bit != 0)
            }
            Self::Hashed(set) => set.contains(&handle),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Bits { words } => words.iter().map(|w| w.count_ones() as usize).sum(),
            Self::Hashed(set) => set.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add every member of `other` to `self`.
    pub fn union_with(&mut self, other: &CollectionHandleSet) {
        for handle in other.iter() {
            self.insert(handle);
        }
    }

    /// Members in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = CollectionHandle> + '_ {
        let handles: Vec<CollectionHandle> = match self {
            Self::Bits { words } => words
                .iter()
                .enumerate()
                .flat_map(|(i, &word)| {
                    (0..WORD_BITS)
                        .filter(move |bit| word & (1u64 << bit) != 0)
                        .map(move |bit| CollectionHandle {
                            index: i as u64 * WORD_BITS + bit,
                        })
                })
                .collect(),
            Self::Hashed(set) => {
                let mut handles: Vec<_> = set.iter().copied().collect();
                handles.sort_unstable();
                handles
            }
        };
        handles.into_iter()
    }

    fn position(handle: CollectionHandle) -> (usize, u64) {
        (
            (handle.index / WORD_BITS) as usize,
            1u64 << (handle.index % WORD_BITS),
        )
    }
}

impl PartialEq for CollectionHandleSet {
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

/// One reader's view of a collection cycle.
///
/// Binds the reader's handle, the set of every registered handle, and the
/// reader itself along with its temporality preferences.
#[derive(Clone)]
pub struct CollectionInfo {
    handle: CollectionHandle,
    all_handles: Arc<CollectionHandleSet>,
    reader: Weak<dyn MetricReader>,
    preferred: AggregationTemporality,
    supported: Vec<AggregationTemporality>,
}

impl CollectionInfo {
    pub fn new(
        handle: CollectionHandle,
        all_handles: Arc<CollectionHandleSet>,
        reader: &Arc<dyn MetricReader>,
    ) -> Self {
        Self {
            handle,
            all_handles,
            reader: Arc::downgrade(reader),
            preferred: reader.preferred_temporality(),
            supported: reader.supported_temporality(),
        }
    }

    pub fn handle(&self) -> CollectionHandle {
        self.handle
    }

    pub fn all_handles(&self) -> &CollectionHandleSet {
        &self.all_handles
    }

    /// The owning reader, while it is still alive.
    pub fn reader(&self) -> Option<Arc<dyn MetricReader>> {
        self.reader.upgrade()
    }

    pub fn preferred_temporality(&self) -> AggregationTemporality {
        self.preferred
    }

    pub fn supported_temporality(&self) -> &[AggregationTemporality] {
        &self.supported
    }
}

impl fmt::Debug for CollectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionInfo")
            .field("handle", &self.handle)
            .field("all_handles", &self.all_handles.len())
            .field("preferred", &self.preferred)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(handle: &CollectionHandle) -> u64 {
        let mut hasher = DefaultHasher::new();
        handle.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_supplier_strictly_increasing() {
        let supplier = HandleSupplier::new();
        let handles: Vec<_> = (0..100).map(|_| supplier.next_handle()).collect();

        assert_eq!(handles[0].index(), 1);
        for pair in handles.windows(2) {
            assert!(pair[0].index() < pair[1].index());
            assert_ne!(pair[0], pair[1]);
        }
        let distinct: HashSet<_> = handles.iter().copied().collect();
        assert_eq!(distinct.len(), 100);
    }

    #[test]
    fn test_equality_and_hash_depend_on_index() {
        let a = CollectionHandle { index: 7 };
        let b = CollectionHandle { index: 7 };
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_supplier_concurrent_uniqueness() {
        let supplier = Arc::new(HandleSupplier::new());
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let supplier = supplier.clone();
                std::thread::spawn(move || {
                    (0..250).map(|_| supplier.next_handle()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for t in threads {
            for handle in t.join().unwrap() {
                assert!(all.insert(handle));
            }
        }
        assert_eq!(all.len(), 1000);
    }

    #[test]
    fn test_bit_and_hash_sets_agree() {
        let supplier = HandleSupplier::new();
        let handles: Vec<_> = (0..70).map(|_| supplier.next_handle()).collect();

        let mut bits = CollectionHandleSet::with_max_index(8);
        let mut hashed = CollectionHandleSet::hashed();
        for handle in handles.iter().rev().step_by(3) {
            assert!(bits.insert(*handle));
            assert!(hashed.insert(*handle));
        }
        assert!(!bits.insert(handles[69]));

        assert_eq!(bits.len(), hashed.len());
        assert_eq!(bits, hashed);
        for handle in &handles {
            assert_eq!(bits.contains(*handle), hashed.contains(*handle));
        }

        let order: Vec<_> = bits.iter().map(|h| h.index()).collect();
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(order, sorted);
    }

    #[test]
    fn test_union() {
        let supplier = HandleSupplier::new();
        let (a, b, c) = (
            supplier.next_handle(),
            supplier.next_handle(),
            supplier.next_handle(),
        );

        let mut left = CollectionHandleSet::with_max_index(3);
        left.insert(a);
        let mut right = CollectionHandleSet::hashed();
        right.insert(b);
        right.insert(c);

        left.union_with(&right);
        assert_eq!(left.iter().collect::<Vec<_>>(), vec![a, b, c]);
    }
}
