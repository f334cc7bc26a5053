//! Atomic-swap membership set
//!
//! The authoritative data is an ordered list reloaded from outside; the set
//! here is a derived cache. `reload` builds the new `HashSet` completely off
//! the lock and swaps the `Arc` pointer in one step. A reader holds either
//! the old set or the new one, never a partially filled one.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

/// O(1) membership cache rebuilt wholesale, never mutated in place
#[derive(Debug)]
pub struct FastLookupSet<T> {
    inner: RwLock<Arc<HashSet<T>>>,
}

impl<T: Eq + Hash> FastLookupSet<T> {
    /// Create an empty set
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(HashSet::new())),
        }
    }

    /// Rebuild the set from an authoritative list and swap it in
    ///
    /// Duplicates in the source list collapse; order is irrelevant to
    /// membership.
    pub fn reload<I>(&self, entries: I)
    where
        I: IntoIterator<Item = T>,
    {
        let fresh: Arc<HashSet<T>> = Arc::new(entries.into_iter().collect());
        match self.inner.write() {
            Ok(mut guard) => *guard = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
    }

    /// O(1) membership test
    pub fn contains(&self, key: &T) -> bool {
        self.load().contains(key)
    }

    /// Number of entries in the current set
    pub fn len(&self) -> usize {
        self.load().len()
    }

    /// True when the current set has no entries
    pub fn is_empty(&self) -> bool {
        self.load().is_empty()
    }

    fn load(&self) -> Arc<HashSet<T>> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }
}

impl<T: Eq + Hash> Default for FastLookupSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reload_replaces_wholesale() {
        let set: FastLookupSet<String> = FastLookupSet::new();
        set.reload(["A".to_string(), "B".to_string()]);
        assert!(set.contains(&"A".to_string()));
        assert!(set.contains(&"B".to_string()));

        set.reload(["C".to_string()]);
        assert!(!set.contains(&"A".to_string()));
        assert!(set.contains(&"C".to_string()));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn duplicates_collapse() {
        let set: FastLookupSet<u16> = FastLookupSet::new();
        set.reload([7, 7, 7]);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn readers_see_old_or_new_never_partial() {
        use std::sync::Arc as StdArc;
        use std::thread;

        let set: StdArc<FastLookupSet<u32>> = StdArc::new(FastLookupSet::new());
        set.reload(0..1000);

        let reader = {
            let set = StdArc::clone(&set);
            thread::spawn(move || {
                for _ in 0..200 {
                    let snapshot = set.load();
                    // Either the full old set or the full new set
                    assert!(snapshot.len() == 1000 || snapshot.len() == 500);
                }
            })
        };
        let writer = {
            let set = StdArc::clone(&set);
            thread::spawn(move || {
                for _ in 0..50 {
                    set.reload(0..500);
                    set.reload(0..1000);
                }
            })
        };
        reader.join().unwrap();
        writer.join().unwrap();
    }
}
