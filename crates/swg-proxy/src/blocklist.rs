//! Blocklist store shared between the refresh task and request handlers.
//!
//! ## Architecture
//!
//! ```text
//! PolicyFetcher ──replace()──► BlocklistStore ◄──lookup()/snapshot()── DomainMatcher
//!                              RwLock<Arc<HashSet>>
//! ```
//!
//! The lock only guards the `Arc` pointer. Readers clone the pointer and
//! release the lock immediately, so a lookup never waits on a writer for
//! longer than a pointer swap and never sees a half-built set.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// An immutable, point-in-time set of normalized blocked domains.
pub type Snapshot = Arc<HashSet<String>>;

/// Holds the current blocklist snapshot.
///
/// Cloning is cheap and every clone observes the same snapshot.
#[derive(Clone)]
pub struct BlocklistStore {
    /// Current snapshot; replaced wholesale, never mutated.
    current: Arc<RwLock<Snapshot>>,
    /// Number of replacements installed so far.
    generation: Arc<AtomicU64>,
}

impl std::fmt::Debug for BlocklistStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlocklistStore")
            .field("entries", &self.len())
            .field("generation", &self.generation())
            .finish()
    }
}

impl Default for BlocklistStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlocklistStore {
    /// Creates a store holding an empty snapshot.
    pub fn new() -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(HashSet::new()))),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creates a store with an initial snapshot.
    ///
    /// Entries are installed as given; callers are expected to pass
    /// normalized domains.
    pub fn with_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        store.replace(entries.into_iter().map(Into::into).collect());
        store
    }

    /// Installs a new snapshot atomically and returns its generation.
    ///
    /// The set is moved into its `Arc` before the write lock is taken, so the
    /// critical section is the pointer swap alone.
    pub fn replace(&self, entries: HashSet<String>) -> u64 {
        let next: Snapshot = Arc::new(entries);
        let mut current = self.current.write();
        *current = next;
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns a handle to the current snapshot.
    ///
    /// Use this to run several membership tests against one consistent set.
    #[inline]
    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.current.read())
    }

    /// Membership test against the current snapshot.
    #[inline]
    pub fn lookup(&self, domain: &str) -> bool {
        self.snapshot().contains(domain)
    }

    /// Number of entries in the current snapshot.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether the current snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Number of snapshots installed since the store was created.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn set(domains: &[&str]) -> HashSet<String> {
        domains.iter().map(|d| d.to_string()).collect()
    }

    #[test]
    fn new_store_is_empty() {
        let store = BlocklistStore::new();
        assert!(store.is_empty());
        assert_eq!(store.generation(), 0);
        assert!(!store.lookup("facebook.com"));
    }

    #[test]
    fn replace_installs_whole_set() {
        let store = BlocklistStore::new();
        let generation = store.replace(set(&["facebook.com", "tiktok.com"]));

        assert_eq!(generation, 1);
        assert_eq!(store.len(), 2);
        assert!(store.lookup("facebook.com"));
        assert!(store.lookup("tiktok.com"));

        store.replace(set(&["reddit.com"]));
        assert_eq!(store.generation(), 2);
        assert!(!store.lookup("facebook.com"));
        assert!(store.lookup("reddit.com"));
    }

    #[test]
    fn old_snapshot_survives_replace() {
        let store = BlocklistStore::with_entries(["facebook.com"]);
        let before = store.snapshot();

        store.replace(HashSet::new());

        assert!(before.contains("facebook.com"));
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn clones_share_state() {
        let store = BlocklistStore::new();
        let reader = store.clone();

        store.replace(set(&["youtube.com"]));

        assert!(reader.lookup("youtube.com"));
        assert_eq!(reader.generation(), 1);
    }

    #[test]
    fn debug_impl() {
        let store = BlocklistStore::with_entries(["a.com"]);
        let debug = format!("{:?}", store);
        assert!(debug.contains("BlocklistStore"));
        assert!(debug.contains("entries: 1"));
    }

    #[test]
    fn concurrent_readers_never_see_torn_snapshot() {
        let old = set(&["a.com", "b.com", "c.com"]);
        let new = set(&["x.com", "y.com"]);
        let store = BlocklistStore::new();
        store.replace(old.clone());

        let writer = {
            let store = store.clone();
            let (old, new) = (old.clone(), new.clone());
            thread::spawn(move || {
                for i in 0..2_000 {
                    let next = if i % 2 == 0 { new.clone() } else { old.clone() };
                    store.replace(next);
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                let (old, new) = (old.clone(), new.clone());
                thread::spawn(move || {
                    for _ in 0..5_000 {
                        let snapshot = store.snapshot();
                        assert!(
                            *snapshot == old || *snapshot == new,
                            "observed a partial snapshot: {:?}",
                            snapshot
                        );
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.generation(), 2_001);
    }
}
